use std::sync::Arc;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Progress {
    pub transferred: u64,
    pub expected: u64,
}

impl Progress {
    pub const fn new(transferred: u64, expected: u64) -> Self {
        Self {
            transferred,
            expected,
        }
    }

    /// Completed fraction in `[0, 1]`, or `None` while the expected total is unknown.
    pub fn fraction(&self) -> Option<f64> {
        if self.expected == 0 {
            return None;
        }
        Some((self.transferred as f64 / self.expected as f64).clamp(0.0, 1.0))
    }
}

type ProgressCallback = dyn Fn(f64) + Send + Sync;

#[derive(Clone, Default)]
pub struct ProgressReporter {
    callback: Option<Arc<ProgressCallback>>,
}

impl ProgressReporter {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        Self {
            callback: Some(Arc::new(callback)),
        }
    }

    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn is_enabled(&self) -> bool {
        self.callback.is_some()
    }

    pub fn report(&self, transferred: u64, expected: u64) {
        let Some(callback) = &self.callback else {
            return;
        };
        if let Some(fraction) = Progress::new(transferred, expected).fraction() {
            callback(fraction);
        }
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ProgressReporter")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::{Progress, ProgressReporter};

    #[test]
    fn fraction_is_none_without_expected_total() {
        assert_eq!(Progress::new(10, 0).fraction(), None);
        assert_eq!(Progress::new(5, 10).fraction(), Some(0.5));
    }

    #[test]
    fn fraction_is_clamped_when_transport_overshoots() {
        assert_eq!(Progress::new(12, 10).fraction(), Some(1.0));
    }

    #[test]
    fn reporter_skips_emission_for_zero_expected_total() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let reporter = ProgressReporter::new(move |fraction| {
            sink.lock().expect("progress sink lock").push(fraction);
        });

        reporter.report(3, 0);
        reporter.report(1, 4);
        reporter.report(4, 4);

        assert_eq!(*seen.lock().expect("progress sink lock"), vec![0.25, 1.0]);
    }
}
