use std::sync::Arc;
use std::time::Duration;

use rand::RngExt;

use crate::error::Error;

/// Decides whether a failed attempt is worth another try. `attempt` is the zero-based
/// index of the attempt that just failed.
pub trait RetryClassifier: Send + Sync {
    fn should_retry(&self, error: &Error, attempt: usize) -> bool;
}

impl<F> RetryClassifier for F
where
    F: Fn(&Error, usize) -> bool + Send + Sync,
{
    fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        self(error, attempt)
    }
}

pub fn default_retry_predicate(error: &Error, _attempt: usize) -> bool {
    error.is_transport()
}

#[derive(Clone)]
pub struct RetryPolicy {
    max_retry_count: usize,
    base_delay: Duration,
    max_delay: Duration,
    jitter_ratio: f64,
    retry_classifier: Option<Arc<dyn RetryClassifier>>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RetryPolicy")
            .field("max_retry_count", &self.max_retry_count)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("jitter_ratio", &self.jitter_ratio)
            .field("custom_classifier", &self.retry_classifier.is_some())
            .finish()
    }
}

impl RetryPolicy {
    pub fn disabled() -> Self {
        Self {
            max_retry_count: 0,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter_ratio: 0.0,
            retry_classifier: None,
        }
    }

    pub fn standard() -> Self {
        Self {
            max_retry_count: 2,
            base_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter_ratio: 0.0,
            retry_classifier: None,
        }
    }

    pub fn max_retry_count(mut self, max_retry_count: usize) -> Self {
        self.max_retry_count = max_retry_count;
        self
    }

    pub fn base_delay(mut self, base_delay: Duration) -> Self {
        self.base_delay = base_delay.max(Duration::from_millis(1));
        if self.max_delay < self.base_delay {
            self.max_delay = self.base_delay;
        }
        self
    }

    pub fn max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay.max(self.base_delay);
        self
    }

    pub fn jitter_ratio(mut self, jitter_ratio: f64) -> Self {
        self.jitter_ratio = jitter_ratio.clamp(0.0, 1.0);
        self
    }

    pub fn retry_classifier(mut self, retry_classifier: Arc<dyn RetryClassifier>) -> Self {
        self.retry_classifier = Some(retry_classifier);
        self
    }

    pub fn retry_if<F>(self, predicate: F) -> Self
    where
        F: Fn(&Error, usize) -> bool + Send + Sync + 'static,
    {
        self.retry_classifier(Arc::new(predicate))
    }

    pub fn max_retry_count_value(&self) -> usize {
        self.max_retry_count
    }

    pub fn max_attempts(&self) -> usize {
        self.max_retry_count.saturating_add(1)
    }

    pub fn should_retry(&self, error: &Error, attempt: usize) -> bool {
        if attempt >= self.max_retry_count || error.is_terminal() {
            return false;
        }
        match &self.retry_classifier {
            Some(classifier) => classifier.should_retry(error, attempt),
            None => default_retry_predicate(error, attempt),
        }
    }

    pub fn backoff_for_retry(&self, attempt: usize) -> Duration {
        let base_ms = self.base_delay.as_millis().max(1);
        let max_ms = self.max_delay.as_millis().max(base_ms);
        let delay_ms = u32::try_from(attempt)
            .ok()
            .and_then(|exponent| 1_u128.checked_shl(exponent))
            .map_or(max_ms, |multiplier| base_ms.saturating_mul(multiplier).min(max_ms))
            .min(u64::MAX as u128) as u64;
        self.apply_jitter(Duration::from_millis(delay_ms))
    }

    fn apply_jitter(&self, backoff: Duration) -> Duration {
        if self.jitter_ratio <= f64::EPSILON {
            return backoff;
        }

        let backoff_ms = backoff.as_millis().min(u64::MAX as u128) as u64;
        if backoff_ms <= 1 {
            return backoff;
        }
        let max_delay_ms = self.max_delay.as_millis().min(u64::MAX as u128) as u64;

        let jitter_span = ((backoff_ms as f64) * self.jitter_ratio).round().max(1.0) as u64;
        let low = backoff_ms.saturating_sub(jitter_span);
        let high = backoff_ms.saturating_add(jitter_span).max(low);
        let mut rng = rand::rng();
        let sampled_ms = rng.random_range(low..=high).min(max_delay_ms.max(1));
        Duration::from_millis(sampled_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::standard()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RetryStep {
    Retry { next_attempt: usize, delay: Duration },
    GiveUp,
}

#[derive(Debug)]
pub(crate) struct RetryState {
    policy: RetryPolicy,
    attempt: usize,
}

impl RetryState {
    pub(crate) fn new(policy: RetryPolicy) -> Self {
        Self { policy, attempt: 0 }
    }

    pub(crate) fn attempt(&self) -> usize {
        self.attempt
    }

    pub(crate) fn max_attempts(&self) -> usize {
        self.policy.max_attempts()
    }

    pub(crate) fn on_failure(&mut self, error: &Error) -> RetryStep {
        if !self.policy.should_retry(error, self.attempt) {
            return RetryStep::GiveUp;
        }
        let delay = self.policy.backoff_for_retry(self.attempt);
        self.attempt += 1;
        RetryStep::Retry {
            next_attempt: self.attempt,
            delay,
        }
    }
}
