use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Error;
use crate::response::{Response, ResponseSource};
use crate::util::lock_unpoisoned;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub requests_started: u64,
    pub requests_succeeded: u64,
    pub requests_failed: u64,
    pub retries: u64,
    pub suspended: u64,
    pub replayed: u64,
    pub mock_responses: u64,
    pub cache_revalidations: u64,
    pub transport_errors: u64,
    pub timeouts: u64,
    pub http_status_errors: u64,
    pub business_errors: u64,
    pub in_flight: u64,
    pub latency_samples: u64,
    pub latency_total_ms: u64,
    pub latency_avg_ms: f64,
    pub status_counts: BTreeMap<u16, u64>,
    pub error_counts: BTreeMap<String, u64>,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct ClientMetrics {
    inner: Arc<ClientMetricsInner>,
}

#[derive(Debug, Default)]
struct ClientMetricsInner {
    requests_started: AtomicU64,
    requests_succeeded: AtomicU64,
    requests_failed: AtomicU64,
    retries: AtomicU64,
    suspended: AtomicU64,
    replayed: AtomicU64,
    mock_responses: AtomicU64,
    cache_revalidations: AtomicU64,
    transport_errors: AtomicU64,
    timeouts: AtomicU64,
    http_status_errors: AtomicU64,
    business_errors: AtomicU64,
    in_flight: AtomicU64,
    latency_total_ms: AtomicU64,
    latency_samples: AtomicU64,
    status_counts: Mutex<BTreeMap<u16, u64>>,
    error_counts: Mutex<BTreeMap<String, u64>>,
}

pub(crate) struct InFlightGuard {
    metrics: ClientMetrics,
}

impl ClientMetrics {
    pub(crate) fn record_request_started(&self) {
        self.inner.requests_started.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn enter_in_flight(&self) -> InFlightGuard {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            metrics: self.clone(),
        }
    }

    pub(crate) fn record_retry(&self) {
        self.inner.retries.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_suspended(&self) {
        self.inner.suspended.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_replayed(&self) {
        self.inner.replayed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_mock_response(&self) {
        self.inner.mock_responses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_attempt_error(&self, error: &Error) {
        match error {
            Error::Transport { .. } => {
                self.inner.transport_errors.fetch_add(1, Ordering::Relaxed);
            }
            Error::Timeout { .. } => {
                self.inner.timeouts.fetch_add(1, Ordering::Relaxed);
            }
            Error::HttpStatus { status, .. } => {
                self.inner
                    .http_status_errors
                    .fetch_add(1, Ordering::Relaxed);
                self.add_status_count(*status);
            }
            Error::Custom { .. } => {
                self.inner.business_errors.fetch_add(1, Ordering::Relaxed);
            }
            _ => {}
        }
    }

    pub(crate) fn record_request_completed(&self, result: &Result<Response, Error>, latency: Duration) {
        self.record_latency(latency);
        match result {
            Ok(response) => {
                self.inner
                    .requests_succeeded
                    .fetch_add(1, Ordering::Relaxed);
                if response.source() == ResponseSource::Cache {
                    self.inner
                        .cache_revalidations
                        .fetch_add(1, Ordering::Relaxed);
                }
                self.add_status_count(response.status().as_u16());
            }
            Err(error) => {
                self.inner.requests_failed.fetch_add(1, Ordering::Relaxed);
                self.add_error_count(error.code().as_str());
            }
        }
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        let latency_samples = self.inner.latency_samples.load(Ordering::Relaxed);
        let latency_total_ms = self.inner.latency_total_ms.load(Ordering::Relaxed);
        let latency_avg_ms = if latency_samples == 0 {
            0.0
        } else {
            latency_total_ms as f64 / latency_samples as f64
        };

        MetricsSnapshot {
            requests_started: self.inner.requests_started.load(Ordering::Relaxed),
            requests_succeeded: self.inner.requests_succeeded.load(Ordering::Relaxed),
            requests_failed: self.inner.requests_failed.load(Ordering::Relaxed),
            retries: self.inner.retries.load(Ordering::Relaxed),
            suspended: self.inner.suspended.load(Ordering::Relaxed),
            replayed: self.inner.replayed.load(Ordering::Relaxed),
            mock_responses: self.inner.mock_responses.load(Ordering::Relaxed),
            cache_revalidations: self.inner.cache_revalidations.load(Ordering::Relaxed),
            transport_errors: self.inner.transport_errors.load(Ordering::Relaxed),
            timeouts: self.inner.timeouts.load(Ordering::Relaxed),
            http_status_errors: self.inner.http_status_errors.load(Ordering::Relaxed),
            business_errors: self.inner.business_errors.load(Ordering::Relaxed),
            in_flight: self.inner.in_flight.load(Ordering::Relaxed),
            latency_samples,
            latency_total_ms,
            latency_avg_ms,
            status_counts: lock_unpoisoned(&self.inner.status_counts).clone(),
            error_counts: lock_unpoisoned(&self.inner.error_counts).clone(),
        }
    }

    fn record_latency(&self, latency: Duration) {
        self.inner.latency_samples.fetch_add(1, Ordering::Relaxed);
        self.inner.latency_total_ms.fetch_add(
            latency.as_millis().min(u64::MAX as u128) as u64,
            Ordering::Relaxed,
        );
    }

    fn add_status_count(&self, status: u16) {
        let mut status_counts = lock_unpoisoned(&self.inner.status_counts);
        *status_counts.entry(status).or_insert(0) += 1;
    }

    fn add_error_count(&self, error_key: &str) {
        let mut error_counts = lock_unpoisoned(&self.inner.error_counts);
        *error_counts.entry(error_key.to_owned()).or_insert(0) += 1;
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.metrics.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::ClientMetrics;
    use crate::error::Error;

    #[test]
    fn in_flight_guard_decrements_on_drop() {
        let metrics = ClientMetrics::default();

        let guard = metrics.enter_in_flight();
        assert_eq!(metrics.snapshot().in_flight, 1);
        drop(guard);

        assert_eq!(metrics.snapshot().in_flight, 0);
    }

    #[test]
    fn failed_requests_are_counted_by_error_code() {
        let metrics = ClientMetrics::default();
        let error = Error::custom("error_code_123");

        metrics.record_attempt_error(&error);
        metrics.record_request_completed(&Err(error), Duration::from_millis(4));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_failed, 1);
        assert_eq!(snapshot.business_errors, 1);
        assert_eq!(snapshot.error_counts.get("custom"), Some(&1));
        assert_eq!(snapshot.latency_avg_ms, 4.0);
    }
}
