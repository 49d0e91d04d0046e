use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{Instrument, debug, info, info_span, warn};

use crate::Result;
use crate::client::ClientInner;
use crate::error::Error;
use crate::interceptor::run_interceptors;
use crate::network::SuspensionId;
use crate::pipeline::ResponsePipeline;
use crate::queue::SlotPermit;
use crate::request::{Operation, Request, RequestSpec};
use crate::response::{Response, ResponseMeta, ResponseSource};
use crate::retry::{RetryState, RetryStep};
use crate::transport::{TransportDownload, TransportResponse};
use crate::util::{merge_headers, redact_uri_for_logs, truncate_body};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RequestPhase {
    Queued,
    Dispatching,
    Retrying,
    Suspended,
    Done,
}

/// Caller side of a dispatched request.
///
/// A request suspended by the network gate first reports [`Error::Suspended`]; once
/// it is replayed the final outcome arrives on the same handle. Dropping the handle
/// detaches from the request without cancelling it.
#[derive(Debug)]
pub struct RequestHandle {
    method: Method,
    uri: String,
    outcomes: mpsc::UnboundedReceiver<Result<Response>>,
    phase: watch::Receiver<RequestPhase>,
    cancel: CancellationToken,
}

impl RequestHandle {
    pub async fn next_outcome(&mut self) -> Option<Result<Response>> {
        self.outcomes.recv().await
    }

    /// First outcome only. Dropping this future before it resolves cancels the request.
    pub async fn first_outcome(mut self) -> Result<Response> {
        let guard = self.cancel.clone().drop_guard();
        let outcome = self.outcomes.recv().await;
        guard.disarm();
        outcome.unwrap_or_else(|| {
            Err(Error::Cancelled {
                method: self.method.clone(),
                uri: self.uri.clone(),
            })
        })
    }

    pub fn phase(&self) -> RequestPhase {
        *self.phase.borrow()
    }

    pub fn phase_watcher(&self) -> watch::Receiver<RequestPhase> {
        self.phase.clone()
    }

    /// Withdraws a queued request, aborts an in-flight attempt or interrupts a backoff.
    /// A suspended request leaves the pending list right away and reports
    /// [`Error::Cancelled`] without waiting for the network.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

struct RequestControl {
    outcomes: mpsc::UnboundedSender<Result<Response>>,
    phase: watch::Sender<RequestPhase>,
    cancel: CancellationToken,
}

pub(crate) struct PendingRequest {
    request: LogicalRequest,
    runtime: Handle,
    // Dropping the entry stops its cancellation watcher.
    parked: DropGuard,
}

impl PendingRequest {
    pub(crate) fn replay(self) {
        if self.request.control.cancel.is_cancelled() {
            self.withdraw();
            return;
        }
        let Self {
            request,
            runtime,
            parked,
        } = self;
        drop(parked);
        request.client.metrics.record_replayed();
        info!(
            method = %request.spec.method,
            uri = %redact_uri_for_logs(&request.spec.url),
            "replaying suspended request"
        );
        runtime.spawn(request.run());
    }

    fn withdraw(self) {
        let Self { request, parked, .. } = self;
        drop(parked);
        debug!(
            method = %request.spec.method,
            uri = %redact_uri_for_logs(&request.spec.url),
            "suspended request cancelled"
        );
        let error = request.cancelled_error();
        request.finish(Err(error));
    }
}

async fn withdraw_on_cancel(
    id: SuspensionId,
    client: Weak<ClientInner>,
    cancel: CancellationToken,
    parked: CancellationToken,
) {
    tokio::select! {
        biased;
        _ = parked.cancelled() => {}
        _ = cancel.cancelled() => {
            let withdrawn = client
                .upgrade()
                .and_then(|client| client.suspended.remove(id));
            if let Some(pending) = withdrawn {
                pending.withdraw();
            }
        }
    }
}

enum Flow {
    Finished(Result<Response>),
    NetworkDown,
}

enum Step {
    Admit,
    Dispatch(SlotPermit),
    Backoff(Duration),
    Finish(Result<Response>),
}

enum RawResponse {
    Data(TransportResponse),
    Download(TransportDownload),
}

pub(crate) struct LogicalRequest {
    client: Arc<ClientInner>,
    spec: RequestSpec,
    control: RequestControl,
    started: Instant,
}

pub(crate) fn start(client: Arc<ClientInner>, spec: RequestSpec) -> RequestHandle {
    let runtime = Handle::try_current()
        .unwrap_or_else(|_| panic!("reqflow requests must be dispatched inside a tokio runtime"));
    let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
    let (phase_tx, phase_rx) = watch::channel(RequestPhase::Queued);
    let cancel = CancellationToken::new();
    let handle = RequestHandle {
        method: spec.method.clone(),
        uri: redact_uri_for_logs(&spec.url),
        outcomes: outcome_rx,
        phase: phase_rx,
        cancel: cancel.clone(),
    };

    client.metrics.record_request_started();
    let request = LogicalRequest {
        client,
        spec,
        control: RequestControl {
            outcomes: outcome_tx,
            phase: phase_tx,
            cancel,
        },
        started: Instant::now(),
    };
    runtime.spawn(request.run());
    handle
}

impl LogicalRequest {
    async fn run(self) {
        let mut request = self;
        loop {
            match request.drive().await {
                Flow::Finished(result) => {
                    request.finish(result);
                    return;
                }
                Flow::NetworkDown => match request.park() {
                    Some(resumed) => request = resumed,
                    None => return,
                },
            }
        }
    }

    async fn drive(&self) -> Flow {
        let client = &self.client;
        let request = self.prepare();
        let redacted_uri = redact_uri_for_logs(request.url());
        let pipeline = client.response_pipeline();
        let mut retry = RetryState::new(
            self.spec
                .retry_policy
                .clone()
                .unwrap_or_else(|| client.retry_policy.clone()),
        );

        let mut step = Step::Admit;
        loop {
            step = match step {
                Step::Admit => {
                    if self.control.cancel.is_cancelled() {
                        Step::Finish(Err(self.cancelled_error()))
                    } else if let Some(result) = self.try_mock(&request, &pipeline, retry.attempt()) {
                        self.after_attempt(result, &mut retry)
                    } else {
                        self.set_phase(RequestPhase::Queued);
                        let acquired = tokio::select! {
                            biased;
                            _ = self.control.cancel.cancelled() => Err(self.cancelled_error()),
                            permit = client.queue.acquire(request.priority()) => permit,
                        };
                        match acquired {
                            Ok(permit) if !client.network.is_available() => {
                                drop(permit);
                                return Flow::NetworkDown;
                            }
                            Ok(permit) => Step::Dispatch(permit),
                            Err(error) => Step::Finish(Err(error)),
                        }
                    }
                }
                Step::Dispatch(permit) => {
                    self.set_phase(RequestPhase::Dispatching);
                    let span = info_span!(
                        "reqflow.request",
                        client = %client.name,
                        method = %request.method(),
                        uri = %redacted_uri,
                        attempt = retry.attempt() + 1,
                        max_attempts = retry.max_attempts()
                    );
                    let raw = self
                        .call_transport(&request, &redacted_uri)
                        .instrument(span)
                        .await;
                    drop(permit);
                    match raw {
                        Some(raw) => {
                            let result = raw.and_then(|raw| {
                                self.interpret(&request, &redacted_uri, &pipeline, raw, retry.attempt())
                            });
                            self.after_attempt(result, &mut retry)
                        }
                        None => Step::Finish(Err(self.cancelled_error())),
                    }
                }
                Step::Backoff(delay) => {
                    self.set_phase(RequestPhase::Retrying);
                    tokio::select! {
                        biased;
                        _ = self.control.cancel.cancelled() => Step::Finish(Err(self.cancelled_error())),
                        _ = tokio::time::sleep(delay) => Step::Admit,
                    }
                }
                Step::Finish(result) => return Flow::Finished(result),
            };
        }
    }

    fn prepare(&self) -> Request {
        let client = &self.client;
        let mut request = Request::new(
            self.spec.method.clone(),
            self.spec.url.clone(),
            self.spec.timeout.unwrap_or(client.request_timeout),
        );
        *request.headers_mut() = merge_headers(&client.default_headers, &self.spec.headers);
        request.set_body(self.spec.body.clone());
        request.set_priority(self.spec.priority);

        if let Some(trace) = &client.trace {
            trace.stamp(&mut request);
        }
        run_interceptors(&client.global.interceptors(), &mut request);
        run_interceptors(&client.local.interceptors(), &mut request);
        if self.spec.use_cache {
            let url = request.url().to_owned();
            client
                .cache
                .attach_conditional_headers(&url, request.headers_mut());
        }
        request
    }

    fn try_mock(
        &self,
        request: &Request,
        pipeline: &ResponsePipeline,
        attempt: usize,
    ) -> Option<Result<Response>> {
        let client = &self.client;
        if !client.mock_enabled() {
            return None;
        }
        let outcome = client.mocks.route(request)?;
        client.metrics.record_mock_response();
        debug!(method = %request.method(), "serving mocked response");
        Some(outcome.into_parts().and_then(|(status, headers, body)| {
            let meta = ResponseMeta::new(request.method().clone(), request.url(), status, headers);
            self.process_data(meta, body, pipeline, ResponseSource::Mock, attempt)
        }))
    }

    async fn call_transport(&self, request: &Request, redacted_uri: &str) -> Option<Result<RawResponse>> {
        let client = &self.client;
        let timeout = request.timeout();
        let _in_flight = client.metrics.enter_in_flight();
        debug!("sending request");

        let call = async {
            let progress = self.spec.progress.clone();
            match self.spec.operation {
                Operation::Fetch => client
                    .transport
                    .execute(request.clone(), progress)
                    .await
                    .map(RawResponse::Data),
                Operation::Download => client
                    .transport
                    .download(request.clone(), progress)
                    .await
                    .map(RawResponse::Download),
            }
        };

        tokio::select! {
            biased;
            _ = self.control.cancel.cancelled() => None,
            result = tokio::time::timeout(timeout, call) => Some(match result {
                Ok(Ok(raw)) => Ok(raw),
                Ok(Err(error)) => Err(error.into_error(request.method(), redacted_uri)),
                Err(_) => Err(Error::Timeout {
                    timeout_ms: timeout.as_millis(),
                    method: request.method().clone(),
                    uri: redacted_uri.to_owned(),
                }),
            }),
        }
    }

    fn interpret(
        &self,
        request: &Request,
        redacted_uri: &str,
        pipeline: &ResponsePipeline,
        raw: RawResponse,
        attempt: usize,
    ) -> Result<Response> {
        let (status, headers) = match &raw {
            RawResponse::Data(response) => (response.status, &response.headers),
            RawResponse::Download(download) => (download.status, &download.headers),
        };
        let Ok(status) = StatusCode::from_u16(status) else {
            return Err(Error::InvalidResponse {
                status,
                method: request.method().clone(),
                uri: redacted_uri.to_owned(),
            });
        };
        let headers: HeaderMap = headers.clone();
        let meta = ResponseMeta::new(request.method().clone(), request.url(), status, headers);

        match raw {
            RawResponse::Data(response) => {
                self.process_data(meta, response.body, pipeline, ResponseSource::Network, attempt)
            }
            RawResponse::Download(download) => {
                if !status.is_success() {
                    return Err(self.status_error(&meta, &[]));
                }
                Ok(
                    Response::new(meta, Bytes::new(), ResponseSource::Network, attempt + 1)
                        .with_location(download.location),
                )
            }
        }
    }

    fn process_data(
        &self,
        meta: ResponseMeta,
        body: Bytes,
        pipeline: &ResponsePipeline,
        source: ResponseSource,
        attempt: usize,
    ) -> Result<Response> {
        let client = &self.client;
        let attempts = attempt + 1;

        if meta.status() == StatusCode::NOT_MODIFIED && self.spec.use_cache {
            return match client.cache.revalidated_body(meta.url()) {
                Some(cached) => Ok(Response::new(meta, cached, ResponseSource::Cache, attempts)),
                None => Err(self.no_data_error(&meta)),
            };
        }
        if !meta.status().is_success() {
            return Err(self.status_error(&meta, &body));
        }
        if self.spec.require_body && body.is_empty() {
            return Err(self.no_data_error(&meta));
        }

        let run_mappers = attempt == 0 || client.map_errors_on_retries;
        let body = pipeline.process(body, &meta, run_mappers)?;
        if self.spec.use_cache {
            client.cache.store(meta.url(), body.clone(), meta.headers());
        }
        Ok(Response::new(meta, body, source, attempts))
    }

    fn after_attempt(&self, result: Result<Response>, retry: &mut RetryState) -> Step {
        let error = match result {
            Ok(response) => return Step::Finish(Ok(response)),
            Err(error) => error,
        };
        let client = &self.client;
        client.metrics.record_attempt_error(&error);
        match retry.on_failure(&error) {
            RetryStep::Retry {
                next_attempt,
                delay,
            } => {
                warn!(
                    method = %self.spec.method,
                    uri = %redact_uri_for_logs(&self.spec.url),
                    attempt = next_attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "retrying request"
                );
                client.metrics.record_retry();
                Step::Backoff(delay)
            }
            RetryStep::GiveUp => Step::Finish(Err(error)),
        }
    }

    fn park(self) -> Option<Self> {
        if self.control.cancel.is_cancelled() {
            let error = self.cancelled_error();
            self.finish(Err(error));
            return None;
        }
        let client = Arc::clone(&self.client);
        let cancel = self.control.cancel.clone();
        let parked = CancellationToken::new();
        let pending = PendingRequest {
            request: self,
            runtime: Handle::current(),
            parked: parked.clone().drop_guard(),
        };
        client
            .suspended
            .suspend_if_unavailable(&client.network, pending, |id, pending| {
                pending.request.notify_suspended();
                let watcher = withdraw_on_cancel(id, Arc::downgrade(&client), cancel, parked);
                pending.runtime.spawn(watcher);
            })
            .map(|pending| pending.request)
    }

    fn notify_suspended(&self) {
        let (method, uri) = (self.spec.method.clone(), redact_uri_for_logs(&self.spec.url));
        info!(method = %method, uri = %uri, "network unavailable; request suspended");
        self.client.metrics.record_suspended();
        self.set_phase(RequestPhase::Suspended);
        let _ = self
            .control
            .outcomes
            .send(Err(Error::Suspended { method, uri }));
    }

    fn finish(self, result: Result<Response>) {
        self.client
            .metrics
            .record_request_completed(&result, self.started.elapsed());
        self.set_phase(RequestPhase::Done);
        let _ = self.control.outcomes.send(result);
    }

    fn set_phase(&self, phase: RequestPhase) {
        self.control.phase.send_replace(phase);
    }

    fn cancelled_error(&self) -> Error {
        Error::Cancelled {
            method: self.spec.method.clone(),
            uri: redact_uri_for_logs(&self.spec.url),
        }
    }

    fn no_data_error(&self, meta: &ResponseMeta) -> Error {
        Error::NoData {
            method: meta.method().clone(),
            uri: redact_uri_for_logs(meta.url()),
        }
    }

    fn status_error(&self, meta: &ResponseMeta, body: &[u8]) -> Error {
        Error::HttpStatus {
            status: meta.status().as_u16(),
            method: meta.method().clone(),
            uri: redact_uri_for_logs(meta.url()),
            body: truncate_body(body),
        }
    }
}
