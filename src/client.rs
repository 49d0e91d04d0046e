use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use tracing::info;

use crate::Result;
use crate::cache::CacheValidator;
use crate::config::{DEFAULT_CLIENT_NAME, DEFAULT_REQUEST_TIMEOUT, Layers};
use crate::interceptor::{Interceptor, TraceConfig};
use crate::lifecycle::{self, PendingRequest, RequestHandle};
use crate::metrics::{ClientMetrics, MetricsSnapshot};
use crate::mock::{MockHandler, MockRouter};
use crate::network::{ListenerId, NetworkMonitor, SuspendedRequests};
use crate::pipeline::{ErrorMapper, Middleware, ResponsePipeline};
use crate::queue::{AdmissionQueue, DEFAULT_MAX_CONCURRENT, Priority, QueueTicket, SlotPermit};
use crate::request::{Multipart, RequestBuilder, RequestSpec};
use crate::retry::RetryPolicy;
use crate::transport::Transport;
use crate::util::{parse_header, resolve_url, validate_base_url};

pub struct ClientBuilder {
    transport: Arc<dyn Transport>,
    base_url: Option<String>,
    default_headers: HeaderMap,
    request_timeout: Duration,
    max_concurrent: usize,
    retry_policy: RetryPolicy,
    trace: Option<TraceConfig>,
    mock_enabled: bool,
    layers: Layers,
    network: NetworkMonitor,
    client_name: String,
    map_errors_on_retries: bool,
}

impl ClientBuilder {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            base_url: None,
            default_headers: HeaderMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            retry_policy: RetryPolicy::standard(),
            trace: None,
            mock_enabled: false,
            layers: Layers::default(),
            network: NetworkMonitor::default(),
            client_name: DEFAULT_CLIENT_NAME.to_owned(),
            map_errors_on_retries: false,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn default_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.default_headers.insert(name, value);
        self
    }

    pub fn try_default_header(self, name: &str, value: &str) -> Result<Self> {
        let (name, value) = parse_header(name, value)?;
        Ok(self.default_header(name, value))
    }

    pub fn request_timeout(mut self, request_timeout: Duration) -> Self {
        self.request_timeout = request_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }

    pub fn trace_ids(mut self, trace: TraceConfig) -> Self {
        self.trace = Some(trace);
        self
    }

    pub fn enable_mock(mut self, enabled: bool) -> Self {
        self.mock_enabled = enabled;
        self
    }

    pub fn layers(mut self, layers: Layers) -> Self {
        self.layers = layers;
        self
    }

    pub fn network_monitor(mut self, network: NetworkMonitor) -> Self {
        self.network = network;
        self
    }

    pub fn client_name(mut self, client_name: impl Into<String>) -> Self {
        self.client_name = client_name.into();
        self
    }

    /// Evaluate error mappers on retried attempts too. Off by default: a success
    /// delivered by a retry is not re-classified.
    pub fn map_errors_on_retries(mut self, enabled: bool) -> Self {
        self.map_errors_on_retries = enabled;
        self
    }

    pub fn try_build(self) -> Result<Client> {
        if let Some(base_url) = &self.base_url {
            validate_base_url(base_url)?;
        }

        let network = self.network.clone();
        let inner = Arc::new_cyclic(|weak: &Weak<ClientInner>| {
            let weak = weak.clone();
            let listener_id = network.on_availability_changed(move |available| {
                if available && let Some(inner) = weak.upgrade() {
                    inner.replay_suspended();
                }
            });
            ClientInner {
                name: self.client_name,
                transport: self.transport,
                base_url: self.base_url,
                default_headers: self.default_headers,
                request_timeout: self.request_timeout,
                retry_policy: self.retry_policy,
                trace: self.trace,
                mock_enabled: AtomicBool::new(self.mock_enabled),
                mocks: MockRouter::default(),
                global: self.layers,
                local: Layers::default(),
                map_errors_on_retries: self.map_errors_on_retries,
                queue: AdmissionQueue::new(self.max_concurrent),
                cache: CacheValidator::new(),
                network: self.network,
                suspended: SuspendedRequests::default(),
                metrics: ClientMetrics::default(),
                listener_id,
            }
        });
        Ok(Client { inner })
    }

    pub fn build(self) -> Client {
        self.try_build()
            .unwrap_or_else(|error| panic!("failed to build reqflow client: {error}"))
    }
}

pub(crate) struct ClientInner {
    pub(crate) name: String,
    pub(crate) transport: Arc<dyn Transport>,
    base_url: Option<String>,
    pub(crate) default_headers: HeaderMap,
    pub(crate) request_timeout: Duration,
    pub(crate) retry_policy: RetryPolicy,
    pub(crate) trace: Option<TraceConfig>,
    mock_enabled: AtomicBool,
    pub(crate) mocks: MockRouter,
    pub(crate) global: Layers,
    pub(crate) local: Layers,
    pub(crate) map_errors_on_retries: bool,
    pub(crate) queue: AdmissionQueue,
    pub(crate) cache: CacheValidator,
    pub(crate) network: NetworkMonitor,
    pub(crate) suspended: SuspendedRequests<PendingRequest>,
    pub(crate) metrics: ClientMetrics,
    listener_id: ListenerId,
}

impl ClientInner {
    pub(crate) fn mock_enabled(&self) -> bool {
        self.mock_enabled.load(Ordering::Acquire)
    }

    pub(crate) fn response_pipeline(&self) -> ResponsePipeline {
        let mut middleware = self.global.middleware();
        middleware.extend(self.local.middleware());
        let mut error_mappers = self.global.error_mappers();
        error_mappers.extend(self.local.error_mappers());
        ResponsePipeline {
            middleware,
            error_mappers,
        }
    }

    fn replay_suspended(&self) {
        let pending = self.suspended.take_all();
        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), client = %self.name, "network available; replaying suspended requests");
        for request in pending {
            request.replay();
        }
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.network.remove_listener(self.listener_id);
    }
}

#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("name", &self.inner.name)
            .field("base_url", &self.inner.base_url)
            .field("queue", &self.inner.queue)
            .field("network", &self.inner.network)
            .finish_non_exhaustive()
    }
}

impl Client {
    pub fn builder(transport: Arc<dyn Transport>) -> ClientBuilder {
        ClientBuilder::new(transport)
    }

    pub fn request(&self, method: Method, path: impl Into<String>) -> RequestBuilder<'_> {
        let url = resolve_url(self.inner.base_url.as_deref(), &path.into());
        RequestBuilder::new(self, method, url)
    }

    pub fn get(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::GET, path)
    }

    pub fn post(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::POST, path)
    }

    pub fn put(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PUT, path)
    }

    pub fn patch(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::PATCH, path)
    }

    pub fn delete(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.request(Method::DELETE, path)
    }

    pub fn get_with_cache(&self, path: impl Into<String>) -> RequestBuilder<'_> {
        self.get(path).cache(true)
    }

    pub fn upload(&self, path: impl Into<String>, multipart: Multipart) -> RequestBuilder<'_> {
        self.post(path).multipart(multipart)
    }

    pub async fn download(&self, path: impl Into<String>) -> Result<PathBuf> {
        self.get(path).send_download().await
    }

    pub(crate) fn dispatch_spec(&self, spec: RequestSpec) -> RequestHandle {
        lifecycle::start(Arc::clone(&self.inner), spec)
    }

    pub fn enqueue<F>(&self, priority: Priority, task: F) -> QueueTicket
    where
        F: FnOnce(SlotPermit) + Send + 'static,
    {
        self.inner.queue.enqueue(priority, task)
    }

    pub fn cancel_queued(&self, ticket: QueueTicket) -> bool {
        self.inner.queue.cancel(ticket)
    }

    pub fn set_max_concurrent(&self, max_concurrent: usize) {
        self.inner.queue.set_limit(max_concurrent);
    }

    pub fn active_requests(&self) -> usize {
        self.inner.queue.active()
    }

    pub fn queued_requests(&self) -> usize {
        self.inner.queue.queued()
    }

    pub fn cache(&self) -> &CacheValidator {
        &self.inner.cache
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn add_mock<H>(&self, handler: H)
    where
        H: MockHandler + 'static,
    {
        self.inner.mocks.add(Arc::new(handler));
    }

    pub fn clear_mocks(&self) {
        self.inner.mocks.clear();
    }

    pub fn set_mock_enabled(&self, enabled: bool) {
        self.inner.mock_enabled.store(enabled, Ordering::Release);
    }

    pub fn add_interceptor<I>(&self, interceptor: I)
    where
        I: Interceptor + 'static,
    {
        self.inner.local.add_interceptor(interceptor);
    }

    pub fn add_middleware<M>(&self, middleware: M)
    where
        M: Middleware + 'static,
    {
        self.inner.local.add_middleware(middleware);
    }

    pub fn add_error_mapper<E>(&self, error_mapper: E)
    where
        E: ErrorMapper + 'static,
    {
        self.inner.local.add_error_mapper(error_mapper);
    }

    pub fn clear_interceptors(&self) {
        self.inner.local.clear_interceptors();
    }

    pub fn clear_middleware(&self) {
        self.inner.local.clear_middleware();
    }

    pub fn clear_error_mappers(&self) {
        self.inner.local.clear_error_mappers();
    }

    pub fn layers(&self) -> &Layers {
        &self.inner.global
    }

    pub fn network(&self) -> &NetworkMonitor {
        &self.inner.network
    }

    pub fn set_network_available(&self, available: bool) {
        self.inner.network.set_available(available);
    }

    pub fn suspended_requests(&self) -> usize {
        self.inner.suspended.len()
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    pub fn client_name(&self) -> &str {
        &self.inner.name
    }
}
