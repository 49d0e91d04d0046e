use std::sync::Arc;

use http::header::HeaderName;

use crate::request::Request;

pub trait Interceptor: Send + Sync {
    fn intercept(&self, request: &mut Request);
}

impl<F> Interceptor for F
where
    F: Fn(&mut Request) + Send + Sync,
{
    fn intercept(&self, request: &mut Request) {
        self(request)
    }
}

pub trait TraceIdGenerator: Send + Sync {
    fn generate(&self) -> String;
}

impl<F> TraceIdGenerator for F
where
    F: Fn() -> String + Send + Sync,
{
    fn generate(&self) -> String {
        self()
    }
}

#[derive(Debug, Default)]
pub struct UuidTraceIdGenerator;

impl TraceIdGenerator for UuidTraceIdGenerator {
    fn generate(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

pub const DEFAULT_TRACE_HEADER: HeaderName = HeaderName::from_static("x-request-id");

#[derive(Clone)]
pub struct TraceConfig {
    header: HeaderName,
    generator: Arc<dyn TraceIdGenerator>,
}

impl std::fmt::Debug for TraceConfig {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("TraceConfig")
            .field("header", &self.header)
            .finish_non_exhaustive()
    }
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            header: DEFAULT_TRACE_HEADER,
            generator: Arc::new(UuidTraceIdGenerator),
        }
    }
}

impl TraceConfig {
    pub fn header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }

    pub fn generator(mut self, generator: Arc<dyn TraceIdGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn header_name(&self) -> &HeaderName {
        &self.header
    }

    // A generated id that is not a valid header value is dropped.
    pub(crate) fn stamp(&self, request: &mut Request) {
        let trace_id = self.generator.generate();
        if let Ok(value) = trace_id.parse() {
            request.set_header(self.header.clone(), value);
        }
    }
}

pub(crate) fn run_interceptors(interceptors: &[Arc<dyn Interceptor>], request: &mut Request) {
    for interceptor in interceptors {
        interceptor.intercept(request);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use http::Method;
    use http::header::{HeaderName, HeaderValue};

    use super::{Interceptor, TraceConfig, TraceIdGenerator, run_interceptors};
    use crate::request::Request;

    fn request() -> Request {
        Request::new(Method::GET, "https://api.example.com/items", Duration::from_secs(1))
    }

    #[test]
    fn interceptors_run_in_registration_order() {
        let first: Arc<dyn Interceptor> = Arc::new(|request: &mut Request| {
            request.set_header(
                HeaderName::from_static("x-step"),
                HeaderValue::from_static("first"),
            );
        });
        let second: Arc<dyn Interceptor> = Arc::new(|request: &mut Request| {
            request.set_header(
                HeaderName::from_static("x-step"),
                HeaderValue::from_static("second"),
            );
        });
        let mut request = request();

        run_interceptors(&[first, second], &mut request);

        assert_eq!(
            request.headers().get("x-step"),
            Some(&HeaderValue::from_static("second"))
        );
    }

    #[test]
    fn trace_config_uses_custom_header_and_generator() {
        let generator: Arc<dyn TraceIdGenerator> = Arc::new(|| "trace-1".to_owned());
        let config = TraceConfig::default()
            .header(HeaderName::from_static("x-trace"))
            .generator(generator);
        let mut request = request();

        config.stamp(&mut request);

        assert_eq!(
            request.headers().get("x-trace"),
            Some(&HeaderValue::from_static("trace-1"))
        );
    }

    #[test]
    fn default_trace_ids_are_uuids() {
        let mut request = request();

        TraceConfig::default().stamp(&mut request);

        let value = request
            .headers()
            .get("x-request-id")
            .and_then(|value| value.to_str().ok())
            .expect("trace header");
        assert!(uuid::Uuid::parse_str(value).is_ok());
    }
}
