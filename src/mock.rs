use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, StatusCode};

use crate::error::Error;
use crate::request::Request;
use crate::util::lock_unpoisoned;

/// Canned reply for a matched request. An outcome carrying an error is treated like a
/// failed transport attempt.
#[derive(Debug)]
pub struct MockOutcome {
    status: StatusCode,
    headers: HeaderMap,
    body: Option<Bytes>,
    error: Option<Error>,
}

impl MockOutcome {
    pub fn body(body: impl Into<Bytes>) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Some(body.into()),
            error: None,
        }
    }

    pub fn empty() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: None,
            error: None,
        }
    }

    pub fn error(error: Error) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: None,
            error: Some(error),
        }
    }

    pub fn status(mut self, status: StatusCode) -> Self {
        self.status = status;
        self
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub(crate) fn into_parts(self) -> Result<(StatusCode, HeaderMap, Bytes), Error> {
        match self.error {
            Some(error) => Err(error),
            None => Ok((self.status, self.headers, self.body.unwrap_or_default())),
        }
    }
}

pub trait MockHandler: Send + Sync {
    fn handle(&self, request: &Request) -> Option<MockOutcome>;
}

impl<F> MockHandler for F
where
    F: Fn(&Request) -> Option<MockOutcome> + Send + Sync,
{
    fn handle(&self, request: &Request) -> Option<MockOutcome> {
        self(request)
    }
}

#[derive(Default)]
pub(crate) struct MockRouter {
    handlers: Mutex<Vec<Arc<dyn MockHandler>>>,
}

impl MockRouter {
    pub(crate) fn add(&self, handler: Arc<dyn MockHandler>) {
        lock_unpoisoned(&self.handlers).push(handler);
    }

    pub(crate) fn clear(&self) {
        lock_unpoisoned(&self.handlers).clear();
    }

    pub(crate) fn len(&self) -> usize {
        lock_unpoisoned(&self.handlers).len()
    }

    pub(crate) fn route(&self, request: &Request) -> Option<MockOutcome> {
        // Handlers may register further mocks, so they run on a snapshot.
        let handlers = lock_unpoisoned(&self.handlers).clone();
        handlers.iter().find_map(|handler| handler.handle(request))
    }
}

impl std::fmt::Debug for MockRouter {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("MockRouter")
            .field("handlers", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use http::Method;

    use super::{MockOutcome, MockRouter};
    use crate::request::Request;

    fn request(url: &str) -> Request {
        Request::new(Method::GET, url, Duration::from_secs(1))
    }

    #[test]
    fn first_matching_handler_wins() {
        let router = MockRouter::default();
        router.add(Arc::new(|request: &Request| {
            request
                .url()
                .ends_with("/users")
                .then(|| MockOutcome::body("first"))
        }));
        router.add(Arc::new(|_: &Request| Some(MockOutcome::body("fallback"))));

        let (_, _, body) = router
            .route(&request("https://api.example.com/users"))
            .expect("matched")
            .into_parts()
            .expect("mock success");
        assert_eq!(body, Bytes::from_static(b"first"));

        let (_, _, body) = router
            .route(&request("https://api.example.com/orders"))
            .expect("matched")
            .into_parts()
            .expect("mock success");
        assert_eq!(body, Bytes::from_static(b"fallback"));
    }

    #[test]
    fn cleared_router_matches_nothing() {
        let router = MockRouter::default();
        router.add(Arc::new(|_: &Request| Some(MockOutcome::empty())));

        router.clear();

        assert!(router.route(&request("https://api.example.com")).is_none());
    }
}
