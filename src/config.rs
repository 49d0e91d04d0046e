use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::interceptor::Interceptor;
use crate::pipeline::{ErrorMapper, Middleware};
use crate::util::lock_unpoisoned;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_CLIENT_NAME: &str = "reqflow";

struct Registry<T: ?Sized> {
    entries: Mutex<Vec<Arc<T>>>,
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
        }
    }
}

impl<T: ?Sized> Registry<T> {
    fn push(&self, entry: Arc<T>) {
        lock_unpoisoned(&self.entries).push(entry);
    }

    fn clear(&self) {
        lock_unpoisoned(&self.entries).clear();
    }

    fn snapshot(&self) -> Vec<Arc<T>> {
        lock_unpoisoned(&self.entries).clone()
    }

    fn len(&self) -> usize {
        lock_unpoisoned(&self.entries).len()
    }
}

#[derive(Default)]
struct LayersInner {
    interceptors: Registry<dyn Interceptor>,
    middleware: Registry<dyn Middleware>,
    error_mappers: Registry<dyn ErrorMapper>,
}

#[derive(Clone, Default)]
pub struct Layers {
    inner: Arc<LayersInner>,
}

impl Layers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_interceptor<I>(&self, interceptor: I)
    where
        I: Interceptor + 'static,
    {
        self.inner.interceptors.push(Arc::new(interceptor));
    }

    pub fn add_middleware<M>(&self, middleware: M)
    where
        M: Middleware + 'static,
    {
        self.inner.middleware.push(Arc::new(middleware));
    }

    pub fn add_error_mapper<E>(&self, error_mapper: E)
    where
        E: ErrorMapper + 'static,
    {
        self.inner.error_mappers.push(Arc::new(error_mapper));
    }

    pub fn clear_interceptors(&self) {
        self.inner.interceptors.clear();
    }

    pub fn clear_middleware(&self) {
        self.inner.middleware.clear();
    }

    pub fn clear_error_mappers(&self) {
        self.inner.error_mappers.clear();
    }

    pub fn clear(&self) {
        self.clear_interceptors();
        self.clear_middleware();
        self.clear_error_mappers();
    }

    pub(crate) fn interceptors(&self) -> Vec<Arc<dyn Interceptor>> {
        self.inner.interceptors.snapshot()
    }

    pub(crate) fn middleware(&self) -> Vec<Arc<dyn Middleware>> {
        self.inner.middleware.snapshot()
    }

    pub(crate) fn error_mappers(&self) -> Vec<Arc<dyn ErrorMapper>> {
        self.inner.error_mappers.snapshot()
    }
}

impl std::fmt::Debug for Layers {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Layers")
            .field("interceptors", &self.inner.interceptors.len())
            .field("middleware", &self.inner.middleware.len())
            .field("error_mappers", &self.inner.error_mappers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::Layers;
    use crate::request::Request;
    use crate::response::ResponseMeta;

    #[test]
    fn clones_share_registrations() {
        let layers = Layers::default();
        let shared = layers.clone();

        shared.add_interceptor(|_: &mut Request| {});
        shared.add_middleware(|body: Bytes, _: &ResponseMeta| body);

        assert_eq!(layers.interceptors().len(), 1);
        assert_eq!(layers.middleware().len(), 1);

        layers.clear();
        assert!(shared.interceptors().is_empty());
        assert!(shared.middleware().is_empty());
    }
}
