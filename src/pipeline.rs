use std::sync::Arc;

use bytes::Bytes;

use crate::error::Error;
use crate::response::ResponseMeta;

pub trait Middleware: Send + Sync {
    fn process(&self, body: Bytes, meta: &ResponseMeta) -> Bytes;
}

impl<F> Middleware for F
where
    F: Fn(Bytes, &ResponseMeta) -> Bytes + Send + Sync,
{
    fn process(&self, body: Bytes, meta: &ResponseMeta) -> Bytes {
        self(body, meta)
    }
}

pub trait ErrorMapper: Send + Sync {
    fn map(&self, body: &Bytes, meta: &ResponseMeta) -> Option<Error>;
}

impl<F> ErrorMapper for F
where
    F: Fn(&Bytes, &ResponseMeta) -> Option<Error> + Send + Sync,
{
    fn map(&self, body: &Bytes, meta: &ResponseMeta) -> Option<Error> {
        self(body, meta)
    }
}

#[derive(Clone, Default)]
pub(crate) struct ResponsePipeline {
    pub(crate) middleware: Vec<Arc<dyn Middleware>>,
    pub(crate) error_mappers: Vec<Arc<dyn ErrorMapper>>,
}

impl ResponsePipeline {
    pub(crate) fn process(&self, body: Bytes, meta: &ResponseMeta, run_mappers: bool) -> Result<Bytes, Error> {
        let body = self
            .middleware
            .iter()
            .fold(body, |body, middleware| middleware.process(body, meta));
        if run_mappers
            && let Some(error) = self
                .error_mappers
                .iter()
                .find_map(|mapper| mapper.map(&body, meta))
        {
            return Err(error);
        }
        Ok(body)
    }
}
