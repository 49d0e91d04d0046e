use std::path::PathBuf;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use http::{HeaderMap, Method};
use thiserror::Error;

use crate::error::{BoxError, Error, TransportErrorKind};
use crate::progress::ProgressReporter;
use crate::request::Request;

#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: u16, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers,
            body: body.into(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TransportDownload {
    pub status: u16,
    pub headers: HeaderMap,
    pub location: PathBuf,
}

#[derive(Debug, Error)]
#[error("{kind} transport failure: {source}")]
pub struct TransportError {
    kind: TransportErrorKind,
    #[source]
    source: BoxError,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, source: impl Into<BoxError>) -> Self {
        Self {
            kind,
            source: source.into(),
        }
    }

    pub fn kind(&self) -> TransportErrorKind {
        self.kind
    }

    pub(crate) fn into_error(self, method: &Method, uri: &str) -> Error {
        Error::Transport {
            kind: self.kind,
            method: method.clone(),
            uri: uri.to_owned(),
            source: self.source,
        }
    }
}

/// The wire. Implementations own connection handling, body encoding (including
/// multipart) and file I/O. Dropping a returned future cancels the attempt.
pub trait Transport: Send + Sync {
    fn execute(
        &self,
        request: Request,
        progress: ProgressReporter,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>>;

    fn download(
        &self,
        request: Request,
        progress: ProgressReporter,
    ) -> BoxFuture<'_, Result<TransportDownload, TransportError>> {
        let _ = (request, progress);
        Box::pin(async {
            Err(TransportError::new(
                TransportErrorKind::Other,
                "transport does not support downloads",
            ))
        })
    }
}
