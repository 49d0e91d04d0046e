//! `reqflow` orchestrates HTTP requests above a pluggable transport: a bounded
//! priority admission queue, retries with capped exponential backoff, interceptors
//! and mocks, response middleware and error mappers, ETag / Last-Modified
//! revalidation, and suspension of requests while the network is unavailable.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use bytes::Bytes;
//! use futures_util::future::BoxFuture;
//! use reqflow::prelude::*;
//!
//! struct Loopback;
//!
//! impl Transport for Loopback {
//!     fn execute(
//!         &self,
//!         request: Request,
//!         _progress: ProgressReporter,
//!     ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
//!         let body = Bytes::from(request.url().to_owned());
//!         Box::pin(async move { Ok(TransportResponse::new(200, Default::default(), body)) })
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder(Arc::new(Loopback))
//!         .base_url("https://api.example.com")
//!         .max_concurrent(2)
//!         .request_timeout(Duration::from_secs(5))
//!         .retry_policy(RetryPolicy::standard().max_retry_count(3))
//!         .try_build()?;
//!
//!     let response = client
//!         .get("/v1/items")
//!         .priority(Priority::High)
//!         .send()
//!         .await?;
//!     println!("{}", response.text_lossy());
//!     Ok(())
//! }
//! ```

mod cache;
mod client;
mod config;
mod error;
mod interceptor;
mod lifecycle;
mod metrics;
mod mock;
mod network;
mod pipeline;
mod progress;
mod queue;
mod request;
mod response;
mod retry;
mod transport;
mod util;

pub use crate::cache::{CacheEntry, CacheValidator, cache_key};
pub use crate::client::{Client, ClientBuilder};
pub use crate::config::{DEFAULT_CLIENT_NAME, DEFAULT_REQUEST_TIMEOUT, Layers};
pub use crate::error::{Error, ErrorCode, TransportErrorKind};
pub use crate::interceptor::{
    DEFAULT_TRACE_HEADER, Interceptor, TraceConfig, TraceIdGenerator, UuidTraceIdGenerator,
};
pub use crate::lifecycle::{RequestHandle, RequestPhase};
pub use crate::metrics::MetricsSnapshot;
pub use crate::mock::{MockHandler, MockOutcome};
pub use crate::network::{ListenerId, NetworkMonitor};
pub use crate::pipeline::{ErrorMapper, Middleware};
pub use crate::progress::{Progress, ProgressReporter};
pub use crate::queue::{AdmissionQueue, DEFAULT_MAX_CONCURRENT, Priority, QueueTicket, SlotPermit};
pub use crate::request::{Multipart, Request, RequestBody, RequestBuilder, UploadFile, UploadSource};
pub use crate::response::{Response, ResponseMeta, ResponseSource, ResponseStream};
pub use crate::retry::{RetryClassifier, RetryPolicy, default_retry_predicate};
pub use crate::transport::{Transport, TransportDownload, TransportError, TransportResponse};

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        Client, ClientBuilder, Error, ErrorCode, ErrorMapper, Interceptor, Layers, Middleware,
        MockOutcome, Multipart, NetworkMonitor, Priority, ProgressReporter, Request,
        RequestHandle, RequestPhase, Response, ResponseMeta, ResponseSource, RetryPolicy,
        TraceConfig, Transport, TransportError, TransportErrorKind, TransportResponse,
        UploadFile,
    };
}

#[cfg(test)]
mod tests;
