use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_core::Stream;
use http::{HeaderMap, Method, StatusCode};
use serde::de::DeserializeOwned;

use crate::Result;
use crate::error::Error;
use crate::util::truncate_body;

#[derive(Clone, Debug)]
pub struct ResponseMeta {
    method: Method,
    url: String,
    status: StatusCode,
    headers: HeaderMap,
}

impl ResponseMeta {
    pub fn new(method: Method, url: impl Into<String>, status: StatusCode, headers: HeaderMap) -> Self {
        Self {
            method,
            url: url.into(),
            status,
            headers,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    Mock,
}

#[derive(Clone, Debug)]
pub struct Response {
    meta: ResponseMeta,
    body: Bytes,
    source: ResponseSource,
    attempts: usize,
    location: Option<PathBuf>,
}

impl Response {
    pub(crate) fn new(meta: ResponseMeta, body: Bytes, source: ResponseSource, attempts: usize) -> Self {
        Self {
            meta,
            body,
            source,
            attempts,
            location: None,
        }
    }

    pub(crate) fn with_location(mut self, location: PathBuf) -> Self {
        self.location = Some(location);
        self
    }

    pub fn meta(&self) -> &ResponseMeta {
        &self.meta
    }

    pub fn status(&self) -> StatusCode {
        self.meta.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.meta.headers
    }

    pub fn url(&self) -> &str {
        &self.meta.url
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    pub fn into_body(self) -> Bytes {
        self.body
    }

    pub fn source(&self) -> ResponseSource {
        self.source
    }

    pub fn attempts(&self) -> usize {
        self.attempts
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn text_lossy(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        if self.body.is_empty() {
            return Err(Error::NoData {
                method: self.meta.method.clone(),
                uri: self.meta.url.clone(),
            });
        }
        serde_json::from_slice(&self.body).map_err(|source| Error::Deserialize {
            source,
            body: truncate_body(&self.body),
        })
    }

    pub fn into_stream(self, chunk_size: usize) -> ResponseStream {
        ResponseStream {
            meta: self.meta,
            body: self.body,
            offset: 0,
            chunk_size: chunk_size.max(1),
        }
    }
}

#[derive(Debug)]
pub struct ResponseStream {
    meta: ResponseMeta,
    body: Bytes,
    offset: usize,
    chunk_size: usize,
}

impl ResponseStream {
    pub fn meta(&self) -> &ResponseMeta {
        &self.meta
    }

    pub fn status(&self) -> StatusCode {
        self.meta.status
    }

    pub fn remaining(&self) -> usize {
        self.body.len() - self.offset
    }

    pub fn next_chunk(&mut self) -> Option<Bytes> {
        if self.offset >= self.body.len() {
            return None;
        }
        let end = self
            .offset
            .saturating_add(self.chunk_size)
            .min(self.body.len());
        let chunk = self.body.slice(self.offset..end);
        self.offset = end;
        Some(chunk)
    }
}

impl Stream for ResponseStream {
    type Item = Bytes;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Poll::Ready(self.get_mut().next_chunk())
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let chunks = self.remaining().div_ceil(self.chunk_size);
        (chunks, Some(chunks))
    }
}
