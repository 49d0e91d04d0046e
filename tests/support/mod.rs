#![allow(dead_code)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use http::HeaderMap;
use http::header::HeaderValue;
use reqflow::{
    ProgressReporter, Request, Transport, TransportDownload, TransportError, TransportErrorKind,
    TransportResponse,
};

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Lets spawned lifecycle tasks run up to their next real suspension point.
pub async fn settle() {
    for _ in 0..16 {
        tokio::task::yield_now().await;
    }
}

#[derive(Clone, Debug)]
pub enum Reply {
    Respond {
        status: u16,
        headers: Vec<(&'static str, &'static str)>,
        body: &'static str,
        delay: Duration,
    },
    Fail(TransportErrorKind),
    Hang,
}

impl Reply {
    pub fn ok(body: &'static str) -> Self {
        Self::status(200, body)
    }

    pub fn status(status: u16, body: &'static str) -> Self {
        Self::Respond {
            status,
            headers: Vec::new(),
            body,
            delay: Duration::ZERO,
        }
    }

    pub fn header(mut self, name: &'static str, value: &'static str) -> Self {
        if let Self::Respond { headers, .. } = &mut self {
            headers.push((name, value));
        }
        self
    }

    pub fn after(mut self, wait: Duration) -> Self {
        if let Self::Respond { delay, .. } = &mut self {
            *delay = wait;
        }
        self
    }
}

/// In-process transport that answers from a script, then from a fallback reply.
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Reply>>,
    fallback: Reply,
    calls: AtomicUsize,
    requests: Mutex<Vec<Request>>,
}

impl ScriptedTransport {
    pub fn new(script: impl IntoIterator<Item = Reply>, fallback: Reply) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn always(reply: Reply) -> Arc<Self> {
        Self::new([], reply)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<Request> {
        lock_unpoisoned(&self.requests).clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|request| {
                url::Url::parse(request.url())
                    .map(|url| url.path().to_owned())
                    .unwrap_or_else(|_| request.url().to_owned())
            })
            .collect()
    }

    fn next_reply(&self, request: Request) -> Reply {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock_unpoisoned(&self.requests).push(request);
        lock_unpoisoned(&self.script)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone())
    }
}

impl Transport for ScriptedTransport {
    fn execute(
        &self,
        request: Request,
        progress: ProgressReporter,
    ) -> BoxFuture<'_, Result<TransportResponse, TransportError>> {
        let reply = self.next_reply(request);
        Box::pin(async move {
            match reply {
                Reply::Respond {
                    status,
                    headers,
                    body,
                    delay,
                } => {
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    let total = body.len() as u64;
                    progress.report(total / 2, total);
                    progress.report(total, total);
                    let mut header_map = HeaderMap::new();
                    for (name, value) in headers {
                        header_map.insert(name, HeaderValue::from_static(value));
                    }
                    Ok(TransportResponse::new(status, header_map, body))
                }
                Reply::Fail(kind) => Err(TransportError::new(kind, "scripted failure")),
                Reply::Hang => std::future::pending().await,
            }
        })
    }

    fn download(
        &self,
        request: Request,
        _progress: ProgressReporter,
    ) -> BoxFuture<'_, Result<TransportDownload, TransportError>> {
        let file_name = request
            .url()
            .rsplit('/')
            .next()
            .unwrap_or("download")
            .to_owned();
        let reply = self.next_reply(request);
        Box::pin(async move {
            match reply {
                Reply::Respond { status, .. } => Ok(TransportDownload {
                    status,
                    headers: HeaderMap::new(),
                    location: PathBuf::from("/tmp/reqflow").join(file_name),
                }),
                Reply::Fail(kind) => Err(TransportError::new(kind, "scripted failure")),
                Reply::Hang => std::future::pending().await,
            }
        })
    }
}
