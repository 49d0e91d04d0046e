use std::path::{Path, PathBuf};
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Result;
use crate::client::Client;
use crate::error::Error;
use crate::lifecycle::RequestHandle;
use crate::progress::ProgressReporter;
use crate::queue::Priority;
use crate::response::{Response, ResponseStream};
use crate::retry::RetryPolicy;
use crate::util::{append_query_pairs, parse_header};

#[derive(Clone, Debug)]
pub struct Request {
    method: Method,
    url: String,
    headers: HeaderMap,
    body: Option<RequestBody>,
    timeout: Duration,
    priority: Priority,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            timeout,
            priority: Priority::Normal,
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn set_header(&mut self, name: HeaderName, value: HeaderValue) {
        self.headers.insert(name, value);
    }

    pub fn body(&self) -> Option<&RequestBody> {
        self.body.as_ref()
    }

    pub fn body_bytes(&self) -> Option<&Bytes> {
        match &self.body {
            Some(RequestBody::Bytes(bytes)) => Some(bytes),
            _ => None,
        }
    }

    pub fn set_body(&mut self, body: Option<RequestBody>) {
        self.body = body;
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout.max(Duration::from_millis(1));
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn set_priority(&mut self, priority: Priority) {
        self.priority = priority;
    }
}

#[derive(Clone, Debug)]
pub enum RequestBody {
    Bytes(Bytes),
    Multipart(Multipart),
}

#[derive(Clone, Debug, Default)]
pub struct Multipart {
    fields: Vec<(String, String)>,
    files: Vec<UploadFile>,
}

impl Multipart {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn text(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.push((name.into(), value.into()));
        self
    }

    pub fn file(mut self, file: UploadFile) -> Self {
        self.files.push(file);
        self
    }

    pub fn fields(&self) -> &[(String, String)] {
        &self.fields
    }

    pub fn files(&self) -> &[UploadFile] {
        &self.files
    }
}

#[derive(Clone, Debug)]
pub enum UploadSource {
    Bytes(Bytes),
    Path(PathBuf),
}

#[derive(Clone, Debug)]
pub struct UploadFile {
    field_name: String,
    file_name: String,
    content_type: Option<String>,
    source: UploadSource,
}

impl UploadFile {
    pub fn from_bytes(
        field_name: impl Into<String>,
        file_name: impl Into<String>,
        bytes: impl Into<Bytes>,
    ) -> Self {
        Self {
            field_name: field_name.into(),
            file_name: file_name.into(),
            content_type: None,
            source: UploadSource::Bytes(bytes.into()),
        }
    }

    pub fn from_path(field_name: impl Into<String>, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            field_name: field_name.into(),
            file_name,
            content_type: None,
            source: UploadSource::Path(path.to_path_buf()),
        }
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn field_name(&self) -> &str {
        &self.field_name
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn source(&self) -> &UploadSource {
        &self.source
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Operation {
    Fetch,
    Download,
}

#[derive(Clone, Debug)]
pub(crate) struct RequestSpec {
    pub(crate) method: Method,
    pub(crate) url: String,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Option<RequestBody>,
    pub(crate) timeout: Option<Duration>,
    pub(crate) priority: Priority,
    pub(crate) retry_policy: Option<RetryPolicy>,
    pub(crate) use_cache: bool,
    pub(crate) require_body: bool,
    pub(crate) progress: ProgressReporter,
    pub(crate) operation: Operation,
}

pub struct RequestBuilder<'a> {
    client: &'a Client,
    method: Method,
    url: String,
    query_pairs: Vec<(String, String)>,
    headers: HeaderMap,
    body: Option<RequestBody>,
    timeout: Option<Duration>,
    priority: Priority,
    retry_policy: Option<RetryPolicy>,
    use_cache: bool,
    require_body: bool,
    progress: ProgressReporter,
}

impl<'a> RequestBuilder<'a> {
    pub(crate) fn new(client: &'a Client, method: Method, url: String) -> Self {
        Self {
            client,
            method,
            url,
            query_pairs: Vec::new(),
            headers: HeaderMap::new(),
            body: None,
            timeout: None,
            priority: Priority::Normal,
            retry_policy: None,
            use_cache: false,
            require_body: false,
            progress: ProgressReporter::disabled(),
        }
    }

    pub fn header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn try_header(self, name: &str, value: &str) -> Result<Self> {
        let (name, value) = parse_header(name, value)?;
        Ok(self.header(name, value))
    }

    pub fn query_pair(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_pairs.push((name.into(), value.into()));
        self
    }

    pub fn query_pairs<K, V, I>(mut self, pairs: I) -> Self
    where
        K: Into<String>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        self.query_pairs.extend(
            pairs
                .into_iter()
                .map(|(name, value)| (name.into(), value.into())),
        );
        self
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(RequestBody::Bytes(body.into()));
        self
    }

    pub fn multipart(mut self, multipart: Multipart) -> Self {
        self.body = Some(RequestBody::Multipart(multipart));
        self
    }

    pub fn json<T>(self, payload: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let body = serde_json::to_vec(payload).map_err(|source| Error::Serialize { source })?;
        Ok(self
            .body(body)
            .header(CONTENT_TYPE, HeaderValue::from_static("application/json")))
    }

    pub fn form<T>(self, payload: &T) -> Result<Self>
    where
        T: Serialize + ?Sized,
    {
        let encoded =
            serde_urlencoded::to_string(payload).map_err(|source| Error::SerializeForm { source })?;
        Ok(self.body(encoded).header(
            CONTENT_TYPE,
            HeaderValue::from_static("application/x-www-form-urlencoded"),
        ))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout.max(Duration::from_millis(1)));
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    pub fn cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn require_body(mut self, require_body: bool) -> Self {
        self.require_body = require_body;
        self
    }

    pub fn on_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        self.progress = ProgressReporter::new(callback);
        self
    }

    fn into_spec(self, operation: Operation) -> (&'a Client, RequestSpec) {
        let url = append_query_pairs(&self.url, &self.query_pairs);
        let spec = RequestSpec {
            method: self.method,
            url,
            headers: self.headers,
            body: self.body,
            timeout: self.timeout,
            priority: self.priority,
            retry_policy: self.retry_policy,
            use_cache: self.use_cache,
            require_body: self.require_body,
            progress: self.progress,
            operation,
        };
        (self.client, spec)
    }

    /// Starts the request in the background.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    pub fn dispatch(self) -> RequestHandle {
        let (client, spec) = self.into_spec(Operation::Fetch);
        client.dispatch_spec(spec)
    }

    /// Waits for the first outcome. A suspended request reports
    /// [`Error::Suspended`] here and is still replayed once the network returns.
    pub async fn send(self) -> Result<Response> {
        self.dispatch().first_outcome().await
    }

    pub async fn send_json<T>(self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let response = self.require_body(true).send().await?;
        response.json()
    }

    pub async fn send_streamed(self, chunk_size: usize) -> Result<ResponseStream> {
        let response = self.send().await?;
        Ok(response.into_stream(chunk_size))
    }

    pub async fn send_download(self) -> Result<PathBuf> {
        let (client, spec) = self.into_spec(Operation::Download);
        let (method, uri) = (spec.method.clone(), spec.url.clone());
        let response = client.dispatch_spec(spec).first_outcome().await?;
        response
            .location()
            .map(Path::to_path_buf)
            .ok_or(Error::NoData { method, uri })
    }
}
