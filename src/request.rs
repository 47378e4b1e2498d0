use std::sync::Arc;

use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::de::DeserializeOwned;

use crate::Result;
use crate::body::RequestBody;
use crate::execute::{ReadMode, send};
use crate::options::RestOptions;
use crate::response::{ResponseStream, RestResponse};
use crate::util::{parse_header_name, parse_header_value, redact_uri_for_logs, request_shape};

/// An immutable request description. Every `with_*` method returns a new
/// value; the terminal methods (`response`, `text`, `json`, `stream`) run it
/// through the middleware chain and the retry loop.
#[derive(Clone)]
pub struct RestRequest {
    options: Arc<RestOptions>,
    method: Method,
    url: String,
    headers: HeaderMap,
    body: RequestBody,
    shape: String,
}

impl std::fmt::Debug for RestRequest {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RestRequest")
            .field("method", &self.method)
            .field("url", &redact_uri_for_logs(&self.url))
            .field("shape", &self.shape)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .field("body", &self.body)
            .finish()
    }
}

impl RestRequest {
    /// A bodiless request with default options.
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        let url = url.into();
        let shape = request_shape(&url, &[]);
        Self::from_parts(
            Arc::new(RestOptions::default()),
            method,
            url,
            HeaderMap::new(),
            RequestBody::Empty,
            shape,
        )
    }

    pub(crate) fn from_parts(
        options: Arc<RestOptions>,
        method: Method,
        url: String,
        headers: HeaderMap,
        body: RequestBody,
        shape: String,
    ) -> Self {
        Self {
            options,
            method,
            url,
            headers,
            body,
            shape,
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

    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    /// Low-cardinality grouping tag, e.g. `/users/:id:fields,limit`.
    pub fn shape(&self) -> &str {
        &self.shape
    }

    pub fn options(&self) -> &RestOptions {
        &self.options
    }

    pub(crate) fn shared_options(&self) -> &Arc<RestOptions> {
        &self.options
    }

    pub fn with_url(&self, url: impl Into<String>) -> Self {
        let mut request = self.clone();
        request.url = url.into();
        request
    }

    pub fn with_method(&self, method: Method) -> Self {
        let mut request = self.clone();
        request.method = method;
        request
    }

    pub fn with_header(&self, name: &str, value: &str) -> Result<Self> {
        let header_name = parse_header_name(name)?;
        let header_value = parse_header_value(name, value)?;
        Ok(self.with_header_value(header_name, header_value))
    }

    pub fn with_header_value(&self, name: HeaderName, value: HeaderValue) -> Self {
        let mut request = self.clone();
        request.headers.insert(name, value);
        request
    }

    /// Overlays `headers` on top of the current ones, replacing same-named
    /// entries.
    pub fn with_headers(&self, headers: &HeaderMap) -> Self {
        let mut request = self.clone();
        for name in headers.keys() {
            request.headers.remove(name);
        }
        for (name, value) in headers {
            request.headers.append(name.clone(), value.clone());
        }
        request
    }

    pub fn with_body(&self, body: impl Into<RequestBody>) -> Self {
        let mut request = self.clone();
        request.body = body.into();
        request
    }

    pub fn with_shape(&self, shape: impl Into<String>) -> Self {
        let mut request = self.clone();
        request.shape = shape.into();
        request
    }

    pub fn with_options(&self, options: RestOptions) -> Self {
        let mut request = self.clone();
        request.options = Arc::new(options);
        request
    }

    /// Sends the request and reads the whole body.
    pub async fn response(&self) -> Result<RestResponse> {
        let delivered = send(self.clone(), ReadMode::Full).await?;
        Ok(delivered.response)
    }

    pub async fn text(&self) -> Result<String> {
        Ok(self.response().await?.into_text())
    }

    pub async fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        self.response().await?.json()
    }

    /// Sends the request, preloading `preload_chars` characters so the
    /// response can be classified, and hands back the rest as a stream.
    pub async fn stream(&self, preload_chars: usize) -> Result<ResponseStream> {
        let delivered = send(self.clone(), ReadMode::Stream { preload_chars }).await?;
        Ok(ResponseStream::new(delivered.response, delivered.reader))
    }
}
