use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use futures_core::Stream;
use futures_util::future::BoxFuture;
use http::header::{ACCEPT, CONTENT_TYPE, HeaderName, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;

use crate::Result;
use crate::auth::{BasicAuth, BasicCredentials, BearerAuth, TokenGetter};
use crate::base::{BaseUrl, BaseUrlMiddleware};
use crate::body::RequestBody;
use crate::error::{BoxError, Error};
use crate::middleware::{Middleware, Next, Placement};
use crate::options::RestOptions;
use crate::request::RestRequest;
use crate::response::RestResponse;
use crate::upload::RangeUploader;
use crate::util::{append_query, parse_header_name, parse_header_value, query_keys, request_shape};

const APPLICATION_JSON: &str = "application/json";
const FORM_URLENCODED: &str = "application/x-www-form-urlencoded";

/// Immutable client. Every `with_*` method returns a new client; the parent
/// is left untouched. Connection agents are the only shared state.
#[derive(Clone, Debug, Default)]
pub struct RestClient {
    options: Arc<RestOptions>,
}

impl RestClient {
    pub fn new(options: RestOptions) -> Self {
        Self {
            options: Arc::new(options),
        }
    }

    pub fn options(&self) -> &RestOptions {
        &self.options
    }

    pub fn with_options<F>(&self, update: F) -> Self
    where
        F: FnOnce(RestOptions) -> RestOptions,
    {
        Self::new(update(self.options.as_ref().clone()))
    }

    pub fn with_middleware<M>(&self, middleware: M, placement: Placement) -> Self
    where
        M: Middleware + 'static,
    {
        self.with_shared_middleware(Arc::new(middleware), placement)
    }

    pub fn with_shared_middleware(
        &self,
        middleware: Arc<dyn Middleware>,
        placement: Placement,
    ) -> Self {
        let mut options = self.options.as_ref().clone();
        match placement {
            Placement::Append => options.push_middleware(middleware),
            Placement::Prepend => options.insert_middleware_first(middleware),
        }
        Self::new(options)
    }

    /// Resolves relative request paths against `base`, WHATWG-style.
    pub fn with_base(&self, base: impl Into<BaseUrl>) -> Self {
        self.with_middleware(BaseUrlMiddleware::new(base.into()), Placement::Append)
    }

    pub fn with_header(&self, name: &str, value: &str) -> Result<Self> {
        let middleware = StaticHeader {
            name: parse_header_name(name)?,
            value: parse_header_value(name, value)?,
        };
        Ok(self.with_middleware(middleware, Placement::Append))
    }

    /// Header whose value is produced per request.
    pub fn with_header_fn<F, Fut>(&self, name: &str, value: F) -> Result<Self>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        let middleware = DynamicHeader {
            name: parse_header_name(name)?,
            value: Box::new(move || Box::pin(value())),
        };
        Ok(self.with_middleware(middleware, Placement::Append))
    }

    pub fn with_bearer<G>(&self, token: G) -> Self
    where
        G: TokenGetter<String> + 'static,
    {
        self.with_middleware(BearerAuth::new(Arc::new(token)), Placement::Append)
    }

    pub fn with_bearer_prefix<G>(&self, prefix: &str, token: G) -> Self
    where
        G: TokenGetter<String> + 'static,
    {
        self.with_middleware(
            BearerAuth::with_prefix(prefix, Arc::new(token)),
            Placement::Append,
        )
    }

    pub fn with_basic<G>(&self, credentials: G) -> Self
    where
        G: TokenGetter<BasicCredentials> + 'static,
    {
        self.with_middleware(BasicAuth::new(Arc::new(credentials)), Placement::Append)
    }

    /// A bare request; headers and body are up to the caller.
    pub fn request(&self, method: Method, path: &str) -> RestRequest {
        RestRequest::from_parts(
            Arc::clone(&self.options),
            method,
            path.to_owned(),
            HeaderMap::new(),
            RequestBody::Empty,
            request_shape(path, &[]),
        )
    }

    /// GET with `args` serialized into the query string.
    pub fn get<A>(&self, path: &str, args: &A) -> Result<RestRequest>
    where
        A: Serialize + ?Sized,
    {
        self.no_body_request(Method::GET, path, args, APPLICATION_JSON)
    }

    pub fn get_accepting<A>(&self, path: &str, args: &A, accept: &str) -> Result<RestRequest>
    where
        A: Serialize + ?Sized,
    {
        self.no_body_request(Method::GET, path, args, accept)
    }

    pub fn write_delete<A>(&self, path: &str, args: &A) -> Result<RestRequest>
    where
        A: Serialize + ?Sized,
    {
        self.no_body_request(Method::DELETE, path, args, APPLICATION_JSON)
    }

    pub fn write_json<B>(&self, method: Method, path: &str, body: &B) -> Result<RestRequest>
    where
        B: Serialize + ?Sized,
    {
        let payload = serde_json::to_vec(body).map_err(|source| Error::Serialize { source })?;
        let keys = serde_json::to_value(body)
            .ok()
            .and_then(|value| match value {
                serde_json::Value::Object(map) => Some(map.keys().cloned().collect::<Vec<_>>()),
                _ => None,
            })
            .unwrap_or_default();
        Ok(self.body_request(
            method,
            path,
            APPLICATION_JSON,
            APPLICATION_JSON,
            RequestBody::from(payload),
            request_shape(path, &keys),
        ))
    }

    pub fn write_form<B>(&self, method: Method, path: &str, body: &B) -> Result<RestRequest>
    where
        B: Serialize + ?Sized,
    {
        let payload =
            serde_urlencoded::to_string(body).map_err(|source| Error::SerializeForm { source })?;
        let shape = request_shape(path, &query_keys(&payload));
        Ok(self.body_request(
            method,
            path,
            FORM_URLENCODED,
            APPLICATION_JSON,
            RequestBody::from(payload),
            shape,
        ))
    }

    /// Raw payload; `Accept` defaults to the content type.
    pub fn write_raw(
        &self,
        method: Method,
        path: &str,
        body: impl Into<Bytes>,
        content_type: &str,
        accept: Option<&str>,
    ) -> RestRequest {
        self.body_request(
            method,
            path,
            content_type,
            accept.unwrap_or(content_type),
            RequestBody::Buffered(body.into()),
            request_shape(path, &[]),
        )
    }

    /// Raw payload from a byte stream. The stream is consumed by the first
    /// attempt, so retries of such requests fail with `BodyNotReplayable`.
    pub fn write_stream<S, E>(
        &self,
        method: Method,
        path: &str,
        body: S,
        content_type: &str,
    ) -> RestRequest
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        self.body_request(
            method,
            path,
            content_type,
            content_type,
            RequestBody::stream(body),
            request_shape(path, &[]),
        )
    }

    /// Chunked `Content-Range` uploader for `path`.
    pub fn range_upload(
        &self,
        method: Method,
        path: &str,
        mime_type: &str,
        chunk_size: usize,
    ) -> RangeUploader {
        RangeUploader::new(self.clone(), method, path, mime_type, chunk_size)
    }

    fn no_body_request<A>(
        &self,
        method: Method,
        path: &str,
        args: &A,
        accept: &str,
    ) -> Result<RestRequest>
    where
        A: Serialize + ?Sized,
    {
        let query =
            serde_urlencoded::to_string(args).map_err(|source| Error::SerializeForm { source })?;
        let shape = request_shape(path, &query_keys(&query));
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, parse_header_value(ACCEPT.as_str(), accept)?);
        Ok(RestRequest::from_parts(
            Arc::clone(&self.options),
            method,
            append_query(path, &query),
            headers,
            RequestBody::Empty,
            shape,
        ))
    }

    fn body_request(
        &self,
        method: Method,
        path: &str,
        content_type: &str,
        accept: &str,
        body: RequestBody,
        shape: String,
    ) -> RestRequest {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(content_type) {
            headers.insert(CONTENT_TYPE, value);
        }
        if let Ok(value) = HeaderValue::from_str(accept) {
            headers.insert(ACCEPT, value);
        }
        RestRequest::from_parts(
            Arc::clone(&self.options),
            method,
            path.to_owned(),
            headers,
            body,
            shape,
        )
    }
}

struct StaticHeader {
    name: HeaderName,
    value: HeaderValue,
}

impl Middleware for StaticHeader {
    fn handle<'a>(
        &'a self,
        request: RestRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<RestResponse>> {
        next.run(request.with_header_value(self.name.clone(), self.value.clone()))
    }
}

type HeaderProducer = Box<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

struct DynamicHeader {
    name: HeaderName,
    value: HeaderProducer,
}

impl Middleware for DynamicHeader {
    fn handle<'a>(
        &'a self,
        request: RestRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<RestResponse>> {
        Box::pin(async move {
            let value = (self.value)().await?;
            let value = parse_header_value(self.name.as_str(), &value)?;
            next.run(request.with_header_value(self.name.clone(), value)).await
        })
    }
}
