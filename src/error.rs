use std::net::IpAddr;
use std::time::Duration;

use http::{Method, StatusCode};
use thiserror::Error;

use crate::response::RestResponse;
use crate::util::{format_headers, query_keys, truncate_text};

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    Response,
    RateLimit,
    TokenInvalid,
    Retriable,
    ContentSizeOverLimit,
    Timeout,
    Aborted,
    Transport,
    InternalAddress,
    InvalidUri,
    RequestBuild,
    InvalidHeaderName,
    InvalidHeaderValue,
    SerializeJson,
    SerializeForm,
    Deserialize,
    ReadBody,
    BodyNotReplayable,
    TlsConfig,
    Callback,
    UploadSource,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Response => "response",
            Self::RateLimit => "rate_limit",
            Self::TokenInvalid => "token_invalid",
            Self::Retriable => "retriable",
            Self::ContentSizeOverLimit => "content_size_over_limit",
            Self::Timeout => "timeout",
            Self::Aborted => "aborted",
            Self::Transport => "transport",
            Self::InternalAddress => "internal_address",
            Self::InvalidUri => "invalid_uri",
            Self::RequestBuild => "request_build",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::SerializeJson => "serialize_json",
            Self::SerializeForm => "serialize_form",
            Self::Deserialize => "deserialize",
            Self::ReadBody => "read_body",
            Self::BodyNotReplayable => "body_not_replayable",
            Self::TlsConfig => "tls_config",
            Self::Callback => "callback",
            Self::UploadSource => "upload_source",
        }
    }
}

/// Diagnostics captured from a response that was classified as an error.
///
/// The rendered message never contains query string values; those stay
/// available through [`RestResponse::request`] for callers that need them.
pub struct ResponseError {
    message: String,
    response: RestResponse,
    method: Method,
    scheme: String,
    host: String,
    pathname: String,
    request_args: Vec<String>,
    request_body: String,
    response_headers: String,
}

impl ResponseError {
    pub(crate) fn new(message: impl Into<String>, response: RestResponse) -> Self {
        let request = response.request();
        let method = request.method().clone();
        let (scheme, mut host, pathname, query) = match url::Url::parse(request.url()) {
            Ok(url) => {
                let host = match (url.host_str(), url.port()) {
                    (Some(host), Some(port)) => format!("{host}:{port}"),
                    (Some(host), None) => host.to_owned(),
                    _ => String::new(),
                };
                (
                    url.scheme().to_owned(),
                    host,
                    url.path().to_owned(),
                    url.query().unwrap_or_default().to_owned(),
                )
            }
            Err(_) => (
                String::new(),
                String::new(),
                request
                    .url()
                    .split('?')
                    .next()
                    .unwrap_or_default()
                    .to_owned(),
                String::new(),
            ),
        };
        if let Some(host_header) = request.headers().get(http::header::HOST)
            && let Ok(value) = host_header.to_str()
        {
            host = value.to_owned();
        }

        Self {
            message: message.into(),
            method,
            scheme,
            host,
            pathname,
            request_args: query_keys(&query),
            request_body: truncate_text(&request.body().preview()),
            response_headers: format_headers(response.headers()),
            response,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn response(&self) -> &RestResponse {
        &self.response
    }

    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    /// Query argument names of the failed request, values omitted.
    pub fn request_args(&self) -> &[String] {
        &self.request_args
    }

    pub fn request_body(&self) -> &str {
        &self.request_body
    }

    pub fn response_headers(&self) -> &str {
        &self.response_headers
    }

    pub(crate) fn prefix_message(&mut self, prefix: &str) {
        self.message = format!("{prefix}{}", self.message);
    }
}

impl std::fmt::Display for ResponseError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "HTTP {}: ", self.response.status().as_u16())?;
        if !self.message.is_empty() {
            write!(formatter, "{}: ", self.message)?;
        }
        let body = truncate_text(self.response.text());
        if body.contains('\n') {
            formatter.write_str("\n")?;
        }
        write!(
            formatter,
            "{body}\n  {} {}://{}{}",
            self.method, self.scheme, self.host, self.pathname
        )
    }
}

impl std::fmt::Debug for ResponseError {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ResponseError")
            .field("status", &self.response.status())
            .field("message", &self.message)
            .field("method", &self.method)
            .field("host", &self.host)
            .field("pathname", &self.pathname)
            .field("request_args", &self.request_args)
            .finish()
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("{error}")]
    Response { error: Box<ResponseError> },
    #[error("{error}")]
    RateLimit {
        delay: Duration,
        error: Box<ResponseError>,
    },
    #[error("{error}")]
    TokenInvalid { error: Box<ResponseError> },
    #[error("{error}")]
    Retriable {
        delay: Duration,
        error: Box<ResponseError>,
    },
    #[error("response body exceeds {limit} characters ({actual} read) for {method} {uri}")]
    ContentSizeOverLimit {
        limit: usize,
        actual: usize,
        method: Method,
        uri: String,
    },
    #[error(
        "request timed out after {timeout_ms}ms ({chars_read} characters read) for {method} {uri}"
    )]
    Timeout {
        timeout_ms: u128,
        chars_read: usize,
        method: Method,
        uri: String,
    },
    #[error("request aborted")]
    Aborted,
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("Domain {host} resolves to a non-public ({range}) IP address {address}")]
    InternalAddress {
        host: String,
        address: IpAddr,
        range: &'static str,
    },
    #[error("Invalid URL: {uri}")]
    InvalidUri { uri: String },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to serialize request json: {source}")]
    Serialize {
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to serialize request form: {source}")]
    SerializeForm {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("failed to decode response json: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("failed to read response body: {source}")]
    ReadBody {
        #[source]
        source: BoxError,
    },
    #[error("request body stream was already consumed for {method} {uri}")]
    BodyNotReplayable { method: Method, uri: String },
    #[error("invalid tls configuration: {message}")]
    TlsConfig { message: String },
    #[error("{source}")]
    Callback {
        #[source]
        source: BoxError,
    },
    #[error("upload source failed: {source}")]
    UploadSource {
        #[source]
        source: BoxError,
    },
}

impl Error {
    /// Wraps a failure raised by caller-supplied code: token getters, base
    /// URL resolvers, heartbeaters, middlewares.
    pub fn callback(source: impl Into<BoxError>) -> Self {
        Self::Callback {
            source: source.into(),
        }
    }

    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Response { .. } => ErrorCode::Response,
            Self::RateLimit { .. } => ErrorCode::RateLimit,
            Self::TokenInvalid { .. } => ErrorCode::TokenInvalid,
            Self::Retriable { .. } => ErrorCode::Retriable,
            Self::ContentSizeOverLimit { .. } => ErrorCode::ContentSizeOverLimit,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Aborted => ErrorCode::Aborted,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::InternalAddress { .. } => ErrorCode::InternalAddress,
            Self::InvalidUri { .. } => ErrorCode::InvalidUri,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::Serialize { .. } => ErrorCode::SerializeJson,
            Self::SerializeForm { .. } => ErrorCode::SerializeForm,
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::BodyNotReplayable { .. } => ErrorCode::BodyNotReplayable,
            Self::TlsConfig { .. } => ErrorCode::TlsConfig,
            Self::Callback { .. } => ErrorCode::Callback,
            Self::UploadSource { .. } => ErrorCode::UploadSource,
        }
    }

    pub fn response_error(&self) -> Option<&ResponseError> {
        match self {
            Self::Response { error }
            | Self::RateLimit { error, .. }
            | Self::TokenInvalid { error }
            | Self::Retriable { error, .. } => Some(&**error),
            _ => None,
        }
    }

    fn response_error_mut(&mut self) -> Option<&mut ResponseError> {
        match self {
            Self::Response { error }
            | Self::RateLimit { error, .. }
            | Self::TokenInvalid { error }
            | Self::Retriable { error, .. } => Some(&mut **error),
            _ => None,
        }
    }

    /// The response this error was classified from, when there was one.
    pub fn response(&self) -> Option<&RestResponse> {
        self.response_error().map(ResponseError::response)
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(RestResponse::status)
    }

    /// Server- or hook-provided delay carried by rate-limit and retriable
    /// errors.
    pub fn retry_delay(&self) -> Option<Duration> {
        match self {
            Self::RateLimit { delay, .. } | Self::Retriable { delay, .. } => Some(*delay),
            _ => None,
        }
    }

    pub fn is_token_invalid(&self) -> bool {
        matches!(self, Self::TokenInvalid { .. })
    }

    pub(crate) fn prefix_message(&mut self, prefix: &str) {
        if let Some(error) = self.response_error_mut() {
            error.prefix_message(prefix);
        }
    }
}
