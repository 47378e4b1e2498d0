use std::convert::Infallible;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::stream::BoxStream;
use http::{HeaderMap, Method, Request, Uri};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;

use crate::error::{BoxError, Error};
use crate::util::{lock_unpoisoned, truncate_body};

pub(crate) type ReqBody = UnsyncBoxBody<Bytes, BoxError>;
type ByteStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// Request payload. Buffered bodies are replayed on every attempt; a
/// streaming body can be sent once.
#[derive(Clone, Default)]
pub enum RequestBody {
    #[default]
    Empty,
    Buffered(Bytes),
    Streaming(StreamingBody),
}

/// One-shot byte stream shared by every clone of the request that owns it.
#[derive(Clone)]
pub struct StreamingBody {
    slot: Arc<Mutex<Option<ByteStream>>>,
}

impl RequestBody {
    pub fn stream<S, E>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, E>> + Send + 'static,
        E: Into<BoxError>,
    {
        let stream: ByteStream = stream.map(|item| item.map_err(Into::into)).boxed();
        Self::Streaming(StreamingBody {
            slot: Arc::new(Mutex::new(Some(stream))),
        })
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Empty => true,
            Self::Buffered(bytes) => bytes.is_empty(),
            Self::Streaming(_) => false,
        }
    }

    /// Truncated text form used in error diagnostics.
    pub(crate) fn preview(&self) -> String {
        match self {
            Self::Empty => String::new(),
            Self::Buffered(bytes) => truncate_body(bytes),
            Self::Streaming(_) => "<stream>".to_owned(),
        }
    }

    pub(crate) fn to_req_body(&self, method: &Method, uri: &str) -> Result<ReqBody, Error> {
        match self {
            Self::Empty => Ok(empty_req_body()),
            Self::Buffered(bytes) => Ok(buffered_req_body(bytes.clone())),
            Self::Streaming(body) => {
                let stream = lock_unpoisoned(&body.slot).take().ok_or_else(|| {
                    Error::BodyNotReplayable {
                        method: method.clone(),
                        uri: uri.to_owned(),
                    }
                })?;
                Ok(stream_req_body(stream))
            }
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => formatter.write_str("Empty"),
            Self::Buffered(bytes) => formatter
                .debug_tuple("Buffered")
                .field(&bytes.len())
                .finish(),
            Self::Streaming(_) => formatter.write_str("Streaming"),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self::Buffered(bytes)
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Self::Buffered(Bytes::from(text))
    }
}

impl From<&'static str> for RequestBody {
    fn from(text: &'static str) -> Self {
        Self::Buffered(Bytes::from_static(text.as_bytes()))
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Buffered(Bytes::from(bytes))
    }
}

fn map_infallible_to_box_error(never: Infallible) -> BoxError {
    match never {}
}

pub(crate) fn empty_req_body() -> ReqBody {
    Full::new(Bytes::new())
        .map_err(map_infallible_to_box_error)
        .boxed_unsync()
}

pub(crate) fn buffered_req_body(body: Bytes) -> ReqBody {
    Full::new(body)
        .map_err(map_infallible_to_box_error)
        .boxed_unsync()
}

fn stream_req_body(stream: ByteStream) -> ReqBody {
    BodyExt::boxed_unsync(StreamBody::new(stream.map(|item| item.map(Frame::data))))
}

pub(crate) fn build_http_request(
    method: Method,
    uri: Uri,
    headers: &HeaderMap,
    body: ReqBody,
) -> Result<Request<ReqBody>, Error> {
    let mut request_builder = Request::builder().method(method).uri(uri);
    for (name, value) in headers {
        request_builder = request_builder.header(name, value);
    }
    request_builder
        .body(body)
        .map_err(|source| Error::RequestBuild { source })
}
