use std::pin::Pin;
use std::task::{Context, Poll};

use futures_core::Stream;
use futures_util::StreamExt;
use http::{HeaderMap, StatusCode};
use serde::de::DeserializeOwned;

use crate::Result;
use crate::error::Error;
use crate::reader::StreamingReader;
use crate::request::RestRequest;
use crate::util::truncate_text;

/// A response with its body decoded as text. `text` holds the whole body
/// unless `text_is_partial` is set, which happens for streamed responses
/// where only a prefix was preloaded.
#[derive(Clone, Debug)]
pub struct RestResponse {
    request: RestRequest,
    status: StatusCode,
    headers: HeaderMap,
    text: String,
    text_is_partial: bool,
}

impl RestResponse {
    pub fn new(
        request: RestRequest,
        status: StatusCode,
        headers: HeaderMap,
        text: impl Into<String>,
        text_is_partial: bool,
    ) -> Self {
        Self {
            request,
            status,
            headers,
            text: text.into(),
            text_is_partial,
        }
    }

    /// The request as it reached the transport, after every middleware.
    pub fn request(&self) -> &RestRequest {
        &self.request
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn text_is_partial(&self) -> bool {
        self.text_is_partial
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Lenient JSON view of the body: `None` when empty or not JSON.
    pub fn json_value(&self) -> Option<serde_json::Value> {
        if self.text.is_empty() {
            return None;
        }
        serde_json::from_str(&self.text).ok()
    }

    pub fn json<T>(&self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        serde_json::from_str(&self.text).map_err(|source| Error::Deserialize {
            source,
            body: truncate_text(&self.text),
        })
    }
}

/// Single-consumer stream over a response body: first the prefix preloaded
/// during classification, then whatever the reader still has.
pub struct ResponseStream {
    response: RestResponse,
    reader: Option<StreamingReader>,
    prefix_pending: bool,
}

impl std::fmt::Debug for ResponseStream {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ResponseStream")
            .field("status", &self.response.status)
            .field("prefix_pending", &self.prefix_pending)
            .field("closed", &self.reader.is_none())
            .finish()
    }
}

impl ResponseStream {
    pub(crate) fn new(response: RestResponse, reader: Option<StreamingReader>) -> Self {
        let prefix_pending = !response.text.is_empty();
        Self {
            response,
            reader,
            prefix_pending,
        }
    }

    /// Response head plus the preloaded prefix.
    pub fn response(&self) -> &RestResponse {
        &self.response
    }

    pub fn status(&self) -> StatusCode {
        self.response.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.response.headers
    }

    /// Reads until `max_chars` characters are available or the body ends,
    /// closes the connection and returns at most `max_chars` characters.
    pub async fn consume_returning_prefix(&mut self, max_chars: usize) -> Result<String> {
        let mut text = String::new();
        let mut chars = 0_usize;
        while chars < max_chars {
            match self.next().await {
                Some(Ok(chunk)) => {
                    chars += chunk.chars().count();
                    text.push_str(&chunk);
                }
                Some(Err(error)) => {
                    self.close();
                    return Err(error);
                }
                None => break,
            }
        }
        self.close();
        if chars > max_chars {
            text = text.chars().take(max_chars).collect();
        }
        Ok(text)
    }

    /// Releases the connection. Idempotent.
    pub fn close(&mut self) {
        self.prefix_pending = false;
        if let Some(mut reader) = self.reader.take() {
            reader.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.reader.is_none() && !self.prefix_pending
    }
}

impl Stream for ResponseStream {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.prefix_pending {
            this.prefix_pending = false;
            return Poll::Ready(Some(Ok(this.response.text.clone())));
        }
        let Some(reader) = this.reader.as_mut() else {
            return Poll::Ready(None);
        };
        let item = Pin::new(reader).poll_next(cx);
        if let Poll::Ready(None | Some(Err(_))) = &item {
            this.close();
        }
        item
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.close();
    }
}
