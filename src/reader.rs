//! Incremental response body reader.
//!
//! A [`StreamingReader`] owns one fetch: the request future, the response
//! body and a single wall-clock deadline covering both. The fetch runs on a
//! background task that hands decoded text to the reader through a channel of
//! capacity one, so nothing is read ahead of the consumer by more than a
//! chunk. Closing or dropping the reader aborts that task, which drops the
//! body and releases the connection on every exit path.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, ready};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures_core::Stream;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use http::{HeaderMap, StatusCode};
use http_body::Body;
use http_body_util::BodyExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::Result;
use crate::error::{BoxError, Error};
use crate::options::Heartbeater;

/// Progress of a fetch, handed to the timeout and after-read hooks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReaderProgress {
    pub chars_read: usize,
    pub elapsed: Duration,
}

pub type TimeoutHandler = Arc<dyn Fn(&ReaderProgress) -> Error + Send + Sync>;
pub type AfterReadHook = Arc<dyn Fn(&ReaderProgress) -> Result<()> + Send + Sync>;

#[derive(Clone, Default)]
pub struct ReaderOptions {
    timeout: Option<Duration>,
    heartbeater: Option<Arc<dyn Heartbeater>>,
    on_timeout: Option<TimeoutHandler>,
    on_after_read: Option<AfterReadHook>,
}

impl ReaderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn heartbeater(mut self, heartbeater: Arc<dyn Heartbeater>) -> Self {
        self.heartbeater = Some(heartbeater);
        self
    }

    /// Builds the error surfaced when the deadline fires. Without a handler
    /// the reader fails with [`Error::Aborted`].
    pub fn on_timeout<F>(mut self, handler: F) -> Self
    where
        F: Fn(&ReaderProgress) -> Error + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(handler));
        self
    }

    pub fn on_after_read<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ReaderProgress) -> Result<()> + Send + Sync + 'static,
    {
        self.on_after_read = Some(Arc::new(hook));
        self
    }
}

enum ReaderEvent {
    Head {
        status: StatusCode,
        headers: HeaderMap,
    },
    Chunk(String),
}

enum ReaderState {
    Unstarted(BoxFuture<'static, ()>),
    Running(JoinHandle<()>),
    Closed,
}

pub struct StreamingReader {
    state: ReaderState,
    events: mpsc::Receiver<Result<ReaderEvent>>,
    status: Option<StatusCode>,
    headers: HeaderMap,
    text_fetched: String,
    text_is_partial: bool,
    chars_read: usize,
    reached_end: bool,
}

impl std::fmt::Debug for StreamingReader {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            ReaderState::Unstarted(_) => "unstarted",
            ReaderState::Running(_) => "running",
            ReaderState::Closed => "closed",
        };
        formatter
            .debug_struct("StreamingReader")
            .field("state", &state)
            .field("status", &self.status)
            .field("chars_read", &self.chars_read)
            .field("text_is_partial", &self.text_is_partial)
            .finish()
    }
}

impl StreamingReader {
    /// Wraps a fetch. Nothing happens until the first `preload` or poll.
    pub fn new<F, B>(fetch: F, options: ReaderOptions) -> Self
    where
        F: Future<Output = Result<http::Response<B>>> + Send + 'static,
        B: Body<Data = Bytes> + Send + Unpin + 'static,
        B::Error: Into<BoxError>,
    {
        let (sender, events) = mpsc::channel(1);
        Self {
            state: ReaderState::Unstarted(Box::pin(pump(fetch, options, sender))),
            events,
            status: None,
            headers: HeaderMap::new(),
            text_fetched: String::new(),
            text_is_partial: true,
            chars_read: 0,
            reached_end: false,
        }
    }

    pub fn status(&self) -> Option<StatusCode> {
        self.status
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Text accumulated by `preload` calls.
    pub fn text_fetched(&self) -> &str {
        &self.text_fetched
    }

    pub(crate) fn take_text_fetched(&mut self) -> String {
        std::mem::take(&mut self.text_fetched)
    }

    /// False only once a preload observed the end of the body.
    pub fn text_is_partial(&self) -> bool {
        self.text_is_partial
    }

    pub fn chars_read(&self) -> usize {
        self.chars_read
    }

    pub fn is_closed(&self) -> bool {
        matches!(self.state, ReaderState::Closed)
    }

    /// Waits for the response head, then reads until at least `chars`
    /// characters were decoded in total or the body ends. Fails with
    /// [`Error::Aborted`] when the reader was closed before the end.
    pub async fn preload(&mut self, chars: usize) -> Result<()> {
        std::future::poll_fn(|cx| self.poll_head(cx)).await?;
        while self.chars_read < chars {
            match self.next().await {
                Some(Ok(text)) => self.text_fetched.push_str(&text),
                Some(Err(error)) => return Err(error),
                None if self.reached_end => {
                    self.text_is_partial = false;
                    break;
                }
                None => return Err(Error::Aborted),
            }
        }
        Ok(())
    }

    /// Aborts the fetch. Safe to call any number of times.
    pub fn close(&mut self) {
        if let ReaderState::Running(handle) = &self.state {
            handle.abort();
        }
        self.state = ReaderState::Closed;
        self.events.close();
    }

    fn start(&mut self) {
        if matches!(self.state, ReaderState::Unstarted(_)) {
            let ReaderState::Unstarted(task) =
                std::mem::replace(&mut self.state, ReaderState::Closed)
            else {
                return;
            };
            self.state = ReaderState::Running(tokio::spawn(task));
        }
    }

    fn poll_head(&mut self, cx: &mut Context<'_>) -> Poll<Result<()>> {
        if self.status.is_some() {
            return Poll::Ready(Ok(()));
        }
        if self.is_closed() {
            return Poll::Ready(Err(Error::Aborted));
        }
        self.start();
        match ready!(self.events.poll_recv(cx)) {
            Some(Ok(ReaderEvent::Head { status, headers })) => {
                self.status = Some(status);
                self.headers = headers;
                Poll::Ready(Ok(()))
            }
            Some(Ok(ReaderEvent::Chunk(_))) | None => {
                self.close();
                Poll::Ready(Err(Error::Aborted))
            }
            Some(Err(error)) => {
                self.close();
                Poll::Ready(Err(error))
            }
        }
    }
}

impl Stream for StreamingReader {
    type Item = Result<String>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.is_closed() {
            return Poll::Ready(None);
        }
        this.start();
        loop {
            match ready!(this.events.poll_recv(cx)) {
                Some(Ok(ReaderEvent::Head { status, headers })) => {
                    this.status = Some(status);
                    this.headers = headers;
                }
                Some(Ok(ReaderEvent::Chunk(text))) => {
                    this.chars_read += text.chars().count();
                    return Poll::Ready(Some(Ok(text)));
                }
                Some(Err(error)) => {
                    this.close();
                    return Poll::Ready(Some(Err(error)));
                }
                None => {
                    this.reached_end = true;
                    this.close();
                    return Poll::Ready(None);
                }
            }
        }
    }
}

impl Drop for StreamingReader {
    fn drop(&mut self) {
        self.close();
    }
}

async fn pump<F, B>(fetch: F, options: ReaderOptions, sender: mpsc::Sender<Result<ReaderEvent>>)
where
    F: Future<Output = Result<http::Response<B>>> + Send + 'static,
    B: Body<Data = Bytes> + Send + Unpin + 'static,
    B::Error: Into<BoxError>,
{
    let started_at = Instant::now();
    let mut chars_read = 0_usize;

    let work = async {
        let response = fetch.await?;
        let (parts, mut body) = response.into_parts();
        let head = ReaderEvent::Head {
            status: parts.status,
            headers: parts.headers,
        };
        if sender.send(Ok(head)).await.is_err() {
            return Ok(());
        }

        let mut decoder = Utf8Decoder::default();
        loop {
            if let Some(heartbeater) = &options.heartbeater {
                heartbeater.heartbeat().await?;
            }
            let Some(frame) = body.frame().await else {
                break;
            };
            let frame = frame.map_err(|source| Error::ReadBody {
                source: source.into(),
            })?;
            let Ok(data) = frame.into_data() else {
                continue;
            };
            let text = decoder.decode(&data);
            if !deliver(&sender, &options, text, &mut chars_read, started_at).await? {
                return Ok(());
            }
        }

        let tail = decoder.finish();
        deliver(&sender, &options, tail, &mut chars_read, started_at).await?;
        Ok::<(), Error>(())
    };

    let outcome = match options.timeout {
        Some(timeout) => {
            let timed = tokio::time::timeout(timeout, work).await;
            timed.unwrap_or_else(|_| {
                let progress = ReaderProgress {
                    chars_read,
                    elapsed: started_at.elapsed(),
                };
                Err(match &options.on_timeout {
                    Some(handler) => handler(&progress),
                    None => Error::Aborted,
                })
            })
        }
        None => work.await,
    };

    if let Err(error) = outcome {
        let _ = sender.send(Err(error)).await;
    }
}

/// Returns false once the receiving side is gone.
async fn deliver(
    sender: &mpsc::Sender<Result<ReaderEvent>>,
    options: &ReaderOptions,
    text: String,
    chars_read: &mut usize,
    started_at: Instant,
) -> Result<bool> {
    if text.is_empty() {
        return Ok(true);
    }
    *chars_read += text.chars().count();
    if let Some(hook) = &options.on_after_read {
        hook(&ReaderProgress {
            chars_read: *chars_read,
            elapsed: started_at.elapsed(),
        })?;
    }
    Ok(sender.send(Ok(ReaderEvent::Chunk(text))).await.is_ok())
}

/// Streaming UTF-8 decoder. Sequences split across chunks are reassembled;
/// invalid bytes become U+FFFD.
#[derive(Default)]
pub(crate) struct Utf8Decoder {
    pending: Vec<u8>,
}

impl Utf8Decoder {
    pub(crate) fn decode(&mut self, chunk: &[u8]) -> String {
        self.pending.extend_from_slice(chunk);
        let mut text = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(valid) => {
                    text.push_str(valid);
                    self.pending.clear();
                    return text;
                }
                Err(error) => {
                    let valid_up_to = error.valid_up_to();
                    text.push_str(&String::from_utf8_lossy(&self.pending[..valid_up_to]));
                    match error.error_len() {
                        Some(invalid_len) => {
                            text.push(char::REPLACEMENT_CHARACTER);
                            self.pending.drain(..valid_up_to + invalid_len);
                        }
                        None => {
                            self.pending.drain(..valid_up_to);
                            return text;
                        }
                    }
                }
            }
        }
    }

    pub(crate) fn finish(&mut self) -> String {
        let text = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        text
    }
}
