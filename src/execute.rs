use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use futures_util::future::BoxFuture;
use tracing::{Instrument, debug, info_span, warn};

use crate::Result;
use crate::classify::{RetrySchedule, classify, next_delay};
use crate::error::Error;
use crate::log::{LogEvent, LogResponse};
use crate::middleware::{Endpoint, Next};
use crate::options::RestOptions;
use crate::reader::{ReaderOptions, StreamingReader};
use crate::request::RestRequest;
use crate::response::RestResponse;
use crate::transport;
use crate::util::{lock_unpoisoned, redact_uri_for_logs};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ReadMode {
    Full,
    Stream { preload_chars: usize },
}

pub(crate) struct Delivered {
    pub(crate) response: RestResponse,
    pub(crate) reader: Option<StreamingReader>,
}

/// Runs one logical call: the middleware chain and transport per attempt,
/// with classification, logging and backoff between attempts.
pub(crate) async fn send(request: RestRequest, mode: ReadMode) -> Result<Delivered> {
    let options = Arc::clone(request.shared_options());
    let schedule = RetrySchedule::new(&options);
    let max_attempts = options.get_retries().saturating_add(1);
    let redacted_uri = redact_uri_for_logs(request.url());
    let mut attempt = 0_usize;

    loop {
        let attempt_started_at = Instant::now();
        let endpoint = TransportEndpoint::new(mode);
        let span = info_span!(
            "restline.request",
            method = %request.method(),
            uri = %redacted_uri,
            attempt
        );
        let outcome = Next::new(options.get_middlewares(), &endpoint)
            .run(request.clone())
            .instrument(span)
            .await;
        let elapsed = attempt_started_at.elapsed();

        let error = match outcome {
            Ok(response) => {
                debug!(
                    attempt,
                    status = response.status().as_u16(),
                    elapsed_ms = elapsed.as_millis(),
                    "restline attempt succeeded"
                );
                log_attempt(&options, attempt, &request, Ok(&response), elapsed, true);
                return Ok(Delivered {
                    response,
                    reader: endpoint.take_reader(),
                });
            }
            Err(error) => error,
        };

        let scheduled = schedule.delay_for(attempt);
        let delay = next_delay(&error, &options, error.response(), scheduled);
        let is_final_attempt = delay.is_none() || attempt + 1 >= max_attempts;
        log_attempt(
            &options,
            attempt,
            &request,
            Err(&error),
            elapsed,
            is_final_attempt,
        );
        let Some(delay) = delay.filter(|_| !is_final_attempt) else {
            return Err(error);
        };

        warn!(
            attempt,
            max_attempts,
            delay_ms = delay.as_millis(),
            error_code = error.code().as_str(),
            uri = %redacted_uri,
            "restline retry scheduled"
        );
        options.logger_ref().log(&LogEvent {
            attempt,
            request: error.response().map_or(&request, RestResponse::request),
            response: LogResponse::BackoffDelay,
            error: Some(&error),
            timestamp: SystemTime::now(),
            elapsed: delay,
            is_final_attempt: false,
            private_data_in_response: options.get_private_data_in_response(),
            comment: "",
        });
        options.heartbeater_ref().delay(delay).await?;
        attempt += 1;
    }
}

fn log_attempt(
    options: &RestOptions,
    attempt: usize,
    request: &RestRequest,
    outcome: std::result::Result<&RestResponse, &Error>,
    elapsed: Duration,
    is_final_attempt: bool,
) {
    let (response, error) = match outcome {
        Ok(response) => (Some(response), None),
        Err(error) => (error.response(), Some(error)),
    };
    options.logger_ref().log(&LogEvent {
        attempt,
        request: response.map_or(request, RestResponse::request),
        response: response.map_or(LogResponse::None, LogResponse::Response),
        error,
        timestamp: SystemTime::now(),
        elapsed,
        is_final_attempt,
        private_data_in_response: options.get_private_data_in_response(),
        comment: "",
    });
}

/// Innermost chain step for one attempt. In stream mode the open reader is
/// parked here so `send` can hand it to the caller.
struct TransportEndpoint {
    mode: ReadMode,
    reader: Mutex<Option<StreamingReader>>,
}

impl TransportEndpoint {
    fn new(mode: ReadMode) -> Self {
        Self {
            mode,
            reader: Mutex::new(None),
        }
    }

    fn take_reader(&self) -> Option<StreamingReader> {
        lock_unpoisoned(&self.reader).take()
    }

    async fn attempt(&self, request: RestRequest) -> Result<RestResponse> {
        let options = Arc::clone(request.shared_options());
        let fetch = transport::prepare(&request)?;
        let mut reader = StreamingReader::new(fetch, reader_options(&request));

        let preload_chars = match self.mode {
            ReadMode::Full => usize::MAX,
            ReadMode::Stream { preload_chars } => preload_chars,
        };
        reader.preload(preload_chars).await?;

        let status = reader.status().ok_or(Error::Aborted)?;
        let response = RestResponse::new(
            request,
            status,
            reader.headers().clone(),
            reader.take_text_fetched(),
            reader.text_is_partial(),
        );
        if let Some(error) = classify(&options, &response) {
            return Err(error);
        }

        if matches!(self.mode, ReadMode::Stream { .. }) {
            // A newer attempt through the same endpoint supersedes the old reader.
            if let Some(mut previous) = lock_unpoisoned(&self.reader).replace(reader) {
                previous.close();
            }
        }
        Ok(response)
    }
}

impl Endpoint for TransportEndpoint {
    fn call(&self, request: RestRequest) -> BoxFuture<'_, Result<RestResponse>> {
        Box::pin(self.attempt(request))
    }
}

fn reader_options(request: &RestRequest) -> ReaderOptions {
    let options = request.options();
    let timeout = options.get_timeout();
    let method = request.method().clone();
    let uri = redact_uri_for_logs(request.url());

    let mut reader_options = ReaderOptions::new()
        .timeout(timeout)
        .heartbeater(Arc::clone(options.heartbeater_ref()))
        .on_timeout({
            let method = method.clone();
            let uri = uri.clone();
            move |progress| Error::Timeout {
                timeout_ms: timeout.as_millis(),
                chars_read: progress.chars_read,
                method: method.clone(),
                uri: uri.clone(),
            }
        });

    if let Some(limit) = options.get_throw_if_res_is_bigger() {
        reader_options = reader_options.on_after_read(move |progress| {
            if progress.chars_read > limit {
                return Err(Error::ContentSizeOverLimit {
                    limit,
                    actual: progress.chars_read,
                    method: method.clone(),
                    uri: uri.clone(),
                });
            }
            Ok(())
        });
    }
    reader_options
}
