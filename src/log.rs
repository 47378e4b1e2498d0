use std::time::{Duration, SystemTime};

use tracing::{debug, warn};

use crate::error::Error;
use crate::request::RestRequest;
use crate::response::RestResponse;
use crate::util::redact_uri_for_logs;

/// What an attempt produced, from the logger's point of view.
#[derive(Clone, Copy, Debug)]
pub enum LogResponse<'a> {
    Response(&'a RestResponse),
    /// A backoff or pacing sleep is about to happen.
    BackoffDelay,
    None,
}

#[derive(Clone, Copy, Debug)]
pub struct LogEvent<'a> {
    pub attempt: usize,
    pub request: &'a RestRequest,
    pub response: LogResponse<'a>,
    pub error: Option<&'a Error>,
    pub timestamp: SystemTime,
    pub elapsed: Duration,
    pub is_final_attempt: bool,
    pub private_data_in_response: bool,
    pub comment: &'a str,
}

impl LogEvent<'_> {
    pub fn status(&self) -> Option<u16> {
        match self.response {
            LogResponse::Response(response) => Some(response.status().as_u16()),
            _ => self.error.and_then(Error::status).map(|status| status.as_u16()),
        }
    }

    pub fn is_backoff_delay(&self) -> bool {
        matches!(self.response, LogResponse::BackoffDelay)
    }
}

pub trait RequestLogger: Send + Sync {
    fn log(&self, event: &LogEvent<'_>);
}

/// Forwards every event to `tracing`; successes at debug level, errors and
/// delays at warn level.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingLogger;

impl RequestLogger for TracingLogger {
    fn log(&self, event: &LogEvent<'_>) {
        let uri = redact_uri_for_logs(event.request.url());
        let method = event.request.method();
        let elapsed_ms = event.elapsed.as_millis();
        let shape = event.request.shape();

        if event.is_backoff_delay() {
            warn!(
                attempt = event.attempt,
                %method,
                uri = %uri,
                shape,
                delay_ms = elapsed_ms,
                comment = event.comment,
                "restline backoff delay"
            );
            return;
        }

        match event.error {
            None => debug!(
                attempt = event.attempt,
                %method,
                uri = %uri,
                shape,
                status = event.status(),
                elapsed_ms,
                "restline request completed"
            ),
            Some(error) => warn!(
                attempt = event.attempt,
                %method,
                uri = %uri,
                shape,
                status = event.status(),
                elapsed_ms,
                is_final_attempt = event.is_final_attempt,
                error_code = error.code().as_str(),
                error = %error,
                "restline request failed"
            ),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLogger;

impl RequestLogger for NoopLogger {
    fn log(&self, _event: &LogEvent<'_>) {}
}
