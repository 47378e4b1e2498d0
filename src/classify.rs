//! Response classification and retry delay computation.
//!
//! Both entry points are pure: they consult the option hooks and never touch
//! the network, which keeps the retry state machine in `execute` small.

use std::time::{Duration, SystemTime};

use http::StatusCode;
use rand::RngExt;

use crate::error::{Error, ResponseError};
use crate::options::{RateLimitVerdict, RestOptions, RetryVerdict, SuccessVerdict};
use crate::response::RestResponse;
use crate::util::parse_retry_after;

/// Returns the error a response should fail with, or `None` when it is a
/// success. Checks run in a fixed order and the first match wins.
pub fn classify(options: &RestOptions, response: &RestResponse) -> Option<Error> {
    let success = options.success_verdict(response);
    if success == SuccessVerdict::Success {
        return None;
    }

    let rate_limit_delay = match options.rate_limit_verdict(response) {
        RateLimitVerdict::RateLimit => Some(Duration::ZERO),
        RateLimitVerdict::Delay(delay) => Some(delay),
        RateLimitVerdict::BestEffort if response.status() == StatusCode::TOO_MANY_REQUESTS => {
            Some(parse_retry_after(response.headers(), SystemTime::now()).unwrap_or_default())
        }
        RateLimitVerdict::BestEffort | RateLimitVerdict::SomethingElse => None,
    };
    if let Some(delay) = rate_limit_delay {
        return Some(Error::RateLimit {
            delay,
            error: Box::new(ResponseError::new(
                format!("rate limited, retry in {}ms", delay.as_millis()),
                response.clone(),
            )),
        });
    }

    if options.token_invalid(response) {
        return Some(Error::TokenInvalid {
            error: Box::new(ResponseError::new("token invalid", response.clone())),
        });
    }

    let retriable_delay = match options.retry_verdict(Some(response), None) {
        RetryVerdict::Retry => Some(Duration::ZERO),
        RetryVerdict::Delay(delay) => Some(delay),
        RetryVerdict::BestEffort | RetryVerdict::NeverRetry => None,
    };
    if let Some(delay) = retriable_delay {
        return Some(Error::Retriable {
            delay,
            error: Box::new(ResponseError::new("retriable", response.clone())),
        });
    }

    if success == SuccessVerdict::Throw || response.status().as_u16() >= 300 {
        return Some(Error::Response {
            error: Box::new(ResponseError::new("", response.clone())),
        });
    }

    None
}

/// Decides whether to retry after `error` and how long to wait first.
/// `scheduled` is the backoff the schedule would apply; `None` means give up.
pub fn next_delay(
    error: &Error,
    options: &RestOptions,
    response: Option<&RestResponse>,
    scheduled: Duration,
) -> Option<Duration> {
    if let Error::RateLimit { delay, .. } | Error::Retriable { delay, .. } = error {
        return Some(scheduled.max(*delay).min(options.get_retry_delay_max()));
    }

    match options.retry_verdict(response, Some(error)) {
        RetryVerdict::Retry | RetryVerdict::Delay(_) => Some(scheduled),
        RetryVerdict::NeverRetry => None,
        RetryVerdict::BestEffort => {
            if error.is_token_invalid() {
                return None;
            }
            if let Some(response) = response
                && response.status().is_client_error()
            {
                return None;
            }
            match error {
                Error::ContentSizeOverLimit { .. } => None,
                Error::Timeout { .. } => Some(scheduled),
                _ if response.is_none() && error.response().is_none() => None,
                _ => Some(scheduled),
            }
        }
    }
}

/// Exponential backoff: `first * factor^n`, jittered both ways by the
/// jitter fraction and capped at the configured maximum.
#[derive(Clone, Debug)]
pub(crate) struct RetrySchedule {
    first: Duration,
    factor: f64,
    jitter: f64,
    max: Duration,
}

impl RetrySchedule {
    pub(crate) fn new(options: &RestOptions) -> Self {
        Self {
            first: options.get_retry_delay_first(),
            factor: options.get_retry_delay_factor(),
            jitter: options.get_retry_delay_jitter(),
            max: options.get_retry_delay_max(),
        }
    }

    pub(crate) fn delay_for(&self, retry_index: usize) -> Duration {
        let exponent = retry_index.min(63) as i32;
        let base_ms = self.first.as_millis() as f64 * self.factor.powi(exponent);
        let jittered_ms = base_ms * self.jitter_multiplier();
        let max_ms = self.max.as_millis().min(u64::MAX as u128) as f64;
        let delay_ms = jittered_ms.clamp(0.0, max_ms);
        if delay_ms >= u64::MAX as f64 {
            return self.max;
        }
        Duration::from_millis(delay_ms.round() as u64).min(self.max)
    }

    fn jitter_multiplier(&self) -> f64 {
        if self.jitter <= f64::EPSILON {
            return 1.0;
        }
        let mut rng = rand::rng();
        rng.random_range((1.0 - self.jitter)..=(1.0 + self.jitter))
    }
}
