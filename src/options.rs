use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;

use crate::Result;
use crate::error::Error;
use crate::log::{RequestLogger, TracingLogger};
use crate::middleware::Middleware;
use crate::response::RestResponse;
use crate::transport::AgentCache;

pub(crate) const DEFAULT_RETRY_DELAY_FIRST: Duration = Duration::from_millis(1000);
pub(crate) const DEFAULT_RETRY_DELAY_FACTOR: f64 = 2.0;
pub(crate) const DEFAULT_RETRY_DELAY_JITTER: f64 = 0.1;
pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4 * 60);
pub(crate) const DEFAULT_KEEP_ALIVE_TIMEOUT: Duration = Duration::from_millis(10_000);
pub(crate) const DEFAULT_MAX_SOCKETS: usize = usize::MAX;

/// Verdict of the `is_success_response` hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SuccessVerdict {
    /// Accept the response regardless of its status.
    Success,
    /// Fail with a response error regardless of its status.
    Throw,
    BestEffort,
}

/// Verdict of the `is_rate_limit_error` hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RateLimitVerdict {
    RateLimit,
    /// Rate limited; retry no sooner than this.
    Delay(Duration),
    /// Treat HTTP 429 as a rate limit, honoring `Retry-After`.
    BestEffort,
    SomethingElse,
}

/// Verdict of the `is_retriable_error` hook.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryVerdict {
    Retry,
    Delay(Duration),
    BestEffort,
    NeverRetry,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AddressFamily {
    V4,
    V6,
    Any,
}

impl AddressFamily {
    pub(crate) fn admits(self, address: std::net::IpAddr) -> bool {
        match self {
            Self::V4 => address.is_ipv4(),
            Self::V6 => address.is_ipv6(),
            Self::Any => true,
        }
    }
}

impl std::fmt::Display for AddressFamily {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::V4 => "ipv4",
            Self::V6 => "ipv6",
            Self::Any => "any",
        };
        formatter.write_str(text)
    }
}

/// Connection pool parameters. Clients sharing the same values share one
/// pooled connection agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KeepAlive {
    pub idle_timeout: Duration,
    pub max_sockets: usize,
}

impl Default for KeepAlive {
    fn default() -> Self {
        Self {
            idle_timeout: DEFAULT_KEEP_ALIVE_TIMEOUT,
            max_sockets: DEFAULT_MAX_SOCKETS,
        }
    }
}

/// Liveness hook consulted before every body read, and the sleep used for
/// backoff and pacing. Both may fail to abort the call in progress.
pub trait Heartbeater: Send + Sync {
    fn heartbeat(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async { Ok(()) })
    }

    fn delay(&self, duration: Duration) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            tokio::time::sleep(duration).await;
            Ok(())
        })
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SleepHeartbeater;

impl Heartbeater for SleepHeartbeater {}

pub type SuccessHook = Arc<dyn Fn(&RestResponse) -> SuccessVerdict + Send + Sync>;
pub type RateLimitHook = Arc<dyn Fn(&RestResponse) -> RateLimitVerdict + Send + Sync>;
pub type TokenInvalidHook = Arc<dyn Fn(&RestResponse) -> bool + Send + Sync>;
pub type RetriableHook =
    Arc<dyn Fn(Option<&RestResponse>, Option<&Error>) -> RetryVerdict + Send + Sync>;

#[derive(Clone)]
pub struct RestOptions {
    retries: usize,
    retry_delay_first: Duration,
    retry_delay_factor: f64,
    retry_delay_jitter: f64,
    retry_delay_max: Duration,
    timeout: Duration,
    allow_internal_ips: bool,
    family: AddressFamily,
    throw_if_res_is_bigger: Option<usize>,
    keep_alive: KeepAlive,
    reject_unauthorized: bool,
    private_data_in_response: bool,
    is_success_response: SuccessHook,
    is_rate_limit_error: RateLimitHook,
    is_token_invalid_error: TokenInvalidHook,
    is_retriable_error: RetriableHook,
    heartbeater: Arc<dyn Heartbeater>,
    logger: Arc<dyn RequestLogger>,
    middlewares: Vec<Arc<dyn Middleware>>,
    agents: Arc<AgentCache>,
}

impl std::fmt::Debug for RestOptions {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("RestOptions")
            .field("retries", &self.retries)
            .field("retry_delay_first", &self.retry_delay_first)
            .field("retry_delay_factor", &self.retry_delay_factor)
            .field("retry_delay_jitter", &self.retry_delay_jitter)
            .field("retry_delay_max", &self.retry_delay_max)
            .field("timeout", &self.timeout)
            .field("allow_internal_ips", &self.allow_internal_ips)
            .field("family", &self.family)
            .field("throw_if_res_is_bigger", &self.throw_if_res_is_bigger)
            .field("keep_alive", &self.keep_alive)
            .field("reject_unauthorized", &self.reject_unauthorized)
            .field("private_data_in_response", &self.private_data_in_response)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

impl Default for RestOptions {
    fn default() -> Self {
        Self {
            retries: 0,
            retry_delay_first: DEFAULT_RETRY_DELAY_FIRST,
            retry_delay_factor: DEFAULT_RETRY_DELAY_FACTOR,
            retry_delay_jitter: DEFAULT_RETRY_DELAY_JITTER,
            retry_delay_max: Duration::MAX,
            timeout: DEFAULT_TIMEOUT,
            allow_internal_ips: false,
            family: AddressFamily::V4,
            throw_if_res_is_bigger: None,
            keep_alive: KeepAlive::default(),
            reject_unauthorized: true,
            private_data_in_response: false,
            is_success_response: Arc::new(|_| SuccessVerdict::BestEffort),
            is_rate_limit_error: Arc::new(|_| RateLimitVerdict::BestEffort),
            is_token_invalid_error: Arc::new(|_| false),
            is_retriable_error: Arc::new(|_, _| RetryVerdict::BestEffort),
            heartbeater: Arc::new(SleepHeartbeater),
            logger: Arc::new(TracingLogger),
            middlewares: Vec::new(),
            agents: Arc::new(AgentCache::default()),
        }
    }
}

impl RestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn retries(mut self, retries: usize) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay_first(mut self, retry_delay_first: Duration) -> Self {
        self.retry_delay_first = retry_delay_first;
        self
    }

    pub fn retry_delay_factor(mut self, retry_delay_factor: f64) -> Self {
        self.retry_delay_factor = if retry_delay_factor.is_finite() {
            retry_delay_factor.max(1.0)
        } else {
            DEFAULT_RETRY_DELAY_FACTOR
        };
        self
    }

    pub fn retry_delay_jitter(mut self, retry_delay_jitter: f64) -> Self {
        self.retry_delay_jitter = if retry_delay_jitter.is_finite() {
            retry_delay_jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        self
    }

    pub fn retry_delay_max(mut self, retry_delay_max: Duration) -> Self {
        self.retry_delay_max = retry_delay_max;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn allow_internal_ips(mut self, allow: bool) -> Self {
        self.allow_internal_ips = allow;
        self
    }

    pub fn family(mut self, family: AddressFamily) -> Self {
        self.family = family;
        self
    }

    /// Fails reads once the decoded body exceeds this many characters.
    pub fn throw_if_res_is_bigger(mut self, max_chars: Option<usize>) -> Self {
        self.throw_if_res_is_bigger = max_chars;
        self
    }

    pub fn keep_alive(mut self, keep_alive: KeepAlive) -> Self {
        self.keep_alive = KeepAlive {
            idle_timeout: keep_alive.idle_timeout.max(Duration::from_millis(1)),
            max_sockets: keep_alive.max_sockets,
        };
        self
    }

    pub fn reject_unauthorized(mut self, reject: bool) -> Self {
        self.reject_unauthorized = reject;
        self
    }

    pub fn private_data_in_response(mut self, private: bool) -> Self {
        self.private_data_in_response = private;
        self
    }

    pub fn is_success_response<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RestResponse) -> SuccessVerdict + Send + Sync + 'static,
    {
        self.is_success_response = Arc::new(hook);
        self
    }

    pub fn is_rate_limit_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RestResponse) -> RateLimitVerdict + Send + Sync + 'static,
    {
        self.is_rate_limit_error = Arc::new(hook);
        self
    }

    pub fn is_token_invalid_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(&RestResponse) -> bool + Send + Sync + 'static,
    {
        self.is_token_invalid_error = Arc::new(hook);
        self
    }

    pub fn is_retriable_error<F>(mut self, hook: F) -> Self
    where
        F: Fn(Option<&RestResponse>, Option<&Error>) -> RetryVerdict + Send + Sync + 'static,
    {
        self.is_retriable_error = Arc::new(hook);
        self
    }

    pub fn heartbeater(mut self, heartbeater: Arc<dyn Heartbeater>) -> Self {
        self.heartbeater = heartbeater;
        self
    }

    pub fn logger(mut self, logger: Arc<dyn RequestLogger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn middlewares(mut self, middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        self.middlewares = middlewares;
        self
    }

    pub fn get_retries(&self) -> usize {
        self.retries
    }

    pub fn get_retry_delay_first(&self) -> Duration {
        self.retry_delay_first
    }

    pub fn get_retry_delay_factor(&self) -> f64 {
        self.retry_delay_factor
    }

    pub fn get_retry_delay_jitter(&self) -> f64 {
        self.retry_delay_jitter
    }

    pub fn get_retry_delay_max(&self) -> Duration {
        self.retry_delay_max
    }

    pub fn get_timeout(&self) -> Duration {
        self.timeout
    }

    pub fn get_allow_internal_ips(&self) -> bool {
        self.allow_internal_ips
    }

    pub fn get_family(&self) -> AddressFamily {
        self.family
    }

    pub fn get_throw_if_res_is_bigger(&self) -> Option<usize> {
        self.throw_if_res_is_bigger
    }

    pub fn get_keep_alive(&self) -> KeepAlive {
        self.keep_alive
    }

    pub fn get_reject_unauthorized(&self) -> bool {
        self.reject_unauthorized
    }

    pub fn get_private_data_in_response(&self) -> bool {
        self.private_data_in_response
    }

    pub fn get_middlewares(&self) -> &[Arc<dyn Middleware>] {
        &self.middlewares
    }

    pub(crate) fn success_verdict(&self, response: &RestResponse) -> SuccessVerdict {
        (self.is_success_response)(response)
    }

    pub(crate) fn rate_limit_verdict(&self, response: &RestResponse) -> RateLimitVerdict {
        (self.is_rate_limit_error)(response)
    }

    pub(crate) fn token_invalid(&self, response: &RestResponse) -> bool {
        (self.is_token_invalid_error)(response)
    }

    pub(crate) fn retry_verdict(
        &self,
        response: Option<&RestResponse>,
        error: Option<&Error>,
    ) -> RetryVerdict {
        (self.is_retriable_error)(response, error)
    }

    pub(crate) fn heartbeater_ref(&self) -> &Arc<dyn Heartbeater> {
        &self.heartbeater
    }

    pub(crate) fn logger_ref(&self) -> &dyn RequestLogger {
        self.logger.as_ref()
    }

    pub(crate) fn agents(&self) -> &AgentCache {
        &self.agents
    }

    pub(crate) fn push_middleware(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.push(middleware);
    }

    pub(crate) fn insert_middleware_first(&mut self, middleware: Arc<dyn Middleware>) {
        self.middlewares.insert(0, middleware);
    }
}
