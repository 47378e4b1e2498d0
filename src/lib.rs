//! `restline` is a resilient HTTP request engine for typed REST API clients.
//!
//! Requests flow through a chain of middlewares (auth, base URL, pacing,
//! your own) into a transport that reads the body incrementally under a
//! wall-clock timeout. Failed attempts are classified into typed errors and
//! retried with jittered exponential backoff.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use restline::prelude::{RestClient, RestOptions, StaticToken};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = RestClient::new(
//!         RestOptions::new()
//!             .retries(3)
//!             .retry_delay_first(Duration::from_millis(200))
//!             .timeout(Duration::from_secs(10)),
//!     )
//!     .with_base("https://api.example.com/v1/")
//!     .with_bearer(StaticToken("secret".to_owned()));
//!
//!     let item: Item = client
//!         .get("items/42", &[("expand", "owner")])?
//!         .json()
//!         .await?;
//!
//!     println!("item id={}", item.id);
//!     Ok(())
//! }
//! ```
//!
//! # Defaults
//!
//! - No retries; the first backoff delay is 1s, doubling with 10% jitter.
//! - A 4 minute timeout covers the whole fetch and body read.
//! - Hosts resolving to loopback, private or other internal ranges are
//!   refused unless `allow_internal_ips(true)` is set.

mod auth;
mod base;
mod body;
mod classify;
mod client;
mod error;
mod execute;
mod log;
mod middleware;
mod options;
mod pacer;
mod reader;
mod request;
mod resolve;
mod response;
mod transport;
mod upload;
mod util;

pub use crate::auth::{
    BasicAuth, BasicCredentials, BearerAuth, StaticToken, TokenGetter, TokenSource,
    token_retry_strategy,
};
pub use crate::base::BaseUrl;
pub use crate::body::RequestBody;
pub use crate::classify::{classify, next_delay};
pub use crate::client::RestClient;
pub use crate::error::{BoxError, Error, ErrorCode, ResponseError, TransportErrorKind};
pub use crate::log::{LogEvent, LogResponse, NoopLogger, RequestLogger, TracingLogger};
pub use crate::middleware::{Middleware, Next, Placement};
pub use crate::options::{
    AddressFamily, Heartbeater, KeepAlive, RateLimitHook, RateLimitVerdict, RestOptions,
    RetriableHook, RetryVerdict, SleepHeartbeater, SuccessHook, SuccessVerdict, TokenInvalidHook,
};
pub use crate::pacer::{
    CompositePacer, InMemoryPacerBackend, PaceRequests, Pacer, PacerDelay, PacerQps,
    PacerQpsBackend, PacerQpsOptions, PacerSample, WindowStats,
};
pub use crate::reader::{ReaderOptions, ReaderProgress, StreamingReader};
pub use crate::request::RestRequest;
pub use crate::response::{ResponseStream, RestResponse};
pub use crate::upload::RangeUploader;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::{
        BaseUrl, BasicCredentials, Error, ErrorCode, Middleware, Next, PaceRequests, Pacer,
        PacerQps, PacerQpsOptions, Placement, RestClient, RestOptions, RestRequest, RestResponse,
        Result, RetryVerdict, StaticToken, TokenSource,
    };
}

#[cfg(test)]
mod tests;
