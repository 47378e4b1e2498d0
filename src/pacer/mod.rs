//! Self-regulating request pacing.
//!
//! A [`Pacer`] is touched right before a request is sent and answers with
//! the delay to wait first. [`PacerQps`] keeps its own delay and nudges it
//! up or down from the request count a shared [`PacerQpsBackend`] observes
//! in a moving window, so a fleet of workers converges on a target QPS
//! without a coordinator. [`PaceRequests`] plugs a pacer into the
//! middleware chain.

mod backend;
mod composite;
mod qps;

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::future::BoxFuture;

use crate::Result;
use crate::log::{LogEvent, LogResponse};
use crate::middleware::{Middleware, Next};
use crate::request::RestRequest;
use crate::response::RestResponse;

pub use backend::{InMemoryPacerBackend, PacerQpsBackend, PacerSample, WindowStats};
pub use composite::CompositePacer;
pub use qps::{PacerQps, PacerQpsOptions};

const MIN_LOG_DELAY: Duration = Duration::from_millis(10);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacerDelay {
    pub delay: Duration,
    pub reason: String,
}

pub trait Pacer: Send + Sync {
    /// Human readable name, used to label reasons of composed pacers.
    fn name(&self) -> &str;

    /// Signals that a request is about to be sent.
    fn touch(&self) -> BoxFuture<'_, Result<PacerDelay>>;
}

type PacerSelector =
    Arc<dyn Fn(&RestRequest) -> BoxFuture<'static, Result<Option<Arc<dyn Pacer>>>> + Send + Sync>;

#[derive(Clone)]
enum PacerSource {
    Fixed(Arc<dyn Pacer>),
    Select(PacerSelector),
}

/// Middleware that waits for the delay a pacer asks for before passing the
/// request on.
#[derive(Clone)]
pub struct PaceRequests {
    source: PacerSource,
}

impl PaceRequests {
    pub fn new(pacer: Arc<dyn Pacer>) -> Self {
        Self {
            source: PacerSource::Fixed(pacer),
        }
    }

    /// Picks the pacer per request; `None` sends the request unpaced.
    pub fn select<F, Fut>(selector: F) -> Self
    where
        F: Fn(&RestRequest) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Arc<dyn Pacer>>>> + Send + 'static,
    {
        Self {
            source: PacerSource::Select(Arc::new(move |request| Box::pin(selector(request)))),
        }
    }

    async fn pace(&self, request: &RestRequest) -> Result<()> {
        let pacer = match &self.source {
            PacerSource::Fixed(pacer) => Arc::clone(pacer),
            PacerSource::Select(selector) => match selector(request).await? {
                Some(pacer) => pacer,
                None => return Ok(()),
            },
        };

        let PacerDelay { delay, reason } = pacer.touch().await?;
        let options = request.options();
        if !delay.is_zero() {
            options.heartbeater_ref().delay(delay).await?;
        }
        if delay > MIN_LOG_DELAY {
            options.logger_ref().log(&LogEvent {
                attempt: 0,
                request,
                response: LogResponse::BackoffDelay,
                error: None,
                timestamp: SystemTime::now(),
                elapsed: delay,
                is_final_attempt: true,
                private_data_in_response: false,
                comment: &reason,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for PaceRequests {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let source = match &self.source {
            PacerSource::Fixed(pacer) => pacer.name().to_owned(),
            PacerSource::Select(_) => "<selector>".to_owned(),
        };
        formatter
            .debug_struct("PaceRequests")
            .field("pacer", &source)
            .finish()
    }
}

impl Middleware for PaceRequests {
    fn handle<'a>(
        &'a self,
        request: RestRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<RestResponse>> {
        Box::pin(async move {
            self.pace(&request).await?;
            next.run(request).await
        })
    }
}
