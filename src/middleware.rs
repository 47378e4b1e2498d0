use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::Result;
use crate::request::RestRequest;
use crate::response::RestResponse;

/// A request interceptor. Implementations may rewrite the request, call
/// `next.run` any number of times, and inspect or replace the outcome.
///
/// ```no_run
/// use futures_util::future::BoxFuture;
/// use restline::prelude::{Middleware, Next, RestRequest, RestResponse};
///
/// struct TraceId;
///
/// impl Middleware for TraceId {
///     fn handle<'a>(
///         &'a self,
///         request: RestRequest,
///         next: Next<'a>,
///     ) -> BoxFuture<'a, restline::Result<RestResponse>> {
///         Box::pin(async move {
///             let request = request.with_header("x-trace-id", "abc123")?;
///             next.run(request).await
///         })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync {
    fn handle<'a>(
        &'a self,
        request: RestRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<RestResponse>>;
}

/// Where `RestClient::with_middleware` inserts a middleware.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Placement {
    /// Innermost so far: runs after every existing middleware.
    #[default]
    Append,
    /// Outermost: runs before every existing middleware.
    Prepend,
}

/// The innermost step of the chain: one transport attempt.
pub(crate) trait Endpoint: Send + Sync {
    fn call(&self, request: RestRequest) -> BoxFuture<'_, Result<RestResponse>>;
}

/// Continuation handed to a middleware: the rest of the chain followed by the
/// transport.
#[derive(Clone, Copy)]
pub struct Next<'a> {
    middlewares: &'a [Arc<dyn Middleware>],
    endpoint: &'a dyn Endpoint,
}

impl<'a> Next<'a> {
    pub(crate) fn new(middlewares: &'a [Arc<dyn Middleware>], endpoint: &'a dyn Endpoint) -> Self {
        Self {
            middlewares,
            endpoint,
        }
    }

    pub fn run(self, request: RestRequest) -> BoxFuture<'a, Result<RestResponse>> {
        match self.middlewares.split_first() {
            Some((middleware, rest)) => middleware.handle(
                request,
                Next {
                    middlewares: rest,
                    endpoint: self.endpoint,
                },
            ),
            None => self.endpoint.call(request),
        }
    }
}

impl std::fmt::Debug for Next<'_> {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Next")
            .field("remaining_middlewares", &self.middlewares.len())
            .finish()
    }
}
