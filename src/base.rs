use std::future::Future;
use std::sync::{Arc, Mutex};

use futures_util::future::BoxFuture;

use crate::Result;
use crate::middleware::{Middleware, Next};
use crate::request::RestRequest;
use crate::response::RestResponse;
use crate::util::{is_absolute_url, join_url, lock_unpoisoned};

type BaseResolver = Arc<dyn Fn() -> BoxFuture<'static, Result<String>> + Send + Sync>;

/// Base URL prepended to relative request paths.
#[derive(Clone)]
pub enum BaseUrl {
    Static(String),
    /// Resolved lazily on the first relative request, then cached. The
    /// resolver may send requests through the client it is attached to.
    Resolver(BaseResolver),
}

impl BaseUrl {
    pub fn resolver<F, Fut>(resolve: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String>> + Send + 'static,
    {
        Self::Resolver(Arc::new(move || Box::pin(resolve())))
    }
}

impl From<&str> for BaseUrl {
    fn from(base: &str) -> Self {
        Self::Static(base.to_owned())
    }
}

impl From<String> for BaseUrl {
    fn from(base: String) -> Self {
        Self::Static(base)
    }
}

impl std::fmt::Debug for BaseUrl {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Static(base) => formatter.debug_tuple("Static").field(base).finish(),
            Self::Resolver(_) => formatter.write_str("Resolver"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum BaseState {
    Unresolved,
    /// A resolver call is in flight; requests issued meanwhile skip rewriting.
    Resolving,
    Resolved(String),
}

enum BaseStep {
    Join(String),
    Bypass,
    Resolve,
}

pub(crate) struct BaseUrlMiddleware {
    base: BaseUrl,
    state: Mutex<BaseState>,
}

impl BaseUrlMiddleware {
    pub(crate) fn new(base: BaseUrl) -> Self {
        Self {
            base,
            state: Mutex::new(BaseState::Unresolved),
        }
    }

    async fn base_for_request(&self) -> Result<Option<String>> {
        let resolve = match &self.base {
            BaseUrl::Static(base) => return Ok(Some(base.clone())),
            BaseUrl::Resolver(resolve) => resolve,
        };

        let step = {
            let mut state = lock_unpoisoned(&self.state);
            match &*state {
                BaseState::Resolved(base) => BaseStep::Join(base.clone()),
                BaseState::Resolving => BaseStep::Bypass,
                BaseState::Unresolved => {
                    *state = BaseState::Resolving;
                    BaseStep::Resolve
                }
            }
        };

        match step {
            BaseStep::Join(base) => Ok(Some(base)),
            BaseStep::Bypass => Ok(None),
            BaseStep::Resolve => {
                let guard = ResolvingGuard { state: &self.state };
                let base = resolve().await?;
                guard.finish(base.clone());
                Ok(Some(base))
            }
        }
    }
}

/// Puts the state back to `Unresolved` unless resolution completed, so a
/// failed or cancelled resolver is tried again by the next request.
struct ResolvingGuard<'a> {
    state: &'a Mutex<BaseState>,
}

impl ResolvingGuard<'_> {
    fn finish(self, base: String) {
        *lock_unpoisoned(self.state) = BaseState::Resolved(base);
        std::mem::forget(self);
    }
}

impl Drop for ResolvingGuard<'_> {
    fn drop(&mut self) {
        *lock_unpoisoned(self.state) = BaseState::Unresolved;
    }
}

impl Middleware for BaseUrlMiddleware {
    fn handle<'a>(
        &'a self,
        request: RestRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<RestResponse>> {
        Box::pin(async move {
            if is_absolute_url(request.url()) {
                return next.run(request).await;
            }
            let Some(base) = self.base_for_request().await? else {
                return next.run(request).await;
            };
            let url = join_url(&base, request.url())?;
            next.run(request.with_url(url)).await
        })
    }
}
