//! Authorization middlewares built on the token-refresh protocol.
//!
//! A [`TokenGetter`] is asked for token data before the request. When the
//! response is classified as [`Error::TokenInvalid`] and the getter supports
//! refreshing, it is asked again with that error and the request is replayed
//! once through the rest of the chain.

use std::future::Future;
use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures_util::future::BoxFuture;
use http::header::AUTHORIZATION;

use crate::Result;
use crate::error::Error;
use crate::middleware::{Middleware, Next};
use crate::request::RestRequest;
use crate::response::RestResponse;
use crate::util::parse_header_value;

pub(crate) const STILL_FAILED_PREFIX: &str = "(still failed, even with updated token) ";

pub trait TokenGetter<T>: Send + Sync {
    /// Returns token data. `previous_error` is set on the refresh call that
    /// follows a token-invalid response.
    fn token<'a>(&'a self, previous_error: Option<&'a Error>) -> BoxFuture<'a, Result<T>>;

    /// Whether a token-invalid response should trigger a second call and a
    /// replay of the request.
    fn supports_refresh(&self) -> bool;
}

/// A fixed token. Never refreshed.
#[derive(Clone, Debug)]
pub struct StaticToken<T>(pub T);

impl<T> TokenGetter<T> for StaticToken<T>
where
    T: Clone + Send + Sync,
{
    fn token<'a>(&'a self, _previous_error: Option<&'a Error>) -> BoxFuture<'a, Result<T>> {
        let token = self.0.clone();
        Box::pin(async move { Ok(token) })
    }

    fn supports_refresh(&self) -> bool {
        false
    }
}

/// Token data produced by an async closure.
pub struct TokenSource<F> {
    getter: F,
    refresh: bool,
}

impl<F> TokenSource<F> {
    /// The closure is called again with the error after a token-invalid
    /// response, and the request is replayed with the new token.
    pub fn refreshing(getter: F) -> Self {
        Self {
            getter,
            refresh: true,
        }
    }

    /// The closure is called once per request; token-invalid responses are
    /// surfaced as-is.
    pub fn once(getter: F) -> Self {
        Self {
            getter,
            refresh: false,
        }
    }
}

impl<T, F, Fut> TokenGetter<T> for TokenSource<F>
where
    F: Fn(Option<&Error>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T>> + Send + 'static,
{
    fn token<'a>(&'a self, previous_error: Option<&'a Error>) -> BoxFuture<'a, Result<T>> {
        Box::pin((self.getter)(previous_error))
    }

    fn supports_refresh(&self) -> bool {
        self.refresh
    }
}

/// Calls `getter` and runs `body` with the token; on a token-invalid error,
/// refreshes once and runs `body` again. A second token-invalid error gets a
/// `(still failed, even with updated token)` prefix.
pub async fn token_retry_strategy<T, G, B, Fut>(getter: &G, body: B) -> Result<RestResponse>
where
    G: TokenGetter<T> + ?Sized,
    B: Fn(T) -> Fut,
    Fut: Future<Output = Result<RestResponse>>,
{
    let token = getter.token(None).await?;
    let error = match body(token).await {
        Ok(response) => return Ok(response),
        Err(error) => error,
    };
    if !error.is_token_invalid() || !getter.supports_refresh() {
        return Err(error);
    }

    let token = getter.token(Some(&error)).await?;
    match body(token).await {
        Ok(response) => Ok(response),
        Err(mut retry_error) => {
            if retry_error.is_token_invalid() {
                retry_error.prefix_message(STILL_FAILED_PREFIX);
            }
            Err(retry_error)
        }
    }
}

/// Sets `Authorization: <prefix><token>`.
pub struct BearerAuth {
    prefix: String,
    getter: Arc<dyn TokenGetter<String>>,
}

impl BearerAuth {
    pub fn new(getter: Arc<dyn TokenGetter<String>>) -> Self {
        Self::with_prefix("Bearer ", getter)
    }

    pub fn with_prefix(prefix: impl Into<String>, getter: Arc<dyn TokenGetter<String>>) -> Self {
        Self {
            prefix: prefix.into(),
            getter,
        }
    }
}

impl Middleware for BearerAuth {
    fn handle<'a>(
        &'a self,
        request: RestRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<RestResponse>> {
        Box::pin(async move {
            let request = &request;
            token_retry_strategy(self.getter.as_ref(), |token: String| async move {
                let value =
                    parse_header_value(AUTHORIZATION.as_str(), &format!("{}{token}", self.prefix))?;
                next.run(request.with_header_value(AUTHORIZATION, value)).await
            })
            .await
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BasicCredentials {
    pub name: String,
    pub password: String,
}

impl BasicCredentials {
    pub fn new(name: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            password: password.into(),
        }
    }

    pub(crate) fn header_value(&self) -> String {
        let encoded = STANDARD.encode(format!("{}:{}", self.name, self.password));
        format!("Basic {encoded}")
    }
}

/// Sets `Authorization: Basic <base64(name:password)>`.
pub struct BasicAuth {
    getter: Arc<dyn TokenGetter<BasicCredentials>>,
}

impl BasicAuth {
    pub fn new(getter: Arc<dyn TokenGetter<BasicCredentials>>) -> Self {
        Self { getter }
    }
}

impl Middleware for BasicAuth {
    fn handle<'a>(
        &'a self,
        request: RestRequest,
        next: Next<'a>,
    ) -> BoxFuture<'a, Result<RestResponse>> {
        Box::pin(async move {
            let request = &request;
            token_retry_strategy(
                self.getter.as_ref(),
                |credentials: BasicCredentials| async move {
                    let value =
                        parse_header_value(AUTHORIZATION.as_str(), &credentials.header_value())?;
                    next.run(request.with_header_value(AUTHORIZATION, value)).await
                },
            )
            .await
        })
    }
}
