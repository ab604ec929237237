use predicates::prelude::*;
use reqwest::{header, Request, Response, StatusCode};
use reqwest_middleware::{Middleware, Next, Result};
use tessera_tokens::{RefreshCoordinator, RefreshError};

use crate::{bearer_header, AttachedToken, AuthEndpoints, NotAuthEndpoint};

/// Marks a request that has already been replayed after a token refresh
///
/// A request carrying this marker in its extensions is never retried again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RetryAttempted;

/// A middleware that renews the session when the service rejects an access token
///
/// On a `401 Unauthorized` response, the request is held while the
/// [`RefreshCoordinator`] exchanges the refresh token for a new token pair, and is
/// then replayed once with the new access token. Concurrent rejections share a
/// single refresh.
///
/// If the refresh fails, the request fails with the [`RefreshError`], which can be
/// recovered with [`reqwest_middleware::Error::Middleware`] and downcasting. If there
/// was no refresh token to exchange, the `401` response is returned as is.
///
/// A request whose `Authorization` header was supplied by the caller rather than
/// attached by the [`AccessTokenMiddleware`](crate::AccessTokenMiddleware) is passed
/// through untouched.
#[derive(Clone, Debug)]
pub struct TokenRefreshMiddleware<P> {
    coordinator: RefreshCoordinator,
    predicate: P,
}

impl TokenRefreshMiddleware<NotAuthEndpoint> {
    /// Construct a new middleware from a session coordinator
    ///
    /// Responses from the authentication endpoints are passed through untouched.
    pub fn new(coordinator: RefreshCoordinator) -> Self {
        Self {
            coordinator,
            predicate: AuthEndpoints::default().not(),
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> TokenRefreshMiddleware<P> {
        TokenRefreshMiddleware {
            coordinator: self.coordinator,
            predicate,
        }
    }
}

#[async_trait::async_trait]
impl<P> Middleware for TokenRefreshMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if !self.predicate.eval(&req) || extensions.get::<RetryAttempted>().is_some() {
            return next.run(req, extensions).await;
        }

        let rejected = extensions.get::<AttachedToken>().map(|t| t.0.clone());
        if rejected.is_none() && req.headers().contains_key(header::AUTHORIZATION) {
            tracing::trace!("request carries its own credentials, not renewing");
            return next.run(req, extensions).await;
        }

        let replay = req.try_clone();

        let response = next.clone().run(req, extensions).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let Some(mut replay) = replay else {
            tracing::warn!("request body cannot be replayed, returning rejection");
            return Ok(response);
        };

        extensions.insert(RetryAttempted);

        tracing::debug!(url = %replay.url(), "access token rejected, recovering session");
        match self.coordinator.recover(rejected.as_deref()).await {
            Ok(token) => {
                if let Some(value) = bearer_header(&token) {
                    replay.headers_mut().insert(header::AUTHORIZATION, value);
                }
                tracing::debug!("replaying request with renewed access token");
                next.run(replay, extensions).await
            }
            Err(RefreshError::NoRefreshToken) => {
                tracing::debug!("no refresh token available, returning rejection");
                Ok(response)
            }
            Err(error) => Err(reqwest_middleware::Error::middleware(error)),
        }
    }
}
