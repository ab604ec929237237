//! A client for the authentication service
//!
//! The service wraps every response in an [`ApiResponse`](dto::ApiResponse) envelope.
//! The operations here unwrap that envelope and normalize the two error shapes the
//! service may return into an [`AuthError`] carrying a human-readable message.

use std::error;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::{RefreshError, RefreshTokenRef, TokenPair, TokenRefresher};

pub mod dto;

/// The base URL used when none is configured
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080";

/// Paths of the service's endpoints
pub mod endpoints {
    /// Sign in with email and password
    pub const LOGIN: &str = "/auth/login";
    /// Register a new user
    pub const REGISTER: &str = "/auth/register";
    /// Exchange a refresh token for a new token pair
    pub const REFRESH: &str = "/auth/refresh";
    /// The signed in user
    pub const CURRENT_USER: &str = "/users/me";

    /// Endpoints that authenticate by their request body rather than an access token
    pub const AUTH: [&str; 3] = [LOGIN, REGISTER, REFRESH];
}

/// An error from the authentication service
#[derive(Debug, Error)]
pub enum AuthError {
    /// The service responded, but reported a failure
    #[error("{message}")]
    Rejected {
        /// The HTTP status of the response
        status: StatusCode,
        /// The message reported by the service
        message: String,
    },
    /// The service could not be reached or responded without a recognizable body
    #[error("{message}")]
    Transport {
        /// A description of the failure
        message: String,
        /// The underlying error
        source: Box<dyn error::Error + Send + Sync + 'static>,
    },
    /// A successful response carried a payload of the wrong shape
    #[error("error deserializing response body")]
    Decode(#[from] serde_json::Error),
    /// The session has ended and could not be renewed
    #[error(transparent)]
    Session(#[from] RefreshError),
}

impl AuthError {
    /// Wraps an error that occurred while talking to the service
    pub fn transport(error: impl error::Error + Send + Sync + 'static) -> Self {
        Self::Transport {
            message: error.to_string(),
            source: Box::new(error),
        }
    }
}

/// Joins an endpoint path onto the service's base URL
///
/// Any path on the base URL is kept as a prefix.
pub fn endpoint_url(base_url: &Url, path: &str) -> Url {
    let mut url = base_url.clone();
    let joined = format!("{}{}", base_url.path().trim_end_matches('/'), path);
    url.set_path(&joined);
    url
}

/// Reads an enveloped response, yielding its payload
///
/// `fallback` is the message reported if the service declares a failure without
/// saying why, or if a successful response is not an envelope at all. A payload
/// that does not match `T` is a [`AuthError::Decode`].
pub async fn read_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
    fallback: &str,
) -> Result<T, AuthError> {
    let status = response.status();

    if let Err(error) = response.error_for_status_ref() {
        let body = response.bytes().await.map_err(AuthError::transport)?;
        return Err(match dto::error_message(&body) {
            Some(message) => AuthError::Rejected { status, message },
            None => AuthError::transport(error),
        });
    }

    let body = response.bytes().await.map_err(AuthError::transport)?;
    let envelope: dto::ApiResponse<serde_json::Value> = match serde_json::from_slice(&body) {
        Ok(envelope) => envelope,
        Err(error) => {
            tracing::debug!(
                error = (&error as &dyn error::Error),
                "successful response carried no envelope"
            );
            return Err(AuthError::Rejected {
                status,
                message: fallback.to_owned(),
            });
        }
    };

    let data = envelope
        .into_result(fallback)
        .map_err(|message| AuthError::Rejected { status, message })?;

    Ok(serde_json::from_value(data)?)
}

/// A client for the sign in, registration, and refresh operations
///
/// None of these operations carry an access token, and a rejection from any of
/// them never triggers a token refresh.
#[derive(Clone, Debug)]
pub struct AuthApi {
    client: reqwest::Client,
    base_url: Url,
}

impl AuthApi {
    /// Constructs a new client for the service at `base_url`
    pub fn new(client: reqwest::Client, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// The service's base URL
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Signs in with an email and password
    #[tracing::instrument(err, skip(self, credentials), fields(email = %credentials.email))]
    pub async fn login(
        &self,
        credentials: &dto::LoginRequest,
    ) -> Result<dto::LoginResponse, AuthError> {
        self.post(endpoints::LOGIN, credentials, "Login failed")
            .await
    }

    /// Registers a new user
    ///
    /// Registration does not sign the user in; the caller decides whether to sign in
    /// with the returned tokens or to send the user to a login step.
    #[tracing::instrument(err, skip(self, user), fields(email = %user.email))]
    pub async fn register(
        &self,
        user: &dto::RegisterRequest,
    ) -> Result<dto::LoginResponse, AuthError> {
        self.post(endpoints::REGISTER, user, "Registration failed")
            .await
    }

    /// Exchanges a refresh token for a new token pair
    #[tracing::instrument(err, skip_all)]
    pub async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<dto::RefreshTokenResponse, AuthError> {
        self.post(
            endpoints::REFRESH,
            &dto::RefreshTokenRequest { refresh_token },
            "Token refresh failed",
        )
        .await
    }

    async fn post<B, T>(&self, path: &str, body: &B, fallback: &str) -> Result<T, AuthError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = endpoint_url(&self.base_url, path);
        tracing::trace!(%url, "sending request to authentication service");

        let resp = self
            .client
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(AuthError::transport)?;

        tracing::debug!(
            response.status = resp.status().as_u16(),
            "received response from authentication service"
        );

        read_envelope(resp, fallback).await
    }
}

#[async_trait]
impl TokenRefresher for AuthApi {
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<TokenPair, Box<dyn error::Error + Send + Sync + 'static>> {
        Ok(AuthApi::refresh(self, refresh_token).await?.into())
    }
}
