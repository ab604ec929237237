//! DTOs for interacting with the authentication service

use serde::{de::IgnoredAny, Deserialize, Serialize};

use crate::{AccessToken, Password, RefreshToken, RefreshTokenRef, TokenPair};

/// Credentials for signing in
#[derive(Debug, Serialize)]
pub struct LoginRequest {
    /// The user's email address
    pub email: String,

    /// The user's password
    pub password: Password,
}

/// Details of a user to register
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// The user's first name
    pub first_name: String,

    /// The user's last name
    pub last_name: String,

    /// The user's email address
    pub email: String,

    /// The user's chosen password
    pub password: Password,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RefreshTokenRequest<'a> {
    pub refresh_token: &'a RefreshTokenRef,
}

/// A registered user
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// The user's identifier
    pub id: i64,

    /// The user's first name
    pub first_name: String,

    /// The user's last name
    pub last_name: String,

    /// The user's email address
    pub email: String,
}

/// Tokens and user details issued on sign in or registration
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// The access token
    pub access_token: AccessToken,

    /// The refresh token
    pub refresh_token: RefreshToken,

    /// The signed in user
    pub user: User,
}

impl LoginResponse {
    /// The issued token pair
    pub fn token_pair(&self) -> TokenPair {
        TokenPair {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
        }
    }
}

/// Tokens issued by a refresh
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenResponse {
    /// The new access token
    pub access_token: AccessToken,

    /// The new refresh token
    pub refresh_token: RefreshToken,
}

impl From<RefreshTokenResponse> for TokenPair {
    fn from(resp: RefreshTokenResponse) -> Self {
        TokenPair {
            access_token: resp.access_token,
            refresh_token: resp.refresh_token,
        }
    }
}

/// The envelope wrapping every response from the service
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    /// Whether the service reports success
    pub success: bool,

    /// The payload
    pub data: Option<T>,

    /// A human-readable message
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Unwraps the payload
    ///
    /// A declared failure and a success without a payload are both failures. The
    /// error is the service's message, or `fallback` if it did not send one.
    pub fn into_result(self, fallback: &str) -> Result<T, String> {
        match (self.success, self.data) {
            (true, Some(data)) => Ok(data),
            (success, _) => {
                if success {
                    tracing::debug!("success envelope carried no payload");
                }
                Err(self
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| fallback.to_owned()))
            }
        }
    }
}

/// The error body returned by the service for rejected requests
#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    /// When the error occurred
    pub timestamp: Option<String>,

    /// The HTTP status code
    pub status: u16,

    /// The HTTP reason phrase
    pub error: Option<String>,

    /// A machine-readable error code
    pub code: String,

    /// A human-readable message
    pub message: String,

    /// The request path
    pub path: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Error(ErrorResponse),
    Envelope(ApiResponse<IgnoredAny>),
}

/// Extracts a human-readable message from an error body
///
/// Recognizes an [`ErrorResponse`] and an [`ApiResponse`] envelope. Returns `None` if
/// the body is neither.
pub fn error_message(body: &[u8]) -> Option<String> {
    match serde_json::from_slice(body).ok()? {
        ErrorBody::Error(error) => Some(error.message),
        ErrorBody::Envelope(envelope) => Some(
            envelope
                .message
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| "Request failed".to_owned()),
        ),
    }
}
