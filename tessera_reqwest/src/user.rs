use reqwest::Url;
use reqwest_middleware::ClientWithMiddleware;
use tessera_tokens::{
    api::{dto::User, endpoint_url, endpoints, read_envelope, AuthError},
    RefreshError,
};

/// A client for the user operations of the service
///
/// Requests are sent through a session client, such as one built with
/// [`session_client()`](crate::session_client), so that they carry the current access
/// token and are replayed after a token refresh.
#[derive(Clone, Debug)]
pub struct UserApi {
    client: ClientWithMiddleware,
    base_url: Url,
}

impl UserApi {
    /// Constructs a new client for the service at `base_url`
    pub fn new(client: ClientWithMiddleware, base_url: Url) -> Self {
        Self { client, base_url }
    }

    /// Fetches the signed in user
    #[tracing::instrument(err, skip(self))]
    pub async fn current_user(&self) -> Result<User, AuthError> {
        let url = endpoint_url(&self.base_url, endpoints::CURRENT_USER);
        let resp = self.client.get(url).send().await.map_err(middleware_error)?;

        read_envelope(resp, "Failed to fetch user").await
    }
}

fn middleware_error(error: reqwest_middleware::Error) -> AuthError {
    match error {
        reqwest_middleware::Error::Middleware(error) => match error.downcast::<RefreshError>() {
            Ok(error) => AuthError::Session(error),
            Err(error) => AuthError::Transport {
                message: error.to_string(),
                source: error.into(),
            },
        },
        reqwest_middleware::Error::Reqwest(error) => AuthError::transport(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_failures_surface_as_session_errors() {
        let error = middleware_error(reqwest_middleware::Error::middleware(
            RefreshError::SessionEnded,
        ));

        assert!(matches!(error, AuthError::Session(RefreshError::SessionEnded)));
    }

    #[test]
    fn other_middleware_failures_are_transport_errors() {
        let error = middleware_error(reqwest_middleware::Error::middleware(std::io::Error::new(
            std::io::ErrorKind::Other,
            "broken pipe",
        )));

        match error {
            AuthError::Transport { message, .. } => assert_eq!(message, "broken pipe"),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
