//! Middleware to automatically attach and renew session access tokens
//!
//! When using [`ClientWithMiddleware`](reqwest_middleware::ClientWithMiddleware),
//! include the [`AccessTokenMiddleware`] in the middleware stack to attach the
//! session's current access token to each outbound request, followed by the
//! [`TokenRefreshMiddleware`] to renew the session when the service rejects that
//! token and replay the request with the new one.
//!
//! Requests to the authentication endpoints themselves (sign in, registration, and
//! refresh) are never given an access token and never trigger a refresh.
//!
//! If a request already has specified an `Authorization` header value by
//! the time that the middleware executes, the existing value will be left
//! in place, allowing overrides to be specified as required.
//!
//! ```
//! use std::sync::Arc;
//! use tessera_reqwest::{AccessTokenMiddleware, TokenRefreshMiddleware};
//! use tessera_tokens::{api::AuthApi, slots, RefreshCoordinator, TokenStore};
//! use reqwest::Client;
//! use reqwest_middleware::ClientBuilder;
//!
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! let base_url = reqwest::Url::parse("https://example.com").unwrap();
//! let store = TokenStore::restore(slots::InMemorySlot::new(), slots::NullSlot).await;
//! let auth = AuthApi::new(Client::default(), base_url);
//! let coordinator = RefreshCoordinator::new(Arc::new(store), auth).await;
//!
//! let client = ClientBuilder::new(Client::default())
//!     .with(AccessTokenMiddleware::new(coordinator.clone()))
//!     .with(TokenRefreshMiddleware::new(coordinator))
//!     .build();
//!
//! let req = client
//!     .get("https://example.com/users/me");
//! # async move { req
//!     .send()
//!     .await
//!     .unwrap();
//! # };
//! # }
//! ```
//!
//! The same stack can be built with [`session_client()`].

#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    missing_copy_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

use std::fmt;

use bytes::{BufMut, BytesMut};
use predicates::{boolean::NotPredicate, prelude::*, reflection};
use reqwest::{header, Request, Response};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, Middleware, Next, Result};
use tessera_tokens::{api::endpoints, AccessToken, AccessTokenRef, RefreshCoordinator};

mod refresh;
mod user;

pub use refresh::{RetryAttempted, TokenRefreshMiddleware};
pub use user::UserApi;

/// Predicate matching requests that are not sent to an authentication endpoint
pub type NotAuthEndpoint = NotPredicate<AuthEndpoints, Request>;

/// Builds a client that attaches and renews the session's access token
pub fn session_client(
    client: reqwest::Client,
    coordinator: RefreshCoordinator,
) -> ClientWithMiddleware {
    ClientBuilder::new(client)
        .with(AccessTokenMiddleware::new(coordinator.clone()))
        .with(TokenRefreshMiddleware::new(coordinator))
        .build()
}

/// A middleware that injects the session's access token into outgoing requests
#[derive(Clone, Debug)]
pub struct AccessTokenMiddleware<P> {
    coordinator: RefreshCoordinator,
    predicate: P,
}

impl AccessTokenMiddleware<NotAuthEndpoint> {
    /// Construct a new middleware from a session coordinator
    ///
    /// By default, this middleware will send its token with every request except
    /// those sent to an authentication endpoint. To change this behavior, provide a
    /// custom predicate with [`with_predicate()`][Self::with_predicate()].
    pub fn new(coordinator: RefreshCoordinator) -> Self {
        Self {
            coordinator,
            predicate: AuthEndpoints::default().not(),
        }
    }

    /// Replaces the default predicate with a custom predicate
    pub fn with_predicate<P>(self, predicate: P) -> AccessTokenMiddleware<P> {
        AccessTokenMiddleware {
            coordinator: self.coordinator,
            predicate,
        }
    }
}

#[async_trait::async_trait]
impl<P> Middleware for AccessTokenMiddleware<P>
where
    P: Predicate<Request> + Send + Sync + 'static,
{
    async fn handle(
        &self,
        mut req: Request,
        extensions: &mut http::Extensions,
        next: Next<'_>,
    ) -> Result<Response> {
        if self.predicate.eval(&req) {
            if let header::Entry::Vacant(entry) = req.headers_mut().entry(header::AUTHORIZATION) {
                match self.coordinator.access_token() {
                    Some(token) => {
                        if let Some(value) = bearer_header(&token) {
                            tracing::trace!("attaching access token");
                            entry.insert(value);
                            extensions.insert(AttachedToken(token));
                        }
                    }
                    None => tracing::trace!("no access token available"),
                }
            }
        }

        next.run(req, extensions).await
    }
}

pub(crate) fn bearer_header(token: &AccessTokenRef) -> Option<header::HeaderValue> {
    let mut header_value = BytesMut::with_capacity(token.as_str().len() + 7);
    header_value.put_slice(b"Bearer ");
    header_value.put_slice(token.as_str().as_bytes());
    match header::HeaderValue::from_maybe_shared(header_value.freeze()) {
        Ok(mut value) => {
            value.set_sensitive(true);
            Some(value)
        }
        Err(_) => {
            tracing::warn!("access token contains bytes not valid in a header, not attaching");
            None
        }
    }
}

/// The session access token attached to a request by [`AccessTokenMiddleware`]
#[derive(Clone, Debug)]
pub(crate) struct AttachedToken(pub(crate) AccessToken);

/// Matches requests sent to one of the authentication endpoints
///
/// A request matches if its URL path ends with one of the endpoint paths.
#[derive(Clone, Debug)]
pub struct AuthEndpoints {
    paths: Vec<String>,
}

impl Default for AuthEndpoints {
    /// The service's sign in, registration, and refresh endpoints
    fn default() -> Self {
        Self {
            paths: endpoints::AUTH.iter().map(|p| (*p).to_owned()).collect(),
        }
    }
}

impl AuthEndpoints {
    /// Construct a new predicate from a set of endpoint paths
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: ToString,
    {
        Self {
            paths: paths.into_iter().map(|p| p.to_string()).collect(),
        }
    }
}

impl Predicate<Request> for AuthEndpoints {
    #[inline]
    fn eval(&self, req: &Request) -> bool {
        let path = req.url().path();
        self.paths.iter().any(|p| path.ends_with(p.as_str()))
    }

    fn find_case(&self, expected: bool, req: &Request) -> Option<reflection::Case> {
        let result = self.eval(req);
        if result != expected {
            Some(
                reflection::Case::new(Some(self), result).add_product(reflection::Product::new(
                    "path",
                    req.url().path().to_owned(),
                )),
            )
        } else {
            None
        }
    }
}

impl reflection::PredicateReflection for AuthEndpoints {}
impl fmt::Display for AuthEndpoints {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("path ends with one of ")?;
        f.write_str(&self.paths.join(", "))
    }
}


#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    };

    use reqwest::Client;
    use tessera_tokens::{slots::InMemorySlot, TokenPair, TokenStore};

    use super::test_support::*;
    use super::*;

    const BEARER_TEST_TOKEN: &str = "Bearer A1";

    struct AuthChecker {
        expected_authorization: String,
        checked: AtomicBool,
    }

    impl AuthChecker {
        pub fn new(expected: impl Into<String>) -> Self {
            Self {
                expected_authorization: expected.into(),
                checked: AtomicBool::new(false),
            }
        }
    }

    #[async_trait::async_trait]
    impl Middleware for AuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            let authorization_header = req
                .headers()
                .get(header::AUTHORIZATION)
                .expect("no authorization header")
                .to_str()
                .expect("authorization header was not valid UTF-8");

            assert_eq!(authorization_header, self.expected_authorization);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    #[derive(Default)]
    struct NoAuthChecker {
        checked: AtomicBool,
    }

    #[async_trait::async_trait]
    impl Middleware for NoAuthChecker {
        async fn handle(
            &self,
            req: Request,
            _: &mut http::Extensions,
            _: Next<'_>,
        ) -> Result<Response> {
            assert_eq!(req.headers().get(header::AUTHORIZATION), None);
            self.checked.store(true, Ordering::Release);

            Ok(http::Response::<&[u8]>::default().into())
        }
    }

    async fn prepare_middleware() -> AccessTokenMiddleware<NotAuthEndpoint> {
        let refresher = Arc::new(FakeRefresher::default());
        AccessTokenMiddleware::new(signed_in_coordinator(&refresher).await)
    }

    mod when_request_does_not_have_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_with_defaults_attaches_token_on_api_request() {
            let middleware = prepare_middleware().await;
            let auth_checker = Arc::new(AuthChecker::new(BEARER_TEST_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client.get("https://example.com/users/me").send().await.unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn middleware_with_defaults_skips_auth_endpoints() {
            for endpoint in ["/auth/login", "/auth/register", "/api/auth/refresh"] {
                let middleware = prepare_middleware().await;
                let auth_checker = Arc::new(NoAuthChecker::default());

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client
                    .post(format!("https://example.com{endpoint}"))
                    .send()
                    .await
                    .unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }

        #[tokio::test]
        async fn middleware_attaches_nothing_without_an_access_token() {
            let refresher = Arc::new(FakeRefresher::default());
            let store = Arc::new(TokenStore::new(InMemorySlot::new(), InMemorySlot::new()));
            let coordinator = RefreshCoordinator::new(store, SharedRefresher(refresher)).await;
            let auth_checker = Arc::new(NoAuthChecker::default());

            let client = ClientBuilder::new(Client::default())
                .with(AccessTokenMiddleware::new(coordinator))
                .with_arc(auth_checker.clone())
                .build();

            client.get("https://example.com/users/me").send().await.unwrap();

            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        #[tokio::test]
        async fn middleware_uses_the_latest_access_token() {
            let refresher = Arc::new(FakeRefresher::default());
            let coordinator = signed_in_coordinator(&refresher).await;
            coordinator.sign_in(&TokenPair::new("A9", "R9")).await;
            let auth_checker = Arc::new(AuthChecker::new("Bearer A9"));

            let client = ClientBuilder::new(Client::default())
                .with(AccessTokenMiddleware::new(coordinator))
                .with_arc(auth_checker.clone())
                .build();

            client.get("https://example.com/users/me").send().await.unwrap();

            assert!(auth_checker.checked.load(Ordering::Acquire));
        }

        mod and_predicate_evaluates_to_ignore {
            use super::*;

            #[tokio::test]
            async fn middleware_does_not_attach_access_token() {
                let middleware = prepare_middleware()
                    .await
                    .with_predicate(predicate::never());
                let auth_checker = Arc::new(NoAuthChecker::default());

                let client = ClientBuilder::new(Client::default())
                    .with(middleware)
                    .with_arc(auth_checker.clone())
                    .build();

                let resp = client.get("https://example.com/users/me").send().await.unwrap();

                assert_eq!(resp.status(), http::StatusCode::OK);
                assert!(auth_checker.checked.load(Ordering::Acquire));
            }
        }
    }

    mod when_request_already_contains_an_authorization_header {
        use super::*;

        #[tokio::test]
        async fn middleware_does_not_attach_access_token() {
            const OVERRIDE_TOKEN: &str = "overridden!";
            // Reqwest uses a capital `B` bearer
            const BEARER_OVERRIDE_TOKEN: &str = "Bearer overridden!";

            let middleware = prepare_middleware().await;
            let auth_checker = Arc::new(AuthChecker::new(BEARER_OVERRIDE_TOKEN));

            let client = ClientBuilder::new(Client::default())
                .with(middleware)
                .with_arc(auth_checker.clone())
                .build();

            let resp = client
                .get("https://example.com/users/me")
                .bearer_auth(OVERRIDE_TOKEN)
                .send()
                .await
                .unwrap();

            assert_eq!(resp.status(), http::StatusCode::OK);
            assert!(auth_checker.checked.load(Ordering::Acquire));
        }
    }

    mod auth_endpoints_predicate {
        use super::*;

        #[test]
        fn matches_login_register_and_refresh() {
            let predicate = AuthEndpoints::default();
            for path in ["auth/login", "auth/register", "auth/refresh"] {
                let request = Request::new(
                    reqwest::Method::POST,
                    format!("https://example.com/{path}").parse().unwrap(),
                );
                let result = dbg!(predicate.find_case(true, &request));
                assert!(result.is_none())
            }
        }

        #[test]
        fn ignores_query_strings() {
            let request = Request::new(
                reqwest::Method::POST,
                "https://example.com/auth/login?next=%2Fdashboard".parse().unwrap(),
            );
            let predicate = AuthEndpoints::default();
            let result = dbg!(predicate.find_case(true, &request));
            assert!(result.is_none())
        }

        #[test]
        fn does_not_match_other_paths() {
            let request =
                Request::new(reqwest::Method::GET, "https://example.com/users/me".parse().unwrap());
            let predicate = AuthEndpoints::default();
            let result = dbg!(predicate.find_case(false, &request));
            assert!(result.is_none())
        }

        #[test]
        fn custom_paths_replace_the_defaults() {
            let request =
                Request::new(reqwest::Method::POST, "https://example.com/session".parse().unwrap());
            let predicate = AuthEndpoints::new(["/session"]);
            assert!(predicate.eval(&request));
        }
    }
}
