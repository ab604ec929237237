use crate::{AccessToken, AccessTokenRef, RefreshTokenRef, TokenPair, TokenStore};
use async_trait::async_trait;
use std::{
    error, fmt, mem,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use thiserror::Error;
use tokio::sync::{oneshot, watch};

/// A source of renewed token pairs
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    /// Exchanges a refresh token for a new access and refresh token pair
    async fn refresh(
        &self,
        refresh_token: &RefreshTokenRef,
    ) -> Result<TokenPair, Box<dyn error::Error + Send + Sync + 'static>>;
}

/// Whether the session is usable
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    /// Tokens are installed and requests may be authenticated
    Active,
    /// The session was torn down; the user must sign in again
    Invalidated,
}

/// An error renewing the session's tokens
///
/// Every request waiting on the same refresh observes an equivalent error.
#[derive(Clone, Debug, Error)]
pub enum RefreshError {
    /// No refresh token was available to the request that started the refresh
    #[error("no refresh token available")]
    NoRefreshToken,
    /// The session ended without a refresh token while this request was waiting
    #[error("session ended while waiting for token refresh")]
    SessionEnded,
    /// The authority rejected the refresh or could not be reached
    #[error("token refresh failed: {0}")]
    Rejected(#[source] Arc<dyn error::Error + Send + Sync + 'static>),
    /// The request that started the refresh was dropped before the refresh settled
    #[error("token refresh was abandoned before completing")]
    Abandoned,
}

type Waiter = oneshot::Sender<Result<AccessToken, RefreshError>>;

enum State {
    Idle,
    Refreshing { waiters: Vec<Waiter> },
}

struct Inner {
    store: Arc<TokenStore>,
    refresher: Box<dyn TokenRefresher>,
    state: Mutex<State>,
    status: watch::Sender<SessionStatus>,
}

/// Coordinates renewal of the session's tokens
///
/// Any number of requests may report a rejected access token at the same time, but
/// only the first one to do so triggers a call to the [`TokenRefresher`]. The rest
/// are queued and released, in the order they arrived, with the outcome of that
/// single call.
///
/// When the session cannot be renewed, tokens are cleared and
/// [`SessionStatus::Invalidated`] is published to every subscriber.
///
/// Clones share the same session.
#[derive(Clone)]
pub struct RefreshCoordinator {
    inner: Arc<Inner>,
}

enum Ticket {
    Lead,
    Wait(oneshot::Receiver<Result<AccessToken, RefreshError>>),
}

impl RefreshCoordinator {
    /// Constructs a new coordinator over `store`
    ///
    /// The initial session status is [`SessionStatus::Active`] if the store holds a
    /// refresh token.
    pub async fn new(store: Arc<TokenStore>, refresher: impl TokenRefresher + 'static) -> Self {
        let status = if store.refresh_token().await.is_some() {
            SessionStatus::Active
        } else {
            SessionStatus::Invalidated
        };

        let (status, _) = watch::channel(status);

        Self {
            inner: Arc::new(Inner {
                store,
                refresher: Box::new(refresher),
                state: Mutex::new(State::Idle),
                status,
            }),
        }
    }

    /// The underlying token store
    pub fn store(&self) -> &Arc<TokenStore> {
        &self.inner.store
    }

    /// The current access token
    #[inline]
    pub fn access_token(&self) -> Option<AccessToken> {
        self.inner.store.access_token()
    }

    /// Whether a user is signed in
    ///
    /// This is decided solely by the presence of a refresh token.
    pub async fn is_logged_in(&self) -> bool {
        self.inner.store.refresh_token().await.is_some()
    }

    /// The most recently published session status
    pub fn status(&self) -> SessionStatus {
        *self.inner.status.borrow()
    }

    /// Subscribes to session status changes
    ///
    /// UI layers should return the user to a login view when
    /// [`SessionStatus::Invalidated`] is published.
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.inner.lock_state(), State::Refreshing { .. })
    }

    /// Installs the tokens obtained by signing in
    pub async fn sign_in(&self, pair: &TokenPair) {
        self.inner.store.set_tokens(pair).await;
        tracing::info!("session established");
        self.inner.publish(SessionStatus::Active);
    }

    /// Clears the session's tokens
    pub async fn sign_out(&self) {
        self.inner.store.clear_tokens().await;
        tracing::info!("signed out");
        self.inner.publish(SessionStatus::Invalidated);
    }

    /// Recovers from a rejected access token
    ///
    /// `rejected` is the access token that the authority refused, if one was sent.
    /// If a newer access token has already been installed, it is returned
    /// immediately. Otherwise this either starts a refresh or joins the one already
    /// in flight, and yields the renewed access token.
    ///
    /// The caller that starts a refresh receives [`RefreshError::NoRefreshToken`] if
    /// there is no refresh token to exchange; callers that joined it receive
    /// [`RefreshError::SessionEnded`].
    pub async fn recover(
        &self,
        rejected: Option<&AccessTokenRef>,
    ) -> Result<AccessToken, RefreshError> {
        let ticket = {
            let mut state = self.inner.lock_state();
            match &mut *state {
                State::Refreshing { waiters } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    tracing::debug!(
                        queued = waiters.len(),
                        "token refresh already in flight, waiting"
                    );
                    Ticket::Wait(rx)
                }
                State::Idle => match self.inner.store.access_token() {
                    Some(current) if rejected != Some(&*current) => {
                        tracing::debug!("rejected access token already superseded");
                        return Ok(current);
                    }
                    _ => {
                        *state = State::Refreshing {
                            waiters: Vec::new(),
                        };
                        Ticket::Lead
                    }
                },
            }
        };

        match ticket {
            Ticket::Wait(rx) => rx.await.unwrap_or(Err(RefreshError::Abandoned)),
            Ticket::Lead => {
                Cycle {
                    inner: &self.inner,
                    settled: false,
                }
                .run()
                .await
            }
        }
    }

    /// The number of requests waiting on the in-flight refresh
    pub fn queued(&self) -> usize {
        match &*self.inner.lock_state() {
            State::Refreshing { waiters } => waiters.len(),
            State::Idle => 0,
        }
    }
}

impl fmt::Debug for RefreshCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("RefreshCoordinator")
            .field("store", &self.inner.store)
            .field("refreshing", &self.is_refreshing())
            .field("status", &self.status())
            .finish()
    }
}

impl Inner {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn take_waiters(&self) -> Vec<Waiter> {
        match mem::replace(&mut *self.lock_state(), State::Idle) {
            State::Refreshing { waiters } => waiters,
            State::Idle => Vec::new(),
        }
    }

    fn publish(&self, status: SessionStatus) {
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }
}

/// A single in-flight refresh, owned by the request that started it
struct Cycle<'a> {
    inner: &'a Inner,
    settled: bool,
}

impl Cycle<'_> {
    async fn run(mut self) -> Result<AccessToken, RefreshError> {
        let inner = self.inner;
        let store = &inner.store;

        let refresh_token = match store.refresh_token().await {
            Some(token) => token,
            None => {
                if !store.exchange_tokens(None, None).await {
                    return self.superseded();
                }
                tracing::warn!("no refresh token available, ending session");
                self.settle(Err(RefreshError::SessionEnded));
                inner.publish(SessionStatus::Invalidated);
                return Err(RefreshError::NoRefreshToken);
            }
        };

        tracing::debug!("requesting new token pair");
        match inner.refresher.refresh(&refresh_token).await {
            Ok(pair) => {
                if !store.exchange_tokens(Some(&refresh_token), Some(&pair)).await {
                    return self.superseded();
                }
                tracing::info!("received new tokens");
                self.settle(Ok(pair.access_token.clone()));
                Ok(pair.access_token)
            }
            Err(error) => {
                if !store.exchange_tokens(Some(&refresh_token), None).await {
                    tracing::debug!(
                        error = (&*error as &dyn error::Error),
                        "token refresh failed after the session was replaced"
                    );
                    return self.superseded();
                }
                tracing::warn!(
                    error = (&*error as &dyn error::Error),
                    "token refresh failed, ending session"
                );
                let error = RefreshError::Rejected(Arc::from(error));
                self.settle(Err(error.clone()));
                inner.publish(SessionStatus::Invalidated);
                Err(error)
            }
        }
    }

    /// Settles with whatever session replaced the one being refreshed
    fn superseded(mut self) -> Result<AccessToken, RefreshError> {
        let outcome = self
            .inner
            .store
            .access_token()
            .ok_or(RefreshError::SessionEnded);
        self.settle(outcome.clone());
        outcome
    }

    fn settle(&mut self, outcome: Result<AccessToken, RefreshError>) {
        self.settled = true;
        let waiters = self.inner.take_waiters();
        tracing::trace!(waiters = waiters.len(), "releasing queued requests");
        for waiter in waiters {
            // A waiter whose request was dropped no longer needs an answer
            let _ = waiter.send(outcome.clone());
        }
    }
}

impl Drop for Cycle<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let waiters = self.inner.take_waiters();
            tracing::warn!(
                waiters = waiters.len(),
                "token refresh abandoned before completing"
            );
        }
    }
}
