use std::{error, fmt, sync::RwLock};

use tokio::sync::Mutex;

use crate::{
    slots::{TokenSlot, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY},
    AccessToken, AccessTokenRef, RefreshToken, RefreshTokenRef,
};

/// An access token together with the refresh token issued alongside it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenPair {
    /// The access token
    pub access_token: AccessToken,
    /// The refresh token
    pub refresh_token: RefreshToken,
}

impl TokenPair {
    /// Constructs a new token pair
    pub fn new(
        access_token: impl Into<AccessToken>,
        refresh_token: impl Into<RefreshToken>,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }
}

/// Holds the tokens of the current session
///
/// The access token is read on every outbound request, so it is kept in memory and
/// only mirrored into the session slot. The refresh token is read rarely and always
/// comes straight from the persistent slot.
///
/// Storage failures never surface to callers. They are logged and the operation
/// degrades to a no-op.
pub struct TokenStore {
    access_token: RwLock<Option<AccessToken>>,
    session_slot: Box<dyn TokenSlot>,
    persistent_slot: Box<dyn TokenSlot>,
    pair_lock: Mutex<()>,
}

impl TokenStore {
    /// Constructs a new store with an empty in-memory access token
    pub fn new(
        session_slot: impl TokenSlot + 'static,
        persistent_slot: impl TokenSlot + 'static,
    ) -> Self {
        Self {
            access_token: RwLock::new(None),
            session_slot: Box::new(session_slot),
            persistent_slot: Box::new(persistent_slot),
            pair_lock: Mutex::new(()),
        }
    }

    /// Constructs a new store, restoring the access token from the session slot
    pub async fn restore(
        session_slot: impl TokenSlot + 'static,
        persistent_slot: impl TokenSlot + 'static,
    ) -> Self {
        let store = Self::new(session_slot, persistent_slot);

        match store.session_slot.load().await {
            Ok(Some(token)) => {
                tracing::debug!(slot = ACCESS_TOKEN_KEY, "restored access token from session slot");
                store.set_memory(Some(AccessToken::new(token)));
            }
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(
                    slot = ACCESS_TOKEN_KEY,
                    error = (&*error as &dyn error::Error),
                    "unable to restore access token"
                )
            }
        }

        store
    }

    /// Gets the current access token
    ///
    /// This never touches storage.
    pub fn access_token(&self) -> Option<AccessToken> {
        self.access_token
            .read()
            .map(|t| t.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Replaces the access token, or clears it when `token` is `None`
    pub async fn set_access_token(&self, token: Option<&AccessTokenRef>) {
        let _pair = self.pair_lock.lock().await;
        self.write_access_token(token).await;
    }

    /// Reads the refresh token from the persistent slot
    pub async fn refresh_token(&self) -> Option<RefreshToken> {
        let _pair = self.pair_lock.lock().await;
        self.read_refresh_token().await
    }

    /// Replaces the refresh token, or clears it when `token` is `None`
    pub async fn set_refresh_token(&self, token: Option<&RefreshTokenRef>) {
        let _pair = self.pair_lock.lock().await;
        self.write_refresh_token(token).await;
    }

    /// Installs a new token pair
    ///
    /// Readers going through [`tokens()`][Self::tokens()] never observe a new access
    /// token paired with a stale refresh token or the other way around.
    pub async fn set_tokens(&self, pair: &TokenPair) {
        let _pair = self.pair_lock.lock().await;
        self.write_pair(Some(pair)).await;
    }

    /// Installs `pair`, or clears both tokens when `pair` is `None`, provided the
    /// stored refresh token is still `expected`
    ///
    /// Returns `false` and leaves the store untouched if the session has moved on,
    /// such as after a sign in or sign out.
    pub async fn exchange_tokens(
        &self,
        expected: Option<&RefreshTokenRef>,
        pair: Option<&TokenPair>,
    ) -> bool {
        let _pair = self.pair_lock.lock().await;
        if self.read_refresh_token().await.as_deref() != expected {
            tracing::debug!("stored refresh token changed, leaving session in place");
            return false;
        }

        self.write_pair(pair).await;
        true
    }

    /// Reads both tokens as a consistent snapshot
    ///
    /// Returns `None` unless both tokens are present.
    pub async fn tokens(&self) -> Option<TokenPair> {
        let _pair = self.pair_lock.lock().await;
        let refresh_token = self.read_refresh_token().await?;
        let access_token = self.access_token()?;
        Some(TokenPair {
            access_token,
            refresh_token,
        })
    }

    /// Clears both tokens
    ///
    /// Clearing an already empty store is a no-op.
    pub async fn clear_tokens(&self) {
        let _pair = self.pair_lock.lock().await;
        self.write_pair(None).await;
    }

    async fn write_pair(&self, pair: Option<&TokenPair>) {
        match pair {
            Some(pair) => {
                self.write_refresh_token(Some(&*pair.refresh_token)).await;
                self.write_access_token(Some(&*pair.access_token)).await;
                tracing::debug!("installed new token pair");
            }
            None => {
                self.write_access_token(None).await;
                self.write_refresh_token(None).await;
                tracing::debug!("cleared session tokens");
            }
        }
    }

    fn set_memory(&self, token: Option<AccessToken>) {
        match self.access_token.write() {
            Ok(mut guard) => *guard = token,
            Err(poisoned) => *poisoned.into_inner() = token,
        }
    }

    async fn write_access_token(&self, token: Option<&AccessTokenRef>) {
        self.set_memory(token.map(ToOwned::to_owned));

        let result = match token {
            Some(token) => self.session_slot.store(token.as_str()).await,
            None => self.session_slot.remove().await,
        };

        if let Err(error) = result {
            tracing::warn!(
                slot = ACCESS_TOKEN_KEY,
                error = (&*error as &dyn error::Error),
                "unable to update session slot"
            );
        }
    }

    async fn read_refresh_token(&self) -> Option<RefreshToken> {
        match self.persistent_slot.load().await {
            Ok(token) => token.map(RefreshToken::new),
            Err(error) => {
                tracing::warn!(
                    slot = REFRESH_TOKEN_KEY,
                    error = (&*error as &dyn error::Error),
                    "unable to read persistent slot"
                );
                None
            }
        }
    }

    async fn write_refresh_token(&self, token: Option<&RefreshTokenRef>) {
        let result = match token {
            Some(token) => self.persistent_slot.store(token.as_str()).await,
            None => self.persistent_slot.remove().await,
        };

        if let Err(error) = result {
            tracing::warn!(
                slot = REFRESH_TOKEN_KEY,
                error = (&*error as &dyn error::Error),
                "unable to update persistent slot"
            );
        }
    }
}

impl fmt::Debug for TokenStore {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TokenStore")
            .field("access_token", &self.access_token())
            .finish_non_exhaustive()
    }
}
