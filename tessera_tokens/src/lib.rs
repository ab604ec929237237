//! Session token storage and single-flight renewal for JWT authentication clients
//!
//! This library holds the tokens issued by an authentication service and keeps them
//! usable for the lifetime of a user's session. An access token is short-lived and is
//! kept in memory (mirrored into a session-scoped slot), while a refresh token is kept
//! in a persistent slot that outlives the process.
//!
//! When the authentication service rejects an access token, the [`RefreshCoordinator`]
//! exchanges the refresh token for a new token pair. No matter how many requests observe
//! the rejection at the same time, only a single refresh call is made; every other
//! request waits on that call and observes the same outcome. If the refresh fails, the
//! session is torn down and subscribers are notified so that they can return the user
//! to a login view.
//!
//! # General Flow
//!
//! ```
//! use std::sync::Arc;
//! use tessera_tokens::{slots, RefreshCoordinator, SessionStatus, TokenStore};
//! # use tessera_tokens::{RefreshTokenRef, TokenPair, TokenRefresher};
//! # struct Api;
//! # #[async_trait::async_trait]
//! # impl TokenRefresher for Api {
//! #     async fn refresh(
//! #         &self,
//! #         _: &RefreshTokenRef,
//! #     ) -> Result<TokenPair, Box<dyn std::error::Error + Send + Sync + 'static>> {
//! #         Ok(TokenPair::new("access", "refresh"))
//! #     }
//! # }
//! # #[tokio::main(flavor = "current_thread")] async fn main() {
//! # let api = Api;
//! let store = TokenStore::restore(slots::InMemorySlot::new(), slots::NullSlot).await;
//! let coordinator = RefreshCoordinator::new(Arc::new(store), api).await;
//!
//! let status = coordinator.subscribe();
//! assert_eq!(*status.borrow(), SessionStatus::Invalidated);
//! # }
//! ```
//!
//! The `tessera_reqwest` crate wires the coordinator into a `reqwest` middleware
//! stack so that access tokens are attached and renewed transparently.
//!
//! # Features
//!
//! The following features are supported by this crate, all of which are enabled by default:
//!
//! * `remote`: Provides [`api::AuthApi`], a client for the login, register, and refresh
//!   operations of the authentication service.
//! * `file`: Provides a token slot persisted to the local filesystem.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(
    missing_docs,
    unused_import_braces,
    unused_imports,
    unused_qualifications
)]
#![deny(
    missing_debug_implementations,
    trivial_numeric_casts,
    unsafe_code,
    unused_must_use
)]

#[cfg(feature = "remote")]
pub mod api;
mod braids;
mod coordinator;
pub mod slots;
mod store;

pub use braids::*;
pub use coordinator::{RefreshCoordinator, RefreshError, SessionStatus, TokenRefresher};
pub use store::{TokenPair, TokenStore};
