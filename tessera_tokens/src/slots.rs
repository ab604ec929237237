//! Storage slots for session tokens
//!
//! A slot is a named location that holds at most one token string. The access token
//! is mirrored into a session-scoped slot, while the refresh token lives only in a
//! persistent slot.

use async_trait::async_trait;
use std::error;

#[cfg(feature = "file")]
pub mod file;
mod memory;

#[cfg(feature = "file")]
pub use file::FileSlot;
pub use memory::InMemorySlot;

/// Slot key for the session-scoped access token mirror
pub const ACCESS_TOKEN_KEY: &str = "accessToken";

/// Slot key for the persistent refresh token
pub const REFRESH_TOKEN_KEY: &str = "refreshToken";

/// A boxed error returned by a slot
pub type SlotError = Box<dyn error::Error + Send + Sync + 'static>;

/// An asynchronous storage location for a single token
#[async_trait]
pub trait TokenSlot: Send + Sync {
    /// Loads the stored value, if any
    async fn load(&self) -> Result<Option<String>, SlotError>;

    /// Replaces the stored value
    async fn store(&self, value: &str) -> Result<(), SlotError>;

    /// Removes the stored value
    ///
    /// Removing from an empty slot is not an error.
    async fn remove(&self) -> Result<(), SlotError>;
}

/// A slot for environments where no storage is available
///
/// Writes are discarded and reads always find nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSlot;

#[async_trait]
impl TokenSlot for NullSlot {
    async fn load(&self) -> Result<Option<String>, SlotError> {
        Ok(None)
    }

    async fn store(&self, _: &str) -> Result<(), SlotError> {
        Ok(())
    }

    async fn remove(&self) -> Result<(), SlotError> {
        Ok(())
    }
}
