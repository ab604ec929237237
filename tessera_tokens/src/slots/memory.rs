//! An in-memory token slot

use super::{SlotError, TokenSlot};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

/// An in-memory token slot
///
/// Clones share the same underlying value, which makes it possible to hand one
/// clone to a [`TokenStore`](crate::TokenStore) and inspect the other.
#[derive(Clone, Default, Debug)]
pub struct InMemorySlot {
    value: Arc<Mutex<Option<String>>>,
}

impl InMemorySlot {
    /// Constructs a new, empty in-memory slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Constructs a new in-memory slot holding `value`
    pub fn with_value(value: impl Into<String>) -> Self {
        Self {
            value: Arc::new(Mutex::new(Some(value.into()))),
        }
    }

    /// Reads the current value without going through the async interface
    pub fn peek(&self) -> Option<String> {
        self.value.lock().map(|v| v.clone()).unwrap_or(None)
    }
}

#[async_trait]
impl TokenSlot for InMemorySlot {
    async fn load(&self) -> Result<Option<String>, SlotError> {
        Ok(self
            .value
            .lock()
            .map_err(|_| "in-memory slot poisoned")?
            .clone())
    }

    async fn store(&self, value: &str) -> Result<(), SlotError> {
        *self.value.lock().map_err(|_| "in-memory slot poisoned")? = Some(value.to_owned());
        Ok(())
    }

    async fn remove(&self) -> Result<(), SlotError> {
        *self.value.lock().map_err(|_| "in-memory slot poisoned")? = None;
        Ok(())
    }
}
