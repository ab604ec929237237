//! A token slot persisted to the local filesystem

use std::{io, path::PathBuf};

use async_trait::async_trait;
use tokio::fs::OpenOptions;

use super::{SlotError, TokenSlot};

/// A token slot that uses a local file
///
/// The file holds the raw token and nothing else. On unix, the file is
/// created readable only by the owning user.
#[derive(Debug)]
pub struct FileSlot {
    path: PathBuf,
}

impl FileSlot {
    /// Constructs a new file slot
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Constructs a file slot named `key` inside of `dir`
    pub fn in_dir(dir: impl Into<PathBuf>, key: &str) -> Self {
        let mut path = dir.into();
        path.push(key);
        Self { path }
    }

    async fn read_token(&self) -> Result<Option<String>, io::Error> {
        use tokio::io::AsyncReadExt;

        let mut file = match OpenOptions::new().read(true).open(&self.path).await {
            Ok(file) => file,
            Err(error) if error.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(error) => return Err(error),
        };

        let mut data = String::new();
        file.read_to_string(&mut data).await?;

        let token = data.trim();
        if token.is_empty() {
            Ok(None)
        } else {
            Ok(Some(token.to_owned()))
        }
    }

    async fn write_token(&self, token: &str) -> Result<(), io::Error> {
        use tokio::io::AsyncWriteExt;

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&self.path).await?;
        file.write_all(token.as_bytes()).await?;
        file.flush().await?;
        Ok(())
    }
}

#[async_trait]
impl TokenSlot for FileSlot {
    async fn load(&self) -> Result<Option<String>, SlotError> {
        Ok(self.read_token().await?)
    }

    async fn store(&self, value: &str) -> Result<(), SlotError> {
        Ok(self.write_token(value).await?)
    }

    async fn remove(&self) -> Result<(), SlotError> {
        match tokio::fs::remove_file(&self.path).await {
            Ok(()) => Ok(()),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slots::REFRESH_TOKEN_KEY;

    #[tokio::test]
    async fn missing_file_loads_as_empty() {
        let dir = tempfile::tempdir().unwrap();
        let slot = FileSlot::in_dir(dir.path(), REFRESH_TOKEN_KEY);

        assert_eq!(slot.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn stored_token_survives_a_new_slot_instance() {
        let dir = tempfile::tempdir().unwrap();
        FileSlot::in_dir(dir.path(), REFRESH_TOKEN_KEY)
            .store("R1")
            .await
            .unwrap();

        let reopened = FileSlot::in_dir(dir.path(), REFRESH_TOKEN_KEY);
        assert_eq!(reopened.load().await.unwrap().as_deref(), Some("R1"));
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let slot = FileSlot::in_dir(dir.path(), REFRESH_TOKEN_KEY);
        slot.store("R1").await.unwrap();

        slot.remove().await.unwrap();
        slot.remove().await.unwrap();

        assert_eq!(slot.load().await.unwrap(), None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn token_file_is_private_to_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let slot = FileSlot::in_dir(dir.path(), REFRESH_TOKEN_KEY);
        slot.store("R1").await.unwrap();

        let mode = std::fs::metadata(dir.path().join(REFRESH_TOKEN_KEY))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
