//! State store trait definition.
//!
//! A store holds named JSON blobs (the state snapshot, the metadata
//! artifact) plus a lock. Typed snapshot access is layered on top of the
//! raw blob operations.

use async_trait::async_trait;
use tracing::debug;

use crate::error::Result;
use super::lock::LockInfo;
use super::types::{STATE_FILE, Snapshot};

/// Trait for state storage backends.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Reads a blob. Returns `None` if it does not exist.
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>>;

    /// Writes a blob, replacing any previous content.
    async fn write(&self, name: &str, content: &[u8]) -> Result<()>;

    /// Removes a blob if present.
    async fn remove(&self, name: &str) -> Result<()>;

    /// Checks if a blob exists.
    async fn exists(&self, name: &str) -> Result<bool>;

    /// Acquires a lock on the state.
    ///
    /// Returns lock information if successful.
    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo>;

    /// Releases a lock on the state.
    async fn release_lock(&self, lock_id: &str) -> Result<()>;

    /// Gets current lock information if locked.
    async fn get_lock_info(&self) -> Result<Option<LockInfo>>;

    /// Checks if the state is locked.
    async fn is_locked(&self) -> Result<bool>;

    /// Gets the backend type name.
    fn backend_type(&self) -> &'static str;

    /// Human-readable location, for logs and CLI output.
    fn location(&self) -> String;

    /// Loads the snapshot.
    ///
    /// Returns `None` if no state exists yet.
    async fn load(&self) -> Result<Option<Snapshot>> {
        let Some(bytes) = self.read(STATE_FILE).await? else {
            debug!("No state at {}", self.location());
            return Ok(None);
        };
        Ok(Some(Snapshot::from_bytes(&bytes)?))
    }

    /// Saves the snapshot.
    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let bytes = snapshot.to_bytes()?;
        self.write(STATE_FILE, &bytes).await
    }
}

#[async_trait]
impl StateStore for Box<dyn StateStore> {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        (**self).read(name).await
    }

    async fn write(&self, name: &str, content: &[u8]) -> Result<()> {
        (**self).write(name, content).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        (**self).remove(name).await
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        (**self).exists(name).await
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        (**self).acquire_lock(holder).await
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        (**self).release_lock(lock_id).await
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        (**self).get_lock_info().await
    }

    async fn is_locked(&self) -> Result<bool> {
        (**self).is_locked().await
    }

    fn backend_type(&self) -> &'static str {
        (**self).backend_type()
    }

    fn location(&self) -> String {
        (**self).location()
    }
}
