//! Local file-based state storage backend.
//!
//! Each deployment target gets its own cache directory under
//! `<bundle_root>/.deckhand/<target>/`. Blobs are written through a
//! temporary file and renamed into place.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{Result, StateError};

use super::lock::{LOCK_EXPIRY_SECS, LOCK_FILE, LockInfo, generate_holder_id};
use super::store::StateStore;

/// Cache directory name inside a bundle root.
pub const CACHE_DIR: &str = ".deckhand";

/// Local file-based state store.
#[derive(Debug, Clone)]
pub struct LocalStateStore {
    /// Directory holding every blob of this store.
    base_dir: PathBuf,
}

impl LocalStateStore {
    /// Creates a store for `target` inside `bundle_root`.
    #[must_use]
    pub fn for_target(bundle_root: &Path, target: &str) -> Self {
        Self::with_base_dir(bundle_root.join(CACHE_DIR).join(target))
    }

    /// Creates a store rooted at a custom directory.
    #[must_use]
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// The directory holding this store's blobs.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn blob_path(&self, name: &str) -> PathBuf {
        self.base_dir.join(name)
    }

    /// Ensures the state directory exists.
    async fn ensure_dir(&self) -> Result<()> {
        if !self.base_dir.exists() {
            debug!("Creating state directory: {}", self.base_dir.display());
            fs::create_dir_all(&self.base_dir).await.map_err(|e| {
                StateError::filesystem(format!("Failed to create state directory: {e}"))
            })?;
        }
        Ok(())
    }

    /// Reads the lock file if it exists.
    async fn read_lock_file(&self) -> Result<Option<LockInfo>> {
        let Some(content) = self.read(LOCK_FILE).await? else {
            return Ok(None);
        };

        let lock_info: LockInfo = serde_json::from_slice(&content)
            .map_err(|e| StateError::corrupted(format!("Failed to parse lock file: {e}")))?;

        Ok(Some(lock_info))
    }
}

/// Writes `content` to `path` through a temporary sibling file.
pub(crate) async fn write_atomically(path: &Path, content: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = fs::File::create(&temp_path)
        .await
        .map_err(|e| StateError::filesystem(format!("Failed to create {}: {e}", temp_path.display())))?;

    file.write_all(content)
        .await
        .map_err(|e| StateError::filesystem(format!("Failed to write {}: {e}", temp_path.display())))?;

    file.sync_all()
        .await
        .map_err(|e| StateError::filesystem(format!("Failed to sync {}: {e}", temp_path.display())))?;

    fs::rename(&temp_path, path)
        .await
        .map_err(|e| StateError::filesystem(format!("Failed to rename into {}: {e}", path.display())))?;

    Ok(())
}

#[async_trait]
impl StateStore for LocalStateStore {
    async fn read(&self, name: &str) -> Result<Option<Vec<u8>>> {
        let path = self.blob_path(name);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StateError::filesystem(format!("Failed to read {}: {e}", path.display())).into()),
        }
    }

    async fn write(&self, name: &str, content: &[u8]) -> Result<()> {
        self.ensure_dir().await?;
        let path = self.blob_path(name);
        if let Some(parent) = path.parent()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                StateError::filesystem(format!("Failed to create {}: {e}", parent.display()))
            })?;
        }
        debug!("Writing {}", path.display());
        write_atomically(&path, content).await
    }

    async fn remove(&self, name: &str) -> Result<()> {
        let path = self.blob_path(name);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Removed {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StateError::filesystem(format!("Failed to remove {}: {e}", path.display())).into()),
        }
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.blob_path(name).exists())
    }

    async fn acquire_lock(&self, holder: &str) -> Result<LockInfo> {
        if let Some(existing) = self.read_lock_file().await? {
            if !existing.is_expired() {
                return Err(StateError::LockedByOther {
                    holder: existing.holder.clone(),
                    since: existing.acquired_at.to_rfc3339(),
                }
                .into());
            }
            debug!("Expired lock found, taking over");
        }

        let holder_id = if holder.is_empty() {
            generate_holder_id()
        } else {
            holder.to_string()
        };

        let lock_info = LockInfo::new(&holder_id);
        let content = serde_json::to_vec_pretty(&lock_info)
            .map_err(|e| StateError::serialization(format!("Failed to serialize lock: {e}")))?;
        self.write(LOCK_FILE, &content)
            .await
            .map_err(|e| StateError::LockFailed {
                message: e.to_string(),
            })?;

        info!(
            "Acquired state lock: {} (expires in {}s)",
            lock_info.lock_id, LOCK_EXPIRY_SECS
        );

        Ok(lock_info)
    }

    async fn release_lock(&self, lock_id: &str) -> Result<()> {
        if let Some(existing) = self.read_lock_file().await? {
            if existing.lock_id == lock_id {
                self.remove(LOCK_FILE).await?;
                info!("Released state lock: {lock_id}");
            } else {
                debug!(
                    "Lock ID mismatch: expected {lock_id}, found {}",
                    existing.lock_id
                );
            }
        }
        Ok(())
    }

    async fn get_lock_info(&self) -> Result<Option<LockInfo>> {
        self.read_lock_file().await
    }

    async fn is_locked(&self) -> Result<bool> {
        if let Some(lock_info) = self.read_lock_file().await? {
            return Ok(!lock_info.is_expired());
        }
        Ok(false)
    }

    fn backend_type(&self) -> &'static str {
        "local"
    }

    fn location(&self) -> String {
        self.base_dir.display().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{ResourceEntry, Snapshot, StateLock};
    use tempfile::TempDir;

    fn create_test_store() -> (LocalStateStore, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = LocalStateStore::for_target(temp_dir.path(), "dev");
        (store, temp_dir)
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let (store, temp) = create_test_store();

        let mut snapshot = Snapshot::new();
        snapshot.upsert("jobs.etl", ResourceEntry::new("42"));
        store.save(&snapshot).await.expect("Failed to save state");

        assert!(temp.path().join(".deckhand/dev/state.json").exists());

        let loaded = store
            .load()
            .await
            .expect("Failed to load state")
            .expect("State should exist");
        assert_eq!(loaded, snapshot);
    }

    #[tokio::test]
    async fn test_load_nonexistent() {
        let (store, _temp) = create_test_store();

        let result = store.load().await.expect("Load should not fail");
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_load_corrupted() {
        let (store, _temp) = create_test_store();
        store.write("state.json", b"{not json").await.expect("write");

        assert!(store.load().await.is_err());
    }

    #[tokio::test]
    async fn test_exists_and_remove() {
        let (store, _temp) = create_test_store();

        assert!(!store.exists("state.json").await.expect("exists check failed"));
        store.save(&Snapshot::new()).await.expect("Failed to save state");
        assert!(store.exists("state.json").await.expect("exists check failed"));

        store.remove("state.json").await.expect("remove");
        store.remove("state.json").await.expect("second remove is a no-op");
        assert!(!store.exists("state.json").await.expect("exists check failed"));
    }

    #[tokio::test]
    async fn test_lock_acquire_release() {
        let (store, _temp) = create_test_store();

        let lock = StateLock::acquire(&store).await.expect("Failed to acquire lock");
        assert!(store.is_locked().await.expect("is_locked failed"));

        lock.release().await.expect("Failed to release lock");
        assert!(!store.is_locked().await.expect("is_locked failed"));
    }

    #[tokio::test]
    async fn test_lock_conflict() {
        let (store, _temp) = create_test_store();

        let _lock1 = store
            .acquire_lock("holder-1")
            .await
            .expect("Failed to acquire first lock");

        let result = store.acquire_lock("holder-2").await;
        assert!(matches!(
            result,
            Err(crate::error::DeckhandError::State(StateError::LockedByOther { .. }))
        ));
    }

    #[tokio::test]
    async fn test_expired_lock_is_taken_over() {
        let (store, _temp) = create_test_store();

        let mut stale = LockInfo::new("crashed");
        stale.expires_at = chrono::Utc::now() - chrono::Duration::seconds(1);
        store
            .write(LOCK_FILE, &serde_json::to_vec(&stale).expect("encode"))
            .await
            .expect("write");

        let lock = store.acquire_lock("fresh").await.expect("take over");
        assert_eq!(lock.holder, "fresh");
    }
}
