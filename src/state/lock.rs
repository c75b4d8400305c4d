//! State locking.
//!
//! Only one process may apply changes to a target at a time. The lock is a
//! small JSON record next to the state blob; it expires after five minutes
//! so a crashed process cannot block a target forever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;

use super::store::StateStore;

/// Lock expiry duration in seconds.
pub const LOCK_EXPIRY_SECS: i64 = 300;

/// Name of the lock record inside a store.
pub const LOCK_FILE: &str = "state.lock";

/// Information about a state lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Unique lock identifier.
    pub lock_id: String,
    /// Who holds the lock.
    pub holder: String,
    /// When the lock was acquired.
    pub acquired_at: DateTime<Utc>,
    /// When the lock expires.
    pub expires_at: DateTime<Utc>,
}

impl LockInfo {
    /// Creates a new lock record for `holder`.
    #[must_use]
    pub fn new(holder: &str) -> Self {
        let now = Utc::now();
        Self {
            lock_id: Uuid::new_v4().to_string(),
            holder: holder.to_string(),
            acquired_at: now,
            expires_at: now + chrono::Duration::seconds(LOCK_EXPIRY_SECS),
        }
    }

    /// Checks if the lock has expired.
    #[must_use]
    pub fn is_expired(&self) -> bool {
        Utc::now() > self.expires_at
    }

    /// Returns the remaining time until expiry in seconds.
    #[must_use]
    pub fn remaining_secs(&self) -> i64 {
        let remaining = self.expires_at - Utc::now();
        remaining.num_seconds().max(0)
    }
}

/// A lock held on a store for the duration of one apply.
///
/// Release it explicitly with [`StateLock::release`]; dropping it leaves the
/// record in place until it expires.
pub struct StateLock<'a> {
    store: &'a dyn StateStore,
    info: LockInfo,
}

impl<'a> StateLock<'a> {
    /// Acquires the lock on `store` for the current process.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::StateError::LockedByOther`] when another
    /// holder owns an unexpired lock.
    pub async fn acquire(store: &'a dyn StateStore) -> Result<Self> {
        let info = store.acquire_lock(&generate_holder_id()).await?;
        Ok(Self { store, info })
    }

    /// Gets the lock info.
    #[must_use]
    pub const fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Releases the lock.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn release(self) -> Result<()> {
        if self.info.is_expired() {
            warn!(
                "State lock {} expired before release; another process may have taken over",
                self.info.lock_id
            );
        }
        self.store.release_lock(&self.info.lock_id).await
    }
}

/// Generates a unique holder identifier for the current process.
#[must_use]
pub fn generate_holder_id() -> String {
    let hostname = hostname::get().map_or_else(|_| String::from("unknown"), |h| h.to_string_lossy().to_string());

    let pid = std::process::id();
    let uuid = &Uuid::new_v4().to_string()[..8];

    format!("{hostname}-{pid}-{uuid}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_lock_is_live() {
        let info = LockInfo::new("test-holder");
        assert_eq!(info.holder, "test-holder");
        assert!(!info.is_expired());
        assert!(info.remaining_secs() > 0);
    }

    #[test]
    fn test_expired_lock() {
        let mut info = LockInfo::new("test-holder");
        info.expires_at = Utc::now() - chrono::Duration::seconds(1);
        assert!(info.is_expired());
        assert_eq!(info.remaining_secs(), 0);
    }

    #[test]
    fn test_holder_id_generation() {
        let id1 = generate_holder_id();
        let id2 = generate_holder_id();

        assert_ne!(id1, id2);

        let pid = std::process::id().to_string();
        assert!(id1.contains(&pid));
    }
}
