//! Staleness between the local state cache and the remote copy.
//!
//! The only thing the two copies need to agree on is a top-level `serial`.
//! A local copy with a lower serial than the remote one is stale and is
//! replaced. If the local copy cannot be read it is treated as stale; if the
//! remote copy cannot be read the local copy is kept, so a broken or absent
//! remote never overwrites local work.
//!
//! Companion blobs, such as a provisioning tool's own state, follow the
//! state file: they are copied whenever it is, and before it.

use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{Result, StateError};

use super::store::StateStore;
use super::types::STATE_FILE;

#[derive(Debug, Deserialize)]
struct Header {
    serial: u64,
    #[serde(default)]
    lineage: Option<String>,
}

fn header(bytes: &[u8]) -> Option<Header> {
    serde_json::from_slice(bytes).ok()
}

/// Reads the top-level serial of a state blob, if it parses.
#[must_use]
pub fn read_serial(bytes: &[u8]) -> Option<u64> {
    header(bytes).map(|h| h.serial)
}

/// True when `local` should be replaced by `remote`.
///
/// `None` means the copy is absent. When both copies are unreadable the
/// remote rule wins and the local copy is kept.
#[must_use]
pub fn is_stale(local: Option<&[u8]>, remote: Option<&[u8]>) -> bool {
    let Some(remote_serial) = remote.and_then(read_serial) else {
        return false;
    };
    local
        .and_then(read_serial)
        .is_none_or(|local_serial| local_serial < remote_serial)
}

/// Result of a pull or push.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The destination was overwritten with the source.
    Replaced,
    /// The destination was left as it was.
    Kept,
}

/// Moves state between a local cache and a remote store.
pub struct StateSync<'a> {
    local: &'a dyn StateStore,
    remote: &'a dyn StateStore,
    companions: &'a [String],
}

impl<'a> StateSync<'a> {
    /// Creates a sync between two stores.
    #[must_use]
    pub const fn new(local: &'a dyn StateStore, remote: &'a dyn StateStore) -> Self {
        Self {
            local,
            remote,
            companions: &[],
        }
    }

    /// Also copies `companions` whenever the state file is copied.
    #[must_use]
    pub const fn with_companions(mut self, companions: &'a [String]) -> Self {
        self.companions = companions;
        self
    }

    /// Copies every companion blob present in `from` to `to`.
    async fn copy_companions(&self, from: &dyn StateStore, to: &dyn StateStore) -> Result<()> {
        for name in self.companions {
            match from.read(name).await {
                Ok(Some(bytes)) => {
                    to.write(name, &bytes).await?;
                    debug!("Copied {name} to {}", to.location());
                }
                Ok(None) => debug!("No {name} at {}", from.location()),
                Err(e) => warn!("Ignoring unreadable {name} at {}: {e}", from.location()),
            }
        }
        Ok(())
    }

    /// Reads a blob, absorbing read failures.
    async fn read_lenient(store: &dyn StateStore, side: &str) -> Option<Vec<u8>> {
        match store.read(STATE_FILE).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Ignoring unreadable {side} state at {}: {e}", store.location());
                None
            }
        }
    }

    /// Replaces the local copy with the remote one when the local copy is stale.
    ///
    /// # Errors
    ///
    /// Fails only when writing the local copy fails.
    pub async fn pull(&self) -> Result<SyncOutcome> {
        let local = Self::read_lenient(self.local, "local").await;
        let remote = Self::read_lenient(self.remote, "remote").await;

        if !is_stale(local.as_deref(), remote.as_deref()) {
            debug!("Local state is up to date");
            return Ok(SyncOutcome::Kept);
        }

        let Some(remote) = remote else {
            return Ok(SyncOutcome::Kept);
        };
        info!(
            "Local state is stale (serial {:?} < {:?}); pulling {}",
            local.as_deref().and_then(read_serial),
            read_serial(&remote),
            self.remote.location()
        );
        self.copy_companions(self.remote, self.local).await?;
        self.local.write(STATE_FILE, &remote).await?;
        Ok(SyncOutcome::Replaced)
    }

    /// Writes the local copy to the remote store.
    ///
    /// The remote copy is kept when it is newer than the local one.
    ///
    /// # Errors
    ///
    /// Fails when the two copies belong to different lineages or when the
    /// remote write fails.
    pub async fn push(&self) -> Result<SyncOutcome> {
        let Some(local) = Self::read_lenient(self.local, "local").await else {
            debug!("No local state to push");
            return Ok(SyncOutcome::Kept);
        };
        let remote = Self::read_lenient(self.remote, "remote").await;

        if let (Some(local_header), Some(remote_header)) =
            (header(&local), remote.as_deref().and_then(header))
            && let (Some(local_lineage), Some(remote_lineage)) = (local_header.lineage, remote_header.lineage)
            && local_lineage != remote_lineage
        {
            return Err(StateError::LineageMismatch {
                local: local_lineage,
                remote: remote_lineage,
            }
            .into());
        }

        if is_stale(Some(local.as_slice()), remote.as_deref()) {
            warn!(
                "Remote state at {} is newer than the local copy; not overwriting it",
                self.remote.location()
            );
            return Ok(SyncOutcome::Kept);
        }

        self.copy_companions(self.local, self.remote).await?;
        self.remote.write(STATE_FILE, &local).await?;
        info!("Pushed state to {}", self.remote.location());
        Ok(SyncOutcome::Replaced)
    }
}
