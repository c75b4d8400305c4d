//! State management.
//!
//! This module records what has been deployed for each target, keeps the
//! local cache and the remote copy in step, and guards deployable artifacts
//! behind a checksum-based validation gate.

mod checksum;
mod gate;
mod local;
mod lock;
mod s3;
mod staleness;
mod store;
mod types;

pub use checksum::{EXCLUDED_DIRS, compute_checksum};
pub use gate::{ArtifactState, ArtifactStateFile, ArtifactStatus, check_transition};
pub use local::{CACHE_DIR, LocalStateStore};
pub(crate) use local::write_atomically;
pub use lock::{LOCK_EXPIRY_SECS, LockInfo, StateLock, generate_holder_id};
pub use s3::S3StateStore;
pub use staleness::{StateSync, SyncOutcome, is_stale, read_serial};
pub use store::StateStore;
pub use types::{HistoryEntry, Operation, ResourceEntry, STATE_FILE, STATE_VERSION, Snapshot};
