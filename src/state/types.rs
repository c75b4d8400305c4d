//! Recorded deployment state.
//!
//! A [`Snapshot`] is what the engine knows about the remote side after the
//! last successful apply: one [`ResourceEntry`] per deployed resource, keyed
//! by its `group.name` identity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use crate::error::StateError;

/// Current version of the state format.
pub const STATE_VERSION: u32 = 1;

/// Name of the state blob inside a store.
pub const STATE_FILE: &str = "state.json";

/// Maximum number of history entries kept in a snapshot.
const MAX_HISTORY: usize = 50;

/// The recorded state of one deployment target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// State format version.
    pub state_version: u32,
    /// Identifies the history this snapshot belongs to.
    pub lineage: String,
    /// Incremented on every successful apply within the lineage.
    pub serial: u64,
    /// Recorded resources by identity.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceEntry>,
    /// When the snapshot was last changed.
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
    /// Recent operations.
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
}

/// Remote identity of one deployed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceEntry {
    /// Remote identifier.
    pub id: String,
    /// Remote version token, when the API provides one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    /// Last known attributes, as reported by the backend.
    #[serde(default)]
    pub state: serde_json::Value,
}

/// A single entry in the snapshot history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// When the operation finished.
    pub timestamp: DateTime<Utc>,
    /// Type of operation.
    pub operation: Operation,
    /// Serial the operation produced.
    pub serial: u64,
    /// Identities touched by the operation.
    pub resources: Vec<String>,
    /// Whether every resource succeeded.
    pub success: bool,
}

/// Operations recorded in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    /// Plan applied.
    Deploy,
    /// Everything deleted.
    Destroy,
    /// Existing object attached to an identity.
    Bind,
    /// Identity forgotten without deleting the object.
    Unbind,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl Snapshot {
    /// Creates an empty snapshot with a fresh lineage.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state_version: STATE_VERSION,
            lineage: Uuid::new_v4().to_string(),
            serial: 0,
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Parses a snapshot, rejecting versions newer than this build.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::Corrupted`] for unparseable input and
    /// [`StateError::VersionMismatch`] for future versions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        let snapshot: Self = serde_json::from_slice(bytes)
            .map_err(|e| StateError::corrupted(format!("Failed to parse state: {e}")))?;
        if snapshot.state_version > STATE_VERSION {
            return Err(StateError::VersionMismatch {
                expected: STATE_VERSION,
                found: snapshot.state_version,
            });
        }
        Ok(snapshot)
    }

    /// Serializes the snapshot as pretty JSON.
    ///
    /// # Errors
    ///
    /// Returns [`StateError::SerializationError`] if encoding fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| StateError::serialization(format!("Failed to serialize state: {e}")))
    }

    /// Gets a resource by identity.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<&ResourceEntry> {
        self.resources.get(identity)
    }

    /// Adds or replaces a resource.
    pub fn upsert(&mut self, identity: impl Into<String>, entry: ResourceEntry) {
        self.resources.insert(identity.into(), entry);
        self.last_updated = Utc::now();
    }

    /// Removes a resource.
    pub fn remove(&mut self, identity: &str) -> Option<ResourceEntry> {
        let removed = self.resources.remove(identity);
        if removed.is_some() {
            self.last_updated = Utc::now();
        }
        removed
    }

    /// Advances the serial after a successful change.
    pub fn bump_serial(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }

    /// Records an operation, keeping only the most recent entries.
    pub fn add_history(&mut self, operation: Operation, resources: Vec<String>, success: bool) {
        if self.history.len() >= MAX_HISTORY {
            self.history.remove(0);
        }
        self.history.push(HistoryEntry {
            timestamp: Utc::now(),
            operation,
            serial: self.serial,
            resources,
            success,
        });
    }

    /// Identities of every recorded resource, sorted.
    pub fn identities(&self) -> impl Iterator<Item = &str> {
        self.resources.keys().map(String::as_str)
    }
}

impl ResourceEntry {
    /// Creates an entry with no version token and no attributes.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            etag: None,
            state: serde_json::Value::Null,
        }
    }

    /// Sets the version token.
    #[must_use]
    pub fn with_etag(mut self, etag: Option<String>) -> Self {
        self.etag = etag;
        self
    }

    /// Sets the recorded attributes.
    #[must_use]
    pub fn with_state(mut self, state: serde_json::Value) -> Self {
        self.state = state;
        self
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let op = match self {
            Self::Deploy => "deploy",
            Self::Destroy => "destroy",
            Self::Bind => "bind",
            Self::Unbind => "unbind",
        };
        write!(f, "{op}")
    }
}
