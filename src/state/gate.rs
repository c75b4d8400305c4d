//! Validation gate for deployable artifacts.
//!
//! An artifact moves `Scaffolded -> Validated -> Deployed`. Validation may be
//! repeated from any state, but deploying requires a validation whose
//! recorded checksum still matches the sources on disk.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{GateError, Result, StateError};

use super::checksum::compute_checksum;
use super::local::write_atomically;

/// Name of the artifact state file inside an artifact directory.
pub const ARTIFACT_STATE_FILE: &str = ".deckhand/artifact.json";

/// Lifecycle status without payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactStatus {
    /// Created, never validated.
    Scaffolded,
    /// Validated against a checksum.
    Validated,
    /// Deployed from a validated checksum.
    Deployed,
}

impl ArtifactStatus {
    /// Lowercase name used in messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Scaffolded => "scaffolded",
            Self::Validated => "validated",
            Self::Deployed => "deployed",
        }
    }
}

/// Checks whether `from -> to` is a legal transition.
///
/// # Errors
///
/// Returns [`GateError::NotValidated`] when deploying something never
/// validated, and [`GateError::InvalidTransition`] for every other illegal
/// move.
pub const fn check_transition(from: ArtifactStatus, to: ArtifactStatus) -> std::result::Result<(), GateError> {
    match (from, to) {
        (_, ArtifactStatus::Validated) | (ArtifactStatus::Validated, ArtifactStatus::Deployed) => Ok(()),
        (ArtifactStatus::Scaffolded, ArtifactStatus::Deployed) => Err(GateError::NotValidated),
        (ArtifactStatus::Deployed, ArtifactStatus::Deployed) => Err(GateError::InvalidTransition {
            from: "deployed",
            to: "deployed",
            hint: "re-run validation before deploying again",
        }),
        (from, ArtifactStatus::Scaffolded) => Err(GateError::InvalidTransition {
            from: from.as_str(),
            to: "scaffolded",
            hint: "an artifact cannot return to scaffolded; validate it instead",
        }),
    }
}

/// Recorded lifecycle state of an artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ArtifactState {
    /// Created, never validated.
    Scaffolded,
    /// Validated against `checksum`.
    Validated {
        /// Checksum of the sources at validation time.
        checksum: String,
        /// When validation passed.
        validated_at: DateTime<Utc>,
    },
    /// Deployed from a validated checksum.
    Deployed {
        /// Checksum of the deployed sources.
        checksum: String,
        /// When validation passed.
        validated_at: DateTime<Utc>,
        /// When the deploy finished.
        deployed_at: DateTime<Utc>,
    },
}

impl ArtifactState {
    /// Status without payload.
    #[must_use]
    pub const fn status(&self) -> ArtifactStatus {
        match self {
            Self::Scaffolded => ArtifactStatus::Scaffolded,
            Self::Validated { .. } => ArtifactStatus::Validated,
            Self::Deployed { .. } => ArtifactStatus::Deployed,
        }
    }

    /// The recorded checksum, if any.
    #[must_use]
    pub fn checksum(&self) -> Option<&str> {
        match self {
            Self::Scaffolded => None,
            Self::Validated { checksum, .. } | Self::Deployed { checksum, .. } => Some(checksum),
        }
    }

    /// Records a successful validation of sources with `checksum`.
    #[must_use]
    pub fn validate(self, checksum: String) -> Self {
        Self::Validated {
            checksum,
            validated_at: Utc::now(),
        }
    }

    /// Moves to `Deployed` if `current_checksum` matches the validation.
    ///
    /// # Errors
    ///
    /// Fails when the artifact was never validated, was already deployed
    /// without re-validation, or its sources changed since validation.
    pub fn deploy(self, current_checksum: &str) -> std::result::Result<Self, GateError> {
        check_transition(self.status(), ArtifactStatus::Deployed)?;
        match self {
            Self::Validated {
                checksum,
                validated_at,
            } => {
                if checksum != current_checksum {
                    return Err(GateError::ChecksumMismatch {
                        expected: checksum,
                        actual: current_checksum.to_string(),
                    });
                }
                Ok(Self::Deployed {
                    checksum,
                    validated_at,
                    deployed_at: Utc::now(),
                })
            }
            Self::Scaffolded => Err(GateError::NotValidated),
            Self::Deployed { .. } => Err(GateError::InvalidTransition {
                from: "deployed",
                to: "deployed",
                hint: "re-run validation before deploying again",
            }),
        }
    }
}

/// Persists an [`ArtifactState`] as JSON next to the artifact sources.
#[derive(Debug, Clone)]
pub struct ArtifactStateFile {
    root: PathBuf,
    path: PathBuf,
}

impl ArtifactStateFile {
    /// State file for the artifact rooted at `root`.
    #[must_use]
    pub fn for_artifact(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            path: root.join(ARTIFACT_STATE_FILE),
        }
    }

    /// The artifact source root.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Loads the state; a missing file means `Scaffolded`.
    ///
    /// # Errors
    ///
    /// Fails when the file exists but cannot be read or parsed.
    pub async fn load(&self) -> Result<ArtifactState> {
        match tokio::fs::read(&self.path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                StateError::corrupted(format!("Failed to parse {}: {e}", self.path.display())).into()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No artifact state at {}", self.path.display());
                Ok(ArtifactState::Scaffolded)
            }
            Err(e) => Err(StateError::filesystem(format!("Failed to read {}: {e}", self.path.display())).into()),
        }
    }

    /// Saves the state.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub async fn save(&self, state: &ArtifactState) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| StateError::filesystem(format!("Failed to create {}: {e}", parent.display())))?;
        }
        let bytes = serde_json::to_vec_pretty(state)
            .map_err(|e| StateError::serialization(format!("Failed to serialize artifact state: {e}")))?;
        write_atomically(&self.path, &bytes).await
    }

    /// Records a validation of the current sources.
    ///
    /// # Errors
    ///
    /// Fails when the sources cannot be hashed or the state cannot be saved.
    pub async fn validate(&self) -> Result<ArtifactState> {
        let checksum = compute_checksum(&self.root)?;
        let state = self.load().await?.validate(checksum);
        self.save(&state).await?;
        info!("Validated artifact at {}", self.root.display());
        Ok(state)
    }

    /// Marks the artifact deployed after re-checking its checksum.
    ///
    /// # Errors
    ///
    /// Returns a [`GateError`] when the gate refuses the deploy.
    pub async fn deploy(&self) -> Result<ArtifactState> {
        let current = self.load().await?;
        let checksum = compute_checksum(&self.root)?;
        let state = current.deploy(&checksum)?;
        self.save(&state).await?;
        info!("Deployed artifact at {}", self.root.display());
        Ok(state)
    }
}
