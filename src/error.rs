//! Error types for the deckhand deployment engine.
//!
//! This module provides the error hierarchy for every phase of a deployment:
//! configuration, value tree access, reference resolution, state management,
//! planning, applying, and the artifact validation gate.

use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

use crate::dyn_value::Location;

/// The main error type for the deckhand engine.
#[derive(Debug, Error)]
pub enum DeckhandError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Value tree access errors.
    #[error("Value error: {0}")]
    Value(#[from] ValueError),

    /// Reference resolution errors.
    #[error("{0}")]
    Reference(#[from] ReferenceError),

    /// State management errors.
    #[error("State error: {0}")]
    State(#[from] StateError),

    /// Artifact validation gate errors.
    #[error("{0}")]
    Gate(#[from] GateError),

    /// Planning errors.
    #[error("Planning error: {0}")]
    Plan(#[from] PlanError),

    /// Apply errors.
    #[error("Apply error: {0}")]
    Apply(#[from] ApplyError),

    /// Remote API errors.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found.
    #[error("Configuration file not found: {path}")]
    FileNotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// Environment variable is missing.
    #[error("Missing environment variable: {name}")]
    MissingEnvVar {
        /// Name of the missing variable.
        name: String,
    },

    /// The requested deployment target is not defined in the bundle.
    #[error("Target '{target}' is not defined in the bundle")]
    UnknownTarget {
        /// The requested target.
        target: String,
    },
}

/// Errors raised while navigating or rewriting a value tree.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValueError {
    /// Nothing exists at the requested path.
    #[error("no value at path '{path}'")]
    NotFound {
        /// The requested path.
        path: String,
    },

    /// A path component does not fit the node it is applied to.
    #[error("expected {expected} at '{path}', found {found}")]
    TypeMismatch {
        /// Path of the offending node.
        path: String,
        /// Kind the path component requires.
        expected: &'static str,
        /// Kind actually found.
        found: &'static str,
    },

    /// A sequence index is past the end of the sequence.
    #[error("index {index} out of range at '{path}' (length {len})")]
    IndexOutOfRange {
        /// Path of the sequence.
        path: String,
        /// Requested index.
        index: usize,
        /// Sequence length.
        len: usize,
    },

    /// A textual path or pattern could not be parsed.
    #[error("invalid path '{input}': {reason}")]
    InvalidPath {
        /// The offending text.
        input: String,
        /// What is wrong with it.
        reason: String,
    },

    /// Conversion to or from a typed structure failed.
    #[error("conversion failed: {message}")]
    Conversion {
        /// Underlying serde message.
        message: String,
    },
}

/// Errors raised while resolving `${...}` references.
#[derive(Debug, Error, Clone)]
pub enum ReferenceError {
    /// The lookup for a token failed.
    #[error("reference does not exist: {token} ({reason})")]
    Unresolved {
        /// The token exactly as the user wrote it.
        token: String,
        /// Path of the string that contains the token.
        path: String,
        /// Why the lookup failed.
        reason: String,
        /// Where the string was defined.
        locations: Vec<Location>,
    },

    /// The token participates in a reference cycle.
    #[error("cycle detected in reference {token}: {}", chain.join(" -> "))]
    Cycle {
        /// The token exactly as the user wrote it.
        token: String,
        /// Paths forming the cycle, first element repeated at the end.
        chain: Vec<String>,
        /// Where the string was defined.
        locations: Vec<Location>,
    },

    /// A sequence or mapping cannot be embedded inside surrounding text.
    #[error("cannot interpolate non-scalar value of {token} into a string")]
    NotScalar {
        /// The token exactly as the user wrote it.
        token: String,
        /// Path of the string that contains the token.
        path: String,
        /// Where the string was defined.
        locations: Vec<Location>,
    },
}

/// Failure reported by a lookup callback during resolution.
#[derive(Debug, Error, Clone)]
pub enum LookupError {
    /// The referenced value does not exist.
    #[error("{0}")]
    Missing(String),

    /// The lookup walked back into a path it is already resolving.
    #[error("cycle: {}", .0.join(" -> "))]
    Cycle(Vec<String>),

    /// Resolution of the referenced value itself failed.
    #[error(transparent)]
    Nested(Box<ReferenceError>),
}

/// State management errors.
#[derive(Debug, Error)]
pub enum StateError {
    /// State file not found.
    #[error("State file not found: {path}")]
    NotFound {
        /// Path to the missing state file.
        path: PathBuf,
    },

    /// State is corrupted.
    #[error("State is corrupted: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// State lock acquisition failed.
    #[error("Failed to acquire state lock: {message}")]
    LockFailed {
        /// Description of the lock failure.
        message: String,
    },

    /// State lock is held by another process.
    #[error("State is locked by another process (lock holder: {holder}, since: {since})")]
    LockedByOther {
        /// Identifier of the lock holder.
        holder: String,
        /// When the lock was acquired.
        since: String,
    },

    /// Local filesystem backend error.
    #[error("Local state backend error: {message}")]
    Filesystem {
        /// Description of the filesystem error.
        message: String,
    },

    /// S3 backend error.
    #[error("S3 state backend error: {message}")]
    S3Error {
        /// Description of the S3 error.
        message: String,
    },

    /// Serialization error.
    #[error("State serialization error: {message}")]
    SerializationError {
        /// Description of the serialization error.
        message: String,
    },

    /// State version is newer than this build understands.
    #[error("State version mismatch: expected at most {expected}, found {found}")]
    VersionMismatch {
        /// Highest supported state version.
        expected: u32,
        /// Found state version.
        found: u32,
    },

    /// Local and remote snapshots belong to different histories.
    #[error("State lineage mismatch: local {local}, remote {remote}")]
    LineageMismatch {
        /// Local lineage.
        local: String,
        /// Remote lineage.
        remote: String,
    },
}

/// Errors from the artifact validation gate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GateError {
    /// Deploy was requested before any validation.
    #[error("artifact has not been validated; run the validation step before deploying")]
    NotValidated,

    /// Sources changed since the last validation.
    #[error(
        "artifact sources changed since validation (recorded {expected}, found {actual}); re-run validation before deploying"
    )]
    ChecksumMismatch {
        /// Checksum recorded at validation time.
        expected: String,
        /// Checksum computed now.
        actual: String,
    },

    /// The requested lifecycle transition is not allowed.
    #[error("cannot move artifact from {from} to {to}: {hint}")]
    InvalidTransition {
        /// Current lifecycle status.
        from: &'static str,
        /// Requested lifecycle status.
        to: &'static str,
        /// Which step is missing.
        hint: &'static str,
    },
}

/// Planning errors.
#[derive(Debug, Error)]
pub enum PlanError {
    /// A resource definition is structurally invalid.
    #[error("invalid resource at '{path}': {message}")]
    InvalidResource {
        /// Path of the offending node.
        path: String,
        /// What is wrong.
        message: String,
        /// Where it was defined.
        locations: Vec<Location>,
    },

    /// The resource group is not managed by this engine.
    #[error("unknown resource group '{group}'")]
    UnknownGroup {
        /// Offending group name.
        group: String,
        /// Where it was defined.
        locations: Vec<Location>,
    },

    /// Resources reference each other in a loop.
    #[error("dependency cycle between resources: {cycle}")]
    DependencyCycle {
        /// Identities involved in the cycle.
        cycle: String,
    },

    /// The identity is not part of the bundle.
    #[error("resource '{identity}' is not defined in the bundle")]
    UnknownResource {
        /// Requested identity.
        identity: String,
    },

    /// The provisioning backend failed to compute a plan.
    #[error("backend failed: {message}")]
    Backend {
        /// Backend failure description.
        message: String,
    },
}

/// Apply errors.
#[derive(Debug, Error)]
pub enum ApplyError {
    /// A single resource operation failed.
    #[error("failed to apply {identity}: {reason}")]
    ResourceFailed {
        /// Resource identity (`group.name`).
        identity: String,
        /// Reason for failure.
        reason: String,
    },

    /// Some resources failed; the rest were applied and recorded.
    #[error("{} resource(s) failed: {}", failed.len(), format_failures(failed))]
    Partial {
        /// Failure message per resource identity.
        failed: BTreeMap<String, String>,
    },

    /// A recreate deleted the old object but could not create the new one.
    #[error("{identity} was deleted but could not be created again: {reason}")]
    RecreateIncomplete {
        /// Resource identity.
        identity: String,
        /// Why the create failed.
        reason: String,
    },

    /// A resource still has active runs and cannot be destroyed.
    #[error("{identity} has {count} active run(s); wait for them to finish before redeploying")]
    ActiveRuns {
        /// Resource identity.
        identity: String,
        /// Number of active runs.
        count: u32,
    },

    /// The batch was cancelled before it drained.
    #[error("apply was cancelled")]
    Cancelled,

    /// The provisioning backend failed as a whole.
    #[error("backend failed: {message}")]
    Backend {
        /// Backend failure description.
        message: String,
    },
}

/// Remote API errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Authentication failed.
    #[error("authentication failed: {message}")]
    AuthenticationFailed {
        /// Description of the auth failure.
        message: String,
    },

    /// API request failed.
    #[error("request failed: {status} - {message}")]
    ApiRequestFailed {
        /// HTTP status code.
        status: u16,
        /// Error message from API.
        message: String,
    },

    /// Rate limited.
    #[error("rate limited, retry after {retry_after_secs} seconds")]
    RateLimited {
        /// Seconds to wait before retrying.
        retry_after_secs: u64,
    },

    /// Remote object does not exist.
    #[error("{group} object {id} not found")]
    NotFound {
        /// Resource group.
        group: String,
        /// Remote identifier.
        id: String,
    },

    /// The object was modified out of band since it was last recorded.
    #[error("{group} object {id} was modified remotely (etag mismatch)")]
    PreconditionFailed {
        /// Resource group.
        group: String,
        /// Remote identifier.
        id: String,
    },

    /// Network error.
    #[error("network error: {message}")]
    NetworkError {
        /// Description of the network error.
        message: String,
    },

    /// Invalid response from API.
    #[error("invalid response: {message}")]
    InvalidResponse {
        /// Description of the response issue.
        message: String,
    },
}

/// Result type alias for deckhand operations.
pub type Result<T> = std::result::Result<T, DeckhandError>;

fn format_failures(failed: &BTreeMap<String, String>) -> String {
    failed
        .iter()
        .map(|(identity, reason)| format!("{identity}: {reason}"))
        .collect::<Vec<_>>()
        .join("; ")
}

impl DeckhandError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Api(ApiError::RateLimited { .. } | ApiError::NetworkError { .. })
                | Self::State(StateError::LockFailed { .. })
        )
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Api(ApiError::RateLimited { retry_after_secs }) => Some(*retry_after_secs),
            Self::Api(ApiError::NetworkError { .. }) => Some(1),
            Self::State(StateError::LockFailed { .. }) => Some(2),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl StateError {
    /// Creates an S3 error with the given message.
    #[must_use]
    pub fn s3(message: impl Into<String>) -> Self {
        Self::S3Error {
            message: message.into(),
        }
    }

    /// Creates a local filesystem error with the given message.
    #[must_use]
    pub fn filesystem(message: impl Into<String>) -> Self {
        Self::Filesystem {
            message: message.into(),
        }
    }

    /// Creates a corruption error with the given message.
    #[must_use]
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }

    /// Creates a serialization error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::SerializationError {
            message: message.into(),
        }
    }
}

impl ApiError {
    /// Creates an API request error.
    #[must_use]
    pub fn api_error(status: u16, message: impl Into<String>) -> Self {
        Self::ApiRequestFailed {
            status,
            message: message.into(),
        }
    }

    /// Creates a network error.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        Self::NetworkError {
            message: message.into(),
        }
    }
}

impl ReferenceError {
    /// Returns the token text the user wrote.
    #[must_use]
    pub fn token(&self) -> &str {
        match self {
            Self::Unresolved { token, .. } | Self::Cycle { token, .. } | Self::NotScalar { token, .. } => {
                token
            }
        }
    }

    /// Returns the source locations of the string holding the token.
    #[must_use]
    pub fn locations(&self) -> &[Location] {
        match self {
            Self::Unresolved { locations, .. }
            | Self::Cycle { locations, .. }
            | Self::NotScalar { locations, .. } => locations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_failure_lists_identities() {
        let mut failed = BTreeMap::new();
        failed.insert(String::from("jobs.b"), String::from("boom"));
        failed.insert(String::from("jobs.a"), String::from("denied"));

        let err = ApplyError::Partial { failed };
        assert_eq!(
            err.to_string(),
            "2 resource(s) failed: jobs.a: denied; jobs.b: boom"
        );
    }

    #[test]
    fn test_unresolved_reference_echoes_token() {
        let err = ReferenceError::Unresolved {
            token: String::from("${resources.jobs.missing.id}"),
            path: String::from("resources.jobs.a.tags.x"),
            reason: String::from("no such resource"),
            locations: vec![],
        };
        assert!(err.to_string().contains("${resources.jobs.missing.id}"));
        assert_eq!(err.token(), "${resources.jobs.missing.id}");
    }

    #[test]
    fn test_retryable_errors() {
        assert!(DeckhandError::Api(ApiError::network("reset")).is_retryable());
        assert!(!DeckhandError::internal("nope").is_retryable());
        assert_eq!(
            DeckhandError::Api(ApiError::RateLimited {
                retry_after_secs: 7
            })
            .retry_delay_secs(),
            Some(7)
        );
    }
}
