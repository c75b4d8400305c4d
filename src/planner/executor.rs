//! Results of executing a plan.
//!
//! A backend reports one [`ActionResult`] per identity it tried to change.
//! Nothing here touches the snapshot; the apply orchestrator merges the
//! successful results, and the partial effects of failed ones, once the
//! whole execution has drained.

use std::collections::BTreeMap;

use crate::state::ResourceEntry;

use super::plan::ActionType;

/// Effect of one successful action on recorded state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    /// Record or replace the entry.
    Upserted(ResourceEntry),
    /// Forget the identity.
    Removed,
}

/// Result of executing a single action.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionResult {
    /// Action that was executed.
    pub action: ActionType,
    /// State change on success, error message on failure.
    pub outcome: std::result::Result<StateChange, String>,
    /// Change that took effect on the remote side before a failure.
    pub partial: Option<StateChange>,
}

impl ActionResult {
    /// A successful result.
    #[must_use]
    pub const fn succeeded(action: ActionType, change: StateChange) -> Self {
        Self {
            action,
            outcome: Ok(change),
            partial: None,
        }
    }

    /// A failed result.
    #[must_use]
    pub fn failed(action: ActionType, error: impl Into<String>) -> Self {
        Self {
            action,
            outcome: Err(error.into()),
            partial: None,
        }
    }

    /// A failed result that still changed recorded state, such as a
    /// recreate whose delete went through.
    #[must_use]
    pub fn failed_after(action: ActionType, change: StateChange, error: impl Into<String>) -> Self {
        Self {
            partial: Some(change),
            ..Self::failed(action, error)
        }
    }

    /// Whether the action succeeded.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Result of executing the entire plan.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionResult {
    /// Individual action results by identity.
    pub results: BTreeMap<String, ActionResult>,
    /// Whether execution was cancelled before every action ran.
    pub cancelled: bool,
}

impl ExecutionResult {
    /// Records the result for an identity.
    pub fn record(&mut self, identity: impl Into<String>, result: ActionResult) {
        self.results.insert(identity.into(), result);
    }

    /// Number of successful actions.
    #[must_use]
    pub fn successful(&self) -> usize {
        self.results.values().filter(|r| r.is_success()).count()
    }

    /// Number of failed actions.
    #[must_use]
    pub fn failed(&self) -> usize {
        self.results.len() - self.successful()
    }

    /// Failure message per identity.
    #[must_use]
    pub fn failures(&self) -> BTreeMap<String, String> {
        self.results
            .iter()
            .filter_map(|(identity, r)| r.outcome.as_ref().err().map(|e| (identity.clone(), e.clone())))
            .collect()
    }

    /// Returns true if all actions succeeded and nothing was cancelled.
    #[must_use]
    pub fn all_successful(&self) -> bool {
        !self.cancelled && self.failed() == 0
    }
}

impl std::fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Executed {} actions: {} successful, {} failed",
            self.results.len(),
            self.successful(),
            self.failed()
        )?;
        if self.cancelled {
            write!(f, " (cancelled)")?;
        }
        Ok(())
    }
}
