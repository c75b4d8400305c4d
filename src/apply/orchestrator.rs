//! Apply orchestration.
//!
//! Runs a plan through three strictly sequential phases: the approval gate
//! for destructive actions, a fail-fast pre-flight check, and execution.
//! Results are merged into the snapshot only after execution has drained,
//! one unit at a time, and the snapshot is persisted before any failure is
//! reported.

use serde::Serialize;
use std::collections::BTreeMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{ApplyError, Result};
use crate::planner::{ActionType, DeployBackend, ExecutionResult, Plan, ResourceSet, StateChange};
use crate::state::{Operation, Snapshot, StateStore};

use super::approval::Approver;
use super::pool::{DEFAULT_CONCURRENCY, WorkerPool};

/// What an apply achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ApplyReport {
    /// Action applied per identity.
    pub applied: BTreeMap<String, ActionType>,
    /// Failure message per identity.
    pub failed: BTreeMap<String, String>,
    /// Snapshot serial after the apply.
    pub serial: u64,
}

impl ApplyReport {
    /// True when nothing failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

impl std::fmt::Display for ApplyReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Applied {} change(s), {} failed (serial {})",
            self.applied.len(),
            self.failed.len(),
            self.serial
        )
    }
}

/// Result of a completed apply sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The plan ran to completion.
    Applied(ApplyReport),
    /// Destructive actions were declined; nothing changed.
    Declined,
}

/// Drives a plan through approval, pre-flight and execution.
pub struct ApplyOrchestrator<'a> {
    approver: &'a dyn Approver,
    auto_approve: bool,
    concurrency: usize,
    cancel: CancellationToken,
    store: Option<&'a dyn StateStore>,
    operation: Operation,
}

impl<'a> ApplyOrchestrator<'a> {
    /// Creates an orchestrator asking `approver` before destructive actions.
    #[must_use]
    pub fn new(approver: &'a dyn Approver) -> Self {
        Self {
            approver,
            auto_approve: false,
            concurrency: DEFAULT_CONCURRENCY,
            cancel: CancellationToken::new(),
            store: None,
            operation: Operation::Deploy,
        }
    }

    /// Skips the approval gate.
    #[must_use]
    pub const fn with_auto_approve(mut self, auto_approve: bool) -> Self {
        self.auto_approve = auto_approve;
        self
    }

    /// Sets the per-phase concurrency limit.
    #[must_use]
    pub const fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Uses `cancel` to stop in-flight work.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Persists the snapshot to `store` after merging.
    #[must_use]
    pub fn persist_to(mut self, store: &'a dyn StateStore) -> Self {
        self.store = Some(store);
        self
    }

    /// Operation recorded in the snapshot history.
    #[must_use]
    pub const fn with_operation(mut self, operation: Operation) -> Self {
        self.operation = operation;
        self
    }

    fn pool(&self) -> WorkerPool {
        WorkerPool::new(self.concurrency, self.cancel.clone())
    }

    /// Applies `plan` and merges the results into `snapshot`.
    ///
    /// # Errors
    ///
    /// Fails before anything changes when the pre-flight check fails. Once
    /// execution started, the successful units are merged and persisted
    /// first; then [`ApplyError::Cancelled`] or [`ApplyError::Partial`] is
    /// returned if anything did not complete.
    pub async fn apply(
        &self,
        plan: &Plan,
        desired: &ResourceSet,
        snapshot: &mut Snapshot,
        backend: &dyn DeployBackend,
    ) -> Result<ApplyOutcome> {
        if plan.is_empty() {
            info!("No changes to apply");
            return Ok(ApplyOutcome::Applied(ApplyReport {
                serial: snapshot.serial,
                ..ApplyReport::default()
            }));
        }

        let destructive = plan.destructive();
        if !destructive.is_empty() && !self.auto_approve && !self.approver.approve(&destructive)? {
            info!("Destructive actions declined; nothing was changed");
            return Ok(ApplyOutcome::Declined);
        }

        info!("Checking {} destructive action(s) for active work", destructive.len());
        let recorded = &*snapshot;
        self.pool()
            .fail_fast(destructive.iter().filter_map(|entry| {
                let identity = entry.identity();
                let existing = recorded.get(&identity)?;
                Some((identity, backend.check_active(entry, existing)))
            }))
            .await?;

        info!("Applying {} change(s) with {}", plan.changes().count(), backend.name());
        let result = backend.execute(plan, desired, snapshot, &self.pool()).await?;
        let report = self.merge(snapshot, &result);

        if (!report.applied.is_empty() || !report.failed.is_empty())
            && let Some(store) = self.store
        {
            store.save(snapshot).await?;
            debug!("Persisted snapshot serial {} to {}", snapshot.serial, store.location());
        }

        if result.cancelled {
            warn!("Apply cancelled after {} change(s)", report.applied.len());
            return Err(ApplyError::Cancelled.into());
        }
        if !report.failed.is_empty() {
            return Err(ApplyError::Partial {
                failed: report.failed,
            }
            .into());
        }

        info!("{report}");
        Ok(ApplyOutcome::Applied(report))
    }

    /// Merges units one at a time and bumps the serial once.
    ///
    /// A failed unit still contributes its partial change, so state never
    /// keeps an object the unit already deleted.
    fn merge(&self, snapshot: &mut Snapshot, result: &ExecutionResult) -> ApplyReport {
        let mut report = ApplyReport::default();
        let mut changed = false;

        for (identity, unit) in &result.results {
            let change = match &unit.outcome {
                Ok(change) => {
                    report.applied.insert(identity.clone(), unit.action);
                    Some(change)
                }
                Err(message) => {
                    error!("{identity}: {message}");
                    report.failed.insert(identity.clone(), message.clone());
                    unit.partial.as_ref()
                }
            };
            match change {
                Some(StateChange::Upserted(entry)) => snapshot.upsert(identity.clone(), entry.clone()),
                Some(StateChange::Removed) => {
                    snapshot.remove(identity);
                }
                None => continue,
            }
            changed = true;
        }

        if changed {
            snapshot.bump_serial();
        }
        if !report.applied.is_empty() || !report.failed.is_empty() {
            snapshot.add_history(
                self.operation,
                result.results.keys().cloned().collect(),
                report.failed.is_empty() && !result.cancelled,
            );
        }
        report.serial = snapshot.serial;
        report
    }
}
