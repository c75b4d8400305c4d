//! Backend that talks to the resource API directly.
//!
//! Plans come from a field diff between the desired configuration and the
//! configuration recorded at the last apply. References to resources that
//! are already recorded are replaced by their recorded values first, so a
//! bundle that has not changed since the last apply plans as all no-ops.

use async_trait::async_trait;
use tracing::{debug, error, info};

use crate::api::ResourceClient;
use crate::apply::WorkerPool;
use crate::dyn_value::{Path, Value};
use crate::error::{ApplyError, DeckhandError, PlanError, ReferenceError, Result};
use crate::interpolation::{Lookup, ResourceTypeTable, resolve};
use crate::state::{ResourceEntry, Snapshot};

use super::backend::DeployBackend;
use super::diff::DiffEngine;
use super::executor::{ActionResult, ExecutionResult, StateChange};
use super::graph::{dependencies, execution_levels};
use super::plan::{ActionType, Plan, PlanEntry};
use super::resources::{DesiredResource, ResourceKey, ResourceSet};

/// Groups whose objects can have active runs.
const RUN_GROUPS: &[&str] = &["jobs", "pipelines"];

/// Replaces references to recorded resources with their recorded values.
///
/// `${resources.<g>.<n>.id}` becomes the remote id; any other attribute is
/// read from the recorded configuration. Tokens that cannot be answered are
/// left as written.
///
/// # Errors
///
/// Fails when a non-scalar attribute is embedded in text.
pub fn resolve_recorded(config: &Value, recorded: &Snapshot) -> std::result::Result<Value, ReferenceError> {
    resolve(config.clone(), |path: &Path| {
        let (Some("resources"), Some(group), Some(name)) = (path.key_at(0), path.key_at(1), path.key_at(2))
        else {
            return Ok(Lookup::Skip);
        };
        if path.len() < 4 {
            return Ok(Lookup::Skip);
        }
        let Some(entry) = recorded.get(&format!("{group}.{name}")) else {
            return Ok(Lookup::Skip);
        };
        if path.len() == 4 && path.key_at(3) == Some("id") {
            return Ok(Lookup::Value(Value::string(entry.id.clone())));
        }
        let state = Value::from_json(entry.state.clone());
        Ok(state
            .get(&path.suffix(3))
            .map_or(Lookup::Skip, |v| Lookup::Value(v.clone())))
    })
}

/// Backend over a [`ResourceClient`].
#[derive(Debug)]
pub struct DirectBackend<C> {
    client: C,
    table: ResourceTypeTable,
    fail_on_active_runs: bool,
}

impl<C: ResourceClient> DirectBackend<C> {
    /// Creates a backend over `client`.
    #[must_use]
    pub const fn new(client: C, table: ResourceTypeTable) -> Self {
        Self {
            client,
            table,
            fail_on_active_runs: false,
        }
    }

    /// The underlying API client.
    #[must_use]
    pub const fn client(&self) -> &C {
        &self.client
    }

    /// Refuse destructive changes to jobs and pipelines with active runs.
    #[must_use]
    pub const fn with_fail_on_active_runs(mut self, fail: bool) -> Self {
        self.fail_on_active_runs = fail;
        self
    }

    /// Runs one entry against the API.
    async fn run_unit(
        &self,
        entry: &PlanEntry,
        resource: Option<&DesiredResource>,
        working: &Snapshot,
    ) -> Result<StateChange> {
        let identity = entry.identity();
        let group = entry.group.as_str();
        let recorded = working.get(&identity);

        if entry.action == ActionType::Delete {
            if let Some(recorded) = recorded {
                self.client.delete(group, &recorded.id).await?;
            }
            debug!("Deleted {identity}");
            return Ok(StateChange::Removed);
        }

        let resource = resource.ok_or_else(|| PlanError::UnknownResource {
            identity: identity.clone(),
        })?;
        let config = resolve_recorded(&resource.config, working)?;
        if let Some(missing) = dependencies(&config).into_iter().next() {
            return Err(ApplyError::ResourceFailed {
                identity,
                reason: format!("depends on {missing}, which has not been applied"),
            }
            .into());
        }
        let body = config.to_json();

        let object = match (entry.action, recorded) {
            (ActionType::Update, Some(recorded)) => {
                self.client
                    .update(group, &recorded.id, recorded.etag.as_deref(), &body)
                    .await?
            }
            (ActionType::Recreate, Some(recorded)) => {
                self.client.delete(group, &recorded.id).await?;
                self.client.create(group, &body).await.map_err(|e| ApplyError::RecreateIncomplete {
                    identity: identity.clone(),
                    reason: e.to_string(),
                })?
            }
            (ActionType::Create | ActionType::Update | ActionType::Recreate, _) => {
                self.client.create(group, &body).await?
            }
            (action, _) => {
                return Err(DeckhandError::internal(format!(
                    "{identity}: nothing to execute for {action}"
                )));
            }
        };
        debug!("{} {identity} -> {}", entry.action, object.id);

        Ok(StateChange::Upserted(
            ResourceEntry::new(object.id)
                .with_etag(object.etag)
                .with_state(body),
        ))
    }
}

#[async_trait]
impl<C: ResourceClient> DeployBackend for DirectBackend<C> {
    fn name(&self) -> &'static str {
        "direct"
    }

    async fn compute_plan(&self, desired: &ResourceSet, snapshot: Option<&Snapshot>) -> Result<Plan> {
        // Entries that will be recreated are dropped from `known` so their
        // dependents diff against the unresolved token instead of the old id.
        let mut known = snapshot.cloned().unwrap_or_default();
        loop {
            let mut resolved = Vec::with_capacity(desired.len());
            for resource in desired.iter() {
                let config = resolve_recorded(&resource.config, &known)?;
                resolved.push((resource.key.clone(), config.to_json()));
            }

            let plan = DiffEngine::new().compute(resolved, snapshot);
            let replaced: Vec<String> = plan
                .entries()
                .filter(|e| e.action == ActionType::Recreate && known.get(&e.identity()).is_some())
                .map(PlanEntry::identity)
                .collect();
            if replaced.is_empty() {
                execution_levels(&plan, desired)?;
                return Ok(plan);
            }
            for identity in &replaced {
                debug!("{identity} gets a new id; replanning its dependents");
                known.remove(identity);
            }
        }
    }

    async fn execute(
        &self,
        plan: &Plan,
        desired: &ResourceSet,
        snapshot: &Snapshot,
        pool: &WorkerPool,
    ) -> Result<ExecutionResult> {
        let levels = execution_levels(plan, desired)?;
        let mut working = snapshot.clone();
        let mut result = ExecutionResult::default();

        for (depth, level) in levels.iter().enumerate() {
            if pool.is_cancelled() {
                result.cancelled = true;
                break;
            }
            debug!("Level {depth}: {}", level.join(", "));

            let units = level.iter().filter_map(|identity| {
                let entry = plan.get(identity)?;
                Some((
                    identity.clone(),
                    self.run_unit(entry, desired.get(identity), &working),
                ))
            }).collect::<Vec<_>>();
            let batch = pool.collect_all(units).await;

            for (identity, outcome) in batch.results {
                let action = plan.get(&identity).map_or(ActionType::NoOp, |e| e.action);
                match outcome {
                    Ok(change) => {
                        match &change {
                            StateChange::Upserted(entry) => working.upsert(identity.clone(), entry.clone()),
                            StateChange::Removed => {
                                working.remove(&identity);
                            }
                        }
                        result.record(identity, ActionResult::succeeded(action, change));
                    }
                    Err(e @ DeckhandError::Apply(ApplyError::RecreateIncomplete { .. })) => {
                        error!("{e}");
                        working.remove(&identity);
                        result.record(
                            identity,
                            ActionResult::failed_after(action, StateChange::Removed, e.to_string()),
                        );
                    }
                    Err(e) => {
                        error!("Failed to {action} {identity}: {e}");
                        result.record(identity, ActionResult::failed(action, e.to_string()));
                    }
                }
            }

            if batch.cancelled {
                result.cancelled = true;
                break;
            }
        }

        info!("{result}");
        Ok(result)
    }

    async fn check_active(&self, entry: &PlanEntry, recorded: &ResourceEntry) -> Result<()> {
        if !self.fail_on_active_runs || !RUN_GROUPS.contains(&entry.group.as_str()) {
            return Ok(());
        }
        let count = self.client.active_runs(&entry.group, &recorded.id).await?;
        if count > 0 {
            return Err(ApplyError::ActiveRuns {
                identity: entry.identity(),
                count,
            }
            .into());
        }
        Ok(())
    }

    async fn bind(&self, key: &ResourceKey, remote_id: &str, _desired: &ResourceSet) -> Result<ResourceEntry> {
        if !self.table.knows_group(&key.group) {
            return Err(PlanError::UnknownGroup {
                group: key.group.clone(),
                locations: Vec::new(),
            }
            .into());
        }
        let object = self.client.read(&key.group, remote_id).await?;
        Ok(ResourceEntry::new(object.id)
            .with_etag(object.etag)
            .with_state(object.state))
    }

    async fn unbind(&self, key: &ResourceKey) -> Result<()> {
        debug!("Unbinding {key}; nothing to do remotely");
        Ok(())
    }
}
