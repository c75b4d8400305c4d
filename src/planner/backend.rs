//! Deployment backends.
//!
//! A backend turns a desired [`ResourceSet`] into a [`Plan`] and carries the
//! plan out. [`TerraformBackend`] delegates both steps to a provisioning
//! tool; the direct backend lives in [`super::direct`].
//!
//! The tool keeps its own state in its working directory. That file is
//! synced next to the snapshot, and anything the snapshot records but the
//! tool does not know about is imported before planning.

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::apply::WorkerPool;
use crate::error::{ApplyError, PlanError, Result};
use crate::interpolation::ResourceTypeTable;
use crate::state::{ResourceEntry, Snapshot};

use super::executor::{ActionResult, ExecutionResult, StateChange};
use super::plan::{ActionType, Plan, PlanEntry};
use super::resources::{ResourceKey, ResourceSet};
use super::terraform::{address, convert_state, render_graph, translate_plan};
use super::tool::ProvisioningTool;

/// A way of planning and applying resource changes.
#[async_trait]
pub trait DeployBackend: Send + Sync {
    /// Short name for logs and output.
    fn name(&self) -> &'static str;

    /// Computes the plan for `desired` against the recorded snapshot.
    ///
    /// `None` means nothing is recorded, or the recorded state could not be
    /// read.
    async fn compute_plan(&self, desired: &ResourceSet, snapshot: Option<&Snapshot>) -> Result<Plan>;

    /// Executes the changing entries of `plan`.
    ///
    /// Per-resource failures are reported in the result; an error means the
    /// backend could not run at all.
    async fn execute(
        &self,
        plan: &Plan,
        desired: &ResourceSet,
        snapshot: &Snapshot,
        pool: &WorkerPool,
    ) -> Result<ExecutionResult>;

    /// Refuses destructive work on a resource that is currently busy.
    async fn check_active(&self, entry: &PlanEntry, recorded: &ResourceEntry) -> Result<()> {
        let _ = (entry, recorded);
        Ok(())
    }

    /// Attaches an existing remote object to `key`.
    async fn bind(&self, key: &ResourceKey, remote_id: &str, desired: &ResourceSet) -> Result<ResourceEntry>;

    /// Detaches `key` without deleting the remote object.
    async fn unbind(&self, key: &ResourceKey) -> Result<()>;
}

/// Backend that delegates to a provisioning tool.
#[derive(Debug)]
pub struct TerraformBackend<T> {
    tool: T,
    table: ResourceTypeTable,
}

impl<T: ProvisioningTool> TerraformBackend<T> {
    /// Creates a backend over `tool`.
    #[must_use]
    pub const fn new(tool: T, table: ResourceTypeTable) -> Self {
        Self { tool, table }
    }

    fn address(&self, key: &ResourceKey) -> Result<String> {
        address(&self.table, &key.group, &key.name).ok_or_else(|| {
            PlanError::UnknownGroup {
                group: key.group.clone(),
                locations: Vec::new(),
            }
            .into()
        })
    }

    fn graph(&self, desired: &ResourceSet) -> Result<serde_json::Value> {
        Ok(render_graph(desired, &self.table)?)
    }

    /// Imports recorded resources missing from the tool's own state.
    async fn adopt_recorded(
        &self,
        graph: &serde_json::Value,
        desired: &ResourceSet,
        snapshot: &Snapshot,
    ) -> Result<()> {
        let document = self.tool.show().await?;
        let tracked = convert_state(&document, &self.table).map_err(|e| PlanError::Backend {
            message: format!("Unexpected state document: {e}"),
        })?;

        for (identity, entry) in &snapshot.resources {
            if tracked.contains_key(identity) {
                continue;
            }
            let Some(resource) = desired.get(identity) else {
                warn!("{identity} is recorded but unknown to the provisioning tool; it will not be deleted");
                continue;
            };
            let address = self.address(&resource.key)?;
            info!("Importing recorded {identity} ({}) as {address}", entry.id);
            self.tool.import(graph, &address, &entry.id).await?;
        }
        Ok(())
    }
}

/// Decides the outcome of one entry once the tool has finished.
fn settle(
    entry: &PlanEntry,
    converged: Option<&ResourceEntry>,
    apply_error: Option<&str>,
) -> ActionResult {
    match (entry.action, converged) {
        (ActionType::Delete, None) => ActionResult::succeeded(entry.action, StateChange::Removed),
        (ActionType::Delete, Some(_)) => ActionResult::failed(
            entry.action,
            apply_error.unwrap_or("resource still present after apply"),
        ),
        (ActionType::Create, Some(found)) => {
            ActionResult::succeeded(entry.action, StateChange::Upserted(found.clone()))
        }
        (_, Some(found)) if apply_error.is_none() => {
            ActionResult::succeeded(entry.action, StateChange::Upserted(found.clone()))
        }
        (_, _) => ActionResult::failed(
            entry.action,
            apply_error.unwrap_or("resource missing after apply"),
        ),
    }
}

#[async_trait]
impl<T: ProvisioningTool> DeployBackend for TerraformBackend<T> {
    fn name(&self) -> &'static str {
        "terraform"
    }

    async fn compute_plan(&self, desired: &ResourceSet, snapshot: Option<&Snapshot>) -> Result<Plan> {
        let graph = self.graph(desired)?;
        self.tool.init().await?;
        if let Some(snapshot) = snapshot.filter(|s| !s.resources.is_empty()) {
            self.adopt_recorded(&graph, desired, snapshot).await?;
        }
        let document = self.tool.plan(&graph).await?;
        let plan = translate_plan(&document, desired, &self.table).map_err(|e| PlanError::Backend {
            message: format!("Unexpected plan document: {e}"),
        })?;
        debug!("Provisioning tool planned {} entries", plan.len());
        Ok(plan)
    }

    /// Applies the plan the tool saved in [`DeployBackend::compute_plan`],
    /// so nothing beyond the approved changes runs.
    async fn execute(
        &self,
        plan: &Plan,
        _desired: &ResourceSet,
        _snapshot: &Snapshot,
        pool: &WorkerPool,
    ) -> Result<ExecutionResult> {
        let mut result = ExecutionResult::default();
        if plan.is_empty() {
            return Ok(result);
        }
        if pool.is_cancelled() {
            result.cancelled = true;
            return Ok(result);
        }

        let applied = tokio::select! {
            () = pool.cancel_token().cancelled() => {
                warn!("Apply cancelled while the provisioning tool was running");
                result.cancelled = true;
                None
            }
            applied = self.tool.apply() => Some(applied),
        };

        let apply_error = match applied {
            Some(Err(e)) => {
                warn!("Provisioning tool failed: {e}");
                Some(e.to_string())
            }
            Some(Ok(())) => None,
            None => Some(ApplyError::Cancelled.to_string()),
        };

        let document = self.tool.show().await?;
        let converged = convert_state(&document, &self.table).map_err(|e| ApplyError::Backend {
            message: format!("Unexpected state document: {e}"),
        })?;

        for entry in plan.changes() {
            if entry.action == ActionType::Read {
                continue;
            }
            let identity = entry.identity();
            let outcome = settle(entry, converged.get(&identity), apply_error.as_deref());
            result.record(identity, outcome);
        }

        info!("{result}");
        Ok(result)
    }

    async fn bind(&self, key: &ResourceKey, remote_id: &str, desired: &ResourceSet) -> Result<ResourceEntry> {
        let address = self.address(key)?;
        let graph = self.graph(desired)?;
        self.tool.init().await?;
        self.tool.import(&graph, &address, remote_id).await?;

        let document = self.tool.show().await?;
        let converged = convert_state(&document, &self.table).map_err(|e| ApplyError::Backend {
            message: format!("Unexpected state document: {e}"),
        })?;
        converged.get(&key.identity()).cloned().ok_or_else(|| {
            ApplyError::ResourceFailed {
                identity: key.identity(),
                reason: format!("{address} missing from state after import"),
            }
            .into()
        })
    }

    async fn unbind(&self, key: &ResourceKey) -> Result<()> {
        let address = self.address(key)?;
        self.tool.init().await?;
        self.tool.state_rm(&address).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dyn_value::Value;
    use crate::error::DeckhandError;
    use crate::planner::resources::DesiredResource;
    use crate::planner::tool::MockProvisioningTool;
    use serde_json::json;

    fn desired() -> ResourceSet {
        ResourceSet::from_resources([DesiredResource {
            key: ResourceKey::new("jobs", "etl"),
            config: Value::mapping([("name", Value::from("ETL"))]),
        }])
    }

    fn state(resources: serde_json::Value) -> serde_json::Value {
        json!({"values": {"root_module": {"resources": resources}}})
    }

    #[tokio::test]
    async fn test_compute_plan_translates_tool_output() {
        let mut tool = MockProvisioningTool::new();
        tool.expect_init().times(1).returning(|| Ok(()));
        tool.expect_plan().times(1).returning(|graph| {
            assert!(graph["resource"]["databricks_job"]["etl"].is_object());
            Ok(json!({"resource_changes": [
                {"type": "databricks_job", "name": "etl", "change": {"actions": ["create"]}},
                {"type": "databricks_permissions", "name": "job_etl", "change": {"actions": ["create"]}}
            ]}))
        });

        let backend = TerraformBackend::new(tool, ResourceTypeTable::default());
        let plan = backend.compute_plan(&desired(), None).await.expect("plan");
        assert_eq!(plan.len(), 1);
        assert_eq!(plan.get("jobs.etl").map(|e| e.action), Some(ActionType::Create));
    }

    #[tokio::test]
    async fn test_fresh_working_dir_adopts_recorded_resources() {
        let mut snapshot = Snapshot::new();
        snapshot.upsert("jobs.etl", ResourceEntry::new("11").with_state(json!({"id": "11"})));
        snapshot.upsert("jobs.retired", ResourceEntry::new("12"));

        let mut seq = mockall::Sequence::new();
        let mut tool = MockProvisioningTool::new();
        tool.expect_init().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        tool.expect_show()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|| Ok(json!({"format_version": "1.0"})));
        tool.expect_import()
            .withf(|graph, address, id| {
                graph["resource"]["databricks_job"]["etl"].is_object() && address == "databricks_job.etl" && id == "11"
            })
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _, _| Ok(()));
        tool.expect_plan().times(1).in_sequence(&mut seq).returning(|_| {
            Ok(json!({"resource_changes": [
                {"type": "databricks_job", "name": "etl", "change": {"actions": ["no-op"]}}
            ]}))
        });

        let backend = TerraformBackend::new(tool, ResourceTypeTable::default());
        let plan = backend.compute_plan(&desired(), Some(&snapshot)).await.expect("plan");
        assert!(plan.is_empty());
        assert_eq!(plan.get("jobs.etl").map(|e| e.action), Some(ActionType::NoOp));
    }

    #[tokio::test]
    async fn test_tracked_resources_are_not_imported_again() {
        let mut snapshot = Snapshot::new();
        snapshot.upsert("jobs.etl", ResourceEntry::new("11"));

        let mut tool = MockProvisioningTool::new();
        tool.expect_init().returning(|| Ok(()));
        tool.expect_show().times(1).returning(|| {
            Ok(state(json!([
                {"mode": "managed", "type": "databricks_job", "name": "etl", "values": {"id": "11"}}
            ])))
        });
        tool.expect_import().never();
        tool.expect_plan()
            .returning(|_| Ok(json!({"resource_changes": []})));

        let backend = TerraformBackend::new(tool, ResourceTypeTable::default());
        let plan = backend.compute_plan(&desired(), Some(&snapshot)).await.expect("plan");
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn test_execute_reads_back_state() {
        let mut tool = MockProvisioningTool::new();
        tool.expect_apply().times(1).returning(|| Ok(()));
        tool.expect_show().times(1).returning(|| {
            Ok(state(json!([
                {"mode": "managed", "type": "databricks_job", "name": "etl", "values": {"id": "11"}}
            ])))
        });

        let mut plan = Plan::new();
        plan.insert(PlanEntry::new("jobs", "etl", ActionType::Create));
        plan.insert(PlanEntry::new("jobs", "old", ActionType::Delete));

        let backend = TerraformBackend::new(tool, ResourceTypeTable::default());
        let result = backend
            .execute(&plan, &desired(), &Snapshot::new(), &WorkerPool::default())
            .await
            .expect("execute");

        assert!(result.all_successful());
        assert_eq!(
            result.results["jobs.etl"].outcome,
            Ok(StateChange::Upserted(ResourceEntry::new("11").with_state(json!({"id": "11"}))))
        );
        assert_eq!(result.results["jobs.old"].outcome, Ok(StateChange::Removed));
    }

    #[tokio::test]
    async fn test_failed_apply_keeps_what_converged() {
        let mut tool = MockProvisioningTool::new();
        tool.expect_apply().returning(|| {
            Err(ApplyError::Backend {
                message: String::from("quota exceeded"),
            }
            .into())
        });
        tool.expect_show().returning(|| {
            Ok(state(json!([
                {"mode": "managed", "type": "databricks_job", "name": "etl", "values": {"id": "11"}},
                {"mode": "managed", "type": "databricks_job", "name": "report", "values": {"id": "12"}}
            ])))
        });

        let mut plan = Plan::new();
        plan.insert(PlanEntry::new("jobs", "etl", ActionType::Create));
        plan.insert(PlanEntry::new("jobs", "report", ActionType::Update));
        plan.insert(PlanEntry::new("jobs", "nightly", ActionType::Create));

        let backend = TerraformBackend::new(tool, ResourceTypeTable::default());
        let result = backend
            .execute(&plan, &desired(), &Snapshot::new(), &WorkerPool::default())
            .await
            .expect("execute");

        assert!(result.results["jobs.etl"].is_success());
        assert!(!result.results["jobs.report"].is_success());
        assert!(!result.results["jobs.nightly"].is_success());
        assert!(result.failures()["jobs.nightly"].contains("quota exceeded"));
    }

    #[tokio::test]
    async fn test_bind_imports_and_unbind_removes() {
        let mut tool = MockProvisioningTool::new();
        tool.expect_init().returning(|| Ok(()));
        tool.expect_import()
            .withf(|_, address, id| address == "databricks_job.etl" && id == "77")
            .times(1)
            .returning(|_, _, _| Ok(()));
        tool.expect_show().returning(|| {
            Ok(state(json!([
                {"mode": "managed", "type": "databricks_job", "name": "etl", "values": {"id": "77"}}
            ])))
        });
        tool.expect_state_rm()
            .withf(|address| address == "databricks_job.etl")
            .times(1)
            .returning(|_| Ok(()));

        let backend = TerraformBackend::new(tool, ResourceTypeTable::default());
        let key = ResourceKey::new("jobs", "etl");
        let entry = backend.bind(&key, "77", &desired()).await.expect("bind");
        assert_eq!(entry.id, "77");
        backend.unbind(&key).await.expect("unbind");

        assert!(matches!(
            backend.unbind(&ResourceKey::new("grants", "g")).await,
            Err(DeckhandError::Plan(PlanError::UnknownGroup { .. }))
        ));
    }
}
