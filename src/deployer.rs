//! Deployment driver.
//!
//! The [`Deployer`] runs the phases of one invocation in order: process the
//! bundle, sync state, plan, approve, apply, persist. It holds the state
//! lock for every phase that writes state.

use std::future::Future;
use tracing::{debug, info, warn};

use crate::apply::{ApplyOrchestrator, ApplyOutcome, ApplyReport, Approver, AutoApprove};
use crate::bundle::Pipeline;
use crate::context::DeployContext;
use crate::diag::Diagnostics;
use crate::dyn_value::Value;
use crate::error::{ApplyError, PlanError, Result};
use crate::metadata::Metadata;
use crate::planner::{DeployBackend, Plan, ResourceKey, ResourceSet};
use crate::state::{Operation, ResourceEntry, Snapshot, StateLock, StateStore, StateSync};

/// A bundle that went through the mutator pipeline.
#[derive(Debug, Clone)]
pub struct PreparedBundle {
    /// The processed tree.
    pub tree: Value,
    /// Its resources.
    pub desired: ResourceSet,
    /// Warnings and recommendations from processing.
    pub diagnostics: Diagnostics,
}

/// How a deploy or destroy ended.
#[derive(Debug, Clone)]
pub enum DeployOutcome {
    /// The plan was applied.
    Applied {
        /// The plan that ran.
        plan: Plan,
        /// What was applied.
        report: ApplyReport,
    },
    /// Destructive actions were declined; nothing changed.
    Declined {
        /// The plan that was declined.
        plan: Plan,
    },
}

static AUTO_APPROVE: AutoApprove = AutoApprove;

/// Runs deployment phases for one target.
pub struct Deployer<'a> {
    ctx: &'a DeployContext,
    backend: &'a dyn DeployBackend,
    local: &'a dyn StateStore,
    remote: Option<&'a dyn StateStore>,
    approver: &'a dyn Approver,
}

impl<'a> Deployer<'a> {
    /// Creates a deployer keeping state in `local`.
    #[must_use]
    pub fn new(ctx: &'a DeployContext, backend: &'a dyn DeployBackend, local: &'a dyn StateStore) -> Self {
        Self {
            ctx,
            backend,
            local,
            remote: None,
            approver: &AUTO_APPROVE,
        }
    }

    /// Mirrors state to `remote`.
    #[must_use]
    pub fn with_remote(mut self, remote: Option<&'a dyn StateStore>) -> Self {
        self.remote = remote;
        self
    }

    /// Asks `approver` before destructive actions.
    #[must_use]
    pub fn with_approver(mut self, approver: &'a dyn Approver) -> Self {
        self.approver = approver;
        self
    }

    /// Runs the standard mutator pipeline over a loaded bundle.
    ///
    /// # Errors
    ///
    /// Fails when a mutator reports an error.
    pub fn prepare(&self, tree: Value) -> Result<PreparedBundle> {
        let output = Pipeline::standard().run(tree, self.ctx);
        let diagnostics = output.diagnostics.clone();
        let tree = output.into_tree()?;
        let desired = ResourceSet::from_tree(&tree, self.ctx.table())?;
        debug!("Bundle defines {} resource(s)", desired.len());
        Ok(PreparedBundle {
            tree,
            desired,
            diagnostics,
        })
    }

    /// Pulls newer remote state, then loads the local snapshot.
    ///
    /// An unreadable snapshot is treated as absent.
    async fn load_snapshot(&self) -> Result<Option<Snapshot>> {
        if let Some(remote) = self.remote {
            let companions = self.ctx.companion_blobs();
            StateSync::new(self.local, remote)
                .with_companions(&companions)
                .pull()
                .await?;
        }
        match self.local.load().await {
            Ok(snapshot) => Ok(snapshot),
            Err(e) => {
                warn!("Ignoring unreadable state at {}: {e}", self.local.location());
                Ok(None)
            }
        }
    }

    async fn push(&self) {
        let companions = self.ctx.companion_blobs();
        if let Some(remote) = self.remote
            && let Err(e) = StateSync::new(self.local, remote)
                .with_companions(&companions)
                .push()
                .await
        {
            warn!("Failed to push state to {}: {e}", remote.location());
        }
    }

    async fn locked<T>(&self, phase: impl Future<Output = Result<T>>) -> Result<T> {
        let lock = StateLock::acquire(self.local).await?;
        debug!("Acquired state lock {}", lock.info().lock_id);
        let result = phase.await;
        if let Err(e) = lock.release().await {
            warn!("Failed to release state lock: {e}");
        }
        result
    }

    /// Computes the plan for a prepared bundle without changing anything
    /// remotely.
    ///
    /// Pulling newer remote state rewrites the local cache, so this holds
    /// the state lock too.
    ///
    /// # Errors
    ///
    /// Fails when the state is locked by someone else or the backend
    /// cannot plan.
    pub async fn plan(&self, bundle: &PreparedBundle) -> Result<Plan> {
        self.locked(self.plan_locked(bundle)).await
    }

    async fn plan_locked(&self, bundle: &PreparedBundle) -> Result<Plan> {
        let snapshot = self.load_snapshot().await?;
        self.backend.compute_plan(&bundle.desired, snapshot.as_ref()).await
    }

    /// Plans and applies a prepared bundle.
    ///
    /// # Errors
    ///
    /// Fails when planning fails, or after persisting state when some
    /// resources could not be applied.
    pub async fn deploy(&self, bundle: &PreparedBundle) -> Result<DeployOutcome> {
        self.locked(self.run(bundle, &bundle.desired, Operation::Deploy)).await
    }

    /// Deletes every recorded resource.
    ///
    /// # Errors
    ///
    /// See [`Deployer::deploy`].
    pub async fn destroy(&self, bundle: &PreparedBundle) -> Result<DeployOutcome> {
        self.locked(self.run(bundle, &ResourceSet::default(), Operation::Destroy))
            .await
    }

    async fn run(&self, bundle: &PreparedBundle, desired: &ResourceSet, operation: Operation) -> Result<DeployOutcome> {
        let recorded = self.load_snapshot().await?;
        let plan = self.backend.compute_plan(desired, recorded.as_ref()).await?;
        info!("{plan}");

        let mut snapshot = recorded.unwrap_or_default();
        let settings = self.ctx.settings();
        let orchestrator = ApplyOrchestrator::new(self.approver)
            .with_auto_approve(settings.auto_approve)
            .with_concurrency(settings.concurrency)
            .with_cancellation(self.ctx.cancel_token())
            .with_operation(operation)
            .persist_to(self.local);

        let outcome = orchestrator.apply(&plan, desired, &mut snapshot, self.backend).await;
        match outcome {
            Ok(ApplyOutcome::Applied(report)) => {
                if !report.applied.is_empty() {
                    self.push().await;
                }
                self.write_metadata(bundle, desired, &snapshot).await;
                Ok(DeployOutcome::Applied { plan, report })
            }
            Ok(ApplyOutcome::Declined) => Ok(DeployOutcome::Declined { plan }),
            Err(e) => {
                self.push().await;
                Err(e)
            }
        }
    }

    async fn write_metadata(&self, bundle: &PreparedBundle, desired: &ResourceSet, snapshot: &Snapshot) {
        let metadata = Metadata::build(&bundle.tree, desired, snapshot, self.ctx.bundle_root());
        if let Err(e) = metadata.write_local(&self.ctx.cache_dir()).await {
            warn!("Failed to write deployment metadata: {e}");
        }
        if let Some(remote) = self.remote
            && let Err(e) = metadata.upload(remote).await
        {
            warn!("Failed to upload deployment metadata: {e}");
        }
    }

    fn key_for(bundle: &PreparedBundle, identity: &str) -> Result<ResourceKey> {
        ResourceKey::parse(identity)
            .filter(|key| bundle.desired.contains(&key.identity()))
            .ok_or_else(|| {
                PlanError::UnknownResource {
                    identity: identity.to_string(),
                }
                .into()
            })
    }

    /// Attaches the existing remote object `remote_id` to `identity`.
    ///
    /// # Errors
    ///
    /// Fails when the identity is not in the bundle, is already bound to
    /// another object, or the backend cannot import it.
    pub async fn bind(&self, bundle: &PreparedBundle, identity: &str, remote_id: &str) -> Result<ResourceEntry> {
        let key = Self::key_for(bundle, identity)?;
        self.locked(self.bind_locked(bundle, &key, remote_id)).await
    }

    async fn bind_locked(&self, bundle: &PreparedBundle, key: &ResourceKey, remote_id: &str) -> Result<ResourceEntry> {
        let identity = key.identity();
        let mut snapshot = self.load_snapshot().await?.unwrap_or_default();
        if let Some(existing) = snapshot.get(&identity)
            && existing.id != remote_id
        {
            return Err(ApplyError::ResourceFailed {
                identity,
                reason: format!("already bound to {}; unbind it first", existing.id),
            }
            .into());
        }

        let entry = self.backend.bind(key, remote_id, &bundle.desired).await?;
        snapshot.upsert(identity.clone(), entry.clone());
        snapshot.bump_serial();
        snapshot.add_history(Operation::Bind, vec![identity.clone()], true);
        self.local.save(&snapshot).await?;
        self.push().await;
        info!("Bound {identity} to {}", entry.id);
        Ok(entry)
    }

    /// Forgets `identity` without deleting the remote object.
    ///
    /// # Errors
    ///
    /// Fails when the identity is not in the bundle or not recorded.
    pub async fn unbind(&self, bundle: &PreparedBundle, identity: &str) -> Result<()> {
        let key = Self::key_for(bundle, identity)?;
        self.locked(self.unbind_locked(&key)).await
    }

    async fn unbind_locked(&self, key: &ResourceKey) -> Result<()> {
        let identity = key.identity();
        let mut snapshot = self.load_snapshot().await?.unwrap_or_default();
        if snapshot.get(&identity).is_none() {
            return Err(ApplyError::ResourceFailed {
                identity,
                reason: String::from("not bound to any remote object"),
            }
            .into());
        }

        self.backend.unbind(key).await?;
        snapshot.remove(&identity);
        snapshot.bump_serial();
        snapshot.add_history(Operation::Unbind, vec![identity.clone()], true);
        self.local.save(&snapshot).await?;
        self.push().await;
        info!("Unbound {identity}");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::{RemoteObject, ResourceClient};
    use crate::config::{BundleLoader, EngineSettings};
    use crate::error::{DeckhandError, StateError};
    use crate::interpolation::ResourceTypeTable;
    use crate::metadata::METADATA_FILE;
    use crate::planner::{ActionType, DirectBackend};
    use crate::state::LocalStateStore;
    use async_trait::async_trait;
    use serde_json::Value as Json;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::TempDir;

    /// Remote side kept in memory.
    #[derive(Default)]
    struct InMemoryApi {
        next_id: AtomicU64,
        objects: Mutex<BTreeMap<String, Json>>,
    }

    impl InMemoryApi {
        fn count(&self) -> usize {
            self.objects.lock().expect("lock").len()
        }
    }

    #[async_trait]
    impl ResourceClient for InMemoryApi {
        async fn create(&self, _group: &str, config: &Json) -> Result<RemoteObject> {
            let id = (self.next_id.fetch_add(1, Ordering::SeqCst) + 1).to_string();
            self.objects.lock().expect("lock").insert(id.clone(), config.clone());
            Ok(RemoteObject {
                id,
                etag: None,
                state: config.clone(),
            })
        }

        async fn update(&self, _group: &str, id: &str, _etag: Option<&str>, config: &Json) -> Result<RemoteObject> {
            self.objects.lock().expect("lock").insert(id.to_string(), config.clone());
            Ok(RemoteObject {
                id: id.to_string(),
                etag: None,
                state: config.clone(),
            })
        }

        async fn delete(&self, _group: &str, id: &str) -> Result<()> {
            self.objects.lock().expect("lock").remove(id);
            Ok(())
        }

        async fn read(&self, group: &str, id: &str) -> Result<RemoteObject> {
            let state = self.objects.lock().expect("lock").get(id).cloned().ok_or_else(|| {
                crate::error::ApiError::NotFound {
                    group: group.to_string(),
                    id: id.to_string(),
                }
            })?;
            Ok(RemoteObject {
                id: id.to_string(),
                etag: None,
                state,
            })
        }

        async fn active_runs(&self, _group: &str, _id: &str) -> Result<u32> {
            Ok(0)
        }
    }

    const BUNDLE: &str = r"
bundle:
  name: etl
variables:
  catalog:
    default: main
resources:
  pipelines:
    ingest:
      name: Ingest
      catalog: ${var.catalog}
  jobs:
    nightly:
      name: Nightly
      pipeline_id: ${resources.pipelines.ingest.id}
";

    struct Fixture {
        _dir: TempDir,
        ctx: DeployContext,
        local: LocalStateStore,
        backend: DirectBackend<InMemoryApi>,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().expect("temp dir");
        let settings = EngineSettings {
            auto_approve: true,
            ..EngineSettings::default()
        };
        let ctx = DeployContext::new(dir.path(), "dev", settings);
        let local = ctx.local_store();
        Fixture {
            _dir: dir,
            ctx,
            local,
            backend: DirectBackend::new(InMemoryApi::default(), ResourceTypeTable::default()),
        }
    }

    fn prepare(deployer: &Deployer<'_>, yaml: &str) -> PreparedBundle {
        let tree = BundleLoader::new().parse_yaml(yaml, None).expect("parse");
        deployer.prepare(tree).expect("prepare")
    }

    #[tokio::test]
    async fn test_deploy_records_state_and_metadata() {
        let f = fixture();
        let deployer = Deployer::new(&f.ctx, &f.backend, &f.local);
        let bundle = prepare(&deployer, BUNDLE);

        let outcome = deployer.deploy(&bundle).await.expect("deploy");
        let DeployOutcome::Applied { plan, report } = outcome else {
            panic!("expected an applied outcome");
        };
        assert_eq!(plan.summary().create, 2);
        assert_eq!(report.applied.len(), 2);

        let snapshot = f.local.load().await.expect("load").expect("saved");
        assert_eq!(snapshot.serial, 1);
        let pipeline_id = snapshot.get("pipelines.ingest").expect("pipeline").id.clone();
        let job = snapshot.get("jobs.nightly").expect("job");
        assert_eq!(job.state["pipeline_id"], Json::String(pipeline_id));
        assert!(f.ctx.cache_dir().join(METADATA_FILE).exists());
        assert!(!f.local.is_locked().await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_redeploy_is_a_no_op() {
        let f = fixture();
        let deployer = Deployer::new(&f.ctx, &f.backend, &f.local);
        let bundle = prepare(&deployer, BUNDLE);
        deployer.deploy(&bundle).await.expect("first deploy");

        let plan = deployer.plan(&bundle).await.expect("plan");
        assert!(plan.is_empty(), "{plan}");
        assert!(plan.entries().all(|e| e.action == ActionType::NoOp));

        deployer.deploy(&bundle).await.expect("second deploy");
        let snapshot = f.local.load().await.expect("load").expect("saved");
        assert_eq!(snapshot.serial, 1);
    }

    #[tokio::test]
    async fn test_destroy_removes_everything() {
        let f = fixture();
        let deployer = Deployer::new(&f.ctx, &f.backend, &f.local);
        let bundle = prepare(&deployer, BUNDLE);
        deployer.deploy(&bundle).await.expect("deploy");
        assert_eq!(f.backend_objects(), 2);

        let outcome = deployer.destroy(&bundle).await.expect("destroy");
        assert!(matches!(outcome, DeployOutcome::Applied { .. }));
        let snapshot = f.local.load().await.expect("load").expect("saved");
        assert!(snapshot.resources.is_empty());
        assert_eq!(snapshot.history.last().map(|h| h.operation), Some(Operation::Destroy));
        assert_eq!(f.backend_objects(), 0);
    }

    #[tokio::test]
    async fn test_declined_destroy_changes_nothing() {
        struct Decline;
        impl Approver for Decline {
            fn approve(&self, _destructive: &[&crate::planner::PlanEntry]) -> Result<bool> {
                Ok(false)
            }
        }

        let f = fixture();
        let deployer = Deployer::new(&f.ctx, &f.backend, &f.local);
        let bundle = prepare(&deployer, BUNDLE);
        deployer.deploy(&bundle).await.expect("deploy");

        let interactive = DeployContext::new(f.ctx.bundle_root(), "dev", EngineSettings::default());
        let deployer = Deployer::new(&interactive, &f.backend, &f.local).with_approver(&Decline);
        let outcome = deployer.destroy(&bundle).await.expect("destroy");
        assert!(matches!(outcome, DeployOutcome::Declined { .. }));
        assert_eq!(f.local.load().await.expect("load").expect("saved").serial, 1);
        assert_eq!(f.backend_objects(), 2);
    }

    #[tokio::test]
    async fn test_bind_and_unbind() {
        let f = fixture();
        let existing = f
            .backend_client()
            .create("jobs", &serde_json::json!({"name": "Nightly"}))
            .await
            .expect("create");

        let deployer = Deployer::new(&f.ctx, &f.backend, &f.local);
        let bundle = prepare(&deployer, BUNDLE);

        let entry = deployer.bind(&bundle, "jobs.nightly", &existing.id).await.expect("bind");
        assert_eq!(entry.id, existing.id);
        assert!(f.local.load().await.expect("load").expect("saved").get("jobs.nightly").is_some());

        assert!(matches!(
            deployer.bind(&bundle, "jobs.other", "9").await,
            Err(DeckhandError::Plan(PlanError::UnknownResource { .. }))
        ));

        deployer.unbind(&bundle, "jobs.nightly").await.expect("unbind");
        let snapshot = f.local.load().await.expect("load").expect("saved");
        assert!(snapshot.get("jobs.nightly").is_none());
        assert_eq!(snapshot.serial, 2);
        assert_eq!(f.backend_objects(), 1);
    }

    #[tokio::test]
    async fn test_plan_pulls_remote_state_under_the_lock() {
        let f = fixture();
        let remote_dir = TempDir::new().expect("temp dir");
        let remote = LocalStateStore::with_base_dir(remote_dir.path());
        let deployer = Deployer::new(&f.ctx, &f.backend, &f.local).with_remote(Some(&remote as &dyn StateStore));
        let bundle = prepare(&deployer, BUNDLE);
        deployer.deploy(&bundle).await.expect("deploy");

        // A clean checkout: nothing cached locally, state only remote.
        f.local.remove(crate::state::STATE_FILE).await.expect("remove");

        let other = f.local.acquire_lock("other-host").await.expect("lock");
        assert!(matches!(
            deployer.plan(&bundle).await,
            Err(DeckhandError::State(StateError::LockedByOther { .. }))
        ));
        assert!(f.local.load().await.expect("load").is_none());
        f.local.release_lock(&other.lock_id).await.expect("release");

        let plan = deployer.plan(&bundle).await.expect("plan");
        assert!(plan.is_empty(), "{plan}");
        assert_eq!(f.local.load().await.expect("load").map(|s| s.serial), Some(1));
        assert!(!f.local.is_locked().await.expect("lock state"));
    }

    #[tokio::test]
    async fn test_unreadable_state_plans_from_scratch() {
        let f = fixture();
        f.local.write(crate::state::STATE_FILE, b"not json").await.expect("write");

        let deployer = Deployer::new(&f.ctx, &f.backend, &f.local);
        let bundle = prepare(&deployer, BUNDLE);
        let plan = deployer.plan(&bundle).await.expect("plan");
        assert_eq!(plan.summary().create, 2);
    }

    #[test]
    fn test_prepare_reports_bundle_errors() {
        let f = fixture();
        let deployer = Deployer::new(&f.ctx, &f.backend, &f.local);
        let tree = BundleLoader::new()
            .parse_yaml("resources:\n  jobs:\n    a:\n      name: ${var.missing}\n", None)
            .expect("parse");
        assert!(matches!(
            deployer.prepare(tree),
            Err(DeckhandError::Config(_))
        ));
    }

    impl Fixture {
        fn backend_client(&self) -> &InMemoryApi {
            self.backend.client()
        }

        fn backend_objects(&self) -> usize {
            self.backend_client().count()
        }
    }
}
