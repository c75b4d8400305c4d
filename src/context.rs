//! Per-invocation deployment context.
//!
//! Everything one engine invocation needs travels in a [`DeployContext`]:
//! where the bundle lives, which target is deployed, the engine settings and
//! the cancellation token. Nothing is cached in globals.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::api::HttpResourceClient;
use crate::config::{BackendKind, EngineSettings, StateBackend};
use crate::error::Result;
use crate::interpolation::ResourceTypeTable;
use crate::planner::{DeployBackend, DirectBackend, TOOL_STATE_FILE, TerraformBackend, TerraformCli};
use crate::state::{CACHE_DIR, LocalStateStore, S3StateStore, StateStore};

/// Directory of the provisioning tool inside a target's cache directory.
const TERRAFORM_DIR: &str = "terraform";

/// Delay between API retries; multiplied by the attempt number.
const RETRY_DELAY: Duration = Duration::from_millis(1000);

/// Context of one engine invocation.
#[derive(Debug, Clone)]
pub struct DeployContext {
    bundle_root: PathBuf,
    target: String,
    settings: EngineSettings,
    table: ResourceTypeTable,
    variables: BTreeMap<String, String>,
    cancel: CancellationToken,
}

impl DeployContext {
    /// Creates a context for `target` of the bundle rooted at `bundle_root`.
    #[must_use]
    pub fn new(bundle_root: impl Into<PathBuf>, target: impl Into<String>, settings: EngineSettings) -> Self {
        Self {
            bundle_root: bundle_root.into(),
            target: target.into(),
            settings,
            table: ResourceTypeTable::default(),
            variables: BTreeMap::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Sets variable values given on the command line.
    #[must_use]
    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    /// Replaces the resource type table.
    #[must_use]
    pub fn with_table(mut self, table: ResourceTypeTable) -> Self {
        self.table = table;
        self
    }

    /// Uses `cancel` for in-flight work.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Directory holding the bundle file.
    #[must_use]
    pub fn bundle_root(&self) -> &Path {
        &self.bundle_root
    }

    /// Deployment target.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Engine settings.
    #[must_use]
    pub const fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Resource type table.
    #[must_use]
    pub const fn table(&self) -> &ResourceTypeTable {
        &self.table
    }

    /// Variable values given on the command line.
    #[must_use]
    pub const fn variables(&self) -> &BTreeMap<String, String> {
        &self.variables
    }

    /// Cancellation token shared by every phase.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Per-target cache directory.
    #[must_use]
    pub fn cache_dir(&self) -> PathBuf {
        self.bundle_root.join(CACHE_DIR).join(&self.target)
    }

    /// Local state store of the target.
    #[must_use]
    pub fn local_store(&self) -> LocalStateStore {
        LocalStateStore::for_target(&self.bundle_root, &self.target)
    }

    /// Blobs of the configured backend that are synced along with the
    /// state file, named relative to the cache directory.
    #[must_use]
    pub fn companion_blobs(&self) -> Vec<String> {
        match self.settings.backend {
            BackendKind::Terraform => vec![format!("{TERRAFORM_DIR}/{TOOL_STATE_FILE}")],
            BackendKind::Direct => Vec::new(),
        }
    }

    /// Remote state store, when one is configured.
    pub async fn remote_store(&self) -> Option<S3StateStore> {
        let state = &self.settings.state;
        if state.backend != StateBackend::S3 {
            return None;
        }
        let bucket = state.bucket.as_deref()?;
        let prefix = match state.prefix.as_deref() {
            Some(prefix) => format!("{}/{}", prefix.trim_end_matches('/'), self.target),
            None => self.target.clone(),
        };
        debug!("Remote state at s3://{bucket}/{prefix}");
        Some(S3StateStore::new(bucket, Some(&prefix), state.region.as_deref()).await)
    }

    /// Remote store as a trait object, falling back to nothing.
    pub async fn remote_state_store(&self) -> Option<Box<dyn StateStore>> {
        self.remote_store()
            .await
            .map(|store| Box::new(store) as Box<dyn StateStore>)
    }

    /// Builds the configured deployment backend.
    ///
    /// # Errors
    ///
    /// Fails when the direct backend lacks a host or token.
    pub fn backend(&self) -> Result<Box<dyn DeployBackend>> {
        match self.settings.backend {
            BackendKind::Terraform => {
                let tool = TerraformCli::new(
                    &self.settings.terraform.binary,
                    self.cache_dir().join(TERRAFORM_DIR),
                );
                Ok(Box::new(TerraformBackend::new(tool, self.table.clone())))
            }
            BackendKind::Direct => {
                let api = &self.settings.api;
                let client = HttpResourceClient::with_timeout(
                    self.settings.api_host()?,
                    &self.settings.api_token()?,
                    api.timeout_secs,
                )?
                .with_retry(api.max_retries, RETRY_DELAY);
                Ok(Box::new(
                    DirectBackend::new(client, self.table.clone())
                        .with_fail_on_active_runs(self.settings.fail_on_active_runs),
                ))
            }
        }
    }
}
