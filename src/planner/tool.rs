//! Provisioning tool boundary.
//!
//! The engine drives the tool only through [`ProvisioningTool`].
//! [`TerraformCli`] implements it by running the `terraform` binary inside
//! the target's working directory.

use async_trait::async_trait;
use serde_json::Value as Json;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, info};

use crate::error::{ApplyError, PlanError, Result};
use crate::state::write_atomically;

/// Name of the rendered resource graph inside the working directory.
pub const GRAPH_FILE: &str = "bundle.tf.json";

/// Name of the saved plan inside the working directory.
const PLAN_FILE: &str = "plan.tfplan";

/// Name of the tool's own state file inside the working directory.
pub const TOOL_STATE_FILE: &str = "terraform.tfstate";

/// Operations the engine needs from a provisioning tool.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProvisioningTool: Send + Sync {
    /// Prepares the working directory.
    async fn init(&self) -> Result<()>;

    /// Computes the tool's plan for `graph`, saves it, and returns it as JSON.
    async fn plan(&self, graph: &Json) -> Result<Json>;

    /// Carries out the plan saved by the last [`ProvisioningTool::plan`].
    async fn apply(&self) -> Result<()>;

    /// Returns the tool's state as JSON.
    async fn show(&self) -> Result<Json>;

    /// Attaches the remote object `id` to `address`.
    async fn import(&self, graph: &Json, address: &str, id: &str) -> Result<()>;

    /// Forgets `address` without touching the remote object.
    async fn state_rm(&self, address: &str) -> Result<()>;
}

/// [`ProvisioningTool`] backed by the `terraform` binary.
#[derive(Debug, Clone)]
pub struct TerraformCli {
    binary: PathBuf,
    working_dir: PathBuf,
}

impl TerraformCli {
    /// Creates an adapter running `binary` in `working_dir`.
    #[must_use]
    pub fn new(binary: impl Into<PathBuf>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            working_dir: working_dir.into(),
        }
    }

    /// The working directory.
    #[must_use]
    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Runs the binary and returns its stdout.
    async fn run(&self, args: &[&str]) -> std::result::Result<Vec<u8>, String> {
        debug!("Running {} {}", self.binary.display(), args.join(" "));
        let output = Command::new(&self.binary)
            .args(args)
            .current_dir(&self.working_dir)
            .env("TF_IN_AUTOMATION", "1")
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| format!("Failed to run {}: {e}", self.binary.display()))?;

        if !output.status.success() {
            return Err(format!(
                "terraform {} exited with {}: {}",
                args.first().copied().unwrap_or_default(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ));
        }
        Ok(output.stdout)
    }

    /// Writes the graph, with the provider requirement, into the working directory.
    async fn write_graph(&self, graph: &Json) -> Result<()> {
        tokio::fs::create_dir_all(&self.working_dir).await?;
        let mut document = graph.clone();
        if let Some(object) = document.as_object_mut() {
            object.insert(
                String::from("terraform"),
                serde_json::json!({
                    "required_providers": {"databricks": {"source": "databricks/databricks"}}
                }),
            );
        }
        let bytes = serde_json::to_vec_pretty(&document)
            .map_err(|e| PlanError::Backend {
                message: format!("Failed to serialize resource graph: {e}"),
            })?;
        write_atomically(&self.working_dir.join(GRAPH_FILE), &bytes).await
    }

    fn parse(stdout: &[u8]) -> std::result::Result<Json, String> {
        serde_json::from_slice(stdout).map_err(|e| format!("terraform returned invalid JSON: {e}"))
    }
}

fn plan_error(message: String) -> crate::error::DeckhandError {
    PlanError::Backend { message }.into()
}

fn apply_error(message: String) -> crate::error::DeckhandError {
    ApplyError::Backend { message }.into()
}

#[async_trait]
impl ProvisioningTool for TerraformCli {
    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.working_dir).await?;
        self.run(&["init", "-input=false", "-no-color"])
            .await
            .map_err(plan_error)?;
        Ok(())
    }

    async fn plan(&self, graph: &Json) -> Result<Json> {
        self.write_graph(graph).await?;
        let out = format!("-out={PLAN_FILE}");
        self.run(&["plan", "-input=false", "-no-color", &out])
            .await
            .map_err(plan_error)?;
        let stdout = self
            .run(&["show", "-json", "-no-color", PLAN_FILE])
            .await
            .map_err(plan_error)?;
        Self::parse(&stdout).map_err(plan_error)
    }

    async fn apply(&self) -> Result<()> {
        info!("Applying saved plan in {}", self.working_dir.display());
        self.run(&["apply", "-input=false", "-no-color", PLAN_FILE])
            .await
            .map_err(apply_error)?;
        Ok(())
    }

    async fn show(&self) -> Result<Json> {
        let stdout = self
            .run(&["show", "-json", "-no-color"])
            .await
            .map_err(apply_error)?;
        Self::parse(&stdout).map_err(apply_error)
    }

    async fn import(&self, graph: &Json, address: &str, id: &str) -> Result<()> {
        self.write_graph(graph).await?;
        self.run(&["import", "-input=false", "-no-color", address, id])
            .await
            .map_err(apply_error)?;
        Ok(())
    }

    async fn state_rm(&self, address: &str) -> Result<()> {
        self.run(&["state", "rm", "-no-color", address])
            .await
            .map_err(apply_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_graph_file_carries_provider_requirement() {
        let temp = TempDir::new().expect("temp dir");
        let cli = TerraformCli::new("terraform", temp.path().join("tf"));
        cli.write_graph(&serde_json::json!({"resource": {}}))
            .await
            .expect("write");

        let written: Json = serde_json::from_slice(
            &std::fs::read(temp.path().join("tf").join(GRAPH_FILE)).expect("read"),
        )
        .expect("json");
        assert_eq!(written["resource"], serde_json::json!({}));
        assert_eq!(
            written["terraform"]["required_providers"]["databricks"]["source"],
            "databricks/databricks"
        );
    }

    /// Writes a stand-in binary that logs its arguments to `args.log`.
    #[cfg(unix)]
    fn fake_binary(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("terraform");
        std::fs::write(&path, format!("#!/bin/sh\necho \"$@\" >> args.log\n{body}\n")).expect("write");
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_apply_runs_the_saved_plan() {
        let temp = TempDir::new().expect("temp dir");
        let working = temp.path().join("tf");
        std::fs::create_dir_all(&working).expect("mkdir");
        let cli = TerraformCli::new(fake_binary(temp.path(), "exit 0"), &working);

        cli.apply().await.expect("apply");

        let args = std::fs::read_to_string(working.join("args.log")).expect("args");
        assert_eq!(args.trim(), "apply -input=false -no-color plan.tfplan");
        assert!(!args.contains("-auto-approve"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_dropped_apply_stops_the_tool() {
        let temp = TempDir::new().expect("temp dir");
        let working = temp.path().join("tf");
        std::fs::create_dir_all(&working).expect("mkdir");
        let cli = TerraformCli::new(fake_binary(temp.path(), "sleep 1\ntouch finished"), &working);

        let timed_out = tokio::time::timeout(std::time::Duration::from_millis(200), cli.apply()).await;
        assert!(timed_out.is_err());

        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        assert!(working.join("args.log").exists());
        assert!(!working.join("finished").exists());
    }

    #[tokio::test]
    async fn test_missing_binary_is_a_backend_error() {
        let temp = TempDir::new().expect("temp dir");
        let cli = TerraformCli::new(temp.path().join("no-such-terraform"), temp.path());
        assert!(matches!(
            cli.init().await,
            Err(crate::error::DeckhandError::Plan(PlanError::Backend { .. }))
        ));
    }
}
