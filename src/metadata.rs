//! Deployment metadata artifact.
//!
//! After a successful apply the engine writes `metadata.json` describing
//! what was deployed where, for consumers that should not need to read the
//! state file.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::dyn_value::Value;
use crate::error::{Result, StateError};
use crate::planner::ResourceSet;
use crate::state::{Snapshot, StateStore, write_atomically};

/// Current metadata format version.
pub const METADATA_VERSION: u32 = 1;

/// Name of the metadata blob.
pub const METADATA_FILE: &str = "metadata.json";

/// The metadata document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    /// Format version.
    pub version: u32,
    /// Deployed configuration summary.
    pub config: MetadataConfig,
}

/// Configuration section of [`Metadata`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataConfig {
    /// Bundle information.
    pub bundle: BundleInfo,
    /// Workspace information.
    pub workspace: WorkspaceInfo,
    /// Deployed resources by group and name.
    pub resources: BTreeMap<String, BTreeMap<String, ResourceInfo>>,
}

/// Bundle section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleInfo {
    /// Deployment target.
    pub target: String,
    /// Source control details, when the bundle carries them.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git: Option<GitInfo>,
}

/// Source control details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    /// Branch name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    /// Commit hash.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    /// Remote URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_url: Option<String>,
}

/// Workspace section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkspaceInfo {
    /// Remote folder holding the deployed files.
    #[serde(default)]
    pub file_path: String,
}

/// One deployed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    /// Remote identifier.
    pub id: String,
    /// File defining the resource, relative to the bundle root.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relative_path: Option<String>,
}

impl Metadata {
    /// Builds metadata for a resolved bundle tree and its snapshot.
    ///
    /// Only resources that are both desired and recorded are listed.
    #[must_use]
    pub fn build(tree: &Value, desired: &ResourceSet, snapshot: &Snapshot, bundle_root: &Path) -> Self {
        let text = |keys: &[&str]| -> Option<String> {
            let mut node = tree;
            for key in keys {
                node = node.get_key(key)?;
            }
            node.as_str().map(String::from)
        };

        let git = tree.get_key("bundle").and_then(|b| b.get_key("git")).map(|_| GitInfo {
            branch: text(&["bundle", "git", "branch"]),
            commit: text(&["bundle", "git", "commit"]),
            origin_url: text(&["bundle", "git", "origin_url"]),
        });

        let mut resources: BTreeMap<String, BTreeMap<String, ResourceInfo>> = BTreeMap::new();
        for resource in desired.iter() {
            let Some(entry) = snapshot.get(&resource.key.identity()) else {
                continue;
            };
            let relative_path = resource.config.locations().first().map(|location| {
                Path::new(&location.file)
                    .strip_prefix(bundle_root)
                    .map_or_else(|_| location.file.clone(), |p| p.display().to_string())
            });
            resources.entry(resource.key.group.clone()).or_default().insert(
                resource.key.name.clone(),
                ResourceInfo {
                    id: entry.id.clone(),
                    relative_path,
                },
            );
        }

        Self {
            version: METADATA_VERSION,
            config: MetadataConfig {
                bundle: BundleInfo {
                    target: text(&["bundle", "target"]).unwrap_or_default(),
                    git,
                },
                workspace: WorkspaceInfo {
                    file_path: text(&["workspace", "file_path"]).unwrap_or_default(),
                },
                resources,
            },
        }
    }

    /// Serializes the document.
    ///
    /// # Errors
    ///
    /// Fails only if serialization fails.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serde_json::to_vec_pretty(self)
            .map_err(|e| StateError::serialization(format!("Failed to serialize metadata: {e}")).into())
    }

    /// Writes the document into `dir`.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be written.
    pub async fn write_local(&self, dir: &Path) -> Result<()> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StateError::filesystem(format!("Failed to create {}: {e}", dir.display())))?;
        let path = dir.join(METADATA_FILE);
        write_atomically(&path, &self.to_bytes()?).await?;
        debug!("Wrote {}", path.display());
        Ok(())
    }

    /// Uploads the document next to the remote state.
    ///
    /// # Errors
    ///
    /// Propagates store errors.
    pub async fn upload(&self, store: &dyn StateStore) -> Result<()> {
        store.write(METADATA_FILE, &self.to_bytes()?).await?;
        debug!("Uploaded metadata to {}", store.location());
        Ok(())
    }
}
