//! Translation between bundle references and provisioning-tool references.
//!
//! Bundles refer to resources as `${resources.<group>.<name>.<attr>}`. The
//! provisioning tool addresses the same object as `${<type>.<name>.<attr>}`.
//! The two rewrites below are exact inverses of each other.

use crate::dyn_value::{Path, PathComponent, Value};
use crate::error::ReferenceError;

use super::reference::token_for;
use super::resolver::{Lookup, resolve};

/// Provider resource types and the bundle groups they belong to.
///
/// Permission and grant objects are managed alongside their parent resource
/// and intentionally have no entry, which keeps them out of user-facing
/// plans.
const DEFAULT_TYPES: &[(&str, &str)] = &[
    ("databricks_job", "jobs"),
    ("databricks_pipeline", "pipelines"),
    ("databricks_mlflow_model", "models"),
    ("databricks_mlflow_experiment", "experiments"),
    ("databricks_model_serving", "model_serving_endpoints"),
    ("databricks_registered_model", "registered_models"),
    ("databricks_quality_monitor", "quality_monitors"),
    ("databricks_schema", "schemas"),
    ("databricks_volume", "volumes"),
    ("databricks_cluster", "clusters"),
    ("databricks_dashboard", "dashboards"),
    ("databricks_app", "apps"),
    ("databricks_secret_scope", "secret_scopes"),
    ("databricks_sql_endpoint", "sql_warehouses"),
    ("databricks_database_instance", "database_instances"),
];

/// Bidirectional table between provider types and bundle groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceTypeTable {
    entries: Vec<(String, String)>,
}

impl Default for ResourceTypeTable {
    fn default() -> Self {
        Self::new(DEFAULT_TYPES.iter().map(|(t, g)| ((*t).to_string(), (*g).to_string())))
    }
}

impl ResourceTypeTable {
    /// Builds a table from `(provider_type, group)` pairs.
    pub fn new(entries: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Group for a provider type.
    #[must_use]
    pub fn group_for(&self, provider_type: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(t, _)| t == provider_type)
            .map(|(_, g)| g.as_str())
    }

    /// Provider type for a group.
    #[must_use]
    pub fn type_for(&self, group: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, g)| g == group)
            .map(|(t, _)| t.as_str())
    }

    /// True when the group is managed by this engine.
    #[must_use]
    pub fn knows_group(&self, group: &str) -> bool {
        self.type_for(group).is_some()
    }

    /// All groups, in table order.
    pub fn groups(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(_, g)| g.as_str())
    }
}

/// Rewrites `${resources.<group>.<name>...}` into `${<type>.<name>...}`.
///
/// Tokens outside the `resources` namespace, and tokens whose group has no
/// provider type, are left as written.
///
/// # Errors
///
/// Propagates resolver failures; the lookup itself never fails.
pub fn rewrite_to_backend(tree: Value, table: &ResourceTypeTable) -> Result<Value, ReferenceError> {
    resolve(tree, |path| {
        if path.key_at(0) != Some("resources") || path.len() < 3 {
            return Ok(Lookup::Skip);
        }
        let Some(provider_type) = path.key_at(1).and_then(|group| table.type_for(group)) else {
            return Ok(Lookup::Skip);
        };
        let mut components = vec![PathComponent::Key(provider_type.to_string())];
        components.extend(path.suffix(2).components().iter().cloned());
        Ok(Lookup::Value(Value::string(token_for(&Path::new(components)))))
    })
}

/// Rewrites `${<type>.<name>...}` back into `${resources.<group>.<name>...}`.
///
/// Canonical tokens and tokens in an unknown vocabulary are left as written.
///
/// # Errors
///
/// Propagates resolver failures; the lookup itself never fails.
pub fn reverse_resolve(tree: Value, table: &ResourceTypeTable) -> Result<Value, ReferenceError> {
    resolve(tree, |path| {
        if path.len() < 2 {
            return Ok(Lookup::Skip);
        }
        let Some(group) = path.key_at(0).and_then(|t| table.group_for(t)) else {
            return Ok(Lookup::Skip);
        };
        let canonical = Path::from_keys(["resources", group]).join(&path.suffix(1));
        Ok(Lookup::Value(Value::string(token_for(&canonical))))
    })
}
