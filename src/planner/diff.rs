//! Field-level diff between desired configuration and recorded state.
//!
//! Used by the direct backend, which has no external tool to classify
//! changes. Mappings are compared key by key, sequences element by element
//! when their lengths match and as a whole otherwise.

use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::dyn_value::Path;
use crate::state::Snapshot;

use super::plan::{ActionType, FieldChange, Plan, PlanEntry};
use super::resources::ResourceKey;

/// Top-level fields whose change forces a recreate, per group.
const RECREATE_FIELDS: &[(&str, &[&str])] = &[
    ("schemas", &["catalog_name", "name"]),
    (
        "volumes",
        &["catalog_name", "schema_name", "name", "volume_type", "storage_location"],
    ),
    ("registered_models", &["catalog_name", "schema_name", "name"]),
    ("pipelines", &["storage"]),
    ("apps", &["name"]),
    ("model_serving_endpoints", &["name"]),
    ("database_instances", &["name"]),
    ("quality_monitors", &["table_name"]),
];

/// Engine for computing diffs between desired and recorded state.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiffEngine;

impl DiffEngine {
    /// Creates a new diff engine.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Fields of `group` that cannot be changed in place.
    #[must_use]
    pub fn recreate_fields(group: &str) -> &'static [&'static str] {
        RECREATE_FIELDS
            .iter()
            .find(|(g, _)| *g == group)
            .map_or(&[], |(_, fields)| fields)
    }

    /// Lists every difference between `old` and `new`.
    #[must_use]
    pub fn diff_fields(old: &Json, new: &Json) -> Vec<FieldChange> {
        let mut changes = Vec::new();
        diff_into(&Path::root(), Some(old), Some(new), &mut changes);
        changes
    }

    /// Classifies one resource present on both sides.
    #[must_use]
    pub fn classify(key: &ResourceKey, recorded: &Json, desired: &Json) -> PlanEntry {
        let forcing = Self::recreate_fields(&key.group);
        let mut changes = Self::diff_fields(recorded, desired);
        for change in &mut changes {
            change.forces_recreate = top_level_field(&change.path).is_some_and(|f| forcing.contains(&f));
        }

        let action = if changes.is_empty() {
            ActionType::NoOp
        } else if changes.iter().any(|c| c.forces_recreate) {
            ActionType::Recreate
        } else {
            ActionType::Update
        };
        debug!("{key}: {action} ({} changed fields)", changes.len());
        PlanEntry::new(key.group.clone(), key.name.clone(), action).with_changes(changes)
    }

    /// Computes a plan from resolved desired configurations and a snapshot.
    ///
    /// Identities only in the snapshot are deleted, identities only in the
    /// desired set are created.
    #[must_use]
    pub fn compute(
        &self,
        desired: impl IntoIterator<Item = (ResourceKey, Json)>,
        snapshot: Option<&Snapshot>,
    ) -> Plan {
        let mut plan = Plan::new();

        for (key, config) in desired {
            let identity = key.identity();
            match snapshot.and_then(|s| s.get(&identity)) {
                Some(recorded) => plan.insert(Self::classify(&key, &recorded.state, &config)),
                None => {
                    debug!("{identity}: not recorded, create");
                    plan.insert(PlanEntry::new(key.group, key.name, ActionType::Create));
                }
            }
        }

        if let Some(snapshot) = snapshot {
            for identity in snapshot.identities() {
                if plan.contains(identity) {
                    continue;
                }
                match ResourceKey::parse(identity) {
                    Some(key) => {
                        debug!("{identity}: no longer in bundle, delete");
                        plan.insert(PlanEntry::new(key.group, key.name, ActionType::Delete));
                    }
                    None => warn!("Ignoring malformed identity '{identity}' in state"),
                }
            }
        }

        plan
    }
}

fn top_level_field(path: &str) -> Option<&str> {
    let end = path.find(['.', '[']).unwrap_or(path.len());
    let field = &path[..end];
    (!field.is_empty()).then_some(field)
}

fn diff_into(path: &Path, old: Option<&Json>, new: Option<&Json>, changes: &mut Vec<FieldChange>) {
    match (old, new) {
        (Some(Json::Object(old)), Some(Json::Object(new))) => {
            for (key, new_value) in new {
                diff_into(&path.key(key.clone()), old.get(key), Some(new_value), changes);
            }
            for (key, old_value) in old {
                if !new.contains_key(key) {
                    diff_into(&path.key(key.clone()), Some(old_value), None, changes);
                }
            }
        }
        (Some(Json::Array(old)), Some(Json::Array(new))) if old.len() == new.len() => {
            for (i, (o, n)) in old.iter().zip(new).enumerate() {
                diff_into(&path.index(i), Some(o), Some(n), changes);
            }
        }
        (old, new) if old != new => changes.push(FieldChange {
            path: path.to_string(),
            old: old.cloned(),
            new: new.cloned(),
            forces_recreate: false,
        }),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ResourceEntry;
    use serde_json::json;

    fn key(identity: &str) -> ResourceKey {
        ResourceKey::parse(identity).expect("identity")
    }

    #[test]
    fn test_field_diff_paths() {
        let old = json!({"name": "a", "tasks": [{"key": "x"}], "tags": {"env": "dev"}});
        let new = json!({"name": "a", "tasks": [{"key": "y"}], "timeout": 30});
        let paths: Vec<String> = DiffEngine::diff_fields(&old, &new)
            .into_iter()
            .map(|c| c.path)
            .collect();
        assert_eq!(paths, vec!["tasks[0].key", "timeout", "tags"]);
    }

    #[test]
    fn test_sequence_length_change_is_one_change() {
        let changes = DiffEngine::diff_fields(&json!({"l": [1, 2]}), &json!({"l": [1, 2, 3]}));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].path, "l");
    }

    #[test]
    fn test_recreate_field_forces_recreate() {
        let entry = DiffEngine::classify(
            &key("schemas.raw"),
            &json!({"catalog_name": "main", "comment": "a"}),
            &json!({"catalog_name": "dev", "comment": "b"}),
        );
        assert_eq!(entry.action, ActionType::Recreate);
        assert_eq!(entry.changes.iter().filter(|c| c.forces_recreate).count(), 1);

        let entry = DiffEngine::classify(
            &key("jobs.etl"),
            &json!({"name": "a"}),
            &json!({"name": "b"}),
        );
        assert_eq!(entry.action, ActionType::Update);
    }

    #[test]
    fn test_create_noop_delete() {
        let mut snapshot = Snapshot::new();
        snapshot.upsert("jobs.b", ResourceEntry::new("2").with_state(json!({"name": "b"})));
        snapshot.upsert("jobs.c", ResourceEntry::new("3").with_state(json!({"name": "c"})));

        let plan = DiffEngine::new().compute(
            [
                (key("jobs.a"), json!({"name": "a"})),
                (key("jobs.b"), json!({"name": "b"})),
            ],
            Some(&snapshot),
        );

        let actions: Vec<(String, ActionType)> =
            plan.entries().map(|e| (e.identity(), e.action)).collect();
        assert_eq!(
            actions,
            vec![
                (String::from("jobs.a"), ActionType::Create),
                (String::from("jobs.b"), ActionType::NoOp),
                (String::from("jobs.c"), ActionType::Delete),
            ]
        );
    }

    #[test]
    fn test_without_snapshot_everything_is_created() {
        let plan = DiffEngine::new().compute([(key("apps.ui"), json!({}))], None);
        assert_eq!(plan.get("apps.ui").map(|e| e.action), Some(ActionType::Create));
    }
}
