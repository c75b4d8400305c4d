//! Translation to and from the provisioning tool's JSON formats.
//!
//! Three documents cross the boundary: the resource graph the tool is asked
//! to converge on, the plan it reports back, and its state.

use serde::Deserialize;
use serde_json::Value as Json;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use crate::dyn_value::{Mapping, Pattern, Value, ValueKind, rename_keys};
use crate::error::ReferenceError;
use crate::interpolation::{ResourceTypeTable, rewrite_to_backend};
use crate::state::ResourceEntry;

use super::plan::{ActionType, Plan, PlanEntry};
use super::resources::ResourceSet;

/// Attribute renames applied to job definitions.
const JOB_RENAMES: &[(&str, &str)] = &[
    ("tasks", "task"),
    ("job_clusters", "job_cluster"),
    ("parameters", "parameter"),
    ("environments", "environment"),
];

/// Attribute renames applied to pipeline definitions.
const PIPELINE_RENAMES: &[(&str, &str)] = &[
    ("libraries", "library"),
    ("clusters", "cluster"),
    ("notifications", "notification"),
];

fn renames_for(group: &str) -> &'static [(&'static str, &'static str)] {
    match group {
        "jobs" => JOB_RENAMES,
        "pipelines" => PIPELINE_RENAMES,
        _ => &[],
    }
}

/// Renders the resource graph as `{"resource": {<type>: {<name>: attrs}}}`.
///
/// # Errors
///
/// Fails when a reference cannot be rewritten.
pub fn render_graph(desired: &ResourceSet, table: &ResourceTypeTable) -> Result<Json, ReferenceError> {
    let mut by_type: Mapping = Mapping::new();

    for resource in desired.iter() {
        let Some(provider_type) = table.type_for(&resource.key.group) else {
            continue;
        };
        let config = rename_keys(
            resource.config.clone(),
            &Pattern::default(),
            renames_for(&resource.key.group),
        );
        let config = rewrite_to_backend(config, table)?;

        let entry = by_type
            .entry(provider_type.to_string())
            .or_insert_with(Value::empty_mapping);
        if let ValueKind::Mapping(names) = entry.kind_mut() {
            names.insert(resource.key.name.clone(), config);
        }
    }

    let graph = Value::mapping([("resource", Value::new(ValueKind::Mapping(by_type)))]);
    Ok(graph.to_json())
}

#[derive(Debug, Deserialize)]
struct PlanDocument {
    #[serde(default)]
    resource_changes: Vec<ResourceChange>,
}

#[derive(Debug, Deserialize)]
struct ResourceChange {
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    change: Change,
}

#[derive(Debug, Deserialize)]
struct Change {
    actions: Vec<String>,
}

fn classify(actions: &[String]) -> Option<ActionType> {
    let actions: Vec<&str> = actions.iter().map(String::as_str).collect();
    match actions.as_slice() {
        ["no-op"] => Some(ActionType::NoOp),
        ["read"] => Some(ActionType::Read),
        ["create"] => Some(ActionType::Create),
        ["update"] => Some(ActionType::Update),
        ["delete"] => Some(ActionType::Delete),
        ["delete", "create"] | ["create", "delete"] => Some(ActionType::Recreate),
        _ => None,
    }
}

/// Translates the tool's plan JSON into a [`Plan`].
///
/// Changes for types missing from `table` are dropped. Desired resources
/// the tool does not mention are added as no-ops.
///
/// # Errors
///
/// Fails when the document does not have the expected shape.
pub fn translate_plan(
    document: &Json,
    desired: &ResourceSet,
    table: &ResourceTypeTable,
) -> Result<Plan, serde_json::Error> {
    let document = PlanDocument::deserialize(document)?;
    let mut plan = Plan::new();

    for change in document.resource_changes {
        let Some(group) = table.group_for(&change.resource_type) else {
            debug!("Skipping unmanaged type {}", change.resource_type);
            continue;
        };
        let Some(action) = classify(&change.change.actions) else {
            warn!(
                "Ignoring unrecognized actions {:?} for {}.{}",
                change.change.actions, change.resource_type, change.name
            );
            continue;
        };
        plan.insert(PlanEntry::new(group, change.name, action));
    }

    for resource in desired.iter() {
        if !plan.contains(&resource.key.identity()) {
            plan.insert(PlanEntry::new(
                resource.key.group.clone(),
                resource.key.name.clone(),
                ActionType::NoOp,
            ));
        }
    }

    Ok(plan)
}

#[derive(Debug, Deserialize)]
struct StateDocument {
    #[serde(default)]
    values: Option<StateValues>,
}

#[derive(Debug, Deserialize)]
struct StateValues {
    #[serde(default)]
    root_module: Option<Module>,
}

#[derive(Debug, Deserialize)]
struct Module {
    #[serde(default)]
    resources: Vec<StateResource>,
}

#[derive(Debug, Deserialize)]
struct StateResource {
    #[serde(default = "managed")]
    mode: String,
    #[serde(rename = "type")]
    resource_type: String,
    name: String,
    #[serde(default)]
    values: Json,
}

fn managed() -> String {
    String::from("managed")
}

fn id_of(values: &Json) -> Option<String> {
    match values.get("id")? {
        Json::String(id) => Some(id.clone()),
        Json::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Converts the tool's state JSON into resource entries keyed by identity.
///
/// Data sources, unmanaged types and resources without an id are skipped.
///
/// # Errors
///
/// Fails when the document does not have the expected shape.
pub fn convert_state(
    document: &Json,
    table: &ResourceTypeTable,
) -> Result<BTreeMap<String, ResourceEntry>, serde_json::Error> {
    let document = StateDocument::deserialize(document)?;
    let resources = document
        .values
        .and_then(|v| v.root_module)
        .map(|m| m.resources)
        .unwrap_or_default();

    let mut entries = BTreeMap::new();
    for resource in resources {
        if resource.mode != "managed" {
            continue;
        }
        let Some(group) = table.group_for(&resource.resource_type) else {
            continue;
        };
        let Some(id) = id_of(&resource.values) else {
            warn!("{}.{} has no id in state", resource.resource_type, resource.name);
            continue;
        };
        entries.insert(
            format!("{group}.{}", resource.name),
            ResourceEntry::new(id).with_state(resource.values),
        );
    }
    Ok(entries)
}

/// Address of a resource in the tool's own vocabulary, e.g. `databricks_job.etl`.
#[must_use]
pub fn address(table: &ResourceTypeTable, group: &str, name: &str) -> Option<String> {
    table.type_for(group).map(|t| format!("{t}.{name}"))
}
