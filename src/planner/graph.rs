//! Dependency ordering between resources.
//!
//! A resource depends on every other desired resource it references through
//! `${resources.<group>.<name>...}`. Changes are grouped into levels: all
//! deletes first, then each level holds the resources whose dependencies
//! were handled by earlier levels.

use std::collections::{BTreeMap, BTreeSet};

use crate::dyn_value::{Value, WalkStep, walk_read_only};
use crate::error::PlanError;
use crate::interpolation::Reference;

use super::plan::{ActionType, Plan};
use super::resources::{ResourceKey, ResourceSet};

/// Identities referenced from `config`.
#[must_use]
pub fn dependencies(config: &Value) -> BTreeSet<String> {
    let mut found = BTreeSet::new();
    let _: Result<(), std::convert::Infallible> = walk_read_only(config, &mut |_, node: &Value| {
        if let Some(reference) = node.as_str().and_then(Reference::parse) {
            for (_, path) in reference.tokens() {
                if path.key_at(0) == Some("resources")
                    && let (Some(group), Some(name)) = (path.key_at(1), path.key_at(2))
                {
                    found.insert(ResourceKey::new(group, name).identity());
                }
            }
        }
        Ok(WalkStep::Descend)
    });
    found
}

/// Orders the changing entries of `plan` into execution levels.
///
/// # Errors
///
/// Returns [`PlanError::DependencyCycle`] when changing resources depend on
/// each other in a loop.
pub fn execution_levels(plan: &Plan, desired: &ResourceSet) -> Result<Vec<Vec<String>>, PlanError> {
    let mut levels = Vec::new();

    let deletes: Vec<String> = plan
        .entries()
        .filter(|e| e.action == ActionType::Delete)
        .map(|e| e.identity())
        .collect();
    if !deletes.is_empty() {
        levels.push(deletes);
    }

    let pending: BTreeSet<String> = plan
        .entries()
        .filter(|e| e.action.is_change() && e.action != ActionType::Delete)
        .map(|e| e.identity())
        .collect();

    let mut waiting_on: BTreeMap<String, BTreeSet<String>> = pending
        .iter()
        .map(|identity| {
            let deps = desired
                .get(identity)
                .map(|r| dependencies(&r.config))
                .unwrap_or_default()
                .into_iter()
                .filter(|d| d != identity && pending.contains(d))
                .collect();
            (identity.clone(), deps)
        })
        .collect();

    while !waiting_on.is_empty() {
        let ready: Vec<String> = waiting_on
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(identity, _)| identity.clone())
            .collect();

        if ready.is_empty() {
            let cycle: Vec<&str> = waiting_on.keys().map(String::as_str).collect();
            return Err(PlanError::DependencyCycle {
                cycle: cycle.join(", "),
            });
        }

        for identity in &ready {
            waiting_on.remove(identity);
        }
        for deps in waiting_on.values_mut() {
            for identity in &ready {
                deps.remove(identity);
            }
        }
        levels.push(ready);
    }

    Ok(levels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::plan::PlanEntry;
    use crate::planner::resources::DesiredResource;

    fn resource(identity: &str, refs: &[&str]) -> DesiredResource {
        let tags: Vec<(String, Value)> = refs
            .iter()
            .enumerate()
            .map(|(i, r)| (format!("t{i}"), Value::string(format!("${{resources.{r}.id}}"))))
            .collect();
        DesiredResource {
            key: ResourceKey::parse(identity).expect("identity"),
            config: Value::mapping([("tags", Value::mapping(tags))]),
        }
    }

    fn plan(entries: &[(&str, ActionType)]) -> Plan {
        let mut plan = Plan::new();
        for (identity, action) in entries {
            let key = ResourceKey::parse(identity).expect("identity");
            plan.insert(PlanEntry::new(key.group, key.name, *action));
        }
        plan
    }

    #[test]
    fn test_dependencies_are_collected() {
        let r = resource("jobs.etl", &["pipelines.ingest", "schemas.raw"]);
        let deps: Vec<String> = dependencies(&r.config).into_iter().collect();
        assert_eq!(deps, vec!["pipelines.ingest", "schemas.raw"]);
    }

    #[test]
    fn test_levels_put_deletes_first_and_dependencies_before_dependents() {
        let desired = ResourceSet::from_resources([
            resource("jobs.etl", &["pipelines.ingest"]),
            resource("pipelines.ingest", &["schemas.raw"]),
            resource("schemas.raw", &[]),
            resource("apps.ui", &[]),
        ]);
        let plan = plan(&[
            ("jobs.etl", ActionType::Create),
            ("pipelines.ingest", ActionType::Update),
            ("schemas.raw", ActionType::Create),
            ("apps.ui", ActionType::NoOp),
            ("jobs.old", ActionType::Delete),
        ]);

        let levels = execution_levels(&plan, &desired).expect("levels");
        assert_eq!(
            levels,
            vec![
                vec![String::from("jobs.old")],
                vec![String::from("schemas.raw")],
                vec![String::from("pipelines.ingest")],
                vec![String::from("jobs.etl")],
            ]
        );
    }

    #[test]
    fn test_unchanged_dependencies_do_not_block() {
        let desired = ResourceSet::from_resources([
            resource("jobs.etl", &["pipelines.ingest"]),
            resource("pipelines.ingest", &[]),
        ]);
        let plan = plan(&[
            ("jobs.etl", ActionType::Create),
            ("pipelines.ingest", ActionType::NoOp),
        ]);
        let levels = execution_levels(&plan, &desired).expect("levels");
        assert_eq!(levels, vec![vec![String::from("jobs.etl")]]);
    }

    #[test]
    fn test_cycle_is_a_plan_error() {
        let desired = ResourceSet::from_resources([
            resource("jobs.a", &["jobs.b"]),
            resource("jobs.b", &["jobs.a"]),
        ]);
        let plan = plan(&[("jobs.a", ActionType::Create), ("jobs.b", ActionType::Create)]);
        assert!(matches!(
            execution_levels(&plan, &desired),
            Err(PlanError::DependencyCycle { .. })
        ));
    }
}
