//! Built-in mutators.

use crate::config::DEFAULT_TARGET;
use crate::context::DeployContext;
use std::convert::Infallible;

use crate::diag::{Diagnostic, Diagnostics};
use crate::dyn_value::{Mapping, Path, Value, ValueKind, WalkStep, merge, walk_read_only};
use crate::error::ReferenceError;
use crate::interpolation::{Reference, TreeResolver};
use crate::planner::{ResourceKey, ResourceSet};

use super::{Control, Mutator, MutatorOutput};

/// Merges `targets.<target>` over the top level and drops `targets`.
///
/// The chosen target is recorded at `bundle.target`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SelectTarget;

impl Mutator for SelectTarget {
    fn name(&self) -> &'static str {
        "select_target"
    }

    fn apply(&self, mut tree: Value, ctx: &DeployContext) -> MutatorOutput {
        let target = ctx.target();
        let targets = tree.remove(&Path::from_keys(["targets"]));
        let declared = targets.as_ref().and_then(Value::as_mapping).filter(|t| !t.is_empty());

        let overrides = match declared {
            Some(declared) => match declared.get(target) {
                Some(found) => found.clone(),
                None => {
                    let known: Vec<&str> = declared.keys().map(String::as_str).collect();
                    return MutatorOutput::abort(
                        tree,
                        Diagnostic::error(format!("Target '{target}' is not defined in the bundle"))
                            .with_detail(format!("Declared targets: {}", known.join(", ")))
                            .with_path(Path::from_keys(["targets"]))
                            .with_locations(targets.iter().flat_map(|t| t.locations().iter().cloned())),
                    );
                }
            },
            None if target == DEFAULT_TARGET => Value::empty_mapping(),
            None => {
                return MutatorOutput::abort(
                    tree,
                    Diagnostic::error(format!("Target '{target}' is not defined in the bundle"))
                        .with_detail("The bundle declares no targets."),
                );
            }
        };

        let mut overrides = match overrides.kind() {
            ValueKind::Mapping(_) => overrides,
            ValueKind::Null => Value::empty_mapping(),
            _ => {
                return MutatorOutput::abort(
                    tree,
                    Diagnostic::error(format!("Target '{target}' must be a mapping"))
                        .with_path(Path::from_keys(["targets", target]))
                        .with_locations(overrides.locations().iter().cloned()),
                );
            }
        };
        overrides.remove(&Path::from_keys(["default"]));

        let tree = merge(tree, overrides);
        let tree = merge(
            tree,
            Value::mapping([("bundle", Value::mapping([("target", Value::string(target))]))]),
        );
        MutatorOutput::proceed(tree)
    }
}

/// Assigns every declared variable its value and resolves `${var.*}`,
/// `${bundle.*}` and `${workspace.*}` references.
///
/// A value given on the command line wins over `value`, which wins over
/// `default`. `${resources.*}` references are left for the backend.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolveVariables;

/// Maps a reference to the tree path it reads from.
fn variable_scope(path: &Path) -> Option<Path> {
    match path.key_at(0)? {
        "var" => {
            let name = path.key_at(1)?;
            Some(Path::from_keys(["variables", name, "value"]).join(&path.suffix(2)))
        }
        "bundle" | "workspace" | "variables" => Some(path.clone()),
        _ => None,
    }
}

impl ResolveVariables {
    fn assign(tree: Value, ctx: &DeployContext) -> (Value, Diagnostics) {
        let mut diagnostics = Diagnostics::new();
        let empty = Mapping::new();
        let declared = tree
            .get_key("variables")
            .and_then(Value::as_mapping)
            .unwrap_or(&empty);

        let mut assigned = Mapping::new();
        for (name, declaration) in declared {
            let from_file = match declaration.kind() {
                ValueKind::Mapping(_) => declaration
                    .get_key("value")
                    .or_else(|| declaration.get_key("default"))
                    .filter(|v| !v.is_null())
                    .cloned(),
                ValueKind::Null => None,
                _ => Some(declaration.clone()),
            };
            let value = ctx
                .variables()
                .get(name)
                .map(|v| Value::string(v.clone()))
                .or(from_file);

            match value {
                Some(value) => {
                    assigned.insert(name.clone(), Value::mapping([("value", value)]));
                }
                None => diagnostics.push(
                    Diagnostic::error(format!("no value assigned to required variable {name}"))
                        .with_detail(format!(
                            "Assign a value with --var {name}=<value> or set a default in the bundle."
                        ))
                        .with_path(Path::from_keys(["variables", name.as_str()]))
                        .with_locations(declaration.locations().iter().cloned()),
                ),
            }
        }

        for name in ctx.variables().keys() {
            if !declared.contains_key(name) {
                diagnostics.push(Diagnostic::warning(format!(
                    "variable {name} is assigned on the command line but not declared in the bundle"
                )));
            }
        }

        if assigned.is_empty() {
            return (tree, diagnostics);
        }
        let tree = merge(
            tree,
            Value::mapping([("variables", Value::new(ValueKind::Mapping(assigned)))]),
        );
        (tree, diagnostics)
    }
}

impl Mutator for ResolveVariables {
    fn name(&self) -> &'static str {
        "resolve_variables"
    }

    fn apply(&self, tree: Value, ctx: &DeployContext) -> MutatorOutput {
        let (tree, diagnostics) = Self::assign(tree, ctx);
        if diagnostics.has_errors() {
            return MutatorOutput {
                tree,
                diagnostics,
                control: Control::Abort,
            };
        }

        let resolved = TreeResolver::new(&tree, variable_scope).resolve_all();
        match resolved {
            Ok(resolved) => MutatorOutput::proceed(resolved).with_diagnostics(diagnostics),
            Err(e) => MutatorOutput::abort(tree, Diagnostic::from(&e)).with_diagnostics(diagnostics),
        }
    }
}

/// Checks that `resources` normalizes into a resource set and that every
/// `${resources.<group>.<name>...}` reference names one of its resources.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidateResources;

/// Reports resource references that cannot be answered after apply.
fn dangling_resource_references(tree: &Value, set: &ResourceSet) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    let _: Result<(), Infallible> = walk_read_only(tree, &mut |at: &Path, node: &Value| {
        let Some(reference) = node.as_str().and_then(Reference::parse) else {
            return Ok(WalkStep::Descend);
        };
        for (raw, path) in reference.tokens() {
            if path.key_at(0) != Some("resources") {
                continue;
            }
            let reason = match (path.key_at(1), path.key_at(2)) {
                (Some(group), Some(name)) if path.len() >= 4 => {
                    let identity = ResourceKey::new(group, name).identity();
                    if set.contains(&identity) {
                        continue;
                    }
                    format!("no resource {identity} is defined")
                }
                _ => String::from("expected ${resources.<group>.<name>.<attribute>}"),
            };
            diagnostics.push(Diagnostic::from(&ReferenceError::Unresolved {
                token: raw.to_string(),
                path: at.to_string(),
                reason,
                locations: node.locations().to_vec(),
            }));
        }
        Ok(WalkStep::Descend)
    });
    diagnostics
}

impl Mutator for ValidateResources {
    fn name(&self) -> &'static str {
        "validate_resources"
    }

    fn apply(&self, tree: Value, ctx: &DeployContext) -> MutatorOutput {
        match ResourceSet::from_tree(&tree, ctx.table()) {
            Ok(set) if set.is_empty() => {
                MutatorOutput::proceed(tree).with_diagnostics([Diagnostic::warning("No resources defined in bundle")])
            }
            Ok(set) => {
                let dangling = dangling_resource_references(&tree, &set);
                if dangling.is_empty() {
                    MutatorOutput::proceed(tree)
                } else {
                    MutatorOutput {
                        tree,
                        diagnostics: dangling,
                        control: Control::Abort,
                    }
                }
            }
            Err(e) => MutatorOutput::abort(tree, Diagnostic::from(&e)),
        }
    }
}
