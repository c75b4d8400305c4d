//! Tree traversal.
//!
//! [`walk`] consumes a tree and lets the visitor replace, prune, or delete
//! nodes on the way down. [`walk_read_only`] borrows the tree and never
//! allocates a new one. [`map_by_pattern`] applies a function only where a
//! [`Pattern`] matches.

use super::path::{Path, PathComponent};
use super::pattern::{Pattern, PatternComponent};
use super::value::{Mapping, Value, ValueKind};

/// What [`walk`] should do with the node it just showed the visitor.
#[derive(Debug, Clone, PartialEq)]
pub enum Visit {
    /// Keep the node and descend into its children.
    Continue,
    /// Keep the node as is and do not descend.
    SkipChildren,
    /// Replace the node; the replacement is not visited.
    Replace(Value),
    /// Drop the node from its parent.
    Delete,
}

/// What [`walk_read_only`] should do after visiting a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkStep {
    /// Descend into the node's children.
    Descend,
    /// Skip the node's children.
    Skip,
}

/// Pre-order traversal that may rewrite the tree.
///
/// Returns `None` when the visitor deletes the root.
///
/// # Errors
///
/// Stops at and returns the first error produced by the visitor.
pub fn walk<E, F>(value: Value, visitor: &mut F) -> Result<Option<Value>, E>
where
    F: FnMut(&Path, &Value) -> Result<Visit, E>,
{
    let mut path = Path::root();
    walk_at(value, &mut path, visitor)
}

fn walk_at<E, F>(value: Value, path: &mut Path, visitor: &mut F) -> Result<Option<Value>, E>
where
    F: FnMut(&Path, &Value) -> Result<Visit, E>,
{
    match visitor(path, &value)? {
        Visit::Continue => {}
        Visit::SkipChildren => return Ok(Some(value)),
        Visit::Replace(replacement) => return Ok(Some(replacement)),
        Visit::Delete => return Ok(None),
    }

    let (kind, locations) = value.into_parts();
    let kind = match kind {
        ValueKind::Mapping(map) => {
            let mut out = Mapping::with_capacity(map.len());
            for (key, child) in map {
                path.push(PathComponent::Key(key.clone()));
                let child = walk_at(child, path, visitor);
                path.pop();
                if let Some(child) = child? {
                    out.insert(key, child);
                }
            }
            ValueKind::Mapping(out)
        }
        ValueKind::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, child) in items.into_iter().enumerate() {
                path.push(PathComponent::Index(index));
                let child = walk_at(child, path, visitor);
                path.pop();
                if let Some(child) = child? {
                    out.push(child);
                }
            }
            ValueKind::Sequence(out)
        }
        scalar => scalar,
    };
    Ok(Some(Value::with_locations(kind, locations)))
}

/// Pre-order traversal over a borrowed tree.
///
/// # Errors
///
/// Stops at and returns the first error produced by the visitor.
pub fn walk_read_only<E, F>(value: &Value, visitor: &mut F) -> Result<(), E>
where
    F: FnMut(&Path, &Value) -> Result<WalkStep, E>,
{
    let mut path = Path::root();
    walk_read_only_at(value, &mut path, visitor)
}

fn walk_read_only_at<E, F>(value: &Value, path: &mut Path, visitor: &mut F) -> Result<(), E>
where
    F: FnMut(&Path, &Value) -> Result<WalkStep, E>,
{
    if visitor(path, value)? == WalkStep::Skip {
        return Ok(());
    }
    match value.kind() {
        ValueKind::Mapping(map) => {
            for (key, child) in map {
                path.push(PathComponent::Key(key.clone()));
                let result = walk_read_only_at(child, path, visitor);
                path.pop();
                result?;
            }
        }
        ValueKind::Sequence(items) => {
            for (index, child) in items.iter().enumerate() {
                path.push(PathComponent::Index(index));
                let result = walk_read_only_at(child, path, visitor);
                path.pop();
                result?;
            }
        }
        _ => {}
    }
    Ok(())
}

/// Applies `f` to every node whose path matches `pattern`.
///
/// Keys or indices named by the pattern but absent from the tree are
/// skipped. Everything off the matched paths is moved through untouched.
///
/// # Errors
///
/// Returns the first error produced by `f`.
pub fn map_by_pattern<E, F>(value: Value, pattern: &Pattern, mut f: F) -> Result<Value, E>
where
    F: FnMut(&Path, Value) -> Result<Value, E>,
{
    let mut path = Path::root();
    map_at(value, pattern.components(), &mut path, &mut f)
}

fn map_at<E, F>(
    value: Value,
    pattern: &[PatternComponent],
    path: &mut Path,
    f: &mut F,
) -> Result<Value, E>
where
    F: FnMut(&Path, Value) -> Result<Value, E>,
{
    let Some((head, rest)) = pattern.split_first() else {
        return f(path, value);
    };

    let (kind, locations) = value.into_parts();
    let kind = match (head, kind) {
        (PatternComponent::Key(_) | PatternComponent::AnyKey, ValueKind::Mapping(map)) => {
            let mut out = Mapping::with_capacity(map.len());
            for (key, child) in map {
                let selected = match head {
                    PatternComponent::Key(wanted) => *wanted == key,
                    _ => true,
                };
                let child = if selected {
                    path.push(PathComponent::Key(key.clone()));
                    let mapped = map_at(child, rest, path, f);
                    path.pop();
                    mapped?
                } else {
                    child
                };
                out.insert(key, child);
            }
            ValueKind::Mapping(out)
        }
        (PatternComponent::Index(_) | PatternComponent::AnyIndex, ValueKind::Sequence(items)) => {
            let mut out = Vec::with_capacity(items.len());
            for (index, child) in items.into_iter().enumerate() {
                let selected = match head {
                    PatternComponent::Index(wanted) => *wanted == index,
                    _ => true,
                };
                let child = if selected {
                    path.push(PathComponent::Index(index));
                    let mapped = map_at(child, rest, path, f);
                    path.pop();
                    mapped?
                } else {
                    child
                };
                out.push(child);
            }
            ValueKind::Sequence(out)
        }
        (_, kind) => kind,
    };
    Ok(Value::with_locations(kind, locations))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;

    fn tree() -> Value {
        Value::mapping([
            (
                "resources",
                Value::mapping([
                    (
                        "jobs",
                        Value::mapping([
                            ("a", Value::mapping([("name", Value::from("job a"))])),
                            ("b", Value::mapping([("name", Value::from("job b"))])),
                        ]),
                    ),
                    (
                        "pipelines",
                        Value::mapping([("p", Value::mapping([("name", Value::from("pipe"))]))]),
                    ),
                ]),
            ),
            (
                "list",
                Value::sequence(vec![Value::from(1_i64), Value::from(2_i64), Value::from(3_i64)]),
            ),
        ])
    }

    #[test]
    fn test_walk_visits_in_pre_order() {
        let mut seen = Vec::new();
        let out = walk(tree(), &mut |path: &Path, _: &Value| {
            seen.push(path.to_string());
            Ok::<_, Infallible>(Visit::Continue)
        })
        .expect("walk");
        assert_eq!(out, Some(tree()));
        assert_eq!(seen[0], "");
        assert_eq!(seen[1], "resources");
        assert!(seen.contains(&String::from("list[2]")));
        let jobs = seen.iter().position(|p| p == "resources.jobs").expect("jobs visited");
        let job_a = seen.iter().position(|p| p == "resources.jobs.a").expect("a visited");
        assert!(jobs < job_a);
    }

    #[test]
    fn test_walk_delete_and_replace() {
        let out = walk(tree(), &mut |path: &Path, value: &Value| {
            Ok::<_, Infallible>(match path.to_string().as_str() {
                "resources.pipelines" => Visit::Delete,
                "list[1]" => Visit::Delete,
                _ if value.as_str() == Some("job a") => Visit::Replace(Value::from("renamed")),
                _ => Visit::Continue,
            })
        })
        .expect("walk")
        .expect("root kept");

        assert!(out.get(&"resources.pipelines".parse().expect("path")).is_err());
        assert_eq!(
            out.get(&"resources.jobs.a.name".parse().expect("path")),
            Ok(&Value::from("renamed"))
        );
        assert_eq!(
            out.get_key("list"),
            Some(&Value::sequence(vec![Value::from(1_i64), Value::from(3_i64)]))
        );
    }

    #[test]
    fn test_walk_replacement_is_not_revisited() {
        let mut visits = 0;
        walk(tree(), &mut |path: &Path, _: &Value| {
            visits += 1;
            Ok::<_, Infallible>(if path.is_empty() {
                Visit::Replace(Value::mapping([("x", Value::from("y"))]))
            } else {
                Visit::Continue
            })
        })
        .expect("walk");
        assert_eq!(visits, 1);
    }

    #[test]
    fn test_walk_delete_root() {
        let out = walk(tree(), &mut |_: &Path, _: &Value| Ok::<_, Infallible>(Visit::Delete))
            .expect("walk");
        assert!(out.is_none());
    }

    #[test]
    fn test_walk_read_only_skip() {
        let mut seen = Vec::new();
        walk_read_only(&tree(), &mut |path: &Path, _: &Value| {
            seen.push(path.to_string());
            Ok::<_, Infallible>(if path.to_string() == "resources" {
                WalkStep::Skip
            } else {
                WalkStep::Descend
            })
        })
        .expect("walk");
        assert!(seen.contains(&String::from("resources")));
        assert!(!seen.iter().any(|p| p.starts_with("resources.")));
    }

    #[test]
    fn test_walk_propagates_visitor_error() {
        let result = walk(tree(), &mut |path: &Path, _: &Value| {
            if path.to_string() == "list[0]" {
                Err("boom")
            } else {
                Ok(Visit::Continue)
            }
        });
        assert_eq!(result, Err("boom"));
    }

    #[test]
    fn test_map_by_pattern_touches_only_matches() {
        let pattern: Pattern = "resources.*.*.name".parse().expect("pattern");
        let mut touched = Vec::new();
        let out = map_by_pattern(tree(), &pattern, |path, value| {
            touched.push(path.to_string());
            let text = value.as_str().unwrap_or_default().to_uppercase();
            Ok::<_, Infallible>(Value::from(text))
        })
        .expect("map");

        assert_eq!(touched.len(), 3);
        assert_eq!(
            out.get(&"resources.jobs.b.name".parse().expect("path")),
            Ok(&Value::from("JOB B"))
        );
        assert_eq!(out.get_key("list"), tree().get_key("list"));
    }

    #[test]
    fn test_map_by_pattern_skips_missing() {
        let pattern: Pattern = "resources.jobs.missing.name".parse().expect("pattern");
        let out = map_by_pattern(tree(), &pattern, |_, _| -> Result<Value, Infallible> {
            panic!("should not be called")
        })
        .expect("map");
        assert_eq!(out, tree());
    }
}
