//! Substitution of `${...}` references.
//!
//! [`resolve`] walks every string in a tree once and asks a lookup
//! function what each token stands for. The lookup can substitute a
//! value, leave the token untouched, or fail. Substituted output is never
//! scanned again, so the only cycles possible are cycles through the input
//! tree; [`TreeResolver`] detects those while resolving a tree against
//! itself.

use std::collections::HashMap;

use tracing::trace;

use crate::dyn_value::{Location, Path, Value, Visit, walk};
use crate::error::{LookupError, ReferenceError};

use super::reference::{Reference, Segment};

/// Answer of a lookup function for one token.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup {
    /// Substitute this value.
    Value(Value),
    /// Leave the token exactly as written.
    Skip,
}

/// Resolves every reference in `tree`.
///
/// A string that is exactly one token is replaced by the looked-up value,
/// keeping its type and the string's locations. Tokens embedded in other
/// text are replaced by the scalar rendering of the looked-up value.
///
/// # Errors
///
/// Fails on the first token whose lookup fails, or when a sequence or
/// mapping would have to be embedded in text.
pub fn resolve<F>(tree: Value, lookup: F) -> Result<Value, ReferenceError>
where
    F: FnMut(&Path) -> Result<Lookup, LookupError>,
{
    resolve_at(tree, &Path::root(), lookup)
}

/// Like [`resolve`], reporting paths relative to `base`.
fn resolve_at<F>(tree: Value, base: &Path, mut lookup: F) -> Result<Value, ReferenceError>
where
    F: FnMut(&Path) -> Result<Lookup, LookupError>,
{
    let resolved = walk(tree, &mut |path: &Path, node: &Value| {
        let Some(text) = node.as_str() else {
            return Ok(Visit::Continue);
        };
        let Some(reference) = Reference::parse(text) else {
            return Ok(Visit::Continue);
        };
        let node_path = base.join(path);
        let replacement = substitute(&reference, &node_path, node, &mut lookup)?;
        Ok(replacement.map_or(Visit::SkipChildren, Visit::Replace))
    })?;
    Ok(resolved.unwrap_or_else(Value::null))
}

/// Computes the replacement for one string node, or `None` to keep it.
fn substitute<F>(
    reference: &Reference,
    node_path: &Path,
    node: &Value,
    lookup: &mut F,
) -> Result<Option<Value>, ReferenceError>
where
    F: FnMut(&Path) -> Result<Lookup, LookupError>,
{
    let locations = node.locations();

    if reference.is_pure() {
        let Some((raw, path)) = reference.tokens().next() else {
            return Ok(None);
        };
        return match lookup(path) {
            Ok(Lookup::Value(value)) => {
                trace!(token = raw, path = %node_path, "substituted reference");
                Ok(Some(value.located(locations.to_vec())))
            }
            Ok(Lookup::Skip) => Ok(None),
            Err(err) => Err(lookup_failure(err, raw, node_path, locations)),
        };
    }

    let mut out = String::new();
    let mut changed = false;
    for segment in reference.segments() {
        match segment {
            Segment::Literal(text) => out.push_str(text),
            Segment::Token { raw, path } => match lookup(path) {
                Ok(Lookup::Value(value)) => {
                    let text = value.scalar_text().ok_or_else(|| ReferenceError::NotScalar {
                        token: raw.clone(),
                        path: node_path.to_string(),
                        locations: locations.to_vec(),
                    })?;
                    out.push_str(&text);
                    changed = true;
                }
                Ok(Lookup::Skip) => out.push_str(raw),
                Err(err) => return Err(lookup_failure(err, raw, node_path, locations)),
            },
        }
    }

    if !changed {
        return Ok(None);
    }
    Ok(Some(Value::string(out).located(locations.to_vec())))
}

fn lookup_failure(
    err: LookupError,
    token: &str,
    node_path: &Path,
    locations: &[Location],
) -> ReferenceError {
    match err {
        LookupError::Missing(reason) => ReferenceError::Unresolved {
            token: token.to_string(),
            path: node_path.to_string(),
            reason,
            locations: locations.to_vec(),
        },
        LookupError::Cycle(chain) => ReferenceError::Cycle {
            token: token.to_string(),
            chain,
            locations: locations.to_vec(),
        },
        LookupError::Nested(inner) => *inner,
    }
}

type Scope<'a> = Box<dyn Fn(&Path) -> Option<Path> + 'a>;

/// Resolves references that point back into the tree being resolved.
///
/// The scope function maps a token's path to the tree path it reads from;
/// tokens it maps to `None` are skipped. Every target is resolved at most
/// once and the chain of targets under resolution is tracked so cycles
/// fail immediately.
pub struct TreeResolver<'a> {
    source: &'a Value,
    scope: Scope<'a>,
    memo: HashMap<Path, Value>,
    visiting: Vec<Path>,
}

impl<'a> TreeResolver<'a> {
    /// Creates a resolver over `source`.
    pub fn new(source: &'a Value, scope: impl Fn(&Path) -> Option<Path> + 'a) -> Self {
        Self {
            source,
            scope: Box::new(scope),
            memo: HashMap::new(),
            visiting: Vec::new(),
        }
    }

    /// Lookup function suitable for [`resolve`].
    ///
    /// # Errors
    ///
    /// Fails when the target does not exist, is part of a cycle, or contains
    /// a reference that fails.
    pub fn lookup(&mut self, path: &Path) -> Result<Lookup, LookupError> {
        let Some(target) = (self.scope)(path) else {
            return Ok(Lookup::Skip);
        };
        self.resolve_target(&target).map(Lookup::Value)
    }

    /// Resolves the value stored at `target`.
    ///
    /// # Errors
    ///
    /// See [`TreeResolver::lookup`].
    pub fn resolve_target(&mut self, target: &Path) -> Result<Value, LookupError> {
        if let Some(done) = self.memo.get(target) {
            return Ok(done.clone());
        }
        if let Some(start) = self.visiting.iter().position(|p| p == target) {
            let mut chain: Vec<String> = self.visiting[start..].iter().map(ToString::to_string).collect();
            chain.push(target.to_string());
            return Err(LookupError::Cycle(chain));
        }

        let raw = self
            .source
            .get(target)
            .map_err(|e| LookupError::Missing(e.to_string()))?
            .clone();

        self.visiting.push(target.clone());
        let resolved = resolve_at(raw, target, |path| self.lookup(path));
        self.visiting.pop();

        let resolved = resolved.map_err(|e| LookupError::Nested(Box::new(e)))?;
        self.memo.insert(target.clone(), resolved.clone());
        Ok(resolved)
    }

    /// Resolves the whole source tree against itself.
    ///
    /// # Errors
    ///
    /// Returns the first reference failure.
    pub fn resolve_all(mut self) -> Result<Value, ReferenceError> {
        let tree = self.source.clone();
        resolve(tree, |path| self.lookup(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(text: &str) -> Path {
        text.parse().expect("valid path")
    }

    #[test]
    fn test_embedded_reference_is_stringified() {
        let tree = Value::mapping([(
            "resources",
            Value::mapping([(
                "jobs",
                Value::mapping([(
                    "my_job",
                    Value::mapping([(
                        "tags",
                        Value::mapping([("x", Value::from("${resources.pipelines.p.id}"))]),
                    )]),
                )]),
            )]),
        )]);

        let out = resolve(tree, |p| {
            if p.to_string() == "resources.pipelines.p.id" {
                Ok(Lookup::Value(Value::from("42")))
            } else {
                Ok(Lookup::Skip)
            }
        })
        .expect("resolve");

        assert_eq!(
            out.get(&path("resources.jobs.my_job.tags.x")),
            Ok(&Value::from("42"))
        );
    }

    #[test]
    fn test_pure_reference_preserves_type_and_locations() {
        let location = Location::new("bundle.yml", 4, 7);
        let tree = Value::mapping([("n", Value::from("${var.count}").located(vec![location.clone()]))]);

        let out = resolve(tree, |_| Ok(Lookup::Value(Value::from(3_i64)))).expect("resolve");
        let n = out.get_key("n").expect("n");
        assert_eq!(n, &Value::from(3_i64));
        assert_eq!(n.locations(), &[location]);
    }

    #[test]
    fn test_multiple_tokens_and_skip() {
        let tree = Value::mapping([("s", Value::from("${a.x}-${b.y}-${a.z}"))]);
        let out = resolve(tree, |p| {
            Ok(match p.key_at(0) {
                Some("a") => Lookup::Value(Value::from(p.key_at(1).unwrap_or_default())),
                _ => Lookup::Skip,
            })
        })
        .expect("resolve");
        assert_eq!(out.get_key("s"), Some(&Value::from("x-${b.y}-z")));
    }

    #[test]
    fn test_substituted_text_is_not_rescanned() {
        let tree = Value::mapping([("s", Value::from("v=${a.b}"))]);
        let out = resolve(tree, |p| {
            if p.to_string() == "a.b" {
                Ok(Lookup::Value(Value::from("${a.b}")))
            } else {
                Err(LookupError::Missing(String::from("unexpected")))
            }
        })
        .expect("resolve");
        assert_eq!(out.get_key("s"), Some(&Value::from("v=${a.b}")));
    }

    #[test]
    fn test_missing_reference_echoes_token() {
        let location = Location::new("bundle.yml", 2, 3);
        let tree = Value::mapping([("s", Value::from("x-${a.missing}").located(vec![location.clone()]))]);
        let err = resolve(tree, |_| Err(LookupError::Missing(String::from("no such key"))))
            .expect_err("must fail");

        assert_eq!(err.token(), "${a.missing}");
        assert_eq!(err.locations(), &[location]);
        assert!(err.to_string().contains("reference does not exist: ${a.missing}"));
    }

    #[test]
    fn test_embedding_a_mapping_fails() {
        let tree = Value::mapping([("s", Value::from("x-${a.b}"))]);
        let err = resolve(tree, |_| Ok(Lookup::Value(Value::empty_mapping()))).expect_err("must fail");
        assert!(matches!(err, ReferenceError::NotScalar { .. }));
    }

    #[test]
    fn test_tree_resolver_follows_chains() {
        let tree = Value::mapping([
            ("a", Value::from("${b}")),
            ("b", Value::from("prefix-${c}")),
            ("c", Value::from(7_i64)),
        ]);
        let out = TreeResolver::new(&tree, |p| Some(p.clone()))
            .resolve_all()
            .expect("resolve");
        assert_eq!(out.get_key("a"), Some(&Value::from("prefix-7")));
        assert_eq!(out.get_key("b"), Some(&Value::from("prefix-7")));
    }

    #[test]
    fn test_tree_resolver_detects_cycles() {
        let tree = Value::mapping([
            ("a", Value::from("${b}")),
            ("b", Value::from("x-${c}")),
            ("c", Value::from("${a}")),
        ]);
        let err = TreeResolver::new(&tree, |p| Some(p.clone()))
            .resolve_all()
            .expect_err("cycle");
        let ReferenceError::Cycle { chain, .. } = err else {
            panic!("expected a cycle, got {err}");
        };
        assert_eq!(chain.first(), chain.last());
        assert_eq!(chain.len(), 4);
    }

    #[test]
    fn test_tree_resolver_scope_skips() {
        let tree = Value::mapping([
            ("name", Value::from("${bundle.name}-${resources.jobs.a.id}")),
            ("bundle", Value::mapping([("name", Value::from("demo"))])),
        ]);
        let out = TreeResolver::new(&tree, |p| (p.key_at(0) == Some("bundle")).then(|| p.clone()))
            .resolve_all()
            .expect("resolve");
        assert_eq!(
            out.get_key("name"),
            Some(&Value::from("demo-${resources.jobs.a.id}"))
        );
    }
}
