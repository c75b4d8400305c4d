//! Key renaming for schema projection.

use std::convert::Infallible;

use super::merge::merge;
use super::pattern::Pattern;
use super::value::{Mapping, Value, ValueKind};
use super::walk::map_by_pattern;

/// Renames the direct keys of every mapping matched by `pattern`.
///
/// Keys found in `table` (`old -> new`) are moved into a renamed branch,
/// which is then merged back over the untouched siblings. Nodes that are
/// not mappings pass through unchanged.
#[must_use]
pub fn rename_keys(value: Value, pattern: &Pattern, table: &[(&str, &str)]) -> Value {
    let result = map_by_pattern(value, pattern, |_, node| {
        Ok::<_, Infallible>(rename_direct_keys(node, table))
    });
    match result {
        Ok(value) => value,
        Err(never) => match never {},
    }
}

fn rename_direct_keys(node: Value, table: &[(&str, &str)]) -> Value {
    let (kind, locations) = node.into_parts();
    let ValueKind::Mapping(map) = kind else {
        return Value::with_locations(kind, locations);
    };

    let mut kept = Mapping::with_capacity(map.len());
    let mut renamed = Mapping::new();
    for (key, child) in map {
        match table.iter().find(|(old, _)| *old == key) {
            Some((_, new)) => {
                renamed.insert((*new).to_string(), child);
            }
            None => {
                kept.insert(key, child);
            }
        }
    }

    if renamed.is_empty() {
        return Value::with_locations(ValueKind::Mapping(kept), locations);
    }
    merge(
        Value::with_locations(ValueKind::Mapping(kept), locations),
        Value::new(ValueKind::Mapping(renamed)),
    )
}
