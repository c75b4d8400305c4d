//! Structural merge of two value trees.

use super::value::{Value, ValueKind};

/// Merges `b` over `a`.
///
/// Mappings merge key-wise, recursing where both sides hold a mapping. Keys
/// only present in `b` are appended after the keys of `a`. Sequences and
/// scalars from `b` replace those of `a`. Locations from both sides are
/// kept on every merged node.
#[must_use]
pub fn merge(a: Value, b: Value) -> Value {
    let (a_kind, a_locations) = a.into_parts();
    let (b_kind, b_locations) = b.into_parts();

    match (a_kind, b_kind) {
        (ValueKind::Mapping(mut left), ValueKind::Mapping(right)) => {
            for (key, right_child) in right {
                match left.get_mut(&key) {
                    Some(left_child) => {
                        let previous = std::mem::replace(left_child, Value::null());
                        *left_child = merge(previous, right_child);
                    }
                    None => {
                        left.insert(key, right_child);
                    }
                }
            }
            let mut merged = Value::with_locations(ValueKind::Mapping(left), a_locations);
            merged.add_locations(&b_locations);
            merged
        }
        (_, winner) => {
            let mut merged = Value::with_locations(winner, b_locations);
            merged.add_locations(&a_locations);
            merged
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dyn_value::Location;

    fn at(file: &str) -> Vec<Location> {
        vec![Location::new(file, 1, 1)]
    }

    #[test]
    fn test_b_wins_and_new_keys_are_appended() {
        let a = Value::mapping([
            ("x", Value::from(1_i64)),
            ("y", Value::mapping([("keep", Value::from(true)), ("over", Value::from("a"))])),
        ]);
        let b = Value::mapping([
            ("z", Value::from("new")),
            ("y", Value::mapping([("over", Value::from("b"))])),
        ]);

        let merged = merge(a, b);
        let keys: Vec<_> = merged
            .as_mapping()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        assert_eq!(keys, vec!["x", "y", "z"]);
        assert_eq!(
            merged.get_key("y"),
            Some(&Value::mapping([("keep", Value::from(true)), ("over", Value::from("b"))]))
        );
    }

    #[test]
    fn test_sequences_are_replaced() {
        let a = Value::mapping([("s", Value::sequence(vec![Value::from(1_i64), Value::from(2_i64)]))]);
        let b = Value::mapping([("s", Value::sequence(vec![Value::from(3_i64)]))]);
        assert_eq!(
            merge(a, b).get_key("s"),
            Some(&Value::sequence(vec![Value::from(3_i64)]))
        );
    }

    #[test]
    fn test_locations_are_unioned() {
        let a = Value::mapping([("k", Value::from("a").located(at("base.yml")))]).located(at("base.yml"));
        let b = Value::mapping([("k", Value::from("b").located(at("target.yml")))])
            .located(at("target.yml"));

        let merged = merge(a, b);
        assert_eq!(merged.locations().len(), 2);
        let child = merged.get_key("k").expect("k present");
        assert_eq!(child.as_str(), Some("b"));
        assert_eq!(child.locations()[0].file, "target.yml");
        assert_eq!(child.locations()[1].file, "base.yml");
    }

    #[test]
    fn test_scalar_over_mapping() {
        let a = Value::mapping([("k", Value::mapping([("nested", Value::from(1_i64))]))]);
        let b = Value::mapping([("k", Value::null())]);
        assert_eq!(merge(a, b).get_key("k"), Some(&Value::null()));
    }
}
