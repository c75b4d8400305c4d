//! Conversion between value trees and serde data.
//!
//! JSON is the interchange format for state blobs and typed structures;
//! YAML is what bundle files are written in.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::ValueError;

use super::value::{Location, Mapping, Value, ValueKind};

impl Value {
    /// Builds a tree from JSON. The result carries no locations.
    #[must_use]
    pub fn from_json(json: serde_json::Value) -> Self {
        let kind = match json {
            serde_json::Value::Null => ValueKind::Null,
            serde_json::Value::Bool(b) => ValueKind::Bool(b),
            serde_json::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| ValueKind::Float(n.as_f64().unwrap_or_default()), ValueKind::Int),
            serde_json::Value::String(s) => ValueKind::String(s),
            serde_json::Value::Array(items) => {
                ValueKind::Sequence(items.into_iter().map(Self::from_json).collect())
            }
            serde_json::Value::Object(map) => ValueKind::Mapping(
                map.into_iter()
                    .map(|(k, v)| (k, Self::from_json(v)))
                    .collect(),
            ),
        };
        Self::new(kind)
    }

    /// Renders the tree as JSON, dropping locations.
    ///
    /// Non-finite floats become `null`.
    #[must_use]
    pub fn to_json(&self) -> serde_json::Value {
        match self.kind() {
            ValueKind::Null => serde_json::Value::Null,
            ValueKind::Bool(b) => serde_json::Value::Bool(*b),
            ValueKind::Int(i) => serde_json::Value::from(*i),
            ValueKind::Float(x) => serde_json::Number::from_f64(*x)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            ValueKind::String(s) => serde_json::Value::String(s.clone()),
            ValueKind::Sequence(items) => {
                serde_json::Value::Array(items.iter().map(Self::to_json).collect())
            }
            ValueKind::Mapping(map) => serde_json::Value::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Builds a tree from YAML, attaching `location` to every node.
    ///
    /// # Errors
    ///
    /// Fails when a mapping key is itself a sequence or mapping.
    pub fn from_yaml(yaml: serde_yaml::Value, location: &Location) -> Result<Self, ValueError> {
        let kind = match yaml {
            serde_yaml::Value::Null => ValueKind::Null,
            serde_yaml::Value::Bool(b) => ValueKind::Bool(b),
            serde_yaml::Value::Number(n) => n
                .as_i64()
                .map_or_else(|| ValueKind::Float(n.as_f64().unwrap_or_default()), ValueKind::Int),
            serde_yaml::Value::String(s) => ValueKind::String(s),
            serde_yaml::Value::Sequence(items) => ValueKind::Sequence(
                items
                    .into_iter()
                    .map(|item| Self::from_yaml(item, location))
                    .collect::<Result<_, _>>()?,
            ),
            serde_yaml::Value::Mapping(map) => {
                let mut out = Mapping::with_capacity(map.len());
                for (key, child) in map {
                    out.insert(yaml_key(key)?, Self::from_yaml(child, location)?);
                }
                ValueKind::Mapping(out)
            }
            serde_yaml::Value::Tagged(tagged) => {
                return Self::from_yaml(tagged.value, location);
            }
        };
        Ok(Self::with_locations(kind, vec![location.clone()]))
    }

    /// Deserializes the tree into a typed structure.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Conversion`] when the shape does not fit `T`.
    pub fn to_typed<T: DeserializeOwned>(&self) -> Result<T, ValueError> {
        serde_json::from_value(self.to_json()).map_err(|e| ValueError::Conversion {
            message: e.to_string(),
        })
    }

    /// Serializes a typed structure into a tree.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::Conversion`] when `T` cannot be serialized.
    pub fn from_typed<T: Serialize>(typed: &T) -> Result<Self, ValueError> {
        serde_json::to_value(typed)
            .map(Self::from_json)
            .map_err(|e| ValueError::Conversion {
                message: e.to_string(),
            })
    }
}

fn yaml_key(key: serde_yaml::Value) -> Result<String, ValueError> {
    match key {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Bool(b) => Ok(b.to_string()),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        serde_yaml::Value::Null => Ok(String::from("null")),
        serde_yaml::Value::Tagged(tagged) => yaml_key(tagged.value),
        serde_yaml::Value::Sequence(_) | serde_yaml::Value::Mapping(_) => {
            Err(ValueError::Conversion {
                message: String::from("mapping keys must be scalars"),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Job {
        name: String,
        max_retries: i64,
        tags: Vec<String>,
    }

    #[test]
    fn test_json_keeps_key_order() {
        let json = serde_json::json!({"z": 1, "a": {"nested": [true, null, 1.5]}, "m": "x"});
        let value = Value::from_json(json.clone());
        let keys: Vec<_> = value
            .as_mapping()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        assert_eq!(keys, vec!["z", "a", "m"]);
        assert_eq!(value.to_json(), json);
    }

    #[test]
    fn test_yaml_attaches_location() {
        let yaml: serde_yaml::Value =
            serde_yaml::from_str("bundle:\n  name: demo\n  retries: 3\n").expect("yaml");
        let location = Location::file("bundle.yml");
        let value = Value::from_yaml(yaml, &location).expect("convert");

        let name = value.get(&"bundle.name".parse().expect("path")).expect("name");
        assert_eq!(name.as_str(), Some("demo"));
        assert_eq!(name.locations(), &[location]);
        assert_eq!(
            value.get(&"bundle.retries".parse().expect("path")),
            Ok(&Value::from(3_i64))
        );
    }

    #[test]
    fn test_typed_boundary() {
        let job = Job {
            name: String::from("etl"),
            max_retries: 2,
            tags: vec![String::from("a")],
        };
        let value = Value::from_typed(&job).expect("from typed");
        assert_eq!(value.get_key("max_retries"), Some(&Value::from(2_i64)));
        let back: Job = value.to_typed().expect("to typed");
        assert_eq!(back, job);
    }

    #[test]
    fn test_typed_shape_mismatch() {
        let value = Value::mapping([("name", Value::from(1_i64))]);
        assert!(matches!(
            value.to_typed::<Job>(),
            Err(ValueError::Conversion { .. })
        ));
    }
}
