//! The dynamic value type and its source locations.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValueError;

use super::path::{Path, PathComponent};

/// Ordered mapping used for every `Mapping` node.
pub type Mapping = IndexMap<String, Value>;

/// Where a value was defined.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    /// Source file, as given by the loader.
    pub file: String,
    /// 1-based line, 0 when unknown.
    pub line: usize,
    /// 1-based column, 0 when unknown.
    pub column: usize,
}

impl Location {
    /// Creates a new location.
    #[must_use]
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    /// Creates a location that only knows its file.
    #[must_use]
    pub fn file(file: impl Into<String>) -> Self {
        Self::new(file, 0, 0)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.file)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}

/// The payload of a value node.
#[derive(Debug, Clone)]
pub enum ValueKind {
    /// Explicit null or absent scalar.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed integer.
    Int(i64),
    /// Floating point number.
    Float(f64),
    /// String, possibly containing `${...}` references.
    String(String),
    /// Ordered sequence.
    Sequence(Vec<Value>),
    /// Insertion-ordered mapping.
    Mapping(Mapping),
}

/// A configuration value with provenance.
///
/// Equality compares payloads only; locations are diagnostics, not data.
#[derive(Debug, Clone)]
pub struct Value {
    kind: ValueKind,
    locations: Vec<Location>,
}

impl Value {
    /// Creates a value without locations.
    #[must_use]
    pub const fn new(kind: ValueKind) -> Self {
        Self {
            kind,
            locations: Vec::new(),
        }
    }

    /// Creates a value with the given locations.
    #[must_use]
    pub const fn with_locations(kind: ValueKind, locations: Vec<Location>) -> Self {
        Self { kind, locations }
    }

    /// The null value.
    #[must_use]
    pub const fn null() -> Self {
        Self::new(ValueKind::Null)
    }

    /// An empty mapping.
    #[must_use]
    pub fn empty_mapping() -> Self {
        Self::new(ValueKind::Mapping(Mapping::new()))
    }

    /// A string value.
    #[must_use]
    pub fn string(s: impl Into<String>) -> Self {
        Self::new(ValueKind::String(s.into()))
    }

    /// A mapping built from key/value pairs, preserving their order.
    #[must_use]
    pub fn mapping<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, Self)>,
    {
        Self::new(ValueKind::Mapping(
            pairs.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    /// A sequence value.
    #[must_use]
    pub const fn sequence(items: Vec<Self>) -> Self {
        Self::new(ValueKind::Sequence(items))
    }

    /// Returns the payload.
    #[must_use]
    pub const fn kind(&self) -> &ValueKind {
        &self.kind
    }

    /// Returns the payload mutably.
    pub fn kind_mut(&mut self) -> &mut ValueKind {
        &mut self.kind
    }

    /// Splits the value into payload and locations.
    #[must_use]
    pub fn into_parts(self) -> (ValueKind, Vec<Location>) {
        (self.kind, self.locations)
    }

    /// Returns the locations where this node was defined.
    #[must_use]
    pub fn locations(&self) -> &[Location] {
        &self.locations
    }

    /// Replaces this node's locations.
    #[must_use]
    pub fn located(mut self, locations: Vec<Location>) -> Self {
        self.locations = locations;
        self
    }

    /// Adds locations, skipping ones already present.
    pub fn add_locations<'a>(&mut self, locations: impl IntoIterator<Item = &'a Location>) {
        for location in locations {
            if !self.locations.contains(location) {
                self.locations.push(location.clone());
            }
        }
    }

    /// Short name of the payload kind, used in diagnostics.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self.kind {
            ValueKind::Null => "null",
            ValueKind::Bool(_) => "bool",
            ValueKind::Int(_) => "int",
            ValueKind::Float(_) => "float",
            ValueKind::String(_) => "string",
            ValueKind::Sequence(_) => "sequence",
            ValueKind::Mapping(_) => "mapping",
        }
    }

    /// Returns the string payload, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match &self.kind {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the mapping payload, if any.
    #[must_use]
    pub const fn as_mapping(&self) -> Option<&Mapping> {
        match &self.kind {
            ValueKind::Mapping(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the sequence payload, if any.
    #[must_use]
    pub fn as_sequence(&self) -> Option<&[Self]> {
        match &self.kind {
            ValueKind::Sequence(items) => Some(items),
            _ => None,
        }
    }

    /// True for null.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self.kind, ValueKind::Null)
    }

    /// True for every kind except sequences and mappings.
    #[must_use]
    pub const fn is_scalar(&self) -> bool {
        !matches!(self.kind, ValueKind::Sequence(_) | ValueKind::Mapping(_))
    }

    /// Renders a scalar the way it appears when interpolated into text.
    ///
    /// Returns `None` for sequences and mappings.
    #[must_use]
    pub fn scalar_text(&self) -> Option<String> {
        match &self.kind {
            ValueKind::Null => Some(String::new()),
            ValueKind::Bool(b) => Some(b.to_string()),
            ValueKind::Int(i) => Some(i.to_string()),
            ValueKind::Float(x) => Some(x.to_string()),
            ValueKind::String(s) => Some(s.clone()),
            ValueKind::Sequence(_) | ValueKind::Mapping(_) => None,
        }
    }

    /// Looks up a direct child by key.
    #[must_use]
    pub fn get_key(&self, key: &str) -> Option<&Self> {
        self.as_mapping().and_then(|m| m.get(key))
    }

    /// Looks up the value at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`ValueError::NotFound`] when any component is missing or does
    /// not fit the node it is applied to.
    pub fn get(&self, path: &Path) -> Result<&Self, ValueError> {
        let mut current = self;
        for component in path.components() {
            let next = match (component, &current.kind) {
                (PathComponent::Key(key), ValueKind::Mapping(map)) => map.get(key),
                (PathComponent::Index(index), ValueKind::Sequence(items)) => items.get(*index),
                _ => None,
            };
            current = next.ok_or_else(|| ValueError::NotFound {
                path: path.to_string(),
            })?;
        }
        Ok(current)
    }

    /// Returns a tree with `value` stored at `path`.
    ///
    /// The receiver is consumed: nodes off the path are moved into the result
    /// untouched, nodes on the path are rebuilt. Missing mapping keys along
    /// the path are created as empty mappings.
    ///
    /// # Errors
    ///
    /// Fails when a component does not fit its node or an index is out of
    /// range.
    pub fn set(self, path: &Path, value: Self) -> Result<Self, ValueError> {
        set_at(self, path, 0, value)
    }

    /// Removes and returns the value at `path`, if present.
    pub fn remove(&mut self, path: &Path) -> Option<Self> {
        let (last, parent) = path.split_last()?;
        let mut current = self;
        for component in parent.components() {
            current = match (component, &mut current.kind) {
                (PathComponent::Key(key), ValueKind::Mapping(map)) => map.get_mut(key)?,
                (PathComponent::Index(index), ValueKind::Sequence(items)) => items.get_mut(*index)?,
                _ => return None,
            };
        }
        match (last, &mut current.kind) {
            (PathComponent::Key(key), ValueKind::Mapping(map)) => map.shift_remove(key),
            (PathComponent::Index(index), ValueKind::Sequence(items)) if *index < items.len() => {
                Some(items.remove(*index))
            }
            _ => None,
        }
    }
}

fn set_at(node: Value, path: &Path, depth: usize, value: Value) -> Result<Value, ValueError> {
    let Some(component) = path.components().get(depth) else {
        return Ok(value);
    };

    let (kind, locations) = node.into_parts();
    match (component, kind) {
        (PathComponent::Key(key), ValueKind::Mapping(mut map)) => {
            let child = map.shift_remove_full(key.as_str());
            let (index, child) = match child {
                Some((index, _, child)) => (Some(index), child),
                None => (None, Value::empty_mapping()),
            };
            let child = set_at(child, path, depth + 1, value)?;
            match index {
                Some(index) => {
                    map.shift_insert(index, key.clone(), child);
                }
                None => {
                    map.insert(key.clone(), child);
                }
            }
            Ok(Value::with_locations(ValueKind::Mapping(map), locations))
        }
        (PathComponent::Key(key), ValueKind::Null) => {
            let child = set_at(Value::empty_mapping(), path, depth + 1, value)?;
            let mut map = Mapping::new();
            map.insert(key.clone(), child);
            Ok(Value::with_locations(ValueKind::Mapping(map), locations))
        }
        (PathComponent::Index(index), ValueKind::Sequence(mut items)) => {
            let len = items.len();
            if *index >= len {
                return Err(ValueError::IndexOutOfRange {
                    path: path.prefix(depth).to_string(),
                    index: *index,
                    len,
                });
            }
            let child = std::mem::replace(&mut items[*index], Value::null());
            items[*index] = set_at(child, path, depth + 1, value)?;
            Ok(Value::with_locations(ValueKind::Sequence(items), locations))
        }
        (component, kind) => Err(ValueError::TypeMismatch {
            path: path.prefix(depth).to_string(),
            expected: match component {
                PathComponent::Key(_) => "mapping",
                PathComponent::Index(_) => "sequence",
            },
            found: Value::new(kind).kind_name(),
        }),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (&self.kind, &other.kind) {
            (ValueKind::Null, ValueKind::Null) => true,
            (ValueKind::Bool(a), ValueKind::Bool(b)) => a == b,
            (ValueKind::Int(a), ValueKind::Int(b)) => a == b,
            (ValueKind::Float(a), ValueKind::Float(b)) => a.to_bits() == b.to_bits() || a == b,
            (ValueKind::String(a), ValueKind::String(b)) => a == b,
            (ValueKind::Sequence(a), ValueKind::Sequence(b)) => a == b,
            (ValueKind::Mapping(a), ValueKind::Mapping(b)) => {
                a.len() == b.len() && a.iter().all(|(k, v)| b.get(k) == Some(v))
            }
            _ => false,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::string(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Self::new(ValueKind::Int(i))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::new(ValueKind::Bool(b))
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Self::new(ValueKind::Float(x))
    }
}
