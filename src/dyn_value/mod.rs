//! Dynamic configuration values.
//!
//! Bundles are processed as untyped trees so that each transformation pass
//! only needs to know the part of the schema it touches. Every node keeps
//! the source locations it came from, which lets a late validation error
//! point back at the line the user wrote.

mod convert;
mod merge;
mod path;
mod pattern;
mod rename;
mod value;
mod walk;

pub use merge::merge;
pub use path::{Path, PathComponent};
pub use pattern::{Pattern, PatternComponent};
pub use rename::rename_keys;
pub use value::{Location, Mapping, Value, ValueKind};
pub use walk::{Visit, WalkStep, map_by_pattern, walk, walk_read_only};
