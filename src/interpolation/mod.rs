//! Reference interpolation.
//!
//! This module parses `${...}` tokens inside string values, substitutes
//! them through a caller-supplied lookup, and translates references between
//! the bundle vocabulary and the provisioning tool's vocabulary.

mod reference;
mod resolver;
mod vocabulary;

pub use reference::{Reference, Segment, contains_reference, token_for};
pub use resolver::{Lookup, TreeResolver, resolve};
pub use vocabulary::{ResourceTypeTable, reverse_resolve, rewrite_to_backend};
