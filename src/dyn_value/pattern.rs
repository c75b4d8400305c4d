//! Wildcard patterns over paths.

use std::fmt;
use std::str::FromStr;

use crate::error::ValueError;

use super::path::{tokenize, Path, PathComponent, Token};

/// One step of a [`Pattern`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternComponent {
    /// Exactly this mapping key.
    Key(String),
    /// Exactly this sequence index.
    Index(usize),
    /// Any mapping key (`*`).
    AnyKey,
    /// Any sequence index (`[*]`).
    AnyIndex,
}

/// A path whose components may be wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Pattern(Vec<PatternComponent>);

impl Pattern {
    /// Builds a pattern from components.
    #[must_use]
    pub const fn new(components: Vec<PatternComponent>) -> Self {
        Self(components)
    }

    /// Returns the components.
    #[must_use]
    pub fn components(&self) -> &[PatternComponent] {
        &self.0
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the pattern that matches only the root.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new pattern with a component appended.
    #[must_use]
    pub fn append(&self, component: PatternComponent) -> Self {
        let mut components = self.0.clone();
        components.push(component);
        Self(components)
    }

    /// True when `path` has the same length and every component matches.
    #[must_use]
    pub fn matches(&self, path: &Path) -> bool {
        self.0.len() == path.len()
            && self
                .0
                .iter()
                .zip(path.components())
                .all(|(pattern, component)| component_matches(pattern, component))
    }

    /// True when `path` matches the first `path.len()` components.
    ///
    /// Used to prune traversal: a subtree whose path is not a prefix match
    /// can never contain a full match.
    #[must_use]
    pub fn matches_prefix(&self, path: &Path) -> bool {
        path.len() <= self.0.len()
            && self
                .0
                .iter()
                .zip(path.components())
                .all(|(pattern, component)| component_matches(pattern, component))
    }
}

fn component_matches(pattern: &PatternComponent, component: &PathComponent) -> bool {
    match (pattern, component) {
        (PatternComponent::AnyKey, PathComponent::Key(_))
        | (PatternComponent::AnyIndex, PathComponent::Index(_)) => true,
        (PatternComponent::Key(expected), PathComponent::Key(actual)) => expected == actual,
        (PatternComponent::Index(expected), PathComponent::Index(actual)) => expected == actual,
        _ => false,
    }
}

impl From<&Path> for Pattern {
    fn from(path: &Path) -> Self {
        Self(
            path.components()
                .iter()
                .map(|component| match component {
                    PathComponent::Key(key) => PatternComponent::Key(key.clone()),
                    PathComponent::Index(index) => PatternComponent::Index(*index),
                })
                .collect(),
        )
    }
}

impl FromStr for Pattern {
    type Err = ValueError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Ok(Self(
            tokenize(input)?
                .into_iter()
                .map(|token| match token {
                    Token::Key(key) => PatternComponent::Key(key),
                    Token::Index(index) => PatternComponent::Index(index),
                    Token::AnyKey => PatternComponent::AnyKey,
                    Token::AnyIndex => PatternComponent::AnyIndex,
                })
                .collect(),
        ))
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.0.iter().enumerate() {
            match component {
                PatternComponent::Key(key) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                PatternComponent::AnyKey => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str("*")?;
                }
                PatternComponent::Index(index) => write!(f, "[{index}]")?,
                PatternComponent::AnyIndex => f.write_str("[*]")?,
            }
        }
        Ok(())
    }
}
