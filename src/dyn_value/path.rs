//! Addresses into a value tree.
//!
//! A [`Path`] is a sequence of mapping keys and sequence indices, written
//! `resources.jobs.etl.tasks[0].key`. Paths are the addressing scheme shared
//! by diagnostics, reference tokens, and plan entries.

use std::fmt;
use std::str::FromStr;

use crate::error::ValueError;

/// One step of a [`Path`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathComponent {
    /// Mapping key.
    Key(String),
    /// Sequence index.
    Index(usize),
}

/// An ordered sequence of components; the empty path is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Path(Vec<PathComponent>);

impl Path {
    /// The root path.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Builds a path from components.
    #[must_use]
    pub const fn new(components: Vec<PathComponent>) -> Self {
        Self(components)
    }

    /// Builds a path of plain keys.
    #[must_use]
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(keys.into_iter().map(|k| PathComponent::Key(k.into())).collect())
    }

    /// Returns the components.
    #[must_use]
    pub fn components(&self) -> &[PathComponent] {
        &self.0
    }

    /// Number of components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True for the root path.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns a new path with a key appended.
    #[must_use]
    pub fn key(&self, key: impl Into<String>) -> Self {
        let mut components = self.0.clone();
        components.push(PathComponent::Key(key.into()));
        Self(components)
    }

    /// Returns a new path with an index appended.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        let mut components = self.0.clone();
        components.push(PathComponent::Index(index));
        Self(components)
    }

    /// Appends a component in place.
    pub fn push(&mut self, component: PathComponent) {
        self.0.push(component);
    }

    /// Removes the last component in place.
    pub fn pop(&mut self) -> Option<PathComponent> {
        self.0.pop()
    }

    /// The first `len` components.
    #[must_use]
    pub fn prefix(&self, len: usize) -> Self {
        Self(self.0.iter().take(len).cloned().collect())
    }

    /// Everything after the first `len` components.
    #[must_use]
    pub fn suffix(&self, len: usize) -> Self {
        Self(self.0.iter().skip(len).cloned().collect())
    }

    /// Splits off the last component, returning it with the parent path.
    #[must_use]
    pub fn split_last(&self) -> Option<(&PathComponent, Self)> {
        let (last, parent) = self.0.split_last()?;
        Some((last, Self(parent.to_vec())))
    }

    /// True when `self` starts with every component of `prefix`.
    #[must_use]
    pub fn has_prefix(&self, prefix: &Self) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// The key at `position`, if that component is a key.
    #[must_use]
    pub fn key_at(&self, position: usize) -> Option<&str> {
        match self.0.get(position) {
            Some(PathComponent::Key(key)) => Some(key),
            _ => None,
        }
    }

    /// Concatenates two paths.
    #[must_use]
    pub fn join(&self, other: &Self) -> Self {
        let mut components = self.0.clone();
        components.extend(other.0.iter().cloned());
        Self(components)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, component) in self.0.iter().enumerate() {
            match component {
                PathComponent::Key(key) => {
                    if i > 0 {
                        f.write_str(".")?;
                    }
                    f.write_str(key)?;
                }
                PathComponent::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

impl FromStr for Path {
    type Err = ValueError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let tokens = tokenize(input)?;
        let components = tokens
            .into_iter()
            .map(|token| match token {
                Token::Key(key) => Ok(PathComponent::Key(key)),
                Token::Index(index) => Ok(PathComponent::Index(index)),
                Token::AnyKey | Token::AnyIndex => Err(ValueError::InvalidPath {
                    input: input.to_string(),
                    reason: String::from("wildcards are only allowed in patterns"),
                }),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self(components))
    }
}

/// Lexical unit shared by path and pattern parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Token {
    Key(String),
    Index(usize),
    AnyKey,
    AnyIndex,
}

/// Splits `a.b[2].*[*]` into tokens.
pub(super) fn tokenize(input: &str) -> Result<Vec<Token>, ValueError> {
    let invalid = |reason: &str| ValueError::InvalidPath {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    let mut tokens = Vec::new();
    if input.is_empty() {
        return Ok(tokens);
    }

    let bytes = input.as_bytes();
    let mut pos = 0;
    let mut expect_key = true;

    while pos < bytes.len() {
        match bytes[pos] {
            b'[' => {
                let close = input[pos..]
                    .find(']')
                    .map(|offset| pos + offset)
                    .ok_or_else(|| invalid("unterminated '['"))?;
                let inner = &input[pos + 1..close];
                if inner == "*" {
                    tokens.push(Token::AnyIndex);
                } else {
                    let index = inner
                        .parse::<usize>()
                        .map_err(|_| invalid("index must be a non-negative integer"))?;
                    tokens.push(Token::Index(index));
                }
                pos = close + 1;
                expect_key = false;
            }
            b'.' => {
                if expect_key {
                    return Err(invalid("empty key"));
                }
                pos += 1;
                expect_key = true;
                if pos == bytes.len() {
                    return Err(invalid("trailing '.'"));
                }
            }
            _ => {
                if !expect_key {
                    return Err(invalid("expected '.' or '[' between components"));
                }
                let end = input[pos..]
                    .find(['.', '['])
                    .map_or(bytes.len(), |offset| pos + offset);
                let key = &input[pos..end];
                if key.contains(']') {
                    return Err(invalid("unexpected ']'"));
                }
                if key == "*" {
                    tokens.push(Token::AnyKey);
                } else {
                    tokens.push(Token::Key(key.to_string()));
                }
                pos = end;
                expect_key = false;
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_round_trip() {
        for text in ["a", "a.b", "a.b[2].c", "resources.jobs.my-job.tasks[0][1]", ""] {
            let path: Path = text.parse().expect("valid path");
            assert_eq!(path.to_string(), text);
        }
    }

    #[test]
    fn test_parse_components() {
        let path: Path = "a.b[2].c".parse().expect("valid path");
        assert_eq!(
            path.components(),
            &[
                PathComponent::Key(String::from("a")),
                PathComponent::Key(String::from("b")),
                PathComponent::Index(2),
                PathComponent::Key(String::from("c")),
            ]
        );
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for text in ["a..b", "a.", ".a", "a[x]", "a[1", "a]b", "a[1]b"] {
            assert!(text.parse::<Path>().is_err(), "{text} should be rejected");
        }
    }

    #[test]
    fn test_parse_rejects_wildcards() {
        assert!("resources.*".parse::<Path>().is_err());
    }

    #[test]
    fn test_prefix_helpers() {
        let path: Path = "resources.jobs.etl.id".parse().expect("valid path");
        assert!(path.has_prefix(&Path::from_keys(["resources", "jobs"])));
        assert_eq!(path.key_at(2), Some("etl"));
        assert_eq!(path.suffix(3).to_string(), "id");
        assert_eq!(path.prefix(2).to_string(), "resources.jobs");
    }

    #[test]
    fn test_equality_is_component_wise() {
        let a = Path::from_keys(["a", "b"]);
        let b: Path = "a.b".parse().expect("valid path");
        assert_eq!(a, b);
        assert_ne!(a, b.index(0));
    }
}
