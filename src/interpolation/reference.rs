//! Parsing of `${...}` reference tokens.

use std::sync::LazyLock;

use regex::Regex;

use crate::dyn_value::Path;

/// Matches one well-formed reference token.
///
/// Keys start with a letter and may contain letters, digits, `_` and `-`;
/// any number of `[n]` indices may follow a key.
static TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\$\{([a-zA-Z][a-zA-Z0-9_-]*(?:\[[0-9]+\])*(?:\.[a-zA-Z][a-zA-Z0-9_-]*(?:\[[0-9]+\])*)*)\}",
    )
    .expect("Invalid regex pattern for reference tokens")
});

/// One part of a string that contains references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Text copied verbatim.
    Literal(String),
    /// A reference token.
    Token {
        /// The token exactly as written, including `${` and `}`.
        raw: String,
        /// The referenced path.
        path: Path,
    },
}

/// A string split into literal text and reference tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    segments: Vec<Segment>,
}

impl Reference {
    /// Parses `input`, returning `None` when it contains no tokens.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        let mut segments = Vec::new();
        let mut last = 0;

        for captures in TOKEN.captures_iter(input) {
            let (Some(whole), Some(inner)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            let Ok(path) = inner.as_str().parse::<Path>() else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Literal(input[last..whole.start()].to_string()));
            }
            segments.push(Segment::Token {
                raw: whole.as_str().to_string(),
                path,
            });
            last = whole.end();
        }

        if segments.is_empty() {
            return None;
        }
        if last < input.len() {
            segments.push(Segment::Literal(input[last..].to_string()));
        }
        Some(Self { segments })
    }

    /// The parsed segments, in order.
    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// True when the whole string is exactly one token.
    #[must_use]
    pub fn is_pure(&self) -> bool {
        matches!(self.segments.as_slice(), [Segment::Token { .. }])
    }

    /// Iterates over `(raw, path)` for every token.
    pub fn tokens(&self) -> impl Iterator<Item = (&str, &Path)> {
        self.segments.iter().filter_map(|segment| match segment {
            Segment::Token { raw, path } => Some((raw.as_str(), path)),
            Segment::Literal(_) => None,
        })
    }
}

/// True when `input` contains at least one reference token.
#[must_use]
pub fn contains_reference(input: &str) -> bool {
    TOKEN.is_match(input)
}

/// Formats `path` as a reference token.
#[must_use]
pub fn token_for(path: &Path) -> String {
    format!("${{{path}}}")
}
