//! Diagnostics reported while processing a bundle.
//!
//! Mutators and validation passes report problems as [`Diagnostic`]s rather
//! than failing on the first one, so a single run can show the user
//! everything that is wrong with their configuration.

use std::fmt;

use crate::dyn_value::{Location, Path};
use crate::error::{PlanError, ReferenceError};

/// How serious a diagnostic is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    /// Processing cannot continue.
    Error,
    /// Something is probably wrong.
    Warning,
    /// Something could be done better.
    Recommendation,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "Error",
            Self::Warning => "Warning",
            Self::Recommendation => "Recommendation",
        })
    }
}

/// A problem found in a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Severity.
    pub severity: Severity,
    /// One-line summary.
    pub summary: String,
    /// Optional longer explanation.
    pub detail: Option<String>,
    /// Where the offending value was defined.
    pub locations: Vec<Location>,
    /// Tree paths of the offending values.
    pub paths: Vec<Path>,
}

impl Diagnostic {
    /// Creates an error diagnostic.
    #[must_use]
    pub fn error(summary: impl Into<String>) -> Self {
        Self::new(Severity::Error, summary)
    }

    /// Creates a warning diagnostic.
    #[must_use]
    pub fn warning(summary: impl Into<String>) -> Self {
        Self::new(Severity::Warning, summary)
    }

    /// Creates a recommendation.
    #[must_use]
    pub fn recommendation(summary: impl Into<String>) -> Self {
        Self::new(Severity::Recommendation, summary)
    }

    fn new(severity: Severity, summary: impl Into<String>) -> Self {
        Self {
            severity,
            summary: summary.into(),
            detail: None,
            locations: Vec::new(),
            paths: Vec::new(),
        }
    }

    /// Adds a detail text.
    #[must_use]
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Adds source locations.
    #[must_use]
    pub fn with_locations(mut self, locations: impl IntoIterator<Item = Location>) -> Self {
        self.locations.extend(locations);
        self
    }

    /// Adds a tree path.
    #[must_use]
    pub fn with_path(mut self, path: Path) -> Self {
        self.paths.push(path);
        self
    }

    /// True for [`Severity::Error`].
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.severity, self.summary)?;
        for path in &self.paths {
            write!(f, "\n  at {path}")?;
        }
        for location in &self.locations {
            write!(f, "\n  in {location}")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\n\n{detail}")?;
        }
        Ok(())
    }
}

impl From<&ReferenceError> for Diagnostic {
    fn from(err: &ReferenceError) -> Self {
        let diagnostic = Self::error(err.to_string()).with_locations(err.locations().iter().cloned());
        match err {
            ReferenceError::Unresolved { path, .. } | ReferenceError::NotScalar { path, .. } => {
                match path.parse() {
                    Ok(path) => diagnostic.with_path(path),
                    Err(_) => diagnostic,
                }
            }
            ReferenceError::Cycle { .. } => diagnostic,
        }
    }
}

impl From<&PlanError> for Diagnostic {
    fn from(err: &PlanError) -> Self {
        let diagnostic = Self::error(err.to_string());
        match err {
            PlanError::InvalidResource { path, locations, .. } => {
                let diagnostic = diagnostic.with_locations(locations.iter().cloned());
                match path.parse() {
                    Ok(path) => diagnostic.with_path(path),
                    Err(_) => diagnostic,
                }
            }
            PlanError::UnknownGroup { group, locations } => diagnostic
                .with_locations(locations.iter().cloned())
                .with_path(Path::from_keys(["resources", group.as_str()])),
            _ => diagnostic,
        }
    }
}

/// Diagnostics collected over a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<Diagnostic>);

impl Diagnostics {
    /// Creates an empty collection.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Adds one diagnostic.
    pub fn push(&mut self, diagnostic: Diagnostic) {
        self.0.push(diagnostic);
    }

    /// True if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.0.iter().any(Diagnostic::is_error)
    }

    /// Diagnostics of one severity.
    pub fn of(&self, severity: Severity) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter().filter(move |d| d.severity == severity)
    }

    /// All diagnostics in the order they were reported.
    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.0.iter()
    }

    /// Number of diagnostics.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl Extend<Diagnostic> for Diagnostics {
    fn extend<T: IntoIterator<Item = Diagnostic>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl IntoIterator for Diagnostics {
    type Item = Diagnostic;
    type IntoIter = std::vec::IntoIter<Diagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_error_keeps_token_and_location() {
        let err = ReferenceError::Unresolved {
            token: String::from("${var.missing}"),
            path: String::from("resources.jobs.etl.name"),
            reason: String::from("no value at path 'variables.missing'"),
            locations: vec![Location::new("bundle.yml", 12, 9)],
        };

        let diagnostic = Diagnostic::from(&err);
        assert!(diagnostic.is_error());
        assert!(diagnostic.summary.contains("${var.missing}"));
        assert_eq!(diagnostic.locations, vec![Location::new("bundle.yml", 12, 9)]);
        assert_eq!(diagnostic.paths[0].to_string(), "resources.jobs.etl.name");
    }

    #[test]
    fn test_unknown_group_points_at_group() {
        let err = PlanError::UnknownGroup {
            group: String::from("widgets"),
            locations: vec![],
        };
        let diagnostic = Diagnostic::from(&err);
        assert_eq!(diagnostic.paths[0].to_string(), "resources.widgets");
    }

    #[test]
    fn test_display_lists_paths_and_detail() {
        let diagnostic = Diagnostic::warning("job has no tasks")
            .with_path(Path::from_keys(["resources", "jobs", "etl"]))
            .with_detail("Add at least one task.");
        let text = diagnostic.to_string();
        assert!(text.starts_with("Warning: job has no tasks"));
        assert!(text.contains("at resources.jobs.etl"));
        assert!(text.ends_with("Add at least one task."));
    }

    #[test]
    fn test_has_errors() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(Diagnostic::recommendation("pin the runtime"));
        assert!(!diagnostics.has_errors());
        diagnostics.push(Diagnostic::error("broken"));
        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.of(Severity::Error).count(), 1);
    }
}
