//! Deployment plan types.
//!
//! A [`Plan`] holds exactly one [`PlanEntry`] per resource identity, keyed by
//! `group.name` so iteration order is stable regardless of how the entries
//! were produced.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

/// What will happen to one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Nothing to do.
    NoOp,
    /// Data source refresh; never changes anything remotely.
    Read,
    /// Update in place.
    Update,
    /// Create a new object.
    Create,
    /// Delete the recorded object.
    Delete,
    /// Delete and create again.
    Recreate,
}

impl ActionType {
    /// True for actions that lose the remote object.
    #[must_use]
    pub const fn is_destructive(self) -> bool {
        matches!(self, Self::Delete | Self::Recreate)
    }

    /// True when the action changes something remotely.
    #[must_use]
    pub const fn is_change(self) -> bool {
        !matches!(self, Self::NoOp | Self::Read)
    }

    /// Combines two actions reported for the same identity.
    ///
    /// A delete and a create on one identity make a recreate; otherwise the
    /// stronger action wins.
    #[must_use]
    pub fn combine(self, other: Self) -> Self {
        match (self, other) {
            (Self::Delete, Self::Create) | (Self::Create, Self::Delete) => Self::Recreate,
            (a, b) => a.max(b),
        }
    }

    /// Lowercase name used in output.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoOp => "noop",
            Self::Read => "read",
            Self::Update => "update",
            Self::Create => "create",
            Self::Delete => "delete",
            Self::Recreate => "recreate",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One changed field of a resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    /// Field path relative to the resource, e.g. `tasks[0].notebook_path`.
    pub path: String,
    /// Recorded value, `None` when the field is new.
    pub old: Option<serde_json::Value>,
    /// Desired value, `None` when the field is removed.
    pub new: Option<serde_json::Value>,
    /// Whether changing this field requires recreating the object.
    pub forces_recreate: bool,
}

/// The planned action for one resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanEntry {
    /// Resource group, e.g. `jobs`.
    pub group: String,
    /// Resource name within the group.
    pub name: String,
    /// Planned action.
    pub action: ActionType,
    /// Field-level changes, when the backend reports them.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub changes: Vec<FieldChange>,
}

impl PlanEntry {
    /// Creates an entry without field changes.
    #[must_use]
    pub fn new(group: impl Into<String>, name: impl Into<String>, action: ActionType) -> Self {
        Self {
            group: group.into(),
            name: name.into(),
            action,
            changes: Vec::new(),
        }
    }

    /// Attaches field changes.
    #[must_use]
    pub fn with_changes(mut self, changes: Vec<FieldChange>) -> Self {
        self.changes = changes;
        self
    }

    /// The `group.name` identity.
    #[must_use]
    pub fn identity(&self) -> String {
        format!("{}.{}", self.group, self.name)
    }

    /// Returns a human-readable description of the action.
    #[must_use]
    pub fn description(&self) -> String {
        let identity = self.identity();
        match self.action {
            ActionType::Create => format!("Create {identity}"),
            ActionType::Update => format!("Update {identity}"),
            ActionType::Delete => format!("Delete {identity}"),
            ActionType::Recreate => format!("Recreate {identity}"),
            ActionType::Read => format!("Read {identity}"),
            ActionType::NoOp => format!("No change for {identity}"),
        }
    }
}

impl std::fmt::Display for PlanEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action, self.identity())?;
        let forced: Vec<&str> = self
            .changes
            .iter()
            .filter(|c| c.forces_recreate)
            .map(|c| c.path.as_str())
            .collect();
        if !forced.is_empty() {
            write!(f, " (forced by {})", forced.join(", "))?;
        }
        Ok(())
    }
}

/// Number of entries per action.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    /// Creates.
    pub create: usize,
    /// In-place updates.
    pub update: usize,
    /// Deletes.
    pub delete: usize,
    /// Recreates.
    pub recreate: usize,
    /// Unchanged resources.
    pub unchanged: usize,
}

/// A complete deployment plan.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    entries: BTreeMap<String, PlanEntry>,
}

impl Default for Plan {
    fn default() -> Self {
        Self::new()
    }
}

impl Plan {
    /// Creates an empty plan.
    #[must_use]
    pub fn new() -> Self {
        Self {
            created_at: Utc::now(),
            entries: BTreeMap::new(),
        }
    }

    /// Adds an entry, combining it with any entry already present for the
    /// same identity.
    pub fn insert(&mut self, entry: PlanEntry) {
        let identity = entry.identity();
        match self.entries.get_mut(&identity) {
            Some(existing) => {
                existing.action = existing.action.combine(entry.action);
                existing.changes.extend(entry.changes);
            }
            None => {
                self.entries.insert(identity, entry);
            }
        }
    }

    /// Gets the entry for an identity.
    #[must_use]
    pub fn get(&self, identity: &str) -> Option<&PlanEntry> {
        self.entries.get(identity)
    }

    /// True when the identity has an entry.
    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.entries.contains_key(identity)
    }

    /// All entries, ordered by identity.
    pub fn entries(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.values()
    }

    /// Entries that change something remotely.
    pub fn changes(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.values().filter(|e| e.action.is_change())
    }

    /// Entries that require approval.
    #[must_use]
    pub fn destructive(&self) -> Vec<&PlanEntry> {
        self.entries
            .values()
            .filter(|e| e.action.is_destructive())
            .collect()
    }

    /// Returns true if the plan changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes().next().is_none()
    }

    /// Number of entries, including no-ops.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Counts entries per action.
    #[must_use]
    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for entry in self.entries.values() {
            match entry.action {
                ActionType::Create => summary.create += 1,
                ActionType::Update => summary.update += 1,
                ActionType::Delete => summary.delete += 1,
                ActionType::Recreate => summary.recreate += 1,
                ActionType::NoOp | ActionType::Read => summary.unchanged += 1,
            }
        }
        summary
    }
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to delete, {} to recreate, {} unchanged",
            self.create, self.update, self.delete, self.recreate, self.unchanged
        )
    }
}

impl std::fmt::Display for Plan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "No changes required");
        }

        let changes: Vec<&PlanEntry> = self.changes().collect();
        writeln!(f, "Deployment Plan ({} actions):", changes.len())?;
        for (i, entry) in changes.iter().enumerate() {
            writeln!(f, "  {}. {entry}", i + 1)?;
        }
        write!(f, "{}", self.summary())
    }
}
