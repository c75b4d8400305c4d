//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use serde_json::json;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::apply::ApplyReport;
use crate::deployer::DeployOutcome;
use crate::diag::{Diagnostic, Diagnostics, Severity};
use crate::planner::{ActionType, Plan, PlanEntry};
use crate::state::{ArtifactState, Snapshot, SyncOutcome};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Changes")]
    changes: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct ResourceRow {
    #[tabled(rename = "Resource")]
    identity: String,
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "ETag")]
    etag: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a deployment plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(plan).unwrap_or_default(),
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan) -> String {
        let changes: Vec<&PlanEntry> = plan.changes().collect();
        if changes.is_empty() {
            return format!("{} No changes required - deployment is up to date.\n", "✓".green());
        }

        let mut output = String::from("\nDeployment Plan\n\n");

        let rows: Vec<PlanActionRow> = changes
            .iter()
            .enumerate()
            .map(|(i, entry)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_type(entry.action),
                resource: entry.identity(),
                changes: Self::format_field_changes(entry),
            })
            .collect();
        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        let summary = plan.summary();
        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to recreate, {} to delete\n",
            summary.create.to_string().green(),
            summary.update.to_string().yellow(),
            summary.recreate.to_string().magenta(),
            summary.delete.to_string().red()
        );

        let destructive = plan.destructive();
        if !destructive.is_empty() {
            let _ = write!(
                output,
                "\n{} {} action(s) will destroy existing resources.\n",
                "⚠".yellow(),
                destructive.len()
            );
        }

        output
    }

    /// Lists the changed field paths of an entry, marking recreate triggers.
    fn format_field_changes(entry: &PlanEntry) -> String {
        let paths: Vec<String> = entry
            .changes
            .iter()
            .map(|c| {
                if c.forces_recreate {
                    format!("{} (forces recreate)", c.path)
                } else {
                    c.path.clone()
                }
            })
            .collect();
        Self::truncate(&paths.join(", "), 60)
    }

    /// Formats the result of a deploy or destroy.
    #[must_use]
    pub fn format_outcome(&self, outcome: &DeployOutcome) -> String {
        match (self.format, outcome) {
            (OutputFormat::Json, DeployOutcome::Applied { plan, report }) => {
                serde_json::to_string_pretty(&json!({ "status": "applied", "plan": plan, "report": report }))
                    .unwrap_or_default()
            }
            (OutputFormat::Json, DeployOutcome::Declined { plan }) => {
                serde_json::to_string_pretty(&json!({ "status": "declined", "plan": plan })).unwrap_or_default()
            }
            (OutputFormat::Text, DeployOutcome::Applied { report, .. }) => Self::format_report_text(report),
            (OutputFormat::Text, DeployOutcome::Declined { .. }) => {
                format!("{} Destructive actions declined; nothing was changed.\n", "✗".yellow())
            }
        }
    }

    /// Formats an apply report as text.
    fn format_report_text(report: &ApplyReport) -> String {
        if report.applied.is_empty() && report.failed.is_empty() {
            return format!("{} Nothing to apply.\n", "✓".green());
        }

        let mut output = String::new();
        for (identity, action) in &report.applied {
            let _ = writeln!(output, "   {} {identity}", Self::format_action_type(*action));
        }
        for (identity, reason) in &report.failed {
            let _ = writeln!(output, "   {} {identity}: {reason}", "failed".red());
        }

        let marker = if report.is_success() {
            "✓".green()
        } else {
            "✗".red()
        };
        let _ = write!(output, "\n{marker} {report}\n");
        output
    }

    /// Formats the recorded state of a target.
    #[must_use]
    pub fn format_state(&self, snapshot: Option<&Snapshot>) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(&snapshot).unwrap_or_default(),
            OutputFormat::Text => {
                let Some(snapshot) = snapshot else {
                    return "   No state recorded for this target.\n".to_string();
                };

                let mut output = String::new();
                let _ = write!(
                    output,
                    "\nState serial {} (lineage {})\n   Last updated: {}\n\n",
                    snapshot.serial,
                    snapshot.lineage,
                    snapshot.last_updated.format("%Y-%m-%d %H:%M:%S UTC")
                );

                if snapshot.resources.is_empty() {
                    output.push_str("   No resources recorded.\n");
                    return output;
                }

                let rows: Vec<ResourceRow> = snapshot
                    .resources
                    .iter()
                    .map(|(identity, entry)| ResourceRow {
                        identity: identity.clone(),
                        id: entry.id.clone(),
                        etag: entry.etag.clone().unwrap_or_else(|| "-".to_string()),
                    })
                    .collect();
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output
            }
        }
    }

    /// Formats bundle diagnostics.
    #[must_use]
    pub fn format_diagnostics(&self, diagnostics: &Diagnostics) -> String {
        match self.format {
            OutputFormat::Json => {
                let list: Vec<serde_json::Value> = diagnostics.iter().map(Self::diagnostic_json).collect();
                serde_json::to_string_pretty(&list).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();
                for diagnostic in diagnostics.iter() {
                    let label = match diagnostic.severity {
                        Severity::Error => diagnostic.severity.to_string().red(),
                        Severity::Warning => diagnostic.severity.to_string().yellow(),
                        Severity::Recommendation => diagnostic.severity.to_string().cyan(),
                    };
                    let text = diagnostic.to_string();
                    let rest = text.split_once(": ").map_or(text.as_str(), |(_, rest)| rest);
                    let _ = writeln!(output, "{label}: {rest}\n");
                }
                output
            }
        }
    }

    fn diagnostic_json(diagnostic: &Diagnostic) -> serde_json::Value {
        json!({
            "severity": diagnostic.severity.to_string().to_lowercase(),
            "summary": diagnostic.summary,
            "detail": diagnostic.detail,
            "paths": diagnostic.paths.iter().map(ToString::to_string).collect::<Vec<_>>(),
            "locations": diagnostic.locations.iter().map(ToString::to_string).collect::<Vec<_>>(),
        })
    }

    /// Formats the result of a state pull or push.
    #[must_use]
    pub fn format_sync(&self, direction: &str, outcome: SyncOutcome) -> String {
        let changed = outcome == SyncOutcome::Replaced;
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&json!({ "direction": direction, "changed": changed }))
                    .unwrap_or_default()
            }
            OutputFormat::Text if changed => format!("{} State {direction} complete.\n", "✓".green()),
            OutputFormat::Text => format!("{} State already up to date; nothing to {direction}.\n", "✓".green()),
        }
    }

    /// Formats an artifact state.
    #[must_use]
    pub fn format_artifact(&self, state: &ArtifactState) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(state).unwrap_or_default(),
            OutputFormat::Text => {
                let checksum = state.checksum().map_or_else(String::new, |c| {
                    format!(" (checksum {})", Self::truncate(c, 12))
                });
                format!("{} Artifact is {}{checksum}\n", "✓".green(), state.status().as_str())
            }
        }
    }

    /// Formats an action type with color.
    fn format_action_type(action_type: ActionType) -> String {
        match action_type {
            ActionType::Create => "create".green().to_string(),
            ActionType::Update => "update".yellow().to_string(),
            ActionType::Recreate => "recreate".magenta().to_string(),
            ActionType::Delete => "delete".red().to_string(),
            ActionType::Read => "read".cyan().to_string(),
            ActionType::NoOp => "no-op".dimmed().to_string(),
        }
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{kept}...")
        }
    }
}
