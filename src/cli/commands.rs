//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config::BackendKind;

/// Deckhand - Declarative bundle deployment engine.
#[derive(Parser, Debug)]
#[command(name = "deckhand")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the bundle file.
    #[arg(short, long, global = true, env = "DECKHAND_BUNDLE")]
    pub bundle: Option<PathBuf>,

    /// Deployment target.
    #[arg(short, long, global = true, env = "DECKHAND_TARGET")]
    pub target: Option<String>,

    /// Variable value, as `name=value`. May be repeated.
    #[arg(long = "var", global = true, value_parser = parse_var)]
    pub vars: Vec<(String, String)>,

    /// Deployment backend, overriding the settings file.
    #[arg(long, global = true)]
    pub backend: Option<BackendKind>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Check that the bundle loads and resolves.
    Validate,

    /// Show what a deploy would change.
    Plan,

    /// Deploy the bundle to the target.
    Deploy {
        /// Skip confirmation of destructive actions.
        #[arg(short, long)]
        yes: bool,
    },

    /// Delete every resource recorded for the target.
    Destroy {
        /// Skip confirmation prompt.
        #[arg(short, long)]
        yes: bool,
    },

    /// Attach an existing remote object to a bundle resource.
    Bind {
        /// Resource identity, as `group.name`.
        identity: String,

        /// Remote identifier of the object.
        id: String,
    },

    /// Forget a bound resource without deleting it.
    Unbind {
        /// Resource identity, as `group.name`.
        identity: String,
    },

    /// Manage recorded state.
    State {
        /// State subcommand.
        #[command(subcommand)]
        command: StateCommands,
    },

    /// Manage deployable artifacts.
    Artifact {
        /// Artifact subcommand.
        #[command(subcommand)]
        command: ArtifactCommands,
    },
}

/// State management subcommands.
#[derive(Subcommand, Debug)]
pub enum StateCommands {
    /// Show current state.
    Show,

    /// Pull state from remote backend.
    Pull,

    /// Push state to remote backend.
    Push,
}

/// Artifact subcommands.
#[derive(Subcommand, Debug)]
pub enum ArtifactCommands {
    /// Record the checksum of the artifact sources.
    Validate {
        /// Artifact source directory.
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Mark the artifact deployed if its sources are unchanged.
    Deploy {
        /// Artifact source directory.
        #[arg(default_value = ".")]
        path: PathBuf,
    },
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// Parses a `name=value` assignment.
fn parse_var(raw: &str) -> Result<(String, String), String> {
    let (name, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected name=value, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("variable name is empty in '{raw}'"));
    }
    Ok((name.to_string(), value.to_string()))
}

impl Cli {
    /// Parses CLI arguments from the command line.
    #[must_use]
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Variable assignments keyed by name; later assignments win.
    #[must_use]
    pub fn variables(&self) -> std::collections::BTreeMap<String, String> {
        self.vars.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "deckhand", "deploy", "--target", "prod", "--var", "owner=ops", "--var", "owner=data", "-y",
        ])
        .expect("parse");

        assert_eq!(cli.target.as_deref(), Some("prod"));
        assert_eq!(cli.variables().get("owner").map(String::as_str), Some("data"));
        assert!(matches!(cli.command, Commands::Deploy { yes: true }));
    }

    #[test]
    fn test_var_requires_assignment() {
        assert!(Cli::try_parse_from(["deckhand", "plan", "--var", "owner"]).is_err());
        assert!(Cli::try_parse_from(["deckhand", "plan", "--var", "=x"]).is_err());
        let cli = Cli::try_parse_from(["deckhand", "plan", "--var", "query=a=b"]).expect("parse");
        assert_eq!(cli.vars, vec![("query".to_string(), "a=b".to_string())]);
    }

    #[test]
    fn test_bind_and_backend_override() {
        let cli = Cli::try_parse_from(["deckhand", "--backend", "direct", "bind", "jobs.nightly", "42"])
            .expect("parse");
        assert_eq!(cli.backend, Some(BackendKind::Direct));
        match cli.command {
            Commands::Bind { identity, id } => {
                assert_eq!(identity, "jobs.nightly");
                assert_eq!(id, "42");
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
