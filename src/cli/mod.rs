//! CLI module for the Deckhand deployment engine.
//!
//! This module provides the command-line interface for planning, deploying
//! and destroying bundles.

mod commands;
mod output;

pub use commands::{ArtifactCommands, Cli, Commands, OutputFormat, StateCommands};
pub use output::OutputFormatter;
