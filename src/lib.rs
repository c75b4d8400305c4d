// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // All public items must be documented
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Deckhand
//!
//! A declarative deployment engine for bundles of remote resources.
//!
//! ## Overview
//!
//! A bundle is a YAML tree describing jobs, pipelines and other remote
//! resources, with per-target overrides and `${...}` references between
//! values. Deckhand lets you:
//!
//! - Resolve variables and references across the whole tree
//! - Compute a plan with exactly one action per resource
//! - Gate destructive actions behind an explicit approval
//! - Apply through Terraform or directly against the resource API
//! - Keep recorded state in step between a local cache and a remote store
//!
//! ## Architecture
//!
//! One invocation runs a fixed sequence of phases:
//!
//! 1. **Load**: the bundle file and its includes become a [`dyn_value::Value`] tree
//! 2. **Mutate**: the [`bundle::Pipeline`] selects the target and resolves variables
//! 3. **Plan**: a [`planner::DeployBackend`] compares desired resources with recorded state
//! 4. **Apply**: the [`apply::ApplyOrchestrator`] approves, pre-flights and executes
//! 5. **Persist**: the [`state::Snapshot`] is saved locally and pushed remotely
//!
//! ## Modules
//!
//! - [`dyn_value`]: Location-tracking value tree, paths and patterns
//! - [`interpolation`]: `${...}` reference parsing and resolution
//! - [`config`]: Bundle loading and engine settings
//! - [`bundle`]: Mutator pipeline
//! - [`planner`]: Resource normalization, diffing and backends
//! - [`apply`]: Approval, worker pools and apply orchestration
//! - [`state`]: State stores, locking, sync and the artifact gate
//! - [`api`]: Resource API client for the direct backend
//! - [`deployer`]: Phase driver for deploy, destroy, bind and unbind
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! bundle:
//!   name: etl
//!
//! variables:
//!   catalog:
//!     default: dev
//!
//! resources:
//!   jobs:
//!     nightly:
//!       name: Nightly ETL
//!       catalog: ${var.catalog}
//!       pipeline_id: ${resources.pipelines.ingest.id}
//!   pipelines:
//!     ingest:
//!       name: Ingest
//!
//! targets:
//!   dev:
//!     default: true
//!   prod:
//!     variables:
//!       catalog:
//!         default: main
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod api;
pub mod apply;
pub mod bundle;
pub mod cli;
pub mod config;
pub mod context;
pub mod deployer;
pub mod diag;
pub mod dyn_value;
pub mod error;
pub mod interpolation;
pub mod metadata;
pub mod planner;
pub mod state;

// ============================================================================
// Re-exports
// ============================================================================

pub use apply::{ApplyOrchestrator, ApplyOutcome, ApplyReport, Approver};
pub use bundle::{Mutator, Pipeline};
pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{BundleLoader, EngineSettings};
pub use context::DeployContext;
pub use deployer::{DeployOutcome, Deployer, PreparedBundle};
pub use diag::{Diagnostic, Diagnostics, Severity};
pub use dyn_value::{Path, Pattern, Value};
pub use error::{DeckhandError, Result};
pub use planner::{DeployBackend, Plan, PlanEntry, ResourceSet};
pub use state::{LocalStateStore, S3StateStore, Snapshot, StateStore};
