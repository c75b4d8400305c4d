//! Planning module for deployment operations.
//!
//! This module normalizes the desired resources of a bundle, compares them
//! with recorded state through one of two backends, and produces a
//! [`Plan`] with exactly one action per resource identity.

mod backend;
mod diff;
mod direct;
mod executor;
mod graph;
mod plan;
mod resources;
mod terraform;
mod tool;

pub use backend::{DeployBackend, TerraformBackend};
pub use diff::DiffEngine;
pub use direct::{DirectBackend, resolve_recorded};
pub use executor::{ActionResult, ExecutionResult, StateChange};
pub use graph::{dependencies, execution_levels};
pub use plan::{ActionType, FieldChange, Plan, PlanEntry, PlanSummary};
pub use resources::{DesiredResource, ResourceKey, ResourceSet};
pub use terraform::{address, convert_state, render_graph, translate_plan};
pub use tool::{GRAPH_FILE, ProvisioningTool, TOOL_STATE_FILE, TerraformCli};
