//! Plan execution.
//!
//! This module gates destructive actions behind approval, runs independent
//! remote operations through bounded worker pools, and merges what
//! succeeded into the recorded state.

mod approval;
mod orchestrator;
mod pool;

pub use approval::{Approver, AutoApprove, PromptApprover, StdinApprover};
pub use orchestrator::{ApplyOrchestrator, ApplyOutcome, ApplyReport};
pub use pool::{Batch, DEFAULT_CONCURRENCY, WorkerPool};
