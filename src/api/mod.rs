//! Remote resource API.
//!
//! This module provides the client the direct backend uses to create,
//! update, delete and inspect remote resources without a provisioning tool.

mod client;
mod types;

pub use client::HttpResourceClient;
pub use types::{RemoteObject, ResourceClient};
