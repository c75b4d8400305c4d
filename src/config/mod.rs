//! Configuration module for the deckhand engine.
//!
//! This module handles all configuration-related functionality:
//! - Finding and loading bundle files into value trees
//! - Choosing the deployment target
//! - Engine settings from `deckhand.yaml`, `.env` and `DECKHAND_*` variables

mod loader;
mod settings;

pub use loader::{BundleLoader, DEFAULT_BUNDLE_FILES, DEFAULT_TARGET, find_bundle_file, select_target};
pub use settings::{
    ApiSettings, BackendKind, ENV_PREFIX, EngineSettings, SETTINGS_FILE, StateBackend, StateSettings,
    TerraformSettings, load_dotenv,
};
