//! Engine settings.
//!
//! Settings control how the engine deploys, not what it deploys: which
//! backend plans and applies changes, how many remote calls run at once,
//! and where remote state lives. They are read from `deckhand.yaml` next to
//! the bundle, then overridden by `DECKHAND_*` environment variables.

use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info};
use validator::{Validate, ValidationError, ValidationErrors};

use crate::error::{ConfigError, DeckhandError, Result};

/// Name of the settings file inside a bundle root.
pub const SETTINGS_FILE: &str = "deckhand.yaml";

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "DECKHAND_";

/// Which backend plans and applies changes.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Delegate to the Terraform provisioning tool.
    #[default]
    Terraform,
    /// Call the resource API directly.
    Direct,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Terraform => "terraform",
            Self::Direct => "direct",
        })
    }
}

impl std::str::FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "terraform" => Ok(Self::Terraform),
            "direct" => Ok(Self::Direct),
            other => Err(ConfigError::validation(
                format!("unknown backend '{other}', expected 'terraform' or 'direct'"),
                "backend",
            )),
        }
    }
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Only the local cache.
    #[default]
    Local,
    /// Local cache mirrored to S3.
    S3,
}

/// Where remote state is kept.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(default)]
#[validate(schema(function = "validate_state"))]
pub struct StateSettings {
    /// Backend type.
    pub backend: StateBackend,
    /// S3 bucket name (required for the S3 backend).
    pub bucket: Option<String>,
    /// S3 key prefix; the target name is appended.
    pub prefix: Option<String>,
    /// S3 region; the AWS default chain is used when unset.
    pub region: Option<String>,
}

fn validate_state(state: &StateSettings) -> std::result::Result<(), ValidationError> {
    if state.backend == StateBackend::S3 && state.bucket.as_deref().is_none_or(str::is_empty) {
        let mut err = ValidationError::new("bucket_required");
        err.message = Some("S3 bucket name is required when using the S3 state backend".into());
        return Err(err);
    }
    Ok(())
}

/// Provisioning tool settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(default)]
pub struct TerraformSettings {
    /// Binary to run.
    #[validate(length(min = 1))]
    pub binary: String,
}

impl Default for TerraformSettings {
    fn default() -> Self {
        Self {
            binary: String::from("terraform"),
        }
    }
}

/// Resource API settings for the direct backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(default)]
pub struct ApiSettings {
    /// Base URL of the workspace.
    #[validate(url)]
    pub host: Option<String>,
    /// Environment variable holding the bearer token.
    #[validate(length(min = 1))]
    pub token_env: String,
    /// Request timeout.
    #[validate(range(min = 1, max = 600))]
    pub timeout_secs: u64,
    /// Retries for rate limits, server and network errors.
    #[validate(range(max = 10))]
    pub max_retries: u32,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: None,
            token_env: String::from("DECKHAND_TOKEN"),
            timeout_secs: 30,
            max_retries: 3,
        }
    }
}

/// Settings for one engine invocation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Validate)]
#[serde(default)]
pub struct EngineSettings {
    /// Planning and apply backend.
    pub backend: BackendKind,
    /// Remote calls in flight per phase.
    #[validate(range(min = 1, max = 256))]
    pub concurrency: usize,
    /// Refuse to destroy jobs and pipelines that are running.
    pub fail_on_active_runs: bool,
    /// Skip the destructive-action prompt.
    pub auto_approve: bool,
    /// Provisioning tool settings.
    #[validate(nested)]
    pub terraform: TerraformSettings,
    /// Resource API settings.
    #[validate(nested)]
    pub api: ApiSettings,
    /// Remote state settings.
    #[validate(nested)]
    pub state: StateSettings,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            concurrency: crate::apply::DEFAULT_CONCURRENCY,
            fail_on_active_runs: false,
            auto_approve: false,
            terraform: TerraformSettings::default(),
            api: ApiSettings::default(),
            state: StateSettings::default(),
        }
    }
}

impl EngineSettings {
    /// Loads settings for the bundle rooted at `root`.
    ///
    /// Reads `.env` and `deckhand.yaml` when present, applies environment
    /// overrides and validates the result.
    ///
    /// # Errors
    ///
    /// Fails when a file cannot be parsed or the settings are invalid.
    pub fn load(root: &Path) -> Result<Self> {
        load_dotenv(root)?;

        let path = root.join(SETTINGS_FILE);
        let mut settings = if path.exists() {
            info!("Loading settings from: {}", path.display());
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })?;
            Self::parse_yaml(&content, Some(&path))?
        } else {
            debug!("No {SETTINGS_FILE} in {}; using defaults", root.display());
            Self::default()
        };

        settings.apply_env_overrides_from(|key| std::env::var(key).ok())?;
        settings.check()?;
        Ok(settings)
    }

    /// Parses settings from YAML without validating them.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(content: &str, source: Option<&Path>) -> Result<Self> {
        serde_yaml::from_str(content).map_err(|e| {
            DeckhandError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location: source.map(|p| p.display().to_string()),
            })
        })
    }

    /// Applies `DECKHAND_*` overrides read through `lookup`.
    ///
    /// # Errors
    ///
    /// Fails when an override cannot be parsed.
    pub fn apply_env_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));

        if let Some(backend) = var("BACKEND") {
            debug!("Overriding backend from environment");
            self.backend = backend.parse()?;
        }
        if let Some(concurrency) = var("CONCURRENCY") {
            debug!("Overriding concurrency from environment");
            self.concurrency = parse_override("CONCURRENCY", &concurrency)?;
        }
        if let Some(flag) = var("FAIL_ON_ACTIVE_RUNS") {
            self.fail_on_active_runs = parse_override("FAIL_ON_ACTIVE_RUNS", &flag)?;
        }
        if let Some(flag) = var("AUTO_APPROVE") {
            self.auto_approve = parse_override("AUTO_APPROVE", &flag)?;
        }
        if let Some(binary) = var("TERRAFORM_BINARY") {
            self.terraform.binary = binary;
        }
        if let Some(host) = var("HOST") {
            debug!("Overriding api.host from environment");
            self.api.host = Some(host);
        }
        if let Some(bucket) = var("STATE_BUCKET") {
            debug!("Overriding state.bucket from environment");
            self.state.backend = StateBackend::S3;
            self.state.bucket = Some(bucket);
        }
        if let Some(prefix) = var("STATE_PREFIX") {
            self.state.prefix = Some(prefix);
        }
        if let Some(region) = var("STATE_REGION") {
            self.state.region = Some(region);
        }
        Ok(())
    }

    /// Validates the settings.
    ///
    /// # Errors
    ///
    /// Returns the first validation failure as a [`ConfigError`].
    pub fn check(&self) -> Result<()> {
        self.validate().map_err(|errors| first_failure(&errors).into())
    }

    /// Reads the API token from the configured environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingEnvVar`] when it is unset.
    pub fn api_token(&self) -> Result<String> {
        std::env::var(&self.api.token_env).map_err(|_| {
            ConfigError::MissingEnvVar {
                name: self.api.token_env.clone(),
            }
            .into()
        })
    }

    /// The API host.
    ///
    /// # Errors
    ///
    /// Fails when no host is configured.
    pub fn api_host(&self) -> Result<&str> {
        self.api.host.as_deref().ok_or_else(|| {
            ConfigError::MissingEnvVar {
                name: format!("{ENV_PREFIX}HOST"),
            }
            .into()
        })
    }
}

fn parse_override<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim().parse().map_err(|_| {
        ConfigError::validation(
            format!("invalid value '{raw}' for {ENV_PREFIX}{name}"),
            name.to_ascii_lowercase(),
        )
        .into()
    })
}

/// Flattens nested validator errors into the first `field: message` pair.
fn first_failure(errors: &ValidationErrors) -> ConfigError {
    fn walk(errors: &ValidationErrors, prefix: &str) -> Option<(String, String)> {
        for (field, kind) in errors.errors() {
            let field = if prefix.is_empty() {
                field.to_string()
            } else if *field == "__all__" {
                prefix.to_string()
            } else {
                format!("{prefix}.{field}")
            };
            match kind {
                validator::ValidationErrorsKind::Field(list) => {
                    if let Some(error) = list.first() {
                        let message = error
                            .message
                            .as_ref()
                            .map_or_else(|| format!("failed '{}' check", error.code), ToString::to_string);
                        return Some((field, message));
                    }
                }
                validator::ValidationErrorsKind::Struct(nested) => {
                    if let Some(found) = walk(nested, &field) {
                        return Some(found);
                    }
                }
                validator::ValidationErrorsKind::List(items) => {
                    for nested in items.values() {
                        if let Some(found) = walk(nested, &field) {
                            return Some(found);
                        }
                    }
                }
            }
        }
        None
    }

    let (field, message) = walk(errors, "").unwrap_or_else(|| (String::new(), errors.to_string()));
    ConfigError::validation(message, field)
}

/// Loads `.env` from `root` if present.
///
/// # Errors
///
/// Returns an error if the file exists but cannot be loaded.
pub fn load_dotenv(root: &Path) -> Result<()> {
    let env_path = root.join(".env");
    if env_path.exists() {
        info!("Loading environment from: {}", env_path.display());
        dotenvy::from_path(&env_path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to load .env file: {e}"),
            location: Some(env_path.display().to_string()),
        })?;
    } else {
        debug!(".env file not found at: {}", env_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = EngineSettings::default();
        assert!(settings.check().is_ok());
        assert_eq!(settings.backend, BackendKind::Terraform);
        assert_eq!(settings.concurrency, 10);
    }

    #[test]
    fn test_parse_partial_yaml() {
        let yaml = r"
backend: direct
fail_on_active_runs: true
api:
  host: https://workspace.example.com
";
        let settings = EngineSettings::parse_yaml(yaml, None).expect("parse");
        assert_eq!(settings.backend, BackendKind::Direct);
        assert!(settings.fail_on_active_runs);
        assert_eq!(settings.api.host.as_deref(), Some("https://workspace.example.com"));
        assert_eq!(settings.api.token_env, "DECKHAND_TOKEN");
        assert_eq!(settings.concurrency, 10);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("DECKHAND_BACKEND", "Direct"),
            ("DECKHAND_CONCURRENCY", "4"),
            ("DECKHAND_STATE_BUCKET", "team-state"),
        ]
        .into_iter()
        .collect();

        let mut settings = EngineSettings::default();
        settings
            .apply_env_overrides_from(|key| env.get(key).map(ToString::to_string))
            .expect("overrides");

        assert_eq!(settings.backend, BackendKind::Direct);
        assert_eq!(settings.concurrency, 4);
        assert_eq!(settings.state.backend, StateBackend::S3);
        assert_eq!(settings.state.bucket.as_deref(), Some("team-state"));
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let mut settings = EngineSettings::default();
        let result = settings.apply_env_overrides_from(|key| {
            (key == "DECKHAND_CONCURRENCY").then(|| String::from("lots"))
        });
        assert!(matches!(
            result,
            Err(DeckhandError::Config(ConfigError::ValidationError { .. }))
        ));
    }

    #[test]
    fn test_validation_failures_name_the_field() {
        let mut settings = EngineSettings {
            concurrency: 0,
            ..EngineSettings::default()
        };
        match settings.check() {
            Err(DeckhandError::Config(ConfigError::ValidationError { field, .. })) => {
                assert_eq!(field.as_deref(), Some("concurrency"));
            }
            other => panic!("unexpected result: {other:?}"),
        }

        settings.concurrency = 2;
        settings.state.backend = StateBackend::S3;
        match settings.check() {
            Err(DeckhandError::Config(ConfigError::ValidationError { message, field })) => {
                assert_eq!(field.as_deref(), Some("state"));
                assert!(message.contains("bucket"));
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_load_reads_settings_file() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(dir.path().join(SETTINGS_FILE), "concurrency: 3\n").expect("write");

        let settings = EngineSettings::load(dir.path()).expect("load");
        assert_eq!(settings.concurrency, 3);
    }
}
