//! Bundle loading.
//!
//! This module finds the bundle file, parses it and every file it includes
//! into a single value tree, and picks the deployment target.

use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::dyn_value::{Location, Value, ValueKind, merge};
use crate::error::{ConfigError, DeckhandError, Result};

/// Bundle file names, in lookup order.
pub const DEFAULT_BUNDLE_FILES: &[&str] = &["bundle.yaml", "bundle.yml", "databricks.yml"];

/// Target used when a bundle declares none.
pub const DEFAULT_TARGET: &str = "default";

/// Loads bundle files into value trees.
#[derive(Debug, Default)]
pub struct BundleLoader {
    /// Base path for resolving relative includes.
    base_path: Option<PathBuf>,
}

impl BundleLoader {
    /// Creates a new loader.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative includes.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads a bundle file and the files listed under its `include` key.
    ///
    /// Included files are merged over the main file in the order they are
    /// listed. The `include` key itself is dropped from the result.
    ///
    /// # Errors
    ///
    /// Returns an error if a file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        info!("Loading bundle from: {}", path.display());

        let mut tree = self.read_one(path)?;
        let includes = take_includes(&mut tree, path)?;

        let base = self
            .base_path
            .clone()
            .or_else(|| path.parent().map(Path::to_path_buf))
            .unwrap_or_default();
        for include in includes {
            let included = base.join(&include);
            debug!("Including {}", included.display());
            let mut fragment = self.read_one(&included)?;
            if !take_includes(&mut fragment, &included)?.is_empty() {
                return Err(ConfigError::ParseError {
                    message: String::from("included files cannot include further files"),
                    location: Some(included.display().to_string()),
                }
                .into());
            }
            tree = merge(tree, fragment);
        }

        Ok(tree)
    }

    fn read_one(&self, path: &Path) -> Result<Value> {
        if !path.exists() {
            return Err(DeckhandError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            message: format!("Failed to read file: {e}"),
            location: Some(path.display().to_string()),
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses a bundle from a YAML string.
    ///
    /// Every node is tagged with the file it came from.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<Value> {
        debug!("Parsing YAML bundle");
        let file = source.map_or_else(|| String::from("<inline>"), |p| p.display().to_string());

        let yaml: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            message: format!("YAML parse error: {e}"),
            location: Some(
                e.location()
                    .map_or_else(|| file.clone(), |l| format!("{file}:{}:{}", l.line(), l.column())),
            ),
        })?;

        let tree = Value::from_yaml(yaml, &Location::file(file))?;
        match tree.kind() {
            ValueKind::Mapping(_) => Ok(tree),
            ValueKind::Null => Ok(Value::empty_mapping().located(tree.locations().to_vec())),
            _ => Err(ConfigError::ParseError {
                message: format!("a bundle must be a mapping, found {}", tree.kind_name()),
                location: source.map(|p| p.display().to_string()),
            }
            .into()),
        }
    }
}

fn take_includes(tree: &mut Value, source: &Path) -> Result<Vec<String>> {
    let Some(includes) = tree.remove(&crate::dyn_value::Path::from_keys(["include"])) else {
        return Ok(Vec::new());
    };
    if includes.is_null() {
        return Ok(Vec::new());
    }
    includes
        .as_sequence()
        .and_then(|items| items.iter().map(|i| i.as_str().map(String::from)).collect())
        .ok_or_else(|| {
            ConfigError::ParseError {
                message: String::from("'include' must be a list of relative file paths"),
                location: Some(source.display().to_string()),
            }
            .into()
        })
}

/// Picks the deployment target of a bundle.
///
/// An explicit request wins; otherwise the target marked `default: true`,
/// then the only declared target, then [`DEFAULT_TARGET`].
///
/// # Errors
///
/// Fails when the requested target is not declared, or when several
/// targets exist and none is marked default.
pub fn select_target(tree: &Value, requested: Option<&str>) -> Result<String> {
    let targets = tree.get_key("targets").and_then(Value::as_mapping);

    if let Some(requested) = requested {
        return match targets {
            Some(targets) if targets.contains_key(requested) => Ok(requested.to_string()),
            None if requested == DEFAULT_TARGET => Ok(requested.to_string()),
            _ => Err(ConfigError::UnknownTarget {
                target: requested.to_string(),
            }
            .into()),
        };
    }

    let Some(targets) = targets.filter(|t| !t.is_empty()) else {
        return Ok(DEFAULT_TARGET.to_string());
    };

    let marked: Vec<&String> = targets
        .iter()
        .filter(|(_, t)| {
            t.get_key("default")
                .is_some_and(|d| matches!(d.kind(), ValueKind::Bool(true)))
        })
        .map(|(name, _)| name)
        .collect();

    match (marked.as_slice(), targets.len()) {
        ([only], _) => Ok((*only).clone()),
        ([], 1) => Ok(targets.keys().next().cloned().unwrap_or_default()),
        ([], _) => Err(ConfigError::validation(
            "several targets are declared and none is marked 'default: true'; pick one explicitly",
            "targets",
        )
        .into()),
        (_, _) => Err(ConfigError::validation("more than one target is marked 'default: true'", "targets").into()),
    }
}

/// Finds the bundle file in `start_dir` or any parent directory.
///
/// # Errors
///
/// Returns an error if no bundle file is found.
pub fn find_bundle_file(start_dir: impl AsRef<Path>) -> Result<PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_BUNDLE_FILES {
            let bundle_path = current.join(filename);
            if bundle_path.exists() {
                info!("Found bundle file: {}", bundle_path.display());
                return Ok(bundle_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(DeckhandError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_BUNDLE_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dyn_value::Path as TreePath;
    use tempfile::TempDir;

    fn path(text: &str) -> TreePath {
        text.parse().expect("valid path")
    }

    #[test]
    fn test_parse_minimal_bundle() {
        let yaml = r"
bundle:
  name: etl
resources:
  jobs:
    nightly:
      name: Nightly ETL
";
        let tree = BundleLoader::new().parse_yaml(yaml, None).expect("parse");
        assert_eq!(
            tree.get(&path("resources.jobs.nightly.name")).map(Value::as_str),
            Ok(Some("Nightly ETL"))
        );
        assert_eq!(tree.locations()[0].file, "<inline>");
    }

    #[test]
    fn test_empty_file_is_an_empty_bundle() {
        let tree = BundleLoader::new().parse_yaml("", None).expect("parse");
        assert!(tree.as_mapping().is_some_and(indexmap::IndexMap::is_empty));
    }

    #[test]
    fn test_scalar_bundle_is_rejected() {
        assert!(BundleLoader::new().parse_yaml("42", None).is_err());
    }

    #[test]
    fn test_includes_are_merged_in_order() {
        let dir = TempDir::new().expect("temp dir");
        std::fs::write(
            dir.path().join("bundle.yml"),
            "bundle:\n  name: etl\ninclude:\n  - jobs.yml\n",
        )
        .expect("write");
        std::fs::write(
            dir.path().join("jobs.yml"),
            "resources:\n  jobs:\n    nightly:\n      name: Nightly\n",
        )
        .expect("write");

        let tree = BundleLoader::new()
            .load_file(dir.path().join("bundle.yml"))
            .expect("load");
        assert!(tree.get_key("include").is_none());
        assert!(tree.get(&path("resources.jobs.nightly")).is_ok());
        let location = &tree.get(&path("resources.jobs.nightly.name")).expect("name").locations()[0];
        assert!(location.file.ends_with("jobs.yml"));
    }

    #[test]
    fn test_missing_file() {
        let result = BundleLoader::new().load_file("/nonexistent/bundle.yml");
        assert!(matches!(
            result,
            Err(DeckhandError::Config(ConfigError::FileNotFound { .. }))
        ));
    }

    #[test]
    fn test_find_bundle_file_walks_up() {
        let dir = TempDir::new().expect("temp dir");
        let nested = dir.path().join("src").join("jobs");
        std::fs::create_dir_all(&nested).expect("mkdir");
        std::fs::write(dir.path().join("databricks.yml"), "bundle: {}\n").expect("write");

        let found = find_bundle_file(&nested).expect("found");
        assert_eq!(found, dir.path().join("databricks.yml"));
    }

    #[test]
    fn test_select_target() {
        let loader = BundleLoader::new();
        let single = loader.parse_yaml("targets:\n  dev: {}\n", None).expect("parse");
        assert_eq!(select_target(&single, None).expect("target"), "dev");

        let marked = loader
            .parse_yaml("targets:\n  dev: {}\n  prod:\n    default: true\n", None)
            .expect("parse");
        assert_eq!(select_target(&marked, None).expect("target"), "prod");
        assert_eq!(select_target(&marked, Some("dev")).expect("target"), "dev");
        assert!(matches!(
            select_target(&marked, Some("qa")),
            Err(DeckhandError::Config(ConfigError::UnknownTarget { .. }))
        ));

        let ambiguous = loader.parse_yaml("targets:\n  a: {}\n  b: {}\n", None).expect("parse");
        assert!(select_target(&ambiguous, None).is_err());

        let none = loader.parse_yaml("bundle: {}\n", None).expect("parse");
        assert_eq!(select_target(&none, None).expect("target"), DEFAULT_TARGET);
    }
}
