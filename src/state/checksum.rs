//! Content checksums over a source tree.
//!
//! The checksum covers every regular file under the root, hashed in sorted
//! order of their relative paths, with build output and dependency
//! directories left out.

use sha2::{Digest, Sha256};
use std::path::Path;
use walkdir::{DirEntry, WalkDir};

use crate::error::{Result, StateError};

/// Directory names never included in a checksum.
pub const EXCLUDED_DIRS: &[&str] = &[
    ".git",
    "target",
    "node_modules",
    ".venv",
    "__pycache__",
    "dist",
    "build",
    ".deckhand",
];

fn is_excluded(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| EXCLUDED_DIRS.contains(&name))
}

/// Computes the hex SHA-256 checksum of the tree rooted at `root`.
///
/// # Errors
///
/// Fails when the tree cannot be walked or a file cannot be read.
pub fn compute_checksum(root: &Path) -> Result<String> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).into_iter().filter_entry(|e| !is_excluded(e)) {
        let entry = entry
            .map_err(|e| StateError::filesystem(format!("Failed to walk {}: {e}", root.display())))?;
        if entry.file_type().is_file() {
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| StateError::filesystem(e.to_string()))?
                .to_string_lossy()
                .replace('\\', "/");
            files.push((relative, entry.into_path()));
        }
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (relative, path) in files {
        let content = std::fs::read(&path)
            .map_err(|e| StateError::filesystem(format!("Failed to read {}: {e}", path.display())))?;
        hasher.update(relative.as_bytes());
        hasher.update([0u8]);
        hasher.update((content.len() as u64).to_be_bytes());
        hasher.update(&content);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn project() -> TempDir {
        let temp = TempDir::new().expect("temp dir");
        fs::create_dir_all(temp.path().join("src")).expect("mkdir");
        fs::write(temp.path().join("src/main.py"), "print('hi')").expect("write");
        fs::write(temp.path().join("app.yaml"), "name: demo").expect("write");
        temp
    }

    #[test]
    fn test_checksum_is_stable() {
        let temp = project();
        let a = compute_checksum(temp.path()).expect("checksum");
        let b = compute_checksum(temp.path()).expect("checksum");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_checksum_changes_with_content() {
        let temp = project();
        let before = compute_checksum(temp.path()).expect("checksum");
        fs::write(temp.path().join("src/main.py"), "print('bye')").expect("write");
        assert_ne!(before, compute_checksum(temp.path()).expect("checksum"));
    }

    #[test]
    fn test_excluded_directories_are_ignored() {
        let temp = project();
        let before = compute_checksum(temp.path()).expect("checksum");
        for dir in ["node_modules/pkg", ".git", "__pycache__", ".deckhand/dev"] {
            fs::create_dir_all(temp.path().join(dir)).expect("mkdir");
            fs::write(temp.path().join(dir).join("junk"), "x").expect("write");
        }
        assert_eq!(before, compute_checksum(temp.path()).expect("checksum"));
    }

    #[test]
    fn test_renaming_a_file_changes_checksum() {
        let temp = project();
        let before = compute_checksum(temp.path()).expect("checksum");
        fs::rename(temp.path().join("app.yaml"), temp.path().join("app2.yaml")).expect("rename");
        assert_ne!(before, compute_checksum(temp.path()).expect("checksum"));
    }
}
