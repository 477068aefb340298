//! Local model directory check
//!
//! The service never downloads models. It only verifies that the directory
//! handed over by the provisioner looks usable before the engine loads it.

use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::models::{EmbeddingError, EmbeddingResult};

/// Files whose presence anywhere under the directory marks it as usable
pub const KEY_FILES: [&str; 3] = ["tokenizer.json", "config.json", "sentencepiece.bpe.model"];

/// Outcome of inspecting a model directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DirectoryStatus {
    /// A key file was found at this path
    KeyFile(PathBuf),
    /// No key file, but the directory has content
    NonEmpty,
    /// Directory exists and is empty
    Incomplete,
    /// Path does not exist or is not a directory
    Missing,
}

impl DirectoryStatus {
    pub fn is_usable(&self) -> bool {
        matches!(self, DirectoryStatus::KeyFile(_) | DirectoryStatus::NonEmpty)
    }
}

/// A local model directory produced by the provisioner
#[derive(Debug, Clone)]
pub struct ModelDirectory {
    root: PathBuf,
}

impl ModelDirectory {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Inspect the directory
    pub fn status(&self) -> DirectoryStatus {
        if !self.root.is_dir() {
            return DirectoryStatus::Missing;
        }
        for key in KEY_FILES {
            if let Some(found) = find_file(&self.root, key) {
                debug!("Found key file {}", found.display());
                return DirectoryStatus::KeyFile(found);
            }
        }
        match fs::read_dir(&self.root).map(|mut entries| entries.next().is_some()) {
            Ok(true) => DirectoryStatus::NonEmpty,
            _ => DirectoryStatus::Incomplete,
        }
    }

    /// Fail with `LoadFailure` unless the directory is usable
    pub fn ensure_usable(&self) -> EmbeddingResult<()> {
        match self.status() {
            DirectoryStatus::Missing => Err(EmbeddingError::LoadFailure {
                error: format!("model directory not found: {}", self.root.display()),
            }),
            DirectoryStatus::Incomplete => Err(EmbeddingError::LoadFailure {
                error: format!("model directory is incomplete: {}", self.root.display()),
            }),
            _ => Ok(()),
        }
    }

    /// Locate the first existing candidate relative to the root
    pub fn locate(&self, candidates: &[&str]) -> Option<PathBuf> {
        candidates
            .iter()
            .map(|c| self.root.join(c))
            .find(|p| p.is_file())
    }
}

/// First regular file named `name` beneath `dir`. Symlinks are not followed.
fn find_file(dir: &Path, name: &str) -> Option<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .find(|e| e.file_type().is_file() && e.file_name() == name)
        .map(|e| e.into_path())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_directory() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ModelDirectory::new(tmp.path().join("nope"));
        assert_eq!(dir.status(), DirectoryStatus::Missing);
        assert!(matches!(dir.ensure_usable(), Err(EmbeddingError::LoadFailure { .. })));
    }

    #[test]
    fn test_empty_directory_is_incomplete() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = ModelDirectory::new(tmp.path());
        assert_eq!(dir.status(), DirectoryStatus::Incomplete);
        assert!(dir.ensure_usable().is_err());
    }

    #[test]
    fn test_nested_key_file() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("snapshots").join("abc");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("tokenizer.json"), "{}").unwrap();

        let dir = ModelDirectory::new(tmp.path());
        assert_eq!(dir.status(), DirectoryStatus::KeyFile(nested.join("tokenizer.json")));
        assert!(dir.ensure_usable().is_ok());
    }

    #[test]
    fn test_non_empty_without_key_files() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("README.md"), "weights elsewhere").unwrap();
        let dir = ModelDirectory::new(tmp.path());
        assert_eq!(dir.status(), DirectoryStatus::NonEmpty);
        assert!(dir.status().is_usable());
    }

    #[test]
    fn test_single_entry_is_non_empty() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir(tmp.path().join("blobs")).unwrap();
        let dir = ModelDirectory::new(tmp.path());
        assert_eq!(dir.status(), DirectoryStatus::NonEmpty);
        assert!(dir.ensure_usable().is_ok());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_cycle_terminates() {
        let tmp = tempfile::tempdir().unwrap();
        let nested = tmp.path().join("a");
        fs::create_dir(&nested).unwrap();
        std::os::unix::fs::symlink(tmp.path(), nested.join("loop")).unwrap();

        let dir = ModelDirectory::new(tmp.path());
        assert_eq!(dir.status(), DirectoryStatus::NonEmpty);
    }

    #[cfg(unix)]
    #[test]
    fn test_key_file_behind_symlink_is_ignored() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        fs::write(outside.path().join("config.json"), "{}").unwrap();
        std::os::unix::fs::symlink(outside.path(), tmp.path().join("linked")).unwrap();

        let dir = ModelDirectory::new(tmp.path());
        assert_eq!(dir.status(), DirectoryStatus::NonEmpty);
    }

    #[test]
    fn test_locate_candidates() {
        let tmp = tempfile::tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("onnx")).unwrap();
        fs::write(tmp.path().join("onnx").join("model.onnx"), b"x").unwrap();
        let dir = ModelDirectory::new(tmp.path());
        assert_eq!(
            dir.locate(&["model.onnx", "onnx/model.onnx"]),
            Some(tmp.path().join("onnx/model.onnx"))
        );
        assert_eq!(dir.locate(&["missing.onnx"]), None);
    }
}
