//! Filesystem staging for scenario runs.
//!
//! A [`Stage`] owns a dedicated temp-dir subtree under which every scenario
//! materializes its working directory and GOPATH candidates. All relative
//! paths handed to a stage are confined to its root; removal goes through
//! [`remove_tree_safer`], which audits the tree before deleting it.

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use std::fs;
use std::path::{Component, Path, PathBuf};

/// Creates the directory and any missing parents.
pub fn ensure_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).with_context(|| format!("failed to create dir {}", path.display()))
}

/// A dedicated file tree for one invocation's scenarios.
#[derive(Debug, Clone)]
pub struct Stage {
    root: PathBuf,
}

impl Stage {
    /// Creates a fresh stage at `<tmp>/<prefix>_<pid>_<timestamp_micros>`.
    pub fn new_temp(prefix: &str) -> Result<Stage> {
        let root = std::env::temp_dir().join(format!(
            "{}_{}_{}",
            prefix,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root)?;
        tracing::debug!(root = %root.display(), "created stage");
        Ok(Stage { root })
    }

    /// Opens an existing directory as a stage root. Used by tests.
    pub fn at(root: PathBuf) -> Stage {
        Stage { root }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Creates a nested directory under the stage root.
    pub fn mkdir_all(&self, rel: &Path) -> Result<()> {
        ensure_dir(&self.resolve(rel)?)
    }

    /// Creates a file at a nested path, creating parents as needed, and
    /// writes `contents` to it.
    pub fn create_file_all(&self, rel: &Path, contents: &str) -> Result<()> {
        let abs = self.resolve(rel)?;
        if let Some(parent) = abs.parent() {
            ensure_dir(parent)?;
        }
        fs::write(&abs, contents)
            .with_context(|| format!("failed to write staged file {}", abs.display()))
    }

    /// Confines a relative path to the stage root. Absolute paths and any
    /// `..` component are rejected.
    fn resolve(&self, rel: &Path) -> Result<PathBuf> {
        if rel.is_absolute() {
            return Err(anyhow!(
                "stage_path_escape: absolute path not allowed in stage: {}",
                rel.display()
            ));
        }
        for component in rel.components() {
            if matches!(component, Component::ParentDir) {
                return Err(anyhow!(
                    "stage_path_escape: path {} escapes stage root {}",
                    rel.display(),
                    self.root.display()
                ));
            }
        }
        Ok(self.root.join(rel))
    }
}

/// Recursively removes a directory tree after sanity checks.
///
/// Refuses to remove relative paths, the filesystem root, anything shallower
/// than two components, or a tree containing a symlink that resolves outside
/// the tree (deleting through such a link could follow it on some platforms).
pub fn remove_tree_safer(path: &Path) -> Result<()> {
    if !path.is_absolute() {
        return Err(anyhow!(
            "unsafe_remove: refusing relative path {}",
            path.display()
        ));
    }
    if path.components().count() < 3 {
        return Err(anyhow!(
            "unsafe_remove: path too close to filesystem root: {}",
            path.display()
        ));
    }
    if !path.exists() {
        return Ok(());
    }

    for entry in walkdir::WalkDir::new(path) {
        let entry = entry.with_context(|| format!("failed to audit tree {}", path.display()))?;
        if entry.path_is_symlink() {
            let target = fs::canonicalize(entry.path()).unwrap_or_default();
            let root = fs::canonicalize(path)?;
            if !target.starts_with(&root) {
                return Err(anyhow!(
                    "unsafe_remove: symlink {} resolves outside {}",
                    entry.path().display(),
                    path.display()
                ));
            }
        }
    }

    tracing::debug!(path = %path.display(), "removing stage tree");
    fs::remove_dir_all(path).with_context(|| format!("failed to remove {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_root(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "modfuzz_core_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ))
    }

    #[test]
    fn create_file_all_builds_missing_parents() {
        let root = temp_root("file");
        ensure_dir(&root).expect("temp root");
        let stage = Stage::at(root.clone());

        stage
            .create_file_all(Path::new("3/usable_gopath/wd/go.mod"), "module wd\n")
            .expect("staged file");
        let written =
            fs::read_to_string(root.join("3/usable_gopath/wd/go.mod")).expect("read back");
        assert_eq!(written, "module wd\n");

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn stage_rejects_escaping_paths() {
        let root = temp_root("escape");
        ensure_dir(&root).expect("temp root");
        let stage = Stage::at(root.clone());

        let err = stage
            .mkdir_all(Path::new("../outside"))
            .expect_err("parent-dir component must be rejected");
        assert!(err.to_string().contains("stage_path_escape"));

        let err = stage
            .create_file_all(Path::new("/etc/modfuzz_should_not_exist"), "x")
            .expect_err("absolute path must be rejected");
        assert!(err.to_string().contains("stage_path_escape"));

        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn remove_tree_safer_deletes_a_staged_tree() {
        let root = temp_root("remove");
        ensure_dir(&root.join("0/wd")).expect("nested dirs");
        fs::write(root.join("0/wd/go.mod"), "module wd\n").expect("marker");

        remove_tree_safer(&root).expect("removal");
        assert!(!root.exists());
    }

    #[test]
    fn remove_tree_safer_rejects_shallow_and_relative_paths() {
        assert!(remove_tree_safer(Path::new("relative/dir")).is_err());
        assert!(remove_tree_safer(Path::new("/tmp")).is_err());
    }

    #[test]
    fn remove_tree_safer_is_a_noop_for_missing_paths() {
        let root = temp_root("missing");
        remove_tree_safer(&root).expect("missing tree is not an error");
    }

    #[cfg(unix)]
    #[test]
    fn remove_tree_safer_rejects_symlinks_out_of_the_tree() {
        let root = temp_root("symlink");
        ensure_dir(&root).expect("temp root");
        let outside = temp_root("symlink_target");
        ensure_dir(&outside).expect("outside dir");

        std::os::unix::fs::symlink(&outside, root.join("escape")).expect("symlink");
        let err = remove_tree_safer(&root).expect_err("escaping symlink must be rejected");
        assert!(err.to_string().contains("unsafe_remove"));

        let _ = fs::remove_dir_all(&outside);
        let _ = fs::remove_file(root.join("escape"));
        let _ = fs::remove_dir_all(&root);
    }
}
