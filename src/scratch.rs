//! Per-indexer scratch directories under a shared root.

use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::warn;

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct ScratchSpace {
    root: PathBuf,
}

impl ScratchSpace {
    pub fn new(root: &Path) -> Result<Self> {
        std::fs::create_dir_all(root).map_err(|e| {
            Error::Storage(format!(
                "failed to create scratch root {}: {e}",
                root.display()
            ))
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Allocates a fresh, uniquely named directory. `label` only affects the prefix.
    pub fn allocate(&self, label: &str) -> Result<ScratchDir> {
        let prefix: String = label
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        let dir = tempfile::Builder::new()
            .prefix(&format!("{prefix}-"))
            .tempdir_in(&self.root)
            .map_err(|e| Error::Storage(format!("failed to allocate scratch dir: {e}")))?;
        Ok(ScratchDir { dir: Some(dir) })
    }
}

/// A scratch directory that is removed on `close` or, failing that, on drop.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
}

impl ScratchDir {
    #[must_use]
    pub fn path(&self) -> &Path {
        self.dir.as_ref().map_or(Path::new(""), TempDir::path)
    }

    /// Removes the directory, logging rather than returning a failure so the
    /// caller's own result is never masked.
    pub fn close(mut self) {
        if let Some(dir) = self.dir.take() {
            let path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(path = %path.display(), error = %e, "failed to remove scratch directory");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_and_close() {
        let root = tempfile::tempdir().unwrap();
        let scratch = ScratchSpace::new(root.path()).unwrap();

        let a = scratch.allocate("hashicorp/consul/aws@1.0.0").unwrap();
        let b = scratch.allocate("hashicorp/consul/aws@1.0.0").unwrap();
        assert_ne!(a.path(), b.path());
        assert!(a.path().starts_with(root.path()));
        assert!(
            a.path()
                .file_name()
                .unwrap()
                .to_string_lossy()
                .starts_with("hashicorp_consul_aws_1_0_0-")
        );

        std::fs::write(a.path().join("main.tf"), "").unwrap();
        let a_path = a.path().to_path_buf();
        a.close();
        assert!(!a_path.exists());

        let b_path = b.path().to_path_buf();
        drop(b);
        assert!(!b_path.exists());
    }
}
