//! On-disk root for one project.
//!
//! A `Workspace` is a cheap handle around a directory. Every component takes
//! one explicitly; nothing caches workspace state in process-wide globals, so
//! two workspaces with disjoint roots never observe each other.

use crate::error::Result;
use crate::{io, paths};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Open `root` and make sure the top-level layout exists.
    pub fn init(root: impl Into<PathBuf>) -> Result<Self> {
        let ws = Self::new(root);
        for dir in [paths::COMMANDS_DIR, paths::SHARED_DIR, paths::SESSIONS_DIR] {
            io::ensure_dir(&ws.root.join(dir))?;
        }
        Ok(ws)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a path declared in workspace files: absolute paths are kept,
    /// relative ones are taken relative to the workspace root.
    pub fn resolve_path(&self, declared: &Path) -> PathBuf {
        if declared.is_absolute() {
            declared.to_path_buf()
        } else {
            self.root.join(declared)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn init_creates_layout_idempotently() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("ws");
        Workspace::init(&root).unwrap();
        let ws = Workspace::init(&root).unwrap();
        assert!(ws.root().join("commands").is_dir());
        assert!(ws.root().join("shared").is_dir());
        assert!(ws.root().join("sessions").is_dir());
    }

    #[test]
    fn resolve_path_keeps_absolute() {
        let ws = Workspace::new("/tmp/ws");
        assert_eq!(
            ws.resolve_path(Path::new("manifests/a.yaml")),
            PathBuf::from("/tmp/ws/manifests/a.yaml")
        );
        assert_eq!(
            ws.resolve_path(Path::new("/etc/a.yaml")),
            PathBuf::from("/etc/a.yaml")
        );
    }
}
