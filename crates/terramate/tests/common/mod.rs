//! test project fixtures
//!
//! Builds throwaway project trees on the filesystem, since the engine is
//! exercised end to end: parse, resolve, generate, inspect the results.

use std::path::{Path, PathBuf};

pub struct Project {
    dir: tempfile::TempDir,
}

impl Project {
    pub fn new() -> Project {
        Project {
            dir: tempfile::tempdir().expect("tempdir must be created"),
        }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    /// Writes a file, creating intermediate directories.
    pub fn file(&self, rel: &str, content: &str) -> &Project {
        let path = self.path(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("dirs must be created");
        }
        std::fs::write(&path, content).expect("file must be written");
        self
    }

    /// Creates a directory (with parents).
    pub fn dir(&self, rel: &str) -> &Project {
        std::fs::create_dir_all(self.path(rel)).expect("dirs must be created");
        self
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    pub fn read(&self, rel: &str) -> String {
        std::fs::read_to_string(self.path(rel)).expect("file must be readable")
    }

    pub fn exists(&self, rel: &str) -> bool {
        self.path(rel).exists()
    }
}
