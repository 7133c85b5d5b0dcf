// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Filesystem abstraction used when branches are merged to disk.
//!
//! Only [`BranchStore::merge_branch`](crate::branch::BranchStore::merge_branch)
//! and [`BranchStore::snapshot_file`](crate::branch::BranchStore::snapshot_file)
//! touch the filesystem, always through this trait so tests can substitute
//! a mock or an in-memory implementation.

use std::io;
use std::path::Path;

use async_trait::async_trait;
use tokio::fs;

/// Path-based asynchronous filesystem operations.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait FileSystem: Send + Sync {
    /// Check whether a path exists.
    async fn exists(&self, path: &str) -> bool;

    /// Read a file as UTF-8 text.
    async fn read_file(&self, path: &str) -> io::Result<String>;

    /// Write a file, replacing any existing content.
    async fn write_file(&self, path: &str, content: &str) -> io::Result<()>;

    /// Remove a file.
    async fn delete_file(&self, path: &str) -> io::Result<()>;

    /// Create a directory and any missing parents.
    async fn mkdir(&self, path: &str) -> io::Result<()>;

    /// Parent directory of a path (empty if none).
    fn dirname(&self, path: &str) -> String;
}

/// [`FileSystem`] backed by the local disk via `tokio::fs`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

impl LocalFileSystem {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl FileSystem for LocalFileSystem {
    async fn exists(&self, path: &str) -> bool {
        fs::try_exists(path).await.unwrap_or(false)
    }

    async fn read_file(&self, path: &str) -> io::Result<String> {
        fs::read_to_string(path).await
    }

    async fn write_file(&self, path: &str, content: &str) -> io::Result<()> {
        fs::write(path, content).await
    }

    async fn delete_file(&self, path: &str) -> io::Result<()> {
        fs::remove_file(path).await
    }

    async fn mkdir(&self, path: &str) -> io::Result<()> {
        fs::create_dir_all(path).await
    }

    fn dirname(&self, path: &str) -> String {
        Path::new(path)
            .parent()
            .map(|p| p.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_local_roundtrip() {
        let dir = tempdir().unwrap();
        let fs = LocalFileSystem::new();
        let nested = dir.path().join("a/b");
        let file = nested.join("c.txt");
        let file = file.to_str().unwrap();

        assert!(!fs.exists(file).await);
        fs.mkdir(&fs.dirname(file)).await.unwrap();
        fs.write_file(file, "hello").await.unwrap();
        assert!(fs.exists(file).await);
        assert_eq!(fs.read_file(file).await.unwrap(), "hello");

        fs.delete_file(file).await.unwrap();
        assert!(!fs.exists(file).await);
    }

    #[test]
    fn test_dirname() {
        let fs = LocalFileSystem::new();
        assert_eq!(fs.dirname("/src/lib/mod.rs"), "/src/lib");
        assert_eq!(fs.dirname("/"), "");
    }
}
