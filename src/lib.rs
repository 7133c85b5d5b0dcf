// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! vbranch - virtual branches for parallel AI coding agents.
//!
//! Each agent works on its own [`VirtualBranch`]: an in-memory overlay of
//! file changes against the workspace. Branches never touch disk until they
//! are merged. When two active branches change the same file, the
//! [`MergeEngine`] resolves the conflict through a cascade of strategies:
//! deterministic three-way merge, then an optional LLM adapter, then
//! git-style conflict markers for a human.
//!
//! # Architecture
//!
//! - [`types`] - Branches, file changes, conflicts and resolutions
//! - [`error`] - Error types and result aliases
//! - [`diff`] - Line diffs and unified diff rendering
//! - [`fs`] - Filesystem seam used when branches are merged
//! - [`events`] - Broadcast bus for branch and conflict lifecycle events
//! - [`branch`] - The [`BranchStore`] holding every branch
//! - [`regions`] - Tree-sitter based semantic regions of source files
//! - [`merge`] - Conflict detection and the resolution cascade
//! - [`providers`] - LLM adapters for AI-assisted merging
//! - [`config`] - Configuration loading and merging
//! - [`telemetry`] - Tracing and metrics infrastructure
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vbranch::{BranchStore, EventBus, FileChange, LocalFileSystem, MergeEngine};
//! use vbranch::regions::TreeSitterRegionProvider;
//!
//! let store = Arc::new(BranchStore::new(Arc::new(LocalFileSystem::new()), EventBus::new()));
//! let engine = MergeEngine::new(store.clone(), Arc::new(TreeSitterRegionProvider::new()?));
//!
//! let a = store.create_branch("agent-1", "task-1");
//! let b = store.create_branch("agent-2", "task-2");
//! store.record_change(&a.id, FileChange::modify("/src/app.ts", base, ours));
//! store.record_change(&b.id, FileChange::modify("/src/app.ts", base, theirs));
//!
//! for conflict in engine.detect_conflicts() {
//!     let resolution = engine.resolve_conflict(&conflict).await?;
//!     engine.apply_resolution(&resolution)?;
//! }
//! store.merge_branch(&a.id).await?;
//! ```

pub mod branch;
pub mod config;
pub mod diff;
pub mod error;
pub mod events;
pub mod fs;
pub mod merge;
pub mod providers;
pub mod regions;
pub mod telemetry;
pub mod types;

// Re-export commonly used types at crate root
pub use branch::BranchStore;
pub use error::{BranchError, ConfigError, MergeError, ProviderError, Result};
pub use events::{BranchEvent, EventBus};
pub use fs::{FileSystem, LocalFileSystem};
pub use merge::MergeEngine;
pub use providers::{create_adapter, create_adapter_from_env, LlmAdapter, SharedAdapter};
pub use regions::{CodeRegion, RegionKind, RegionProvider};
pub use types::{
    BranchStatus, BranchSummary, ChangeType, ConflictMarker, FileChange, FileSnapshot,
    MergeConflict, MergeResolution, ResolutionStrategy, VirtualBranch,
};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_public_exports() {
        let change = FileChange::create("/a.txt", "hello");
        assert_eq!(change.change_type, ChangeType::Create);
        assert_eq!(ResolutionStrategy::AiAssisted.to_string(), "ai_assisted");
        let _bus = EventBus::new();
    }
}
