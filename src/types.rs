// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Core types for virtual branches and merge conflicts.
//!
//! This module defines the data model shared by the branch store and the
//! merge engine: branches and their staged file changes, file snapshots,
//! conflicts between branches, and the resolutions that settle them.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::diff::{generate_unified_diff, render_diff_to_string};
use crate::regions::CodeRegion;

/// Context lines used for the advisory diff attached to a change.
pub const DEFAULT_DIFF_CONTEXT: usize = 3;

// ============================================================================
// Branches
// ============================================================================

/// Lifecycle status of a virtual branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchStatus {
    /// Accepting changes.
    Active,
    /// Changes were written to disk.
    Merged,
    /// Changes were discarded.
    Abandoned,
}

impl BranchStatus {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Merged => "merged",
            Self::Abandoned => "abandoned",
        }
    }

    /// Check if this status is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Active)
    }
}

impl std::fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An isolated, in-memory staging area for one agent's task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VirtualBranch {
    /// Unique identifier.
    pub id: String,
    /// Agent that owns this branch.
    pub agent_id: String,
    /// Task this branch was opened for.
    pub task_id: String,
    /// Latest change per file path.
    pub changes: BTreeMap<String, FileChange>,
    /// Lifecycle status.
    pub status: BranchStatus,
    /// Marker identifying when the branch was opened (display only).
    pub base_snapshot: String,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl VirtualBranch {
    /// Create a new, empty, active branch.
    pub fn new(id: impl Into<String>, agent_id: impl Into<String>, task_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            agent_id: agent_id.into(),
            task_id: task_id.into(),
            changes: BTreeMap::new(),
            status: BranchStatus::Active,
            base_snapshot: now.to_rfc3339(),
            created_at: now,
        }
    }

    /// Check if the branch still accepts changes.
    pub fn is_active(&self) -> bool {
        self.status == BranchStatus::Active
    }

    /// Paths with a recorded change.
    pub fn changed_files(&self) -> impl Iterator<Item = &str> {
        self.changes.keys().map(String::as_str)
    }

    /// Get the recorded change for a path.
    pub fn change_for(&self, path: &str) -> Option<&FileChange> {
        self.changes.get(path)
    }
}

/// Aggregate view of a branch for schedulers and dashboards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchSummary {
    pub branch_id: String,
    pub agent_id: String,
    pub task_id: String,
    pub status: BranchStatus,
    pub files_changed: usize,
    pub lines_added: usize,
    pub lines_removed: usize,
}

// ============================================================================
// File changes
// ============================================================================

/// Kind of mutation a change applies to its file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Create,
    Modify,
    Delete,
}

impl ChangeType {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for ChangeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A proposed mutation to one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Absolute path of the file.
    pub file_path: String,
    /// Kind of mutation.
    pub change_type: ChangeType,
    /// Content before the change; `None` if the file did not exist.
    pub original_content: Option<String>,
    /// Content after the change (empty for deletions).
    pub modified_content: String,
    /// Human-readable unified diff. Advisory only.
    pub diff: String,
}

impl FileChange {
    /// A change that creates a new file.
    pub fn create(file_path: impl Into<String>, content: impl Into<String>) -> Self {
        Self::build(file_path.into(), ChangeType::Create, None, content.into())
    }

    /// A change that rewrites an existing file.
    pub fn modify(
        file_path: impl Into<String>,
        original: impl Into<String>,
        modified: impl Into<String>,
    ) -> Self {
        Self::build(
            file_path.into(),
            ChangeType::Modify,
            Some(original.into()),
            modified.into(),
        )
    }

    /// A change that removes a file.
    pub fn delete(file_path: impl Into<String>, original: impl Into<String>) -> Self {
        Self::build(
            file_path.into(),
            ChangeType::Delete,
            Some(original.into()),
            String::new(),
        )
    }

    fn build(
        file_path: String,
        change_type: ChangeType,
        original_content: Option<String>,
        modified_content: String,
    ) -> Self {
        let new_content = match change_type {
            ChangeType::Delete => None,
            _ => Some(modified_content.as_str()),
        };
        let diff = render_diff_to_string(&generate_unified_diff(
            original_content.as_deref(),
            new_content,
            &file_path,
            DEFAULT_DIFF_CONTEXT,
        ));

        Self {
            file_path,
            change_type,
            original_content,
            modified_content,
            diff,
        }
    }
}

/// A memoized read of a file, taken the first time the engine asked for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSnapshot {
    pub path: String,
    /// Content at capture time; empty if the file did not exist.
    pub content: String,
    /// SHA-256 of `content`, hex encoded.
    pub hash: String,
    pub exists: bool,
    pub captured_at: DateTime<Utc>,
}

// ============================================================================
// Conflicts and resolutions
// ============================================================================

/// Two active branches that both changed the same file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeConflict {
    pub id: String,
    pub file_path: String,
    /// Common ancestor content both branches started from.
    pub base_content: String,
    /// First branch (its content is "ours").
    pub branch1: String,
    /// Second branch (its content is "theirs").
    pub branch2: String,
    /// Semantic regions that both branches touched and that overlap.
    pub conflicting_regions: Vec<CodeRegion>,
    pub detected_at: DateTime<Utc>,
}

impl MergeConflict {
    /// Check if this conflict involves the given branch.
    pub fn involves(&self, branch_id: &str) -> bool {
        self.branch1 == branch_id || self.branch2 == branch_id
    }

    /// Check if this conflict is for the given unordered pair and path.
    pub fn matches(&self, a: &str, b: &str, file_path: &str) -> bool {
        self.file_path == file_path
            && ((self.branch1 == a && self.branch2 == b) || (self.branch1 == b && self.branch2 == a))
    }
}

/// How a conflict was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolutionStrategy {
    /// Deterministic merge of disjoint edits.
    Auto,
    /// Merged by an LLM adapter.
    AiAssisted,
    /// Conflict markers left for a human.
    Manual,
}

impl ResolutionStrategy {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::AiAssisted => "ai_assisted",
            Self::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ResolutionStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Line ranges of one conflict block in manually-resolved content.
///
/// All line numbers are 1-indexed and inclusive. An empty side has
/// `*_end == *_start - 1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictMarker {
    /// Line of the `<<<<<<<` delimiter.
    pub start_line: usize,
    /// Line of the `>>>>>>>` delimiter.
    pub end_line: usize,
    pub ours_start: usize,
    pub ours_end: usize,
    /// Line of the `=======` delimiter.
    pub separator_line: usize,
    pub theirs_start: usize,
    pub theirs_end: usize,
}

/// The outcome of resolving a conflict.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeResolution {
    pub conflict_id: String,
    pub resolved_content: String,
    /// Free-form attribution (e.g. `auto-merge`, `ai:anthropic`, `manual`).
    pub resolved_by: String,
    pub strategy: ResolutionStrategy,
    /// Marker blocks still present in `resolved_content` (manual only).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub markers: Vec<ConflictMarker>,
    pub resolved_at: DateTime<Utc>,
}
