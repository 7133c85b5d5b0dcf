// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! In-memory store of virtual branches.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::diff::generate_unified_diff;
use crate::error::{BranchError, FileOpFailure};
use crate::events::{BranchEvent, EventBus};
use crate::fs::FileSystem;
#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;
use crate::types::{
    BranchStatus, BranchSummary, ChangeType, FileChange, FileSnapshot, VirtualBranch,
    DEFAULT_DIFF_CONTEXT,
};

/// Returned by [`BranchStore::get_original_content`] for paths never snapshotted.
pub const UNKNOWN_CONTENT: &str = "unknown";

#[derive(Default)]
struct StoreState {
    branches: HashMap<String, VirtualBranch>,
    /// Branch ids in creation order.
    order: Vec<String>,
    /// Current branch per agent.
    by_agent: HashMap<String, String>,
    /// Current branch per task.
    by_task: HashMap<String, String>,
}

/// Owns every [`VirtualBranch`] in the process.
///
/// All state mutations are synchronous and atomic with respect to each
/// other; only [`merge_branch`](Self::merge_branch) and
/// [`snapshot_file`](Self::snapshot_file) suspend, and only while doing
/// filesystem I/O.
pub struct BranchStore {
    state: RwLock<StoreState>,
    snapshots: RwLock<HashMap<String, FileSnapshot>>,
    fs: Arc<dyn FileSystem>,
    events: EventBus,
}

impl BranchStore {
    /// Create an empty store.
    pub fn new(fs: Arc<dyn FileSystem>, events: EventBus) -> Self {
        Self {
            state: RwLock::new(StoreState::default()),
            snapshots: RwLock::new(HashMap::new()),
            fs,
            events,
        }
    }

    /// Event bus this store publishes on.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Open a new branch and make it the current one for `agent_id` and `task_id`.
    ///
    /// A previous branch for the same agent or task stays retrievable by id
    /// but is no longer returned by the agent/task lookups.
    pub fn create_branch(&self, agent_id: &str, task_id: &str) -> VirtualBranch {
        let branch = VirtualBranch::new(Uuid::new_v4().to_string(), agent_id, task_id);

        {
            let mut state = self.write();
            if let Some(previous) = state.by_agent.insert(agent_id.to_string(), branch.id.clone()) {
                debug!(agent_id, previous = %previous, "Agent lookup now points at a new branch");
            }
            state.by_task.insert(task_id.to_string(), branch.id.clone());
            state.order.push(branch.id.clone());
            state.branches.insert(branch.id.clone(), branch.clone());
        }

        info!(branch_id = %branch.id, agent_id, task_id, "Created branch");
        self.events.emit(BranchEvent::BranchCreated {
            branch: branch.clone(),
            timestamp: Utc::now(),
        });

        branch
    }

    /// Mark a branch abandoned. Never touches the filesystem.
    pub fn abandon_branch(&self, branch_id: &str) -> Result<(), BranchError> {
        let branch = {
            let mut state = self.write();
            let branch = state
                .branches
                .get_mut(branch_id)
                .ok_or_else(|| BranchError::NotFound(branch_id.to_string()))?;
            branch.status = BranchStatus::Abandoned;
            branch.clone()
        };

        info!(branch_id, discarded = branch.changes.len(), "Abandoned branch");
        self.events.emit(BranchEvent::BranchAbandoned {
            branch,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Remove a branch and its agent/task lookups entirely.
    ///
    /// Returns `false` if the branch did not exist.
    pub fn delete_branch(&self, branch_id: &str) -> bool {
        let mut state = self.write();
        let Some(branch) = state.branches.remove(branch_id) else {
            return false;
        };
        state.order.retain(|id| id != branch_id);

        if state.by_agent.get(&branch.agent_id).map(String::as_str) == Some(branch_id) {
            state.by_agent.remove(&branch.agent_id);
        }
        if state.by_task.get(&branch.task_id).map(String::as_str) == Some(branch_id) {
            state.by_task.remove(&branch.task_id);
        }

        debug!(branch_id, "Deleted branch");
        true
    }

    // ------------------------------------------------------------------
    // Lookups
    // ------------------------------------------------------------------

    pub fn get_branch(&self, branch_id: &str) -> Option<VirtualBranch> {
        self.read().branches.get(branch_id).cloned()
    }

    pub fn get_branch_for_agent(&self, agent_id: &str) -> Option<VirtualBranch> {
        let state = self.read();
        state
            .by_agent
            .get(agent_id)
            .and_then(|id| state.branches.get(id))
            .cloned()
    }

    pub fn get_branch_for_task(&self, task_id: &str) -> Option<VirtualBranch> {
        let state = self.read();
        state
            .by_task
            .get(task_id)
            .and_then(|id| state.branches.get(id))
            .cloned()
    }

    /// All branches with status `active`, in creation order.
    pub fn get_active_branches(&self) -> Vec<VirtualBranch> {
        let state = self.read();
        state
            .order
            .iter()
            .filter_map(|id| state.branches.get(id))
            .filter(|b| b.is_active())
            .cloned()
            .collect()
    }

    /// Every branch regardless of status, in creation order.
    pub fn list_branches(&self) -> Vec<VirtualBranch> {
        let state = self.read();
        state
            .order
            .iter()
            .filter_map(|id| state.branches.get(id))
            .cloned()
            .collect()
    }

    /// The change a branch currently holds for a path.
    pub fn get_change(&self, branch_id: &str, file_path: &str) -> Option<FileChange> {
        self.read()
            .branches
            .get(branch_id)
            .and_then(|b| b.change_for(file_path))
            .cloned()
    }

    /// Files changed and line counts for a branch.
    pub fn summary(&self, branch_id: &str) -> Option<BranchSummary> {
        let branch = self.get_branch(branch_id)?;

        let (mut lines_added, mut lines_removed) = (0usize, 0usize);
        for change in branch.changes.values() {
            let new_content = match change.change_type {
                ChangeType::Delete => None,
                _ => Some(change.modified_content.as_str()),
            };
            let diff = generate_unified_diff(
                change.original_content.as_deref(),
                new_content,
                &change.file_path,
                DEFAULT_DIFF_CONTEXT,
            );
            lines_added += diff.lines_added;
            lines_removed += diff.lines_removed;
        }

        Some(BranchSummary {
            branch_id: branch.id,
            agent_id: branch.agent_id,
            task_id: branch.task_id,
            status: branch.status,
            files_changed: branch.changes.len(),
            lines_added,
            lines_removed,
        })
    }

    // ------------------------------------------------------------------
    // Changes
    // ------------------------------------------------------------------

    /// Stage a change, replacing any earlier change to the same path.
    ///
    /// Returns `false` (and logs a warning) when the branch is unknown or no
    /// longer active.
    pub fn record_change(&self, branch_id: &str, change: FileChange) -> bool {
        let mut state = self.write();
        let Some(branch) = state.branches.get_mut(branch_id) else {
            warn!(branch_id, path = %change.file_path, "Ignoring change for unknown branch");
            return false;
        };
        if !branch.is_active() {
            warn!(
                branch_id,
                status = %branch.status,
                path = %change.file_path,
                "Ignoring change for inactive branch"
            );
            return false;
        }

        debug!(branch_id, path = %change.file_path, change_type = %change.change_type, "Recorded change");
        branch.changes.insert(change.file_path.clone(), change);
        true
    }

    /// Stage several changes in order; later entries for a path win.
    ///
    /// Returns how many were accepted.
    pub fn record_changes<I>(&self, branch_id: &str, changes: I) -> usize
    where
        I: IntoIterator<Item = FileChange>,
    {
        changes
            .into_iter()
            .map(|change| self.record_change(branch_id, change))
            .filter(|recorded| *recorded)
            .count()
    }

    /// Whether two branches changed at least one common path.
    pub fn has_conflicts(&self, branch_a: &str, branch_b: &str) -> bool {
        !self.get_conflicting_files(branch_a, branch_b).is_empty()
    }

    /// Paths changed by both branches, sorted.
    ///
    /// Paths are compared verbatim; callers normalise them first.
    pub fn get_conflicting_files(&self, branch_a: &str, branch_b: &str) -> Vec<String> {
        let state = self.read();
        let (Some(a), Some(b)) = (state.branches.get(branch_a), state.branches.get(branch_b)) else {
            return Vec::new();
        };

        let a_files: BTreeSet<&str> = a.changed_files().collect();
        b.changed_files()
            .filter(|path| a_files.contains(path))
            .map(str::to_string)
            .collect()
    }

    // ------------------------------------------------------------------
    // Disk
    // ------------------------------------------------------------------

    /// Write every staged change of an active branch to the filesystem.
    ///
    /// All changes are attempted even if some fail. On any failure the
    /// branch stays `active` and the error lists every failed path; writes
    /// that succeeded are not rolled back.
    #[instrument(skip(self))]
    pub async fn merge_branch(&self, branch_id: &str) -> Result<(), BranchError> {
        let start = Instant::now();

        let changes: Vec<FileChange> = {
            let state = self.read();
            let branch = state
                .branches
                .get(branch_id)
                .ok_or_else(|| BranchError::NotFound(branch_id.to_string()))?;
            if !branch.is_active() {
                return Err(BranchError::InvalidStatus {
                    branch_id: branch_id.to_string(),
                    status: branch.status.to_string(),
                });
            }
            branch.changes.values().cloned().collect()
        };

        info!(branch_id, files = changes.len(), "Merging branch to disk");

        let mut failures = Vec::new();
        for change in &changes {
            if let Err(e) = self.apply_change(change).await {
                warn!(branch_id, path = %change.file_path, error = %e, "File operation failed");
                failures.push(FileOpFailure {
                    path: change.file_path.clone(),
                    message: e.to_string(),
                });
            }
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("branch.merge", start.elapsed());

        if !failures.is_empty() {
            return Err(BranchError::MergeFailed {
                branch_id: branch_id.to_string(),
                failures,
            });
        }

        let merged = {
            let mut state = self.write();
            let branch = state
                .branches
                .get_mut(branch_id)
                .ok_or_else(|| BranchError::NotFound(branch_id.to_string()))?;
            if !branch.is_active() {
                // Abandoned while the writes were in flight.
                return Err(BranchError::InvalidStatus {
                    branch_id: branch_id.to_string(),
                    status: branch.status.to_string(),
                });
            }
            branch.status = BranchStatus::Merged;
            branch.clone()
        };

        info!(branch_id, elapsed_ms = start.elapsed().as_millis() as u64, "Merged branch");
        self.events.emit(BranchEvent::BranchMerged {
            branch: merged,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    async fn apply_change(&self, change: &FileChange) -> std::io::Result<()> {
        let path = change.file_path.as_str();
        match change.change_type {
            ChangeType::Create | ChangeType::Modify => {
                let dir = self.fs.dirname(path);
                if !dir.is_empty() && !self.fs.exists(&dir).await {
                    self.fs.mkdir(&dir).await?;
                }
                self.fs.write_file(path, &change.modified_content).await
            }
            ChangeType::Delete => {
                if self.fs.exists(path).await {
                    self.fs.delete_file(path).await
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Content of a file as first seen by the engine.
    ///
    /// The first call reads the file (empty if missing) and caches it for the
    /// lifetime of the store; later calls return the cached copy even if the
    /// file has since changed on disk.
    pub async fn snapshot_file(&self, path: &str) -> FileSnapshot {
        if let Some(cached) = self
            .snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
        {
            return cached.clone();
        }

        let exists = self.fs.exists(path).await;
        let (content, cacheable) = if exists {
            match self.fs.read_file(path).await {
                Ok(content) => (content, true),
                Err(e) => {
                    warn!(path, error = %e, "Failed to read file for snapshot");
                    (String::new(), false)
                }
            }
        } else {
            (String::new(), true)
        };

        let snapshot = FileSnapshot {
            path: path.to_string(),
            hash: content_hash(&content),
            content,
            exists,
            captured_at: Utc::now(),
        };

        if !cacheable {
            return snapshot;
        }

        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(path.to_string())
            .or_insert(snapshot)
            .clone()
    }

    /// Cached snapshot content, or [`UNKNOWN_CONTENT`] if never snapshotted.
    pub fn get_original_content(&self, path: &str) -> String {
        self.cached_snapshot(path)
            .map(|s| s.content)
            .unwrap_or_else(|| UNKNOWN_CONTENT.to_string())
    }

    /// Cached snapshot for a path, if one was taken.
    pub fn cached_snapshot(&self, path: &str) -> Option<FileSnapshot> {
        self.snapshots
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(path)
            .cloned()
    }

    /// Drop all cached snapshots.
    pub fn clear_snapshots(&self) {
        self.snapshots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for BranchStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.read();
        f.debug_struct("BranchStore")
            .field("branches", &state.branches.len())
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}

fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
