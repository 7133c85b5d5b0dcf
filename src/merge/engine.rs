// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Conflict detection and the auto → AI → manual resolution cascade.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::branch::BranchStore;
use crate::config::MergeConfig;
use crate::diff::{
    compute_edits, generate_unified_diff, line_ending, render_diff_to_string, split_lines,
};
use crate::error::MergeError;
use crate::events::BranchEvent;
use crate::providers::{CompletionRequest, SharedAdapter};
use crate::regions::{CodeRegion, RegionProvider};
#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;
use crate::types::{
    ChangeType, FileChange, MergeConflict, MergeResolution, ResolutionStrategy, VirtualBranch,
};

use super::markers::has_conflict_markers;
use super::three_way::{three_way_merge, MARKER_OURS};

/// Attribution for deterministic merges.
pub const RESOLVED_BY_AUTO: &str = "auto-merge";
/// Attribution for marker output awaiting a human.
pub const RESOLVED_BY_MANUAL: &str = "manual";

const AI_SYSTEM_PROMPT: &str = "You merge concurrent edits to a single source file. \
Two agents changed the same base version independently. Produce one file that keeps \
the intent of both changes. Reply with the complete merged file in a single fenced \
code block and nothing else. Never emit conflict markers.";

static FENCED_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[^\n]*\n(.*?)```").expect("valid fenced block regex"));

/// Detects conflicts between active branches and resolves them.
///
/// The engine owns the set of active conflicts. Branch state is read from
/// and written back to the shared [`BranchStore`].
pub struct MergeEngine {
    store: Arc<BranchStore>,
    regions: Arc<dyn RegionProvider>,
    adapter: Option<SharedAdapter>,
    config: MergeConfig,
    conflicts: RwLock<HashMap<String, MergeConflict>>,
}

impl MergeEngine {
    /// Create an engine without an LLM adapter.
    pub fn new(store: Arc<BranchStore>, regions: Arc<dyn RegionProvider>) -> Self {
        Self {
            store,
            regions,
            adapter: None,
            config: MergeConfig::default(),
            conflicts: RwLock::new(HashMap::new()),
        }
    }

    /// Enable the AI-assisted step.
    pub fn with_adapter(mut self, adapter: SharedAdapter) -> Self {
        self.adapter = Some(adapter);
        self
    }

    pub fn with_config(mut self, config: MergeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn store(&self) -> &Arc<BranchStore> {
        &self.store
    }

    pub fn config(&self) -> &MergeConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Detection
    // ------------------------------------------------------------------

    /// Scan every pair of active branches for files both have changed.
    ///
    /// An already-tracked conflict for the same branch pair and file is
    /// returned as-is rather than duplicated. One `conflict:detected` event
    /// carries the newly created conflicts, if any.
    pub fn detect_conflicts(&self) -> Vec<MergeConflict> {
        let active = self.store.get_active_branches();
        let mut pairs = Vec::new();
        for (i, a) in active.iter().enumerate() {
            for b in &active[i + 1..] {
                pairs.push((a, b));
            }
        }
        self.detect_pairs(&pairs)
    }

    /// Like [`detect_conflicts`](Self::detect_conflicts), limited to pairs
    /// that include `branch_id`.
    pub fn detect_conflicts_for(&self, branch_id: &str) -> Vec<MergeConflict> {
        let active = self.store.get_active_branches();
        let Some(target) = active.iter().find(|b| b.id == branch_id) else {
            debug!(branch_id, "Branch not active; nothing to scan");
            return Vec::new();
        };

        // Older branch first, matching the full scan.
        let pairs: Vec<(&VirtualBranch, &VirtualBranch)> = active
            .iter()
            .take_while(|b| b.id != branch_id)
            .map(|older| (older, target))
            .chain(
                active
                    .iter()
                    .skip_while(|b| b.id != branch_id)
                    .skip(1)
                    .map(|newer| (target, newer)),
            )
            .collect();
        self.detect_pairs(&pairs)
    }

    fn detect_pairs(&self, pairs: &[(&VirtualBranch, &VirtualBranch)]) -> Vec<MergeConflict> {
        let start = Instant::now();
        let mut found = Vec::new();
        let mut created = Vec::new();

        for (a, b) in pairs {
            for file_path in self.store.get_conflicting_files(&a.id, &b.id) {
                if let Some(existing) = self.find_tracked(&a.id, &b.id, &file_path) {
                    found.push(existing);
                    continue;
                }
                if let Some(conflict) = self.create_conflict(&a.id, &b.id, &file_path) {
                    created.push(conflict);
                }
            }
        }

        {
            let mut conflicts = self.conflicts.write().unwrap_or_else(PoisonError::into_inner);
            let mut fresh = Vec::with_capacity(created.len());
            for conflict in created {
                // Another scan may have tracked the same tuple meanwhile.
                let raced = conflicts
                    .values()
                    .find(|c| c.matches(&conflict.branch1, &conflict.branch2, &conflict.file_path))
                    .cloned();
                match raced {
                    Some(existing) => found.push(existing),
                    None => {
                        conflicts.insert(conflict.id.clone(), conflict.clone());
                        fresh.push(conflict);
                    }
                }
            }
            created = fresh;
        }

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("merge.detect_conflicts", start.elapsed());

        if !created.is_empty() {
            info!(
                new = created.len(),
                total = found.len() + created.len(),
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Detected conflicts"
            );
            self.store.events().emit(BranchEvent::ConflictDetected {
                conflicts: created.clone(),
                timestamp: Utc::now(),
            });
        }

        found.extend(created);
        found
    }

    fn find_tracked(&self, a: &str, b: &str, file_path: &str) -> Option<MergeConflict> {
        self.conflicts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .find(|c| c.matches(a, b, file_path))
            .cloned()
    }

    /// Build a conflict for `file_path` without tracking it.
    ///
    /// Returns `None` unless both branches hold a change for the path.
    pub fn create_conflict(
        &self,
        branch1: &str,
        branch2: &str,
        file_path: &str,
    ) -> Option<MergeConflict> {
        let ours = self.store.get_change(branch1, file_path)?;
        let theirs = self.store.get_change(branch2, file_path)?;

        let base_content = ours
            .original_content
            .clone()
            .or_else(|| theirs.original_content.clone())
            .or_else(|| self.store.cached_snapshot(file_path).map(|s| s.content))
            .unwrap_or_default();

        let conflicting_regions = self.conflicting_regions(
            file_path,
            &base_content,
            content_after(&ours),
            content_after(&theirs),
        );

        debug!(
            branch1,
            branch2,
            path = file_path,
            regions = conflicting_regions.len(),
            "Built conflict"
        );

        Some(MergeConflict {
            id: Uuid::new_v4().to_string(),
            file_path: file_path.to_string(),
            base_content,
            branch1: branch1.to_string(),
            branch2: branch2.to_string(),
            conflicting_regions,
            detected_at: Utc::now(),
        })
    }

    /// Regions each side touched that overlap a region the other side touched.
    fn conflicting_regions(
        &self,
        file_path: &str,
        base: &str,
        ours: &str,
        theirs: &str,
    ) -> Vec<CodeRegion> {
        let ours_hit = touched_regions(
            self.regions.analyze_file(file_path, ours),
            &touched_lines(base, ours),
        );
        let theirs_hit = touched_regions(
            self.regions.analyze_file(file_path, theirs),
            &touched_lines(base, theirs),
        );

        let mut result: Vec<CodeRegion> = Vec::new();
        let overlapping_ours = ours_hit
            .iter()
            .filter(|r| theirs_hit.iter().any(|t| self.regions.regions_overlap(r, t)));
        let overlapping_theirs = theirs_hit
            .iter()
            .filter(|t| ours_hit.iter().any(|r| self.regions.regions_overlap(t, r)));

        for region in overlapping_ours.chain(overlapping_theirs) {
            if !result.contains(region) {
                result.push(region.clone());
            }
        }
        result
    }

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------

    /// Resolve a tracked conflict.
    ///
    /// Tries a line-level merge first, then the LLM adapter (if configured
    /// and enabled), and finally emits conflict markers. Only fails if the
    /// conflict is no longer tracked or one of its branches has lost the
    /// change.
    #[instrument(skip(self, conflict), fields(conflict_id = %conflict.id, path = %conflict.file_path))]
    pub async fn resolve_conflict(
        &self,
        conflict: &MergeConflict,
    ) -> Result<MergeResolution, MergeError> {
        let start = Instant::now();

        if self.get_conflict(&conflict.id).is_none() {
            return Err(MergeError::ConflictNotFound(conflict.id.clone()));
        }

        let ours = self.current_change(conflict, &conflict.branch1)?;
        let theirs = self.current_change(conflict, &conflict.branch2)?;
        let ours_content = content_after(&ours);
        let theirs_content = content_after(&theirs);

        let ours_label = self.render_label(&self.config.ours_label, &conflict.branch1);
        let theirs_label = self.render_label(&self.config.theirs_label, &conflict.branch2);

        let merged = three_way_merge(
            &conflict.base_content,
            ours_content,
            theirs_content,
            &ours_label,
            &theirs_label,
        );

        let resolution = if merged.is_clean() {
            debug!("Edits are disjoint; auto-merged");
            MergeResolution {
                conflict_id: conflict.id.clone(),
                resolved_content: merged.content,
                resolved_by: RESOLVED_BY_AUTO.to_string(),
                strategy: ResolutionStrategy::Auto,
                markers: Vec::new(),
                resolved_at: Utc::now(),
            }
        } else if let Some((content, adapter_name)) =
            self.try_ai_merge(conflict, ours_content, theirs_content).await
        {
            MergeResolution {
                conflict_id: conflict.id.clone(),
                resolved_content: content,
                resolved_by: format!("ai:{}", adapter_name),
                strategy: ResolutionStrategy::AiAssisted,
                markers: Vec::new(),
                resolved_at: Utc::now(),
            }
        } else {
            debug!(blocks = merged.markers.len(), "Falling back to conflict markers");
            MergeResolution {
                conflict_id: conflict.id.clone(),
                resolved_content: merged.content,
                resolved_by: RESOLVED_BY_MANUAL.to_string(),
                strategy: ResolutionStrategy::Manual,
                markers: merged.markers,
                resolved_at: Utc::now(),
            }
        };

        #[cfg(feature = "telemetry")]
        {
            GLOBAL_METRICS.record_operation("merge.resolve", start.elapsed());
            GLOBAL_METRICS.record_resolution(resolution.strategy);
        }

        info!(
            strategy = %resolution.strategy,
            resolved_by = %resolution.resolved_by,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Resolved conflict"
        );
        self.store.events().emit(BranchEvent::ConflictResolved {
            resolution: resolution.clone(),
            timestamp: Utc::now(),
        });

        Ok(resolution)
    }

    fn current_change(&self, conflict: &MergeConflict, branch_id: &str) -> Result<FileChange, MergeError> {
        self.store
            .get_change(branch_id, &conflict.file_path)
            .ok_or_else(|| MergeError::Stale {
                conflict_id: conflict.id.clone(),
                reason: format!(
                    "branch {} no longer has a change for {}",
                    branch_id, conflict.file_path
                ),
            })
    }

    fn render_label(&self, template: &str, branch_id: &str) -> String {
        match self.store.get_branch(branch_id) {
            Some(branch) => template
                .replace("{agent}", &branch.agent_id)
                .replace("{task}", &branch.task_id)
                .replace("{branch}", &branch.id),
            None => template
                .replace("{agent}", branch_id)
                .replace("{task}", branch_id)
                .replace("{branch}", branch_id),
        }
    }

    /// Ask the adapter for a merged body. Every failure yields `None`.
    async fn try_ai_merge(
        &self,
        conflict: &MergeConflict,
        ours: &str,
        theirs: &str,
    ) -> Option<(String, String)> {
        let adapter = self.adapter.as_ref()?;
        if !self.config.ai_assisted {
            debug!("AI-assisted merging disabled");
            return None;
        }

        let request = CompletionRequest::new(self.build_prompt(conflict, ours, theirs))
            .with_system(AI_SYSTEM_PROMPT);
        let timeout = Duration::from_millis(self.config.ai_timeout_ms);

        let outcome = tokio::time::timeout(timeout, adapter.complete(request)).await;
        let body = match outcome {
            Err(_) => {
                warn!(timeout_ms = self.config.ai_timeout_ms, "AI merge timed out");
                None
            }
            Ok(Err(e)) => {
                warn!(error = %e, adapter = adapter.name(), "AI merge failed");
                None
            }
            Ok(Ok(response)) => {
                #[cfg(feature = "telemetry")]
                GLOBAL_METRICS.record_tokens(
                    u64::from(response.input_tokens),
                    u64::from(response.output_tokens),
                );
                let body = parse_merged_body(&response.text, ours);
                if body.is_none() {
                    warn!(adapter = adapter.name(), "AI response held no usable merge");
                }
                body
            }
        };

        match body {
            Some(content) => Some((content, adapter.name().to_string())),
            None => {
                #[cfg(feature = "telemetry")]
                GLOBAL_METRICS.record_ai_fallback();
                None
            }
        }
    }

    fn build_prompt(&self, conflict: &MergeConflict, ours: &str, theirs: &str) -> String {
        let context = self.config.diff_context_lines;
        let path = &conflict.file_path;
        let ours_diff = render_diff_to_string(&generate_unified_diff(
            Some(conflict.base_content.as_str()),
            Some(ours),
            path,
            context,
        ));
        let theirs_diff = render_diff_to_string(&generate_unified_diff(
            Some(conflict.base_content.as_str()),
            Some(theirs),
            path,
            context,
        ));

        let mut prompt = format!("File: {}\n\n", path);
        if !conflict.conflicting_regions.is_empty() {
            prompt.push_str("Both changes touch:\n");
            for region in &conflict.conflicting_regions {
                prompt.push_str(&format!(
                    "- {} `{}` (lines {}-{})\n",
                    region.kind, region.name, region.start_line, region.end_line
                ));
            }
            prompt.push('\n');
        }
        prompt.push_str(&format!("## BASE\n```\n{}\n```\n\n", conflict.base_content));
        prompt.push_str(&format!("## OURS\n```\n{}\n```\n\n", ours));
        prompt.push_str(&format!("## THEIRS\n```\n{}\n```\n\n", theirs));
        prompt.push_str(&format!("## OURS vs BASE\n```diff\n{}```\n\n", ours_diff));
        prompt.push_str(&format!("## THEIRS vs BASE\n```diff\n{}```\n", theirs_diff));
        prompt
    }

    /// Write a resolution onto both branches and stop tracking its conflict.
    ///
    /// Each branch keeps its own `original_content`. An empty resolution of a
    /// conflict in which either branch deletes the file is recorded as a
    /// deletion on both branches. Branches that are no longer active are
    /// skipped.
    pub fn apply_resolution(&self, resolution: &MergeResolution) -> Result<(), MergeError> {
        let conflict = self
            .conflicts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&resolution.conflict_id)
            .ok_or_else(|| MergeError::ConflictNotFound(resolution.conflict_id.clone()))?;

        let current: Vec<Option<FileChange>> = [&conflict.branch1, &conflict.branch2]
            .iter()
            .map(|id| self.store.get_change(id, &conflict.file_path))
            .collect();
        // Empty output where a branch deleted the file keeps it deleted.
        let deletes_file = resolution.resolved_content.is_empty()
            && current
                .iter()
                .flatten()
                .any(|c| c.change_type == ChangeType::Delete);
        if deletes_file {
            debug!(conflict_id = %conflict.id, "Resolution deletes the file");
        }

        for (branch_id, existing) in [&conflict.branch1, &conflict.branch2].into_iter().zip(current) {
            let change = match existing {
                Some(c) if c.change_type == ChangeType::Create && !deletes_file => {
                    FileChange::create(&conflict.file_path, &resolution.resolved_content)
                }
                existing => {
                    let original = existing
                        .and_then(|c| c.original_content)
                        .unwrap_or_else(|| conflict.base_content.clone());
                    if deletes_file {
                        FileChange::delete(&conflict.file_path, original)
                    } else {
                        FileChange::modify(&conflict.file_path, original, &resolution.resolved_content)
                    }
                }
            };

            if !self.store.record_change(branch_id, change) {
                warn!(branch_id = %branch_id, conflict_id = %conflict.id, "Resolution not recorded on branch");
            }
        }

        info!(
            conflict_id = %conflict.id,
            path = %conflict.file_path,
            strategy = %resolution.strategy,
            "Applied resolution"
        );
        Ok(())
    }

    /// Resolve and apply every tracked conflict, oldest first.
    ///
    /// Conflicts whose branches lost the change are dropped; conflicts
    /// resolved concurrently elsewhere are skipped.
    pub async fn resolve_all(&self) -> Vec<MergeResolution> {
        let mut resolutions = Vec::new();

        for conflict in self.get_active_conflicts() {
            match self.resolve_conflict(&conflict).await {
                Ok(resolution) => match self.apply_resolution(&resolution) {
                    Ok(()) => resolutions.push(resolution),
                    Err(e) => debug!(conflict_id = %conflict.id, error = %e, "Skipping conflict"),
                },
                Err(MergeError::Stale { reason, .. }) => {
                    warn!(conflict_id = %conflict.id, %reason, "Dropping stale conflict");
                    self.remove_conflict(&conflict.id);
                }
                Err(e) => debug!(conflict_id = %conflict.id, error = %e, "Skipping conflict"),
            }
        }

        resolutions
    }

    // ------------------------------------------------------------------
    // Conflict set
    // ------------------------------------------------------------------

    pub fn has_conflicts(&self) -> bool {
        !self
            .conflicts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_empty()
    }

    /// Tracked conflicts, oldest first.
    pub fn get_active_conflicts(&self) -> Vec<MergeConflict> {
        let mut all: Vec<MergeConflict> = self
            .conflicts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        all.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Tracked conflicts involving a branch, oldest first.
    pub fn conflicts_for_branch(&self, branch_id: &str) -> Vec<MergeConflict> {
        self.get_active_conflicts()
            .into_iter()
            .filter(|c| c.involves(branch_id))
            .collect()
    }

    pub fn get_conflict(&self, conflict_id: &str) -> Option<MergeConflict> {
        self.conflicts
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(conflict_id)
            .cloned()
    }

    fn remove_conflict(&self, conflict_id: &str) -> Option<MergeConflict> {
        self.conflicts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(conflict_id)
    }

    /// Forget all tracked conflicts.
    pub fn clear_conflicts(&self) {
        self.conflicts
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl std::fmt::Debug for MergeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MergeEngine")
            .field("adapter", &self.adapter.as_ref().map(|a| a.name().to_string()))
            .field("config", &self.config)
            .field(
                "conflicts",
                &self.conflicts.read().unwrap_or_else(PoisonError::into_inner).len(),
            )
            .finish_non_exhaustive()
    }
}

/// Content a change leaves behind.
fn content_after(change: &FileChange) -> &str {
    match change.change_type {
        ChangeType::Delete => "",
        _ => &change.modified_content,
    }
}

/// 1-indexed inclusive line ranges of `target` that differ from `base`.
///
/// A pure deletion marks the lines on either side of the gap.
fn touched_lines(base: &str, target: &str) -> Vec<(usize, usize)> {
    compute_edits(base, target)
        .iter()
        .map(|edit| {
            let range = edit.target_range();
            if range.is_empty() {
                (range.start.max(1), range.start + 1)
            } else {
                (range.start + 1, range.end)
            }
        })
        .collect()
}

fn touched_regions(regions: Vec<CodeRegion>, touched: &[(usize, usize)]) -> Vec<CodeRegion> {
    regions
        .into_iter()
        .filter(|r| touched.iter().any(|&(s, e)| r.intersects_lines(s, e)))
        .collect()
}

/// Extract a merged file from an adapter reply.
///
/// Prefers the first fenced code block, otherwise the whole reply. Empty
/// bodies and bodies still carrying conflict markers are rejected. Line
/// terminators and the trailing newline follow `reference`.
fn parse_merged_body(text: &str, reference: &str) -> Option<String> {
    let body = match FENCED_BLOCK.captures(text).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => text.trim(),
    };

    if body.trim().is_empty() || body.contains(MARKER_OURS) || has_conflict_markers(body) {
        return None;
    }

    let eol = line_ending(reference);
    let mut body = split_lines(body.trim_end_matches(['\r', '\n'])).join(eol);
    if reference.ends_with('\n') {
        body.push_str(eol);
    }
    Some(body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use crate::events::EventBus;
    use crate::fs::LocalFileSystem;
    use crate::providers::{CompletionResponse, LlmAdapter, MockLlmAdapter};
    use crate::regions::{NoRegions, TreeSitterRegionProvider};
    use async_trait::async_trait;

    const PATH: &str = "/src/common.ts";
    const BASE: &str = "line1\nline2\nline3";

    fn store() -> Arc<BranchStore> {
        Arc::new(BranchStore::new(Arc::new(LocalFileSystem::new()), EventBus::new()))
    }

    fn engine(store: &Arc<BranchStore>) -> MergeEngine {
        MergeEngine::new(store.clone(), Arc::new(NoRegions))
    }

    /// Two branches editing `PATH` from `BASE`.
    fn two_branches(store: &BranchStore, ours: &str, theirs: &str) -> (String, String) {
        let b1 = store.create_branch("agent-1", "task-1");
        let b2 = store.create_branch("agent-2", "task-2");
        store.record_change(&b1.id, FileChange::modify(PATH, BASE, ours));
        store.record_change(&b2.id, FileChange::modify(PATH, BASE, theirs));
        (b1.id, b2.id)
    }

    fn overlapping(store: &BranchStore) -> (String, String) {
        two_branches(store, "line1\nOURS\nline3", "line1\nTHEIRS\nline3")
    }

    fn adapter_returning(text: &'static str) -> SharedAdapter {
        let mut mock = MockLlmAdapter::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_complete()
            .times(1)
            .returning(move |_| Ok(CompletionResponse::text(text)));
        Arc::new(mock)
    }

    #[tokio::test]
    async fn test_disjoint_edits_auto_merge() {
        let store = store();
        let (b1, b2) = two_branches(&store, "line1\nMODIFIED\nline3", "line1\nline2\nCHANGED");
        let engine = engine(&store);

        let conflicts = engine.detect_conflicts();
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].file_path, PATH);
        assert_eq!(conflicts[0].branch1, b1);
        assert_eq!(conflicts[0].branch2, b2);
        assert_eq!(conflicts[0].base_content, BASE);

        let resolution = engine.resolve_conflict(&conflicts[0]).await.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::Auto);
        assert_eq!(resolution.resolved_by, RESOLVED_BY_AUTO);
        assert_eq!(resolution.resolved_content, "line1\nMODIFIED\nCHANGED");
        assert!(resolution.markers.is_empty());
    }

    #[tokio::test]
    async fn test_overlapping_edits_without_adapter_go_manual() {
        let store = store();
        overlapping(&store);
        let engine = engine(&store);

        let conflict = engine.detect_conflicts().remove(0);
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();

        assert_eq!(resolution.strategy, ResolutionStrategy::Manual);
        assert_eq!(resolution.resolved_by, RESOLVED_BY_MANUAL);
        assert_eq!(resolution.markers.len(), 1);
        insta::assert_snapshot!(resolution.resolved_content, @r###"
        line1
        <<<<<<< agent-1
        OURS
        =======
        THEIRS
        >>>>>>> agent-2
        line3
        "###);
    }

    #[tokio::test]
    async fn test_label_templates() {
        let store = store();
        let (b1, _) = overlapping(&store);
        let engine = engine(&store).with_config(MergeConfig {
            ours_label: "{task} ({branch})".to_string(),
            theirs_label: "theirs".to_string(),
            ..MergeConfig::default()
        });

        let conflict = engine.detect_conflicts().remove(0);
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();
        assert!(resolution
            .resolved_content
            .contains(&format!("<<<<<<< task-1 ({})\n", b1)));
        assert!(resolution.resolved_content.contains(">>>>>>> theirs"));
    }

    #[tokio::test]
    async fn test_ai_merge_used_for_overlapping_edits() {
        let store = store();
        overlapping(&store);

        let mut mock = MockLlmAdapter::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_complete()
            .withf(|req| {
                req.prompt.contains(PATH)
                    && req.prompt.contains("## OURS\n```\nline1\nOURS\nline3\n```")
                    && req.system.is_some()
            })
            .times(1)
            .returning(|_| {
                Ok(CompletionResponse::text(
                    "Here you go:\n```typescript\nline1\nOURS and THEIRS\nline3\n```\n",
                ))
            });

        let engine = engine(&store).with_adapter(Arc::new(mock));
        let conflict = engine.detect_conflicts().remove(0);
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();

        assert_eq!(resolution.strategy, ResolutionStrategy::AiAssisted);
        assert_eq!(resolution.resolved_by, "ai:mock");
        assert_eq!(resolution.resolved_content, "line1\nOURS and THEIRS\nline3");
    }

    #[tokio::test]
    async fn test_ai_not_called_for_disjoint_edits() {
        let store = store();
        two_branches(&store, "line1\nMODIFIED\nline3", "line1\nline2\nCHANGED");

        let mut mock = MockLlmAdapter::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_complete().never();

        let engine = engine(&store).with_adapter(Arc::new(mock));
        let conflict = engine.detect_conflicts().remove(0);
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::Auto);
    }

    #[tokio::test]
    async fn test_ai_error_falls_through_to_manual() {
        let store = store();
        overlapping(&store);

        let mut mock = MockLlmAdapter::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_complete()
            .times(1)
            .returning(|_| Err(ProviderError::RateLimited("slow down".to_string())));

        let engine = engine(&store).with_adapter(Arc::new(mock));
        let conflict = engine.detect_conflicts().remove(0);
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::Manual);
    }

    #[tokio::test]
    async fn test_ai_reply_with_markers_is_rejected() {
        let store = store();
        overlapping(&store);

        let engine = engine(&store).with_adapter(adapter_returning(
            "```\nline1\n<<<<<<< a\nOURS\n=======\nTHEIRS\n>>>>>>> b\nline3\n```",
        ));
        let conflict = engine.detect_conflicts().remove(0);
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::Manual);
    }

    #[tokio::test]
    async fn test_ai_disabled_by_config() {
        let store = store();
        overlapping(&store);

        let mut mock = MockLlmAdapter::new();
        mock.expect_name().return_const("mock".to_string());
        mock.expect_complete().never();

        let engine = engine(&store)
            .with_adapter(Arc::new(mock))
            .with_config(MergeConfig {
                ai_assisted: false,
                ..MergeConfig::default()
            });
        let conflict = engine.detect_conflicts().remove(0);
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::Manual);
    }

    struct SlowAdapter;

    #[async_trait]
    impl LlmAdapter for SlowAdapter {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, ProviderError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(CompletionResponse::text("too late"))
        }

        fn name(&self) -> &str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_ai_timeout_falls_through_to_manual() {
        let store = store();
        overlapping(&store);

        let engine = engine(&store)
            .with_adapter(Arc::new(SlowAdapter))
            .with_config(MergeConfig {
                ai_timeout_ms: 20,
                ..MergeConfig::default()
            });
        let conflict = engine.detect_conflicts().remove(0);
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::Manual);
    }

    #[tokio::test]
    async fn test_apply_resolution_clears_conflict_and_updates_both_branches() {
        let store = store();
        let (b1, b2) = two_branches(&store, "line1\nMODIFIED\nline3", "line1\nline2\nCHANGED");
        let engine = engine(&store);

        let conflict = engine.detect_conflicts().remove(0);
        assert!(engine.has_conflicts());

        let resolution = engine.resolve_conflict(&conflict).await.unwrap();
        engine.apply_resolution(&resolution).unwrap();

        assert!(!engine.has_conflicts());
        assert!(engine.get_active_conflicts().is_empty());
        assert!(engine.get_conflict(&conflict.id).is_none());

        for branch in [&b1, &b2] {
            let change = store.get_change(branch, PATH).unwrap();
            assert_eq!(change.modified_content, "line1\nMODIFIED\nCHANGED");
            assert_eq!(change.original_content.as_deref(), Some(BASE));
            assert_eq!(change.change_type, ChangeType::Modify);
        }

        // Both branches now agree, but they still touch the same file.
        let again = engine.detect_conflicts();
        assert_eq!(again.len(), 1);
        let resolution = engine.resolve_conflict(&again[0]).await.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::Auto);
    }

    #[tokio::test]
    async fn test_apply_resolution_twice_fails() {
        let store = store();
        overlapping(&store);
        let engine = engine(&store);

        let conflict = engine.detect_conflicts().remove(0);
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();
        engine.apply_resolution(&resolution).unwrap();

        let err = engine.apply_resolution(&resolution).unwrap_err();
        assert_eq!(err.code(), "CONFLICT_NOT_FOUND");

        let err = engine.resolve_conflict(&conflict).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_apply_resolution_keeps_create_and_skips_inactive() {
        let store = store();
        let b1 = store.create_branch("a1", "t1");
        let b2 = store.create_branch("a2", "t2");
        store.record_change(&b1.id, FileChange::create("/new.ts", "a\nb"));
        store.record_change(&b2.id, FileChange::create("/new.ts", "a\nc"));
        let engine = engine(&store);

        let conflict = engine.detect_conflicts().remove(0);
        assert_eq!(conflict.base_content, "");
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::Manual);

        store.abandon_branch(&b2.id).unwrap();
        engine.apply_resolution(&resolution).unwrap();

        let change = store.get_change(&b1.id, "/new.ts").unwrap();
        assert_eq!(change.change_type, ChangeType::Create);
        assert_eq!(change.modified_content, resolution.resolved_content);
        assert_eq!(store.get_change(&b2.id, "/new.ts").unwrap().modified_content, "a\nc");
    }

    #[tokio::test]
    async fn test_delete_on_both_sides_stays_deleted() {
        let store = store();
        let b1 = store.create_branch("agent-1", "task-1");
        let b2 = store.create_branch("agent-2", "task-2");
        store.record_change(&b1.id, FileChange::delete(PATH, BASE));
        store.record_change(&b2.id, FileChange::delete(PATH, BASE));
        let engine = engine(&store);

        let conflict = engine.detect_conflicts().remove(0);
        assert_eq!(conflict.base_content, BASE);
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::Auto);
        assert_eq!(resolution.resolved_content, "");

        engine.apply_resolution(&resolution).unwrap();
        for branch in [&b1.id, &b2.id] {
            let change = store.get_change(branch, PATH).unwrap();
            assert_eq!(change.change_type, ChangeType::Delete);
            assert_eq!(change.original_content.as_deref(), Some(BASE));
        }
    }

    #[tokio::test]
    async fn test_delete_against_untouched_modify_deletes_both() {
        let store = store();
        let b1 = store.create_branch("agent-1", "task-1");
        let b2 = store.create_branch("agent-2", "task-2");
        store.record_change(&b1.id, FileChange::delete(PATH, BASE));
        store.record_change(&b2.id, FileChange::modify(PATH, BASE, BASE));
        let engine = engine(&store);

        let conflict = engine.detect_conflicts().remove(0);
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::Auto);
        engine.apply_resolution(&resolution).unwrap();

        assert_eq!(store.get_change(&b2.id, PATH).unwrap().change_type, ChangeType::Delete);
    }

    #[tokio::test]
    async fn test_delete_against_modify_goes_manual() {
        let store = store();
        let b1 = store.create_branch("agent-1", "task-1");
        let b2 = store.create_branch("agent-2", "task-2");
        store.record_change(&b1.id, FileChange::delete(PATH, BASE));
        store.record_change(&b2.id, FileChange::modify(PATH, BASE, "line1
CHANGED
line3"));
        let engine = engine(&store);

        let conflict = engine.detect_conflicts().remove(0);
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::Manual);
        assert!(has_conflict_markers(&resolution.resolved_content));
        assert!(resolution.resolved_content.contains("CHANGED"));

        engine.apply_resolution(&resolution).unwrap();
        for branch in [&b1.id, &b2.id] {
            let change = store.get_change(branch, PATH).unwrap();
            assert_eq!(change.change_type, ChangeType::Modify);
            assert_eq!(change.modified_content, resolution.resolved_content);
            assert_eq!(change.original_content.as_deref(), Some(BASE));
        }
    }

    #[tokio::test]
    async fn test_crlf_conflict_auto_merges_with_crlf() {
        let store = store();
        let base = "line1\r\nline2\r\nline3\r\n";
        let b1 = store.create_branch("agent-1", "task-1");
        let b2 = store.create_branch("agent-2", "task-2");
        store.record_change(&b1.id, FileChange::modify(PATH, base, "line1\r\nMODIFIED\r\nline3\r\n"));
        store.record_change(&b2.id, FileChange::modify(PATH, base, "line1\r\nline2\r\nCHANGED\r\n"));
        let engine = engine(&store);

        let conflict = engine.detect_conflicts().remove(0);
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();
        assert_eq!(resolution.strategy, ResolutionStrategy::Auto);
        assert_eq!(resolution.resolved_content, "line1\r\nMODIFIED\r\nCHANGED\r\n");
    }

    #[tokio::test]
    async fn test_detect_deduplicates_tracked_conflicts() {
        let store = store();
        overlapping(&store);
        let engine = engine(&store);
        let mut rx = store.events().subscribe();

        let first = engine.detect_conflicts();
        let second = engine.detect_conflicts();
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].id, second[0].id);
        assert_eq!(engine.get_active_conflicts().len(), 1);

        match rx.try_recv().unwrap() {
            BranchEvent::ConflictDetected { conflicts, .. } => assert_eq!(conflicts.len(), 1),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_detect_covers_every_pair() {
        let store = store();
        let a = store.create_branch("a", "ta");
        let b = store.create_branch("b", "tb");
        let c = store.create_branch("c", "tc");
        store.record_change(&a.id, FileChange::modify("/x", "0", "1"));
        store.record_change(&b.id, FileChange::modify("/x", "0", "2"));
        store.record_change(&c.id, FileChange::modify("/x", "0", "3"));
        store.record_change(&c.id, FileChange::create("/only-c", "z"));
        let engine = engine(&store);

        let conflicts = engine.detect_conflicts();
        assert_eq!(conflicts.len(), 3);
        assert!(conflicts.iter().all(|k| k.file_path == "/x"));
        assert!(conflicts.iter().any(|k| k.matches(&a.id, &c.id, "/x")));

        assert_eq!(engine.conflicts_for_branch(&b.id).len(), 2);
    }

    #[tokio::test]
    async fn test_detect_skips_inactive_branches() {
        let store = store();
        let (b1, _) = overlapping(&store);
        store.abandon_branch(&b1).unwrap();

        let engine = engine(&store);
        assert!(engine.detect_conflicts().is_empty());
        assert!(!engine.has_conflicts());
    }

    #[tokio::test]
    async fn test_detect_conflicts_for_branch() {
        let store = store();
        let a = store.create_branch("a", "ta");
        let b = store.create_branch("b", "tb");
        let c = store.create_branch("c", "tc");
        store.record_change(&a.id, FileChange::modify("/x", "0", "1"));
        store.record_change(&b.id, FileChange::modify("/x", "0", "2"));
        store.record_change(&c.id, FileChange::modify("/y", "0", "3"));
        store.record_change(&b.id, FileChange::modify("/y", "0", "4"));
        let engine = engine(&store);

        let conflicts = engine.detect_conflicts_for(&c.id);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(conflicts[0].branch1, b.id);
        assert_eq!(conflicts[0].branch2, c.id);
        assert_eq!(conflicts[0].file_path, "/y");

        assert!(engine.detect_conflicts_for("missing").is_empty());
        assert_eq!(engine.detect_conflicts().len(), 2);
    }

    #[tokio::test]
    async fn test_create_conflict_requires_both_changes() {
        let store = store();
        let (b1, _) = overlapping(&store);
        let b3 = store.create_branch("agent-3", "task-3");
        let engine = engine(&store);

        assert!(engine.create_conflict(&b1, &b3.id, PATH).is_none());
        assert!(engine.create_conflict(&b1, "missing", PATH).is_none());
        // Not tracked until detected.
        assert!(!engine.has_conflicts());
    }

    #[tokio::test]
    async fn test_resolve_stale_conflict() {
        let store = store();
        let (_, b2) = overlapping(&store);
        let engine = engine(&store);

        let conflict = engine.detect_conflicts().remove(0);
        store.delete_branch(&b2);

        let err = engine.resolve_conflict(&conflict).await.unwrap_err();
        assert_eq!(err.code(), "CONFLICT_STALE");
        assert!(engine.resolve_all().await.is_empty());
        assert!(!engine.has_conflicts());
    }

    #[tokio::test]
    async fn test_resolve_all() {
        let store = store();
        let b1 = store.create_branch("a1", "t1");
        let b2 = store.create_branch("a2", "t2");
        store.record_changes(
            &b1.id,
            vec![
                FileChange::modify("/one", BASE, "line1\nX\nline3"),
                FileChange::modify("/two", BASE, "Y\nline2\nline3"),
            ],
        );
        store.record_changes(
            &b2.id,
            vec![
                FileChange::modify("/one", BASE, "line1\nline2\nZ"),
                FileChange::modify("/two", BASE, "W\nline2\nline3"),
            ],
        );
        let engine = engine(&store);
        engine.detect_conflicts();

        let resolutions = engine.resolve_all().await;
        assert_eq!(resolutions.len(), 2);
        assert!(!engine.has_conflicts());

        let mut strategies: Vec<&str> = resolutions.iter().map(|r| r.strategy.as_str()).collect();
        strategies.sort();
        assert_eq!(strategies, vec!["auto", "manual"]);
    }

    #[tokio::test]
    async fn test_resolve_emits_event() {
        let store = store();
        overlapping(&store);
        let engine = engine(&store);
        let conflict = engine.detect_conflicts().remove(0);

        let mut rx = store.events().subscribe();
        let resolution = engine.resolve_conflict(&conflict).await.unwrap();

        match rx.try_recv().unwrap() {
            BranchEvent::ConflictResolved { resolution: r, .. } => {
                assert_eq!(r.conflict_id, resolution.conflict_id)
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_clear_conflicts() {
        let store = store();
        overlapping(&store);
        let engine = engine(&store);
        engine.detect_conflicts();

        engine.clear_conflicts();
        assert!(!engine.has_conflicts());
    }

    const TS_BASE: &str = "function alpha() {\n  return 1;\n}\n\nfunction beta() {\n  return 2;\n}\n";

    fn region_engine(store: &Arc<BranchStore>) -> MergeEngine {
        MergeEngine::new(store.clone(), Arc::new(TreeSitterRegionProvider::new().unwrap()))
    }

    #[test]
    fn test_conflicting_regions_for_same_function() {
        let store = store();
        let b1 = store.create_branch("a1", "t1");
        let b2 = store.create_branch("a2", "t2");
        store.record_change(
            &b1.id,
            FileChange::modify("/m.ts", TS_BASE, TS_BASE.replace("return 1;", "return 10;")),
        );
        store.record_change(
            &b2.id,
            FileChange::modify("/m.ts", TS_BASE, TS_BASE.replace("return 1;", "return 11;")),
        );

        let conflict = region_engine(&store)
            .create_conflict(&b1.id, &b2.id, "/m.ts")
            .unwrap();
        assert!(conflict.conflicting_regions.iter().any(|r| r.name == "alpha"));
        assert!(conflict.conflicting_regions.iter().all(|r| r.name != "beta"));
    }

    #[test]
    fn test_no_conflicting_regions_for_different_functions() {
        let store = store();
        let b1 = store.create_branch("a1", "t1");
        let b2 = store.create_branch("a2", "t2");
        store.record_change(
            &b1.id,
            FileChange::modify("/m.ts", TS_BASE, TS_BASE.replace("return 1;", "return 10;")),
        );
        store.record_change(
            &b2.id,
            FileChange::modify("/m.ts", TS_BASE, TS_BASE.replace("return 2;", "return 20;")),
        );

        let conflict = region_engine(&store)
            .create_conflict(&b1.id, &b2.id, "/m.ts")
            .unwrap();
        assert!(conflict.conflicting_regions.is_empty());
    }

    #[test]
    fn test_parse_merged_body() {
        assert_eq!(
            parse_merged_body("```rust\nfn a() {}\n```", "x\n").as_deref(),
            Some("fn a() {}\n")
        );
        assert_eq!(parse_merged_body("  plain body \n", "x").as_deref(), Some("plain body"));
        assert!(parse_merged_body("```\n\n```", "x").is_none());
        assert!(parse_merged_body("   ", "x").is_none());
        assert!(parse_merged_body("<<<<<<< a\nx\n=======\ny\n>>>>>>> b", "x").is_none());
        // Terminators follow the reference file.
        assert_eq!(
            parse_merged_body("```\na\nb\n```", "x\r\ny\r\n").as_deref(),
            Some("a\r\nb\r\n")
        );
        assert_eq!(parse_merged_body("a\r\nb", "x\ny").as_deref(), Some("a\nb"));
    }

    #[test]
    fn test_touched_lines() {
        // Replacement of line 2.
        assert_eq!(touched_lines("a\nb\nc", "a\nB\nc"), vec![(2, 2)]);
        // Deletion of line 2 marks the neighbours.
        assert_eq!(touched_lines("a\nb\nc", "a\nc"), vec![(1, 2)]);
        // Deletion of the first line.
        assert_eq!(touched_lines("a\nb", "b"), vec![(1, 1)]);
    }
}
