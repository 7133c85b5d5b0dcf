// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Merge engine for concurrent virtual branches.
//!
//! Conflicts are found by comparing the changed-file sets of every pair of
//! active branches. Each conflict is then resolved by the first step of the
//! cascade that succeeds:
//!
//! 1. **Auto**: a line-level three-way merge when the edits are disjoint.
//! 2. **AI-assisted**: an [`LlmAdapter`](crate::providers::LlmAdapter)
//!    produces the merged file, if one is configured.
//! 3. **Manual**: git-style conflict markers are emitted for a human.

mod engine;
pub mod markers;
pub mod three_way;

pub use engine::{MergeEngine, RESOLVED_BY_AUTO, RESOLVED_BY_MANUAL};
pub use markers::{find_conflict_markers, has_conflict_markers, strip_conflict_markers, KeepSide};
pub use three_way::{can_auto_merge, three_way_merge, ThreeWayMerge};
