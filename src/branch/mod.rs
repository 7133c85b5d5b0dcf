// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Virtual branch store.
//!
//! Every agent/task pair stages its file edits on a [`VirtualBranch`]
//! owned by a [`BranchStore`]. Branches stay in memory until they are either
//! merged to disk or abandoned:
//!
//! ```text
//! create_branch ──► active ──record_change(s)──► active
//!                     │                            │
//!                     ├── merge_branch (all ok) ──► merged
//!                     └── abandon_branch ─────────► abandoned
//! ```
//!
//! A failed merge leaves the branch `active` so the caller can retry.
//!
//! [`VirtualBranch`]: crate::types::VirtualBranch

mod store;

pub use store::{BranchStore, UNKNOWN_CONTENT};
