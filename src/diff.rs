// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Line diffing for file changes.
//!
//! Provides the line diff shared by the branch store (advisory unified
//! diffs attached to every [`FileChange`](crate::types::FileChange)) and the
//! merge engine (base-relative [`Edit`]s used for three-way merging).

use std::fmt::Write;

use diffy::{DiffOptions, Line};

/// A line in a diff hunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffLine {
    /// Context line (unchanged).
    Context(String),
    /// Added line (starts with +).
    Added(String),
    /// Removed line (starts with -).
    Removed(String),
}

impl DiffLine {
    /// Get the content of the line (without the +/- prefix).
    pub fn content(&self) -> &str {
        match self {
            DiffLine::Context(s) | DiffLine::Added(s) | DiffLine::Removed(s) => s.as_str(),
        }
    }

    /// Get the line prefix character.
    pub fn prefix(&self) -> char {
        match self {
            DiffLine::Context(_) => ' ',
            DiffLine::Added(_) => '+',
            DiffLine::Removed(_) => '-',
        }
    }
}

/// A hunk in a diff (a section of changes).
#[derive(Debug, Clone)]
pub struct DiffHunk {
    /// Old file starting line number.
    pub old_start: usize,
    /// Number of lines in old file for this hunk.
    pub old_lines: usize,
    /// New file starting line number.
    pub new_start: usize,
    /// Number of lines in new file for this hunk.
    pub new_lines: usize,
    /// The lines in this hunk.
    pub lines: Vec<DiffLine>,
}

/// A unified diff between two versions of a file.
#[derive(Debug, Clone)]
pub struct UnifiedDiff {
    /// File path (if available).
    pub file_path: Option<String>,
    /// Old file header.
    pub old_file: String,
    /// New file header.
    pub new_file: String,
    /// The hunks of changes.
    pub hunks: Vec<DiffHunk>,
    /// Total lines added.
    pub lines_added: usize,
    /// Total lines removed.
    pub lines_removed: usize,
    /// Whether this creates the file.
    pub is_new_file: bool,
    /// Whether this deletes the file.
    pub is_deleted_file: bool,
}

/// A contiguous replacement of base lines.
///
/// `base_start..base_end` is a zero-indexed, end-exclusive range of base
/// lines; an empty range is a pure insertion before `base_start`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Edit {
    pub base_start: usize,
    pub base_end: usize,
    /// Replacement lines.
    pub lines: Vec<String>,
    /// Zero-indexed line in the target version where the replacement begins.
    pub target_start: usize,
}

impl Edit {
    /// Whether this edit only inserts lines.
    pub fn is_insertion(&self) -> bool {
        self.base_start == self.base_end
    }

    /// Target-side line range (zero-indexed, end-exclusive).
    pub fn target_range(&self) -> std::ops::Range<usize> {
        self.target_start..self.target_start + self.lines.len()
    }
}

/// Split content into lines without line terminators.
///
/// Both `\n` and `\r\n` terminate a line; see [`line_ending`] for putting
/// them back.
pub fn split_lines(content: &str) -> Vec<&str> {
    content.lines().collect()
}

/// Line terminator used by `content`: `"\r\n"` if its first line break is
/// CRLF, `"\n"` otherwise (including content with no line break).
pub fn line_ending(content: &str) -> &'static str {
    match content.find('\n') {
        Some(idx) if content[..idx].ends_with('\r') => "\r\n",
        _ => "\n",
    }
}

/// Generate a unified diff between two versions of a file.
///
/// `old_content` is `None` when the file is being created; `new_content` is
/// `None` when the file is being deleted.
pub fn generate_unified_diff(
    old_content: Option<&str>,
    new_content: Option<&str>,
    file_path: &str,
    context_lines: usize,
) -> UnifiedDiff {
    let is_new_file = old_content.is_none();
    let is_deleted_file = new_content.is_none();
    let old_content = old_content.unwrap_or("");
    let new_content = new_content.unwrap_or("");

    let old_lines = split_lines(old_content);
    let new_lines = split_lines(new_content);

    let changes = compute_diff(&old_lines, &new_lines);
    let hunks = create_hunks(&changes, &old_lines, &new_lines, context_lines);

    let mut lines_added = 0usize;
    let mut lines_removed = 0usize;
    for change in &changes {
        match change {
            Change::Add(_) => lines_added += 1,
            Change::Delete(_) => lines_removed += 1,
            _ => {}
        }
    }

    let trimmed = file_path.trim_start_matches('/');
    UnifiedDiff {
        file_path: Some(file_path.to_string()),
        old_file: if is_new_file {
            "/dev/null".to_string()
        } else {
            format!("a/{}", trimmed)
        },
        new_file: if is_deleted_file {
            "/dev/null".to_string()
        } else {
            format!("b/{}", trimmed)
        },
        hunks,
        lines_added,
        lines_removed,
        is_new_file,
        is_deleted_file,
    }
}

/// Compute the base-relative edits that turn `base` into `target`.
///
/// Edits are returned in base order and never overlap each other.
pub fn compute_edits(base: &str, target: &str) -> Vec<Edit> {
    let base_lines = split_lines(base);
    let target_lines = split_lines(target);
    let changes = compute_diff(&base_lines, &target_lines);

    let mut edits = Vec::new();
    let mut current: Option<Edit> = None;
    // Cursors into base and target.
    let mut i = 0usize;
    let mut j = 0usize;

    for change in &changes {
        match change {
            Change::Keep(_) => {
                if let Some(edit) = current.take() {
                    edits.push(edit);
                }
                i += 1;
                j += 1;
            }
            Change::Delete(_) => {
                let edit = current.get_or_insert_with(|| Edit {
                    base_start: i,
                    base_end: i,
                    lines: Vec::new(),
                    target_start: j,
                });
                edit.base_end = i + 1;
                i += 1;
            }
            Change::Add(idx) => {
                let edit = current.get_or_insert_with(|| Edit {
                    base_start: i,
                    base_end: i,
                    lines: Vec::new(),
                    target_start: j,
                });
                edit.lines.push(target_lines[*idx].to_string());
                j += 1;
            }
        }
    }

    if let Some(edit) = current {
        edits.push(edit);
    }

    edits
}

/// A change operation from the diff algorithm.
#[derive(Debug, Clone)]
pub(crate) enum Change {
    /// Line kept from old (with index).
    Keep(usize),
    /// Line deleted from old (with index).
    Delete(usize),
    /// Line added from new (with index).
    Add(usize),
}

/// Compute a minimal line diff between two sequences.
///
/// Runs Myers' linear-space algorithm via `diffy`, so memory stays
/// proportional to the input rather than to the product of both lengths.
pub(crate) fn compute_diff(old: &[&str], new: &[&str]) -> Vec<Change> {
    let (m, n) = (old.len(), new.len());

    // Common prefix and suffix never reach the diff engine.
    let prefix = old.iter().zip(new).take_while(|(a, b)| a == b).count();
    let suffix = old[prefix..]
        .iter()
        .rev()
        .zip(new[prefix..].iter().rev())
        .take_while(|(a, b)| a == b)
        .count();

    let mut changes = Vec::with_capacity(m.max(n));
    changes.extend((0..prefix).map(Change::Keep));

    let old_mid = &old[prefix..m - suffix];
    let new_mid = &new[prefix..n - suffix];
    if old_mid.is_empty() {
        changes.extend((prefix..n - suffix).map(Change::Add));
    } else if new_mid.is_empty() {
        changes.extend((prefix..m - suffix).map(Change::Delete));
    } else {
        diff_middle(old_mid, new_mid, prefix, &mut changes);
    }

    changes.extend((0..suffix).map(|k| Change::Keep(m - suffix + k)));
    changes
}

/// Diff two non-empty slices whose first entries sit at `offset` in the
/// full sequences.
fn diff_middle(old: &[&str], new: &[&str], offset: usize, changes: &mut Vec<Change>) {
    // One newline-terminated line per entry so diffy's lines map 1:1.
    let old_text = terminated(old);
    let new_text = terminated(new);

    // Enough context to fold every change into a single hunk spanning both inputs.
    let mut options = DiffOptions::new();
    options.set_context_len(old.len() + new.len() + 1);
    let patch = options.create_patch(&old_text, &new_text);

    let (mut i, mut j) = (offset, offset);
    for hunk in patch.hunks() {
        for line in hunk.lines() {
            match line {
                Line::Context(_) => {
                    changes.push(Change::Keep(i));
                    i += 1;
                    j += 1;
                }
                Line::Delete(_) => {
                    changes.push(Change::Delete(i));
                    i += 1;
                }
                Line::Insert(_) => {
                    changes.push(Change::Add(j));
                    j += 1;
                }
            }
        }
    }

    // No hunk means the slices compared equal line for line.
    let (old_end, new_end) = (offset + old.len(), offset + new.len());
    while i < old_end && j < new_end {
        changes.push(Change::Keep(i));
        i += 1;
        j += 1;
    }
    changes.extend((i..old_end).map(Change::Delete));
    changes.extend((j..new_end).map(Change::Add));
}

fn terminated(lines: &[&str]) -> String {
    let mut text = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        text.push_str(line);
        text.push('\n');
    }
    text
}

/// Create hunks from changes with context.
fn create_hunks(
    changes: &[Change],
    old_lines: &[&str],
    new_lines: &[&str],
    context_lines: usize,
) -> Vec<DiffHunk> {
    let mut hunks = Vec::new();
    let mut current_hunk: Option<(usize, usize, Vec<DiffLine>)> = None;

    let mut old_line_num = 1usize;
    let mut new_line_num = 1usize;
    let mut last_change_end = 0usize;

    for (idx, change) in changes.iter().enumerate() {
        let is_change = matches!(change, Change::Add(_) | Change::Delete(_));

        if is_change {
            let gap = idx.saturating_sub(last_change_end);
            let needs_new_hunk = current_hunk.is_none() || gap > context_lines * 2;

            if needs_new_hunk {
                if let Some((old_start, new_start, mut lines)) = current_hunk.take() {
                    push_trailing_context(&mut lines, changes, old_lines, last_change_end, context_lines);
                    hunks.push(finish_hunk(old_start, new_start, lines));
                }

                let context_start = idx.saturating_sub(context_lines).max(last_change_end);
                let leading = idx - context_start;
                let old_start = old_line_num - leading;
                let new_start = new_line_num - leading;
                let mut lines = Vec::new();

                for change in &changes[context_start..idx] {
                    if let Change::Keep(i) = change {
                        lines.push(DiffLine::Context(old_lines[*i].to_string()));
                    }
                }

                current_hunk = Some((old_start, new_start, lines));
            } else if let Some((_, _, ref mut lines)) = current_hunk {
                for change in &changes[last_change_end..idx] {
                    if let Change::Keep(i) = change {
                        lines.push(DiffLine::Context(old_lines[*i].to_string()));
                    }
                }
            }

            if let Some((_, _, ref mut lines)) = current_hunk {
                match change {
                    Change::Delete(i) => lines.push(DiffLine::Removed(old_lines[*i].to_string())),
                    Change::Add(i) => lines.push(DiffLine::Added(new_lines[*i].to_string())),
                    Change::Keep(_) => {}
                }
            }

            last_change_end = idx + 1;
        }

        match change {
            Change::Keep(_) => {
                old_line_num += 1;
                new_line_num += 1;
            }
            Change::Delete(_) => old_line_num += 1,
            Change::Add(_) => new_line_num += 1,
        }
    }

    if let Some((old_start, new_start, mut lines)) = current_hunk {
        push_trailing_context(&mut lines, changes, old_lines, last_change_end, context_lines);
        hunks.push(finish_hunk(old_start, new_start, lines));
    }

    hunks
}

fn push_trailing_context(
    lines: &mut Vec<DiffLine>,
    changes: &[Change],
    old_lines: &[&str],
    from: usize,
    context_lines: usize,
) {
    let end = (from + context_lines).min(changes.len());
    for change in &changes[from..end] {
        if let Change::Keep(i) = change {
            lines.push(DiffLine::Context(old_lines[*i].to_string()));
        }
    }
}

fn finish_hunk(old_start: usize, new_start: usize, lines: Vec<DiffLine>) -> DiffHunk {
    let old_lines = lines
        .iter()
        .filter(|l| !matches!(l, DiffLine::Added(_)))
        .count();
    let new_lines = lines
        .iter()
        .filter(|l| !matches!(l, DiffLine::Removed(_)))
        .count();

    DiffHunk {
        old_start,
        old_lines,
        new_start,
        new_lines,
        lines,
    }
}

/// Render a unified diff as a string (git diff format).
pub fn render_diff_to_string(diff: &UnifiedDiff) -> String {
    let mut output = String::new();

    if diff.hunks.is_empty() {
        return output;
    }

    let _ = writeln!(output, "--- {}", diff.old_file);
    let _ = writeln!(output, "+++ {}", diff.new_file);

    for hunk in &diff.hunks {
        let _ = writeln!(
            output,
            "@@ -{},{} +{},{} @@",
            hunk.old_start, hunk.old_lines, hunk.new_start, hunk.new_lines
        );

        for line in &hunk.lines {
            let _ = writeln!(output, "{}{}", line.prefix(), line.content());
        }
    }

    output
}

/// Get summary statistics for a diff.
pub fn diff_stats(diff: &UnifiedDiff) -> String {
    if diff.is_new_file {
        format!("{} insertions(+)", diff.lines_added)
    } else if diff.is_deleted_file {
        format!("{} deletions(-)", diff.lines_removed)
    } else if diff.lines_added == 0 && diff.lines_removed == 0 {
        "no changes".to_string()
    } else {
        format!(
            "{} insertions(+), {} deletions(-)",
            diff.lines_added, diff.lines_removed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_simple_diff() {
        let old = "line1\nline2\nline3";
        let new = "line1\nmodified\nline3";

        let diff = generate_unified_diff(Some(old), Some(new), "/src/test.txt", 3);

        assert_eq!(diff.file_path.as_deref(), Some("/src/test.txt"));
        assert_eq!(diff.old_file, "a/src/test.txt");
        assert!(!diff.is_new_file);
        assert_eq!(diff.lines_added, 1);
        assert_eq!(diff.lines_removed, 1);
        assert_eq!(diff.hunks.len(), 1);
        assert_eq!(diff.hunks[0].old_lines, 3);
        assert_eq!(diff.hunks[0].new_lines, 3);
    }

    #[test]
    fn test_generate_new_and_deleted_file() {
        let created = generate_unified_diff(None, Some("a\nb\nc"), "/x.txt", 3);
        assert!(created.is_new_file);
        assert_eq!(created.old_file, "/dev/null");
        assert_eq!(created.lines_added, 3);
        assert_eq!(diff_stats(&created), "3 insertions(+)");

        let deleted = generate_unified_diff(Some("a\nb"), None, "/x.txt", 3);
        assert!(deleted.is_deleted_file);
        assert_eq!(deleted.new_file, "/dev/null");
        assert_eq!(diff_stats(&deleted), "2 deletions(-)");
    }

    #[test]
    fn test_render_contains_hunk_header() {
        let diff = generate_unified_diff(Some("foo\nbar\nbaz"), Some("foo\nqux\nbaz"), "f.txt", 3);
        let rendered = render_diff_to_string(&diff);

        assert!(rendered.starts_with("--- a/f.txt\n+++ b/f.txt\n"));
        assert!(rendered.contains("@@ -1,3 +1,3 @@"));
        assert!(rendered.contains("-bar\n"));
        assert!(rendered.contains("+qux\n"));
    }

    #[test]
    fn test_empty_diff_renders_nothing() {
        let diff = generate_unified_diff(Some("a\nb"), Some("a\nb"), "f.txt", 3);
        assert_eq!(diff.lines_added, 0);
        assert_eq!(diff_stats(&diff), "no changes");
        assert!(render_diff_to_string(&diff).is_empty());
    }

    #[test]
    fn test_distant_changes_split_into_hunks() {
        let old: String = (1..=20).map(|i| format!("l{}\n", i)).collect();
        let new = old.replace("l2\n", "x2\n").replace("l18\n", "x18\n");

        let diff = generate_unified_diff(Some(&old), Some(&new), "f.txt", 2);
        assert_eq!(diff.hunks.len(), 2);
        assert_eq!(diff.hunks[1].old_start, 16);
        assert_eq!(diff.hunks[1].old_lines, 5);
    }

    #[test]
    fn test_compute_edits_replacement() {
        let edits = compute_edits("line1\nline2\nline3", "line1\nMODIFIED\nline3");
        assert_eq!(
            edits,
            vec![Edit {
                base_start: 1,
                base_end: 2,
                lines: vec!["MODIFIED".to_string()],
                target_start: 1,
            }]
        );
    }

    #[test]
    fn test_compute_edits_insert_and_delete() {
        let edits = compute_edits("a\nc\nd", "a\nb\nc");
        assert_eq!(edits.len(), 2);
        assert!(edits[0].is_insertion());
        assert_eq!(edits[0].base_start, 1);
        assert_eq!(edits[0].lines, vec!["b"]);
        assert_eq!(edits[1].base_start, 2);
        assert_eq!(edits[1].base_end, 3);
        assert!(edits[1].lines.is_empty());
    }

    #[test]
    fn test_compute_edits_identical() {
        assert!(compute_edits("a\nb\n", "a\nb\n").is_empty());
    }

    #[test]
    fn test_compute_diff_additions() {
        let changes = compute_diff(&["a", "c"], &["a", "b", "c"]);

        assert_eq!(changes.len(), 3);
        assert!(matches!(changes[0], Change::Keep(0)));
        assert!(matches!(changes[1], Change::Add(1)));
        assert!(matches!(changes[2], Change::Keep(1)));
    }

    #[test]
    fn test_compute_diff_deletions_and_replacements() {
        let changes = compute_diff(&["a", "b", "c", "d"], &["a", "X", "d"]);
        let deleted = changes.iter().filter(|c| matches!(c, Change::Delete(_))).count();
        let added = changes.iter().filter(|c| matches!(c, Change::Add(_))).count();

        assert_eq!((deleted, added), (2, 1));
        assert!(matches!(changes[0], Change::Keep(0)));
        assert!(matches!(changes.last(), Some(Change::Keep(3))));
    }

    #[test]
    fn test_compute_diff_disjoint_inputs() {
        let changes = compute_diff(&["a", "b"], &["c"]);
        assert_eq!(changes.len(), 3);
        assert!(changes.iter().all(|c| !matches!(c, Change::Keep(_))));
    }

    #[test]
    fn test_large_file_edits_stay_local() {
        let base: String = (0..50_000).map(|i| format!("line {}\n", i)).collect();
        let target = base
            .replace("line 10\n", "line ten\n")
            .replace("line 40000\n", "line forty thousand\n");

        let edits = compute_edits(&base, &target);
        assert_eq!(edits.len(), 2);
        assert_eq!((edits[0].base_start, edits[0].base_end), (10, 11));
        assert_eq!(edits[1].lines, vec!["line forty thousand"]);
        assert_eq!(edits[1].target_range(), 40_000..40_001);

        let diff = generate_unified_diff(Some(&base), Some(&target), "/big.txt", 3);
        assert_eq!((diff.lines_added, diff.lines_removed), (2, 2));
        assert_eq!(diff.hunks.len(), 2);
    }

    #[test]
    fn test_line_endings() {
        assert_eq!(line_ending("a\r\nb\r\n"), "\r\n");
        assert_eq!(line_ending("a\nb\r\n"), "\n");
        assert_eq!(line_ending("single line"), "\n");
        assert_eq!(split_lines("a\r\nb"), vec!["a", "b"]);
        assert_eq!(
            compute_edits("a\r\nb\r\nc\r\n", "a\r\nB\r\nc\r\n")[0].lines,
            vec!["B"]
        );
    }
}
