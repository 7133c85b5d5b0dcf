// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Line-level three-way merge.
//!
//! Both sides are diffed against the common base. Edits that touch disjoint
//! base ranges are applied together; edits that overlap are grouped into a
//! conflict block and emitted between `<<<<<<<` / `=======` / `>>>>>>>`
//! delimiters.

use tracing::debug;

use crate::diff::{compute_edits, line_ending, split_lines, Edit};
use crate::types::ConflictMarker;

/// Opening delimiter of a conflict block.
pub const MARKER_OURS: &str = "<<<<<<<";
/// Separator between the two sides of a conflict block.
pub const MARKER_SEPARATOR: &str = "=======";
/// Closing delimiter of a conflict block.
pub const MARKER_THEIRS: &str = ">>>>>>>";

/// Output of [`three_way_merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreeWayMerge {
    /// Merged content; contains conflict blocks if `markers` is non-empty.
    pub content: String,
    /// One entry per conflict block, in file order.
    pub markers: Vec<ConflictMarker>,
}

impl ThreeWayMerge {
    /// Whether the merge completed without conflicts.
    pub fn is_clean(&self) -> bool {
        self.markers.is_empty()
    }

    fn clean(content: &str) -> Self {
        Self {
            content: content.to_string(),
            markers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Ours,
    Theirs,
}

#[derive(Debug)]
struct SidedEdit {
    side: Side,
    edit: Edit,
}

/// Merge `ours` and `theirs`, both derived from `base`.
///
/// `ours_label` and `theirs_label` are appended to the opening and closing
/// delimiters of each conflict block. Lines are rejoined with the base's line
/// terminator (or, for single-line bases, the first side that has one).
pub fn three_way_merge(
    base: &str,
    ours: &str,
    theirs: &str,
    ours_label: &str,
    theirs_label: &str,
) -> ThreeWayMerge {
    if ours == base || ours == theirs {
        debug!("ours matches base or theirs, taking theirs");
        return ThreeWayMerge::clean(theirs);
    }
    if theirs == base {
        debug!("theirs matches base, taking ours");
        return ThreeWayMerge::clean(ours);
    }

    let base_lines = split_lines(base);
    let edits = sided_edits(compute_edits(base, ours), compute_edits(base, theirs));
    let clusters = cluster(edits);

    let mut out: Vec<String> = Vec::with_capacity(base_lines.len());
    let mut markers = Vec::new();
    let mut cursor = 0usize;

    for group in &clusters {
        let start = group.iter().map(|e| e.edit.base_start).min().unwrap_or(cursor);
        let end = group.iter().map(|e| e.edit.base_end).max().unwrap_or(cursor);

        out.extend(base_lines[cursor..start].iter().map(|l| l.to_string()));
        cursor = end;

        let ours_block = render_side(&base_lines, start, end, group, Side::Ours);
        let theirs_block = render_side(&base_lines, start, end, group, Side::Theirs);
        let two_sided = group.iter().any(|e| e.side == Side::Ours)
            && group.iter().any(|e| e.side == Side::Theirs);

        if !two_sided || ours_block == theirs_block {
            let winner = if group.iter().any(|e| e.side == Side::Ours) {
                ours_block
            } else {
                theirs_block
            };
            out.extend(winner);
            continue;
        }

        let start_line = out.len() + 1;
        let separator_line = start_line + ours_block.len() + 1;
        let marker = ConflictMarker {
            start_line,
            ours_start: start_line + 1,
            ours_end: start_line + ours_block.len(),
            separator_line,
            theirs_start: separator_line + 1,
            theirs_end: separator_line + theirs_block.len(),
            end_line: separator_line + theirs_block.len() + 1,
        };

        out.push(delimiter(MARKER_OURS, ours_label));
        out.extend(ours_block);
        out.push(MARKER_SEPARATOR.to_string());
        out.extend(theirs_block);
        out.push(delimiter(MARKER_THEIRS, theirs_label));
        markers.push(marker);
    }

    out.extend(base_lines[cursor..].iter().map(|l| l.to_string()));

    let base_nl = base.ends_with('\n');
    let ours_nl = ours.ends_with('\n');
    let trailing_newline = if ours_nl != base_nl {
        ours_nl
    } else {
        theirs.ends_with('\n')
    };

    let eol = merge_line_ending(base, ours, theirs);
    let mut content = out.join(eol);
    if trailing_newline && !out.is_empty() {
        content.push_str(eol);
    }

    debug!(conflicts = markers.len(), "three-way merge finished");
    ThreeWayMerge { content, markers }
}

/// Whether `ours` and `theirs` can be merged without conflict blocks.
pub fn can_auto_merge(base: &str, ours: &str, theirs: &str) -> bool {
    if ours == base || theirs == base || ours == theirs {
        return true;
    }
    let edits = sided_edits(compute_edits(base, ours), compute_edits(base, theirs));
    cluster(edits).iter().all(|group| {
        !(group.iter().any(|e| e.side == Side::Ours) && group.iter().any(|e| e.side == Side::Theirs))
    })
}

fn merge_line_ending(base: &str, ours: &str, theirs: &str) -> &'static str {
    [base, ours, theirs]
        .into_iter()
        .find(|c| c.contains('\n'))
        .map_or("\n", line_ending)
}

fn delimiter(marker: &str, label: &str) -> String {
    if label.is_empty() {
        marker.to_string()
    } else {
        format!("{} {}", marker, label)
    }
}

/// Tag and order both sides' edits, dropping edits theirs shares with ours.
fn sided_edits(ours: Vec<Edit>, theirs: Vec<Edit>) -> Vec<SidedEdit> {
    let mut all: Vec<SidedEdit> = Vec::with_capacity(ours.len() + theirs.len());
    for edit in theirs {
        let duplicate = ours.iter().any(|o| {
            o.base_start == edit.base_start && o.base_end == edit.base_end && o.lines == edit.lines
        });
        if !duplicate {
            all.push(SidedEdit {
                side: Side::Theirs,
                edit,
            });
        }
    }
    all.extend(ours.into_iter().map(|edit| SidedEdit {
        side: Side::Ours,
        edit,
    }));

    // Insertions sort before replacements starting at the same line.
    all.sort_by(|a, b| {
        (a.edit.base_start, a.edit.base_end, a.side == Side::Theirs).cmp(&(
            b.edit.base_start,
            b.edit.base_end,
            b.side == Side::Theirs,
        ))
    });
    all
}

/// Whether two edits from opposite sides cannot both be applied.
fn collides(a: &SidedEdit, b: &SidedEdit) -> bool {
    if a.side == b.side {
        return false;
    }
    let (a, b) = (&a.edit, &b.edit);
    match (a.is_insertion(), b.is_insertion()) {
        (true, true) => a.base_start == b.base_start && a.lines != b.lines,
        (true, false) => b.base_start < a.base_start && a.base_start < b.base_end,
        (false, true) => a.base_start < b.base_start && b.base_start < a.base_end,
        (false, false) => a.base_start < b.base_end && b.base_start < a.base_end,
    }
}

/// Group sorted edits so that colliding edits share a group.
fn cluster(edits: Vec<SidedEdit>) -> Vec<Vec<SidedEdit>> {
    let mut groups: Vec<Vec<SidedEdit>> = Vec::new();
    for edit in edits {
        match groups.last_mut() {
            Some(group) if group.iter().any(|g| collides(g, &edit)) => group.push(edit),
            _ => groups.push(vec![edit]),
        }
    }
    groups
}

/// Base lines `start..end` with one side's edits from `group` applied.
fn render_side(
    base_lines: &[&str],
    start: usize,
    end: usize,
    group: &[SidedEdit],
    side: Side,
) -> Vec<String> {
    let mut lines = Vec::new();
    let mut cursor = start;
    for sided in group.iter().filter(|e| e.side == side) {
        lines.extend(base_lines[cursor..sided.edit.base_start].iter().map(|l| l.to_string()));
        lines.extend(sided.edit.lines.iter().cloned());
        cursor = sided.edit.base_end;
    }
    lines.extend(base_lines[cursor..end].iter().map(|l| l.to_string()));
    lines
}
