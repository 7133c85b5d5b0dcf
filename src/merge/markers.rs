// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Locating and stripping conflict blocks in merged content.

use crate::diff::line_ending;
use crate::types::ConflictMarker;

use super::three_way::{MARKER_OURS, MARKER_SEPARATOR, MARKER_THEIRS};

/// Which side of each conflict block to keep when stripping markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepSide {
    Ours,
    Theirs,
    /// Ours followed by theirs.
    Both,
}

fn is_delimiter(line: &str, marker: &str) -> bool {
    match line.strip_prefix(marker) {
        Some(rest) => rest.is_empty() || rest.starts_with(' '),
        None => false,
    }
}

enum State {
    Outside,
    Ours { start: usize },
    Theirs { start: usize, separator: usize, ambiguous: bool },
}

/// Complete blocks found in a scan, split by whether the separator is known.
#[derive(Default)]
struct Scan {
    markers: Vec<ConflictMarker>,
    ambiguous: usize,
}

fn scan(content: &str) -> Scan {
    let mut found = Scan::default();
    let mut state = State::Outside;

    for (idx, line) in content.lines().enumerate() {
        let line_no = idx + 1;
        state = match state {
            State::Outside if is_delimiter(line, MARKER_OURS) => State::Ours { start: line_no },
            State::Ours { .. } if is_delimiter(line, MARKER_OURS) => State::Ours { start: line_no },
            State::Ours { start } if line == MARKER_SEPARATOR => State::Theirs {
                start,
                separator: line_no,
                ambiguous: false,
            },
            // A second separator line: either side may hold a literal `=======`.
            State::Theirs { start, separator, .. } if line == MARKER_SEPARATOR => State::Theirs {
                start,
                separator,
                ambiguous: true,
            },
            State::Theirs { ambiguous: true, .. } if is_delimiter(line, MARKER_THEIRS) => {
                found.ambiguous += 1;
                State::Outside
            }
            State::Theirs { start, separator, .. } if is_delimiter(line, MARKER_THEIRS) => {
                found.markers.push(ConflictMarker {
                    start_line: start,
                    end_line: line_no,
                    ours_start: start + 1,
                    ours_end: separator - 1,
                    separator_line: separator,
                    theirs_start: separator + 1,
                    theirs_end: line_no - 1,
                });
                State::Outside
            }
            other => other,
        };
    }

    found
}

/// Find every complete conflict block in `content`.
///
/// Line numbers are 1-indexed. Unterminated blocks are ignored, as are
/// blocks with more than one `=======` line: a side that itself contains
/// such a line makes the split point undecidable. [`has_conflict_markers`]
/// still reports those blocks.
pub fn find_conflict_markers(content: &str) -> Vec<ConflictMarker> {
    scan(content).markers
}

/// Whether `content` still contains at least one complete conflict block.
pub fn has_conflict_markers(content: &str) -> bool {
    let found = scan(content);
    !found.markers.is_empty() || found.ambiguous > 0
}

/// Replace every conflict block with the chosen side.
///
/// Blocks skipped by [`find_conflict_markers`] are left untouched. The
/// content's line terminator is preserved.
pub fn strip_conflict_markers(content: &str, keep: KeepSide) -> String {
    let markers = find_conflict_markers(content);
    if markers.is_empty() {
        return content.to_string();
    }

    let lines: Vec<&str> = content.lines().collect();
    let mut out: Vec<&str> = Vec::with_capacity(lines.len());
    let mut next = 0usize;

    for marker in &markers {
        // Convert to zero-indexed slices.
        out.extend(&lines[next..marker.start_line - 1]);
        let ours = &lines[marker.ours_start - 1..marker.ours_end];
        let theirs = &lines[marker.theirs_start - 1..marker.theirs_end];
        match keep {
            KeepSide::Ours => out.extend(ours),
            KeepSide::Theirs => out.extend(theirs),
            KeepSide::Both => {
                out.extend(ours);
                out.extend(theirs);
            }
        }
        next = marker.end_line;
    }
    out.extend(&lines[next..]);

    let eol = line_ending(content);
    let mut result = out.join(eol);
    if content.ends_with('\n') && !out.is_empty() {
        result.push_str(eol);
    }
    result
}
