// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Semantic regions of source files.
//!
//! A [`RegionProvider`] splits file content into named, line-ranged
//! constructs (functions, classes, import blocks, ...). The merge engine uses
//! regions to describe *where* two branches collide inside a file; the
//! default provider is [`TreeSitterRegionProvider`], which parses
//! TypeScript, JavaScript, Rust, Python and Go and falls back to line
//! patterns for anything else.

mod parser;

pub use parser::TreeSitterRegionProvider;

use serde::{Deserialize, Serialize};

/// Kind of construct a region covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Function,
    Method,
    Class,
    Interface,
    Struct,
    Enum,
    Trait,
    Impl,
    Module,
    TypeAlias,
    Constant,
    Variable,
    Macro,
    ImportBlock,
}

impl RegionKind {
    /// Convert to string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Interface => "interface",
            Self::Struct => "struct",
            Self::Enum => "enum",
            Self::Trait => "trait",
            Self::Impl => "impl",
            Self::Module => "module",
            Self::TypeAlias => "type_alias",
            Self::Constant => "constant",
            Self::Variable => "variable",
            Self::Macro => "macro",
            Self::ImportBlock => "import_block",
        }
    }
}

impl std::fmt::Display for RegionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named, line-ranged construct within a file.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CodeRegion {
    pub file_path: String,
    pub kind: RegionKind,
    pub name: String,
    /// First line (1-indexed, inclusive).
    pub start_line: usize,
    /// Last line (1-indexed, inclusive).
    pub end_line: usize,
    /// Names of other regions in the same file this one refers to, or the
    /// module sources for import blocks.
    pub dependencies: Vec<String>,
}

impl CodeRegion {
    /// Check whether this region covers any line in `start..=end`.
    pub fn intersects_lines(&self, start: usize, end: usize) -> bool {
        self.start_line <= end && start <= self.end_line
    }

    /// Number of lines covered.
    pub fn line_count(&self) -> usize {
        self.end_line + 1 - self.start_line
    }
}

/// Error type for region analysis setup.
#[derive(Debug, thiserror::Error)]
pub enum RegionError {
    #[error("Failed to load {language} grammar: {message}")]
    Grammar { language: String, message: String },
}

/// Parses files into semantic regions.
pub trait RegionProvider: Send + Sync {
    /// Split `content` into regions. Never fails; unparseable input yields
    /// whatever regions could be recognised (possibly none).
    fn analyze_file(&self, path: &str, content: &str) -> Vec<CodeRegion>;

    /// Whether two regions describe overlapping parts of the same file.
    fn regions_overlap(&self, a: &CodeRegion, b: &CodeRegion) -> bool {
        a.file_path == b.file_path && a.intersects_lines(b.start_line, b.end_line)
    }
}

/// Provider that never reports any regions.
///
/// Useful for plain-text files and for callers that only want line-level
/// conflict handling.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegions;

impl RegionProvider for NoRegions {
    fn analyze_file(&self, _path: &str, _content: &str) -> Vec<CodeRegion> {
        Vec::new()
    }
}
