// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Tree-sitter based region extraction.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::{Mutex, PoisonError};
#[cfg(feature = "telemetry")]
use std::time::Instant;

use once_cell::sync::Lazy;
use regex::Regex;
use tree_sitter::{Node, Parser};

#[cfg(feature = "telemetry")]
use crate::telemetry::GLOBAL_METRICS;

use super::{CodeRegion, RegionError, RegionKind, RegionProvider};

/// Languages with a tree-sitter grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Language {
    TypeScript,
    JavaScript,
    Rust,
    Python,
    Go,
}

impl Language {
    fn from_path(path: &str) -> Option<Self> {
        let ext = Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("");
        match ext.to_lowercase().as_str() {
            "ts" | "tsx" | "mts" | "cts" => Some(Self::TypeScript),
            "js" | "jsx" | "mjs" | "cjs" => Some(Self::JavaScript),
            "rs" => Some(Self::Rust),
            "py" | "pyi" => Some(Self::Python),
            "go" => Some(Self::Go),
            _ => None,
        }
    }
}

/// Line patterns for files without a grammar.
static FALLBACK_PATTERNS: Lazy<Vec<(Regex, RegionKind)>> = Lazy::new(|| {
    [
        (r"^(?:export\s+)?(?:async\s+)?function\s+(\w+)", RegionKind::Function),
        (r"^(?:export\s+)?class\s+(\w+)", RegionKind::Class),
        (r"^(?:pub\s+)?fn\s+(\w+)", RegionKind::Function),
        (r"^(?:pub\s+)?struct\s+(\w+)", RegionKind::Struct),
        (r"^def\s+(\w+)", RegionKind::Function),
        (r"^func\s+(\w+)", RegionKind::Function),
    ]
    .into_iter()
    .filter_map(|(pattern, kind)| Regex::new(pattern).ok().map(|re| (re, kind)))
    .collect()
});

static FALLBACK_IMPORT: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"^\s*(?:import|from|use|#include|require)\b").ok());

static IDENTIFIER: Lazy<Option<Regex>> = Lazy::new(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").ok());

/// A raw region before import coalescing and dependency resolution.
struct RawRegion {
    kind: RegionKind,
    name: String,
    start_line: usize,
    end_line: usize,
    /// Module source for imports.
    source: Option<String>,
}

/// [`RegionProvider`] backed by tree-sitter grammars.
pub struct TreeSitterRegionProvider {
    parsers: Mutex<HashMap<Language, Parser>>,
}

impl TreeSitterRegionProvider {
    /// Create a provider with all supported grammars loaded.
    pub fn new() -> Result<Self, RegionError> {
        let mut parsers = HashMap::new();

        let languages = [
            (Language::TypeScript, tree_sitter_typescript::LANGUAGE_TYPESCRIPT),
            (Language::JavaScript, tree_sitter_javascript::LANGUAGE),
            (Language::Rust, tree_sitter_rust::LANGUAGE),
            (Language::Python, tree_sitter_python::LANGUAGE),
            (Language::Go, tree_sitter_go::LANGUAGE),
        ];

        for (lang, grammar) in languages {
            let mut parser = Parser::new();
            parser
                .set_language(&grammar.into())
                .map_err(|e| RegionError::Grammar {
                    language: format!("{:?}", lang),
                    message: e.to_string(),
                })?;
            parsers.insert(lang, parser);
        }

        Ok(Self {
            parsers: Mutex::new(parsers),
        })
    }

    fn parse_regions(&self, lang: Language, content: &str) -> Option<Vec<RawRegion>> {
        let mut parsers = self.parsers.lock().unwrap_or_else(PoisonError::into_inner);
        let parser = parsers.get_mut(&lang)?;
        let tree = parser.parse(content, None)?;

        let source = content.as_bytes();
        let mut regions = Vec::new();
        walk_tree(&tree.root_node(), &mut |node| {
            let region = match lang {
                Language::TypeScript | Language::JavaScript => ts_region(node, source),
                Language::Rust => rust_region(node, source),
                Language::Python => python_region(node, source),
                Language::Go => go_region(node, source),
            };
            if let Some(region) = region {
                regions.push(region);
            }
        });
        Some(regions)
    }
}

impl RegionProvider for TreeSitterRegionProvider {
    fn analyze_file(&self, path: &str, content: &str) -> Vec<CodeRegion> {
        #[cfg(feature = "telemetry")]
        let start = Instant::now();

        let raw = match Language::from_path(path) {
            Some(lang) => self.parse_regions(lang, content).unwrap_or_else(|| {
                tracing::debug!(path, "Tree-sitter parse failed, using line patterns");
                fallback_regions(content)
            }),
            None => fallback_regions(content),
        };

        let regions = finalize(path, content, raw);

        #[cfg(feature = "telemetry")]
        GLOBAL_METRICS.record_operation("regions.analyze", start.elapsed());

        regions
    }
}

impl std::fmt::Debug for TreeSitterRegionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeSitterRegionProvider").finish_non_exhaustive()
    }
}

/// Merge adjacent imports into blocks and resolve intra-file dependencies.
fn finalize(path: &str, content: &str, raw: Vec<RawRegion>) -> Vec<CodeRegion> {
    let (imports, mut others): (Vec<_>, Vec<_>) = raw
        .into_iter()
        .partition(|r| r.kind == RegionKind::ImportBlock);

    let mut blocks: Vec<CodeRegion> = Vec::new();
    for import in imports {
        let source = import.source.unwrap_or(import.name);
        match blocks.last_mut() {
            // Imports separated by at most one blank line form one block.
            Some(block) if import.start_line <= block.end_line + 2 => {
                block.end_line = block.end_line.max(import.end_line);
                block.dependencies.push(source);
            }
            _ => blocks.push(CodeRegion {
                file_path: path.to_string(),
                kind: RegionKind::ImportBlock,
                name: "imports".to_string(),
                start_line: import.start_line,
                end_line: import.end_line,
                dependencies: vec![source],
            }),
        }
    }

    others.sort_by_key(|r| (r.start_line, std::cmp::Reverse(r.end_line)));
    let lines: Vec<&str> = content.lines().collect();
    let names: BTreeSet<String> = others.iter().map(|r| r.name.clone()).collect();

    let mut regions: Vec<CodeRegion> = others
        .into_iter()
        .map(|r| {
            let dependencies = referenced_names(&lines, r.start_line, r.end_line, &names, &r.name);
            CodeRegion {
                file_path: path.to_string(),
                kind: r.kind,
                name: r.name,
                start_line: r.start_line,
                end_line: r.end_line,
                dependencies,
            }
        })
        .collect();

    regions.extend(blocks);
    regions.sort_by_key(|r| (r.start_line, std::cmp::Reverse(r.end_line)));
    regions
}

fn referenced_names(
    lines: &[&str],
    start_line: usize,
    end_line: usize,
    names: &BTreeSet<String>,
    own: &str,
) -> Vec<String> {
    let Some(re) = IDENTIFIER.as_ref() else {
        return Vec::new();
    };
    let from = start_line.saturating_sub(1).min(lines.len());
    let to = end_line.min(lines.len());

    let mut found = BTreeSet::new();
    for line in &lines[from..to] {
        for m in re.find_iter(line) {
            let ident = m.as_str();
            if ident != own && names.contains(ident) {
                found.insert(ident.to_string());
            }
        }
    }
    found.into_iter().collect()
}

/// Regions for files without a grammar: each recognised header runs until
/// the next header, trailing blank lines excluded.
fn fallback_regions(content: &str) -> Vec<RawRegion> {
    let lines: Vec<&str> = content.lines().collect();
    let mut headers: Vec<(usize, RegionKind, String)> = Vec::new();
    let mut regions = Vec::new();

    for (idx, line) in lines.iter().enumerate() {
        let line_no = idx + 1;
        if FALLBACK_IMPORT.as_ref().is_some_and(|re| re.is_match(line)) {
            regions.push(RawRegion {
                kind: RegionKind::ImportBlock,
                name: line.trim().to_string(),
                start_line: line_no,
                end_line: line_no,
                source: None,
            });
            continue;
        }
        for (re, kind) in FALLBACK_PATTERNS.iter() {
            if let Some(name) = re.captures(line).and_then(|c| c.get(1)) {
                headers.push((line_no, *kind, name.as_str().to_string()));
                break;
            }
        }
    }

    for (i, (start, kind, name)) in headers.iter().enumerate() {
        let mut end = headers
            .get(i + 1)
            .map(|(next, _, _)| next - 1)
            .unwrap_or(lines.len());
        while end > *start && lines[end - 1].trim().is_empty() {
            end -= 1;
        }
        regions.push(RawRegion {
            kind: *kind,
            name: name.clone(),
            start_line: *start,
            end_line: end,
            source: None,
        });
    }

    regions
}

// Per-language node mapping

fn ts_region(node: &Node, source: &[u8]) -> Option<RawRegion> {
    let kind = match node.kind() {
        "function_declaration" | "generator_function_declaration" => RegionKind::Function,
        "method_definition" => RegionKind::Method,
        "class_declaration" | "abstract_class_declaration" => RegionKind::Class,
        "interface_declaration" => RegionKind::Interface,
        "type_alias_declaration" => RegionKind::TypeAlias,
        "enum_declaration" => RegionKind::Enum,
        "import_statement" => {
            let source_text = node
                .child_by_field_name("source")
                .map(|n| node_text(&n, source).trim_matches(|c| c == '"' || c == '\'').to_string());
            return Some(raw(node, RegionKind::ImportBlock, String::new(), source_text));
        }
        "lexical_declaration" | "variable_declaration" if is_top_level_ts(node) => {
            let declarator = (0..node.named_child_count())
                .filter_map(|i| node.named_child(i))
                .find(|c| c.kind() == "variable_declarator")?;
            let name = field_text(&declarator, "name", source)?;
            let is_const = node_text(node, source).starts_with("const");
            let kind = if is_const {
                RegionKind::Constant
            } else {
                RegionKind::Variable
            };
            return Some(raw(node, kind, name, None));
        }
        _ => return None,
    };
    let name = field_text(node, "name", source)?;
    Some(raw(node, kind, name, None))
}

fn is_top_level_ts(node: &Node) -> bool {
    match node.parent() {
        Some(parent) if parent.kind() == "program" => true,
        Some(parent) if parent.kind() == "export_statement" => parent
            .parent()
            .is_some_and(|p| p.kind() == "program"),
        _ => false,
    }
}

fn rust_region(node: &Node, source: &[u8]) -> Option<RawRegion> {
    let kind = match node.kind() {
        "function_item" => {
            let in_impl = node
                .parent()
                .and_then(|p| p.parent())
                .is_some_and(|gp| matches!(gp.kind(), "impl_item" | "trait_item"));
            if in_impl {
                RegionKind::Method
            } else {
                RegionKind::Function
            }
        }
        "struct_item" => RegionKind::Struct,
        "enum_item" => RegionKind::Enum,
        "trait_item" => RegionKind::Trait,
        "mod_item" => RegionKind::Module,
        "const_item" | "static_item" => RegionKind::Constant,
        "type_item" => RegionKind::TypeAlias,
        "macro_definition" => RegionKind::Macro,
        "impl_item" => {
            let name = field_text(node, "type", source)?;
            return Some(raw(node, RegionKind::Impl, name, None));
        }
        "use_declaration" => {
            let path = field_text(node, "argument", source);
            return Some(raw(node, RegionKind::ImportBlock, String::new(), path));
        }
        _ => return None,
    };
    let name = field_text(node, "name", source)?;
    Some(raw(node, kind, name, None))
}

fn python_region(node: &Node, source: &[u8]) -> Option<RawRegion> {
    match node.kind() {
        "function_definition" => {
            let in_class = node
                .parent()
                .and_then(|p| p.parent())
                .is_some_and(|gp| gp.kind() == "class_definition");
            let kind = if in_class {
                RegionKind::Method
            } else {
                RegionKind::Function
            };
            let name = field_text(node, "name", source)?;
            Some(raw(node, kind, name, None))
        }
        "class_definition" => {
            let name = field_text(node, "name", source)?;
            Some(raw(node, RegionKind::Class, name, None))
        }
        "import_statement" | "import_from_statement" => {
            let module = field_text(node, "module_name", source)
                .or_else(|| field_text(node, "name", source));
            Some(raw(node, RegionKind::ImportBlock, String::new(), module))
        }
        _ => None,
    }
}

fn go_region(node: &Node, source: &[u8]) -> Option<RawRegion> {
    match node.kind() {
        "function_declaration" => {
            let name = field_text(node, "name", source)?;
            Some(raw(node, RegionKind::Function, name, None))
        }
        "method_declaration" => {
            let name = field_text(node, "name", source)?;
            Some(raw(node, RegionKind::Method, name, None))
        }
        "type_spec" => {
            let name = field_text(node, "name", source)?;
            let kind = match node.child_by_field_name("type").map(|t| t.kind()) {
                Some("struct_type") => RegionKind::Struct,
                Some("interface_type") => RegionKind::Interface,
                _ => RegionKind::TypeAlias,
            };
            Some(raw(node, kind, name, None))
        }
        "const_spec" | "var_spec" => {
            let name = field_text(node, "name", source)?;
            let kind = if node.kind() == "const_spec" {
                RegionKind::Constant
            } else {
                RegionKind::Variable
            };
            Some(raw(node, kind, name, None))
        }
        "import_declaration" => {
            let specs = node_text(node, source)
                .trim_start_matches("import")
                .trim()
                .to_string();
            Some(raw(node, RegionKind::ImportBlock, String::new(), Some(specs)))
        }
        _ => None,
    }
}

// Helpers

fn raw(node: &Node, kind: RegionKind, name: String, source: Option<String>) -> RawRegion {
    RawRegion {
        kind,
        name,
        start_line: node.start_position().row + 1,
        end_line: node.end_position().row + 1,
        source,
    }
}

/// Walk the tree depth-first, calling the callback for each node.
fn walk_tree<F>(node: &Node, callback: &mut F)
where
    F: FnMut(&Node),
{
    callback(node);
    for i in 0..node.child_count() {
        if let Some(child) = node.child(i) {
            walk_tree(&child, callback);
        }
    }
}

fn node_text<'a>(node: &Node, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or("")
}

fn field_text(node: &Node, field: &str, source: &[u8]) -> Option<String> {
    node.child_by_field_name(field)
        .map(|n| node_text(&n, source).to_string())
        .filter(|s| !s.is_empty())
}
