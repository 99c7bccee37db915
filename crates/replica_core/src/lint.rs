//! Import and directive fix-ups for generated React files.
//!
//! Generated components routinely use `useState` without importing it or
//! render a sibling component they never import. The linter scans each file
//! for identifiers from a symbol table, adds the missing imports and the
//! `"use client"` directive when the file needs client rendering. It never
//! imports a name the file declares or already imports.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;

use crate::parse::strip_fences;
use crate::stitch::import_specifier;

const REACT_HOOKS: &[&str] = &[
    "useState",
    "useEffect",
    "useRef",
    "useMemo",
    "useCallback",
    "useContext",
    "useReducer",
    "useLayoutEffect",
    "useId",
    "useTransition",
];

/// How a symbol is imported.
#[derive(Debug, Clone, PartialEq, Eq)]
enum ImportKind {
    Default,
    Named,
}

/// Where a known symbol comes from and how it shows up in code.
#[derive(Debug, Clone)]
struct SymbolEntry {
    module: String,
    kind: ImportKind,
    /// Usage pattern
    usage: Regex,
    client_only: bool,
}

/// Known symbols for one lint pass.
#[derive(Debug, Clone)]
pub struct SymbolTable {
    entries: BTreeMap<String, SymbolEntry>,
}

fn jsx_usage(name: &str) -> Option<Regex> {
    Regex::new(&format!(r"<{}[\s/>]", regex::escape(name))).ok()
}

fn call_usage(name: &str) -> Option<Regex> {
    Regex::new(&format!(r"\b{}\s*[(<]", regex::escape(name))).ok()
}

impl SymbolTable {
    /// React hooks plus `next/image` and `next/link`.
    pub fn standard() -> Self {
        let mut entries = BTreeMap::new();
        for hook in REACT_HOOKS {
            if let Some(usage) = call_usage(hook) {
                entries.insert(
                    hook.to_string(),
                    SymbolEntry {
                        module: "react".to_string(),
                        kind: ImportKind::Named,
                        usage,
                        client_only: true,
                    },
                );
            }
        }
        for (name, module) in [("Image", "next/image"), ("Link", "next/link")] {
            if let Some(usage) = jsx_usage(name) {
                entries.insert(
                    name.to_string(),
                    SymbolEntry {
                        module: module.to_string(),
                        kind: ImportKind::Default,
                        usage,
                        client_only: false,
                    },
                );
            }
        }
        Self { entries }
    }

    /// Register the components behind `paths`, each imported from its own
    /// `@/` specifier. Non-component paths are ignored; the first path wins
    /// when two share a name.
    pub fn with_component_paths<I, S>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for path in paths {
            let path = path.as_ref();
            let (Some(name), Some(module)) = (component_stem(path), import_specifier(path)) else {
                continue;
            };
            if !is_component_name(name) || self.entries.contains_key(name) {
                continue;
            }
            if let Some(usage) = jsx_usage(name) {
                self.entries.insert(
                    name.to_string(),
                    SymbolEntry {
                        module,
                        kind: ImportKind::Default,
                        usage,
                        client_only: false,
                    },
                );
            }
        }
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }
}

fn is_component_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_uppercase())
        && chars.all(|c| c.is_ascii_alphanumeric())
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?m)^import\s+(?:type\s+)?(?:([A-Za-z_$][\w$]*)\s*,?\s*)?(?:\{([^}]*)\})?\s*(?:from\s+)?["']([^"']+)["'];?[ \t]*$"#,
        )
        .expect("import pattern is valid")
    })
}

fn declaration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(?:function|const|let|var|class|interface|type|enum)\s+([A-Za-z_$][\w$]*)")
            .expect("declaration pattern is valid")
    })
}

fn handler_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bon(?:Click|Change|Submit|Input|KeyDown|KeyUp|MouseEnter|MouseLeave|Focus|Blur|Scroll)\s*=\s*\{")
            .expect("handler pattern is valid")
    })
}

/// One `import` statement of the file.
#[derive(Debug, Clone)]
struct ImportLine {
    start: usize,
    end: usize,
    default: Option<String>,
    named: Vec<String>,
    module: String,
}

fn parse_imports(source: &str) -> Vec<ImportLine> {
    import_re()
        .captures_iter(source)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let named = caps
                .get(2)
                .map(|m| {
                    m.as_str()
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            Some(ImportLine {
                start: whole.start(),
                end: whole.end(),
                default: caps.get(1).map(|m| m.as_str().to_string()),
                named,
                module: caps.get(3)?.as_str().to_string(),
            })
        })
        .collect()
}

/// Local name bound by a named import entry (`a as b` binds `b`).
fn bound_name(entry: &str) -> &str {
    entry.rsplit(" as ").next().unwrap_or(entry).trim()
}

fn render_import(default: Option<&str>, named: &[String], module: &str) -> String {
    match (default, named.is_empty()) {
        (Some(d), true) => format!("import {} from \"{}\";", d, module),
        (Some(d), false) => format!("import {}, {{ {} }} from \"{}\";", d, named.join(", "), module),
        (None, false) => format!("import {{ {} }} from \"{}\";", named.join(", "), module),
        (None, true) => format!("import \"{}\";", module),
    }
}

fn has_use_client(source: &str) -> bool {
    source
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with("//"))
        .map(|l| l.starts_with("\"use client\"") || l.starts_with("'use client'"))
        .unwrap_or(false)
}

fn is_script(path: &str) -> bool {
    [".tsx", ".jsx", ".ts", ".js"]
        .iter()
        .any(|ext| path.ends_with(ext))
}

/// Component name a path defines, if it is a component file.
pub fn component_stem(path: &str) -> Option<&str> {
    let file = path.rsplit('/').next()?;
    let stem = file
        .strip_suffix(".tsx")
        .or_else(|| file.strip_suffix(".jsx"))?;
    Some(stem)
}

/// Lint one file. Non-script files are only stripped of fences.
pub fn lint_file(path: &str, source: &str, table: &SymbolTable) -> String {
    let source = strip_fences(source);
    if !is_script(path) || source.is_empty() {
        return source;
    }

    let imports = parse_imports(&source);
    let mut bound: BTreeSet<String> = BTreeSet::new();
    for import in &imports {
        if let Some(d) = &import.default {
            bound.insert(d.clone());
        }
        for entry in &import.named {
            bound.insert(bound_name(entry).to_string());
        }
    }
    for caps in declaration_re().captures_iter(&source) {
        bound.insert(caps[1].to_string());
    }
    if let Some(stem) = component_stem(path) {
        bound.insert(stem.to_string());
    }

    // Scan the body only, so import lines never count as usage
    let body_start = imports.iter().map(|i| i.end).max().unwrap_or(0);
    let body = &source[body_start..];

    let mut missing: BTreeMap<String, (Option<String>, Vec<String>)> = BTreeMap::new();
    let mut needs_client = handler_re().is_match(body);
    for (name, entry) in &table.entries {
        if !entry.usage.is_match(body) {
            continue;
        }
        if entry.client_only {
            needs_client = true;
        }
        if bound.contains(name) {
            continue;
        }
        let slot = missing.entry(entry.module.clone()).or_default();
        match entry.kind {
            ImportKind::Default => slot.0 = Some(name.clone()),
            ImportKind::Named => slot.1.push(name.clone()),
        }
    }

    let mut output = source.clone();
    let mut added = Vec::new();

    // Merge into existing statements back to front so offsets stay valid
    let mut merges: Vec<(ImportLine, (Option<String>, Vec<String>))> = Vec::new();
    for (module, wanted) in std::mem::take(&mut missing) {
        match imports.iter().find(|i| i.module == module) {
            Some(existing) if existing.default.is_none() || wanted.0.is_none() => {
                merges.push((existing.clone(), wanted));
            }
            _ => added.push(render_import(wanted.0.as_deref(), &wanted.1, &module)),
        }
    }
    merges.sort_by(|a, b| b.0.start.cmp(&a.0.start));
    for (existing, (default, named)) in merges {
        let mut all_named = existing.named.clone();
        all_named.extend(named);
        let default = existing.default.clone().or(default);
        let line = render_import(default.as_deref(), &all_named, &existing.module);
        output.replace_range(existing.start..existing.end, &line);
    }

    if !added.is_empty() {
        let insert_at = insertion_point(&output);
        let mut block = added.join("\n");
        block.push('\n');
        output.insert_str(insert_at, &block);
    }

    if needs_client && !has_use_client(&output) {
        output.insert_str(0, "\"use client\";\n\n");
    }
    output
}

/// Offset after a leading directive and any existing imports.
fn insertion_point(source: &str) -> usize {
    let last_import = parse_imports(source).iter().map(|i| i.end).max();
    if let Some(end) = last_import {
        return source[end..].find('\n').map(|i| end + i + 1).unwrap_or(source.len());
    }
    let mut offset = 0;
    for line in source.split_inclusive('\n') {
        let trimmed = line.trim();
        if trimmed.starts_with("\"use client\"") || trimmed.starts_with("'use client'") {
            offset += line.len();
            continue;
        }
        break;
    }
    offset
}
