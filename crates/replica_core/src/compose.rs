//! Assembling `app/page.tsx` from the stitched components.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;

use regex::Regex;
use replica_llm::{GenerationService, UsageTracker};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::capture::Capture;
use crate::config::GenerationConfig;
use crate::error::{CoreError, CoreResult};
use crate::lint::{lint_file, SymbolTable};
use crate::parse::parse_files;
use crate::prompts::compose_request;
use crate::stitch::{import_specifier, Stitched, COMPOSITION_PATH};
use crate::worker::Artifact;

/// The composed page and how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Composition {
    pub artifact: Artifact,
    /// Built locally rather than by the model
    pub fallback: bool,
}

/// Why a model composition was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositionIssue {
    UnknownImport(String),
    Missing(String),
    Duplicate(String),
}

impl std::fmt::Display for CompositionIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompositionIssue::UnknownImport(s) => write!(f, "imports unknown module {}", s),
            CompositionIssue::Missing(s) => write!(f, "never imports {}", s),
            CompositionIssue::Duplicate(s) => write!(f, "imports {} more than once", s),
        }
    }
}

fn import_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?m)^\s*import\s+(?:[^;'"]*?\s+from\s+)?["']([^"']+)["']"#)
            .expect("import pattern is valid")
    })
}

/// Top-level project directories a bare specifier may point into.
const LOCAL_ROOTS: &[&str] = &["app", "components", "lib", "hooks", "utils"];

/// Resolve a local import of the composition to its `@/` form. Package
/// imports and stylesheets yield `None`.
fn local_specifier(raw: &str) -> Option<String> {
    if raw.ends_with(".css") {
        return None;
    }
    let path = if let Some(rest) = raw.strip_prefix("@/") {
        rest.to_string()
    } else if raw.starts_with('.') {
        let dir = COMPOSITION_PATH.rsplit_once('/').map(|(d, _)| d).unwrap_or("");
        let mut parts: Vec<&str> = dir.split('/').filter(|p| !p.is_empty()).collect();
        for segment in raw.split('/') {
            match segment {
                "." | "" => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        parts.join("/")
    } else if let Some(rest) = raw.strip_prefix('/') {
        rest.to_string()
    } else if LOCAL_ROOTS.iter().any(|root| raw.split('/').next() == Some(*root)) {
        raw.to_string()
    } else {
        return None;
    };

    let path = [".tsx", ".jsx", ".ts", ".js"]
        .iter()
        .find_map(|ext| path.strip_suffix(ext))
        .unwrap_or(&path);
    Some(format!("@/{}", path))
}

/// Check that `source` imports every component in `specifiers` exactly once
/// and no other local module.
pub fn validate_composition(source: &str, specifiers: &[String]) -> Result<(), Vec<CompositionIssue>> {
    let expected: BTreeSet<&str> = specifiers.iter().map(String::as_str).collect();
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();
    for caps in import_re().captures_iter(source) {
        if let Some(spec) = local_specifier(&caps[1]) {
            *seen.entry(spec).or_default() += 1;
        }
    }

    let mut issues = Vec::new();
    for (spec, count) in &seen {
        if !expected.contains(spec.as_str()) {
            issues.push(CompositionIssue::UnknownImport(spec.clone()));
        } else if *count > 1 {
            issues.push(CompositionIssue::Duplicate(spec.clone()));
        }
    }
    for spec in &expected {
        if !seen.contains_key(*spec) {
            issues.push(CompositionIssue::Missing(spec.to_string()));
        }
    }
    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

fn identifier_for(specifier: &str) -> String {
    let stem = specifier.rsplit('/').next().unwrap_or(specifier);
    let mut ident: String = stem.chars().filter(|c| c.is_ascii_alphanumeric() || *c == '_').collect();
    if !ident.starts_with(|c: char| c.is_ascii_alphabetic()) {
        ident.insert_str(0, "Section");
    }
    let mut chars = ident.chars();
    match chars.next() {
        Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
        None => "Section".to_string(),
    }
}

/// Deterministic page importing each specifier once, in order.
pub fn fallback_composition(specifiers: &[String]) -> CoreResult<String> {
    if specifiers.is_empty() {
        return Err(CoreError::NothingToCompose);
    }

    let mut used: BTreeSet<String> = BTreeSet::new();
    let mut entries = Vec::with_capacity(specifiers.len());
    for spec in specifiers {
        let base = identifier_for(spec);
        let mut ident = base.clone();
        let mut n = 2;
        while used.contains(&ident) || ident == "Home" {
            ident = format!("{}{}", base, n);
            n += 1;
        }
        used.insert(ident.clone());
        entries.push((ident, spec));
    }

    let mut page = String::new();
    for (ident, spec) in &entries {
        page.push_str(&format!("import {} from \"{}\";\n", ident, spec));
    }
    page.push_str("\nexport default function Home() {\n  return (\n    <main className=\"min-h-screen\">\n");
    for (ident, _) in &entries {
        page.push_str(&format!("      <{} />\n", ident));
    }
    page.push_str("    </main>\n  );\n}\n");
    Ok(page)
}

/// Component import specifiers in page order.
pub fn component_specifiers(stitched: &Stitched) -> Vec<String> {
    stitched
        .components()
        .filter_map(|a| import_specifier(&a.path))
        .collect()
}

/// Build the composition, asking the model first when enabled and falling
/// back to the local page on any failure. Errors only for an empty set.
pub async fn assemble(
    service: &dyn GenerationService,
    stitched: &Stitched,
    capture: &Capture,
    config: &GenerationConfig,
    usage: &UsageTracker,
) -> CoreResult<Composition> {
    let specifiers = component_specifiers(stitched);
    if specifiers.is_empty() {
        return Err(CoreError::NothingToCompose);
    }

    if config.compose_enabled {
        match compose_with_model(service, stitched, capture, config, usage, &specifiers).await {
            Ok(content) => {
                info!("Composed page from {} components", specifiers.len());
                return Ok(Composition {
                    artifact: Artifact::new(COMPOSITION_PATH, content, 0),
                    fallback: false,
                });
            }
            Err(reason) => warn!("Falling back to local composition: {}", reason),
        }
    }

    let content = fallback_composition(&specifiers)?;
    Ok(Composition {
        artifact: Artifact::new(COMPOSITION_PATH, content, 0),
        fallback: true,
    })
}

async fn compose_with_model(
    service: &dyn GenerationService,
    stitched: &Stitched,
    capture: &Capture,
    config: &GenerationConfig,
    usage: &UsageTracker,
    specifiers: &[String],
) -> Result<String, String> {
    let request = compose_request(capture, &stitched.manifest, config.compose_sample, config.max_output_tokens);
    let generation = service.generate(&request).await.map_err(|e| e.to_string())?;
    usage.record_generation("compose", &generation);
    if generation.truncated {
        return Err("reply was truncated".to_string());
    }

    let parsed = parse_files(&generation.content);
    let page = parsed
        .files
        .into_iter()
        .find(|f| f.path == COMPOSITION_PATH)
        .ok_or_else(|| format!("reply has no {}", COMPOSITION_PATH))?;

    let table = SymbolTable::standard().with_component_paths(stitched.paths());
    let content = lint_file(COMPOSITION_PATH, &page.content, &table);

    validate_composition(&content, specifiers).map_err(|issues| {
        issues
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    })?;
    Ok(content)
}
