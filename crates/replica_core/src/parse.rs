//! Parsing model output into files.
//!
//! ```text
//! === FILE: components/Hero.tsx ===
//! export default function Hero() { ... }
//! === DEPENDENCIES: framer-motion, clsx ===
//! ```

use serde::{Deserialize, Serialize};
use tracing::warn;

const FILE_PREFIX: &str = "=== FILE:";
const DEPS_PREFIX: &str = "=== DEPENDENCIES:";
const MARKER_SUFFIX: &str = "===";

/// A file block pulled out of a response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedFile {
    pub path: String,
    pub content: String,
}

/// Everything recognised in one response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    pub files: Vec<ParsedFile>,
    pub dependencies: Vec<String>,
    /// Paths that were rejected
    pub rejected: Vec<String>,
}

fn marker_value<'a>(line: &'a str, prefix: &str) -> Option<&'a str> {
    let rest = line.trim().strip_prefix(prefix)?;
    let value = rest.trim().strip_suffix(MARKER_SUFFIX).unwrap_or(rest);
    Some(value.trim())
}

/// Relative, forward-slash, `..`-free.
pub fn is_safe_path(path: &str) -> bool {
    !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && !path.contains(':')
        && path
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..")
}

/// Drop surrounding markdown fences and stray fence lines from a block.
pub fn strip_fences(content: &str) -> String {
    let kept: Vec<&str> = content
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect();
    let joined = kept.join("\n");
    let trimmed = joined.trim_matches('\n');
    if trimmed.trim().is_empty() {
        String::new()
    } else {
        format!("{}\n", trimmed.trim_end())
    }
}

/// Split a response into files and declared dependencies.
///
/// Text before the first marker is ignored. A later block for the same path
/// replaces the earlier one.
pub fn parse_files(text: &str) -> ParsedOutput {
    let mut output = ParsedOutput::default();
    let mut current: Option<(String, Vec<&str>)> = None;

    fn flush(current: &mut Option<(String, Vec<&str>)>, output: &mut ParsedOutput) {
        if let Some((path, lines)) = current.take() {
            let content = strip_fences(&lines.join("\n"));
            if content.is_empty() {
                return;
            }
            output.files.retain(|f| f.path != path);
            output.files.push(ParsedFile { path, content });
        }
    }

    for line in text.lines() {
        if let Some(raw) = marker_value(line, FILE_PREFIX) {
            flush(&mut current, &mut output);
            let path = raw.trim_start_matches("./").to_string();
            if is_safe_path(&path) {
                current = Some((path, Vec::new()));
            } else {
                warn!("Rejected unsafe path {:?}", raw);
                output.rejected.push(raw.to_string());
            }
        } else if let Some(raw) = marker_value(line, DEPS_PREFIX) {
            flush(&mut current, &mut output);
            for dep in raw.split(',').map(str::trim).filter(|d| !d.is_empty()) {
                if !output.dependencies.iter().any(|d| d == dep) {
                    output.dependencies.push(dep.to_string());
                }
            }
        } else if let Some((_, lines)) = current.as_mut() {
            lines.push(line);
        }
    }
    flush(&mut current, &mut output);
    output
}

/// Join a truncated response with its continuation, trimming whatever the
/// continuation repeats from the end of the prior text.
pub fn merge_continuation(prior: &str, continuation: &str) -> String {
    let max = prior.len().min(continuation.len());
    let mut overlap = 0;
    for len in (1..=max).rev() {
        if !continuation.is_char_boundary(len) || !prior.is_char_boundary(prior.len() - len) {
            continue;
        }
        if prior.ends_with(&continuation[..len]) {
            // Single characters coincide too easily
            if len >= 8 || len == continuation.len() {
                overlap = len;
            }
            break;
        }
    }
    let mut merged = String::with_capacity(prior.len() + continuation.len());
    merged.push_str(prior);
    merged.push_str(&continuation[overlap..]);
    merged
}
