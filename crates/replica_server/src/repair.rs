//! Bounded auto-repair of a served clone.
//!
//! Each round probes the application root. A clean page ends the loop; an
//! application error is traced to one known file through path references in
//! the error page and the runtime log, that file is rewritten by the repair
//! service and re-uploaded. Anything unexpected stops the loop quietly.

use std::sync::OnceLock;

use regex::Regex;
use replica_core::parse::strip_fences;
use replica_core::{Artifact, Stitched};
use replica_llm::RepairService;
use replica_sandbox::EnvironmentManager;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::RepairConfig;

/// Text that marks a development server error page or log entry.
pub const ERROR_MARKERS: &[&str] = &[
    "Failed to compile",
    "Module not found",
    "Unhandled Runtime Error",
    "Build Error",
    "SyntaxError",
    "ReferenceError",
    "TypeError",
];

const ERROR_EXCERPT: usize = 4_000;

/// Result of probing the application root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Clean,
    /// Application error with the text that revealed it
    AppError(String),
    /// The runtime could not be reached at all
    Unreachable(String),
}

/// Classify a response from the application root.
pub fn classify(status: u16, body: &str) -> Probe {
    if status == 500 || ERROR_MARKERS.iter().any(|m| body.contains(m)) {
        Probe::AppError(body.to_string())
    } else {
        Probe::Clean
    }
}

/// `GET <base_url>/`.
pub async fn probe(client: &reqwest::Client, base_url: &str) -> Probe {
    let url = format!("{}/", base_url.trim_end_matches('/'));
    match client.get(&url).send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            match response.text().await {
                Ok(body) => classify(status, &body),
                Err(e) => Probe::Unreachable(e.to_string()),
            }
        }
        Err(e) => Probe::Unreachable(e.to_string()),
    }
}

fn dotted_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\./((?:[\w@\[\]()-]+/)*[\w@\[\]().-]+\.(?:tsx|jsx|ts|js|mjs|css))")
            .expect("dotted path pattern is valid")
    })
}

fn rooted_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:^|[^\w./-])/?((?:[\w@\[\]()-]+/)+[\w@\[\]().-]+\.(?:tsx|jsx|ts|js|mjs|css))")
            .expect("rooted path pattern is valid")
    })
}

/// File references in error text, first occurrence first.
pub fn extract_path_hints(text: &str) -> Vec<String> {
    let mut hints: Vec<(usize, String)> = Vec::new();
    for re in [dotted_path_re(), rooted_path_re()] {
        for caps in re.captures_iter(text) {
            if let Some(m) = caps.get(1) {
                hints.push((m.start(), m.as_str().to_string()));
            }
        }
    }
    hints.sort_by_key(|(pos, _)| *pos);
    let mut out: Vec<String> = Vec::new();
    for (_, hint) in hints {
        if !out.contains(&hint) {
            out.push(hint);
        }
    }
    out
}

/// Resolve a hint to a known path: exact match first, then by suffix on a
/// path boundary.
pub fn match_path(hint: &str, known: &[String]) -> Option<String> {
    let hint = hint.trim_start_matches("./").trim_start_matches('/');
    if let Some(exact) = known.iter().find(|k| k.as_str() == hint) {
        return Some(exact.clone());
    }
    known
        .iter()
        .find(|k| {
            hint.ends_with(&format!("/{}", k)) || k.ends_with(&format!("/{}", hint))
        })
        .cloned()
}

/// One attempted fix.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairRound {
    pub round: u32,
    pub path: String,
    pub error: String,
    pub fixed: bool,
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStop {
    Clean,
    Unreachable,
    NoMatchingFile,
    RepairFailed,
    UploadFailed,
    Exhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RepairOutcome {
    pub rounds: Vec<RepairRound>,
    pub stop: RepairStop,
}

impl RepairOutcome {
    pub fn fixed_paths(&self) -> Vec<&str> {
        self.rounds
            .iter()
            .filter(|r| r.fixed)
            .map(|r| r.path.as_str())
            .collect()
    }
}

fn excerpt(text: &str) -> String {
    let lines: Vec<&str> = text
        .lines()
        .filter(|l| !l.trim().is_empty())
        .collect();
    let joined = lines.join("\n");
    if joined.len() <= ERROR_EXCERPT {
        return joined;
    }
    let mut cut = ERROR_EXCERPT;
    while !joined.is_char_boundary(cut) {
        cut -= 1;
    }
    joined[..cut].to_string()
}

/// Run at most `config.rounds` rounds against the serving environment of
/// `session`. Fixed files are written back into `artifacts`.
#[allow(clippy::too_many_arguments)]
pub async fn run_repair_loop<F>(
    environments: &EnvironmentManager,
    session: &str,
    base_url: &str,
    artifacts: &mut Stitched,
    service: &dyn RepairService,
    client: &reqwest::Client,
    config: &RepairConfig,
    on_round: F,
) -> RepairOutcome
where
    F: Fn(&RepairRound),
{
    let mut rounds = Vec::new();

    for round in 1..=config.rounds {
        let error = match probe(client, base_url).await {
            Probe::Clean => {
                info!(session, round, "Clone renders cleanly");
                return RepairOutcome {
                    rounds,
                    stop: RepairStop::Clean,
                };
            }
            Probe::Unreachable(reason) => {
                warn!(session, "Runtime unreachable during repair: {}", reason);
                return RepairOutcome {
                    rounds,
                    stop: RepairStop::Unreachable,
                };
            }
            Probe::AppError(text) => text,
        };

        let log = environments
            .logs(session, config.log_lines)
            .await
            .unwrap_or_default();
        let known = artifacts.paths();
        let target = extract_path_hints(&error)
            .into_iter()
            .chain(extract_path_hints(&log))
            .find_map(|hint| match_path(&hint, &known));
        let Some(path) = target else {
            info!(session, round, "Application error does not point at a generated file");
            debug!(session, "Error text:\n{}", excerpt(&error));
            return RepairOutcome {
                rounds,
                stop: RepairStop::NoMatchingFile,
            };
        };

        let content = artifacts
            .get(&path)
            .map(|a| a.content.clone())
            .unwrap_or_default();
        let report = excerpt(&format!("{}\n{}", error, log));
        info!(session, round, path = %path, "Repairing");

        let fixed = match service.repair(&path, &content, &report).await {
            Ok(fixed) => strip_fences(&fixed),
            Err(e) => {
                warn!(session, path = %path, "Repair call failed: {}", e);
                let record = RepairRound {
                    round,
                    path,
                    error: excerpt(&error),
                    fixed: false,
                };
                on_round(&record);
                rounds.push(record);
                return RepairOutcome {
                    rounds,
                    stop: RepairStop::RepairFailed,
                };
            }
        };
        if fixed.trim().is_empty() {
            warn!(session, path = %path, "Repair returned nothing");
            return RepairOutcome {
                rounds,
                stop: RepairStop::RepairFailed,
            };
        }

        let owner = artifacts.provenance.get(&path).copied().unwrap_or(0);
        artifacts.upsert(Artifact::new(path.clone(), fixed.clone(), owner));
        if let Err(e) = environments.upload(session, &path, &fixed).await {
            warn!(session, path = %path, "Uploading repair failed: {}", e);
            return RepairOutcome {
                rounds,
                stop: RepairStop::UploadFailed,
            };
        }

        let record = RepairRound {
            round,
            path,
            error: excerpt(&error),
            fixed: true,
        };
        on_round(&record);
        rounds.push(record);
        tokio::time::sleep(config.settle()).await;
    }

    RepairOutcome {
        rounds,
        stop: RepairStop::Exhausted,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(classify(200, "<html>ok</html>"), Probe::Clean);
        assert!(matches!(classify(500, ""), Probe::AppError(_)));
        assert!(matches!(
            classify(200, "<h1>Failed to compile</h1>"),
            Probe::AppError(_)
        ));
        assert_eq!(classify(404, "not here"), Probe::Clean);
    }

    #[test]
    fn test_extract_path_hints() {
        let text = "Failed to compile\n./components/Hero.tsx:12:5\nModule not found in ./components/Hero.tsx\nat /home/node/project/app/page.tsx (line 3)";
        assert_eq!(
            extract_path_hints(text),
            vec!["components/Hero.tsx", "home/node/project/app/page.tsx"]
        );
    }

    #[test]
    fn test_match_path() {
        let known = vec!["app/page.tsx".to_string(), "components/Hero.tsx".to_string()];
        assert_eq!(match_path("./components/Hero.tsx", &known).as_deref(), Some("components/Hero.tsx"));
        assert_eq!(
            match_path("home/node/project/app/page.tsx", &known).as_deref(),
            Some("app/page.tsx")
        );
        assert_eq!(match_path("Hero.tsx", &known).as_deref(), Some("components/Hero.tsx"));
        assert_eq!(match_path("lib/x.ts", &known), None);
        assert_eq!(match_path("Xpage.tsx", &known), None);
    }

    #[test]
    fn test_excerpt_is_bounded() {
        let long = "x".repeat(10_000);
        assert_eq!(excerpt(&long).len(), ERROR_EXCERPT);
        assert_eq!(excerpt("a\n\n\nb"), "a\nb");
    }
}
