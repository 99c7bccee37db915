//! Optional ownership planning before dispatch.
//!
//! One cheap call looks at a few samples of the page and names the
//! components each worker should build. The plan is advisory: any failure
//! yields an empty assignment and the workers pick their own names.

use std::collections::BTreeMap;

use replica_llm::{strip_code_fences, GenerationService, UsageTracker};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::capture::Capture;
use crate::prompts::planner_request;

/// Component names per worker, by 0-based worker index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipPlan {
    pub assignments: Vec<Vec<String>>,
}

impl OwnershipPlan {
    pub fn empty(workers: usize) -> Self {
        Self {
            assignments: vec![Vec::new(); workers],
        }
    }

    /// Names planned for worker `index`.
    pub fn for_worker(&self, index: usize) -> &[String] {
        self.assignments
            .get(index)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.iter().all(Vec::is_empty)
    }

    /// Every planned name, in worker order.
    pub fn all_names(&self) -> Vec<String> {
        self.assignments.iter().flatten().cloned().collect()
    }
}

/// `"hero section"`, `"hero-section"`, `"heroSection"` -> `"HeroSection"`.
/// Returns `None` when nothing usable is left.
pub fn to_pascal_case(raw: &str) -> Option<String> {
    let mut out = String::new();
    for word in raw.split(|c: char| !c.is_ascii_alphanumeric()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.push(first.to_ascii_uppercase());
            out.extend(chars);
        }
    }
    let trimmed = out.trim_start_matches(|c: char| c.is_ascii_digit()).to_string();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

fn names_from(value: &Value) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    if let Value::Array(items) = value {
        for item in items {
            if let Some(name) = item.as_str().and_then(to_pascal_case) {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
    }
    names
}

/// Parse a planner reply into exactly `workers` assignments.
///
/// Accepts an object keyed by 1-based worker number or an array of arrays,
/// optionally wrapped in prose or a code fence. Names are normalised to
/// PascalCase and a name is kept only for its first worker.
pub fn parse_plan(text: &str, workers: usize) -> Option<OwnershipPlan> {
    let cleaned = strip_code_fences(text);
    let start = cleaned.find(['{', '['])?;
    let end = cleaned.rfind(['}', ']'])?;
    if end < start {
        return None;
    }
    let value: Value = serde_json::from_str(&cleaned[start..=end]).ok()?;

    let mut assignments = vec![Vec::new(); workers];
    match &value {
        Value::Object(map) => {
            let mut keyed: BTreeMap<usize, &Value> = BTreeMap::new();
            for (key, names) in map {
                let number: usize = key.trim().trim_start_matches(|c: char| !c.is_ascii_digit()).parse().ok()?;
                keyed.insert(number, names);
            }
            for (number, names) in keyed {
                if number >= 1 && number <= workers {
                    assignments[number - 1] = names_from(names);
                }
            }
        }
        Value::Array(rows) => {
            for (index, names) in rows.iter().enumerate().take(workers) {
                assignments[index] = names_from(names);
            }
        }
        _ => return None,
    }

    let mut seen: Vec<String> = Vec::new();
    for names in assignments.iter_mut() {
        names.retain(|name| {
            if seen.contains(name) {
                false
            } else {
                seen.push(name.clone());
                true
            }
        });
    }
    Some(OwnershipPlan { assignments })
}

/// Ask for an ownership plan. Never fails.
pub async fn plan(
    service: &dyn GenerationService,
    capture: &Capture,
    workers: usize,
    sample: usize,
    usage: &UsageTracker,
) -> OwnershipPlan {
    if workers == 0 {
        return OwnershipPlan::default();
    }
    let request = planner_request(capture, workers, sample);
    match service.generate(&request).await {
        Ok(generation) => {
            usage.record_generation("planner", &generation);
            match parse_plan(&generation.content, workers) {
                Some(plan) => {
                    info!("Planned {} components across {} workers", plan.all_names().len(), workers);
                    plan
                }
                None => {
                    warn!("Planner reply was not a usable plan");
                    debug!("Planner reply: {}", generation.content);
                    OwnershipPlan::empty(workers)
                }
            }
        }
        Err(e) => {
            warn!("Planner call failed: {}", e);
            OwnershipPlan::empty(workers)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::Snapshot;
    use replica_llm::{MockReply, ScriptedGenerator};

    #[test]
    fn test_pascal_case() {
        assert_eq!(to_pascal_case("hero section").as_deref(), Some("HeroSection"));
        assert_eq!(to_pascal_case("pricing-table").as_deref(), Some("PricingTable"));
        assert_eq!(to_pascal_case("navBar").as_deref(), Some("NavBar"));
        assert_eq!(to_pascal_case("3 columns").as_deref(), Some("Columns"));
        assert_eq!(to_pascal_case("--"), None);
    }

    #[test]
    fn test_parse_object_form() {
        let plan = parse_plan(
            "Sure!\n```json\n{\"1\": [\"navbar\", \"Hero\"], \"2\": [\"features grid\"], \"9\": [\"Ignored\"]}\n```",
            3,
        )
        .unwrap();
        assert_eq!(plan.assignments[0], vec!["Navbar", "Hero"]);
        assert_eq!(plan.assignments[1], vec!["FeaturesGrid"]);
        assert!(plan.assignments[2].is_empty());
    }

    #[test]
    fn test_parse_array_form_dedups_across_workers() {
        let plan = parse_plan(r#"[["Hero", "Stats"], ["Stats", "Footer"]]"#, 2).unwrap();
        assert_eq!(plan.assignments[0], vec!["Hero", "Stats"]);
        assert_eq!(plan.assignments[1], vec!["Footer"]);
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_plan("no plan today", 2).is_none());
        assert!(parse_plan("\"just a string\"", 2).is_none());
    }

    #[tokio::test]
    async fn test_failed_call_yields_empty_plan() {
        let service = ScriptedGenerator::new().on_label("planner", MockReply::fail("503"));
        let capture = Capture::new("https://a.dev", vec![Snapshot::new("x", 0)]);
        let usage = UsageTracker::new();

        let plan = plan(&service, &capture, 3, 4, &usage).await;
        assert_eq!(plan, OwnershipPlan::empty(3));
        assert_eq!(usage.summary().calls, 0);
    }
}
