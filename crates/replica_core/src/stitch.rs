//! Merging worker outputs into one artifact set.
//!
//! Overlapping slices mean neighbouring workers sometimes build the same
//! file. A colliding path is resolved from its name and the contributing
//! worker indices alone: navigation keeps the topmost copy, everything else
//! the bottommost.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::lint::component_stem;
use crate::worker::{Artifact, WorkerOutput};

/// Reserved path of the composed page.
pub const COMPOSITION_PATH: &str = "app/page.tsx";

const NAVIGATION_WORDS: &[&str] = &["nav", "navbar", "navigation", "header", "topbar", "menu"];
const FOOTER_WORDS: &[&str] = &["footer", "bottom"];

/// Which copy of a colliding path survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Preference {
    Lowest,
    Highest,
}

/// Preference for a path by its file name.
pub fn preference(path: &str) -> Preference {
    let file = path.rsplit('/').next().unwrap_or(path);
    let stem = file.split('.').next().unwrap_or(file).to_ascii_lowercase();
    if FOOTER_WORDS.iter().any(|w| stem.contains(w)) {
        return Preference::Highest;
    }
    if NAVIGATION_WORDS.iter().any(|w| stem.contains(w)) {
        return Preference::Lowest;
    }
    Preference::Highest
}

/// Winning worker among `indices` for `path`.
pub fn choose(path: &str, indices: &[usize]) -> Option<usize> {
    match preference(path) {
        Preference::Lowest => indices.iter().copied().min(),
        Preference::Highest => indices.iter().copied().max(),
    }
}

/// Under `components/` with a `.tsx` or `.jsx` extension.
pub fn is_component_path(path: &str) -> bool {
    path.starts_with("components/") && component_stem(path).is_some()
}

/// `components/ui/Button.tsx` -> `@/components/ui/Button`.
pub fn import_specifier(path: &str) -> Option<String> {
    if !is_component_path(path) {
        return None;
    }
    let without_ext = path.rsplit_once('.').map(|(p, _)| p).unwrap_or(path);
    Some(format!("@/{}", without_ext))
}

/// The merged set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stitched {
    /// Ordered by owning worker, then emission order
    pub artifacts: Vec<Artifact>,
    /// Surviving component names per worker
    pub manifest: Vec<Vec<String>>,
    /// Path to owning worker
    pub provenance: BTreeMap<String, usize>,
    /// Union of declared packages, sorted
    pub dependencies: Vec<String>,
    /// Paths that more than one worker produced
    pub collisions: Vec<String>,
}

impl Stitched {
    pub fn is_empty(&self) -> bool {
        self.artifacts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.artifacts.len()
    }

    /// Component artifacts in page order.
    pub fn components(&self) -> impl Iterator<Item = &Artifact> {
        self.artifacts.iter().filter(|a| is_component_path(&a.path))
    }

    pub fn get(&self, path: &str) -> Option<&Artifact> {
        self.artifacts.iter().find(|a| a.path == path)
    }

    /// Replace the content of an existing path, or append the artifact.
    pub fn upsert(&mut self, artifact: Artifact) {
        match self.artifacts.iter_mut().find(|a| a.path == artifact.path) {
            Some(existing) => existing.content = artifact.content,
            None => {
                self.provenance.insert(artifact.path.clone(), artifact.worker);
                self.artifacts.push(artifact);
            }
        }
    }

    pub fn paths(&self) -> Vec<String> {
        self.artifacts.iter().map(|a| a.path.clone()).collect()
    }
}

/// Merge worker outputs. The result does not depend on the order of
/// `outputs`.
pub fn stitch(outputs: &[WorkerOutput]) -> Stitched {
    let workers = outputs.iter().map(|o| o.index + 1).max().unwrap_or(0);

    // path -> worker -> (emission position, artifact)
    let mut by_path: BTreeMap<&str, BTreeMap<usize, (usize, &Artifact)>> = BTreeMap::new();
    let mut dependencies: BTreeSet<String> = BTreeSet::new();

    for output in outputs {
        dependencies.extend(output.dependencies.iter().cloned());
        for (position, artifact) in output.artifacts.iter().enumerate() {
            if artifact.path == COMPOSITION_PATH {
                debug!("Dropping {} from worker {}", COMPOSITION_PATH, output.index + 1);
                continue;
            }
            by_path
                .entry(artifact.path.as_str())
                .or_default()
                .insert(output.index, (position, artifact));
        }
    }

    let mut winners: Vec<(usize, usize, &Artifact)> = Vec::with_capacity(by_path.len());
    let mut collisions = Vec::new();
    for (path, producers) in &by_path {
        let indices: Vec<usize> = producers.keys().copied().collect();
        let Some(worker) = choose(path, &indices) else {
            continue;
        };
        if indices.len() > 1 {
            debug!("{} produced by workers {:?}, keeping {}", path, indices, worker + 1);
            collisions.push(path.to_string());
        }
        if let Some((position, artifact)) = producers.get(&worker) {
            winners.push((worker, *position, *artifact));
        }
    }
    winners.sort_by_key(|(worker, position, _)| (*worker, *position));

    let mut stitched = Stitched {
        manifest: vec![Vec::new(); workers],
        dependencies: dependencies.into_iter().collect(),
        collisions,
        ..Default::default()
    };
    for (worker, _, artifact) in winners {
        if is_component_path(&artifact.path) {
            if let Some(stem) = component_stem(&artifact.path) {
                stitched.manifest[worker].push(stem.to_string());
            }
        }
        stitched.provenance.insert(artifact.path.clone(), worker);
        stitched.artifacts.push(Artifact::new(artifact.path.clone(), artifact.content.clone(), worker));
    }

    info!(
        "Stitched {} files from {} workers ({} collisions)",
        stitched.artifacts.len(),
        workers,
        stitched.collisions.len()
    );
    stitched
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(index: usize, paths: &[&str]) -> WorkerOutput {
        WorkerOutput {
            index,
            artifacts: paths
                .iter()
                .map(|p| Artifact::new(*p, format!("// {} from {}\n", p, index), index))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_preference_vocabulary() {
        assert_eq!(preference("components/Navbar.tsx"), Preference::Lowest);
        assert_eq!(preference("components/SiteHeader.tsx"), Preference::Lowest);
        assert_eq!(preference("components/MobileMenu.tsx"), Preference::Lowest);
        assert_eq!(preference("components/Footer.tsx"), Preference::Highest);
        assert_eq!(preference("components/BottomBar.tsx"), Preference::Highest);
        assert_eq!(preference("components/Pricing.tsx"), Preference::Highest);
    }

    #[test]
    fn test_footer_from_two_workers_keeps_highest() {
        let outputs = vec![
            output(0, &["components/Navbar.tsx", "components/Hero.tsx"]),
            output(1, &["components/Footer.tsx", "components/Features.tsx"]),
            output(2, &["components/Navbar.tsx"]),
            output(3, &["components/Testimonials.tsx", "components/Footer.tsx"]),
        ];
        let stitched = stitch(&outputs);

        assert_eq!(stitched.provenance["components/Footer.tsx"], 3);
        assert_eq!(stitched.provenance["components/Navbar.tsx"], 0);
        assert!(stitched.get("components/Footer.tsx").unwrap().content.contains("from 3"));
        assert_eq!(
            stitched.paths(),
            vec![
                "components/Navbar.tsx",
                "components/Hero.tsx",
                "components/Features.tsx",
                "components/Testimonials.tsx",
                "components/Footer.tsx",
            ]
        );
        assert_eq!(stitched.manifest[2], Vec::<String>::new());
        assert_eq!(stitched.manifest[3], vec!["Testimonials", "Footer"]);
        assert_eq!(stitched.collisions.len(), 2);
    }

    #[test]
    fn test_independent_of_arrival_order() {
        let a = output(0, &["components/Header.tsx", "components/Stats.tsx"]);
        let b = output(1, &["components/Stats.tsx", "components/Header.tsx", "lib/utils.ts"]);
        let forward = stitch(&[a.clone(), b.clone()]);
        let backward = stitch(&[b, a]);
        assert_eq!(forward, backward);
        assert_eq!(forward.provenance["components/Stats.tsx"], 1);
        assert_eq!(forward.provenance["components/Header.tsx"], 0);
    }

    #[test]
    fn test_composition_path_is_discarded() {
        let stitched = stitch(&[output(0, &["app/page.tsx", "components/Hero.tsx"])]);
        assert_eq!(stitched.paths(), vec!["components/Hero.tsx"]);
    }

    #[test]
    fn test_dependencies_are_merged_and_sorted() {
        let mut first = output(0, &["components/A.tsx"]);
        first.dependencies = vec!["framer-motion".into(), "clsx".into()];
        let mut second = output(1, &["components/B.tsx"]);
        second.dependencies = vec!["clsx".into()];
        let stitched = stitch(&[first, second]);
        assert_eq!(stitched.dependencies, vec!["clsx", "framer-motion"]);
    }

    #[test]
    fn test_import_specifier() {
        assert_eq!(import_specifier("components/Hero.tsx").as_deref(), Some("@/components/Hero"));
        assert_eq!(
            import_specifier("components/ui/Button.jsx").as_deref(),
            Some("@/components/ui/Button")
        );
        assert_eq!(import_specifier("lib/utils.ts"), None);
    }

    #[test]
    fn test_upsert_replaces_content() {
        let mut stitched = stitch(&[output(0, &["components/Hero.tsx"])]);
        stitched.upsert(Artifact::new("components/Hero.tsx", "fixed\n", 0));
        assert_eq!(stitched.len(), 1);
        assert_eq!(stitched.get("components/Hero.tsx").unwrap().content, "fixed\n");
    }
}
