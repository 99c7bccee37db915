//! Project scaffold uploaded into every new environment.
//!
//! A built-in Next.js + Tailwind skeleton is compiled into the binary. A
//! directory on disk can replace it wholesale.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::{SandboxError, SandboxResult};

/// A file relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectFile {
    pub path: String,
    pub content: String,
}

impl ProjectFile {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }
}

const BUILTIN: &[(&str, &str)] = &[
    ("package.json", include_str!("../templates/nextjs/package.json")),
    ("next.config.js", include_str!("../templates/nextjs/next.config.js")),
    ("tsconfig.json", include_str!("../templates/nextjs/tsconfig.json")),
    ("tailwind.config.js", include_str!("../templates/nextjs/tailwind.config.js")),
    ("postcss.config.js", include_str!("../templates/nextjs/postcss.config.js")),
    ("next-env.d.ts", include_str!("../templates/nextjs/next-env.d.ts")),
    ("app/globals.css", include_str!("../templates/nextjs/app/globals.css")),
    ("app/layout.tsx", include_str!("../templates/nextjs/app/layout.tsx")),
    ("app/page.tsx", include_str!("../templates/nextjs/app/page.tsx")),
];

/// The set of files every environment starts from.
#[derive(Debug, Clone, Default)]
pub struct Scaffold {
    files: Vec<ProjectFile>,
}

impl Scaffold {
    /// The built-in Next.js skeleton.
    pub fn builtin() -> Self {
        Self {
            files: BUILTIN
                .iter()
                .map(|(path, content)| ProjectFile::new(*path, *content))
                .collect(),
        }
    }

    /// Load every file under `dir`, skipping `node_modules` and `.next`.
    pub fn from_dir(dir: &Path) -> SandboxResult<Self> {
        if !dir.is_dir() {
            return Err(SandboxError::Template(format!(
                "{} is not a directory",
                dir.display()
            )));
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(dir)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| {
                let name = e.file_name().to_string_lossy();
                name != "node_modules" && name != ".next"
            });

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(dir)
                .map_err(|e| SandboxError::Template(e.to_string()))?;
            let path = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");

            match std::fs::read_to_string(entry.path()) {
                Ok(content) => files.push(ProjectFile::new(path, content)),
                Err(e) => warn!("Failed to read template file {}: {}", path, e),
            }
        }

        info!("Loaded {} template files from {}", files.len(), dir.display());
        Ok(Self { files })
    }

    /// Built-in scaffold unless `dir` is given.
    pub fn resolve(dir: Option<&Path>) -> SandboxResult<Self> {
        match dir {
            Some(dir) => Self::from_dir(dir),
            None => Ok(Self::builtin()),
        }
    }

    pub fn files(&self) -> &[ProjectFile] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Scaffold files overlaid with `extra`; `extra` wins on equal paths.
    pub fn merged_with(&self, extra: &[ProjectFile]) -> Vec<ProjectFile> {
        let mut merged: Vec<ProjectFile> = self
            .files
            .iter()
            .filter(|f| !extra.iter().any(|e| e.path == f.path))
            .cloned()
            .collect();
        debug!(
            "Overlaying {} files on {} scaffold files",
            extra.len(),
            merged.len()
        );
        merged.extend(extra.iter().cloned());
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_builtin_has_entry_points() {
        let scaffold = Scaffold::builtin();
        let paths: Vec<&str> = scaffold.files().iter().map(|f| f.path.as_str()).collect();
        assert!(paths.contains(&"package.json"));
        assert!(paths.contains(&"app/layout.tsx"));
        assert!(paths.contains(&"app/page.tsx"));
        assert!(scaffold
            .files()
            .iter()
            .any(|f| f.path == "tsconfig.json" && f.content.contains("\"@/*\"")));
    }

    #[test]
    fn test_from_dir_skips_node_modules() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("app")).unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/react")).unwrap();
        std::fs::write(dir.path().join("package.json"), "{}").unwrap();
        std::fs::write(dir.path().join("app/page.tsx"), "x").unwrap();
        std::fs::write(dir.path().join("node_modules/react/index.js"), "y").unwrap();

        let scaffold = Scaffold::from_dir(dir.path()).unwrap();
        let paths: Vec<&str> = scaffold.files().iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["app/page.tsx", "package.json"]);
    }

    #[test]
    fn test_from_missing_dir_fails() {
        let dir = TempDir::new().unwrap();
        assert!(Scaffold::from_dir(&dir.path().join("nope")).is_err());
    }

    #[test]
    fn test_merge_overrides_placeholder_page() {
        let merged = Scaffold::builtin().merged_with(&[ProjectFile::new("app/page.tsx", "real")]);
        let pages: Vec<_> = merged.iter().filter(|f| f.path == "app/page.tsx").collect();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].content, "real");
    }
}
