//! Stored record types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// What is kept about a finished clone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DurableRecord {
    pub id: String,
    /// Page the clone was made from
    pub url: String,
    /// Where the clone can be viewed, relative to this service
    pub preview_url: String,
    pub created_at: DateTime<Utc>,
    /// Number of stored artifacts
    #[serde(default)]
    pub file_count: usize,
    /// Extra npm packages the generated code needs
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
}

impl DurableRecord {
    pub fn new(id: impl Into<String>, url: impl Into<String>, preview_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            preview_url: preview_url.into(),
            created_at: Utc::now(),
            file_count: 0,
            dependencies: Vec::new(),
        }
    }

    pub fn with_file_count(mut self, count: usize) -> Self {
        self.file_count = count;
        self
    }

    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }
}

/// A stored source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredArtifact {
    pub path: String,
    pub content: String,
}

impl StoredArtifact {
    pub fn new(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
        }
    }

    pub fn lines(&self) -> usize {
        self.content.matches('\n').count() + 1
    }
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: usize,
    /// 1-based page number
    pub page: usize,
    pub pages: usize,
}

impl<T: Clone> Page<T> {
    /// Slice `all` (already ordered) into page `page` of `page_size`.
    pub fn paginate(all: &[T], page: usize, page_size: usize) -> Self {
        let page = page.max(1);
        let total = all.len();
        let pages = if page_size == 0 {
            0
        } else {
            total.div_ceil(page_size)
        };
        let start = (page - 1).saturating_mul(page_size);
        let items = if page_size == 0 || start >= total {
            Vec::new()
        } else {
            all[start..(start + page_size).min(total)].to_vec()
        };
        Self {
            items,
            total,
            page,
            pages,
        }
    }
}

/// Ids become directory names, so only a conservative alphabet is allowed.
pub fn validate_id(id: &str) -> StoreResult<()> {
    let ok = !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidId(id.to_string()))
    }
}

/// Relative, forward-slash, `..`-free paths only.
pub fn validate_path(path: &str) -> StoreResult<()> {
    let ok = !path.is_empty()
        && !path.starts_with('/')
        && !path.contains('\\')
        && path
            .split('/')
            .all(|part| !part.is_empty() && part != "." && part != "..");
    if ok {
        Ok(())
    } else {
        Err(StoreError::InvalidPath(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paginate() {
        let all: Vec<u32> = (1..=7).collect();
        let page = Page::paginate(&all, 2, 3);
        assert_eq!(page.items, vec![4, 5, 6]);
        assert_eq!(page.total, 7);
        assert_eq!(page.pages, 3);

        let last = Page::paginate(&all, 3, 3);
        assert_eq!(last.items, vec![7]);

        let past = Page::paginate(&all, 9, 3);
        assert!(past.items.is_empty());
        assert_eq!(past.page, 9);
    }

    #[test]
    fn test_paginate_empty() {
        let page = Page::<u32>::paginate(&[], 1, 30);
        assert_eq!(page.total, 0);
        assert_eq!(page.pages, 0);
    }

    #[test]
    fn test_validation() {
        assert!(validate_id("4b3f6a8e-0c1d-4f5e-9a7b-2c3d4e5f6a7b").is_ok());
        assert!(validate_id("../x").is_err());
        assert!(validate_path("components/Hero.tsx").is_ok());
        assert!(validate_path("components/../../x").is_err());
        assert!(validate_path("/etc/passwd").is_err());
    }

    #[test]
    fn test_line_count() {
        assert_eq!(StoredArtifact::new("a", "x\ny\n").lines(), 3);
    }
}
