//! In-memory store, for tests and ephemeral runs.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::error::StoreResult;
use crate::store::DurableStore;
use crate::types::{validate_id, validate_path, DurableRecord, Page, StoredArtifact};

#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, DurableRecord>>,
    artifacts: RwLock<HashMap<String, BTreeMap<String, String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put_record(&self, record: &DurableRecord) -> StoreResult<()> {
        validate_id(&record.id)?;
        self.records
            .write()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_record(&self, id: &str) -> StoreResult<Option<DurableRecord>> {
        Ok(self.records.read().get(id).cloned())
    }

    async fn list_records(&self, page: usize, page_size: usize) -> StoreResult<Page<DurableRecord>> {
        let mut records: Vec<DurableRecord> = self.records.read().values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(Page::paginate(&records, page, page_size))
    }

    async fn put_artifact(&self, id: &str, path: &str, content: &str) -> StoreResult<()> {
        validate_id(id)?;
        validate_path(path)?;
        self.artifacts
            .write()
            .entry(id.to_string())
            .or_default()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn get_artifact(&self, id: &str, path: &str) -> StoreResult<Option<String>> {
        Ok(self
            .artifacts
            .read()
            .get(id)
            .and_then(|files| files.get(path))
            .cloned())
    }

    async fn list_artifacts(&self, id: &str) -> StoreResult<Vec<StoredArtifact>> {
        Ok(self
            .artifacts
            .read()
            .get(id)
            .map(|files| {
                files
                    .iter()
                    .map(|(path, content)| StoredArtifact::new(path.clone(), content.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let had_record = self.records.write().remove(id).is_some();
        let had_files = self.artifacts.write().remove(id).is_some();
        Ok(had_record || had_files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_newest_first() {
        let store = MemoryStore::new();
        let mut old = DurableRecord::new("old", "https://a.dev", "/p");
        old.created_at = Utc::now() - Duration::hours(1);
        store.put_record(&old).await.unwrap();
        store
            .put_record(&DurableRecord::new("new", "https://b.dev", "/p"))
            .await
            .unwrap();

        let page = store.list_records(1, 10).await.unwrap();
        let ids: Vec<&str> = page.items.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["new", "old"]);
    }

    #[tokio::test]
    async fn test_artifacts_sorted_by_path() {
        let store = MemoryStore::new();
        store.put_artifact("c", "z.tsx", "z").await.unwrap();
        store.put_artifact("c", "a.tsx", "a").await.unwrap();
        let paths: Vec<String> = store
            .list_artifacts("c")
            .await
            .unwrap()
            .into_iter()
            .map(|a| a.path)
            .collect();
        assert_eq!(paths, vec!["a.tsx", "z.tsx"]);
    }
}
