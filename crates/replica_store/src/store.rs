//! Durable store trait.

use async_trait::async_trait;

use crate::error::StoreResult;
use crate::types::{DurableRecord, Page, StoredArtifact};

/// Persistence for finished clones.
///
/// Records and artifacts are keyed by the clone id allocated at admission.
#[async_trait]
pub trait DurableStore: Send + Sync {
    /// Insert or replace a record.
    async fn put_record(&self, record: &DurableRecord) -> StoreResult<()>;

    async fn get_record(&self, id: &str) -> StoreResult<Option<DurableRecord>>;

    /// Records ordered newest first.
    async fn list_records(&self, page: usize, page_size: usize) -> StoreResult<Page<DurableRecord>>;

    /// Insert or replace one artifact.
    async fn put_artifact(&self, id: &str, path: &str, content: &str) -> StoreResult<()>;

    async fn get_artifact(&self, id: &str, path: &str) -> StoreResult<Option<String>>;

    /// All artifacts of a clone, ordered by path.
    async fn list_artifacts(&self, id: &str) -> StoreResult<Vec<StoredArtifact>>;

    /// Remove a clone entirely. Returns whether it existed.
    async fn delete(&self, id: &str) -> StoreResult<bool>;
}
