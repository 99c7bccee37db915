//! Listing behaviour of the filesystem store.

use chrono::{Duration, Utc};
use replica_store::{DurableRecord, DurableStore, FsStore};
use tempfile::TempDir;

#[tokio::test]
async fn test_list_records_paginates_newest_first() {
    let dir = TempDir::new().unwrap();
    let store = FsStore::new(dir.path());

    for i in 0..5 {
        let mut record = DurableRecord::new(format!("clone-{}", i), "https://example.com", "/p");
        record.created_at = Utc::now() - Duration::minutes(10 - i);
        store.put_record(&record).await.unwrap();
    }

    let first = store.list_records(1, 2).await.unwrap();
    assert_eq!(first.total, 5);
    assert_eq!(first.pages, 3);
    let ids: Vec<&str> = first.items.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(ids, vec!["clone-4", "clone-3"]);

    let last = store.list_records(3, 2).await.unwrap();
    assert_eq!(last.items.len(), 1);
    assert_eq!(last.items[0].id, "clone-0");
}

#[tokio::test]
async fn test_empty_root_lists_nothing() {
    let dir = TempDir::new().unwrap();
    let store = FsStore::new(dir.path().join("never-created"));
    let page = store.list_records(1, 30).await.unwrap();
    assert!(page.items.is_empty());
    assert_eq!(page.pages, 0);
}
