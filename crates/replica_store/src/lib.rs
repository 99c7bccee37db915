//! # replica_store
//!
//! Durable records and artifact sets of finished clones.
//!
//! A clone is persisted once, when its pipeline succeeds. The record and the
//! artifacts are what the proxy needs to rebuild an environment later.

pub mod error;
pub mod fs;
pub mod memory;
pub mod store;
pub mod types;

pub use error::{StoreError, StoreResult};
pub use fs::FsStore;
pub use memory::MemoryStore;
pub use store::DurableStore;
pub use types::{validate_id, validate_path, DurableRecord, Page, StoredArtifact};
