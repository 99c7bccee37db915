//! Filesystem store.
//!
//! Directory structure:
//! ```text
//! <root>/clones/<id>/
//! ├── record.json      # DurableRecord
//! └── files/           # Artifacts, by relative path
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::error::{StoreError, StoreResult};
use crate::store::DurableStore;
use crate::types::{validate_id, validate_path, DurableRecord, Page, StoredArtifact};

const RECORD_FILE: &str = "record.json";
const FILES_DIR: &str = "files";

/// Store keeping each clone in its own directory.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn clones_dir(&self) -> PathBuf {
        self.root.join("clones")
    }

    fn clone_dir(&self, id: &str) -> StoreResult<PathBuf> {
        validate_id(id)?;
        Ok(self.clones_dir().join(id))
    }

    fn artifact_path(&self, id: &str, path: &str) -> StoreResult<PathBuf> {
        validate_path(path)?;
        let mut full = self.clone_dir(id)?.join(FILES_DIR);
        for part in path.split('/') {
            full.push(part);
        }
        Ok(full)
    }

    async fn read_record(path: &Path, id: &str) -> StoreResult<Option<DurableRecord>> {
        match fs::read_to_string(path).await {
            Ok(content) => serde_json::from_str(&content)
                .map(Some)
                .map_err(|e| StoreError::Corrupt {
                    id: id.to_string(),
                    reason: e.to_string(),
                }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Write through a temporary sibling so readers never see a partial file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> StoreResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    fs::write(&tmp, bytes).await?;
    fs::rename(&tmp, path).await?;
    Ok(())
}

#[async_trait]
impl DurableStore for FsStore {
    async fn put_record(&self, record: &DurableRecord) -> StoreResult<()> {
        let path = self.clone_dir(&record.id)?.join(RECORD_FILE);
        let json = serde_json::to_vec_pretty(record)?;
        write_atomic(&path, &json).await?;
        debug!(id = %record.id, "Stored record");
        Ok(())
    }

    async fn get_record(&self, id: &str) -> StoreResult<Option<DurableRecord>> {
        let path = self.clone_dir(id)?.join(RECORD_FILE);
        Self::read_record(&path, id).await
    }

    async fn list_records(&self, page: usize, page_size: usize) -> StoreResult<Page<DurableRecord>> {
        let mut records = Vec::new();
        let mut entries = match fs::read_dir(self.clones_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Page::paginate(&records, page, page_size))
            }
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let id = entry.file_name().to_string_lossy().into_owned();
            match Self::read_record(&entry.path().join(RECORD_FILE), &id).await {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!("Skipping unreadable record {}: {}", id, e),
            }
        }

        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(Page::paginate(&records, page, page_size))
    }

    async fn put_artifact(&self, id: &str, path: &str, content: &str) -> StoreResult<()> {
        let full = self.artifact_path(id, path)?;
        write_atomic(&full, content.as_bytes()).await
    }

    async fn get_artifact(&self, id: &str, path: &str) -> StoreResult<Option<String>> {
        let full = self.artifact_path(id, path)?;
        match fs::read_to_string(&full).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list_artifacts(&self, id: &str) -> StoreResult<Vec<StoredArtifact>> {
        let files_dir = self.clone_dir(id)?.join(FILES_DIR);
        if !fs::try_exists(&files_dir).await? {
            return Ok(Vec::new());
        }

        let walked = tokio::task::spawn_blocking(move || -> StoreResult<Vec<StoredArtifact>> {
            let mut artifacts = Vec::new();
            for entry in WalkDir::new(&files_dir).min_depth(1).sort_by_file_name() {
                let entry = entry?;
                if !entry.file_type().is_file() {
                    continue;
                }
                let name = entry.file_name().to_string_lossy();
                if name.ends_with(".tmp") {
                    continue;
                }
                let relative = entry
                    .path()
                    .strip_prefix(&files_dir)
                    .map_err(|e| StoreError::InvalidPath(e.to_string()))?
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect::<Vec<_>>()
                    .join("/");
                let content = std::fs::read_to_string(entry.path())?;
                artifacts.push(StoredArtifact::new(relative, content));
            }
            Ok(artifacts)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        let mut artifacts = walked;
        artifacts.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(artifacts)
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let dir = self.clone_dir(id)?;
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
