//! JSON file snapshot store

use crate::persistence::{Snapshot, SnapshotStore, StoreError};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Stores one pipeline snapshot as a JSON file.
///
/// Writes go to a sibling temp file that is renamed over the target, so a
/// crash mid-write leaves the previous snapshot intact.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait::async_trait]
impl SnapshotStore for JsonFileStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let contents = snapshot.to_json()?;
        write_atomic(&self.path, &contents).await?;
        debug!("Saved snapshot of '{}' to {}", snapshot.name, self.path.display());
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<Snapshot>, StoreError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source,
                })
            }
        };
        let snapshot = Snapshot::from_json(&contents)?;
        if snapshot.name != name {
            warn!(
                "Snapshot at {} belongs to pipeline '{}', not '{}'",
                self.path.display(),
                snapshot.name,
                name
            );
        }
        Ok(Some(snapshot))
    }
}

async fn write_atomic(path: &Path, contents: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_err(parent))?;
    }
    let tmp_path = path.with_extension("json.tmp");
    tokio::fs::write(&tmp_path, contents)
        .await
        .map_err(io_err(&tmp_path))?;
    tokio::fs::rename(&tmp_path, path).await.map_err(io_err(path))?;
    Ok(())
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError {
    let path = path.to_path_buf();
    move |source| StoreError::Io { path, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("state/pipe.json"));
        assert!(store.load("pipe").await.unwrap().is_none());

        let snapshot = Snapshot {
            id: Uuid::new_v4(),
            name: "pipe".to_string(),
            root: dir.path().to_path_buf(),
            steps: Vec::new(),
            saved_at: Utc::now(),
        };
        store.save(&snapshot).await.unwrap();

        assert!(store.path().exists());
        assert!(!store.path().with_extension("json.tmp").exists());
        let loaded = store.load("pipe").await.unwrap().unwrap();
        assert_eq!(loaded.id, snapshot.id);
    }

    #[tokio::test]
    async fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipe.json");
        std::fs::write(&path, "{ not json").unwrap();
        let store = JsonFileStore::new(path);
        assert!(matches!(store.load("pipe").await, Err(StoreError::Encode(_))));
    }
}
