//! Persistence layer for pipeline snapshots
//!
//! A snapshot is the whole pipeline: every step in order, with its substeps
//! and run-state. It is rewritten wholesale after each mutation.

pub mod file;

#[cfg(feature = "sqlite")]
pub mod store;

pub use file::JsonFileStore;

#[cfg(feature = "sqlite")]
pub use store::SqliteSnapshotStore;

use crate::core::Step;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use thiserror::Error;
use uuid::Uuid;

/// Errors from a snapshot backend
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access snapshot at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] serde_json::Error),

    #[cfg(feature = "sqlite")]
    #[error("snapshot database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Full persisted state of a pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: Uuid,
    pub name: String,
    pub root: PathBuf,
    /// Steps in pipeline order
    pub steps: Vec<Step>,
    pub saved_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn to_json(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, StoreError> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Trait for snapshot backends
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Replace the stored snapshot for `snapshot.name`
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError>;

    /// Load the snapshot of the named pipeline, if one was saved
    async fn load(&self, name: &str) -> Result<Option<Snapshot>, StoreError>;
}

/// In-memory store (for testing or ephemeral runs)
#[derive(Default)]
pub struct InMemoryStore {
    snapshots: tokio::sync::RwLock<HashMap<String, Snapshot>>,
    saves: AtomicUsize,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `save` has been called
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl SnapshotStore for InMemoryStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(snapshot.name.clone(), snapshot.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<Snapshot>, StoreError> {
        let snapshots = self.snapshots.read().await;
        Ok(snapshots.get(name).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(name: &str) -> Snapshot {
        Snapshot {
            id: Uuid::new_v4(),
            name: name.to_string(),
            root: PathBuf::from("."),
            steps: Vec::new(),
            saved_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_in_memory_store_keeps_latest_snapshot() {
        let store = InMemoryStore::new();
        assert!(store.load("p").await.unwrap().is_none());

        let first = snapshot("p");
        let second = Snapshot { id: Uuid::new_v4(), ..first.clone() };
        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let loaded = store.load("p").await.unwrap().unwrap();
        assert_eq!(loaded.id, second.id);
        assert_eq!(store.save_count(), 2);
        assert!(store.load("other").await.unwrap().is_none());
    }
}
