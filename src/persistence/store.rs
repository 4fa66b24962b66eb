//! SQLite-based snapshot store

use crate::persistence::{Snapshot, SnapshotStore, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

/// SQLite snapshot store, one row per pipeline name
pub struct SqliteSnapshotStore {
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    /// Open (or create) the database at `db_path`
    pub async fn new(db_path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options).await?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Private in-memory database
    pub async fn in_memory() -> Result<Self, StoreError> {
        // every connection to :memory: is a separate database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.init().await?;

        Ok(store)
    }

    /// Create store with default path
    pub async fn with_default_path() -> Result<Self, StoreError> {
        let db_path = Self::default_path();
        if let Some(db_dir) = db_path.parent() {
            std::fs::create_dir_all(db_dir).map_err(|source| StoreError::Io {
                path: db_dir.to_path_buf(),
                source,
            })?;
        }
        Self::new(&db_path).await
    }

    pub fn default_path() -> PathBuf {
        dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("steppipe")
            .join("snapshots.db")
    }

    async fn init(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS snapshots (
                pipeline_name TEXT PRIMARY KEY,
                id TEXT NOT NULL,
                saved_at TEXT NOT NULL,
                snapshot TEXT NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Names of every stored pipeline
    pub async fn list_pipelines(&self) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT pipeline_name FROM snapshots ORDER BY pipeline_name ASC")
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(|row| row.get("pipeline_name")).collect())
    }
}

#[async_trait::async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn save(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO snapshots (pipeline_name, id, saved_at, snapshot)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(&snapshot.name)
        .bind(snapshot.id.to_string())
        .bind(snapshot.saved_at.to_rfc3339())
        .bind(snapshot.to_json()?)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<Snapshot>, StoreError> {
        let row = sqlx::query("SELECT snapshot FROM snapshots WHERE pipeline_name = ?1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Snapshot::from_json(&row.get::<String, _>("snapshot"))?)),
            None => Ok(None),
        }
    }
}
