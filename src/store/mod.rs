//! Recording Store (spec §4.8, ambient persistence): owns the SQLite pool
//! and migrations; `RecordingRepository`/`JobRepository` do the actual
//! reads and writes.

pub mod models;
pub mod repository;

pub use repository::{JobRepository, RecordingRepository};

use std::path::Path;

use sqlx::{migrate::MigrateDatabase, Sqlite, SqlitePool};

use crate::error::StoreError;

pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    pub async fn new(db_path: &str) -> Result<Self, StoreError> {
        if let Some(parent_dir) = Path::new(db_path).parent() {
            if !parent_dir.as_os_str().is_empty() && !parent_dir.exists() {
                std::fs::create_dir_all(parent_dir).map_err(|e| StoreError::Backend(e.to_string()))?;
            }
        }

        if !Sqlite::database_exists(db_path).await.unwrap_or(false) {
            Sqlite::create_database(db_path).await.map_err(StoreError::from)?;
        }

        let pool = SqlitePool::connect(db_path).await.map_err(StoreError::from)?;
        sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| StoreError::Backend(e.to_string()))?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
