//! Record store for location bookmarks.
//!
//! SQLite is the durable store. Opening a store runs the schema migration
//! exactly once per version bump, before the handle is handed out.

mod repository;
mod store;

pub use repository::*;
pub use store::*;

use std::path::Path;
use std::time::Duration;

use chrono::Utc;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqlitePoolOptions};

use crate::errors::StoreError;

/// Connection settings for a record store.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// How long a connection waits on a locked database before giving up
    pub busy_timeout: Duration,
    pub max_connections: u32,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_secs(5),
            max_connections: 5,
        }
    }
}

/// Open (creating if absent) the store `name` inside `data_dir` at schema `version`.
pub async fn open_store(
    data_dir: &Path,
    name: &str,
    version: i64,
    options: &StoreOptions,
) -> Result<RecordStore, StoreError> {
    if version < 1 {
        return Err(StoreError::StorageUnavailable(format!(
            "invalid schema version {}",
            version
        )));
    }

    tokio::fs::create_dir_all(data_dir).await.map_err(|e| {
        StoreError::StorageUnavailable(format!("cannot create {}: {}", data_dir.display(), e))
    })?;

    let db_path = data_dir.join(format!("{}.sqlite", name));
    let connect_options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
        .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
        .busy_timeout(options.busy_timeout);

    let pool = SqlitePoolOptions::new()
        .max_connections(options.max_connections)
        .connect_with(connect_options)
        .await
        .map_err(StoreError::open)?;

    migrate(&pool, name, version).await?;

    tracing::info!(store = name, version, path = ?db_path, "Record store opened");
    Ok(RecordStore::new(pool))
}

/// Bring the schema to `target`, holding the write lock for the whole check-and-upgrade.
async fn migrate(pool: &sqlx::SqlitePool, name: &str, target: i64) -> Result<(), StoreError> {
    let mut conn = pool.acquire().await.map_err(StoreError::open)?;

    sqlx::query("BEGIN IMMEDIATE")
        .execute(&mut *conn)
        .await
        .map_err(StoreError::open)?;

    match migrate_locked(&mut conn, name, target).await {
        Ok(()) => {
            sqlx::query("COMMIT")
                .execute(&mut *conn)
                .await
                .map_err(StoreError::open)?;
            Ok(())
        }
        Err(err) => {
            if let Err(rollback) = sqlx::query("ROLLBACK").execute(&mut *conn).await {
                tracing::warn!("Rollback after failed migration failed: {}", rollback);
            }
            Err(err)
        }
    }
}

async fn migrate_locked(
    conn: &mut SqliteConnection,
    name: &str,
    target: i64,
) -> Result<(), StoreError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS meta (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            store_name TEXT NOT NULL,
            schema_version INTEGER NOT NULL DEFAULT 0,
            migrated_at TEXT
        );
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(StoreError::open)?;

    sqlx::query("INSERT OR IGNORE INTO meta (id, store_name, schema_version) VALUES (1, ?, 0)")
        .bind(name)
        .execute(&mut *conn)
        .await
        .map_err(StoreError::open)?;

    let current: i64 = sqlx::query_scalar("SELECT schema_version FROM meta WHERE id = 1")
        .fetch_one(&mut *conn)
        .await
        .map_err(StoreError::open)?;

    if current > target {
        return Err(StoreError::VersionConflict {
            requested: target,
            current,
        });
    }
    if current == target {
        return Ok(());
    }

    tracing::info!(
        store = name,
        from = current,
        to = target,
        "Migrating record store (existing locations are dropped)"
    );

    sqlx::query("DROP TABLE IF EXISTS locations")
        .execute(&mut *conn)
        .await
        .map_err(StoreError::open)?;

    sqlx::query(
        r#"
        CREATE TABLE locations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL CHECK (length(trim(name)) > 0),
            category TEXT NOT NULL CHECK (category IN ('playground', 'attraction')),
            rating INTEGER NOT NULL CHECK (rating BETWEEN 1 AND 5),
            last_visit TEXT NOT NULL,
            notes TEXT,
            maps_link TEXT,
            lat REAL NOT NULL CHECK (lat BETWEEN -90 AND 90),
            lng REAL NOT NULL CHECK (lng BETWEEN -180 AND 180)
        );
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(StoreError::open)?;

    sqlx::query(
        r#"
        CREATE INDEX idx_locations_category ON locations(category);
        CREATE INDEX idx_locations_rating ON locations(rating);
        CREATE INDEX idx_locations_last_visit ON locations(last_visit);
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(StoreError::open)?;

    sqlx::query("UPDATE meta SET schema_version = ?, migrated_at = ? WHERE id = 1")
        .bind(target)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *conn)
        .await
        .map_err(StoreError::open)?;

    Ok(())
}
