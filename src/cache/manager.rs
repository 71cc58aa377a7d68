use std::path::Path;

use chrono::Utc;
use futures::future::join_all;
use reqwest::Url;
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;

use crate::errors::CacheError;
use crate::fetch::{FetchRequest, FetchResponse, Fetcher};

/// File holding every cache generation.
const CACHE_FILE: &str = "offline-cache.sqlite";

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GenerationState {
    Installing,
    Installed,
    Active,
}

impl GenerationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            GenerationState::Installing => "installing",
            GenerationState::Installed => "installed",
            GenerationState::Active => "active",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "installing" => Some(GenerationState::Installing),
            "installed" => Some(GenerationState::Installed),
            "active" => Some(GenerationState::Active),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct GenerationInfo {
    pub name: String,
    pub state: GenerationState,
}

/// Outcome of populating a generation from a manifest.
#[derive(Debug, Default)]
pub struct InstallReport {
    pub cached: Vec<String>,
    /// Always `CacheError::AssetFetchFailed` or a storage error for that asset
    pub failed: Vec<CacheError>,
}

/// Owner of the current cache generation.
#[derive(Clone)]
pub struct CacheManager {
    pool: SqlitePool,
    current: String,
}

impl CacheManager {
    /// Open the cache file in `data_dir` with `generation` as the current generation.
    pub async fn open(data_dir: &Path, generation: &str) -> Result<Self, CacheError> {
        tokio::fs::create_dir_all(data_dir).await.map_err(|e| {
            CacheError::Storage(format!("cannot create {}: {}", data_dir.display(), e))
        })?;

        let options = SqliteConnectOptions::new()
            .filename(data_dir.join(CACHE_FILE))
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        Self::with_pool(pool, generation).await
    }

    /// Use an existing pool, creating the cache tables if needed.
    pub async fn with_pool(pool: SqlitePool, generation: &str) -> Result<Self, CacheError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cache_generations (
                name TEXT PRIMARY KEY,
                state TEXT NOT NULL CHECK (state IN ('installing', 'installed', 'active')),
                created_at TEXT NOT NULL,
                activated_at TEXT
            );

            CREATE TABLE IF NOT EXISTS cache_entries (
                generation TEXT NOT NULL REFERENCES cache_generations(name) ON DELETE CASCADE,
                request_key TEXT NOT NULL,
                url TEXT NOT NULL,
                method TEXT NOT NULL,
                status INTEGER NOT NULL,
                headers TEXT NOT NULL,
                body BLOB NOT NULL,
                stored_at TEXT NOT NULL,
                PRIMARY KEY (generation, request_key)
            );
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            "INSERT OR IGNORE INTO cache_generations (name, state, created_at) VALUES (?, 'installing', ?)",
        )
        .bind(generation)
        .bind(Utc::now().to_rfc3339())
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            current: generation.to_string(),
        })
    }

    /// Name of the current generation.
    pub fn name(&self) -> &str {
        &self.current
    }

    /// Populate the current generation and mark it installed.
    ///
    /// Individual asset failures are reported, not returned as errors.
    pub async fn install(
        &self,
        fetcher: &dyn Fetcher,
        manifest: &[String],
    ) -> Result<InstallReport, CacheError> {
        tracing::info!(generation = %self.current, assets = manifest.len(), "Installing cache generation");
        self.set_state_unless_active(GenerationState::Installing)
            .await?;

        let report = self.populate(fetcher, manifest).await;

        self.set_state_unless_active(GenerationState::Installed)
            .await?;
        tracing::info!(
            generation = %self.current,
            cached = report.cached.len(),
            failed = report.failed.len(),
            "Cache generation installed"
        );
        Ok(report)
    }

    /// Fetch and store every manifest URL independently and concurrently.
    pub async fn populate(&self, fetcher: &dyn Fetcher, manifest: &[String]) -> InstallReport {
        let results = join_all(
            manifest
                .iter()
                .map(|url| async move { (url, self.cache_asset(fetcher, url).await) }),
        )
        .await;

        let mut report = InstallReport::default();
        for (url, result) in results {
            match result {
                Ok(()) => report.cached.push(url.clone()),
                Err(err) => {
                    tracing::warn!(url = %url, error = %err, "AssetFetchFailed, skipping");
                    report.failed.push(err);
                }
            }
        }
        report
    }

    async fn cache_asset(&self, fetcher: &dyn Fetcher, url: &str) -> Result<(), CacheError> {
        let failed = |reason: String| CacheError::AssetFetchFailed {
            url: url.to_string(),
            reason,
        };

        let parsed = Url::parse(url).map_err(|e| failed(format!("invalid url: {}", e)))?;
        let request = FetchRequest::get(parsed);
        let response = fetcher
            .fetch(&request)
            .await
            .map_err(|e| failed(e.to_string()))?;

        if !response.is_cacheable() {
            return Err(failed(format!("status {}", response.status)));
        }

        self.store(&request, &response).await
    }

    /// Delete every generation except the current one and make it the active one.
    ///
    /// Returns the names of the deleted generations.
    pub async fn activate(&self) -> Result<Vec<String>, CacheError> {
        let mut tx = self.pool.begin().await?;

        let stale: Vec<String> =
            sqlx::query_scalar("SELECT name FROM cache_generations WHERE name != ? ORDER BY name")
                .bind(&self.current)
                .fetch_all(&mut *tx)
                .await?;

        sqlx::query("DELETE FROM cache_entries WHERE generation != ?")
            .bind(&self.current)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM cache_generations WHERE name != ?")
            .bind(&self.current)
            .execute(&mut *tx)
            .await?;

        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"INSERT INTO cache_generations (name, state, created_at, activated_at)
               VALUES (?, 'active', ?, ?)
               ON CONFLICT(name) DO UPDATE SET state = 'active', activated_at = excluded.activated_at"#,
        )
        .bind(&self.current)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        for name in &stale {
            tracing::info!(generation = %name, "Deleted old cache generation");
        }
        tracing::info!(generation = %self.current, "Cache generation active");
        Ok(stale)
    }

    /// Cached response for a request in the current generation.
    pub async fn lookup(&self, request: &FetchRequest) -> Result<Option<FetchResponse>, CacheError> {
        let row = sqlx::query(
            "SELECT status, headers, body FROM cache_entries WHERE generation = ? AND request_key = ?",
        )
        .bind(&self.current)
        .bind(request.cache_key())
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let status: i64 = row.try_get("status")?;
        let headers: String = row.try_get("headers")?;
        let headers = serde_json::from_str(&headers)
            .map_err(|e| CacheError::Storage(format!("corrupt cached headers: {}", e)))?;

        Ok(Some(FetchResponse {
            status: u16::try_from(status)
                .map_err(|_| CacheError::Storage(format!("corrupt cached status {}", status)))?,
            headers,
            body: row.try_get("body")?,
        }))
    }

    /// Write a response into the current generation, replacing any previous copy.
    pub async fn store(
        &self,
        request: &FetchRequest,
        response: &FetchResponse,
    ) -> Result<(), CacheError> {
        let headers = serde_json::to_string(&response.headers)
            .map_err(|e| CacheError::Storage(format!("cannot encode headers: {}", e)))?;

        sqlx::query(
            r#"INSERT INTO cache_entries (generation, request_key, url, method, status, headers, body, stored_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(generation, request_key) DO UPDATE SET
                   status = excluded.status,
                   headers = excluded.headers,
                   body = excluded.body,
                   stored_at = excluded.stored_at"#,
        )
        .bind(&self.current)
        .bind(request.cache_key())
        .bind(request.url.as_str())
        .bind(request.method.to_ascii_uppercase())
        .bind(i64::from(response.status))
        .bind(headers)
        .bind(&response.body)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;

        tracing::debug!(generation = %self.current, url = %request.url, "Cached response");
        Ok(())
    }

    pub async fn generations(&self) -> Result<Vec<GenerationInfo>, CacheError> {
        let rows = sqlx::query("SELECT name, state FROM cache_generations ORDER BY name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let state: String = row.try_get("state")?;
                Ok(GenerationInfo {
                    name: row.try_get("name")?,
                    state: GenerationState::from_str(&state).ok_or_else(|| {
                        CacheError::Storage(format!("unknown generation state '{}'", state))
                    })?,
                })
            })
            .collect()
    }

    pub async fn state(&self) -> Result<Option<GenerationState>, CacheError> {
        Ok(self
            .generations()
            .await?
            .into_iter()
            .find(|g| g.name == self.current)
            .map(|g| g.state))
    }

    /// Number of entries in the current generation.
    pub async fn entry_count(&self) -> Result<u64, CacheError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM cache_entries WHERE generation = ?")
                .bind(&self.current)
                .fetch_one(&self.pool)
                .await?;
        Ok(count as u64)
    }

    async fn set_state_unless_active(&self, state: GenerationState) -> Result<(), CacheError> {
        sqlx::query(
            "UPDATE cache_generations SET state = ? WHERE name = ? AND state != 'active'",
        )
        .bind(state.as_str())
        .bind(&self.current)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}
