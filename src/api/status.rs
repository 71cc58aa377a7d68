//! Status endpoint for diagnosing the offline setup.

use axum::extract::State;
use serde::Serialize;

use super::{success, ApiResult};
use crate::cache::{GenerationInfo, GenerationState};
use crate::errors::{AppError, CacheError, RepositoryAction, RepositoryError};
use crate::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStatus {
    pub schema_version: i64,
    pub locations: u64,
    pub indexes: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStatus {
    pub generation: String,
    pub state: Option<GenerationState>,
    pub entries: u64,
    pub generations: Vec<GenerationInfo>,
}

#[derive(Debug, Serialize)]
pub struct StatusReport {
    pub store: StoreStatus,
    pub cache: CacheStatus,
}

/// GET /api/status - Schema version, record count and cache generations.
pub async fn get_status(State(state): State<AppState>) -> ApiResult<StatusReport> {
    let store = state.repo.store();
    let load = |e| RepositoryError::new(RepositoryAction::Load, e);
    let store_status = StoreStatus {
        schema_version: store.schema_version().await.map_err(load)?,
        locations: store.count().await.map_err(load)?,
        indexes: store.index_names().await.map_err(load)?,
    };

    let cache_error = |e: CacheError| AppError::Internal(e.to_string());
    let generations = state.cache.generations().await.map_err(cache_error)?;
    let cache_status = CacheStatus {
        generation: state.cache.name().to_string(),
        state: state.cache.state().await.map_err(cache_error)?,
        entries: state.cache.entry_count().await.map_err(cache_error)?,
        generations,
    };

    success(StatusReport {
        store: store_status,
        cache: cache_status,
    })
}
