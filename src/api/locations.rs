//! Location API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Serialize;

use super::{success, ApiResult};
use crate::db::SaveOutcome;
use crate::errors::AppError;
use crate::models::{LocationDraft, LocationQuery, LocationRecord, LocationStats};
use crate::AppState;

/// Remaining locations after a delete.
#[derive(Debug, Serialize)]
pub struct DeleteOutcome {
    pub locations: Vec<LocationRecord>,
}

/// GET /api/locations - List locations.
///
/// Optional query parameters: `filter` (all, playground, attraction),
/// `rating`, and a `from`/`to` range on the last visit.
pub async fn list_locations(
    State(state): State<AppState>,
    Query(query): Query<LocationQuery>,
) -> ApiResult<Vec<LocationRecord>> {
    let locations = state.repo.search(&query).await?;
    success(locations)
}

/// GET /api/locations/{id} - Get a single location.
pub async fn get_location(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<LocationRecord> {
    match state.repo.find(id).await? {
        Some(location) => success(location),
        None => Err(AppError::NotFound(format!("Location {} not found", id))),
    }
}

/// POST /api/locations - Save a draft; an `id` in the body replaces that record.
pub async fn create_location(
    State(state): State<AppState>,
    Json(draft): Json<LocationDraft>,
) -> ApiResult<SaveOutcome> {
    let outcome = state.repo.save(&draft).await?;
    success(outcome)
}

/// PUT /api/locations/{id} - Replace a location.
pub async fn update_location(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(mut draft): Json<LocationDraft>,
) -> ApiResult<SaveOutcome> {
    if let Some(body_id) = draft.id {
        if body_id != id {
            return Err(AppError::BadRequest(format!(
                "Body id {} does not match path id {}",
                body_id, id
            )));
        }
    }

    draft.id = Some(id);
    let outcome = state.repo.save(&draft).await?;
    success(outcome)
}

/// DELETE /api/locations/{id} - Delete a location. Absent ids succeed.
pub async fn delete_location(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> ApiResult<DeleteOutcome> {
    let locations = state.repo.remove_by_id(id).await?;
    success(DeleteOutcome { locations })
}

/// GET /api/locations/stats - Summary for the stats dialog.
pub async fn location_stats(State(state): State<AppState>) -> ApiResult<LocationStats> {
    let stats = state.repo.stats().await?;
    success(stats)
}
