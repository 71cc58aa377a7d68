//! Typed location repository used by the API handlers.
//!
//! Every mutation re-reads the full set so callers always get a consistent
//! snapshot instead of a diff.

use chrono::NaiveDate;
use serde::Serialize;

use super::RecordStore;
use crate::errors::{RepositoryAction, RepositoryError};
use crate::models::{LocationDraft, LocationFilter, LocationQuery, LocationRecord, LocationStats};

/// Result of a save: the id the record is stored under plus the fresh list.
#[derive(Debug, Clone, Serialize)]
pub struct SaveOutcome {
    pub id: i64,
    pub locations: Vec<LocationRecord>,
}

/// Repository over the record store.
#[derive(Clone)]
pub struct LocationRepository {
    store: RecordStore,
}

impl LocationRepository {
    pub fn new(store: RecordStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Create (no id) or fully replace (id present) a location.
    pub async fn save(&self, draft: &LocationDraft) -> Result<SaveOutcome, RepositoryError> {
        let tag = |e| RepositoryError::new(RepositoryAction::Save, e);

        let id = self.store.put(draft).await.map_err(tag)?;
        let locations = self.store.get_all().await.map_err(tag)?;

        if draft.id.is_some() {
            tracing::info!(id, "Location updated");
        } else {
            tracing::info!(id, "Location added");
        }
        Ok(SaveOutcome { id, locations })
    }

    /// Delete a location. Deleting an id that is already gone succeeds.
    pub async fn remove_by_id(&self, id: i64) -> Result<Vec<LocationRecord>, RepositoryError> {
        let tag = |e| RepositoryError::new(RepositoryAction::Delete, e);

        self.store.delete(id).await.map_err(tag)?;
        let locations = self.store.get_all().await.map_err(tag)?;

        tracing::info!(id, "Location deleted");
        Ok(locations)
    }

    pub async fn find(&self, id: i64) -> Result<Option<LocationRecord>, RepositoryError> {
        self.store
            .get(id)
            .await
            .map_err(|e| RepositoryError::new(RepositoryAction::Load, e))
    }

    pub async fn load_all(&self) -> Result<Vec<LocationRecord>, RepositoryError> {
        self.store
            .get_all()
            .await
            .map_err(|e| RepositoryError::new(RepositoryAction::Load, e))
    }

    /// Locations matching a menu filter; category filters use the category index.
    pub async fn load_filtered(
        &self,
        filter: LocationFilter,
    ) -> Result<Vec<LocationRecord>, RepositoryError> {
        match filter.category() {
            Some(category) => self
                .store
                .get_all_by_category(category)
                .await
                .map_err(|e| RepositoryError::new(RepositoryAction::Load, e)),
            None => self.load_all().await,
        }
    }

    /// Locations matching every criterion of `query`.
    ///
    /// The store is read through the most selective index the query allows;
    /// the remaining criteria are applied to that result.
    pub async fn search(&self, query: &LocationQuery) -> Result<Vec<LocationRecord>, RepositoryError> {
        let tag = |e| RepositoryError::new(RepositoryAction::Load, e);

        let candidates = if query.from.is_some() || query.to.is_some() {
            // Dates are stored as YYYY-MM-DD text, so open ends need four-digit years.
            let from = query.from.or_else(|| NaiveDate::from_ymd_opt(1, 1, 1));
            let to = query.to.or_else(|| NaiveDate::from_ymd_opt(9999, 12, 31));
            match (from, to) {
                (Some(from), Some(to)) => self
                    .store
                    .get_all_visited_between(from, to)
                    .await
                    .map_err(tag)?,
                _ => self.store.get_all().await.map_err(tag)?,
            }
        } else if let Some(rating) = query.rating {
            self.store.get_all_by_rating(rating).await.map_err(tag)?
        } else {
            return self.load_filtered(query.filter).await;
        };

        Ok(candidates
            .into_iter()
            .filter(|record| query.matches(record))
            .collect())
    }

    pub async fn stats(&self) -> Result<LocationStats, RepositoryError> {
        let locations = self.load_all().await?;
        Ok(LocationStats::from_records(&locations))
    }
}
