//! Key-indexed CRUD over the `locations` table.
//!
//! Every operation is a single statement, so each call is atomic for the
//! record it touches.

use chrono::NaiveDate;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{query::Query, Row, Sqlite, SqlitePool};

use crate::errors::StoreError;
use crate::models::{Category, LocationDraft, LocationRecord};

const SELECT_LOCATIONS: &str =
    "SELECT id, name, category, rating, last_visit, notes, maps_link, lat, lng FROM locations";

/// Handle to an opened, migrated record store.
#[derive(Clone)]
pub struct RecordStore {
    pool: SqlitePool,
}

impl RecordStore {
    pub(crate) fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert when the draft has no id, otherwise replace the record with that id.
    ///
    /// Returns the id the record is stored under.
    pub async fn put(&self, draft: &LocationDraft) -> Result<i64, StoreError> {
        let id = match draft.id {
            Some(id) => {
                let query = sqlx::query(
                    r#"INSERT INTO locations (id, name, category, rating, last_visit, notes, maps_link, lat, lng)
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                       ON CONFLICT(id) DO UPDATE SET
                           name = excluded.name,
                           category = excluded.category,
                           rating = excluded.rating,
                           last_visit = excluded.last_visit,
                           notes = excluded.notes,
                           maps_link = excluded.maps_link,
                           lat = excluded.lat,
                           lng = excluded.lng"#,
                )
                .bind(id);
                bind_fields(query, draft)
                    .execute(&self.pool)
                    .await
                    .map_err(StoreError::write)?;
                id
            }
            None => {
                let query = sqlx::query(
                    r#"INSERT INTO locations (name, category, rating, last_visit, notes, maps_link, lat, lng)
                       VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
                );
                bind_fields(query, draft)
                    .execute(&self.pool)
                    .await
                    .map_err(StoreError::write)?
                    .last_insert_rowid()
            }
        };

        tracing::debug!(id, replaced = draft.id.is_some(), "Stored location");
        Ok(id)
    }

    /// All records. Callers must not rely on the order.
    pub async fn get_all(&self) -> Result<Vec<LocationRecord>, StoreError> {
        let rows = sqlx::query(SELECT_LOCATIONS)
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::read)?;

        rows.iter().map(location_from_row).collect()
    }

    pub async fn get(&self, id: i64) -> Result<Option<LocationRecord>, StoreError> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_LOCATIONS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::read)?;

        row.as_ref().map(location_from_row).transpose()
    }

    pub async fn get_all_by_category(
        &self,
        category: Category,
    ) -> Result<Vec<LocationRecord>, StoreError> {
        let rows = sqlx::query(&format!("{} WHERE category = ?", SELECT_LOCATIONS))
            .bind(category.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::read)?;

        rows.iter().map(location_from_row).collect()
    }

    pub async fn get_all_by_rating(&self, rating: u8) -> Result<Vec<LocationRecord>, StoreError> {
        let rows = sqlx::query(&format!("{} WHERE rating = ?", SELECT_LOCATIONS))
            .bind(i64::from(rating))
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::read)?;

        rows.iter().map(location_from_row).collect()
    }

    /// Records whose last visit falls in `from..=to`, oldest first.
    pub async fn get_all_visited_between(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LocationRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "{} WHERE last_visit BETWEEN ? AND ? ORDER BY last_visit",
            SELECT_LOCATIONS
        ))
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::read)?;

        rows.iter().map(location_from_row).collect()
    }

    /// Remove a record. Returns whether a row was actually deleted; a missing id is not an error.
    pub async fn delete(&self, id: i64) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM locations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(StoreError::write)?;

        let removed = result.rows_affected() > 0;
        tracing::debug!(id, removed, "Deleted location");
        Ok(removed)
    }

    pub async fn count(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM locations")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::read)?;
        Ok(count as u64)
    }

    /// Version recorded in the store's meta row.
    pub async fn schema_version(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT schema_version FROM meta WHERE id = 1")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::read)
    }

    /// Names of the secondary indexes on `locations`, sorted.
    pub async fn index_names(&self) -> Result<Vec<String>, StoreError> {
        sqlx::query_scalar(
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'locations' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::read)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind_fields<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    draft: &'q LocationDraft,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    query
        .bind(&draft.name)
        .bind(draft.category.as_str())
        .bind(i64::from(draft.rating))
        .bind(draft.last_visit)
        .bind(&draft.notes)
        .bind(&draft.maps_link)
        .bind(draft.lat)
        .bind(draft.lng)
}

fn location_from_row(row: &SqliteRow) -> Result<LocationRecord, StoreError> {
    let category: String = row.try_get("category").map_err(StoreError::read)?;
    let category = Category::from_str(&category)
        .ok_or_else(|| StoreError::ReadError(format!("unknown category '{}'", category)))?;
    let rating: i64 = row.try_get("rating").map_err(StoreError::read)?;
    let rating = u8::try_from(rating)
        .map_err(|_| StoreError::ReadError(format!("rating {} out of range", rating)))?;

    Ok(LocationRecord {
        id: row.try_get("id").map_err(StoreError::read)?,
        name: row.try_get("name").map_err(StoreError::read)?,
        category,
        rating,
        last_visit: row.try_get("last_visit").map_err(StoreError::read)?,
        notes: row.try_get("notes").map_err(StoreError::read)?,
        maps_link: row.try_get("maps_link").map_err(StoreError::read)?,
        lat: row.try_get("lat").map_err(StoreError::read)?,
        lng: row.try_get("lng").map_err(StoreError::read)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{open_store, StoreOptions};
    use tempfile::TempDir;

    async fn test_store() -> (RecordStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = open_store(dir.path(), "test", 1, &StoreOptions::default())
            .await
            .unwrap();
        (store, dir)
    }

    fn draft(name: &str, category: Category, rating: u8, date: (i32, u32, u32)) -> LocationDraft {
        LocationDraft {
            id: None,
            name: name.to_string(),
            category,
            rating,
            last_visit: NaiveDate::from_ymd_opt(date.0, date.1, date.2).unwrap(),
            notes: Some("Schattig".to_string()),
            maps_link: None,
            lat: 52.12,
            lng: 11.63,
        }
    }

    #[tokio::test]
    async fn test_put_assigns_unique_ids() {
        let (store, _dir) = test_store().await;

        let mut ids = Vec::new();
        for i in 0..5 {
            let id = store
                .put(&draft(&format!("Ort {}", i), Category::Playground, 4, (2024, 1, 1)))
                .await
                .unwrap();
            assert!(!ids.contains(&id));
            ids.push(id);
        }
        assert_eq!(store.count().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_put_with_id_replaces_whole_record() {
        let (store, _dir) = test_store().await;
        let id = store
            .put(&draft("Stadtpark", Category::Playground, 5, (2024, 5, 1)))
            .await
            .unwrap();

        let mut edited = draft("Stadtpark Rotehorn", Category::Attraction, 2, (2024, 6, 1));
        edited.id = Some(id);
        edited.notes = None;
        assert_eq!(store.put(&edited).await.unwrap(), id);

        let stored = store.get(id).await.unwrap().unwrap();
        assert_eq!(stored, edited.clone().into_record(id));
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_put_with_unknown_id_inserts_under_that_id() {
        let (store, _dir) = test_store().await;
        let mut d = draft("Elbauenpark", Category::Attraction, 4, (2024, 2, 2));
        d.id = Some(42);

        assert_eq!(store.put(&d).await.unwrap(), 42);
        assert!(store.get(42).await.unwrap().is_some());

        // The key generator moves past explicit ids.
        let next = store
            .put(&draft("Dom", Category::Attraction, 5, (2024, 2, 3)))
            .await
            .unwrap();
        assert!(next > 42);
    }

    #[tokio::test]
    async fn test_constraint_violations_are_write_errors() {
        let (store, _dir) = test_store().await;

        let bad_rating = draft("Zu gut", Category::Playground, 6, (2024, 1, 1));
        let err = store.put(&bad_rating).await.unwrap_err();
        assert!(matches!(
            err,
            StoreError::WriteError {
                constraint: true,
                ..
            }
        ));

        let empty_name = draft("  ", Category::Playground, 3, (2024, 1, 1));
        assert!(store.put(&empty_name).await.is_err());

        let mut bad_lat = draft("Nordpol", Category::Attraction, 3, (2024, 1, 1));
        bad_lat.lat = 123.0;
        assert!(store.put(&bad_lat).await.is_err());

        assert_eq!(store.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let (store, _dir) = test_store().await;
        let id = store
            .put(&draft("Stadtpark", Category::Playground, 5, (2024, 5, 1)))
            .await
            .unwrap();

        assert!(store.delete(id).await.unwrap());
        assert!(!store.delete(id).await.unwrap());
        assert!(store.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_index_lookups() {
        let (store, _dir) = test_store().await;
        store
            .put(&draft("Spielplatz Nord", Category::Playground, 5, (2024, 1, 10)))
            .await
            .unwrap();
        store
            .put(&draft("Zoo", Category::Attraction, 5, (2024, 3, 5)))
            .await
            .unwrap();
        store
            .put(&draft("Spielplatz Süd", Category::Playground, 2, (2023, 12, 24)))
            .await
            .unwrap();

        let playgrounds = store.get_all_by_category(Category::Playground).await.unwrap();
        assert_eq!(playgrounds.len(), 2);

        let five_stars = store.get_all_by_rating(5).await.unwrap();
        assert_eq!(five_stars.len(), 2);

        let in_2024 = store
            .get_all_visited_between(
                NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            )
            .await
            .unwrap();
        let names: Vec<_> = in_2024.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, ["Spielplatz Nord", "Zoo"]);
    }
}
