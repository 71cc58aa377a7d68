//! Location model matching the frontend location objects.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// The kind of place a pin marks.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Playground,
    Attraction,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Playground => "playground",
            Category::Attraction => "attraction",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "playground" => Some(Category::Playground),
            "attraction" => Some(Category::Attraction),
            _ => None,
        }
    }
}

/// A persisted location bookmark.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationRecord {
    pub id: i64,
    pub name: String,
    pub category: Category,
    pub rating: u8,
    pub last_visit: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maps_link: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

/// A location as submitted by the UI. `id` is absent until the store assigns one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationDraft {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<i64>,
    pub name: String,
    pub category: Category,
    pub rating: u8,
    pub last_visit: NaiveDate,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub maps_link: Option<String>,
    pub lat: f64,
    pub lng: f64,
}

impl LocationDraft {
    /// Attach the id the store assigned (or kept) to produce the stored form.
    pub fn into_record(self, id: i64) -> LocationRecord {
        LocationRecord {
            id,
            name: self.name,
            category: self.category,
            rating: self.rating,
            last_visit: self.last_visit,
            notes: self.notes,
            maps_link: self.maps_link,
            lat: self.lat,
            lng: self.lng,
        }
    }
}

/// Map filter offered by the menu.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LocationFilter {
    #[default]
    All,
    Playground,
    Attraction,
}

impl LocationFilter {
    pub fn category(&self) -> Option<Category> {
        match self {
            LocationFilter::All => None,
            LocationFilter::Playground => Some(Category::Playground),
            LocationFilter::Attraction => Some(Category::Attraction),
        }
    }

    pub fn matches(&self, record: &LocationRecord) -> bool {
        match self.category() {
            Some(category) => category == record.category,
            None => true,
        }
    }
}

/// Query parameters for listing locations. Every criterion is optional.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct LocationQuery {
    #[serde(default)]
    pub filter: LocationFilter,
    pub rating: Option<u8>,
    /// Earliest `lastVisit`, inclusive
    pub from: Option<NaiveDate>,
    /// Latest `lastVisit`, inclusive
    pub to: Option<NaiveDate>,
}

impl LocationQuery {
    pub fn matches(&self, record: &LocationRecord) -> bool {
        self.filter.matches(record)
            && self.rating.map_or(true, |r| r == record.rating)
            && self.from.map_or(true, |d| record.last_visit >= d)
            && self.to.map_or(true, |d| record.last_visit <= d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_draft_deserializes_without_id() {
        let draft: LocationDraft = serde_json::from_value(json!({
            "name": "Stadtpark",
            "category": "playground",
            "rating": 5,
            "lastVisit": "2024-05-01",
            "lat": 52.12,
            "lng": 11.63
        }))
        .unwrap();

        assert_eq!(draft.id, None);
        assert_eq!(draft.category, Category::Playground);
        assert_eq!(draft.last_visit, NaiveDate::from_ymd_opt(2024, 5, 1).unwrap());
        assert_eq!(draft.notes, None);
    }

    #[test]
    fn test_unknown_category_is_rejected() {
        let result = serde_json::from_value::<LocationDraft>(json!({
            "name": "Zoo",
            "category": "museum",
            "rating": 3,
            "lastVisit": "2024-05-01",
            "lat": 52.1,
            "lng": 11.6
        }));
        assert!(result.is_err());
        assert_eq!(Category::from_str("museum"), None);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let record = LocationRecord {
            id: 7,
            name: "Elbauenpark".to_string(),
            category: Category::Attraction,
            rating: 4,
            last_visit: NaiveDate::from_ymd_opt(2024, 6, 2).unwrap(),
            notes: None,
            maps_link: Some("https://maps.example/elbauenpark".to_string()),
            lat: 52.13,
            lng: 11.67,
        };
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["lastVisit"], "2024-06-02");
        assert_eq!(value["mapsLink"], "https://maps.example/elbauenpark");
        assert_eq!(value["category"], "attraction");
        assert!(value.get("notes").is_none());
    }

    #[test]
    fn test_filter_matches() {
        let record = LocationDraft {
            id: None,
            name: "Spielplatz".to_string(),
            category: Category::Playground,
            rating: 3,
            last_visit: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            notes: None,
            maps_link: None,
            lat: 52.0,
            lng: 11.0,
        }
        .into_record(1);

        assert!(LocationFilter::All.matches(&record));
        assert!(LocationFilter::Playground.matches(&record));
        assert!(!LocationFilter::Attraction.matches(&record));
    }

    #[test]
    fn test_query_combines_criteria() {
        let record = LocationDraft {
            id: None,
            name: "Elbauenpark".to_string(),
            category: Category::Attraction,
            rating: 4,
            last_visit: NaiveDate::from_ymd_opt(2024, 6, 15).unwrap(),
            notes: None,
            maps_link: None,
            lat: 52.13,
            lng: 11.67,
        }
        .into_record(2);

        assert!(LocationQuery::default().matches(&record));

        let query: LocationQuery = serde_json::from_value(json!({
            "filter": "attraction",
            "rating": 4,
            "from": "2024-06-01",
            "to": "2024-06-30"
        }))
        .unwrap();
        assert!(query.matches(&record));

        let too_late = LocationQuery {
            to: NaiveDate::from_ymd_opt(2024, 6, 14),
            ..query.clone()
        };
        assert!(!too_late.matches(&record));

        let playgrounds = LocationQuery {
            filter: LocationFilter::Playground,
            ..query
        };
        assert!(!playgrounds.matches(&record));
    }
}
