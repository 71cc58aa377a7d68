//! Summary statistics shown in the stats dialog.

use serde::Serialize;

use super::{Category, LocationRecord};

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LocationStats {
    pub total: usize,
    pub playgrounds: usize,
    pub attractions: usize,
    /// Average rating rounded to one decimal; absent when there are no records
    pub average_rating: Option<f64>,
    /// The record with the latest `lastVisit`
    pub most_recent: Option<LocationRecord>,
}

impl LocationStats {
    pub fn from_records(records: &[LocationRecord]) -> Self {
        let total = records.len();
        let playgrounds = records
            .iter()
            .filter(|r| r.category == Category::Playground)
            .count();

        let average_rating = if total == 0 {
            None
        } else {
            let sum: u32 = records.iter().map(|r| u32::from(r.rating)).sum();
            let avg = f64::from(sum) / total as f64;
            Some((avg * 10.0).round() / 10.0)
        };

        // Earliest record wins on equal dates.
        let most_recent = records
            .iter()
            .reduce(|best, r| if r.last_visit > best.last_visit { r } else { best })
            .cloned();

        Self {
            total,
            playgrounds,
            attractions: total - playgrounds,
            average_rating,
            most_recent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LocationDraft;
    use chrono::NaiveDate;

    fn record(id: i64, category: Category, rating: u8, date: &str) -> LocationRecord {
        LocationDraft {
            id: None,
            name: format!("Ort {}", id),
            category,
            rating,
            last_visit: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            notes: None,
            maps_link: None,
            lat: 52.12,
            lng: 11.63,
        }
        .into_record(id)
    }

    #[test]
    fn test_empty_stats() {
        let stats = LocationStats::from_records(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.average_rating, None);
        assert!(stats.most_recent.is_none());
    }

    #[test]
    fn test_stats_counts_and_average() {
        let records = vec![
            record(1, Category::Playground, 5, "2024-05-01"),
            record(2, Category::Attraction, 4, "2024-07-12"),
            record(3, Category::Playground, 4, "2023-11-30"),
        ];
        let stats = LocationStats::from_records(&records);

        assert_eq!(stats.total, 3);
        assert_eq!(stats.playgrounds, 2);
        assert_eq!(stats.attractions, 1);
        assert_eq!(stats.average_rating, Some(4.3));
        assert_eq!(stats.most_recent.map(|r| r.id), Some(2));
    }

    #[test]
    fn test_most_recent_tie_keeps_first() {
        let records = vec![
            record(4, Category::Attraction, 2, "2024-01-01"),
            record(5, Category::Attraction, 3, "2024-01-01"),
        ];
        let stats = LocationStats::from_records(&records);
        assert_eq!(stats.most_recent.map(|r| r.id), Some(4));
    }
}
