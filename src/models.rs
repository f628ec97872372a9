// The structs in this module are a direct mapping of the persisted JSON, which is also what the
// map frontend reads, so field names on the wire must stay stable.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_with::{NoneAsEmptyString, serde_as};
use std::{collections::BTreeSet, fmt::Display};

/// Identity of a record across scrape runs
pub type Key<'a> = (&'a str, &'a str);

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

/// One day of the event schedule, as returned by the schedule API
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduleEntry {
    /// Short day name, e.g. "Fri"
    pub day_of_week: String,
    /// e.g. "Aug 15"
    pub date: String,
    /// Human-authored time range, e.g. "11:30 am–8 pm"
    #[serde(alias = "hours")]
    pub hours_text: String,
    /// Raw date value from the API
    pub full_date: String,
}

/// Opening hours come in two shapes: a free text string scraped from the page, or a structured
/// schedule from the API. Absent hours are represented by `Option::None` on the record.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(untagged)]
pub enum Hours {
    Text(String),
    Schedule(Vec<ScheduleEntry>),
}

#[serde_as]
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct Record {
    /// Name of restaurant
    pub restaurant_name: String,
    /// Name of the burger served
    pub burger_name: String,
    pub neighborhood: String,
    /// Link from the listings heading
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_url: Option<String>,
    /// Detail page for the burger
    #[serde(skip_serializing_if = "Option::is_none")]
    pub burger_url: Option<String>,
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Street address
    #[serde_as(as = "NoneAsEmptyString")]
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hours: Option<Hours>,
    // flattened so that latitude and longitude are either both present or both absent
    #[serde(flatten)]
    pub coordinates: Option<Coordinates>,
    #[serde(rename = "geocoded_address", skip_serializing_if = "Option::is_none")]
    pub geocoded_address: Option<String>,
    #[serde(rename = "geocoding_method", skip_serializing_if = "Option::is_none")]
    pub geocoding_method: Option<String>,
    /// Local relative path of the downloaded image
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Where the image was downloaded from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
}

impl Display for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        if self.neighborhood.is_empty() {
            write!(f, "{}: {}", self.restaurant_name, self.burger_name)
        } else {
            write!(
                f,
                "{} ({}): {}",
                self.restaurant_name, self.neighborhood, self.burger_name
            )
        }
    }
}

impl Record {
    pub fn new(restaurant_name: &str, burger_name: &str, neighborhood: &str) -> Self {
        Self {
            restaurant_name: restaurant_name.into(),
            burger_name: burger_name.into(),
            neighborhood: neighborhood.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> Key<'_> {
        (&self.restaurant_name, &self.burger_name)
    }

    pub fn has_coordinates(&self) -> bool {
        self.coordinates.is_some()
    }

    pub fn has_address(&self) -> bool {
        self.address.as_deref().is_some_and(|a| !a.trim().is_empty())
    }

    /// Copy all coordinate related fields from `other`
    pub fn copy_geocoding_from(&mut self, other: &Record) {
        self.coordinates = other.coordinates;
        self.geocoded_address = other.geocoded_address.clone();
        self.geocoding_method = other.geocoding_method.clone();
    }

    /// Copy image fields from `other`
    pub fn copy_image_from(&mut self, other: &Record) {
        self.image = other.image.clone();
        self.image_url = other.image_url.clone();
    }
}

/// Derived statistics, written next to the records after every persist
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total_restaurants: usize,
    pub with_addresses: usize,
    pub geocoded_restaurants: usize,
    pub last_updated: DateTime<Utc>,
    /// Sorted, without duplicates
    pub neighborhoods: Vec<String>,
}

impl Summary {
    pub fn from_records(records: &[Record], now: DateTime<Utc>) -> Self {
        Self {
            total_restaurants: records.len(),
            with_addresses: records.iter().filter(|r| r.has_address()).count(),
            geocoded_restaurants: records.iter().filter(|r| r.has_coordinates()).count(),
            last_updated: now,
            neighborhoods: records
                .iter()
                .map(|r| r.neighborhood.clone())
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect(),
        }
    }
}
