use crate::date::DateNormalizer;
use chrono::NaiveDate;
use serde::Serialize;

pub const TITLE_UNAVAILABLE: &str = "Titolo non disponibile";
pub const DATE_UNAVAILABLE: &str = "Data non disponibile";
pub const TIME_UNAVAILABLE: &str = "Orario non disponibile";
pub const VENUE_UNAVAILABLE: &str = "Luogo non disponibile";
pub const LINK_UNAVAILABLE: &str = "Link non disponibile";
pub const CATEGORY_UNSPECIFIED: &str = "Non specificata";

pub const SOURCE_TABLE_HEADER: [&str; 6] = ["Titolo", "Data", "Orario", "Luogo", "Link", "Categoria"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawEventCandidate {
    pub title: String,
    pub date_text: String,
    pub end_date_text: Option<String>,
    pub time: String,
    pub venue: String,
    pub link: String,
    pub category: String,
    pub featured: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventDate {
    Day(NaiveDate),
    Unavailable { raw: String },
}

impl EventDate {
    pub fn day(&self) -> Option<NaiveDate> {
        match self {
            EventDate::Day(date) => Some(*date),
            EventDate::Unavailable { .. } => None,
        }
    }

    pub fn sort_key(&self) -> NaiveDate {
        self.day().unwrap_or(NaiveDate::MAX)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalEvent {
    pub title: String,
    pub date: EventDate,
    pub time: String,
    pub venue: String,
    pub link: String,
    pub category: String,
}

impl CanonicalEvent {
    pub fn on_day(&self, day: NaiveDate) -> Self {
        Self {
            date: EventDate::Day(day),
            ..self.clone()
        }
    }

    pub fn to_row(&self, dates: &DateNormalizer) -> Vec<String> {
        let date = match &self.date {
            EventDate::Day(day) => dates.format(*day),
            EventDate::Unavailable { .. } => dates.unavailable_label().to_string(),
        };
        vec![
            self.title.clone(),
            date,
            self.time.clone(),
            self.venue.clone(),
            self.link.clone(),
            self.category.clone(),
        ]
    }
}

pub fn source_table_header() -> Vec<String> {
    SOURCE_TABLE_HEADER.iter().map(ToString::to_string).collect()
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceRunReport {
    pub source_key: String,
    pub table: String,
    pub pages_fetched: usize,
    pub records_collected: usize,
    pub unavailable_kept: usize,
    pub unavailable_dropped: usize,
    pub past_dropped: usize,
    pub stop_reason: String,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    pub destination: String,
    pub source_tables: Vec<String>,
    pub rows_read: usize,
    pub unparseable_dropped: usize,
    pub past_dropped: usize,
    pub duplicates_dropped: usize,
    pub rows_written: usize,
    pub digest: String,
}
