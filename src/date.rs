use crate::config::DateSettings;
use crate::model::EventDate;
use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use serde::Deserialize;
use std::sync::LazyLock;

const SERIAL_EPOCH: (i32, u32, u32) = (1899, 12, 30);

// 9999-12-31
const MAX_SERIAL: i64 = 2_958_465;

const WEEKDAYS: [&str; 32] = [
    "lunedì", "lunedi", "martedì", "martedi", "mercoledì", "mercoledi", "giovedì", "giovedi",
    "venerdì", "venerdi", "sabato", "domenica", "lun", "mer", "gio", "ven", "sab", "dom",
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday", "mon", "tue",
    "wed", "thu", "fri", "sat", "sun",
];

static ISO_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})(?:[T ].*)?$").expect("iso date regex must be valid")
});

static NUMERIC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})[ /.\-](\d{1,2})(?:[ /.\-](\d{4}))?$")
        .expect("numeric date regex must be valid")
});

static DAY_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{1,2})[°º]?\s*(\p{L}+)\.?(?:\s+(\d{4}))?$")
        .expect("day-first date regex must be valid")
});

static MONTH_FIRST_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\p{L}+)\.?\s+(\d{1,2})(?:\s+(\d{4}))?$")
        .expect("month-first date regex must be valid")
});

// Five digits at least, so years and times like "2025" or "10.30" stay out.
static SERIAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{5,7})(?:\.\d+)?$").expect("serial regex must be valid"));

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DateStrategy {
    Iso,
    Italian,
    English,
    Serial,
}

impl DateStrategy {
    pub const DEFAULT_ORDER: [DateStrategy; 4] = [
        DateStrategy::Iso,
        DateStrategy::Italian,
        DateStrategy::English,
        DateStrategy::Serial,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DateStrategy::Iso => "iso",
            DateStrategy::Italian => "italian",
            DateStrategy::English => "english",
            DateStrategy::Serial => "serial",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedDate {
    Date(NaiveDate),
    Unavailable { raw: String, note: String },
}

impl ParsedDate {
    pub fn date(&self) -> Option<NaiveDate> {
        match self {
            ParsedDate::Date(date) => Some(*date),
            ParsedDate::Unavailable { .. } => None,
        }
    }
}

impl From<ParsedDate> for EventDate {
    fn from(value: ParsedDate) -> Self {
        match value {
            ParsedDate::Date(date) => EventDate::Day(date),
            ParsedDate::Unavailable { raw, .. } => EventDate::Unavailable { raw },
        }
    }
}

#[derive(Debug, Clone)]
pub struct DateNormalizer {
    strategies: Vec<DateStrategy>,
    month_names: Vec<String>,
    month_abbreviations: Vec<String>,
    unavailable_label: String,
}

impl Default for DateNormalizer {
    fn default() -> Self {
        Self::from_settings(&DateSettings::default())
    }
}

impl DateNormalizer {
    pub fn from_settings(settings: &DateSettings) -> Self {
        Self {
            strategies: settings.strategies.clone(),
            month_names: settings
                .month_names
                .iter()
                .map(|v| v.trim().to_lowercase())
                .collect(),
            month_abbreviations: settings
                .month_abbreviations
                .iter()
                .map(|v| v.trim().to_string())
                .collect(),
            unavailable_label: settings.unavailable_label.clone(),
        }
    }

    pub fn with_strategies(mut self, strategies: Vec<DateStrategy>) -> Self {
        self.strategies = strategies;
        self
    }

    pub fn unavailable_label(&self) -> &str {
        &self.unavailable_label
    }

    pub fn parse(&self, text: &str, today: NaiveDate) -> ParsedDate {
        let cleaned = self.clean_date_text(text);
        if cleaned.is_empty() {
            return ParsedDate::Unavailable {
                raw: text.to_string(),
                note: "empty date text".to_string(),
            };
        }

        for strategy in &self.strategies {
            if let Some(date) = self.apply(*strategy, &cleaned, today) {
                return ParsedDate::Date(date);
            }
        }

        let tried = self
            .strategies
            .iter()
            .map(DateStrategy::name)
            .collect::<Vec<_>>()
            .join(", ");
        ParsedDate::Unavailable {
            raw: text.to_string(),
            note: format!("no date strategy matched {cleaned:?} (tried {tried})"),
        }
    }

    pub fn format(&self, date: NaiveDate) -> String {
        let month = self
            .month_abbreviations
            .get(date.month0() as usize)
            .map(String::as_str)
            .unwrap_or("");
        format!("{:02} {} {}", date.day(), month, date.year())
    }

    pub fn month_number(&self, token: &str) -> Option<u32> {
        let token = token.trim().trim_end_matches('.').to_lowercase();
        if token.chars().count() < 3 {
            return None;
        }

        if let Some(idx) = self.month_names.iter().position(|m| *m == token) {
            return Some(idx as u32 + 1);
        }
        if let Some(idx) = self
            .month_abbreviations
            .iter()
            .position(|m| m.to_lowercase() == token)
        {
            return Some(idx as u32 + 1);
        }
        self.month_names
            .iter()
            .position(|m| m.starts_with(&token))
            .map(|idx| idx as u32 + 1)
    }

    fn clean_date_text(&self, text: &str) -> String {
        let without_time = text.split('@').next().unwrap_or_default();
        let mut tokens = without_time
            .replace(',', " ")
            .split_whitespace()
            .map(ToString::to_string)
            .collect::<Vec<_>>();

        if tokens.len() > 2 {
            let first = tokens[0].trim_end_matches('.').to_lowercase();
            // "mar" is both Tuesday and March; it is a weekday only before day and month.
            let tuesday = first == "mar"
                && tokens[1].chars().all(|c| c.is_ascii_digit())
                && self.month_number(&tokens[2]).is_some();
            if tuesday || WEEKDAYS.contains(&first.as_str()) {
                tokens.remove(0);
            }
        }

        tokens.join(" ")
    }

    fn apply(&self, strategy: DateStrategy, text: &str, today: NaiveDate) -> Option<NaiveDate> {
        match strategy {
            DateStrategy::Iso => parse_iso(text),
            DateStrategy::Italian => self.parse_italian(text, today),
            DateStrategy::English => parse_english(text),
            DateStrategy::Serial => parse_serial(text),
        }
    }

    fn parse_italian(&self, text: &str, today: NaiveDate) -> Option<NaiveDate> {
        if let Some(caps) = NUMERIC_RE.captures(text) {
            let day = caps.get(1)?.as_str().parse().ok()?;
            let month = caps.get(2)?.as_str().parse().ok()?;
            let year = year_or_default(caps.get(3).map(|m| m.as_str()), today)?;
            return NaiveDate::from_ymd_opt(year, month, day);
        }

        if let Some(caps) = DAY_FIRST_RE.captures(text) {
            let day = caps.get(1)?.as_str().parse().ok()?;
            let month = self.month_number(caps.get(2)?.as_str())?;
            let year = year_or_default(caps.get(3).map(|m| m.as_str()), today)?;
            return NaiveDate::from_ymd_opt(year, month, day);
        }

        let caps = MONTH_FIRST_RE.captures(text)?;
        let month = self.month_number(caps.get(1)?.as_str())?;
        let day = caps.get(2)?.as_str().parse().ok()?;
        let year = year_or_default(caps.get(3).map(|m| m.as_str()), today)?;
        NaiveDate::from_ymd_opt(year, month, day)
    }
}

fn year_or_default(year: Option<&str>, today: NaiveDate) -> Option<i32> {
    match year {
        Some(value) => value.parse().ok(),
        None => Some(today.year()),
    }
}

fn parse_iso(text: &str) -> Option<NaiveDate> {
    let caps = ISO_RE.captures(text)?;
    let year = caps.get(1)?.as_str().parse().ok()?;
    let month = caps.get(2)?.as_str().parse().ok()?;
    let day = caps.get(3)?.as_str().parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_english(text: &str) -> Option<NaiveDate> {
    ["%d %b %Y", "%b %d %Y"]
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(text, format).ok())
}

fn parse_serial(text: &str) -> Option<NaiveDate> {
    let caps = SERIAL_RE.captures(text)?;
    let days: i64 = caps.get(1)?.as_str().parse().ok()?;
    if !(1..=MAX_SERIAL).contains(&days) {
        return None;
    }
    let (y, m, d) = SERIAL_EPOCH;
    NaiveDate::from_ymd_opt(y, m, d)?.checked_add_signed(Duration::days(days))
}
