use crate::date::DateNormalizer;
use crate::model::{CanonicalEvent, EventDate, RawEventCandidate};
use crate::normalize::normalize_candidate;
use crate::range::RollingWindow;
use anyhow::Result;
use serde::Deserialize;
use std::fmt;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DatePolicy {
    #[default]
    Lenient,
    Strict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    EmptyPage,
    WindowExceeded,
    PagesExhausted,
    FetchFailed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EmptyPage => write!(f, "empty_page"),
            StopReason::WindowExceeded => write!(f, "window_exceeded"),
            StopReason::PagesExhausted => write!(f, "pages_exhausted"),
            StopReason::FetchFailed(err) => write!(f, "fetch_failed: {err}"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Collection {
    pub records: Vec<CanonicalEvent>,
    pub pages: usize,
    pub stop: StopReason,
    pub unavailable_kept: usize,
    pub unavailable_dropped: usize,
    pub past_dropped: usize,
    pub featured_dropped: usize,
}

enum Admission {
    Continue,
    WindowExceeded,
}

pub struct Collector<'a> {
    dates: &'a DateNormalizer,
    window: RollingWindow,
    policy: DatePolicy,
    records: Vec<CanonicalEvent>,
    unavailable_kept: usize,
    unavailable_dropped: usize,
    past_dropped: usize,
    featured_dropped: usize,
}

impl<'a> Collector<'a> {
    pub fn new(dates: &'a DateNormalizer, window: RollingWindow, policy: DatePolicy) -> Self {
        Self {
            dates,
            window,
            policy,
            records: Vec::new(),
            unavailable_kept: 0,
            unavailable_dropped: 0,
            past_dropped: 0,
            featured_dropped: 0,
        }
    }

    pub fn accept_page(&mut self, page: &[RawEventCandidate]) -> Option<StopReason> {
        if page.is_empty() {
            return Some(StopReason::EmptyPage);
        }

        for raw in page {
            for record in normalize_candidate(raw, self.dates, &self.window) {
                if raw.featured && record.date.day().is_some_and(|d| self.window.exceeded_by(d)) {
                    debug!(title = %record.title, "featured event outside window; dropping");
                    self.featured_dropped += 1;
                    continue;
                }
                // Listings run forward in time; the rest of this page is skipped too.
                if let Admission::WindowExceeded = self.admit(record) {
                    return Some(StopReason::WindowExceeded);
                }
            }
        }

        None
    }

    fn admit(&mut self, record: CanonicalEvent) -> Admission {
        match &record.date {
            EventDate::Day(day) if self.window.exceeded_by(*day) => {
                info!(title = %record.title, date = %day, "window end reached");
                return Admission::WindowExceeded;
            }
            EventDate::Day(day) if self.window.is_past(*day) => {
                debug!(title = %record.title, date = %day, "dropping past event");
                self.past_dropped += 1;
                return Admission::Continue;
            }
            EventDate::Day(_) => {}
            EventDate::Unavailable { raw } => match self.policy {
                DatePolicy::Lenient => self.unavailable_kept += 1,
                DatePolicy::Strict => {
                    warn!(title = %record.title, %raw, "dropping event without a usable date");
                    self.unavailable_dropped += 1;
                    return Admission::Continue;
                }
            },
        }

        self.records.push(record);
        Admission::Continue
    }

    pub fn finish(mut self, pages: usize, stop: StopReason) -> Collection {
        sort_records(&mut self.records);
        Collection {
            records: self.records,
            pages,
            stop,
            unavailable_kept: self.unavailable_kept,
            unavailable_dropped: self.unavailable_dropped,
            past_dropped: self.past_dropped,
            featured_dropped: self.featured_dropped,
        }
    }
}

pub fn sort_records(records: &mut [CanonicalEvent]) {
    records.sort_by_key(|record| record.date.sort_key());
}

pub fn collect_pages<I>(
    pages: I,
    dates: &DateNormalizer,
    window: RollingWindow,
    policy: DatePolicy,
) -> Collection
where
    I: IntoIterator<Item = Result<Vec<RawEventCandidate>>>,
{
    let mut collector = Collector::new(dates, window, policy);
    let mut fetched = 0usize;

    for page in pages {
        let page = match page {
            Ok(page) => page,
            Err(err) => {
                warn!(page = fetched, error = %format!("{err:#}"), "page failed; stopping source");
                return collector.finish(fetched, StopReason::FetchFailed(format!("{err:#}")));
            }
        };
        fetched += 1;

        if let Some(stop) = collector.accept_page(&page) {
            return collector.finish(fetched, stop);
        }
    }

    collector.finish(fetched, StopReason::PagesExhausted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use chrono::NaiveDate;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn window() -> RollingWindow {
        RollingWindow::new(ymd(2025, 8, 1), 7)
    }

    fn raw(title: &str, date: &str) -> RawEventCandidate {
        RawEventCandidate {
            title: title.to_string(),
            date_text: date.to_string(),
            end_date_text: None,
            time: String::new(),
            venue: String::new(),
            link: String::new(),
            category: String::new(),
            featured: false,
        }
    }

    fn titles(collection: &Collection) -> Vec<&str> {
        collection.records.iter().map(|r| r.title.as_str()).collect()
    }

    #[test]
    fn lenient_sort_puts_unavailable_last() {
        let dates = DateNormalizer::default();
        let page = vec![raw("a", "boh"), raw("b", "2025-08-02"), raw("c", "2025-08-01")];
        let collection = collect_pages(vec![Ok(page)], &dates, window(), DatePolicy::Lenient);

        let days = collection
            .records
            .iter()
            .map(|r| r.date.day())
            .collect::<Vec<_>>();
        assert_eq!(days, vec![Some(ymd(2025, 8, 1)), Some(ymd(2025, 8, 2)), None]);
        assert_eq!(collection.unavailable_kept, 1);
        assert_eq!(collection.stop, StopReason::PagesExhausted);
    }

    #[test]
    fn strict_policy_drops_unavailable() {
        let dates = DateNormalizer::default();
        let page = vec![raw("a", "boh"), raw("b", "2025-08-02")];
        let collection = collect_pages(vec![Ok(page)], &dates, window(), DatePolicy::Strict);
        assert_eq!(titles(&collection), vec!["b"]);
        assert_eq!(collection.unavailable_dropped, 1);
    }

    #[test]
    fn equal_dates_keep_page_order() {
        let dates = DateNormalizer::default();
        let pages = vec![
            Ok(vec![raw("first", "2025-08-03"), raw("second", "2025-08-02")]),
            Ok(vec![raw("third", "2025-08-03")]),
        ];
        let collection = collect_pages(pages, &dates, window(), DatePolicy::Lenient);
        assert_eq!(titles(&collection), vec!["second", "first", "third"]);
        assert_eq!(collection.pages, 2);
    }

    #[test]
    fn record_past_window_stops_everything() {
        let dates = DateNormalizer::default();
        let pages = vec![
            Ok(vec![raw("in", "2025-08-05"), raw("out", "2025-08-09"), raw("after", "2025-08-06")]),
            Ok(vec![raw("next page", "2025-08-02")]),
        ];
        let collection = collect_pages(pages, &dates, window(), DatePolicy::Lenient);
        assert_eq!(titles(&collection), vec!["in"]);
        assert_eq!(collection.stop, StopReason::WindowExceeded);
        assert_eq!(collection.pages, 1);
    }

    #[test]
    fn empty_page_stops_collection() {
        let dates = DateNormalizer::default();
        let pages = vec![
            Ok(vec![raw("a", "2025-08-02")]),
            Ok(Vec::new()),
            Ok(vec![raw("never", "2025-08-03")]),
        ];
        let collection = collect_pages(pages, &dates, window(), DatePolicy::Lenient);
        assert_eq!(titles(&collection), vec!["a"]);
        assert_eq!(collection.stop, StopReason::EmptyPage);
    }

    #[test]
    fn fetch_error_keeps_earlier_pages() {
        let dates = DateNormalizer::default();
        let pages = vec![Ok(vec![raw("a", "2025-08-02")]), Err(anyhow!("status 503"))];
        let collection = collect_pages(pages, &dates, window(), DatePolicy::Lenient);
        assert_eq!(titles(&collection), vec!["a"]);
        assert!(matches!(collection.stop, StopReason::FetchFailed(ref msg) if msg.contains("503")));
    }

    #[test]
    fn featured_event_beyond_window_does_not_stop_collection() {
        let dates = DateNormalizer::default();
        let mut pick = raw("in vetrina", "20 settembre 2025");
        pick.featured = true;
        let pages = vec![
            Ok(vec![pick, raw("a", "2 AGO"), raw("b", "3 AGO")]),
            Ok(vec![raw("c", "4 AGO")]),
        ];
        let collection = collect_pages(pages, &dates, window(), DatePolicy::Lenient);
        assert_eq!(titles(&collection), vec!["a", "b", "c"]);
        assert_eq!(collection.featured_dropped, 1);
        assert_eq!(collection.stop, StopReason::PagesExhausted);
    }

    #[test]
    fn past_events_are_dropped_without_stopping() {
        let dates = DateNormalizer::default();
        let page = vec![raw("old", "2025-07-30"), raw("new", "2025-08-04")];
        let collection = collect_pages(vec![Ok(page)], &dates, window(), DatePolicy::Lenient);
        assert_eq!(titles(&collection), vec!["new"]);
        assert_eq!(collection.past_dropped, 1);
    }
}
