use crate::model::CanonicalEvent;
use chrono::{Days, NaiveDate};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RollingWindow {
    pub today: NaiveDate,
    pub days: u32,
}

impl RollingWindow {
    pub fn new(today: NaiveDate, days: u32) -> Self {
        Self { today, days }
    }

    pub fn end(&self) -> NaiveDate {
        self.today
            .checked_add_days(Days::new(u64::from(self.days)))
            .unwrap_or(NaiveDate::MAX)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.today && date <= self.end()
    }

    pub fn is_past(&self, date: NaiveDate) -> bool {
        date < self.today
    }

    pub fn exceeded_by(&self, date: NaiveDate) -> bool {
        date > self.end()
    }
}

pub fn clamp(start: NaiveDate, end: NaiveDate, window: &RollingWindow) -> Option<(NaiveDate, NaiveDate)> {
    let start = start.max(window.today);
    let end = end.min(window.end());
    (start <= end).then_some((start, end))
}

pub fn expand_days(start: NaiveDate, end: NaiveDate, window: &RollingWindow) -> Vec<NaiveDate> {
    let Some((start, end)) = clamp(start, end, window) else {
        return Vec::new();
    };
    start.iter_days().take_while(|day| *day <= end).collect()
}

pub fn expand_event(
    template: &CanonicalEvent,
    start: NaiveDate,
    end: NaiveDate,
    window: &RollingWindow,
) -> Vec<CanonicalEvent> {
    expand_days(start, end, window)
        .into_iter()
        .map(|day| template.on_day(day))
        .collect()
}
