use crate::date::{DateNormalizer, ParsedDate};
use crate::model::{CanonicalEvent, EventDate, RawEventCandidate};
use crate::range::{RollingWindow, expand_event};
use tracing::warn;

pub fn normalize_candidate(
    raw: &RawEventCandidate,
    dates: &DateNormalizer,
    window: &RollingWindow,
) -> Vec<CanonicalEvent> {
    let template = CanonicalEvent {
        title: tidy(&raw.title),
        date: EventDate::Unavailable {
            raw: raw.date_text.clone(),
        },
        time: tidy(&raw.time),
        venue: tidy(&raw.venue),
        link: raw.link.trim().to_string(),
        category: tidy(&raw.category),
    };

    let Some(end_text) = raw.end_date_text.as_deref() else {
        let parsed = dates.parse(&raw.date_text, window.today);
        if let ParsedDate::Unavailable { note, .. } = &parsed {
            warn!(title = %template.title, raw = %raw.date_text, %note, "date unavailable");
        }
        return vec![CanonicalEvent {
            date: parsed.into(),
            ..template
        }];
    };

    match (
        dates.parse(&raw.date_text, window.today),
        dates.parse(end_text, window.today),
    ) {
        (ParsedDate::Date(start), ParsedDate::Date(end)) => {
            expand_event(&template, start, end, window)
        }
        (start, end) => {
            warn!(
                title = %template.title,
                start = %raw.date_text,
                end = %end_text,
                start_ok = start.date().is_some(),
                end_ok = end.date().is_some(),
                "dropping range with unparseable boundary"
            );
            Vec::new()
        }
    }
}

fn tidy(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}
