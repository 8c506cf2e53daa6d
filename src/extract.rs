use crate::config::{FieldRule, SourceConfig};
use crate::fetch::FetchedDocument;
use crate::model::{
    CATEGORY_UNSPECIFIED, DATE_UNAVAILABLE, LINK_UNAVAILABLE, RawEventCandidate, TIME_UNAVAILABLE,
    TITLE_UNAVAILABLE, VENUE_UNAVAILABLE,
};
use anyhow::{Context, Result, anyhow};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;
use url::Url;

static SLASH_DATE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d{1,2}/\d{1,2}/\d{4}").expect("slash date regex must be valid"));

static VENUE_NOISE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[^\p{L}0-9 ,.'\-]").expect("venue cleanup regex must be valid")
});

static RANGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*dal\s+(.+?)\s+al\s+(.+?)\s*$").expect("range regex must be valid")
});

pub trait Extractor: Send + Sync {
    fn key(&self) -> &'static str;
    fn extract(&self, source: &SourceConfig, doc: &FetchedDocument)
    -> Result<Vec<RawEventCandidate>>;
}

pub const EXTRACTOR_KEYS: [&str; 5] = [
    "declarative",
    "tribe_events_v1",
    "tribe_events_v2",
    "exhibitions_range_v1",
    "tourism_cards_v1",
];

pub fn is_known_extractor(key: &str) -> bool {
    EXTRACTOR_KEYS.contains(&key)
}

pub fn extractor_for(key: &str) -> Option<Box<dyn Extractor>> {
    let extractor: Box<dyn Extractor> = match key {
        "declarative" => Box::new(DeclarativeExtractor),
        "tribe_events_v1" => Box::new(TribeEventsExtractor::IsoDateTag),
        "tribe_events_v2" => Box::new(TribeEventsExtractor::ItalianDateText),
        "exhibitions_range_v1" => Box::new(ExhibitionRangeExtractor),
        "tourism_cards_v1" => Box::new(TourismCardsExtractor),
        _ => return None,
    };
    Some(extractor)
}

struct DeclarativeExtractor;

impl Extractor for DeclarativeExtractor {
    fn key(&self) -> &'static str {
        "declarative"
    }

    fn extract(
        &self,
        source: &SourceConfig,
        doc: &FetchedDocument,
    ) -> Result<Vec<RawEventCandidate>> {
        let html = parse_html(doc);
        let root = source
            .extract
            .root_selector
            .as_deref()
            .context("extract.root_selector missing for declarative extractor")?;
        let root = selector(root)?;
        let base_url = page_base_url(doc);

        let mut out = Vec::new();
        for node in html.select(&root) {
            let raw_text = text_of(node);
            let mut fields = BTreeMap::new();
            for (field, rule) in &source.map {
                match evaluate_field_rule(field, rule, node, &fields, &raw_text, base_url.as_deref())? {
                    Some(value) => {
                        fields.insert(field.clone(), value);
                    }
                    None if !rule.optional => {
                        debug!(source = %source.source.key, field = %field, "missing non-optional field");
                    }
                    None => {}
                }
            }

            let field = |name: &str, fallback: &str| {
                fields
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| fallback.to_string())
            };
            out.push(RawEventCandidate {
                title: field("title", TITLE_UNAVAILABLE),
                date_text: field("date", DATE_UNAVAILABLE),
                end_date_text: fields.get("end_date").cloned(),
                time: field("time", TIME_UNAVAILABLE),
                venue: field("venue", VENUE_UNAVAILABLE),
                link: field("link", LINK_UNAVAILABLE),
                category: field("category", CATEGORY_UNSPECIFIED),
                featured: false,
            });
        }

        Ok(out)
    }
}

enum TribeEventsExtractor {
    IsoDateTag,
    ItalianDateText,
}

impl Extractor for TribeEventsExtractor {
    fn key(&self) -> &'static str {
        match self {
            TribeEventsExtractor::IsoDateTag => "tribe_events_v1",
            TribeEventsExtractor::ItalianDateText => "tribe_events_v2",
        }
    }

    fn extract(
        &self,
        _source: &SourceConfig,
        doc: &FetchedDocument,
    ) -> Result<Vec<RawEventCandidate>> {
        let html = parse_html(doc);
        let base_url = page_base_url(doc);
        let row_selector = match self {
            TribeEventsExtractor::IsoDateTag => "div.tribe-events-calendar-list__event-row",
            TribeEventsExtractor::ItalianDateText => "div.tribe-events-calendar-list__event-wrapper",
        };
        let rows = selector(row_selector)?;
        let title_link = selector(
            "h3.tribe-events-calendar-list__event-title a.tribe-events-calendar-list__event-title-link",
        )?;
        let date_tag = selector("time.tribe-events-calendar-list__event-date-tag-datetime")?;
        let date_start = selector("span.tribe-event-date-start")?;
        let venue = selector(
            "address.tribe-events-calendar-list__event-venue span.tribe-events-calendar-list__event-venue-title",
        )?;

        let mut out = Vec::new();
        for row in html.select(&rows) {
            let link_el = row.select(&title_link).next();
            let title = link_el
                .map(text_of)
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| TITLE_UNAVAILABLE.to_string());
            let link = link_el
                .and_then(|el| el.value().attr("href"))
                .map(|href| absolutize_url(base_url.as_deref(), href))
                .unwrap_or_else(|| LINK_UNAVAILABLE.to_string());

            let start_text = row.select(&date_start).next().map(text_of);
            let time = start_text
                .as_deref()
                .and_then(|text| text.rsplit_once('@'))
                .map(|(_, time)| time.trim().to_string())
                .filter(|t| !t.is_empty())
                .unwrap_or_else(|| TIME_UNAVAILABLE.to_string());

            let date_text = match self {
                TribeEventsExtractor::IsoDateTag => row
                    .select(&date_tag)
                    .next()
                    .and_then(|el| el.value().attr("datetime"))
                    .map(ToString::to_string),
                TribeEventsExtractor::ItalianDateText => start_text
                    .as_deref()
                    .map(|text| text.split('@').next().unwrap_or_default().trim().to_string()),
            }
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| DATE_UNAVAILABLE.to_string());

            out.push(RawEventCandidate {
                title,
                date_text,
                end_date_text: None,
                time,
                venue: first_text(row, &venue).unwrap_or_else(|| VENUE_UNAVAILABLE.to_string()),
                link,
                category: CATEGORY_UNSPECIFIED.to_string(),
                featured: false,
            });
        }

        Ok(out)
    }
}

struct ExhibitionRangeExtractor;

impl Extractor for ExhibitionRangeExtractor {
    fn key(&self) -> &'static str {
        "exhibitions_range_v1"
    }

    fn extract(
        &self,
        source: &SourceConfig,
        doc: &FetchedDocument,
    ) -> Result<Vec<RawEventCandidate>> {
        let html = parse_html(doc);
        let base_url = page_base_url(doc);
        let cards = selector(r#"a[href*="/it/mostre/"]"#)?;
        let heading = selector("h3, h4")?;
        let dates = selector("span.eventi-data")?;
        let place = selector("div.eventi-date")?;

        let mut out = Vec::new();
        for card in html.select(&cards) {
            let Some(title) = first_text(card, &heading) else {
                continue;
            };

            let spans = card.select(&dates).map(text_of).collect::<Vec<_>>();
            if spans.len() < 2 {
                debug!(source = %source.source.key, %title, "card without date range; skipping");
                continue;
            }

            let venue = first_text(card, &place)
                .or_else(|| {
                    card.parent()
                        .and_then(ElementRef::wrap)
                        .and_then(|parent| first_text(parent, &place))
                })
                .map(|text| VENUE_NOISE_RE.replace_all(&text, "").trim().to_string())
                .filter(|text| !text.is_empty())
                .unwrap_or_else(|| VENUE_UNAVAILABLE.to_string());

            let link = card
                .value()
                .attr("href")
                .map(|href| absolutize_url(base_url.as_deref(), href))
                .unwrap_or_else(|| LINK_UNAVAILABLE.to_string());

            out.push(RawEventCandidate {
                title,
                date_text: slash_date(&spans[0]),
                end_date_text: Some(slash_date(&spans[1])),
                time: TIME_UNAVAILABLE.to_string(),
                venue,
                link,
                category: "Mostre".to_string(),
                featured: false,
            });
        }

        Ok(out)
    }
}

struct TourismCardsExtractor;

impl Extractor for TourismCardsExtractor {
    fn key(&self) -> &'static str {
        "tourism_cards_v1"
    }

    fn extract(
        &self,
        _source: &SourceConfig,
        doc: &FetchedDocument,
    ) -> Result<Vec<RawEventCandidate>> {
        let html = parse_html(doc);
        let base_url = page_base_url(doc);
        let link = |node: ElementRef<'_>, css: &Selector| {
            node.select(css)
                .next()
                .and_then(|el| el.value().attr("href"))
                .map(|href| absolutize_url(base_url.as_deref(), href))
                .unwrap_or_else(|| LINK_UNAVAILABLE.to_string())
        };

        let showreel = selector("div.c-events_showreel__info")?;
        let showreel_title = selector("h2.c-events_showreel__title")?;
        let showreel_date = selector("h3")?;
        let showreel_venue = selector("h4")?;
        let showreel_link = selector("a.c-events_showreel__link")?;

        let cards = selector("div.item_info")?;
        let card_title = selector("h1.title, h2.title")?;
        let card_range = selector("span.multiple_days_string")?;
        let card_day = selector("div.info_date strong")?;
        let card_month = selector("div.info_date p")?;
        let card_venue = selector("div.info_location strong.col2")?;
        let card_category = selector("div.info_category")?;
        let any_link = selector("a[href]")?;

        let mut out = Vec::new();
        for node in html.select(&cards) {
            let (date_text, end_date_text) = match first_text(node, &card_range) {
                Some(range) => split_date_range(&range),
                None => {
                    let day = first_text(node, &card_day).unwrap_or_default();
                    let month = first_text(node, &card_month).unwrap_or_default();
                    (format!("{day} {month}").trim().to_string(), None)
                }
            };
            let category = node
                .select(&card_category)
                .next()
                .and_then(|el| el.value().attr("title"))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| CATEGORY_UNSPECIFIED.to_string());

            out.push(RawEventCandidate {
                title: first_text(node, &card_title).unwrap_or_else(|| TITLE_UNAVAILABLE.to_string()),
                date_text,
                end_date_text,
                time: TIME_UNAVAILABLE.to_string(),
                venue: first_text(node, &card_venue).unwrap_or_else(|| VENUE_UNAVAILABLE.to_string()),
                link: link(node, &any_link),
                category,
                featured: false,
            });
        }

        // Showreel picks are not in date order; they go last and never end collection.
        for node in html.select(&showreel) {
            let (date_text, end_date_text) =
                split_date_range(&first_text(node, &showreel_date).unwrap_or_default());
            out.push(RawEventCandidate {
                title: first_text(node, &showreel_title)
                    .unwrap_or_else(|| TITLE_UNAVAILABLE.to_string()),
                date_text,
                end_date_text,
                time: TIME_UNAVAILABLE.to_string(),
                venue: first_text(node, &showreel_venue)
                    .unwrap_or_else(|| VENUE_UNAVAILABLE.to_string()),
                link: link(node, &showreel_link),
                category: CATEGORY_UNSPECIFIED.to_string(),
                featured: true,
            });
        }

        Ok(out)
    }
}

pub fn split_date_range(text: &str) -> (String, Option<String>) {
    let Some(caps) = RANGE_RE.captures(text) else {
        return (text.trim().to_string(), None);
    };
    let start = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
    let end = caps.get(2).map(|m| m.as_str().trim()).unwrap_or_default();

    let start = if !start.is_empty() && start.chars().all(|c| c.is_ascii_digit()) {
        let tail = end.split_whitespace().skip(1).collect::<Vec<_>>().join(" ");
        format!("{start} {tail}").trim().to_string()
    } else {
        start.to_string()
    };

    (start, Some(end.to_string()))
}

fn slash_date(text: &str) -> String {
    SLASH_DATE_RE
        .find(text)
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| text.trim_matches(|c: char| c == '-' || c.is_whitespace()).to_string())
}

fn parse_html(doc: &FetchedDocument) -> Html {
    Html::parse_document(&String::from_utf8_lossy(&doc.body))
}

fn page_base_url(doc: &FetchedDocument) -> Option<String> {
    Url::parse(&doc.source_url).ok().map(|mut url| {
        url.set_query(None);
        url.set_fragment(None);
        url.to_string()
    })
}

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|err| anyhow!("invalid selector {css}: {err:?}"))
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(node: ElementRef<'_>, css: &Selector) -> Option<String> {
    node.select(css)
        .map(text_of)
        .find(|text| !text.is_empty())
}

fn evaluate_field_rule(
    field_name: &str,
    rule: &FieldRule,
    node: ElementRef<'_>,
    existing: &BTreeMap<String, String>,
    raw_text: &str,
    base_url: Option<&str>,
) -> Result<Option<String>> {
    let mut value = if let Some(const_value) = &rule.const_value {
        Some(const_value.clone())
    } else {
        let from = rule.from.as_deref().unwrap_or(field_name);
        evaluate_from_expression(from, node, existing, raw_text)?
    };

    if let Some(pattern) = &rule.regex
        && let Some(v) = value.take()
    {
        value = extract_with_regex(&v, pattern, rule.capture.unwrap_or(1))?;
    }

    if rule.trim {
        value = value.map(|v| v.trim().to_string());
    }

    if rule.absolutize {
        value = value.map(|v| absolutize_url(base_url, &v));
    }

    if value.as_ref().is_some_and(|v| v.is_empty()) {
        return Ok(None);
    }

    Ok(value)
}

fn evaluate_from_expression(
    expr: &str,
    node: ElementRef<'_>,
    existing: &BTreeMap<String, String>,
    raw_text: &str,
) -> Result<Option<String>> {
    if let Some(key) = expr.strip_prefix("field:") {
        return Ok(existing.get(key).cloned());
    }
    if let Some(pattern) = expr.strip_prefix("regex:") {
        return extract_with_regex(raw_text, pattern, 1);
    }
    if let Some(css) = expr.strip_prefix("css:") {
        return extract_css_value(node, css);
    }

    Ok(existing.get(expr).cloned())
}

fn extract_css_value(node: ElementRef<'_>, expression: &str) -> Result<Option<String>> {
    let (selector_text, attr) = split_selector_attr(expression);
    let css = selector(selector_text)?;

    Ok(node.select(&css).next().map(|el| match attr {
        Some(attr) => el.value().attr(attr).map(ToString::to_string).unwrap_or_default(),
        None => text_of(el),
    }))
}

fn split_selector_attr(expression: &str) -> (&str, Option<&str>) {
    if let Some((selector, attr)) = expression.rsplit_once('@')
        && !attr.is_empty()
        && !attr.contains(' ')
    {
        return (selector, Some(attr));
    }
    (expression, None)
}

fn extract_with_regex(input: &str, pattern: &str, capture: usize) -> Result<Option<String>> {
    let regex = Regex::new(pattern).with_context(|| format!("invalid regex pattern {pattern}"))?;
    let Some(caps) = regex.captures(input) else {
        return Ok(None);
    };
    let Some(value) = caps.get(capture) else {
        return Ok(None);
    };
    Ok(Some(value.as_str().trim().to_string()))
}

pub fn absolutize_url(base_url: Option<&str>, value: &str) -> String {
    if value.starts_with("http://") || value.starts_with("https://") {
        return value.to_string();
    }

    if let Some(base) = base_url
        && let Ok(base_url) = Url::parse(base)
        && let Ok(joined) = base_url.join(value)
    {
        return joined.to_string();
    }

    value.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(url: &str, html: &str) -> FetchedDocument {
        FetchedDocument {
            source_url: url.to_string(),
            body: html.as_bytes().to_vec(),
            page_index: 0,
        }
    }

    fn source(extra: &str) -> SourceConfig {
        toml::from_str(&format!(
            r#"
            [source]
            key = "test"
            name = "Test"

            [fetch]
            mode = "inline"
            inline_data = ""
            {extra}
            "#
        ))
        .unwrap()
    }

    #[test]
    fn tribe_v1_reads_iso_tag_and_time() {
        let html = r#"
        <div class="tribe-common-g-row tribe-events-calendar-list__event-row">
          <time class="tribe-events-calendar-list__event-date-tag-datetime" datetime="2025-08-02"></time>
          <time class="tribe-events-calendar-list__event-datetime">
            <span class="tribe-event-date-start">2 Agosto @ 21:00</span>
          </time>
          <h3 class="tribe-events-calendar-list__event-title">
            <a class="tribe-events-calendar-list__event-title-link" href="/evento/concerto/">Concerto  in piazza</a>
          </h3>
          <address class="tribe-events-calendar-list__event-venue">
            <span class="tribe-events-calendar-list__event-venue-title">Piazza Libertà</span>
          </address>
        </div>"#;
        let out = extractor_for("tribe_events_v1")
            .unwrap()
            .extract(&source(""), &doc("https://www.example.it/eventi/", html))
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].title, "Concerto in piazza");
        assert_eq!(out[0].date_text, "2025-08-02");
        assert_eq!(out[0].time, "21:00");
        assert_eq!(out[0].venue, "Piazza Libertà");
        assert_eq!(out[0].link, "https://www.example.it/evento/concerto/");
        assert_eq!(out[0].category, CATEGORY_UNSPECIFIED);
    }

    #[test]
    fn tribe_v2_reads_italian_text() {
        let html = r#"
        <div class="tribe-events-calendar-list__event-wrapper">
          <span class="tribe-event-date-start">Novembre 23, 2026 @ 21:00</span>
          <h3 class="tribe-events-calendar-list__event-title">
            <a class="tribe-events-calendar-list__event-title-link" href="https://x.it/e">Opera</a>
          </h3>
        </div>"#;
        let out = extractor_for("tribe_events_v2")
            .unwrap()
            .extract(&source(""), &doc("https://x.it/", html))
            .unwrap();
        assert_eq!(out[0].date_text, "Novembre 23, 2026");
        assert_eq!(out[0].time, "21:00");
        assert_eq!(out[0].venue, VENUE_UNAVAILABLE);
    }

    #[test]
    fn exhibitions_carry_a_range() {
        let html = r#"
        <div class="card">
          <a href="/it/mostre/friuli/mostra-x">
            <h4>Mostra X</h4>
            <span class="eventi-data">dal 01/06/2025</span>
            <span class="eventi-data"> - 30/09/2025</span>
          </a>
          <div class="eventi-date">★ Villa Manin, Passariano</div>
        </div>
        <a href="/it/mostre/senza-date"><h4>Senza date</h4></a>"#;
        let out = extractor_for("exhibitions_range_v1")
            .unwrap()
            .extract(&source(""), &doc("https://www.arte.it/it/mostre/friuli", html))
            .unwrap();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].date_text, "01/06/2025");
        assert_eq!(out[0].end_date_text.as_deref(), Some("30/09/2025"));
        assert_eq!(out[0].venue, "Villa Manin, Passariano");
        assert_eq!(out[0].link, "https://www.arte.it/it/mostre/friuli/mostra-x");
    }

    #[test]
    fn tourism_cards_handle_single_days_and_ranges() {
        let html = r#"
        <div class="c-events_showreel__info">
          <h2 class="c-events_showreel__title">Festa del vino</h2>
          <h3>3 agosto 2025</h3>
          <h4>Cormons</h4>
          <a class="c-events_showreel__link" href="/eventi/festa-vino">vai</a>
        </div>
        <div class="item_info">
          <a href="/eventi/sagra"></a>
          <h2 class="title">Sagra</h2>
          <div class="info_rows info_date"><strong>13</strong><p>AGO</p></div>
          <div class="info_rows info_location"><strong class="col2">Udine</strong></div>
          <div class="info_rows info_category" title="Enogastronomia"></div>
        </div>
        <div class="item_info">
          <a href="/eventi/rassegna"></a>
          <h2 class="title">Rassegna</h2>
          <span class="multiple_days_string">dal 2 al 5 agosto</span>
        </div>"#;
        let out = extractor_for("tourism_cards_v1")
            .unwrap()
            .extract(&source(""), &doc("https://www.turismo.it/eventi?page=1", html))
            .unwrap();

        assert_eq!(out.len(), 3);
        assert_eq!(out[0].date_text, "13 AGO");
        assert_eq!(out[0].category, "Enogastronomia");
        assert_eq!(out[1].date_text, "2 agosto");
        assert_eq!(out[1].end_date_text.as_deref(), Some("5 agosto"));
        assert_eq!(out[1].category, CATEGORY_UNSPECIFIED);
        assert_eq!(out[2].date_text, "3 agosto 2025");
        assert_eq!(out[2].link, "https://www.turismo.it/eventi/festa-vino");
        assert!(out[2].featured);
        assert!(!out[0].featured && !out[1].featured);
    }

    #[test]
    fn declarative_rules_map_fields() {
        let config = source(
            r#"
            [extract]
            extractor = "declarative"
            root_selector = "li.event"

            [map.title]
            from = "css:h2"

            [map.date]
            from = "css:.when"
            regex = "(\\d{2}/\\d{2}/\\d{4})"

            [map.link]
            from = "css:a@href"
            absolutize = true

            [map.category]
            const = "Teatro"
            "#,
        );
        let html = r#"<ul><li class="event"><h2>Amleto</h2><span class="when">Sabato 02/08/2025 ore 20</span><a href="amleto">x</a></li></ul>"#;
        let out = extractor_for("declarative")
            .unwrap()
            .extract(&config, &doc("https://teatro.it/stagione/", html))
            .unwrap();

        assert_eq!(out[0].title, "Amleto");
        assert_eq!(out[0].date_text, "02/08/2025");
        assert_eq!(out[0].link, "https://teatro.it/stagione/amleto");
        assert_eq!(out[0].category, "Teatro");
        assert_eq!(out[0].time, TIME_UNAVAILABLE);
    }

    #[test]
    fn range_text_borrows_month_for_bare_start() {
        assert_eq!(
            split_date_range("dal 2 al 5 agosto 2025"),
            ("2 agosto 2025".to_string(), Some("5 agosto 2025".to_string()))
        );
        assert_eq!(
            split_date_range("Dal 30 luglio al 2 agosto"),
            ("30 luglio".to_string(), Some("2 agosto".to_string()))
        );
        assert_eq!(split_date_range("13 NOV"), ("13 NOV".to_string(), None));
    }

    #[test]
    fn empty_page_yields_no_candidates() {
        for key in EXTRACTOR_KEYS.iter().filter(|k| **k != "declarative") {
            let out = extractor_for(key)
                .unwrap()
                .extract(&source(""), &doc("https://x.it/", "<html><body></body></html>"))
                .unwrap();
            assert!(out.is_empty(), "{key}");
        }
    }
}
