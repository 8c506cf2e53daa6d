use crate::collect::collect_pages;
use crate::config::{
    LoadedSource, Settings, load_settings, load_source_file, load_sources_from_dir,
};
use crate::date::DateNormalizer;
use crate::extract::extractor_for;
use crate::fetch::fetch_pages;
use crate::merge::merge_tables;
use crate::model::{MergeReport, SourceRunReport, source_table_header};
use crate::range::RollingWindow;
use crate::store::{JsonWorkbookStore, TableStore};
use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub config_dir: PathBuf,
    pub settings_path: PathBuf,
    pub workbook_path: PathBuf,
    pub source: Option<String>,
    pub dry_run: bool,
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub settings_path: PathBuf,
    pub workbook_path: PathBuf,
    pub dry_run: bool,
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Clone)]
pub struct ValidateOptions {
    pub config_dir: Option<PathBuf>,
    pub settings_path: Option<PathBuf>,
    pub source_file: Option<PathBuf>,
}

pub fn sync_sources(options: &SyncOptions) -> Result<Vec<SourceRunReport>> {
    let settings = load_settings(&options.settings_path)?;
    let today = resolve_today(&settings, options.today)?;

    let mut sources = load_sources_from_dir(&options.config_dir)?;
    if let Some(filter) = &options.source {
        sources.retain(|s| s.config.source.key == *filter);
    }
    if sources.is_empty() {
        bail!("no matching source configurations found");
    }

    let dates = DateNormalizer::from_settings(&settings.date);
    let mut store = JsonWorkbookStore::open(&options.workbook_path);
    if !options.dry_run {
        // The consolidated table leads the workbook.
        store.ensure_table(&settings.merge.destination)?;
    }

    let mut reports = Vec::new();
    for source in sources {
        let key = source.config.source.key.clone();
        if !source.config.source.enabled {
            info!(source = %key, "source disabled; skipping");
            continue;
        }
        if source.config.table_name() == settings.merge.destination {
            bail!(
                "source {key} writes into the destination table {}",
                settings.merge.destination
            );
        }

        info!(source = %key, %today, "sync start");
        let report = match sync_source_into(&mut store, &source, &dates, today, options.dry_run) {
            Ok(report) => report,
            Err(err) => {
                warn!(source = %key, error = %format!("{err:#}"), "source failed");
                SourceRunReport {
                    source_key: key,
                    table: source.config.table_name().to_string(),
                    error: Some(format!("{err:#}")),
                    ..SourceRunReport::default()
                }
            }
        };
        reports.push(report);
    }

    if options.dry_run {
        info!("dry run enabled; workbook not written");
    }

    Ok(reports)
}

pub fn sync_source_into<S>(
    store: &mut S,
    source: &LoadedSource,
    dates: &DateNormalizer,
    today: NaiveDate,
    dry_run: bool,
) -> Result<SourceRunReport>
where
    S: TableStore + ?Sized,
{
    let config = &source.config;
    let key = config.source.key.as_str();
    let extractor = extractor_for(&config.extract.extractor)
        .ok_or_else(|| anyhow!("unknown extractor {}", config.extract.extractor))?;

    let window = RollingWindow::new(today, config.collect.window_days);
    let pages = fetch_pages(source)
        .with_context(|| format!("fetch setup failed for source {key}"))?
        .map(|doc| {
            doc.and_then(|doc| {
                extractor.extract(config, &doc).with_context(|| {
                    format!("{} failed on {}", extractor.key(), doc.source_url)
                })
            })
        });
    let collection = collect_pages(pages, dates, window, config.collect.date_policy);

    let rows = collection
        .records
        .iter()
        .map(|record| record.to_row(dates))
        .collect::<Vec<_>>();
    let table = config.table_name().to_string();

    info!(
        source = %key,
        pages = collection.pages,
        records = rows.len(),
        featured_dropped = collection.featured_dropped,
        stop = %collection.stop,
        "collection complete"
    );

    if !dry_run {
        store
            .write_rows(&table, &source_table_header(), &[])
            .with_context(|| format!("failed to reset table {table}"))?;
        store
            .append_rows(&table, &rows)
            .with_context(|| format!("failed to append rows to {table}"))?;
        info!(source = %key, %table, rows = rows.len(), "table written");
    }

    Ok(SourceRunReport {
        source_key: key.to_string(),
        table,
        pages_fetched: collection.pages,
        records_collected: rows.len(),
        unavailable_kept: collection.unavailable_kept,
        unavailable_dropped: collection.unavailable_dropped,
        past_dropped: collection.past_dropped,
        stop_reason: collection.stop.to_string(),
        error: None,
    })
}

pub fn merge_sources(options: &MergeOptions) -> Result<MergeReport> {
    let settings = load_settings(&options.settings_path)?;
    let today = resolve_today(&settings, options.today)?;
    let dates = DateNormalizer::from_settings(&settings.date);
    let mut store = JsonWorkbookStore::open(&options.workbook_path);

    merge_tables(&mut store, &settings.merge, &dates, today, options.dry_run)
        .with_context(|| format!("merge failed for {}", options.workbook_path.display()))
}

pub fn validate_configs(options: &ValidateOptions) -> Result<Vec<String>> {
    let mut messages = Vec::new();

    if let Some(path) = &options.settings_path {
        let settings = load_settings(path)?;
        messages.push(format!(
            "OK: settings (destination {}, timezone {}) ({})",
            settings.merge.destination,
            settings.timezone,
            path.display()
        ));
    }

    if let Some(file) = &options.source_file {
        let source = load_source_file(file)?;
        messages.push(describe(&source, file));
        return Ok(messages);
    }

    if let Some(dir) = &options.config_dir {
        for source in load_sources_from_dir(dir)? {
            messages.push(describe(&source, &source.path));
        }
        return Ok(messages);
    }

    bail!("either --config-dir or --source-file must be provided");
}

fn describe(source: &LoadedSource, path: &Path) -> String {
    format!(
        "OK: {} -> {} [{}] ({})",
        source.config.source.key,
        source.config.table_name(),
        source.config.extract.extractor,
        path.display()
    )
}

fn resolve_today(settings: &Settings, fixed: Option<NaiveDate>) -> Result<NaiveDate> {
    match fixed {
        Some(day) => Ok(day),
        None => settings.today(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::store::Workbook;

    fn inline_source(extractor: &str, html: &str, extra: &str) -> LoadedSource {
        let text = format!(
            r#"
            [source]
            key = "fvg.eventi"
            name = "EventiFVG"

            [fetch]
            mode = "inline"
            inline_data = '''{html}'''

            [extract]
            extractor = "{extractor}"
            {extra}
            "#
        );
        let config: SourceConfig = toml::from_str(&text).unwrap();
        config.validate().unwrap();
        LoadedSource {
            path: PathBuf::from("inline.toml"),
            config,
        }
    }

    fn tribe_row(title: &str, iso: &str) -> String {
        format!(
            r#"<div class="tribe-events-calendar-list__event-row">
              <time class="tribe-events-calendar-list__event-date-tag-datetime" datetime="{iso}"></time>
              <h3 class="tribe-events-calendar-list__event-title"><a class="tribe-events-calendar-list__event-title-link" href="https://x.it/{title}">{title}</a></h3>
            </div>"#
        )
    }

    #[test]
    fn sync_writes_sorted_rows_with_header() {
        let html = [tribe_row("dopo", "2025-08-04"), tribe_row("prima", "2025-08-02")].concat();
        let source = inline_source("tribe_events_v1", &html, "");
        let mut wb = Workbook::default();
        let today = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();

        let report =
            sync_source_into(&mut wb, &source, &DateNormalizer::default(), today, false).unwrap();

        assert_eq!(report.records_collected, 2);
        assert_eq!(report.stop_reason, "pages_exhausted");
        let table = wb.table("EventiFVG").unwrap();
        assert_eq!(table.header, source_table_header());
        assert_eq!(table.rows[0][0], "prima");
        assert_eq!(table.rows[0][1], "02 Ago 2025");
        assert_eq!(table.rows[1][0], "dopo");
    }

    #[test]
    fn resync_replaces_previous_rows() {
        let source = inline_source("tribe_events_v1", &tribe_row("uno", "2025-08-02"), "");
        let mut wb = Workbook::default();
        let today = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();
        let dates = DateNormalizer::default();

        sync_source_into(&mut wb, &source, &dates, today, false).unwrap();
        sync_source_into(&mut wb, &source, &dates, today, false).unwrap();
        assert_eq!(wb.table("EventiFVG").unwrap().rows.len(), 1);
    }

    #[test]
    fn dry_run_leaves_store_alone() {
        let source = inline_source("tribe_events_v1", &tribe_row("uno", "2025-08-02"), "");
        let mut wb = Workbook::default();
        let today = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();

        let report =
            sync_source_into(&mut wb, &source, &DateNormalizer::default(), today, true).unwrap();
        assert_eq!(report.records_collected, 1);
        assert!(wb.tables.is_empty());
    }

    #[test]
    fn strict_sources_drop_undated_rows() {
        let html = [tribe_row("ok", "2025-08-02"), tribe_row("boh", "")].concat();
        let source = inline_source("tribe_events_v1", &html, "[collect]\ndate_policy = \"strict\"");
        let mut wb = Workbook::default();
        let today = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();

        let report =
            sync_source_into(&mut wb, &source, &DateNormalizer::default(), today, false).unwrap();
        assert_eq!(report.records_collected, 1);
        assert_eq!(report.unavailable_dropped, 1);
    }

    #[test]
    fn tourism_showreel_beyond_window_keeps_cards() {
        let html = r#"
        <div class="c-events_showreel__info">
          <h2 class="c-events_showreel__title">Barcolana</h2>
          <h3>20 settembre 2025</h3>
          <h4>Trieste</h4>
        </div>
        <div class="item_info">
          <h2 class="title">Sagra</h2>
          <div class="info_rows info_date"><strong>2</strong><p>AGO</p></div>
        </div>
        <div class="item_info">
          <h2 class="title">Concerto</h2>
          <div class="info_rows info_date"><strong>3</strong><p>AGO</p></div>
        </div>"#;
        let source = inline_source("tourism_cards_v1", html, "");
        let mut wb = Workbook::default();
        let today = NaiveDate::from_ymd_opt(2025, 8, 1).unwrap();

        let report =
            sync_source_into(&mut wb, &source, &DateNormalizer::default(), today, false).unwrap();

        assert_eq!(report.records_collected, 2);
        assert_eq!(report.stop_reason, "pages_exhausted");
        let rows = &wb.table("EventiFVG").unwrap().rows;
        assert_eq!(rows[0][0], "Sagra");
        assert_eq!(rows[1][0], "Concerto");
    }
}
