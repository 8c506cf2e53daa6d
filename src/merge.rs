use crate::config::MergeSettings;
use crate::date::{DateNormalizer, ParsedDate};
use crate::model::MergeReport;
use crate::store::{TableRows, TableStore};
use anyhow::{Context, Result, bail};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Consolidated {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Consolidated {
    pub fn digest(&self) -> Result<String> {
        let json = serde_json::to_vec(&(&self.header, &self.rows))?;
        Ok(hex::encode(Sha256::digest(json)))
    }
}

/// Reads every source table, consolidates, and overwrites the destination.
///
/// The destination is only touched once the whole result is computed, so a
/// failing precondition leaves it as it was.
pub fn merge_tables<S>(
    store: &mut S,
    settings: &MergeSettings,
    dates: &DateNormalizer,
    today: NaiveDate,
    dry_run: bool,
) -> Result<MergeReport>
where
    S: TableStore + ?Sized,
{
    let source_tables = resolve_source_tables(store, settings)?;

    let mut tables = Vec::new();
    for name in &source_tables {
        let rows = store
            .read_all_rows(name)
            .with_context(|| format!("failed to read source table {name}"))?;
        info!(table = %name, rows = rows.records.len(), "source table loaded");
        tables.push(rows);
    }

    let mut report = MergeReport {
        destination: settings.destination.clone(),
        source_tables,
        ..MergeReport::default()
    };
    let consolidated = consolidate(&tables, settings, dates, today, &mut report)?;
    report.digest = consolidated.digest()?;

    if dry_run {
        info!(rows = consolidated.rows.len(), "dry run enabled; destination not written");
        return Ok(report);
    }

    store
        .clear(&settings.destination)
        .with_context(|| format!("failed to clear destination {}", settings.destination))?;
    store
        .write_rows(&settings.destination, &consolidated.header, &consolidated.rows)
        .with_context(|| format!("failed to write destination {}", settings.destination))?;

    info!(
        destination = %settings.destination,
        rows = report.rows_written,
        "consolidated table written"
    );
    Ok(report)
}

fn resolve_source_tables<S>(store: &S, settings: &MergeSettings) -> Result<Vec<String>>
where
    S: TableStore + ?Sized,
{
    let names = store.table_names()?;
    if names.is_empty() {
        bail!("no tables available in the store");
    }

    let sources = if settings.sources.is_empty() {
        names
            .into_iter()
            .filter(|name| *name != settings.destination)
            .collect::<Vec<_>>()
    } else {
        for wanted in &settings.sources {
            if !names.contains(wanted) {
                bail!("configured source table {wanted} not found");
            }
        }
        settings.sources.clone()
    };

    if sources.is_empty() {
        bail!(
            "no source tables besides destination {}",
            settings.destination
        );
    }
    Ok(sources)
}

pub fn consolidate(
    tables: &[TableRows],
    settings: &MergeSettings,
    dates: &DateNormalizer,
    today: NaiveDate,
    report: &mut MergeReport,
) -> Result<Consolidated> {
    let mut header: Vec<String> = Vec::new();
    for table in tables {
        for column in &table.header {
            if !column.is_empty() && !header.contains(column) {
                header.push(column.clone());
            }
        }
    }

    let rows = tables
        .iter()
        .flat_map(|t| t.records.iter())
        .collect::<Vec<_>>();
    report.rows_read = rows.len();

    if rows.is_empty() {
        bail!("no data found in source tables");
    }
    for required in [&settings.title_column, &settings.date_column] {
        if !header.contains(required) {
            bail!("column {required} missing from source tables");
        }
    }

    let mut dated: Vec<(NaiveDate, &BTreeMap<String, String>)> = Vec::new();
    for row in rows {
        let raw = cell(row, &settings.date_column);
        match dates.parse(raw, today) {
            ParsedDate::Date(day) if day < today => {
                debug!(title = %cell(row, &settings.title_column), date = %day, "dropping past row");
                report.past_dropped += 1;
            }
            ParsedDate::Date(day) => dated.push((day, row)),
            ParsedDate::Unavailable { raw, note } => {
                warn!(title = %cell(row, &settings.title_column), %raw, %note, "dropping row with unparseable date");
                report.unparseable_dropped += 1;
            }
        }
    }

    dated.sort_by_key(|(day, _)| *day);

    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(dated.len());
    for (day, row) in dated {
        let date_text = dates.format(day);
        let title = cell(row, &settings.title_column);
        let key = (title.trim().to_lowercase(), date_text.trim().to_string());
        if !seen.insert(key) {
            info!(%title, date = %date_text, "duplicate row removed");
            report.duplicates_dropped += 1;
            continue;
        }

        out.push(
            header
                .iter()
                .map(|column| {
                    if *column == settings.date_column {
                        date_text.clone()
                    } else {
                        cell(row, column).to_string()
                    }
                })
                .collect(),
        );
    }

    report.rows_written = out.len();
    Ok(Consolidated { header, rows: out })
}

fn cell<'a>(row: &'a BTreeMap<String, String>, column: &str) -> &'a str {
    row.get(column).map(String::as_str).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::source_table_header;
    use crate::store::Workbook;

    fn ymd(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn row(title: &str, date: &str) -> Vec<String> {
        vec![
            title.to_string(),
            date.to_string(),
            "21:00".to_string(),
            "Udine".to_string(),
            "https://example.org".to_string(),
            "Musica".to_string(),
        ]
    }

    fn workbook(sources: &[(&str, Vec<Vec<String>>)]) -> Workbook {
        let mut wb = Workbook::default();
        wb.write_rows("Eventi", &["vecchio".to_string()], &[vec!["x".to_string()]])
            .unwrap();
        for (name, rows) in sources {
            wb.write_rows(name, &source_table_header(), rows).unwrap();
        }
        wb
    }

    fn merge(wb: &mut Workbook, today: NaiveDate) -> Result<MergeReport> {
        merge_tables(wb, &MergeSettings::default(), &DateNormalizer::default(), today, false)
    }

    fn destination(wb: &Workbook) -> Vec<(String, String)> {
        wb.read_all_rows("Eventi")
            .unwrap()
            .records
            .into_iter()
            .map(|r| (r["Titolo"].clone(), r["Data"].clone()))
            .collect()
    }

    #[test]
    fn end_to_end_collapses_duplicates_and_drops_past_rows() {
        let mut wb = workbook(&[
            ("A", vec![row("Mostra X", "01 Ago 2025"), row("Mostra X", "01 Ago 2025")]),
            ("B", vec![row("Evento Y", "31 Lug 2025")]),
        ]);
        let report = merge(&mut wb, ymd(2025, 8, 1)).unwrap();

        assert_eq!(
            destination(&wb),
            vec![("Mostra X".to_string(), "01 Ago 2025".to_string())]
        );
        assert_eq!(report.duplicates_dropped, 1);
        assert_eq!(report.past_dropped, 1);
        assert_eq!(report.source_tables, vec!["A".to_string(), "B".to_string()]);
    }

    #[test]
    fn titles_differing_in_case_and_spaces_are_one_event() {
        let mut wb = workbook(&[
            ("A", vec![row("Concerto Estate", "02 Ago 2025")]),
            ("B", vec![row("concerto estate ", "2025-08-02")]),
        ]);
        merge(&mut wb, ymd(2025, 8, 1)).unwrap();
        assert_eq!(
            destination(&wb),
            vec![("Concerto Estate".to_string(), "02 Ago 2025".to_string())]
        );
    }

    #[test]
    fn output_is_sorted_and_reformatted() {
        let mut wb = workbook(&[
            ("A", vec![row("Tardi", "10/08/2025"), row("Boh", "presto")]),
            ("B", vec![row("Presto", "45871")]),
        ]);
        let report = merge(&mut wb, ymd(2025, 8, 1)).unwrap();
        assert_eq!(
            destination(&wb),
            vec![
                ("Presto".to_string(), "02 Ago 2025".to_string()),
                ("Tardi".to_string(), "10 Ago 2025".to_string()),
            ]
        );
        assert_eq!(report.unparseable_dropped, 1);
    }

    #[test]
    fn merging_twice_is_byte_identical() {
        let mut wb = workbook(&[
            ("A", vec![row("Mostra X", "03 Ago 2025"), row("Sagra", "01 Ago 2025")]),
            ("B", vec![row("Mostra X", "03 ago 2025"), row("Cinema", "2 agosto 2025")]),
        ]);
        let first = merge(&mut wb, ymd(2025, 8, 1)).unwrap();
        let snapshot = wb.table("Eventi").cloned();
        let second = merge(&mut wb, ymd(2025, 8, 1)).unwrap();

        assert_eq!(first.digest, second.digest);
        assert_eq!(snapshot, wb.table("Eventi").cloned());
        assert_eq!(
            serde_json::to_string(&snapshot).unwrap(),
            serde_json::to_string(&wb.table("Eventi")).unwrap()
        );
    }

    #[test]
    fn header_is_union_of_source_headers() {
        let mut wb = Workbook::default();
        wb.ensure_table("Eventi").unwrap();
        wb.write_rows(
            "A",
            &["Titolo".to_string(), "Data".to_string()],
            &[vec!["Uno".to_string(), "02 Ago 2025".to_string()]],
        )
        .unwrap();
        wb.write_rows(
            "B",
            &["Titolo".to_string(), "Data".to_string(), "Luogo".to_string()],
            &[vec!["Due".to_string(), "03 Ago 2025".to_string(), "Trieste".to_string()]],
        )
        .unwrap();
        merge(&mut wb, ymd(2025, 8, 1)).unwrap();

        let table = wb.table("Eventi").unwrap();
        assert_eq!(table.header, vec!["Titolo", "Data", "Luogo"]);
        assert_eq!(table.rows[0], vec!["Uno", "02 Ago 2025", ""]);
    }

    #[test]
    fn no_data_leaves_destination_untouched() {
        let mut wb = workbook(&[("A", Vec::new())]);
        let before = wb.clone();
        assert!(merge(&mut wb, ymd(2025, 8, 1)).is_err());
        assert_eq!(before, wb);
    }

    #[test]
    fn missing_date_column_is_an_error() {
        let mut wb = Workbook::default();
        wb.ensure_table("Eventi").unwrap();
        wb.write_rows("A", &["Titolo".to_string()], &[vec!["x".to_string()]])
            .unwrap();
        let err = merge(&mut wb, ymd(2025, 8, 1)).unwrap_err();
        assert!(err.to_string().contains("Data"));
    }

    #[test]
    fn store_without_sources_is_an_error() {
        let mut wb = Workbook::default();
        wb.ensure_table("Eventi").unwrap();
        assert!(merge(&mut wb, ymd(2025, 8, 1)).is_err());
    }

    #[test]
    fn dry_run_does_not_write() {
        let mut wb = workbook(&[("A", vec![row("Mostra X", "02 Ago 2025")])]);
        let before = wb.clone();
        let report = merge_tables(
            &mut wb,
            &MergeSettings::default(),
            &DateNormalizer::default(),
            ymd(2025, 8, 1),
            true,
        )
        .unwrap();
        assert_eq!(report.rows_written, 1);
        assert_eq!(before, wb);
    }
}
