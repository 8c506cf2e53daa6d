use crate::pipeline::{MergeOptions, SyncOptions, merge_sources, sync_sources};
use anyhow::Result;
use chrono::NaiveDate;
use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct HarnessOptions {
    pub config_dir: PathBuf,
    pub settings_path: PathBuf,
    pub workbook_path: PathBuf,
    pub today: Option<NaiveDate>,
}

#[derive(Debug, Clone, Serialize)]
pub struct HarnessReport {
    pub sources: usize,
    pub sources_failed: usize,
    pub records_collected: usize,
    pub first_merge_rows: usize,
    pub first_merge_duplicates: usize,
    pub first_merge_digest: String,
    pub second_merge_rows: usize,
    pub second_merge_digest: String,
    pub idempotent: bool,
}

pub fn run_harness(options: &HarnessOptions) -> Result<HarnessReport> {
    if options.workbook_path.exists() {
        std::fs::remove_file(&options.workbook_path)?;
    }

    let synced = sync_sources(&SyncOptions {
        config_dir: options.config_dir.clone(),
        settings_path: options.settings_path.clone(),
        workbook_path: options.workbook_path.clone(),
        source: None,
        dry_run: false,
        today: options.today,
    })?;

    let merge = MergeOptions {
        settings_path: options.settings_path.clone(),
        workbook_path: options.workbook_path.clone(),
        dry_run: false,
        today: options.today,
    };
    let first = merge_sources(&merge)?;
    let second = merge_sources(&merge)?;

    Ok(HarnessReport {
        sources: synced.len(),
        sources_failed: synced.iter().filter(|r| r.error.is_some()).count(),
        records_collected: synced.iter().map(|r| r.records_collected).sum(),
        first_merge_rows: first.rows_written,
        first_merge_duplicates: first.duplicates_dropped,
        idempotent: first.digest == second.digest,
        first_merge_digest: first.digest,
        second_merge_rows: second.rows_written,
        second_merge_digest: second.digest,
    })
}
