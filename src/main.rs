use anyhow::Result;
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use eventi::harness::{HarnessOptions, run_harness};
use eventi::pipeline::{
    MergeOptions, SyncOptions, ValidateOptions, merge_sources, sync_sources, validate_configs,
};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "eventi", about = "Regional event scraper and cross-source merger")]
struct Cli {
    #[arg(long, default_value = "configs/sources")]
    config_dir: PathBuf,

    #[arg(long, default_value = "configs/settings.toml")]
    settings: PathBuf,

    #[arg(long, default_value = "data/workbook.json")]
    workbook: PathBuf,

    /// Reference day (YYYY-MM-DD) instead of the current date.
    #[arg(long)]
    today: Option<NaiveDate>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Sync {
        #[arg(long)]
        source: Option<String>,
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    Merge {
        #[arg(long, default_value_t = false)]
        dry_run: bool,
    },
    Validate {
        #[arg(long)]
        source_file: Option<PathBuf>,
    },
    Harness,
}

fn main() -> Result<()> {
    init_tracing()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Sync { source, dry_run } => {
            let reports = sync_sources(&SyncOptions {
                config_dir: cli.config_dir,
                settings_path: cli.settings,
                workbook_path: cli.workbook,
                source,
                dry_run,
                today: cli.today,
            })?;

            for report in reports {
                if let Some(error) = &report.error {
                    warn!(source = %report.source_key, %error, "source sync failed");
                    continue;
                }
                info!(
                    source = %report.source_key,
                    table = %report.table,
                    pages = report.pages_fetched,
                    records = report.records_collected,
                    unavailable_kept = report.unavailable_kept,
                    unavailable_dropped = report.unavailable_dropped,
                    past_dropped = report.past_dropped,
                    stop = %report.stop_reason,
                    "source sync summary"
                );
            }
        }
        Commands::Merge { dry_run } => {
            let report = merge_sources(&MergeOptions {
                settings_path: cli.settings,
                workbook_path: cli.workbook,
                dry_run,
                today: cli.today,
            })?;
            info!(
                destination = %report.destination,
                read = report.rows_read,
                written = report.rows_written,
                duplicates = report.duplicates_dropped,
                past = report.past_dropped,
                unparseable = report.unparseable_dropped,
                "merge summary"
            );
        }
        Commands::Validate { source_file } => {
            let messages = validate_configs(&ValidateOptions {
                config_dir: Some(cli.config_dir),
                settings_path: Some(cli.settings),
                source_file,
            })?;
            for line in messages {
                println!("{line}");
            }
        }
        Commands::Harness => {
            let report = run_harness(&HarnessOptions {
                config_dir: cli.config_dir,
                settings_path: cli.settings,
                workbook_path: cli.workbook,
                today: cli.today,
            })?;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

fn init_tracing() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}
