use crate::collect::DatePolicy;
use crate::date::DateStrategy;
use crate::extract::is_known_extractor;
use anyhow::{Context, Result, anyhow, bail};
use chrono::{NaiveDate, Utc};
use chrono_tz::Tz;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default)]
    pub date: DateSettings,
    #[serde(default)]
    pub merge: MergeSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            date: DateSettings::default(),
            merge: MergeSettings::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<()> {
        self.timezone_tz()?;

        if self.date.strategies.is_empty() {
            bail!("date.strategies must list at least one strategy");
        }
        if self.date.month_names.len() != 12 {
            bail!(
                "date.month_names must have 12 entries, found {}",
                self.date.month_names.len()
            );
        }
        if self.date.month_abbreviations.len() != 12 {
            bail!(
                "date.month_abbreviations must have 12 entries, found {}",
                self.date.month_abbreviations.len()
            );
        }
        if self.merge.destination.trim().is_empty() {
            bail!("merge.destination must not be empty");
        }
        if self.merge.sources.contains(&self.merge.destination) {
            bail!(
                "merge.sources must not include the destination table {}",
                self.merge.destination
            );
        }

        Ok(())
    }

    pub fn today(&self) -> Result<NaiveDate> {
        let tz = self.timezone_tz()?;
        Ok(Utc::now().with_timezone(&tz).date_naive())
    }

    fn timezone_tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|err| anyhow!("invalid timezone {}: {err}", self.timezone))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DateSettings {
    #[serde(default = "default_strategies")]
    pub strategies: Vec<DateStrategy>,
    #[serde(default = "default_unavailable_label")]
    pub unavailable_label: String,
    #[serde(default = "default_month_names")]
    pub month_names: Vec<String>,
    #[serde(default = "default_month_abbreviations")]
    pub month_abbreviations: Vec<String>,
}

impl Default for DateSettings {
    fn default() -> Self {
        Self {
            strategies: default_strategies(),
            unavailable_label: default_unavailable_label(),
            month_names: default_month_names(),
            month_abbreviations: default_month_abbreviations(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeSettings {
    #[serde(default = "default_destination")]
    pub destination: String,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default = "default_title_column")]
    pub title_column: String,
    #[serde(default = "default_date_column")]
    pub date_column: String,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            sources: Vec::new(),
            title_column: default_title_column(),
            date_column: default_date_column(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LoadedSource {
    pub path: PathBuf,
    pub config: SourceConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub source: SourceMeta,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub extract: ExtractConfig,
    #[serde(default)]
    pub map: BTreeMap<String, FieldRule>,
    #[serde(default)]
    pub collect: CollectConfig,
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.source.key.trim().is_empty() {
            bail!("source.key must not be empty");
        }
        if self.source.name.trim().is_empty() {
            bail!("source.name must not be empty");
        }
        if self.table_name().trim().is_empty() {
            bail!("source.table must not be empty");
        }

        match self.fetch.mode {
            FetchMode::Http => {
                if self.fetch.base_url.is_none() {
                    bail!("fetch.base_url is required for http mode");
                }
            }
            FetchMode::File => {
                if self.fetch.file_path.is_none() {
                    bail!("fetch.file_path is required for file mode");
                }
            }
            FetchMode::Inline => {
                if self.fetch.inline_data.is_none() {
                    bail!("fetch.inline_data is required for inline mode");
                }
            }
        }

        if self.pagination.enabled {
            if self.pagination.max_pages == 0 {
                bail!("pagination.max_pages must be at least 1");
            }
            if self.pagination.strategy == PaginationStrategy::NextLink
                && self.pagination.next_selector.is_none()
            {
                bail!("pagination.next_selector is required for next_link pagination");
            }
        }

        if !is_known_extractor(&self.extract.extractor) {
            bail!("unknown extract.extractor {}", self.extract.extractor);
        }

        if self.extract.extractor == "declarative" {
            if self.extract.root_selector.is_none() {
                bail!("extract.root_selector is required for declarative extraction");
            }
            if self.map.is_empty() {
                bail!("map section must not be empty for declarative extraction");
            }
        }

        Ok(())
    }

    pub fn table_name(&self) -> &str {
        self.source.table.as_deref().unwrap_or(&self.source.name)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceMeta {
    pub key: String,
    pub name: String,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    #[default]
    Http,
    File,
    Inline,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FetchConfig {
    #[serde(default)]
    pub mode: FetchMode,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub file_path: Option<PathBuf>,
    #[serde(default)]
    pub inline_data: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u8,
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            mode: FetchMode::Http,
            base_url: None,
            file_path: None,
            inline_data: None,
            headers: BTreeMap::new(),
            timeout_secs: default_timeout_secs(),
            retry_attempts: default_retry_attempts(),
            retry_backoff_ms: default_retry_backoff_ms(),
            user_agent: default_user_agent(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum PaginationStrategy {
    #[default]
    QueryParam,
    NextLink,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaginationConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub strategy: PaginationStrategy,
    #[serde(default = "default_page_param")]
    pub page_param: String,
    #[serde(default)]
    pub start_page: usize,
    #[serde(default = "default_true")]
    pub first_page_bare: bool,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default)]
    pub next_selector: Option<String>,
    #[serde(default = "default_delay_ms")]
    pub delay_ms: u64,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: PaginationStrategy::QueryParam,
            page_param: default_page_param(),
            start_page: 0,
            first_page_bare: true,
            max_pages: default_max_pages(),
            next_selector: None,
            delay_ms: default_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractConfig {
    #[serde(default = "default_extractor")]
    pub extractor: String,
    #[serde(default)]
    pub root_selector: Option<String>,
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            extractor: default_extractor(),
            root_selector: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct FieldRule {
    #[serde(default)]
    pub from: Option<String>,
    #[serde(rename = "const", default)]
    pub const_value: Option<String>,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub trim: bool,
    #[serde(default)]
    pub absolutize: bool,
    #[serde(default)]
    pub regex: Option<String>,
    #[serde(default)]
    pub capture: Option<usize>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CollectConfig {
    #[serde(default = "default_window_days")]
    pub window_days: u32,
    #[serde(default)]
    pub date_policy: DatePolicy,
}

impl Default for CollectConfig {
    fn default() -> Self {
        Self {
            window_days: default_window_days(),
            date_policy: DatePolicy::default(),
        }
    }
}

pub fn load_settings(path: &Path) -> Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }

    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read settings: {}", path.display()))?;
    let settings: Settings = toml::from_str(&text)
        .with_context(|| format!("failed to parse toml in {}", path.display()))?;
    settings
        .validate()
        .with_context(|| format!("invalid settings {}", path.display()))?;
    Ok(settings)
}

pub fn load_sources_from_dir(config_dir: &Path) -> Result<Vec<LoadedSource>> {
    if !config_dir.exists() {
        bail!("config dir does not exist: {}", config_dir.display());
    }

    let mut loaded = Vec::new();
    for entry in WalkDir::new(config_dir) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        if path.extension().and_then(|s| s.to_str()) != Some("toml") {
            continue;
        }

        loaded.push(load_source_file(path)?);
    }

    loaded.sort_by(|a, b| a.config.source.key.cmp(&b.config.source.key));
    Ok(loaded)
}

pub fn load_source_file(config_path: &Path) -> Result<LoadedSource> {
    let text = std::fs::read_to_string(config_path)
        .with_context(|| format!("failed to read source config: {}", config_path.display()))?;
    let config: SourceConfig = toml::from_str(&text)
        .with_context(|| format!("failed to parse toml in {}", config_path.display()))?;
    config
        .validate()
        .with_context(|| format!("invalid source config {}", config_path.display()))?;
    Ok(LoadedSource {
        path: config_path.to_path_buf(),
        config,
    })
}

pub fn resolve_path(base_config_path: &Path, maybe_relative: &Path) -> Result<PathBuf> {
    if maybe_relative.is_absolute() {
        return Ok(maybe_relative.to_path_buf());
    }

    let parent = base_config_path.parent().ok_or_else(|| {
        anyhow!(
            "source config has no parent directory: {}",
            base_config_path.display()
        )
    })?;

    Ok(parent.join(maybe_relative))
}

fn default_true() -> bool {
    true
}

fn default_timezone() -> String {
    "Europe/Rome".to_string()
}

fn default_strategies() -> Vec<DateStrategy> {
    DateStrategy::DEFAULT_ORDER.to_vec()
}

fn default_unavailable_label() -> String {
    crate::model::DATE_UNAVAILABLE.to_string()
}

fn default_month_names() -> Vec<String> {
    [
        "gennaio", "febbraio", "marzo", "aprile", "maggio", "giugno", "luglio", "agosto",
        "settembre", "ottobre", "novembre", "dicembre",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn default_month_abbreviations() -> Vec<String> {
    [
        "Gen", "Feb", "Mar", "Apr", "Mag", "Giu", "Lug", "Ago", "Set", "Ott", "Nov", "Dic",
    ]
    .iter()
    .map(ToString::to_string)
    .collect()
}

fn default_destination() -> String {
    "Eventi".to_string()
}

fn default_title_column() -> String {
    "Titolo".to_string()
}

fn default_date_column() -> String {
    "Data".to_string()
}

fn default_timeout_secs() -> u64 {
    20
}

fn default_retry_attempts() -> u8 {
    2
}

fn default_retry_backoff_ms() -> u64 {
    500
}

fn default_user_agent() -> Option<String> {
    Some("Mozilla/5.0".to_string())
}

fn default_page_param() -> String {
    "page".to_string()
}

fn default_max_pages() -> usize {
    1
}

fn default_delay_ms() -> u64 {
    2000
}

fn default_extractor() -> String {
    "declarative".to_string()
}

fn default_window_days() -> u32 {
    7
}
