//! Configuration management for dbdharvest.
//!
//! Layered precedence: built-in defaults < config file < explicit CLI
//! overrides. The embedded template at `config/dbdharvest.toml` is the single
//! source of default values; when no config file exists on disk the template
//! itself is parsed, so defaults never live in two places.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::extraction::{ExtractionMode, FieldSelection};

/// Configuration file path relative to the working directory.
pub const CONFIG_PATH: &str = "./config/dbdharvest.toml";

/// Default configuration file content.
pub const DEFAULT_CONFIG: &str = include_str!("../config/dbdharvest.toml");

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read configuration file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse configuration file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Configuration field '{field}' is invalid: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub input: InputConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub debug: DebugConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InputConfig {
    #[serde(default = "default_input_file")]
    pub file: String,
    /// Empty string means auto-detect.
    #[serde(default)]
    pub company_column: String,
    #[serde(default)]
    pub reg_column: String,
    #[serde(default = "default_true")]
    pub filter_jurisdiction: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_financial_file")]
    pub financial_file: String,
    #[serde(default = "default_not_found_file")]
    pub not_found_file: String,
    #[serde(default = "default_batch_dir")]
    pub batch_dir: String,
    #[serde(default)]
    pub force_overwrite: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_delay_secs")]
    pub delay_between_requests_secs: u64,
    #[serde(default)]
    pub start_index: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_extra_wait_secs")]
    pub extra_wait_per_retry_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BrowserConfig {
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_page_load_wait")]
    pub page_load_wait_secs: u64,
    #[serde(default = "default_tab_click_wait")]
    pub tab_click_wait_secs: u64,
    #[serde(default = "default_table_load_wait")]
    pub table_load_wait_secs: u64,
    #[serde(default = "default_extra_wait")]
    pub extra_wait_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractionConfig {
    #[serde(default = "default_mode")]
    pub mode: ExtractionMode,
    #[serde(default = "default_income_fields")]
    pub income_statement_fields: Vec<String>,
    #[serde(default = "default_true")]
    pub include_balance_sheet: bool,
    #[serde(default = "default_balance_fields")]
    pub balance_sheet_fields: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DebugConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_artifact_dir")]
    pub artifact_dir: String,
}

fn default_true() -> bool {
    true
}
fn default_input_file() -> String {
    "companies.csv".to_string()
}
fn default_financial_file() -> String {
    "dbd_financial.csv".to_string()
}
fn default_not_found_file() -> String {
    "dbd_not_found.csv".to_string()
}
fn default_batch_dir() -> String {
    "batches".to_string()
}
fn default_max_pages() -> u32 {
    20
}
fn default_similarity_threshold() -> f64 {
    0.95
}
fn default_workers() -> usize {
    1
}
fn default_batch_size() -> usize {
    20
}
fn default_delay_secs() -> u64 {
    3
}
fn default_max_attempts() -> u32 {
    3
}
fn default_extra_wait_secs() -> u64 {
    2
}
fn default_page_load_wait() -> u64 {
    10
}
fn default_tab_click_wait() -> u64 {
    4
}
fn default_table_load_wait() -> u64 {
    6
}
fn default_extra_wait() -> u64 {
    3
}
fn default_mode() -> ExtractionMode {
    ExtractionMode::All
}
fn default_artifact_dir() -> String {
    "debug".to_string()
}

fn default_income_fields() -> Vec<String> {
    [
        "รายได้หลัก",
        "รายได้รวม",
        "ต้นทุนขาย",
        "กำไร(ขาดทุน) ขั้นต้น",
        "ค่าใช้จ่ายในการขายและบริหาร",
        "รายจ่ายรวม",
        "ดอกเบี้ยจ่าย",
        "กำไร(ขาดทุน) ก่อนภาษี",
        "ภาษีเงินได้",
        "กำไร(ขาดทุน) สุทธิ",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_balance_fields() -> Vec<String> {
    [
        "ลูกหนี้การค้าสุทธิ",
        "สินค้าคงเหลือ",
        "สินทรัพย์หมุนเวียน",
        "ที่ดิน อาคารและอุปกรณ์",
        "สินทรัพย์ไม่หมุนเวียน",
        "สินทรัพย์รวม",
        "หนี้สินหมุนเวียน",
        "หนี้สินไม่หมุนเวียน",
        "หนี้สินรวม",
        "ส่วนของผู้ถือหุ้น",
        "หนี้สินรวมและส่วนของผู้ถือหุ้น",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            file: default_input_file(),
            company_column: String::new(),
            reg_column: String::new(),
            filter_jurisdiction: true,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            financial_file: default_financial_file(),
            not_found_file: default_not_found_file(),
            batch_dir: default_batch_dir(),
            force_overwrite: false,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            similarity_threshold: default_similarity_threshold(),
        }
    }
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            batch_size: default_batch_size(),
            delay_between_requests_secs: default_delay_secs(),
            start_index: 0,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            extra_wait_per_retry_secs: default_extra_wait_secs(),
        }
    }
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            page_load_wait_secs: default_page_load_wait(),
            tab_click_wait_secs: default_tab_click_wait(),
            table_load_wait_secs: default_table_load_wait(),
            extra_wait_secs: default_extra_wait(),
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            mode: ExtractionMode::All,
            income_statement_fields: default_income_fields(),
            include_balance_sheet: true,
            balance_sheet_fields: default_balance_fields(),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            artifact_dir: default_artifact_dir(),
        }
    }
}

impl AppConfig {
    /// Load from the default path, falling back to the embedded template
    /// (the built-in defaults layer) when no file exists.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path(Path::new(CONFIG_PATH))
    }

    /// Load from a specific path, or the embedded template when absent.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = if path.exists() {
            std::fs::read_to_string(path)?
        } else {
            DEFAULT_CONFIG.to_string()
        };
        let config: AppConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all configuration values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.search.similarity_threshold) {
            return Err(ConfigError::InvalidValue {
                field: "search.similarity_threshold".to_string(),
                reason: "must be between 0.0 and 1.0".to_string(),
            });
        }
        if self.search.max_pages == 0 {
            return Err(ConfigError::InvalidValue {
                field: "search.max_pages".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.processing.workers == 0 || self.processing.workers > 8 {
            return Err(ConfigError::InvalidValue {
                field: "processing.workers".to_string(),
                reason: "must be between 1 and 8 (each worker runs a Chrome instance)".to_string(),
            });
        }
        if self.processing.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "processing.batch_size".to_string(),
                reason: "must be greater than 0".to_string(),
            });
        }
        if self.extraction.mode == ExtractionMode::All
            && self.extraction.income_statement_fields.is_empty()
        {
            return Err(ConfigError::InvalidValue {
                field: "extraction.income_statement_fields".to_string(),
                reason: "must not be empty when mode = \"all\"".to_string(),
            });
        }
        Ok(())
    }

    /// Apply explicit CLI overrides on top of file/default values.
    pub fn apply_overrides(&mut self, cli: &crate::cli::Cli) {
        if let Some(input) = &cli.input {
            self.input.file = input.clone();
        }
        if let Some(column) = &cli.column {
            self.input.company_column = column.clone();
        }
        if let Some(reg_column) = &cli.reg_column {
            self.input.reg_column = reg_column.clone();
        }
        if cli.no_filter {
            self.input.filter_jurisdiction = false;
        }
        if let Some(output) = &cli.output {
            self.output.financial_file = output.clone();
        }
        if let Some(not_found) = &cli.not_found_output {
            self.output.not_found_file = not_found.clone();
        }
        if let Some(batch_dir) = &cli.batch_dir {
            self.output.batch_dir = batch_dir.clone();
        }
        if cli.force {
            self.output.force_overwrite = true;
        }
        if let Some(max_pages) = cli.max_search_pages {
            self.search.max_pages = max_pages;
        }
        if let Some(threshold) = cli.similarity_threshold {
            self.search.similarity_threshold = threshold;
        }
        if let Some(workers) = cli.workers {
            self.processing.workers = workers;
        }
        if let Some(batch_size) = cli.batch_size {
            self.processing.batch_size = batch_size;
        }
        if let Some(delay) = cli.delay {
            self.processing.delay_between_requests_secs = delay;
        }
        if let Some(start) = cli.start {
            self.processing.start_index = start;
        }
        if cli.no_retry {
            self.retry.max_attempts = 1;
        } else if let Some(max_retries) = cli.max_retries {
            self.retry.max_attempts = max_retries;
        }
        if cli.visible {
            self.browser.headless = false;
        }
        if cli.debug {
            self.debug.enabled = true;
        }
    }

    /// Column selections for the roster loader (empty string = auto-detect).
    pub fn company_column(&self) -> Option<&str> {
        if self.input.company_column.is_empty() {
            None
        } else {
            Some(&self.input.company_column)
        }
    }

    pub fn reg_column(&self) -> Option<&str> {
        if self.input.reg_column.is_empty() {
            None
        } else {
            Some(&self.input.reg_column)
        }
    }

    pub fn browser_waits(&self) -> crate::browser::BrowserWaits {
        crate::browser::BrowserWaits {
            page_load: Duration::from_secs(self.browser.page_load_wait_secs),
            tab_click: Duration::from_secs(self.browser.tab_click_wait_secs),
            table_load: Duration::from_secs(self.browser.table_load_wait_secs),
            extra: Duration::from_secs(self.browser.extra_wait_secs),
        }
    }

    pub fn field_selection(&self) -> FieldSelection {
        FieldSelection {
            mode: self.extraction.mode,
            income_fields: self.extraction.income_statement_fields.clone(),
            include_balance_sheet: self.extraction.include_balance_sheet,
            balance_fields: self.extraction.balance_sheet_fields.clone(),
        }
    }

    pub fn inter_request_delay(&self) -> Duration {
        Duration::from_secs(self.processing.delay_between_requests_secs)
    }

    pub fn retry_extra_wait(&self) -> Duration {
        Duration::from_secs(self.retry.extra_wait_per_retry_secs)
    }

    /// Registration cache location, next to the batch directory.
    pub fn cache_path(&self) -> PathBuf {
        Path::new(&self.output.batch_dir).join("registration_cache.json")
    }

    /// Write the default template to the standard location.
    pub fn create_default_config() -> Result<PathBuf, ConfigError> {
        let path = Path::new(CONFIG_PATH);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, DEFAULT_CONFIG)?;
        Ok(path.to_path_buf())
    }
}
