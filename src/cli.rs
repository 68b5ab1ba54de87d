use clap::Parser;

/// Command line surface. Every flag here overrides the corresponding config
/// file value; unset flags leave the layered defaults untouched.
#[derive(Parser, Debug, Default)]
#[command(name = "dbdharvest")]
#[command(about = "Extracts financial statement data for Thai companies from the DBD DataWarehouse")]
#[command(version)]
pub struct Cli {
    /// Create default configuration file at ./config/dbdharvest.toml
    #[arg(long)]
    pub init: bool,

    /// Path to config file (default: ./config/dbdharvest.toml)
    #[arg(long, value_name = "FILE")]
    pub config: Option<String>,

    /// Input roster file (.csv or .txt)
    #[arg(short, long, value_name = "FILE")]
    pub input: Option<String>,

    /// Column name containing company names (default: auto-detect)
    #[arg(short, long, value_name = "COLUMN")]
    pub column: Option<String>,

    /// Column name containing registration numbers (skips search if present)
    #[arg(short, long, value_name = "COLUMN")]
    pub reg_column: Option<String>,

    /// Include all companies, not just Thai juristic persons
    #[arg(long)]
    pub no_filter: bool,

    /// Output CSV file for financial records
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<String>,

    /// Output CSV file for unresolved / no-data companies
    #[arg(long, value_name = "FILE")]
    pub not_found_output: Option<String>,

    /// Directory for per-worker batch files
    #[arg(long, value_name = "DIR")]
    pub batch_dir: Option<String>,

    /// Overwrite existing output files without creating backups
    #[arg(short, long)]
    pub force: bool,

    /// Number of parallel browser workers
    #[arg(short, long, value_name = "N")]
    pub workers: Option<usize>,

    /// Companies per checkpointed batch
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Seconds to pause between companies
    #[arg(long, value_name = "SECS")]
    pub delay: Option<u64>,

    /// Maximum result pages to scan per search term
    #[arg(long, value_name = "N")]
    pub max_search_pages: Option<u32>,

    /// Minimum similarity score for fallback matching (0.0 - 1.0)
    #[arg(long, value_name = "SCORE")]
    pub similarity_threshold: Option<f64>,

    /// Total extraction attempts per company
    #[arg(long, value_name = "N")]
    pub max_retries: Option<u32>,

    /// Disable extraction retries (single attempt per company)
    #[arg(long, conflicts_with = "max_retries")]
    pub no_retry: bool,

    /// Show the browser window instead of running headless
    #[arg(long)]
    pub visible: bool,

    /// Save debug screenshots when extraction comes up empty
    #[arg(long)]
    pub debug: bool,

    /// Resume from existing batch files, skipping completed batches
    #[arg(long)]
    pub resume: bool,

    /// Only merge existing batch files into the final outputs
    #[arg(long)]
    pub merge_only: bool,

    /// Process only the first N companies (dry run)
    #[arg(long, value_name = "N")]
    pub limit: Option<usize>,

    /// Skip the first N roster rows
    #[arg(long, value_name = "N")]
    pub start: Option<usize>,

    /// Verbose logging (-v for detail, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Export execution logs to a file
    #[arg(long, value_name = "FILE")]
    pub log_file: Option<String>,
}

impl Cli {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(workers) = self.workers {
            if workers == 0 {
                return Err("Workers must be greater than 0".to_string());
            }
            if workers > 8 {
                return Err(
                    "Workers cannot exceed 8: each worker runs its own Chrome instance".to_string(),
                );
            }
        }
        if let Some(batch_size) = self.batch_size {
            if batch_size == 0 {
                return Err("Batch size must be greater than 0".to_string());
            }
        }
        if let Some(threshold) = self.similarity_threshold {
            if !(0.0..=1.0).contains(&threshold) {
                return Err("Similarity threshold must be between 0.0 and 1.0".to_string());
            }
        }
        if let Some(max_pages) = self.max_search_pages {
            if max_pages == 0 {
                return Err("Max search pages must be greater than 0".to_string());
            }
        }
        if let Some(max_retries) = self.max_retries {
            if max_retries == 0 {
                return Err("Max retries must be greater than 0 (use --no-retry to disable)".to_string());
            }
        }
        if let Some(limit) = self.limit {
            if limit == 0 {
                return Err("Limit must be greater than 0".to_string());
            }
        }
        Ok(())
    }
}
