// Allow dead code for functions that are part of the API surface but not used
// in all code paths
#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;

mod browser;
mod cache;
mod checkpoint;
mod cli;
mod config;
mod extraction;
mod logger;
mod matcher;
mod merge;
mod resolution;
mod roster;
mod search_terms;
mod similarity;
mod worker;

use cli::Cli;
use config::AppConfig;
use extraction::ExtractionMode;
use logger::{ScrapeLogger, VerbosityLevel};
use worker::{WorkerContext, WorkerSummary};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.init {
        match AppConfig::create_default_config() {
            Ok(path) => {
                println!("✅ Created default configuration file at: {}", path.display());
                println!("   Edit this file to customize settings, then run dbdharvest again.");
                return Ok(());
            }
            Err(e) => {
                eprintln!("❌ Failed to create configuration file: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = cli.validate() {
        eprintln!("❌ Invalid arguments: {}", e);
        std::process::exit(1);
    }

    // Config load failure is one of the two fatal conditions (the other is a
    // worker failing to start a browser at all).
    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_path(Path::new(path)),
        None => AppConfig::load(),
    }
    .unwrap_or_else(|e| {
        eprintln!("❌ Configuration error: {}", e);
        std::process::exit(1);
    });
    config.apply_overrides(&cli);
    if let Err(e) = config.validate() {
        eprintln!("❌ Configuration error: {}", e);
        std::process::exit(1);
    }

    let verbosity = VerbosityLevel::from_verbose_count(cli.verbose);
    let logger = Arc::new(match &cli.log_file {
        Some(path) => ScrapeLogger::with_log_file(verbosity, path.clone()),
        None => ScrapeLogger::new(verbosity),
    });

    print_run_banner(&config, &cli);

    let batch_dir = Path::new(&config.output.batch_dir).to_path_buf();
    let financial_out = Path::new(&config.output.financial_file).to_path_buf();
    let not_found_out = Path::new(&config.output.not_found_file).to_path_buf();

    if cli.merge_only {
        println!("Merging existing batches...");
        let summary = merge::merge_batches(
            &batch_dir,
            &financial_out,
            &not_found_out,
            config.output.force_overwrite,
        )?;
        print_merge_summary(&summary);
        return Ok(());
    }

    // Load the roster.
    let roster_path = Path::new(&config.input.file).to_path_buf();
    let mut roster = roster::load_roster(
        &roster_path,
        config.company_column(),
        config.reg_column(),
        config.input.filter_jurisdiction,
    )
    .with_context(|| format!("Failed to load roster from {}", roster_path.display()))?;

    let total_loaded = roster.len();
    if config.processing.start_index > 0 {
        roster = roster.split_off(config.processing.start_index.min(roster.len()));
    }
    if let Some(limit) = cli.limit {
        roster.truncate(limit);
        println!("🧪 Dry run: limited to {} companies", roster.len());
    }
    println!(
        "Loaded {} companies ({} after offset/limit)",
        total_loaded,
        roster.len()
    );
    if roster.is_empty() {
        println!("Nothing to do.");
        return Ok(());
    }

    // A fresh run starts from a clean batch directory; --resume keeps it and
    // skips whatever is already complete.
    if !cli.resume {
        let removed = checkpoint::clear_batch_dir(&batch_dir)?;
        if removed > 0 {
            logger.info(&format!("Cleared {} stale batch files", removed));
        }
    }
    std::fs::create_dir_all(&batch_dir)
        .with_context(|| format!("Failed to create batch directory: {}", batch_dir.display()))?;

    // Set by the Ctrl-C handler; workers stop at the next checkpoint boundary.
    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = interrupted.clone();
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
            eprintln!("\n⚠️  Interrupt received. Workers will stop at the next checkpoint boundary...");
        })
        .unwrap_or_else(|e| {
            eprintln!("⚠️  Warning: Failed to set Ctrl-C handler: {}", e);
        });
    }

    let plans = checkpoint::plan_batches(
        &roster,
        config.processing.workers,
        config.processing.batch_size,
    );
    logger.start_progress(roster.len() as u64);
    logger.update_progress("Processing companies...");

    // One blocking task per worker; browser work is synchronous.
    let handles: Vec<_> = plans
        .into_iter()
        .filter(|plan| plan.company_count() > 0)
        .map(|plan| {
            let ctx = WorkerContext {
                plan,
                config: config.clone(),
                resume: cli.resume,
                logger: logger.clone(),
            };
            let flag = interrupted.clone();
            tokio::task::spawn_blocking(move || worker::run_worker(ctx, flag))
        })
        .collect();

    let mut summaries: Vec<WorkerSummary> = Vec::new();
    let mut worker_failures = 0usize;
    for result in futures::future::join_all(handles).await {
        match result {
            Ok(Ok(summary)) => summaries.push(summary),
            Ok(Err(e)) => {
                worker_failures += 1;
                logger.error(&format!("Worker failed: {:#}", e));
            }
            Err(e) => {
                worker_failures += 1;
                logger.error(&format!("Worker task panicked: {}", e));
            }
        }
    }
    logger.finish_progress("Workers finished");

    let was_interrupted =
        interrupted.load(Ordering::SeqCst) || summaries.iter().any(|s| s.interrupted);
    if was_interrupted {
        println!();
        println!("⚠️  Run interrupted. Completed work is checkpointed in {}.", batch_dir.display());
        println!("   Re-run with --resume to continue, or --merge-only to merge what exists.");
        logger.print_final_summary();
        std::process::exit(130);
    }

    // Merge every batch into the final outputs, backing up anything present.
    println!();
    println!("Combining all batches...");
    let merge_summary = merge::merge_batches(
        &batch_dir,
        &financial_out,
        &not_found_out,
        config.output.force_overwrite,
    )?;
    print_merge_summary(&merge_summary);

    logger.print_final_summary();

    if logger.is_log_export_enabled() {
        match logger.export_logs() {
            Ok(()) => {
                if let Some(path) = &cli.log_file {
                    println!("📄 Execution logs exported to: {} ({} entries)", path, logger.get_log_count());
                }
            }
            Err(e) => eprintln!("⚠️  Warning: Failed to export logs: {}", e),
        }
    }

    if worker_failures > 0 {
        anyhow::bail!("{} worker(s) failed; results may be incomplete", worker_failures);
    }
    Ok(())
}

fn print_run_banner(config: &AppConfig, cli: &Cli) {
    println!("============================================================");
    println!("dbdharvest - DBD DataWarehouse financial harvester");
    println!("============================================================");
    println!();
    println!("Input:");
    println!("  - Roster file: {}", config.input.file);
    if let Some(col) = config.company_column() {
        println!("  - Name column: {}", col);
    }
    if let Some(col) = config.reg_column() {
        println!("  - Registration column: {}", col);
    }
    println!("  - Jurisdiction filter: {}", config.input.filter_jurisdiction);
    println!();
    println!("Output:");
    println!("  - Financial file: {}", config.output.financial_file);
    println!("  - Not found file: {}", config.output.not_found_file);
    println!("  - Batch directory: {}", config.output.batch_dir);
    println!();
    println!("Search:");
    println!("  - Max pages per term: {}", config.search.max_pages);
    println!(
        "  - Similarity threshold: {:.0}%",
        config.search.similarity_threshold * 100.0
    );
    println!();
    println!("Processing:");
    println!("  - Workers: {}", config.processing.workers);
    println!("  - Batch size: {}", config.processing.batch_size);
    println!(
        "  - Delay between requests: {}s",
        config.processing.delay_between_requests_secs
    );
    println!("  - Extraction attempts: {}", config.retry.max_attempts);
    println!();
    println!("Extraction:");
    match config.extraction.mode {
        ExtractionMode::RevenueOnly => println!("  - Mode: revenue only (รายได้รวม)"),
        ExtractionMode::All => {
            println!(
                "  - Mode: all ({} income statement fields)",
                config.extraction.income_statement_fields.len()
            );
            if config.extraction.include_balance_sheet {
                println!(
                    "  - Balance sheet: enabled ({} fields)",
                    config.extraction.balance_sheet_fields.len()
                );
            } else {
                println!("  - Balance sheet: disabled");
            }
        }
    }
    if cli.resume {
        println!();
        println!("📋 Resume mode: completed batches will be skipped");
    }
    println!();
}

fn print_merge_summary(summary: &merge::MergeSummary) {
    for backup in &summary.backups {
        println!("⚠️  Backed up existing output to: {}", backup.display());
    }
    println!(
        "Merged {} financial batches: {} records",
        summary.financial_batches, summary.financial_records
    );
    println!(
        "Merged {} not-found batches: {} rows",
        summary.not_found_batches, summary.not_found
    );
}
