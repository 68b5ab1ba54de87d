//! Final merge: batch outputs into the two result files.
//!
//! Runs after all workers finish, or standalone via `--merge-only`. Batch
//! files are concatenated in filename order, so the final row order follows
//! batch layout, not original roster order. Existing non-empty outputs are
//! renamed to timestamped backups before anything is written, unless force
//! overwrite is set. This tool has a single operator, so the check-then-
//! rename does not guard against concurrent external writers.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::{debug, info};

use crate::checkpoint::{FINANCIAL_HEADER, NOT_FOUND_HEADER};

/// What the merge produced.
#[derive(Debug, Clone, Default)]
pub struct MergeSummary {
    pub financial_records: usize,
    pub not_found: usize,
    pub financial_batches: usize,
    pub not_found_batches: usize,
    pub backups: Vec<PathBuf>,
}

/// Merge every batch file under `batch_dir` into the final outputs.
pub fn merge_batches(
    batch_dir: &Path,
    financial_out: &Path,
    not_found_out: &Path,
    force_overwrite: bool,
) -> Result<MergeSummary> {
    let mut summary = MergeSummary::default();

    // Backups must complete before any new data lands on the output paths.
    for path in [financial_out, not_found_out] {
        if let Some(backup) = backup_existing(path, force_overwrite)? {
            summary.backups.push(backup);
        }
    }

    let financial_batches = list_batch_files(batch_dir, "financial_w")?;
    summary.financial_batches = financial_batches.len();
    summary.financial_records = concat_batches(&financial_batches, financial_out, FINANCIAL_HEADER)?;
    info!(
        "Merged {} financial batches ({} records) into {}",
        summary.financial_batches,
        summary.financial_records,
        financial_out.display()
    );

    let not_found_batches = list_batch_files(batch_dir, "notfound_w")?;
    summary.not_found_batches = not_found_batches.len();
    summary.not_found = concat_batches(&not_found_batches, not_found_out, NOT_FOUND_HEADER)?;
    info!(
        "Merged {} not-found batches ({} rows) into {}",
        summary.not_found_batches,
        summary.not_found,
        not_found_out.display()
    );

    Ok(summary)
}

/// Rename an existing non-empty output to a timestamped backup path.
/// Returns the backup path when one was created.
fn backup_existing(path: &Path, force_overwrite: bool) -> Result<Option<PathBuf>> {
    if force_overwrite || !path.exists() {
        return Ok(None);
    }
    let size = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat output file: {}", path.display()))?
        .len();
    if size == 0 {
        return Ok(None);
    }

    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("output");
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("csv");
    let timestamp = Local::now().format("%Y%m%d_%H%M%S");

    let mut backup = path.with_file_name(format!("{}_backup_{}.{}", stem, timestamp, extension));
    let mut counter = 1;
    while backup.exists() {
        backup = path.with_file_name(format!(
            "{}_backup_{}_{}.{}",
            stem, timestamp, counter, extension
        ));
        counter += 1;
    }

    std::fs::rename(path, &backup)
        .with_context(|| format!("Failed to back up {} to {}", path.display(), backup.display()))?;
    info!("Backed up existing output to {}", backup.display());
    Ok(Some(backup))
}

/// Batch files with the given prefix, in filename order.
fn list_batch_files(dir: &Path, prefix: &str) -> Result<Vec<PathBuf>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read batch directory: {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(prefix) && n.ends_with(".csv"))
                .unwrap_or(false)
        })
        .collect();
    files.sort();
    Ok(files)
}

/// Write `header` then the data rows of every batch file. Returns the row
/// count. With no batch files the output still gets a valid header-only CSV.
fn concat_batches(batches: &[PathBuf], out: &Path, header: &[&str]) -> Result<usize> {
    if let Some(parent) = out.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create output directory: {}", parent.display()))?;
        }
    }

    let mut writer = csv::Writer::from_path(out)
        .with_context(|| format!("Failed to create output file: {}", out.display()))?;
    writer.write_record(header)?;

    let mut total = 0usize;
    for batch in batches {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(batch)
            .with_context(|| format!("Failed to read batch file: {}", batch.display()))?;
        for record in reader.records() {
            let record = record
                .with_context(|| format!("Malformed row in batch file: {}", batch.display()))?;
            writer.write_record(&record)?;
            total += 1;
        }
        debug!("Merged batch file {}", batch.display());
    }

    writer.flush()?;
    Ok(total)
}
