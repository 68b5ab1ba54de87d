//! Batch partitioning and per-company checkpointed persistence.
//!
//! The roster is split into contiguous per-worker chunks, each chunk into
//! fixed-size batches. Every batch owns three files in the batch directory:
//!
//! - `financial_w{W}_b{BBB}.csv`: extracted records
//! - `notfound_w{W}_b{BBB}.csv`: unresolved / no-data / error rows
//! - `w{W}_b{BBB}.done`: completion marker, one line per finished company
//!
//! Result rows are appended the moment a company's outcome exists, and its
//! marker line lands after the rows. A crash therefore loses at most the
//! in-flight company: on reopen, rows without a marker line are pruned and
//! that company is replayed. A batch whose marker holds every company is
//! skipped entirely on resume.

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::extraction::{ExtractionOutcome, ExtractionStatus};
use crate::roster::CompanyInput;

/// Final and batch-file header for financial records.
pub const FINANCIAL_HEADER: &[&str] = &[
    "company_name",
    "registration_number",
    "match_type",
    "search_strategy",
    "table_type",
    "field_name",
    "value",
    "year",
];

/// Final and batch-file header for unresolved / no-data rows.
pub const NOT_FOUND_HEADER: &[&str] = &[
    "company_name",
    "registration_number",
    "match_type",
    "search_strategy",
    "reason",
];

/// One batch of companies assigned to one worker.
#[derive(Debug, Clone)]
pub struct Batch {
    /// 1-based within the worker.
    pub batch_num: usize,
    pub companies: Vec<CompanyInput>,
}

/// Everything one worker is responsible for.
#[derive(Debug, Clone)]
pub struct WorkerPlan {
    /// 1-based worker id.
    pub worker_id: usize,
    pub batches: Vec<Batch>,
}

impl WorkerPlan {
    pub fn company_count(&self) -> usize {
        self.batches.iter().map(|b| b.companies.len()).sum()
    }
}

/// Partition the roster into contiguous chunks across `workers`, then each
/// chunk into batches of `batch_size`. Static assignment; no work stealing.
pub fn plan_batches(roster: &[CompanyInput], workers: usize, batch_size: usize) -> Vec<WorkerPlan> {
    let workers = workers.max(1);
    let batch_size = batch_size.max(1);

    let chunk_size = roster.len() / workers;
    let mut plans = Vec::with_capacity(workers);

    for worker_idx in 0..workers {
        let start = worker_idx * chunk_size;
        let end = if worker_idx == workers - 1 {
            roster.len()
        } else {
            start + chunk_size
        };
        let chunk = &roster[start.min(roster.len())..end.min(roster.len())];

        let batches = chunk
            .chunks(batch_size)
            .enumerate()
            .map(|(i, companies)| Batch {
                batch_num: i + 1,
                companies: companies.to_vec(),
            })
            .collect();

        plans.push(WorkerPlan {
            worker_id: worker_idx + 1,
            batches,
        });
    }

    plans
}

pub fn financial_batch_path(dir: &Path, worker_id: usize, batch_num: usize) -> PathBuf {
    dir.join(format!("financial_w{}_b{:03}.csv", worker_id, batch_num))
}

pub fn notfound_batch_path(dir: &Path, worker_id: usize, batch_num: usize) -> PathBuf {
    dir.join(format!("notfound_w{}_b{:03}.csv", worker_id, batch_num))
}

pub fn marker_path(dir: &Path, worker_id: usize, batch_num: usize) -> PathBuf {
    dir.join(format!("w{}_b{:03}.done", worker_id, batch_num))
}

/// Read the completion marker for a batch. Missing file = nothing completed.
fn load_completed(dir: &Path, worker_id: usize, batch_num: usize) -> HashSet<String> {
    let path = marker_path(dir, worker_id, batch_num);
    match std::fs::read_to_string(&path) {
        Ok(content) => content
            .lines()
            .filter_map(|line| line.split_once('\t').map(|(_, name)| name.to_string()))
            .collect(),
        Err(_) => HashSet::new(),
    }
}

/// True when every company of the batch is marked complete.
pub fn batch_is_complete(dir: &Path, worker_id: usize, batch_num: usize, batch: &Batch) -> bool {
    let completed = load_completed(dir, worker_id, batch_num);
    batch.companies.iter().all(|c| completed.contains(&c.name))
}

/// Open (or resume) one batch's checkpointed output files.
pub struct BatchCheckpoint {
    dir: PathBuf,
    worker_id: usize,
    batch_num: usize,
    completed: HashSet<String>,
}

impl BatchCheckpoint {
    /// Open a batch for writing. Rows belonging to companies without a
    /// marker line (orphans from an interrupted extraction) are pruned so
    /// a replay can never duplicate them.
    pub fn open(dir: &Path, worker_id: usize, batch_num: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create batch directory: {}", dir.display()))?;

        let completed = load_completed(dir, worker_id, batch_num);

        let checkpoint = Self {
            dir: dir.to_path_buf(),
            worker_id,
            batch_num,
            completed,
        };
        checkpoint.prune_orphans(&financial_batch_path(dir, worker_id, batch_num))?;
        checkpoint.prune_orphans(&notfound_batch_path(dir, worker_id, batch_num))?;
        Ok(checkpoint)
    }

    pub fn is_completed(&self, company: &CompanyInput) -> bool {
        self.completed.contains(&company.name)
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    /// Rewrite a batch CSV keeping only rows of completed companies.
    fn prune_orphans(&self, path: &Path) -> Result<()> {
        if !path.exists() {
            return Ok(());
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(path)
            .with_context(|| format!("Failed to read batch file: {}", path.display()))?;
        let headers = reader.headers()?.clone();

        let mut kept: Vec<csv::StringRecord> = Vec::new();
        let mut dropped = 0usize;
        for record in reader.records() {
            match record {
                Ok(record) => {
                    let name = record.get(0).unwrap_or_default();
                    if self.completed.contains(name) {
                        kept.push(record);
                    } else {
                        dropped += 1;
                    }
                }
                // A torn final line from a crash mid-append.
                Err(_) => dropped += 1,
            }
        }

        if dropped == 0 {
            return Ok(());
        }
        debug!(
            "Pruned {} orphaned rows from {} on resume",
            dropped,
            path.display()
        );

        let temp_path = path.with_extension("csv.tmp");
        {
            let mut writer = csv::Writer::from_path(&temp_path)
                .with_context(|| format!("Failed to rewrite batch file: {}", temp_path.display()))?;
            writer.write_record(&headers)?;
            for record in &kept {
                writer.write_record(record)?;
            }
            writer.flush()?;
        }
        std::fs::rename(&temp_path, path)
            .with_context(|| format!("Failed to replace batch file: {}", path.display()))?;
        Ok(())
    }

    /// Append rows to a batch CSV, writing the header when the file is new.
    fn append_rows(&self, path: &Path, header: &[&str], rows: &[Vec<String>]) -> Result<()> {
        let is_new = !path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("Failed to open batch file: {}", path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if is_new {
            writer.write_record(header)?;
        }
        for row in rows {
            writer.write_record(row)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Persist one company's outcome: result rows first, then the marker
    /// line. The marker is the durable claim that the company is done.
    pub fn record(&mut self, outcome: &ExtractionOutcome) -> Result<()> {
        let resolution = &outcome.resolution;
        let company = &resolution.company;
        let reg = resolution.registration_id.clone().unwrap_or_default();

        if outcome.status == ExtractionStatus::Ok && !outcome.records.is_empty() {
            let rows: Vec<Vec<String>> = outcome
                .records
                .iter()
                .map(|r| {
                    vec![
                        company.name.clone(),
                        reg.clone(),
                        resolution.match_type.as_column(),
                        resolution.strategy_column(),
                        r.table_type.to_string(),
                        r.field_name.clone(),
                        r.value.to_string(),
                        r.fiscal_year.to_string(),
                    ]
                })
                .collect();
            self.append_rows(
                &financial_batch_path(&self.dir, self.worker_id, self.batch_num),
                FINANCIAL_HEADER,
                &rows,
            )?;
        } else {
            let reason = if resolution.match_type.is_resolved() {
                outcome.status.failure_reason()
            } else {
                resolution.failure_reason().to_string()
            };
            let row = vec![
                company.name.clone(),
                reg,
                resolution.match_type.as_column(),
                resolution.strategy_column(),
                reason,
            ];
            self.append_rows(
                &notfound_batch_path(&self.dir, self.worker_id, self.batch_num),
                NOT_FOUND_HEADER,
                &[row],
            )?;
        }

        // Marker last: rows are only authoritative once this line exists.
        let marker = marker_path(&self.dir, self.worker_id, self.batch_num);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&marker)
            .with_context(|| format!("Failed to open marker file: {}", marker.display()))?;
        writeln!(file, "{}\t{}", company.row_index, company.name)?;
        file.sync_all()?;

        self.completed.insert(company.name.clone());
        Ok(())
    }
}

/// Remove all batch artifacts, for a fresh (non-resume) run.
pub fn clear_batch_dir(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    let mut removed = 0usize;
    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read batch directory: {}", dir.display()))?
    {
        let entry = entry?;
        let name = entry.file_name();
        let name = name.to_string_lossy().to_string();
        let is_batch_csv = (name.starts_with("financial_w") || name.starts_with("notfound_w"))
            && name.ends_with(".csv");
        let is_marker = name.starts_with('w') && name.ends_with(".done");
        if is_batch_csv || is_marker {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!("Failed to remove stale batch file {}: {}", name, e);
            } else {
                removed += 1;
            }
        }
    }
    Ok(removed)
}
