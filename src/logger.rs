use std::sync::Mutex;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use indicatif::{ProgressBar, ProgressStyle};

/// Operator-facing verbosity, from the -v flag count.
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub enum VerbosityLevel {
    Silent = 0,
    Summary = 1,
    Detailed = 2,
    Debug = 3,
}

impl VerbosityLevel {
    pub fn from_verbose_count(count: u8) -> Self {
        match count {
            0 => VerbosityLevel::Summary,
            1 => VerbosityLevel::Detailed,
            2.. => VerbosityLevel::Debug,
        }
    }
}

#[derive(Default)]
struct RunStats {
    companies_processed: usize,
    financial_records: usize,
    not_found: usize,
    cache_hits: usize,
}

/// Progress and message logging shared by main and the workers. All state is
/// behind std mutexes so it works from blocking worker threads.
pub struct ScrapeLogger {
    verbosity: VerbosityLevel,
    progress_bar: Mutex<Option<ProgressBar>>,
    stats: Mutex<RunStats>,
    log_buffer: Mutex<Vec<String>>,
    log_file_path: Option<String>,
    started: Instant,
}

impl ScrapeLogger {
    pub fn new(verbosity: VerbosityLevel) -> Self {
        Self {
            verbosity,
            progress_bar: Mutex::new(None),
            stats: Mutex::new(RunStats::default()),
            log_buffer: Mutex::new(Vec::new()),
            log_file_path: None,
            started: Instant::now(),
        }
    }

    pub fn with_log_file(verbosity: VerbosityLevel, log_file_path: String) -> Self {
        Self {
            log_file_path: Some(log_file_path),
            ..Self::new(verbosity)
        }
    }

    pub fn info(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Summary {
            self.print_message("INFO", message);
        }
    }

    pub fn warn(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Detailed {
            self.print_message("WARN", message);
        }
    }

    /// Errors are always shown regardless of verbosity.
    pub fn error(&self, message: &str) {
        self.print_message("ERROR", message);
    }

    pub fn debug(&self, message: &str) {
        if self.verbosity >= VerbosityLevel::Debug {
            self.print_message("DEBUG", message);
        }
    }

    fn print_message(&self, level: &str, message: &str) {
        let msg = format!("[{}] {}: {}", self.timestamp(), level, message);

        if self.log_file_path.is_some() {
            if let Ok(mut buffer) = self.log_buffer.lock() {
                buffer.push(msg.clone());
            }
        }

        // Route through the progress bar when active so the bar keeps its
        // position on screen.
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.println(msg);
                return;
            }
        }
        eprintln!("{}", msg);
    }

    fn timestamp(&self) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        let (h, m, s) = ((now / 3600) % 24, (now / 60) % 60, now % 60);
        format!("{:02}:{:02}:{:02}", h, m, s)
    }

    pub fn start_progress(&self, total: u64) {
        if self.verbosity == VerbosityLevel::Silent {
            return;
        }
        let pb = ProgressBar::new(total);
        pb.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );
        if let Ok(mut guard) = self.progress_bar.lock() {
            *guard = Some(pb);
        }
    }

    pub fn advance_progress(&self, delta: u64) {
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.inc(delta);
            }
        }
    }

    pub fn update_progress(&self, message: &str) {
        if let Ok(guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.as_ref() {
                pb.set_message(message.to_string());
            }
        }
    }

    pub fn finish_progress(&self, message: &str) {
        if let Ok(mut guard) = self.progress_bar.lock() {
            if let Some(pb) = guard.take() {
                pb.finish_with_message(message.to_string());
            }
        }
    }

    pub fn record_company_processed(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.companies_processed += 1;
        }
        self.advance_progress(1);
    }

    pub fn record_financial_records(&self, count: usize) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.financial_records += count;
        }
    }

    pub fn record_not_found(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.not_found += 1;
        }
    }

    pub fn record_cache_hit(&self) {
        if let Ok(mut stats) = self.stats.lock() {
            stats.cache_hits += 1;
        }
    }

    pub fn print_final_summary(&self) {
        let elapsed = self.started.elapsed();
        let stats = match self.stats.lock() {
            Ok(stats) => stats,
            Err(_) => return,
        };
        println!();
        println!("=== Run Summary ===");
        println!("Companies processed:  {}", stats.companies_processed);
        println!("Financial records:    {}", stats.financial_records);
        println!("Not found / no data:  {}", stats.not_found);
        println!("Cache hits:           {}", stats.cache_hits);
        println!("Elapsed:              {:.1}s", elapsed.as_secs_f64());
    }

    pub fn is_log_export_enabled(&self) -> bool {
        self.log_file_path.is_some()
    }

    pub fn get_log_count(&self) -> usize {
        self.log_buffer.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Write the buffered log lines to the configured file.
    pub fn export_logs(&self) -> std::io::Result<()> {
        let Some(path) = &self.log_file_path else {
            return Ok(());
        };
        let buffer = self
            .log_buffer
            .lock()
            .map_err(|_| std::io::Error::other("log buffer poisoned"))?;
        std::fs::write(path, buffer.join("\n"))
    }
}
