//! Worker loop: one browser session, a sequence of checkpointed batches.
//!
//! Each worker owns its plan (a contiguous slice of the roster split into
//! batches), one exclusive Chrome session, and its own handle on the
//! registration cache. Companies are processed in input order; every outcome
//! is persisted through the batch checkpoint before the worker moves on, so
//! an interrupt or crash between companies never loses completed work.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::debug;

use crate::browser::{ChromeSession, RegistrySession};
use crate::cache::{cache_key, RegistrationCache};
use crate::checkpoint::{batch_is_complete, BatchCheckpoint, WorkerPlan};
use crate::config::AppConfig;
use crate::extraction::{ExtractionOutcome, ExtractionRetryEngine, ExtractionStatus};
use crate::logger::ScrapeLogger;
use crate::resolution::{MatchType, ResolutionEngine, ResolutionResult, UnresolvedReason};
use crate::roster::CompanyInput;

/// Totals reported back to main when a worker finishes.
#[derive(Debug, Clone, Default)]
pub struct WorkerSummary {
    pub worker_id: usize,
    pub companies_processed: usize,
    pub financial_records: usize,
    pub not_found: usize,
    pub batches_skipped: usize,
    pub interrupted: bool,
}

/// Everything a worker needs, moved into its blocking task.
pub struct WorkerContext {
    pub plan: WorkerPlan,
    pub config: AppConfig,
    pub resume: bool,
    pub logger: Arc<ScrapeLogger>,
}

/// Resolve and extract one company. Cache-first: a cached decision is reused
/// unless it recorded a transient search failure, which deserves another
/// try. All failures are contained in the returned outcome.
pub fn process_company<S: RegistrySession>(
    session: &mut S,
    company: &CompanyInput,
    resolution_engine: &ResolutionEngine,
    extraction_engine: &ExtractionRetryEngine,
    cache: &mut RegistrationCache,
    logger: &ScrapeLogger,
) -> ExtractionOutcome {
    let key = cache_key(&company.name, company.known_registration_id.as_deref());

    let resolution = match cache.get(&key) {
        Some(entry)
            if entry.match_type != MatchType::Unresolved(UnresolvedReason::SearchFailed) =>
        {
            logger.record_cache_hit();
            debug!("Cache hit for {}", company.name);
            ResolutionResult {
                company: company.clone(),
                registration_id: entry.registration_id.clone(),
                matched_name: entry.matched_name.clone(),
                match_type: entry.match_type,
                strategy: entry.strategy,
                attempts: Vec::new(),
            }
        }
        _ => {
            let resolution = resolution_engine.resolve(session, company);
            cache.record_resolution(&resolution);
            resolution
        }
    };

    let (records, status) = match &resolution.registration_id {
        Some(registration_id) => extraction_engine.extract(session, registration_id),
        // Unresolved companies have nothing to extract.
        None => (Vec::new(), ExtractionStatus::NoData),
    };

    ExtractionOutcome {
        resolution,
        records,
        status,
    }
}

/// A dead browser fails everything after it; these outcomes tell the worker
/// to relaunch its session before the next company.
fn session_needs_relaunch(outcome: &ExtractionOutcome) -> bool {
    if let ExtractionStatus::Error(reason) = &outcome.status {
        if reason.contains("session lost") {
            return true;
        }
    }
    matches!(
        outcome.resolution.match_type,
        MatchType::Unresolved(UnresolvedReason::SearchFailed)
    )
}

/// Run one worker to completion (or interruption). Batches already marked
/// complete are skipped when resuming; partially-written batches continue
/// from the first uncompleted company.
pub fn run_worker(ctx: WorkerContext, interrupted: Arc<AtomicBool>) -> Result<WorkerSummary> {
    let WorkerContext {
        plan,
        config,
        resume,
        logger,
    } = ctx;

    let mut summary = WorkerSummary {
        worker_id: plan.worker_id,
        ..Default::default()
    };

    let batch_dir = std::path::PathBuf::from(&config.output.batch_dir);
    let mut cache = RegistrationCache::load(&config.cache_path());
    let resolution_engine =
        ResolutionEngine::new(config.search.max_pages, config.search.similarity_threshold);
    let extraction_engine = ExtractionRetryEngine::new(
        config.retry.max_attempts,
        config.retry_extra_wait(),
        config.field_selection(),
    );

    let artifact_dir = config
        .debug
        .enabled
        .then(|| std::path::PathBuf::from(&config.debug.artifact_dir));
    let launch_session = || {
        ChromeSession::launch(config.browser.headless, config.browser_waits(), artifact_dir.clone())
    };
    let mut session = launch_session()
        .with_context(|| format!("Worker {} failed to start a browser session", plan.worker_id))?;

    logger.info(&format!(
        "[Worker {}] Starting with {} companies in {} batches",
        plan.worker_id,
        plan.company_count(),
        plan.batches.len()
    ));

    'batches: for batch in &plan.batches {
        if resume && batch_is_complete(&batch_dir, plan.worker_id, batch.batch_num, batch) {
            logger.debug(&format!(
                "[Worker {}] Batch {} already complete, skipping",
                plan.worker_id, batch.batch_num
            ));
            summary.batches_skipped += 1;
            continue;
        }

        let mut checkpoint = BatchCheckpoint::open(&batch_dir, plan.worker_id, batch.batch_num)?;
        if checkpoint.completed_count() > 0 {
            logger.info(&format!(
                "[Worker {}] Resuming batch {} ({}/{} companies already done)",
                plan.worker_id,
                batch.batch_num,
                checkpoint.completed_count(),
                batch.companies.len()
            ));
        }

        for company in &batch.companies {
            if interrupted.load(Ordering::SeqCst) {
                logger.warn(&format!(
                    "[Worker {}] Interrupt received, stopping at checkpoint boundary",
                    plan.worker_id
                ));
                summary.interrupted = true;
                break 'batches;
            }
            if checkpoint.is_completed(company) {
                continue;
            }

            logger.debug(&format!("[Worker {}] {}", plan.worker_id, company.name));
            let outcome = process_company(
                &mut session,
                company,
                &resolution_engine,
                &extraction_engine,
                &mut cache,
                &logger,
            );

            if config.debug.enabled && outcome.status != ExtractionStatus::Ok {
                session.save_screenshot(&format!(
                    "w{}_{}",
                    plan.worker_id, company.row_index
                ));
            }

            checkpoint.record(&outcome)?;
            summary.companies_processed += 1;
            logger.record_company_processed();
            if outcome.status == ExtractionStatus::Ok && !outcome.records.is_empty() {
                summary.financial_records += outcome.records.len();
                logger.record_financial_records(outcome.records.len());
            } else {
                summary.not_found += 1;
                logger.record_not_found();
            }

            if session_needs_relaunch(&outcome) {
                logger.warn(&format!(
                    "[Worker {}] Browser session unhealthy, relaunching",
                    plan.worker_id
                ));
                match launch_session() {
                    Ok(fresh) => session = fresh,
                    Err(e) => {
                        // Without a browser nothing further can run; persist
                        // what we have and bail.
                        let _ = cache.save();
                        return Err(e).with_context(|| {
                            format!("Worker {} could not relaunch its browser", plan.worker_id)
                        });
                    }
                }
            }

            std::thread::sleep(config.inter_request_delay());
        }

        if let Err(e) = cache.save() {
            logger.warn(&format!(
                "[Worker {}] Failed to save registration cache: {}",
                plan.worker_id, e
            ));
        }
    }

    if let Err(e) = cache.save() {
        logger.warn(&format!(
            "[Worker {}] Failed to save registration cache: {}",
            plan.worker_id, e
        ));
    }

    logger.info(&format!(
        "[Worker {}] Done. {} processed, {} financial records, {} not found",
        plan.worker_id, summary.companies_processed, summary.financial_records, summary.not_found
    ));

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{FinancialRow, FinancialTable, FinancialView, InteractionError, SearchView};
    use crate::cache::CacheEntry;
    use crate::extraction::{ExtractionMode, FieldSelection};
    use crate::logger::VerbosityLevel;
    use crate::resolution::SearchStrategy;
    use std::path::Path;
    use std::time::Duration;

    struct PanickingSession;

    impl RegistrySession for PanickingSession {
        fn search(&mut self, _term: &str) -> Result<SearchView, InteractionError> {
            panic!("search must not be called");
        }

        fn goto_results_page(&mut self, _page: u32) -> Result<SearchView, InteractionError> {
            panic!("pagination must not be called");
        }

        fn open_financials(
            &mut self,
            _registration_id: &str,
            _include_balance_sheet: bool,
        ) -> Result<FinancialView, InteractionError> {
            Ok(FinancialView {
                income_statement: Some(FinancialTable {
                    years: vec![2563],
                    rows: vec![FinancialRow {
                        label: "รายได้รวม".to_string(),
                        cells: vec!["123.45".to_string()],
                    }],
                }),
                balance_sheet: None,
            })
        }
    }

    fn engines() -> (ResolutionEngine, ExtractionRetryEngine) {
        (
            ResolutionEngine::new(20, 0.95),
            ExtractionRetryEngine::new(
                1,
                Duration::ZERO,
                FieldSelection {
                    mode: ExtractionMode::All,
                    income_fields: vec!["รายได้รวม".to_string()],
                    include_balance_sheet: false,
                    balance_fields: Vec::new(),
                },
            ),
        )
    }

    #[test]
    fn test_cached_resolution_skips_search() {
        let (resolution_engine, extraction_engine) = engines();
        let mut cache = RegistrationCache::load(Path::new("/nonexistent/cache.json"));
        let logger = ScrapeLogger::new(VerbosityLevel::Silent);

        let company = CompanyInput {
            name: "บริษัท เอบีซี จำกัด".to_string(),
            known_registration_id: None,
            row_index: 0,
        };
        cache.record(
            cache_key(&company.name, None),
            CacheEntry {
                registration_id: Some("0105530012345".to_string()),
                match_type: MatchType::Exact,
                strategy: Some(SearchStrategy::Term(2)),
                matched_name: None,
            },
        );

        // The panicking session proves no search traffic happens on a hit.
        let mut session = PanickingSession;
        let outcome = process_company(
            &mut session,
            &company,
            &resolution_engine,
            &extraction_engine,
            &mut cache,
            &logger,
        );

        assert_eq!(outcome.resolution.match_type, MatchType::Exact);
        assert_eq!(outcome.status, ExtractionStatus::Ok);
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn test_existing_registration_skips_search_and_extracts() {
        let (resolution_engine, extraction_engine) = engines();
        let mut cache = RegistrationCache::load(Path::new("/nonexistent/cache.json"));
        let logger = ScrapeLogger::new(VerbosityLevel::Silent);

        let company = CompanyInput {
            name: "บริษัท เอบีซี จำกัด".to_string(),
            known_registration_id: Some("0105530012345".to_string()),
            row_index: 0,
        };

        let mut session = PanickingSession;
        let outcome = process_company(
            &mut session,
            &company,
            &resolution_engine,
            &extraction_engine,
            &mut cache,
            &logger,
        );

        assert_eq!(outcome.resolution.match_type, MatchType::Existing);
        assert_eq!(outcome.records.len(), 1);
    }

    #[test]
    fn test_search_failed_outcome_triggers_relaunch() {
        let company = CompanyInput {
            name: "บริษัท เอบีซี จำกัด".to_string(),
            known_registration_id: None,
            row_index: 0,
        };
        let outcome = ExtractionOutcome {
            resolution: ResolutionResult {
                company,
                registration_id: None,
                matched_name: None,
                match_type: MatchType::Unresolved(UnresolvedReason::SearchFailed),
                strategy: None,
                attempts: Vec::new(),
            },
            records: Vec::new(),
            status: ExtractionStatus::NoData,
        };
        assert!(session_needs_relaunch(&outcome));
    }

    #[test]
    fn test_session_lost_error_triggers_relaunch() {
        let company = CompanyInput {
            name: "บริษัท เอบีซี จำกัด".to_string(),
            known_registration_id: Some("0105530012345".to_string()),
            row_index: 0,
        };
        let outcome = ExtractionOutcome {
            resolution: ResolutionResult {
                company,
                registration_id: Some("0105530012345".to_string()),
                matched_name: None,
                match_type: MatchType::Existing,
                strategy: None,
                attempts: Vec::new(),
            },
            records: Vec::new(),
            status: ExtractionStatus::Error(
                InteractionError::SessionLost("ws closed".to_string()).to_string(),
            ),
        };
        assert!(session_needs_relaunch(&outcome));

        let ordinary_timeout = ExtractionOutcome {
            status: ExtractionStatus::Error(
                InteractionError::Timeout("table".to_string()).to_string(),
            ),
            ..outcome
        };
        assert!(!session_needs_relaunch(&ordinary_timeout));
    }
}
