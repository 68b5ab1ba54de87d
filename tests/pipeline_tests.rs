//! End-to-end pipeline tests against the simulated registry: resolution
//! through the search-term ladder, extraction, checkpoint persistence, and
//! the final merged output rows.

mod common;

use std::path::Path;
use std::time::Duration;

use common::SimulatedRegistry;
use dbdharvest::cache::RegistrationCache;
use dbdharvest::checkpoint::{plan_batches, BatchCheckpoint};
use dbdharvest::extraction::{ExtractionMode, ExtractionRetryEngine, FieldSelection};
use dbdharvest::logger::{ScrapeLogger, VerbosityLevel};
use dbdharvest::merge::merge_batches;
use dbdharvest::resolution::{MatchType, ResolutionEngine, SearchStrategy};
use dbdharvest::roster::CompanyInput;
use dbdharvest::search_terms::generate_search_terms;
use dbdharvest::worker::process_company;

fn field_selection() -> FieldSelection {
    FieldSelection {
        mode: ExtractionMode::All,
        income_fields: vec!["รายได้รวม".to_string(), "กำไร(ขาดทุน) สุทธิ".to_string()],
        include_balance_sheet: false,
        balance_fields: Vec::new(),
    }
}

fn engines() -> (ResolutionEngine, ExtractionRetryEngine) {
    (
        ResolutionEngine::new(20, 0.95),
        ExtractionRetryEngine::new(3, Duration::ZERO, field_selection()),
    )
}

fn read_rows(path: &Path) -> Vec<Vec<String>> {
    let mut reader = csv::Reader::from_path(path).unwrap();
    reader
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect()
}

/// A company whose registry entry only surfaces on the fourth search
/// variant: the full output row carries the matched strategy ordinal.
#[test]
fn test_end_to_end_exact_match_on_fourth_variant() {
    let name = "บริษัท ABC โฮลดิ้ง (ประเทศไทย) จำกัด";
    let reg = "0105536112233";

    // Ladder: full name, core, filler-stripped, parenthesis-stripped.
    let terms = generate_search_terms(name);
    assert_eq!(terms[3].ordinal, 4);
    assert_eq!(terms[3].term, "ABC โฮลดิ้ง");

    let mut registry = SimulatedRegistry::new();
    // Only the fourth variant finds the listing; its display line carries the
    // same core name, so the match is exact.
    registry.add_listing(&terms[3].term, reg, &format!("1 {} {}", reg, name));
    registry.set_income_statement(reg, &[("รายได้รวม", 2563, 6790765.26)]);

    let (resolution_engine, extraction_engine) = engines();
    let tmp = tempfile::TempDir::new().unwrap();
    let mut cache = RegistrationCache::load(&tmp.path().join("cache.json"));
    let logger = ScrapeLogger::new(VerbosityLevel::Silent);

    let company = CompanyInput {
        name: name.to_string(),
        known_registration_id: None,
        row_index: 0,
    };
    let outcome = process_company(
        &mut registry,
        &company,
        &resolution_engine,
        &extraction_engine,
        &mut cache,
        &logger,
    );

    assert_eq!(outcome.resolution.match_type, MatchType::Exact);
    assert_eq!(outcome.resolution.strategy, Some(SearchStrategy::Term(4)));
    assert_eq!(registry.search_log.len(), 4);

    // Persist and merge, then verify the exact output row.
    let batch_dir = tmp.path().join("batches");
    let mut checkpoint = BatchCheckpoint::open(&batch_dir, 1, 1).unwrap();
    checkpoint.record(&outcome).unwrap();

    let financial_out = tmp.path().join("financial.csv");
    let not_found_out = tmp.path().join("notfound.csv");
    merge_batches(&batch_dir, &financial_out, &not_found_out, false).unwrap();

    let rows = read_rows(&financial_out);
    assert_eq!(rows.len(), 1);
    assert_eq!(
        rows[0],
        vec![
            name.to_string(),
            reg.to_string(),
            "exact".to_string(),
            "4".to_string(),
            "งบกำไรขาดทุน".to_string(),
            "รายได้รวม".to_string(),
            "6790765.26".to_string(),
            "2563".to_string(),
        ]
    );

    // Not-found output exists but holds no rows.
    assert!(read_rows(&not_found_out).is_empty());
}

/// Unresolved companies land in the not-found output with their reason.
#[test]
fn test_unresolved_company_reaches_not_found_output() {
    let mut registry = SimulatedRegistry::new();
    let (resolution_engine, extraction_engine) = engines();
    let tmp = tempfile::TempDir::new().unwrap();
    let mut cache = RegistrationCache::load(&tmp.path().join("cache.json"));
    let logger = ScrapeLogger::new(VerbosityLevel::Silent);

    let company = CompanyInput {
        name: "บริษัท ไม่มีจริง จำกัด".to_string(),
        known_registration_id: None,
        row_index: 0,
    };
    let outcome = process_company(
        &mut registry,
        &company,
        &resolution_engine,
        &extraction_engine,
        &mut cache,
        &logger,
    );

    let batch_dir = tmp.path().join("batches");
    let mut checkpoint = BatchCheckpoint::open(&batch_dir, 1, 1).unwrap();
    checkpoint.record(&outcome).unwrap();

    let financial_out = tmp.path().join("financial.csv");
    let not_found_out = tmp.path().join("notfound.csv");
    merge_batches(&batch_dir, &financial_out, &not_found_out, false).unwrap();

    let rows = read_rows(&not_found_out);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], "บริษัท ไม่มีจริง จำกัด");
    assert_eq!(rows[0][4], "No search results");
    assert!(read_rows(&financial_out).is_empty());
}

/// A resolved entity with no rendered figures terminates as no-data after
/// the retry budget, and is reported with that reason.
#[test]
fn test_resolved_without_data_reports_no_data() {
    let name = "บริษัท ว่างเปล่า จำกัด";
    let reg = "0105530099999";

    let mut registry = SimulatedRegistry::new();
    registry.add_redirect("ว่างเปล่า จำกัด", reg, name);
    // No financials scripted: every extraction attempt renders nothing.

    let (resolution_engine, extraction_engine) = engines();
    let tmp = tempfile::TempDir::new().unwrap();
    let mut cache = RegistrationCache::load(&tmp.path().join("cache.json"));
    let logger = ScrapeLogger::new(VerbosityLevel::Silent);

    let company = CompanyInput {
        name: name.to_string(),
        known_registration_id: None,
        row_index: 0,
    };
    let outcome = process_company(
        &mut registry,
        &company,
        &resolution_engine,
        &extraction_engine,
        &mut cache,
        &logger,
    );

    let batch_dir = tmp.path().join("batches");
    let mut checkpoint = BatchCheckpoint::open(&batch_dir, 1, 1).unwrap();
    checkpoint.record(&outcome).unwrap();

    let financial_out = tmp.path().join("financial.csv");
    let not_found_out = tmp.path().join("notfound.csv");
    merge_batches(&batch_dir, &financial_out, &not_found_out, false).unwrap();

    let rows = read_rows(&not_found_out);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][1], reg);
    assert_eq!(rows[0][2], "exact");
    assert_eq!(rows[0][4], "No financial data");
}

/// Resolutions are cached: a second pass over the same roster performs no
/// search traffic at all.
#[test]
fn test_second_pass_resolves_from_cache() {
    let name = "บริษัท แคชได้ จำกัด";
    let reg = "0105530012345";

    let mut registry = SimulatedRegistry::new();
    registry.add_redirect("แคชได้ จำกัด", reg, name);
    registry.set_income_statement(reg, &[("รายได้รวม", 2563, 42.0)]);

    let (resolution_engine, extraction_engine) = engines();
    let tmp = tempfile::TempDir::new().unwrap();
    let cache_path = tmp.path().join("cache.json");
    let logger = ScrapeLogger::new(VerbosityLevel::Silent);

    let company = CompanyInput {
        name: name.to_string(),
        known_registration_id: None,
        row_index: 0,
    };

    {
        let mut cache = RegistrationCache::load(&cache_path);
        let outcome = process_company(
            &mut registry,
            &company,
            &resolution_engine,
            &extraction_engine,
            &mut cache,
            &logger,
        );
        assert_eq!(outcome.resolution.match_type, MatchType::Exact);
        cache.save().unwrap();
    }
    let first_pass_searches = registry.search_log.len();
    assert!(first_pass_searches > 0);

    {
        let mut cache = RegistrationCache::load(&cache_path);
        let outcome = process_company(
            &mut registry,
            &company,
            &resolution_engine,
            &extraction_engine,
            &mut cache,
            &logger,
        );
        assert_eq!(outcome.resolution.match_type, MatchType::Exact);
        assert_eq!(outcome.records.len(), 1);
    }
    assert_eq!(
        registry.search_log.len(),
        first_pass_searches,
        "cached resolution must not search again"
    );
}

/// Partitioning plus per-batch files: two workers' outputs merge into one
/// set covering the whole roster.
#[test]
fn test_two_workers_merge_covers_whole_roster() {
    let tmp = tempfile::TempDir::new().unwrap();
    let batch_dir = tmp.path().join("batches");
    let logger = ScrapeLogger::new(VerbosityLevel::Silent);
    let (resolution_engine, extraction_engine) = engines();

    let roster: Vec<CompanyInput> = (0..10)
        .map(|i| CompanyInput {
            name: format!("บริษัท ทดสอบ{:02} จำกัด", i),
            known_registration_id: Some(format!("0{:012}", i)),
            row_index: i,
        })
        .collect();

    let mut registry = SimulatedRegistry::new();
    for company in &roster {
        registry.set_income_statement(
            company.known_registration_id.as_ref().unwrap(),
            &[("รายได้รวม", 2563, company.row_index as f64 + 1.0)],
        );
    }

    for plan in plan_batches(&roster, 2, 3) {
        for batch in &plan.batches {
            let mut checkpoint =
                BatchCheckpoint::open(&batch_dir, plan.worker_id, batch.batch_num).unwrap();
            for company in &batch.companies {
                let mut cache = RegistrationCache::load(&tmp.path().join("cache.json"));
                let outcome = process_company(
                    &mut registry,
                    company,
                    &resolution_engine,
                    &extraction_engine,
                    &mut cache,
                    &logger,
                );
                checkpoint.record(&outcome).unwrap();
            }
        }
    }

    let financial_out = tmp.path().join("financial.csv");
    let not_found_out = tmp.path().join("notfound.csv");
    let summary = merge_batches(&batch_dir, &financial_out, &not_found_out, false).unwrap();

    assert_eq!(summary.financial_records, 10);
    let names: std::collections::HashSet<String> = read_rows(&financial_out)
        .into_iter()
        .map(|row| row[0].clone())
        .collect();
    assert_eq!(names.len(), 10);
}
