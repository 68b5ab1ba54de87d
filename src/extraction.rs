//! Financial statement extraction with bounded retry.
//!
//! Given a resolved registration number, the engine opens the entity's
//! financial-data view and maps the rendered tables onto the configured
//! field set. The registry renders tables lazily, so a first read often
//! comes back empty; the engine retries with a linearly growing extra wait.
//! Exhausting attempts with zero records is the legitimate terminal state
//! `NoData`. Exhausting attempts on interaction failures is `Error`, which
//! is a different thing: the entity may well have data we never saw.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::browser::{FinancialTable, InteractionError, RegistrySession};
use crate::resolution::ResolutionResult;

/// Which statement a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableType {
    IncomeStatement,
    BalanceSheet,
}

impl fmt::Display for TableType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Output files carry the registry's own table names.
        match self {
            TableType::IncomeStatement => write!(f, "งบกำไรขาดทุน"),
            TableType::BalanceSheet => write!(f, "งบแสดงฐานะการเงิน"),
        }
    }
}

/// One extracted figure: field x fiscal year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialRecord {
    pub registration_id: String,
    pub table_type: TableType,
    pub field_name: String,
    pub value: f64,
    pub fiscal_year: u16,
}

/// Terminal state of extraction for one company.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ExtractionStatus {
    Ok,
    /// Entity resolved but the registry holds no figures for it.
    NoData,
    /// The interaction layer kept failing; data may exist but was unreachable.
    Error(String),
}

impl ExtractionStatus {
    /// Reason text for the not-found output.
    pub fn failure_reason(&self) -> String {
        match self {
            ExtractionStatus::Ok => String::new(),
            ExtractionStatus::NoData => "No financial data".to_string(),
            ExtractionStatus::Error(reason) => format!("Extraction error: {}", reason),
        }
    }
}

/// Resolution plus everything extraction produced for one company.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutcome {
    pub resolution: ResolutionResult,
    pub records: Vec<FinancialRecord>,
    pub status: ExtractionStatus,
}

/// Extraction scope: which fields, from which tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMode {
    /// Every configured field from every enabled table.
    All,
    /// Only total revenue (รายได้รวม) from the income statement.
    RevenueOnly,
}

/// The configured field lists, pre-resolved from config.
#[derive(Debug, Clone)]
pub struct FieldSelection {
    pub mode: ExtractionMode,
    pub income_fields: Vec<String>,
    pub include_balance_sheet: bool,
    pub balance_fields: Vec<String>,
}

impl FieldSelection {
    /// Effective income-statement fields for the current mode.
    fn effective_income_fields(&self) -> Vec<&str> {
        match self.mode {
            ExtractionMode::RevenueOnly => vec!["รายได้รวม"],
            ExtractionMode::All => self.income_fields.iter().map(String::as_str).collect(),
        }
    }

    fn balance_sheet_enabled(&self) -> bool {
        self.mode == ExtractionMode::All && self.include_balance_sheet && !self.balance_fields.is_empty()
    }
}

/// Bounded-retry extraction driver.
pub struct ExtractionRetryEngine {
    max_attempts: u32,
    extra_wait_per_retry: Duration,
    fields: FieldSelection,
}

impl ExtractionRetryEngine {
    pub fn new(max_attempts: u32, extra_wait_per_retry: Duration, fields: FieldSelection) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            extra_wait_per_retry,
            fields,
        }
    }

    /// Extract records for a resolved registration number, retrying on empty
    /// reads and interaction failures. Attempt n waits (n-1) x extra_wait
    /// before running.
    pub fn extract<S: RegistrySession>(
        &self,
        session: &mut S,
        registration_id: &str,
    ) -> (Vec<FinancialRecord>, ExtractionStatus) {
        let mut last_error: Option<InteractionError> = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                let wait = self.extra_wait_per_retry * (attempt - 1);
                debug!(
                    "Retry {}/{} for {} (waiting {:?} extra)",
                    attempt, self.max_attempts, registration_id, wait
                );
                std::thread::sleep(wait);
            }

            match session.open_financials(registration_id, self.fields.balance_sheet_enabled()) {
                Ok(view) => {
                    last_error = None;
                    let mut records = Vec::new();
                    if let Some(table) = &view.income_statement {
                        collect_records(
                            registration_id,
                            TableType::IncomeStatement,
                            table,
                            &self.fields.effective_income_fields(),
                            &mut records,
                        );
                    }
                    if self.fields.balance_sheet_enabled() {
                        if let Some(table) = &view.balance_sheet {
                            let balance_fields: Vec<&str> =
                                self.fields.balance_fields.iter().map(String::as_str).collect();
                            collect_records(
                                registration_id,
                                TableType::BalanceSheet,
                                table,
                                &balance_fields,
                                &mut records,
                            );
                        }
                    }
                    if !records.is_empty() {
                        return (records, ExtractionStatus::Ok);
                    }
                    debug!(
                        "No records rendered for {} on attempt {}/{}",
                        registration_id, attempt, self.max_attempts
                    );
                }
                Err(e) => {
                    warn!(
                        "Extraction attempt {}/{} for {} failed: {}",
                        attempt, self.max_attempts, registration_id, e
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            Some(e) => (Vec::new(), ExtractionStatus::Error(e.to_string())),
            None => (Vec::new(), ExtractionStatus::NoData),
        }
    }
}

/// Map one rendered table onto the configured fields. Each fiscal year
/// occupies two value cells (amount, %-change); the amount sits at index
/// year_index * 2. Placeholder cells are skipped.
fn collect_records(
    registration_id: &str,
    table_type: TableType,
    table: &FinancialTable,
    fields: &[&str],
    out: &mut Vec<FinancialRecord>,
) {
    for field in fields {
        // First row whose label carries the field name wins; later rows with
        // the same substring are ignored.
        let Some(row) = table.rows.iter().find(|r| r.label.contains(field)) else {
            continue;
        };

        for (year_idx, year) in table.years.iter().enumerate() {
            let cell_idx = year_idx * 2;
            let Some(cell) = row.cells.get(cell_idx) else {
                continue;
            };
            let text = cell.trim();
            if text.is_empty() || text == "-" || text == "0.00" {
                continue;
            }
            match text.replace(',', "").parse::<f64>() {
                Ok(value) => out.push(FinancialRecord {
                    registration_id: registration_id.to_string(),
                    table_type,
                    field_name: (*field).to_string(),
                    value,
                    fiscal_year: *year,
                }),
                Err(_) => {
                    debug!("Unparseable cell '{}' for field {}", text, field);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{FinancialRow, FinancialView, SearchView};

    fn selection() -> FieldSelection {
        FieldSelection {
            mode: ExtractionMode::All,
            income_fields: vec!["รายได้รวม".to_string(), "กำไร(ขาดทุน) สุทธิ".to_string()],
            include_balance_sheet: true,
            balance_fields: vec!["สินทรัพย์รวม".to_string()],
        }
    }

    fn income_table() -> FinancialTable {
        FinancialTable {
            years: vec![2563, 2564],
            rows: vec![
                FinancialRow {
                    label: "รายได้รวม".to_string(),
                    cells: vec![
                        "6,790,765.26".to_string(),
                        "+3.4".to_string(),
                        "7,100,000.00".to_string(),
                        "+4.6".to_string(),
                    ],
                },
                FinancialRow {
                    label: "กำไร(ขาดทุน) สุทธิ".to_string(),
                    cells: vec![
                        "-".to_string(),
                        "".to_string(),
                        "512,000.55".to_string(),
                        "+1.0".to_string(),
                    ],
                },
            ],
        }
    }

    /// Session scripted per extraction attempt.
    struct AttemptSession {
        /// One entry per open_financials call.
        attempts: Vec<Result<FinancialView, InteractionError>>,
        calls: usize,
    }

    impl AttemptSession {
        fn new(attempts: Vec<Result<FinancialView, InteractionError>>) -> Self {
            Self { attempts, calls: 0 }
        }
    }

    impl RegistrySession for AttemptSession {
        fn search(&mut self, _term: &str) -> Result<SearchView, InteractionError> {
            Ok(SearchView::Empty)
        }

        fn goto_results_page(&mut self, _page: u32) -> Result<SearchView, InteractionError> {
            Ok(SearchView::Empty)
        }

        fn open_financials(
            &mut self,
            _registration_id: &str,
            _include_balance_sheet: bool,
        ) -> Result<FinancialView, InteractionError> {
            self.calls += 1;
            if self.attempts.is_empty() {
                Ok(FinancialView::default())
            } else {
                self.attempts.remove(0)
            }
        }
    }

    fn view_with_income() -> FinancialView {
        FinancialView {
            income_statement: Some(income_table()),
            balance_sheet: None,
        }
    }

    #[test]
    fn test_cell_to_year_mapping() {
        let mut out = Vec::new();
        collect_records(
            "0105530012345",
            TableType::IncomeStatement,
            &income_table(),
            &["รายได้รวม", "กำไร(ขาดทุน) สุทธิ"],
            &mut out,
        );

        // รายได้รวม has both years; net profit only 2564 (2563 is a dash).
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].field_name, "รายได้รวม");
        assert_eq!(out[0].fiscal_year, 2563);
        assert!((out[0].value - 6_790_765.26).abs() < 1e-6);
        assert_eq!(out[1].fiscal_year, 2564);
        let net = out.iter().find(|r| r.field_name.contains("สุทธิ")).unwrap();
        assert_eq!(net.fiscal_year, 2564);
    }

    #[test]
    fn test_placeholder_cells_skipped() {
        let table = FinancialTable {
            years: vec![2563],
            rows: vec![FinancialRow {
                label: "รายได้รวม".to_string(),
                cells: vec!["0.00".to_string()],
            }],
        };
        let mut out = Vec::new();
        collect_records("0", TableType::IncomeStatement, &table, &["รายได้รวม"], &mut out);
        assert!(out.is_empty());
    }

    #[test]
    fn test_success_on_third_attempt() {
        let mut session = AttemptSession::new(vec![
            Ok(FinancialView::default()),
            Ok(FinancialView::default()),
            Ok(view_with_income()),
        ]);
        let engine = ExtractionRetryEngine::new(3, Duration::ZERO, selection());

        let (records, status) = engine.extract(&mut session, "0105530012345");

        assert_eq!(status, ExtractionStatus::Ok);
        assert!(!records.is_empty());
        assert_eq!(session.calls, 3);
    }

    #[test]
    fn test_attempts_exhausted_before_data_appears() {
        // Same script, but only two attempts allowed.
        let mut session = AttemptSession::new(vec![
            Ok(FinancialView::default()),
            Ok(FinancialView::default()),
            Ok(view_with_income()),
        ]);
        let engine = ExtractionRetryEngine::new(2, Duration::ZERO, selection());

        let (records, status) = engine.extract(&mut session, "0105530012345");

        assert_eq!(status, ExtractionStatus::NoData);
        assert!(records.is_empty());
        assert_eq!(session.calls, 2);
    }

    #[test]
    fn test_interaction_failure_after_retries_is_error() {
        let mut session = AttemptSession::new(vec![
            Err(InteractionError::Timeout("t1".to_string())),
            Err(InteractionError::Timeout("t2".to_string())),
            Err(InteractionError::Timeout("t3".to_string())),
        ]);
        let engine = ExtractionRetryEngine::new(3, Duration::ZERO, selection());

        let (_, status) = engine.extract(&mut session, "0105530012345");

        match status {
            ExtractionStatus::Error(reason) => assert!(reason.contains("t3")),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_failure_then_empty_read_is_no_data() {
        // The last attempt succeeded at the interaction layer but rendered
        // nothing, so the terminal state is no-data, not error.
        let mut session = AttemptSession::new(vec![
            Err(InteractionError::Timeout("t1".to_string())),
            Ok(FinancialView::default()),
        ]);
        let engine = ExtractionRetryEngine::new(2, Duration::ZERO, selection());

        let (_, status) = engine.extract(&mut session, "0105530012345");
        assert_eq!(status, ExtractionStatus::NoData);
    }

    #[test]
    fn test_revenue_only_mode_ignores_other_fields() {
        let fields = FieldSelection {
            mode: ExtractionMode::RevenueOnly,
            income_fields: vec!["รายได้รวม".to_string(), "กำไร(ขาดทุน) สุทธิ".to_string()],
            include_balance_sheet: true,
            balance_fields: vec!["สินทรัพย์รวม".to_string()],
        };
        let mut session = AttemptSession::new(vec![Ok(view_with_income())]);
        let engine = ExtractionRetryEngine::new(1, Duration::ZERO, fields);

        let (records, status) = engine.extract(&mut session, "0105530012345");

        assert_eq!(status, ExtractionStatus::Ok);
        assert!(records.iter().all(|r| r.field_name == "รายได้รวม"));
    }

    #[test]
    fn test_balance_sheet_records_tagged() {
        let view = FinancialView {
            income_statement: Some(income_table()),
            balance_sheet: Some(FinancialTable {
                years: vec![2563],
                rows: vec![FinancialRow {
                    label: "สินทรัพย์รวม".to_string(),
                    cells: vec!["99,000.00".to_string()],
                }],
            }),
        };
        let mut session = AttemptSession::new(vec![Ok(view)]);
        let engine = ExtractionRetryEngine::new(1, Duration::ZERO, selection());

        let (records, _) = engine.extract(&mut session, "0105530012345");

        let balance: Vec<_> = records
            .iter()
            .filter(|r| r.table_type == TableType::BalanceSheet)
            .collect();
        assert_eq!(balance.len(), 1);
        assert_eq!(balance[0].table_type.to_string(), "งบแสดงฐานะการเงิน");
    }
}
