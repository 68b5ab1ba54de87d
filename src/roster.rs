//! Roster loading: company names plus optional registration numbers.
//!
//! Supports:
//! - CSV files with a named company column, a `company_name` column, or the
//!   first column as fallback (optional registration-number column)
//! - Plain text files with one company name per line
//! - A jurisdiction filter keeping only Thai juristic persons
//! - Deduplication by name, keeping any registration number seen
//!
//! Malformed rows (empty name, invalid registration number) never abort the
//! load; they are skipped or degraded with a logged reason.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Registration numbers are 13 digits starting with 0.
static REG_NUMBER_FORMAT: Lazy<Regex> = Lazy::new(|| Regex::new(r"^0\d{12}$").unwrap());

/// Name markers for the Thai jurisdiction filter.
const JURISDICTION_MARKERS: &[&str] = &["จำกัด", "มหาชน", "ห้างหุ้นส่วน"];

/// One roster row. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyInput {
    pub name: String,
    pub known_registration_id: Option<String>,
    /// Position in the deduplicated, sorted roster.
    pub row_index: usize,
}

/// True when a name marks a Thai juristic person.
pub fn in_jurisdiction(name: &str) -> bool {
    JURISDICTION_MARKERS.iter().any(|m| name.contains(m))
}

/// Validate a registration number, returning None for malformed values.
fn validate_reg_number(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if REG_NUMBER_FORMAT.is_match(trimmed) {
        Some(trimmed.to_string())
    } else {
        warn!("Ignoring malformed registration number: {}", trimmed);
        None
    }
}

/// Load the roster from a CSV or plain-text file. The result is
/// deduplicated by name (keeping any registration number), sorted, and
/// indexed.
pub fn load_roster(
    path: &Path,
    company_column: Option<&str>,
    reg_column: Option<&str>,
    filter_jurisdiction: bool,
) -> Result<Vec<CompanyInput>> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();

    // BTreeMap gives the deterministic sorted order the partitioner relies on.
    let mut companies: BTreeMap<String, Option<String>> = BTreeMap::new();
    let mut skipped = 0usize;

    match extension.as_str() {
        "csv" => {
            let mut reader = csv::ReaderBuilder::new()
                .has_headers(true)
                .flexible(true)
                .from_path(path)
                .with_context(|| format!("Failed to read roster: {}", path.display()))?;

            let headers = reader
                .headers()
                .context("Failed to read roster headers")?
                .clone();

            let name_idx = match company_column {
                Some(col) => headers
                    .iter()
                    .position(|h| h == col)
                    .with_context(|| format!("Company column '{}' not found in roster", col))?,
                None => headers
                    .iter()
                    .position(|h| h == "company_name")
                    .unwrap_or(0),
            };

            let reg_idx = match reg_column {
                Some(col) => {
                    let idx = headers.iter().position(|h| h == col);
                    if idx.is_none() {
                        warn!("Registration column '{}' not found in roster", col);
                    }
                    idx
                }
                None => None,
            };

            for record in reader.records() {
                let record = record.context("Failed to parse roster record")?;
                let name = record.get(name_idx).map(str::trim).unwrap_or_default();
                if name.is_empty() {
                    skipped += 1;
                    debug!("Skipping roster row with empty company name");
                    continue;
                }
                if filter_jurisdiction && !in_jurisdiction(name) {
                    skipped += 1;
                    continue;
                }

                let reg = reg_idx
                    .and_then(|idx| record.get(idx))
                    .and_then(validate_reg_number);

                // Keep a registration number once one is seen for the name.
                let entry = companies.entry(name.to_string()).or_insert(None);
                if reg.is_some() {
                    *entry = reg;
                }
            }
        }
        "txt" => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read roster: {}", path.display()))?;
            for line in content.lines() {
                let name = line.trim();
                if name.is_empty() {
                    continue;
                }
                if filter_jurisdiction && !in_jurisdiction(name) {
                    skipped += 1;
                    continue;
                }
                companies.entry(name.to_string()).or_insert(None);
            }
        }
        other => bail!(
            "Unsupported roster format '{}': use .csv or .txt ({})",
            other,
            path.display()
        ),
    }

    if skipped > 0 {
        warn!("Skipped {} roster rows (empty name or outside jurisdiction)", skipped);
    }

    let roster: Vec<CompanyInput> = companies
        .into_iter()
        .enumerate()
        .map(|(row_index, (name, known_registration_id))| CompanyInput {
            name,
            known_registration_id,
            row_index,
        })
        .collect();

    let with_reg = roster
        .iter()
        .filter(|c| c.known_registration_id.is_some())
        .count();
    debug!(
        "Loaded {} unique companies ({} with registration numbers)",
        roster.len(),
        with_reg
    );

    Ok(roster)
}
