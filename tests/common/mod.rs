//! Shared test fixtures: a scripted in-memory registry session.
#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};

use dbdharvest::browser::{
    FinancialRow, FinancialTable, FinancialView, InteractionError, Listing, ProfileView,
    RegistrySession, ResultsView, SearchView,
};

/// In-memory stand-in for the registry: search terms map to scripted views,
/// registration numbers map to financial views. Every search is logged so
/// tests can assert on traffic.
#[derive(Default)]
pub struct SimulatedRegistry {
    redirects_by_term: HashMap<String, ProfileView>,
    listings_by_term: HashMap<String, Vec<Listing>>,
    financials: HashMap<String, FinancialView>,
    pub search_log: Vec<String>,
}

impl SimulatedRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Searching `term` lists a single result line.
    pub fn add_listing(&mut self, term: &str, registration_id: &str, display_line: &str) {
        self.listings_by_term
            .entry(term.to_string())
            .or_default()
            .push(Listing {
                registration_id: registration_id.to_string(),
                display_line: display_line.to_string(),
            });
    }

    /// Searching `term` redirects straight to a profile page.
    pub fn add_redirect(&mut self, term: &str, registration_id: &str, display_name: &str) {
        self.redirects_by_term.insert(
            term.to_string(),
            ProfileView {
                registration_id: Some(registration_id.to_string()),
                display_name: display_name.to_string(),
            },
        );
    }

    /// The profile for `registration_id` renders an income statement with the
    /// given (field, year, value) cells.
    pub fn set_income_statement(&mut self, registration_id: &str, cells: &[(&str, u16, f64)]) {
        self.financials.insert(
            registration_id.to_string(),
            FinancialView {
                income_statement: Some(income_table(cells)),
                balance_sheet: None,
            },
        );
    }
}

/// Build an income-statement table the way the registry renders one: each
/// year takes a value cell and a %-change cell, missing values are dashes.
pub fn income_table(cells: &[(&str, u16, f64)]) -> FinancialTable {
    let years: Vec<u16> = cells
        .iter()
        .map(|(_, year, _)| *year)
        .collect::<BTreeSet<u16>>()
        .into_iter()
        .collect();

    let fields: Vec<&str> = {
        let mut seen = Vec::new();
        for (field, _, _) in cells {
            if !seen.contains(field) {
                seen.push(*field);
            }
        }
        seen
    };

    let rows = fields
        .iter()
        .map(|field| {
            let mut row_cells = vec!["-".to_string(); years.len() * 2];
            for (f, year, value) in cells {
                if f == field {
                    let idx = years.iter().position(|y| y == year).unwrap() * 2;
                    row_cells[idx] = value.to_string();
                }
            }
            FinancialRow {
                label: (*field).to_string(),
                cells: row_cells,
            }
        })
        .collect();

    FinancialTable { years, rows }
}

impl RegistrySession for SimulatedRegistry {
    fn search(&mut self, term: &str) -> Result<SearchView, InteractionError> {
        self.search_log.push(term.to_string());
        if let Some(profile) = self.redirects_by_term.get(term) {
            return Ok(SearchView::Redirected(profile.clone()));
        }
        if let Some(listings) = self.listings_by_term.get(term) {
            return Ok(SearchView::Results(ResultsView {
                total_pages: 1,
                listings: listings.clone(),
            }));
        }
        Ok(SearchView::Empty)
    }

    fn goto_results_page(&mut self, _page: u32) -> Result<SearchView, InteractionError> {
        Ok(SearchView::Empty)
    }

    fn open_financials(
        &mut self,
        registration_id: &str,
        _include_balance_sheet: bool,
    ) -> Result<FinancialView, InteractionError> {
        Ok(self
            .financials
            .get(registration_id)
            .cloned()
            .unwrap_or_default())
    }
}
