//! Paginated search matching for a single search term.
//!
//! Drives the registry session through the result pages of one term, looking
//! for an exact match to the target name. A single-result redirect counts as
//! an automatic exact match. When no exact match appears within the page
//! budget, the best similarity-scored candidate seen across all scanned
//! pages is reported instead; ties keep the first-seen candidate.

use tracing::debug;

use crate::browser::{InteractionError, RegistrySession, SearchView};
use crate::search_terms::extract_core_name;
use crate::similarity::similarity;

/// The single best non-exact candidate observed while scanning.
#[derive(Debug, Clone)]
pub struct SimilarityCandidate {
    pub registration_id: String,
    pub display_line: String,
    pub score: f64,
}

/// What one term yielded.
#[derive(Debug, Clone)]
pub enum MatchOutcome {
    /// Exact textual match, or an automatic single-result redirect.
    Exact {
        registration_id: String,
        display_name: String,
        direct: bool,
    },
    /// No exact match; the highest-scoring candidate across scanned pages.
    BestCandidate(SimilarityCandidate),
    /// The term produced no usable listings at all.
    NoResults,
}

/// Outcome plus how many pages were actually scanned, for attempt logging.
#[derive(Debug, Clone)]
pub struct PageScan {
    pub outcome: MatchOutcome,
    pub pages_scanned: u32,
}

/// Scans result pages for one term under a page budget.
#[derive(Debug, Clone, Copy)]
pub struct PaginatedMatcher {
    max_pages: u32,
}

impl PaginatedMatcher {
    pub fn new(max_pages: u32) -> Self {
        Self {
            max_pages: max_pages.max(1),
        }
    }

    /// Search one term and scan pages until an exact match or the budget is
    /// exhausted. Interaction failures propagate; they are not "no results".
    pub fn find_match<S: RegistrySession>(
        &self,
        session: &mut S,
        term: &str,
        target_name: &str,
    ) -> Result<PageScan, InteractionError> {
        let target_core = extract_core_name(target_name);
        let mut best: Option<SimilarityCandidate> = None;

        let mut view = session.search(term)?;
        let mut pages_scanned = 0;
        let mut total_pages = 1;

        for page in 1..=self.max_pages {
            match view {
                SearchView::Redirected(profile) => {
                    // The registry jumped straight to a profile: accept it as
                    // the (only) match when it carries a registration number.
                    return Ok(PageScan {
                        outcome: match profile.registration_id {
                            Some(registration_id) => {
                                debug!(
                                    "Direct profile navigation for term '{}': {}",
                                    term, profile.display_name
                                );
                                MatchOutcome::Exact {
                                    registration_id,
                                    display_name: profile.display_name,
                                    direct: true,
                                }
                            }
                            None => MatchOutcome::NoResults,
                        },
                        pages_scanned,
                    });
                }
                SearchView::Empty => {
                    return Ok(PageScan {
                        outcome: best
                            .map(MatchOutcome::BestCandidate)
                            .unwrap_or(MatchOutcome::NoResults),
                        pages_scanned,
                    });
                }
                SearchView::Results(results) => {
                    pages_scanned += 1;
                    if page == 1 {
                        total_pages = results.total_pages;
                    }

                    for listing in &results.listings {
                        let found_core = extract_core_name(&listing.display_line);
                        if !target_core.is_empty() && target_core == found_core {
                            debug!("Exact match for '{}' on page {}", term, page);
                            return Ok(PageScan {
                                outcome: MatchOutcome::Exact {
                                    registration_id: listing.registration_id.clone(),
                                    display_name: listing.display_line.clone(),
                                    direct: false,
                                },
                                pages_scanned,
                            });
                        }

                        let score = similarity(target_name, &listing.display_line);
                        // Strict comparison keeps the first-seen candidate on ties.
                        if best.as_ref().map_or(true, |b| score > b.score) {
                            best = Some(SimilarityCandidate {
                                registration_id: listing.registration_id.clone(),
                                display_line: listing.display_line.clone(),
                                score,
                            });
                        }
                    }
                }
            }

            if page >= total_pages.min(self.max_pages) {
                break;
            }
            view = session.goto_results_page(page + 1)?;
        }

        Ok(PageScan {
            outcome: best
                .map(MatchOutcome::BestCandidate)
                .unwrap_or(MatchOutcome::NoResults),
            pages_scanned,
        })
    }
}
