//! Per-company resolution against the registry.
//!
//! The engine walks the search-term ladder in order, invoking the paginated
//! matcher per variant. An exact match terminates immediately. Otherwise the
//! single best similarity candidate observed across *all* variants is
//! accepted when it meets the configured threshold. A transient interaction
//! failure on one variant never aborts resolution; only when every variant
//! fails transiently is the company reported as "search failed" rather than
//! "not found".

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::browser::{InteractionError, RegistrySession};
use crate::matcher::{MatchOutcome, PaginatedMatcher, SimilarityCandidate};
use crate::roster::CompanyInput;
use crate::search_terms::generate_search_terms;

/// How a company was (or was not) resolved.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MatchType {
    Exact,
    Similarity(f64),
    /// Registration number was supplied in the roster; no search performed.
    Existing,
    Unresolved(UnresolvedReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum UnresolvedReason {
    /// Every variant was searched and nothing met the bar.
    NoMatch,
    /// Every variant failed at the interaction layer; the registry was never
    /// actually consulted to completion.
    SearchFailed,
}

impl UnresolvedReason {
    pub fn as_text(&self) -> &'static str {
        match self {
            UnresolvedReason::NoMatch => "No search results",
            UnresolvedReason::SearchFailed => "Search failed",
        }
    }
}

impl MatchType {
    /// Column value for the output files: exact, similarity_XX%, existing, or
    /// empty for unresolved.
    pub fn as_column(&self) -> String {
        match self {
            MatchType::Exact => "exact".to_string(),
            MatchType::Similarity(score) => format!("similarity_{:.0}%", score * 100.0),
            MatchType::Existing => "existing".to_string(),
            MatchType::Unresolved(_) => String::new(),
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self, MatchType::Unresolved(_))
    }
}

/// Which rung of the search ladder produced the match.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SearchStrategy {
    /// The registry redirected straight to the profile page.
    Direct,
    /// 1-based ordinal of the search term variant.
    Term(usize),
}

impl fmt::Display for SearchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchStrategy::Direct => write!(f, "direct"),
            SearchStrategy::Term(ordinal) => write!(f, "{}", ordinal),
        }
    }
}

/// One search attempt, logged for traceability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchAttempt {
    pub term: String,
    pub strategy_label: String,
    pub pages_scanned: u32,
}

/// The single resolution decision for one company. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub company: CompanyInput,
    pub registration_id: Option<String>,
    /// Display name the registry showed for the matched entity.
    pub matched_name: Option<String>,
    pub match_type: MatchType,
    pub strategy: Option<SearchStrategy>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<SearchAttempt>,
}

impl ResolutionResult {
    pub fn strategy_column(&self) -> String {
        self.strategy.map(|s| s.to_string()).unwrap_or_default()
    }

    /// Reason text for the not-found output; empty for resolved companies.
    pub fn failure_reason(&self) -> &'static str {
        match self.match_type {
            MatchType::Unresolved(reason) => reason.as_text(),
            _ => "",
        }
    }
}

/// Resolves one company at a time. Stateless between companies.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionEngine {
    matcher: PaginatedMatcher,
    similarity_threshold: f64,
}

impl ResolutionEngine {
    pub fn new(max_pages: u32, similarity_threshold: f64) -> Self {
        Self {
            matcher: PaginatedMatcher::new(max_pages),
            similarity_threshold,
        }
    }

    /// Resolve a company. Never fails: all interaction errors are contained
    /// and folded into the resolution decision.
    pub fn resolve<S: RegistrySession>(
        &self,
        session: &mut S,
        company: &CompanyInput,
    ) -> ResolutionResult {
        if let Some(reg) = &company.known_registration_id {
            debug!("Using existing registration number for {}", company.name);
            return ResolutionResult {
                company: company.clone(),
                registration_id: Some(reg.clone()),
                matched_name: None,
                match_type: MatchType::Existing,
                strategy: None,
                attempts: Vec::new(),
            };
        }

        let terms = generate_search_terms(&company.name);
        let mut attempts = Vec::with_capacity(terms.len());
        let mut best: Option<(SimilarityCandidate, usize)> = None;
        let mut transient_failures = 0usize;

        for term in &terms {
            match self.matcher.find_match(session, &term.term, &company.name) {
                Ok(scan) => {
                    attempts.push(SearchAttempt {
                        term: term.term.clone(),
                        strategy_label: term.ordinal.to_string(),
                        pages_scanned: scan.pages_scanned,
                    });
                    match scan.outcome {
                        MatchOutcome::Exact {
                            registration_id,
                            display_name,
                            direct,
                        } => {
                            let strategy = if direct {
                                SearchStrategy::Direct
                            } else {
                                SearchStrategy::Term(term.ordinal)
                            };
                            debug!(
                                "Resolved '{}' exactly via strategy {}",
                                company.name, strategy
                            );
                            return ResolutionResult {
                                company: company.clone(),
                                registration_id: Some(registration_id),
                                matched_name: Some(display_name),
                                match_type: MatchType::Exact,
                                strategy: Some(strategy),
                                attempts,
                            };
                        }
                        MatchOutcome::BestCandidate(candidate) => {
                            // Strict comparison keeps the earliest variant on ties.
                            if best.as_ref().map_or(true, |(b, _)| candidate.score > b.score) {
                                best = Some((candidate, term.ordinal));
                            }
                        }
                        MatchOutcome::NoResults => {}
                    }
                }
                Err(e) => {
                    transient_failures += 1;
                    warn!(
                        "Search for '{}' (variant {}) failed transiently: {}",
                        company.name, term.ordinal, e
                    );
                    attempts.push(SearchAttempt {
                        term: term.term.clone(),
                        strategy_label: term.ordinal.to_string(),
                        pages_scanned: 0,
                    });
                    if matches!(e, InteractionError::SessionLost(_)) {
                        // A dead session will fail every remaining variant too;
                        // stop probing and let the caller relaunch.
                        break;
                    }
                }
            }
        }

        if let Some((candidate, ordinal)) = best {
            if candidate.score >= self.similarity_threshold {
                debug!(
                    "Resolved '{}' via similarity {:.0}% (variant {})",
                    company.name,
                    candidate.score * 100.0,
                    ordinal
                );
                return ResolutionResult {
                    company: company.clone(),
                    registration_id: Some(candidate.registration_id),
                    matched_name: Some(candidate.display_line),
                    match_type: MatchType::Similarity(candidate.score),
                    strategy: Some(SearchStrategy::Term(ordinal)),
                    attempts,
                };
            }
            debug!(
                "Best candidate for '{}' below threshold ({:.0}% < {:.0}%)",
                company.name,
                candidate.score * 100.0,
                self.similarity_threshold * 100.0
            );
        }

        // Every attempted variant failing transiently (including a ladder cut
        // short by a dead session) means the registry was never consulted.
        let reason = if transient_failures > 0 && transient_failures == attempts.len() {
            UnresolvedReason::SearchFailed
        } else {
            UnresolvedReason::NoMatch
        };

        ResolutionResult {
            company: company.clone(),
            registration_id: None,
            matched_name: None,
            match_type: MatchType::Unresolved(reason),
            strategy: None,
            attempts,
        }
    }
}
