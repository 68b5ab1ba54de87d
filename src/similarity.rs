//! Token-overlap similarity scoring for company names.
//!
//! Thai company names tokenize poorly with edit-distance measures (spacing is
//! inconsistent between sources), so fallback matching uses the Jaccard
//! coefficient over whitespace-separated tokens of the core names. Pure and
//! deterministic; no I/O.

use std::collections::HashSet;

use crate::search_terms::extract_core_name;

/// Score two company names in [0.0, 1.0] using the Jaccard coefficient over
/// the token sets of their core names. Two empty token sets score 0.0.
pub fn similarity(name1: &str, name2: &str) -> f64 {
    let core1 = extract_core_name(name1);
    let core2 = extract_core_name(name2);

    let tokens1: HashSet<&str> = core1.split_whitespace().collect();
    let tokens2: HashSet<&str> = core2.split_whitespace().collect();

    if tokens1.is_empty() || tokens2.is_empty() {
        return 0.0;
    }

    let common = tokens1.intersection(&tokens2).count();
    let total = tokens1.union(&tokens2).count();

    common as f64 / total as f64
}
