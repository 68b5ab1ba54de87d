//! Search term generation for registry lookups.
//!
//! Company names rarely appear in the registry exactly as they appear in a
//! roster. This module produces an ordered ladder of search variants, from
//! the full name down to progressively simplified forms:
//! - Legal-form prefix/suffix handling: บริษัท, จำกัด (มหาชน), ห้างหุ้นส่วน
//! - Filler token removal: (ประเทศไทย), Thailand, กรุ๊ป, โฮลดิ้งส์, ...
//! - Parenthetical content and trailing year/number removal
//! - Progressive word trimming down to a single word
//!
//! Each variant is tagged with its 1-based ordinal, which is reported as the
//! search strategy in the output files. Generation never fails: any input
//! reduces to at least one variant (the trimmed original).

use once_cell::sync::Lazy;
use regex::Regex;

/// Corporate prefix for limited companies.
pub const COMPANY_PREFIX: &str = "บริษัท";

/// Limited-company suffix. Everything before it is the core name.
pub const LIMITED_SUFFIX: &str = "จำกัด";

/// Public-company marker.
pub const PUBLIC_MARKER: &str = "มหาชน";

/// Partnership prefixes, longest first so the specific forms win.
pub const PARTNERSHIP_PREFIXES: &[&str] = &[
    "ห้างหุ้นส่วนสามัญนิติบุคคล",
    "ห้างหุ้นส่วนจำกัด",
    "ห้างหุ้นส่วนสามัญ",
];

/// Filler tokens that often differ between data sources and the registry.
static FILLER_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"\(ประเทศไทย\)",
        r"ประเทศไทย",
        r"\(ไทยแลนด์\)",
        r"ไทยแลนด์",
        r"(?i)\(Thailand\)",
        r"(?i)Thailand",
        r"\(เอเชีย\)",
        r"เอเชีย",
        r"(?i)\(Asia\)",
        r"(?i)Asia",
        r"อินเตอร์เนชั่นแนล",
        r"อินเตอร์เนชันแนล",
        r"กรุ๊ปส์",
        r"กรุ๊ป",
        r"โฮลดิ้งส์",
        r"โฮลดิ้ง",
        r"เอ็นเตอร์ไพรส์",
        r"เอ็นเตอร์ไพรซ์",
        r"คอร์ปอเรชั่น",
        r"คอร์ปอเรชัน",
    ]
    .iter()
    .map(|p| Regex::new(p).unwrap())
    .collect()
});

static PARENTHESES: Lazy<Regex> = Lazy::new(|| Regex::new(r"\([^)]*\)").unwrap());
static FULLWIDTH_PARENTHESES: Lazy<Regex> = Lazy::new(|| Regex::new(r"（[^）]*）").unwrap());
static NUMBER_IN_PARENS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\(\d+\)").unwrap());
static TRAILING_NUMBER: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+\d+\s*$").unwrap());

/// A listing line in search results carries a row number and registration
/// number before the name: "123 0123456789012 บริษัท ... จำกัด".
static LISTING_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+\s+(0\d{12})\s+(.+)").unwrap());

/// One candidate search string, tagged with its 1-based position in the ladder.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchTerm {
    pub term: String,
    pub ordinal: usize,
}

/// Collapse runs of whitespace and trim.
pub fn normalize_whitespace(name: &str) -> String {
    name.split_whitespace().collect::<Vec<&str>>().join(" ")
}

/// Normalize a company name for comparison: strip the corporate and
/// partnership prefixes and collapse whitespace.
pub fn normalize_name(name: &str) -> String {
    let mut normalized = name.trim().replace(COMPANY_PREFIX, "");
    for prefix in PARTNERSHIP_PREFIXES {
        normalized = normalized.replace(prefix, "");
    }
    normalize_whitespace(&normalized)
}

/// Extract the core company name: the part before จำกัด, with corporate and
/// partnership prefixes removed. Also tolerates raw search-result lines that
/// carry a row number and registration number before the name.
pub fn extract_core_name(name: &str) -> String {
    let mut core = name.trim().to_string();

    if let Some(caps) = LISTING_PREFIX.captures(&core) {
        core = caps[2].to_string();
    }

    // Partnership prefixes contain จำกัด themselves, so they must be removed
    // before splitting on it.
    for prefix in PARTNERSHIP_PREFIXES {
        if core.contains(prefix) {
            core = core.replace(prefix, "");
            break;
        }
    }

    core = core.replace(COMPANY_PREFIX, "");

    if let Some(idx) = core.find(LIMITED_SUFFIX) {
        core.truncate(idx);
    }

    normalize_whitespace(&core)
}

/// Remove filler tokens (ประเทศไทย, Thailand, กรุ๊ป, ...) from a name.
pub fn clean_filler_words(name: &str) -> String {
    let mut cleaned = name.to_string();
    for pattern in FILLER_PATTERNS.iter() {
        cleaned = pattern.replace_all(&cleaned, "").into_owned();
    }
    normalize_whitespace(&cleaned)
}

/// Remove parenthetical content (both ASCII and full-width parentheses).
pub fn remove_parentheses(name: &str) -> String {
    let cleaned = PARENTHESES.replace_all(name, "");
    let cleaned = FULLWIDTH_PARENTHESES.replace_all(&cleaned, "");
    normalize_whitespace(&cleaned)
}

/// Remove trailing numbers or year-like suffixes ("ABC 2020", "DEF (1999)").
pub fn remove_trailing_numbers(name: &str) -> String {
    let cleaned = NUMBER_IN_PARENS.replace_all(name, "");
    let cleaned = TRAILING_NUMBER.replace_all(&cleaned, "");
    normalize_whitespace(&cleaned)
}

/// Generate the ladder of search terms for a company name, in priority order:
///
/// 1. Full name without the บริษัท prefix
/// 2. Partnership branch: name without the partnership prefix, then the short
///    "ห้างหุ้นส่วน <core>" form, or for public companies, the จำกัด(มหาชน)
///    no-space variant, then the name cut at มหาชน
/// 3. Core name (before จำกัด)
/// 4. Core name without filler tokens
/// 5. Core name without parenthetical content
/// 6. Core name without trailing numbers
/// 7. Progressive word trimming, removing the last word one at a time
///
/// Deduplicated preserving order. The result is never empty.
pub fn generate_search_terms(company_name: &str) -> Vec<SearchTerm> {
    let mut terms: Vec<String> = Vec::new();
    let mut push = |terms: &mut Vec<String>, candidate: String| {
        if !candidate.is_empty() && !terms.contains(&candidate) {
            terms.push(candidate);
        }
    };

    let is_partnership = company_name.contains("ห้างหุ้นส่วน");
    let base_name = normalize_whitespace(&company_name.replace(COMPANY_PREFIX, ""));

    push(&mut terms, base_name.clone());

    if is_partnership {
        let mut without_prefix = base_name.clone();
        for prefix in PARTNERSHIP_PREFIXES {
            if without_prefix.contains(prefix) {
                without_prefix = normalize_whitespace(&without_prefix.replace(prefix, ""));
                break;
            }
        }
        push(&mut terms, without_prefix.clone());
        // Some registry entries use the bare ห้างหุ้นส่วน form.
        if !without_prefix.is_empty() {
            push(&mut terms, format!("ห้างหุ้นส่วน {}", without_prefix));
        }
    } else if base_name.contains(PUBLIC_MARKER) {
        // "X จำกัด (มหาชน)" and "X จำกัด(มหาชน)" are both in circulation.
        let no_space = base_name
            .replace("จำกัด (มหาชน)", "จำกัด(มหาชน)")
            .replace("จำกัด  (มหาชน)", "จำกัด(มหาชน)");
        push(&mut terms, no_space);

        let just_limited = base_name
            .split("(มหาชน)")
            .next()
            .unwrap_or("")
            .split(PUBLIC_MARKER)
            .next()
            .unwrap_or("")
            .trim()
            .to_string();
        push(&mut terms, normalize_whitespace(&just_limited));
    }

    let core_name = extract_core_name(company_name);
    push(&mut terms, core_name.clone());

    let no_filler = clean_filler_words(&core_name);
    if no_filler != core_name {
        push(&mut terms, no_filler);
    }

    let no_parens = remove_parentheses(&core_name);
    if no_parens != core_name {
        push(&mut terms, no_parens.clone());
    }

    let no_numbers = remove_trailing_numbers(&core_name);
    if no_numbers != core_name {
        push(&mut terms, no_numbers);
    }

    // Progressive trimming works from the cleanest core form available.
    let trimming_base = if !no_parens.is_empty() && no_parens != core_name {
        no_parens
    } else {
        core_name
    };
    let words: Vec<&str> = trimming_base.split_whitespace().collect();
    if words.len() > 1 {
        for i in (1..words.len()).rev() {
            push(&mut terms, words[..i].join(" "));
        }
    }

    if terms.is_empty() {
        // Even a whitespace-only or prefix-only input yields one variant.
        terms.push(normalize_whitespace(company_name));
    }

    terms
        .into_iter()
        .enumerate()
        .map(|(i, term)| SearchTerm { term, ordinal: i + 1 })
        .collect()
}
