//! Registration number cache.
//!
//! Resolutions are expensive (many page loads per company), so every
//! decision is cached to a JSON side file keyed by normalized company name
//! (plus any roster-supplied registration number). Re-runs and partial-batch
//! replays consult the cache before searching.
//!
//! The cache is advisory: each worker loads its own handle at startup and
//! writes independently; concurrent writers are last-writer-wins, and a lost
//! entry only costs a redundant resolution. Confidence never degrades in
//! place: an exact or existing entry is sticky, a similarity entry is only
//! replaced by a higher score or an exact match, and an unresolved entry by
//! anything better.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::resolution::{MatchType, ResolutionResult, SearchStrategy};
use crate::search_terms::normalize_name;

/// One cached resolution decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub registration_id: Option<String>,
    pub match_type: MatchType,
    pub strategy: Option<SearchStrategy>,
    #[serde(default)]
    pub matched_name: Option<String>,
}

impl CacheEntry {
    pub fn from_resolution(resolution: &ResolutionResult) -> Self {
        Self {
            registration_id: resolution.registration_id.clone(),
            match_type: resolution.match_type,
            strategy: resolution.strategy,
            matched_name: resolution.matched_name.clone(),
        }
    }
}

/// Ranking used by the replacement rule. Exact and roster-supplied numbers
/// outrank any similarity score; unresolved ranks below everything.
fn confidence(match_type: &MatchType) -> f64 {
    match match_type {
        MatchType::Exact | MatchType::Existing => 2.0,
        MatchType::Similarity(score) => 1.0 + score.clamp(0.0, 1.0),
        MatchType::Unresolved(_) => 0.0,
    }
}

/// Cache key: normalized name, with the roster registration number appended
/// when present so differently-keyed rows never collide.
pub fn cache_key(name: &str, known_registration_id: Option<&str>) -> String {
    match known_registration_id {
        Some(reg) => format!("{}|{}", normalize_name(name), reg),
        None => normalize_name(name),
    }
}

/// File-backed registration cache. Load at start, append on write.
#[derive(Debug)]
pub struct RegistrationCache {
    path: PathBuf,
    entries: HashMap<String, CacheEntry>,
}

impl RegistrationCache {
    /// Load the cache, tolerating a missing or corrupt file (a bad cache is
    /// only ever worth a warning, never a failed run).
    pub fn load(path: &Path) -> Self {
        let entries = match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str::<HashMap<String, CacheEntry>>(&content) {
                Ok(entries) => {
                    debug!("Loaded {} cache entries from {}", entries.len(), path.display());
                    entries
                }
                Err(e) => {
                    warn!("Ignoring corrupt cache file {}: {}", path.display(), e);
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };

        Self {
            path: path.to_path_buf(),
            entries,
        }
    }

    pub fn get(&self, key: &str) -> Option<&CacheEntry> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record an entry, applying the confidence rule. Returns true when the
    /// entry was inserted or replaced.
    pub fn record(&mut self, key: String, entry: CacheEntry) -> bool {
        match self.entries.get(&key) {
            Some(existing) if confidence(&entry.match_type) <= confidence(&existing.match_type) => {
                // Equal-or-worse confidence never overwrites; exact stays sticky.
                false
            }
            _ => {
                self.entries.insert(key, entry);
                true
            }
        }
    }

    /// Record a freshly produced resolution under its natural key.
    pub fn record_resolution(&mut self, resolution: &ResolutionResult) -> bool {
        let key = cache_key(
            &resolution.company.name,
            resolution.company.known_registration_id.as_deref(),
        );
        self.record(key, CacheEntry::from_resolution(resolution))
    }

    /// Persist atomically: write a temp file, fsync, rename over the target.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create cache directory: {}", parent.display()))?;
        }

        let temp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&self.entries)?;
        {
            let mut file = std::fs::File::create(&temp_path)
                .with_context(|| format!("Failed to create cache temp file: {}", temp_path.display()))?;
            std::io::Write::write_all(&mut file, content.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&temp_path, &self.path)
            .with_context(|| format!("Failed to replace cache file: {}", self.path.display()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolution::UnresolvedReason;
    use tempfile::TempDir;

    fn entry(match_type: MatchType, reg: Option<&str>) -> CacheEntry {
        CacheEntry {
            registration_id: reg.map(String::from),
            match_type,
            strategy: Some(SearchStrategy::Term(1)),
            matched_name: None,
        }
    }

    #[test]
    fn test_key_normalization() {
        assert_eq!(
            cache_key("บริษัท เอบีซี จำกัด", None),
            cache_key("  บริษัท   เอบีซี จำกัด ", None)
        );
        assert_ne!(
            cache_key("บริษัท เอบีซี จำกัด", None),
            cache_key("บริษัท เอบีซี จำกัด", Some("0105530012345"))
        );
    }

    #[test]
    fn test_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache.json");

        let mut cache = RegistrationCache::load(&path);
        assert!(cache.is_empty());
        cache.record(
            "เอบีซี".to_string(),
            entry(MatchType::Exact, Some("0105530012345")),
        );
        cache.save().unwrap();

        let reloaded = RegistrationCache::load(&path);
        assert_eq!(reloaded.len(), 1);
        let cached = reloaded.get("เอบีซี").unwrap();
        assert_eq!(cached.registration_id.as_deref(), Some("0105530012345"));
        assert_eq!(cached.match_type, MatchType::Exact);
    }

    #[test]
    fn test_corrupt_file_treated_as_empty() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("cache.json");
        std::fs::write(&path, "{ not json").unwrap();

        let cache = RegistrationCache::load(&path);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_exact_entry_is_sticky() {
        let mut cache = RegistrationCache::load(Path::new("/nonexistent/cache.json"));
        cache.record("k".to_string(), entry(MatchType::Exact, Some("0100000000001")));

        // A later similarity match, even at 1.0, never replaces exact.
        assert!(!cache.record(
            "k".to_string(),
            entry(MatchType::Similarity(1.0), Some("0100000000002"))
        ));
        assert_eq!(
            cache.get("k").unwrap().registration_id.as_deref(),
            Some("0100000000001")
        );
    }

    #[test]
    fn test_unresolved_upgraded_by_anything_better() {
        let mut cache = RegistrationCache::load(Path::new("/nonexistent/cache.json"));
        cache.record(
            "k".to_string(),
            entry(MatchType::Unresolved(UnresolvedReason::NoMatch), None),
        );

        assert!(cache.record(
            "k".to_string(),
            entry(MatchType::Similarity(0.96), Some("0100000000001"))
        ));
        assert_eq!(
            cache.get("k").unwrap().match_type,
            MatchType::Similarity(0.96)
        );
    }

    #[test]
    fn test_similarity_upgraded_only_by_higher_confidence() {
        let mut cache = RegistrationCache::load(Path::new("/nonexistent/cache.json"));
        cache.record(
            "k".to_string(),
            entry(MatchType::Similarity(0.96), Some("0100000000001")),
        );

        // Lower score rejected, higher score and exact accepted.
        assert!(!cache.record(
            "k".to_string(),
            entry(MatchType::Similarity(0.95), Some("0100000000002"))
        ));
        assert!(cache.record(
            "k".to_string(),
            entry(MatchType::Similarity(0.98), Some("0100000000003"))
        ));
        assert!(cache.record(
            "k".to_string(),
            entry(MatchType::Exact, Some("0100000000004"))
        ));
    }

    #[test]
    fn test_worse_never_replaces() {
        let mut cache = RegistrationCache::load(Path::new("/nonexistent/cache.json"));
        cache.record(
            "k".to_string(),
            entry(MatchType::Similarity(0.97), Some("0100000000001")),
        );

        assert!(!cache.record(
            "k".to_string(),
            entry(MatchType::Unresolved(UnresolvedReason::SearchFailed), None)
        ));
        assert_eq!(
            cache.get("k").unwrap().registration_id.as_deref(),
            Some("0100000000001")
        );
    }
}
