// 🔎 Filter Engine - Substring and regex views over the record set
//
// Filters never mutate records: they return a new Vec of copies in the
// canonical order.
//
// NOTE: substring mode searches key, value AND tags, regex mode only key and
// value. The asymmetry is kept by default; set `regex_includes_tags` to make
// both modes look at the same fields.

use crate::error::{Result, StoreError};
use crate::record::Record;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

// ============================================================================
// FILTER
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Filter {
    /// Case-insensitive substring over every field
    Substring(String),

    /// Case-insensitive unanchored regex over key and value
    Regex(String),
}

impl Filter {
    /// Text the user typed
    pub fn term(&self) -> &str {
        match self {
            Filter::Substring(term) | Filter::Regex(term) => term,
        }
    }

    /// An empty substring matches everything
    pub fn is_identity(&self) -> bool {
        matches!(self, Filter::Substring(term) if term.is_empty())
    }

    pub fn mode(&self) -> &str {
        match self {
            Filter::Substring(_) => "substring",
            Filter::Regex(_) => "regex",
        }
    }
}

/// Filtered records plus the error that forced a fallback, if any
#[derive(Debug)]
pub struct FilterOutcome {
    pub records: Vec<Record>,

    /// Set when the pattern was invalid; `records` is then the unfiltered input
    pub error: Option<StoreError>,
}

impl FilterOutcome {
    pub fn is_fallback(&self) -> bool {
        self.error.is_some()
    }

    pub fn into_result(self) -> Result<Vec<Record>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.records),
        }
    }
}

// ============================================================================
// FILTER ENGINE
// ============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterEngine {
    /// Also search tags in regex mode (default: false)
    pub regex_includes_tags: bool,
}

impl FilterEngine {
    pub fn new() -> Self {
        FilterEngine {
            regex_includes_tags: false,
        }
    }

    pub fn with_regex_tags(regex_includes_tags: bool) -> Self {
        FilterEngine {
            regex_includes_tags,
        }
    }

    pub fn apply(&self, records: &[Record], filter: &Filter) -> FilterOutcome {
        match filter {
            Filter::Substring(term) => FilterOutcome {
                records: self.filter_substring(records, term),
                error: None,
            },
            Filter::Regex(pattern) => self.filter_regex(records, pattern),
        }
    }

    /// Records where any field contains `term`, ignoring case
    pub fn filter_substring(&self, records: &[Record], term: &str) -> Vec<Record> {
        if term.is_empty() {
            return records.to_vec();
        }

        let needle = term.to_lowercase();

        records
            .iter()
            .filter(|record| {
                record
                    .fields()
                    .iter()
                    .any(|field| field.to_lowercase().contains(&needle))
            })
            .cloned()
            .collect()
    }

    /// Records where `pattern` matches key or value, ignoring case
    ///
    /// An invalid pattern falls back to the unfiltered records and reports
    /// the compile error in the outcome.
    pub fn filter_regex(&self, records: &[Record], pattern: &str) -> FilterOutcome {
        let regex = match compile_pattern(pattern) {
            Ok(regex) => regex,
            Err(err) => {
                tracing::debug!(pattern, "invalid filter pattern, showing all records");
                return FilterOutcome {
                    records: records.to_vec(),
                    error: Some(err),
                };
            }
        };

        let records = records
            .iter()
            .filter(|record| {
                regex.is_match(&record.key)
                    || regex.is_match(&record.value)
                    || (self.regex_includes_tags && regex.is_match(&record.tags))
            })
            .cloned()
            .collect();

        FilterOutcome {
            records,
            error: None,
        }
    }
}

/// Compile a case-insensitive search pattern
pub fn compile_pattern(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|source| StoreError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Substring filter with default settings
pub fn filter_substring(records: &[Record], term: &str) -> Vec<Record> {
    FilterEngine::new().filter_substring(records, term)
}

/// Regex filter with default settings (tags excluded)
pub fn filter_regex(records: &[Record], pattern: &str) -> FilterOutcome {
    FilterEngine::new().filter_regex(records, pattern)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<Record> {
        vec![
            Record::new("Alpha", "x", ""),
            Record::new("beta", "Contains ALP inside", "work"),
            Record::new("gamma", "nothing", "alpine,trip"),
            Record::new("delta", "plain", "home"),
        ]
    }

    fn keys(records: &[Record]) -> Vec<&str> {
        records.iter().map(|r| r.key.as_str()).collect()
    }

    #[test]
    fn test_substring_is_case_insensitive() {
        let records = vec![Record::new("Alpha", "x", "")];
        assert_eq!(filter_substring(&records, "alp"), records);
    }

    #[test]
    fn test_substring_searches_every_field() {
        let found = filter_substring(&sample(), "ALP");
        assert_eq!(keys(&found), vec!["Alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_empty_term_is_identity() {
        let records = sample();
        assert_eq!(filter_substring(&records, ""), records);
        assert!(Filter::Substring(String::new()).is_identity());
        assert!(!Filter::Regex(String::new()).is_identity());
    }

    #[test]
    fn test_regex_matches_key_or_value_only() {
        let outcome = filter_regex(&sample(), "^alp|alp\\b");

        assert!(outcome.error.is_none());
        // gamma only matches through its tags, which regex mode skips
        assert_eq!(keys(&outcome.records), vec!["Alpha", "beta"]);
    }

    #[test]
    fn test_regex_can_include_tags() {
        let engine = FilterEngine::with_regex_tags(true);
        let outcome = engine.filter_regex(&sample(), "alpine");

        assert_eq!(keys(&outcome.records), vec!["gamma"]);
    }

    #[test]
    fn test_regex_is_unanchored() {
        let outcome = filter_regex(&sample(), "lai");
        assert_eq!(keys(&outcome.records), vec!["delta"]);
    }

    #[test]
    fn test_invalid_regex_falls_back_to_all_records() {
        let records = sample();
        let outcome = filter_regex(&records, "(unclosed");

        assert!(outcome.is_fallback());
        assert_eq!(outcome.records, records);
        assert!(matches!(
            outcome.error,
            Some(StoreError::Pattern { ref pattern, .. }) if pattern == "(unclosed"
        ));
    }

    #[test]
    fn test_filtering_preserves_order_and_input() {
        let records = sample();
        let before = records.clone();

        let found = FilterEngine::new().apply(&records, &Filter::Substring("a".to_string()));

        assert_eq!(records, before);
        assert_eq!(keys(&found.records), vec!["Alpha", "beta", "gamma", "delta"]);
    }

    #[test]
    fn test_outcome_into_result() {
        let ok = filter_regex(&sample(), "delta").into_result().unwrap();
        assert_eq!(keys(&ok), vec!["delta"]);

        let err = filter_regex(&sample(), "[").into_result().unwrap_err();
        assert!(matches!(err, StoreError::Pattern { .. }));
    }
}
