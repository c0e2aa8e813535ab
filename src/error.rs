// 🚨 Error Taxonomy - Everything the store can refuse
// All variants are recoverable: no error ever terminates the host process.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// File could not be opened, read or written (other than "does not exist yet")
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid regular expression in regex filter mode
    #[error("invalid pattern `{pattern}`: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Key uniqueness violated, nothing was committed
    #[error("duplicate keys: {0}")]
    DuplicateKey(DuplicateKeys),

    /// Blank key on create/update or inside an edited snapshot
    #[error("{}", empty_key_message(positions))]
    EmptyKey { positions: Vec<usize> },

    /// Update/delete target vanished from the canonical set
    #[error("no record with key `{key}`")]
    NotFound { key: String },

    /// Selection-based operation with nothing selected
    #[error("no record selected")]
    NoSelection,

    #[error("config error in {}: {message}", path.display())]
    Config { path: PathBuf, message: String },
}

impl StoreError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Errors caused by the caller's input rather than the environment
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            StoreError::DuplicateKey(_) | StoreError::EmptyKey { .. } | StoreError::NotFound { .. }
        )
    }
}

fn empty_key_message(positions: &[usize]) -> String {
    if positions.is_empty() {
        "key cannot be empty".to_string()
    } else {
        format!("key cannot be empty (rows {})", join_positions(positions))
    }
}

fn join_positions(positions: &[usize]) -> String {
    positions
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// DUPLICATE KEYS
// ============================================================================

/// Duplicate-key diagnostics for one rejected snapshot
///
/// `positions` maps each repeated key to its 1-based rows in the snapshot,
/// ordered by key. `hidden` lists snapshot keys that collide with records
/// outside the edited view.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DuplicateKeys {
    pub positions: BTreeMap<String, Vec<usize>>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub hidden: BTreeSet<String>,
}

impl DuplicateKeys {
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty() && self.hidden.is_empty()
    }

    /// Every offending key, visible and hidden, in key order
    pub fn keys(&self) -> Vec<&str> {
        let all: BTreeSet<&str> = self
            .positions
            .keys()
            .map(String::as_str)
            .chain(self.hidden.iter().map(String::as_str))
            .collect();
        all.into_iter().collect()
    }
}

impl fmt::Display for DuplicateKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .positions
            .iter()
            .map(|(key, rows)| format!("\"{}\" at rows {}", key, join_positions(rows)))
            .collect();

        parts.extend(
            self.hidden
                .iter()
                .map(|key| format!("\"{}\" collides with a record outside the current view", key)),
        );

        write!(f, "{}", parts.join("; "))
    }
}

// ============================================================================
// LOAD WARNINGS
// ============================================================================

/// Non-fatal problem found while decoding a file; the row is skipped
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadWarning {
    /// Row did not decode to exactly three fields
    MalformedRow { line: u64, fields: Vec<String> },

    EmptyKey { line: u64 },

    /// Key already seen earlier in the file; the first occurrence wins
    DuplicateKey { line: u64, key: String },
}

impl LoadWarning {
    pub fn line(&self) -> u64 {
        match self {
            LoadWarning::MalformedRow { line, .. }
            | LoadWarning::EmptyKey { line }
            | LoadWarning::DuplicateKey { line, .. } => *line,
        }
    }
}

impl fmt::Display for LoadWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadWarning::MalformedRow { line, fields } => write!(
                f,
                "line {}: skipping malformed row with {} fields: {:?}",
                line,
                fields.len(),
                fields
            ),
            LoadWarning::EmptyKey { line } => {
                write!(f, "line {}: skipping row with empty key", line)
            }
            LoadWarning::DuplicateKey { line, key } => {
                write!(f, "line {}: skipping duplicate key \"{}\"", line, key)
            }
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_keys_display_is_sorted() {
        let mut dup = DuplicateKeys::default();
        dup.positions.insert("b".to_string(), vec![2, 4]);
        dup.positions.insert("a".to_string(), vec![1, 3]);
        dup.hidden.insert("z".to_string());

        assert_eq!(
            dup.to_string(),
            "\"a\" at rows 1, 3; \"b\" at rows 2, 4; \"z\" collides with a record outside the current view"
        );
        assert_eq!(dup.keys(), vec!["a", "b", "z"]);
    }

    #[test]
    fn test_empty_key_message() {
        let bare = StoreError::EmptyKey { positions: vec![] };
        assert_eq!(bare.to_string(), "key cannot be empty");

        let rows = StoreError::EmptyKey {
            positions: vec![2, 5],
        };
        assert_eq!(rows.to_string(), "key cannot be empty (rows 2, 5)");
        assert!(rows.is_validation());
    }

    #[test]
    fn test_io_error_names_path() {
        let err = StoreError::io(
            "/no/such/dir/file.csv",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.to_string().contains("/no/such/dir/file.csv"));
        assert!(!err.is_validation());
    }

    #[test]
    fn test_malformed_row_keeps_fields() {
        let warning = LoadWarning::MalformedRow {
            line: 3,
            fields: vec!["a".to_string(), "b".to_string()],
        };
        assert_eq!(warning.line(), 3);
        assert!(warning.to_string().contains("2 fields"));
        assert!(warning.to_string().contains("\"a\""));
    }
}
