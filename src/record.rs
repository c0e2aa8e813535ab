// 📇 Record - The fixed three-field entity
// key is the identity, value and tags are free text

use crate::error::{Result, StoreError};
use serde::{Deserialize, Serialize};

/// On-disk column order. This is the only schema the codec understands.
pub const FIELDS: [&str; 3] = ["key", "value", "tags"];

/// Record with a unique key and two free-text fields
///
/// Values are copied into and out of the canonical set, never shared,
/// so a snapshot can be edited without touching the store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Record {
    pub key: String,

    /// May be empty, may contain newlines and commas
    #[serde(default)]
    pub value: String,

    #[serde(default)]
    pub tags: String,
}

impl Record {
    pub fn new(key: impl Into<String>, value: impl Into<String>, tags: impl Into<String>) -> Self {
        Record {
            key: key.into(),
            value: value.into(),
            tags: tags.into(),
        }
    }

    /// Record with only a key (value and tags empty)
    pub fn keyed(key: impl Into<String>) -> Self {
        Record::new(key, "", "")
    }

    /// Fields in on-disk order
    pub fn fields(&self) -> [&str; 3] {
        [&self.key, &self.value, &self.tags]
    }

    pub fn has_key(&self) -> bool {
        !self.key.is_empty()
    }

    /// Reject records that could never live in the canonical set
    pub fn validate(&self) -> Result<()> {
        if self.has_key() {
            Ok(())
        } else {
            Err(StoreError::EmptyKey { positions: vec![] })
        }
    }

    /// True when value or tags differ (key assumed equal)
    pub fn content_differs(&self, other: &Record) -> bool {
        self.value != other.value || self.tags != other.tags
    }
}

impl From<(&str, &str, &str)> for Record {
    fn from((key, value, tags): (&str, &str, &str)) -> Self {
        Record::new(key, value, tags)
    }
}

/// Index of the record carrying `key`, if any
pub fn position_of(records: &[Record], key: &str) -> Option<usize> {
    records.iter().position(|r| r.key == key)
}

// ============================================================================
// TESTS
// ============================================================================
