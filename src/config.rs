// ⚙️ Store Configuration
// TOML file, every key optional:
//
//   default_file = "timeline.csv"
//   extension = "csv"
//   autosave = true
//   atomic_writes = true
//   regex_includes_tags = false

use crate::codec::CsvCodec;
use crate::error::{Result, StoreError};
use crate::filter::FilterEngine;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_FILENAME: &str = "timeline.csv";
pub const DEFAULT_EXTENSION: &str = "csv";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// File opened when the host doesn't name one
    pub default_file: PathBuf,

    /// Extension appended by save-as when the target has none
    pub extension: String,

    /// Write the file after every committed change
    pub autosave: bool,

    /// Temp file + rename instead of rewriting in place
    pub atomic_writes: bool,

    /// Search tags in regex mode as substring mode does
    pub regex_includes_tags: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            default_file: PathBuf::from(DEFAULT_FILENAME),
            extension: DEFAULT_EXTENSION.to_string(),
            autosave: true,
            atomic_writes: true,
            regex_includes_tags: false,
        }
    }
}

impl StoreConfig {
    pub fn from_toml_str(text: &str) -> std::result::Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// Read a config file; unlike record files, a missing one is an error
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| StoreError::io(path, err))?;

        Self::from_toml_str(&text).map_err(|err| StoreError::Config {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    pub fn codec(&self) -> CsvCodec {
        CsvCodec::with_atomic_writes(self.atomic_writes)
    }

    pub fn filter_engine(&self) -> FilterEngine {
        FilterEngine::with_regex_tags(self.regex_includes_tags)
    }

    /// Append the configured extension when `path` has none of it
    ///
    /// The comparison ignores ASCII case, so `Notes.CSV` is left alone.
    pub fn normalize_target(&self, path: &Path) -> PathBuf {
        let has_extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case(&self.extension))
            .unwrap_or(false);

        if has_extension || self.extension.is_empty() {
            return path.to_path_buf();
        }

        let mut name = path.as_os_str().to_os_string();
        name.push(".");
        name.push(&self.extension);
        PathBuf::from(name)
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = StoreConfig::default();
        assert_eq!(config.default_file, PathBuf::from("timeline.csv"));
        assert!(config.autosave);
        assert!(config.atomic_writes);
        assert!(!config.regex_includes_tags);
        assert_eq!(StoreConfig::from_toml_str("").unwrap(), config);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = StoreConfig::from_toml_str("autosave = false\nregex_includes_tags = true\n").unwrap();

        assert!(!config.autosave);
        assert!(config.regex_includes_tags);
        assert!(config.atomic_writes);
        assert_eq!(config.extension, "csv");
        assert!(config.filter_engine().regex_includes_tags);
    }

    #[test]
    fn test_unknown_key_is_rejected() {
        assert!(StoreConfig::from_toml_str("autosav = false\n").is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.toml");
        std::fs::write(&path, "atomic_writes = \"yes\"\n").unwrap();

        let err = StoreConfig::load(&path).unwrap_err();
        assert!(matches!(err, StoreError::Config { .. }));

        let missing = StoreConfig::load(&dir.path().join("none.toml")).unwrap_err();
        assert!(matches!(missing, StoreError::Io { .. }));
    }

    #[test]
    fn test_normalize_target() {
        let config = StoreConfig::default();

        assert_eq!(config.normalize_target(Path::new("notes")), PathBuf::from("notes.csv"));
        assert_eq!(config.normalize_target(Path::new("notes.csv")), PathBuf::from("notes.csv"));
        assert_eq!(config.normalize_target(Path::new("Notes.CSV")), PathBuf::from("Notes.CSV"));
        assert_eq!(
            config.normalize_target(Path::new("dir/notes.txt")),
            PathBuf::from("dir/notes.txt.csv")
        );
    }
}
