// Record Store - Core Library
// Exposes all modules for use in the CLI and tests

pub mod record;         // Record model
pub mod error;          // Error taxonomy + load warnings
pub mod codec;          // CSV persistence
pub mod filter;         // Substring / regex views
pub mod reconciliation; // Snapshot validation + commit
pub mod config;         // TOML configuration
pub mod session;        // Open file, view, selection, status

// Re-export commonly used types
pub use record::{Record, FIELDS, position_of};
pub use error::{DuplicateKeys, LoadWarning, Result, StoreError};
pub use codec::{CsvCodec, LoadedFile, HEADER, decode, encode, encode_to_string};
pub use filter::{
    Filter, FilterEngine, FilterOutcome,
    compile_pattern, filter_regex, filter_substring,
};
pub use reconciliation::{
    ChangeSummary, Diagnostic, ReconciliationEngine, ReconciliationReport,
    ReconciliationResult, Scope, Violation,
};
pub use config::StoreConfig;
pub use session::{EditOutcome, LoadOutcome, ReloadOutcome, SessionState, StoreSession};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
