// 🧭 Store Session - One open record file and everything shown about it
//
// Owns the canonical set, the current path, the active filter with its
// view, the selection cursor and the status message. Every mutating method
// takes &mut self: one change in flight at a time.
//
// Lifecycle: Idle → Loaded → Editing → Saved | RejectedEdit → Loaded
//
// Failures never leave half-applied state behind. When autosave is on and
// the write fails, the in-memory commit is rolled back so the canonical set
// and the file stay identical.

use crate::codec::CsvCodec;
use crate::config::StoreConfig;
use crate::error::{LoadWarning, Result, StoreError};
use crate::filter::{Filter, FilterEngine};
use crate::reconciliation::{ReconciliationEngine, ReconciliationReport, Scope, Violation};
use crate::record::{position_of, Record};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    /// Nothing loaded yet
    Idle,
    Loaded,
    /// Committed changes not yet written (autosave off)
    Editing,
    Saved,
    /// Last bulk edit was refused; canonical set unchanged
    RejectedEdit,
}

impl SessionState {
    pub fn name(&self) -> &str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Loaded => "loaded",
            SessionState::Editing => "editing",
            SessionState::Saved => "saved",
            SessionState::RejectedEdit => "rejected edit",
        }
    }
}

// ============================================================================
// OUTCOMES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadOutcome {
    pub path: PathBuf,
    pub records: usize,
    pub warnings: Vec<LoadWarning>,
    /// File did not exist and was created with a header
    pub created: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReloadOutcome {
    /// Committed-but-unsaved changes were thrown away
    pub discarded_changes: bool,
    pub load: LoadOutcome,
}

/// What a single-record operation did, for the caller to redraw
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EditOutcome {
    pub key: String,
    /// New cursor into the view, `None` when the view is empty
    pub selection: Option<usize>,
    /// The file was rewritten as part of the operation
    pub saved: bool,
}

// ============================================================================
// STORE SESSION
// ============================================================================

#[derive(Debug)]
pub struct StoreSession {
    config: StoreConfig,
    codec: CsvCodec,
    filters: FilterEngine,
    engine: ReconciliationEngine,

    canonical: Vec<Record>,
    current_path: PathBuf,
    status: String,
    last_filter: Option<Filter>,
    view: Vec<Record>,
    selection: Option<usize>,
    state: SessionState,
    dirty: bool,
    warnings: Vec<LoadWarning>,
}

impl StoreSession {
    pub fn new(config: StoreConfig) -> Self {
        StoreSession {
            codec: config.codec(),
            filters: config.filter_engine(),
            engine: ReconciliationEngine::new(),
            canonical: Vec::new(),
            current_path: config.default_file.clone(),
            status: String::new(),
            last_filter: None,
            view: Vec::new(),
            selection: None,
            state: SessionState::Idle,
            dirty: false,
            warnings: Vec::new(),
            config,
        }
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The canonical set, in file order
    pub fn records(&self) -> &[Record] {
        &self.canonical
    }

    /// The canonical set under the active filter
    pub fn view(&self) -> &[Record] {
        &self.view
    }

    pub fn selection(&self) -> Option<usize> {
        self.selection
    }

    pub fn selected(&self) -> Option<&Record> {
        self.selection.and_then(|i| self.view.get(i))
    }

    pub fn status(&self) -> &str {
        &self.status
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn current_path(&self) -> &Path {
        &self.current_path
    }

    pub fn last_filter(&self) -> Option<&Filter> {
        self.last_filter.as_ref()
    }

    /// Warnings from the most recent load
    pub fn warnings(&self) -> &[LoadWarning] {
        &self.warnings
    }

    pub fn has_unsaved_changes(&self) -> bool {
        self.dirty
    }

    /// One-line summary: state, file, line count, matches, current line
    pub fn status_line(&self) -> String {
        format!(
            "Mode: {} | Filename: {} | Lines: {} | Matches: {} | Current Line: {}",
            self.state.name(),
            self.current_path.display(),
            self.canonical.len(),
            self.view.len(),
            self.selection.map(|i| i + 1).unwrap_or(0)
        )
    }

    // ========================================================================
    // FILE LIFECYCLE
    // ========================================================================

    /// Open the configured default file
    pub fn open_default(&mut self) -> Result<LoadOutcome> {
        let path = self.config.default_file.clone();
        self.open(&path)
    }

    /// Load `path` and make it the current file
    ///
    /// Replaces the canonical set wholesale. A missing file is created.
    pub fn open(&mut self, path: &Path) -> Result<LoadOutcome> {
        let loaded = match self.codec.load(path) {
            Ok(loaded) => loaded,
            Err(err) => return self.fail(err),
        };

        self.canonical = loaded.records;
        self.current_path = path.to_path_buf();
        self.warnings = loaded.warnings;
        self.engine.clear_violation();
        self.dirty = false;
        self.state = SessionState::Loaded;

        self.refresh_view();
        self.selection = first_row(self.view.len());

        self.status = if loaded.created {
            format!("Created {}", path.display())
        } else if self.warnings.is_empty() {
            format!("Loaded {} records", self.canonical.len())
        } else {
            format!(
                "Loaded {} records, skipped {} rows",
                self.canonical.len(),
                self.warnings.len()
            )
        };

        Ok(LoadOutcome {
            path: self.current_path.clone(),
            records: self.canonical.len(),
            warnings: self.warnings.clone(),
            created: loaded.created,
        })
    }

    /// Re-read the current file, throwing away anything not yet saved
    pub fn reload_discarding_changes(&mut self) -> Result<ReloadOutcome> {
        let discarded_changes = self.dirty;
        let path = self.current_path.clone();

        let load = self.open(&path)?;
        if discarded_changes {
            tracing::info!(path = %path.display(), "reload discarded unsaved changes");
        }
        self.status = "Data reloaded.".to_string();

        Ok(ReloadOutcome {
            discarded_changes,
            load,
        })
    }

    /// Write the canonical set to the current file
    pub fn save(&mut self) -> Result<()> {
        if let Err(err) = self.codec.save(&self.current_path, &self.canonical) {
            return self.fail(err);
        }

        self.dirty = false;
        self.state = SessionState::Saved;
        self.status = "Saved!".to_string();
        Ok(())
    }

    /// Write to a new file and keep using it for later saves
    ///
    /// The configured extension is appended when missing. Returns the path
    /// actually written.
    pub fn save_as(&mut self, path: &Path) -> Result<PathBuf> {
        let target = self.config.normalize_target(path);

        if let Err(err) = self.codec.save(&target, &self.canonical) {
            return self.fail(err);
        }

        tracing::info!(from = %self.current_path.display(), to = %target.display(), "switched record file");
        self.current_path = target.clone();
        self.dirty = false;
        self.state = SessionState::Saved;
        self.status = format!("Saved as {}", target.display());
        Ok(target)
    }

    // ========================================================================
    // SEARCH
    // ========================================================================

    /// Apply `filter` to the canonical set; returns the number of matches
    ///
    /// An invalid regex leaves the view unfiltered, clears the active filter
    /// and returns the pattern error for display.
    pub fn search(&mut self, filter: Filter) -> Result<usize> {
        let outcome = self.filters.apply(&self.canonical, &filter);

        self.view = outcome.records;
        self.selection = first_row(self.view.len());

        if let Some(err) = outcome.error {
            self.last_filter = None;
            return self.fail(err);
        }

        self.last_filter = if filter.is_identity() { None } else { Some(filter) };
        self.status = format!("{} matches", self.view.len());
        Ok(self.view.len())
    }

    pub fn clear_filter(&mut self) {
        self.last_filter = None;
        self.refresh_view();
        self.selection = first_row(self.view.len());
    }

    // ========================================================================
    // BULK EDIT
    // ========================================================================

    /// Commit an edited copy of the current view
    ///
    /// With an active filter only the visible rows are replaced; otherwise
    /// the snapshot replaces the whole set.
    pub fn reconcile(&mut self, edited: &[Record]) -> Result<ReconciliationReport> {
        let scope = match self.last_filter {
            Some(_) => Scope::filtered_from(&self.view),
            None => Scope::Full,
        };
        self.reconcile_with_scope(edited, &scope)
    }

    /// Commit an edited snapshot with an explicit scope
    ///
    /// A rejected snapshot is not an `Err`: the report carries the violation
    /// (and, the first time, a diagnostic). `Err` means the autosave write
    /// failed and the commit was rolled back.
    pub fn reconcile_with_scope(
        &mut self,
        edited: &[Record],
        scope: &Scope,
    ) -> Result<ReconciliationReport> {
        let before = self.checkpoint();
        let report = self.engine.reconcile(&mut self.canonical, edited, scope);

        if !report.is_committed() {
            self.state = SessionState::RejectedEdit;
            self.status = report.summary();
            return Ok(report);
        }

        self.persist_or_rollback(before)?;

        self.refresh_view();
        self.selection = clamp(self.selection, self.view.len());
        self.status = report.summary();
        Ok(report)
    }

    // ========================================================================
    // SINGLE-RECORD EDITS
    // ========================================================================

    pub fn create_record(&mut self, record: Record) -> Result<EditOutcome> {
        let before = self.checkpoint();
        let key = record.key.clone();

        if let Err(err) = self.engine.create(&mut self.canonical, record) {
            return self.fail(err);
        }
        let saved = self.persist_or_rollback(before)?;

        self.refresh_view();
        self.selection = position_of(&self.view, &key).or_else(|| clamp(self.selection, self.view.len()));
        self.status = "Record added.".to_string();

        Ok(EditOutcome {
            key,
            selection: self.selection,
            saved,
        })
    }

    /// Replace the record stored under `original_key`
    pub fn update_record(&mut self, original_key: &str, record: Record) -> Result<EditOutcome> {
        let before = self.checkpoint();
        let key = record.key.clone();

        if let Err(err) = self.engine.update(&mut self.canonical, original_key, record) {
            return self.fail(err);
        }
        let saved = self.persist_or_rollback(before)?;

        self.refresh_view();
        self.selection = position_of(&self.view, &key).or_else(|| clamp(self.selection, self.view.len()));
        self.status = "Record updated.".to_string();

        Ok(EditOutcome {
            key,
            selection: self.selection,
            saved,
        })
    }

    /// Replace the selected record
    pub fn update_selected(&mut self, record: Record) -> Result<EditOutcome> {
        let original_key = self.selected_key()?;
        self.update_record(&original_key, record)
    }

    /// Remove the record stored under `key`
    ///
    /// The selection stays on the same row index, clamped to the new view,
    /// and becomes `None` when the view is empty.
    pub fn delete_record(&mut self, key: &str) -> Result<EditOutcome> {
        let before = self.checkpoint();

        if let Err(err) = self.engine.delete(&mut self.canonical, key) {
            return self.fail(err);
        }
        let saved = self.persist_or_rollback(before)?;

        self.refresh_view();
        self.selection = clamp(self.selection, self.view.len());
        self.status = "Record deleted.".to_string();

        Ok(EditOutcome {
            key: key.to_string(),
            selection: self.selection,
            saved,
        })
    }

    pub fn delete_selected(&mut self) -> Result<EditOutcome> {
        let key = self.selected_key()?;
        self.delete_record(&key)
    }

    // ========================================================================
    // NAVIGATION
    // ========================================================================

    pub fn select(&mut self, index: usize) -> Option<usize> {
        if index < self.view.len() {
            self.selection = Some(index);
        }
        self.selection
    }

    pub fn select_next(&mut self) -> Option<usize> {
        if let Some(i) = self.selection {
            if i + 1 < self.view.len() {
                self.selection = Some(i + 1);
            }
        }
        self.selection
    }

    pub fn select_previous(&mut self) -> Option<usize> {
        if let Some(i) = self.selection {
            self.selection = Some(i.saturating_sub(1));
        }
        self.selection
    }

    pub fn select_first(&mut self) -> Option<usize> {
        self.selection = first_row(self.view.len());
        self.selection
    }

    pub fn select_last(&mut self) -> Option<usize> {
        self.selection = self.view.len().checked_sub(1);
        self.selection
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn selected_key(&mut self) -> Result<String> {
        match self.selected().map(|record| record.key.clone()) {
            Some(key) => Ok(key),
            None => self.fail(StoreError::NoSelection),
        }
    }

    fn refresh_view(&mut self) {
        self.view = match &self.last_filter {
            Some(filter) => self.filters.apply(&self.canonical, filter).records,
            None => self.canonical.clone(),
        };
    }

    fn checkpoint(&self) -> Checkpoint {
        Checkpoint {
            records: self.canonical.clone(),
            episode: self.engine.episode().cloned(),
        }
    }

    /// Write the committed set when autosave is on, undoing the commit if
    /// the write fails. Returns whether the file was written.
    fn persist_or_rollback(&mut self, before: Checkpoint) -> Result<bool> {
        if !self.config.autosave {
            self.dirty = true;
            self.state = SessionState::Editing;
            return Ok(false);
        }

        match self.codec.save(&self.current_path, &self.canonical) {
            Ok(()) => {
                self.dirty = false;
                self.state = SessionState::Saved;
                Ok(true)
            }
            Err(err) => {
                tracing::warn!(path = %self.current_path.display(), "autosave failed, rolling back: {}", err);
                self.canonical = before.records;
                self.engine.restore_episode(before.episode);
                self.refresh_view();
                self.selection = clamp(self.selection, self.view.len());
                self.fail(err)
            }
        }
    }

    fn fail<T>(&mut self, err: StoreError) -> Result<T> {
        self.status = err.to_string();
        Err(err)
    }
}

/// State to restore when an autosave fails after a commit
#[derive(Debug)]
struct Checkpoint {
    records: Vec<Record>,
    episode: Option<Violation>,
}

impl Default for StoreSession {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

fn first_row(len: usize) -> Option<usize> {
    if len == 0 {
        None
    } else {
        Some(0)
    }
}

fn clamp(selection: Option<usize>, len: usize) -> Option<usize> {
    match len {
        0 => None,
        _ => Some(selection.unwrap_or(0).min(len - 1)),
    }
}

// ============================================================================
// TESTS
// ============================================================================
