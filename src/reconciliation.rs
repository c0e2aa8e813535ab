// ⚖️ Reconciliation Engine - Commit edited snapshots back into the store
//
// An edited snapshot either replaces the whole canonical set (Scope::Full)
// or only the rows that were visible under a filter (Scope::Filtered).
// Nothing is committed unless every key in the resulting set is unique and
// non-empty.
//
// Rejections are reported once per episode: retrying the same bad snapshot
// returns the same rejection but no new diagnostic.

use crate::error::{DuplicateKeys, Result, StoreError};
use crate::record::{position_of, Record};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;

// ============================================================================
// SCOPE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scope {
    /// Edited snapshot replaces the whole canonical set
    Full,

    /// Edited snapshot replaces only the records shown under a filter
    ///
    /// `visible` holds the keys of the shown rows in view order. Records
    /// whose key is not listed are kept untouched.
    Filtered { visible: Vec<String> },
}

impl Scope {
    pub fn filtered_from(view: &[Record]) -> Self {
        Scope::Filtered {
            visible: view.iter().map(|r| r.key.clone()).collect(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Scope::Full => "full",
            Scope::Filtered { .. } => "filtered",
        }
    }
}

// ============================================================================
// VIOLATION
// ============================================================================

/// Why a snapshot was refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Violation {
    DuplicateKeys(DuplicateKeys),

    /// 1-based rows of the snapshot with a blank key
    EmptyKeys(Vec<usize>),
}

impl Violation {
    pub fn to_error(&self) -> StoreError {
        match self {
            Violation::DuplicateKeys(dup) => StoreError::DuplicateKey(dup.clone()),
            Violation::EmptyKeys(positions) => StoreError::EmptyKey {
                positions: positions.clone(),
            },
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_error())
    }
}

/// One-shot notice for the caller to render, emitted once per episode
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub message: String,
    pub violation: Violation,
}

// ============================================================================
// CHANGE SUMMARY
// ============================================================================

/// Key-level diff between the canonical set before and after a commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSummary {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
    pub unchanged: usize,
}

impl ChangeSummary {
    pub fn between(before: &[Record], after: &[Record]) -> Self {
        let old: HashMap<&str, &Record> = before.iter().map(|r| (r.key.as_str(), r)).collect();
        let new_keys: HashSet<&str> = after.iter().map(|r| r.key.as_str()).collect();

        let mut summary = ChangeSummary::default();

        for record in after {
            match old.get(record.key.as_str()) {
                None => summary.added += 1,
                Some(prev) if prev.content_differs(record) => summary.modified += 1,
                Some(_) => summary.unchanged += 1,
            }
        }

        summary.removed = before
            .iter()
            .filter(|r| !new_keys.contains(r.key.as_str()))
            .count();

        summary
    }

    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.removed == 0 && self.modified == 0
    }
}

// ============================================================================
// RECONCILIATION RESULT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReconciliationResult {
    /// Snapshot committed, canonical set replaced
    Committed(ChangeSummary),

    /// Snapshot refused, canonical set untouched
    Rejected(Violation),
}

impl ReconciliationResult {
    pub fn is_committed(&self) -> bool {
        matches!(self, ReconciliationResult::Committed(_))
    }
}

// ============================================================================
// RECONCILIATION REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationReport {
    pub scope: Scope,
    pub result: ReconciliationResult,

    /// Present only the first time a given violation is seen
    pub diagnostic: Option<Diagnostic>,

    /// Size of the canonical set after the attempt
    pub record_count: usize,
    pub reconciled_at: DateTime<Utc>,
}

impl ReconciliationReport {
    pub fn is_committed(&self) -> bool {
        self.result.is_committed()
    }

    pub fn summary(&self) -> String {
        match &self.result {
            ReconciliationResult::Committed(changes) => format!(
                "Reconciled ({} scope): {} records, {} added, {} removed, {} modified",
                self.scope.name(),
                self.record_count,
                changes.added,
                changes.removed,
                changes.modified
            ),
            ReconciliationResult::Rejected(violation) => {
                format!("Edit rejected, nothing saved: {}", violation)
            }
        }
    }

    pub fn into_result(self) -> Result<ChangeSummary> {
        match self.result {
            ReconciliationResult::Committed(changes) => Ok(changes),
            ReconciliationResult::Rejected(violation) => Err(violation.to_error()),
        }
    }
}

// ============================================================================
// RECONCILIATION ENGINE
// ============================================================================

#[derive(Debug, Default)]
pub struct ReconciliationEngine {
    /// Violation of the current episode, already reported to the caller
    last_violation: Option<Violation>,
}

impl ReconciliationEngine {
    pub fn new() -> Self {
        ReconciliationEngine {
            last_violation: None,
        }
    }

    /// Reconcile an edited snapshot into `canonical`
    ///
    /// On success `canonical` becomes the spliced set (copies of `edited` in
    /// the given order). On failure `canonical` is not touched.
    pub fn reconcile(
        &mut self,
        canonical: &mut Vec<Record>,
        edited: &[Record],
        scope: &Scope,
    ) -> ReconciliationReport {
        let (result, diagnostic) = match self.preview(canonical, edited, scope) {
            Ok(candidate) => {
                let changes = ChangeSummary::between(canonical, &candidate);
                *canonical = candidate;
                self.last_violation = None;

                tracing::info!(
                    scope = scope.name(),
                    records = canonical.len(),
                    added = changes.added,
                    removed = changes.removed,
                    modified = changes.modified,
                    "snapshot committed"
                );

                (ReconciliationResult::Committed(changes), None)
            }
            Err(violation) => {
                let diagnostic = self.report(&violation);
                (ReconciliationResult::Rejected(violation), diagnostic)
            }
        };

        ReconciliationReport {
            scope: scope.clone(),
            result,
            diagnostic,
            record_count: canonical.len(),
            reconciled_at: Utc::now(),
        }
    }

    /// The set a reconcile would commit, without committing it
    pub fn preview(
        &self,
        canonical: &[Record],
        edited: &[Record],
        scope: &Scope,
    ) -> std::result::Result<Vec<Record>, Violation> {
        match find_violation(canonical, edited, scope) {
            Some(violation) => Err(violation),
            None => Ok(splice(canonical, edited, scope)),
        }
    }

    /// True while a rejected snapshot has not been resolved by a commit
    pub fn has_pending_violation(&self) -> bool {
        self.last_violation.is_some()
    }

    /// Forget the current episode (e.g. after the canonical set was reloaded)
    pub fn clear_violation(&mut self) {
        self.last_violation = None;
    }

    /// The violation already reported in the current episode, if any
    pub fn episode(&self) -> Option<&Violation> {
        self.last_violation.as_ref()
    }

    /// Put back an episode saved with `episode()` when a commit is undone
    pub fn restore_episode(&mut self, episode: Option<Violation>) {
        self.last_violation = episode;
    }

    fn report(&mut self, violation: &Violation) -> Option<Diagnostic> {
        if self.last_violation.as_ref() == Some(violation) {
            tracing::debug!("violation already reported, suppressing diagnostic");
            return None;
        }

        tracing::warn!("snapshot rejected: {}", violation);
        self.last_violation = Some(violation.clone());

        Some(Diagnostic {
            message: violation.to_string(),
            violation: violation.clone(),
        })
    }

    // ========================================================================
    // SINGLE-RECORD OPERATIONS
    // ========================================================================

    /// Append a new record; returns its index
    pub fn create(&mut self, canonical: &mut Vec<Record>, record: Record) -> Result<usize> {
        record.validate()?;

        if let Some(existing) = position_of(canonical, &record.key) {
            return Err(single_conflict(&record.key, existing + 1, canonical.len() + 1));
        }

        canonical.push(record);
        self.last_violation = None;
        Ok(canonical.len() - 1)
    }

    /// Replace the record stored under `original_key`; returns its index
    ///
    /// When the key itself changes it must not collide with any other record.
    pub fn update(
        &mut self,
        canonical: &mut [Record],
        original_key: &str,
        record: Record,
    ) -> Result<usize> {
        record.validate()?;

        let index = position_of(canonical, original_key).ok_or_else(|| StoreError::NotFound {
            key: original_key.to_string(),
        })?;

        if record.key != original_key {
            if let Some(other) = position_of(canonical, &record.key) {
                return Err(single_conflict(&record.key, other + 1, index + 1));
            }
        }

        canonical[index] = record;
        self.last_violation = None;
        Ok(index)
    }

    /// Remove the record stored under `key`; returns where it was and the record
    pub fn delete(&mut self, canonical: &mut Vec<Record>, key: &str) -> Result<(usize, Record)> {
        let index = position_of(canonical, key).ok_or_else(|| StoreError::NotFound {
            key: key.to_string(),
        })?;

        let removed = canonical.remove(index);
        self.last_violation = None;
        Ok((index, removed))
    }
}

fn single_conflict(key: &str, first: usize, second: usize) -> StoreError {
    let mut rows = vec![first, second];
    rows.sort_unstable();

    let mut dup = DuplicateKeys::default();
    dup.positions.insert(key.to_string(), rows);
    StoreError::DuplicateKey(dup)
}

// ============================================================================
// VALIDATION & SPLICING
// ============================================================================

fn find_violation(canonical: &[Record], edited: &[Record], scope: &Scope) -> Option<Violation> {
    let empty: Vec<usize> = edited
        .iter()
        .enumerate()
        .filter(|(_, r)| !r.has_key())
        .map(|(i, _)| i + 1)
        .collect();

    if !empty.is_empty() {
        return Some(Violation::EmptyKeys(empty));
    }

    let distinct: HashSet<&str> = edited.iter().map(|r| r.key.as_str()).collect();
    let mut dup = DuplicateKeys::default();

    if distinct.len() != edited.len() {
        let mut positions: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, record) in edited.iter().enumerate() {
            positions.entry(record.key.clone()).or_default().push(i + 1);
        }
        positions.retain(|_, rows| rows.len() > 1);
        dup.positions = positions;
    }

    // The spliced set must stay unique against rows the editor never saw
    if let Scope::Filtered { visible } = scope {
        let visible: HashSet<&str> = visible.iter().map(String::as_str).collect();
        let hidden: HashSet<&str> = canonical
            .iter()
            .map(|r| r.key.as_str())
            .filter(|key| !visible.contains(key))
            .collect();

        dup.hidden = distinct
            .iter()
            .filter(|key| hidden.contains(*key))
            .map(|key| key.to_string())
            .collect();
    }

    if dup.is_empty() {
        None
    } else {
        Some(Violation::DuplicateKeys(dup))
    }
}

/// Build the candidate canonical set
///
/// Filtered scope: edited rows take over the slots of the visible records in
/// order, surplus rows go right after the last visible slot (or at the end
/// when nothing was visible), unused slots are dropped.
fn splice(canonical: &[Record], edited: &[Record], scope: &Scope) -> Vec<Record> {
    let visible = match scope {
        Scope::Full => return edited.to_vec(),
        Scope::Filtered { visible } => visible,
    };

    let visible: HashSet<&str> = visible.iter().map(String::as_str).collect();
    let slots = canonical
        .iter()
        .filter(|r| visible.contains(r.key.as_str()))
        .count();

    let mut result = Vec::with_capacity(canonical.len() + edited.len());
    let mut incoming = edited.iter();
    let mut filled = 0;

    for record in canonical {
        if !visible.contains(record.key.as_str()) {
            result.push(record.clone());
            continue;
        }

        filled += 1;
        if let Some(next) = incoming.next() {
            result.push(next.clone());
        }
        if filled == slots {
            result.extend(incoming.by_ref().cloned());
        }
    }

    result.extend(incoming.cloned());
    result
}

// ============================================================================
// TESTS
// ============================================================================
