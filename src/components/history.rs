use std::collections::VecDeque;

use crate::canvas::Document;
use crate::error::{EditorError, Result};

/// Editor over the one document type the tools work on.
pub type DocumentEditor = TransactionalEditor<Document>;

const DEFAULT_LABEL: &str = "Edit";

// ============================================================================
// EVENTS
// ============================================================================

/// Notifications queued by the editor and drained by the owner with
/// [`TransactionalEditor::take_events`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditorEvent {
    /// The working document was replaced inside a transaction. Redraw only.
    DocumentChanged,
    /// A transaction ended (commit or rollback) or history moved. Observers
    /// refresh previews and persist.
    DocumentSubmitted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EditorState {
    Closed,
    Open,
    InTransaction,
}

// ============================================================================
// HISTORY ENTRY
// ============================================================================

/// A labelled document snapshot. On the undo stack it holds the state
/// before the labelled edit; on the redo stack, the state after it.
#[derive(Clone, Debug)]
struct HistoryEntry<D> {
    label: String,
    snapshot: D,
}

// ============================================================================
// TRANSACTIONAL EDITOR - open/begin/commit/rollback with linear undo
// ============================================================================

/// Transaction manager over an opaque, cloneable document.
///
/// States are Closed, Open and InTransaction. At most one transaction is
/// open at a time; every violation is reported as an error, never ignored.
/// The undo stack is pruned from the oldest end past `max_history_size`.
pub struct TransactionalEditor<D: Clone> {
    document: Option<D>,
    transaction: Option<HistoryEntry<D>>,
    undo_stack: VecDeque<HistoryEntry<D>>,
    redo_stack: VecDeque<HistoryEntry<D>>,
    max_history_size: usize,
    has_changes: bool,
    events: VecDeque<EditorEvent>,
}

impl<D: Clone> Default for TransactionalEditor<D> {
    fn default() -> Self {
        Self::new(50)
    }
}

impl<D: Clone> TransactionalEditor<D> {
    pub fn new(max_history_size: usize) -> Self {
        Self {
            document: None,
            transaction: None,
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_history_size,
            has_changes: false,
            events: VecDeque::new(),
        }
    }

    // ---- state ----------------------------------------------------------

    pub fn state(&self) -> EditorState {
        match (&self.document, &self.transaction) {
            (None, _) => EditorState::Closed,
            (Some(_), None) => EditorState::Open,
            (Some(_), Some(_)) => EditorState::InTransaction,
        }
    }

    pub fn is_open(&self) -> bool {
        self.document.is_some()
    }

    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    pub fn transaction_label(&self) -> Option<&str> {
        self.transaction.as_ref().map(|t| t.label.as_str())
    }

    pub fn document(&self) -> Option<&D> {
        self.document.as_ref()
    }

    /// The current document, or [`EditorError::NoDocument`].
    pub fn current(&self) -> Result<&D> {
        self.document.as_ref().ok_or(EditorError::NoDocument)
    }

    /// Document as it was when the open transaction began.
    pub fn transaction_snapshot(&self) -> Option<&D> {
        self.transaction.as_ref().map(|t| &t.snapshot)
    }

    pub fn has_changes(&self) -> bool {
        self.has_changes
    }

    /// Acknowledge committed changes (e.g. after a save) so `open`/`close`
    /// are allowed again.
    pub fn mark_saved(&mut self) {
        self.has_changes = false;
    }

    // ---- lifecycle ------------------------------------------------------

    /// Make `doc` the current document and start with empty history.
    pub fn open(&mut self, doc: D) -> Result<()> {
        if self.transaction.is_some() {
            return Err(EditorError::TransactionInProgress);
        }
        if self.has_changes {
            return Err(EditorError::UnsavedChanges);
        }
        self.document = Some(doc);
        self.undo_stack.clear();
        self.redo_stack.clear();
        self.events.push_back(EditorEvent::DocumentChanged);
        Ok(())
    }

    pub fn close(&mut self) -> Result<()> {
        if self.transaction.is_some() {
            return Err(EditorError::TransactionInProgress);
        }
        if self.has_changes {
            return Err(EditorError::UnsavedChanges);
        }
        self.document = None;
        self.undo_stack.clear();
        self.redo_stack.clear();
        Ok(())
    }

    // ---- transactions ---------------------------------------------------

    pub fn begin(&mut self) -> Result<()> {
        self.begin_labeled(DEFAULT_LABEL)
    }

    /// Open a transaction whose history entry will read `label`.
    pub fn begin_labeled(&mut self, label: impl Into<String>) -> Result<()> {
        let doc = self.document.as_ref().ok_or(EditorError::NoDocument)?;
        if self.transaction.is_some() {
            return Err(EditorError::TransactionInProgress);
        }
        self.transaction = Some(HistoryEntry { label: label.into(), snapshot: doc.clone() });
        Ok(())
    }

    pub fn set_document(&mut self, doc: D) -> Result<()> {
        if self.transaction.is_none() {
            return Err(EditorError::NoTransaction);
        }
        self.document = Some(doc);
        self.events.push_back(EditorEvent::DocumentChanged);
        Ok(())
    }

    pub fn commit(&mut self) -> Result<()> {
        let entry = self.transaction.take().ok_or(EditorError::NoTransaction)?;
        log::debug!("commit '{}'", entry.label);
        self.undo_stack.push_back(entry);
        // Clear redo stack when a new action is performed
        self.redo_stack.clear();
        self.prune();
        self.has_changes = true;
        self.events.push_back(EditorEvent::DocumentSubmitted);
        Ok(())
    }

    pub fn rollback(&mut self) -> Result<()> {
        let entry = self.transaction.take().ok_or(EditorError::NoTransaction)?;
        log::debug!("rollback '{}'", entry.label);
        self.document = Some(entry.snapshot);
        self.events.push_back(EditorEvent::DocumentSubmitted);
        Ok(())
    }

    // ---- history --------------------------------------------------------

    /// Step back one committed transaction. `Ok(false)` when there is
    /// nothing to undo.
    pub fn undo(&mut self) -> Result<bool> {
        let current = self.history_guard()?;
        let Some(entry) = self.undo_stack.pop_back() else {
            return Ok(false);
        };
        self.redo_stack.push_back(HistoryEntry { label: entry.label, snapshot: current });
        self.document = Some(entry.snapshot);
        self.has_changes = true;
        self.events.push_back(EditorEvent::DocumentSubmitted);
        Ok(true)
    }

    pub fn redo(&mut self) -> Result<bool> {
        let current = self.history_guard()?;
        let Some(entry) = self.redo_stack.pop_back() else {
            return Ok(false);
        };
        self.undo_stack.push_back(HistoryEntry { label: entry.label, snapshot: current });
        self.document = Some(entry.snapshot);
        self.has_changes = true;
        self.events.push_back(EditorEvent::DocumentSubmitted);
        Ok(true)
    }

    fn history_guard(&self) -> Result<D> {
        let doc = self.document.as_ref().ok_or(EditorError::NoDocument)?;
        if self.transaction.is_some() {
            return Err(EditorError::TransactionInProgress);
        }
        Ok(doc.clone())
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.undo_stack.len()
    }

    pub fn redo_count(&self) -> usize {
        self.redo_stack.len()
    }

    /// Get all undo labels (most recent first)
    pub fn undo_history(&self) -> Vec<String> {
        self.undo_stack.iter().rev().map(|e| e.label.clone()).collect()
    }

    pub fn redo_history(&self) -> Vec<String> {
        self.redo_stack.iter().rev().map(|e| e.label.clone()).collect()
    }

    pub fn max_history_size(&self) -> usize {
        self.max_history_size
    }

    pub fn set_max_history_size(&mut self, size: usize) {
        self.max_history_size = size;
        self.prune();
    }

    fn prune(&mut self) {
        while self.undo_stack.len() > self.max_history_size {
            self.undo_stack.pop_front();
        }
    }

    // ---- notifications --------------------------------------------------

    /// Drain queued notifications, oldest first.
    pub fn take_events(&mut self) -> Vec<EditorEvent> {
        self.events.drain(..).collect()
    }
}
