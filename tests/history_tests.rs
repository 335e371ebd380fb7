//! Tests for the transactional editor (open/begin/commit/rollback, undo/redo)

use iconfe::{Document, DocumentEditor, EditorError, EditorEvent, EditorState, TransactionalEditor};
use image::Rgba;

/// Helper to create an editor with a blank document open
fn open_editor(width: u32, height: u32) -> DocumentEditor {
    let mut editor = DocumentEditor::new(50);
    editor.open(Document::blank(width, height)).unwrap();
    editor.take_events();
    editor
}

/// Helper to commit a single pixel write as one labelled transaction
fn paint(editor: &mut DocumentEditor, label: &str, x: i32, y: i32, color: [u8; 4]) {
    editor.begin_labeled(label).unwrap();
    let mut doc = editor.current().unwrap().clone();
    doc.pixels.put_pixel(x, y, Rgba(color));
    editor.set_document(doc).unwrap();
    editor.commit().unwrap();
}

fn pixel(editor: &DocumentEditor, x: i32, y: i32) -> [u8; 4] {
    editor.current().unwrap().pixels.get_pixel(x, y).unwrap().0
}

// ============================================================================
// Lifecycle
// ============================================================================

#[test]
fn test_new_editor_is_closed() {
    let editor = DocumentEditor::default();
    assert_eq!(editor.state(), EditorState::Closed);
    assert!(matches!(editor.current(), Err(EditorError::NoDocument)));
}

#[test]
fn test_begin_without_document_fails() {
    let mut editor = DocumentEditor::default();
    assert!(matches!(editor.begin(), Err(EditorError::NoDocument)));
    assert!(matches!(editor.undo(), Err(EditorError::NoDocument)));
    assert!(matches!(editor.redo(), Err(EditorError::NoDocument)));
}

#[test]
fn test_open_fires_changed_and_clears_history() {
    let mut editor = open_editor(4, 4);
    paint(&mut editor, "Pencil", 0, 0, [255, 0, 0, 255]);
    editor.mark_saved();

    editor.open(Document::blank(2, 2)).unwrap();
    assert_eq!(editor.state(), EditorState::Open);
    assert!(!editor.can_undo());
    assert_eq!(editor.current().unwrap().width(), 2);
    assert_eq!(editor.take_events(), vec![EditorEvent::DocumentChanged]);
}

#[test]
fn test_open_and_close_refuse_unsaved_changes() {
    let mut editor = open_editor(4, 4);
    paint(&mut editor, "Pencil", 0, 0, [255, 0, 0, 255]);

    assert!(matches!(editor.open(Document::blank(2, 2)), Err(EditorError::UnsavedChanges)));
    assert!(matches!(editor.close(), Err(EditorError::UnsavedChanges)));

    editor.mark_saved();
    editor.close().unwrap();
    assert_eq!(editor.state(), EditorState::Closed);
}

#[test]
fn test_close_during_transaction_fails() {
    let mut editor = open_editor(4, 4);
    editor.begin().unwrap();
    assert!(matches!(editor.close(), Err(EditorError::TransactionInProgress)));
    assert!(matches!(editor.open(Document::blank(1, 1)), Err(EditorError::TransactionInProgress)));
}

// ============================================================================
// Transactions
// ============================================================================

#[test]
fn test_nested_begin_fails() {
    let mut editor = open_editor(4, 4);
    editor.begin().unwrap();
    assert_eq!(editor.state(), EditorState::InTransaction);
    assert!(matches!(editor.begin(), Err(EditorError::TransactionInProgress)));
}

#[test]
fn test_set_document_commit_rollback_need_transaction() {
    let mut editor = open_editor(4, 4);
    assert!(matches!(editor.set_document(Document::blank(4, 4)), Err(EditorError::NoTransaction)));
    assert!(matches!(editor.commit(), Err(EditorError::NoTransaction)));
    assert!(matches!(editor.rollback(), Err(EditorError::NoTransaction)));
}

#[test]
fn test_rollback_restores_snapshot() {
    let mut editor = open_editor(4, 4);
    let before = editor.current().unwrap().clone();

    editor.begin().unwrap();
    let mut doc = before.clone();
    doc.pixels.fill(Rgba([1, 2, 3, 255]));
    editor.set_document(doc).unwrap();
    assert_ne!(editor.current().unwrap(), &before);

    editor.rollback().unwrap();
    assert_eq!(editor.current().unwrap(), &before);
    assert!(!editor.can_undo());
    assert!(!editor.has_changes());
}

#[test]
fn test_commit_undo_redo_round_trip() {
    let mut editor = open_editor(4, 4);
    paint(&mut editor, "Pencil", 1, 1, [255, 0, 0, 255]);
    assert_eq!(pixel(&editor, 1, 1), [255, 0, 0, 255]);
    assert!(editor.has_changes());

    assert!(editor.undo().unwrap());
    assert_eq!(pixel(&editor, 1, 1), [0, 0, 0, 0]);
    assert!(editor.can_redo());

    assert!(editor.redo().unwrap());
    assert_eq!(pixel(&editor, 1, 1), [255, 0, 0, 255]);
    assert!(!editor.can_redo());
}

#[test]
fn test_undo_on_empty_history_is_false() {
    let mut editor = open_editor(2, 2);
    assert!(!editor.undo().unwrap());
    assert!(!editor.redo().unwrap());
    assert!(editor.take_events().is_empty());
}

#[test]
fn test_undo_during_transaction_fails() {
    let mut editor = open_editor(2, 2);
    paint(&mut editor, "Pencil", 0, 0, [9, 9, 9, 255]);
    editor.begin().unwrap();
    assert!(matches!(editor.undo(), Err(EditorError::TransactionInProgress)));
    assert!(matches!(editor.redo(), Err(EditorError::TransactionInProgress)));
}

#[test]
fn test_commit_after_undo_clears_redo() {
    let mut editor = open_editor(4, 4);
    paint(&mut editor, "A", 0, 0, [255, 0, 0, 255]);
    paint(&mut editor, "B", 1, 0, [0, 255, 0, 255]);
    editor.undo().unwrap();
    assert_eq!(editor.redo_count(), 1);

    paint(&mut editor, "C", 2, 0, [0, 0, 255, 255]);
    assert_eq!(editor.redo_count(), 0);
    assert_eq!(editor.undo_history(), vec!["C".to_string(), "A".to_string()]);
    assert_eq!(pixel(&editor, 1, 0), [0, 0, 0, 0]);
}

#[test]
fn test_history_labels_most_recent_first() {
    let mut editor = open_editor(4, 4);
    paint(&mut editor, "Pencil", 0, 0, [1, 1, 1, 255]);
    paint(&mut editor, "Flood fill", 1, 0, [2, 2, 2, 255]);
    editor.begin().unwrap();
    assert_eq!(editor.transaction_label(), Some("Edit"));
    editor.rollback().unwrap();

    assert_eq!(editor.undo_history(), vec!["Flood fill".to_string(), "Pencil".to_string()]);
    editor.undo().unwrap();
    assert_eq!(editor.redo_history(), vec!["Flood fill".to_string()]);
}

#[test]
fn test_history_is_pruned_from_oldest_end() {
    let mut editor: TransactionalEditor<Document> = TransactionalEditor::new(3);
    editor.open(Document::blank(8, 1)).unwrap();
    for x in 0..6 {
        paint(&mut editor, &format!("step {}", x), x, 0, [255, 255, 255, 255]);
    }
    assert_eq!(editor.undo_count(), 3);
    while editor.undo().unwrap() {}
    // The three oldest strokes can no longer be undone.
    assert_eq!(pixel(&editor, 2, 0), [255, 255, 255, 255]);
    assert_eq!(pixel(&editor, 3, 0), [0, 0, 0, 0]);

    editor.set_max_history_size(1);
    assert!(editor.undo_count() <= 1);
}

// ============================================================================
// Events
// ============================================================================

#[test]
fn test_events_follow_transaction_lifecycle() {
    let mut editor = open_editor(2, 2);
    editor.begin().unwrap();
    assert!(editor.take_events().is_empty());

    editor.set_document(Document::blank(2, 2)).unwrap();
    editor.commit().unwrap();
    assert_eq!(
        editor.take_events(),
        vec![EditorEvent::DocumentChanged, EditorEvent::DocumentSubmitted]
    );

    editor.begin().unwrap();
    editor.rollback().unwrap();
    assert_eq!(editor.take_events(), vec![EditorEvent::DocumentSubmitted]);

    editor.undo().unwrap();
    assert_eq!(editor.take_events(), vec![EditorEvent::DocumentSubmitted]);
}

#[test]
fn test_editor_works_over_any_cloneable_document() {
    let mut editor: TransactionalEditor<Vec<u32>> = TransactionalEditor::new(10);
    editor.open(vec![1, 2, 3]).unwrap();
    editor.begin_labeled("push").unwrap();
    editor.set_document(vec![1, 2, 3, 4]).unwrap();
    editor.commit().unwrap();
    assert_eq!(editor.current().unwrap().len(), 4);
    editor.undo().unwrap();
    assert_eq!(editor.current().unwrap(), &vec![1, 2, 3]);
}
