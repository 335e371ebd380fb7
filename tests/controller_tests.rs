//! Tests for the document controller (tool switching, history, commit side effects)

use std::cell::RefCell;
use std::rc::Rc;

use iconfe::components::colors::Palette;
use iconfe::components::tools::AdjustParams;
use iconfe::io::{MemoryRasterStore, RasterStore, decode_icon};
use iconfe::ops::clipboard::MemoryClipboard;
use iconfe::{
    DocumentController, EditorError, EditorSettings, KeyEvent, PixelBuffer, PointerEvent, Result, ToolKind,
};
use image::Rgba;

const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
const GREY: Rgba<u8> = Rgba([100, 100, 100, 255]);

/// Store handle the test keeps a second reference to
#[derive(Clone, Default)]
struct SharedStore(Rc<RefCell<MemoryRasterStore>>);

impl RasterStore for SharedStore {
    fn save_rasters(&mut self, rasters: &[PixelBuffer]) -> Result<()> {
        self.0.borrow_mut().save_rasters(rasters)
    }

    fn restore_rasters(&self) -> Result<Vec<PixelBuffer>> {
        self.0.borrow().restore_rasters()
    }
}

struct FailingStore;

impl RasterStore for FailingStore {
    fn save_rasters(&mut self, _rasters: &[PixelBuffer]) -> Result<()> {
        Err(EditorError::Storage { message: "disk full".into() })
    }

    fn restore_rasters(&self) -> Result<Vec<PixelBuffer>> {
        Ok(Vec::new())
    }
}

fn quiet_settings() -> EditorSettings {
    EditorSettings { show_preview: false, autosave: false, ..Default::default() }
}

/// Helper to create a controller over a flat grey raster
fn grey_controller(width: u32, height: u32, settings: EditorSettings) -> DocumentController {
    DocumentController::from_buffer("sprite", PixelBuffer::new_filled(width, height, GREY), settings).unwrap()
}

fn pixel(ctrl: &DocumentController, x: i32, y: i32) -> [u8; 4] {
    ctrl.document().unwrap().pixels.get_pixel(x, y).unwrap().0
}

fn click(ctrl: &mut DocumentController, x: i32, y: i32) {
    ctrl.pointer_start(&PointerEvent::at(x, y)).unwrap();
    ctrl.pointer_end(&PointerEvent::at(x, y)).unwrap();
}

// ============================================================================
// Construction
// ============================================================================

#[test]
fn test_new_untitled_starts_clean_with_pencil() {
    let ctrl = DocumentController::new_untitled(3, 16, 16, quiet_settings()).unwrap();
    assert_eq!(ctrl.name, "Untitled-3");
    assert_eq!(ctrl.display_title(), "Untitled-3");
    assert_eq!(ctrl.tool_kind(), ToolKind::Pencil);
    assert!(ctrl.path.is_none());
    assert!(!ctrl.is_dirty());
    assert_eq!(pixel(&ctrl, 0, 0), [0, 0, 0, 0]);
}

#[test]
fn test_display_title_marks_dirty() {
    let mut ctrl = grey_controller(4, 4, quiet_settings());
    ctrl.set_color(RED).unwrap();
    click(&mut ctrl, 1, 1);
    assert_eq!(ctrl.display_title(), "sprite*");
    ctrl.mark_saved();
    assert_eq!(ctrl.display_title(), "sprite");
}

#[test]
fn test_from_file_uses_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("app.ico");
    let mut source = grey_controller(8, 8, quiet_settings());
    source.export_icon_to(&path).unwrap();

    let ctrl = DocumentController::from_file(&path, quiet_settings()).unwrap();
    assert_eq!(ctrl.name, "app.ico");
    assert_eq!(ctrl.path.as_deref(), Some(path.as_path()));
    assert_eq!(pixel(&ctrl, 7, 7), GREY.0);
}

// ============================================================================
// Tools and history
// ============================================================================

#[test]
fn test_switching_tools_keeps_history() {
    let mut ctrl = grey_controller(6, 6, quiet_settings());
    ctrl.set_color(RED).unwrap();
    click(&mut ctrl, 0, 0);

    ctrl.set_tool(ToolKind::FloodFill).unwrap();
    ctrl.set_color(Rgba([0, 0, 255, 255])).unwrap();
    click(&mut ctrl, 3, 3);
    assert_eq!(pixel(&ctrl, 0, 0), RED.0);
    assert_eq!(pixel(&ctrl, 5, 5), [0, 0, 255, 255]);

    ctrl.set_tool(ToolKind::Selection).unwrap();
    assert_eq!(ctrl.editor().undo_count(), 2);
    assert!(ctrl.undo().unwrap());
    assert_eq!(pixel(&ctrl, 5, 5), GREY.0);
    assert!(ctrl.undo().unwrap());
    assert_eq!(pixel(&ctrl, 0, 0), GREY.0);
    assert!(!ctrl.undo().unwrap());
}

#[test]
fn test_eraser_refuses_color_change() {
    let mut ctrl = grey_controller(4, 4, quiet_settings());
    ctrl.set_tool(ToolKind::Eraser).unwrap();
    assert!(matches!(ctrl.set_color(RED), Err(EditorError::ColorLocked)));
    assert_eq!(ctrl.color(), Rgba([0, 0, 0, 255]));
    click(&mut ctrl, 2, 2);
    assert_eq!(pixel(&ctrl, 2, 2), [0, 0, 0, 0]);
}

#[test]
fn test_undo_while_adjust_holds_transaction() {
    let mut ctrl = grey_controller(4, 4, quiet_settings());
    ctrl.set_color(RED).unwrap();
    click(&mut ctrl, 0, 0);

    ctrl.update_adjustments(AdjustParams { brightness: 10, ..Default::default() }).unwrap();
    assert_eq!(ctrl.tool_kind(), ToolKind::Adjust);
    assert_eq!(pixel(&ctrl, 1, 1), [110, 110, 110, 255]);

    assert!(ctrl.undo().unwrap());
    assert_eq!(pixel(&ctrl, 0, 0), GREY.0);
    assert_eq!(pixel(&ctrl, 1, 1), GREY.0);
    assert!(ctrl.editor().in_transaction());

    assert!(ctrl.redo().unwrap());
    assert_eq!(pixel(&ctrl, 0, 0), RED.0);
}

#[test]
fn test_apply_adjustments_with_dither_palette() {
    let mut ctrl = grey_controller(4, 4, quiet_settings());
    let palette = Palette::native_by_name("1-bit").unwrap();
    let params = AdjustParams { dither: Some(ctrl.dither_options(&palette)), ..Default::default() };
    assert!(ctrl.update_adjustments(params).unwrap());
    assert!(ctrl.apply_adjustments().unwrap());
    assert_eq!(ctrl.editor().undo_count(), 1);

    ctrl.set_tool(ToolKind::Pencil).unwrap();
    assert!(!ctrl.editor().in_transaction());
    let data = ctrl.document().unwrap().pixels.data().to_vec();
    assert!(data.chunks_exact(4).all(|p| p[0] == 0 || p[0] == 255));
}

#[test]
fn test_flood_fill_runs_as_deferred_batches() {
    let settings = EditorSettings { fill_batch_size: 5, ..quiet_settings() };
    let mut ctrl = grey_controller(10, 10, settings);
    ctrl.set_tool(ToolKind::FloodFill).unwrap();
    ctrl.set_color(RED).unwrap();
    ctrl.pointer_start(&PointerEvent::at(0, 0)).unwrap();
    assert!(ctrl.has_pending_work());

    while ctrl.run_pending().unwrap() {}
    assert!(!ctrl.has_pending_work());
    assert_eq!(pixel(&ctrl, 9, 9), RED.0);
    assert_eq!(ctrl.editor().undo_count(), 1);
}

#[test]
fn test_selection_operations_switch_tool() {
    let mut ctrl = grey_controller(8, 8, quiet_settings());
    let mut clipboard = MemoryClipboard::new();
    ctrl.select_all().unwrap();
    assert_eq!(ctrl.tool_kind(), ToolKind::Selection);
    ctrl.copy(&mut clipboard).unwrap();
    ctrl.delete_selection().unwrap();
    assert_eq!(pixel(&ctrl, 4, 4), [0, 0, 0, 0]);

    ctrl.paste(&mut clipboard).unwrap();
    assert_eq!(pixel(&ctrl, 4, 4), GREY.0);
    ctrl.key_down(&KeyEvent::new("Escape")).unwrap();
    assert_eq!(ctrl.document().unwrap().selection, None);
}

#[test]
fn test_color_replace_through_controller() {
    let mut ctrl = grey_controller(4, 4, quiet_settings());
    ctrl.start_color_replace().unwrap();
    ctrl.select_old_color(GREY).unwrap();
    ctrl.select_new_color(RED).unwrap();
    ctrl.confirm_color_replace().unwrap();
    assert_eq!(pixel(&ctrl, 3, 3), RED.0);
    assert_eq!(ctrl.editor().undo_history(), vec!["Replace color".to_string()]);

    ctrl.start_color_replace().unwrap();
    ctrl.select_old_color(RED).unwrap();
    ctrl.select_new_color(GREY).unwrap();
    ctrl.cancel_color_replace().unwrap();
    assert_eq!(pixel(&ctrl, 3, 3), RED.0);
}

// ============================================================================
// Commit side effects
// ============================================================================

#[test]
fn test_autosave_on_every_submit() {
    let store = SharedStore::default();
    let settings = EditorSettings { show_preview: false, autosave: true, ..Default::default() };
    let mut ctrl = grey_controller(4, 4, settings).with_store(Box::new(store.clone()));
    ctrl.set_color(RED).unwrap();

    click(&mut ctrl, 1, 2);
    assert_eq!(store.0.borrow().save_count, 1);
    assert_eq!(store.0.borrow().saved[0].get_pixel(1, 2), Some(RED));

    ctrl.undo().unwrap();
    assert_eq!(store.0.borrow().save_count, 2);
    assert_eq!(store.0.borrow().saved[0].get_pixel(1, 2), Some(GREY));
}

#[test]
fn test_autosave_failure_keeps_document() {
    let settings = EditorSettings { autosave: true, ..quiet_settings() };
    let mut ctrl = grey_controller(4, 4, settings).with_store(Box::new(FailingStore));
    ctrl.set_color(RED).unwrap();
    click(&mut ctrl, 0, 0);
    assert_eq!(pixel(&ctrl, 0, 0), RED.0);
    assert!(ctrl.save_to_store().is_err());
}

#[test]
fn test_restore_from_store_replaces_document() {
    let store = SharedStore::default();
    store.0.borrow_mut().saved = vec![PixelBuffer::new_filled(3, 2, RED)];
    let mut ctrl = grey_controller(8, 8, quiet_settings()).with_store(Box::new(store));
    assert!(ctrl.restore_from_store().unwrap());
    assert_eq!(ctrl.document().unwrap().width(), 3);
    assert_eq!(pixel(&ctrl, 2, 1), RED.0);
    assert!(!ctrl.editor().can_undo());

    let mut empty = grey_controller(2, 2, quiet_settings()).with_store(Box::new(SharedStore::default()));
    assert!(!empty.restore_from_store().unwrap());
}

#[test]
fn test_preview_follows_commits() {
    let settings = EditorSettings { show_preview: true, autosave: false, ..Default::default() };
    let mut ctrl = grey_controller(4, 4, settings);
    let first = decode_icon(ctrl.preview_icon().unwrap()).unwrap();
    assert_eq!(first[0].pixels.get_pixel(0, 0), Some(GREY));

    ctrl.set_color(RED).unwrap();
    click(&mut ctrl, 0, 0);
    let second = decode_icon(ctrl.preview_icon().unwrap()).unwrap();
    assert_eq!(second[0].pixels.get_pixel(0, 0), Some(RED));
    assert!(ctrl.take_redraw());
    assert!(!ctrl.take_redraw());
}

#[test]
fn test_export_scales_large_raster_to_fit() {
    let mut ctrl = grey_controller(400, 200, quiet_settings());
    let images = decode_icon(&ctrl.export_icon().unwrap()).unwrap();
    assert_eq!((images[0].width, images[0].height), (256, 128));
    assert_eq!(images[0].pixels.get_pixel(100, 50), Some(GREY));
    // The document itself keeps its size.
    assert_eq!(ctrl.document().unwrap().width(), 400);
}

#[test]
fn test_close_requires_saved_state() {
    let mut ctrl = grey_controller(4, 4, quiet_settings());
    ctrl.set_color(RED).unwrap();
    click(&mut ctrl, 0, 0);
    assert!(matches!(ctrl.close(), Err(EditorError::UnsavedChanges)));
    assert_eq!(ctrl.tool_kind(), ToolKind::Pencil);

    ctrl.mark_saved();
    ctrl.close().unwrap();
    assert!(ctrl.document().is_none());
}
