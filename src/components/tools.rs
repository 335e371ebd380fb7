use image::Rgba;

use crate::canvas::{Document, Point, Rect, TRANSPARENT, color_from_rgb_alpha};
use crate::components::history::DocumentEditor;
use crate::error::{EditorError, Result};
use crate::io::{decode_png, encode_png};
use crate::ops::adjustments::{DitherKernel, ImageAdjustService};
use crate::ops::clipboard::{ClipboardProvider, PNG_MIME};
use crate::settings::EditorSettings;

// ============================================================================
// EVENTS AND RESPONSES
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PointerEvent {
    pub point: Point,
    pub is_touch: bool,
}

impl PointerEvent {
    pub fn at(x: i32, y: i32) -> Self {
        Self { point: Point::new(x, y), is_touch: false }
    }
}

/// Keyboard event carrying a DOM-style key name (`"Escape"`, `"ArrowLeft"`).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>) -> Self {
        Self { key: key.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CursorHint {
    Crosshair,
    Cell,
    Move,
    Eyedropper,
}

/// What a tool hands back to the host after an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct ToolResponse {
    pub cursor: Option<CursorHint>,
    /// The host should not run its own handling of the event.
    pub prevent_default: bool,
}

impl ToolResponse {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn cursor(cursor: CursorHint) -> Self {
        Self { cursor: Some(cursor), prevent_default: false }
    }

    pub fn handled() -> Self {
        Self { cursor: None, prevent_default: true }
    }
}

// ============================================================================
// TOOL PROTOCOL
// ============================================================================

/// Gesture and lifecycle hooks every tool implements. `deactivate` must
/// leave the editor with no open transaction.
pub trait ToolBehavior {
    fn activate(&mut self, _editor: &mut DocumentEditor) -> Result<ToolResponse> {
        Ok(ToolResponse::none())
    }

    fn deactivate(&mut self, editor: &mut DocumentEditor) -> Result<()>;

    fn pointer_start(&mut self, editor: &mut DocumentEditor, event: &PointerEvent) -> Result<ToolResponse>;

    fn pointer_move(&mut self, _editor: &mut DocumentEditor, _event: &PointerEvent) -> Result<ToolResponse> {
        Ok(ToolResponse::none())
    }

    fn pointer_end(&mut self, _editor: &mut DocumentEditor, _event: &PointerEvent) -> Result<ToolResponse> {
        Ok(ToolResponse::none())
    }

    fn key_down(&mut self, _editor: &mut DocumentEditor, _event: &KeyEvent) -> Result<ToolResponse> {
        Ok(ToolResponse::none())
    }

    fn key_up(&mut self, _editor: &mut DocumentEditor, _event: &KeyEvent) -> Result<ToolResponse> {
        Ok(ToolResponse::none())
    }
}

/// Commit the open transaction, or roll it back when it changed nothing.
fn finish_transaction(editor: &mut DocumentEditor) -> Result<()> {
    if editor.transaction_snapshot() == editor.document() {
        editor.rollback()
    } else {
        editor.commit()
    }
}

/// Run `edit` on a copy of the current document and commit the result as
/// one transaction. Nothing is opened if `edit` fails.
pub fn apply_edit(
    editor: &mut DocumentEditor,
    label: &str,
    edit: impl FnOnce(&mut Document) -> Result<()>,
) -> Result<()> {
    if editor.in_transaction() {
        return Err(EditorError::TransactionInProgress);
    }
    let mut doc = editor.current()?.clone();
    edit(&mut doc)?;
    editor.begin_labeled(label)?;
    editor.set_document(doc)?;
    editor.commit()
}

/// Integer line from `a` to `b`, both ends included.
pub fn line_points(a: Point, b: Point) -> Vec<Point> {
    let dx = (b.x - a.x).abs();
    let dy = -(b.y - a.y).abs();
    let sx = if a.x < b.x { 1 } else { -1 };
    let sy = if a.y < b.y { 1 } else { -1 };
    let mut err = dx + dy;
    let (mut x, mut y) = (a.x, a.y);
    let mut out = Vec::with_capacity(dx.max(-dy) as usize + 1);
    loop {
        out.push(Point::new(x, y));
        if x == b.x && y == b.y {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x += sx;
        }
        if e2 <= dx {
            err += dx;
            y += sy;
        }
    }
    out
}

// ============================================================================
// PENCIL / ERASER
// ============================================================================

/// Single-pixel painter. The eraser is a pencil whose color is locked to
/// transparent.
#[derive(Clone, Debug)]
pub struct PencilTool {
    color: Rgba<u8>,
    color_locked: bool,
    drawing: bool,
    last: Option<Point>,
}

impl PencilTool {
    pub fn new(color: Rgba<u8>) -> Self {
        Self { color, color_locked: false, drawing: false, last: None }
    }

    pub fn eraser() -> Self {
        Self { color_locked: true, ..Self::new(TRANSPARENT) }
    }

    pub fn color(&self) -> Rgba<u8> {
        self.color
    }

    pub fn is_color_locked(&self) -> bool {
        self.color_locked
    }

    pub fn set_color(&mut self, color: Rgba<u8>) -> Result<()> {
        if self.color_locked {
            return Err(EditorError::ColorLocked);
        }
        self.color = color;
        Ok(())
    }

    /// Color from 8-bit channels and a 0–1 alpha.
    pub fn set_rgb_alpha(&mut self, r: u8, g: u8, b: u8, alpha: f32) -> Result<()> {
        self.set_color(color_from_rgb_alpha(r, g, b, alpha))
    }

    fn label(&self) -> &'static str {
        if self.color_locked { "Eraser" } else { "Pencil" }
    }

    fn paint(&self, editor: &mut DocumentEditor, points: &[Point]) -> Result<()> {
        let mut doc = editor.current()?.clone();
        let mut changed = false;
        for p in points {
            if doc.pixels.get_pixel(p.x, p.y).is_some_and(|c| c != self.color) {
                changed |= doc.pixels.put_pixel(p.x, p.y, self.color);
            }
        }
        if changed {
            editor.set_document(doc)?;
        }
        Ok(())
    }
}

impl ToolBehavior for PencilTool {
    fn deactivate(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        if self.drawing && editor.in_transaction() {
            finish_transaction(editor)?;
        }
        self.drawing = false;
        self.last = None;
        Ok(())
    }

    fn pointer_start(&mut self, editor: &mut DocumentEditor, event: &PointerEvent) -> Result<ToolResponse> {
        if !editor.in_transaction() {
            editor.begin_labeled(self.label())?;
        }
        self.drawing = true;
        self.last = Some(event.point);
        self.paint(editor, &[event.point])?;
        Ok(ToolResponse::cursor(CursorHint::Crosshair))
    }

    fn pointer_move(&mut self, editor: &mut DocumentEditor, event: &PointerEvent) -> Result<ToolResponse> {
        if !self.drawing {
            return Ok(ToolResponse::cursor(CursorHint::Crosshair));
        }
        let from = self.last.unwrap_or(event.point);
        let points = line_points(from, event.point);
        self.paint(editor, &points)?;
        self.last = Some(event.point);
        Ok(ToolResponse::cursor(CursorHint::Crosshair))
    }

    fn pointer_end(&mut self, editor: &mut DocumentEditor, _event: &PointerEvent) -> Result<ToolResponse> {
        if self.drawing && editor.in_transaction() {
            finish_transaction(editor)?;
        }
        self.drawing = false;
        self.last = None;
        Ok(ToolResponse::cursor(CursorHint::Crosshair))
    }
}

// ============================================================================
// FLOOD FILL
// ============================================================================

/// Resumable 4-connected fill.
///
/// Neighbours are queued only when unvisited and equal to the recorded
/// origin color; the visited set is what keeps already-filled pixels from
/// being queued again once the buffer has been overwritten.
#[derive(Clone, Debug)]
pub struct FloodFillJob {
    doc: Document,
    origin: Rgba<u8>,
    fill: Rgba<u8>,
    visited: Vec<bool>,
    stack: Vec<u32>,
    filled: usize,
}

impl FloodFillJob {
    /// `None` when `start` is off the raster or already the fill color.
    pub fn new(doc: Document, start: Point, fill: Rgba<u8>) -> Option<Self> {
        let origin = doc.pixels.get_pixel(start.x, start.y)?;
        if origin == fill {
            return None;
        }
        let width = doc.width() as usize;
        let mut visited = vec![false; doc.pixels.pixel_count()];
        let seed = start.y as usize * width + start.x as usize;
        visited[seed] = true;
        Some(Self { doc, origin, fill, visited, stack: vec![seed as u32], filled: 0 })
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    pub fn into_document(self) -> Document {
        self.doc
    }

    pub fn filled(&self) -> usize {
        self.filled
    }

    pub fn is_done(&self) -> bool {
        self.stack.is_empty()
    }

    /// Visit up to `budget` pixels. Returns `true` once nothing is queued.
    pub fn step(&mut self, budget: usize) -> bool {
        let wu = self.doc.width() as usize;
        let hu = self.doc.height() as usize;
        let origin = self.origin.0;
        let fill = self.fill.0;

        for _ in 0..budget.max(1) {
            let Some(idx) = self.stack.pop() else { break };
            let idx = idx as usize;
            let x = idx % wu;
            let y = idx / wu;
            let data = self.doc.pixels.data_mut();
            data[idx * 4..idx * 4 + 4].copy_from_slice(&fill);
            self.filled += 1;

            let mut neighbours = [None; 4];
            if x > 0 {
                neighbours[0] = Some(idx - 1);
            }
            if x + 1 < wu {
                neighbours[1] = Some(idx + 1);
            }
            if y > 0 {
                neighbours[2] = Some(idx - wu);
            }
            if y + 1 < hu {
                neighbours[3] = Some(idx + wu);
            }
            for ni in neighbours.into_iter().flatten() {
                if !self.visited[ni] && data[ni * 4..ni * 4 + 4] == origin {
                    self.visited[ni] = true;
                    self.stack.push(ni as u32);
                }
            }
        }
        self.stack.is_empty()
    }
}

/// Flood fill tool. Large regions are filled a batch at a time; the host
/// drives the remaining batches through [`Tool::resume`].
#[derive(Clone, Debug)]
pub struct FloodFillTool {
    color: Rgba<u8>,
    batch_size: usize,
    job: Option<FloodFillJob>,
}

impl FloodFillTool {
    pub fn new(color: Rgba<u8>, batch_size: usize) -> Self {
        Self { color, batch_size: batch_size.max(1), job: None }
    }

    pub fn color(&self) -> Rgba<u8> {
        self.color
    }

    pub fn set_color(&mut self, color: Rgba<u8>) {
        self.color = color;
    }

    pub fn set_rgb_alpha(&mut self, r: u8, g: u8, b: u8, alpha: f32) {
        self.color = color_from_rgb_alpha(r, g, b, alpha);
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn is_pending(&self) -> bool {
        self.job.is_some()
    }

    /// Run one batch, publish the partial result and commit when done.
    /// Returns `true` while batches remain.
    pub fn resume(&mut self, editor: &mut DocumentEditor) -> Result<bool> {
        let Some(job) = self.job.as_mut() else { return Ok(false) };
        let done = job.step(self.batch_size);
        if done {
            let filled = job.filled();
            if let Some(job) = self.job.take() {
                editor.set_document(job.into_document())?;
            }
            editor.commit()?;
            log::debug!("flood fill finished: {} pixels", filled);
            Ok(false)
        } else {
            editor.set_document(job.document().clone())?;
            Ok(true)
        }
    }

    /// Abandon a pending fill and restore the document.
    pub fn cancel(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        if self.job.take().is_some() && editor.in_transaction() {
            editor.rollback()?;
        }
        Ok(())
    }
}

impl ToolBehavior for FloodFillTool {
    /// A pending fill is run to completion and committed.
    fn deactivate(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        while self.resume(editor)? {}
        Ok(())
    }

    fn pointer_start(&mut self, editor: &mut DocumentEditor, event: &PointerEvent) -> Result<ToolResponse> {
        if self.job.is_some() {
            return Ok(ToolResponse::cursor(CursorHint::Cell));
        }
        let doc = editor.current()?.clone();
        let Some(job) = FloodFillJob::new(doc, event.point, self.color) else {
            return Ok(ToolResponse::cursor(CursorHint::Cell));
        };
        editor.begin_labeled("Flood fill")?;
        self.job = Some(job);
        self.resume(editor)?;
        Ok(ToolResponse::cursor(CursorHint::Cell))
    }

    fn key_down(&mut self, editor: &mut DocumentEditor, event: &KeyEvent) -> Result<ToolResponse> {
        if event.key == "Escape" && self.job.is_some() {
            self.cancel(editor)?;
            return Ok(ToolResponse::handled());
        }
        Ok(ToolResponse::none())
    }
}

// ============================================================================
// SELECTION
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SelectionDragMode {
    /// Dragging inside the selection moves the rectangle only.
    #[default]
    MoveSelection,
    /// Dragging inside the selection carries the enclosed pixels along.
    MoveSprite,
}

#[derive(Clone, Copy, Debug)]
enum SelectionGesture {
    Selecting { anchor: Point, moved: bool },
    Moving { origin: Point, start: Rect, sprite: bool },
}

#[derive(Clone, Debug, Default)]
pub struct SelectionTool {
    pub drag_mode: SelectionDragMode,
    gesture: Option<SelectionGesture>,
}

fn clamp_point(p: Point, doc: &Document) -> Point {
    Point::new(
        p.x.clamp(0, doc.width().saturating_sub(1) as i32),
        p.y.clamp(0, doc.height().saturating_sub(1) as i32),
    )
}

fn required_selection(doc: &Document) -> Result<Rect> {
    doc.selection.ok_or_else(|| EditorError::invalid_region("nothing is selected"))
}

impl SelectionTool {
    pub fn new(drag_mode: SelectionDragMode) -> Self {
        Self { drag_mode, gesture: None }
    }

    pub fn is_dragging(&self) -> bool {
        self.gesture.is_some()
    }

    pub fn select_all(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        apply_edit(editor, "Select all", |doc| {
            doc.selection = Some(doc.pixels.bounds());
            Ok(())
        })
    }

    /// Drop the selection. Without one this is a no-op.
    pub fn clear(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        if editor.current()?.selection.is_none() {
            return Ok(());
        }
        apply_edit(editor, "Deselect", |doc| {
            doc.selection = None;
            Ok(())
        })
    }

    /// Make the selected pixels transparent.
    pub fn delete_contents(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        apply_edit(editor, "Delete", |doc| {
            let rect = required_selection(doc)?;
            doc.pixels.fill_rect(rect, TRANSPARENT);
            Ok(())
        })
    }

    /// Replace the raster with the selected part of it.
    pub fn crop(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        apply_edit(editor, "Crop", |doc| {
            let rect = required_selection(doc)?;
            let visible = rect
                .clamp_to(doc.width(), doc.height())
                .ok_or_else(|| EditorError::invalid_region("selection lies outside the raster"))?;
            doc.pixels = doc.pixels.extract(visible)?;
            doc.selection = None;
            Ok(())
        })
    }

    /// Move the rectangle (not the pixels) by a pixel offset.
    ///
    /// A nudge that would leave no part of the rectangle on the raster is
    /// ignored, so the selection can always be grabbed again.
    pub fn nudge(&mut self, editor: &mut DocumentEditor, dx: i32, dy: i32) -> Result<()> {
        let doc = editor.current()?;
        let moved = required_selection(doc)?.offset(dx, dy);
        if moved.clamp_to(doc.width(), doc.height()).is_none() {
            log::debug!("ignoring nudge that would move the selection off the raster");
            return Ok(());
        }
        apply_edit(editor, "Move selection", |doc| {
            doc.selection = Some(moved);
            Ok(())
        })
    }

    /// Put the selected pixels on the clipboard as PNG.
    pub fn copy(&self, editor: &DocumentEditor, clipboard: &mut dyn ClipboardProvider) -> Result<()> {
        let doc = editor.current()?;
        let rect = required_selection(doc)?;
        let png = encode_png(&doc.pixels.extract(rect)?)?;
        clipboard.copy_image(&png, PNG_MIME)
    }

    pub fn cut(&mut self, editor: &mut DocumentEditor, clipboard: &mut dyn ClipboardProvider) -> Result<()> {
        self.copy(editor, clipboard)?;
        self.delete_contents(editor)
    }

    /// Composite the clipboard image at the top-left corner and select it.
    pub fn paste(&mut self, editor: &mut DocumentEditor, clipboard: &mut dyn ClipboardProvider) -> Result<()> {
        if editor.in_transaction() {
            return Err(EditorError::TransactionInProgress);
        }
        editor.current()?;
        let pasted = decode_png(&clipboard.paste_image()?)?;
        apply_edit(editor, "Paste", |doc| {
            doc.pixels.blend_from(&pasted, 0, 0);
            doc.selection = Some(Rect::new(0, 0, pasted.width(), pasted.height()));
            Ok(())
        })
    }

    fn end_gesture(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        let Some(gesture) = self.gesture.take() else { return Ok(()) };
        let mut doc = editor.current()?.clone();
        match gesture {
            SelectionGesture::Selecting { moved, .. } => {
                if !moved {
                    doc.selection = None;
                }
            }
            SelectionGesture::Moving { sprite: true, .. } => {
                if let (Some(floating), Some(rect)) = (doc.floating.take(), doc.selection) {
                    doc.pixels.blend_from(&floating, rect.x, rect.y);
                }
            }
            SelectionGesture::Moving { .. } => {}
        }
        editor.set_document(doc)?;
        finish_transaction(editor)
    }
}

impl ToolBehavior for SelectionTool {
    fn deactivate(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        self.end_gesture(editor)
    }

    fn pointer_start(&mut self, editor: &mut DocumentEditor, event: &PointerEvent) -> Result<ToolResponse> {
        if self.gesture.is_some() {
            return Ok(ToolResponse::none());
        }
        let mut doc = editor.current()?.clone();
        let p = event.point;

        match doc.selection {
            Some(rect) if rect.contains(p) => {
                let sprite = self.drag_mode == SelectionDragMode::MoveSprite;
                // Lift before opening the transaction so a failed lift leaves none behind.
                let floating = if sprite { Some(doc.pixels.extract(rect)?) } else { None };
                editor.begin_labeled(if sprite { "Move sprite" } else { "Move selection" })?;
                if floating.is_some() {
                    doc.floating = floating;
                    doc.pixels.fill_rect(rect, TRANSPARENT);
                    editor.set_document(doc)?;
                }
                self.gesture = Some(SelectionGesture::Moving { origin: p, start: rect, sprite });
                Ok(ToolResponse::cursor(CursorHint::Move))
            }
            _ => {
                editor.begin_labeled("Select")?;
                let anchor = clamp_point(p, &doc);
                doc.selection = Some(Rect::from_points(anchor, anchor));
                editor.set_document(doc)?;
                self.gesture = Some(SelectionGesture::Selecting { anchor, moved: false });
                Ok(ToolResponse::cursor(CursorHint::Crosshair))
            }
        }
    }

    fn pointer_move(&mut self, editor: &mut DocumentEditor, event: &PointerEvent) -> Result<ToolResponse> {
        let Some(gesture) = self.gesture.as_mut() else {
            let over_selection = editor
                .document()
                .and_then(|d| d.selection)
                .is_some_and(|r| r.contains(event.point));
            let cursor = if over_selection { CursorHint::Move } else { CursorHint::Crosshair };
            return Ok(ToolResponse::cursor(cursor));
        };
        let mut doc = editor.current()?.clone();
        match gesture {
            SelectionGesture::Selecting { anchor, moved } => {
                let p = clamp_point(event.point, &doc);
                if p != *anchor {
                    *moved = true;
                }
                doc.selection = Some(Rect::from_points(*anchor, p));
                editor.set_document(doc)?;
                Ok(ToolResponse::cursor(CursorHint::Crosshair))
            }
            SelectionGesture::Moving { origin, start, .. } => {
                let moved = start.offset(event.point.x - origin.x, event.point.y - origin.y);
                if doc.selection != Some(moved) {
                    doc.selection = Some(moved);
                    editor.set_document(doc)?;
                }
                Ok(ToolResponse::cursor(CursorHint::Move))
            }
        }
    }

    fn pointer_end(&mut self, editor: &mut DocumentEditor, _event: &PointerEvent) -> Result<ToolResponse> {
        self.end_gesture(editor)?;
        Ok(ToolResponse::none())
    }

    fn key_down(&mut self, editor: &mut DocumentEditor, event: &KeyEvent) -> Result<ToolResponse> {
        if self.gesture.is_some() {
            return Ok(ToolResponse::none());
        }
        let has_selection = editor.current()?.selection.is_some();
        match event.key.as_str() {
            "Escape" if has_selection => self.clear(editor)?,
            "Delete" | "Backspace" if has_selection => self.delete_contents(editor)?,
            "ArrowLeft" if has_selection => self.nudge(editor, -1, 0)?,
            "ArrowRight" if has_selection => self.nudge(editor, 1, 0)?,
            "ArrowUp" if has_selection => self.nudge(editor, 0, -1)?,
            "ArrowDown" if has_selection => self.nudge(editor, 0, 1)?,
            _ => return Ok(ToolResponse::none()),
        }
        Ok(ToolResponse::handled())
    }
}

// ============================================================================
// PALETTE COMPOSER (color replace)
// ============================================================================

/// Color replacement in four steps: `start`, `select_old`, `select_new`
/// (repeatable preview), `confirm`. `cancel` rolls back at any point.
#[derive(Clone, Debug, Default)]
pub struct PaletteComposerTool {
    pristine: Option<Document>,
    old_color: Option<Rgba<u8>>,
    new_color: Option<Rgba<u8>>,
}

impl PaletteComposerTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_started(&self) -> bool {
        self.pristine.is_some()
    }

    pub fn old_color(&self) -> Option<Rgba<u8>> {
        self.old_color
    }

    pub fn new_color(&self) -> Option<Rgba<u8>> {
        self.new_color
    }

    pub fn start(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        editor.begin_labeled("Replace color")?;
        self.pristine = Some(editor.current()?.clone());
        self.old_color = None;
        self.new_color = None;
        Ok(())
    }

    pub fn select_old(&mut self, editor: &mut DocumentEditor, color: Rgba<u8>) -> Result<()> {
        if self.pristine.is_none() {
            return Err(EditorError::NoTransaction);
        }
        self.old_color = Some(color);
        if let Some(new) = self.new_color {
            self.preview(editor, color, new)?;
        }
        Ok(())
    }

    pub fn select_new(&mut self, editor: &mut DocumentEditor, color: Rgba<u8>) -> Result<()> {
        if self.pristine.is_none() {
            return Err(EditorError::NoTransaction);
        }
        let old = self.old_color.ok_or(EditorError::NoColorSelected)?;
        self.new_color = Some(color);
        self.preview(editor, old, color)
    }

    /// Rewrite from the pristine snapshot so previews never accumulate.
    fn preview(&self, editor: &mut DocumentEditor, old: Rgba<u8>, new: Rgba<u8>) -> Result<()> {
        let Some(pristine) = &self.pristine else { return Err(EditorError::NoTransaction) };
        let mut doc = pristine.clone();
        for px in doc.pixels.data_mut().chunks_exact_mut(4) {
            if px == old.0 {
                px.copy_from_slice(&new.0);
            }
        }
        editor.set_document(doc)
    }

    pub fn confirm(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        if self.pristine.is_none() {
            return Err(EditorError::NoTransaction);
        }
        finish_transaction(editor)?;
        self.reset();
        Ok(())
    }

    pub fn cancel(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        if self.pristine.is_some() && editor.in_transaction() {
            editor.rollback()?;
        }
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.pristine = None;
        self.old_color = None;
        self.new_color = None;
    }
}

impl ToolBehavior for PaletteComposerTool {
    fn deactivate(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        self.cancel(editor)
    }

    /// With the composer started, pressing on the raster picks the color to
    /// replace.
    fn pointer_start(&mut self, editor: &mut DocumentEditor, event: &PointerEvent) -> Result<ToolResponse> {
        let sampled = self
            .pristine
            .as_ref()
            .and_then(|d| d.pixels.get_pixel(event.point.x, event.point.y));
        match sampled {
            Some(color) => {
                self.select_old(editor, color)?;
                Ok(ToolResponse::cursor(CursorHint::Eyedropper))
            }
            None => Ok(ToolResponse::none()),
        }
    }

    fn key_down(&mut self, editor: &mut DocumentEditor, event: &KeyEvent) -> Result<ToolResponse> {
        if !self.is_started() {
            return Ok(ToolResponse::none());
        }
        match event.key.as_str() {
            "Escape" => self.cancel(editor)?,
            "Enter" => self.confirm(editor)?,
            _ => return Ok(ToolResponse::none()),
        }
        Ok(ToolResponse::handled())
    }
}

// ============================================================================
// ADJUST (brightness / contrast / dither preview)
// ============================================================================

#[derive(Clone, Debug, PartialEq)]
pub struct DitherOptions {
    pub palette: Vec<[u8; 3]>,
    pub kernel: DitherKernel,
    pub serpentine: bool,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct AdjustParams {
    pub brightness: i32,
    pub contrast: i32,
    pub dither: Option<DitherOptions>,
}

impl AdjustParams {
    /// Field-by-field comparison.
    pub fn same_as(&self, other: &AdjustParams) -> bool {
        self.brightness == other.brightness
            && self.contrast == other.contrast
            && match (&self.dither, &other.dither) {
                (None, None) => true,
                (Some(a), Some(b)) => {
                    a.kernel == b.kernel && a.serpentine == b.serpentine && a.palette == b.palette
                }
                _ => false,
            }
    }

    pub fn is_neutral(&self) -> bool {
        self.same_as(&AdjustParams::default())
    }
}

/// Previews adjustments on a transaction held open while the tool is
/// active. Every preview is computed from the snapshot taken at activation
/// (or at the last `apply`).
#[derive(Default)]
pub struct AdjustTool {
    service: ImageAdjustService,
    pristine: Option<Document>,
    applied: AdjustParams,
}

impl AdjustTool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.pristine.is_some()
    }

    pub fn params(&self) -> &AdjustParams {
        &self.applied
    }

    /// Recompute the preview. `Ok(false)` when `params` matches what is
    /// already shown.
    pub fn update_adjustments(&mut self, editor: &mut DocumentEditor, params: AdjustParams) -> Result<bool> {
        let Some(pristine) = &self.pristine else { return Err(EditorError::NoTransaction) };
        if params.same_as(&self.applied) {
            return Ok(false);
        }
        let mut doc = pristine.clone();
        self.service.brightness(&mut doc.pixels, params.brightness);
        self.service.contrast(&mut doc.pixels, params.contrast);
        if let Some(d) = &params.dither {
            self.service.dither(&mut doc.pixels, &d.palette, d.kernel, d.serpentine);
        }
        editor.set_document(doc)?;
        self.applied = params;
        Ok(true)
    }

    /// Commit the preview and keep adjusting from the result. `Ok(false)`
    /// when there was nothing to commit.
    pub fn apply(&mut self, editor: &mut DocumentEditor) -> Result<bool> {
        if self.pristine.is_none() {
            return Err(EditorError::NoTransaction);
        }
        if editor.transaction_snapshot() == editor.document() {
            return Ok(false);
        }
        editor.commit()?;
        self.snapshot(editor)?;
        Ok(true)
    }

    fn snapshot(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        editor.begin_labeled("Adjust")?;
        self.pristine = Some(editor.current()?.clone());
        self.applied = AdjustParams::default();
        Ok(())
    }
}

impl ToolBehavior for AdjustTool {
    fn activate(&mut self, editor: &mut DocumentEditor) -> Result<ToolResponse> {
        self.snapshot(editor)?;
        Ok(ToolResponse::none())
    }

    fn deactivate(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        if self.pristine.take().is_some() && editor.in_transaction() {
            editor.rollback()?;
        }
        self.applied = AdjustParams::default();
        Ok(())
    }

    fn pointer_start(&mut self, _editor: &mut DocumentEditor, _event: &PointerEvent) -> Result<ToolResponse> {
        Ok(ToolResponse::none())
    }
}

// ============================================================================
// TOOL UNION
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ToolKind {
    #[default]
    Pencil,
    Eraser,
    FloodFill,
    Selection,
    PaletteComposer,
    Adjust,
}

impl ToolKind {
    pub fn all() -> &'static [ToolKind] {
        &[
            ToolKind::Pencil,
            ToolKind::Eraser,
            ToolKind::FloodFill,
            ToolKind::Selection,
            ToolKind::PaletteComposer,
            ToolKind::Adjust,
        ]
    }

    pub fn label(&self) -> &'static str {
        match self {
            ToolKind::Pencil => "Pencil",
            ToolKind::Eraser => "Eraser",
            ToolKind::FloodFill => "Flood Fill",
            ToolKind::Selection => "Selection",
            ToolKind::PaletteComposer => "Palette Composer",
            ToolKind::Adjust => "Adjust",
        }
    }
}

/// The active tool, one variant per kind. The controller switches on the
/// tag to reach tool-specific operations.
pub enum Tool {
    Pencil(PencilTool),
    Eraser(PencilTool),
    FloodFill(FloodFillTool),
    Selection(SelectionTool),
    PaletteComposer(PaletteComposerTool),
    Adjust(AdjustTool),
}

impl Tool {
    pub fn new(kind: ToolKind, color: Rgba<u8>, settings: &EditorSettings) -> Self {
        match kind {
            ToolKind::Pencil => Tool::Pencil(PencilTool::new(color)),
            ToolKind::Eraser => Tool::Eraser(PencilTool::eraser()),
            ToolKind::FloodFill => Tool::FloodFill(FloodFillTool::new(color, settings.fill_batch_size)),
            ToolKind::Selection => Tool::Selection(SelectionTool::default()),
            ToolKind::PaletteComposer => Tool::PaletteComposer(PaletteComposerTool::new()),
            ToolKind::Adjust => Tool::Adjust(AdjustTool::new()),
        }
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            Tool::Pencil(_) => ToolKind::Pencil,
            Tool::Eraser(_) => ToolKind::Eraser,
            Tool::FloodFill(_) => ToolKind::FloodFill,
            Tool::Selection(_) => ToolKind::Selection,
            Tool::PaletteComposer(_) => ToolKind::PaletteComposer,
            Tool::Adjust(_) => ToolKind::Adjust,
        }
    }

    fn behavior(&mut self) -> &mut dyn ToolBehavior {
        match self {
            Tool::Pencil(t) | Tool::Eraser(t) => t,
            Tool::FloodFill(t) => t,
            Tool::Selection(t) => t,
            Tool::PaletteComposer(t) => t,
            Tool::Adjust(t) => t,
        }
    }

    /// Paint color of the tool, if it has one.
    pub fn set_color(&mut self, color: Rgba<u8>) -> Result<()> {
        match self {
            Tool::Pencil(t) | Tool::Eraser(t) => t.set_color(color),
            Tool::FloodFill(t) => {
                t.set_color(color);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    pub fn has_pending_work(&self) -> bool {
        matches!(self, Tool::FloodFill(t) if t.is_pending())
    }

    /// Advance deferred work by one batch. Returns `true` while more remains.
    pub fn resume(&mut self, editor: &mut DocumentEditor) -> Result<bool> {
        match self {
            Tool::FloodFill(t) => t.resume(editor),
            _ => Ok(false),
        }
    }

    pub fn activate(&mut self, editor: &mut DocumentEditor) -> Result<ToolResponse> {
        self.behavior().activate(editor)
    }

    pub fn deactivate(&mut self, editor: &mut DocumentEditor) -> Result<()> {
        self.behavior().deactivate(editor)
    }

    pub fn pointer_start(&mut self, editor: &mut DocumentEditor, event: &PointerEvent) -> Result<ToolResponse> {
        self.behavior().pointer_start(editor, event)
    }

    pub fn pointer_move(&mut self, editor: &mut DocumentEditor, event: &PointerEvent) -> Result<ToolResponse> {
        self.behavior().pointer_move(editor, event)
    }

    pub fn pointer_end(&mut self, editor: &mut DocumentEditor, event: &PointerEvent) -> Result<ToolResponse> {
        self.behavior().pointer_end(editor, event)
    }

    pub fn key_down(&mut self, editor: &mut DocumentEditor, event: &KeyEvent) -> Result<ToolResponse> {
        self.behavior().key_down(editor, event)
    }

    pub fn key_up(&mut self, editor: &mut DocumentEditor, event: &KeyEvent) -> Result<ToolResponse> {
        self.behavior().key_up(editor, event)
    }
}
