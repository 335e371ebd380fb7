use std::path::{Path, PathBuf};

use image::Rgba;
use uuid::Uuid;

use crate::canvas::{Document, PixelBuffer, Size};
use crate::components::colors::Palette;
use crate::components::history::{DocumentEditor, EditorEvent};
use crate::components::tools::{
    AdjustParams, DitherOptions, KeyEvent, PointerEvent, SelectionDragMode, Tool, ToolKind, ToolResponse,
};
use crate::error::{EditorError, Result};
use crate::io::{MAX_ICON_EDGE, RasterStore, encode_icon, import_image, write_file};
use crate::ops::clipboard::ClipboardProvider;
use crate::ops::transform::ImageResampler;
use crate::settings::EditorSettings;

/// Per-document view toggles. Not part of the undoable document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DisplayFlags {
    pub show_grid: bool,
    pub show_preview: bool,
}

impl DisplayFlags {
    fn from_settings(settings: &EditorSettings) -> Self {
        Self { show_grid: settings.show_grid, show_preview: settings.show_preview }
    }
}

/// Single open document: its editor, the active tool and what hangs off a
/// commit (icon preview, autosave).
pub struct DocumentController {
    pub id: Uuid,
    /// Display name (derived from path or "Untitled-X")
    pub name: String,
    /// `None` for unsaved/untitled documents.
    pub path: Option<PathBuf>,
    pub display: DisplayFlags,
    editor: DocumentEditor,
    tool: Tool,
    color: Rgba<u8>,
    settings: EditorSettings,
    resampler: ImageResampler,
    store: Option<Box<dyn RasterStore>>,
    preview: Option<Vec<u8>>,
    needs_redraw: bool,
}

impl DocumentController {
    pub fn new_untitled(untitled_counter: usize, width: u32, height: u32, settings: EditorSettings) -> Result<Self> {
        let pixels = PixelBuffer::try_new(width, height)?;
        Self::from_buffer(format!("Untitled-{}", untitled_counter), pixels, settings)
    }

    /// Open the first image of `path`.
    pub fn from_file(path: &Path, settings: EditorSettings) -> Result<Self> {
        let pixels = import_image(path)?
            .into_iter()
            .next()
            .ok_or_else(|| EditorError::invalid_image("file contains no images"))?;
        let name = path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "Unknown".to_string());
        let mut ctrl = Self::from_buffer(name, pixels, settings)?;
        ctrl.path = Some(path.to_path_buf());
        log::info!("opened {}", path.display());
        Ok(ctrl)
    }

    pub fn from_buffer(name: impl Into<String>, pixels: PixelBuffer, settings: EditorSettings) -> Result<Self> {
        let mut editor = DocumentEditor::new(settings.max_undo_steps);
        editor.open(Document::new(pixels))?;
        let color = Rgba([0, 0, 0, 255]);
        let mut ctrl = Self {
            id: Uuid::new_v4(),
            name: name.into(),
            path: None,
            display: DisplayFlags::from_settings(&settings),
            tool: Tool::new(ToolKind::Pencil, color, &settings),
            color,
            resampler: ImageResampler::new(settings.resample_threshold),
            settings,
            editor,
            store: None,
            preview: None,
            needs_redraw: true,
        };
        ctrl.tool.activate(&mut ctrl.editor)?;
        ctrl.editor.take_events();
        if ctrl.display.show_preview {
            ctrl.refresh_preview();
        }
        Ok(ctrl)
    }

    /// Persist every commit through `store`.
    pub fn with_store(mut self, store: Box<dyn RasterStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Replace the document with the stored raster, if one exists.
    /// Returns `Ok(false)` when the store is empty or absent.
    pub fn restore_from_store(&mut self) -> Result<bool> {
        let Some(store) = &self.store else { return Ok(false) };
        let Some(pixels) = store.restore_rasters()?.into_iter().next() else {
            return Ok(false);
        };
        self.tool.deactivate(&mut self.editor)?;
        let opened = self.editor.open(Document::new(pixels));
        self.tool.activate(&mut self.editor)?;
        opened?;
        self.process_events();
        self.refresh_preview();
        Ok(true)
    }

    // ---- accessors ------------------------------------------------------

    pub fn editor(&self) -> &DocumentEditor {
        &self.editor
    }

    pub fn document(&self) -> Option<&Document> {
        self.editor.document()
    }

    pub fn tool(&self) -> &Tool {
        &self.tool
    }

    pub fn tool_kind(&self) -> ToolKind {
        self.tool.kind()
    }

    pub fn color(&self) -> Rgba<u8> {
        self.color
    }

    pub fn settings(&self) -> &EditorSettings {
        &self.settings
    }

    /// Last exported icon container, refreshed on every submit while the
    /// preview is shown.
    pub fn preview_icon(&self) -> Option<&[u8]> {
        self.preview.as_deref()
    }

    /// True once since the last call if the document changed on screen.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.needs_redraw)
    }

    pub fn is_dirty(&self) -> bool {
        self.editor.has_changes()
    }

    /// Get the display title (name with dirty indicator)
    pub fn display_title(&self) -> String {
        if self.is_dirty() {
            format!("{}*", self.name)
        } else {
            self.name.clone()
        }
    }

    pub fn mark_saved(&mut self) {
        self.editor.mark_saved();
    }

    // ---- tools ----------------------------------------------------------

    /// Swap the active tool. The old tool is deactivated first, so history
    /// carries over untouched.
    pub fn set_tool(&mut self, kind: ToolKind) -> Result<ToolResponse> {
        if self.tool.kind() == kind {
            return Ok(ToolResponse::none());
        }
        self.tool.deactivate(&mut self.editor)?;
        self.tool = Tool::new(kind, self.color, &self.settings);
        let response = self.tool.activate(&mut self.editor);
        self.process_events();
        log::debug!("tool: {}", kind.label());
        response
    }

    fn ensure_tool(&mut self, kind: ToolKind) -> Result<()> {
        self.set_tool(kind).map(|_| ())
    }

    /// Set the drawing color and hand it to the active tool.
    pub fn set_color(&mut self, color: Rgba<u8>) -> Result<()> {
        self.tool.set_color(color)?;
        self.color = color;
        Ok(())
    }

    pub fn set_selection_drag_mode(&mut self, mode: SelectionDragMode) -> Result<()> {
        self.ensure_tool(ToolKind::Selection)?;
        if let Tool::Selection(t) = &mut self.tool {
            t.drag_mode = mode;
        }
        Ok(())
    }

    // ---- event routing --------------------------------------------------

    pub fn pointer_start(&mut self, event: &PointerEvent) -> Result<ToolResponse> {
        let r = self.tool.pointer_start(&mut self.editor, event);
        self.process_events();
        r
    }

    pub fn pointer_move(&mut self, event: &PointerEvent) -> Result<ToolResponse> {
        let r = self.tool.pointer_move(&mut self.editor, event);
        self.process_events();
        r
    }

    pub fn pointer_end(&mut self, event: &PointerEvent) -> Result<ToolResponse> {
        let r = self.tool.pointer_end(&mut self.editor, event);
        self.process_events();
        r
    }

    pub fn key_down(&mut self, event: &KeyEvent) -> Result<ToolResponse> {
        let r = self.tool.key_down(&mut self.editor, event);
        self.process_events();
        r
    }

    pub fn key_up(&mut self, event: &KeyEvent) -> Result<ToolResponse> {
        let r = self.tool.key_up(&mut self.editor, event);
        self.process_events();
        r
    }

    pub fn has_pending_work(&self) -> bool {
        self.tool.has_pending_work()
    }

    /// Run one deferred batch (flood fill). Call once per host turn while
    /// [`Self::has_pending_work`] is true.
    pub fn run_pending(&mut self) -> Result<bool> {
        let r = self.tool.resume(&mut self.editor);
        self.process_events();
        r
    }

    // ---- history --------------------------------------------------------

    pub fn undo(&mut self) -> Result<bool> {
        self.step_history(DocumentEditor::undo)
    }

    pub fn redo(&mut self) -> Result<bool> {
        self.step_history(DocumentEditor::redo)
    }

    /// Tools that keep a transaction open (adjust) are cycled around the
    /// history step so it can run.
    fn step_history(&mut self, step: fn(&mut DocumentEditor) -> Result<bool>) -> Result<bool> {
        self.tool.deactivate(&mut self.editor)?;
        let moved = step(&mut self.editor);
        let reactivated = self.tool.activate(&mut self.editor);
        self.process_events();
        let moved = moved?;
        reactivated?;
        Ok(moved)
    }

    // ---- selection ------------------------------------------------------

    fn with_selection<T>(
        &mut self,
        f: impl FnOnce(&mut crate::components::tools::SelectionTool, &mut DocumentEditor) -> Result<T>,
    ) -> Result<T> {
        self.ensure_tool(ToolKind::Selection)?;
        let r = match &mut self.tool {
            Tool::Selection(t) => f(t, &mut self.editor),
            _ => Err(EditorError::NoTransaction),
        };
        self.process_events();
        r
    }

    pub fn select_all(&mut self) -> Result<()> {
        self.with_selection(|t, ed| t.select_all(ed))
    }

    pub fn clear_selection(&mut self) -> Result<()> {
        self.with_selection(|t, ed| t.clear(ed))
    }

    pub fn delete_selection(&mut self) -> Result<()> {
        self.with_selection(|t, ed| t.delete_contents(ed))
    }

    pub fn crop_to_selection(&mut self) -> Result<()> {
        self.with_selection(|t, ed| t.crop(ed))
    }

    pub fn copy(&mut self, clipboard: &mut dyn ClipboardProvider) -> Result<()> {
        self.with_selection(|t, ed| t.copy(ed, clipboard))
    }

    pub fn cut(&mut self, clipboard: &mut dyn ClipboardProvider) -> Result<()> {
        self.with_selection(|t, ed| t.cut(ed, clipboard))
    }

    pub fn paste(&mut self, clipboard: &mut dyn ClipboardProvider) -> Result<()> {
        self.with_selection(|t, ed| t.paste(ed, clipboard))
    }

    // ---- color replace --------------------------------------------------

    fn with_composer<T>(
        &mut self,
        f: impl FnOnce(&mut crate::components::tools::PaletteComposerTool, &mut DocumentEditor) -> Result<T>,
    ) -> Result<T> {
        self.ensure_tool(ToolKind::PaletteComposer)?;
        let r = match &mut self.tool {
            Tool::PaletteComposer(t) => f(t, &mut self.editor),
            _ => Err(EditorError::NoTransaction),
        };
        self.process_events();
        r
    }

    pub fn start_color_replace(&mut self) -> Result<()> {
        self.with_composer(|t, ed| t.start(ed))
    }

    pub fn select_old_color(&mut self, color: Rgba<u8>) -> Result<()> {
        self.with_composer(|t, ed| t.select_old(ed, color))
    }

    pub fn select_new_color(&mut self, color: Rgba<u8>) -> Result<()> {
        self.with_composer(|t, ed| t.select_new(ed, color))
    }

    pub fn confirm_color_replace(&mut self) -> Result<()> {
        self.with_composer(|t, ed| t.confirm(ed))
    }

    pub fn cancel_color_replace(&mut self) -> Result<()> {
        self.with_composer(|t, ed| t.cancel(ed))
    }

    // ---- adjustments ----------------------------------------------------

    fn with_adjust<T>(
        &mut self,
        f: impl FnOnce(&mut crate::components::tools::AdjustTool, &mut DocumentEditor) -> Result<T>,
    ) -> Result<T> {
        self.ensure_tool(ToolKind::Adjust)?;
        let r = match &mut self.tool {
            Tool::Adjust(t) => f(t, &mut self.editor),
            _ => Err(EditorError::NoTransaction),
        };
        self.process_events();
        r
    }

    pub fn update_adjustments(&mut self, params: AdjustParams) -> Result<bool> {
        self.with_adjust(|t, ed| t.update_adjustments(ed, params))
    }

    pub fn apply_adjustments(&mut self) -> Result<bool> {
        self.with_adjust(|t, ed| t.apply(ed))
    }

    /// Dither options for `palette` using the configured kernel and scan.
    pub fn dither_options(&self, palette: &Palette) -> DitherOptions {
        DitherOptions {
            palette: palette.colors.clone(),
            kernel: self.settings.default_kernel,
            serpentine: self.settings.serpentine,
        }
    }

    // ---- export ---------------------------------------------------------

    /// Icon container of the current raster, scaled to fit 256×256 first
    /// when larger.
    pub fn export_icon(&mut self) -> Result<Vec<u8>> {
        let pixels = &self.editor.current()?.pixels;
        if pixels.width() > MAX_ICON_EDGE || pixels.height() > MAX_ICON_EDGE {
            let fitted = self
                .resampler
                .resize_to_contain(pixels, Size::new(MAX_ICON_EDGE, MAX_ICON_EDGE))?;
            encode_icon(&fitted)
        } else {
            encode_icon(pixels)
        }
    }

    pub fn export_icon_to(&mut self, path: &Path) -> Result<()> {
        let bytes = self.export_icon()?;
        write_file(path, &bytes)?;
        log::info!("exported {} ({} bytes)", path.display(), bytes.len());
        Ok(())
    }

    /// Push the current raster to the store now.
    pub fn save_to_store(&mut self) -> Result<()> {
        let pixels = self.editor.current()?.pixels.clone();
        match &mut self.store {
            Some(store) => store.save_rasters(&[pixels]),
            None => Ok(()),
        }
    }

    pub fn close(&mut self) -> Result<()> {
        self.tool.deactivate(&mut self.editor)?;
        let r = self.editor.close();
        if r.is_err() {
            self.tool.activate(&mut self.editor)?;
        }
        self.process_events();
        r
    }

    // ---- commit side effects --------------------------------------------

    fn refresh_preview(&mut self) {
        match self.export_icon() {
            Ok(bytes) => self.preview = Some(bytes),
            Err(e) => log::warn!("icon preview failed: {}", e),
        }
    }

    /// Drain editor notifications: redraw on any, refresh the preview and
    /// autosave on submits. Failures here are logged and never touch the
    /// in-memory document.
    fn process_events(&mut self) {
        let events = self.editor.take_events();
        if events.is_empty() {
            return;
        }
        self.needs_redraw = true;
        if !events.contains(&EditorEvent::DocumentSubmitted) || !self.editor.is_open() {
            return;
        }
        if self.display.show_preview {
            self.refresh_preview();
        }
        if self.settings.autosave
            && let Err(e) = self.save_to_store()
        {
            log::warn!("autosave of '{}' failed: {}", self.name, e);
        }
    }
}
