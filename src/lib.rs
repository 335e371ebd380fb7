//! IconFE editor core: a transactional pixel-document engine with pencil,
//! eraser, flood fill, selection, color replace and adjustment tools, plus
//! the resampling, dithering and icon-container code the export path uses.

pub mod canvas;
pub mod cli;
pub mod components;
pub mod error;
pub mod io;
pub mod logger;
pub mod ops;
pub mod project;
pub mod settings;

pub use canvas::{ColorModel, Document, PixelBuffer, Point, Rect, Size};
pub use components::history::{DocumentEditor, EditorEvent, EditorState, TransactionalEditor};
pub use components::tools::{KeyEvent, PointerEvent, Tool, ToolKind, ToolResponse};
pub use error::{EditorError, Result};
pub use project::DocumentController;
pub use settings::EditorSettings;
