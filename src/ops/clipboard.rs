// ============================================================================
// CLIPBOARD: PNG image exchange with the system or an in-process clipboard
// ============================================================================

use std::borrow::Cow;

use crate::canvas::PixelBuffer;
use crate::error::{EditorError, Result};
use crate::io::{decode_png, encode_png};

/// The only clipboard payload the editor exchanges.
pub const PNG_MIME: &str = "image/png";

/// Reject anything that is not PNG with the typed warning.
pub fn ensure_png_mime(mime: &str) -> Result<()> {
    if mime.eq_ignore_ascii_case(PNG_MIME) {
        Ok(())
    } else {
        log::warn!("clipboard: refusing '{}' payload", mime);
        Err(EditorError::UnsupportedClipboardType { mime: mime.to_string() })
    }
}

/// Where copy/cut/paste bytes go. Payloads are PNG-encoded images.
pub trait ClipboardProvider {
    fn copy_image(&mut self, bytes: &[u8], mime: &str) -> Result<()>;

    fn paste_image(&mut self) -> Result<Vec<u8>>;
}

// ---------------------------------------------------------------------------
//  In-process clipboard
// ---------------------------------------------------------------------------

/// Clipboard held in memory. Used headless and in tests.
#[derive(Default, Debug, Clone)]
pub struct MemoryClipboard {
    content: Option<(Vec<u8>, String)>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Put raw bytes with an arbitrary mime type on the clipboard, the way a
    /// foreign application would.
    pub fn put_foreign(&mut self, bytes: Vec<u8>, mime: &str) {
        self.content = Some((bytes, mime.to_string()));
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_none()
    }
}

impl ClipboardProvider for MemoryClipboard {
    fn copy_image(&mut self, bytes: &[u8], mime: &str) -> Result<()> {
        ensure_png_mime(mime)?;
        self.content = Some((bytes.to_vec(), mime.to_string()));
        Ok(())
    }

    fn paste_image(&mut self) -> Result<Vec<u8>> {
        let Some((bytes, mime)) = &self.content else {
            return Err(EditorError::Clipboard { message: "clipboard is empty".into() });
        };
        ensure_png_mime(mime)?;
        Ok(bytes.clone())
    }
}

// ---------------------------------------------------------------------------
//  System clipboard helpers (OS-level copy/paste via arboard)
// ---------------------------------------------------------------------------

/// The OS clipboard. arboard speaks raw RGBA, so PNG payloads are decoded on
/// copy and re-encoded on paste.
#[derive(Default, Debug, Clone, Copy)]
pub struct SystemClipboard;

impl SystemClipboard {
    fn open() -> Result<arboard::Clipboard> {
        arboard::Clipboard::new().map_err(|e| EditorError::Clipboard { message: e.to_string() })
    }
}

impl ClipboardProvider for SystemClipboard {
    fn copy_image(&mut self, bytes: &[u8], mime: &str) -> Result<()> {
        ensure_png_mime(mime)?;
        let buf = decode_png(bytes)?;
        let mut clip = Self::open()?;
        // arboard wants ImageData { width, height, bytes: Cow<[u8]> } in RGBA order.
        let data = arboard::ImageData {
            width: buf.width() as usize,
            height: buf.height() as usize,
            bytes: Cow::Borrowed(buf.data()),
        };
        clip.set_image(data)
            .map_err(|e| EditorError::Clipboard { message: e.to_string() })
    }

    /// Raw image data first; failing that, clipboard text naming an image
    /// file on disk.
    fn paste_image(&mut self) -> Result<Vec<u8>> {
        let mut clip = Self::open()?;
        if let Ok(img) = clip.get_image() {
            let buf = PixelBuffer::from_raw(img.width as u32, img.height as u32, img.bytes.into_owned())?;
            return encode_png(&buf);
        }

        if let Ok(text) = clip.get_text() {
            let path = std::path::Path::new(text.trim());
            if path.is_file() {
                let img = image::open(path)?;
                return encode_png(&PixelBuffer::from_rgba_image(&img.to_rgba8()));
            }
        }

        Err(EditorError::Clipboard { message: "no image on the clipboard".into() })
    }
}
