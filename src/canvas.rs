use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{EditorError, Result};

/// Fully transparent black, written by the eraser and by "delete contents".
pub const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

/// Largest surface the editor will allocate (16384 × 16384 RGBA).
const MAX_SURFACE_PIXELS: u64 = 16_384 * 16_384;

// ============================================================================
// GEOMETRY
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Axis-aligned rectangle in pixel space. `x`/`y` may be negative while a
/// selection is dragged past the top-left edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Rectangle spanning both points inclusively, in any drag direction.
    pub fn from_points(a: Point, b: Point) -> Self {
        let min_x = a.x.min(b.x);
        let min_y = a.y.min(b.y);
        let max_x = a.x.max(b.x);
        let max_y = a.y.max(b.y);
        Self {
            x: min_x,
            y: min_y,
            width: (max_x - min_x) as u32 + 1,
            height: (max_y - min_y) as u32 + 1,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, p: Point) -> bool {
        (p.x as i64) >= self.x as i64
            && (p.x as i64) < self.right()
            && (p.y as i64) >= self.y as i64
            && (p.y as i64) < self.bottom()
    }

    pub fn offset(&self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x.saturating_add(dx),
            y: self.y.saturating_add(dy),
            ..*self
        }
    }

    pub fn intersect(&self, other: &Rect) -> Option<Rect> {
        let x0 = (self.x as i64).max(other.x as i64);
        let y0 = (self.y as i64).max(other.y as i64);
        let x1 = self.right().min(other.right());
        let y1 = self.bottom().min(other.bottom());
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Rect::new(x0 as i32, y0 as i32, (x1 - x0) as u32, (y1 - y0) as u32))
    }

    /// Part of the rectangle that lies on a `width` × `height` raster.
    pub fn clamp_to(&self, width: u32, height: u32) -> Option<Rect> {
        self.intersect(&Rect::new(0, 0, width, height))
    }
}

// ============================================================================
// COLOR HELPERS
// ============================================================================

/// Build an RGBA color from 8-bit channels and a 0–1 alpha, rounding alpha.
pub fn color_from_rgb_alpha(r: u8, g: u8, b: u8, alpha: f32) -> Rgba<u8> {
    let a = (alpha.clamp(0.0, 1.0) * 255.0).round() as u8;
    Rgba([r, g, b, a])
}

/// Parse `#rgb`, `#rrggbb` or `#rrggbbaa` (leading `#` optional).
pub fn parse_hex_color(value: &str) -> Result<Rgba<u8>> {
    let invalid = || EditorError::InvalidColorFormat { value: value.to_string() };
    let hex = value.trim().trim_start_matches('#');
    if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(invalid());
    }
    let channel = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());
    match hex.len() {
        3 => {
            let mut out = [0u8, 0, 0, 255];
            for (i, c) in hex.chars().enumerate() {
                let v = c.to_digit(16).ok_or_else(invalid)? as u8;
                out[i] = v * 17;
            }
            Ok(Rgba(out))
        }
        6 => Ok(Rgba([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            255,
        ])),
        8 => Ok(Rgba([
            channel(&hex[0..2])?,
            channel(&hex[2..4])?,
            channel(&hex[4..6])?,
            channel(&hex[6..8])?,
        ])),
        _ => Err(invalid()),
    }
}

pub fn to_hex_color(color: Rgba<u8>) -> String {
    if color[3] == 255 {
        format!("#{:02x}{:02x}{:02x}", color[0], color[1], color[2])
    } else {
        format!("#{:02x}{:02x}{:02x}{:02x}", color[0], color[1], color[2], color[3])
    }
}

/// Simple alpha-composite: src over dst (straight alpha).
pub fn alpha_blend(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    if src[3] == 0 { return dst; }
    if src[3] == 255 || dst[3] == 0 { return src; }
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a < 0.001 { return TRANSPARENT; }
    let inv = 1.0 / out_a;
    Rgba([
        ((src[0] as f32 * sa + dst[0] as f32 * da * (1.0 - sa)) * inv).round().clamp(0.0, 255.0) as u8,
        ((src[1] as f32 * sa + dst[1] as f32 * da * (1.0 - sa)) * inv).round().clamp(0.0, 255.0) as u8,
        ((src[2] as f32 * sa + dst[2] as f32 * da * (1.0 - sa)) * inv).round().clamp(0.0, 255.0) as u8,
        (out_a * 255.0).round().clamp(0.0, 255.0) as u8,
    ])
}

// ============================================================================
// PIXEL BUFFER
// ============================================================================

/// How the pixels were described when they entered the editor. Storage is
/// always 8-bit RGBA regardless of the model.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub enum ColorModel {
    Rgb,
    #[default]
    Rgba,
    Indexed,
}

impl ColorModel {
    pub fn name(&self) -> &'static str {
        match self {
            ColorModel::Rgb => "rgb",
            ColorModel::Rgba => "rgba",
            ColorModel::Indexed => "indexed",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rgb" => Some(ColorModel::Rgb),
            "rgba" => Some(ColorModel::Rgba),
            "indexed" => Some(ColorModel::Indexed),
            _ => None,
        }
    }
}

/// Row-major RGBA raster. `data.len() == width * height * 4` always holds.
///
/// Editing is copy-on-write at the document level: tools clone the buffer,
/// mutate the clone and hand it back to the editor, so snapshots held in the
/// undo history never alias the working pixels.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    color_model: ColorModel,
    data: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("color_model", &self.color_model)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl PixelBuffer {
    // ---- construction -------------------------------------------------------

    /// Fully transparent buffer. Use [`PixelBuffer::try_new`] when the size
    /// comes from untrusted input.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            color_model: ColorModel::Rgba,
            data: vec![0; width as usize * height as usize * 4],
        }
    }

    /// Allocate a transparent buffer, reporting [`EditorError::Memory`]
    /// instead of aborting when the surface cannot be obtained.
    pub fn try_new(width: u32, height: u32) -> Result<Self> {
        let pixels = width as u64 * height as u64;
        if pixels > MAX_SURFACE_PIXELS {
            return Err(EditorError::Memory { width, height });
        }
        let len = pixels as usize * 4;
        let mut data = Vec::new();
        data.try_reserve_exact(len)
            .map_err(|_| EditorError::Memory { width, height })?;
        data.resize(len, 0);
        Ok(Self { width, height, color_model: ColorModel::Rgba, data })
    }

    pub fn new_filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        let mut buf = Self::new(width, height);
        buf.fill(color);
        buf
    }

    /// Wrap an existing RGBA byte vector, rejecting a length mismatch.
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(EditorError::invalid_image(format!(
                "expected {} bytes for {}x{} RGBA, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self { width, height, color_model: ColorModel::Rgba, data })
    }

    pub fn from_rgba_image(img: &RgbaImage) -> Self {
        Self {
            width: img.width(),
            height: img.height(),
            color_model: ColorModel::Rgba,
            data: img.as_raw().clone(),
        }
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| RgbaImage::new(self.width, self.height))
    }

    // ---- accessors ----------------------------------------------------------

    pub fn width(&self) -> u32 { self.width }

    pub fn height(&self) -> u32 { self.height }

    pub fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }

    pub fn bounds(&self) -> Rect {
        Rect::new(0, 0, self.width, self.height)
    }

    pub fn color_model(&self) -> ColorModel {
        self.color_model
    }

    pub fn set_color_model(&mut self, model: ColorModel) {
        self.color_model = model;
    }

    pub fn with_color_model(mut self, model: ColorModel) -> Self {
        self.color_model = model;
        self
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn memory_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && (x as u32) < self.width && (y as u32) < self.height
    }

    /// Byte offset of the pixel at (x, y), or `None` outside the raster.
    pub fn index_of(&self, x: i32, y: i32) -> Option<usize> {
        if !self.contains(x, y) {
            return None;
        }
        Some((y as usize * self.width as usize + x as usize) * 4)
    }

    pub fn get_pixel(&self, x: i32, y: i32) -> Option<Rgba<u8>> {
        let i = self.index_of(x, y)?;
        Some(Rgba([self.data[i], self.data[i + 1], self.data[i + 2], self.data[i + 3]]))
    }

    /// Write one pixel. Returns `false` (and does nothing) out of bounds.
    pub fn put_pixel(&mut self, x: i32, y: i32, color: Rgba<u8>) -> bool {
        match self.index_of(x, y) {
            Some(i) => {
                self.data[i..i + 4].copy_from_slice(&color.0);
                true
            }
            None => false,
        }
    }

    // ---- bulk operations ----------------------------------------------------

    pub fn fill(&mut self, color: Rgba<u8>) {
        for px in self.data.chunks_exact_mut(4) {
            px.copy_from_slice(&color.0);
        }
    }

    /// Fill the part of `rect` that lies on the raster.
    pub fn fill_rect(&mut self, rect: Rect, color: Rgba<u8>) {
        let Some(r) = rect.clamp_to(self.width, self.height) else { return };
        let stride = self.width as usize * 4;
        for y in r.y as usize..r.bottom() as usize {
            let row = &mut self.data[y * stride..(y + 1) * stride];
            for x in r.x as usize..r.right() as usize {
                row[x * 4..x * 4 + 4].copy_from_slice(&color.0);
            }
        }
    }

    /// Copy out the pixels under `rect`. Parts of the rectangle hanging off
    /// the raster come back transparent; a rectangle that misses the raster
    /// entirely is rejected.
    pub fn extract(&self, rect: Rect) -> Result<PixelBuffer> {
        if rect.is_empty() {
            return Err(EditorError::invalid_region("empty rectangle"));
        }
        let Some(visible) = rect.clamp_to(self.width, self.height) else {
            return Err(EditorError::invalid_region(format!(
                "{}x{} at ({}, {}) lies outside the {}x{} raster",
                rect.width, rect.height, rect.x, rect.y, self.width, self.height
            )));
        };
        let mut out = PixelBuffer::try_new(rect.width, rect.height)?;
        out.color_model = self.color_model;
        let src_stride = self.width as usize * 4;
        let dst_stride = rect.width as usize * 4;
        let dx = (visible.x - rect.x) as usize;
        let dy = (visible.y - rect.y) as usize;
        let row_bytes = visible.width as usize * 4;
        for row in 0..visible.height as usize {
            let sy = visible.y as usize + row;
            let s = sy * src_stride + visible.x as usize * 4;
            let d = (dy + row) * dst_stride + dx * 4;
            out.data[d..d + row_bytes].copy_from_slice(&self.data[s..s + row_bytes]);
        }
        Ok(out)
    }

    /// Composite `src` over this buffer with its top-left at (`x`, `y`).
    /// Pixels landing outside the raster are dropped.
    pub fn blend_from(&mut self, src: &PixelBuffer, x: i32, y: i32) {
        for sy in 0..src.height as i32 {
            for sx in 0..src.width as i32 {
                let (tx, ty) = (x + sx, y + sy);
                let Some(di) = self.index_of(tx, ty) else { continue };
                let Some(top) = src.get_pixel(sx, sy) else { continue };
                let base = Rgba([self.data[di], self.data[di + 1], self.data[di + 2], self.data[di + 3]]);
                self.data[di..di + 4].copy_from_slice(&alpha_blend(base, top).0);
            }
        }
    }
}

// ============================================================================
// DOCUMENT
// ============================================================================

/// The value a [`crate::components::history::TransactionalEditor`] manages:
/// one raster plus the selection state that travels with it through undo.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Document {
    pub pixels: PixelBuffer,
    /// Rectangular region of interest, if any.
    pub selection: Option<Rect>,
    /// Pixels lifted off the raster while a sprite move is in progress.
    pub floating: Option<PixelBuffer>,
}

impl Document {
    pub fn new(pixels: PixelBuffer) -> Self {
        Self { pixels, selection: None, floating: None }
    }

    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(PixelBuffer::new(width, height))
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn memory_bytes(&self) -> usize {
        self.pixels.memory_bytes() + self.floating.as_ref().map_or(0, |f| f.memory_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_colors_parse_in_all_lengths() {
        assert_eq!(parse_hex_color("#fff").unwrap(), Rgba([255, 255, 255, 255]));
        assert_eq!(parse_hex_color("102030").unwrap(), Rgba([16, 32, 48, 255]));
        assert_eq!(parse_hex_color("#10203040").unwrap(), Rgba([16, 32, 48, 64]));
        assert!(matches!(
            parse_hex_color("#12345"),
            Err(EditorError::InvalidColorFormat { .. })
        ));
        assert!(parse_hex_color("#zzzzzz").is_err());
    }

    #[test]
    fn alpha_is_rounded_from_float() {
        assert_eq!(color_from_rgb_alpha(1, 2, 3, 0.5)[3], 128);
        assert_eq!(color_from_rgb_alpha(1, 2, 3, 1.0)[3], 255);
        assert_eq!(color_from_rgb_alpha(1, 2, 3, 0.0)[3], 0);
    }

    #[test]
    fn from_raw_rejects_wrong_length() {
        assert!(PixelBuffer::from_raw(2, 2, vec![0; 15]).is_err());
        assert!(PixelBuffer::from_raw(2, 2, vec![0; 16]).is_ok());
    }

    #[test]
    fn put_pixel_ignores_out_of_bounds() {
        let mut buf = PixelBuffer::new(2, 2);
        assert!(!buf.put_pixel(-1, 0, Rgba([1, 1, 1, 1])));
        assert!(!buf.put_pixel(2, 0, Rgba([1, 1, 1, 1])));
        assert!(buf.put_pixel(1, 1, Rgba([9, 8, 7, 6])));
        assert_eq!(&buf.data()[12..16], &[9, 8, 7, 6]);
    }

    #[test]
    fn extract_pads_off_raster_area_with_transparency() {
        let buf = PixelBuffer::new_filled(2, 2, Rgba([5, 5, 5, 255]));
        let out = buf.extract(Rect::new(1, 1, 2, 2)).unwrap();
        assert_eq!(out.get_pixel(0, 0), Some(Rgba([5, 5, 5, 255])));
        assert_eq!(out.get_pixel(1, 1), Some(TRANSPARENT));
        assert!(buf.extract(Rect::new(5, 5, 1, 1)).is_err());
    }

    #[test]
    fn rect_from_points_is_inclusive() {
        let r = Rect::from_points(Point::new(3, 4), Point::new(1, 1));
        assert_eq!(r, Rect::new(1, 1, 3, 4));
        assert!(r.contains(Point::new(3, 4)));
        assert!(!r.contains(Point::new(4, 4)));
    }
}
