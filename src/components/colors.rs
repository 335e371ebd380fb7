use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::canvas::{PixelBuffer, parse_hex_color};
use crate::error::{EditorError, Result};

// ============================================================================
// PALETTE
// ============================================================================

/// Ordered list of RGB colors fed to dithering and usage reports.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Palette {
    pub id: Option<String>,
    pub name: String,
    pub colors: Vec<[u8; 3]>,
    /// Built in; never written to the store.
    pub native: bool,
    /// Edited since it was last persisted.
    pub unsaved: bool,
}

impl Palette {
    pub fn new(name: impl Into<String>, colors: Vec<[u8; 3]>) -> Self {
        Self { id: None, name: name.into(), colors, native: false, unsaved: true }
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    /// Parse one hex color per line (`.hex` palette files). Blank lines and
    /// lines starting with `;` or `//` are skipped; alpha is dropped.
    pub fn from_hex_list(name: impl Into<String>, text: &str) -> Result<Self> {
        let mut colors = Vec::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with("//") {
                continue;
            }
            let c = parse_hex_color(line)?;
            colors.push([c[0], c[1], c[2]]);
        }
        Ok(Self::new(name, colors))
    }

    /// Built-in palette by case-insensitive name or id.
    pub fn native_by_name(name: &str) -> Option<Palette> {
        let wanted = name.trim().to_ascii_lowercase();
        native_palettes().into_iter().find(|p| {
            p.name.to_ascii_lowercase() == wanted || p.id.as_deref() == Some(wanted.as_str())
        })
    }
}

fn native(id: &str, name: &str, hex: &[u32]) -> Palette {
    Palette {
        id: Some(format!("native:{}", id)),
        name: name.to_string(),
        colors: hex.iter().map(|v| [(v >> 16) as u8, (v >> 8) as u8, *v as u8]).collect(),
        native: true,
        unsaved: false,
    }
}

/// Palettes shipped with the editor.
pub fn native_palettes() -> Vec<Palette> {
    vec![
        native("pico-8", "PICO-8", &[
            0x000000, 0x1D2B53, 0x7E2553, 0x008751, 0xAB5236, 0x5F574F, 0xC2C3C7, 0xFFF1E8,
            0xFF004D, 0xFFA300, 0xFFEC27, 0x00E436, 0x29ADFF, 0x83769C, 0xFF77A8, 0xFFCCAA,
        ]),
        native("game-boy", "Game Boy", &[0x0F380F, 0x306230, 0x8BAC0F, 0x9BBC0F]),
        native("cga", "CGA", &[
            0x000000, 0x0000AA, 0x00AA00, 0x00AAAA, 0xAA0000, 0xAA00AA, 0xAA5500, 0xAAAAAA,
            0x555555, 0x5555FF, 0x55FF55, 0x55FFFF, 0xFF5555, 0xFF55FF, 0xFFFF55, 0xFFFFFF,
        ]),
        native("1-bit", "1-bit", &[0x000000, 0xFFFFFF]),
    ]
}

// ============================================================================
// PALETTE ANALYSIS
// ============================================================================

fn nearest_index(palette: &[[u8; 3]], rgb: [u8; 3]) -> Option<usize> {
    palette
        .iter()
        .enumerate()
        .min_by_key(|(_, c)| {
            let dr = rgb[0] as i32 - c[0] as i32;
            let dg = rgb[1] as i32 - c[1] as i32;
            let db = rgb[2] as i32 - c[2] as i32;
            dr * dr + dg * dg + db * db
        })
        .map(|(i, _)| i)
}

/// How many non-transparent pixels map (nearest color) to each palette
/// entry. Same length and order as `palette.colors`.
pub fn color_usage(buf: &PixelBuffer, palette: &Palette) -> Vec<usize> {
    let mut counts = vec![0usize; palette.colors.len()];
    for px in buf.data().chunks_exact(4) {
        if px[3] == 0 {
            continue;
        }
        if let Some(i) = nearest_index(&palette.colors, [px[0], px[1], px[2]]) {
            counts[i] += 1;
        }
    }
    counts
}

/// Derive a palette of at most `max_colors` from the visible pixels of
/// `buf`. Images that already use few enough colors keep them exactly, in
/// first-seen order; others go through NeuQuant.
pub fn extract_palette(buf: &PixelBuffer, max_colors: usize) -> Palette {
    let max_colors = max_colors.clamp(1, 256);
    let mut seen = HashSet::new();
    let mut distinct = Vec::new();
    let mut pixels = Vec::with_capacity(buf.memory_bytes());
    for px in buf.data().chunks_exact(4) {
        if px[3] == 0 {
            continue;
        }
        let rgb = [px[0], px[1], px[2]];
        if seen.insert(rgb) {
            distinct.push(rgb);
        }
        pixels.extend_from_slice(&[px[0], px[1], px[2], 255]);
    }

    if distinct.len() <= max_colors {
        return Palette::new("Extracted", distinct);
    }

    let nq = color_quant::NeuQuant::new(10, max_colors, &pixels);
    let mut colors = Vec::with_capacity(max_colors);
    for i in 0..max_colors {
        if let Some(c) = nq.lookup(i) {
            let rgb = [c[0], c[1], c[2]];
            if !colors.contains(&rgb) {
                colors.push(rgb);
            }
        }
    }
    Palette::new("Extracted", colors)
}

// ============================================================================
// PALETTE STORE
// ============================================================================

/// Durable palette collection.
pub trait PaletteStore {
    fn get_all_palettes(&self) -> Vec<Palette>;

    /// Insert or replace by id, assigning one when absent.
    fn upsert_palette(&mut self, palette: Palette) -> Palette;
}

/// Native palettes plus user palettes persisted to one bincode file.
/// Write failures are logged; the in-memory list stays authoritative and
/// the affected palettes keep their `unsaved` flag.
pub struct PaletteLibrary {
    path: Option<PathBuf>,
    user: Vec<Palette>,
}

impl Default for PaletteLibrary {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl PaletteLibrary {
    /// Library that never touches disk.
    pub fn in_memory() -> Self {
        Self { path: None, user: Vec::new() }
    }

    /// Library backed by `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let user = match fs::read(&path) {
            Ok(raw) => match bincode::deserialize::<Vec<Palette>>(&raw) {
                Ok(list) => list,
                Err(e) => {
                    log::warn!("palette library {} is corrupt: {}", path.display(), e);
                    Vec::new()
                }
            },
            Err(_) => Vec::new(),
        };
        log::info!("loaded {} user palettes from {}", user.len(), path.display());
        Self { path: Some(path), user }
    }

    /// Library in the platform data directory (`IconFE/palettes.bin`).
    pub fn open_default() -> Self {
        Self::open(crate::logger::data_dir().join("IconFE").join("palettes.bin"))
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn get(&self, id: &str) -> Option<Palette> {
        self.get_all_palettes().into_iter().find(|p| p.id.as_deref() == Some(id))
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else { return Ok(()) };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| EditorError::File {
                path: parent.to_path_buf(),
                message: e.to_string(),
            })?;
        }
        let bytes = bincode::serialize(&self.user)?;
        fs::write(path, bytes).map_err(|e| EditorError::File { path: path.clone(), message: e.to_string() })
    }
}

impl PaletteStore for PaletteLibrary {
    fn get_all_palettes(&self) -> Vec<Palette> {
        let mut all = native_palettes();
        all.extend(self.user.iter().cloned());
        all
    }

    /// Upserting a native palette stores an editable copy under a new id.
    fn upsert_palette(&mut self, mut palette: Palette) -> Palette {
        if palette.native {
            palette.native = false;
            palette.id = None;
        }
        let id = palette.id.get_or_insert_with(|| Uuid::new_v4().to_string()).clone();
        palette.unsaved = true;
        match self.user.iter_mut().find(|p| p.id.as_deref() == Some(id.as_str())) {
            Some(existing) => *existing = palette,
            None => self.user.push(palette),
        }

        let saved = match self.persist() {
            Ok(()) => true,
            Err(e) => {
                log::warn!("palette '{}' kept in memory only: {}", id, e);
                false
            }
        };
        if saved {
            for p in &mut self.user {
                p.unsaved = false;
            }
        }
        self.user
            .iter()
            .find(|p| p.id.as_deref() == Some(id.as_str()))
            .cloned()
            .unwrap_or_else(|| Palette::new("", Vec::new()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn native_palettes_are_found_by_name_or_id() {
        assert_eq!(Palette::native_by_name("pico-8").map(|p| p.len()), Some(16));
        assert_eq!(Palette::native_by_name("Game Boy").map(|p| p.len()), Some(4));
        assert_eq!(Palette::native_by_name("native:1-bit").map(|p| p.colors), Some(vec![[0, 0, 0], [255, 255, 255]]));
        assert!(Palette::native_by_name("nope").is_none());
    }

    #[test]
    fn hex_list_skips_comments() {
        let p = Palette::from_hex_list("x", "; lospec\nff0000\n\n#00ff00\n// tail\n").unwrap();
        assert_eq!(p.colors, vec![[255, 0, 0], [0, 255, 0]]);
        assert!(Palette::from_hex_list("x", "red").is_err());
    }

    #[test]
    fn usage_counts_visible_pixels_by_nearest_color() {
        let mut buf = PixelBuffer::new_filled(3, 1, Rgba([250, 250, 250, 255]));
        buf.put_pixel(1, 0, Rgba([10, 0, 0, 128]));
        buf.put_pixel(2, 0, Rgba([255, 255, 255, 0]));
        let palette = Palette::new("bw", vec![[0, 0, 0], [255, 255, 255]]);
        assert_eq!(color_usage(&buf, &palette), vec![1, 1]);
    }

    #[test]
    fn extraction_keeps_small_palettes_exact() {
        let mut buf = PixelBuffer::new_filled(4, 4, Rgba([1, 2, 3, 255]));
        buf.put_pixel(0, 0, Rgba([9, 9, 9, 255]));
        buf.put_pixel(1, 0, Rgba([7, 7, 7, 0]));
        assert_eq!(extract_palette(&buf, 8).colors, vec![[9, 9, 9], [1, 2, 3]]);
    }

    #[test]
    fn extraction_reduces_many_colors() {
        let mut buf = PixelBuffer::new(32, 32);
        for y in 0..32 {
            for x in 0..32 {
                buf.put_pixel(x, y, Rgba([(x * 8) as u8, (y * 8) as u8, 128, 255]));
            }
        }
        let p = extract_palette(&buf, 8);
        assert!(!p.is_empty() && p.len() <= 8);
    }

    #[test]
    fn library_assigns_ids_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("palettes.bin");
        let mut lib = PaletteLibrary::open(&path);
        let stored = lib.upsert_palette(Palette::new("mine", vec![[1, 2, 3]]));
        let id = stored.id.clone().unwrap();
        assert!(!stored.unsaved);

        let mut renamed = stored.clone();
        renamed.name = "renamed".into();
        lib.upsert_palette(renamed);

        let reopened = PaletteLibrary::open(&path);
        let user: Vec<_> = reopened.get_all_palettes().into_iter().filter(|p| !p.native).collect();
        assert_eq!(user.len(), 1);
        assert_eq!(user[0].name, "renamed");
        assert_eq!(reopened.get(&id).map(|p| p.colors), Some(vec![[1, 2, 3]]));
    }

    #[test]
    fn upserting_a_native_palette_makes_a_copy() {
        let mut lib = PaletteLibrary::in_memory();
        let copy = lib.upsert_palette(Palette::native_by_name("cga").unwrap());
        assert!(!copy.native);
        assert!(!copy.id.as_deref().unwrap_or("").starts_with("native:"));
        assert_eq!(lib.get_all_palettes().len(), native_palettes().len() + 1);
    }
}
