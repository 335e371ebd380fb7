// ============================================================================
// ADJUSTMENT OPERATIONS: brightness, contrast and palette dithering
// ============================================================================
//
// All operations mutate a pixel buffer in place and only touch R, G and B;
// alpha is preserved. Brightness and contrast are parallelized per row via
// rayon. Dithering is sequential: error diffusion depends on visiting order.
// ============================================================================

use std::collections::HashMap;

use rayon::prelude::*;

use crate::canvas::PixelBuffer;

// ============================================================================
// DIFFUSION KERNELS
// ============================================================================

/// `(weight, dx, dy)`: share of the quantization error pushed to the pixel
/// at the given offset from the current one.
pub type KernelTap = (f64, i32, i32);

const FLOYD_STEINBERG: &[KernelTap] = &[
    (7.0 / 16.0, 1, 0),
    (3.0 / 16.0, -1, 1),
    (5.0 / 16.0, 0, 1),
    (1.0 / 16.0, 1, 1),
];

const FALSE_FLOYD_STEINBERG: &[KernelTap] = &[
    (3.0 / 8.0, 1, 0),
    (3.0 / 8.0, 0, 1),
    (2.0 / 8.0, 1, 1),
];

const STUCKI: &[KernelTap] = &[
    (8.0 / 42.0, 1, 0),
    (4.0 / 42.0, 2, 0),
    (2.0 / 42.0, -2, 1),
    (4.0 / 42.0, -1, 1),
    (8.0 / 42.0, 0, 1),
    (4.0 / 42.0, 1, 1),
    (2.0 / 42.0, 2, 1),
    (1.0 / 42.0, -2, 2),
    (2.0 / 42.0, -1, 2),
    (4.0 / 42.0, 0, 2),
    (2.0 / 42.0, 1, 2),
    (1.0 / 42.0, 2, 2),
];

const ATKINSON: &[KernelTap] = &[
    (1.0 / 8.0, 1, 0),
    (1.0 / 8.0, 2, 0),
    (1.0 / 8.0, -1, 1),
    (1.0 / 8.0, 0, 1),
    (1.0 / 8.0, 1, 1),
    (1.0 / 8.0, 0, 2),
];

const JARVIS: &[KernelTap] = &[
    (7.0 / 48.0, 1, 0),
    (5.0 / 48.0, 2, 0),
    (3.0 / 48.0, -2, 1),
    (5.0 / 48.0, -1, 1),
    (7.0 / 48.0, 0, 1),
    (5.0 / 48.0, 1, 1),
    (3.0 / 48.0, 2, 1),
    (1.0 / 48.0, -2, 2),
    (3.0 / 48.0, -1, 2),
    (5.0 / 48.0, 0, 2),
    (3.0 / 48.0, 1, 2),
    (1.0 / 48.0, 2, 2),
];

const BURKES: &[KernelTap] = &[
    (8.0 / 32.0, 1, 0),
    (4.0 / 32.0, 2, 0),
    (2.0 / 32.0, -2, 1),
    (4.0 / 32.0, -1, 1),
    (8.0 / 32.0, 0, 1),
    (4.0 / 32.0, 1, 1),
    (2.0 / 32.0, 2, 1),
];

const SIERRA: &[KernelTap] = &[
    (5.0 / 32.0, 1, 0),
    (3.0 / 32.0, 2, 0),
    (2.0 / 32.0, -2, 1),
    (4.0 / 32.0, -1, 1),
    (5.0 / 32.0, 0, 1),
    (4.0 / 32.0, 1, 1),
    (2.0 / 32.0, 2, 1),
    (2.0 / 32.0, -1, 2),
    (3.0 / 32.0, 0, 2),
    (2.0 / 32.0, 1, 2),
];

const TWO_ROW_SIERRA: &[KernelTap] = &[
    (4.0 / 16.0, 1, 0),
    (3.0 / 16.0, 2, 0),
    (1.0 / 16.0, -2, 1),
    (2.0 / 16.0, -1, 1),
    (3.0 / 16.0, 0, 1),
    (2.0 / 16.0, 1, 1),
    (1.0 / 16.0, 2, 1),
];

const SIERRA_LITE: &[KernelTap] = &[
    (2.0 / 4.0, 1, 0),
    (1.0 / 4.0, -1, 1),
    (1.0 / 4.0, 0, 1),
];

/// The nine named error-diffusion kernels, in their canonical index order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum DitherKernel {
    #[default]
    FloydSteinberg,
    FalseFloydSteinberg,
    Stucki,
    Atkinson,
    Jarvis,
    Burkes,
    Sierra,
    TwoRowSierra,
    SierraLite,
}

impl DitherKernel {
    pub fn all() -> &'static [DitherKernel] {
        &[
            DitherKernel::FloydSteinberg,
            DitherKernel::FalseFloydSteinberg,
            DitherKernel::Stucki,
            DitherKernel::Atkinson,
            DitherKernel::Jarvis,
            DitherKernel::Burkes,
            DitherKernel::Sierra,
            DitherKernel::TwoRowSierra,
            DitherKernel::SierraLite,
        ]
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::all().get(index).copied()
    }

    pub fn index(&self) -> usize {
        Self::all().iter().position(|k| k == self).unwrap_or(0)
    }

    pub fn taps(&self) -> &'static [KernelTap] {
        match self {
            DitherKernel::FloydSteinberg => FLOYD_STEINBERG,
            DitherKernel::FalseFloydSteinberg => FALSE_FLOYD_STEINBERG,
            DitherKernel::Stucki => STUCKI,
            DitherKernel::Atkinson => ATKINSON,
            DitherKernel::Jarvis => JARVIS,
            DitherKernel::Burkes => BURKES,
            DitherKernel::Sierra => SIERRA,
            DitherKernel::TwoRowSierra => TWO_ROW_SIERRA,
            DitherKernel::SierraLite => SIERRA_LITE,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DitherKernel::FloydSteinberg => "Floyd-Steinberg",
            DitherKernel::FalseFloydSteinberg => "False Floyd-Steinberg",
            DitherKernel::Stucki => "Stucki",
            DitherKernel::Atkinson => "Atkinson",
            DitherKernel::Jarvis => "Jarvis",
            DitherKernel::Burkes => "Burkes",
            DitherKernel::Sierra => "Sierra",
            DitherKernel::TwoRowSierra => "Two-Row Sierra",
            DitherKernel::SierraLite => "Sierra Lite",
        }
    }

    /// Stable lowercase name used in settings files and on the command line.
    pub fn key(&self) -> &'static str {
        match self {
            DitherKernel::FloydSteinberg => "floyd-steinberg",
            DitherKernel::FalseFloydSteinberg => "false-floyd-steinberg",
            DitherKernel::Stucki => "stucki",
            DitherKernel::Atkinson => "atkinson",
            DitherKernel::Jarvis => "jarvis",
            DitherKernel::Burkes => "burkes",
            DitherKernel::Sierra => "sierra",
            DitherKernel::TwoRowSierra => "two-row-sierra",
            DitherKernel::SierraLite => "sierra-lite",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        let key = key.trim().to_ascii_lowercase();
        Self::all().iter().copied().find(|k| k.key() == key)
    }
}

// ============================================================================
// NEAREST-COLOR CACHE
// ============================================================================

/// Memoized nearest-palette lookups, valid for one palette. Switching to a
/// different palette drops every entry.
#[derive(Default)]
struct NearestColorCache {
    palette: Vec<[u8; 3]>,
    map: HashMap<u32, [u8; 3]>,
}

impl NearestColorCache {
    fn prepare(&mut self, palette: &[[u8; 3]]) {
        if self.palette != palette {
            self.palette = palette.to_vec();
            self.map.clear();
        }
    }

    fn nearest(&mut self, rgb: [u8; 3]) -> [u8; 3] {
        let key = (rgb[0] as u32) << 16 | (rgb[1] as u32) << 8 | rgb[2] as u32;
        if let Some(hit) = self.map.get(&key) {
            return *hit;
        }
        let found = nearest_in(&self.palette, rgb);
        self.map.insert(key, found);
        found
    }
}

/// Closest palette entry by Euclidean RGB distance; ties keep the earlier entry.
pub fn nearest_in(palette: &[[u8; 3]], rgb: [u8; 3]) -> [u8; 3] {
    let mut best = palette.first().copied().unwrap_or(rgb);
    let mut best_dist = i32::MAX;
    for c in palette {
        let dr = rgb[0] as i32 - c[0] as i32;
        let dg = rgb[1] as i32 - c[1] as i32;
        let db = rgb[2] as i32 - c[2] as i32;
        let dist = dr * dr + dg * dg + db * db;
        if dist < best_dist {
            best_dist = dist;
            best = *c;
        }
    }
    best
}

// ============================================================================
// SERVICE
// ============================================================================

/// Channel adjustments and dithering. Owns its nearest-color cache, so keep
/// one instance per consumer rather than sharing a global.
#[derive(Default)]
pub struct ImageAdjustService {
    cache: NearestColorCache,
}

impl ImageAdjustService {
    pub fn new() -> Self {
        Self::default()
    }

    /// `channel = clamp(channel + delta, 0, 255)` on R, G, B.
    pub fn brightness(&self, buf: &mut PixelBuffer, delta: i32) {
        if delta == 0 {
            return;
        }
        apply_rgb(buf, move |c| (c as i32 + delta).clamp(0, 255) as u8);
    }

    /// Classic contrast curve around mid-grey. `delta` is clamped to ±255.
    pub fn contrast(&self, buf: &mut PixelBuffer, delta: i32) {
        if delta == 0 {
            return;
        }
        let d = delta.clamp(-255, 255) as f64;
        let factor = 259.0 * (d + 255.0) / (255.0 * (259.0 - d));
        apply_rgb(buf, move |c| {
            (factor * (c as f64 - 128.0) + 128.0).round_ties_even().clamp(0.0, 255.0) as u8
        });
    }

    /// Nearest palette color for `rgb`, memoized for the current palette.
    pub fn nearest_color(&mut self, palette: &[[u8; 3]], rgb: [u8; 3]) -> [u8; 3] {
        self.cache.prepare(palette);
        self.cache.nearest(rgb)
    }

    /// Error-diffusion dither onto `palette`.
    ///
    /// Rows are scanned left to right; with `serpentine` the direction
    /// alternates per row, starting left to right, and on right-to-left rows
    /// the kernel's x offsets are mirrored and its taps applied last-to-first.
    /// Every pixel of a right-to-left row is visited, column 0 included, and
    /// every tap is applied; taps landing outside the raster are dropped.
    /// Diffused channel values are clamped and truncated toward zero.
    pub fn dither(
        &mut self,
        buf: &mut PixelBuffer,
        palette: &[[u8; 3]],
        kernel: DitherKernel,
        serpentine: bool,
    ) {
        if palette.is_empty() {
            log::warn!("dither skipped: empty palette");
            return;
        }
        self.cache.prepare(palette);

        let taps = kernel.taps();
        let width = buf.width() as i64;
        let height = buf.height() as i64;
        let data = buf.data_mut();

        let mut dir: i64 = if serpentine { -1 } else { 1 };
        for y in 0..height {
            if serpentine {
                dir = -dir;
            }
            let row = y * width;
            for step in 0..width {
                let x = if dir == 1 { step } else { width - 1 - step };
                let idx = ((row + x) * 4) as usize;

                let r1 = data[idx];
                let g1 = data[idx + 1];
                let b1 = data[idx + 2];

                let [r2, g2, b2] = self.cache.nearest([r1, g1, b1]);
                data[idx] = r2;
                data[idx + 1] = g2;
                data[idx + 2] = b2;

                let er = r1 as f64 - r2 as f64;
                let eg = g1 as f64 - g2 as f64;
                let eb = b1 as f64 - b2 as f64;

                for k in 0..taps.len() {
                    let (weight, kx, ky) = if dir == 1 { taps[k] } else { taps[taps.len() - 1 - k] };
                    let nx = x + kx as i64 * dir;
                    let ny = y + ky as i64;
                    if nx < 0 || nx >= width || ny < 0 || ny >= height {
                        continue;
                    }
                    let ni = ((ny * width + nx) * 4) as usize;
                    data[ni] = diffuse(data[ni], er, weight);
                    data[ni + 1] = diffuse(data[ni + 1], eg, weight);
                    data[ni + 2] = diffuse(data[ni + 2], eb, weight);
                }
            }
        }
    }
}

#[inline(always)]
fn diffuse(channel: u8, error: f64, weight: f64) -> u8 {
    (channel as f64 + error * weight).clamp(0.0, 255.0) as u8
}

/// Map R, G, B through `f` row by row in parallel; alpha is left alone.
fn apply_rgb<F>(buf: &mut PixelBuffer, f: F)
where
    F: Fn(u8) -> u8 + Sync,
{
    let stride = buf.width() as usize * 4;
    if stride == 0 || buf.height() == 0 {
        return;
    }
    buf.data_mut().par_chunks_mut(stride).for_each(|row| {
        for px in row.chunks_exact_mut(4) {
            px[0] = f(px[0]);
            px[1] = f(px[1]);
            px[2] = f(px[2]);
        }
    });
}
