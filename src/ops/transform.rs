// ============================================================================
// TRANSFORM OPERATIONS: Hermite resampling and aspect-fit sizing
// ============================================================================

use std::collections::HashMap;

use rayon::prelude::*;

use crate::canvas::{PixelBuffer, Size};
use crate::error::{EditorError, Result};

/// Longest source edge accepted before the nearest-fit pre-shrink kicks in.
pub const DEFAULT_RESAMPLE_THRESHOLD: u32 = 1024;

/// Keep at most this many scratch surfaces alive between calls.
const MAX_CACHED_SURFACES: usize = 4;

/// Largest size with the aspect ratio of `source` that fits inside `bounds`.
/// Scales up as well as down; never returns a zero edge.
pub fn scale_to_contain(bounds: Size, source: Size) -> Size {
    if source.width == 0 || source.height == 0 {
        return bounds;
    }
    let ratio = (bounds.width as f64 / source.width as f64)
        .min(bounds.height as f64 / source.height as f64);
    Size::new(
        ((source.width as f64 * ratio).round() as u32).clamp(1, bounds.width.max(1)),
        ((source.height as f64 * ratio).round() as u32).clamp(1, bounds.height.max(1)),
    )
}

/// Hermite-weighted area resampler.
///
/// Sources whose longest edge exceeds the threshold are first shrunk with
/// nearest-fit sampling into a scratch surface, which bounds the cost of the
/// weighted pass. Scratch surfaces are cached per size on the instance.
pub struct ImageResampler {
    threshold: u32,
    surfaces: HashMap<(u32, u32), PixelBuffer>,
}

impl Default for ImageResampler {
    fn default() -> Self {
        Self::new(DEFAULT_RESAMPLE_THRESHOLD)
    }
}

impl ImageResampler {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            surfaces: HashMap::new(),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn cached_surfaces(&self) -> usize {
        self.surfaces.len()
    }

    pub fn clear_cache(&mut self) {
        self.surfaces.clear();
    }

    /// Resample `src` to exactly `width` × `height`.
    pub fn resample(&mut self, src: &PixelBuffer, width: u32, height: u32) -> Result<PixelBuffer> {
        if width == 0 || height == 0 {
            return Err(EditorError::invalid_region(format!("cannot resample to {}x{}", width, height)));
        }
        if src.width() == 0 || src.height() == 0 {
            return Err(EditorError::invalid_image("cannot resample an empty raster"));
        }
        if src.width() == width && src.height() == height {
            return Ok(src.clone());
        }

        let longest = src.width().max(src.height());
        let target_fits = width <= self.threshold && height <= self.threshold;
        if longest > self.threshold && target_fits {
            let bounds = Size::new(self.threshold, self.threshold);
            let mid = scale_to_contain(bounds, src.size());
            let mid = Size::new(mid.width.max(width), mid.height.max(height));
            log::debug!(
                "pre-shrinking {}x{} to {}x{} before resampling to {}x{}",
                src.width(), src.height(), mid.width, mid.height, width, height
            );
            let surface = self.surface(mid.width, mid.height)?;
            nearest_fit_into(src, surface);
            return hermite_resample(surface, width, height);
        }

        hermite_resample(src, width, height)
    }

    /// Aspect-preserving resample so the result fits inside `bounds`.
    pub fn resize_to_contain(&mut self, src: &PixelBuffer, bounds: Size) -> Result<PixelBuffer> {
        let target = scale_to_contain(bounds, src.size());
        self.resample(src, target.width, target.height)
    }

    fn surface(&mut self, width: u32, height: u32) -> Result<&mut PixelBuffer> {
        if !self.surfaces.contains_key(&(width, height)) {
            if self.surfaces.len() >= MAX_CACHED_SURFACES {
                self.surfaces.clear();
            }
            let buf = PixelBuffer::try_new(width, height)?;
            self.surfaces.insert((width, height), buf);
        }
        self.surfaces
            .get_mut(&(width, height))
            .ok_or(EditorError::Memory { width, height })
    }
}

/// Nearest-neighbour draw of `src` stretched over the whole of `dst`.
fn nearest_fit_into(src: &PixelBuffer, dst: &mut PixelBuffer) {
    let (sw, sh) = (src.width() as usize, src.height() as usize);
    let (dw, dh) = (dst.width() as usize, dst.height() as usize);
    let stride = dw * 4;
    if stride == 0 || dh == 0 {
        return;
    }
    let src_raw = src.data();
    dst.data_mut().par_chunks_mut(stride).enumerate().for_each(|(y, row)| {
        let sy = (((y as f64 + 0.5) * sh as f64 / dh as f64) as usize).min(sh - 1);
        for x in 0..dw {
            let sx = (((x as f64 + 0.5) * sw as f64 / dw as f64) as usize).min(sw - 1);
            let si = (sy * sw + sx) * 4;
            row[x * 4..x * 4 + 4].copy_from_slice(&src_raw[si..si + 4]);
        }
    });
}

/// Hermite filter resample.
///
/// Each destination pixel integrates the source window it covers. A source
/// pixel's weight is `2w³ - 3w² + 1` of its normalized distance `w` from the
/// destination centre (pixels with `w >= 1` are skipped). Color is weighted
/// by `alpha / 250` for non-opaque pixels so near-transparent pixels do not
/// bleed their color; alpha accumulates on its own weight sum.
pub fn hermite_resample(src: &PixelBuffer, width: u32, height: u32) -> Result<PixelBuffer> {
    let mut out = PixelBuffer::try_new(width, height)?;
    out.set_color_model(src.color_model());

    let sw = src.width() as usize;
    let sh = src.height() as usize;
    let ratio_w = sw as f64 / width as f64;
    let ratio_h = sh as f64 / height as f64;
    let ratio_w_half = (ratio_w / 2.0).ceil();
    let ratio_h_half = (ratio_h / 2.0).ceil();
    let data = src.data();
    let stride = width as usize * 4;

    out.data_mut().par_chunks_mut(stride).enumerate().for_each(|(j, row)| {
        let center_y = (j as f64 + 0.5) * ratio_h;
        let yy_start = (j as f64 * ratio_h).floor() as usize;
        let yy_stop = (((j + 1) as f64 * ratio_h).ceil() as usize).min(sh);

        for i in 0..width as usize {
            let mut weights = 0.0f64;
            let mut weights_alpha = 0.0f64;
            let (mut gx_r, mut gx_g, mut gx_b, mut gx_a) = (0.0f64, 0.0f64, 0.0f64, 0.0f64);

            let center_x = (i as f64 + 0.5) * ratio_w;
            let xx_start = (i as f64 * ratio_w).floor() as usize;
            let xx_stop = (((i + 1) as f64 * ratio_w).ceil() as usize).min(sw);

            for yy in yy_start..yy_stop {
                let dy = (center_y - (yy as f64 + 0.5)).abs() / ratio_h_half;
                let w0 = dy * dy;
                for xx in xx_start..xx_stop {
                    let dx = (center_x - (xx as f64 + 0.5)).abs() / ratio_w_half;
                    let w = (w0 + dx * dx).sqrt();
                    if w >= 1.0 {
                        continue;
                    }
                    let mut weight = 2.0 * w * w * w - 3.0 * w * w + 1.0;
                    let p = (yy * sw + xx) * 4;
                    let alpha = data[p + 3] as f64;

                    gx_a += weight * alpha;
                    weights_alpha += weight;

                    if data[p + 3] < 255 {
                        weight = weight * alpha / 250.0;
                    }
                    gx_r += weight * data[p] as f64;
                    gx_g += weight * data[p + 1] as f64;
                    gx_b += weight * data[p + 2] as f64;
                    weights += weight;
                }
            }

            let o = i * 4;
            if weights > 0.0 {
                row[o] = to_channel(gx_r / weights);
                row[o + 1] = to_channel(gx_g / weights);
                row[o + 2] = to_channel(gx_b / weights);
            }
            if weights_alpha > 0.0 {
                row[o + 3] = to_channel(gx_a / weights_alpha);
            }
        }
    });

    Ok(out)
}

#[inline(always)]
fn to_channel(v: f64) -> u8 {
    v.round_ties_even().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn noisy(width: u32, height: u32) -> PixelBuffer {
        let mut buf = PixelBuffer::new(width, height);
        let mut seed = 7u32;
        for b in buf.data_mut() {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12_345);
            *b = (seed >> 16) as u8;
        }
        buf
    }

    #[test]
    fn scale_to_contain_fits_aspect() {
        let b = Size::new(16, 16);
        assert_eq!(scale_to_contain(b, Size::new(100, 100)), Size::new(16, 16));
        assert_eq!(scale_to_contain(b, Size::new(100, 50)), Size::new(16, 8));
        assert_eq!(scale_to_contain(b, Size::new(50, 100)), Size::new(8, 16));
        assert_eq!(scale_to_contain(b, Size::new(4, 2)), Size::new(16, 8));
        assert_eq!(scale_to_contain(b, Size::new(1000, 1)), Size::new(16, 1));
    }

    #[test]
    fn resampling_to_own_size_is_identity() {
        let src = noisy(13, 9);
        let out = hermite_resample(&src, 13, 9).unwrap();
        for (a, b) in src.data().chunks_exact(4).zip(out.data().chunks_exact(4)) {
            assert!((a[3] as i32 - b[3] as i32).abs() <= 1);
            if a[3] > 0 {
                for c in 0..3 {
                    assert!((a[c] as i32 - b[c] as i32).abs() <= 1, "{:?} vs {:?}", a, b);
                }
            }
        }
    }

    #[test]
    fn uniform_color_survives_downscale_and_upscale() {
        let src = PixelBuffer::new_filled(40, 30, Rgba([10, 200, 90, 255]));
        let mut resampler = ImageResampler::default();
        for (w, h) in [(16, 12), (7, 3), (80, 60)] {
            let out = resampler.resample(&src, w, h).unwrap();
            assert_eq!(out.size(), Size::new(w, h));
            for px in out.data().chunks_exact(4) {
                assert_eq!(px, &[10, 200, 90, 255]);
            }
        }
    }

    #[test]
    fn transparent_pixels_do_not_bleed_color() {
        let mut src = PixelBuffer::new(2, 1);
        src.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        src.put_pixel(1, 0, Rgba([0, 255, 0, 0]));
        let out = hermite_resample(&src, 1, 1).unwrap();
        assert_eq!(out.get_pixel(0, 0), Some(Rgba([255, 0, 0, 128])));
    }

    #[test]
    fn large_sources_are_preshrunk_through_a_cached_surface() {
        let src = PixelBuffer::new_filled(64, 32, Rgba([1, 2, 3, 255]));
        let mut resampler = ImageResampler::new(16);
        let out = resampler.resample(&src, 4, 2).unwrap();
        assert_eq!(out.size(), Size::new(4, 2));
        assert_eq!(out.get_pixel(3, 1), Some(Rgba([1, 2, 3, 255])));
        assert_eq!(resampler.cached_surfaces(), 1);
        resampler.resample(&src, 4, 2).unwrap();
        assert_eq!(resampler.cached_surfaces(), 1);
    }

    #[test]
    fn zero_target_is_rejected() {
        let src = PixelBuffer::new(4, 4);
        let mut resampler = ImageResampler::default();
        assert!(matches!(resampler.resample(&src, 0, 4), Err(EditorError::InvalidRegion { .. })));
    }

    #[test]
    fn oversized_target_reports_memory_error() {
        let src = PixelBuffer::new(4, 4);
        let mut resampler = ImageResampler::default();
        assert!(matches!(
            resampler.resample(&src, 100_000, 100_000),
            Err(EditorError::Memory { .. })
        ));
    }
}
