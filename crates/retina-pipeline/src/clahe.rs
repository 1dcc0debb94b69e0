//! Contrast Limited Adaptive Histogram Equalization.
//!
//! Fundus images are unevenly lit: the optic disc is bright, the
//! periphery falls off into darkness. A global equalization would spend
//! its whole dynamic range on that gradient. CLAHE instead equalizes each
//! tile separately, clips every tile histogram so flat regions do not get
//! their noise amplified, and bilinearly interpolates between the tile
//! mappings so tile borders stay invisible.

use image::GrayImage;

/// Apply CLAHE with `tiles` tiles per axis.
///
/// `clip_limit` is a multiple of the uniform bin height
/// (`tile_pixels / 256`); values `<= 0` disable clipping. The tile size
/// is rounded up so the grid covers the whole image; tiles on the right
/// and bottom edge may be smaller.
#[must_use = "returns the equalized image"]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn equalize(image: &GrayImage, tiles: u32, clip_limit: f32) -> GrayImage {
    let (w, h) = (image.width() as usize, image.height() as usize);
    if w == 0 || h == 0 || tiles == 0 {
        return image.clone();
    }
    let tiles = tiles as usize;
    let tile_w = w.div_ceil(tiles);
    let tile_h = h.div_ceil(tiles);
    let cols = w.div_ceil(tile_w);
    let rows = h.div_ceil(tile_h);
    let src = image.as_raw();

    // Per-tile lookup tables.
    let mut luts = vec![[0u8; 256]; cols * rows];
    for ty in 0..rows {
        for tx in 0..cols {
            let x0 = tx * tile_w;
            let y0 = ty * tile_h;
            let x1 = (x0 + tile_w).min(w);
            let y1 = (y0 + tile_h).min(h);
            let tile_pixels = (x1 - x0) * (y1 - y0);

            let mut hist = [0u32; 256];
            for y in y0..y1 {
                for &v in &src[y * w + x0..y * w + x1] {
                    hist[usize::from(v)] += 1;
                }
            }
            if clip_limit > 0.0 {
                clip_histogram(&mut hist, tile_pixels, clip_limit);
            }
            luts[ty * cols + tx] = build_lut(&hist, tile_pixels);
        }
    }

    // Remap each pixel through the four nearest tile mappings.
    let center = |t: usize, size: usize| (t as f32 + 0.5) * size as f32;
    let mut out = GrayImage::new(image.width(), image.height());
    for y in 0..h {
        let fy = (y as f32 + 0.5) / tile_h as f32 - 0.5;
        let ty0 = (fy.floor().max(0.0) as usize).min(rows - 1);
        let ty1 = (ty0 + 1).min(rows - 1);
        let ay = if ty0 == ty1 {
            0.0
        } else {
            ((y as f32 + 0.5 - center(ty0, tile_h)) / tile_h as f32).clamp(0.0, 1.0)
        };
        for x in 0..w {
            let fx = (x as f32 + 0.5) / tile_w as f32 - 0.5;
            let tx0 = (fx.floor().max(0.0) as usize).min(cols - 1);
            let tx1 = (tx0 + 1).min(cols - 1);
            let ax = if tx0 == tx1 {
                0.0
            } else {
                ((x as f32 + 0.5 - center(tx0, tile_w)) / tile_w as f32).clamp(0.0, 1.0)
            };

            let v = usize::from(src[y * w + x]);
            let v00 = f32::from(luts[ty0 * cols + tx0][v]);
            let v10 = f32::from(luts[ty0 * cols + tx1][v]);
            let v01 = f32::from(luts[ty1 * cols + tx0][v]);
            let v11 = f32::from(luts[ty1 * cols + tx1][v]);

            let top = v00.mul_add(1.0 - ax, v10 * ax);
            let bottom = v01.mul_add(1.0 - ax, v11 * ax);
            let val = top.mul_add(1.0 - ay, bottom * ay);
            out.as_mut()[y * w + x] = val.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Clip histogram bins at `clip_multiplier * total / 256` and spread the
/// excess evenly, with any remainder going one count at a time across
/// the range.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn clip_histogram(hist: &mut [u32; 256], total_pixels: usize, clip_multiplier: f32) {
    let clip = ((clip_multiplier * total_pixels as f32 / 256.0) as u32).max(1);

    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }

    let per_bin = excess / 256;
    let remainder = (excess % 256) as usize;
    for bin in hist.iter_mut() {
        *bin += per_bin;
    }
    if remainder > 0 {
        let step = (256 / remainder).max(1);
        for bin in hist.iter_mut().step_by(step).take(remainder) {
            *bin += 1;
        }
    }
}

/// Cumulative mapping scaled so a full tile maps to 255.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
fn build_lut(hist: &[u32; 256], total_pixels: usize) -> [u8; 256] {
    let mut lut = [0u8; 256];
    if total_pixels == 0 {
        return lut;
    }
    let scale = 255.0 / total_pixels as f32;
    let mut cumulative = 0u32;
    for (slot, &count) in lut.iter_mut().zip(hist.iter()) {
        cumulative += count;
        *slot = (cumulative as f32 * scale).round().clamp(0.0, 255.0) as u8;
    }
    lut
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_dimensions_preserved() {
        let img = GrayImage::from_fn(50, 30, |x, y| image::Luma([((x + y) % 256) as u8]));
        let out = equalize(&img, 8, 2.0);
        assert_eq!(out.dimensions(), (50, 30));
    }

    #[test]
    fn constant_image_stays_constant() {
        let img = GrayImage::from_pixel(64, 64, image::Luma([90]));
        let out = equalize(&img, 8, 2.0);
        let first = out.get_pixel(0, 0).0[0];
        assert!(out.pixels().all(|p| p.0[0] == first));
    }

    #[test]
    fn low_contrast_ramp_is_stretched() {
        // Values only span 100..=115; equalization should widen that.
        let img = GrayImage::from_fn(64, 64, |x, _| image::Luma([100 + (x / 4) as u8]));
        let out = equalize(&img, 2, 4.0);
        let min = out.pixels().map(|p| p.0[0]).min().unwrap_or(0);
        let max = out.pixels().map(|p| p.0[0]).max().unwrap_or(0);
        assert!(max - min > 15, "expected stretched range, got {min}..={max}");
    }

    #[test]
    fn clipping_limits_contrast_gain() {
        let img = GrayImage::from_fn(64, 64, |x, _| image::Luma([100 + (x / 4) as u8]));
        let unclipped = equalize(&img, 2, 0.0);
        let clipped = equalize(&img, 2, 1.0);
        let spread = |im: &GrayImage| {
            let min = im.pixels().map(|p| p.0[0]).min().unwrap_or(0);
            let max = im.pixels().map(|p| p.0[0]).max().unwrap_or(0);
            max - min
        };
        assert!(spread(&clipped) <= spread(&unclipped));
    }

    #[test]
    fn clip_histogram_preserves_total() {
        let mut hist = [0u32; 256];
        hist[10] = 1000;
        hist[20] = 24;
        clip_histogram(&mut hist, 1024, 2.0);
        assert_eq!(hist.iter().sum::<u32>(), 1024);
        assert!(hist[10] < 1000);
    }

    #[test]
    fn lut_is_monotonic() {
        let mut hist = [0u32; 256];
        for (i, bin) in hist.iter_mut().enumerate() {
            *bin = (i % 7) as u32;
        }
        let total = hist.iter().sum::<u32>() as usize;
        let lut = build_lut(&hist, total);
        assert!(lut.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(lut[255], 255);
    }
}
