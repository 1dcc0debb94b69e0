//! Texture and gradient descriptors of the normalized frame.
//!
//! Two complementary statistics:
//!
//! - **Uniform LBP histogram**: each pixel is compared with 8 samples on
//!   a radius-1 circle (bilinearly interpolated off the pixel grid). The
//!   resulting bit pattern is reduced to a rotation-invariant uniform
//!   code: the number of set bits for patterns with at most two 0/1
//!   transitions, or 9 for everything else. Codes are histogrammed into
//!   [`LBP_BINS`] unit bins over `[0, 8]` and L1-normalized.
//! - **Gradient orientation histogram**: unsigned Sobel gradient
//!   orientations, magnitude-weighted, binned per non-overlapping square
//!   cell and L2-Hys normalized cell by cell.

use image::GrayImage;
use imageproc::hog::{HogOptions, hog};

/// Number of LBP histogram bins.
pub const LBP_BINS: usize = 8;

/// Sample points on the LBP circle.
const LBP_POINTS: usize = 8;

/// Code assigned to non-uniform patterns.
const NON_UNIFORM: u8 = LBP_POINTS as u8 + 1;

/// Guard added to the LBP histogram total before dividing.
const LBP_EPSILON: f64 = 1e-7;

/// Tolerance of the neighbor-versus-center comparison. Interpolated
/// samples that equal the center up to rounding still count as set.
const LBP_COMPARE_TOLERANCE: f64 = 1e-9;

/// Regularizer of the L2-Hys norm.
const HOG_EPSILON: f64 = 1e-5;

/// L2-Hys clipping value.
const HOG_CLIP: f64 = 0.2;

/// Map every 8-bit pattern to its uniform code.
fn uniform_lut() -> [u8; 256] {
    let mut lut = [0u8; 256];
    for (pattern, slot) in lut.iter_mut().enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        let bits = pattern as u8;
        let transitions = (bits ^ bits.rotate_right(1)).count_ones();
        #[allow(clippy::cast_possible_truncation)]
        let code = bits.count_ones() as u8;
        *slot = if transitions <= 2 { code } else { NON_UNIFORM };
    }
    lut
}

/// Bilinear sample at sub-pixel `(row, col)` with clamped borders.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_possible_wrap,
    clippy::cast_sign_loss
)]
fn bilinear(data: &[u8], w: usize, h: usize, row: f64, col: f64) -> f64 {
    let fy = row.floor();
    let fx = col.floor();
    let ty = row - fy;
    let tx = col - fx;
    let clamp = |v: i64, len: usize| v.clamp(0, len as i64 - 1) as usize;
    let r0 = clamp(fy as i64, h);
    let r1 = clamp(fy as i64 + 1, h);
    let c0 = clamp(fx as i64, w);
    let c1 = clamp(fx as i64 + 1, w);
    let at = |r: usize, c: usize| f64::from(data[r * w + c]);
    let top = (1.0 - tx).mul_add(at(r0, c0), tx * at(r0, c1));
    let bottom = (1.0 - tx).mul_add(at(r1, c0), tx * at(r1, c1));
    (1.0 - ty).mul_add(top, ty * bottom)
}

/// Uniform LBP code of every pixel, row-major.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn lbp_codes(image: &GrayImage) -> Vec<u8> {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let data = image.as_raw();
    let lut = uniform_lut();

    let s2 = std::f64::consts::FRAC_1_SQRT_2;
    let dr: [f64; LBP_POINTS] = [0.0, -s2, -1.0, -s2, 0.0, s2, 1.0, s2];
    let dc: [f64; LBP_POINTS] = [1.0, s2, 0.0, -s2, -1.0, -s2, 0.0, s2];

    let mut out = vec![0u8; w * h];
    for r in 0..h {
        for c in 0..w {
            let center = f64::from(data[r * w + c]);
            let mut pattern = 0usize;
            for k in 0..LBP_POINTS {
                let v = bilinear(data, w, h, r as f64 + dr[k], c as f64 + dc[k]);
                if v + LBP_COMPARE_TOLERANCE >= center {
                    pattern |= 1 << k;
                }
            }
            out[r * w + c] = lut[pattern];
        }
    }
    out
}

/// L1-normalized histogram of uniform LBP codes.
///
/// Bins are `[0,1), [1,2), ..., [7,8]`: code 8 shares the last bin and
/// the non-uniform code 9 falls outside the range and is not counted.
/// The histogram sums to 1 unless every code was non-uniform, in which
/// case it is all zeros.
#[must_use]
pub fn lbp_histogram(image: &GrayImage) -> Vec<f64> {
    let mut counts = [0u64; LBP_BINS];
    for code in lbp_codes(image) {
        let code = usize::from(code);
        if code <= LBP_BINS {
            counts[code.min(LBP_BINS - 1)] += 1;
        }
    }
    #[allow(clippy::cast_precision_loss)]
    let total = counts.iter().sum::<u64>() as f64 + LBP_EPSILON;
    #[allow(clippy::cast_precision_loss)]
    counts.iter().map(|&c| c as f64 / total).collect()
}

/// Gradient orientation histogram over `cell_size`-pixel square cells
/// with `orientations` unsigned bins each.
///
/// Gradients and per-cell votes come from [`imageproc::hog`] with
/// single-cell blocks, which leaves every cell L2-normalized; the
/// L2-Hys clip and renormalization are applied on top. Output order is
/// cell row, cell column, orientation. Partial cells at the right and
/// bottom edges are cropped away before voting.
#[must_use]
pub fn gradient_histogram(image: &GrayImage, orientations: u32, cell_size: u32) -> Vec<f64> {
    if orientations == 0 || cell_size == 0 {
        return Vec::new();
    }
    let (cells_x, cells_y) = (image.width() / cell_size, image.height() / cell_size);
    if cells_x == 0 || cells_y == 0 {
        return Vec::new();
    }
    let covered =
        image::imageops::crop_imm(image, 0, 0, cells_x * cell_size, cells_y * cell_size).to_image();
    let options = HogOptions::new(orientations as usize, false, cell_size as usize, 1, 1);
    let descriptor = match hog(&covered, options) {
        Ok(descriptor) => descriptor,
        Err(e) => {
            tracing::warn!(error = %e, "gradient histogram rejected cell layout");
            return Vec::new();
        }
    };

    let mut out: Vec<f64> = descriptor.into_iter().map(f64::from).collect();
    for cell in out.chunks_mut(orientations as usize) {
        clip_and_renormalize(cell);
    }
    out
}

/// Second half of L2-Hys on an already L2-normalized block: clip at
/// [`HOG_CLIP`] and renormalize.
fn clip_and_renormalize(block: &mut [f64]) {
    block.iter_mut().for_each(|v| *v = v.min(HOG_CLIP));
    let norm = (block.iter().map(|v| v * v).sum::<f64>() + HOG_EPSILON * HOG_EPSILON).sqrt();
    block.iter_mut().for_each(|v| *v /= norm);
}
