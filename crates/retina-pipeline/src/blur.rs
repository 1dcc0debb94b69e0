//! Gaussian kernels and separable smoothing.
//!
//! Kernels are sized in taps rather than by sigma: the sigma for a given
//! size follows the usual `0.3 * ((size - 1) / 2 - 1) + 0.8` rule, so a
//! 5-tap kernel smooths with sigma 1.1 and an 11-tap kernel with sigma 2.0.
//!
//! The same kernel drives both the normalizer's smoothing pass and the
//! Gaussian-weighted local mean of the vessel threshold.

use image::GrayImage;
use imageproc::filter::separable_filter_equal;
use imageproc::map::map_subpixels;

/// Sigma implied by a kernel of `size` taps.
#[must_use]
pub fn sigma_for_size(size: u32) -> f32 {
    #[allow(clippy::cast_precision_loss)]
    let half = (size.saturating_sub(1)) as f32 * 0.5;
    0.3f32.mul_add(half - 1.0, 0.8)
}

/// Build a normalized 1D Gaussian kernel with `size` taps.
///
/// `size` should be odd; a size of 0 or 1 yields the identity kernel.
#[must_use]
pub fn gaussian_kernel(size: u32) -> Vec<f32> {
    if size <= 1 {
        return vec![1.0];
    }
    let sigma = sigma_for_size(size);
    let half = i64::from(size / 2);
    #[allow(clippy::cast_precision_loss)]
    let raw: Vec<f32> = (-half..=half)
        .map(|i| {
            let d = i as f32;
            (-(d * d) / (2.0 * sigma * sigma)).exp()
        })
        .collect();
    let total: f32 = raw.iter().sum();
    raw.into_iter().map(|w| w / total).collect()
}

/// Apply a Gaussian blur with a kernel of `kernel_size` taps.
///
/// Border pixels are replicated. Both passes run in `f32` and the result
/// is rounded once, so a uniform image comes back unchanged. Sizes of 0
/// or 1 return the image unchanged.
#[must_use = "returns the blurred image"]
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub fn gaussian_blur(image: &GrayImage, kernel_size: u32) -> GrayImage {
    if kernel_size <= 1 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }
    let widened = map_subpixels(image, f32::from);
    let smoothed = separable_filter_equal(&widened, &gaussian_kernel(kernel_size));
    map_subpixels(&smoothed, |v| v.round().clamp(0.0, 255.0) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Create a test image with a sharp black-to-white boundary at x=5.
    fn sharp_edge_image() -> GrayImage {
        GrayImage::from_fn(10, 10, |x, _y| {
            if x < 5 {
                image::Luma([0])
            } else {
                image::Luma([255])
            }
        })
    }

    #[test]
    fn sigma_follows_size_rule() {
        assert!((sigma_for_size(5) - 1.1).abs() < 1e-6);
        assert!((sigma_for_size(11) - 2.0).abs() < 1e-6);
    }

    #[test]
    fn kernel_is_normalized_and_symmetric() {
        let kernel = gaussian_kernel(11);
        assert_eq!(kernel.len(), 11);
        let total: f32 = kernel.iter().sum();
        assert!((total - 1.0).abs() < 1e-5);
        for i in 0..5 {
            assert!((kernel[i] - kernel[10 - i]).abs() < 1e-7);
        }
        assert!(kernel[5] > kernel[4]);
    }

    #[test]
    fn size_one_returns_identical_image() {
        let img = sharp_edge_image();
        assert_eq!(gaussian_blur(&img, 1), img);
    }

    #[test]
    fn uniform_image_unchanged_by_blur() {
        let img = GrayImage::from_fn(12, 9, |_, _| image::Luma([128]));
        assert_eq!(gaussian_blur(&img, 5), img);
    }

    #[test]
    fn output_dimensions_preserved() {
        let img = GrayImage::new(17, 31);
        let blurred = gaussian_blur(&img, 5);
        assert_eq!(blurred.dimensions(), (17, 31));
    }

    #[test]
    fn kernel_wider_than_image_keeps_uniform_values() {
        let img = GrayImage::from_pixel(4, 3, image::Luma([201]));
        assert_eq!(gaussian_blur(&img, 11), img);
    }

    #[test]
    fn blur_rounds_instead_of_truncating() {
        // A single bright pixel spreads to neighbors whose exact values are
        // fractional; every output must be the rounded convolution.
        let mut img = GrayImage::from_pixel(9, 9, image::Luma([100]));
        img.put_pixel(4, 4, image::Luma([200]));
        let kernel = gaussian_kernel(5);
        let blurred = gaussian_blur(&img, 5);
        for (dy, ky) in kernel.iter().enumerate() {
            for (dx, kx) in kernel.iter().enumerate() {
                let expected = 100.0 + 100.0 * kx * ky;
                let got = blurred.get_pixel(2 + dx as u32, 2 + dy as u32).0[0];
                assert!((f32::from(got) - expected).abs() <= 0.5 + 1e-3, "got {got}, want {expected}");
            }
        }
    }

    #[test]
    fn blur_smooths_sharp_edge() {
        let img = sharp_edge_image();
        let blurred = gaussian_blur(&img, 5);
        let left_of_edge = blurred.get_pixel(4, 5).0[0];
        let right_of_edge = blurred.get_pixel(5, 5).0[0];
        assert!(left_of_edge > 0, "got {left_of_edge}");
        assert!(right_of_edge < 255, "got {right_of_edge}");
        // Far from the edge, replicated borders keep the original values.
        assert_eq!(blurred.get_pixel(0, 0).0[0], 0);
        assert_eq!(blurred.get_pixel(9, 9).0[0], 255);
    }
}
