//! Canonical-frame normalization.
//!
//! Every image, whatever its size or channel layout, is brought into the
//! same analysis frame before any feature is measured:
//!
//! 1. area-averaging resize to `standard_size × standard_size`
//! 2. reduction to a single intensity channel
//! 3. CLAHE contrast enhancement
//! 4. a small Gaussian smoothing pass to calm enhancement noise
//!
//! Retinal photographs are almost always downsampled here, and averaging
//! every covered source pixel suppresses sensor noise instead of aliasing
//! it. Intensity uses BT.601 weights.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageBuffer, Luma, Pixel};
use imageproc::map::map_pixels;

use crate::config::ExtractConfig;
use crate::types::PipelineError;

/// Normalize `image` into the canonical single-channel frame.
///
/// # Errors
///
/// Returns [`PipelineError::Preprocessing`] if the image has zero width
/// or height.
pub fn normalize(image: &DynamicImage, config: &ExtractConfig) -> Result<GrayImage, PipelineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::Preprocessing(format!(
            "image has no pixels ({}x{})",
            image.width(),
            image.height()
        )));
    }
    let size = config.standard_size;

    let gray = if image.color().has_color() {
        to_intensity(&DynamicImage::ImageRgb8(resize_area(&image.to_rgb8(), size, size)))
    } else {
        resize_area(&image.to_luma8(), size, size)
    };

    let enhanced = crate::clahe::equalize(&gray, config.clahe_tile_grid, config.clahe_clip_limit);
    Ok(crate::blur::gaussian_blur(
        &enhanced,
        config.smoothing_kernel_size,
    ))
}

/// Reduce an image to one intensity channel with BT.601 weights.
///
/// Color images use the 14-bit fixed-point form
/// `(4899 R + 9617 G + 1868 B + 8192) >> 14`; single-channel images pass
/// through.
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn to_intensity(image: &DynamicImage) -> GrayImage {
    if !image.color().has_color() {
        return image.to_luma8();
    }
    map_pixels(&image.to_rgb8(), |p| {
        let [r, g, b] = p.0.map(u32::from);
        Luma([((4899 * r + 9617 * g + 1868 * b + 8192) >> 14) as u8])
    })
}

/// Resize to `width x height`.
///
/// Shrinking averages the block of source pixels behind each destination
/// pixel through [`imageops::thumbnail`]. When either axis grows there is
/// no block to average, so the image is interpolated bilinearly instead.
#[must_use = "returns the resized image"]
pub fn resize_area<P>(
    image: &ImageBuffer<P, Vec<u8>>,
    width: u32,
    height: u32,
) -> ImageBuffer<P, Vec<u8>>
where
    P: Pixel<Subpixel = u8> + 'static,
{
    let (sw, sh) = image.dimensions();
    if sw >= width && sh >= height {
        imageops::thumbnail(image, width, height)
    } else {
        imageops::resize(image, width, height, FilterType::Triangle)
    }
}
