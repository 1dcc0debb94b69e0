//! Image decoding.
//!
//! Accepts raw image bytes (PNG, JPEG, BMP, WebP) and produces a decoded
//! [`DynamicImage`]. Channel reduction happens later, after the image has
//! been resized into the canonical frame.

use image::DynamicImage;

use crate::types::PipelineError;

/// Decode raw image bytes.
///
/// Supports whatever formats the `image` crate was built with.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized or the data is corrupt.
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, PipelineError> {
    if bytes.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    Ok(image::load_from_memory(bytes)?)
}
