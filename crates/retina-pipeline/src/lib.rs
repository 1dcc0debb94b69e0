//! retina-pipeline: retinal fundus feature extraction and comparison
//! (sans-IO).
//!
//! Turns a fundus photograph into a [`FeatureRecord`] through:
//! normalize -> vessel segmentation -> optic disc search ->
//! skeleton junctions -> vessel density -> texture descriptors,
//! and scores two records against each other with [`compare`].
//!
//! This crate has **no I/O dependencies** -- it operates on decoded
//! images or in-memory byte slices and returns structured data. Fetching
//! images and persisting records is the caller's business; see
//! `retina-worker`.

pub mod bifurcation;
pub mod blur;
pub mod cache;
pub mod canonical;
pub mod clahe;
pub mod compare;
pub mod config;
pub mod density;
pub mod diagnostics;
pub mod grayscale;
pub mod normalize;
pub mod optic_disc;
pub mod pipeline;
pub mod skeleton;
pub mod texture;
pub mod types;
pub mod vessels;

pub use cache::{CachedExtractor, FeatureCache, ImageKey, image_key};
pub use canonical::{canonicalize, compare_documents, from_document, to_document};
pub use config::{
    BifurcationParams, CacheConfig, ExtractConfig, GridSize, MatchConfig, OpticDiscParams,
    SimilarityWeights,
};
pub use diagnostics::{ExtractDiagnostics, StageDiagnostics, StageMetrics};
pub use pipeline::Pipeline;
pub use types::{
    Dimensions, DynamicImage, FeatureRecord, GrayImage, OpticDisc, PipelineError, Point,
    SimilarityResult,
};

/// Extract the feature record of a decoded image.
///
/// # Pipeline steps
///
/// 1. Resize to the canonical frame, reduce to intensity, CLAHE, smooth
/// 2. Adaptive threshold and opening to a vessel mask
/// 3. Hough search for the optic disc
/// 4. Thin the mask and detect junctions
/// 5. Global density, grid density, and component geometry
/// 6. Uniform LBP and gradient orientation histograms
///
/// Every call produces a fresh `id` and `timestamp`; all other fields
/// depend only on the image and `config`.
///
/// # Errors
///
/// Returns [`PipelineError::InvalidConfig`] if `config` is invalid.
/// Returns [`PipelineError::Preprocessing`] if the image has no pixels.
pub fn extract(image: &DynamicImage, config: &ExtractConfig) -> Result<FeatureRecord, PipelineError> {
    Ok(run(image, config)?.into_record())
}

/// Like [`extract`], also returning per-stage diagnostics.
///
/// # Errors
///
/// Same as [`extract`].
pub fn extract_with_diagnostics(
    image: &DynamicImage,
    config: &ExtractConfig,
) -> Result<(FeatureRecord, ExtractDiagnostics), PipelineError> {
    Ok(run(image, config)?.into_parts())
}

/// Decode raw image bytes (PNG, JPEG, BMP, WebP) and extract.
///
/// # Errors
///
/// Returns [`PipelineError::EmptyInput`] if `image_bytes` is empty.
/// Returns [`PipelineError::ImageDecode`] if the image format is
/// unrecognized. Otherwise the same as [`extract`].
pub fn extract_bytes(image_bytes: &[u8], config: &ExtractConfig) -> Result<FeatureRecord, PipelineError> {
    let image = grayscale::decode(image_bytes)?;
    extract(&image, config)
}

/// Score two records against each other.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedFeatureRecord`] if either record is
/// unusable (empty or mismatched vectors, non-finite values).
pub fn compare(
    a: &FeatureRecord,
    b: &FeatureRecord,
    config: &MatchConfig,
) -> Result<SimilarityResult, PipelineError> {
    compare::compare(a, b, config)
}

fn run(image: &DynamicImage, config: &ExtractConfig) -> Result<pipeline::Extracted, PipelineError> {
    Ok(Pipeline::new(image, config.clone())
        .normalize()?
        .segment_vessels()
        .extract_features())
}
