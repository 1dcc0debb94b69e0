//! Incremental extraction: advance stage-by-stage, inspecting each
//! intermediate raster before continuing.
//!
//! [`crate::extract`] runs every stage in one call. [`Pipeline`] lets
//! the caller drive execution one step at a time:
//!
//! ```rust
//! # use retina_pipeline::{DynamicImage, ExtractConfig, Pipeline, PipelineError};
//! # fn run(image: &DynamicImage) -> Result<(), PipelineError> {
//! let extracted = Pipeline::new(image, ExtractConfig::default())
//!     .normalize()?
//!     .segment_vessels()
//!     .extract_features();
//!
//! let mask = extracted.vessel_mask();
//! let record = extracted.into_record();
//! # Ok(())
//! # }
//! ```
//!
//! Each stage method consumes `self` and returns the next state,
//! carrying the rasters computed so far together with their timings.

use chrono::Utc;
use image::DynamicImage;
use uuid::Uuid;

use crate::config::ExtractConfig;
use crate::diagnostics::{ExtractDiagnostics, StageDiagnostics, StageMetrics, timed};
use crate::types::{Dimensions, FeatureRecord, GrayImage, PipelineError};

// ───────────────────────── Stage 0: Pending ──────────────────────────

/// Pipeline state before any processing has occurred.
///
/// Call [`normalize`](Self::normalize) to advance to the next stage.
#[must_use = "pipeline stages are consumed by advancing — call .normalize() to continue"]
pub struct Pending<'a> {
    config: ExtractConfig,
    source: &'a DynamicImage,
}

impl Pending<'_> {
    /// Dimensions of the source image.
    #[must_use]
    pub fn source_dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.source.width(),
            height: self.source.height(),
        }
    }

    /// Validate the configuration and bring the source image into the
    /// canonical frame.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] if the configuration is
    /// invalid, or [`PipelineError::Preprocessing`] if the image has no
    /// pixels.
    pub fn normalize(self) -> Result<Normalized, PipelineError> {
        self.config.validate()?;
        let started = web_time::Instant::now();
        let source = self.source_dimensions();
        let (normalized, duration) = timed("normalize", self.config.slow_stage_ms, || {
            crate::normalize::normalize(self.source, &self.config)
        });
        let normalized = normalized?;
        Ok(Normalized {
            normalize: StageDiagnostics {
                duration,
                metrics: StageMetrics::Normalize {
                    source_width: source.width,
                    source_height: source.height,
                    standard_size: self.config.standard_size,
                },
            },
            config: self.config,
            started,
            normalized,
        })
    }
}

// ───────────────────────── Stage 1: Normalized ───────────────────────

/// Pipeline state after normalization.
///
/// Call [`segment_vessels`](Self::segment_vessels) to advance.
#[must_use = "pipeline stages are consumed by advancing — call .segment_vessels() to continue"]
pub struct Normalized {
    config: ExtractConfig,
    started: web_time::Instant,
    normalized: GrayImage,
    normalize: StageDiagnostics,
}

impl Normalized {
    /// The canonical-frame intensity image.
    #[must_use]
    pub const fn normalized(&self) -> &GrayImage {
        &self.normalized
    }

    /// Segment the vessels of the normalized frame.
    pub fn segment_vessels(self) -> Segmented {
        let (mask, duration) = timed("vessels", self.config.slow_stage_ms, || {
            crate::vessels::segment(
                &self.normalized,
                self.config.threshold_block_size,
                self.config.threshold_offset,
            )
        });
        let vessels = StageDiagnostics {
            duration,
            metrics: StageMetrics::Vessels {
                foreground_pixels: crate::skeleton::foreground_count(&mask),
                total_pixels: u64::from(mask.width()) * u64::from(mask.height()),
            },
        };
        Segmented {
            config: self.config,
            started: self.started,
            normalized: self.normalized,
            mask,
            normalize: self.normalize,
            vessels,
        }
    }
}

// ───────────────────────── Stage 2: Segmented ────────────────────────

/// Pipeline state after vessel segmentation.
///
/// Call [`extract_features`](Self::extract_features) to finish.
#[must_use = "pipeline stages are consumed by advancing — call .extract_features() to continue"]
pub struct Segmented {
    config: ExtractConfig,
    started: web_time::Instant,
    normalized: GrayImage,
    mask: GrayImage,
    normalize: StageDiagnostics,
    vessels: StageDiagnostics,
}

impl Segmented {
    /// The canonical-frame intensity image.
    #[must_use]
    pub const fn normalized(&self) -> &GrayImage {
        &self.normalized
    }

    /// The binary vessel mask.
    #[must_use]
    pub const fn vessel_mask(&self) -> &GrayImage {
        &self.mask
    }

    /// Compute every descriptor and assemble the feature record.
    pub fn extract_features(self) -> Extracted {
        let config = &self.config;
        let slow = config.slow_stage_ms;

        let (optic_disc, disc_time) = timed("optic_disc", slow, || {
            crate::optic_disc::locate(&self.normalized, &config.optic_disc)
        });

        let ((skeleton, bifurcation_points), bifurcation_time) =
            timed("bifurcations", slow, || {
                let skeleton = crate::skeleton::thin(&self.mask);
                let points = crate::bifurcation::detect(&skeleton, &config.bifurcation);
                (skeleton, points)
            });

        let ((vessel_density, spatial, geometry), density_time) = timed("density", slow, || {
            (
                crate::density::vessel_density(&self.mask),
                crate::density::spatial_distribution(&self.mask, config.grid_size),
                crate::vessels::measure(&self.mask, config.max_vessel_components),
            )
        });

        let ((lbp_histogram, gradient_histogram), texture_time) = timed("texture", slow, || {
            (
                crate::texture::lbp_histogram(&self.normalized),
                crate::texture::gradient_histogram(
                    &self.normalized,
                    config.hog_orientations,
                    config.hog_cell_size,
                ),
            )
        });

        let diagnostics = ExtractDiagnostics {
            normalize: self.normalize,
            vessels: self.vessels,
            optic_disc: StageDiagnostics {
                duration: disc_time,
                metrics: StageMetrics::OpticDisc {
                    found: optic_disc.is_some(),
                    radius: optic_disc.map(|d| d.radius),
                },
            },
            bifurcations: StageDiagnostics {
                duration: bifurcation_time,
                metrics: StageMetrics::Bifurcations {
                    skeleton_pixels: crate::skeleton::foreground_count(&skeleton),
                    point_count: bifurcation_points.len(),
                },
            },
            density: StageDiagnostics {
                duration: density_time,
                metrics: StageMetrics::Density {
                    grid_rows: config.grid_size.rows,
                    grid_cols: config.grid_size.cols,
                    vessel_count: geometry.count,
                },
            },
            texture: StageDiagnostics {
                duration: texture_time,
                metrics: StageMetrics::Texture {
                    lbp_len: lbp_histogram.len(),
                    gradient_len: gradient_histogram.len(),
                },
            },
            total_duration: self.started.elapsed(),
        };

        let record = FeatureRecord {
            id: Uuid::new_v4(),
            lbp_histogram,
            gradient_histogram,
            vessel_density,
            avg_vessel_length: geometry.avg_length,
            avg_vessel_width: geometry.avg_width,
            vessel_count: geometry.count,
            optic_disc,
            bifurcation_points,
            vessel_spatial_distribution: spatial,
            timestamp: Utc::now(),
        };
        tracing::debug!(
            id = %record.id,
            vessel_count = record.vessel_count,
            bifurcations = record.bifurcation_points.len(),
            optic_disc = record.optic_disc.is_some(),
            total_ms = crate::diagnostics::duration_ms(diagnostics.total_duration),
            "features extracted"
        );

        Extracted {
            normalized: self.normalized,
            mask: self.mask,
            skeleton,
            record,
            diagnostics,
        }
    }
}

// ───────────────────────── Stage 3: Extracted ────────────────────────

/// Final pipeline state: the record plus every intermediate raster.
#[must_use = "call .into_record() to take the FeatureRecord"]
pub struct Extracted {
    normalized: GrayImage,
    mask: GrayImage,
    skeleton: GrayImage,
    record: FeatureRecord,
    diagnostics: ExtractDiagnostics,
}

impl Extracted {
    /// The canonical-frame intensity image.
    #[must_use]
    pub const fn normalized(&self) -> &GrayImage {
        &self.normalized
    }

    /// The binary vessel mask.
    #[must_use]
    pub const fn vessel_mask(&self) -> &GrayImage {
        &self.mask
    }

    /// The one-pixel-wide vessel skeleton.
    #[must_use]
    pub const fn skeleton(&self) -> &GrayImage {
        &self.skeleton
    }

    /// The extracted feature record.
    #[must_use]
    pub const fn record(&self) -> &FeatureRecord {
        &self.record
    }

    /// Per-stage timings and metrics.
    #[must_use]
    pub const fn diagnostics(&self) -> &ExtractDiagnostics {
        &self.diagnostics
    }

    /// Consume the pipeline, keeping only the record.
    #[must_use]
    pub fn into_record(self) -> FeatureRecord {
        self.record
    }

    /// Consume the pipeline, keeping the record and its diagnostics.
    #[must_use]
    pub fn into_parts(self) -> (FeatureRecord, ExtractDiagnostics) {
        (self.record, self.diagnostics)
    }
}

// ───────────────────────── Entry point ───────────────────────────────

/// Entry point for staged extraction.
pub struct Pipeline;

impl Pipeline {
    /// Start a pipeline over `image`.
    ///
    /// Nothing is computed until [`Pending::normalize`] is called.
    #[allow(clippy::new_ret_no_self)]
    pub const fn new(image: &DynamicImage, config: ExtractConfig) -> Pending<'_> {
        Pending {
            config,
            source: image,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn small_config() -> ExtractConfig {
        ExtractConfig {
            standard_size: 64,
            hog_cell_size: 16,
            ..ExtractConfig::default()
        }
    }

    /// Bright background crossed by two dark "vessels".
    fn vessel_image() -> DynamicImage {
        DynamicImage::ImageRgb8(image::RgbImage::from_fn(160, 120, |x, y| {
            if (64..76).contains(&x) || (45..57).contains(&y) {
                image::Rgb([60, 30, 20])
            } else {
                image::Rgb([200, 120, 80])
            }
        }))
    }

    #[test]
    fn stages_expose_intermediates() {
        let img = vessel_image();
        let normalized = Pipeline::new(&img, small_config()).normalize().unwrap();
        assert_eq!(normalized.normalized().dimensions(), (64, 64));

        let segmented = normalized.segment_vessels();
        assert_eq!(segmented.vessel_mask().dimensions(), (64, 64));

        let extracted = segmented.extract_features();
        assert_eq!(extracted.skeleton().dimensions(), (64, 64));
        assert_eq!(extracted.record().lbp_histogram.len(), 8);
        assert_eq!(extracted.record().gradient_histogram.len(), 4 * 4 * 6);
        assert_eq!(extracted.record().vessel_spatial_distribution.len(), 64);
    }

    #[test]
    fn dark_cross_is_segmented() {
        let img = vessel_image();
        let extracted = Pipeline::new(&img, small_config())
            .normalize()
            .unwrap()
            .segment_vessels()
            .extract_features();
        assert!(extracted.record().vessel_density > 0.0);
        assert!(extracted.record().vessel_count > 0);
    }

    #[test]
    fn skeleton_lies_within_mask() {
        let img = vessel_image();
        let extracted = Pipeline::new(&img, small_config())
            .normalize()
            .unwrap()
            .segment_vessels()
            .extract_features();
        for (s, m) in extracted
            .skeleton()
            .pixels()
            .zip(extracted.vessel_mask().pixels())
        {
            assert!(s.0[0] == 0 || m.0[0] > 0);
        }
    }

    #[test]
    fn diagnostics_cover_every_stage() {
        let img = vessel_image();
        let (record, diagnostics) = Pipeline::new(&img, small_config())
            .normalize()
            .unwrap()
            .segment_vessels()
            .extract_features()
            .into_parts();
        assert!(matches!(
            diagnostics.normalize.metrics,
            StageMetrics::Normalize {
                source_width: 160,
                source_height: 120,
                standard_size: 64
            }
        ));
        assert!(matches!(
            diagnostics.bifurcations.metrics,
            StageMetrics::Bifurcations { point_count, .. } if point_count == record.bifurcation_points.len()
        ));
        let stage_sum: std::time::Duration = diagnostics.stages().iter().map(|(_, s)| s.duration).sum();
        assert!(diagnostics.total_duration >= stage_sum);
    }

    #[test]
    fn invalid_config_fails_before_work() {
        let img = vessel_image();
        let config = ExtractConfig {
            threshold_block_size: 4,
            ..small_config()
        };
        assert!(matches!(
            Pipeline::new(&img, config).normalize(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn empty_image_is_a_preprocessing_error() {
        let img = DynamicImage::ImageLuma8(GrayImage::new(0, 0));
        assert!(matches!(
            Pipeline::new(&img, small_config()).normalize(),
            Err(PipelineError::Preprocessing(_))
        ));
    }
}
