//! Tunable parameters for extraction, comparison, and caching.
//!
//! Every struct has a [`Default`] matching the reference parameter set
//! and a `validate` method that rejects values the algorithms cannot
//! work with.

use serde::{Deserialize, Serialize};

use crate::types::PipelineError;

/// Rows and columns of the spatial vessel-density grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSize {
    /// Number of grid rows.
    pub rows: u32,
    /// Number of grid columns.
    pub cols: u32,
}

impl GridSize {
    /// Number of cells in the grid.
    #[must_use]
    pub const fn cell_count(self) -> usize {
        self.rows as usize * self.cols as usize
    }
}

/// Parameters of the gradient Hough circle detector used to find the
/// optic disc.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OpticDiscParams {
    /// Smallest radius searched, in pixels.
    pub min_radius: u32,
    /// Largest radius searched, in pixels.
    pub max_radius: u32,
    /// Minimum distance between two candidate centers.
    pub min_center_distance: f64,
    /// Canny high threshold; the low threshold is half of it.
    pub canny_high: f32,
    /// Votes a center (and its best radius) needs to be accepted.
    pub accumulator_threshold: u32,
}

impl Default for OpticDiscParams {
    fn default() -> Self {
        Self {
            min_radius: 10,
            max_radius: 50,
            min_center_distance: 50.0,
            canny_high: 50.0,
            accumulator_threshold: 30,
        }
    }
}

/// Parameters of the skeleton junction detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BifurcationParams {
    /// Weight of the center pixel in the 3x3 junction kernel.
    pub center_weight: u32,
    /// Responses must be strictly greater than this to count.
    pub response_threshold: u32,
    /// Minimum Chebyshev separation between reported points.
    pub min_distance: u32,
    /// Maximum number of points reported.
    pub max_points: usize,
}

impl Default for BifurcationParams {
    fn default() -> Self {
        Self {
            center_weight: 10,
            response_threshold: 12,
            min_distance: 5,
            max_points: 50,
        }
    }
}

/// Configuration for feature extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    /// Side length of the square canonical analysis frame.
    pub standard_size: u32,
    /// CLAHE clip limit, as a multiple of the uniform bin height.
    pub clahe_clip_limit: f32,
    /// CLAHE tiles per axis.
    pub clahe_tile_grid: u32,
    /// Gaussian smoothing kernel size (odd; 1 disables smoothing).
    pub smoothing_kernel_size: u32,
    /// Adaptive threshold neighborhood size (odd, at least 3).
    pub threshold_block_size: u32,
    /// Constant subtracted from the local mean before thresholding.
    pub threshold_offset: i32,
    /// Optic disc detector parameters.
    pub optic_disc: OpticDiscParams,
    /// Junction detector parameters.
    pub bifurcation: BifurcationParams,
    /// Spatial density grid shape.
    pub grid_size: GridSize,
    /// Orientation bins of the gradient histogram.
    pub hog_orientations: u32,
    /// Cell side length of the gradient histogram, in pixels.
    pub hog_cell_size: u32,
    /// Maximum number of vessel components measured.
    pub max_vessel_components: usize,
    /// Stages slower than this are logged at warn level.
    pub slow_stage_ms: u64,
}

impl ExtractConfig {
    /// Default canonical frame size.
    pub const DEFAULT_STANDARD_SIZE: u32 = 256;
    /// Default CLAHE clip limit.
    pub const DEFAULT_CLAHE_CLIP_LIMIT: f32 = 2.0;
    /// Default CLAHE tiles per axis.
    pub const DEFAULT_CLAHE_TILE_GRID: u32 = 8;
    /// Default smoothing kernel size.
    pub const DEFAULT_SMOOTHING_KERNEL_SIZE: u32 = 5;
    /// Default adaptive threshold block size.
    pub const DEFAULT_THRESHOLD_BLOCK_SIZE: u32 = 11;
    /// Default adaptive threshold offset.
    pub const DEFAULT_THRESHOLD_OFFSET: i32 = 2;
    /// Default gradient orientation bins.
    pub const DEFAULT_HOG_ORIENTATIONS: u32 = 6;
    /// Default gradient cell size.
    pub const DEFAULT_HOG_CELL_SIZE: u32 = 32;
    /// Default cap on measured vessel components.
    pub const DEFAULT_MAX_VESSEL_COMPONENTS: usize = 50;
    /// Default slow-stage logging threshold.
    pub const DEFAULT_SLOW_STAGE_MS: u64 = 100;
    /// Largest accepted canonical frame size.
    pub const MAX_STANDARD_SIZE: u32 = 4096;
    /// Largest accepted number of gradient orientation bins.
    pub const MAX_HOG_ORIENTATIONS: u32 = 360;

    /// Check the configuration for values the pipeline cannot use.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] describing the first
    /// offending field.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.standard_size == 0 || self.standard_size > Self::MAX_STANDARD_SIZE {
            return Err(invalid("standard_size must be in 1..=4096"));
        }
        if !(self.clahe_clip_limit.is_finite() && self.clahe_clip_limit >= 0.0) {
            return Err(invalid("clahe_clip_limit must be finite and non-negative"));
        }
        if self.clahe_tile_grid == 0 || self.clahe_tile_grid > self.standard_size {
            return Err(invalid("clahe_tile_grid must be in 1..=standard_size"));
        }
        if self.smoothing_kernel_size % 2 == 0 {
            return Err(invalid("smoothing_kernel_size must be odd"));
        }
        if self.threshold_block_size < 3 || self.threshold_block_size % 2 == 0 {
            return Err(invalid("threshold_block_size must be odd and at least 3"));
        }
        let disc = &self.optic_disc;
        if disc.min_radius == 0 || disc.min_radius > disc.max_radius {
            return Err(invalid(
                "optic_disc radii must satisfy 0 < min_radius <= max_radius",
            ));
        }
        if !(disc.canny_high.is_finite() && disc.canny_high > 0.0) {
            return Err(invalid("optic_disc.canny_high must be positive"));
        }
        let grid = self.grid_size;
        if grid.rows == 0
            || grid.cols == 0
            || grid.rows > self.standard_size
            || grid.cols > self.standard_size
        {
            return Err(invalid("grid_size rows and cols must be in 1..=standard_size"));
        }
        if self.hog_orientations == 0 || self.hog_orientations > Self::MAX_HOG_ORIENTATIONS {
            return Err(invalid("hog_orientations must be in 1..=360"));
        }
        if self.hog_cell_size == 0 || self.hog_cell_size > self.standard_size {
            return Err(invalid("hog_cell_size must be in 1..=standard_size"));
        }
        Ok(())
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            standard_size: Self::DEFAULT_STANDARD_SIZE,
            clahe_clip_limit: Self::DEFAULT_CLAHE_CLIP_LIMIT,
            clahe_tile_grid: Self::DEFAULT_CLAHE_TILE_GRID,
            smoothing_kernel_size: Self::DEFAULT_SMOOTHING_KERNEL_SIZE,
            threshold_block_size: Self::DEFAULT_THRESHOLD_BLOCK_SIZE,
            threshold_offset: Self::DEFAULT_THRESHOLD_OFFSET,
            optic_disc: OpticDiscParams::default(),
            bifurcation: BifurcationParams::default(),
            grid_size: GridSize { rows: 8, cols: 8 },
            hog_orientations: Self::DEFAULT_HOG_ORIENTATIONS,
            hog_cell_size: Self::DEFAULT_HOG_CELL_SIZE,
            max_vessel_components: Self::DEFAULT_MAX_VESSEL_COMPONENTS,
            slow_stage_ms: Self::DEFAULT_SLOW_STAGE_MS,
        }
    }
}

/// Weights of the seven component similarities.
///
/// The weights form a convex combination: non-negative and summing to 1.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityWeights {
    /// LBP histogram weight.
    pub lbp: f64,
    /// Gradient histogram weight.
    pub gradient: f64,
    /// Vessel density weight.
    pub vessel_density: f64,
    /// Average vessel length weight.
    pub vessel_length: f64,
    /// Average vessel width weight.
    pub vessel_width: f64,
    /// Bifurcation geometry weight.
    pub bifurcation: f64,
    /// Spatial vessel distribution weight.
    pub vessel_spatial: f64,
}

impl SimilarityWeights {
    /// The reference weight set.
    pub const DEFAULT: Self = Self {
        lbp: 0.20,
        gradient: 0.20,
        vessel_density: 0.10,
        vessel_length: 0.10,
        vessel_width: 0.05,
        bifurcation: 0.20,
        vessel_spatial: 0.15,
    };

    /// Tolerance used when checking that the weights sum to one.
    pub const SUM_TOLERANCE: f64 = 1e-9;

    const fn as_array(&self) -> [f64; 7] {
        [
            self.lbp,
            self.gradient,
            self.vessel_density,
            self.vessel_length,
            self.vessel_width,
            self.bifurcation,
            self.vessel_spatial,
        ]
    }

    /// Sum of all weights.
    #[must_use]
    pub fn sum(&self) -> f64 {
        self.as_array().iter().sum()
    }

    /// Check that the weights are non-negative and sum to one.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] otherwise.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.as_array().iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(invalid("similarity weights must be finite and non-negative"));
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > Self::SUM_TOLERANCE {
            return Err(invalid(&format!(
                "similarity weights must sum to 1, got {sum}"
            )));
        }
        Ok(())
    }
}

impl Default for SimilarityWeights {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Configuration for comparing two feature records.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchConfig {
    /// `overall_similarity` at or above this is a match.
    pub similarity_threshold: f64,
    /// Bifurcation points closer than this (strictly) may be paired.
    pub bifurcation_distance_threshold: f64,
    /// Each point sequence is truncated to this many points.
    pub max_compared_points: usize,
    /// Component weights.
    pub weights: SimilarityWeights,
}

impl MatchConfig {
    /// Default match threshold.
    pub const DEFAULT_SIMILARITY_THRESHOLD: f64 = 0.95;
    /// Default bifurcation pairing distance.
    pub const DEFAULT_BIFURCATION_DISTANCE_THRESHOLD: f64 = 10.0;
    /// Default bifurcation truncation length.
    pub const DEFAULT_MAX_COMPARED_POINTS: usize = 30;

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for non-finite thresholds
    /// or invalid weights.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.similarity_threshold.is_finite() {
            return Err(invalid("similarity_threshold must be finite"));
        }
        if !(self.bifurcation_distance_threshold.is_finite()
            && self.bifurcation_distance_threshold >= 0.0)
        {
            return Err(invalid(
                "bifurcation_distance_threshold must be finite and non-negative",
            ));
        }
        self.weights.validate()
    }
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: Self::DEFAULT_SIMILARITY_THRESHOLD,
            bifurcation_distance_threshold: Self::DEFAULT_BIFURCATION_DISTANCE_THRESHOLD,
            max_compared_points: Self::DEFAULT_MAX_COMPARED_POINTS,
            weights: SimilarityWeights::DEFAULT,
        }
    }
}

/// Configuration for the feature cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of records held.
    pub capacity: usize,
    /// Side length of the thumbnail hashed to form the cache key.
    pub hash_size: u32,
}

impl CacheConfig {
    /// Default capacity.
    pub const DEFAULT_CAPACITY: usize = 100;
    /// Default key thumbnail size.
    pub const DEFAULT_HASH_SIZE: u32 = 32;

    /// Check the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::InvalidConfig`] for a zero capacity or
    /// hash size.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.capacity == 0 {
            return Err(invalid("cache capacity must be positive"));
        }
        if self.hash_size == 0 {
            return Err(invalid("cache hash_size must be positive"));
        }
        Ok(())
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: Self::DEFAULT_CAPACITY,
            hash_size: Self::DEFAULT_HASH_SIZE,
        }
    }
}

fn invalid(msg: &str) -> PipelineError {
    PipelineError::InvalidConfig(msg.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn extract_defaults_match_reference() {
        let config = ExtractConfig::default();
        assert_eq!(config.standard_size, 256);
        assert!((config.clahe_clip_limit - 2.0).abs() < f32::EPSILON);
        assert_eq!(config.clahe_tile_grid, 8);
        assert_eq!(config.threshold_block_size, 11);
        assert_eq!(config.threshold_offset, 2);
        assert_eq!(config.grid_size, GridSize { rows: 8, cols: 8 });
        assert_eq!(config.hog_orientations, 6);
        assert_eq!(config.hog_cell_size, 32);
        assert_eq!(config.bifurcation.max_points, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn oversized_grid_is_rejected() {
        for grid_size in [
            GridSize { rows: u32::MAX, cols: u32::MAX },
            GridSize { rows: 257, cols: 8 },
            GridSize { rows: 8, cols: 257 },
        ] {
            let config = ExtractConfig {
                grid_size,
                ..ExtractConfig::default()
            };
            assert!(
                matches!(config.validate(), Err(PipelineError::InvalidConfig(_))),
                "{grid_size:?}"
            );
        }
        let finest = ExtractConfig {
            grid_size: GridSize { rows: 256, cols: 256 },
            ..ExtractConfig::default()
        };
        assert!(finest.validate().is_ok());
    }

    #[test]
    fn orientation_count_is_bounded() {
        for hog_orientations in [0, 361, 1 << 30] {
            let config = ExtractConfig {
                hog_orientations,
                ..ExtractConfig::default()
            };
            assert!(matches!(
                config.validate(),
                Err(PipelineError::InvalidConfig(_))
            ));
        }
    }

    #[test]
    fn oversized_frame_is_rejected() {
        let config = ExtractConfig {
            standard_size: ExtractConfig::MAX_STANDARD_SIZE + 1,
            ..ExtractConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn default_weights_sum_to_one() {
        let weights = SimilarityWeights::default();
        assert!((weights.sum() - 1.0).abs() < 1e-12);
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn unbalanced_weights_are_rejected() {
        let weights = SimilarityWeights {
            lbp: 0.5,
            ..SimilarityWeights::DEFAULT
        };
        assert!(matches!(
            weights.validate(),
            Err(PipelineError::InvalidConfig(_))
        ));
    }

    #[test]
    fn negative_weight_is_rejected() {
        let weights = SimilarityWeights {
            lbp: -0.1,
            gradient: 0.5,
            ..SimilarityWeights::DEFAULT
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn even_block_size_is_rejected() {
        let config = ExtractConfig {
            threshold_block_size: 10,
            ..ExtractConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(PipelineError::InvalidConfig(ref s)) if s.contains("threshold_block_size")
        ));
    }

    #[test]
    fn zero_cache_capacity_is_rejected() {
        let config = CacheConfig {
            capacity: 0,
            ..CacheConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: ExtractConfig = serde_json::from_str(r#"{"standard_size": 128}"#).unwrap();
        assert_eq!(config.standard_size, 128);
        assert_eq!(config.hog_cell_size, ExtractConfig::DEFAULT_HOG_CELL_SIZE);

        let matching: MatchConfig = serde_json::from_str(r#"{"similarity_threshold": 0.9}"#).unwrap();
        assert!((matching.similarity_threshold - 0.9).abs() < f64::EPSILON);
        assert_eq!(matching.weights, SimilarityWeights::DEFAULT);
    }
}
