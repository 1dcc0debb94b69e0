//! Shared types for the retina feature pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Re-export `GrayImage` so downstream crates can reference
/// intermediate raster data without depending on `image` directly.
pub use image::GrayImage;

/// Re-export `DynamicImage` so callers can hand already-decoded images
/// to the pipeline without depending on `image` directly.
pub use image::DynamicImage;

/// A 2D integer point in canonical-frame pixel coordinates.
///
/// Serialized as an `[x, y]` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "(i32, i32)", into = "(i32, i32)")]
pub struct Point {
    /// Horizontal position (pixels from left edge).
    pub x: i32,
    /// Vertical position (pixels from top edge).
    pub y: i32,
}

impl Point {
    /// Create a new point.
    #[must_use]
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance(self, other: Self) -> f64 {
        let dx = f64::from(self.x) - f64::from(other.x);
        let dy = f64::from(self.y) - f64::from(other.y);
        dx.hypot(dy)
    }
}

impl From<(i32, i32)> for Point {
    fn from((x, y): (i32, i32)) -> Self {
        Self { x, y }
    }
}

impl From<Point> for (i32, i32) {
    fn from(p: Point) -> Self {
        (p.x, p.y)
    }
}

/// Image dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

/// Location of the optic disc landmark.
///
/// Center and radius are always found together; a record with no
/// detected disc carries `None` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpticDisc {
    /// Circle center in canonical-frame pixels.
    pub center: Point,
    /// Circle radius in pixels.
    pub radius: u32,
}

/// The biometric signature extracted from one retinal image.
///
/// Records are value objects: created once per extraction and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "FeatureDocument", into = "FeatureDocument")]
pub struct FeatureRecord {
    /// Unique identifier assigned at creation.
    pub id: Uuid,
    /// Uniform LBP histogram, L1-normalized over [`crate::texture::LBP_BINS`] bins.
    pub lbp_histogram: Vec<f64>,
    /// Gradient-orientation histogram, concatenated across cells.
    pub gradient_histogram: Vec<f64>,
    /// Fraction of foreground pixels in the vessel mask, in `[0, 1]`.
    pub vessel_density: f64,
    /// Mean major-axis length of the considered vessel components.
    pub avg_vessel_length: f64,
    /// Mean minor-axis length of the considered vessel components.
    pub avg_vessel_width: f64,
    /// Number of vessel components considered (capped).
    pub vessel_count: u32,
    /// Optic disc landmark, when one was found.
    pub optic_disc: Option<OpticDisc>,
    /// Vessel branch/junction points, strongest response first (capped).
    pub bifurcation_points: Vec<Point>,
    /// Row-major per-cell vessel density over the analysis grid.
    pub vessel_spatial_distribution: Vec<f64>,
    /// Creation time.
    pub timestamp: DateTime<Utc>,
}

/// Persisted shape of a [`FeatureRecord`].
///
/// The optic disc is stored as two sibling fields, which must be both
/// present or both absent. Older documents used `hog_features` and
/// `blood_vessel_density`; those names are still accepted on input.
#[derive(Clone, Serialize, Deserialize)]
struct FeatureDocument {
    id: Uuid,
    lbp_histogram: Vec<f64>,
    #[serde(alias = "hog_features")]
    gradient_histogram: Vec<f64>,
    #[serde(alias = "blood_vessel_density")]
    vessel_density: f64,
    avg_vessel_length: f64,
    avg_vessel_width: f64,
    vessel_count: u32,
    optic_disc_center: Option<Point>,
    optic_disc_radius: Option<u32>,
    bifurcation_points: Vec<Point>,
    vessel_spatial_distribution: Vec<f64>,
    #[serde(with = "timestamp_serde")]
    timestamp: DateTime<Utc>,
}

impl From<FeatureRecord> for FeatureDocument {
    fn from(record: FeatureRecord) -> Self {
        Self {
            id: record.id,
            lbp_histogram: record.lbp_histogram,
            gradient_histogram: record.gradient_histogram,
            vessel_density: record.vessel_density,
            avg_vessel_length: record.avg_vessel_length,
            avg_vessel_width: record.avg_vessel_width,
            vessel_count: record.vessel_count,
            optic_disc_center: record.optic_disc.map(|d| d.center),
            optic_disc_radius: record.optic_disc.map(|d| d.radius),
            bifurcation_points: record.bifurcation_points,
            vessel_spatial_distribution: record.vessel_spatial_distribution,
            timestamp: record.timestamp,
        }
    }
}

impl TryFrom<FeatureDocument> for FeatureRecord {
    type Error = String;

    fn try_from(doc: FeatureDocument) -> Result<Self, Self::Error> {
        let optic_disc = match (doc.optic_disc_center, doc.optic_disc_radius) {
            (Some(center), Some(radius)) => Some(OpticDisc { center, radius }),
            (None, None) => None,
            _ => {
                return Err(
                    "optic_disc_center and optic_disc_radius must be present together".to_string(),
                );
            }
        };
        Ok(Self {
            id: doc.id,
            lbp_histogram: doc.lbp_histogram,
            gradient_histogram: doc.gradient_histogram,
            vessel_density: doc.vessel_density,
            avg_vessel_length: doc.avg_vessel_length,
            avg_vessel_width: doc.avg_vessel_width,
            vessel_count: doc.vessel_count,
            optic_disc,
            bifurcation_points: doc.bifurcation_points,
            vessel_spatial_distribution: doc.vessel_spatial_distribution,
            timestamp: doc.timestamp,
        })
    }
}

/// Serde support for record timestamps.
///
/// Writes RFC 3339. Reads RFC 3339, or a naive ISO 8601 date-time
/// (no offset) which is taken to be UTC.
mod timestamp_serde {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&ts.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        if let Ok(ts) = DateTime::parse_from_rfc3339(&raw) {
            return Ok(ts.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| serde::de::Error::custom(format!("invalid timestamp {raw:?}: {e}")))
    }
}

/// Outcome of comparing two [`FeatureRecord`]s.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SimilarityResult {
    /// Weighted combination of the component scores.
    pub overall_similarity: f64,
    /// Cosine similarity of the LBP histograms.
    pub lbp_similarity: f64,
    /// Cosine similarity of the gradient-orientation histograms.
    pub hog_similarity: f64,
    /// `1 - min(|d1 - d2|, 1)` over vessel density.
    pub vessel_density_similarity: f64,
    /// Clamped relative difference of average vessel length.
    pub vessel_length_similarity: f64,
    /// Clamped relative difference of average vessel width.
    pub vessel_width_similarity: f64,
    /// Fraction of bifurcation points paired by the greedy matcher.
    pub bifurcation_similarity: f64,
    /// Cosine similarity of the spatial vessel-density grids.
    pub vessel_spatial_similarity: f64,
    /// Whether `overall_similarity` reached the match threshold.
    pub is_match: bool,
}

/// Errors that can occur while extracting or comparing feature records.
///
/// Uses custom `Serialize`/`Deserialize` because `image::ImageError`
/// does not implement serde traits. The `ImageDecode` variant is
/// serialized as its `Display` string.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Failed to decode the input image.
    #[error("failed to decode image: {0}")]
    ImageDecode(#[from] image::ImageError),

    /// The input image bytes were empty.
    #[error("input image data is empty")]
    EmptyInput,

    /// The decoded image cannot be normalized (e.g. zero-sized).
    #[error("preprocessing failed: {0}")]
    Preprocessing(String),

    /// Pipeline configuration is invalid.
    #[error("invalid pipeline configuration: {0}")]
    InvalidConfig(String),

    /// A feature record handed to the comparator is missing or has an
    /// unusable field.
    #[error("malformed feature record: {0}")]
    MalformedFeatureRecord(String),

    /// Cache bookkeeping diverged from its stored entries.
    #[error(
        "feature cache invariant violated: {entries} entries, {order} order slots, capacity {capacity}"
    )]
    CacheCapacityInvariant {
        /// Number of stored records.
        entries: usize,
        /// Number of keys in the insertion-order queue.
        order: usize,
        /// Configured capacity.
        capacity: usize,
    },

    /// A record could not be converted to or from its document form.
    #[error("serialization failed: {0}")]
    Serialization(String),
}

/// Serde-compatible proxy for `PipelineError`.
///
/// `image::ImageError` does not implement serde, so the `ImageDecode`
/// variant stores its `Display` string instead.
#[derive(Serialize, Deserialize)]
enum PipelineErrorProxy {
    ImageDecode(String),
    EmptyInput,
    Preprocessing(String),
    InvalidConfig(String),
    MalformedFeatureRecord(String),
    CacheCapacityInvariant {
        entries: usize,
        order: usize,
        capacity: usize,
    },
    Serialization(String),
}

impl Serialize for PipelineError {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let proxy = match self {
            Self::ImageDecode(e) => PipelineErrorProxy::ImageDecode(e.to_string()),
            Self::EmptyInput => PipelineErrorProxy::EmptyInput,
            Self::Preprocessing(s) => PipelineErrorProxy::Preprocessing(s.clone()),
            Self::InvalidConfig(s) => PipelineErrorProxy::InvalidConfig(s.clone()),
            Self::MalformedFeatureRecord(s) => PipelineErrorProxy::MalformedFeatureRecord(s.clone()),
            Self::CacheCapacityInvariant {
                entries,
                order,
                capacity,
            } => PipelineErrorProxy::CacheCapacityInvariant {
                entries: *entries,
                order: *order,
                capacity: *capacity,
            },
            Self::Serialization(s) => PipelineErrorProxy::Serialization(s.clone()),
        };
        proxy.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PipelineError {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let proxy = PipelineErrorProxy::deserialize(deserializer)?;
        Ok(match proxy {
            // The typed image error cannot be rebuilt; keep its message.
            PipelineErrorProxy::ImageDecode(msg) => {
                Self::Preprocessing(format!("image decode error: {msg}"))
            }
            PipelineErrorProxy::EmptyInput => Self::EmptyInput,
            PipelineErrorProxy::Preprocessing(s) => Self::Preprocessing(s),
            PipelineErrorProxy::InvalidConfig(s) => Self::InvalidConfig(s),
            PipelineErrorProxy::MalformedFeatureRecord(s) => Self::MalformedFeatureRecord(s),
            PipelineErrorProxy::CacheCapacityInvariant {
                entries,
                order,
                capacity,
            } => Self::CacheCapacityInvariant {
                entries,
                order,
                capacity,
            },
            PipelineErrorProxy::Serialization(s) => Self::Serialization(s),
        })
    }
}
