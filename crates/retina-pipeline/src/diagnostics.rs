//! Extraction diagnostics: timing and counts for each stage.
//!
//! Collected by [`extract_with_diagnostics`](crate::extract_with_diagnostics)
//! and the staged [`Pipeline`](crate::Pipeline) for parameter tuning.
//!
//! Durations are measured with the `web-time` crate, which uses
//! `performance.now()` on WASM and `std::time::Instant` natively, and are
//! serialized as fractional seconds (`f64`) since
//! `std::time::Duration` does not implement serde traits.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Serde support for `std::time::Duration` as fractional seconds.
mod duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    /// Serialize a `Duration` as fractional seconds (`f64`).
    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        duration.as_secs_f64().serialize(serializer)
    }

    /// Deserialize a `Duration` from fractional seconds (`f64`).
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(|_| {
            serde::de::Error::custom(
                "duration seconds must be finite, non-negative, and representable as a Duration",
            )
        })
    }
}

/// Diagnostics collected from one extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractDiagnostics {
    /// Resize, CLAHE, and smoothing.
    pub normalize: StageDiagnostics,
    /// Adaptive threshold and opening.
    pub vessels: StageDiagnostics,
    /// Hough circle search.
    pub optic_disc: StageDiagnostics,
    /// Thinning and junction detection.
    pub bifurcations: StageDiagnostics,
    /// Global and grid vessel density plus component geometry.
    pub density: StageDiagnostics,
    /// LBP and gradient histograms.
    pub texture: StageDiagnostics,
    /// Total wall-clock duration of the extraction (seconds).
    #[serde(with = "duration_serde")]
    pub total_duration: Duration,
}

/// Diagnostics for a single stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageDiagnostics {
    /// Wall-clock duration of this stage (seconds).
    #[serde(with = "duration_serde")]
    pub duration: Duration,
    /// Stage-specific metrics.
    pub metrics: StageMetrics,
}

/// Stage-specific metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StageMetrics {
    /// Normalization metrics.
    Normalize {
        /// Source width in pixels.
        source_width: u32,
        /// Source height in pixels.
        source_height: u32,
        /// Canonical frame side length.
        standard_size: u32,
    },
    /// Vessel segmentation metrics.
    Vessels {
        /// Foreground pixels in the vessel mask.
        foreground_pixels: u64,
        /// Total pixels in the mask.
        total_pixels: u64,
    },
    /// Optic disc search metrics.
    OpticDisc {
        /// Whether a disc was found.
        found: bool,
        /// Radius of the disc, when found.
        radius: Option<u32>,
    },
    /// Skeleton and junction metrics.
    Bifurcations {
        /// Pixels in the vessel skeleton.
        skeleton_pixels: u64,
        /// Junction points reported.
        point_count: usize,
    },
    /// Density and geometry metrics.
    Density {
        /// Grid rows.
        grid_rows: u32,
        /// Grid columns.
        grid_cols: u32,
        /// Vessel components measured.
        vessel_count: u32,
    },
    /// Texture descriptor metrics.
    Texture {
        /// LBP histogram length.
        lbp_len: usize,
        /// Gradient histogram length.
        gradient_len: usize,
    },
}

impl ExtractDiagnostics {
    /// The stages in execution order, with display names.
    #[must_use]
    pub fn stages(&self) -> [(&'static str, &StageDiagnostics); 6] {
        [
            ("Normalize", &self.normalize),
            ("Vessels", &self.vessels),
            ("Optic Disc", &self.optic_disc),
            ("Bifurcations", &self.bifurcations),
            ("Density", &self.density),
            ("Texture", &self.texture),
        ]
    }

    /// Format diagnostics as a human-readable report.
    #[must_use]
    pub fn report(&self) -> String {
        let mut lines = Vec::new();

        lines.push(format!("Extraction Diagnostics Report\n{}", "=".repeat(60)));
        lines.push(format!(
            "Total duration: {:.3}ms",
            duration_ms(self.total_duration),
        ));
        lines.push(String::new());

        lines.push(format!(
            "{:<24} {:>10} {:>10}  {}",
            "Stage", "Duration", "% Total", "Details"
        ));
        lines.push("-".repeat(80));

        let total_ms = duration_ms(self.total_duration);
        for (name, diag) in self.stages() {
            let ms = duration_ms(diag.duration);
            let pct = if total_ms > 0.0 {
                ms / total_ms * 100.0
            } else {
                0.0
            };
            let details = format_metrics(&diag.metrics);
            lines.push(format!("{name:<24} {ms:>8.3}ms {pct:>9.1}%  {details}"));
        }

        lines.join("\n")
    }
}

/// Convert a `Duration` to milliseconds as `f64`.
pub(crate) fn duration_ms(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}

/// Format stage metrics into a compact detail string.
fn format_metrics(metrics: &StageMetrics) -> String {
    match metrics {
        StageMetrics::Normalize {
            source_width,
            source_height,
            standard_size,
        } => format!("{source_width}x{source_height} -> {standard_size}x{standard_size}"),
        StageMetrics::Vessels {
            foreground_pixels,
            total_pixels,
        } => {
            #[allow(clippy::cast_precision_loss)]
            let density = if *total_pixels > 0 {
                *foreground_pixels as f64 / *total_pixels as f64 * 100.0
            } else {
                0.0
            };
            format!("foreground={foreground_pixels} ({density:.1}%)")
        }
        StageMetrics::OpticDisc { found, radius } => match (found, radius) {
            (true, Some(r)) => format!("found r={r}"),
            _ => "not found".to_string(),
        },
        StageMetrics::Bifurcations {
            skeleton_pixels,
            point_count,
        } => format!("skeleton={skeleton_pixels} px, {point_count} points"),
        StageMetrics::Density {
            grid_rows,
            grid_cols,
            vessel_count,
        } => format!("grid={grid_rows}x{grid_cols} components={vessel_count}"),
        StageMetrics::Texture {
            lbp_len,
            gradient_len,
        } => format!("lbp={lbp_len} gradient={gradient_len}"),
    }
}

/// Time a stage and log it.
///
/// Emits a `debug` event for every stage and a `warn` event when the
/// stage took longer than `slow_ms` milliseconds.
pub(crate) fn timed<T>(stage: &'static str, slow_ms: u64, f: impl FnOnce() -> T) -> (T, Duration) {
    let start = web_time::Instant::now();
    let out = f();
    let elapsed = start.elapsed();
    let ms = duration_ms(elapsed);
    tracing::debug!(stage, elapsed_ms = ms, "stage complete");
    if elapsed > Duration::from_millis(slow_ms) {
        tracing::warn!(stage, elapsed_ms = ms, threshold_ms = slow_ms, "slow stage");
    }
    (out, elapsed)
}
