//! Similarity scoring between two feature records.
//!
//! Seven component scores are computed independently and combined with
//! fixed convex weights. The overall score is clamped to `[0, 1]` so
//! rounding in the weighted sum never reports more than a perfect match.

use crate::config::MatchConfig;
use crate::types::{FeatureRecord, PipelineError, Point, SimilarityResult};

/// Guard added to the larger value in relative differences.
const RELATIVE_EPSILON: f64 = 1e-7;

/// Compare two records.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedFeatureRecord`] if either record
/// has an empty descriptor vector, vectors of mismatched lengths, or a
/// non-finite scalar. Returns [`PipelineError::InvalidConfig`] if the
/// configuration is invalid.
pub fn compare(
    a: &FeatureRecord,
    b: &FeatureRecord,
    config: &MatchConfig,
) -> Result<SimilarityResult, PipelineError> {
    config.validate()?;
    validate_record(a, "first")?;
    validate_record(b, "second")?;
    check_lengths("lbp_histogram", &a.lbp_histogram, &b.lbp_histogram)?;
    check_lengths(
        "gradient_histogram",
        &a.gradient_histogram,
        &b.gradient_histogram,
    )?;
    check_lengths(
        "vessel_spatial_distribution",
        &a.vessel_spatial_distribution,
        &b.vessel_spatial_distribution,
    )?;

    let lbp = cosine_similarity(&a.lbp_histogram, &b.lbp_histogram);
    let hog = cosine_similarity(&a.gradient_histogram, &b.gradient_histogram);
    let spatial = cosine_similarity(
        &a.vessel_spatial_distribution,
        &b.vessel_spatial_distribution,
    );
    let density = 1.0 - (a.vessel_density - b.vessel_density).abs().min(1.0);
    let length = relative_similarity(a.avg_vessel_length, b.avg_vessel_length);
    let width = relative_similarity(a.avg_vessel_width, b.avg_vessel_width);
    let bifurcation = match_points(
        &a.bifurcation_points,
        &b.bifurcation_points,
        config.bifurcation_distance_threshold,
        config.max_compared_points,
    );

    let w = &config.weights;
    let weighted = w.vessel_spatial.mul_add(
        spatial,
        w.bifurcation.mul_add(
            bifurcation,
            w.vessel_width.mul_add(
                width,
                w.vessel_length.mul_add(
                    length,
                    w.vessel_density
                        .mul_add(density, w.gradient.mul_add(hog, w.lbp * lbp)),
                ),
            ),
        ),
    );
    let overall = weighted.clamp(0.0, 1.0);

    Ok(SimilarityResult {
        overall_similarity: overall,
        lbp_similarity: lbp,
        hog_similarity: hog,
        vessel_density_similarity: density,
        vessel_length_similarity: length,
        vessel_width_similarity: width,
        bifurcation_similarity: bifurcation,
        vessel_spatial_similarity: spatial,
        is_match: overall >= config.similarity_threshold,
    })
}

fn validate_record(record: &FeatureRecord, which: &str) -> Result<(), PipelineError> {
    let malformed = |msg: String| Err(PipelineError::MalformedFeatureRecord(msg));
    for (name, values) in [
        ("lbp_histogram", &record.lbp_histogram),
        ("gradient_histogram", &record.gradient_histogram),
        (
            "vessel_spatial_distribution",
            &record.vessel_spatial_distribution,
        ),
    ] {
        if values.is_empty() {
            return malformed(format!("{which} record has an empty {name}"));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return malformed(format!("{which} record has a non-finite value in {name}"));
        }
    }
    for (name, value) in [
        ("vessel_density", record.vessel_density),
        ("avg_vessel_length", record.avg_vessel_length),
        ("avg_vessel_width", record.avg_vessel_width),
    ] {
        if !value.is_finite() {
            return malformed(format!("{which} record has a non-finite {name}"));
        }
    }
    Ok(())
}

fn check_lengths(name: &str, a: &[f64], b: &[f64]) -> Result<(), PipelineError> {
    if a.len() == b.len() {
        Ok(())
    } else {
        Err(PipelineError::MalformedFeatureRecord(format!(
            "{name} lengths differ: {} vs {}",
            a.len(),
            b.len()
        )))
    }
}

/// Cosine of the angle between `a` and `b`; 0 if either has zero norm.
///
/// Extra elements of the longer slice are ignored.
#[must_use]
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// `1 - min(|a - b| / (max(a, b) + eps), 1)`.
#[must_use]
pub fn relative_similarity(a: f64, b: f64) -> f64 {
    let diff = (a - b).abs();
    1.0 - (diff / (a.max(b) + RELATIVE_EPSILON)).min(1.0)
}

/// Greedy nearest-pair matching of two point sets.
///
/// Each set is truncated to its first `max_points` points. The closest
/// remaining pair is matched while its distance is strictly below
/// `threshold`; both points then leave the pool. Ties go to the pair
/// found first scanning `a` then `b` in order. Returns
/// `matched / max(len_a, len_b)`, or 0 if either set is empty.
///
/// Greedy matching is not a globally optimal assignment, but the match
/// count is symmetric in `a` and `b`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn match_points(a: &[Point], b: &[Point], threshold: f64, max_points: usize) -> f64 {
    let a = &a[..a.len().min(max_points)];
    let b = &b[..b.len().min(max_points)];
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let matched = greedy_match_count(a, b, threshold);
    matched as f64 / a.len().max(b.len()) as f64
}

/// Number of pairs the greedy matcher accepts.
fn greedy_match_count(a: &[Point], b: &[Point], threshold: f64) -> usize {
    let distances: Vec<Vec<f64>> = a
        .iter()
        .map(|p| b.iter().map(|q| p.distance(*q)).collect())
        .collect();
    let mut row_used = vec![false; a.len()];
    let mut col_used = vec![false; b.len()];
    let mut matched = 0;

    loop {
        let mut best: Option<(usize, usize, f64)> = None;
        for (i, row) in distances.iter().enumerate() {
            if row_used[i] {
                continue;
            }
            for (j, &d) in row.iter().enumerate() {
                if col_used[j] {
                    continue;
                }
                if best.is_none_or(|(_, _, bd)| d < bd) {
                    best = Some((i, j, d));
                }
            }
        }
        match best {
            Some((i, j, d)) if d < threshold => {
                row_used[i] = true;
                col_used[j] = true;
                matched += 1;
            }
            _ => break,
        }
    }
    matched
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::config::SimilarityWeights;
    use crate::types::OpticDisc;

    fn record() -> FeatureRecord {
        FeatureRecord {
            id: Uuid::new_v4(),
            lbp_histogram: vec![0.05, 0.1, 0.1, 0.15, 0.2, 0.15, 0.1, 0.15],
            gradient_histogram: vec![0.3, 0.1, 0.4, 0.2, 0.5, 0.6],
            vessel_density: 0.18,
            avg_vessel_length: 14.0,
            avg_vessel_width: 2.5,
            vessel_count: 30,
            optic_disc: Some(OpticDisc {
                center: Point::new(100, 120),
                radius: 25,
            }),
            bifurcation_points: vec![Point::new(10, 10), Point::new(40, 60), Point::new(90, 30)],
            vessel_spatial_distribution: vec![0.1, 0.3, 0.0, 0.2],
            timestamp: Utc::now(),
        }
    }

    fn points(coords: &[(i32, i32)]) -> Vec<Point> {
        coords.iter().map(|&(x, y)| Point::new(x, y)).collect()
    }

    #[test]
    fn self_comparison_is_a_match() {
        let r = record();
        let result = compare(&r, &r, &MatchConfig::default()).unwrap();
        assert!(result.overall_similarity >= 0.999, "{result:?}");
        assert!(result.is_match);
        assert!((result.bifurcation_similarity - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn overall_never_exceeds_one() {
        // Weights that sum to 1 only up to rounding still cap at 1.
        let r = record();
        let config = MatchConfig {
            weights: SimilarityWeights {
                lbp: 0.1 + 0.1,
                gradient: 0.1 + 0.1,
                vessel_density: 0.1,
                vessel_length: 0.1,
                vessel_width: 0.05,
                bifurcation: 0.1 + 0.1,
                vessel_spatial: 0.15 + 1e-12,
            },
            ..MatchConfig::default()
        };
        let result = compare(&r, &r, &config).unwrap();
        assert!(result.overall_similarity <= 1.0);
        assert!(result.overall_similarity >= 0.999);
        assert!(compare(&r, &r, &MatchConfig::default()).unwrap().overall_similarity <= 1.0);
    }

    #[test]
    fn default_weights_sum_to_one() {
        assert!((SimilarityWeights::DEFAULT.sum() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn cosine_of_zero_vector_is_zero() {
        assert!(cosine_similarity(&[0.0, 0.0], &[1.0, 2.0]).abs() < f64::EPSILON);
    }

    #[test]
    fn cosine_of_opposite_vectors_is_negative() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-12);
    }

    #[test]
    fn relative_similarity_examples() {
        assert!((relative_similarity(10.0, 10.0) - 1.0).abs() < 1e-12);
        assert!((relative_similarity(10.0, 5.0) - 0.5).abs() < 1e-6);
        assert!((relative_similarity(0.0, 0.0) - 1.0).abs() < 1e-12);
        assert!(relative_similarity(0.0, 8.0).abs() < 1e-6);
    }

    #[test]
    fn density_similarity_is_clamped() {
        let a = record();
        let b = FeatureRecord {
            vessel_density: a.vessel_density + 3.0,
            ..record()
        };
        let result = compare(&a, &b, &MatchConfig::default()).unwrap();
        assert!(result.vessel_density_similarity.abs() < f64::EPSILON);
    }

    #[test]
    fn empty_point_sets_score_zero() {
        assert!(match_points(&[], &[], 10.0, 30).abs() < f64::EPSILON);
        assert!(match_points(&points(&[(1, 1)]), &[], 10.0, 30).abs() < f64::EPSILON);
    }

    #[test]
    fn matching_is_symmetric() {
        let a = points(&[(0, 0), (5, 5), (20, 20), (50, 50), (52, 49)]);
        let b = points(&[(1, 1), (6, 3), (51, 51), (100, 100)]);
        let ab = match_points(&a, &b, 10.0, 30);
        let ba = match_points(&b, &a, 10.0, 30);
        assert!((ab - ba).abs() < f64::EPSILON);
        assert_eq!(greedy_match_count(&a, &b, 10.0), greedy_match_count(&b, &a, 10.0));
    }

    #[test]
    fn threshold_is_strict() {
        let a = points(&[(0, 0)]);
        let b = points(&[(10, 0)]);
        assert!(match_points(&a, &b, 10.0, 30).abs() < f64::EPSILON);
        assert!((match_points(&a, &b, 10.5, 30) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn matches_never_exceed_smaller_set() {
        let a = points(&[(0, 0), (1, 0), (2, 0), (3, 0)]);
        let b = points(&[(0, 1)]);
        assert_eq!(greedy_match_count(&a, &b, 10.0), 1);
        assert!((match_points(&a, &b, 10.0, 30) - 0.25).abs() < f64::EPSILON);
    }

    #[test]
    fn greedy_takes_closest_pair_first() {
        // An optimal assignment pairs (0,0)-(5,0) and (6,0)-(14,0). Greedy
        // takes (6,0)-(5,0) at distance 1 first, which leaves (0,0)-(14,0)
        // out of range.
        let a = points(&[(0, 0), (6, 0)]);
        let b = points(&[(5, 0), (14, 0)]);
        assert_eq!(greedy_match_count(&a, &b, 10.0), 1);
    }

    #[test]
    fn points_beyond_limit_are_ignored() {
        let a: Vec<Point> = (0..40).map(|i| Point::new(i * 100, 0)).collect();
        let b = a.clone();
        // Only the first 30 of each are considered: all of them match.
        assert!((match_points(&a, &b, 10.0, 30) - 1.0).abs() < f64::EPSILON);
        let shifted: Vec<Point> = a[10..].to_vec();
        // Truncated sets share points 10..30: 20 matches out of 30.
        assert!((match_points(&a, &shifted, 10.0, 30) - 20.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn empty_histogram_is_malformed() {
        let a = record();
        let b = FeatureRecord {
            lbp_histogram: Vec::new(),
            ..record()
        };
        let err = compare(&a, &b, &MatchConfig::default()).unwrap_err();
        assert!(matches!(err, PipelineError::MalformedFeatureRecord(ref s) if s.contains("lbp_histogram")));
    }

    #[test]
    fn mismatched_lengths_are_malformed() {
        let a = record();
        let b = FeatureRecord {
            gradient_histogram: vec![0.1; 12],
            ..record()
        };
        assert!(matches!(
            compare(&a, &b, &MatchConfig::default()),
            Err(PipelineError::MalformedFeatureRecord(_))
        ));
    }

    #[test]
    fn non_finite_scalar_is_malformed() {
        let a = record();
        let b = FeatureRecord {
            avg_vessel_width: f64::NAN,
            ..record()
        };
        assert!(matches!(
            compare(&b, &a, &MatchConfig::default()),
            Err(PipelineError::MalformedFeatureRecord(_))
        ));
    }

    #[test]
    fn threshold_decides_match() {
        let a = record();
        let b = FeatureRecord {
            avg_vessel_length: 7.0,
            ..record()
        };
        let strict = compare(&a, &b, &MatchConfig::default()).unwrap();
        // Length similarity ~0.5 costs 0.05 of the overall score.
        assert!(strict.overall_similarity < 0.96 && strict.overall_similarity > 0.94);
        let lenient = MatchConfig {
            similarity_threshold: 0.9,
            ..MatchConfig::default()
        };
        assert!(compare(&a, &b, &lenient).unwrap().is_match);
    }

    #[test]
    fn overall_is_weighted_sum() {
        let a = record();
        let b = FeatureRecord {
            vessel_density: 0.58,
            bifurcation_points: points(&[(10, 10)]),
            ..record()
        };
        let r = compare(&a, &b, &MatchConfig::default()).unwrap();
        let w = SimilarityWeights::DEFAULT;
        let expected = w.lbp * r.lbp_similarity
            + w.gradient * r.hog_similarity
            + w.vessel_density * r.vessel_density_similarity
            + w.vessel_length * r.vessel_length_similarity
            + w.vessel_width * r.vessel_width_similarity
            + w.bifurcation * r.bifurcation_similarity
            + w.vessel_spatial * r.vessel_spatial_similarity;
        assert!((r.overall_similarity - expected).abs() < 1e-12);
        assert!((r.vessel_density_similarity - 0.6).abs() < 1e-12);
        assert!((r.bifurcation_similarity - 1.0 / 3.0).abs() < 1e-12);
    }
}
