//! Canonical JSON documents for feature records.
//!
//! Records leave the pipeline as [`serde_json::Value`] documents whose
//! numbers are reduced to exactly two kinds: signed 64-bit integers and
//! 64-bit floats. Anything that does not fit an `i64` becomes a float.
//! Canonicalization is idempotent, so documents can be passed through
//! it again at any boundary without drift.

use serde::Deserialize;
use serde_json::{Map, Number, Value};

use crate::config::MatchConfig;
use crate::types::{FeatureRecord, PipelineError, SimilarityResult};

/// Field holding the subject (person) a stored record belongs to.
pub const SUBJECT_FIELD: &str = "person_id";

/// Reduce every number in `value` to an `i64` or an `f64`, recursively.
///
/// Booleans, strings, and nulls are left as they are.
#[must_use]
pub fn canonicalize(value: Value) -> Value {
    match value {
        Value::Number(n) => Value::Number(canonical_number(&n)),
        Value::Array(items) => Value::Array(items.into_iter().map(canonicalize).collect()),
        Value::Object(fields) => Value::Object(
            fields
                .into_iter()
                .map(|(k, v)| (k, canonicalize(v)))
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

fn canonical_number(n: &Number) -> Number {
    if let Some(i) = n.as_i64() {
        return Number::from(i);
    }
    // Large unsigned integers and floats both end up as f64. serde_json
    // numbers are always finite, so from_f64 cannot fail here.
    #[allow(clippy::cast_precision_loss)]
    let f = n
        .as_u64()
        .map_or_else(|| n.as_f64().unwrap_or(0.0), |u| u as f64);
    Number::from_f64(f).unwrap_or_else(|| Number::from(0))
}

/// Serialize `record` to a canonical document, optionally tagged with
/// the subject it was enrolled for.
///
/// # Errors
///
/// Returns [`PipelineError::Serialization`] if the record cannot be
/// represented as JSON (for example, a non-finite float).
pub fn to_document(record: &FeatureRecord, subject_id: Option<&str>) -> Result<Value, PipelineError> {
    if let Some(field) = non_finite_field(record) {
        return Err(PipelineError::Serialization(format!(
            "{field} contains a non-finite value"
        )));
    }
    let value =
        serde_json::to_value(record).map_err(|e| PipelineError::Serialization(e.to_string()))?;
    let mut doc = canonicalize(value);
    if let (Some(subject), Value::Object(fields)) = (subject_id, &mut doc) {
        fields.insert(SUBJECT_FIELD.to_string(), Value::String(subject.to_string()));
    }
    Ok(doc)
}

/// serde_json writes non-finite floats as `null`, which would not read
/// back as a record.
fn non_finite_field(record: &FeatureRecord) -> Option<&'static str> {
    let vectors = [
        ("lbp_histogram", &record.lbp_histogram),
        ("gradient_histogram", &record.gradient_histogram),
        (
            "vessel_spatial_distribution",
            &record.vessel_spatial_distribution,
        ),
    ];
    let scalars = [
        ("vessel_density", record.vessel_density),
        ("avg_vessel_length", record.avg_vessel_length),
        ("avg_vessel_width", record.avg_vessel_width),
    ];
    vectors
        .into_iter()
        .find(|(_, v)| v.iter().any(|x| !x.is_finite()))
        .map(|(name, _)| name)
        .or_else(|| {
            scalars
                .into_iter()
                .find(|(_, v)| !v.is_finite())
                .map(|(name, _)| name)
        })
}

/// Parse a stored document back into a record.
///
/// Unknown fields (including [`SUBJECT_FIELD`]) are ignored.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedFeatureRecord`] if a required field
/// is missing or has the wrong type.
pub fn from_document(doc: &Value) -> Result<FeatureRecord, PipelineError> {
    FeatureRecord::deserialize(doc).map_err(|e| PipelineError::MalformedFeatureRecord(e.to_string()))
}

/// The subject a stored document is tagged with, if any.
#[must_use]
pub fn subject_of(doc: &Value) -> Option<&str> {
    doc.get(SUBJECT_FIELD).and_then(Value::as_str)
}

/// Compare two stored documents.
///
/// # Errors
///
/// Returns [`PipelineError::MalformedFeatureRecord`] if either document
/// does not parse as a record or fails comparison validation.
pub fn compare_documents(
    a: &Value,
    b: &Value,
    config: &MatchConfig,
) -> Result<SimilarityResult, PipelineError> {
    let a = from_document(a)?;
    let b = from_document(b)?;
    crate::compare::compare(&a, &b, config)
}
