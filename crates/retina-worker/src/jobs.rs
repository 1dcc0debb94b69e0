//! Job and response payloads exchanged over the dispatch channel.
//!
//! Field names follow the wire format the dispatcher already speaks:
//! `image_path` is snake case, everything else camel case.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::WorkerError;

/// Which handler a payload is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// Store a new reference record for a subject.
    Enroll,
    /// Match a probe image against stored records.
    Verify,
}

/// A parsed job.
#[derive(Debug, Clone, PartialEq)]
pub enum Job {
    Enroll(EnrollmentJob),
    Verify(VerificationJob),
}

impl Job {
    /// Parse a JSON payload addressed to `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::InvalidJob`] if the payload is not valid
    /// JSON for that job kind.
    pub fn parse(kind: JobKind, payload: &[u8]) -> Result<Self, WorkerError> {
        let invalid = |e: serde_json::Error| WorkerError::InvalidJob(e.to_string());
        Ok(match kind {
            JobKind::Enroll => Self::Enroll(serde_json::from_slice(payload).map_err(invalid)?),
            JobKind::Verify => Self::Verify(serde_json::from_slice(payload).map_err(invalid)?),
        })
    }
}

/// Enroll one image for one subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentJob {
    /// Object storage path of the image.
    #[serde(rename = "image_path", default)]
    pub image_path: Option<String>,
    /// Subject the image belongs to.
    #[serde(default)]
    pub employee_id: Option<String>,
    /// Caller's identifier for the uploaded file, echoed back.
    #[serde(default)]
    pub img_id: Option<String>,
}

/// A stored record to compare the probe against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub employee_id: Option<String>,
    /// Feature store id of the subject's enrolled record.
    #[serde(default)]
    pub document_id: Option<String>,
}

/// Verify a probe image against a list of candidates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationJob {
    #[serde(rename = "image_path", default)]
    pub image_path: Option<String>,
    #[serde(default)]
    pub employees: Vec<Candidate>,
    /// Correlation id, echoed unchanged in the response.
    #[serde(default)]
    pub message_id: Option<String>,
    /// Instance that issued the request.
    #[serde(default)]
    pub originating_instance: Option<String>,
}

/// Outcome of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentResponse {
    pub status: Status,
    /// Feature store id of the new record (success only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Failure description (error only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub employee_id: Option<String>,
    pub original_image: Option<String>,
    pub img_id: Option<String>,
}

impl EnrollmentResponse {
    pub(crate) fn success(job: &EnrollmentJob, id: String) -> Self {
        Self {
            status: Status::Success,
            id: Some(id),
            message: None,
            employee_id: job.employee_id.clone(),
            original_image: job.image_path.clone(),
            img_id: job.img_id.clone(),
        }
    }

    pub(crate) fn error(job: &EnrollmentJob, message: String) -> Self {
        Self {
            status: Status::Error,
            id: None,
            message: Some(message),
            employee_id: job.employee_id.clone(),
            original_image: job.image_path.clone(),
            img_id: job.img_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResponse {
    pub status: Status,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Best matching subject, or `null` when nobody matched.
    pub matching_employee_id: Option<String>,
    /// Overall similarity of the best match; 0 when nobody matched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub similarity: Option<f64>,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

impl VerificationResponse {
    pub(crate) fn matched(best: Option<(String, f64)>, message_id: String) -> Self {
        let (matching_employee_id, similarity) = match best {
            Some((id, similarity)) => (Some(id), similarity),
            None => (None, 0.0),
        };
        Self {
            status: Status::Success,
            message: None,
            matching_employee_id,
            similarity: Some(similarity),
            message_id,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn error(message: String, message_id: String) -> Self {
        Self {
            status: Status::Error,
            message: Some(message),
            matching_employee_id: None,
            similarity: None,
            message_id,
            timestamp: Utc::now(),
        }
    }
}

/// Any response, as published to the response channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Enrollment(EnrollmentResponse),
    Verification(VerificationResponse),
}

impl Response {
    /// The job kind this response answers.
    #[must_use]
    pub const fn kind(&self) -> JobKind {
        match self {
            Self::Enrollment(_) => JobKind::Enroll,
            Self::Verification(_) => JobKind::Verify,
        }
    }

    #[must_use]
    pub const fn status(&self) -> Status {
        match self {
            Self::Enrollment(r) => r.status,
            Self::Verification(r) => r.status,
        }
    }
}
