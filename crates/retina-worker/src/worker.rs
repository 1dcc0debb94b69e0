//! Enrollment and verification handlers.

use retina_pipeline::{
    CacheConfig, CachedExtractor, ExtractConfig, FeatureRecord, MatchConfig, canonical,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::WorkerError;
use crate::jobs::{
    EnrollmentJob, EnrollmentResponse, Job, Response, VerificationJob,
    VerificationResponse,
};
use crate::store::{FeatureStore, ObjectStore, ResponseSink};

/// Everything a [`Worker`] needs to know up front.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub extract: ExtractConfig,
    pub matching: MatchConfig,
    pub cache: CacheConfig,
}

/// Drives the pipeline for incoming jobs.
///
/// Each worker owns its feature cache, so one worker must not be shared
/// between threads without a lock around it; run one worker per thread
/// instead.
pub struct Worker<O, F, R> {
    objects: O,
    features: F,
    responses: R,
    extractor: CachedExtractor,
    matching: MatchConfig,
}

impl<O: ObjectStore, F: FeatureStore, R: ResponseSink> Worker<O, F, R> {
    /// Create a worker over the given collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Pipeline`] if any configuration is invalid.
    pub fn new(config: WorkerConfig, objects: O, features: F, responses: R) -> Result<Self, WorkerError> {
        config.matching.validate()?;
        Ok(Self {
            objects,
            features,
            responses,
            extractor: CachedExtractor::new(config.extract, config.cache)?,
            matching: config.matching,
        })
    }

    /// Handle any job, publishing and returning its response.
    pub fn handle(&mut self, job: &Job) -> Response {
        match job {
            Job::Enroll(job) => Response::Enrollment(self.enroll(job)),
            Job::Verify(job) => Response::Verification(self.verify(job)),
        }
    }

    /// Extract features for one image and store them under the subject.
    ///
    /// Failures become an error response; they are never raised.
    pub fn enroll(&mut self, job: &EnrollmentJob) -> EnrollmentResponse {
        tracing::info!(
            image = job.image_path.as_deref().unwrap_or_default(),
            employee = job.employee_id.as_deref().unwrap_or_default(),
            "enrollment job received"
        );
        let response = match self.try_enroll(job) {
            Ok(id) => {
                tracing::info!(id = %id, "features stored");
                EnrollmentResponse::success(job, id)
            }
            Err(e) => {
                tracing::error!(error = %e, "enrollment failed");
                EnrollmentResponse::error(job, format!("Error processing image: {e}"))
            }
        };
        self.publish(&Response::Enrollment(response.clone()));
        response
    }

    fn try_enroll(&mut self, job: &EnrollmentJob) -> Result<String, WorkerError> {
        let path = job
            .image_path
            .as_deref()
            .ok_or_else(|| WorkerError::InvalidJob("missing required field: image_path".to_string()))?;
        let bytes = self.objects.fetch(path)?;
        let record = self.extractor.extract_bytes(&bytes)?;
        let document = canonical::to_document(&record, job.employee_id.as_deref())?;
        self.features.store(document)
    }

    /// Match a probe image against every candidate and report the best
    /// match.
    ///
    /// Candidates without a document id, or whose record cannot be
    /// fetched or compared, are skipped. Among matching candidates the
    /// highest `overall_similarity` wins; on equal scores the earlier
    /// candidate is kept.
    pub fn verify(&mut self, job: &VerificationJob) -> VerificationResponse {
        let message_id = job
            .message_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::info!(
            image = job.image_path.as_deref().unwrap_or_default(),
            candidates = job.employees.len(),
            message_id = %message_id,
            origin = job.originating_instance.as_deref().unwrap_or_default(),
            "verification job received"
        );
        let response = match self.try_verify(job) {
            Ok(best) => {
                tracing::info!(
                    message_id = %message_id,
                    matched = best.as_ref().map(|(id, _)| id.as_str()).unwrap_or_default(),
                    "verification complete"
                );
                VerificationResponse::matched(best, message_id)
            }
            Err(e) => {
                tracing::error!(error = %e, message_id = %message_id, "verification failed");
                VerificationResponse::error(e.to_string(), message_id)
            }
        };
        self.publish(&Response::Verification(response.clone()));
        response
    }

    fn try_verify(&mut self, job: &VerificationJob) -> Result<Option<(String, f64)>, WorkerError> {
        let path = job
            .image_path
            .as_deref()
            .ok_or_else(|| WorkerError::InvalidJob("missing required field: image_path".to_string()))?;
        if job.employees.is_empty() {
            return Err(WorkerError::InvalidJob(
                "missing required field: employees".to_string(),
            ));
        }
        let bytes = self.objects.fetch(path)?;
        let probe = self.extractor.extract_bytes(&bytes)?;

        let mut best: Option<(String, f64)> = None;
        for candidate in &job.employees {
            let employee = candidate.employee_id.as_deref().unwrap_or_default();
            let Some(document_id) = candidate.document_id.as_deref() else {
                tracing::warn!(employee, "candidate has no document id, skipping");
                continue;
            };
            let result = match self.score(&probe, document_id) {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(employee, document_id, error = %e, "candidate skipped");
                    continue;
                }
            };
            tracing::info!(
                employee,
                similarity = result.overall_similarity,
                is_match = result.is_match,
                "candidate compared"
            );
            if result.is_match
                && best
                    .as_ref()
                    .is_none_or(|(_, s)| result.overall_similarity > *s)
            {
                best = Some((employee.to_string(), result.overall_similarity));
            }
        }
        Ok(best)
    }

    fn score(
        &self,
        probe: &FeatureRecord,
        document_id: &str,
    ) -> Result<retina_pipeline::SimilarityResult, WorkerError> {
        let document = self.features.fetch(document_id)?;
        let stored = canonical::from_document(&document)?;
        Ok(retina_pipeline::compare(probe, &stored, &self.matching)?)
    }

    fn publish(&mut self, response: &Response) {
        if let Err(e) = self.responses.publish(response) {
            tracing::error!(error = %e, kind = ?response.kind(), "failed to publish response");
        }
    }

    pub const fn objects(&self) -> &O {
        &self.objects
    }

    pub const fn objects_mut(&mut self) -> &mut O {
        &mut self.objects
    }

    pub const fn features(&self) -> &F {
        &self.features
    }

    pub const fn responses(&self) -> &R {
        &self.responses
    }

    /// The extractor and its cache.
    pub const fn extractor(&self) -> &CachedExtractor {
        &self.extractor
    }
}
