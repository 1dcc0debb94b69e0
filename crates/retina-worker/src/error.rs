use retina_pipeline::PipelineError;

/// Errors raised while handling a job.
#[derive(Debug, thiserror::Error)]
pub enum WorkerError {
    /// The object store has nothing at the requested path.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// The feature store has no record with the requested id.
    #[error("feature record not found: {0}")]
    RecordNotFound(String),

    /// A collaborator failed for a reason other than a missing item.
    #[error("storage failure: {0}")]
    Storage(String),

    /// The job payload is unusable.
    #[error("invalid job: {0}")]
    InvalidJob(String),

    /// Extraction or comparison failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_errors_pass_through_display() {
        let err = WorkerError::from(PipelineError::EmptyInput);
        assert_eq!(err.to_string(), PipelineError::EmptyInput.to_string());
    }

    #[test]
    fn not_found_names_the_path() {
        let err = WorkerError::ImageNotFound("scans/a.png".to_string());
        assert!(err.to_string().contains("scans/a.png"));
    }
}
