//! Job boundary for the retina pipeline.
//!
//! A [`Worker`] receives enrollment and verification jobs, fetches the
//! referenced image from an [`ObjectStore`], runs extraction through its
//! own feature cache, persists or compares records through a
//! [`FeatureStore`], and publishes a response to a [`ResponseSink`].
//!
//! Every failure inside a job becomes an error response carrying the
//! job's correlation fields; the handlers never return `Err`. Delivery,
//! retries, and durability belong to the collaborators.

pub mod error;
pub mod jobs;
pub mod store;
pub mod worker;

pub use error::WorkerError;
pub use jobs::{
    Candidate, EnrollmentJob, EnrollmentResponse, Job, JobKind, Response, Status,
    VerificationJob, VerificationResponse,
};
pub use store::{
    FeatureStore, InMemoryFeatureStore, InMemoryObjectStore, InMemoryResponseSink, ObjectStore,
    ResponseSink,
};
pub use worker::{Worker, WorkerConfig};
