//! Collaborators the worker talks to, plus in-memory implementations for
//! tests and local runs.

use std::collections::HashMap;

use retina_pipeline::canonical;
use serde_json::Value;
use uuid::Uuid;

use crate::error::WorkerError;
use crate::jobs::Response;

/// Read-only image storage.
pub trait ObjectStore {
    /// Fetch the raw bytes stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::ImageNotFound`] if nothing is stored there.
    fn fetch(&self, path: &str) -> Result<Vec<u8>, WorkerError>;
}

/// Document storage for feature records.
pub trait FeatureStore {
    /// Store a document and return the id assigned to it.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Storage`] if the document cannot be stored.
    fn store(&mut self, document: Value) -> Result<String, WorkerError>;

    /// Fetch the document stored under `id`.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::RecordNotFound`] if there is none.
    fn fetch(&self, id: &str) -> Result<Value, WorkerError>;
}

/// Outgoing response channel.
pub trait ResponseSink {
    /// Publish one response.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError::Storage`] if the channel rejects it.
    fn publish(&mut self, response: &Response) -> Result<(), WorkerError>;
}

#[derive(Debug, Default, Clone)]
pub struct InMemoryObjectStore {
    objects: HashMap<String, Vec<u8>>,
}

impl InMemoryObjectStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, path: impl Into<String>, bytes: Vec<u8>) {
        self.objects.insert(path.into(), bytes);
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn fetch(&self, path: &str) -> Result<Vec<u8>, WorkerError> {
        self.objects
            .get(path)
            .cloned()
            .ok_or_else(|| WorkerError::ImageNotFound(path.to_string()))
    }
}

/// Feature store backed by a map. Assigns a fresh UUID to every stored
/// document and writes it into the document's `id` field.
#[derive(Debug, Default, Clone)]
pub struct InMemoryFeatureStore {
    documents: HashMap<String, Value>,
}

impl InMemoryFeatureStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Ids of every document tagged with `subject`.
    #[must_use]
    pub fn ids_for_subject(&self, subject: &str) -> Vec<&str> {
        self.documents
            .iter()
            .filter(|(_, doc)| canonical::subject_of(doc) == Some(subject))
            .map(|(id, _)| id.as_str())
            .collect()
    }
}

impl FeatureStore for InMemoryFeatureStore {
    fn store(&mut self, mut document: Value) -> Result<String, WorkerError> {
        let Value::Object(fields) = &mut document else {
            return Err(WorkerError::Storage(
                "feature document must be a JSON object".to_string(),
            ));
        };
        let id = Uuid::new_v4().to_string();
        fields.insert("id".to_string(), Value::String(id.clone()));
        self.documents.insert(id.clone(), document);
        Ok(id)
    }

    fn fetch(&self, id: &str) -> Result<Value, WorkerError> {
        self.documents
            .get(id)
            .cloned()
            .ok_or_else(|| WorkerError::RecordNotFound(id.to_string()))
    }
}

/// Response sink that keeps every published response in order.
#[derive(Debug, Default, Clone)]
pub struct InMemoryResponseSink {
    responses: Vec<Response>,
}

impl InMemoryResponseSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn responses(&self) -> &[Response] {
        &self.responses
    }
}

impl ResponseSink for InMemoryResponseSink {
    fn publish(&mut self, response: &Response) -> Result<(), WorkerError> {
        self.responses.push(response.clone());
        Ok(())
    }
}
