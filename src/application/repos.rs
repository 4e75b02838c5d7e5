//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::entities::LatexImageRecord;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, RepoError::Duplicate { .. })
    }
}

/// Durable store of rendered images, keyed by tex key.
#[async_trait]
pub trait ImagesRepo: Send + Sync {
    /// Insert-if-absent; an existing record for the key surfaces as
    /// [`RepoError::Duplicate`].
    async fn insert(&self, record: &LatexImageRecord) -> Result<(), RepoError>;

    async fn find_by_key(&self, tex_key: &str) -> Result<Option<LatexImageRecord>, RepoError>;

    /// Remove the record. Missing keys are [`RepoError::NotFound`].
    async fn delete_by_key(&self, tex_key: &str) -> Result<LatexImageRecord, RepoError>;
}
