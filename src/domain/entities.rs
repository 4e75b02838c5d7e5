//! Persisted records.

use time::OffsetDateTime;
use uuid::Uuid;

use super::error::DomainError;

/// Durable outcome of a compile for one content key.
///
/// Exactly one of the success side (`data_url`, with its stored `image_path`)
/// and `compile_error` is populated. The record is terminal once written:
/// normal operation never flips it between the two states.
#[derive(Debug, Clone)]
pub struct LatexImageRecord {
    pub id: Uuid,
    pub tex_key: String,
    /// Path of the stored image file, relative to the media root.
    pub image_path: Option<String>,
    pub data_url: Option<String>,
    pub compile_error: Option<String>,
    pub creation_time: OffsetDateTime,
    pub creator: String,
}

impl LatexImageRecord {
    pub fn succeeded(
        tex_key: impl Into<String>,
        image_path: impl Into<String>,
        data_url: impl Into<String>,
        creator: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tex_key: tex_key.into(),
            image_path: Some(image_path.into()),
            data_url: Some(data_url.into()),
            compile_error: None,
            creation_time: OffsetDateTime::now_utc(),
            creator: creator.into(),
        }
    }

    /// A record adopting an already-stored image file; no data URL is
    /// available because nothing was rendered.
    pub fn from_stored_file(
        tex_key: impl Into<String>,
        image_path: impl Into<String>,
        creator: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tex_key: tex_key.into(),
            image_path: Some(image_path.into()),
            data_url: None,
            compile_error: None,
            creation_time: OffsetDateTime::now_utc(),
            creator: creator.into(),
        }
    }

    pub fn failed(
        tex_key: impl Into<String>,
        compile_error: impl Into<String>,
        creator: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            tex_key: tex_key.into(),
            image_path: None,
            data_url: None,
            compile_error: Some(compile_error.into()),
            creation_time: OffsetDateTime::now_utc(),
            creator: creator.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.compile_error.is_some()
    }

    /// Enforce the success/error mutual-exclusivity invariant.
    pub fn validate(&self) -> Result<(), DomainError> {
        let has_success = self.data_url.is_some() || self.image_path.is_some();
        match (has_success, self.compile_error.is_some()) {
            (true, true) => Err(DomainError::invariant(
                "record holds both a rendered image and a compile error",
            )),
            (false, false) => Err(DomainError::invariant(
                "record holds neither a rendered image nor a compile error",
            )),
            _ => Ok(()),
        }
    }
}
