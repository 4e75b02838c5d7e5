//! Image application service: create-or-fetch, field-cached reads, and
//! delete with cache invalidation.
//!
//! The service owns the cache discipline. The fast cache is best-effort; the
//! durable store through [`ImagesRepo`] stays the source of truth, and the
//! unique key constraint is the final arbiter when concurrent creates race.

use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use metrics::counter;
use time::format_description::well_known::Rfc3339;
use tokio::sync::Mutex;
use tracing::{info, warn};
use url::Url;

use crate::application::error::AppError;
use crate::application::render::{RenderError, RenderedImage};
use crate::application::repos::{ImagesRepo, RepoError};
use crate::cache::{CacheConfig, CachedValue, FieldCache, field_cache_key};
use crate::domain::entities::LatexImageRecord;
use crate::domain::error::DomainError;
use crate::domain::keys::build_key;
use crate::domain::types::{
    ImageFormat, RecordField, TexCompiler, combination_allowed, effective_format,
};
use crate::infra::storage::ImageStorage;

const METRIC_RENDER_SUCCESS: &str = "grafite_render_success_total";
const METRIC_RENDER_FAILURE: &str = "grafite_render_failure_total";

const DEFAULT_CREATOR: &str = "anonymous";

/// Rendering seam; implemented by the latexmk pipeline and by test stubs.
pub trait ImageRenderer: Send + Sync {
    fn render(
        &self,
        tex_key: &str,
        tex_source: &str,
        compiler: TexCompiler,
        format: ImageFormat,
    ) -> Result<RenderedImage, RenderError>;
}

impl ImageRenderer for crate::application::render::Renderer {
    fn render(
        &self,
        tex_key: &str,
        tex_source: &str,
        compiler: TexCompiler,
        format: ImageFormat,
    ) -> Result<RenderedImage, RenderError> {
        crate::application::render::Renderer::render(self, tex_key, tex_source, compiler, format)
    }
}

/// A fully validated create request.
#[derive(Debug, Clone)]
pub struct NewImageRequest {
    pub compiler: TexCompiler,
    pub tex_source: String,
    pub image_format: ImageFormat,
    pub tex_key: Option<String>,
    pub creator: Option<String>,
    pub use_storage_file_if_exists: bool,
}

#[derive(Debug)]
pub struct CreateOutcome {
    pub record: LatexImageRecord,
    pub created: bool,
}

/// Result of a single-field cached lookup.
#[derive(Debug, PartialEq, Eq)]
pub enum FieldLookup {
    /// No record, or the record does not carry the requested field.
    Missing,
    Value { field: RecordField, value: String },
    CompileError(String),
}

pub struct ImageService {
    repo: Arc<dyn ImagesRepo>,
    cache: Arc<dyn FieldCache>,
    cache_config: CacheConfig,
    storage: Arc<ImageStorage>,
    renderer: Arc<dyn ImageRenderer>,
    media_base: Option<Url>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl ImageService {
    pub fn new(
        repo: Arc<dyn ImagesRepo>,
        cache: Arc<dyn FieldCache>,
        cache_config: CacheConfig,
        storage: Arc<ImageStorage>,
        renderer: Arc<dyn ImageRenderer>,
        media_base: Option<Url>,
    ) -> Self {
        Self {
            repo,
            cache,
            cache_config,
            storage,
            renderer,
            media_base,
            in_flight: DashMap::new(),
        }
    }

    /// Compile-or-fetch for one content key. Existing records short-circuit
    /// the pipeline; concurrent first requests for the same key collapse to
    /// one render.
    pub async fn create_or_fetch(&self, req: NewImageRequest) -> Result<CreateOutcome, AppError> {
        if !combination_allowed(req.compiler, req.image_format) {
            return Err(DomainError::validation(format!(
                "unsupported compiler/format combination: {} / {}",
                req.compiler, req.image_format
            ))
            .into());
        }
        let format = effective_format(req.compiler, req.image_format, &req.tex_source);
        let tex_key = match &req.tex_key {
            Some(key) => key.clone(),
            None => build_key(&req.tex_source, req.compiler, format),
        };

        let guard = self.key_guard(&tex_key);
        let _locked = guard.lock().await;
        let outcome = self.create_locked(&req, &tex_key, format).await;
        drop(_locked);
        self.release_key_guard(&tex_key);
        outcome
    }

    async fn create_locked(
        &self,
        req: &NewImageRequest,
        tex_key: &str,
        format: ImageFormat,
    ) -> Result<CreateOutcome, AppError> {
        if let Some(record) = self.repo.find_by_key(tex_key).await? {
            return Ok(CreateOutcome {
                record,
                created: false,
            });
        }

        let creator = req.creator.clone().unwrap_or_else(|| DEFAULT_CREATOR.into());

        if req.use_storage_file_if_exists {
            let file_name = format!("{tex_key}.{}", format.extension());
            if self.storage.size(&file_name).await?.is_some() {
                info!(tex_key, file = file_name, "adopting existing stored image");
                let record = LatexImageRecord::from_stored_file(tex_key, file_name, creator);
                return self.persist(record).await;
            }
        }

        let renderer = Arc::clone(&self.renderer);
        let (key, source, compiler) = (tex_key.to_string(), req.tex_source.clone(), req.compiler);
        let rendered =
            tokio::task::spawn_blocking(move || renderer.render(&key, &source, compiler, format))
                .await
                .map_err(|err| AppError::Task(err.to_string()))?;

        let record = match rendered {
            Ok(image) => {
                counter!(METRIC_RENDER_SUCCESS).increment(1);
                let stored = self
                    .storage
                    .store(&image.file_name, Bytes::from(image.bytes))
                    .await?;
                LatexImageRecord::succeeded(tex_key, stored, image.data_url, creator)
            }
            Err(err) => {
                counter!(METRIC_RENDER_FAILURE).increment(1);
                match err.compile_error() {
                    Some(log) => LatexImageRecord::failed(tex_key, log, creator),
                    // Transient failures (conversion, timeout, missing tool)
                    // never become durable error records.
                    None => return Err(AppError::Render(err)),
                }
            }
        };
        self.persist(record).await
    }

    /// Single-field read path: field slot, then error slot, then the store.
    pub async fn cached_field(
        &self,
        tex_key: &str,
        field: RecordField,
    ) -> Result<FieldLookup, AppError> {
        let slot = field_cache_key(tex_key, field);
        if let Some(value) = self.cache.get(&slot) {
            // The error slot is the compile_error field's own slot; a hit
            // there is an error outcome, same as when the store serves it.
            return Ok(match (field, value) {
                (RecordField::CompileError, CachedValue::Text(error)) => {
                    FieldLookup::CompileError(error)
                }
                (_, value) => FieldLookup::Value {
                    field,
                    value: self.materialize(value),
                },
            });
        }

        let error_slot = field_cache_key(tex_key, RecordField::CompileError);
        if field != RecordField::CompileError
            && let Some(CachedValue::Text(error)) = self.cache.get(&error_slot)
        {
            return Ok(FieldLookup::CompileError(error));
        }

        let Some(record) = self.repo.find_by_key(tex_key).await? else {
            return Ok(FieldLookup::Missing);
        };

        if let Some(error) = &record.compile_error {
            if self.cache_config.is_cacheable(RecordField::CompileError) {
                self.cache.add(&error_slot, CachedValue::Text(error.clone()));
            }
            return Ok(FieldLookup::CompileError(error.clone()));
        }

        let Some(value) = self.cacheable_value(&record, field).await else {
            return Ok(FieldLookup::Missing);
        };
        if self.cache_config.is_cacheable(field) {
            self.cache.add(&slot, value.clone());
        }
        Ok(FieldLookup::Value {
            field,
            value: self.materialize(value),
        })
    }

    pub async fn lookup(&self, tex_key: &str) -> Result<Option<LatexImageRecord>, AppError> {
        Ok(self.repo.find_by_key(tex_key).await?)
    }

    /// Delete the record, its stored image file, and every cache slot. Cache
    /// and file cleanup are soft; the record removal is what matters.
    pub async fn delete(&self, tex_key: &str) -> Result<(), AppError> {
        let record = self.repo.delete_by_key(tex_key).await?;

        if let Some(path) = &record.image_path
            && let Err(err) = self.storage.delete(path).await
        {
            warn!(tex_key, error = %err, "failed to delete stored image file");
        }
        for field in RecordField::ALL {
            self.cache.delete(&field_cache_key(tex_key, *field));
        }
        info!(tex_key, "deleted image record");
        Ok(())
    }

    /// The serialized value of one record field, `image` materialized per
    /// the relative-path setting.
    pub fn field_value(&self, record: &LatexImageRecord, field: RecordField) -> Option<String> {
        match field {
            RecordField::TexKey => Some(record.tex_key.clone()),
            RecordField::CreationTime => record.creation_time.format(&Rfc3339).ok(),
            RecordField::DataUrl => record.data_url.clone(),
            RecordField::Image => record.image_path.as_deref().map(|p| self.image_value(p)),
            RecordField::CompileError => record.compile_error.clone(),
            RecordField::Creator => Some(record.creator.clone()),
        }
    }

    async fn persist(&self, record: LatexImageRecord) -> Result<CreateOutcome, AppError> {
        record.validate()?;
        match self.repo.insert(&record).await {
            Ok(()) => {
                self.populate_on_save(&record).await;
                Ok(CreateOutcome {
                    record,
                    created: true,
                })
            }
            Err(RepoError::Duplicate { .. }) => {
                // Lost the insert race; the stored file shares the loser's
                // name and content, so serving the winner is equivalent.
                let existing = self
                    .repo
                    .find_by_key(&record.tex_key)
                    .await?
                    .ok_or(RepoError::NotFound)?;
                Ok(CreateOutcome {
                    record: existing,
                    created: false,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Write-path cache population on a fresh record.
    async fn populate_on_save(&self, record: &LatexImageRecord) {
        if let Some(error) = &record.compile_error {
            if self.cache_config.is_cacheable(RecordField::CompileError) {
                self.cache.add(
                    &field_cache_key(&record.tex_key, RecordField::CompileError),
                    CachedValue::Text(error.clone()),
                );
            }
            return;
        }

        // Image slots only carry relative paths; in absolute-URL mode the
        // value depends on the media base, so it is built per read instead.
        if self.cache_config.image_returns_relative_path
            && self.cache_config.is_cacheable(RecordField::Image)
            && let Some(path) = &record.image_path
        {
            let size = self.storage.size(path).await.ok().flatten().unwrap_or(0);
            self.cache.add(
                &field_cache_key(&record.tex_key, RecordField::Image),
                CachedValue::Image {
                    path: path.clone(),
                    size,
                },
            );
        }

        if self.cache_config.data_url_on_save
            && self.cache_config.is_cacheable(RecordField::DataUrl)
            && let Some(data_url) = &record.data_url
        {
            self.cache.add(
                &field_cache_key(&record.tex_key, RecordField::DataUrl),
                CachedValue::Text(data_url.clone()),
            );
        }
    }

    async fn cacheable_value(
        &self,
        record: &LatexImageRecord,
        field: RecordField,
    ) -> Option<CachedValue> {
        if field == RecordField::Image {
            let path = record.image_path.as_ref()?;
            let size = self.storage.size(path).await.ok().flatten().unwrap_or(0);
            return Some(CachedValue::Image {
                path: path.clone(),
                size,
            });
        }
        self.field_value(record, field).map(CachedValue::Text)
    }

    fn materialize(&self, value: CachedValue) -> String {
        match value {
            CachedValue::Text(text) => text,
            CachedValue::Image { path, .. } => self.image_value(&path),
        }
    }

    /// Relative stored path, or an absolute media URL when configured.
    fn image_value(&self, path: &str) -> String {
        if self.cache_config.image_returns_relative_path {
            return path.to_string();
        }
        match &self.media_base {
            Some(base) => base
                .join(&format!("media/{path}"))
                .map(|url| url.to_string())
                .unwrap_or_else(|_| path.to_string()),
            None => path.to_string(),
        }
    }

    fn key_guard(&self, tex_key: &str) -> Arc<Mutex<()>> {
        self.in_flight
            .entry(tex_key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn release_key_guard(&self, tex_key: &str) {
        self.in_flight
            .remove_if(tex_key, |_, guard| Arc::strong_count(guard) <= 2);
    }
}
