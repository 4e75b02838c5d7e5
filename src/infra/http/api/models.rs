//! Request and response shapes for the images API.

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::application::images::{ImageService, NewImageRequest};
use crate::domain::entities::LatexImageRecord;
use crate::domain::types::{ImageFormat, RecordField, TexCompiler};

/// Body of `POST /api/v1/images`.
///
/// Compile inputs are optional at the serde level because the single-field
/// fast path may answer from the cache before they are required.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateImageBody {
    pub compiler: Option<TexCompiler>,
    pub tex_source: Option<String>,
    pub image_format: Option<ImageFormat>,
    pub tex_key: Option<String>,
    pub fields: Option<Vec<String>>,
    pub creator: Option<String>,
    pub use_storage_file_if_exists: Option<bool>,
}

impl CreateImageBody {
    /// Resolve the requested projection; unknown names are reported.
    pub fn parse_fields(&self) -> Result<Option<Vec<RecordField>>, String> {
        let Some(names) = &self.fields else {
            return Ok(None);
        };
        let mut fields = Vec::with_capacity(names.len());
        for name in names {
            match RecordField::parse(name) {
                Some(field) => fields.push(field),
                None => return Err(format!("unknown field `{name}`")),
            }
        }
        Ok(Some(fields))
    }

    /// Promote to a full compile request, reporting every missing input.
    pub fn into_new_request(self) -> Result<NewImageRequest, Vec<String>> {
        let mut missing = Vec::new();
        if self.compiler.is_none() {
            missing.push("compiler".to_string());
        }
        if self.tex_source.as_deref().is_none_or(|s| s.trim().is_empty()) {
            missing.push("tex_source".to_string());
        }
        if self.image_format.is_none() {
            missing.push("image_format".to_string());
        }
        if !missing.is_empty() {
            return Err(missing);
        }

        Ok(NewImageRequest {
            compiler: self.compiler.unwrap(),
            tex_source: self.tex_source.unwrap(),
            image_format: self.image_format.unwrap(),
            tex_key: self.tex_key,
            creator: self.creator,
            use_storage_file_if_exists: self.use_storage_file_if_exists.unwrap_or(false),
        })
    }
}

/// Query string of `GET /api/v1/images/{tex_key}`.
#[derive(Debug, Default, Deserialize)]
pub struct FieldsQuery {
    /// Comma-separated field names.
    pub fields: Option<String>,
}

impl FieldsQuery {
    pub fn parse(&self) -> Result<Option<Vec<RecordField>>, String> {
        let Some(raw) = self.fields.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let mut fields = Vec::new();
        for name in raw.split(',').map(str::trim) {
            match RecordField::parse(name) {
                Some(field) => fields.push(field),
                None => return Err(format!("unknown field `{name}`")),
            }
        }
        Ok(Some(fields))
    }
}

/// Serialize a record, projected to `fields` when given.
///
/// `compile_error` is special: a populated value is always present in the
/// output even when not requested, and a null one is never emitted.
pub fn record_representation(
    images: &ImageService,
    record: &LatexImageRecord,
    fields: Option<&[RecordField]>,
) -> Map<String, Value> {
    let selected: &[RecordField] = fields.unwrap_or(RecordField::ALL);

    let mut body = Map::new();
    for field in selected {
        let value = images
            .field_value(record, *field)
            .map(Value::String)
            .unwrap_or(Value::Null);
        body.insert(field.as_str().to_string(), value);
    }

    match &record.compile_error {
        Some(error) => {
            body.insert(
                RecordField::CompileError.as_str().to_string(),
                Value::String(error.clone()),
            );
        }
        None => {
            body.remove(RecordField::CompileError.as_str());
        }
    }
    body
}
