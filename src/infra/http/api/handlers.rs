//! Images API handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::{Map, Value, json};

use crate::application::images::FieldLookup;
use crate::domain::types::RecordField;

use super::error::{ApiError, app_error_to_api};
use super::models::{CreateImageBody, FieldsQuery, record_representation};
use super::state::ApiState;

/// `POST /api/v1/images`: create-or-fetch a rendered image.
pub async fn create_image(
    State(state): State<ApiState>,
    Json(body): Json<CreateImageBody>,
) -> Result<Response, ApiError> {
    let fields = body
        .parse_fields()
        .map_err(|hint| ApiError::bad_request("invalid fields", Some(hint)))?;

    // Single-field fast path: a known tex key can be answered from the
    // cache without validating the compile inputs at all.
    if let (Some(selected), Some(tex_key)) = (fields.as_deref(), body.tex_key.as_deref())
        && let [field] = selected
    {
        match state
            .images
            .cached_field(tex_key, *field)
            .await
            .map_err(app_error_to_api)?
        {
            FieldLookup::Value { field, value } => {
                return Ok(single_field_body(field, value).into_response());
            }
            FieldLookup::CompileError(error) => {
                return Ok(compile_error_body(&error).into_response());
            }
            FieldLookup::Missing => {}
        }
    }

    let request = body.clone().into_new_request().map_err(|missing| {
        let hint = if fields.is_some() {
            format!(
                "No cache found, you need to supply required fields to \
                 regenerate the image: {}",
                missing.join(", ")
            )
        } else {
            format!("missing required fields: {}", missing.join(", "))
        };
        ApiError::bad_request("invalid compile request", Some(hint))
    })?;

    let outcome = state
        .images
        .create_or_fetch(request)
        .await
        .map_err(app_error_to_api)?;

    let representation = record_representation(&state.images, &outcome.record, fields.as_deref());
    if outcome.record.is_error() {
        return Ok((StatusCode::BAD_REQUEST, Json(Value::Object(representation))).into_response());
    }
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(Value::Object(representation))).into_response())
}

/// `GET /api/v1/images/{tex_key}`: cached single-field lookup or a
/// projected record.
pub async fn get_image(
    State(state): State<ApiState>,
    Path(tex_key): Path<String>,
    Query(query): Query<FieldsQuery>,
) -> Result<Response, ApiError> {
    let fields = query
        .parse()
        .map_err(|hint| ApiError::bad_request("invalid fields", Some(hint)))?;

    if let Some([field]) = fields.as_deref() {
        // Through the field cache; an absent record or field serves an
        // empty object rather than 404, matching the create fast path.
        return match state
            .images
            .cached_field(&tex_key, *field)
            .await
            .map_err(app_error_to_api)?
        {
            FieldLookup::Value { field, value } => Ok(single_field_body(field, value).into_response()),
            FieldLookup::CompileError(error) => Ok(compile_error_body(&error).into_response()),
            FieldLookup::Missing => Ok(Json(Value::Object(Map::new())).into_response()),
        };
    }

    let record = state
        .images
        .lookup(&tex_key)
        .await
        .map_err(app_error_to_api)?
        .ok_or_else(|| ApiError::not_found("image not found"))?;

    let representation = record_representation(&state.images, &record, fields.as_deref());
    if record.is_error() {
        return Ok((StatusCode::BAD_REQUEST, Json(Value::Object(representation))).into_response());
    }
    Ok(Json(Value::Object(representation)).into_response())
}

/// `DELETE /api/v1/images/{tex_key}`: drop the record, its stored file,
/// and every cache slot.
pub async fn delete_image(
    State(state): State<ApiState>,
    Path(tex_key): Path<String>,
) -> Result<StatusCode, ApiError> {
    state
        .images
        .delete(&tex_key)
        .await
        .map_err(app_error_to_api)?;
    Ok(StatusCode::NO_CONTENT)
}

/// `GET /healthz`: liveness.
pub async fn healthz() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// `GET /media/{path}`: serve a stored image.
pub async fn serve_media(
    State(state): State<ApiState>,
    Path(path): Path<String>,
) -> Result<Response, ApiError> {
    let data = match state.storage.read(&path).await {
        Ok(data) => data,
        Err(_) => return Err(ApiError::not_found("media file not found")),
    };
    let mime = mime_guess::from_path(&path).first_or_octet_stream();
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, mime.to_string())],
        data,
    )
        .into_response())
}

fn single_field_body(field: RecordField, value: String) -> Json<Value> {
    Json(json!({ field.as_str(): value }))
}

fn compile_error_body(error: &str) -> (StatusCode, Json<Value>) {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "compile_error": error })),
    )
}
