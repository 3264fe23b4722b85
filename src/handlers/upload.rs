//! # Upload Endpoints
//!
//! Thin HTTP adapters around the upload pipeline. The client protocol is:
//! 1. `POST /upload/session`: allocate an upload id
//! 2. `POST /upload/chunk`: repeated multipart posts with fields
//!    `uploadId`, `seq`, and `file` (one recorded fragment per post)
//! 3. `POST /upload/finalize`: urlencoded form with `uploadId` and
//!    `totalChunks`, returning the artifact descriptor
//!
//! All parameter binding and multipart parsing lives here; the handlers call
//! straight into `UploadService` and translate nothing else.

use crate::error::AppError;
use crate::state::AppState;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

/// `POST /upload/session`: allocate a fresh upload session.
pub async fn create_session(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let upload_id = state.uploads.create_session().await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true, "uploadId": upload_id })))
}

/// `POST /upload/chunk`: append one multipart chunk to a session's stream.
///
/// Expected multipart fields: `uploadId` (text), `seq` (text integer,
/// advisory), `file` (the binary fragment). Unknown fields are drained and
/// ignored.
pub async fn upload_chunk(
    state: web::Data<AppState>,
    mut payload: Multipart,
) -> Result<HttpResponse, AppError> {
    let mut upload_id: Option<String> = None;
    let mut seq: Option<u32> = None;
    let mut bytes: Vec<u8> = Vec::new();

    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|err| AppError::InvalidArgument(format!("malformed multipart payload: {}", err)))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "uploadId" => upload_id = Some(read_text_field(&mut field).await?),
            "seq" => {
                let raw = read_text_field(&mut field).await?;
                seq = Some(raw.trim().parse().map_err(|_| {
                    AppError::InvalidArgument(format!("seq must be a non-negative integer, got '{}'", raw))
                })?);
            }
            "file" => bytes = read_binary_field(&mut field).await?,
            other => {
                debug!(field = other, "ignoring unexpected multipart field");
                read_binary_field(&mut field).await?;
            }
        }
    }

    let upload_id =
        upload_id.ok_or_else(|| AppError::InvalidArgument("uploadId is required".to_string()))?;
    let seq = seq.ok_or_else(|| AppError::InvalidArgument("seq is required".to_string()))?;

    state.uploads.append_chunk(&upload_id, seq, &bytes).await?;
    Ok(HttpResponse::Ok().json(json!({ "ok": true })))
}

/// Form body of the finalize request, using the field names the browser
/// recorder client sends.
#[derive(Debug, Deserialize)]
pub struct FinalizeForm {
    #[serde(rename = "uploadId")]
    pub upload_id: String,
    #[serde(rename = "totalChunks")]
    pub total_chunks: i64,
}

/// `POST /upload/finalize`: freeze the stream, encode it, and return the
/// artifact descriptor.
pub async fn finalize_upload(
    state: web::Data<AppState>,
    form: web::Form<FinalizeForm>,
) -> Result<HttpResponse, AppError> {
    let artifact = state
        .uploads
        .finalize(&form.upload_id, form.total_chunks)
        .await?;

    Ok(HttpResponse::Ok().json(json!({
        "ok": true,
        "id": artifact.id,
        "key": artifact.key,
        "contentType": artifact.content_type,
        "size": artifact.size
    })))
}

/// Collect a multipart field's full payload into memory. Chunks are small
/// recorder fragments, so buffering one per request is fine.
async fn read_binary_field(field: &mut Field) -> Result<Vec<u8>, AppError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field
        .try_next()
        .await
        .map_err(|err| AppError::InvalidArgument(format!("failed to read multipart field: {}", err)))?
    {
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

/// Collect a text field, rejecting non-UTF-8 content.
async fn read_text_field(field: &mut Field) -> Result<String, AppError> {
    let raw = read_binary_field(field).await?;
    String::from_utf8(raw)
        .map_err(|_| AppError::InvalidArgument("expected a UTF-8 text field".to_string()))
}
