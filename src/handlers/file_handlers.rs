//! HTTP handlers for file operations: uploads (whole and chunked),
//! downloads, listings, metadata edits, and deletes.
//!
//! Bodies are streamed to and from disk rather than buffered; storage
//! concerns live in `FileStore` and `ChunkAssembler`.

use crate::{
    errors::AppError,
    handlers::auth::UserId,
    models::{file_record::FileRecord, response::ApiResponse},
    services::chunk_assembler::ChunkOutcome,
    state::AppState,
};
use axum::{
    Json,
    body::Body,
    extract::{Multipart, Path, Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use tokio_util::io::ReaderStream;

/// Query params for `GET /api/files/search`.
#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
}

/// Body for `PUT /api/files/{file_id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateFileReq {
    pub file_name: Option<String>,
    pub description: Option<String>,
}

/// Body for `PUT /api/files/{file_id}/visibility`.
#[derive(Debug, Deserialize)]
pub struct VisibilityReq {
    pub is_public: bool,
}

/// Progress payload returned while a chunked upload is incomplete.
#[derive(Debug, Serialize)]
pub struct ChunkProgress {
    pub file_id: String,
    pub received: u32,
    pub total: u32,
}

/// POST `/api/files/upload` — single-shot multipart upload.
///
/// Expects one `file` part; its bytes are streamed straight to disk.
pub async fn upload_file(
    State(state): State<AppState>,
    user: UserId,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("malformed multipart body: {err}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let original_name = field.file_name().unwrap_or_default().to_string();
        let content_type = field.content_type().map(str::to_string);
        let stream =
            field.map(|chunk| chunk.map_err(|err| io::Error::new(io::ErrorKind::Other, err)));

        let record = state
            .files
            .store_upload(&original_name, content_type, stream, &user.0)
            .await?;
        return Ok(Json(ApiResponse::ok("file uploaded", record)));
    }
    Err(AppError::bad_request("missing `file` field"))
}

/// POST `/api/files/upload/chunk` — one chunk of a client-chosen upload.
///
/// Multipart fields: `fileId`, `chunkNumber`, `totalChunks`, and the
/// `chunk` payload. The total is restated on every call.
pub async fn upload_chunk(
    State(state): State<AppState>,
    user: UserId,
    mut multipart: Multipart,
) -> Result<Response, AppError> {
    let mut file_id = None;
    let mut chunk_number = None;
    let mut total_chunks = None;
    let mut payload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|err| AppError::bad_request(format!("malformed multipart body: {err}")))?
    {
        match field.name() {
            Some("fileId") => file_id = Some(read_text(field).await?),
            Some("chunkNumber") => chunk_number = Some(read_u32(field, "chunkNumber").await?),
            Some("totalChunks") => total_chunks = Some(read_u32(field, "totalChunks").await?),
            Some("chunk") => {
                payload = Some(field.bytes().await.map_err(|err| {
                    AppError::bad_request(format!("could not read chunk payload: {err}"))
                })?);
            }
            _ => {}
        }
    }

    let file_id = file_id.ok_or_else(|| AppError::bad_request("missing `fileId` field"))?;
    let chunk_number =
        chunk_number.ok_or_else(|| AppError::bad_request("missing `chunkNumber` field"))?;
    let total_chunks =
        total_chunks.ok_or_else(|| AppError::bad_request("missing `totalChunks` field"))?;
    let payload = payload.ok_or_else(|| AppError::bad_request("missing `chunk` field"))?;

    let outcome = state
        .assembler
        .receive_chunk(&file_id, chunk_number, total_chunks, payload, &user.0)
        .await?;

    let response = match outcome {
        ChunkOutcome::Pending { received, total } => {
            let progress = ChunkProgress {
                file_id,
                received,
                total,
            };
            Json(ApiResponse::ok("chunk received", json!(progress))).into_response()
        }
        ChunkOutcome::Complete(record) => {
            Json(ApiResponse::ok("upload complete", json!(record))).into_response()
        }
    };
    Ok(response)
}

/// GET `/api/files` — the caller's files.
pub async fn list_files(
    State(state): State<AppState>,
    user: UserId,
) -> Result<impl IntoResponse, AppError> {
    let files = state.files.list_by_owner(&user.0).await?;
    Ok(Json(ApiResponse::ok("files listed", files)))
}

/// GET `/api/files/public` — every public file.
pub async fn public_files(
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let files = state.files.public_files().await?;
    Ok(Json(ApiResponse::ok("public files listed", files)))
}

/// GET `/api/files/search?q=` — search the caller's files.
pub async fn search_files(
    State(state): State<AppState>,
    user: UserId,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let files = state
        .files
        .search(query.q.as_deref().unwrap_or(""), &user.0)
        .await?;
    Ok(Json(ApiResponse::ok("search complete", files)))
}

/// GET `/api/files/{file_id}` — metadata for one file.
pub async fn get_file_info(
    State(state): State<AppState>,
    user: UserId,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let record = fetch_readable(&state, &file_id, &user).await?;
    Ok(Json(ApiResponse::ok("file found", record)))
}

/// GET `/api/files/download/{file_id}` — stream a file to its owner or to
/// anyone when it is public. Each successful download bumps the counter.
pub async fn download_file(
    State(state): State<AppState>,
    user: UserId,
    Path(file_id): Path<String>,
) -> Result<Response, AppError> {
    fetch_readable(&state, &file_id, &user).await?;
    let (_, file) = state.files.open_reader(&file_id).await?;
    let record = state.files.increment_download(&file_id).await?;
    Ok(stream_attachment(&record, file))
}

/// PUT `/api/files/{file_id}` — owner-only edit of display name and
/// description.
pub async fn update_file(
    State(state): State<AppState>,
    user: UserId,
    Path(file_id): Path<String>,
    Json(body): Json<UpdateFileReq>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .files
        .update_metadata(&file_id, body.file_name, body.description, &user.0)
        .await?;
    Ok(Json(ApiResponse::ok("file updated", record)))
}

/// PUT `/api/files/{file_id}/visibility` — owner-only visibility flip.
pub async fn update_visibility(
    State(state): State<AppState>,
    user: UserId,
    Path(file_id): Path<String>,
    Json(body): Json<VisibilityReq>,
) -> Result<impl IntoResponse, AppError> {
    let record = state
        .files
        .update_visibility(&file_id, body.is_public, &user.0)
        .await?;
    Ok(Json(ApiResponse::ok("visibility updated", record)))
}

/// POST `/api/files/{file_id}/checksum` — compute and store the SHA-256
/// digest on demand.
pub async fn compute_checksum(
    State(state): State<AppState>,
    user: UserId,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    fetch_readable(&state, &file_id, &user).await?;
    let record = state.files.compute_checksum(&file_id).await?;
    Ok(Json(ApiResponse::ok("checksum computed", record)))
}

/// DELETE `/api/files/{file_id}` — owner-only delete of the record and its
/// backing file.
pub async fn delete_file(
    State(state): State<AppState>,
    user: UserId,
    Path(file_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    state.files.delete(&file_id, &user.0).await?;
    Ok((
        StatusCode::OK,
        Json(ApiResponse::message("file deleted")),
    ))
}

/// Fetch a record the caller is allowed to read: their own, or a public
/// one.
async fn fetch_readable(
    state: &AppState,
    file_id: &str,
    user: &UserId,
) -> Result<FileRecord, AppError> {
    let record = state
        .files
        .get(file_id)
        .await
        .ok_or_else(|| AppError::not_found(format!("file `{file_id}` not found")))?;
    if !record.is_owned_by(&user.0) && !record.is_public {
        return Err(AppError::forbidden("access denied"));
    }
    Ok(record)
}

/// Build a streaming attachment response with the record's content
/// headers.
pub(crate) fn stream_attachment(record: &FileRecord, file: tokio::fs::File) -> Response {
    let stream = ReaderStream::new(file);
    let body = Body::from_stream(stream);

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_content_headers(response.headers_mut(), record);
    response
}

fn set_content_headers(headers: &mut HeaderMap, record: &FileRecord) {
    let content_type = record
        .content_type
        .clone()
        .unwrap_or_else(|| "application/octet-stream".into());
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_str(&content_type)
            .unwrap_or_else(|_| HeaderValue::from_static("application/octet-stream")),
    );

    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from_str(&record.size.to_string())
            .unwrap_or_else(|_| HeaderValue::from_static("0")),
    );

    // The sanitized name is header-safe; fancy encodings of the original
    // name are the caller's concern.
    let disposition = format!("attachment; filename=\"{}\"", record.file_name);
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> Result<String, AppError> {
    field
        .text()
        .await
        .map_err(|err| AppError::bad_request(format!("could not read field: {err}")))
}

async fn read_u32(
    field: axum::extract::multipart::Field<'_>,
    name: &str,
) -> Result<u32, AppError> {
    let text = read_text(field).await?;
    text.trim()
        .parse::<u32>()
        .map_err(|_| AppError::bad_request(format!("`{name}` must be a non-negative integer")))
}
