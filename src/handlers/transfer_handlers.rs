//! HTTP handlers for transfer requests: creation and management by the
//! sender, and anonymous redemption by whoever holds the access code.

use crate::{
    errors::AppError,
    handlers::auth::UserId,
    handlers::file_handlers::stream_attachment,
    models::{response::ApiResponse, transfer::TransferRequest},
    services::transfer_store::{AccessOutcome, NewTransfer, TransferUpdate},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

/// Body for `POST /api/transfers`.
#[derive(Debug, Deserialize)]
pub struct CreateTransferReq {
    pub file_id: String,
    pub recipient_id: Option<String>,
    pub recipient_email: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub download_limit: Option<i64>,
    pub notify_on_download: Option<bool>,
    pub message: Option<String>,
}

/// Body for `PUT /api/transfers/{transfer_id}`.
#[derive(Debug, Deserialize)]
pub struct UpdateTransferReq {
    pub expires_at: Option<DateTime<Utc>>,
    pub download_limit: Option<i64>,
    pub notify_on_download: Option<bool>,
    pub message: Option<String>,
}

/// Query params for code redemption endpoints.
#[derive(Debug, Deserialize)]
pub struct AccessQuery {
    pub code: String,
}

/// POST `/api/transfers` — create a grant for a file. The response carries
/// the redemption URL for the recipient.
pub async fn create_transfer(
    State(state): State<AppState>,
    user: UserId,
    Json(body): Json<CreateTransferReq>,
) -> Result<impl IntoResponse, AppError> {
    let request = state
        .transfers
        .create(NewTransfer {
            file_id: body.file_id,
            sender_id: user.0,
            recipient_id: body.recipient_id,
            recipient_email: body.recipient_email,
            expires_at: body.expires_at,
            download_limit: body.download_limit,
            notify_on_download: body.notify_on_download,
            message: body.message,
        })
        .await?;

    let download_url = request.download_url();
    Ok(Json(ApiResponse::ok(
        "transfer request created",
        json!({
            "transfer": request,
            "download_url": download_url,
        }),
    )))
}

/// GET `/api/transfers/sent` — grants the caller created.
pub async fn sent_transfers(
    State(state): State<AppState>,
    user: UserId,
) -> Result<impl IntoResponse, AppError> {
    let requests = state.transfers.sent_by(&user.0).await;
    Ok(Json(ApiResponse::ok("transfer requests listed", requests)))
}

/// GET `/api/transfers/received` — grants addressed to the caller.
pub async fn received_transfers(
    State(state): State<AppState>,
    user: UserId,
) -> Result<impl IntoResponse, AppError> {
    let requests = state.transfers.received_by(&user.0).await;
    Ok(Json(ApiResponse::ok("transfer requests listed", requests)))
}

/// GET `/api/transfers/{transfer_id}` — one grant, visible to its sender
/// and its recipient.
pub async fn get_transfer(
    State(state): State<AppState>,
    user: UserId,
    Path(transfer_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let request = state
        .transfers
        .get(&transfer_id)
        .await
        .ok_or_else(|| AppError::not_found(format!("transfer request `{transfer_id}` not found")))?;
    if request.sender_id != user.0 && request.recipient_id.as_deref() != Some(user.0.as_str()) {
        return Err(AppError::forbidden("access denied"));
    }
    Ok(Json(ApiResponse::ok("transfer request found", request)))
}

/// PUT `/api/transfers/{transfer_id}` — sender-only edit of expiry, limit,
/// notify flag, and message.
pub async fn update_transfer(
    State(state): State<AppState>,
    user: UserId,
    Path(transfer_id): Path<String>,
    Json(body): Json<UpdateTransferReq>,
) -> Result<impl IntoResponse, AppError> {
    let request = state
        .transfers
        .update(
            &transfer_id,
            TransferUpdate {
                expires_at: body.expires_at,
                download_limit: body.download_limit,
                notify_on_download: body.notify_on_download,
                message: body.message,
            },
            &user.0,
        )
        .await?;
    Ok(Json(ApiResponse::ok("transfer request updated", request)))
}

/// DELETE `/api/transfers/{transfer_id}` — sender-only cancel.
pub async fn cancel_transfer(
    State(state): State<AppState>,
    user: UserId,
    Path(transfer_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let request = state.transfers.cancel(&transfer_id, &user.0).await?;
    Ok(Json(ApiResponse::ok("transfer request cancelled", request)))
}

/// GET `/api/transfers/access/{transfer_id}?code=` — anonymous lookup of a
/// grant plus its file metadata. Counts as one access.
pub async fn access_transfer(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
    Query(query): Query<AccessQuery>,
) -> Result<impl IntoResponse, AppError> {
    match state.transfers.access_by_code(&transfer_id, &query.code).await? {
        AccessOutcome::Denied => Err(AppError::forbidden("invalid access code or transfer id")),
        AccessOutcome::Inactive(request) => Err(AppError::bad_request(inactive_reason(&request))),
        AccessOutcome::Granted(request) => {
            let file = state.files.get(&request.file_id).await.ok_or_else(|| {
                AppError::not_found(format!("file `{}` not found", request.file_id))
            })?;
            Ok(Json(ApiResponse::ok(
                "transfer access granted",
                json!({
                    "transfer": request,
                    "file": file,
                }),
            )))
        }
    }
}

/// GET `/download/{transfer_id}?code=` — anonymous redemption that streams
/// the file itself. This is the URL the sender hands out.
pub async fn redeem_download(
    State(state): State<AppState>,
    Path(transfer_id): Path<String>,
    Query(query): Query<AccessQuery>,
) -> Result<Response, AppError> {
    match state.transfers.access_by_code(&transfer_id, &query.code).await? {
        AccessOutcome::Denied => Err(AppError::forbidden("invalid access code or transfer id")),
        AccessOutcome::Inactive(request) => Err(AppError::bad_request(inactive_reason(&request))),
        AccessOutcome::Granted(request) => {
            let (record, file) = state.files.open_reader(&request.file_id).await?;
            Ok(stream_attachment(&record, file))
        }
    }
}

/// Why an otherwise-valid grant cannot be used right now.
fn inactive_reason(request: &TransferRequest) -> String {
    use crate::models::transfer::TransferStatus;
    if request.status == TransferStatus::Cancelled {
        "transfer request was cancelled".into()
    } else if request.status == TransferStatus::Expired || request.is_expired(Utc::now()) {
        "transfer request has expired".into()
    } else if request.has_reached_download_limit() {
        "transfer request download limit reached".into()
    } else {
        "transfer request is inactive".into()
    }
}
