//! Operator endpoints: index recovery, snapshot reload, and the on-demand
//! maintenance sweep. These mirror what the background sweep does on its
//! own schedule.

use crate::{
    errors::AppError, models::response::ApiResponse, state::AppState,
};
use axum::{
    Json,
    extract::{Query, State},
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;

/// Query params for `POST /api/admin/reconcile`.
#[derive(Debug, Deserialize)]
pub struct ReconcileQuery {
    /// Owner assigned to every synthesized record. Ownership is not
    /// recoverable from disk, so without this the records are ownerless.
    pub owner: Option<String>,
}

/// POST `/api/admin/reconcile` — rebuild the file index from a raw walk of
/// the storage root. Used when the snapshot is lost or corrupt.
pub async fn reconcile(
    State(state): State<AppState>,
    Query(query): Query<ReconcileQuery>,
) -> Result<impl IntoResponse, AppError> {
    let count = state.files.reconcile(query.owner.as_deref()).await?;
    Ok(Json(ApiResponse::ok(
        "index reconciled from disk",
        json!({ "files": count }),
    )))
}

/// POST `/api/admin/reload` — re-read both snapshots from disk, replacing
/// the in-memory state.
pub async fn reload(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let files = state.files.reload().await?;
    let transfers = state.transfers.reload().await?;
    Ok(Json(ApiResponse::ok(
        "snapshots reloaded",
        json!({ "files": files, "transfers": transfers }),
    )))
}

/// POST `/api/admin/cleanup` — run the maintenance sweep now: delete
/// expired files, expire stale transfer requests, and evict abandoned
/// chunk sessions.
pub async fn cleanup(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let expired_files = state.files.cleanup_expired().await?;
    let expired_transfers = state.transfers.cleanup_expired().await?;
    let evicted_sessions = state.assembler.evict_stale(state.session_ttl).await?;
    Ok(Json(ApiResponse::ok(
        "cleanup complete",
        json!({
            "expired_files": expired_files,
            "expired_transfers": expired_transfers,
            "evicted_sessions": evicted_sessions,
        }),
    )))
}
