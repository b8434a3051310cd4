//! Defines routes for file, transfer, and maintenance operations.
//!
//! ## Structure
//! - **File endpoints** (authenticated via `x-user-id`)
//!   - `POST   /api/files/upload` — single-shot multipart upload
//!   - `POST   /api/files/upload/chunk` — one chunk of a chunked upload
//!   - `GET    /api/files` — list the caller's files
//!   - `GET    /api/files/public` — list public files
//!   - `GET    /api/files/search?q=` — search the caller's files
//!   - `GET    /api/files/download/{file_id}` — stream a file
//!   - `GET    /api/files/{file_id}` — metadata
//!   - `PUT    /api/files/{file_id}` — edit name/description
//!   - `PUT    /api/files/{file_id}/visibility` — public/private flip
//!   - `POST   /api/files/{file_id}/checksum` — compute SHA-256 on demand
//!   - `DELETE /api/files/{file_id}` — delete record and artifact
//!
//! - **Transfer endpoints**
//!   - `POST   /api/transfers` — create a grant
//!   - `GET    /api/transfers/sent` / `/received` — listings
//!   - `GET    /api/transfers/access/{transfer_id}?code=` — anonymous lookup
//!   - `GET    /api/transfers/{transfer_id}` — detail (sender/recipient)
//!   - `PUT    /api/transfers/{transfer_id}` — sender edit
//!   - `DELETE /api/transfers/{transfer_id}` — sender cancel
//!   - `GET    /download/{transfer_id}?code=` — anonymous redemption
//!
//! - **Operations**: `/healthz`, `/readyz`, and the `/api/admin/*`
//!   reconcile/reload/cleanup endpoints.

use crate::{
    handlers::{
        admin_handlers::{cleanup, reconcile, reload},
        file_handlers::{
            compute_checksum, delete_file, download_file, get_file_info, list_files,
            public_files, search_files, update_file, update_visibility, upload_chunk,
            upload_file,
        },
        health_handlers::{healthz, readyz},
        transfer_handlers::{
            access_transfer, cancel_transfer, create_transfer, get_transfer,
            received_transfers, redeem_download, sent_transfers, update_transfer,
        },
    },
    state::AppState,
};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Build and return the router for the whole API surface.
///
/// The router carries shared state (`AppState`) to all handlers.
pub fn routes() -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // File routes
        .route("/api/files", get(list_files))
        .route("/api/files/upload", post(upload_file))
        .route("/api/files/upload/chunk", post(upload_chunk))
        .route("/api/files/public", get(public_files))
        .route("/api/files/search", get(search_files))
        .route("/api/files/download/{file_id}", get(download_file))
        .route(
            "/api/files/{file_id}",
            get(get_file_info).put(update_file).delete(delete_file),
        )
        .route("/api/files/{file_id}/visibility", put(update_visibility))
        .route("/api/files/{file_id}/checksum", post(compute_checksum))
        // Transfer routes
        .route("/api/transfers", post(create_transfer))
        .route("/api/transfers/sent", get(sent_transfers))
        .route("/api/transfers/received", get(received_transfers))
        .route("/api/transfers/access/{transfer_id}", get(access_transfer))
        .route(
            "/api/transfers/{transfer_id}",
            get(get_transfer)
                .put(update_transfer)
                .delete(cancel_transfer),
        )
        // Anonymous redemption URL handed to recipients
        .route("/download/{transfer_id}", get(redeem_download))
        // Operator routes
        .route("/api/admin/reconcile", post(reconcile))
        .route("/api/admin/reload", post(reload))
        .route("/api/admin/cleanup", post(cleanup))
}
