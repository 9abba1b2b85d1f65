//! Defines routes for uploads, sharing and owner file operations.
//!
//! ## Structure
//! - **Uploads**
//!   - `POST /startUpload`, `POST /upload`
//! - **Sharing**
//!   - `POST /sendFile`, `POST /sendByView` (chunked share uploads)
//!   - `POST /revokeViewAccess`, `POST /changeMethod`, `POST /getShareMethod`
//!   - `POST /downloadViewFile`, `POST /downloadSentFile` (recipient reads)
//!   - `POST /getSharedViewFiles` (recipient's live view shares)
//! - **Owner files**
//!   - `POST /download`, `POST /deleteFile`, `POST /createFolder`
//! - **Health**
//!   - `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        file_handlers::{create_folder, delete_file, download},
        health_handlers::{healthz, readyz},
        share_handlers::{
            change_method, download_sent_file, download_view_file, get_share_method,
            get_shared_view_files, revoke_view_access, send_by_view, send_file,
        },
        upload_handlers::{start_upload, upload_chunk},
    },
    services::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};

/// Build the router. `max_body_bytes` bounds every request body, which for
/// the chunk endpoints is the multipart buffer.
pub fn routes(max_body_bytes: usize) -> Router<AppState> {
    Router::new()
        // health endpoints
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // uploads
        .route("/startUpload", post(start_upload))
        .route("/upload", post(upload_chunk))
        // sharing
        .route("/sendFile", post(send_file))
        .route("/sendByView", post(send_by_view))
        .route("/revokeViewAccess", post(revoke_view_access))
        .route("/downloadViewFile", post(download_view_file))
        .route("/downloadSentFile", post(download_sent_file))
        .route("/changeMethod", post(change_method))
        .route("/getShareMethod", post(get_share_method))
        .route("/getSharedViewFiles", post(get_shared_view_files))
        // owner files
        .route("/download", post(download))
        .route("/deleteFile", post(delete_file))
        .route("/createFolder", post(create_folder))
        .layer(DefaultBodyLimit::max(max_body_bytes))
}
