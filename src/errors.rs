use crate::services::{
    chunk_assembler::TransferError, file_service::FileError, metadata_store::MetadataError,
    object_store::ObjectStoreError, share_service::ShareError,
};
use axum::{
    Json,
    extract::multipart::MultipartError,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::fmt;

/// A lightweight wrapper for general errors that keeps the message local.
#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub message: String,
}

impl AppError {
    /// Create a new AppError with a specific status and message.
    pub fn new(status: StatusCode, msg: impl Into<String>) -> Self {
        Self {
            status,
            message: msg.into(),
        }
    }

    /// Shortcut for a 500 Internal Server Error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, msg)
    }

    /// Shortcut for 404 Not Found
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, msg)
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, msg)
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, msg)
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!("request failed: {}", self.message);
        }
        let body = Json(json!({
            "error": self.message,
            "status": self.status.as_u16()
        }));

        (self.status, body).into_response()
    }
}

impl From<MultipartError> for AppError {
    fn from(err: MultipartError) -> Self {
        AppError::new(err.status(), format!("invalid multipart form: {}", err.body_text()))
    }
}

impl From<ObjectStoreError> for AppError {
    fn from(err: ObjectStoreError) -> Self {
        match err {
            ObjectStoreError::NotFound(_) => AppError::not_found(err.to_string()),
            ObjectStoreError::InvalidPath(_) => AppError::bad_request(err.to_string()),
            other => AppError::internal(other.to_string()),
        }
    }
}

impl From<MetadataError> for AppError {
    fn from(err: MetadataError) -> Self {
        match err {
            MetadataError::InvalidTags(_) => AppError::bad_request(err.to_string()),
            MetadataError::Database(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<TransferError> for AppError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::InvalidChunkIndex(_)
            | TransferError::InvalidTotalChunks(_)
            | TransferError::MissingPayload => AppError::bad_request(err.to_string()),
            TransferError::FileNotFound(_) => AppError::not_found(err.to_string()),
            TransferError::FileAlreadyFinalized(_) => AppError::conflict(err.to_string()),
            TransferError::Metadata(inner) => inner.into(),
            TransferError::TempWriteFailed { .. }
            | TransferError::ChunkMergeFailed { .. }
            | TransferError::MetadataFinalizeFailed { .. }
            | TransferError::Cipher(_) => AppError::internal(err.to_string()),
        }
    }
}

impl From<ShareError> for AppError {
    fn from(err: ShareError) -> Self {
        match err {
            ShareError::FileNotFound(_) | ShareError::NoActiveShare => {
                AppError::not_found(err.to_string())
            }
            ShareError::Unauthorized { .. } | ShareError::AccessDenied(_) => {
                AppError::forbidden(err.to_string())
            }
            ShareError::AlreadyUsingMethod(_) => AppError::bad_request(err.to_string()),
            ShareError::Transfer(inner) => inner.into(),
            ShareError::Storage(inner) => inner.into(),
            ShareError::Metadata(inner) => inner.into(),
            ShareError::Cipher(inner) => AppError::internal(inner.to_string()),
        }
    }
}

impl From<FileError> for AppError {
    fn from(err: FileError) -> Self {
        match err {
            FileError::FileNotFound(_) => AppError::not_found(err.to_string()),
            FileError::Unauthorized { .. } => AppError::forbidden(err.to_string()),
            FileError::FileNotFinalized(_) => AppError::conflict(err.to_string()),
            FileError::InvalidFolderName(_) => AppError::bad_request(err.to_string()),
            FileError::Storage(inner) => inner.into(),
            FileError::Metadata(inner) => inner.into(),
            FileError::Cipher(inner) => AppError::internal(inner.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::share::ShareMethod;

    fn status_of(err: impl Into<AppError>) -> StatusCode {
        err.into().status
    }

    #[test]
    fn validation_errors_are_bad_requests() {
        assert_eq!(
            status_of(TransferError::InvalidChunkIndex("x".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_of(TransferError::MissingPayload), StatusCode::BAD_REQUEST);
        assert_eq!(
            status_of(ShareError::AlreadyUsingMethod(ShareMethod::View)),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn absent_versus_inaccessible() {
        assert_eq!(status_of(ShareError::NoActiveShare), StatusCode::NOT_FOUND);
        assert_eq!(
            status_of(ShareError::AccessDenied("expired".into())),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(ShareError::Unauthorized {
                user_id: "u".into(),
                file_id: "f".into()
            }),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            status_of(FileError::FileNotFinalized("f".into())),
            StatusCode::CONFLICT
        );
    }

    #[test]
    fn upstream_failures_are_server_errors() {
        let merge = TransferError::ChunkMergeFailed {
            upload_key: "f".into(),
            source: ObjectStoreError::Status {
                path: "files/f".into(),
                status: 507,
            },
        };
        assert_eq!(status_of(merge), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            status_of(ShareError::Transfer(TransferError::MetadataFinalizeFailed {
                file_id: "f".into(),
                reason: "db down".into(),
            })),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[tokio::test]
    async fn body_carries_error_and_status() {
        let resp = AppError::conflict("already finalized").into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "already finalized");
        assert_eq!(body["status"], 409);
    }
}
