//! HTTP handlers. Each returns `Result<_, AppError>` and delegates to the
//! services in [`crate::services::AppState`].

pub mod file_handlers;
pub mod form;
pub mod health_handlers;
pub mod share_handlers;
pub mod upload_handlers;
