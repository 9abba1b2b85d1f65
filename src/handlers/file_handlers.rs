//! Owner file endpoints: download, delete, create folder.

use super::form::content_response;
use crate::{errors::AppError, services::AppState};
use axum::{Json, extract::State, response::Response};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileReq {
    pub user_id: String,
    #[serde(alias = "fileid")]
    pub file_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateFolderReq {
    pub user_id: String,
    pub folder_name: String,
    pub parent_path: Option<String>,
    #[serde(default)]
    pub description: String,
}

/// `POST /download`
pub async fn download(
    State(state): State<AppState>,
    Json(req): Json<FileReq>,
) -> Result<Response, AppError> {
    let content = state.files.download(&req.user_id, &req.file_id).await?;
    Ok(content_response(&content.file, content.body, &[]))
}

/// `POST /deleteFile`
pub async fn delete_file(
    State(state): State<AppState>,
    Json(req): Json<FileReq>,
) -> Result<Json<Value>, AppError> {
    state.files.delete(&req.user_id, &req.file_id).await?;
    Ok(Json(json!({ "message": "File deleted successfully" })))
}

/// `POST /createFolder`
pub async fn create_folder(
    State(state): State<AppState>,
    Json(req): Json<CreateFolderReq>,
) -> Result<Json<Value>, AppError> {
    let folder = state
        .files
        .create_folder(
            &req.user_id,
            &req.folder_name,
            req.parent_path.as_deref(),
            &req.description,
        )
        .await?;
    Ok(Json(json!({
        "message": "Folder created successfully",
        "folderId": folder.id,
        "cid": folder.cid,
    })))
}
