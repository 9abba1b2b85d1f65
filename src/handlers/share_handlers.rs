//! Sharing endpoints: chunked share uploads, revocation, recipient downloads
//! and grant conversion.

use super::form::{MultipartForm, content_response};
use crate::{errors::AppError, models::share::ShareMethod, services::AppState};
use axum::{
    Json,
    extract::{Multipart, State},
    response::Response,
};
use serde::Deserialize;
use serde_json::{Value, json};

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareTripleReq {
    #[serde(alias = "fileid")]
    pub file_id: String,
    pub user_id: String,
    pub recipient_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewFileReq {
    pub user_id: String,
    #[serde(alias = "fileid")]
    pub file_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentFileReq {
    pub user_id: String,
    pub sender_id: String,
    #[serde(alias = "fileid")]
    pub file_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserReq {
    pub user_id: String,
}

struct ShareChunk {
    file_id: String,
    owner_id: String,
    recipient_id: String,
    metadata: String,
}

impl ShareChunk {
    fn from_form(form: &MultipartForm) -> Result<Self, AppError> {
        Ok(Self {
            file_id: form.require(&["fileid", "fileId"])?.to_string(),
            owner_id: form.require(&["userId"])?.to_string(),
            recipient_id: form.require(&["recipientUserId", "recipientId"])?.to_string(),
            metadata: form.text(&["metadata"]).unwrap_or("{}").to_string(),
        })
    }
}

fn chunk_ack(file_id: &str, index: u64) -> Json<Value> {
    Json(json!({
        "fileId": file_id,
        "message": format!("Chunk {index} uploaded"),
    }))
}

/// `POST /sendFile`
pub async fn send_file(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut form = MultipartForm::collect(multipart).await?;
    let req = ShareChunk::from_form(&form)?;
    let position = form.chunk_position()?;
    let payload = form.take_file()?;

    let granted = state
        .shares
        .send_file_chunk(
            &req.owner_id,
            &req.recipient_id,
            &req.file_id,
            position,
            payload,
            &req.metadata,
        )
        .await?;

    Ok(match granted {
        Some(grant) => Json(json!({
            "message": "File sent successfully",
            "receivedFileID": grant.id,
        })),
        None => chunk_ack(&req.file_id, position.index),
    })
}

/// `POST /sendByView`
pub async fn send_by_view(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut form = MultipartForm::collect(multipart).await?;
    let req = ShareChunk::from_form(&form)?;
    let position = form.chunk_position()?;
    let payload = form.take_file()?;

    let granted = state
        .shares
        .send_by_view_chunk(
            &req.owner_id,
            &req.recipient_id,
            &req.file_id,
            position,
            payload,
            &req.metadata,
        )
        .await?;

    Ok(match granted {
        Some(grant) => Json(json!({
            "message": "File shared for view-only access successfully",
            "shareId": grant.id,
        })),
        None => chunk_ack(&req.file_id, position.index),
    })
}

/// `POST /revokeViewAccess`
pub async fn revoke_view_access(
    State(state): State<AppState>,
    Json(req): Json<ShareTripleReq>,
) -> Result<Json<Value>, AppError> {
    state
        .shares
        .revoke_view(&req.user_id, &req.recipient_id, &req.file_id)
        .await?;
    Ok(Json(json!({ "message": "View access revoked successfully" })))
}

/// `POST /downloadViewFile`
pub async fn download_view_file(
    State(state): State<AppState>,
    Json(req): Json<ViewFileReq>,
) -> Result<Response, AppError> {
    let content = state.shares.resolve_view(&req.user_id, &req.file_id).await?;
    Ok(content_response(
        &content.file,
        content.body,
        &[
            ("x-view-only", "true"),
            ("x-file-id", content.file.id.as_str()),
            ("x-share-id", content.grant.id.as_str()),
        ],
    ))
}

/// `POST /downloadSentFile`
pub async fn download_sent_file(
    State(state): State<AppState>,
    Json(req): Json<SentFileReq>,
) -> Result<Response, AppError> {
    let content = state
        .shares
        .open_download(&req.user_id, &req.sender_id, &req.file_id)
        .await?;
    Ok(content_response(&content.file, content.body, &[]))
}

/// `POST /changeMethod` (multipart form)
pub async fn change_method(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let form = MultipartForm::collect(multipart).await?;
    let file_id = form.require(&["fileid", "fileId"])?;
    let user_id = form.require(&["userId"])?;
    let recipient_id = form.require(&["recipientId", "recipientUserId"])?;
    let target: ShareMethod = form
        .require(&["newShareMethod"])?
        .parse()
        .map_err(|_| AppError::bad_request("Invalid share method. Use 'view' or 'download'"))?;
    let metadata = form.text(&["metadata"]).unwrap_or("{}");

    let conversion = state
        .shares
        .convert(user_id, recipient_id, file_id, target, metadata)
        .await?;

    let message = match conversion.current {
        ShareMethod::View => "Successfully converted to view-only sharing",
        ShareMethod::Download => "Successfully converted to download sharing",
    };
    Ok(Json(json!({
        "message": message,
        "previousMethod": conversion.previous,
        "newMethod": conversion.current,
    })))
}

/// `POST /getSharedViewFiles`
pub async fn get_shared_view_files(
    State(state): State<AppState>,
    Json(req): Json<UserReq>,
) -> Result<Json<Value>, AppError> {
    if req.user_id.trim().is_empty() {
        return Err(AppError::bad_request("Missing userId"));
    }
    let files = state
        .shares
        .shared_view_files(&req.user_id)
        .await?
        .into_iter()
        .map(|(grant, file)| {
            json!({
                "share_id": grant.id,
                "sender_id": grant.sender_id,
                "file_id": grant.file_id,
                "metadata": grant.metadata,
                "shared_at": grant.shared_at,
                "expires_at": grant.expires_at,
                "file_name": file.file_name,
                "file_type": file.file_type,
                "file_size": file.file_size,
                "description": file.description,
                "view_only": true,
            })
        })
        .collect();
    Ok(Json(Value::Array(files)))
}

/// `POST /getShareMethod`
pub async fn get_share_method(
    State(state): State<AppState>,
    Json(req): Json<ShareTripleReq>,
) -> Result<Json<Value>, AppError> {
    let method = state
        .shares
        .current_method(&req.user_id, &req.recipient_id, &req.file_id)
        .await?;
    Ok(Json(json!({
        "fileId": req.file_id,
        "shareMethod": method,
        "canConvert": true,
    })))
}
