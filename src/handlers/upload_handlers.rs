//! Private chunked uploads.
//!
//! - POST /startUpload -> create an unfinalized file record
//! - POST /upload      -> accept one chunk; the last one merges the file

use super::form::MultipartForm;
use crate::{
    errors::AppError,
    models::file::NewFile,
    services::{AppState, chunk_assembler::ChunkReceipt},
};
use axum::{
    Json,
    extract::{Multipart, State},
};
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::BTreeSet;
use tracing::info;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartUploadReq {
    pub user_id: String,
    pub file_name: String,
    #[serde(default)]
    pub file_type: String,
    #[serde(default)]
    pub nonce: String,
    #[serde(default, alias = "description")]
    pub file_description: String,
    #[serde(default, alias = "tags")]
    pub file_tags: BTreeSet<String>,
    pub path: Option<String>,
}

/// `POST /startUpload`
pub async fn start_upload(
    State(state): State<AppState>,
    Json(req): Json<StartUploadReq>,
) -> Result<Json<Value>, AppError> {
    if req.user_id.trim().is_empty() || req.file_name.trim().is_empty() {
        return Err(AppError::bad_request("userId and fileName are required"));
    }
    let record = state
        .assembler
        .start_upload(&NewFile {
            owner_id: req.user_id,
            file_name: req.file_name,
            file_type: req.file_type,
            nonce: req.nonce,
            description: req.file_description,
            tags: req.file_tags,
            path: req.path,
        })
        .await?;

    Ok(Json(json!({
        "fileId": record.id,
        "message": "Upload started",
    })))
}

/// `POST /upload`
///
/// Without a `fileId`, chunk 0 creates the record from the form's metadata
/// fields. The caller must own the file.
pub async fn upload_chunk(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<Value>, AppError> {
    let mut form = MultipartForm::collect(multipart).await?;
    let user_id = form.require(&["userId"])?.to_string();
    let position = form.chunk_position()?;
    let payload = form.take_file()?;

    let file_id = match form.text(&["fileId", "fileid"]) {
        Some(file_id) => {
            let record = state
                .metadata
                .get_file(file_id)
                .await?
                .ok_or_else(|| AppError::not_found(format!("file `{file_id}` not found")))?;
            if record.owner_id != user_id {
                return Err(AppError::forbidden("Unauthorized: You don't own this file"));
            }
            record.id
        }
        None if position.index == 0 => {
            let record = state.assembler.start_upload(&new_file_from(&form, &user_id)?).await?;
            record.id
        }
        None => return Err(AppError::bad_request("fileId is required after the first chunk")),
    };

    let receipt = state
        .assembler
        .accept_chunk(&file_id, position, payload)
        .await?;
    Ok(Json(chunk_response(&receipt)))
}

fn new_file_from(form: &MultipartForm, user_id: &str) -> Result<NewFile, AppError> {
    let tags = match form.text(&["fileTags", "tags"]) {
        Some(raw) => serde_json::from_str::<BTreeSet<String>>(raw)
            .map_err(|err| AppError::bad_request(format!("fileTags must be a JSON array: {err}")))?,
        None => BTreeSet::new(),
    };
    Ok(NewFile {
        owner_id: user_id.to_string(),
        file_name: form.require(&["fileName"])?.to_string(),
        file_type: form.text(&["fileType"]).unwrap_or_default().to_string(),
        nonce: form.text(&["nonce"]).unwrap_or_default().to_string(),
        description: form
            .text(&["fileDescription", "description"])
            .unwrap_or_default()
            .to_string(),
        tags,
        path: form.text(&["path"]).map(str::to_string),
    })
}

fn chunk_response(receipt: &ChunkReceipt) -> Value {
    if receipt.is_finalized() {
        info!("upload {} complete", receipt.file_id);
        json!({
            "fileId": receipt.file_id,
            "message": "File uploaded and metadata stored",
        })
    } else {
        json!({
            "fileId": receipt.file_id,
            "message": format!("Chunk {} uploaded", receipt.chunk_index),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        services::{chunk_assembler::MergedObject, metadata_store::MetadataStore},
        test_support::Fixture,
    };

    #[tokio::test]
    async fn start_upload_creates_an_open_record() {
        let fx = Fixture::new().await;
        let req: StartUploadReq = serde_json::from_value(json!({
            "userId": "alice",
            "fileName": "plan.txt",
            "fileTags": ["draft"],
            "path": "files/alice/docs",
        }))
        .unwrap();

        let Json(body) = start_upload(State(fx.state(None)), Json(req)).await.unwrap();
        let id = body["fileId"].as_str().unwrap();
        let record = fx.metadata.get_file(id).await.unwrap().unwrap();
        assert_eq!(record.cid, "files/alice/docs");
        assert_eq!(record.file_type, "application/octet-stream");
        assert!(record.tags.contains("draft"));
        assert!(!record.is_finalized());
    }

    #[test]
    fn chunk_responses_match_the_wire_format() {
        let pending = ChunkReceipt {
            file_id: "f1".into(),
            chunk_index: 2,
            merged: None,
        };
        assert_eq!(
            chunk_response(&pending),
            json!({"fileId": "f1", "message": "Chunk 2 uploaded"})
        );

        let done = ChunkReceipt {
            merged: Some(MergedObject {
                path: "files/a/f1".into(),
                file_hash: "00".into(),
                file_size: 1,
            }),
            ..pending
        };
        assert_eq!(
            chunk_response(&done)["message"],
            "File uploaded and metadata stored"
        );
    }
}
