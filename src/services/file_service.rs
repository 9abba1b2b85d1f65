//! Owner-side file operations: download, delete and folder creation.

use super::{
    cipher::{CipherError, StreamCipher},
    metadata_store::{MetadataError, MetadataStore},
    object_store::{ByteStream, ObjectStore, ObjectStoreError, normalize_path},
    share_service::{sent_object_path, view_object_path},
};
use crate::models::file::{FOLDER_TYPE, FileRecord, NewFile};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum FileError {
    #[error("file `{0}` not found")]
    FileNotFound(String),
    #[error("user `{user_id}` does not own file `{file_id}`")]
    Unauthorized { user_id: String, file_id: String },
    #[error("file `{0}` has not finished uploading")]
    FileNotFinalized(String),
    #[error("invalid folder name `{0}`")]
    InvalidFolderName(String),
    #[error(transparent)]
    Storage(#[from] ObjectStoreError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

pub type FileResult<T> = Result<T, FileError>;

/// Decrypted content of an owner's file.
pub struct FileContent {
    pub file: FileRecord,
    pub body: ByteStream,
}

#[derive(Clone)]
pub struct FileService {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    cipher: Option<Arc<dyn StreamCipher>>,
}

impl FileService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        cipher: Option<Arc<dyn StreamCipher>>,
    ) -> Self {
        Self {
            objects,
            metadata,
            cipher,
        }
    }

    async fn owned_file(&self, user_id: &str, file_id: &str) -> FileResult<FileRecord> {
        let file = self
            .metadata
            .get_file(file_id)
            .await?
            .ok_or_else(|| FileError::FileNotFound(file_id.to_string()))?;
        if file.owner_id != user_id {
            return Err(FileError::Unauthorized {
                user_id: user_id.to_string(),
                file_id: file_id.to_string(),
            });
        }
        Ok(file)
    }

    pub async fn download(&self, user_id: &str, file_id: &str) -> FileResult<FileContent> {
        let file = self.owned_file(user_id, file_id).await?;
        if !file.is_finalized() {
            return Err(FileError::FileNotFinalized(file_id.to_string()));
        }

        let body = self.objects.read_stream(&file.cid).await?;
        let body = match &self.cipher {
            Some(cipher) => cipher.decrypt(body).await?,
            None => body,
        };
        Ok(FileContent { file, body })
    }

    /// Remove the stored object, then the record and its grants. View grants
    /// are revoked rather than deleted.
    pub async fn delete(&self, user_id: &str, file_id: &str) -> FileResult<()> {
        let file = self.owned_file(user_id, file_id).await?;

        if file.is_finalized() && !file.is_folder() {
            self.objects.remove(&file.cid).await?;
        }

        let view_grants = self.metadata.active_view_grants(file_id).await?;
        if !self.metadata.delete_file_cascade(file_id).await? {
            return Err(FileError::FileNotFound(file_id.to_string()));
        }

        let mut leftovers = vec![sent_object_path(&file.owner_id, file_id)];
        leftovers.extend(view_grants.iter().map(|grant| {
            view_object_path(&grant.sender_id, grant.object_file_id(), &grant.recipient_id)
        }));
        for path in leftovers {
            if let Err(err) = self.objects.discard(&path).await {
                warn!("failed to remove {} for deleted file {}: {}", path, file_id, err);
            }
        }

        info!("deleted file {} owned by {}", file_id, user_id);
        Ok(())
    }

    /// Create the directory and a `folder` record pointing at it.
    pub async fn create_folder(
        &self,
        user_id: &str,
        folder_name: &str,
        parent_path: Option<&str>,
        description: &str,
    ) -> FileResult<FileRecord> {
        let name = folder_name.trim();
        if name.is_empty() || name.contains('/') || name == "." || name == ".." {
            return Err(FileError::InvalidFolderName(folder_name.to_string()));
        }
        let parent = parent_path
            .map(|p| p.trim_matches('/'))
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("files/{user_id}"));
        let path = normalize_path(&format!("{parent}/{name}"))?;

        self.objects.create_directory(&path).await?;
        let record = self
            .metadata
            .create_file(&NewFile {
                owner_id: user_id.to_string(),
                file_name: name.to_string(),
                file_type: FOLDER_TYPE.to_string(),
                description: description.to_string(),
                tags: [FOLDER_TYPE.to_string()].into(),
                path: Some(path),
                ..Default::default()
            })
            .await?;

        info!("created folder {} at {}", record.id, record.cid);
        Ok(record)
    }
}
