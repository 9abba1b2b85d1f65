//! Represents a file (or folder) owned by a user.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, sqlite::SqliteRow};
use std::collections::BTreeSet;

/// `file_type` value used for folder records.
pub const FOLDER_TYPE: &str = "folder";

/// Metadata for one stored file.
///
/// The record does not hold content bytes. Content lives in the object store
/// at `cid` once the upload has been merged; until then `cid` is the
/// destination directory and `file_hash` is empty.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Opaque unique identifier.
    pub id: String,

    /// User that owns the file.
    pub owner_id: String,

    /// Original filename as supplied by the client.
    pub file_name: String,

    /// MIME type, or `folder`.
    pub file_type: String,

    /// Size in bytes of the merged object. Zero until finalized.
    pub file_size: i64,

    /// Hex SHA-256 of the merged transport bytes. Empty until finalized.
    pub file_hash: String,

    /// Client-supplied nonce, passed back on download.
    pub nonce: String,

    /// Storage path in the object store.
    pub cid: String,

    pub description: String,

    /// Free-form tags. Order is irrelevant.
    pub tags: BTreeSet<String>,

    /// Set once the owner has shared the file for view-only access.
    pub allow_view_sharing: bool,

    pub created_at: DateTime<Utc>,
}

impl FileRecord {
    /// True once the final chunk has been merged and hash/size recorded.
    pub fn is_finalized(&self) -> bool {
        !self.file_hash.is_empty()
    }

    pub fn is_folder(&self) -> bool {
        self.file_type == FOLDER_TYPE
    }
}

impl<'r> FromRow<'r, SqliteRow> for FileRecord {
    fn from_row(row: &'r SqliteRow) -> Result<Self, sqlx::Error> {
        let raw_tags: String = row.try_get("tags")?;
        let tags = serde_json::from_str(&raw_tags).map_err(|err| sqlx::Error::ColumnDecode {
            index: "tags".into(),
            source: Box::new(err),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            file_name: row.try_get("file_name")?,
            file_type: row.try_get("file_type")?,
            file_size: row.try_get("file_size")?,
            file_hash: row.try_get("file_hash")?,
            nonce: row.try_get("nonce")?,
            cid: row.try_get("cid")?,
            description: row.try_get("description")?,
            tags,
            allow_view_sharing: row.try_get("allow_view_sharing")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

/// Fields needed to create a file record before any content arrives.
#[derive(Clone, Debug, Default)]
pub struct NewFile {
    pub owner_id: String,
    pub file_name: String,
    pub file_type: String,
    pub nonce: String,
    pub description: String,
    pub tags: BTreeSet<String>,
    /// Destination directory. Defaults to `files/{owner_id}` when `None`.
    pub path: Option<String>,
}
