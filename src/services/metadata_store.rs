//! Relational persistence for file records, share grants and access logs.
//!
//! [`MetadataStore`] is the narrow interface the services depend on;
//! [`SqlMetadataStore`] implements it over a SQLite pool. Every operation that
//! must touch more than one table runs inside a single transaction here, so
//! callers never hold a transaction across an await on another system.

use crate::models::{
    access_log::{AccessLogEntry, NewAccessLog},
    file::{FileRecord, NewFile},
    share::{DownloadGrant, NewDownloadGrant, NewViewGrant, SentRecord, ViewGrant},
};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

const MIGRATION_SQL: &str = include_str!("../../migrations/0001_init.sql");

const FILE_COLUMNS: &str = "id, owner_id, file_name, file_type, file_size, file_hash, nonce, \
     cid, description, tags, allow_view_sharing, created_at";

const RECEIVED_COLUMNS: &str =
    "id, sender_id, recipient_id, file_id, received_at, expires_at, metadata, accepted";

const SENT_COLUMNS: &str = "id, sender_id, recipient_id, file_id, metadata, sent_at";

const VIEW_COLUMNS: &str = "id, sender_id, recipient_id, file_id, newfile_id, metadata, \
     shared_at, expires_at, revoked, revoked_at, access_granted";

#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("invalid tags: {0}")]
    InvalidTags(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type MetadataResult<T> = Result<T, MetadataError>;

/// Query contract the services need from the relational store.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Cheap connectivity check for readiness checks.
    async fn ping(&self) -> MetadataResult<()>;

    async fn create_file(&self, file: &NewFile) -> MetadataResult<FileRecord>;

    async fn get_file(&self, file_id: &str) -> MetadataResult<Option<FileRecord>>;

    /// Record hash, size and object path. Only applies to an unfinalized
    /// record; returns `false` if nothing was updated.
    async fn finalize_file(
        &self,
        file_id: &str,
        file_hash: &str,
        file_size: i64,
        cid: &str,
    ) -> MetadataResult<bool>;

    /// Delete download grants, revoke view grants and delete the record, in
    /// one transaction. Returns `false` if the record did not exist.
    async fn delete_file_cascade(&self, file_id: &str) -> MetadataResult<bool>;

    async fn insert_received(&self, grant: &NewDownloadGrant) -> MetadataResult<DownloadGrant>;

    async fn insert_sent(&self, grant: &NewDownloadGrant) -> MetadataResult<SentRecord>;

    /// Most recent download grant for the triple.
    async fn find_download_grant(
        &self,
        sender_id: &str,
        recipient_id: &str,
        file_id: &str,
    ) -> MetadataResult<Option<DownloadGrant>>;

    /// Download grants of `file_id` across all recipients.
    async fn count_download_grants(&self, sender_id: &str, file_id: &str) -> MetadataResult<i64>;

    async fn find_active_view_grant(
        &self,
        sender_id: &str,
        recipient_id: &str,
        file_id: &str,
    ) -> MetadataResult<Option<ViewGrant>>;

    /// Grant the recipient would read through: the active one if any, else the
    /// most recently revoked.
    async fn find_view_grant_for_recipient(
        &self,
        recipient_id: &str,
        file_id: &str,
    ) -> MetadataResult<Option<ViewGrant>>;

    /// Active view grants of a file across all recipients.
    async fn active_view_grants(&self, file_id: &str) -> MetadataResult<Vec<ViewGrant>>;

    /// Active view grants addressed to a recipient, newest first.
    async fn view_grants_for_recipient(&self, recipient_id: &str)
    -> MetadataResult<Vec<ViewGrant>>;

    /// Refresh the active view grant of the triple or create one, and flag the
    /// file as view-shared.
    async fn upsert_view_grant(&self, grant: &NewViewGrant) -> MetadataResult<ViewGrant>;

    /// Conditional revoke. Returns the number of rows changed (0 or 1).
    async fn revoke_view_grant(
        &self,
        sender_id: &str,
        recipient_id: &str,
        file_id: &str,
    ) -> MetadataResult<u64>;

    /// Replace the triple's download grant pair with a view grant.
    async fn convert_to_view(&self, grant: &NewViewGrant) -> MetadataResult<ViewGrant>;

    /// Revoke the triple's view grant and create a download grant pair.
    async fn convert_to_download(&self, grant: &NewDownloadGrant)
    -> MetadataResult<DownloadGrant>;

    async fn insert_access_log(&self, entry: &NewAccessLog) -> MetadataResult<AccessLogEntry>;

    /// Entries for a file, oldest first.
    async fn access_logs_for_file(&self, file_id: &str) -> MetadataResult<Vec<AccessLogEntry>>;
}

/// Apply the embedded schema. Statements are idempotent (`IF NOT EXISTS`).
pub async fn run_migrations(pool: &SqlitePool) -> MetadataResult<()> {
    let statements = MIGRATION_SQL
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>();

    info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        debug!("Executing migration SQL: {}", stmt);
        sqlx::query(stmt).execute(pool).await?;
    }
    Ok(())
}

#[derive(Clone, Debug)]
pub struct SqlMetadataStore {
    pool: SqlitePool,
}

impl SqlMetadataStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqlMetadataStore {
    async fn ping(&self) -> MetadataResult<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_file(&self, file: &NewFile) -> MetadataResult<FileRecord> {
        let id = Uuid::new_v4().to_string();
        let cid = file
            .path
            .as_deref()
            .map(|p| p.trim_matches('/').to_string())
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| format!("files/{}", file.owner_id));
        let tags = serde_json::to_string(&file.tags)?;
        let file_type = if file.file_type.is_empty() {
            "application/octet-stream"
        } else {
            file.file_type.as_str()
        };

        let record = sqlx::query_as::<_, FileRecord>(&format!(
            "INSERT INTO files (id, owner_id, file_name, file_type, file_size, file_hash, nonce, \
             cid, description, tags, allow_view_sharing, created_at) \
             VALUES (?, ?, ?, ?, 0, '', ?, ?, ?, ?, 0, ?) RETURNING {FILE_COLUMNS}"
        ))
        .bind(&id)
        .bind(&file.owner_id)
        .bind(&file.file_name)
        .bind(file_type)
        .bind(&file.nonce)
        .bind(&cid)
        .bind(&file.description)
        .bind(&tags)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        debug!("created file record {} for {}", record.id, record.owner_id);
        Ok(record)
    }

    async fn get_file(&self, file_id: &str) -> MetadataResult<Option<FileRecord>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE id = ?");
        let record = sqlx::query_as::<_, FileRecord>(&sql)
            .bind(file_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn finalize_file(
        &self,
        file_id: &str,
        file_hash: &str,
        file_size: i64,
        cid: &str,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "UPDATE files SET file_hash = ?, file_size = ?, cid = ? \
             WHERE id = ? AND file_hash = ''",
        )
        .bind(file_hash)
        .bind(file_size)
        .bind(cid)
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_file_cascade(&self, file_id: &str) -> MetadataResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM received_files WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM sent_files WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            "UPDATE shared_files_view SET revoked = 1, revoked_at = ?, access_granted = 0 \
             WHERE file_id = ? AND revoked = 0",
        )
        .bind(Utc::now())
        .bind(file_id)
        .execute(&mut *tx)
        .await?;
        let deleted = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted == 1)
    }

    async fn insert_received(&self, grant: &NewDownloadGrant) -> MetadataResult<DownloadGrant> {
        let row = sqlx::query_as::<_, DownloadGrant>(&format!(
            "INSERT INTO received_files \
             (id, recipient_id, sender_id, file_id, metadata, received_at, expires_at, accepted) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0) RETURNING {RECEIVED_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(&grant.recipient_id)
        .bind(&grant.sender_id)
        .bind(&grant.file_id)
        .bind(&grant.metadata)
        .bind(Utc::now())
        .bind(grant.expires_at)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn insert_sent(&self, grant: &NewDownloadGrant) -> MetadataResult<SentRecord> {
        let row = sqlx::query_as::<_, SentRecord>(&format!(
            "INSERT INTO sent_files (id, sender_id, recipient_id, file_id, metadata, sent_at) \
             VALUES (?, ?, ?, ?, ?, ?) RETURNING {SENT_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(&grant.sender_id)
        .bind(&grant.recipient_id)
        .bind(&grant.file_id)
        .bind(&grant.metadata)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_download_grant(
        &self,
        sender_id: &str,
        recipient_id: &str,
        file_id: &str,
    ) -> MetadataResult<Option<DownloadGrant>> {
        let row = sqlx::query_as::<_, DownloadGrant>(&format!(
            "SELECT {RECEIVED_COLUMNS} FROM received_files \
             WHERE sender_id = ? AND recipient_id = ? AND file_id = ? \
             ORDER BY received_at DESC LIMIT 1"
        ))
        .bind(sender_id)
        .bind(recipient_id)
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn count_download_grants(&self, sender_id: &str, file_id: &str) -> MetadataResult<i64> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM received_files WHERE sender_id = ? AND file_id = ?",
        )
        .bind(sender_id)
        .bind(file_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn find_active_view_grant(
        &self,
        sender_id: &str,
        recipient_id: &str,
        file_id: &str,
    ) -> MetadataResult<Option<ViewGrant>> {
        let row = sqlx::query_as::<_, ViewGrant>(&format!(
            "SELECT {VIEW_COLUMNS} FROM shared_files_view \
             WHERE sender_id = ? AND recipient_id = ? AND file_id = ? AND revoked = 0"
        ))
        .bind(sender_id)
        .bind(recipient_id)
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_view_grant_for_recipient(
        &self,
        recipient_id: &str,
        file_id: &str,
    ) -> MetadataResult<Option<ViewGrant>> {
        let row = sqlx::query_as::<_, ViewGrant>(&format!(
            "SELECT {VIEW_COLUMNS} FROM shared_files_view \
             WHERE recipient_id = ? AND file_id = ? \
             ORDER BY revoked ASC, shared_at DESC LIMIT 1"
        ))
        .bind(recipient_id)
        .bind(file_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn active_view_grants(&self, file_id: &str) -> MetadataResult<Vec<ViewGrant>> {
        let rows = sqlx::query_as::<_, ViewGrant>(&format!(
            "SELECT {VIEW_COLUMNS} FROM shared_files_view WHERE file_id = ? AND revoked = 0"
        ))
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn view_grants_for_recipient(
        &self,
        recipient_id: &str,
    ) -> MetadataResult<Vec<ViewGrant>> {
        let rows = sqlx::query_as::<_, ViewGrant>(&format!(
            "SELECT {VIEW_COLUMNS} FROM shared_files_view \
             WHERE recipient_id = ? AND revoked = 0 AND access_granted = 1 \
             ORDER BY shared_at DESC"
        ))
        .bind(recipient_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn upsert_view_grant(&self, grant: &NewViewGrant) -> MetadataResult<ViewGrant> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        let refreshed = sqlx::query_as::<_, ViewGrant>(&format!(
            "UPDATE shared_files_view \
             SET metadata = ?, shared_at = ?, expires_at = ?, access_granted = 1 \
             WHERE sender_id = ? AND recipient_id = ? AND file_id = ? AND revoked = 0 \
             RETURNING {VIEW_COLUMNS}"
        ))
        .bind(&grant.metadata)
        .bind(now)
        .bind(grant.expires_at)
        .bind(&grant.sender_id)
        .bind(&grant.recipient_id)
        .bind(&grant.file_id)
        .fetch_optional(&mut *tx)
        .await?;

        let row = match refreshed {
            Some(row) => row,
            None => {
                sqlx::query_as::<_, ViewGrant>(&format!(
                    "INSERT INTO shared_files_view \
                     (id, sender_id, recipient_id, file_id, newfile_id, metadata, shared_at, \
                      expires_at, revoked, revoked_at, access_granted) \
                     VALUES (?, ?, ?, ?, NULL, ?, ?, ?, 0, NULL, 1) RETURNING {VIEW_COLUMNS}"
                ))
                .bind(Uuid::new_v4().to_string())
                .bind(&grant.sender_id)
                .bind(&grant.recipient_id)
                .bind(&grant.file_id)
                .bind(&grant.metadata)
                .bind(now)
                .bind(grant.expires_at)
                .fetch_one(&mut *tx)
                .await?
            }
        };

        sqlx::query("UPDATE files SET allow_view_sharing = 1 WHERE id = ?")
            .bind(&grant.file_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn revoke_view_grant(
        &self,
        sender_id: &str,
        recipient_id: &str,
        file_id: &str,
    ) -> MetadataResult<u64> {
        let result = sqlx::query(
            "UPDATE shared_files_view SET revoked = 1, revoked_at = ?, access_granted = 0 \
             WHERE sender_id = ? AND recipient_id = ? AND file_id = ? AND revoked = 0",
        )
        .bind(Utc::now())
        .bind(sender_id)
        .bind(recipient_id)
        .bind(file_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn convert_to_view(&self, grant: &NewViewGrant) -> MetadataResult<ViewGrant> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM received_files WHERE sender_id = ? AND recipient_id = ? AND file_id = ?",
        )
        .bind(&grant.sender_id)
        .bind(&grant.recipient_id)
        .bind(&grant.file_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query(
            "DELETE FROM sent_files WHERE sender_id = ? AND recipient_id = ? AND file_id = ?",
        )
        .bind(&grant.sender_id)
        .bind(&grant.recipient_id)
        .bind(&grant.file_id)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query_as::<_, ViewGrant>(&format!(
            "INSERT INTO shared_files_view \
             (id, sender_id, recipient_id, file_id, newfile_id, metadata, shared_at, \
              expires_at, revoked, revoked_at, access_granted) \
             VALUES (?, ?, ?, ?, NULL, ?, ?, ?, 0, NULL, 1) RETURNING {VIEW_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(&grant.sender_id)
        .bind(&grant.recipient_id)
        .bind(&grant.file_id)
        .bind(&grant.metadata)
        .bind(Utc::now())
        .bind(grant.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query("UPDATE files SET allow_view_sharing = 1 WHERE id = ?")
            .bind(&grant.file_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(row)
    }

    async fn convert_to_download(
        &self,
        grant: &NewDownloadGrant,
    ) -> MetadataResult<DownloadGrant> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "UPDATE shared_files_view SET revoked = 1, revoked_at = ?, access_granted = 0 \
             WHERE sender_id = ? AND recipient_id = ? AND file_id = ? AND revoked = 0",
        )
        .bind(now)
        .bind(&grant.sender_id)
        .bind(&grant.recipient_id)
        .bind(&grant.file_id)
        .execute(&mut *tx)
        .await?;

        let received = sqlx::query_as::<_, DownloadGrant>(&format!(
            "INSERT INTO received_files \
             (id, recipient_id, sender_id, file_id, metadata, received_at, expires_at, accepted) \
             VALUES (?, ?, ?, ?, ?, ?, ?, 0) RETURNING {RECEIVED_COLUMNS}"
        ))
        .bind(Uuid::new_v4().to_string())
        .bind(&grant.recipient_id)
        .bind(&grant.sender_id)
        .bind(&grant.file_id)
        .bind(&grant.metadata)
        .bind(now)
        .bind(grant.expires_at)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO sent_files (id, sender_id, recipient_id, file_id, metadata, sent_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&grant.sender_id)
        .bind(&grant.recipient_id)
        .bind(&grant.file_id)
        .bind(&grant.metadata)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(received)
    }

    async fn insert_access_log(&self, entry: &NewAccessLog) -> MetadataResult<AccessLogEntry> {
        let row = sqlx::query_as::<_, AccessLogEntry>(
            "INSERT INTO access_logs (id, file_id, user_id, action, message, view_only, timestamp) \
             VALUES (?, ?, ?, ?, ?, ?, ?) \
             RETURNING id, file_id, user_id, action, message, view_only, timestamp",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&entry.file_id)
        .bind(&entry.user_id)
        .bind(entry.action.as_str())
        .bind(&entry.message)
        .bind(entry.view_only)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn access_logs_for_file(&self, file_id: &str) -> MetadataResult<Vec<AccessLogEntry>> {
        let rows = sqlx::query_as::<_, AccessLogEntry>(
            "SELECT id, file_id, user_id, action, message, view_only, timestamp \
             FROM access_logs WHERE file_id = ? ORDER BY timestamp ASC, rowid ASC",
        )
        .bind(file_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{models::access_log::AccessAction, test_support::memory_metadata};
    use chrono::Duration;

    fn new_file(owner: &str) -> NewFile {
        NewFile {
            owner_id: owner.into(),
            file_name: "report.pdf".into(),
            file_type: "application/pdf".into(),
            nonce: "n0".into(),
            tags: ["work".to_string(), "q3".to_string()].into(),
            ..Default::default()
        }
    }

    fn view(owner: &str, recipient: &str, file_id: &str, metadata: &str) -> NewViewGrant {
        NewViewGrant {
            sender_id: owner.into(),
            recipient_id: recipient.into(),
            file_id: file_id.into(),
            metadata: metadata.into(),
            expires_at: None,
        }
    }

    fn download(owner: &str, recipient: &str, file_id: &str) -> NewDownloadGrant {
        NewDownloadGrant {
            sender_id: owner.into(),
            recipient_id: recipient.into(),
            file_id: file_id.into(),
            metadata: "{}".into(),
            expires_at: Utc::now() + Duration::hours(48),
        }
    }

    async fn active_view_rows(store: &SqlMetadataStore, file_id: &str) -> i64 {
        sqlx::query_scalar(
            "SELECT COUNT(*) FROM shared_files_view WHERE file_id = ? AND revoked = 0",
        )
        .bind(file_id)
        .fetch_one(store.pool())
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_defaults_destination_and_round_trips_tags() {
        let store = memory_metadata().await;
        let record = store.create_file(&new_file("alice")).await.unwrap();
        assert_eq!(record.cid, "files/alice");
        assert!(!record.is_finalized());
        assert_eq!(record.file_size, 0);

        let loaded = store.get_file(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded, record);
        assert!(loaded.tags.contains("q3"));
        assert!(store.get_file("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn finalize_applies_once() {
        let store = memory_metadata().await;
        let record = store.create_file(&new_file("alice")).await.unwrap();
        let path = format!("files/alice/{}", record.id);

        assert!(store.finalize_file(&record.id, "abc", 11, &path).await.unwrap());
        assert!(!store.finalize_file(&record.id, "def", 99, "elsewhere").await.unwrap());

        let loaded = store.get_file(&record.id).await.unwrap().unwrap();
        assert_eq!(loaded.file_hash, "abc");
        assert_eq!(loaded.file_size, 11);
        assert_eq!(loaded.cid, path);
    }

    #[tokio::test]
    async fn upsert_keeps_a_single_active_view_grant() {
        let store = memory_metadata().await;
        let record = store.create_file(&new_file("alice")).await.unwrap();

        let first = store
            .upsert_view_grant(&view("alice", "bob", &record.id, "{\"v\":1}"))
            .await
            .unwrap();
        let second = store
            .upsert_view_grant(&view("alice", "bob", &record.id, "{\"v\":2}"))
            .await
            .unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.metadata, "{\"v\":2}");
        // no rotated object yet: reads fall back to the file id
        assert_eq!(first.new_file_id, None);
        assert_eq!(first.object_file_id(), record.id);
        assert_eq!(active_view_rows(&store, &record.id).await, 1);
        assert!(store.get_file(&record.id).await.unwrap().unwrap().allow_view_sharing);
    }

    #[tokio::test]
    async fn second_active_row_is_rejected_by_the_index() {
        let store = memory_metadata().await;
        store
            .convert_to_view(&view("alice", "bob", "f1", "{}"))
            .await
            .unwrap();
        assert!(
            store
                .convert_to_view(&view("alice", "bob", "f1", "{}"))
                .await
                .is_err()
        );
        assert_eq!(active_view_rows(&store, "f1").await, 1);
    }

    #[tokio::test]
    async fn revoke_is_conditional_and_retains_the_row() {
        let store = memory_metadata().await;
        store
            .upsert_view_grant(&view("alice", "bob", "f1", "{}"))
            .await
            .unwrap();

        assert_eq!(store.revoke_view_grant("alice", "bob", "f1").await.unwrap(), 1);
        assert_eq!(store.revoke_view_grant("alice", "bob", "f1").await.unwrap(), 0);
        assert!(
            store
                .find_active_view_grant("alice", "bob", "f1")
                .await
                .unwrap()
                .is_none()
        );

        let retained = store
            .find_view_grant_for_recipient("bob", "f1")
            .await
            .unwrap()
            .unwrap();
        assert!(retained.revoked);
        assert!(!retained.access_granted);
        assert!(retained.revoked_at.is_some());

        // a fresh grant after revocation is allowed
        store
            .upsert_view_grant(&view("alice", "bob", "f1", "{}"))
            .await
            .unwrap();
        let current = store
            .find_view_grant_for_recipient("bob", "f1")
            .await
            .unwrap()
            .unwrap();
        assert!(!current.revoked);
    }

    #[tokio::test]
    async fn conversions_swap_grant_kinds() {
        let store = memory_metadata().await;
        store.insert_received(&download("alice", "bob", "f1")).await.unwrap();
        store.insert_sent(&download("alice", "bob", "f1")).await.unwrap();
        store.insert_received(&download("alice", "carol", "f1")).await.unwrap();
        assert_eq!(store.count_download_grants("alice", "f1").await.unwrap(), 2);

        store
            .convert_to_view(&view("alice", "bob", "f1", "{}"))
            .await
            .unwrap();
        assert!(
            store
                .find_download_grant("alice", "bob", "f1")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(store.count_download_grants("alice", "f1").await.unwrap(), 1);
        let converted = store
            .find_active_view_grant("alice", "bob", "f1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(converted.new_file_id, None);

        let grant = store
            .convert_to_download(&download("alice", "bob", "f1"))
            .await
            .unwrap();
        assert_eq!(grant.recipient_id, "bob");
        assert!(
            store
                .find_active_view_grant("alice", "bob", "f1")
                .await
                .unwrap()
                .is_none()
        );
        let sent: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sent_files WHERE recipient_id = 'bob' AND file_id = 'f1'",
        )
        .fetch_one(store.pool())
        .await
        .unwrap();
        assert_eq!(sent, 1);
    }

    #[tokio::test]
    async fn cascade_delete_keeps_revoked_view_rows() {
        let store = memory_metadata().await;
        let record = store.create_file(&new_file("alice")).await.unwrap();
        store
            .insert_received(&download("alice", "bob", &record.id))
            .await
            .unwrap();
        store
            .upsert_view_grant(&view("alice", "carol", &record.id, "{}"))
            .await
            .unwrap();

        assert_eq!(store.active_view_grants(&record.id).await.unwrap().len(), 1);
        assert!(store.delete_file_cascade(&record.id).await.unwrap());
        assert!(store.active_view_grants(&record.id).await.unwrap().is_empty());
        assert!(!store.delete_file_cascade(&record.id).await.unwrap());

        assert!(store.get_file(&record.id).await.unwrap().is_none());
        assert_eq!(store.count_download_grants("alice", &record.id).await.unwrap(), 0);
        let retained = store
            .find_view_grant_for_recipient("carol", &record.id)
            .await
            .unwrap()
            .unwrap();
        assert!(retained.revoked);
    }

    #[tokio::test]
    async fn access_log_is_listed_in_insertion_order() {
        let store = memory_metadata().await;
        for action in [AccessAction::SharedView, AccessAction::Viewed] {
            store
                .insert_access_log(&NewAccessLog {
                    file_id: "f1".into(),
                    user_id: "bob".into(),
                    action,
                    message: action.to_string(),
                    view_only: true,
                })
                .await
                .unwrap();
        }
        let entries = store.access_logs_for_file("f1").await.unwrap();
        let actions: Vec<_> = entries.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, ["shared_view", "viewed"]);
        assert!(entries.iter().all(|e| e.view_only));
    }
}
