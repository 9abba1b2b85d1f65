//! Share state machine.
//!
//! Each `(owner, recipient, file)` relationship is unshared, shared for
//! download or shared for view. Every transition runs under a lease on that
//! triple. Storage copies happen before the metadata transaction and cleanup
//! of the old object after it, so a failed copy leaves metadata untouched.

use super::{
    access_auditor::AccessAuditor,
    chunk_assembler::{ChunkAssembler, ChunkPosition, TransferError, chunk_path, shared_upload_key},
    cipher::{CipherError, StreamCipher},
    key_locks::{KeyedLocks, share_key},
    metadata_store::{MetadataError, MetadataStore},
    object_store::{ByteStream, ObjectStore, ObjectStoreError},
};
use crate::models::{
    access_log::AccessAction,
    file::FileRecord,
    share::{DownloadGrant, NewDownloadGrant, NewViewGrant, ShareMethod, ViewGrant},
};
use bytes::Bytes;
use chrono::{Duration, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum ShareError {
    #[error("file `{0}` not found")]
    FileNotFound(String),
    #[error("user `{user_id}` does not own file `{file_id}`")]
    Unauthorized { user_id: String, file_id: String },
    #[error("no active share found")]
    NoActiveShare,
    #[error("access denied: {0}")]
    AccessDenied(String),
    #[error("file is already shared using {0} method")]
    AlreadyUsingMethod(ShareMethod),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Storage(#[from] ObjectStoreError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

pub type ShareResult<T> = Result<T, ShareError>;

/// Object read by download recipients of `file_id`.
pub fn sent_object_path(owner_id: &str, file_id: &str) -> String {
    format!("files/{owner_id}/sent/{file_id}")
}

/// Recipient-specific object behind a view grant.
pub fn view_object_path(owner_id: &str, file_id: &str, recipient_id: &str) -> String {
    format!("files/{owner_id}/shared_view/{file_id}_{recipient_id}")
}

/// Readable content handed to a recipient.
pub struct SharedContent<G> {
    pub file: FileRecord,
    pub grant: G,
    pub body: ByteStream,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Conversion {
    pub previous: ShareMethod,
    pub current: ShareMethod,
}

#[derive(Clone)]
pub struct ShareService {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    cipher: Option<Arc<dyn StreamCipher>>,
    assembler: ChunkAssembler,
    auditor: AccessAuditor,
    locks: KeyedLocks,
    share_ttl: Duration,
}

impl ShareService {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        cipher: Option<Arc<dyn StreamCipher>>,
        assembler: ChunkAssembler,
        locks: KeyedLocks,
        share_ttl: Duration,
    ) -> Self {
        Self {
            auditor: AccessAuditor::new(metadata.clone()),
            objects,
            metadata,
            cipher,
            assembler,
            locks,
            share_ttl,
        }
    }

    async fn owned_file(&self, user_id: &str, file_id: &str) -> ShareResult<FileRecord> {
        let file = self
            .metadata
            .get_file(file_id)
            .await?
            .ok_or_else(|| ShareError::FileNotFound(file_id.to_string()))?;
        if file.owner_id != user_id {
            return Err(ShareError::Unauthorized {
                user_id: user_id.to_string(),
                file_id: file_id.to_string(),
            });
        }
        Ok(file)
    }

    /// One chunk of a download share. The merged object lands at the file's
    /// sent path; the last chunk creates the grant and returns it.
    ///
    /// A repeated last chunk of a finished upload returns the live grant
    /// instead of merging again.
    pub async fn send_file_chunk(
        &self,
        owner_id: &str,
        recipient_id: &str,
        file_id: &str,
        position: ChunkPosition,
        payload: Bytes,
        metadata: &str,
    ) -> ShareResult<Option<DownloadGrant>> {
        self.owned_file(owner_id, file_id).await?;
        self.refuse_other_method(ShareMethod::Download, owner_id, recipient_id, file_id)
            .await?;
        let upload_key = shared_upload_key(file_id, recipient_id);
        let destination = sent_object_path(owner_id, file_id);
        if !position.is_last() {
            self.assembler
                .accept_shared_chunk(file_id, &upload_key, position, payload, &destination)
                .await?;
            return Ok(None);
        }

        let _lease = self
            .locks
            .acquire(share_key(owner_id, recipient_id, file_id))
            .await;
        self.refuse_other_method(ShareMethod::Download, owner_id, recipient_id, file_id)
            .await?;
        let live = self
            .metadata
            .find_download_grant(owner_id, recipient_id, file_id)
            .await?
            .filter(|grant| !grant.is_expired_at(Utc::now()));
        if let Some(grant) = live {
            if self.upload_consumed(&upload_key, position, &destination).await? {
                info!(
                    "repeated final chunk of {}, keeping grant {}",
                    upload_key, grant.id
                );
                return Ok(Some(grant));
            }
        }

        self.assembler
            .accept_shared_chunk(file_id, &upload_key, position, payload, &destination)
            .await?;
        let grant = self
            .record_download_grant(owner_id, recipient_id, file_id, metadata)
            .await?;
        self.assembler
            .discard_chunks(&upload_key, position.total)
            .await;
        Ok(Some(grant))
    }

    /// One chunk of a view share, merged into the recipient's view object.
    /// Mirrors [`Self::send_file_chunk`].
    pub async fn send_by_view_chunk(
        &self,
        owner_id: &str,
        recipient_id: &str,
        file_id: &str,
        position: ChunkPosition,
        payload: Bytes,
        metadata: &str,
    ) -> ShareResult<Option<ViewGrant>> {
        self.owned_file(owner_id, file_id).await?;
        self.refuse_other_method(ShareMethod::View, owner_id, recipient_id, file_id)
            .await?;
        let upload_key = shared_upload_key(file_id, recipient_id);
        let destination = view_object_path(owner_id, file_id, recipient_id);
        if !position.is_last() {
            self.assembler
                .accept_shared_chunk(file_id, &upload_key, position, payload, &destination)
                .await?;
            return Ok(None);
        }

        let _lease = self
            .locks
            .acquire(share_key(owner_id, recipient_id, file_id))
            .await;
        self.refuse_other_method(ShareMethod::View, owner_id, recipient_id, file_id)
            .await?;
        let live = self
            .metadata
            .find_active_view_grant(owner_id, recipient_id, file_id)
            .await?
            .filter(|grant| grant.is_usable_at(Utc::now()));
        if let Some(grant) = live {
            if self.upload_consumed(&upload_key, position, &destination).await? {
                info!(
                    "repeated final chunk of {}, keeping share {}",
                    upload_key, grant.id
                );
                return Ok(Some(grant));
            }
        }

        self.assembler
            .accept_shared_chunk(file_id, &upload_key, position, payload, &destination)
            .await?;
        let grant = self
            .record_view_grant(owner_id, recipient_id, file_id, metadata)
            .await?;
        self.assembler
            .discard_chunks(&upload_key, position.total)
            .await;
        Ok(Some(grant))
    }

    /// Create a download grant pair expiring after the share TTL.
    pub async fn grant_download(
        &self,
        owner_id: &str,
        recipient_id: &str,
        file_id: &str,
        metadata: &str,
    ) -> ShareResult<DownloadGrant> {
        let _lease = self
            .locks
            .acquire(share_key(owner_id, recipient_id, file_id))
            .await;
        self.refuse_other_method(ShareMethod::Download, owner_id, recipient_id, file_id)
            .await?;
        self.record_download_grant(owner_id, recipient_id, file_id, metadata)
            .await
    }

    /// Owner-only. Refreshes the active view grant of the triple if one
    /// exists, otherwise creates it.
    pub async fn grant_view(
        &self,
        owner_id: &str,
        recipient_id: &str,
        file_id: &str,
        metadata: &str,
    ) -> ShareResult<ViewGrant> {
        let _lease = self
            .locks
            .acquire(share_key(owner_id, recipient_id, file_id))
            .await;
        self.owned_file(owner_id, file_id).await?;
        self.refuse_other_method(ShareMethod::View, owner_id, recipient_id, file_id)
            .await?;
        self.record_view_grant(owner_id, recipient_id, file_id, metadata)
            .await
    }

    /// The `received_files` row is authoritative; failing to write the
    /// `sent_files` mirror is logged and does not fail the grant. The caller
    /// holds the share lease.
    async fn record_download_grant(
        &self,
        owner_id: &str,
        recipient_id: &str,
        file_id: &str,
        metadata: &str,
    ) -> ShareResult<DownloadGrant> {
        let new_grant = self.new_download_grant(owner_id, recipient_id, file_id, metadata);
        let grant = self.metadata.insert_received(&new_grant).await?;
        if let Err(err) = self.metadata.insert_sent(&new_grant).await {
            warn!(
                "failed to mirror sent record for {} -> {} ({}): {}",
                owner_id, recipient_id, file_id, err
            );
        }

        self.auditor
            .record(
                file_id,
                owner_id,
                AccessAction::SharedDownload,
                format!("File shared for download with {recipient_id}"),
                false,
            )
            .await;
        info!(
            "granted download of {} from {} to {}",
            file_id, owner_id, recipient_id
        );
        Ok(grant)
    }

    async fn record_view_grant(
        &self,
        owner_id: &str,
        recipient_id: &str,
        file_id: &str,
        metadata: &str,
    ) -> ShareResult<ViewGrant> {
        let new_grant = self.new_view_grant(owner_id, recipient_id, file_id, metadata);
        let grant = self.metadata.upsert_view_grant(&new_grant).await?;

        self.auditor
            .record(
                file_id,
                owner_id,
                AccessAction::SharedView,
                format!("File shared for view-only access with {recipient_id}"),
                true,
            )
            .await;
        info!(
            "granted view of {} from {} to {} (share {})",
            file_id, owner_id, recipient_id, grant.id
        );
        Ok(grant)
    }

    /// Only one grant kind may be active per triple; switching goes through
    /// [`Self::convert`].
    async fn refuse_other_method(
        &self,
        wanted: ShareMethod,
        owner_id: &str,
        recipient_id: &str,
        file_id: &str,
    ) -> ShareResult<()> {
        match self.active_method(owner_id, recipient_id, file_id).await {
            Ok(current) if current != wanted => Err(ShareError::AlreadyUsingMethod(current)),
            Ok(_) | Err(ShareError::NoActiveShare) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// A last chunk repeats a finished upload when the merged object is in
    /// place and the upload has no pending earlier chunk.
    async fn upload_consumed(
        &self,
        upload_key: &str,
        position: ChunkPosition,
        destination: &str,
    ) -> ShareResult<bool> {
        if !self.objects.exists(destination).await? {
            return Ok(false);
        }
        if position.total == 1 {
            return Ok(true);
        }
        Ok(!self.objects.exists(&chunk_path(upload_key, 0)).await?)
    }

    pub async fn revoke_view(
        &self,
        owner_id: &str,
        recipient_id: &str,
        file_id: &str,
    ) -> ShareResult<()> {
        let _lease = self
            .locks
            .acquire(share_key(owner_id, recipient_id, file_id))
            .await;
        self.owned_file(owner_id, file_id).await?;

        let revoked = self
            .metadata
            .revoke_view_grant(owner_id, recipient_id, file_id)
            .await?;
        if revoked == 0 {
            return Err(ShareError::NoActiveShare);
        }

        self.auditor
            .record(
                file_id,
                owner_id,
                AccessAction::RevokedView,
                format!("View access revoked for {recipient_id}"),
                true,
            )
            .await;

        let path = view_object_path(owner_id, file_id, recipient_id);
        if let Err(err) = self.objects.discard(&path).await {
            warn!("failed to remove revoked view object {}: {}", path, err);
        }
        info!(
            "revoked view of {} from {} for {}",
            file_id, owner_id, recipient_id
        );
        Ok(())
    }

    /// Open the recipient's view object. Requires a grant that is not
    /// revoked and not expired.
    pub async fn resolve_view(
        &self,
        recipient_id: &str,
        file_id: &str,
    ) -> ShareResult<SharedContent<ViewGrant>> {
        let grant = self
            .metadata
            .find_view_grant_for_recipient(recipient_id, file_id)
            .await?
            .ok_or(ShareError::NoActiveShare)?;
        if grant.revoked || !grant.access_granted {
            return Err(ShareError::AccessDenied("view access has been revoked".into()));
        }
        if !grant.is_usable_at(Utc::now()) {
            return Err(ShareError::AccessDenied("view access has expired".into()));
        }

        let file = self
            .metadata
            .get_file(file_id)
            .await?
            .ok_or_else(|| ShareError::FileNotFound(file_id.to_string()))?;
        let path = view_object_path(&grant.sender_id, grant.object_file_id(), recipient_id);
        let body = self.open(&path).await?;

        self.auditor
            .record(
                file_id,
                recipient_id,
                AccessAction::Viewed,
                "File viewed",
                true,
            )
            .await;
        Ok(SharedContent { file, grant, body })
    }

    /// Open the sent object for a download recipient.
    pub async fn open_download(
        &self,
        recipient_id: &str,
        sender_id: &str,
        file_id: &str,
    ) -> ShareResult<SharedContent<DownloadGrant>> {
        let grant = self
            .metadata
            .find_download_grant(sender_id, recipient_id, file_id)
            .await?
            .ok_or(ShareError::NoActiveShare)?;
        if grant.is_expired_at(Utc::now()) {
            return Err(ShareError::AccessDenied("download link has expired".into()));
        }

        let file = self
            .metadata
            .get_file(file_id)
            .await?
            .ok_or_else(|| ShareError::FileNotFound(file_id.to_string()))?;
        let body = self.open(&sent_object_path(sender_id, file_id)).await?;

        self.auditor
            .record(
                file_id,
                recipient_id,
                AccessAction::Downloaded,
                format!("File downloaded from {sender_id}"),
                false,
            )
            .await;
        Ok(SharedContent { file, grant, body })
    }

    /// Files `recipient_id` can currently view, newest share first.
    pub async fn shared_view_files(
        &self,
        recipient_id: &str,
    ) -> ShareResult<Vec<(ViewGrant, FileRecord)>> {
        let now = Utc::now();
        let mut shared = Vec::new();
        for grant in self.metadata.view_grants_for_recipient(recipient_id).await? {
            if !grant.is_usable_at(now) {
                continue;
            }
            if let Some(file) = self.metadata.get_file(&grant.file_id).await? {
                shared.push((grant, file));
            }
        }
        Ok(shared)
    }

    /// Owner-only. View wins if both kinds are somehow active.
    pub async fn current_method(
        &self,
        owner_id: &str,
        recipient_id: &str,
        file_id: &str,
    ) -> ShareResult<ShareMethod> {
        self.owned_file(owner_id, file_id).await?;
        self.active_method(owner_id, recipient_id, file_id).await
    }

    async fn active_method(
        &self,
        owner_id: &str,
        recipient_id: &str,
        file_id: &str,
    ) -> ShareResult<ShareMethod> {
        if self
            .metadata
            .find_active_view_grant(owner_id, recipient_id, file_id)
            .await?
            .is_some()
        {
            return Ok(ShareMethod::View);
        }
        if self
            .metadata
            .find_download_grant(owner_id, recipient_id, file_id)
            .await?
            .is_some()
        {
            return Ok(ShareMethod::Download);
        }
        Err(ShareError::NoActiveShare)
    }

    /// Move an active share to the other grant kind: copy the object, swap
    /// the grant rows in one transaction, then discard the old object.
    pub async fn convert(
        &self,
        owner_id: &str,
        recipient_id: &str,
        file_id: &str,
        target: ShareMethod,
        metadata: &str,
    ) -> ShareResult<Conversion> {
        let _lease = self
            .locks
            .acquire(share_key(owner_id, recipient_id, file_id))
            .await;
        self.owned_file(owner_id, file_id).await?;

        let previous = self.active_method(owner_id, recipient_id, file_id).await?;
        if previous == target {
            return Err(ShareError::AlreadyUsingMethod(target));
        }

        let sent_path = sent_object_path(owner_id, file_id);
        let view_path = view_object_path(owner_id, file_id, recipient_id);

        match target {
            ShareMethod::View => {
                self.objects.copy(&sent_path, &view_path).await?;
                let grant = self.new_view_grant(owner_id, recipient_id, file_id, metadata);
                self.metadata.convert_to_view(&grant).await?;
                // other download recipients still read the sent object
                match self.metadata.count_download_grants(owner_id, file_id).await {
                    Ok(0) => self.discard_quietly(&sent_path).await,
                    Ok(_) => {}
                    Err(err) => warn!("skipping cleanup of {}: {}", sent_path, err),
                }
            }
            ShareMethod::Download => {
                self.objects.copy(&view_path, &sent_path).await?;
                let grant = self.new_download_grant(owner_id, recipient_id, file_id, metadata);
                self.metadata.convert_to_download(&grant).await?;
                self.discard_quietly(&view_path).await;
            }
        }

        self.auditor
            .record(
                file_id,
                owner_id,
                AccessAction::ShareMethodChanged,
                format!("Share method changed from {previous} to {target} for user {recipient_id}"),
                target == ShareMethod::View,
            )
            .await;
        info!(
            "converted share of {} for {} from {} to {}",
            file_id, recipient_id, previous, target
        );
        Ok(Conversion {
            previous,
            current: target,
        })
    }

    async fn open(&self, path: &str) -> ShareResult<ByteStream> {
        let body = self.objects.read_stream(path).await?;
        Ok(match &self.cipher {
            Some(cipher) => cipher.decrypt(body).await?,
            None => body,
        })
    }

    async fn discard_quietly(&self, path: &str) {
        if let Err(err) = self.objects.discard(path).await {
            warn!("failed to remove {} after conversion: {}", path, err);
        }
    }

    fn new_download_grant(
        &self,
        owner_id: &str,
        recipient_id: &str,
        file_id: &str,
        metadata: &str,
    ) -> NewDownloadGrant {
        NewDownloadGrant {
            sender_id: owner_id.to_string(),
            recipient_id: recipient_id.to_string(),
            file_id: file_id.to_string(),
            metadata: metadata.to_string(),
            expires_at: Utc::now() + self.share_ttl,
        }
    }

    fn new_view_grant(
        &self,
        owner_id: &str,
        recipient_id: &str,
        file_id: &str,
        metadata: &str,
    ) -> NewViewGrant {
        NewViewGrant {
            sender_id: owner_id.to_string(),
            recipient_id: recipient_id.to_string(),
            file_id: file_id.to_string(),
            metadata: metadata.to_string(),
            expires_at: Some(Utc::now() + self.share_ttl),
        }
    }
}
