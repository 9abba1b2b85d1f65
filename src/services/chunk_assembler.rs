//! Chunked upload assembly.
//!
//! Every chunk is persisted verbatim at `temp/{upload_key}_chunk_{index}`.
//! When the last index arrives, chunks `0..total` are streamed in index order
//! into one object at the destination path and hashed on the way through.
//! Temp chunks are removed only after the merged result has been recorded,
//! so a failed finalize can be retried with the last chunk alone. Merges are
//! serialized per upload key.

use super::{
    cipher::{CipherError, StreamCipher},
    key_locks::{KeyedLocks, merge_key},
    metadata_store::{MetadataError, MetadataStore},
    object_store::{ByteStream, ObjectStore, ObjectStoreError, once_stream},
};
use crate::models::file::{FileRecord, NewFile};
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::{io, sync::Arc};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid chunk index `{0}`")]
    InvalidChunkIndex(String),
    #[error("invalid total chunks `{0}`")]
    InvalidTotalChunks(String),
    #[error("chunk payload is missing or empty")]
    MissingPayload,
    #[error("file `{0}` not found")]
    FileNotFound(String),
    #[error("file `{0}` is already finalized")]
    FileAlreadyFinalized(String),
    #[error("failed to store chunk at `{path}`: {source}")]
    TempWriteFailed {
        path: String,
        #[source]
        source: ObjectStoreError,
    },
    #[error("failed to merge chunks of `{upload_key}`: {source}")]
    ChunkMergeFailed {
        upload_key: String,
        #[source]
        source: ObjectStoreError,
    },
    #[error("merged `{file_id}` but could not finalize its metadata: {reason}")]
    MetadataFinalizeFailed { file_id: String, reason: String },
    #[error(transparent)]
    Cipher(#[from] CipherError),
    #[error(transparent)]
    Metadata(#[from] MetadataError),
}

/// Position of one chunk within its upload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChunkPosition {
    pub index: u64,
    pub total: u64,
}

impl ChunkPosition {
    /// Parse the form values. `total` must be at least one and `index` below it.
    pub fn parse(index: &str, total: &str) -> Result<Self, TransferError> {
        let total = total
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|t| *t > 0)
            .ok_or_else(|| TransferError::InvalidTotalChunks(total.to_string()))?;
        let index = index
            .trim()
            .parse::<u64>()
            .ok()
            .filter(|i| *i < total)
            .ok_or_else(|| TransferError::InvalidChunkIndex(index.to_string()))?;
        Ok(Self { index, total })
    }

    pub fn is_last(&self) -> bool {
        self.index + 1 == self.total
    }
}

/// A completed merge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergedObject {
    pub path: String,
    /// Hex SHA-256 of the concatenated chunk bytes.
    pub file_hash: String,
    pub file_size: u64,
}

/// Acknowledgement for one accepted chunk.
#[derive(Clone, Debug)]
pub struct ChunkReceipt {
    pub file_id: String,
    pub chunk_index: u64,
    /// Set once the upload has been merged.
    pub merged: Option<MergedObject>,
}

impl ChunkReceipt {
    pub fn is_finalized(&self) -> bool {
        self.merged.is_some()
    }
}

/// Storage key of a pending chunk.
pub fn chunk_path(upload_key: &str, index: u64) -> String {
    format!("temp/{upload_key}_chunk_{index}")
}

/// Upload key for a shared flow, distinct per recipient.
pub fn shared_upload_key(file_id: &str, recipient_id: &str) -> String {
    format!("{file_id}_{recipient_id}")
}

#[derive(Default)]
struct Tally {
    hasher: Sha256,
    size: u64,
}

#[derive(Clone)]
pub struct ChunkAssembler {
    objects: Arc<dyn ObjectStore>,
    metadata: Arc<dyn MetadataStore>,
    cipher: Option<Arc<dyn StreamCipher>>,
    locks: KeyedLocks,
}

impl ChunkAssembler {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        metadata: Arc<dyn MetadataStore>,
        cipher: Option<Arc<dyn StreamCipher>>,
        locks: KeyedLocks,
    ) -> Self {
        Self {
            objects,
            metadata,
            cipher,
            locks,
        }
    }

    /// Create the unfinalized record an upload will fill.
    pub async fn start_upload(&self, file: &NewFile) -> Result<FileRecord, TransferError> {
        let record = self.metadata.create_file(file).await?;
        info!(
            "started upload {} ({}) for {}",
            record.id, record.file_name, record.owner_id
        );
        Ok(record)
    }

    /// Accept one chunk of a private upload into `{cid}/{file_id}`.
    ///
    /// A repeated last chunk for an already finalized file returns the stored
    /// result; any other chunk for it is rejected.
    pub async fn accept_chunk(
        &self,
        file_id: &str,
        position: ChunkPosition,
        payload: Bytes,
    ) -> Result<ChunkReceipt, TransferError> {
        if payload.is_empty() {
            return Err(TransferError::MissingPayload);
        }
        let record = self
            .metadata
            .get_file(file_id)
            .await?
            .ok_or_else(|| TransferError::FileNotFound(file_id.to_string()))?;
        if record.is_finalized() {
            return if position.is_last() {
                Ok(finalized_receipt(&record, position))
            } else {
                Err(TransferError::FileAlreadyFinalized(file_id.to_string()))
            };
        }

        self.store_chunk(file_id, position.index, payload).await?;
        if !position.is_last() {
            return Ok(ChunkReceipt {
                file_id: file_id.to_string(),
                chunk_index: position.index,
                merged: None,
            });
        }

        let _lease = self.locks.acquire(merge_key(file_id)).await;
        let record = self
            .metadata
            .get_file(file_id)
            .await?
            .ok_or_else(|| TransferError::FileNotFound(file_id.to_string()))?;
        if record.is_finalized() {
            debug!("{} finalized by a concurrent request", file_id);
            // this request may have re-stored its chunk after the winner's cleanup
            self.discard_chunks(file_id, position.total).await;
            return Ok(finalized_receipt(&record, position));
        }

        let destination = format!("{}/{}", record.cid.trim_end_matches('/'), record.id);
        let merged = self.merge(file_id, position.total, &destination).await?;

        let file_size = i64::try_from(merged.file_size).map_err(|_| {
            TransferError::MetadataFinalizeFailed {
                file_id: file_id.to_string(),
                reason: format!("size {} out of range", merged.file_size),
            }
        })?;
        let updated = self
            .metadata
            .finalize_file(file_id, &merged.file_hash, file_size, &merged.path)
            .await
            .map_err(|err| TransferError::MetadataFinalizeFailed {
                file_id: file_id.to_string(),
                reason: err.to_string(),
            })?;
        if !updated {
            return Err(TransferError::MetadataFinalizeFailed {
                file_id: file_id.to_string(),
                reason: "record changed during merge".into(),
            });
        }

        self.discard_chunks(file_id, position.total).await;
        info!(
            "finalized {} at {} ({} bytes)",
            file_id, merged.path, merged.file_size
        );
        Ok(ChunkReceipt {
            file_id: file_id.to_string(),
            chunk_index: position.index,
            merged: Some(merged),
        })
    }

    /// Accept one chunk of a shared flow. The last chunk merges into
    /// `destination`; the file record itself is left untouched.
    ///
    /// Temp chunks survive the merge. The caller discards them with
    /// [`Self::discard_chunks`] once it has recorded the share.
    pub async fn accept_shared_chunk(
        &self,
        file_id: &str,
        upload_key: &str,
        position: ChunkPosition,
        payload: Bytes,
        destination: &str,
    ) -> Result<ChunkReceipt, TransferError> {
        if payload.is_empty() {
            return Err(TransferError::MissingPayload);
        }
        self.store_chunk(upload_key, position.index, payload).await?;

        let merged = if position.is_last() {
            let _lease = self.locks.acquire(merge_key(upload_key)).await;
            Some(self.merge(upload_key, position.total, destination).await?)
        } else {
            None
        };
        Ok(ChunkReceipt {
            file_id: file_id.to_string(),
            chunk_index: position.index,
            merged,
        })
    }

    async fn store_chunk(
        &self,
        upload_key: &str,
        index: u64,
        payload: Bytes,
    ) -> Result<(), TransferError> {
        let path = chunk_path(upload_key, index);
        let size = payload.len();
        self.objects
            .write_stream(&path, once_stream(payload))
            .await
            .map_err(|source| TransferError::TempWriteFailed {
                path: path.clone(),
                source,
            })?;
        debug!("stored chunk {} ({} bytes)", path, size);
        Ok(())
    }

    /// Concatenate `0..total` into `destination`. The caller holds the merge
    /// lease for `upload_key`.
    async fn merge(
        &self,
        upload_key: &str,
        total: u64,
        destination: &str,
    ) -> Result<MergedObject, TransferError> {
        let objects = self.objects.clone();
        let key = upload_key.to_string();
        let chunks = stream::iter(0..total)
            .then(move |index| {
                let objects = objects.clone();
                let path = chunk_path(&key, index);
                async move {
                    objects.read_stream(&path).await.map_err(|err| {
                        if err.is_not_found() {
                            io::Error::new(io::ErrorKind::NotFound, format!("{path} is missing"))
                        } else {
                            io::Error::other(err)
                        }
                    })
                }
            })
            .try_flatten();

        let tally = Arc::new(Mutex::new(Tally::default()));
        let sink = tally.clone();
        let hashed: ByteStream = chunks
            .inspect_ok(move |chunk| {
                let mut tally = sink.lock();
                tally.hasher.update(chunk);
                tally.size += chunk.len() as u64;
            })
            .boxed();

        let body = match &self.cipher {
            Some(cipher) => cipher.encrypt(hashed)?,
            None => hashed,
        };

        self.objects
            .write_stream(destination, body)
            .await
            .map_err(|source| TransferError::ChunkMergeFailed {
                upload_key: upload_key.to_string(),
                source,
            })?;

        let (file_hash, file_size) = {
            let tally = tally.lock();
            (hex::encode(tally.hasher.clone().finalize()), tally.size)
        };

        debug!(
            "merged {} chunks of {} into {}",
            total, upload_key, destination
        );
        Ok(MergedObject {
            path: destination.to_string(),
            file_hash,
            file_size,
        })
    }

    /// Best-effort removal of the temp chunks of a recorded upload.
    pub async fn discard_chunks(&self, upload_key: &str, total: u64) {
        for index in 0..total {
            let path = chunk_path(upload_key, index);
            if let Err(err) = self.objects.discard(&path).await {
                warn!("failed to remove merged chunk {}: {}", path, err);
            }
        }
    }
}

fn finalized_receipt(record: &FileRecord, position: ChunkPosition) -> ChunkReceipt {
    ChunkReceipt {
        file_id: record.id.clone(),
        chunk_index: position.index,
        merged: Some(MergedObject {
            path: record.cid.clone(),
            file_hash: record.file_hash.clone(),
            file_size: u64::try_from(record.file_size).unwrap_or_default(),
        }),
    }
}
