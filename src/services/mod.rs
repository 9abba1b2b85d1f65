//! Service layer: storage backends, the cipher and the upload/share/file
//! services the HTTP handlers call into.

pub mod access_auditor;
pub mod chunk_assembler;
pub mod cipher;
pub mod file_service;
pub mod key_locks;
pub mod metadata_store;
pub mod object_store;
pub mod share_service;
pub mod webdav_store;

use self::{
    chunk_assembler::ChunkAssembler, cipher::StreamCipher, file_service::FileService,
    key_locks::KeyedLocks, metadata_store::MetadataStore, object_store::ObjectStore,
    share_service::ShareService,
};
use std::sync::Arc;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub metadata: Arc<dyn MetadataStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub assembler: ChunkAssembler,
    pub shares: ShareService,
    pub files: FileService,
}

impl AppState {
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        objects: Arc<dyn ObjectStore>,
        cipher: Option<Arc<dyn StreamCipher>>,
        share_ttl_hours: i64,
    ) -> Self {
        let locks = KeyedLocks::new();
        let assembler = ChunkAssembler::new(
            objects.clone(),
            metadata.clone(),
            cipher.clone(),
            locks.clone(),
        );
        let shares = ShareService::new(
            objects.clone(),
            metadata.clone(),
            cipher.clone(),
            assembler.clone(),
            locks,
            chrono::Duration::hours(share_ttl_hours),
        );
        let files = FileService::new(objects.clone(), metadata.clone(), cipher);
        Self {
            metadata,
            objects,
            assembler,
            shares,
            files,
        }
    }
}
