//! Fixtures shared by the unit tests.

use crate::{
    models::file::{FileRecord, NewFile},
    services::{
        AppState,
        cipher::{AesStreamCipher, StreamCipher},
        metadata_store::{MetadataStore, SqlMetadataStore, run_migrations},
        object_store::{LocalObjectStore, ObjectStore},
    },
};
use sqlx::sqlite::SqlitePoolOptions;
use std::sync::Arc;
use tempfile::TempDir;

pub const TEST_KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

/// Migrated in-memory database. One connection, kept open, so every query
/// sees the same database.
pub async fn memory_metadata() -> SqlMetadataStore {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    run_migrations(&pool).await.unwrap();
    SqlMetadataStore::new(pool)
}

/// Backing stores for one test. The temp dir lives as long as the fixture.
pub struct Fixture {
    pub dir: TempDir,
    pub metadata: Arc<SqlMetadataStore>,
    pub objects: Arc<LocalObjectStore>,
}

impl Fixture {
    pub async fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let objects = Arc::new(LocalObjectStore::new(dir.path()));
        let metadata = Arc::new(memory_metadata().await);
        Self {
            dir,
            metadata,
            objects,
        }
    }

    pub fn metadata(&self) -> Arc<dyn MetadataStore> {
        self.metadata.clone()
    }

    pub fn objects(&self) -> Arc<dyn ObjectStore> {
        self.objects.clone()
    }

    /// Services wired over this fixture's stores.
    pub fn state(&self, cipher: Option<Arc<dyn StreamCipher>>) -> AppState {
        AppState::new(self.metadata(), self.objects(), cipher, 48)
    }

    pub async fn create_file(&self, owner: &str) -> FileRecord {
        self.metadata
            .create_file(&NewFile {
                owner_id: owner.into(),
                file_name: "notes.txt".into(),
                file_type: "text/plain".into(),
                nonce: "client-nonce".into(),
                ..Default::default()
            })
            .await
            .unwrap()
    }
}

pub fn test_cipher() -> Arc<dyn StreamCipher> {
    Arc::new(AesStreamCipher::new(TEST_KEY).unwrap())
}
