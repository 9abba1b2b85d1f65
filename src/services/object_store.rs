//! src/services/object_store.rs
//!
//! `ObjectStore` is the narrow interface the service needs from a hierarchical
//! blob store (directories, streaming writes and reads, removal), plus the
//! on-disk implementation used for local deployments and tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, pin_mut, stream::BoxStream};
use std::{
    io::{self, ErrorKind},
    path::PathBuf,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

/// Owned stream of content bytes moving between the client, the cipher and
/// the object store.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid object path `{0}`")]
    InvalidPath(String),
    #[error("object store returned {status} for `{path}`")]
    Status { path: String, status: u16 },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ObjectStoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

pub type ObjectResult<T> = Result<T, ObjectStoreError>;

/// Remote hierarchical file store.
///
/// Paths are `/`-delimited; implementations normalize them with
/// [`normalize_path`] before use. `write_stream` replaces the object only
/// once the whole stream has been consumed successfully; a stream that yields
/// an error leaves any previous object untouched.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Create `path` and any missing parents. Existing directories are fine.
    async fn create_directory(&self, path: &str) -> ObjectResult<()>;

    /// Write `body` to `path` with overwrite semantics. Returns bytes written.
    async fn write_stream(&self, path: &str, body: ByteStream) -> ObjectResult<u64>;

    /// Open `path` for reading. Fails with `NotFound` if absent.
    async fn read_stream(&self, path: &str) -> ObjectResult<ByteStream>;

    /// Remove `path`. Fails with `NotFound` if absent.
    async fn remove(&self, path: &str) -> ObjectResult<()>;

    /// Stream-copy `from` to `to`. Safe to retry against the same destination.
    async fn copy(&self, from: &str, to: &str) -> ObjectResult<u64> {
        let body = self.read_stream(from).await?;
        self.write_stream(to, body).await
    }

    /// Remove for cleanup paths: an already-missing object is not an error.
    async fn discard(&self, path: &str) -> ObjectResult<()> {
        match self.remove(path).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Whether an object is present at `path`.
    async fn exists(&self, path: &str) -> ObjectResult<bool> {
        match self.read_stream(path).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Trim leading and trailing slashes and reject traversal or empty segments.
pub fn normalize_path(path: &str) -> ObjectResult<String> {
    let trimmed = path.trim_start_matches('/').trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ObjectStoreError::InvalidPath(path.to_string()));
    }
    let valid = trimmed.split('/').all(|segment| {
        !segment.is_empty()
            && segment != "."
            && segment != ".."
            && !segment
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\')
    });
    if !valid {
        return Err(ObjectStoreError::InvalidPath(path.to_string()));
    }
    Ok(trimmed.to_string())
}

/// Parent directory of a normalized path, if it has one.
pub fn parent_of(path: &str) -> Option<&str> {
    path.rsplit_once('/').map(|(parent, _)| parent)
}

/// Object store rooted at a local directory.
///
/// Writes go to a hidden scratch file beside the target which is fsynced and
/// renamed into place, so readers only ever see complete objects.
#[derive(Clone, Debug)]
pub struct LocalObjectStore {
    base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    fn resolve(&self, path: &str) -> ObjectResult<PathBuf> {
        let normalized = normalize_path(path)?;
        let mut full = self.base_path.clone();
        full.extend(normalized.split('/'));
        Ok(full)
    }

    fn map_missing(err: io::Error, path: &str) -> ObjectStoreError {
        if err.kind() == ErrorKind::NotFound {
            ObjectStoreError::NotFound(path.to_string())
        } else {
            ObjectStoreError::Io(err)
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn create_directory(&self, path: &str) -> ObjectResult<()> {
        let dir = self.resolve(path)?;
        fs::create_dir_all(&dir).await?;
        Ok(())
    }

    async fn write_stream(&self, path: &str, body: ByteStream) -> ObjectResult<u64> {
        let file_path = self.resolve(path)?;
        let parent = file_path
            .parent()
            .map(PathBuf::from)
            .ok_or_else(|| ObjectStoreError::InvalidPath(path.to_string()))?;
        fs::create_dir_all(&parent).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut written: u64 = 0;
        pin_mut!(body);
        while let Some(chunk_res) = body.next().await {
            let chunk = match chunk_res {
                Ok(chunk) => chunk,
                Err(err) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    return Err(ObjectStoreError::Io(err));
                }
            };
            if let Err(err) = file.write_all(&chunk).await {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(ObjectStoreError::Io(err));
            }
            written += chunk.len() as u64;
        }
        if let Err(err) = file.flush().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }
        if let Err(err) = file.sync_all().await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(ObjectStoreError::Io(err));
        }

        debug!("wrote {} bytes to {}", written, file_path.display());
        Ok(written)
    }

    async fn read_stream(&self, path: &str) -> ObjectResult<ByteStream> {
        let file_path = self.resolve(path)?;
        let file = File::open(&file_path)
            .await
            .map_err(|err| Self::map_missing(err, path))?;
        Ok(ReaderStream::new(file).boxed())
    }

    async fn remove(&self, path: &str) -> ObjectResult<()> {
        let file_path = self.resolve(path)?;
        fs::remove_file(&file_path)
            .await
            .map_err(|err| Self::map_missing(err, path))?;
        debug!("removed {}", file_path.display());
        Ok(())
    }
}

/// Wrap an in-memory payload as a [`ByteStream`].
pub fn once_stream(bytes: Bytes) -> ByteStream {
    futures::stream::once(async move { Ok::<_, io::Error>(bytes) }).boxed()
}

/// Drain a stream into memory. Used where a bounded object must be inspected.
pub async fn collect_stream(stream: ByteStream) -> io::Result<Vec<u8>> {
    stream
        .try_fold(Vec::new(), |mut acc, chunk| async move {
            acc.extend_from_slice(&chunk);
            Ok(acc)
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use tempfile::TempDir;

    fn store() -> (TempDir, LocalObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = LocalObjectStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn normalize_trims_slashes_and_rejects_traversal() {
        assert_eq!(normalize_path("/files/u1/f1/").unwrap(), "files/u1/f1");
        assert_eq!(normalize_path("temp/a_chunk_0").unwrap(), "temp/a_chunk_0");
        assert!(normalize_path("files/../etc").is_err());
        assert!(normalize_path("files//f1").is_err());
        assert!(normalize_path("///").is_err());
        assert_eq!(parent_of("files/u1/f1"), Some("files/u1"));
        assert_eq!(parent_of("f1"), None);
    }

    #[tokio::test]
    async fn write_overwrites_and_read_returns_latest() {
        let (_dir, store) = store();
        store
            .write_stream("/temp/f_chunk_0", once_stream(Bytes::from_static(b"first")))
            .await
            .unwrap();
        let written = store
            .write_stream("temp/f_chunk_0", once_stream(Bytes::from_static(b"second")))
            .await
            .unwrap();
        assert_eq!(written, 6);

        let body = collect_stream(store.read_stream("temp/f_chunk_0").await.unwrap())
            .await
            .unwrap();
        assert_eq!(body, b"second");
    }

    #[tokio::test]
    async fn failed_stream_does_not_publish() {
        let (dir, store) = store();
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"partial")),
            Err(io::Error::new(ErrorKind::BrokenPipe, "client went away")),
        ])
        .boxed();

        assert!(store.write_stream("files/u1/f1", body).await.is_err());
        assert!(
            store
                .read_stream("files/u1/f1")
                .await
                .err()
                .is_some_and(|e| e.is_not_found())
        );

        let leftovers: Vec<_> = std::fs::read_dir(dir.path().join("files/u1"))
            .unwrap()
            .collect();
        assert!(leftovers.is_empty(), "scratch file left behind");
    }

    #[tokio::test]
    async fn remove_missing_is_not_found_but_discard_is_ok() {
        let (_dir, store) = store();
        let err = store.remove("files/nope").await.unwrap_err();
        assert!(err.is_not_found());
        store.discard("files/nope").await.unwrap();
        assert!(!store.exists("files/nope").await.unwrap());
    }

    #[tokio::test]
    async fn copy_duplicates_content() {
        let (_dir, store) = store();
        store
            .write_stream("files/o/sent/f1", once_stream(Bytes::from_static(b"cipher")))
            .await
            .unwrap();
        store
            .copy("files/o/sent/f1", "files/o/shared_view/f1_bob")
            .await
            .unwrap();
        // retrying the same copy is harmless
        store
            .copy("files/o/sent/f1", "files/o/shared_view/f1_bob")
            .await
            .unwrap();

        let body = collect_stream(store.read_stream("files/o/shared_view/f1_bob").await.unwrap())
            .await
            .unwrap();
        assert_eq!(body, b"cipher");
        assert!(store.exists("/files/o/sent/f1").await.unwrap());
    }

    #[tokio::test]
    async fn create_directory_is_idempotent() {
        let (dir, store) = store();
        store.create_directory("files/u1/docs").await.unwrap();
        store.create_directory("/files/u1/docs/").await.unwrap();
        assert!(dir.path().join("files/u1/docs").is_dir());
    }
}
