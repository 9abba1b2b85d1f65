//! WebDAV-backed object store (ownCloud / Nextcloud style servers).
//!
//! `MKCOL` creates directories one segment at a time, content moves through
//! streaming `PUT`/`GET`, and `DELETE` removes objects. ownCloud stages
//! uploads in `.part` files, so a `PUT` whose body stream fails is never
//! published.

use super::object_store::{
    ByteStream, ObjectResult, ObjectStore, ObjectStoreError, normalize_path, parent_of,
};
use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::{Body, Client, Method, StatusCode};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::debug;

#[derive(Clone, Debug)]
pub struct WebDavObjectStore {
    client: Client,
    base_url: String,
    username: String,
    password: String,
}

impl WebDavObjectStore {
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: Client::new(),
            base_url,
            username: username.into(),
            password: password.into(),
        }
    }

    /// Absolute URL for a normalized path, each segment percent-encoded.
    fn url_for(&self, normalized: &str) -> String {
        let encoded = normalized
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect::<Vec<_>>()
            .join("/");
        format!("{}/{}", self.base_url, encoded)
    }

    fn request(&self, method: Method, normalized: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, self.url_for(normalized))
            .basic_auth(&self.username, Some(&self.password))
    }

    async fn mkcol(&self, normalized: &str) -> ObjectResult<()> {
        let method = Method::from_bytes(b"MKCOL")
            .map_err(|_| ObjectStoreError::InvalidPath(normalized.to_string()))?;
        let resp = self.request(method, normalized).send().await?;
        match resp.status() {
            status if status.is_success() => Ok(()),
            // 405 Method Not Allowed: the collection already exists
            StatusCode::METHOD_NOT_ALLOWED => Ok(()),
            status => Err(ObjectStoreError::Status {
                path: normalized.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    fn check(status: StatusCode, normalized: &str) -> ObjectResult<()> {
        if status.is_success() {
            Ok(())
        } else if status == StatusCode::NOT_FOUND {
            Err(ObjectStoreError::NotFound(normalized.to_string()))
        } else {
            Err(ObjectStoreError::Status {
                path: normalized.to_string(),
                status: status.as_u16(),
            })
        }
    }
}

#[async_trait]
impl ObjectStore for WebDavObjectStore {
    async fn create_directory(&self, path: &str) -> ObjectResult<()> {
        let normalized = normalize_path(path)?;
        let mut prefix = String::new();
        for segment in normalized.split('/') {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(segment);
            self.mkcol(&prefix).await?;
        }
        Ok(())
    }

    async fn write_stream(&self, path: &str, body: ByteStream) -> ObjectResult<u64> {
        let normalized = normalize_path(path)?;
        if let Some(parent) = parent_of(&normalized) {
            self.create_directory(parent).await?;
        }

        let written = Arc::new(AtomicU64::new(0));
        let counter = written.clone();
        let counted = body.inspect_ok(move |chunk| {
            counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
        });

        debug!("streaming upload to WebDAV: {}", normalized);
        let resp = self
            .request(Method::PUT, &normalized)
            .body(Body::wrap_stream(counted))
            .send()
            .await?;
        Self::check(resp.status(), &normalized)?;
        Ok(written.load(Ordering::Relaxed))
    }

    async fn read_stream(&self, path: &str) -> ObjectResult<ByteStream> {
        let normalized = normalize_path(path)?;
        let resp = self.request(Method::GET, &normalized).send().await?;
        Self::check(resp.status(), &normalized)?;
        Ok(resp
            .bytes_stream()
            .map_err(io::Error::other)
            .boxed())
    }

    async fn remove(&self, path: &str) -> ObjectResult<()> {
        let normalized = normalize_path(path)?;
        let resp = self.request(Method::DELETE, &normalized).send().await?;
        Self::check(resp.status(), &normalized)?;
        debug!("removed WebDAV object {}", normalized);
        Ok(())
    }
}
