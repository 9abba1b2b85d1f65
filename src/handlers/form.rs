//! Multipart form collection and streamed content responses shared by the
//! upload, share and download handlers.

use crate::{
    errors::AppError,
    models::file::FileRecord,
    services::{
        chunk_assembler::{ChunkPosition, TransferError},
        object_store::ByteStream,
    },
};
use axum::{
    body::Body,
    extract::Multipart,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::Response,
};
use bytes::Bytes;
use std::collections::HashMap;

/// Name of the multipart part carrying chunk bytes.
pub const FILE_PART: &str = "encryptedFile";

/// Text fields of a multipart request plus the optional file part.
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    file: Option<Bytes>,
}

impl MultipartForm {
    pub async fn collect(mut multipart: Multipart) -> Result<Self, AppError> {
        let mut form = Self::default();
        while let Some(field) = multipart.next_field().await? {
            let name = field.name().unwrap_or_default().to_string();
            if name == FILE_PART {
                form.file = Some(field.bytes().await?);
            } else {
                let value = field.text().await?;
                form.fields.insert(name, value);
            }
        }
        Ok(form)
    }

    /// Trimmed, non-empty value of the first present name.
    pub fn text(&self, names: &[&str]) -> Option<&str> {
        names.iter().find_map(|name| {
            self.fields
                .get(*name)
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
        })
    }

    pub fn require(&self, names: &[&str]) -> Result<&str, AppError> {
        self.text(names)
            .ok_or_else(|| AppError::bad_request(format!("missing required field `{}`", names[0])))
    }

    pub fn chunk_position(&self) -> Result<ChunkPosition, AppError> {
        let index = self.require(&["chunkIndex"])?;
        let total = self.require(&["totalChunks"])?;
        Ok(ChunkPosition::parse(index, total)?)
    }

    /// Take the chunk bytes. Absent or empty parts are rejected.
    pub fn take_file(&mut self) -> Result<Bytes, AppError> {
        self.file
            .take()
            .filter(|bytes| !bytes.is_empty())
            .ok_or_else(|| TransferError::MissingPayload.into())
    }
}

/// Streamed `application/octet-stream` response for file content.
pub fn content_response(
    file: &FileRecord,
    body: ByteStream,
    extra: &[(&'static str, &str)],
) -> Response {
    let mut response = Response::new(Body::from_stream(body));
    *response.status_mut() = StatusCode::OK;

    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    set_header(headers, "x-file-name", &file.file_name);
    set_header(headers, "x-nonce", &file.nonce);
    for (name, value) in extra {
        set_header(headers, name, value);
    }
    response
}

/// Insert a header, percent-encoding values that are not valid header text.
fn set_header(headers: &mut HeaderMap, name: &'static str, value: &str) {
    let value = HeaderValue::from_str(value).or_else(|_| {
        HeaderValue::from_str(&urlencoding::encode(value))
    });
    if let Ok(value) = value {
        headers.insert(HeaderName::from_static(name), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::FromRequest, http::Request};
    use chrono::Utc;

    const BOUNDARY: &str = "X-BOUNDARY";

    fn multipart_body(fields: &[(&str, &str)], file: Option<&[u8]>) -> Body {
        let mut body = Vec::new();
        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }
        if let Some(bytes) = file {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{FILE_PART}\"; filename=\"blob\"\r\nContent-Type: application/octet-stream\r\n\r\n"
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
        Body::from(body)
    }

    async fn form(fields: &[(&str, &str)], file: Option<&[u8]>) -> MultipartForm {
        let request = Request::builder()
            .method("POST")
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(multipart_body(fields, file))
            .unwrap();
        let multipart = Multipart::from_request(request, &()).await.unwrap();
        MultipartForm::collect(multipart).await.unwrap()
    }

    #[tokio::test]
    async fn fields_and_file_are_collected() {
        let mut form = form(
            &[("fileid", " f1 "), ("chunkIndex", "1"), ("totalChunks", "3")],
            Some(b"\x00\x01cipher"),
        )
        .await;

        assert_eq!(form.text(&["fileId", "fileid"]), Some("f1"));
        assert_eq!(
            form.chunk_position().unwrap(),
            ChunkPosition { index: 1, total: 3 }
        );
        assert_eq!(form.take_file().unwrap(), Bytes::from_static(b"\x00\x01cipher"));
        // the part can only be taken once
        assert_eq!(form.take_file().unwrap_err().status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn missing_fields_are_bad_requests() {
        let form = form(&[("userId", ""), ("chunkIndex", "x"), ("totalChunks", "2")], None).await;
        assert_eq!(
            form.require(&["userId"]).unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            form.chunk_position().unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn content_headers_are_set_and_encoded() {
        let file = FileRecord {
            id: "f1".into(),
            owner_id: "alice".into(),
            file_name: "résumé.pdf".into(),
            file_type: "application/pdf".into(),
            file_size: 3,
            file_hash: "abc".into(),
            nonce: "n-1".into(),
            cid: "files/alice/f1".into(),
            description: String::new(),
            tags: Default::default(),
            allow_view_sharing: false,
            created_at: Utc::now(),
        };
        let body = crate::services::object_store::once_stream(Bytes::from_static(b"abc"));
        let response = content_response(&file, body, &[("x-view-only", "true")]);
        let headers = response.headers();

        assert_eq!(headers["content-type"], "application/octet-stream");
        assert_eq!(headers["x-file-name"], "r%C3%A9sum%C3%A9.pdf");
        assert_eq!(headers["x-nonce"], "n-1");
        assert_eq!(headers["x-view-only"], "true");
    }
}
