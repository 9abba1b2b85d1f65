//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the metadata store and object store

use crate::services::{
    AppState,
    object_store::{collect_stream, once_stream},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

/// `GET /healthz`
///
/// Very small liveness check that never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// 1. Pings the metadata store.
/// 2. Writes, reads back and removes a marker object in the object store.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let metadata_check = match state.metadata.ping().await {
        Ok(()) => CheckStatus::ok(),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };
    let storage_check = storage_round_trip(&state).await;

    let overall_ok = metadata_check.ok && storage_check.ok;
    let checks = HashMap::from([("metadata", metadata_check), ("storage", storage_check)]);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn storage_round_trip(state: &AppState) -> CheckStatus {
    let marker = format!("temp/.readyz-{}", Uuid::new_v4());

    if let Err(e) = state
        .objects
        .write_stream(&marker, once_stream(Bytes::from_static(b"readyz")))
        .await
    {
        return CheckStatus::failed(format!("could not write marker: {}", e));
    }

    let read_back = match state.objects.read_stream(&marker).await {
        Ok(stream) => collect_stream(stream).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };
    let removed = state.objects.discard(&marker).await;

    match (read_back, removed) {
        (Ok(bytes), Ok(())) if bytes == b"readyz" => CheckStatus::ok(),
        (Ok(bytes), Err(e)) if bytes == b"readyz" => CheckStatus {
            ok: true,
            error: Some(format!("could not remove marker: {}", e)),
        },
        (Ok(_), _) => CheckStatus::failed("marker content mismatch".into()),
        (Err(e), _) => CheckStatus::failed(format!("could not read marker: {}", e)),
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self {
            ok: true,
            error: None,
        }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
