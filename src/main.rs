use anyhow::Result;
use axum::Router;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::{fs, io::ErrorKind, path::Path, str::FromStr, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

mod config;
mod errors;
mod handlers;
mod models;
mod routes;
mod services;
#[cfg(test)]
mod test_support;

use services::{
    AppState,
    cipher::{AesStreamCipher, StreamCipher},
    metadata_store::{SqlMetadataStore, run_migrations},
    object_store::{LocalObjectStore, ObjectStore},
    webdav_store::WebDavObjectStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting file service with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db_url = &cfg.database_url;
    let db_path = db_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    tracing::debug!("Interpreted SQLite path => {}", db_path);

    // Create parent directory if needed
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    let connect = SqliteConnectOptions::from_str(db_url)?.create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(connect)
        .await?;

    // --- Handle migration mode ---
    if migrate {
        run_migrations(&pool).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }

    // --- Object store ---
    let objects: Arc<dyn ObjectStore> = match &cfg.owncloud {
        Some(oc) => {
            tracing::info!("Using WebDAV object store at {}", oc.url);
            Arc::new(WebDavObjectStore::new(
                oc.url.clone(),
                oc.username.clone(),
                oc.password.clone(),
            ))
        }
        None => {
            if !Path::new(&cfg.storage_dir).exists() {
                fs::create_dir_all(&cfg.storage_dir)?;
                tracing::info!("Created storage directory at {}", cfg.storage_dir);
            }
            tracing::info!("Using local object store at {}", cfg.storage_dir);
            Arc::new(LocalObjectStore::new(cfg.storage_dir.clone()))
        }
    };

    let cipher: Option<Arc<dyn StreamCipher>> = match &cfg.aes_key {
        Some(key) => Some(Arc::new(AesStreamCipher::new(key)?)),
        None => {
            tracing::warn!("AES_KEY not set; content is stored as uploaded");
            None
        }
    };

    // --- Initialize services ---
    let state = AppState::new(
        Arc::new(SqlMetadataStore::new(pool)),
        objects,
        cipher,
        cfg.share_ttl_hours,
    );

    // --- Build router ---
    let app: Router = routes::routes::routes(cfg.max_chunk_bytes).with_state(state);

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}
