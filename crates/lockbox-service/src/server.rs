//! HTTP binding of the blob protocol over a [`FileStore`].
//!
//! - `GET /storage?name=N` returns the object body.
//! - `PUT /storage?name=N[&previousName=P]` stores the request body.
//! - `DELETE /storage?name=N` removes (or backs up) the object.
//! - `POST /storage` carries one of the above as JSON, for clients that can
//!   only POST.
//! - `GET /storage/list[?backups=true]` lists object names, one per line.
//! - `GET /health` answers `ok`.

use crate::config::ServiceConfig;
use crate::error::ApiError;
use anyhow::Context;
use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use lockbox_core::FileStore;
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    store: Arc<FileStore>,
    allow_list_backups: bool,
}

impl AppState {
    pub fn new(store: FileStore, allow_list_backups: bool) -> Self {
        Self {
            store: Arc::new(store),
            allow_list_backups,
        }
    }

    pub fn store(&self) -> &FileStore {
        &self.store
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ObjectQuery {
    name: String,
    previous_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    backups: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct OverrideRequest {
    method: String,
    name: String,
    previous_name: Option<String>,
    content: Option<String>,
}

pub fn build_router(state: AppState, max_payload_size: usize) -> Router {
    Router::new()
        .route(
            "/storage",
            get(get_object)
                .put(put_object)
                .delete(delete_object)
                .post(post_override),
        )
        .route("/storage/list", get(list_objects))
        .route("/health", get(health))
        .layer(DefaultBodyLimit::disable())
        .layer(RequestBodyLimitLayer::new(max_payload_size))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Open the store, bind the listener and serve until ctrl-c.
pub async fn serve(config: ServiceConfig) -> anyhow::Result<()> {
    let store = FileStore::open(&config.data_dir, config.store_options())
        .await
        .with_context(|| format!("opening store at {}", config.data_dir.display()))?;
    info!(
        root = %store.root().display(),
        backups = config.backup_files,
        block_new = config.block_new,
        "store ready"
    );
    let app = build_router(
        AppState::new(store, config.allow_list_backups),
        config.max_payload_size,
    );
    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("cannot listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn get_object(
    State(state): State<AppState>,
    Query(query): Query<ObjectQuery>,
) -> Result<Vec<u8>, ApiError> {
    Ok(state.store.read(&query.name).await?)
}

async fn put_object(
    State(state): State<AppState>,
    Query(query): Query<ObjectQuery>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state
        .store
        .write(&query.name, &body, query.previous_name.as_deref())
        .await?;
    Ok(StatusCode::OK)
}

async fn delete_object(
    State(state): State<AppState>,
    Query(query): Query<ObjectQuery>,
) -> Result<StatusCode, ApiError> {
    state.store.delete(&query.name).await?;
    Ok(StatusCode::OK)
}

async fn post_override(
    State(state): State<AppState>,
    Json(req): Json<OverrideRequest>,
) -> Result<Response, ApiError> {
    match req.method.to_ascii_uppercase().as_str() {
        "GET" => Ok(state.store.read(&req.name).await?.into_response()),
        "PUT" => {
            let Some(content) = req.content else {
                return Ok((StatusCode::BAD_REQUEST, "missing content").into_response());
            };
            state
                .store
                .write(&req.name, content.as_bytes(), req.previous_name.as_deref())
                .await?;
            Ok(StatusCode::OK.into_response())
        }
        "DELETE" => {
            state.store.delete(&req.name).await?;
            Ok(StatusCode::OK.into_response())
        }
        _ => Ok(StatusCode::METHOD_NOT_ALLOWED.into_response()),
    }
}

async fn list_objects(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<String, ApiError> {
    let include_backups = query.backups && state.allow_list_backups;
    let names = state.store.list(include_backups).await?;
    Ok(names.join("\n"))
}

async fn health() -> &'static str {
    "ok"
}
