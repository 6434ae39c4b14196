use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::indexer::IndexRequest;
use crate::server::AppState;
use crate::server::auth::RequireAdmin;
use crate::server::response::{ApiError, ApiResponse};

type ProviderPath = Path<(String, String, String)>;
type VersionPath = Path<(String, String, String, String)>;

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub include_unpublished: bool,
}

pub async fn list_versions(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): ProviderPath,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let versions = state.registry.list_versions(
        &namespace,
        &module,
        &provider,
        params.include_unpublished,
    )?;

    Ok::<_, ApiError>(Json(ApiResponse::success(versions)))
}

/// Indexing runs for the lifetime of the request; a client disconnect
/// cancels it.
pub async fn index_version(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): ProviderPath,
    Json(req): Json<IndexRequest>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let version = state
        .registry
        .index_version(&namespace, &module, &provider, &req, &cancel)
        .await?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(version))))
}

pub async fn publish_version(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): VersionPath,
) -> impl IntoResponse {
    let version = state
        .registry
        .publish_version(&namespace, &module, &provider, &version)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(version)))
}

pub async fn delete_version(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): VersionPath,
) -> impl IntoResponse {
    state
        .registry
        .delete_version(&namespace, &module, &provider, &version)
        .await?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn reindex_all(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let report = state.registry.reindex_all(&cancel).await?;

    Ok::<_, ApiError>(Json(ApiResponse::success(report)))
}
