use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::registry::{MoveTarget, NewModuleProvider, ProviderUpdate};
use crate::server::AppState;
use crate::server::auth::RequireAdmin;
use crate::server::response::{ApiError, ApiResponse};

type ProviderPath = Path<(String, String, String)>;

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    pub namespace: Option<String>,
}

pub async fn create_module_provider(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewModuleProvider>,
) -> impl IntoResponse {
    let provider = state.registry.create_module_provider(req)?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(provider))))
}

pub async fn list_module_providers(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListParams>,
) -> impl IntoResponse {
    let providers = state
        .registry
        .list_module_providers(params.namespace.as_deref())?;

    Ok::<_, ApiError>(Json(ApiResponse::success(providers)))
}

pub async fn get_module_provider(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): ProviderPath,
) -> impl IntoResponse {
    let provider = state
        .registry
        .get_module_provider(&namespace, &module, &provider)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(provider)))
}

pub async fn update_module_provider(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): ProviderPath,
    Json(update): Json<ProviderUpdate>,
) -> impl IntoResponse {
    let provider = state
        .registry
        .update_module_provider(&namespace, &module, &provider, update)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(provider)))
}

pub async fn delete_module_provider(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): ProviderPath,
) -> impl IntoResponse {
    state
        .registry
        .delete_module_provider(&namespace, &module, &provider)
        .await?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}

pub async fn move_module_provider(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): ProviderPath,
    Json(target): Json<MoveTarget>,
) -> impl IntoResponse {
    let moved = state
        .registry
        .move_module_provider(&namespace, &module, &provider, target)
        .await?;

    Ok::<_, ApiError>(Json(ApiResponse::success(moved)))
}
