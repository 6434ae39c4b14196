use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;

use crate::registry::NewNamespace;
use crate::server::AppState;
use crate::server::auth::RequireAdmin;
use crate::server::response::{
    ApiError, ApiResponse, DEFAULT_PAGE_SIZE, PaginatedResponse, paginate,
};

#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    #[serde(default)]
    pub cursor: Option<String>,
}

pub async fn create_namespace(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Json(req): Json<NewNamespace>,
) -> impl IntoResponse {
    let ns = state.registry.create_namespace(req)?;

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(ns))))
}

pub async fn list_namespaces(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> impl IntoResponse {
    let cursor = params.cursor.as_deref().unwrap_or("");

    let namespaces = state
        .registry
        .list_namespaces(cursor, DEFAULT_PAGE_SIZE + 1)?;

    let (namespaces, next_cursor, has_more) =
        paginate(namespaces, DEFAULT_PAGE_SIZE as usize, |ns| ns.name.clone());

    Ok::<_, ApiError>(Json(PaginatedResponse::new(
        namespaces,
        next_cursor,
        has_more,
    )))
}

pub async fn get_namespace(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let ns = state.registry.get_namespace(&name)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(ns)))
}

pub async fn delete_namespace(
    _admin: RequireAdmin,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    state.registry.delete_namespace(&name)?;

    Ok::<_, ApiError>(StatusCode::NO_CONTENT)
}
