mod modules;
mod namespaces;
mod versions;

use std::sync::Arc;

use axum::{
    Router,
    routing::{delete, get, patch, post},
};

use crate::server::AppState;

pub fn admin_router() -> Router<Arc<AppState>> {
    Router::new()
        // Namespace routes
        .route("/namespaces", post(namespaces::create_namespace))
        .route("/namespaces", get(namespaces::list_namespaces))
        .route("/namespaces/{name}", get(namespaces::get_namespace))
        .route("/namespaces/{name}", delete(namespaces::delete_namespace))
        // Module provider routes
        .route("/modules", post(modules::create_module_provider))
        .route("/modules", get(modules::list_module_providers))
        .route(
            "/modules/{namespace}/{module}/{provider}",
            get(modules::get_module_provider),
        )
        .route(
            "/modules/{namespace}/{module}/{provider}",
            patch(modules::update_module_provider),
        )
        .route(
            "/modules/{namespace}/{module}/{provider}",
            delete(modules::delete_module_provider),
        )
        .route(
            "/modules/{namespace}/{module}/{provider}/move",
            post(modules::move_module_provider),
        )
        // Version routes
        .route(
            "/modules/{namespace}/{module}/{provider}/versions",
            get(versions::list_versions),
        )
        .route(
            "/modules/{namespace}/{module}/{provider}/versions",
            post(versions::index_version),
        )
        .route(
            "/modules/{namespace}/{module}/{provider}/versions/{version}/publish",
            post(versions::publish_version),
        )
        .route(
            "/modules/{namespace}/{module}/{provider}/versions/{version}",
            delete(versions::delete_version),
        )
        .route("/reindex", post(versions::reindex_all))
}
