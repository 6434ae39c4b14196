use std::sync::Arc;
use std::time::Instant;

use axum::extract::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::{Router, routing::get};

use super::admin::admin_router;
use super::modules::{archive_router, modules_router, service_discovery};
use crate::registry::Registry;

pub struct AppState {
    pub registry: Arc<Registry>,
    /// Public base URL for external access. Used to build absolute download URLs.
    pub public_base_url: Option<String>,
}

impl AppState {
    /// `path` prefixed with the public base URL, when one is configured.
    #[must_use]
    pub fn absolute_url(&self, path: &str) -> String {
        match &self.public_base_url {
            Some(base) => format!("{}{path}", base.trim_end_matches('/')),
            None => path.to_string(),
        }
    }
}

async fn health() -> &'static str {
    "OK"
}

async fn log_request(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let response = next.run(request).await;

    let latency = start.elapsed();
    let status = response.status();

    tracing::info!(
        "{} {} {} {}ms",
        method,
        uri.path(),
        status.as_u16(),
        latency.as_millis()
    );

    response
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/.well-known/terraform.json", get(service_discovery))
        .nest("/v1/admin", admin_router())
        .nest("/v1/modules", modules_router())
        .nest("/modules", archive_router())
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
