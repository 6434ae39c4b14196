//! The Terraform module registry protocol and archive downloads.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Body,
    extract::{Path, Query, State},
    http::{
        StatusCode,
        header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE, LOCATION},
    },
    response::{IntoResponse, Response},
    routing::get,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio_util::io::ReaderStream;
use tracing::warn;

use crate::error::ErrorKind;
use crate::registry::DownloadSource;
use crate::search::SearchQuery;
use crate::server::AppState;
use crate::server::response::ApiError;
use crate::storage::ArchiveKind;
use crate::store::{SortDirection, SortField};

const STREAM_BUFFER: usize = 64 * 1024;

type ProviderPath = Path<(String, String, String)>;
type VersionPath = Path<(String, String, String, String)>;

pub fn modules_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/search", get(search))
        .route("/{namespace}/{module}/{provider}", get(latest_details))
        .route("/{namespace}/{module}/{provider}/versions", get(list_versions))
        .route("/{namespace}/{module}/{provider}/download", get(download_latest))
        .route("/{namespace}/{module}/{provider}/{version}", get(version_details))
        .route(
            "/{namespace}/{module}/{provider}/{version}/download",
            get(download_version),
        )
        .route(
            "/{namespace}/{module}/{provider}/{version}/submodules/readme",
            get(submodule_readme),
        )
        .route(
            "/{namespace}/{module}/{provider}/{version}/examples/files",
            get(example_files),
        )
}

pub fn archive_router() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/{namespace}/{module}/{provider}/{version}/download",
            get(download_source),
        )
        .route(
            "/{namespace}/{module}/{provider}/{version}/{file}",
            get(download_archive),
        )
}

pub async fn service_discovery() -> Json<Value> {
    Json(json!({ "modules.v1": "/v1/modules/" }))
}

#[derive(Debug, Serialize)]
struct VersionEntry {
    version: String,
}

async fn list_versions(
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): ProviderPath,
) -> impl IntoResponse {
    let current = state
        .registry
        .get_module_provider(&namespace, &module, &provider)?;
    let versions = state
        .registry
        .list_versions(&namespace, &module, &provider, false)?;

    let versions: Vec<VersionEntry> = versions
        .into_iter()
        .map(|v| VersionEntry { version: v.version })
        .collect();

    Ok::<_, ApiError>(Json(json!({
        "modules": [{ "source": current.triple(), "versions": versions }]
    })))
}

async fn download_version(
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): VersionPath,
) -> Result<Response, ApiError> {
    let download = state
        .registry
        .download(&namespace, &module, &provider, Some(&version))?;

    let location = match download.source {
        DownloadSource::Hosted { .. } => state.absolute_url(&format!(
            "/modules/{}/{}/{}",
            download.provider.triple(),
            download.version.version,
            ArchiveKind::TarGz.file_name()
        )),
        DownloadSource::Git { address } => address,
    };

    Ok((StatusCode::NO_CONTENT, [("X-Terraform-Get", location)]).into_response())
}

async fn download_latest(
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): ProviderPath,
) -> Result<Response, ApiError> {
    let (current, latest) = state
        .registry
        .resolve_version(&namespace, &module, &provider, None)?;

    let location = state.absolute_url(&format!(
        "/v1/modules/{}/{}/download",
        current.triple(),
        latest.version
    ));
    Ok((StatusCode::FOUND, [(LOCATION, location)]).into_response())
}

async fn latest_details(
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider)): ProviderPath,
) -> impl IntoResponse {
    let details = state
        .registry
        .version_details(&namespace, &module, &provider, None)?;
    Ok::<_, ApiError>(Json(details))
}

async fn version_details(
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): VersionPath,
) -> impl IntoResponse {
    let details = state
        .registry
        .version_details(&namespace, &module, &provider, Some(&version))?;
    Ok::<_, ApiError>(Json(details))
}

#[derive(Debug, Deserialize)]
struct ChildParams {
    path: String,
}

async fn submodule_readme(
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): VersionPath,
    Query(params): Query<ChildParams>,
) -> impl IntoResponse {
    let readme = state.registry.submodule_readme(
        &namespace,
        &module,
        &provider,
        &version,
        &params.path,
    )?;
    Ok::<_, ApiError>(Json(json!({ "path": params.path, "readme": readme })))
}

#[derive(Debug, Serialize)]
struct ExampleFile {
    path: String,
    /// `None` for binary files.
    content: Option<String>,
    is_binary: bool,
}

async fn example_files(
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): VersionPath,
    Query(params): Query<ChildParams>,
) -> impl IntoResponse {
    let files = state.registry.example_files(
        &namespace,
        &module,
        &provider,
        &version,
        &params.path,
    )?;

    let files: Vec<ExampleFile> = files
        .iter()
        .map(|f| ExampleFile {
            path: f.path.clone(),
            content: f.text().map(String::from),
            is_binary: f.is_binary,
        })
        .collect();
    Ok::<_, ApiError>(Json(json!({ "path": params.path, "files": files })))
}

async fn download_source(
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version)): VersionPath,
) -> Result<Response, ApiError> {
    stream_archive(&state, &namespace, &module, &provider, &version, ArchiveKind::TarGz).await
}

async fn download_archive(
    State(state): State<Arc<AppState>>,
    Path((namespace, module, provider, version, file)): Path<(String, String, String, String, String)>,
) -> Result<Response, ApiError> {
    let kind = ArchiveKind::from_file_name(&file)
        .ok_or_else(|| ApiError::not_found(format!("no archive named '{file}'")))?;
    stream_archive(&state, &namespace, &module, &provider, &version, kind).await
}

async fn stream_archive(
    state: &AppState,
    namespace: &str,
    module: &str,
    provider: &str,
    version: &str,
    kind: ArchiveKind,
) -> Result<Response, ApiError> {
    let handle = state
        .registry
        .open_archive(namespace, module, provider, version, kind)
        .await?;

    let storage = Arc::clone(state.registry.storage());
    let (mut writer, reader) = tokio::io::duplex(STREAM_BUFFER);
    let key = handle.key.clone();
    tokio::spawn(async move {
        if let Err(e) = storage.stream_to(&key, &mut writer).await {
            warn!(key = %key, error = %e, "archive stream aborted");
        }
    });

    Response::builder()
        .header(CONTENT_TYPE, kind.content_type())
        .header(CONTENT_LENGTH, handle.size)
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{}\"", kind.file_name()),
        )
        .body(Body::from_stream(ReaderStream::new(reader)))
        .map_err(|e| ApiError::new(ErrorKind::Internal, e.to_string()))
}

#[derive(Debug, Serialize)]
struct SearchMeta {
    limit: u32,
    current_offset: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_offset: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    prev_offset: Option<u32>,
    total_count: u64,
}

#[derive(Debug, Serialize)]
struct SearchModule {
    id: String,
    namespace: String,
    name: String,
    provider: String,
    version: String,
    verified: bool,
    trusted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    published_at: Option<chrono::DateTime<chrono::Utc>>,
}

async fn search(
    State(state): State<Arc<AppState>>,
    Query(params): Query<Vec<(String, String)>>,
) -> impl IntoResponse {
    let query = parse_search_params(&params)?;
    let result = state.registry.search(&query)?;

    let end = u64::from(result.offset) + u64::from(result.limit);
    let meta = SearchMeta {
        limit: result.limit,
        current_offset: result.offset,
        next_offset: (end < result.total_count).then(|| result.offset + result.limit),
        prev_offset: (result.offset > 0).then(|| result.offset.saturating_sub(result.limit)),
        total_count: result.total_count,
    };

    let modules: Vec<SearchModule> = result
        .hits
        .into_iter()
        .map(|hit| SearchModule {
            id: format!("{}/{}", hit.provider.triple(), hit.latest.version),
            namespace: hit.provider.namespace,
            name: hit.provider.module,
            provider: hit.provider.provider,
            version: hit.latest.version,
            verified: hit.provider.verified,
            trusted: hit.trusted,
            published_at: hit.latest.published_at,
        })
        .collect();

    Ok::<_, ApiError>(Json(json!({
        "meta": meta,
        "modules": modules,
        "facets": result.facets,
    })))
}

/// Builds a search query from repeated or comma-separated parameters.
fn parse_search_params(params: &[(String, String)]) -> Result<SearchQuery, ApiError> {
    let mut query = SearchQuery::default();

    for (key, value) in params {
        let value = value.trim();
        match key.as_str() {
            "q" | "query" => query.query = Some(value.to_string()).filter(|q| !q.is_empty()),
            "namespace" | "namespaces" => query.namespaces.extend(split_list(value)),
            "provider" | "providers" => query.providers.extend(split_list(value)),
            "verified" => query.verified = Some(parse_flag(key, value)?),
            "trusted_namespaces" => query.trusted_namespaces = Some(parse_flag(key, value)?),
            "contributed" => query.contributed = Some(parse_flag(key, value)?),
            "target_terraform_version" => {
                query.target_terraform_version = Some(value.to_string()).filter(|v| !v.is_empty());
            }
            "limit" => query.limit = Some(parse_number(key, value)?),
            "offset" => query.offset = parse_number(key, value)?,
            "sort" => {
                query.sort = match value {
                    "name" => SortField::Name,
                    "namespace" => SortField::Namespace,
                    "provider" => SortField::Provider,
                    "created_at" => SortField::CreatedAt,
                    "verified" => SortField::Verified,
                    other => {
                        return Err(ApiError::bad_request(format!("unknown sort field '{other}'")));
                    }
                }
            }
            "direction" | "order" => {
                query.direction = match value {
                    "asc" => SortDirection::Asc,
                    "desc" => SortDirection::Desc,
                    other => {
                        return Err(ApiError::bad_request(format!(
                            "unknown sort direction '{other}'"
                        )));
                    }
                }
            }
            _ => {}
        }
    }

    Ok(query)
}

fn split_list(value: &str) -> impl Iterator<Item = String> + '_ {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn parse_flag(key: &str, value: &str) -> Result<bool, ApiError> {
    match value {
        "true" | "1" => Ok(true),
        "false" | "0" => Ok(false),
        _ => Err(ApiError::bad_request(format!(
            "'{key}' must be true or false"
        ))),
    }
}

fn parse_number(key: &str, value: &str) -> Result<u32, ApiError> {
    value
        .parse()
        .map_err(|_| ApiError::bad_request(format!("'{key}' must be a non-negative integer")))
}
