//! The indexing coordinator.
//!
//! Turns `(namespace, module, provider)` at a tag into a stored, queryable
//! module version:
//!
//! ```text
//! Idle -> Cloning -> Analyzing -> Packaging -> Storing -> Persisting -> Done
//! ```
//!
//! Any failure runs the cleanup pipeline: the scratch directory is removed,
//! archives already written under the version key are deleted, and no rows
//! are created. Concurrent requests for the same `(provider, version)` share
//! one run.

mod gate;
mod single_flight;

use std::fmt;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use semver::Version;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedRwLockWriteGuard, Semaphore};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use gate::ProviderGates;
pub use single_flight::SingleFlight;

use crate::analyzer::{self, Analysis};
use crate::archive::{self, ArchiveIgnore, PackagedArchives};
use crate::config::RegistryConfig;
use crate::error::{Error, ErrorKind, Result};
use crate::git::{self, FetchOptions, GitFetcher};
use crate::scratch::ScratchSpace;
use crate::storage::{ArchiveKind, Storage, archive_path, safe_join, version_dir};
use crate::store::{ChildRecord, Store, VersionRecord};
use crate::template::{clone_url_for, inject_credentials};
use crate::types::{ChildFile, ChildModule, ModuleProvider, ModuleVersion};
use crate::version::{TagFormat, is_beta, parse_canonical};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexState {
    Idle,
    Cloning,
    Analyzing,
    Packaging,
    Storing,
    Persisting,
    Done,
}

impl IndexState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Cloning => "cloning",
            Self::Analyzing => "analyzing",
            Self::Packaging => "packaging",
            Self::Storing => "storing",
            Self::Persisting => "persisting",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for IndexState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed indexing run. Cloneable so every caller sharing the run gets it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexError {
    pub kind: ErrorKind,
    pub message: String,
    /// State the run was in when it failed.
    pub state: IndexState,
    /// `namespace/module/provider/version`.
    pub triple: String,
}

impl IndexError {
    fn new(err: Error, state: IndexState, triple: &str) -> Self {
        match err {
            Error::Index(inner) => inner,
            other => Self {
                kind: other.kind(),
                message: other.to_string(),
                state,
                triple: triple.to_string(),
            },
        }
    }
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "indexing {} failed while {}: {}",
            self.triple, self.state, self.message
        )
    }
}

impl std::error::Error for IndexError {}

impl From<JoinError> for IndexError {
    fn from(e: JoinError) -> Self {
        Self {
            kind: ErrorKind::Internal,
            message: format!("indexing task failed: {e}"),
            state: IndexState::Idle,
            triple: String::new(),
        }
    }
}

/// What to index: exactly one of `version` or `git_tag`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_tag: Option<String>,
}

impl IndexRequest {
    pub fn version(version: impl Into<String>) -> Self {
        Self {
            version: Some(version.into()),
            git_tag: None,
        }
    }

    pub fn git_tag(tag: impl Into<String>) -> Self {
        Self {
            version: None,
            git_tag: Some(tag.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTarget {
    pub version: Version,
    pub git_tag: String,
}

/// Pairs the requested version or tag with its counterpart under `format`.
pub fn resolve_target(request: &IndexRequest, format: &TagFormat) -> Result<IndexTarget> {
    match (request.version.as_deref(), request.git_tag.as_deref()) {
        (Some(_), Some(_)) => Err(Error::ConflictingInputs(
            "specify either a version or a git tag, not both".to_string(),
        )),
        (None, None) => Err(Error::Validation(
            "a version or a git tag is required".to_string(),
        )),
        (Some(version), None) => {
            let version = parse_canonical(version)?;
            let git_tag = format.render_tag(&version)?;
            Ok(IndexTarget { version, git_tag })
        }
        (None, Some(tag)) => {
            let version = format.derive_version(tag).ok_or_else(|| {
                Error::Validation(format!(
                    "tag '{tag}' does not match tag format '{}'",
                    format.as_str()
                ))
            })?;
            Ok(IndexTarget {
                version,
                git_tag: tag.to_string(),
            })
        }
    }
}

/// Tag format in effect for `provider`.
pub fn tag_format_for(provider: &ModuleProvider, config: &RegistryConfig) -> Result<TagFormat> {
    TagFormat::compile(
        provider
            .git
            .tag_format
            .as_deref()
            .unwrap_or(&config.tag_format),
    )
}

/// Runs `fut` under a deadline and the caller's cancellation token. Both
/// count as the upstream giving up.
async fn stage<T>(
    what: &str,
    limit: Duration,
    cancel: &CancellationToken,
    fut: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        () = cancel.cancelled() => Err(Error::UpstreamUnavailable(format!("{what} cancelled"))),
        outcome = tokio::time::timeout(limit, fut) => match outcome {
            Ok(result) => result,
            Err(_) => Err(Error::UpstreamUnavailable(format!(
                "{what} timed out after {}ms",
                limit.as_millis()
            ))),
        },
    }
}

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(format!("worker task failed: {e}")))?
}

struct Job {
    provider: ModuleProvider,
    version: Version,
    git_tag: String,
    /// `ns/mod/prov/ver`, for logs and errors.
    triple: String,
    cancel: CancellationToken,
}

struct Inner {
    config: Arc<RegistryConfig>,
    store: Arc<dyn Store>,
    storage: Arc<dyn Storage>,
    fetcher: Arc<dyn GitFetcher>,
    scratch: ScratchSpace,
    ignore: ArchiveIgnore,
    permits: Arc<Semaphore>,
    flights: SingleFlight<(String, String), ModuleVersion, IndexError>,
    gates: ProviderGates,
}

#[derive(Clone)]
pub struct Indexer {
    inner: Arc<Inner>,
}

impl Indexer {
    pub fn new(
        config: Arc<RegistryConfig>,
        store: Arc<dyn Store>,
        storage: Arc<dyn Storage>,
        fetcher: Arc<dyn GitFetcher>,
    ) -> Result<Self> {
        let scratch = ScratchSpace::new(&config.scratch_directory)?;
        let ignore = ArchiveIgnore::new(&config.archive_ignore)?;
        let permits = Arc::new(Semaphore::new(config.max_concurrent_indexers));

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                storage,
                fetcher,
                scratch,
                ignore,
                permits,
                flights: SingleFlight::new(),
                gates: ProviderGates::default(),
            }),
        })
    }

    /// Indexes one version of `provider`. Re-indexing a version already
    /// indexed from the same tag returns the existing row.
    pub async fn index(
        &self,
        provider: &ModuleProvider,
        request: &IndexRequest,
        cancel: &CancellationToken,
    ) -> Result<ModuleVersion> {
        let format = tag_format_for(provider, &self.inner.config)?;
        let target = resolve_target(request, &format)?;
        let version = target.version.to_string();

        let job = Job {
            provider: provider.clone(),
            triple: format!("{}/{version}", provider.triple()),
            version: target.version,
            git_tag: target.git_tag,
            cancel: cancel.clone(),
        };

        let inner = Arc::clone(&self.inner);
        let key = (provider.id.clone(), version);
        let (result, leader) = self
            .inner
            .flights
            .run(key, move || inner.run(job))
            .await;

        if !leader {
            debug!(module = %provider.triple(), "joined in-flight indexing run");
        }
        result.map_err(Error::Index)
    }

    /// Exclusive hold on `provider`'s storage keys, for renames and deletes.
    /// Refused with `Conflict` while any version of it is being indexed.
    pub fn lock_provider(&self, provider: &ModuleProvider) -> Result<OwnedRwLockWriteGuard<()>> {
        self.inner.gates.try_exclusive(&provider.id).ok_or_else(|| {
            Error::Conflict(format!(
                "{} has indexing in progress; retry once it finishes",
                provider.triple()
            ))
        })
    }

    /// Tags on the provider's remote, for discovering versions to index.
    pub async fn remote_tags(
        &self,
        provider: &ModuleProvider,
        cancel: &CancellationToken,
    ) -> Result<Vec<String>> {
        let inner = &self.inner;
        let url = inner.clone_url(provider, "", "")?;
        let options = FetchOptions {
            clone_timeout: inner.config.timeouts.clone,
            checkout_timeout: inner.config.timeouts.checkout,
            need_tags: true,
        };
        stage(
            "listing tags",
            inner.config.timeouts.clone,
            cancel,
            inner.fetcher.list_tags(&url, &options, cancel),
        )
        .await
    }
}

impl Inner {
    async fn run(self: Arc<Self>, mut job: Job) -> std::result::Result<ModuleVersion, IndexError> {
        let mut state = IndexState::Idle;
        let _shared = self.gates.shared(&job.provider.id).await;
        let result = match self.refresh(&mut job) {
            Ok(()) => self.execute(&job, &mut state).await,
            Err(e) => Err(e),
        };

        match &result {
            Ok(version) => info!(
                module = %job.triple,
                tag = %job.git_tag,
                commit = %version.commit_sha,
                "module version indexed"
            ),
            Err(e) => warn!(
                module = %job.triple,
                tag = %job.git_tag,
                state = %state,
                kind = %e.kind(),
                error = %e,
                "indexing failed"
            ),
        }

        result.map_err(|e| IndexError::new(e, state, &job.triple))
    }

    /// Re-reads the provider once the gate is held, so archive keys follow a
    /// rename that landed between the request and the start of the run.
    fn refresh(&self, job: &mut Job) -> Result<()> {
        let provider = self
            .store
            .get_module_provider(&job.provider.id)?
            .ok_or_else(|| Error::not_found(format!("module provider {}", job.provider.triple())))?;
        if provider.triple() != job.provider.triple() {
            debug!(from = %job.provider.triple(), to = %provider.triple(), "module provider renamed before indexing");
            job.triple = format!("{}/{}", provider.triple(), job.version);
        }
        job.provider = provider;
        Ok(())
    }

    fn transition(state: &mut IndexState, next: IndexState, job: &Job) {
        debug!(module = %job.triple, from = %state, to = %next, "indexing state");
        *state = next;
    }

    fn clone_url(&self, provider: &ModuleProvider, tag: &str, version: &str) -> Result<String> {
        let git_provider = match &provider.git.git_provider_id {
            Some(id) => self.store.get_git_provider(id)?,
            None => None,
        };
        let url = clone_url_for(
            provider,
            git_provider.as_ref(),
            self.config.clone_url_template.as_deref(),
            tag,
            version,
        )?;
        Ok(match &self.config.git_credentials {
            Some(credentials) => inject_credentials(&url, credentials),
            None => url,
        })
    }

    async fn execute(&self, job: &Job, state: &mut IndexState) -> Result<ModuleVersion> {
        let version = job.version.to_string();
        let provider_id = &job.provider.id;

        if let Some(existing) = self.store.get_module_version(provider_id, &version)? {
            if existing.git_tag == job.git_tag {
                debug!(module = %job.triple, "version already indexed");
                *state = IndexState::Done;
                return Ok(existing);
            }
            return Err(Error::AlreadyExists(format!(
                "version {version} already indexed from tag '{}'",
                existing.git_tag
            )));
        }
        if let Some(existing) = self
            .store
            .get_module_version_by_tag(provider_id, &job.git_tag)?
        {
            return Err(Error::AlreadyExists(format!(
                "tag '{}' already indexed as version {}",
                job.git_tag, existing.version
            )));
        }

        let _permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| Error::Internal("indexer is shutting down".to_string()))?;

        let label = format!(
            "{}-{}-{}-{version}",
            job.provider.namespace, job.provider.module, job.provider.provider
        );
        let scratch = self.scratch.allocate(&label)?;
        let result = self.pipeline(job, scratch.path(), state).await;
        scratch.close();
        result
    }

    async fn pipeline(
        &self,
        job: &Job,
        scratch: &Path,
        state: &mut IndexState,
    ) -> Result<ModuleVersion> {
        let timeouts = self.config.timeouts;
        let version = job.version.to_string();
        let provider = &job.provider;

        let tree = scratch.join("tree");
        let out = scratch.join("out");
        tokio::fs::create_dir(&tree).await?;

        Self::transition(state, IndexState::Cloning, job);
        let url = self.clone_url(provider, &job.git_tag, &version)?;
        let options = FetchOptions {
            clone_timeout: timeouts.clone,
            checkout_timeout: timeouts.checkout,
            need_tags: false,
        };
        let fetched = stage(
            "clone",
            timeouts.clone + timeouts.checkout,
            &job.cancel,
            git::fetch_tag(
                self.fetcher.as_ref(),
                &url,
                &job.git_tag,
                &tree,
                &options,
                &job.cancel,
            ),
        )
        .await?;

        Self::transition(state, IndexState::Analyzing, job);
        let module_root = module_root(&tree, provider.git.git_path.as_deref())?;
        let root = module_root.clone();
        let analysis = stage(
            "analysis",
            timeouts.analyze,
            &job.cancel,
            blocking(move || {
                analyzer::analyze(&root).map_err(|e| match e {
                    Error::MalformedModule(_) => e,
                    other => Error::MalformedModule(other.to_string()),
                })
            }),
        )
        .await?;

        Self::transition(state, IndexState::Packaging, job);
        let archive_root = if provider.git.archive_git_path {
            module_root
        } else {
            tree
        };
        let ignore = self.ignore.clone();
        let packaged = stage(
            "packaging",
            timeouts.package,
            &job.cancel,
            blocking(move || archive::package(&archive_root, &out, &ignore)),
        )
        .await?;

        Self::transition(state, IndexState::Storing, job);
        let dir = version_dir(&provider.namespace, &provider.module, &provider.provider, &version)?;
        if let Err(e) = self.store_archives(job, &dir, &packaged).await {
            self.rollback(job, &dir).await;
            return Err(e);
        }

        Self::transition(state, IndexState::Persisting, job);
        let record = build_record(job, fetched.commit_sha, analysis, &packaged);
        if let Err(e) = self.store.persist_indexed_version(&record) {
            self.rollback(job, &dir).await;
            return Err(e);
        }

        Self::transition(state, IndexState::Done, job);
        Ok(record.version)
    }

    async fn store_archives(&self, job: &Job, dir: &str, packaged: &PackagedArchives) -> Result<()> {
        if job.cancel.is_cancelled() {
            return Err(Error::UpstreamUnavailable("indexing cancelled".to_string()));
        }

        let as_storage = |e: Error| match e {
            Error::Storage(_) => e,
            other => Error::Storage(other.to_string()),
        };

        self.storage.make_directory(dir).await.map_err(as_storage)?;
        for kind in ArchiveKind::ALL {
            self.storage
                .upload_file(packaged.path(kind), dir, kind.file_name())
                .await
                .map_err(as_storage)?;
        }
        Ok(())
    }

    /// Removes whatever was written under the version key. Failures are
    /// logged so the original error reaches the caller.
    async fn rollback(&self, job: &Job, dir: &str) {
        let provider = &job.provider;
        let version = job.version.to_string();
        for kind in ArchiveKind::ALL {
            let key = match archive_path(
                &provider.namespace,
                &provider.module,
                &provider.provider,
                &version,
                kind,
            ) {
                Ok(key) => key,
                Err(_) => continue,
            };
            if let Err(e) = self.storage.delete_file(&key).await {
                warn!(key = %key, error = %e, "rollback failed to delete archive");
            }
        }
        if let Err(e) = self.storage.delete_directory(dir).await {
            warn!(dir = %dir, error = %e, "rollback failed to delete version directory");
        }
        debug!(module = %job.triple, "rolled back stored archives");
    }
}

/// The checkout joined with the provider's git path, refusing paths that
/// leave the checkout.
fn module_root(tree: &Path, git_path: Option<&str>) -> Result<PathBuf> {
    let Some(git_path) = git_path
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty() && *p != ".")
    else {
        return Ok(tree.to_path_buf());
    };

    let parts: Vec<&str> = git_path.split('/').collect();
    let root = safe_join(tree, &parts);
    if root == tree {
        return Err(Error::Validation(format!(
            "git path '{git_path}' escapes the repository"
        )));
    }
    Ok(root)
}

fn build_record(
    job: &Job,
    commit_sha: String,
    analysis: Analysis,
    packaged: &PackagedArchives,
) -> VersionRecord {
    let version_id = Uuid::new_v4().to_string();

    let children = analysis
        .children
        .into_iter()
        .map(|child| {
            let child_id = Uuid::new_v4().to_string();
            ChildRecord {
                child: ChildModule {
                    id: child_id.clone(),
                    version_id: version_id.clone(),
                    kind: child.kind,
                    path: child.path,
                    details_id: child.details.id.clone(),
                },
                details: child.details,
                files: child
                    .files
                    .into_iter()
                    .map(|f| ChildFile {
                        child_id: child_id.clone(),
                        path: f.path,
                        content: f.content,
                        is_binary: f.is_binary,
                    })
                    .collect(),
            }
        })
        .collect();

    VersionRecord {
        version: ModuleVersion {
            id: version_id,
            provider_id: job.provider.id.clone(),
            version: job.version.to_string(),
            published: false,
            beta: is_beta(&job.version),
            git_tag: job.git_tag.clone(),
            commit_sha,
            published_at: None,
            indexed_at: Utc::now(),
            details_id: analysis.details.id.clone(),
            tar_sha256: packaged.tar_sha256.clone(),
            zip_sha256: packaged.zip_sha256.clone(),
        },
        details: analysis.details,
        children,
    }
}
