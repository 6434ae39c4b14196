//! The registry service: every admin command and read path, shared by the
//! HTTP server and the local admin CLI.

use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{ModuleHosting, RegistryConfig};
use crate::error::{Error, ErrorKind, Result};
use crate::git::GitFetcher;
use crate::indexer::{IndexRequest, Indexer, tag_format_for};
use crate::redirect;
use crate::search::{SearchEngine, SearchQuery, SearchResult};
use crate::storage::path::MODULES_DIR;
use crate::storage::{ArchiveKind, Storage, archive_path, open_storage, version_dir};
use crate::store::{SqliteStore, Store};
use crate::template::{self, Requirements, TemplateKind, browse_url_for, clone_url_for};
use crate::types::name::{validate_module_name, validate_namespace_name, validate_provider_name};
use crate::types::*;
use crate::version::TagFormat;

#[derive(Debug, Clone, Deserialize)]
pub struct NewNamespace {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub namespace_type: NamespaceType,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewModuleProvider {
    pub namespace: String,
    pub module: String,
    pub provider: String,
    #[serde(default)]
    pub verified: bool,
    #[serde(default, flatten)]
    pub git: GitConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProviderUpdate {
    #[serde(default)]
    pub git: Option<GitConfig>,
    #[serde(default)]
    pub verified: Option<bool>,
}

/// New identity for a moved module provider.
#[derive(Debug, Clone, Deserialize)]
pub struct MoveTarget {
    pub namespace: String,
    pub module: String,
    pub provider: String,
}

/// Where Terraform should fetch a version from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadSource {
    /// Storage key of the hosted `source.tar.gz`.
    Hosted { key: String },
    /// A `git::` source address.
    Git { address: String },
}

#[derive(Debug, Clone)]
pub struct Download {
    pub provider: ModuleProvider,
    pub version: ModuleVersion,
    pub source: DownloadSource,
}

#[derive(Debug, Clone, Serialize)]
pub struct ArchiveHandle {
    pub key: String,
    pub size: u64,
    #[serde(skip)]
    pub kind: ArchiveKind,
}

#[derive(Debug, Clone, Serialize)]
pub struct VersionDetails {
    pub provider: ModuleProvider,
    pub version: ModuleVersion,
    pub details: ModuleDetails,
    pub submodules: Vec<ChildModule>,
    pub examples: Vec<ChildModule>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReindexFailure {
    pub module: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_tag: Option<String>,
    pub kind: ErrorKind,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReindexReport {
    /// `ns/mod/prov/ver` of every newly indexed version.
    pub indexed: Vec<String>,
    /// Matching tags that were already indexed.
    pub unchanged: usize,
    pub failed: Vec<ReindexFailure>,
}

pub struct Registry {
    config: Arc<RegistryConfig>,
    store: Arc<dyn Store>,
    storage: Arc<dyn Storage>,
    indexer: Indexer,
}

impl Registry {
    /// Opens the configured database and data directory.
    pub async fn open(config: RegistryConfig, fetcher: Arc<dyn GitFetcher>) -> Result<Self> {
        if let Some(parent) = config
            .database_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
        {
            std::fs::create_dir_all(parent)?;
        }
        let store = SqliteStore::new(&config.database_path)?;
        store.initialize()?;
        let storage = open_storage(&config.data_directory).await?;

        Self::new(config, Arc::new(store), storage, fetcher)
    }

    pub fn new(
        config: RegistryConfig,
        store: Arc<dyn Store>,
        storage: Arc<dyn Storage>,
        fetcher: Arc<dyn GitFetcher>,
    ) -> Result<Self> {
        for git_provider in &config.git_providers {
            validate_git_provider(git_provider)?;
            store.upsert_git_provider(git_provider)?;
        }
        if let Some(t) = &config.clone_url_template {
            template::validate(t, TemplateKind::GitProvider, Requirements::NONE)?;
        }
        if let Some(t) = &config.browse_url_template {
            template::validate(t, TemplateKind::GitProvider, browse_requirements())?;
        }
        TagFormat::compile(&config.tag_format)?;

        let config = Arc::new(config);
        let indexer = Indexer::new(
            Arc::clone(&config),
            Arc::clone(&store),
            Arc::clone(&storage),
            fetcher,
        )?;

        Ok(Self {
            config,
            store,
            storage,
            indexer,
        })
    }

    #[must_use]
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    // Namespaces

    pub fn create_namespace(&self, req: NewNamespace) -> Result<Namespace> {
        validate_namespace_name(&req.name, &self.config.app_name)?;

        if self.store.get_namespace_by_name(&req.name)?.is_some() {
            return Err(Error::AlreadyExists(format!("namespace '{}'", req.name)));
        }

        let ns = Namespace {
            id: Uuid::new_v4().to_string(),
            name: req.name,
            display_name: req.display_name.filter(|d| !d.trim().is_empty()),
            namespace_type: req.namespace_type,
            created_at: Utc::now(),
        };
        self.store.create_namespace(&ns)?;
        info!(namespace = %ns.name, "namespace created");
        Ok(ns)
    }

    pub fn get_namespace(&self, name: &str) -> Result<Namespace> {
        self.store
            .get_namespace_by_name(name)?
            .ok_or_else(|| Error::not_found(format!("namespace '{name}'")))
    }

    pub fn list_namespaces(&self, cursor: &str, limit: i32) -> Result<Vec<Namespace>> {
        self.store.list_namespaces(cursor, limit)
    }

    pub fn delete_namespace(&self, name: &str) -> Result<()> {
        let ns = self.get_namespace(name)?;

        let providers = self.store.count_namespace_providers(&ns.id)?;
        if providers > 0 {
            return Err(Error::Conflict(format!(
                "namespace '{}' still has {providers} module provider(s)",
                ns.name
            )));
        }

        self.store.delete_namespace(&ns.id)?;
        info!(namespace = %ns.name, "namespace deleted");
        Ok(())
    }

    // Module providers

    pub fn create_module_provider(&self, req: NewModuleProvider) -> Result<ModuleProvider> {
        let ns = self.get_namespace(&req.namespace)?;
        validate_module_name(&req.module)?;
        validate_provider_name(&req.provider)?;
        self.validate_git_config(&req.git)?;
        redirect::ensure_available(self.store.as_ref(), &ns.name, &req.module, &req.provider, None)?;

        let provider = ModuleProvider {
            id: Uuid::new_v4().to_string(),
            namespace_id: ns.id,
            namespace: ns.name,
            module: req.module,
            provider: req.provider,
            verified: req.verified,
            git: req.git,
            created_at: Utc::now(),
        };
        self.store.create_module_provider(&provider)?;
        info!(module = %provider.triple(), "module provider created");
        Ok(provider)
    }

    /// Looks a provider up by any of its identities, current or former.
    pub fn get_module_provider(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
    ) -> Result<ModuleProvider> {
        redirect::require(self.store.as_ref(), namespace, module, provider)
    }

    pub fn list_module_providers(&self, namespace: Option<&str>) -> Result<Vec<ModuleProvider>> {
        match namespace {
            Some(name) => {
                let ns = self.get_namespace(name)?;
                self.store.list_module_providers(Some(&ns.id))
            }
            None => self.store.list_module_providers(None),
        }
    }

    pub fn update_module_provider(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        update: ProviderUpdate,
    ) -> Result<ModuleProvider> {
        let mut current = self.get_module_provider(namespace, module, provider)?;

        if let Some(git) = update.git {
            self.validate_git_config(&git)?;
            current.git = git;
        }
        if let Some(verified) = update.verified {
            current.verified = verified;
        }

        self.store.update_module_provider(&current)?;
        Ok(current)
    }

    /// Deletes the provider's rows, including redirects, then its archives.
    pub async fn delete_module_provider(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
    ) -> Result<()> {
        let current = self.get_module_provider(namespace, module, provider)?;
        let _exclusive = self.indexer.lock_provider(&current)?;
        let versions = self.store.list_module_versions(&current.id)?;

        self.store.delete_module_provider(&current.id)?;

        for version in &versions {
            let dir = version_dir(
                &current.namespace,
                &current.module,
                &current.provider,
                &version.version,
            )?;
            self.storage.delete_directory(&dir).await?;
        }
        let provider_dir = format!(
            "{MODULES_DIR}/{}/{}/{}",
            current.namespace, current.module, current.provider
        );
        if let Err(e) = self.storage.delete_directory(&provider_dir).await {
            warn!(dir = %provider_dir, error = %e, "failed to remove module provider directory");
        }

        info!(module = %current.triple(), versions = versions.len(), "module provider deleted");
        Ok(())
    }

    /// Renames a provider. Archives are copied to the new keys before the
    /// row changes, and the old identity becomes a redirect. Refused with
    /// `Conflict` while any of its versions is being indexed.
    pub async fn move_module_provider(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        target: MoveTarget,
    ) -> Result<ModuleProvider> {
        let old = self.get_module_provider(namespace, module, provider)?;
        let _exclusive = self.indexer.lock_provider(&old)?;
        let ns = self.get_namespace(&target.namespace)?;
        validate_module_name(&target.module)?;
        validate_provider_name(&target.provider)?;

        let mut moved = old.clone();
        moved.namespace_id = ns.id;
        moved.namespace = ns.name;
        moved.module = target.module;
        moved.provider = target.provider;
        if moved.triple() == old.triple() {
            return Ok(old);
        }
        redirect::ensure_available(
            self.store.as_ref(),
            &moved.namespace,
            &moved.module,
            &moved.provider,
            Some(&old.id),
        )?;

        let versions = self.store.list_module_versions(&old.id)?;
        let mut copied = Vec::new();
        for version in &versions {
            for kind in ArchiveKind::ALL {
                let from = archive_path(&old.namespace, &old.module, &old.provider, &version.version, kind)?;
                let to = archive_path(
                    &moved.namespace,
                    &moved.module,
                    &moved.provider,
                    &version.version,
                    kind,
                )?;
                let copy = async {
                    let bytes = self.storage.read(&from).await?;
                    self.storage.write(&to, &bytes).await
                };
                if let Err(e) = copy.await {
                    self.discard(&copied).await;
                    return Err(e);
                }
                copied.push(to);
            }
        }

        let renamed = self
            .store
            .update_module_provider(&moved)
            .and_then(|()| redirect::record_move(self.store.as_ref(), &old, &moved));
        if let Err(e) = renamed {
            self.discard(&copied).await;
            return Err(e);
        }

        for version in &versions {
            let dir = version_dir(&old.namespace, &old.module, &old.provider, &version.version)?;
            if let Err(e) = self.storage.delete_directory(&dir).await {
                warn!(dir = %dir, error = %e, "failed to remove archives at old location");
            }
        }

        info!(from = %old.triple(), to = %moved.triple(), "module provider moved");
        Ok(moved)
    }

    async fn discard(&self, keys: &[String]) {
        for key in keys {
            if let Err(e) = self.storage.delete_file(key).await {
                warn!(key = %key, error = %e, "failed to remove copied archive");
            }
        }
    }

    // Versions

    /// Versions newest first. Unpublished versions are left out unless asked for.
    pub fn list_versions(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        include_unpublished: bool,
    ) -> Result<Vec<ModuleVersion>> {
        let current = self.get_module_provider(namespace, module, provider)?;
        let mut versions = self.store.list_module_versions(&current.id)?;
        if !include_unpublished {
            versions.retain(|v| v.published);
        }
        Ok(versions)
    }

    pub async fn index_version(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        request: &IndexRequest,
        cancel: &CancellationToken,
    ) -> Result<ModuleVersion> {
        let current = self.get_module_provider(namespace, module, provider)?;
        self.indexer.index(&current, request, cancel).await
    }

    pub fn publish_version(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        version: &str,
    ) -> Result<ModuleVersion> {
        let (current, row) = self.find_version(namespace, module, provider, version)?;
        if !row.published {
            self.store.publish_module_version(&row.id, Utc::now())?;
            info!(module = %current.triple(), version = %row.version, "version published");
        }
        self.store
            .get_module_version(&current.id, &row.version)?
            .ok_or_else(|| Error::not_found(format!("version {version} of {}", current.triple())))
    }

    /// Removes the version's rows, then its archives.
    pub async fn delete_version(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        version: &str,
    ) -> Result<()> {
        let (current, row) = self.find_version(namespace, module, provider, version)?;
        let _exclusive = self.indexer.lock_provider(&current)?;
        self.store.delete_module_version(&row.id)?;

        let dir = version_dir(&current.namespace, &current.module, &current.provider, &row.version)?;
        self.storage.delete_directory(&dir).await?;
        info!(module = %current.triple(), version = %row.version, "version deleted");
        Ok(())
    }

    /// Indexes every tag of every provider that matches its tag format and is
    /// not indexed yet. Failures are collected, never retried.
    pub async fn reindex_all(&self, cancel: &CancellationToken) -> Result<ReindexReport> {
        let mut report = ReindexReport::default();

        for current in self.store.list_module_providers(None)? {
            if cancel.is_cancelled() {
                break;
            }
            let failure = |tag: Option<&str>, e: &Error| ReindexFailure {
                module: current.triple(),
                git_tag: tag.map(String::from),
                kind: e.kind(),
                error: e.to_string(),
            };

            let tags = match self.indexer.remote_tags(&current, cancel).await {
                Ok(tags) => tags,
                Err(e) => {
                    report.failed.push(failure(None, &e));
                    continue;
                }
            };
            let format = match tag_format_for(&current, &self.config) {
                Ok(format) => format,
                Err(e) => {
                    report.failed.push(failure(None, &e));
                    continue;
                }
            };

            for tag in tags {
                let Some(version) = format.derive_version(&tag) else {
                    continue;
                };
                if self
                    .store
                    .get_module_version(&current.id, &version.to_string())?
                    .is_some()
                {
                    report.unchanged += 1;
                    continue;
                }
                match self
                    .indexer
                    .index(&current, &IndexRequest::git_tag(tag.clone()), cancel)
                    .await
                {
                    Ok(indexed) => report
                        .indexed
                        .push(format!("{}/{}", current.triple(), indexed.version)),
                    Err(e) => report.failed.push(failure(Some(&tag), &e)),
                }
            }
        }

        info!(
            indexed = report.indexed.len(),
            unchanged = report.unchanged,
            failed = report.failed.len(),
            "re-index finished"
        );
        Ok(report)
    }

    // Reads

    fn find_version(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        version: &str,
    ) -> Result<(ModuleProvider, ModuleVersion)> {
        let current = self.get_module_provider(namespace, module, provider)?;
        let row = self
            .store
            .get_module_version(&current.id, version)?
            .ok_or_else(|| Error::not_found(format!("version {version} of {}", current.triple())))?;
        Ok((current, row))
    }

    /// A published version, or the latest one when `version` is `None`.
    pub fn resolve_version(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        version: Option<&str>,
    ) -> Result<(ModuleProvider, ModuleVersion)> {
        match version {
            Some(v) => {
                let (current, row) = self.find_version(namespace, module, provider, v)?;
                if !row.published {
                    return Err(Error::not_found(format!(
                        "version {v} of {} is not published",
                        current.triple()
                    )));
                }
                Ok((current, row))
            }
            None => {
                let current = self.get_module_provider(namespace, module, provider)?;
                let latest = self.store.latest_version(&current.id)?.ok_or_else(|| {
                    Error::not_found(format!("{} has no published version", current.triple()))
                })?;
                Ok((current, latest))
            }
        }
    }

    pub fn download(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        version: Option<&str>,
    ) -> Result<Download> {
        let (current, row) = self.resolve_version(namespace, module, provider, version)?;

        let source = match self.config.module_hosting {
            ModuleHosting::Allow => DownloadSource::Hosted {
                key: archive_path(
                    &current.namespace,
                    &current.module,
                    &current.provider,
                    &row.version,
                    ArchiveKind::TarGz,
                )?,
            },
            ModuleHosting::Disallow => {
                let git_provider = self.git_provider_of(&current)?;
                let url = clone_url_for(
                    &current,
                    git_provider.as_ref(),
                    self.config.clone_url_template.as_deref(),
                    &row.git_tag,
                    &row.version,
                )?;
                let subdir = current
                    .git
                    .git_path
                    .as_deref()
                    .map(|p| p.trim_matches('/'))
                    .filter(|p| !p.is_empty())
                    .map(|p| format!("//{p}"))
                    .unwrap_or_default();
                DownloadSource::Git {
                    address: format!(
                        "git::{url}{subdir}?ref={}",
                        urlencoding::encode(&row.git_tag)
                    ),
                }
            }
        };

        Ok(Download {
            provider: current,
            version: row,
            source,
        })
    }

    /// Locates a hosted archive. Unavailable when module hosting is disabled.
    pub async fn open_archive(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        version: &str,
        kind: ArchiveKind,
    ) -> Result<ArchiveHandle> {
        if self.config.module_hosting == ModuleHosting::Disallow {
            return Err(Error::not_found("module hosting is disabled"));
        }

        let (current, row) = self.resolve_version(namespace, module, provider, Some(version))?;
        let key = archive_path(
            &current.namespace,
            &current.module,
            &current.provider,
            &row.version,
            kind,
        )?;
        if !self.storage.file_exists(&key).await? {
            return Err(Error::Storage(format!("archive {key} is missing")));
        }
        let size = self.storage.size(&key).await?;

        Ok(ArchiveHandle { key, size, kind })
    }

    pub fn version_details(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        version: Option<&str>,
    ) -> Result<VersionDetails> {
        let (current, row) = self.resolve_version(namespace, module, provider, version)?;

        let details = self
            .store
            .get_module_details(&row.details_id)?
            .ok_or_else(|| Error::Internal(format!("details missing for version {}", row.id)))?;
        let submodules = self
            .store
            .list_child_modules(&row.id, Some(ChildKind::Submodule))?;
        let examples = self.store.list_child_modules(&row.id, Some(ChildKind::Example))?;

        let git_provider = self.git_provider_of(&current)?;
        let source_url = browse_url_for(
            &current,
            git_provider.as_ref(),
            self.config.browse_url_template.as_deref(),
            &row.git_tag,
            current.git.git_path.as_deref().unwrap_or(""),
        )?;

        Ok(VersionDetails {
            provider: current,
            version: row,
            details,
            submodules,
            examples,
            source_url,
        })
    }

    fn child(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        version: &str,
        kind: ChildKind,
        path: &str,
    ) -> Result<ChildModule> {
        let (current, row) = self.resolve_version(namespace, module, provider, Some(version))?;
        let path = path.trim_matches('/');
        self.store
            .get_child_module(&row.id, kind, path)?
            .ok_or_else(|| {
                Error::not_found(format!(
                    "{kind} '{path}' in {}/{}",
                    current.triple(),
                    row.version
                ))
            })
    }

    pub fn submodule_readme(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        version: &str,
        path: &str,
    ) -> Result<String> {
        let child = self.child(namespace, module, provider, version, ChildKind::Submodule, path)?;
        self.store
            .get_module_details(&child.details_id)?
            .and_then(|d| d.readme)
            .ok_or_else(|| Error::not_found(format!("README for submodule '{}'", child.path)))
    }

    pub fn example_files(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
        version: &str,
        path: &str,
    ) -> Result<Vec<ChildFile>> {
        let child = self.child(namespace, module, provider, version, ChildKind::Example, path)?;
        let files = self.store.list_child_files(&child.id)?;
        if files.is_empty() {
            return Err(Error::not_found(format!("files for example '{}'", child.path)));
        }
        Ok(files)
    }

    pub fn search(&self, query: &SearchQuery) -> Result<SearchResult> {
        SearchEngine::new(self.store.as_ref(), &self.config.trusted_namespaces).search(query)
    }

    // Validation helpers

    fn git_provider_of(&self, provider: &ModuleProvider) -> Result<Option<GitProvider>> {
        match &provider.git.git_provider_id {
            Some(id) => self.store.get_git_provider(id),
            None => Ok(None),
        }
    }

    fn validate_git_config(&self, git: &GitConfig) -> Result<()> {
        if let Some(id) = &git.git_provider_id {
            if self.store.get_git_provider(id)?.is_none() {
                return Err(Error::Validation(format!("unknown git provider '{id}'")));
            }
        }
        if let Some(t) = &git.base_url_template {
            template::validate(t, TemplateKind::GitProvider, Requirements::NONE)?;
        }
        if let Some(t) = &git.clone_url_template {
            template::validate(t, TemplateKind::GitProvider, Requirements::NONE)?;
        }
        if let Some(t) = &git.browse_url_template {
            template::validate(t, TemplateKind::GitProvider, browse_requirements())?;
        }
        if let Some(format) = &git.tag_format {
            TagFormat::compile(format)?;
        }
        if let Some(path) = &git.git_path {
            if path.split('/').any(|segment| segment == "..") {
                return Err(Error::Validation(format!(
                    "git path '{path}' must stay inside the repository"
                )));
            }
        }
        Ok(())
    }
}

fn browse_requirements() -> Requirements {
    Requirements {
        tag: true,
        path: true,
        ..Requirements::NONE
    }
}

fn validate_git_provider(git_provider: &GitProvider) -> Result<()> {
    if let Some(t) = &git_provider.base_url_template {
        template::validate(t, TemplateKind::GitProvider, Requirements::NONE)?;
    }
    template::validate(
        &git_provider.clone_url_template,
        TemplateKind::GitProvider,
        Requirements::NONE,
    )?;
    if let Some(t) = &git_provider.browse_url_template {
        template::validate(t, TemplateKind::GitProvider, browse_requirements())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tempfile::TempDir;

    use super::*;
    use crate::git::{FetchOptions, FetchedTree};

    /// Serves fixed trees keyed by tag.
    #[derive(Default)]
    struct TreeFetcher {
        trees: Mutex<HashMap<String, Vec<(&'static str, &'static str)>>>,
    }

    impl TreeFetcher {
        fn with_tag(self, tag: &str, files: Vec<(&'static str, &'static str)>) -> Self {
            self.trees
                .lock()
                .unwrap()
                .insert(tag.to_string(), files);
            self
        }
    }

    #[async_trait]
    impl GitFetcher for TreeFetcher {
        async fn list_tags(
            &self,
            _url: &str,
            _options: &FetchOptions,
            _cancel: &CancellationToken,
        ) -> Result<Vec<String>> {
            let mut tags: Vec<String> = self.trees.lock().unwrap().keys().cloned().collect();
            tags.sort();
            Ok(tags)
        }

        async fn clone_at_tag(
            &self,
            _url: &str,
            tag: &str,
            dest: &Path,
            _options: &FetchOptions,
            _cancel: &CancellationToken,
        ) -> Result<FetchedTree> {
            let files = self.trees.lock().unwrap().get(tag).cloned().unwrap();
            for (path, content) in files {
                let target = dest.join(path);
                std::fs::create_dir_all(target.parent().unwrap()).unwrap();
                std::fs::write(target, content).unwrap();
            }
            Ok(FetchedTree {
                commit_sha: "a".repeat(40),
            })
        }
    }

    fn module_files() -> Vec<(&'static str, &'static str)> {
        vec![
            ("main.tf", "variable \"name\" {}\n\noutput \"id\" {\n  value = 1\n}\n"),
            ("README.md", "# Root\n"),
            ("modules/sub/main.tf", "resource \"null_resource\" \"x\" {}\n"),
            ("modules/sub/README.md", "# Sub\n"),
            ("examples/basic/main.tf", "module \"m\" {\n  source = \"../../\"\n}\n"),
        ]
    }

    async fn registry(dir: &TempDir, fetcher: TreeFetcher) -> Registry {
        let mut config = RegistryConfig::local(dir.path());
        config.clone_url_template = Some("https://git.example.com/{namespace}/{module}.git".into());
        config.browse_url_template =
            Some("https://git.example.com/{namespace}/{module}/tree/{tag}/{path}".into());
        Registry::open(config, Arc::new(fetcher)).await.unwrap()
    }

    fn new_provider(namespace: &str) -> NewModuleProvider {
        NewModuleProvider {
            namespace: namespace.into(),
            module: "vpc".into(),
            provider: "aws".into(),
            ..Default::default()
        }
    }

    fn new_namespace(name: &str) -> NewNamespace {
        NewNamespace {
            name: name.into(),
            display_name: None,
            namespace_type: NamespaceType::None,
        }
    }

    #[tokio::test]
    async fn test_namespace_lifecycle() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, TreeFetcher::default()).await;

        registry.create_namespace(new_namespace("infra")).unwrap();
        let err = registry.create_namespace(new_namespace("INFRA")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);

        let err = registry.create_namespace(new_namespace("x")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidName);

        registry.create_module_provider(new_provider("infra")).unwrap();
        let err = registry.delete_namespace("infra").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        registry.delete_module_provider("infra", "vpc", "aws").await.unwrap();
        registry.delete_namespace("infra").unwrap();
        assert_eq!(
            registry.get_namespace("infra").unwrap_err().kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_module_provider_validation() {
        let dir = TempDir::new().unwrap();
        let registry = registry(&dir, TreeFetcher::default()).await;
        registry.create_namespace(new_namespace("infra")).unwrap();

        let mut bad = new_provider("infra");
        bad.git.tag_format = Some("release-{nope}".into());
        assert_eq!(
            registry.create_module_provider(bad).unwrap_err().kind(),
            ErrorKind::MalformedTemplate
        );

        let mut bad = new_provider("infra");
        bad.git.browse_url_template = Some("https://example.com/{module}".into());
        assert_eq!(
            registry.create_module_provider(bad).unwrap_err().kind(),
            ErrorKind::MissingPlaceholder
        );

        let mut bad = new_provider("infra");
        bad.git.git_provider_id = Some("missing".into());
        assert_eq!(
            registry.create_module_provider(bad).unwrap_err().kind(),
            ErrorKind::Validation
        );

        let mut bad = new_provider("infra");
        bad.git.git_path = Some("../outside".into());
        assert_eq!(
            registry.create_module_provider(bad).unwrap_err().kind(),
            ErrorKind::Validation
        );

        registry.create_module_provider(new_provider("infra")).unwrap();
        assert_eq!(
            registry
                .create_module_provider(new_provider("infra"))
                .unwrap_err()
                .kind(),
            ErrorKind::AlreadyExists
        );
    }

    #[tokio::test]
    async fn test_index_publish_and_read() {
        let dir = TempDir::new().unwrap();
        let fetcher = TreeFetcher::default().with_tag("v1.0.0", module_files());
        let registry = registry(&dir, fetcher).await;
        registry.create_namespace(new_namespace("infra")).unwrap();
        registry.create_module_provider(new_provider("infra")).unwrap();

        let cancel = CancellationToken::new();
        let indexed = registry
            .index_version("infra", "vpc", "aws", &IndexRequest::version("1.0.0"), &cancel)
            .await
            .unwrap();
        assert_eq!(indexed.git_tag, "v1.0.0");
        assert!(!indexed.published);

        // Indexed but unpublished versions are invisible to readers.
        assert!(registry.list_versions("infra", "vpc", "aws", false).unwrap().is_empty());
        assert_eq!(
            registry
                .download("infra", "vpc", "aws", Some("1.0.0"))
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );

        let published = registry.publish_version("infra", "vpc", "aws", "1.0.0").unwrap();
        assert!(published.published);
        assert!(published.published_at.is_some());

        let download = registry.download("infra", "vpc", "aws", None).unwrap();
        assert_eq!(
            download.source,
            DownloadSource::Hosted {
                key: "modules/infra/vpc/aws/1.0.0/source.tar.gz".into()
            }
        );

        let details = registry.version_details("infra", "vpc", "aws", None).unwrap();
        assert_eq!(details.details.readme.as_deref(), Some("# Root\n"));
        assert_eq!(details.submodules.len(), 1);
        assert_eq!(details.examples.len(), 1);
        assert_eq!(
            details.source_url.as_deref(),
            Some("https://git.example.com/infra/vpc/tree/v1.0.0/")
        );

        let readme = registry
            .submodule_readme("infra", "vpc", "aws", "1.0.0", "modules/sub")
            .unwrap();
        assert_eq!(readme, "# Sub\n");
        let files = registry
            .example_files("infra", "vpc", "aws", "1.0.0", "examples/basic")
            .unwrap();
        assert_eq!(files.len(), 1);

        let archive = registry
            .open_archive("infra", "vpc", "aws", "1.0.0", ArchiveKind::Zip)
            .await
            .unwrap();
        assert!(archive.size > 0);
    }

    #[tokio::test]
    async fn test_delete_version_removes_archives() {
        let dir = TempDir::new().unwrap();
        let fetcher = TreeFetcher::default().with_tag("v1.0.0", module_files());
        let registry = registry(&dir, fetcher).await;
        registry.create_namespace(new_namespace("infra")).unwrap();
        registry.create_module_provider(new_provider("infra")).unwrap();
        registry
            .index_version(
                "infra",
                "vpc",
                "aws",
                &IndexRequest::git_tag("v1.0.0"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();

        let dir_key = "modules/infra/vpc/aws/1.0.0";
        assert!(registry.storage().directory_exists(dir_key).await.unwrap());

        registry.delete_version("infra", "vpc", "aws", "1.0.0").await.unwrap();
        assert!(!registry.storage().directory_exists(dir_key).await.unwrap());
        assert!(registry.list_versions("infra", "vpc", "aws", true).unwrap().is_empty());
        assert_eq!(
            registry
                .delete_version("infra", "vpc", "aws", "1.0.0")
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_move_keeps_old_identity_as_redirect() {
        let dir = TempDir::new().unwrap();
        let fetcher = TreeFetcher::default().with_tag("v1.0.0", module_files());
        let registry = registry(&dir, fetcher).await;
        registry.create_namespace(new_namespace("infra")).unwrap();
        registry.create_namespace(new_namespace("platform")).unwrap();
        registry.create_module_provider(new_provider("infra")).unwrap();
        registry
            .index_version(
                "infra",
                "vpc",
                "aws",
                &IndexRequest::version("1.0.0"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        registry.publish_version("infra", "vpc", "aws", "1.0.0").unwrap();

        let moved = registry
            .move_module_provider(
                "infra",
                "vpc",
                "aws",
                MoveTarget {
                    namespace: "platform".into(),
                    module: "network".into(),
                    provider: "aws".into(),
                },
            )
            .await
            .unwrap();
        assert_eq!(moved.triple(), "platform/network/aws");

        let via_old = registry.get_module_provider("infra", "vpc", "aws").unwrap();
        assert_eq!(via_old.id, moved.id);

        let storage = registry.storage();
        assert!(
            storage
                .file_exists("modules/platform/network/aws/1.0.0/source.zip")
                .await
                .unwrap()
        );
        assert!(
            !storage
                .directory_exists("modules/infra/vpc/aws/1.0.0")
                .await
                .unwrap()
        );

        // The old identity is taken by the redirect.
        assert_eq!(
            registry
                .create_module_provider(new_provider("infra"))
                .unwrap_err()
                .kind(),
            ErrorKind::Conflict
        );
    }

    #[tokio::test]
    async fn test_git_download_when_hosting_disallowed() {
        let dir = TempDir::new().unwrap();
        let fetcher = TreeFetcher::default().with_tag("v2.1.0", module_files());
        let mut config = RegistryConfig::local(dir.path());
        config.module_hosting = ModuleHosting::Disallow;
        config.clone_url_template = Some("https://git.example.com/{namespace}/{module}.git".into());
        let registry = Registry::open(config, Arc::new(fetcher)).await.unwrap();
        registry.create_namespace(new_namespace("infra")).unwrap();
        let mut req = new_provider("infra");
        req.git.git_path = Some("/modules/sub".into());
        registry.create_module_provider(req).unwrap();

        registry
            .index_version(
                "infra",
                "vpc",
                "aws",
                &IndexRequest::version("2.1.0"),
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        registry.publish_version("infra", "vpc", "aws", "2.1.0").unwrap();

        let download = registry.download("infra", "vpc", "aws", Some("2.1.0")).unwrap();
        assert_eq!(
            download.source,
            DownloadSource::Git {
                address: "git::https://git.example.com/infra/vpc.git//modules/sub?ref=v2.1.0".into()
            }
        );
        assert_eq!(
            registry
                .open_archive("infra", "vpc", "aws", "2.1.0", ArchiveKind::TarGz)
                .await
                .unwrap_err()
                .kind(),
            ErrorKind::NotFound
        );
    }

    #[tokio::test]
    async fn test_reindex_all_picks_up_new_tags() {
        let dir = TempDir::new().unwrap();
        let fetcher = TreeFetcher::default()
            .with_tag("v1.0.0", module_files())
            .with_tag("v1.1.0", module_files())
            .with_tag("nightly", module_files());
        let registry = registry(&dir, fetcher).await;
        registry.create_namespace(new_namespace("infra")).unwrap();
        registry.create_module_provider(new_provider("infra")).unwrap();
        let cancel = CancellationToken::new();
        registry
            .index_version("infra", "vpc", "aws", &IndexRequest::version("1.0.0"), &cancel)
            .await
            .unwrap();

        let report = registry.reindex_all(&cancel).await.unwrap();
        assert_eq!(report.indexed, vec!["infra/vpc/aws/1.1.0".to_string()]);
        assert_eq!(report.unchanged, 1);
        assert!(report.failed.is_empty());
    }
}
