mod schema;
mod sqlite;

pub use sqlite::SqliteStore;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::*;
use crate::version::latest_published;

/// Everything written for one indexed version, persisted atomically.
#[derive(Debug, Clone)]
pub struct VersionRecord {
    pub version: ModuleVersion,
    pub details: ModuleDetails,
    pub children: Vec<ChildRecord>,
}

#[derive(Debug, Clone)]
pub struct ChildRecord {
    pub child: ChildModule,
    pub details: ModuleDetails,
    pub files: Vec<ChildFile>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Name,
    Namespace,
    Provider,
    CreatedAt,
    Verified,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

/// Predicates the repository can evaluate in SQL. Lists are OR-ed within a
/// field and AND-ed across fields; an empty list means "any".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProviderFilter {
    /// Whitespace-separated terms; each must match the namespace, module or provider.
    pub query: Option<String>,
    pub namespaces: Vec<String>,
    pub providers: Vec<String>,
    pub verified: Option<bool>,
    /// Namespace must be one of these (case-insensitive).
    pub namespace_in: Option<Vec<String>>,
    /// Namespace must not be one of these (case-insensitive).
    pub namespace_not_in: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: Option<u32>,
    pub offset: u32,
    pub sort: SortField,
    pub direction: SortDirection,
}

impl PageRequest {
    pub const ALL: Self = Self {
        limit: None,
        offset: 0,
        sort: SortField::Name,
        direction: SortDirection::Asc,
    };
}

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Namespace operations
    fn create_namespace(&self, ns: &Namespace) -> Result<()>;
    fn get_namespace(&self, id: &str) -> Result<Option<Namespace>>;
    /// Case-insensitive.
    fn get_namespace_by_name(&self, name: &str) -> Result<Option<Namespace>>;
    fn list_namespaces(&self, cursor: &str, limit: i32) -> Result<Vec<Namespace>>;
    fn delete_namespace(&self, id: &str) -> Result<bool>;
    fn count_namespace_providers(&self, namespace_id: &str) -> Result<i64>;

    // Git provider operations
    fn upsert_git_provider(&self, provider: &GitProvider) -> Result<()>;
    fn get_git_provider(&self, id: &str) -> Result<Option<GitProvider>>;
    fn list_git_providers(&self) -> Result<Vec<GitProvider>>;

    // Module provider operations
    fn create_module_provider(&self, provider: &ModuleProvider) -> Result<()>;
    fn get_module_provider(&self, id: &str) -> Result<Option<ModuleProvider>>;
    fn find_module_provider(
        &self,
        namespace: &str,
        module: &str,
        provider: &str,
    ) -> Result<Option<ModuleProvider>>;
    fn list_module_providers(&self, namespace_id: Option<&str>) -> Result<Vec<ModuleProvider>>;
    /// Rewrites identity, git configuration and the verified flag.
    fn update_module_provider(&self, provider: &ModuleProvider) -> Result<()>;
    /// Deletes the provider with its versions, children, details and redirects.
    fn delete_module_provider(&self, id: &str) -> Result<bool>;
    /// Matching rows for one page plus the count before pagination.
    fn search_module_providers(
        &self,
        filter: &ProviderFilter,
        page: &PageRequest,
    ) -> Result<(Vec<ModuleProvider>, u64)>;

    // Module version operations
    fn get_module_version(&self, provider_id: &str, version: &str)
    -> Result<Option<ModuleVersion>>;
    fn get_module_version_by_tag(
        &self,
        provider_id: &str,
        git_tag: &str,
    ) -> Result<Option<ModuleVersion>>;
    fn list_module_versions(&self, provider_id: &str) -> Result<Vec<ModuleVersion>>;
    /// Inserts the version, its details and children in one transaction.
    fn persist_indexed_version(&self, record: &VersionRecord) -> Result<()>;
    fn publish_module_version(&self, id: &str, at: DateTime<Utc>) -> Result<bool>;
    fn delete_module_version(&self, id: &str) -> Result<bool>;

    /// Highest published non-beta version.
    fn latest_version(&self, provider_id: &str) -> Result<Option<ModuleVersion>> {
        let versions = self.list_module_versions(provider_id)?;
        Ok(latest_published(&versions).cloned())
    }

    // Details and child module operations
    fn get_module_details(&self, id: &str) -> Result<Option<ModuleDetails>>;
    fn list_child_modules(
        &self,
        version_id: &str,
        kind: Option<ChildKind>,
    ) -> Result<Vec<ChildModule>>;
    fn get_child_module(
        &self,
        version_id: &str,
        kind: ChildKind,
        path: &str,
    ) -> Result<Option<ChildModule>>;
    fn list_child_files(&self, child_id: &str) -> Result<Vec<ChildFile>>;

    // Redirect operations
    fn create_redirect(&self, redirect: &Redirect) -> Result<()>;
    fn find_redirect(&self, namespace: &str, module: &str, provider: &str)
    -> Result<Option<Redirect>>;
    fn list_redirects(&self, provider_id: &str) -> Result<Vec<Redirect>>;
    fn delete_redirect(&self, id: &str) -> Result<bool>;
}
