use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::VariableTemplate;
use crate::error::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NamespaceType {
    #[default]
    None,
    User,
    Organisation,
}

impl NamespaceType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "NONE",
            Self::User => "USER",
            Self::Organisation => "ORGANISATION",
        }
    }
}

impl FromStr for NamespaceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "NONE" => Ok(Self::None),
            "USER" => Ok(Self::User),
            "ORGANISATION" | "ORGANIZATION" => Ok(Self::Organisation),
            other => Err(Error::Validation(format!("unknown namespace type: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Namespace {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    pub namespace_type: NamespaceType,
    pub created_at: DateTime<Utc>,
}

/// URL templates for a hosting service such as GitHub or a private GitLab.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitProvider {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url_template: Option<String>,
    pub clone_url_template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub browse_url_template: Option<String>,
}

/// Per-provider git overrides. Unset fields fall back to the git provider,
/// then to the registry defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_provider_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clone_url_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub browse_url_template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_path: Option<String>,
    #[serde(default)]
    pub archive_git_path: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleProvider {
    pub id: String,
    pub namespace_id: String,
    /// Namespace name, joined in for display and path building.
    pub namespace: String,
    pub module: String,
    pub provider: String,
    pub verified: bool,
    #[serde(flatten)]
    pub git: GitConfig,
    pub created_at: DateTime<Utc>,
}

impl ModuleProvider {
    #[must_use]
    pub fn triple(&self) -> String {
        format!("{}/{}/{}", self.namespace, self.module, self.provider)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionState {
    Indexed,
    Published,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleVersion {
    pub id: String,
    pub provider_id: String,
    pub version: String,
    pub published: bool,
    pub beta: bool,
    pub git_tag: String,
    pub commit_sha: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub indexed_at: DateTime<Utc>,
    pub details_id: String,
    pub tar_sha256: String,
    pub zip_sha256: String,
}

impl ModuleVersion {
    #[must_use]
    pub fn state(&self) -> VersionState {
        if self.published {
            VersionState::Published
        } else {
            VersionState::Indexed
        }
    }

    /// Parsed semantic version. Rows are only ever written with canonical versions.
    #[must_use]
    pub fn semver(&self) -> Option<semver::Version> {
        semver::Version::parse(&self.version).ok()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModuleDetails {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub readme: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variable_template: Option<VariableTemplate>,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub resources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terraform_version: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChildKind {
    Submodule,
    Example,
}

impl ChildKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Submodule => "submodule",
            Self::Example => "example",
        }
    }
}

impl FromStr for ChildKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "submodule" => Ok(Self::Submodule),
            "example" => Ok(Self::Example),
            other => Err(Error::Internal(format!("unknown child kind: {other}"))),
        }
    }
}

impl fmt::Display for ChildKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A submodule or example directory belonging to a module version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildModule {
    pub id: String,
    pub version_id: String,
    pub kind: ChildKind,
    pub path: String,
    pub details_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChildFile {
    pub child_id: String,
    pub path: String,
    #[serde(skip)]
    pub content: Vec<u8>,
    pub is_binary: bool,
}

impl ChildFile {
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        if self.is_binary {
            None
        } else {
            std::str::from_utf8(&self.content).ok()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Redirect {
    pub id: String,
    pub namespace: String,
    pub module: String,
    pub provider: String,
    pub provider_id: String,
    pub created_at: DateTime<Utc>,
}
