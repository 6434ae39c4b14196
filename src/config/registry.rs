use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::template::GitCredentials;
use crate::types::GitProvider;

pub const DEFAULT_APP_NAME: &str = "terrace";
pub const DEFAULT_TAG_FORMAT: &str = "v{version}";
pub const DEFAULT_MAX_CONCURRENT_INDEXERS: usize = 4;
const DATABASE_FILE: &str = "terrace.db";

/// Where module archives live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageLocation {
    Local(PathBuf),
    S3 { bucket: String, prefix: String },
}

impl FromStr for StorageLocation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::Config("data directory cannot be empty".to_string()));
        }

        let Some(rest) = s.strip_prefix("s3://") else {
            return Ok(Self::Local(PathBuf::from(s)));
        };

        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(Error::Config(format!("missing bucket in {s}")));
        }

        Ok(Self::S3 {
            bucket: bucket.to_string(),
            prefix: prefix.trim_matches('/').to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModuleHosting {
    /// Serve the stored archives directly.
    #[default]
    Allow,
    /// Point Terraform at the git source instead of stored archives.
    Disallow,
}

impl FromStr for ModuleHosting {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" | "true" => Ok(Self::Allow),
            "disallow" | "false" => Ok(Self::Disallow),
            other => Err(Error::Config(format!("invalid module hosting mode: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub clone: Duration,
    pub checkout: Duration,
    pub analyze: Duration,
    pub package: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            clone: Duration::from_secs(10 * 60),
            checkout: Duration::from_secs(2 * 60),
            analyze: Duration::from_secs(60),
            package: Duration::from_secs(5 * 60),
        }
    }
}

/// Immutable registry configuration, built once and handed to constructors.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub data_directory: StorageLocation,
    pub database_path: PathBuf,
    pub scratch_directory: PathBuf,
    pub trusted_namespaces: Vec<String>,
    pub admin_token: Option<String>,
    pub git_credentials: Option<GitCredentials>,
    pub module_hosting: ModuleHosting,
    pub app_name: String,
    pub max_concurrent_indexers: usize,
    pub timeouts: Timeouts,
    pub clone_url_template: Option<String>,
    pub browse_url_template: Option<String>,
    pub tag_format: String,
    pub archive_ignore: Vec<String>,
    pub git_providers: Vec<GitProvider>,
}

impl RegistryConfig {
    /// Configuration rooted at a local data directory with every other setting defaulted.
    #[must_use]
    pub fn local(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        Self {
            database_path: data_dir.join(DATABASE_FILE),
            scratch_directory: data_dir.join("scratch"),
            data_directory: StorageLocation::Local(data_dir),
            trusted_namespaces: Vec::new(),
            admin_token: None,
            git_credentials: None,
            module_hosting: ModuleHosting::Allow,
            app_name: DEFAULT_APP_NAME.to_string(),
            max_concurrent_indexers: DEFAULT_MAX_CONCURRENT_INDEXERS,
            timeouts: Timeouts::default(),
            clone_url_template: None,
            browse_url_template: None,
            tag_format: DEFAULT_TAG_FORMAT.to_string(),
            archive_ignore: Vec::new(),
            git_providers: Vec::new(),
        }
    }

    /// Loads the optional TOML file, then applies process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let contents = match path {
            Some(p) => Some(std::fs::read_to_string(p).map_err(|e| {
                Error::Config(format!("failed to read {}: {e}", p.display()))
            })?),
            None => None,
        };
        Self::from_sources(contents.as_deref(), |key| std::env::var(key).ok())
    }

    pub fn from_sources<F>(file: Option<&str>, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file: ConfigFile = match file {
            Some(contents) => toml::from_str(contents)
                .map_err(|e| Error::Config(format!("invalid config file: {e}")))?,
            None => ConfigFile::default(),
        };

        let data_directory: StorageLocation = env("DATA_DIRECTORY")
            .or(file.data_directory)
            .unwrap_or_else(|| "./data".to_string())
            .parse()?;

        let mut config = match &data_directory {
            StorageLocation::Local(path) => Self::local(path.clone()),
            StorageLocation::S3 { .. } => {
                let mut config = Self::local("./data");
                config.database_path = PathBuf::from(DATABASE_FILE);
                config.scratch_directory = std::env::temp_dir().join(DEFAULT_APP_NAME);
                config.data_directory = data_directory.clone();
                config
            }
        };

        if let Some(path) = env("DATABASE_PATH").or(file.database_path) {
            config.database_path = PathBuf::from(path);
        }
        if let Some(path) = env("SCRATCH_DIRECTORY").or(file.scratch_directory) {
            config.scratch_directory = PathBuf::from(path);
        }
        if let Some(list) = env("TRUSTED_NAMESPACES") {
            config.trusted_namespaces = split_list(&list);
        } else if let Some(list) = file.trusted_namespaces {
            config.trusted_namespaces = list;
        }

        config.admin_token = env("ADMIN_AUTHENTICATION_TOKEN")
            .or(file.admin_authentication_token)
            .filter(|t| !t.is_empty());

        let username = env("GIT_USERNAME").or(file.git_username);
        let password = env("GIT_PASSWORD").or(file.git_password);
        config.git_credentials = match (username, password) {
            (Some(username), Some(password)) => Some(GitCredentials { username, password }),
            (None, None) => None,
            _ => {
                return Err(Error::Config(
                    "GIT_USERNAME and GIT_PASSWORD must be set together".to_string(),
                ));
            }
        };

        if let Some(mode) = env("ALLOW_MODULE_HOSTING") {
            config.module_hosting = mode.parse()?;
        } else if let Some(mode) = file.module_hosting {
            config.module_hosting = mode;
        }

        if let Some(name) = env("APPLICATION_NAME").or(file.app_name) {
            config.app_name = name;
        }

        if let Some(n) = env("MAX_CONCURRENT_INDEXERS") {
            config.max_concurrent_indexers = n
                .parse()
                .map_err(|_| Error::Config(format!("invalid MAX_CONCURRENT_INDEXERS: {n}")))?;
        } else if let Some(n) = file.max_concurrent_indexers {
            config.max_concurrent_indexers = n;
        }
        if config.max_concurrent_indexers == 0 {
            return Err(Error::Config(
                "max_concurrent_indexers must be at least 1".to_string(),
            ));
        }

        if let Some(t) = file.timeouts {
            let defaults = Timeouts::default();
            config.timeouts = Timeouts {
                clone: t.clone_secs.map_or(defaults.clone, Duration::from_secs),
                checkout: t.checkout_secs.map_or(defaults.checkout, Duration::from_secs),
                analyze: t.analyze_secs.map_or(defaults.analyze, Duration::from_secs),
                package: t.package_secs.map_or(defaults.package, Duration::from_secs),
            };
        }

        config.clone_url_template = env("GIT_CLONE_URL_TEMPLATE").or(file.clone_url_template);
        config.browse_url_template = env("GIT_BROWSE_URL_TEMPLATE").or(file.browse_url_template);
        if let Some(format) = env("TAG_FORMAT").or(file.tag_format) {
            config.tag_format = format;
        }
        config.archive_ignore = file.archive_ignore.unwrap_or_default();
        config.git_providers = file.git_providers.unwrap_or_default();

        Ok(config)
    }

    #[must_use]
    pub fn is_trusted(&self, namespace: &str) -> bool {
        self.trusted_namespaces
            .iter()
            .any(|t| t.eq_ignore_ascii_case(namespace))
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    data_directory: Option<String>,
    database_path: Option<String>,
    scratch_directory: Option<String>,
    trusted_namespaces: Option<Vec<String>>,
    admin_authentication_token: Option<String>,
    git_username: Option<String>,
    git_password: Option<String>,
    module_hosting: Option<ModuleHosting>,
    app_name: Option<String>,
    max_concurrent_indexers: Option<usize>,
    timeouts: Option<TimeoutsFile>,
    clone_url_template: Option<String>,
    browse_url_template: Option<String>,
    tag_format: Option<String>,
    archive_ignore: Option<Vec<String>>,
    git_providers: Option<Vec<GitProvider>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TimeoutsFile {
    clone_secs: Option<u64>,
    checkout_secs: Option<u64>,
    analyze_secs: Option<u64>,
    package_secs: Option<u64>,
}
