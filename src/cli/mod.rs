mod commands;
mod module;
mod namespace;
mod version;

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

pub use commands::{AdminCommands, GitArgs, ModuleCommands, NamespaceCommands, VersionCommands};

use crate::config::RegistryConfig;
use crate::error::{Error, Result};
use crate::git::GitCommandFetcher;
use crate::registry::Registry;

/// A `namespace/module/provider` argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleId {
    pub namespace: String,
    pub module: String,
    pub provider: String,
}

impl FromStr for ModuleId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.split('/').collect::<Vec<_>>().as_slice() {
            [namespace, module, provider]
                if !namespace.is_empty() && !module.is_empty() && !provider.is_empty() =>
            {
                Ok(Self {
                    namespace: (*namespace).to_string(),
                    module: (*module).to_string(),
                    provider: (*provider).to_string(),
                })
            }
            _ => Err(format!("expected namespace/module/provider, got '{s}'")),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.module, self.provider)
    }
}

/// Opens the registry described by the config file and environment.
pub async fn open_registry(config_path: Option<&Path>) -> Result<Registry> {
    let config = RegistryConfig::load(config_path)?;
    Registry::open(config, Arc::new(GitCommandFetcher::default())).await
}

pub async fn run_admin(config_path: Option<&Path>, command: AdminCommands) -> Result<()> {
    let registry = open_registry(config_path).await?;

    match command {
        AdminCommands::Namespace { command } => namespace::run(&registry, command),
        AdminCommands::Module { command } => module::run(&registry, command).await,
        AdminCommands::Version { command } => version::run(&registry, command).await,
        AdminCommands::Reindex => {
            let cancel = CancellationToken::new();
            let report = registry.reindex_all(&cancel).await?;
            print_json(&report)
        }
    }
}

pub(crate) fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let out = serde_json::to_string_pretty(value)
        .map_err(|e| Error::Internal(format!("failed to encode output: {e}")))?;
    println!("{out}");
    Ok(())
}

/// Writes the error as JSON to stderr.
pub fn report_error(err: &Error) {
    let mut body = json!({ "error": err.to_string(), "kind": err.kind() });
    if let Error::Index(e) = err {
        body["triple"] = json!(e.triple);
    }
    eprintln!("{body}");
}
