use clap::{Args, Subcommand};

use super::ModuleId;

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Manage namespaces
    Namespace {
        #[command(subcommand)]
        command: NamespaceCommands,
    },

    /// Manage module providers
    Module {
        #[command(subcommand)]
        command: ModuleCommands,
    },

    /// Index, publish and delete module versions
    Version {
        #[command(subcommand)]
        command: VersionCommands,
    },

    /// Index every remote tag not yet in the registry
    Reindex,
}

#[derive(Subcommand)]
pub enum NamespaceCommands {
    /// Create a namespace
    Create {
        name: String,

        #[arg(long)]
        display_name: Option<String>,

        /// NONE, USER or ORGANISATION
        #[arg(long = "type", default_value = "NONE")]
        namespace_type: String,
    },

    /// Delete an empty namespace
    Delete { name: String },

    /// List namespaces
    List,
}

#[derive(Args, Default)]
pub struct GitArgs {
    /// Id of a configured git provider
    #[arg(long)]
    pub git_provider_id: Option<String>,

    #[arg(long)]
    pub base_url_template: Option<String>,

    #[arg(long)]
    pub clone_url_template: Option<String>,

    #[arg(long)]
    pub browse_url_template: Option<String>,

    /// Tag format such as "v{version}"
    #[arg(long)]
    pub tag_format: Option<String>,

    /// Module root inside the repository
    #[arg(long)]
    pub git_path: Option<String>,

    /// Package only the git path instead of the whole repository
    #[arg(long)]
    pub archive_git_path: bool,
}

#[derive(Subcommand)]
pub enum ModuleCommands {
    /// Create a module provider
    Create {
        /// namespace/module/provider
        module: ModuleId,

        #[arg(long)]
        verified: bool,

        #[command(flatten)]
        git: GitArgs,
    },

    /// Show a module provider
    Show { module: ModuleId },

    /// List module providers
    List {
        #[arg(long)]
        namespace: Option<String>,
    },

    /// Change git configuration or the verified flag
    Update {
        module: ModuleId,

        #[arg(long)]
        verified: Option<bool>,

        /// Replace the git configuration with the given flags
        #[arg(long)]
        replace_git: bool,

        #[command(flatten)]
        git: GitArgs,
    },

    /// Delete a module provider with all of its versions
    Delete { module: ModuleId },

    /// Rename a module provider, keeping the old name as a redirect
    Move {
        module: ModuleId,

        /// New namespace/module/provider
        #[arg(long)]
        to: ModuleId,
    },
}

#[derive(Subcommand)]
pub enum VersionCommands {
    /// Index a version from its git tag
    Index {
        module: ModuleId,

        #[arg(long)]
        version: Option<String>,

        #[arg(long)]
        git_tag: Option<String>,
    },

    /// Publish an indexed version
    Publish { module: ModuleId, version: String },

    /// Delete a version and its archives
    Delete { module: ModuleId, version: String },

    /// List versions, newest first
    List {
        module: ModuleId,

        /// Include unpublished versions
        #[arg(long)]
        all: bool,
    },
}
