//! # Terrace
//!
//! A self-hosted Terraform module registry, usable both as a standalone binary
//! and as a library.
//!
//! Module versions are indexed from git tags: the tree at the tag is cloned
//! into scratch space, analyzed for variables, outputs, submodules and
//! examples, packaged as `source.tar.gz` and `source.zip`, and only then
//! recorded in the database.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! terrace = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use terrace::config::RegistryConfig;
//! use terrace::git::GitCommandFetcher;
//! use terrace::registry::Registry;
//! use terrace::server::{AppState, create_router};
//!
//! let config = RegistryConfig::local("./data");
//! let registry = Registry::open(config, Arc::new(GitCommandFetcher::default())).await?;
//!
//! let state = Arc::new(AppState {
//!     registry: Arc::new(registry),
//!     public_base_url: None,
//! });
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes the admin CLI module. Disable with `default-features = false`.
//! - `s3`: Stores archives in S3 when the data directory is an `s3://` URL.

pub mod analyzer;
pub mod archive;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod git;
pub mod indexer;
pub mod redirect;
pub mod registry;
pub mod scratch;
pub mod search;
pub mod server;
pub mod storage;
pub mod store;
pub mod template;
pub mod types;
pub mod version;
