#![allow(dead_code)]

pub mod fake_git;

use std::sync::Arc;

use tempfile::TempDir;
use terrace::config::RegistryConfig;
use terrace::registry::{NewModuleProvider, NewNamespace, Registry};
use terrace::types::{GitConfig, ModuleProvider, NamespaceType};

pub use fake_git::FakeGitFetcher;

pub const CLONE_URL: &str = "https://git.example.com/{namespace}/{module}-{provider}.git";

/// A registry on a fresh temp dir. The temp dir must outlive the registry.
pub async fn test_registry(
    fetcher: Arc<FakeGitFetcher>,
    configure: impl FnOnce(&mut RegistryConfig),
) -> (TempDir, Registry) {
    let dir = TempDir::new().expect("create temp dir");
    let mut config = RegistryConfig::local(dir.path().join("data"));
    config.scratch_directory = dir.path().join("scratch");
    config.clone_url_template = Some(CLONE_URL.to_string());
    configure(&mut config);

    let registry = Registry::open(config, fetcher)
        .await
        .expect("open registry");
    (dir, registry)
}

pub fn create_provider(
    registry: &Registry,
    namespace: &str,
    module: &str,
    provider: &str,
    git: GitConfig,
) -> ModuleProvider {
    if registry.get_namespace(namespace).is_err() {
        registry
            .create_namespace(NewNamespace {
                name: namespace.to_string(),
                display_name: None,
                namespace_type: NamespaceType::None,
            })
            .expect("create namespace");
    }
    registry
        .create_module_provider(NewModuleProvider {
            namespace: namespace.to_string(),
            module: module.to_string(),
            provider: provider.to_string(),
            verified: false,
            git,
        })
        .expect("create module provider")
}

/// A small module with one submodule and one example.
pub fn module_tree() -> Vec<(&'static str, &'static str)> {
    vec![
        (
            "main.tf",
            "terraform {\n  required_version = \">= 1.3\"\n}\n\nvariable \"cidr\" {\n  description = \"VPC CIDR\"\n}\n\nresource \"aws_vpc\" \"this\" {\n  cidr_block = var.cidr\n}\n\noutput \"vpc_id\" {\n  value = aws_vpc.this.id\n}\n",
        ),
        ("README.md", "# VPC\n\nCreates a VPC.\n"),
        (
            "modules/subnets/main.tf",
            "variable \"vpc_id\" {}\n\nresource \"aws_subnet\" \"this\" {\n  vpc_id = var.vpc_id\n}\n",
        ),
        ("modules/subnets/README.md", "# Subnets\n"),
        (
            "examples/complete/main.tf",
            "module \"vpc\" {\n  source = \"../../\"\n  cidr   = \"10.0.0.0/16\"\n}\n",
        ),
    ]
}
