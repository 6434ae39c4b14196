use serde_json::json;

use crate::error::Result;
use crate::registry::{MoveTarget, NewModuleProvider, ProviderUpdate, Registry};
use crate::types::GitConfig;

use super::{GitArgs, ModuleCommands, print_json};

impl GitArgs {
    fn is_empty(&self) -> bool {
        self.git_provider_id.is_none()
            && self.base_url_template.is_none()
            && self.clone_url_template.is_none()
            && self.browse_url_template.is_none()
            && self.tag_format.is_none()
            && self.git_path.is_none()
            && !self.archive_git_path
    }

    fn into_config(self) -> GitConfig {
        GitConfig {
            git_provider_id: self.git_provider_id,
            base_url_template: self.base_url_template,
            clone_url_template: self.clone_url_template,
            browse_url_template: self.browse_url_template,
            tag_format: self.tag_format,
            git_path: self.git_path,
            archive_git_path: self.archive_git_path,
        }
    }

    /// Overlays the flags that were given onto `current`.
    fn merge_into(self, mut current: GitConfig) -> GitConfig {
        if self.git_provider_id.is_some() {
            current.git_provider_id = self.git_provider_id;
        }
        if self.base_url_template.is_some() {
            current.base_url_template = self.base_url_template;
        }
        if self.clone_url_template.is_some() {
            current.clone_url_template = self.clone_url_template;
        }
        if self.browse_url_template.is_some() {
            current.browse_url_template = self.browse_url_template;
        }
        if self.tag_format.is_some() {
            current.tag_format = self.tag_format;
        }
        if self.git_path.is_some() {
            current.git_path = self.git_path;
        }
        if self.archive_git_path {
            current.archive_git_path = true;
        }
        current
    }
}

pub async fn run(registry: &Registry, command: ModuleCommands) -> Result<()> {
    match command {
        ModuleCommands::Create {
            module,
            verified,
            git,
        } => {
            let provider = registry.create_module_provider(NewModuleProvider {
                namespace: module.namespace,
                module: module.module,
                provider: module.provider,
                verified,
                git: git.into_config(),
            })?;
            print_json(&provider)
        }
        ModuleCommands::Show { module } => {
            let provider =
                registry.get_module_provider(&module.namespace, &module.module, &module.provider)?;
            print_json(&provider)
        }
        ModuleCommands::List { namespace } => {
            let providers = registry.list_module_providers(namespace.as_deref())?;
            print_json(&providers)
        }
        ModuleCommands::Update {
            module,
            verified,
            replace_git,
            git,
        } => {
            let git = if replace_git {
                Some(git.into_config())
            } else if git.is_empty() {
                None
            } else {
                let current = registry.get_module_provider(
                    &module.namespace,
                    &module.module,
                    &module.provider,
                )?;
                Some(git.merge_into(current.git))
            };

            let provider = registry.update_module_provider(
                &module.namespace,
                &module.module,
                &module.provider,
                ProviderUpdate { git, verified },
            )?;
            print_json(&provider)
        }
        ModuleCommands::Delete { module } => {
            registry
                .delete_module_provider(&module.namespace, &module.module, &module.provider)
                .await?;
            print_json(&json!({ "deleted": module.to_string() }))
        }
        ModuleCommands::Move { module, to } => {
            let moved = registry
                .move_module_provider(
                    &module.namespace,
                    &module.module,
                    &module.provider,
                    MoveTarget {
                        namespace: to.namespace,
                        module: to.module,
                        provider: to.provider,
                    },
                )
                .await?;
            print_json(&moved)
        }
    }
}
