use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::indexer::IndexRequest;
use crate::registry::Registry;

use super::{VersionCommands, print_json};

pub async fn run(registry: &Registry, command: VersionCommands) -> Result<()> {
    match command {
        VersionCommands::Index {
            module,
            version,
            git_tag,
        } => {
            let cancel = CancellationToken::new();
            let request = IndexRequest { version, git_tag };

            // Ctrl-C cancels the clone and cleans up scratch space.
            let indexing = registry.index_version(
                &module.namespace,
                &module.module,
                &module.provider,
                &request,
                &cancel,
            );
            tokio::pin!(indexing);
            let indexed = tokio::select! {
                result = &mut indexing => result?,
                _ = tokio::signal::ctrl_c() => {
                    cancel.cancel();
                    indexing.await?
                }
            };
            print_json(&indexed)
        }
        VersionCommands::Publish { module, version } => {
            let published = registry.publish_version(
                &module.namespace,
                &module.module,
                &module.provider,
                &version,
            )?;
            print_json(&published)
        }
        VersionCommands::Delete { module, version } => {
            registry
                .delete_version(&module.namespace, &module.module, &module.provider, &version)
                .await?;
            print_json(&json!({ "deleted": format!("{module}/{version}") }))
        }
        VersionCommands::List { module, all } => {
            let versions =
                registry.list_versions(&module.namespace, &module.module, &module.provider, all)?;
            print_json(&versions)
        }
    }
}
