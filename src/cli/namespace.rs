use crate::error::Result;
use crate::registry::{NewNamespace, Registry};

use super::{NamespaceCommands, print_json};

pub fn run(registry: &Registry, command: NamespaceCommands) -> Result<()> {
    match command {
        NamespaceCommands::Create {
            name,
            display_name,
            namespace_type,
        } => {
            let ns = registry.create_namespace(NewNamespace {
                name,
                display_name,
                namespace_type: namespace_type.parse()?,
            })?;
            print_json(&ns)
        }
        NamespaceCommands::Delete { name } => {
            registry.delete_namespace(&name)?;
            print_json(&serde_json::json!({ "deleted": name }))
        }
        NamespaceCommands::List => {
            let mut all = Vec::new();
            let mut cursor = String::new();
            loop {
                let page = registry.list_namespaces(&cursor, 100)?;
                let Some(last) = page.last() else {
                    break;
                };
                cursor = last.name.clone();
                all.extend(page);
            }
            print_json(&all)
        }
    }
}
