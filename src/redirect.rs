//! Resolution of `(namespace, module, provider)` triples, following the
//! redirects left behind when a module provider is moved.

use chrono::Utc;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{ModuleProvider, Redirect};

/// A provider found for a requested triple.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub provider: ModuleProvider,
    /// Set when the triple was an old identity of the provider.
    pub via: Option<Redirect>,
}

impl Resolved {
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        self.via.is_some()
    }
}

/// Direct lookup first, then the redirect table.
pub fn resolve(
    store: &dyn Store,
    namespace: &str,
    module: &str,
    provider: &str,
) -> Result<Option<Resolved>> {
    if let Some(found) = store.find_module_provider(namespace, module, provider)? {
        return Ok(Some(Resolved {
            provider: found,
            via: None,
        }));
    }

    let Some(redirect) = store.find_redirect(namespace, module, provider)? else {
        return Ok(None);
    };

    match store.get_module_provider(&redirect.provider_id)? {
        Some(found) => {
            tracing::debug!(
                from = %format!("{namespace}/{module}/{provider}"),
                to = %found.triple(),
                "followed module provider redirect"
            );
            Ok(Some(Resolved {
                provider: found,
                via: Some(redirect),
            }))
        }
        // Redirects cascade with their provider, so this is a dangling row.
        None => Err(Error::Internal(format!(
            "redirect {} points at missing provider {}",
            redirect.id, redirect.provider_id
        ))),
    }
}

/// Like [`resolve`], but a miss is `NotFound`.
pub fn require(
    store: &dyn Store,
    namespace: &str,
    module: &str,
    provider: &str,
) -> Result<ModuleProvider> {
    resolve(store, namespace, module, provider)?
        .map(|r| r.provider)
        .ok_or_else(|| Error::not_found(format!("module provider {namespace}/{module}/{provider}")))
}

/// Records `old` as a former identity of `provider`, after the provider row
/// has been renamed. Every redirect points straight at a provider id, so
/// earlier redirects stay valid and no chains form.
pub fn record_move(store: &dyn Store, old: &ModuleProvider, provider: &ModuleProvider) -> Result<()> {
    // Moving back onto an old identity retires that redirect.
    if let Some(existing) = store.find_redirect(&provider.namespace, &provider.module, &provider.provider)? {
        if existing.provider_id == provider.id {
            store.delete_redirect(&existing.id)?;
        } else {
            return Err(Error::Conflict(format!(
                "{} is a redirect to another module provider",
                provider.triple()
            )));
        }
    }

    store.create_redirect(&Redirect {
        id: Uuid::new_v4().to_string(),
        namespace: old.namespace.clone(),
        module: old.module.clone(),
        provider: old.provider.clone(),
        provider_id: provider.id.clone(),
        created_at: Utc::now(),
    })
}

/// Fails when `(namespace, module, provider)` already names something,
/// either a live provider or another provider's redirect.
pub fn ensure_available(
    store: &dyn Store,
    namespace: &str,
    module: &str,
    provider: &str,
    moving: Option<&str>,
) -> Result<()> {
    if let Some(existing) = store.find_module_provider(namespace, module, provider)? {
        if Some(existing.id.as_str()) != moving {
            return Err(Error::AlreadyExists(format!(
                "module provider {namespace}/{module}/{provider}"
            )));
        }
    }
    if let Some(redirect) = store.find_redirect(namespace, module, provider)? {
        if Some(redirect.provider_id.as_str()) != moving {
            return Err(Error::Conflict(format!(
                "{namespace}/{module}/{provider} is a redirect to another module provider"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::store::SqliteStore;
    use crate::types::{GitConfig, Namespace, NamespaceType};

    fn setup() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();
        for (id, name) in [("ns-1", "old-org"), ("ns-2", "new-org")] {
            store
                .create_namespace(&Namespace {
                    id: id.to_string(),
                    name: name.to_string(),
                    display_name: None,
                    namespace_type: NamespaceType::None,
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        store
            .create_module_provider(&ModuleProvider {
                id: "p-1".to_string(),
                namespace_id: "ns-1".to_string(),
                namespace: "old-org".to_string(),
                module: "vpc".to_string(),
                provider: "aws".to_string(),
                verified: false,
                git: GitConfig::default(),
                created_at: Utc::now(),
            })
            .unwrap();
        (temp, store)
    }

    fn rename(store: &SqliteStore, ns_id: &str, ns: &str, module: &str) -> (ModuleProvider, ModuleProvider) {
        let old = store.get_module_provider("p-1").unwrap().unwrap();
        let mut moved = old.clone();
        moved.namespace_id = ns_id.to_string();
        moved.namespace = ns.to_string();
        moved.module = module.to_string();
        store.update_module_provider(&moved).unwrap();
        let moved = store.get_module_provider("p-1").unwrap().unwrap();
        (old, moved)
    }

    #[test]
    fn test_direct_lookup() {
        let (_temp, store) = setup();
        let resolved = resolve(&store, "old-org", "vpc", "aws").unwrap().unwrap();
        assert!(!resolved.is_redirect());
        assert!(resolve(&store, "old-org", "nope", "aws").unwrap().is_none());
        assert!(matches!(
            require(&store, "old-org", "nope", "aws"),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_moves_never_chain() {
        let (_temp, store) = setup();

        let (old, moved) = rename(&store, "ns-2", "new-org", "vpc");
        record_move(&store, &old, &moved).unwrap();
        let (old, moved) = rename(&store, "ns-2", "new-org", "network");
        record_move(&store, &old, &moved).unwrap();

        for (ns, module) in [("old-org", "vpc"), ("new-org", "vpc"), ("new-org", "network")] {
            let resolved = resolve(&store, ns, module, "aws").unwrap().unwrap();
            assert_eq!(resolved.provider.triple(), "new-org/network/aws");
        }
        assert!(resolve(&store, "OLD-ORG", "vpc", "aws").unwrap().unwrap().is_redirect());

        // moving back retires the redirect for the identity being reclaimed
        let (old, moved) = rename(&store, "ns-1", "old-org", "vpc");
        record_move(&store, &old, &moved).unwrap();
        let resolved = resolve(&store, "old-org", "vpc", "aws").unwrap().unwrap();
        assert!(!resolved.is_redirect());
        assert_eq!(store.list_redirects("p-1").unwrap().len(), 2);
    }

    #[test]
    fn test_ensure_available() {
        let (_temp, store) = setup();
        assert!(matches!(
            ensure_available(&store, "old-org", "vpc", "aws", None),
            Err(Error::AlreadyExists(_))
        ));
        ensure_available(&store, "old-org", "vpc", "aws", Some("p-1")).unwrap();
        ensure_available(&store, "new-org", "vpc", "aws", None).unwrap();
    }
}
