use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// Per-provider reader/writer gates.
///
/// Indexing runs hold the shared side while they write under the provider's
/// storage keys. Operations that change or remove those keys (move, delete)
/// take the exclusive side and never wait for it.
#[derive(Default)]
pub struct ProviderGates {
    gates: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl ProviderGates {
    fn gate(&self, provider_id: &str) -> Arc<RwLock<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|e| e.into_inner());
        // Drop gates nobody holds.
        gates.retain(|_, gate| Arc::strong_count(gate) > 1);
        Arc::clone(gates.entry(provider_id.to_string()).or_default())
    }

    pub async fn shared(&self, provider_id: &str) -> OwnedRwLockReadGuard<()> {
        self.gate(provider_id).read_owned().await
    }

    /// The exclusive side, or `None` while any shared holder is active.
    pub fn try_exclusive(&self, provider_id: &str) -> Option<OwnedRwLockWriteGuard<()>> {
        self.gate(provider_id).try_write_owned().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exclusive_refused_while_shared_held() {
        let gates = ProviderGates::default();

        let shared = gates.shared("p1").await;
        assert!(gates.try_exclusive("p1").is_none());
        assert!(gates.try_exclusive("p2").is_some());

        drop(shared);
        let exclusive = gates.try_exclusive("p1");
        assert!(exclusive.is_some());
    }

    #[tokio::test]
    async fn test_shared_waits_for_exclusive() {
        let gates = Arc::new(ProviderGates::default());
        let exclusive = gates.try_exclusive("p1").unwrap();

        let waiter = {
            let gates = Arc::clone(&gates);
            tokio::spawn(async move {
                let _shared = gates.shared("p1").await;
            })
        };
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(exclusive);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_unheld_gates_are_pruned() {
        let gates = ProviderGates::default();
        drop(gates.shared("p1").await);
        drop(gates.shared("p2").await);
        let _held = gates.shared("p3").await;
        assert_eq!(gates.gates.lock().unwrap().len(), 1);
    }
}
