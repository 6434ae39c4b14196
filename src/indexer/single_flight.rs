use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use tokio::task::JoinError;

type Flight<T, E> = Shared<BoxFuture<'static, Result<T, E>>>;
type FlightMap<K, T, E> = Arc<Mutex<HashMap<K, Flight<T, E>>>>;

/// Keyed single-flight execution.
///
/// The first caller for a key spawns the job; callers arriving while it runs
/// join it and receive a clone of the same result. The job runs on its own
/// task, so it finishes (and cleans up) even when every caller goes away.
pub struct SingleFlight<K, T, E> {
    flights: FlightMap<K, T, E>,
}

impl<K, T, E> Default for SingleFlight<K, T, E> {
    fn default() -> Self {
        Self {
            flights: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

/// Removes the key once the spawned job has finished, however it finished.
struct Landing<K: Hash + Eq, T, E> {
    flights: FlightMap<K, T, E>,
    key: K,
}

impl<K: Hash + Eq, T, E> Drop for Landing<K, T, E> {
    fn drop(&mut self) {
        lock(&self.flights).remove(&self.key);
    }
}

fn lock<K, T, E>(flights: &FlightMap<K, T, E>) -> MutexGuard<'_, HashMap<K, Flight<T, E>>> {
    flights.lock().unwrap_or_else(|e| e.into_inner())
}

impl<K, T, E> SingleFlight<K, T, E>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
    E: Clone + Send + Sync + From<JoinError> + 'static,
{
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `start()` unless a job for `key` is already in flight. The flag is
    /// true for the caller that started the job.
    pub async fn run<F, Fut>(&self, key: K, start: F) -> (Result<T, E>, bool)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let (flight, leader) = {
            let mut flights = lock(&self.flights);
            match flights.get(&key) {
                Some(existing) => (existing.clone(), false),
                None => {
                    let landing = Landing {
                        flights: Arc::clone(&self.flights),
                        key: key.clone(),
                    };
                    let job = start();
                    let handle = tokio::spawn(async move {
                        let _landing = landing;
                        job.await
                    });
                    let flight: Flight<T, E> = async move {
                        match handle.await {
                            Ok(result) => result,
                            Err(e) => Err(E::from(e)),
                        }
                    }
                    .boxed()
                    .shared();
                    flights.insert(key, flight.clone());
                    (flight, true)
                }
            }
        };

        (flight.await, leader)
    }

    /// Number of jobs currently running.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        lock(&self.flights).len()
    }
}
