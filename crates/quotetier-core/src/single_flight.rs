//! Per-key collapsing of concurrent identical calls.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::watch;

type Flights<K, V> = Mutex<HashMap<K, watch::Receiver<Option<V>>>>;

enum Flight<V> {
    Leader(watch::Sender<Option<V>>),
    Follower(watch::Receiver<Option<V>>),
}

/// At most one call per key runs at a time; callers that join while it runs
/// receive a clone of its result.
pub struct SingleFlight<K, V> {
    flights: Flights<K, V>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `work` unless a call for `key` is already in flight, in which case
    /// wait for that call's result instead.
    ///
    /// If the leading call is cancelled before publishing, one waiter takes
    /// over and runs its own `work`.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> V
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V>,
    {
        let sender = loop {
            match self.join_or_lead(&key) {
                Flight::Leader(sender) => break sender,
                Flight::Follower(mut receiver) => {
                    let published = match receiver.wait_for(Option::is_some).await {
                        Ok(value) => value.clone(),
                        Err(_) => None,
                    };
                    if let Some(value) = published {
                        return value;
                    }
                }
            }
        };

        let guard = FlightGuard {
            flights: &self.flights,
            key,
        };
        let value = work().await;
        sender.send_replace(Some(value.clone()));
        drop(guard);
        value
    }

    /// Number of keys with a call currently in flight.
    pub fn in_flight(&self) -> usize {
        lock(&self.flights).len()
    }

    fn join_or_lead(&self, key: &K) -> Flight<V> {
        let mut flights = lock(&self.flights);
        if let Some(receiver) = flights.get(key) {
            return Flight::Follower(receiver.clone());
        }
        let (sender, receiver) = watch::channel(None);
        flights.insert(key.clone(), receiver);
        Flight::Leader(sender)
    }
}

fn lock<K, V>(flights: &Flights<K, V>) -> MutexGuard<'_, HashMap<K, watch::Receiver<Option<V>>>> {
    flights.lock().unwrap_or_else(|poisoned| {
        tracing::warn!("single-flight registry mutex was poisoned, recovering");
        poisoned.into_inner()
    })
}

// Removes the registry entry when the leader finishes or is dropped mid-call.
struct FlightGuard<'a, K: Eq + Hash, V> {
    flights: &'a Flights<K, V>,
    key: K,
}

impl<K: Eq + Hash, V> Drop for FlightGuard<'_, K, V> {
    fn drop(&mut self) {
        let mut flights = self.flights.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        flights.remove(&self.key);
    }
}
