use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;

/// Last time each tracked container was seen, keyed by container id.
///
/// Cloning is cheap and every clone shares the same map. Each operation takes the lock for a
/// single key-value access, so readers never observe a torn update.
#[derive(Clone, Default)]
pub struct HeartbeatRegistry {
    entries: Arc<Mutex<HashMap<String, Instant>>>,
}

impl HeartbeatRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, Instant>> {
        // Critical sections never panic halfway through an update.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start tracking `id` as seen now. Returns false if it was already tracked.
    pub fn register(&self, id: &str) -> bool {
        let mut entries = self.entries();
        let fresh = entries.insert(id.to_owned(), Instant::now()).is_none();
        metrics::gauge!("docker_agent_tracked_containers").set(entries.len() as f64);
        fresh
    }

    /// Refresh the heartbeat of `id` if it is tracked. Returns whether it was.
    pub fn touch(&self, id: &str) -> bool {
        match self.entries().get_mut(id) {
            Some(last_seen) => {
                *last_seen = Instant::now();
                true
            }
            None => false,
        }
    }

    pub fn last_seen(&self, id: &str) -> Option<Instant> {
        self.entries().get(id).copied()
    }

    /// Whether `id` is tracked and has been silent for longer than `timeout`.
    pub fn is_expired(&self, id: &str, timeout: Duration) -> Option<bool> {
        self.last_seen(id)
            .map(|last_seen| last_seen.elapsed() > timeout)
    }

    pub fn remove(&self, id: &str) -> Option<Instant> {
        let mut entries = self.entries();
        let removed = entries.remove(id);
        metrics::gauge!("docker_agent_tracked_containers").set(entries.len() as f64);
        removed
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
