use std::collections::{HashMap, HashSet};
use std::hash::Hash;
use std::time::{Duration, Instant};

struct Entry<V> {
    received: HashSet<V>,
    expires_at: Instant,
}

/// Collects values (typically sender names) per key until a quorum of distinct values arrived.
pub struct Accumulator<K, V> {
    duration: Duration,
    entries: HashMap<K, Entry<V>>,
}

impl<K, V> Accumulator<K, V>
where
    K: Eq + Hash + Clone,
    V: Eq + Hash,
{
    pub fn with_duration(duration: Duration) -> Self {
        Self {
            duration,
            entries: HashMap::new(),
        }
    }

    /// Adds `value` for `key` and returns all values for that key once `quorum` is met.
    pub fn add(&mut self, key: K, value: V, quorum: usize) -> Option<&HashSet<V>> {
        self.purge_expired();
        let expires_at = Instant::now() + self.duration;
        let entry = self.entries.entry(key).or_insert_with(|| Entry {
            received: HashSet::new(),
            expires_at,
        });
        let _ = entry.received.insert(value);
        if entry.received.len() >= quorum.max(1) {
            Some(&entry.received)
        } else {
            None
        }
    }

    pub fn delete(&mut self, key: &K) {
        let _ = self.entries.remove(key);
    }

    fn purge_expired(&mut self) {
        let now = Instant::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}
