//! Process-wide tables behind a narrow get/set/delete interface.
//!
//! Rules, workflow patterns, tool registrations, workflow executions and session
//! contexts all live in a [`KeyValueStore`]. The in-memory backend is safe for
//! concurrent callers; a persistent backend can be injected without touching the
//! orchestration code that uses it.

use std::hash::Hash;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

pub trait KeyValueStore<K, V>: Send + Sync {
    fn get(&self, key: &K) -> Option<V>;
    fn set(&self, key: K, value: V);
    fn delete(&self, key: &K) -> Option<V>;
    fn keys(&self) -> Vec<K>;
    fn values(&self) -> Vec<V>;

    /// Atomic read-modify-write of one key. `apply` receives the current value (if
    /// any) and returns the value to store; returning `None` removes the key.
    fn modify(&self, key: K, apply: &mut dyn FnMut(Option<V>) -> Option<V>);

    fn len(&self) -> usize {
        self.keys().len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct InMemoryStore<K, V> {
    entries: DashMap<K, V>,
}

impl<K, V> Default for InMemoryStore<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self { entries: DashMap::new() }
    }
}

impl<K, V> InMemoryStore<K, V>
where
    K: Eq + Hash,
{
    pub fn new() -> Self {
        Self::default()
    }
}

impl<K, V> KeyValueStore<K, V> for InMemoryStore<K, V>
where
    K: Eq + Hash + Clone + Send + Sync,
    V: Clone + Send + Sync,
{
    fn get(&self, key: &K) -> Option<V> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    fn set(&self, key: K, value: V) {
        self.entries.insert(key, value);
    }

    fn delete(&self, key: &K) -> Option<V> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    fn keys(&self) -> Vec<K> {
        self.entries.iter().map(|entry| entry.key().clone()).collect()
    }

    fn values(&self) -> Vec<V> {
        self.entries.iter().map(|entry| entry.value().clone()).collect()
    }

    fn modify(&self, key: K, apply: &mut dyn FnMut(Option<V>) -> Option<V>) {
        match self.entries.entry(key) {
            Entry::Occupied(mut occupied) => match apply(Some(occupied.get().clone())) {
                Some(value) => {
                    occupied.insert(value);
                }
                None => {
                    occupied.remove();
                }
            },
            Entry::Vacant(vacant) => {
                if let Some(value) = apply(None) {
                    vacant.insert(value);
                }
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{InMemoryStore, KeyValueStore};

    #[test]
    fn get_set_delete_round_trip() {
        let store = InMemoryStore::new();
        store.set("a".to_string(), 1);
        assert_eq!(store.get(&"a".to_string()), Some(1));
        assert_eq!(store.delete(&"a".to_string()), Some(1));
        assert!(store.is_empty());
    }

    #[test]
    fn modify_can_insert_update_and_remove() {
        let store: InMemoryStore<String, u32> = InMemoryStore::new();
        store.modify("count".to_string(), &mut |current| Some(current.unwrap_or(0) + 1));
        store.modify("count".to_string(), &mut |current| Some(current.unwrap_or(0) + 1));
        assert_eq!(store.get(&"count".to_string()), Some(2));

        store.modify("count".to_string(), &mut |_| None);
        assert_eq!(store.get(&"count".to_string()), None);
    }

    #[test]
    fn concurrent_modify_does_not_lose_updates() {
        let store: Arc<InMemoryStore<String, u32>> = Arc::new(InMemoryStore::new());
        let handles = (0..8)
            .map(|_| {
                let store = Arc::clone(&store);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        store.modify("hits".to_string(), &mut |current| {
                            Some(current.unwrap_or(0) + 1)
                        });
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().expect("worker thread panicked");
        }
        assert_eq!(store.get(&"hits".to_string()), Some(800));
    }
}
