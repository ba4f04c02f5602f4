use std::{
    collections::HashMap,
    hash::Hash,
    sync::{Arc, RwLock},
};

use crate::{error::BufferError, utils::HandyRwLock};

pub type Pod<T> = Arc<RwLock<T>>;
pub type BufferResult = Result<(), BufferError>;

/// A hash map guarded by a single `RwLock`, handing out `Clone`d values
/// (normally `Pod<T>`) so that callers lock per-entry structures
/// independently instead of holding the map lock.
pub struct ConcurrentHashMap<K, V> {
    inner: RwLock<HashMap<K, V>>,
}

impl<K: Eq + Hash + Clone, V: Clone> ConcurrentHashMap<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.inner.rl().get(key).cloned()
    }

    pub fn get_or_insert<F>(&self, key: &K, init: F) -> Result<V, BufferError>
    where
        F: FnOnce(&K) -> Result<V, BufferError>,
    {
        if let Some(v) = self.inner.rl().get(key) {
            return Ok(v.clone());
        }

        let mut map = self.inner.wl();
        // Recheck under the write lock, another thread may have won.
        if let Some(v) = map.get(key) {
            return Ok(v.clone());
        }

        let v = init(key)?;
        map.insert(key.clone(), v.clone());
        Ok(v)
    }

    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.inner.wl().insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        self.inner.wl().remove(key)
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.inner.rl().contains_key(key)
    }

    pub fn keys(&self) -> Vec<K> {
        self.inner.rl().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.rl().len()
    }

    pub fn clear(&self) {
        self.inner.wl().clear();
    }
}
