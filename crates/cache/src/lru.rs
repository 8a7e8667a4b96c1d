//! Insertion-ordered LRU map.
//!
//! Access promotes an entry by deleting and re-appending its key in the
//! order list, so eviction always removes the least-recently-used entry.
//! Capacity is a hard postcondition: after every insert,
//! `len() <= capacity`.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

/// A small LRU map used by every cache tier.
#[derive(Debug)]
pub struct LruMap<K, V> {
    entries: HashMap<K, V>,
    /// Keys from least- to most-recently used.
    order: VecDeque<K>,
    capacity: usize,
}

impl<K: Eq + Hash + Clone, V> LruMap<K, V> {
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "capacity must be > 0");
        Self {
            entries: HashMap::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    fn promote(&mut self, key: &K) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let k = self.order.remove(pos).expect("position just found");
            self.order.push_back(k);
        }
    }

    /// Look up and promote.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        if self.entries.contains_key(key) {
            self.promote(key);
            self.entries.get(key)
        } else {
            None
        }
    }

    /// Look up without promoting.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Insert (promoting if the key exists). Returns the evicted
    /// least-recently-used entry when the insert pushed the map over
    /// capacity.
    pub fn insert(&mut self, key: K, value: V) -> Option<(K, V)> {
        if self.entries.insert(key.clone(), value).is_some() {
            self.promote(&key);
            return None;
        }
        self.order.push_back(key);
        if self.entries.len() > self.capacity {
            return self.pop_lru();
        }
        None
    }

    /// Remove and return the least-recently-used entry.
    pub fn pop_lru(&mut self) -> Option<(K, V)> {
        let key = self.order.pop_front()?;
        let value = self.entries.remove(&key).expect("order and map in sync");
        Some((key, value))
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let value = self.entries.remove(key)?;
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        Some(value)
    }

    /// Remove every entry matching a predicate, returning the removed pairs.
    pub fn drain_filter(&mut self, mut pred: impl FnMut(&K) -> bool) -> Vec<(K, V)> {
        let keys: Vec<K> = self.order.iter().filter(|k| pred(k)).cloned().collect();
        let mut out = Vec::with_capacity(keys.len());
        for k in keys {
            if let Some(v) = self.remove(&k) {
                out.push((k, v));
            }
        }
        out
    }

    /// Drain everything, least-recently-used first.
    pub fn drain(&mut self) -> Vec<(K, V)> {
        let mut out = Vec::with_capacity(self.entries.len());
        while let Some(pair) = self.pop_lru() {
            out.push(pair);
        }
        out
    }

    /// Keys from least- to most-recently used.
    pub fn keys_lru_order(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }
}
