//! Fixed-capacity LRU map backed by a slot arena.
//!
//! Entries live in a `Vec` of slots linked by index into a recency list; a
//! `HashMap` maps keys to slot indices. Indices stay valid for the lifetime
//! of the map because slots are never removed, only recycled: once the arena
//! is full, inserting a new key reuses the least-recently-used slot.

use std::collections::HashMap;
use std::hash::Hash;

const NIL: usize = usize::MAX;

#[derive(Debug)]
struct Slot<K, V> {
    key: K,
    value: V,
    prev: usize,
    next: usize,
}

/// Least-recently-used map with a hard entry bound.
#[derive(Debug)]
pub struct ArenaLru<K, V> {
    slots: Vec<Slot<K, V>>,
    index: HashMap<K, usize>,
    /// Most recently used slot.
    head: usize,
    /// Least recently used slot (next eviction victim).
    tail: usize,
    capacity: usize,
}

impl<K: Hash + Eq + Clone, V> ArenaLru<K, V> {
    /// Create an empty map holding at most `capacity` entries (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: Vec::with_capacity(capacity.min(1024)),
            index: HashMap::with_capacity(capacity.min(1024)),
            head: NIL,
            tail: NIL,
            capacity,
        }
    }

    /// Look up `key` and promote it to most-recently-used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.touch(idx);
        Some(&self.slots[idx].value)
    }

    /// Look up `key` without changing recency.
    pub fn peek(&self, key: &K) -> Option<&V> {
        self.index.get(key).map(|&idx| &self.slots[idx].value)
    }

    /// Insert or overwrite `key`, making it most-recently-used. When the map
    /// is full, the least-recently-used entry is evicted and returned.
    pub fn put(&mut self, key: K, value: V) -> Option<(K, V)> {
        if let Some(&idx) = self.index.get(&key) {
            self.slots[idx].value = value;
            self.touch(idx);
            return None;
        }

        if self.slots.len() < self.capacity {
            let idx = self.slots.len();
            self.slots.push(Slot {
                key: key.clone(),
                value,
                prev: NIL,
                next: NIL,
            });
            self.index.insert(key, idx);
            self.push_front(idx);
            return None;
        }

        let idx = self.tail;
        self.unlink(idx);
        let old_key = std::mem::replace(&mut self.slots[idx].key, key.clone());
        let old_value = std::mem::replace(&mut self.slots[idx].value, value);
        self.index.remove(&old_key);
        self.index.insert(key, idx);
        self.push_front(idx);
        Some((old_key, old_value))
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.index.clear();
        self.head = NIL;
        self.tail = NIL;
    }

    /// Keys from most- to least-recently-used.
    pub fn keys_by_recency(&self) -> Vec<&K> {
        let mut keys = Vec::with_capacity(self.len());
        let mut cursor = self.head;
        while cursor != NIL {
            keys.push(&self.slots[cursor].key);
            cursor = self.slots[cursor].next;
        }
        keys
    }

    fn touch(&mut self, idx: usize) {
        if self.head == idx {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = (self.slots[idx].prev, self.slots[idx].next);
        if prev == NIL {
            self.head = next;
        } else {
            self.slots[prev].next = next;
        }
        if next == NIL {
            self.tail = prev;
        } else {
            self.slots[next].prev = prev;
        }
        self.slots[idx].prev = NIL;
        self.slots[idx].next = NIL;
    }

    fn push_front(&mut self, idx: usize) {
        self.slots[idx].prev = NIL;
        self.slots[idx].next = self.head;
        if self.head != NIL {
            self.slots[self.head].prev = idx;
        }
        self.head = idx;
        if self.tail == NIL {
            self.tail = idx;
        }
    }
}
