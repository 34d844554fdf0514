//! A size-bounded LRU index: a doubly-linked list of entries plus a hash
//! map from key to list node, parameterised by a caller-supplied size
//! function and eviction callback.
//!
//! Not thread-safe by itself — callers serialize through the owning tier's
//! mutex (see the tier implementations in [`crate::tiers`]).

use std::collections::HashMap;
use std::hash::Hash;

struct Node<K, V> {
    key: K,
    value: V,
    size: i64,
    prev: Option<usize>,
    next: Option<usize>,
}

/// A size-bounded, ordered map with LRU eviction.
///
/// The list owns each entry; the map stores only the slab index of its
/// node, so a hit never needs to touch more than one hash lookup plus a
/// pointer splice.
pub struct Lru<K, V> {
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    index: HashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    current_size: i64,
    max_size: i64,
    size_fn: Box<dyn Fn(&V) -> i64 + Send + Sync>,
    on_evict: Box<dyn Fn(&K, &V) + Send + Sync>,
}

impl<K: Eq + Hash + Clone, V> Lru<K, V> {
    pub fn new(
        max_size: i64,
        size_fn: impl Fn(&V) -> i64 + Send + Sync + 'static,
        on_evict: impl Fn(&K, &V) + Send + Sync + 'static,
    ) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            current_size: 0,
            max_size,
            size_fn: Box::new(size_fn),
            on_evict: Box::new(on_evict),
        }
    }

    pub fn size(&self) -> i64 {
        self.current_size
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Insert or replace `key`, moving it to the front (most recently
    /// used). Evicts from the back until `current_size <= max_size`.
    /// Returns `true`.
    pub fn add(&mut self, key: K, value: V) -> bool {
        self.insert(key, value, true);
        self.evict_to_capacity();
        true
    }

    /// Like [`Lru::add`] but inserts at the back, so it does not disturb
    /// the recency order. Used during cold rebuild so freshly loaded
    /// on-disk entries do not jump ahead of already-recent ones.
    pub fn push_back(&mut self, key: K, value: V) {
        self.insert(key, value, false);
        self.evict_to_capacity();
    }

    pub fn get(&mut self, key: &K) -> Option<&V> {
        let idx = *self.index.get(key)?;
        self.move_to_front(idx);
        self.nodes[idx].as_ref().map(|n| &n.value)
    }

    /// Checks presence; on a hit, also promotes to MRU (deliberate: the
    /// disk tier uses this as a read barrier).
    pub fn contains(&mut self, key: &K) -> bool {
        if let Some(&idx) = self.index.get(key) {
            self.move_to_front(idx);
            true
        } else {
            false
        }
    }

    pub fn remove(&mut self, key: &K) -> bool {
        let Some(idx) = self.index.remove(key) else {
            return false;
        };
        self.detach(idx);
        if let Some(node) = self.nodes[idx].take() {
            self.current_size -= node.size;
            (self.on_evict)(&node.key, &node.value);
        }
        self.free.push(idx);
        true
    }

    fn insert(&mut self, key: K, value: V, front: bool) {
        let size = (self.size_fn)(&value);
        if let Some(&idx) = self.index.get(&key) {
            self.detach(idx);
            if let Some(node) = self.nodes[idx].as_mut() {
                self.current_size -= node.size;
                node.value = value;
                node.size = size;
            }
            self.current_size += size;
            if front {
                self.attach_front(idx);
            } else {
                self.attach_back(idx);
            }
            return;
        }

        let idx = match self.free.pop() {
            Some(i) => i,
            None => {
                self.nodes.push(None);
                self.nodes.len() - 1
            }
        };
        self.nodes[idx] = Some(Node {
            key: key.clone(),
            value,
            size,
            prev: None,
            next: None,
        });
        self.index.insert(key, idx);
        self.current_size += size;
        if front {
            self.attach_front(idx);
        } else {
            self.attach_back(idx);
        }
    }

    fn evict_to_capacity(&mut self) {
        while self.current_size > self.max_size {
            let Some(tail) = self.tail else { break };
            let key = match &self.nodes[tail] {
                Some(n) => n.key.clone(),
                None => break,
            };
            self.remove(&key);
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.detach(idx);
        self.attach_front(idx);
    }

    fn detach(&mut self, idx: usize) {
        let (prev, next) = match &self.nodes[idx] {
            Some(n) => (n.prev, n.next),
            None => return,
        };
        match prev {
            Some(p) => {
                if let Some(n) = self.nodes[p].as_mut() {
                    n.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(nn) = self.nodes[n].as_mut() {
                    nn.prev = prev;
                }
            }
            None => self.tail = prev,
        }
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = None;
        }
    }

    fn attach_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(n) = self.nodes[h].as_mut() {
                n.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn attach_back(&mut self, idx: usize) {
        let old_tail = self.tail;
        if let Some(node) = self.nodes[idx].as_mut() {
            node.next = None;
            node.prev = old_tail;
        }
        if let Some(t) = old_tail {
            if let Some(n) = self.nodes[t].as_mut() {
                n.next = Some(idx);
            }
        }
        self.tail = Some(idx);
        if self.head.is_none() {
            self.head = Some(idx);
        }
    }

    /// Keys from most- to least-recently-used. For tests and diagnostics.
    pub fn order(&self) -> Vec<K> {
        let mut out = Vec::with_capacity(self.index.len());
        let mut cur = self.head;
        while let Some(idx) = cur {
            if let Some(node) = &self.nodes[idx] {
                out.push(node.key.clone());
                cur = node.next;
            } else {
                break;
            }
        }
        out
    }
}
