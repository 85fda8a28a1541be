use crate::hashing::HashMap;
use std::hash::Hash;

// Marks the end of the list in either direction
const NONE: u32 = u32::MAX;

#[derive(Copy, Clone)]
struct LruCacheNode {
    next: u32,
    previous: u32,
}

/// Fixed-capacity map that evicts the least-recently-used entry when full.
///
/// All storage is allocated up front. Slots are threaded onto a doubly linked list (indices, not
/// pointers) ordered from most- to least-recently-used. Empty slots always sit at the tail end of
/// the list, so the tail is either a free slot or the entry to evict.
pub struct LruCache<K, V> {
    lru_list_head: u32,
    lru_list_tail: u32,
    lru_list: Vec<LruCacheNode>,

    // Slots that line up with the doubly linked list
    lru_list_pairs: Vec<Option<(K, V)>>,

    // Lookup for the index a key is stored at
    lookup: HashMap<K, u32>,
    len: usize,
}

impl<K: Clone + PartialEq + Eq + Hash, V> LruCache<K, V> {
    pub fn new(capacity: u32) -> LruCache<K, V> {
        let capacity = if capacity == 0 {
            log::warn!("LruCache created with capacity 0, using a capacity of 1 instead");
            1
        } else {
            capacity
        };

        let mut lru_list = Vec::with_capacity(capacity as usize);
        for i in 0..capacity {
            lru_list.push(LruCacheNode {
                previous: if i == 0 { NONE } else { i - 1 },
                next: if i + 1 == capacity { NONE } else { i + 1 },
            });
        }

        let mut lru_list_pairs = Vec::with_capacity(capacity as usize);
        for _ in 0..capacity {
            lru_list_pairs.push(None);
        }

        LruCache {
            lru_list_head: 0,
            lru_list_tail: capacity - 1,
            lru_list,
            lru_list_pairs,
            lookup: HashMap::default(),
            len: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.lru_list.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn contains_key(
        &self,
        k: &K,
    ) -> bool {
        self.lookup.contains_key(k)
    }

    fn move_to_front(
        &mut self,
        node_index: u32,
    ) {
        if node_index == self.lru_list_head {
            // Do nothing if already at head
            return;
        }

        let node = self.lru_list[node_index as usize];
        if node_index == self.lru_list_tail {
            // If we are the tail, make the node previous to us the new tail
            self.lru_list_tail = node.previous;
        }

        // splice this node out of the list. We aren't the head, so previous must exist
        debug_assert_ne!(node.previous, NONE);
        self.lru_list[node.previous as usize].next = node.next;
        if node.next != NONE {
            self.lru_list[node.next as usize].previous = node.previous;
        }

        // Make this node the new head
        self.lru_list[self.lru_list_head as usize].previous = node_index;
        self.lru_list[node_index as usize] = LruCacheNode {
            previous: NONE,
            next: self.lru_list_head,
        };
        self.lru_list_head = node_index;
    }

    fn move_to_back(
        &mut self,
        node_index: u32,
    ) {
        if node_index == self.lru_list_tail {
            // Do nothing if we are already the tail
            return;
        }

        let node = self.lru_list[node_index as usize];
        if node_index == self.lru_list_head {
            // If we are the head, make the node after us the new head
            self.lru_list_head = node.next;
        }

        // splice this node out of the list. We aren't the tail, so next must exist
        if node.previous != NONE {
            self.lru_list[node.previous as usize].next = node.next;
        }
        debug_assert_ne!(node.next, NONE);
        self.lru_list[node.next as usize].previous = node.previous;

        // Make this node the new tail
        self.lru_list[self.lru_list_tail as usize].next = node_index;
        self.lru_list[node_index as usize] = LruCacheNode {
            previous: self.lru_list_tail,
            next: NONE,
        };
        self.lru_list_tail = node_index;
    }

    /// Returns the value and marks it as most recently used
    pub fn get(
        &mut self,
        k: &K,
    ) -> Option<&V> {
        let node_index = *self.lookup.get(k)?;
        self.move_to_front(node_index);
        self.lru_list_pairs[node_index as usize]
            .as_ref()
            .map(|(_, v)| v)
    }

    pub fn get_mut(
        &mut self,
        k: &K,
    ) -> Option<&mut V> {
        let node_index = *self.lookup.get(k)?;
        self.move_to_front(node_index);
        self.lru_list_pairs[node_index as usize]
            .as_mut()
            .map(|(_, v)| v)
    }

    /// Returns the value without changing recency
    pub fn peek(
        &self,
        k: &K,
    ) -> Option<&V> {
        let node_index = *self.lookup.get(k)?;
        self.lru_list_pairs[node_index as usize]
            .as_ref()
            .map(|(_, v)| v)
    }

    /// Inserts or overwrites a value, making it the most recently used. If the cache was full and
    /// the key is new, the least recently used entry is evicted and returned.
    pub fn insert(
        &mut self,
        k: K,
        v: V,
    ) -> Option<(K, V)> {
        if let Some(&node_index) = self.lookup.get(&k) {
            self.move_to_front(node_index);
            self.lru_list_pairs[node_index as usize] = Some((k, v));
            return None;
        }

        // The tail is either a free slot or the least recently used entry
        let node_index = self.lru_list_tail;
        let evicted = self.lru_list_pairs[node_index as usize].take();
        if let Some((evicted_key, _)) = &evicted {
            self.lookup.remove(evicted_key);
            self.len -= 1;
        }

        self.move_to_front(node_index);
        self.lookup.insert(k.clone(), node_index);
        self.lru_list_pairs[node_index as usize] = Some((k, v));
        self.len += 1;
        evicted
    }

    pub fn remove(
        &mut self,
        k: &K,
    ) -> Option<V> {
        let node_index = self.lookup.remove(k)?;
        // Free slots live at the back
        self.move_to_back(node_index);
        self.len -= 1;
        self.lru_list_pairs[node_index as usize]
            .take()
            .map(|(_, v)| v)
    }

    pub fn clear(&mut self) {
        for pair in &mut self.lru_list_pairs {
            *pair = None;
        }
        self.lookup.clear();
        self.len = 0;
    }

    /// Iterates entries from most to least recently used
    pub fn iter(&self) -> LruCacheIter<'_, K, V> {
        LruCacheIter {
            cache: self,
            node_index: self.lru_list_head,
        }
    }
}

pub struct LruCacheIter<'a, K, V> {
    cache: &'a LruCache<K, V>,
    node_index: u32,
}

impl<'a, K, V> Iterator for LruCacheIter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.node_index == NONE {
            return None;
        }

        // Occupied slots are contiguous from the head, the first free slot ends iteration
        let (k, v) = self.cache.lru_list_pairs[self.node_index as usize].as_ref()?;
        self.node_index = self.cache.lru_list[self.node_index as usize].next;
        Some((k, v))
    }
}
