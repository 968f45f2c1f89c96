use crate::hashing::HashMap;
use std::hash::Hash;

const NONE: u32 = u32::MAX;

#[derive(Copy, Clone)]
struct LruCacheNode {
    next: u32,
    previous: u32,
}

/// Fixed capacity map that evicts the least recently used entry when full
pub struct LruCache<K, V> {
    // Doubly linked list using indices instead of pointers. Head is most recently used.
    head: u32,
    tail: u32,
    nodes: Vec<LruCacheNode>,

    // Slots that line up with the linked list nodes
    pairs: Vec<Option<(K, V)>>,

    // Lookup for the slot a key is stored at
    lookup: HashMap<K, u32>,
}

impl<K: Clone + Eq + Hash, V> LruCache<K, V> {
    pub fn new(capacity: u32) -> LruCache<K, V> {
        assert!(capacity > 1, "LruCache requires a capacity of at least 2");
        assert!(capacity < NONE);

        let nodes = (0..capacity)
            .map(|i| LruCacheNode {
                previous: if i == 0 { NONE } else { i - 1 },
                next: if i == capacity - 1 { NONE } else { i + 1 },
            })
            .collect();

        LruCache {
            head: 0,
            tail: capacity - 1,
            nodes,
            pairs: (0..capacity).map(|_| None).collect(),
            lookup: HashMap::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.nodes.len()
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    pub fn contains_key(
        &self,
        k: &K,
    ) -> bool {
        self.lookup.contains_key(k)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.pairs
            .iter()
            .filter_map(|pair| pair.as_ref().map(|(k, v)| (k, v)))
    }

    fn unlink(
        &mut self,
        index: u32,
    ) {
        let node = self.nodes[index as usize];
        if node.previous != NONE {
            self.nodes[node.previous as usize].next = node.next;
        } else {
            self.head = node.next;
        }

        if node.next != NONE {
            self.nodes[node.next as usize].previous = node.previous;
        } else {
            self.tail = node.previous;
        }
    }

    fn move_to_front(
        &mut self,
        index: u32,
    ) {
        if index == self.head {
            return;
        }

        self.unlink(index);
        self.nodes[index as usize] = LruCacheNode {
            previous: NONE,
            next: self.head,
        };
        self.nodes[self.head as usize].previous = index;
        self.head = index;
    }

    fn move_to_back(
        &mut self,
        index: u32,
    ) {
        if index == self.tail {
            return;
        }

        self.unlink(index);
        self.nodes[index as usize] = LruCacheNode {
            previous: self.tail,
            next: NONE,
        };
        self.nodes[self.tail as usize].next = index;
        self.tail = index;
    }

    pub fn get(
        &mut self,
        k: &K,
    ) -> Option<&V> {
        let index = *self.lookup.get(k)?;
        self.move_to_front(index);
        self.pairs[index as usize].as_ref().map(|(_, v)| v)
    }

    // Doesn't change the order of eviction
    pub fn peek(
        &self,
        k: &K,
    ) -> Option<&V> {
        let index = *self.lookup.get(k)?;
        self.pairs[index as usize].as_ref().map(|(_, v)| v)
    }

    /// Inserts or replaces a value. Returns the entry that had to be evicted to make room, if any.
    pub fn insert(
        &mut self,
        k: K,
        v: V,
    ) -> Option<(K, V)> {
        if let Some(&index) = self.lookup.get(&k) {
            self.move_to_front(index);
            let old = self.pairs[index as usize].replace((k, v));
            // Replacing the value of an existing key is not an eviction
            drop(old);
            return None;
        }

        // The tail is either empty or the least recently used entry
        let index = self.tail;
        let evicted = self.pairs[index as usize].take();
        if let Some((evicted_key, _)) = &evicted {
            self.lookup.remove(evicted_key);
        }

        self.move_to_front(index);
        self.lookup.insert(k.clone(), index);
        self.pairs[index as usize] = Some((k, v));
        evicted
    }

    pub fn remove(
        &mut self,
        k: &K,
    ) -> Option<V> {
        let index = self.lookup.remove(k)?;
        // Empty slots live at the back so they are reused first
        self.move_to_back(index);
        self.pairs[index as usize].take().map(|(_, v)| v)
    }

    pub fn clear(&mut self) -> Vec<(K, V)> {
        self.lookup.clear();
        self.pairs.iter_mut().filter_map(|pair| pair.take()).collect()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn check_lru_gets_full() {
        let mut lru_cache = LruCache::new(3);
        assert!(lru_cache.insert(0, 0).is_none());
        assert!(lru_cache.insert(1, 1).is_none());
        assert!(lru_cache.insert(2, 2).is_none());

        assert!(lru_cache.get(&0).is_some());
        assert!(lru_cache.get(&1).is_some());
        assert!(lru_cache.get(&2).is_some());

        // The least recently touched one is bumped
        assert_eq!(lru_cache.insert(3, 3), Some((0, 0)));
        assert!(lru_cache.get(&0).is_none());
        assert!(lru_cache.get(&1).is_some());
        assert!(lru_cache.get(&2).is_some());
        assert!(lru_cache.get(&3).is_some());
        assert_eq!(lru_cache.len(), 3);
    }

    #[test]
    fn check_lru_deletes_least_recently_used() {
        let mut lru_cache = LruCache::new(3);
        lru_cache.insert(0, 0);
        lru_cache.insert(1, 1);
        lru_cache.insert(2, 2);

        // Touch the oldest, preventing it from being removed
        lru_cache.get(&0);

        assert_eq!(lru_cache.insert(3, 3), Some((1, 1)));
        assert!(lru_cache.get(&0).is_some());
        assert!(lru_cache.get(&1).is_none());
        assert!(lru_cache.get(&2).is_some());
        assert!(lru_cache.get(&3).is_some());
    }

    #[test]
    fn check_peek_does_not_touch() {
        let mut lru_cache = LruCache::new(2);
        lru_cache.insert(0, 0);
        lru_cache.insert(1, 1);
        assert_eq!(lru_cache.peek(&0), Some(&0));
        assert_eq!(lru_cache.insert(2, 2), Some((0, 0)));
    }

    #[test]
    fn check_replace_existing_key() {
        let mut lru_cache = LruCache::new(2);
        lru_cache.insert(0, 0);
        assert!(lru_cache.insert(0, 10).is_none());
        assert_eq!(lru_cache.len(), 1);
        assert_eq!(lru_cache.get(&0), Some(&10));
    }

    #[test]
    fn check_remove() {
        let mut lru_cache = LruCache::new(3);
        lru_cache.insert(0, 0);
        lru_cache.insert(1, 1);
        lru_cache.insert(2, 2);

        assert_eq!(lru_cache.remove(&0), Some(0));
        assert_eq!(lru_cache.remove(&2), Some(2));
        assert_eq!(lru_cache.remove(&1), Some(1));
        assert!(lru_cache.is_empty());

        assert!(lru_cache.insert(3, 3).is_none());
        assert!(lru_cache.get(&0).is_none());
        assert!(lru_cache.get(&1).is_none());
        assert!(lru_cache.get(&2).is_none());
        assert!(lru_cache.get(&3).is_some());
    }

    #[test]
    fn check_removed_slot_is_reused_before_eviction() {
        let mut lru_cache = LruCache::new(3);
        lru_cache.insert(0, 0);
        lru_cache.insert(1, 1);
        lru_cache.insert(2, 2);
        lru_cache.remove(&1);
        assert!(lru_cache.insert(3, 3).is_none());
        assert_eq!(lru_cache.len(), 3);
    }

    #[test]
    fn check_clear() {
        let mut lru_cache = LruCache::new(3);
        lru_cache.insert(0, 0);
        lru_cache.insert(1, 1);
        let mut cleared = lru_cache.clear();
        cleared.sort();
        assert_eq!(cleared, vec![(0, 0), (1, 1)]);
        assert!(lru_cache.is_empty());
        assert!(lru_cache.insert(2, 2).is_none());
    }
}
