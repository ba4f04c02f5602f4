use std::collections::HashMap;

use crate::batch::StreamId;

type Key = (StreamId, u64);

struct Slot {
    key: Key,
    /// Neighbor toward the most-recently-used end.
    prev: Option<usize>,
    /// Neighbor toward the least-recently-used end.
    next: Option<usize>,
    pins: u32,
}

/// Cross-stream recency order of memory-resident batches, with the pin
/// count of each entry.
///
/// Doubly-linked list over a slot arena plus a hash index, so touch,
/// insert and removal are O(1); victim selection walks from the LRU end
/// past pinned entries to the first unpinned one. Pinned entries are
/// never chosen, no matter how many must be skipped.
///
/// The buffer manager holds this behind one mutex scoped around list
/// mutation only, never around tier I/O.
pub struct RecencyList {
    index: HashMap<Key, usize>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl RecencyList {
    pub fn new() -> Self {
        Self {
            index: HashMap::new(),
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn contains(&self, key: &Key) -> bool {
        self.index.contains_key(key)
    }

    pub fn pin_count(&self, key: &Key) -> u32 {
        match self.index.get(key) {
            Some(&i) => self.slots[i].pins,
            None => 0,
        }
    }

    /// Record a use of the entry: move it to the MRU end, inserting it
    /// if it was not tracked yet.
    pub fn touch(&mut self, key: Key) {
        match self.index.get(&key) {
            Some(&i) => {
                self.unlink(i);
                self.push_front(i);
            }
            None => {
                let slot = Slot {
                    key,
                    prev: None,
                    next: None,
                    pins: 0,
                };
                let i = match self.free.pop() {
                    Some(i) => {
                        self.slots[i] = slot;
                        i
                    }
                    None => {
                        self.slots.push(slot);
                        self.slots.len() - 1
                    }
                };
                self.index.insert(key, i);
                self.push_front(i);
            }
        }
    }

    /// Drop the entry regardless of its pin count (the remove-stream
    /// path is allowed to discard pinned data).
    pub fn remove(&mut self, key: &Key) -> bool {
        match self.index.remove(key) {
            Some(i) => {
                self.unlink(i);
                self.free.push(i);
                true
            }
            None => false,
        }
    }

    pub fn remove_stream(&mut self, stream_id: StreamId) {
        let keys: Vec<Key> = self
            .index
            .keys()
            .filter(|(s, _)| *s == stream_id)
            .cloned()
            .collect();
        for key in keys {
            self.remove(&key);
        }
    }

    /// `false` when the entry is not tracked (not memory-resident).
    pub fn pin(&mut self, key: &Key) -> bool {
        match self.index.get(key) {
            Some(&i) => {
                self.slots[i].pins += 1;
                true
            }
            None => false,
        }
    }

    /// `Err(())` on unpin without a matching pin.
    pub fn unpin(&mut self, key: &Key) -> Result<u32, ()> {
        match self.index.get(key) {
            Some(&i) => {
                if self.slots[i].pins == 0 {
                    return Err(());
                }
                self.slots[i].pins -= 1;
                Ok(self.slots[i].pins)
            }
            None => Err(()),
        }
    }

    /// Select and remove the least-recently-used unpinned entry. The
    /// entry leaves the list immediately so concurrent evictions never
    /// pick the same victim; the caller re-`touch`es it if the
    /// migration fails.
    pub fn take_victim(&mut self) -> Option<Key> {
        let mut cursor = self.tail;
        while let Some(i) = cursor {
            if self.slots[i].pins == 0 {
                let key = self.slots[i].key;
                self.index.remove(&key);
                self.unlink(i);
                self.free.push(i);
                return Some(key);
            }
            cursor = self.slots[i].prev;
        }
        None
    }

    fn push_front(&mut self, i: usize) {
        self.slots[i].prev = None;
        self.slots[i].next = self.head;
        if let Some(old_head) = self.head {
            self.slots[old_head].prev = Some(i);
        }
        self.head = Some(i);
        if self.tail.is_none() {
            self.tail = Some(i);
        }
    }

    fn unlink(&mut self, i: usize) {
        let (prev, next) = (self.slots[i].prev, self.slots[i].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.tail = prev,
        }
        self.slots[i].prev = None;
        self.slots[i].next = None;
    }
}
