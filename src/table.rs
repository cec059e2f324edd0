//! Hybrid array-part + hash-part table, the structural layout named by
//! the data model: a dense array for small positive integer keys and an
//! open-addressed node array for everything else, with per-node collision
//! chaining and a descending free-slot cursor.
//!
//! The reference runtime packs this with raw pointers and hand-rolled
//! allocation for a ~43% memory saving over a flat `Vec<TValue>`; this
//! module keeps the same conceptual fields (`lsizenode`, `lastfree`,
//! `flags`, per-node collision `next`) but stores everything in safe
//! `Vec`s indexed by plain `usize`, trading that packing for memory
//! safety without a bytecode VM or allocator of its own to amortize the
//! complexity against.

use crate::gc::arena::{define_arena_id, GcHeader};
use crate::value::{LuaValue, TAG_TABLE};

define_arena_id!(TableId);

/// A node in the hash part: a key/value pair plus an index into `nodes`
/// continuing the collision chain that started at this key's main
/// position. `None` key means the slot is free.
struct Node {
    key: Option<LuaValue>,
    value: LuaValue,
    next: Option<usize>,
}

impl Node {
    fn empty() -> Self {
        Node {
            key: None,
            value: LuaValue::nil(),
            next: None,
        }
    }
}

/// Lets `Table` hash and compare keys without depending on the string
/// arena/table directly: implemented by `GlobalState` (or any type that
/// can resolve a string slot to content) for string keys, and by a pure
/// bit-hash for everything else.
pub trait KeyHash {
    fn hash_value(&self, v: &LuaValue) -> u64;
    fn values_equal(&self, a: &LuaValue, b: &LuaValue) -> bool;
}

pub struct Table {
    pub header: GcHeader,
    array: Vec<LuaValue>,
    nodes: Vec<Node>,
    /// log2 of `nodes.len()`; 0 when the hash part is the one-node dummy.
    lsizenode: u8,
    /// Descending cursor for the next free-slot search.
    lastfree: usize,
    /// Metamethod-negative-cache bits (operator-name lookup misses).
    pub flags: u8,
    pub metatable: Option<TableId>,
}

fn log2_ceil(n: usize) -> u8 {
    let mut size = 1usize;
    let mut l = 0u8;
    while size < n {
        size <<= 1;
        l += 1;
    }
    l
}

impl Table {
    pub fn new(array_size: usize, hash_size: usize) -> Self {
        let nsize = if hash_size == 0 {
            0
        } else {
            1usize << log2_ceil(hash_size)
        };
        let nodes = (0..nsize).map(|_| Node::empty()).collect();
        Table {
            header: GcHeader::new(TAG_TABLE),
            array: vec![LuaValue::nil(); array_size],
            nodes,
            lsizenode: log2_ceil(hash_size.max(1)),
            lastfree: nsize,
            flags: 0,
            metatable: None,
        }
    }

    pub fn array_size(&self) -> usize {
        self.array.len()
    }

    pub fn hash_size(&self) -> usize {
        self.nodes.len()
    }

    pub fn lsizenode(&self) -> u8 {
        self.lsizenode
    }

    fn is_dummy(&self) -> bool {
        self.nodes.is_empty()
    }

    fn main_position(&self, hasher: &dyn KeyHash, key: &LuaValue) -> usize {
        debug_assert!(!self.is_dummy());
        if let Some(i) = key.as_integer() {
            return (i as u64 as usize) & (self.nodes.len() - 1);
        }
        (hasher.hash_value(key) as usize) & (self.nodes.len() - 1)
    }

    /// Descending search for a free node, mirroring the reference
    /// runtime's `lastfree` cursor: it only ever moves downward across
    /// the table's lifetime, so repeated insertions don't re-scan
    /// already-occupied tail slots.
    fn get_free_pos(&mut self) -> Option<usize> {
        while self.lastfree > 0 {
            self.lastfree -= 1;
            if self.nodes[self.lastfree].key.is_none() {
                return Some(self.lastfree);
            }
        }
        None
    }

    fn rehash(&mut self, hasher: &dyn KeyHash, new_hash_size: usize) {
        let old_nodes: Vec<Node> = std::mem::take(&mut self.nodes);
        let nsize = if new_hash_size == 0 {
            0
        } else {
            1usize << log2_ceil(new_hash_size)
        };
        self.nodes = (0..nsize).map(|_| Node::empty()).collect();
        self.lsizenode = log2_ceil(new_hash_size.max(1));
        self.lastfree = nsize;
        for node in old_nodes {
            if let Some(key) = node.key {
                self.raw_set_hash(hasher, key, node.value);
            }
        }
    }

    fn raw_set_hash(&mut self, hasher: &dyn KeyHash, key: LuaValue, value: LuaValue) {
        if self.is_dummy() {
            self.rehash(hasher, 1);
        }
        if let Some(idx) = self.find_hash_index(hasher, &key) {
            self.nodes[idx].value = value;
            return;
        }
        let main = self.main_position(hasher, &key);
        if self.nodes[main].key.is_none() {
            self.nodes[main] = Node {
                key: Some(key),
                value,
                next: None,
            };
            return;
        }
        // `main` is occupied. Brent's variation: only evict the occupant
        // if it is itself a "guest" (not sitting in its own main
        // position) — otherwise its own chain lookups would break. A
        // guest got there because it collided with whatever key used to
        // be in `main` before it; evicting it and fixing up the chain
        // that reaches it keeps every existing key reachable.
        let occupant_key = self.nodes[main].key.clone().unwrap();
        let occupant_main = self.main_position(hasher, &occupant_key);
        let free = self.get_free_pos().unwrap_or_else(|| {
            self.rehash(hasher, (self.nodes.len() * 2).max(1));
            self.get_free_pos().expect("rehash must yield a free slot")
        });
        if occupant_main == main {
            // Occupant belongs here; append the new key to the chain
            // instead of disturbing it.
            let old_next = self.nodes[main].next;
            self.nodes[main].next = Some(free);
            self.nodes[free] = Node {
                key: Some(key),
                value,
                next: old_next,
            };
        } else {
            // Occupant is a guest: relocate it to `free` and fix the
            // predecessor in its real chain (rooted at `occupant_main`)
            // that currently points at `main`.
            let mut idx = occupant_main;
            loop {
                if self.nodes[idx].next == Some(main) {
                    self.nodes[idx].next = Some(free);
                    break;
                }
                idx = self.nodes[idx]
                    .next
                    .expect("occupant's main-position chain must reach it");
            }
            self.nodes[free] = Node {
                key: self.nodes[main].key.take(),
                value: self.nodes[main].value,
                next: self.nodes[main].next,
            };
            self.nodes[main] = Node {
                key: Some(key),
                value,
                next: None,
            };
        }
    }

    fn find_hash_index(&self, hasher: &dyn KeyHash, key: &LuaValue) -> Option<usize> {
        if self.is_dummy() {
            return None;
        }
        let mut idx = self.main_position(hasher, key);
        loop {
            match &self.nodes[idx].key {
                Some(k) if hasher.values_equal(k, key) => return Some(idx),
                _ => {}
            }
            match self.nodes[idx].next {
                Some(next) => idx = next,
                None => return None,
            }
        }
    }

    /// Non-metamethod table read.
    pub fn raw_get(&self, hasher: &dyn KeyHash, key: &LuaValue) -> Option<&LuaValue> {
        if let Some(i) = key.as_integer() {
            if i >= 1 && (i as usize) <= self.array.len() {
                let v = &self.array[i as usize - 1];
                return (!v.is_nil()).then_some(v);
            }
        }
        self.find_hash_index(hasher, key).map(|idx| &self.nodes[idx].value)
    }

    pub fn raw_get_int(&self, hasher: &dyn KeyHash, key: i64) -> Option<&LuaValue> {
        self.raw_get(hasher, &LuaValue::integer(key))
    }

    /// Non-metamethod table write. A `nil` value removes the key; `nil`
    /// and NaN keys are rejected by the caller (the Host API), matching
    /// the "keys are any Value except nil and NaN" invariant.
    pub fn raw_set(&mut self, hasher: &dyn KeyHash, key: LuaValue, value: LuaValue) {
        if let Some(i) = key.as_integer() {
            if i >= 1 && (i as usize) <= self.array.len() {
                self.array[i as usize - 1] = value;
                return;
            }
            if i as usize == self.array.len() + 1 && !value.is_nil() {
                self.array.push(value);
                self.absorb_hash_tail_into_array(hasher);
                return;
            }
        }
        if value.is_nil() {
            if let Some(idx) = self.find_hash_index(hasher, &key) {
                self.nodes[idx].value = LuaValue::nil();
                self.nodes[idx].key = Some(LuaValue::nil()); // dead-key marker; keeps chain intact
            }
            return;
        }
        self.raw_set_hash(hasher, key, value);
    }

    /// After the array part grows by one slot, pull any hash-part entries
    /// whose integer key now falls inside the (new, larger) array range
    /// back into the array, the same migration the reference runtime's
    /// resize performs incrementally as the array frontier advances.
    fn absorb_hash_tail_into_array(&mut self, hasher: &dyn KeyHash) {
        loop {
            let next_key = self.array.len() as i64 + 1;
            match self.find_hash_index(hasher, &LuaValue::integer(next_key)) {
                Some(idx) => {
                    let v = self.nodes[idx].value;
                    self.nodes[idx].key = Some(LuaValue::nil());
                    self.nodes[idx].value = LuaValue::nil();
                    self.array.push(v);
                }
                None => break,
            }
        }
    }

    /// A border: `array[1..k]` all non-nil and `array[k+1]` (or the
    /// corresponding hash slot) nil. Returns 0 for an empty table.
    pub fn raw_len(&self, hasher: &dyn KeyHash) -> i64 {
        if !self.array.is_empty() && self.array.last().map(|v| !v.is_nil()).unwrap_or(false) {
            // Array part is full; a border may still continue into the
            // hash part for tables built with holes filled in later.
            let mut n = self.array.len() as i64;
            while self.find_hash_index(hasher, &LuaValue::integer(n + 1)).is_some() {
                n += 1;
            }
            return n;
        }
        // Binary search the array part for a border.
        let (mut lo, mut hi) = (0usize, self.array.len());
        while hi - lo > 1 {
            let mid = (lo + hi) / 2;
            if self.array[mid - 1].is_nil() {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        lo as i64
    }

    pub fn set_metatable(&mut self, mt: Option<TableId>) {
        self.metatable = mt;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct BitHasher;
    impl KeyHash for BitHasher {
        fn hash_value(&self, v: &LuaValue) -> u64 {
            if let Some(f) = v.as_float() {
                f.to_bits()
            } else if v.is_collectable() {
                v.as_gc_slot_unchecked() as u64
            } else {
                0
            }
        }
        fn values_equal(&self, a: &LuaValue, b: &LuaValue) -> bool {
            struct NoStrings;
            impl crate::value::StringLookup for NoStrings {
                fn long_string_bytes(&self, _slot: u32) -> &[u8] {
                    b""
                }
            }
            a.raw_equal(b, &NoStrings)
        }
    }

    #[test]
    fn array_part_roundtrip() {
        let mut t = Table::new(0, 0);
        let h = BitHasher;
        t.raw_set(&h, LuaValue::integer(1), LuaValue::integer(10));
        t.raw_set(&h, LuaValue::integer(2), LuaValue::integer(20));
        assert_eq!(t.raw_get_int(&h, 1).unwrap().as_integer(), Some(10));
        assert_eq!(t.raw_get_int(&h, 2).unwrap().as_integer(), Some(20));
        assert_eq!(t.raw_len(&h), 2);
    }

    #[test]
    fn hash_part_roundtrip_and_absorption() {
        let mut t = Table::new(0, 0);
        let h = BitHasher;
        // Insert out of array-frontier order: 2 before 1.
        t.raw_set(&h, LuaValue::integer(2), LuaValue::integer(200));
        t.raw_set(&h, LuaValue::integer(1), LuaValue::integer(100));
        assert_eq!(t.raw_get_int(&h, 1).unwrap().as_integer(), Some(100));
        assert_eq!(t.raw_get_int(&h, 2).unwrap().as_integer(), Some(200));
        assert_eq!(t.raw_len(&h), 2);
    }

    #[test]
    fn nil_value_removes_key() {
        let mut t = Table::new(0, 0);
        let h = BitHasher;
        t.raw_set(&h, LuaValue::integer(5), LuaValue::integer(50));
        assert!(t.raw_get_int(&h, 5).is_some());
        t.raw_set(&h, LuaValue::integer(5), LuaValue::nil());
        assert!(t.raw_get_int(&h, 5).is_none());
    }

    #[test]
    fn many_hash_collisions_resize_and_preserve_pairs() {
        let mut t = Table::new(0, 1);
        let h = BitHasher;
        for i in 100..164i64 {
            t.raw_set(&h, LuaValue::integer(i), LuaValue::integer(i * 10));
        }
        for i in 100..164i64 {
            assert_eq!(t.raw_get_int(&h, i).unwrap().as_integer(), Some(i * 10));
        }
    }
}
