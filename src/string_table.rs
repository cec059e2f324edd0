//! String substrate: the interned short-string table, the lazily-hashed
//! long-string representation, and the host-pointer string cache.

use crate::gc::arena::{define_arena_id, Arena, ArenaId, GcHeader};
use crate::limits;
use crate::value::{FullTag, StringLookup, TAG_LNGSTR, TAG_SHRSTR};

define_arena_id!(StringId);

/// A managed string object. Both short and long strings use this same
/// representation; which arena slot is tagged `TAG_SHRSTR` vs `TAG_LNGSTR`
/// (and therefore whether it participates in the intern table) is decided
/// at creation time by length against `limits::SHORT_MAX`.
pub struct LuaString {
    pub header: GcHeader,
    bytes: Box<[u8]>,
    hash: u64,
    /// Long strings compute their hash lazily; `true` once `hash` holds
    /// the real value rather than the table's random seed.
    hash_computed: bool,
    /// Reserved-word code slot for short strings (a lexer concern, left
    /// as a plain field since this module does not implement a lexer).
    pub extra: u8,
    /// Intrusive singly-linked chain used by `StringTable`'s buckets.
    hnext: Option<StringId>,
}

impl LuaString {
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn as_str(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn hash(&mut self, seed: u64) -> u64 {
        if !self.hash_computed {
            self.hash = lua_hash(&self.bytes, seed);
            self.hash_computed = true;
            self.extra = 1;
        }
        self.hash
    }

    pub fn hash_if_computed(&self) -> Option<u64> {
        self.hash_computed.then_some(self.hash)
    }
}

/// The reference runtime's `luaS_hash`: seed XORed with length, then a
/// backward scan mixing in one byte every `step = 1 + (len >> HASH_LIMIT)`
/// positions. Widened to 64 bits here (the original packs a 32-bit
/// `unsigned int`) for better hash-part distribution in `Table`; the
/// mixing structure is unchanged.
pub fn lua_hash(bytes: &[u8], seed: u64) -> u64 {
    let len = bytes.len();
    let mut h: u64 = seed ^ (len as u64);
    let step = 1 + (len >> limits::HASH_LIMIT);
    let mut i = len;
    while i >= step {
        h ^= (h << 5)
            .wrapping_add(h >> 2)
            .wrapping_add(bytes[i - 1] as u64);
        i -= step;
    }
    h
}

/// Power-of-two bucket array of singly linked chains, one entry per
/// interned short string.
pub struct StringTable {
    buckets: Vec<Option<StringId>>,
    count: usize,
}

const INITIAL_SIZE: usize = 32;
const MAX_SIZE: usize = 1 << 24;

impl StringTable {
    pub fn new() -> Self {
        StringTable {
            buckets: vec![None; INITIAL_SIZE],
            count: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    fn bucket_index(&self, hash: u64) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    /// Finds an already-interned short string with the given content, or
    /// inserts `candidate_id` (whose bytes must equal `bytes`) and returns
    /// it. Chains are searched by comparing each candidate's stored bytes
    /// against `bytes` so hash collisions never alias distinct content.
    pub fn find_or_insert(
        &mut self,
        arena: &Arena<LuaString>,
        hash: u64,
        bytes: &[u8],
    ) -> Option<StringId> {
        let idx = self.bucket_index(hash);
        let mut cursor = self.buckets[idx];
        while let Some(id) = cursor {
            let s = arena.get(id).expect("interned string missing from arena");
            if s.as_bytes() == bytes {
                return Some(id);
            }
            cursor = s.hnext;
        }
        None
    }

    pub fn insert(&mut self, arena: &mut Arena<LuaString>, hash: u64, id: StringId) {
        if self.count >= self.buckets.len() && self.buckets.len() <= MAX_SIZE / 2 {
            self.resize(arena, self.buckets.len() * 2);
        }
        let idx = self.bucket_index(hash);
        let head = self.buckets[idx];
        if let Some(s) = arena.get_mut(id) {
            s.hnext = head;
        }
        self.buckets[idx] = Some(id);
        self.count += 1;
    }

    pub fn remove(&mut self, arena: &mut Arena<LuaString>, hash: u64, id: StringId) {
        let idx = self.bucket_index(hash);
        let mut cursor = self.buckets[idx];
        let mut prev: Option<StringId> = None;
        while let Some(cur) = cursor {
            let next = arena.get(cur).and_then(|s| s.hnext);
            if cur == id {
                match prev {
                    Some(p) => {
                        if let Some(s) = arena.get_mut(p) {
                            s.hnext = next;
                        }
                    }
                    None => self.buckets[idx] = next,
                }
                self.count -= 1;
                return;
            }
            prev = Some(cur);
            cursor = next;
        }
    }

    /// Rehashes every chain in place into a (possibly larger or smaller)
    /// bucket array, detaching and re-threading each node rather than
    /// reinterning it.
    pub fn resize(&mut self, arena: &mut Arena<LuaString>, new_size: usize) {
        let mut new_buckets: Vec<Option<StringId>> = vec![None; new_size.max(1)];
        for head in self.buckets.drain(..) {
            let mut cursor = head;
            while let Some(id) = cursor {
                let next = arena.get(id).and_then(|s| s.hnext);
                let hash = arena
                    .get(id)
                    .and_then(|s| s.hash_if_computed())
                    .unwrap_or(0);
                let idx = (hash as usize) & (new_size - 1);
                if let Some(s) = arena.get_mut(id) {
                    s.hnext = new_buckets[idx];
                }
                new_buckets[idx] = Some(id);
                cursor = next;
            }
        }
        self.buckets = new_buckets;
    }

    /// Halves bucket count when occupancy has dropped to a quarter or
    /// less of capacity, mirroring the reference sweep-time shrink.
    pub fn shrink_if_sparse(&mut self, arena: &mut Arena<LuaString>) {
        if self.buckets.len() > INITIAL_SIZE && self.count <= self.buckets.len() / 4 {
            self.resize(arena, self.buckets.len() / 2);
        }
    }
}

impl Default for StringTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixed `CACHE_ROWS x CACHE_COLS` grid mapping a caller-supplied identity
/// key (conventionally the address of the `&str` the host passed in) to
/// already-interned strings, avoiding a full hash+chain-walk when the same
/// host string is pushed repeatedly.
pub struct StringCache {
    rows: Vec<[Option<StringId>; limits::CACHE_COLS]>,
}

impl StringCache {
    pub fn new() -> Self {
        StringCache {
            rows: vec![[None; limits::CACHE_COLS]; limits::CACHE_ROWS],
        }
    }

    fn row_for(key: usize) -> usize {
        key % limits::CACHE_ROWS
    }

    /// Looks up `bytes` in the cache row for `key`; on a content match
    /// (not just key match, since `key` is only a bucketing heuristic)
    /// returns the cached id without touching `table`/`arena`. On miss,
    /// interns via `table`, evicts the row's oldest entry, and installs
    /// the new id at the row head.
    pub fn get_or_intern(
        &mut self,
        table: &mut StringTable,
        arena: &mut Arena<LuaString>,
        seed: u64,
        key: usize,
        bytes: &[u8],
    ) -> StringId {
        let row = Self::row_for(key);
        for slot in self.rows[row].iter() {
            if let Some(id) = slot {
                if arena.get(*id).map(|s| s.as_bytes()) == Some(bytes) {
                    return *id;
                }
            }
        }
        let id = intern_short(table, arena, seed, bytes);
        for i in (1..limits::CACHE_COLS).rev() {
            self.rows[row][i] = self.rows[row][i - 1];
        }
        self.rows[row][0] = Some(id);
        id
    }
}

impl Default for StringCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Interns `bytes` as a short string: hash, look up the existing object by
/// content, or allocate and register a new one. Calling this twice with
/// equal content returns the identical `StringId` (the intern-idempotence
/// law).
pub fn intern_short(
    table: &mut StringTable,
    arena: &mut Arena<LuaString>,
    seed: u64,
    bytes: &[u8],
) -> StringId {
    debug_assert!(bytes.len() <= limits::SHORT_MAX);
    let hash = lua_hash(bytes, seed);
    if let Some(id) = table.find_or_insert(arena, hash, bytes) {
        return id;
    }
    let id: StringId = arena.alloc(LuaString {
        header: GcHeader::new(TAG_SHRSTR),
        bytes: bytes.to_vec().into_boxed_slice(),
        hash,
        hash_computed: true,
        extra: 0,
        hnext: None,
    });
    table.insert(arena, hash, id);
    id
}

/// Creates a long string. Long strings are never deduplicated; the hash
/// field is lazily computed on first `LuaString::hash` call and the seed
/// is stashed there until then, matching the reference runtime's
/// `extra == 0` "hash not yet computed" convention.
pub fn new_long(arena: &mut Arena<LuaString>, seed: u64, bytes: Vec<u8>) -> StringId {
    arena.alloc(LuaString {
        header: GcHeader::new(TAG_LNGSTR),
        bytes: bytes.into_boxed_slice(),
        hash: seed,
        hash_computed: false,
        extra: 0,
        hnext: None,
    })
}

/// Creates either a short or a long string depending on `limits::SHORT_MAX`,
/// interning in the short case.
pub fn new_string(
    table: &mut StringTable,
    arena: &mut Arena<LuaString>,
    seed: u64,
    bytes: &[u8],
) -> StringId {
    if bytes.len() <= limits::SHORT_MAX {
        intern_short(table, arena, seed, bytes)
    } else {
        new_long(arena, seed, bytes.to_vec())
    }
}

/// Adapts an `Arena<LuaString>` to `value::StringLookup` so `LuaValue::raw_equal`
/// can compare long-string content without depending on this module.
pub struct StringArenaLookup<'a>(pub &'a Arena<LuaString>);

impl<'a> StringLookup for StringArenaLookup<'a> {
    fn long_string_bytes(&self, slot: u32) -> &[u8] {
        self.0
            .get(StringId::from_index(slot))
            .map(|s| s.as_bytes())
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_idempotence() {
        let mut table = StringTable::new();
        let mut arena = Arena::new();
        let a = intern_short(&mut table, &mut arena, 0x1234, b"hello");
        let b = intern_short(&mut table, &mut arena, 0x1234, b"hello");
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn distinct_content_distinct_ids() {
        let mut table = StringTable::new();
        let mut arena = Arena::new();
        let a = intern_short(&mut table, &mut arena, 7, b"foo");
        let b = intern_short(&mut table, &mut arena, 7, b"bar");
        assert_ne!(a, b);
    }

    #[test]
    fn resize_preserves_all_entries() {
        let mut table = StringTable::new();
        let mut arena = Arena::new();
        let mut ids = Vec::new();
        for i in 0..100u32 {
            let s = format!("s{i}");
            ids.push((s.clone(), intern_short(&mut table, &mut arena, 99, s.as_bytes())));
        }
        assert!(table.bucket_count() >= 100 || table.len() == 100);
        for (s, id) in &ids {
            let again = intern_short(&mut table, &mut arena, 99, s.as_bytes());
            assert_eq!(*id, again);
        }
    }

    #[test]
    fn long_string_hash_is_lazy() {
        let mut arena = Arena::new();
        let bytes: Vec<u8> = vec![b'x'; limits::SHORT_MAX + 1];
        let id = new_long(&mut arena, 42, bytes.clone());
        {
            let s = arena.get(id).unwrap();
            assert!(s.hash_if_computed().is_none());
        }
        let s = arena.get_mut(id).unwrap();
        let h1 = s.hash(42);
        let h2 = s.hash(42);
        assert_eq!(h1, h2);
        assert_eq!(h1, lua_hash(&bytes, 42));
    }

    #[test]
    fn string_cache_hits_on_repeat_key() {
        let mut table = StringTable::new();
        let mut arena = Arena::new();
        let mut cache = StringCache::new();
        let key: usize = 0xdead_beef;
        let a = cache.get_or_intern(&mut table, &mut arena, 1, key, b"cached");
        let b = cache.get_or_intern(&mut table, &mut arena, 1, key, b"cached");
        assert_eq!(a, b);
    }
}
