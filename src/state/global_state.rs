//! One per universe of cooperating threads: every shared, process-like
//! singleton the spec names — the string table/cache, the object arenas,
//! the registry, per-type default metatables, the allocator, and the
//! panic hook — lives here rather than behind a process-wide `static`,
//! per SPEC_FULL.md §9's "no process-wide singletons" design note.
//!
//! Grounded on this crate's teacher's `ObjectPool` (`object_pool.rs`) for
//! the arena-per-kind layout and id-generation discipline, generalized
//! from `HashMap<Id, T>` storage to this crate's `Arena<T>` (free-list
//! reuse) and extended with the table/prototype/closure/upvalue/userdata
//! kinds the teacher's pool didn't need.

use crate::allocator::AllocatorShim;
use crate::error::{LuaError, LuaFullError};
use crate::gc::arena::{Arena, ArenaId};
use crate::objects::{CClosure, LuaClosure, Prototype, ThreadId, ThreadObject, Userdata, UpvalueCell};
use crate::string_table::{self, LuaString, StringArenaLookup, StringCache, StringId, StringTable};
use crate::table::{KeyHash, Table, TableId};
use crate::value::{LuaValue, TYPE_BOOLEAN, TYPE_FUNCTION, TYPE_LIGHTUSERDATA, TYPE_NIL, TYPE_NUMBER, TYPE_STRING, TYPE_THREAD, TYPE_USERDATA};

/// Registered host (`CFunction`) entry point, resolved through the
/// small integer token a `LuaValue::light_cfunction`/`c_closure` carries
/// (see `value.rs`'s doc note on `to_pointer`). The `state` parameter is
/// the Host API surface (`crate::api::Api`); defined here as a function
/// pointer type alias rather than a trait object so registration stays
/// zero-allocation, matching the teacher's `NativeFunction` alias.
pub type CFunctionPtr = fn(&mut crate::api::Api) -> Result<i32, LuaFullError>;

/// Thread-status codes, the closed integer set of SPEC_FULL.md §6.
pub const STATUS_OK: i32 = 0;
pub const STATUS_YIELD: i32 = 1;
pub const STATUS_RUNTIME_ERROR: i32 = 2;
pub const STATUS_SYNTAX_ERROR: i32 = 3;
pub const STATUS_MEMORY_ERROR: i32 = 4;
pub const STATUS_FINALIZER_ERROR: i32 = 5;
pub const STATUS_ERROR_IN_ERROR_HANDLER: i32 = 6;

pub fn status_code_for(err: LuaError) -> i32 {
    err.status_code()
}

/// Registry reserved integer keys (SPEC_FULL.md §6).
pub const REGISTRY_MAIN_THREAD: i64 = 1;
pub const REGISTRY_GLOBALS: i64 = 2;

/// The readable version identity SPEC_FULL.md §6 asks for.
pub const VERSION: i64 = 503;

pub struct GlobalState {
    pub strings: Arena<LuaString>,
    pub string_table: StringTable,
    pub string_cache: StringCache,
    pub tables: Arena<Table>,
    pub userdata: Arena<Userdata>,
    pub prototypes: Arena<Prototype>,
    pub lua_closures: Arena<LuaClosure>,
    pub c_closures: Arena<CClosure>,
    pub upvalue_cells: Arena<UpvalueCell>,
    pub threads: Arena<ThreadObject>,
    /// Registry key `REGISTRY_MAIN_THREAD` (1) names this same thread
    /// object, per §6's reserved registry layout.
    pub main_thread: ThreadId,

    pub registry: TableId,
    /// Per-basic-type default metatable slot (`nil`/`boolean`/`number`/
    /// `string`/`lightuserdata`/`function`/`thread` share one metatable
    /// each, unlike table/userdata which carry their own).
    default_metatables: [Option<TableId>; 9],

    pub allocator: AllocatorShim,
    pub hash_seed: u64,
    cfunctions: Vec<CFunctionPtr>,

    panic_hook: Option<CFunctionPtr>,
    /// Fixed, never-collected string returned when allocation itself
    /// fails (so producing the memory-error message can't recursively
    /// need an allocation).
    pub memory_error_string: StringId,

    /// GC control knobs the Host API's `gc_*` entry points read/write.
    /// The collection *policy* itself (mark/sweep phases, when an
    /// incremental step actually scans objects) is the out-of-scope GC
    /// collaborator of SPEC_FULL.md §1; this crate only owns the
    /// stop/restart flag and the pause/step-multiplier percentages a real
    /// collector would consult.
    pub gc_running: bool,
    pub gc_pause: i32,
    pub gc_stepmul: i32,
}

impl GlobalState {
    pub fn new(hash_seed: u64) -> Self {
        let mut strings = Arena::new();
        let mut string_table = StringTable::new();
        let memory_error_string =
            string_table::intern_short(&mut string_table, &mut strings, hash_seed, b"not enough memory");

        let mut tables: Arena<Table> = Arena::new();
        let registry: TableId = tables.alloc(Table::new(0, 4));
        let mut threads: Arena<ThreadObject> = Arena::new();
        let main_thread: ThreadId = threads.alloc(ThreadObject::new(crate::state::call_frame::ThreadStatus::Running));

        let mut gs = GlobalState {
            strings,
            string_table,
            string_cache: StringCache::new(),
            tables,
            userdata: Arena::new(),
            prototypes: Arena::new(),
            lua_closures: Arena::new(),
            c_closures: Arena::new(),
            upvalue_cells: Arena::new(),
            threads,
            main_thread,
            registry,
            default_metatables: Default::default(),
            allocator: AllocatorShim::default(),
            hash_seed,
            cfunctions: Vec::new(),
            panic_hook: None,
            memory_error_string,
            gc_running: true,
            gc_pause: 200,
            gc_stepmul: 100,
        };
        let hasher = GlobalKeyHash::new(&gs.strings, gs.hash_seed);
        let main_thread_value = LuaValue::thread(main_thread.0);
        let registry = gs.registry;
        if let Some(reg) = gs.tables.get_mut(registry) {
            reg.raw_set(&hasher, LuaValue::integer(REGISTRY_MAIN_THREAD), main_thread_value);
        }
        gs
    }

    // --- strings ---

    pub fn intern_string(&mut self, bytes: &[u8]) -> StringId {
        string_table::new_string(&mut self.string_table, &mut self.strings, self.hash_seed, bytes)
    }

    /// Mirrors the host-pointer string cache: `key` is conventionally the
    /// address of the `&str`/`CStr` the embedder passed in, letting
    /// repeated pushes of the same host literal skip the hash+chain walk.
    pub fn cached_string(&mut self, key: usize, bytes: &[u8]) -> StringId {
        self.string_cache
            .get_or_intern(&mut self.string_table, &mut self.strings, self.hash_seed, key, bytes)
    }

    pub fn new_long_string(&mut self, bytes: Vec<u8>) -> StringId {
        string_table::new_long(&mut self.strings, self.hash_seed, bytes)
    }

    pub fn string_bytes(&self, id: StringId) -> &[u8] {
        self.strings.get(id).map(|s| s.as_bytes()).unwrap_or(&[])
    }

    pub fn string_lookup(&self) -> StringArenaLookup<'_> {
        StringArenaLookup(&self.strings)
    }

    // --- tables ---

    pub fn new_table(&mut self, array_size: usize, hash_size: usize) -> TableId {
        self.tables.alloc(Table::new(array_size, hash_size))
    }

    pub fn globals_table(&self) -> Option<TableId> {
        let reg = self.tables.get(self.registry)?;
        reg.raw_get(&self.as_key_hash(), &LuaValue::integer(REGISTRY_GLOBALS))
            .and_then(|v| v.gc_slot())
            .map(TableId::from_index)
    }

    pub fn ensure_globals_table(&mut self) -> TableId {
        if let Some(id) = self.globals_table() {
            return id;
        }
        let globals = self.new_table(0, 16);
        let hasher = GlobalKeyHash { strings: &self.strings, seed: self.hash_seed };
        if let Some(reg) = self.tables.get_mut(self.registry) {
            reg.raw_set(&hasher, LuaValue::integer(REGISTRY_GLOBALS), LuaValue::table(globals.0));
        }
        globals
    }

    pub fn as_key_hash(&self) -> GlobalKeyHash<'_> {
        GlobalKeyHash { strings: &self.strings, seed: self.hash_seed }
    }

    // --- default metatables ---

    fn metatable_slot(basic_type: u8) -> Option<usize> {
        match basic_type {
            TYPE_NIL => Some(0),
            TYPE_BOOLEAN => Some(1),
            TYPE_LIGHTUSERDATA => Some(2),
            TYPE_NUMBER => Some(3),
            TYPE_STRING => Some(4),
            TYPE_FUNCTION => Some(5),
            TYPE_USERDATA => Some(6),
            TYPE_THREAD => Some(7),
            _ => None,
        }
    }

    pub fn default_metatable(&self, basic_type: u8) -> Option<TableId> {
        Self::metatable_slot(basic_type).and_then(|i| self.default_metatables[i])
    }

    pub fn set_default_metatable(&mut self, basic_type: u8, mt: Option<TableId>) {
        if let Some(i) = Self::metatable_slot(basic_type) {
            self.default_metatables[i] = mt;
        }
    }

    // --- cfunction registration ---

    pub fn register_cfunction(&mut self, f: CFunctionPtr) -> usize {
        self.cfunctions.push(f);
        self.cfunctions.len() - 1
    }

    pub fn cfunction(&self, token: usize) -> Option<CFunctionPtr> {
        self.cfunctions.get(token).copied()
    }

    pub fn set_panic_hook(&mut self, hook: Option<CFunctionPtr>) {
        self.panic_hook = hook;
    }

    pub fn panic_hook(&self) -> Option<CFunctionPtr> {
        self.panic_hook
    }
}

impl Default for GlobalState {
    fn default() -> Self {
        GlobalState::new(0x9E3779B97F4A7C15)
    }
}

/// Adapts a `GlobalState`'s string arena into the `Table`'s `KeyHash`
/// seam: string keys hash/compare by content (short strings short-circuit
/// on arena-slot identity inside `LuaValue::raw_equal`), everything else
/// falls back to a structural bit-hash.
pub struct GlobalKeyHash<'a> {
    strings: &'a Arena<LuaString>,
    seed: u64,
}

impl<'a> GlobalKeyHash<'a> {
    /// Builds the hasher from its two fields directly rather than via
    /// `GlobalState::as_key_hash(&self)`: a caller that also needs a
    /// `&mut` borrow of some other `GlobalState` field in the same
    /// expression (e.g. `tables`) can take this constructor's two
    /// field-level borrows without tripping the whole-struct borrow that
    /// method would imply.
    pub(crate) fn new(strings: &'a Arena<LuaString>, seed: u64) -> Self {
        GlobalKeyHash { strings, seed }
    }
}

impl<'a> KeyHash for GlobalKeyHash<'a> {
    fn hash_value(&self, v: &LuaValue) -> u64 {
        if v.is_string() {
            let slot = v.as_gc_slot_unchecked();
            if let Some(s) = self.strings.get(StringId::from_index(slot)) {
                return s.hash_if_computed().unwrap_or_else(|| string_table::lua_hash(s.as_bytes(), self.seed));
            }
            return 0;
        }
        if let Some(f) = v.as_float() {
            return f.to_bits();
        }
        v.to_pointer_token().unwrap_or(0) as u64
    }

    fn values_equal(&self, a: &LuaValue, b: &LuaValue) -> bool {
        a.raw_equal(b, &StringArenaLookup(self.strings))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_has_reserved_keys_available() {
        let mut gs = GlobalState::default();
        let globals = gs.ensure_globals_table();
        assert!(gs.tables.is_valid(globals));
    }

    #[test]
    fn version_is_stable() {
        assert_eq!(VERSION, 503);
    }

    #[test]
    fn default_metatable_roundtrip() {
        let mut gs = GlobalState::default();
        let mt = gs.new_table(0, 0);
        gs.set_default_metatable(TYPE_STRING, Some(mt));
        assert_eq!(gs.default_metatable(TYPE_STRING), Some(mt));
        assert_eq!(gs.default_metatable(TYPE_NUMBER), None);
    }

    #[test]
    fn cfunction_registration_round_trips_token() {
        fn dummy(_api: &mut crate::api::Api) -> Result<i32, LuaFullError> {
            Ok(0)
        }
        let mut gs = GlobalState::default();
        let token = gs.register_cfunction(dummy);
        assert!(gs.cfunction(token).is_some());
    }
}
