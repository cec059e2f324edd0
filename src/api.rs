//! The Host Stack API: the embedder-facing surface an Lua-C-style host
//! uses to push, inspect, mutate, call into, and handle errors from
//! script values, built on `ExecutionState`'s stack/index-resolution
//! substrate and `GlobalState`'s shared arenas.
//!
//! Grounded on this crate's teacher's `LuaVM` entry points
//! (`get_global`/`set_global`/`table_get` in `lua_vm/mod.rs`), generalized
//! from that VM's direct `Rc<RefCell<_>>` table handles to index-based
//! calls into `GlobalState`'s arenas, and extended with the index/stack
//! manipulation, arithmetic, and call-protocol operations SPEC_FULL.md
//! §4.6 groups under "Host Stack API (summary of obligations)".
//!
//! The VM, parser, and table-engine metamethod dispatch are external
//! collaborators (SPEC_FULL.md §1 "Out of scope"); this module represents
//! each as the small abstract `MetamethodHost` trait below, called at
//! exactly the handful of places §4.6 documents as "may invoke
//! metamethods" / "executes bytecode". A no-op default (`NoMetamethods`)
//! lets the stack/value/table substrate be tested standalone.

use crate::error::{LuaError, LuaFullError, LuaResult};
use crate::gc::arena::ArenaId;
use crate::limits;
use crate::numeric::{self, ArithOp, CompareOp, LuaNumber};
use crate::state::call_frame::{CallFrame, ThreadStatus};
use crate::state::execution_state::{ExecutionState, ResolvedIndex};
use crate::state::global_state::GlobalState;
use crate::table::{KeyHash, TableId};
use crate::value::LuaValue;

/// The abstract seam for everything this crate's §1 leaves to external
/// collaborators: metamethod dispatch on table access/arithmetic/
/// comparison/concat, and running bytecode for a Lua-closure `call`.
/// `NoMetamethods` always declines (`Ok(None)`/raises `TypeError`),
/// matching an embedder that hasn't wired a VM/metatable engine in yet —
/// exactly the posture this crate's own test suite needs.
pub trait MetamethodHost {
    /// Looks up `__index` (or similar) on `meta` for `key` against
    /// `receiver` and returns the substituted value, or `None` if there is
    /// no applicable metamethod (the caller then raises `TypeError`).
    fn index(&mut self, api: &mut Api, receiver: LuaValue, key: LuaValue) -> LuaResult<Option<LuaValue>>;
    fn newindex(&mut self, api: &mut Api, receiver: LuaValue, key: LuaValue, value: LuaValue) -> LuaResult<bool>;
    fn arith(&mut self, api: &mut Api, op: ArithOp, a: LuaValue, b: LuaValue) -> LuaResult<Option<LuaValue>>;
    fn compare(&mut self, api: &mut Api, op: CompareOp, a: LuaValue, b: LuaValue) -> LuaResult<Option<bool>>;
    fn concat(&mut self, api: &mut Api, a: LuaValue, b: LuaValue) -> LuaResult<Option<LuaValue>>;
    /// Executes a Lua closure already pushed as the call target with
    /// `nargs` arguments above it; returns the number of results it left
    /// on the stack (mirroring the `CFunction` return convention).
    fn call_lua_closure(&mut self, api: &mut Api, closure_slot: usize, nargs: i32, nresults: i32) -> LuaResult<i32>;
}

pub struct NoMetamethods;

impl MetamethodHost for NoMetamethods {
    fn index(&mut self, _api: &mut Api, _receiver: LuaValue, _key: LuaValue) -> LuaResult<Option<LuaValue>> {
        Ok(None)
    }
    fn newindex(&mut self, _api: &mut Api, _receiver: LuaValue, _key: LuaValue, _value: LuaValue) -> LuaResult<bool> {
        Ok(false)
    }
    fn arith(&mut self, _api: &mut Api, _op: ArithOp, _a: LuaValue, _b: LuaValue) -> LuaResult<Option<LuaValue>> {
        Ok(None)
    }
    fn compare(&mut self, _api: &mut Api, _op: CompareOp, _a: LuaValue, _b: LuaValue) -> LuaResult<Option<bool>> {
        Ok(None)
    }
    fn concat(&mut self, _api: &mut Api, _a: LuaValue, _b: LuaValue) -> LuaResult<Option<LuaValue>> {
        Ok(None)
    }
    fn call_lua_closure(&mut self, _api: &mut Api, _closure_slot: usize, _nargs: i32, _nresults: i32) -> LuaResult<i32> {
        Err(LuaError::RuntimeError)
    }
}

/// `call`/`pcall`'s `nresults` sentinel meaning "keep everything the
/// callee returned".
pub const MULTI: i32 = -1;

/// The embedder's handle: one `ExecutionState` (the currently active
/// thread) plus the `GlobalState` it shares with any coroutine siblings.
/// Held together because almost every Host API entry point needs both
/// (a stack slot and the arena the slot's collectable tag names).
pub struct Api<'g> {
    pub global: &'g mut GlobalState,
    pub thread: ExecutionState,
    /// The message half of the most recently raised `CFunction` error,
    /// kept out of band because `LuaResult<T>` (the return type of every
    /// entry point, including `invoke`) carries only the `Copy` `LuaError`
    /// kind. `invoke` stashes it here when a `CFunction` returns
    /// `Err(LuaFullError)`, and `pcall` takes it back out to push the
    /// actual raised message instead of the kind's generic `Display` text.
    last_error: Option<LuaFullError>,
}

impl<'g> Api<'g> {
    pub fn new(global: &'g mut GlobalState) -> Self {
        let mut thread = ExecutionState::new();
        thread.status = ThreadStatus::Running;
        // A freshly-created thread still needs a root call frame for
        // index resolution to have a `base`/`func` to be relative to
        // (mirroring the reference runtime's `base_ci`, whose `func`
        // names a dummy slot 0 below the first value the embedder ever
        // pushes) — otherwise every positive/negative index would
        // resolve `Invalid` until the first `call`.
        thread.push(LuaValue::nil()).expect("a fresh stack has room for the root frame's func slot");
        let base = thread.top();
        thread
            .push_frame(CallFrame::new_c(0, base, base, crate::state::call_frame::MULTI))
            .expect("a fresh stack allows pushing its own root frame");
        Api { global, thread, last_error: None }
    }

    /// `Some(n)` when the running callee (the function slot of the
    /// innermost frame) is a `CClosure` with `n` upvalues — the context
    /// `resolve_index`'s upvalue-pseudo-index case needs to validate `k
    /// <= n`. `None` for a `LightCFunction` (no upvalues) or when there is
    /// no enclosing frame (top-level script call).
    fn current_closure_upvalue_count(&self) -> Option<usize> {
        use crate::gc::arena::ArenaId;
        let frame = self.thread.current_frame()?;
        let callee = *self.thread.get(frame.func)?;
        if !callee.check_tag(crate::value::TAG_C_CLOSURE) {
            return None;
        }
        let id = crate::objects::ClosureId::from_index(callee.as_gc_slot_unchecked());
        self.global.c_closures.get(id).map(|c| c.upvalues.len())
    }

    fn resolve(&self, idx: i32) -> ResolvedIndex {
        self.thread.resolve_index(idx, self.current_closure_upvalue_count())
    }

    fn slot_value(&self, idx: i32) -> LuaResult<LuaValue> {
        match self.resolve(idx) {
            ResolvedIndex::Slot(s) => Ok(*self.thread.get(s).unwrap_or(&LuaValue::nil())),
            ResolvedIndex::Registry => Ok(LuaValue::table(self.global.registry.0)),
            ResolvedIndex::Upvalue(_) | ResolvedIndex::Invalid => Err(LuaError::IndexOutOfBounds),
        }
    }

    // --- type interrogation ---

    pub fn type_of(&self, idx: i32) -> LuaResult<u8> {
        Ok(self.slot_value(idx)?.basic_type())
    }

    pub fn type_name(tag: u8) -> &'static str {
        LuaValue::nil().type_name_for(tag)
    }

    pub fn is_nil(&self, idx: i32) -> bool {
        self.slot_value(idx).map(|v| v.is_nil()).unwrap_or(false)
    }

    pub fn is_table(&self, idx: i32) -> bool {
        self.slot_value(idx).map(|v| v.is_table()).unwrap_or(false)
    }

    pub fn is_string(&self, idx: i32) -> bool {
        self.slot_value(idx).map(|v| v.is_string() || v.is_number()).unwrap_or(false)
    }

    pub fn is_function(&self, idx: i32) -> bool {
        self.slot_value(idx).map(|v| v.is_function()).unwrap_or(false)
    }

    /// Byte length for strings/userdata, table border for tables, 0
    /// otherwise.
    pub fn raw_len(&self, idx: i32) -> LuaResult<i64> {
        let v = self.slot_value(idx)?;
        if v.is_string() {
            return Ok(self.global.string_bytes(crate::string_table::StringId::from_index(v.as_gc_slot_unchecked())).len() as i64);
        }
        if v.is_full_userdata() {
            use crate::gc::arena::ArenaId;
            let id = crate::objects::UserdataId::from_index(v.as_gc_slot_unchecked());
            return Ok(self.global.userdata.get(id).map(|u| u.len()).unwrap_or(0) as i64);
        }
        if v.is_table() {
            use crate::gc::arena::ArenaId;
            let id = TableId::from_index(v.as_gc_slot_unchecked());
            let hasher = self.global.as_key_hash();
            return Ok(self.global.tables.get(id).map(|t| t.raw_len(&hasher)).unwrap_or(0));
        }
        Ok(0)
    }

    // --- conversions (stack -> host) ---

    pub fn to_integer(&self, idx: i32) -> Option<i64> {
        let v = self.slot_value(idx).ok()?;
        v.as_integer().or_else(|| {
            if v.is_string() {
                numeric::str_to_number(self.string_contents(&v)?).and_then(|n| match n {
                    LuaNumber::Int(i) => Some(i),
                    LuaNumber::Float(f) if f.fract() == 0.0 => Some(f as i64),
                    _ => None,
                })
            } else {
                None
            }
        })
    }

    pub fn to_number(&self, idx: i32) -> Option<f64> {
        let v = self.slot_value(idx).ok()?;
        v.as_float().or_else(|| {
            if v.is_string() {
                numeric::str_to_number(self.string_contents(&v)?).map(|n| n.as_f64())
            } else {
                None
            }
        })
    }

    pub fn to_boolean(&self, idx: i32) -> bool {
        self.slot_value(idx).map(|v| v.is_truthy()).unwrap_or(false)
    }

    fn string_contents(&self, v: &LuaValue) -> Option<&str> {
        if !v.is_string() {
            return None;
        }
        std::str::from_utf8(self.global.string_bytes(crate::string_table::StringId::from_index(v.as_gc_slot_unchecked()))).ok()
    }

    /// For a string value, returns its bytes directly; for a number,
    /// converts in place (mutating the stack slot, per §4.6) to an
    /// interned/managed string and returns that. May allocate, hence may
    /// trigger a GC step (the caller should re-fetch any previously
    /// resolved slot afterward per SPEC_FULL.md §9).
    pub fn to_lstring(&mut self, idx: i32) -> LuaResult<Vec<u8>> {
        let v = self.slot_value(idx)?;
        if v.is_string() {
            return Ok(self.global.string_bytes(crate::string_table::StringId::from_index(v.as_gc_slot_unchecked())).to_vec());
        }
        if v.is_number() {
            let n = if v.is_integer() {
                LuaNumber::Int(v.as_integer_unchecked())
            } else {
                LuaNumber::Float(v.as_float_unchecked())
            };
            let s = numeric::num_to_str(n);
            let id = self.global.intern_string(s.as_bytes());
            if let ResolvedIndex::Slot(slot) = self.resolve(idx) {
                self.thread.set_raw(slot, LuaValue::short_string(id.0));
            }
            return Ok(s.into_bytes());
        }
        Err(LuaError::TypeError)
    }

    // --- pushers ---

    fn push(&mut self, v: LuaValue) -> LuaResult<()> {
        if !self.thread.ensure_free(1) {
            return Err(LuaError::MemoryError);
        }
        self.thread.push(v)
    }

    pub fn push_nil(&mut self) -> LuaResult<()> {
        self.push(LuaValue::nil())
    }

    pub fn push_boolean(&mut self, b: bool) -> LuaResult<()> {
        self.push(LuaValue::boolean(b))
    }

    pub fn push_integer(&mut self, i: i64) -> LuaResult<()> {
        self.push(LuaValue::integer(i))
    }

    pub fn push_float(&mut self, n: f64) -> LuaResult<()> {
        self.push(LuaValue::float(n))
    }

    pub fn push_lstring(&mut self, bytes: &[u8]) -> LuaResult<()> {
        let v = if bytes.len() <= limits::SHORT_MAX {
            LuaValue::short_string(self.global.intern_string(bytes).0)
        } else {
            LuaValue::long_string(self.global.new_long_string(bytes.to_vec()).0)
        };
        self.push(v)
    }

    pub fn push_fstring(&mut self, fmt: &str, args: &[numeric::FormatArg<'_>]) -> LuaResult<()> {
        let s = numeric::format_string(fmt, args).map_err(|_| LuaError::RuntimeError)?;
        self.push_lstring(s.as_bytes())
    }

    pub fn push_light_userdata(&mut self, p: usize) -> LuaResult<()> {
        self.push(LuaValue::light_userdata(p))
    }

    /// Pops `n` upvalue values already pushed on top, registers `f`, and
    /// pushes the resulting `CClosure` (or a bare `LightCFunction` when
    /// `n == 0`, which allocates no closure object).
    pub fn push_cclosure(&mut self, f: crate::state::global_state::CFunctionPtr, n: usize) -> LuaResult<()> {
        let token = self.global.register_cfunction(f);
        if n == 0 {
            return self.push(LuaValue::light_cfunction(token));
        }
        let mut upvalues = Vec::with_capacity(n);
        for _ in 0..n {
            upvalues.push(self.thread.pop().ok_or(LuaError::RuntimeError)?);
        }
        upvalues.reverse();
        let id = self.global.c_closures.alloc::<crate::objects::ClosureId>(crate::objects::CClosure::new(token, upvalues));
        self.push(LuaValue::c_closure(id.0))
    }

    pub fn push_table(&mut self, array_hint: usize, hash_hint: usize) -> LuaResult<TableId> {
        let id = self.global.new_table(array_hint, hash_hint);
        self.push(LuaValue::table(id.0))?;
        Ok(id)
    }

    // --- table gets/sets (raw variants; metamethod-aware ones thread
    // through `MetamethodHost`) ---

    fn table_id_at(&self, idx: i32) -> LuaResult<TableId> {
        use crate::gc::arena::ArenaId;
        let v = self.slot_value(idx)?;
        if !v.is_table() {
            return Err(LuaError::TypeError);
        }
        Ok(TableId::from_index(v.as_gc_slot_unchecked()))
    }

    pub fn raw_get_field(&mut self, t_idx: i32, key: &[u8]) -> LuaResult<()> {
        let key_id = self.global.intern_string(key);
        let key_v = LuaValue::short_string(key_id.0);
        self.raw_get_with_key(t_idx, key_v)
    }

    pub fn raw_get_i(&mut self, t_idx: i32, i: i64) -> LuaResult<()> {
        self.raw_get_with_key(t_idx, LuaValue::integer(i))
    }

    fn raw_get_with_key(&mut self, t_idx: i32, key: LuaValue) -> LuaResult<()> {
        let table_id = self.table_id_at(t_idx)?;
        let hasher = self.global.as_key_hash();
        let v = self
            .global
            .tables
            .get(table_id)
            .and_then(|t| t.raw_get(&hasher, &key))
            .copied()
            .unwrap_or(LuaValue::nil());
        self.push(v)
    }

    pub fn raw_set_field(&mut self, t_idx: i32, key: &[u8], value: LuaValue) -> LuaResult<()> {
        let key_id = self.global.intern_string(key);
        self.raw_set_with_key(t_idx, LuaValue::short_string(key_id.0), value)
    }

    pub fn raw_set_i(&mut self, t_idx: i32, i: i64, value: LuaValue) -> LuaResult<()> {
        self.raw_set_with_key(t_idx, LuaValue::integer(i), value)
    }

    fn raw_set_with_key(&mut self, t_idx: i32, key: LuaValue, value: LuaValue) -> LuaResult<()> {
        if key.is_nil() {
            return Err(LuaError::TypeError);
        }
        let table_id = self.table_id_at(t_idx)?;
        let hasher = crate::state::global_state::GlobalKeyHash::new(&self.global.strings, self.global.hash_seed);
        if let Some(t) = self.global.tables.get_mut(table_id) {
            t.raw_set(&hasher, key, value);
            // Raw writes invalidate the metamethod-negative cache and
            // would register a write barrier with the (out-of-scope) GC;
            // this crate's arenas have no generational marking yet, so
            // the barrier call is the one seam left genuinely a no-op.
            t.flags = 0;
        }
        Ok(())
    }

    /// Shared get path for `get_table`/`get_field`/`get_i`: raw lookup
    /// against `receiver` if it is a table, falling through to
    /// `host.index` on a nil raw result (or on any non-table receiver),
    /// per §4.6's "fast path checks the table directly ... slow path
    /// invokes the collaborator's metamethod-chain lookup". With
    /// `NoMetamethods` this reduces to the raw lookup, which is exactly
    /// the "raw/metamethod agreement" law §8 states for `__index`-less
    /// tables.
    fn table_get_value(&mut self, receiver: LuaValue, key: LuaValue, host: &mut dyn MetamethodHost) -> LuaResult<LuaValue> {
        if receiver.is_table() {
            use crate::gc::arena::ArenaId;
            let id = TableId::from_index(receiver.as_gc_slot_unchecked());
            let hasher = self.global.as_key_hash();
            let raw = self.global.tables.get(id).and_then(|t| t.raw_get(&hasher, &key)).copied();
            if let Some(v) = raw {
                if !v.is_nil() {
                    return Ok(v);
                }
            }
            Ok(host.index(self, receiver, key)?.unwrap_or(LuaValue::nil()))
        } else {
            host.index(self, receiver, key)?.ok_or(LuaError::TypeError)
        }
    }

    /// `get_table(t_idx)`: reads the key off the top of the stack and
    /// replaces it in place with the result (the table index is resolved
    /// before the key is consumed, so a negative `t_idx` names the same
    /// slot the caller intended even though the key occupies the top).
    pub fn get_table(&mut self, t_idx: i32, host: &mut dyn MetamethodHost) -> LuaResult<()> {
        let receiver = self.slot_value(t_idx)?;
        let top = self.thread.top();
        if top == 0 {
            return Err(LuaError::RuntimeError);
        }
        let key = *self.thread.get(top - 1).ok_or(LuaError::RuntimeError)?;
        let v = self.table_get_value(receiver, key, host)?;
        self.thread.set_raw(top - 1, v);
        Ok(())
    }

    pub fn get_field(&mut self, t_idx: i32, key: &[u8], host: &mut dyn MetamethodHost) -> LuaResult<()> {
        let receiver = self.slot_value(t_idx)?;
        let key_id = self.global.intern_string(key);
        let key_v = LuaValue::short_string(key_id.0);
        let v = self.table_get_value(receiver, key_v, host)?;
        self.push(v)
    }

    pub fn get_i(&mut self, t_idx: i32, i: i64, host: &mut dyn MetamethodHost) -> LuaResult<()> {
        let receiver = self.slot_value(t_idx)?;
        let v = self.table_get_value(receiver, LuaValue::integer(i), host)?;
        self.push(v)
    }

    /// Shared set path for `set_table`/`set_field`/`set_i`: a raw write
    /// when `receiver` is a table with either no metatable or an
    /// existing non-nil raw value at `key` (Lua only consults
    /// `__newindex` on a true miss), otherwise `host.newindex`; if that
    /// declines, falls back to a raw write (mirroring `table_get_value`'s
    /// "no `__index`" agreement law on the set side).
    fn table_set_value(&mut self, receiver: LuaValue, key: LuaValue, value: LuaValue, host: &mut dyn MetamethodHost) -> LuaResult<()> {
        if key.is_nil() {
            return Err(LuaError::TypeError);
        }
        if receiver.is_table() {
            use crate::gc::arena::ArenaId;
            let id = TableId::from_index(receiver.as_gc_slot_unchecked());
            let hasher = self.global.as_key_hash();
            let has_raw = self
                .global
                .tables
                .get(id)
                .and_then(|t| t.raw_get(&hasher, &key))
                .map(|v| !v.is_nil())
                .unwrap_or(false);
            let has_metatable = self.global.tables.get(id).and_then(|t| t.metatable).is_some();
            if !has_raw && has_metatable && host.newindex(self, receiver, key, value)? {
                return Ok(());
            }
            let hasher = crate::state::global_state::GlobalKeyHash::new(&self.global.strings, self.global.hash_seed);
            if let Some(t) = self.global.tables.get_mut(id) {
                t.raw_set(&hasher, key, value);
                t.flags = 0;
            }
            Ok(())
        } else if host.newindex(self, receiver, key, value)? {
            Ok(())
        } else {
            Err(LuaError::TypeError)
        }
    }

    /// `set_table(t_idx)`: pops the key (`top-2`) and value (`top-1`)
    /// placed by the caller, writing through `table_set_value`.
    pub fn set_table(&mut self, t_idx: i32, host: &mut dyn MetamethodHost) -> LuaResult<()> {
        let receiver = self.slot_value(t_idx)?;
        let top = self.thread.top();
        if top < 2 {
            return Err(LuaError::RuntimeError);
        }
        let key = *self.thread.get(top - 2).ok_or(LuaError::RuntimeError)?;
        let value = *self.thread.get(top - 1).ok_or(LuaError::RuntimeError)?;
        self.table_set_value(receiver, key, value, host)?;
        self.thread.set_top_absolute(top - 2);
        Ok(())
    }

    pub fn set_field(&mut self, t_idx: i32, key: &[u8], host: &mut dyn MetamethodHost) -> LuaResult<()> {
        let receiver = self.slot_value(t_idx)?;
        let value = self.thread.pop().ok_or(LuaError::RuntimeError)?;
        let key_id = self.global.intern_string(key);
        let key_v = LuaValue::short_string(key_id.0);
        self.table_set_value(receiver, key_v, value, host)
    }

    pub fn set_i(&mut self, t_idx: i32, i: i64, host: &mut dyn MetamethodHost) -> LuaResult<()> {
        let receiver = self.slot_value(t_idx)?;
        let value = self.thread.pop().ok_or(LuaError::RuntimeError)?;
        self.table_set_value(receiver, LuaValue::integer(i), value, host)
    }

    /// `get_global(name)`: raw lookup in the registry's globals table.
    pub fn get_global(&mut self, name: &str) -> LuaResult<()> {
        let globals = self.global.ensure_globals_table();
        let key_id = self.global.intern_string(name.as_bytes());
        let hasher = self.global.as_key_hash();
        let v = self
            .global
            .tables
            .get(globals)
            .and_then(|t| t.raw_get(&hasher, &LuaValue::short_string(key_id.0)))
            .copied()
            .unwrap_or(LuaValue::nil());
        self.push(v)
    }

    pub fn set_global(&mut self, name: &str, value: LuaValue) -> LuaResult<()> {
        let globals = self.global.ensure_globals_table();
        let key_id = self.global.intern_string(name.as_bytes());
        let hasher = crate::state::global_state::GlobalKeyHash::new(&self.global.strings, self.global.hash_seed);
        if let Some(t) = self.global.tables.get_mut(globals) {
            t.raw_set(&hasher, LuaValue::short_string(key_id.0), value);
        }
        Ok(())
    }

    // --- metatable ops ---

    pub fn get_metatable(&self, idx: i32) -> LuaResult<Option<TableId>> {
        let v = self.slot_value(idx)?;
        if v.is_table() {
            use crate::gc::arena::ArenaId;
            let id = TableId::from_index(v.as_gc_slot_unchecked());
            return Ok(self.global.tables.get(id).and_then(|t| t.metatable));
        }
        if v.is_full_userdata() {
            use crate::gc::arena::ArenaId;
            let id = crate::objects::UserdataId::from_index(v.as_gc_slot_unchecked());
            return Ok(self.global.userdata.get(id).and_then(|u| u.metatable));
        }
        Ok(self.global.default_metatable(v.basic_type()))
    }

    pub fn set_metatable(&mut self, idx: i32, mt: Option<TableId>) -> LuaResult<()> {
        let v = self.slot_value(idx)?;
        if v.is_table() {
            use crate::gc::arena::ArenaId;
            let id = TableId::from_index(v.as_gc_slot_unchecked());
            if let Some(t) = self.global.tables.get_mut(id) {
                t.set_metatable(mt);
            }
            return Ok(());
        }
        if v.is_full_userdata() {
            use crate::gc::arena::ArenaId;
            let id = crate::objects::UserdataId::from_index(v.as_gc_slot_unchecked());
            if let Some(u) = self.global.userdata.get_mut(id) {
                u.metatable = mt;
            }
            return Ok(());
        }
        self.global.set_default_metatable(v.basic_type(), mt);
        Ok(())
    }

    // --- arithmetic & comparison ---

    fn to_number_operand(&self, v: LuaValue) -> Option<LuaNumber> {
        if v.is_integer() {
            Some(LuaNumber::Int(v.as_integer_unchecked()))
        } else if v.is_float() {
            Some(LuaNumber::Float(v.as_float_unchecked()))
        } else if v.is_string() {
            numeric::str_to_number(self.string_contents(&v)?)
        } else {
            None
        }
    }

    /// Pops the operand(s) (duplicating the sole operand for a unary op,
    /// sharing the binary path, per §4.6) and pushes the result; falls
    /// through to `host.arith` on a non-numeric operand, raising
    /// `TypeError` if that also declines.
    pub fn arith(&mut self, op: ArithOp, host: &mut dyn MetamethodHost) -> LuaResult<()> {
        let b_val = self.thread.pop().ok_or(LuaError::RuntimeError)?;
        let a_val = if op.is_unary() { b_val } else { self.thread.pop().ok_or(LuaError::RuntimeError)? };
        match (self.to_number_operand(a_val), self.to_number_operand(b_val)) {
            (Some(a), Some(b)) => {
                let r = numeric::arith(op, a, b)?;
                let v = match r {
                    LuaNumber::Int(i) => LuaValue::integer(i),
                    LuaNumber::Float(f) => LuaValue::float(f),
                };
                self.push(v)
            }
            _ => match host.arith(self, op, a_val, b_val)? {
                Some(v) => self.push(v),
                None => Err(LuaError::TypeError),
            },
        }
    }

    pub fn compare(&mut self, i: i32, j: i32, op: CompareOp, host: &mut dyn MetamethodHost) -> LuaResult<bool> {
        let a = self.slot_value(i)?;
        let b = self.slot_value(j)?;
        if let (Some(na), Some(nb)) = (self.to_number_operand(a), self.to_number_operand(b)) {
            return Ok(match op {
                // Compare as integers when both sides are `Int` so large
                // magnitudes don't lose precision going through `f64`;
                // fall back to a float compare for any mixed/float pair.
                CompareOp::Eq => match (na, nb) {
                    (LuaNumber::Int(x), LuaNumber::Int(y)) => x == y,
                    _ => na.as_f64() == nb.as_f64(),
                },
                CompareOp::Lt => na.as_f64() < nb.as_f64(),
                CompareOp::Le => na.as_f64() <= nb.as_f64(),
            });
        }
        if op == CompareOp::Eq && a.is_string() && b.is_string() {
            return Ok(a.raw_equal(&b, &self.global.string_lookup()));
        }
        match host.compare(self, op, a, b)? {
            Some(r) => Ok(r),
            None if op == CompareOp::Eq => Ok(a.raw_equal(&b, &self.global.string_lookup())),
            None => Err(LuaError::TypeError),
        }
    }

    pub fn raw_equal(&self, i: i32, j: i32) -> LuaResult<bool> {
        let a = self.slot_value(i)?;
        let b = self.slot_value(j)?;
        Ok(a.raw_equal(&b, &self.global.string_lookup()))
    }

    // --- concat ---

    /// Concatenates the top `n` values (strings/numbers directly;
    /// anything else via `host.concat`) into one result, popping `n-1`
    /// slots.
    pub fn concat(&mut self, n: usize, host: &mut dyn MetamethodHost) -> LuaResult<()> {
        if n == 0 {
            return self.push_lstring(b"");
        }
        let mut values = Vec::with_capacity(n);
        for _ in 0..n {
            values.push(self.thread.pop().ok_or(LuaError::RuntimeError)?);
        }
        values.reverse();
        let mut acc = values[0];
        for next in &values[1..] {
            acc = self.concat_pair(acc, *next, host)?;
        }
        self.push(acc)
    }

    fn concat_pair(&mut self, a: LuaValue, b: LuaValue, host: &mut dyn MetamethodHost) -> LuaResult<LuaValue> {
        let a_str = self.concat_operand_bytes(a);
        let b_str = self.concat_operand_bytes(b);
        if let (Some(sa), Some(sb)) = (a_str, b_str) {
            let mut bytes = sa;
            bytes.extend_from_slice(&sb);
            let id = self.global.intern_string(&bytes);
            return Ok(if bytes.len() <= limits::SHORT_MAX {
                LuaValue::short_string(id.0)
            } else {
                LuaValue::long_string(self.global.new_long_string(bytes).0)
            });
        }
        host.concat(self, a, b)?.ok_or(LuaError::TypeError)
    }

    fn concat_operand_bytes(&self, v: LuaValue) -> Option<Vec<u8>> {
        if v.is_string() {
            return Some(self.global.string_bytes(crate::string_table::StringId::from_index(v.as_gc_slot_unchecked())).to_vec());
        }
        if v.is_number() {
            let n = if v.is_integer() { LuaNumber::Int(v.as_integer_unchecked()) } else { LuaNumber::Float(v.as_float_unchecked()) };
            return Some(numeric::num_to_str(n).into_bytes());
        }
        None
    }

    // --- calls ---

    /// `call(nargs, nresults)`: function at `top - nargs - 1`, then
    /// `nargs` arguments. For a `LightCFunction`/`CClosure` callee this
    /// invokes the registered Rust function directly; for a `LuaClosure`
    /// it delegates to `host.call_lua_closure` (bytecode execution is
    /// out of scope here).
    pub fn call(&mut self, nargs: i32, nresults: i32, host: &mut dyn MetamethodHost) -> LuaResult<()> {
        let top = self.thread.top();
        let func_slot = top
            .checked_sub(nargs as usize + 1)
            .ok_or(LuaError::RuntimeError)?;
        let callee = *self.thread.get(func_slot).ok_or(LuaError::RuntimeError)?;
        let produced = self.invoke(callee, func_slot, nargs, nresults, host)?;
        self.finish_call(func_slot, nargs, produced, nresults)
    }

    fn invoke(
        &mut self,
        callee: LuaValue,
        func_slot: usize,
        nargs: i32,
        nresults: i32,
        host: &mut dyn MetamethodHost,
    ) -> LuaResult<i32> {
        // Cleared at entry so a stale message from some earlier, unrelated
        // call never gets mistaken for this call's raised error by
        // `pcall`'s kind-matching fallback below.
        self.last_error = None;
        if callee.is_c_function() {
            let token = if callee.tt_is_light_cfunction() {
                callee.as_light_cfunction_token_unchecked()
            } else {
                use crate::gc::arena::ArenaId;
                let id = crate::objects::ClosureId::from_index(callee.as_gc_slot_unchecked());
                self.global.c_closures.get(id).map(|c| c.function_token).ok_or(LuaError::RuntimeError)?
            };
            let f = self.global.cfunction(token).ok_or(LuaError::RuntimeError)?;
            self.thread.push_frame(CallFrame::new_c(func_slot, func_slot + 1, self.thread.top(), nresults))?;
            let result = f(self);
            self.thread.pop_frame();
            match result {
                Ok(n) => Ok(n),
                Err(full) => {
                    let kind = full.kind();
                    self.last_error = Some(full);
                    Err(kind)
                }
            }
        } else if callee.is_lua_function() {
            self.thread.push_frame(CallFrame::new_lua(func_slot, func_slot + 1, self.thread.top(), nresults))?;
            let r = host.call_lua_closure(self, func_slot, nargs, nresults);
            self.thread.pop_frame();
            r
        } else {
            Err(LuaError::TypeError)
        }
    }

    /// Replaces the call block `[func_slot..top)` with exactly
    /// `nresults` values (or everything produced, when `nresults ==
    /// MULTI`), matching the "outputs ... nresults values in place of the
    /// call block" contract.
    fn finish_call(&mut self, func_slot: usize, nargs: i32, produced: i32, nresults: i32) -> LuaResult<()> {
        let results_start = self.thread.top() - produced.max(0) as usize;
        let want = if nresults == MULTI { produced } else { nresults };
        for i in 0..want {
            let src = results_start + i as usize;
            let dst = func_slot + i as usize;
            let v = if (i as i32) < produced {
                *self.thread.get(src).unwrap_or(&LuaValue::nil())
            } else {
                LuaValue::nil()
            };
            self.thread.set_raw(dst, v);
        }
        let _ = nargs;
        // `invoke` already popped the callee's own frame, so the "current
        // frame" here (if any) is the *caller's* — frame-relative
        // `set_top` would misplace the block against the wrong base.
        // Absolute positioning is what the call-block replacement
        // contract actually calls for.
        self.thread.set_top_absolute(func_slot + want as usize);
        Ok(())
    }

    /// `pcall(nargs, nresults, errfunc)`: on success behaves like `call`;
    /// on a raised error the stack is rewound to the call block's
    /// pre-state and exactly one error value (run through `errfunc` if
    /// nonzero) is pushed, with the returned status code.
    ///
    /// `errfunc`, when nonzero, names a stack slot holding the message
    /// handler; it is resolved *before* the protected call runs (the call
    /// block it guards is still on the stack then, and the call itself may
    /// shift `top`). Per §7, the handler "is invoked on the raw error
    /// before it is delivered"; an error raised inside the handler itself
    /// yields `error-in-error-handler` rather than propagating further.
    pub fn pcall(&mut self, nargs: i32, nresults: i32, errfunc: i32, host: &mut dyn MetamethodHost) -> i32 {
        let top_before = self.thread.top();
        let call_block_base = top_before - (nargs as usize + 1);
        let handler = if errfunc != 0 { self.slot_value(errfunc).ok() } else { None };
        match self.call(nargs, nresults, host) {
            Ok(()) => 0,
            Err(e) => {
                // `invoke` stashed the raised `CFunction`'s actual message
                // (if any) in `last_error`; fall back to the error kind's
                // generic text only when no such message survived (e.g.
                // the error came from a Lua-closure call, which has no
                // message channel in this crate's scope).
                let message = self
                    .last_error
                    .take()
                    .filter(|full| full.kind() == e)
                    .map(|full| full.message().to_string())
                    .unwrap_or_else(|| e.to_string());
                self.thread.set_top_absolute(call_block_base);
                match handler {
                    Some(h) if !h.is_nil() => match self.invoke_error_handler(h, &message, host) {
                        Ok(()) => e.status_code(),
                        Err(_) => {
                            self.thread.set_top_absolute(call_block_base);
                            let _ = self.push_lstring(b"error in error handling");
                            LuaError::ErrorInErrorHandling.status_code()
                        }
                    },
                    _ => {
                        let _ = self.push_lstring(message.as_bytes());
                        e.status_code()
                    }
                }
            }
        }
    }

    /// Runs the `pcall` message handler `h` on `message`, leaving its
    /// single result (the handled error object) on top, per §7's "that
    /// function is invoked on the raw error before it is delivered".
    fn invoke_error_handler(&mut self, h: LuaValue, message: &str, host: &mut dyn MetamethodHost) -> LuaResult<()> {
        self.thread.push(h)?;
        self.push_lstring(message.as_bytes())?;
        self.call(1, 1, host)
    }

    // --- upvalue introspection ---

    /// Resolves Lua-closure upvalue `n`'s cell to its current value
    /// (reading through the thread stack slot while open, the cell's own
    /// storage once closed).
    fn read_upvalue_cell(&self, cell_id: crate::objects::UpvalueCellId) -> Option<LuaValue> {
        let cell = self.global.upvalue_cells.get(cell_id)?;
        match cell.open_slot() {
            Some(slot) => self.thread.get(slot).copied(),
            None => cell.closed_value(),
        }
    }

    fn write_upvalue_cell(&mut self, cell_id: crate::objects::UpvalueCellId, value: LuaValue) -> bool {
        let slot = match self.global.upvalue_cells.get(cell_id) {
            Some(cell) => cell.open_slot(),
            None => return false,
        };
        match slot {
            Some(slot) => {
                self.thread.set_raw(slot, value);
                true
            }
            None => {
                if let Some(cell) = self.global.upvalue_cells.get_mut(cell_id) {
                    cell.close(value);
                    true
                } else {
                    false
                }
            }
        }
    }

    pub fn get_upvalue(&self, closure_idx: i32, n: u32) -> LuaResult<Option<LuaValue>> {
        use crate::gc::arena::ArenaId;
        let v = self.slot_value(closure_idx)?;
        if v.is_lua_function() {
            let id = crate::objects::ClosureId::from_index(v.as_gc_slot_unchecked());
            let cell_id = match self.global.lua_closures.get(id).and_then(|c| c.upvalues.get(n as usize)) {
                Some(id) => *id,
                None => return Ok(None),
            };
            return Ok(self.read_upvalue_cell(cell_id));
        }
        if v.tt_is_light_cfunction() {
            return Ok(None);
        }
        let id = crate::objects::ClosureId::from_index(v.as_gc_slot_unchecked());
        Ok(self.global.c_closures.get(id).and_then(|c| c.upvalues.get(n as usize)).copied())
    }

    pub fn set_upvalue(&mut self, closure_idx: i32, n: u32, value: LuaValue) -> LuaResult<bool> {
        use crate::gc::arena::ArenaId;
        let v = self.slot_value(closure_idx)?;
        if v.is_lua_function() {
            let id = crate::objects::ClosureId::from_index(v.as_gc_slot_unchecked());
            let cell_id = match self.global.lua_closures.get(id).and_then(|c| c.upvalues.get(n as usize)) {
                Some(id) => *id,
                None => return Ok(false),
            };
            return Ok(self.write_upvalue_cell(cell_id, value));
        }
        if v.tt_is_light_cfunction() {
            return Ok(false);
        }
        let id = crate::objects::ClosureId::from_index(v.as_gc_slot_unchecked());
        if let Some(c) = self.global.c_closures.get_mut(id) {
            if let Some(slot) = c.upvalues.get_mut(n as usize) {
                *slot = value;
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Makes Lua closure `idx1`'s upvalue `n1` alias the same cell as
    /// closure `idx2`'s upvalue `n2` (shared-upvalue semantics, §4.6):
    /// the old cell's refcount is released (freeing it from the arena
    /// once it reaches zero) and the new cell's is retained. Returns
    /// `false` without effect if either slot doesn't resolve to a Lua
    /// closure's upvalue.
    pub fn join_upvalue(&mut self, idx1: i32, n1: u32, idx2: i32, n2: u32) -> LuaResult<bool> {
        use crate::gc::arena::ArenaId;
        let v1 = self.slot_value(idx1)?;
        let v2 = self.slot_value(idx2)?;
        if !v1.is_lua_function() || !v2.is_lua_function() {
            return Ok(false);
        }
        let id1 = crate::objects::ClosureId::from_index(v1.as_gc_slot_unchecked());
        let id2 = crate::objects::ClosureId::from_index(v2.as_gc_slot_unchecked());
        let new_cell = match self.global.lua_closures.get(id2).and_then(|c| c.upvalues.get(n2 as usize)) {
            Some(id) => *id,
            None => return Ok(false),
        };
        let old_cell = match self.global.lua_closures.get(id1).and_then(|c| c.upvalues.get(n1 as usize)) {
            Some(id) => *id,
            None => return Ok(false),
        };
        if old_cell.index() == new_cell.index() {
            return Ok(true);
        }
        if let Some(cell) = self.global.upvalue_cells.get_mut(new_cell) {
            cell.retain();
        }
        if let Some(cell) = self.global.upvalue_cells.get_mut(old_cell) {
            if cell.release() {
                self.global.upvalue_cells.free(old_cell);
            }
        }
        if let Some(c) = self.global.lua_closures.get_mut(id1) {
            if let Some(slot) = c.upvalues.get_mut(n1 as usize) {
                *slot = new_cell;
            }
        }
        Ok(true)
    }

    // --- GC control (delegates debt accounting to the allocator shim;
    // the actual mark/sweep policy is out of scope per §1) ---

    pub fn gc_count_bytes(&self) -> usize {
        self.global.allocator.total_bytes()
    }

    pub fn gc_debt(&self) -> i64 {
        self.global.allocator.gc_debt()
    }

    pub fn gc_stop(&mut self) {
        self.global.gc_running = false;
    }

    pub fn gc_restart(&mut self) {
        self.global.gc_running = true;
    }

    pub fn gc_is_running(&self) -> bool {
        self.global.gc_running
    }

    /// `collect()`: runs a full collection via `collector` regardless of
    /// the running/stopped flag (an explicit request always collects),
    /// returning the bytes `collector` reports freed.
    pub fn gc_collect(&mut self, collector: &mut dyn crate::allocator::EmergencyCollector) -> usize {
        collector.emergency_collect()
    }

    /// `step()`: runs one incremental slice only if debt is due and the
    /// collector hasn't been stopped; returns whether a slice ran.
    pub fn gc_step(&mut self, collector: &mut dyn crate::allocator::EmergencyCollector) -> bool {
        if !self.global.gc_running {
            return false;
        }
        if self.global.allocator.step_due() {
            collector.emergency_collect();
            true
        } else {
            false
        }
    }

    pub fn gc_pause(&self) -> i32 {
        self.global.gc_pause
    }

    pub fn gc_set_pause(&mut self, pause: i32) -> i32 {
        std::mem::replace(&mut self.global.gc_pause, pause)
    }

    pub fn gc_stepmul(&self) -> i32 {
        self.global.gc_stepmul
    }

    pub fn gc_set_stepmul(&mut self, stepmul: i32) -> i32 {
        std::mem::replace(&mut self.global.gc_stepmul, stepmul)
    }

    // --- load/dump ---

    /// `load(reader, name, mode)`: runs `loader` (the out-of-scope parser
    /// collaborator) and pushes the resulting main `LuaClosure`, its first
    /// upvalue (`_ENV`) bound to the globals table, per §4.6.
    pub fn load(
        &mut self,
        name: &str,
        mode: crate::load::LoadMode,
        reader: crate::load::ReaderFn,
        loader: &mut dyn crate::load::ChunkLoader,
    ) -> LuaResult<()> {
        let proto = loader.load(name, mode, reader)?;
        let globals = self.global.ensure_globals_table();
        let env_cell = self
            .global
            .upvalue_cells
            .alloc::<crate::objects::UpvalueCellId>(crate::objects::UpvalueCell::closed(LuaValue::table(globals.0)));
        let closure = self
            .global
            .lua_closures
            .alloc::<crate::objects::ClosureId>(crate::objects::LuaClosure::new(proto, vec![env_cell]));
        self.push(LuaValue::lua_closure(closure.0))
    }

    /// `dump(writer, strip)`: serializes the Lua closure at `idx`'s
    /// prototype via `loader` (the out-of-scope binary-chunk dumper).
    pub fn dump(
        &mut self,
        idx: i32,
        strip: bool,
        writer: crate::load::WriterFn,
        loader: &mut dyn crate::load::ChunkLoader,
    ) -> LuaResult<()> {
        use crate::gc::arena::ArenaId;
        let v = self.slot_value(idx)?;
        if !v.is_lua_function() {
            return Err(LuaError::TypeError);
        }
        let closure_id = crate::objects::ClosureId::from_index(v.as_gc_slot_unchecked());
        let proto = self
            .global
            .lua_closures
            .get(closure_id)
            .map(|c| c.prototype)
            .ok_or(LuaError::RuntimeError)?;
        loader.dump(proto, strip, writer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_api(gs: &mut GlobalState) -> Api<'_> {
        Api::new(gs)
    }

    #[test]
    fn scenario_push_integers_add() {
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        api.push_integer(3).unwrap();
        api.push_integer(4).unwrap();
        api.arith(ArithOp::Add, &mut NoMetamethods).unwrap();
        assert_eq!(api.to_integer(-1), Some(7));
    }

    #[test]
    fn scenario_string_plus_number_coerces_to_float() {
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        api.push_lstring(b"12").unwrap();
        api.push_float(3.5).unwrap();
        api.arith(ArithOp::Add, &mut NoMetamethods).unwrap();
        assert!(api.type_of(-1).unwrap() == crate::value::TYPE_NUMBER);
        assert_eq!(api.to_number(-1), Some(15.5));
    }

    #[test]
    fn scenario_equal_short_strings_share_identity() {
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        api.push_lstring(b"hello").unwrap();
        api.push_lstring(b"hello").unwrap();
        assert!(api.raw_equal(-1, -2).unwrap());
    }

    #[test]
    fn scenario_table_set_then_get() {
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        api.push_table(0, 0).unwrap();
        api.raw_set_field(-1, b"k", LuaValue::integer(7)).unwrap();
        api.raw_get_field(-1, b"k").unwrap();
        assert_eq!(api.to_integer(-1), Some(7));
    }

    #[test]
    fn pcall_catches_raised_error() {
        fn boom(_api: &mut Api) -> Result<i32, LuaFullError> {
            Err(LuaFullError::new(LuaError::RuntimeError, "boom"))
        }
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        api.push_cclosure(boom, 0).unwrap();
        let status = api.pcall(0, 1, 0, &mut NoMetamethods);
        assert_eq!(status, LuaError::RuntimeError.status_code());
        let msg = api.to_lstring(-1).unwrap();
        assert!(String::from_utf8(msg).unwrap().contains("boom"));
    }

    #[test]
    fn pcall_runs_errfunc_on_the_raised_error() {
        fn boom(_api: &mut Api) -> Result<i32, LuaFullError> {
            Err(LuaFullError::new(LuaError::RuntimeError, "boom"))
        }
        fn handler(api: &mut Api) -> Result<i32, LuaFullError> {
            // Prepend a marker so the test can tell the handler actually
            // ran on the raw error rather than being skipped. The raw
            // argument slot is left in place below the pushed result;
            // `finish_call`'s absolute top cut discards it along with the
            // rest of the call block, same as any other `CFunction` that
            // leaves scratch values under its declared results.
            let raw = api.to_lstring(-1).map_err(|e| LuaFullError::new(e, ""))?;
            let mut handled = b"handled: ".to_vec();
            handled.extend_from_slice(&raw);
            api.push_lstring(&handled).map_err(|e| LuaFullError::new(e, ""))?;
            Ok(1)
        }
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        // Positive indices are frame-relative (`slot = func + idx`); the
        // root frame's `func` is slot 0, so the slot the handler is about
        // to occupy is also its correct positive index.
        let errfunc = api.thread.top() as i32;
        api.push_cclosure(handler, 0).unwrap();
        api.push_cclosure(boom, 0).unwrap();
        let status = api.pcall(0, 1, errfunc, &mut NoMetamethods);
        assert_eq!(status, LuaError::RuntimeError.status_code());
        let msg = api.to_lstring(-1).unwrap();
        assert_eq!(String::from_utf8(msg).unwrap(), "handled: boom");
    }

    #[test]
    fn pcall_reports_error_in_error_handler() {
        fn boom(_api: &mut Api) -> Result<i32, LuaFullError> {
            Err(LuaFullError::new(LuaError::RuntimeError, "boom"))
        }
        fn bad_handler(_api: &mut Api) -> Result<i32, LuaFullError> {
            Err(LuaFullError::new(LuaError::RuntimeError, "handler exploded"))
        }
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        let errfunc = api.thread.top() as i32;
        api.push_cclosure(bad_handler, 0).unwrap();
        api.push_cclosure(boom, 0).unwrap();
        let status = api.pcall(0, 1, errfunc, &mut NoMetamethods);
        assert_eq!(status, LuaError::ErrorInErrorHandling.status_code());
    }

    #[test]
    fn pcall_restores_stack_depth_modulo_one_error_value() {
        fn boom(_api: &mut Api) -> Result<i32, LuaFullError> {
            Err(LuaFullError::new(LuaError::RuntimeError, "boom"))
        }
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        api.push_integer(1).unwrap();
        let top_before_call_block = api.thread.top();
        api.push_cclosure(boom, 0).unwrap();
        api.push_integer(9).unwrap();
        api.pcall(1, 1, 0, &mut NoMetamethods);
        assert_eq!(api.thread.top(), top_before_call_block + 1);
    }

    #[test]
    fn call_replaces_call_block_with_exactly_nresults() {
        fn two_results(api: &mut Api) -> Result<i32, LuaFullError> {
            api.push_integer(10).map_err(|e| LuaFullError::new(e, ""))?;
            api.push_integer(20).map_err(|e| LuaFullError::new(e, ""))?;
            Ok(2)
        }
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        api.push_cclosure(two_results, 0).unwrap();
        let top_before = api.thread.top();
        api.call(0, 1, &mut NoMetamethods).unwrap();
        assert_eq!(api.thread.top(), top_before);
        assert_eq!(api.to_integer(-1), Some(10));
    }

    #[test]
    fn gc_stop_then_restart_roundtrip() {
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        assert!(api.gc_is_running());
        api.gc_stop();
        assert!(!api.gc_is_running());
        api.gc_restart();
        assert!(api.gc_is_running());
    }

    #[test]
    fn gc_set_pause_returns_previous_value() {
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        let prev = api.gc_set_pause(150);
        assert_eq!(prev, 200);
        assert_eq!(api.gc_pause(), 150);
    }

    #[test]
    fn load_pushes_main_closure_bound_to_globals() {
        use crate::load::{ChunkLoader, LoadMode, ReaderFn, WriterFn};
        use crate::objects::PrototypeId;

        struct StubLoader;
        impl ChunkLoader for StubLoader {
            fn load(&mut self, _name: &str, _mode: LoadMode, _reader: ReaderFn) -> LuaResult<crate::objects::PrototypeId> {
                Ok(PrototypeId(0))
            }
            fn dump(&mut self, _proto: PrototypeId, _strip: bool, _writer: WriterFn) -> LuaResult<()> {
                Ok(())
            }
        }

        let mut gs = GlobalState::default();
        // Give the stub prototype id a real backing object so `dump`
        // below can resolve it.
        gs.prototypes.alloc::<PrototypeId>(crate::objects::Prototype::new(0, false, 2));
        let mut api = new_api(&mut gs);
        let mut loader = StubLoader;
        let mut reader: ReaderFn = &mut || None;
        api.load("chunk", LoadMode::Text, &mut reader, &mut loader).unwrap();
        assert!(api.slot_value(-1).unwrap().is_lua_function());

        let mut dumped = Vec::new();
        let mut writer: WriterFn = &mut |bytes| {
            dumped.extend_from_slice(bytes);
            true
        };
        api.dump(-1, false, &mut writer, &mut loader).unwrap();
    }

    #[test]
    fn get_field_agrees_with_raw_get_without_metamethod() {
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        api.push_table(0, 0).unwrap();
        api.raw_set_field(-1, b"k", LuaValue::integer(7)).unwrap();
        api.get_field(-1, b"k", &mut NoMetamethods).unwrap();
        assert_eq!(api.to_integer(-1), Some(7));
    }

    #[test]
    fn get_table_replaces_key_in_place_on_top() {
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        api.push_table(0, 0).unwrap();
        api.raw_set_field(-1, b"k", LuaValue::integer(9)).unwrap();
        api.push_lstring(b"k").unwrap();
        let top_before = api.thread.top();
        api.get_table(-2, &mut NoMetamethods).unwrap();
        assert_eq!(api.thread.top(), top_before);
        assert_eq!(api.to_integer(-1), Some(9));
    }

    #[test]
    fn set_table_pops_key_and_value() {
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        api.push_table(0, 0).unwrap();
        api.push_lstring(b"k").unwrap();
        api.push_integer(5).unwrap();
        let top_before = api.thread.top();
        api.set_table(-3, &mut NoMetamethods).unwrap();
        assert_eq!(api.thread.top(), top_before - 2);
        api.raw_get_field(-1, b"k").unwrap();
        assert_eq!(api.to_integer(-1), Some(5));
    }

    #[test]
    fn set_field_and_get_field_roundtrip() {
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        api.push_table(0, 0).unwrap();
        api.push_integer(42).unwrap();
        api.set_field(-2, b"answer", &mut NoMetamethods).unwrap();
        api.get_field(-1, b"answer", &mut NoMetamethods).unwrap();
        assert_eq!(api.to_integer(-1), Some(42));
    }

    #[test]
    fn set_i_and_get_i_roundtrip() {
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        api.push_table(0, 0).unwrap();
        api.push_integer(100).unwrap();
        api.set_i(-2, 1, &mut NoMetamethods).unwrap();
        api.get_i(-1, 1, &mut NoMetamethods).unwrap();
        assert_eq!(api.to_integer(-1), Some(100));
    }

    #[test]
    fn get_field_on_non_table_without_metamethod_is_type_error() {
        let mut gs = GlobalState::default();
        let mut api = new_api(&mut gs);
        api.push_integer(3).unwrap();
        assert!(matches!(api.get_field(-1, b"k", &mut NoMetamethods), Err(LuaError::TypeError)));
    }

    #[test]
    fn join_upvalue_shares_cell_between_lua_closures() {
        use crate::objects::{ClosureId, LuaClosure, Prototype, PrototypeId, UpvalueCell, UpvalueCellId};
        let mut gs = GlobalState::default();
        let proto = gs.prototypes.alloc::<PrototypeId>(Prototype::new(0, false, 2));
        let cell_a = gs.upvalue_cells.alloc::<UpvalueCellId>(UpvalueCell::closed(LuaValue::integer(1)));
        let cell_b = gs.upvalue_cells.alloc::<UpvalueCellId>(UpvalueCell::closed(LuaValue::integer(5)));
        let closure_a = gs.lua_closures.alloc::<ClosureId>(LuaClosure::new(proto, vec![cell_a]));
        let closure_b = gs.lua_closures.alloc::<ClosureId>(LuaClosure::new(proto, vec![cell_b]));
        let mut api = new_api(&mut gs);
        api.push(LuaValue::lua_closure(closure_a.0)).unwrap();
        api.push(LuaValue::lua_closure(closure_b.0)).unwrap();

        let before = api.get_upvalue(-2, 0).unwrap().unwrap();
        assert_eq!(before.as_integer_unchecked(), 1);

        assert!(api.join_upvalue(-2, 0, -1, 0).unwrap());

        let after = api.get_upvalue(-2, 0).unwrap().unwrap();
        assert_eq!(after.as_integer_unchecked(), 5);
    }

    #[test]
    fn set_upvalue_on_open_lua_closure_cell_writes_through_stack_slot() {
        use crate::objects::{ClosureId, LuaClosure, Prototype, PrototypeId, UpvalueCell, UpvalueCellId};
        let mut gs = GlobalState::default();
        let proto = gs.prototypes.alloc::<PrototypeId>(Prototype::new(0, false, 2));
        let mut api = new_api(&mut gs);
        api.push_integer(11).unwrap();
        let owner_slot = api.thread.top() - 1;
        let cell = api
            .global
            .upvalue_cells
            .alloc::<UpvalueCellId>(UpvalueCell::open(owner_slot));
        let closure = api.global.lua_closures.alloc::<ClosureId>(LuaClosure::new(proto, vec![cell]));
        api.push(LuaValue::lua_closure(closure.0)).unwrap();

        assert!(api.set_upvalue(-1, 0, LuaValue::integer(99)).unwrap());
        let _ = owner_slot;
        assert_eq!(api.to_integer(-2), Some(99));
    }
}
