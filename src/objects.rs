//! Structural layouts for the remaining collectable-object kinds named by
//! the data model: userdata, function prototypes, and the two closure
//! flavors with their shared upvalue-cell representation. Layout only —
//! the algorithms that populate and traverse these (the parser building
//! a `Prototype`, the VM executing a `LuaClosure`) are out-of-scope
//! external collaborators per SPEC_FULL.md §1.
//!
//! Grounded on this crate's own teacher (`lua_value/mod.rs`'s
//! `LuaUserdata`/`LuaFunction`/`Chunk`/`LuaUpvalue`/`UpvalueDesc`), adapted
//! from that module's `Rc<RefCell<_>>` field-level sharing onto this
//! crate's arena-id object model: every reference between collectable
//! kinds here is an id into the owning `GlobalState` arena, not a pointer.

use crate::gc::arena::{define_arena_id, GcHeader};
use crate::string_table::StringId;
use crate::table::TableId;
use crate::value::{LuaValue, TAG_C_CLOSURE, TAG_FULLUSERDATA, TAG_LUA_CLOSURE, TAG_PROTOTYPE, TAG_THREAD};

define_arena_id!(UserdataId);
define_arena_id!(PrototypeId);
define_arena_id!(ClosureId);
define_arena_id!(UpvalueCellId);
define_arena_id!(ThreadId);

/// Identity object for a `thread` value. The suspended per-coroutine
/// `ExecutionState` itself is owned and scheduled by the out-of-scope VM
/// collaborator (SPEC_FULL.md §1's "coroutine scheduling"); this crate's
/// object model only needs a stable arena slot so `thread` values get the
/// same reference identity (`to_pointer`/`raw_equal`) every other
/// collectable kind gets, and so the registry's reserved key 1 (§6,
/// "1 -> main thread") has something to point at.
pub struct ThreadObject {
    pub header: GcHeader,
    pub status: crate::state::call_frame::ThreadStatus,
}

impl ThreadObject {
    pub fn new(status: crate::state::call_frame::ThreadStatus) -> Self {
        ThreadObject {
            header: GcHeader::new(TAG_THREAD),
            status,
        }
    }
}

/// Managed object carrying an opaque byte block the host controls
/// directly (no Rust type erasure is attempted, matching the reference
/// runtime's `TString`-adjacent `Udata` being raw bytes rather than
/// `Box<dyn Any>`), an optional metatable, and one attached `user value`.
pub struct Userdata {
    pub header: GcHeader,
    data: Vec<u8>,
    pub metatable: Option<TableId>,
    pub user_value: LuaValue,
}

impl Userdata {
    pub fn new(size: usize) -> Self {
        Userdata {
            header: GcHeader::new(TAG_FULLUSERDATA),
            data: vec![0u8; size],
            metatable: None,
            user_value: LuaValue::nil(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// One local-variable or upvalue descriptor attached to a `Prototype`:
/// name, source location, and (for locals) whether the slot denotes a
/// parent-frame stack slot vs. a parent upvalue, mirroring
/// `lua_value::UpvalueDesc`'s `is_local` flag.
#[derive(Debug, Clone)]
pub struct VarDesc {
    pub name: StringId,
    pub line_defined: u32,
    /// For upvalue descriptors: true if this upvalue captures a register
    /// in the *immediately enclosing* function's frame, false if it
    /// forwards that function's own upvalue of the same index.
    pub is_local_capture: bool,
    pub index: u32,
}

/// Immutable-after-construction compiled function: constants, bytecode,
/// child prototypes, and the descriptor tables the VM/debug-info
/// collaborators need. The bytecode stream itself is opaque `u32` words
/// here (the encoding is the out-of-scope VM's concern); this crate only
/// fixes that it exists and is immutable.
pub struct Prototype {
    pub header: GcHeader,
    pub constants: Vec<LuaValue>,
    pub code: Vec<u32>,
    pub child_protos: Vec<PrototypeId>,
    pub line_info: Vec<u32>,
    pub locals: Vec<VarDesc>,
    pub upvalues: Vec<VarDesc>,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub source_name: Option<StringId>,
}

impl Prototype {
    pub fn new(num_params: u8, is_vararg: bool, max_stack_size: u8) -> Self {
        Prototype {
            header: GcHeader::new(TAG_PROTOTYPE),
            constants: Vec::new(),
            code: Vec::new(),
            child_protos: Vec::new(),
            line_info: Vec::new(),
            locals: Vec::new(),
            upvalues: Vec::new(),
            num_params,
            is_vararg,
            max_stack_size,
            source_name: None,
        }
    }
}

/// An upvalue cell: *open* while it still aliases a live slot in the
/// owning thread's stack (identified by `(thread-relative) stack_index`,
/// resolved through `ExecutionState` rather than a raw pointer, matching
/// this crate's arena-id discipline), *closed* once it owns its value
/// independently (the frame that created it returned).
///
/// Cells are reference-counted across every closure that shares them so
/// `join_upvalues` (Host API upvalue introspection) can make two Lua
/// closures alias the same cell without this arena needing a GC trace
/// step to find every holder.
pub struct UpvalueCell {
    pub header: GcHeader,
    state: UpvalueState,
    refcount: u32,
}

enum UpvalueState {
    Open { thread_slot: usize },
    Closed(LuaValue),
}

impl UpvalueCell {
    pub fn open(thread_slot: usize) -> Self {
        UpvalueCell {
            header: GcHeader::new(crate::value::TAG_NIL), // upvalue cells are not a `LuaValue` variant; tag is unused but kept for header-shape parity
            state: UpvalueState::Open { thread_slot },
            refcount: 1,
        }
    }

    /// Builds an already-closed cell directly, for the case where there is
    /// no owning live frame to open over in the first place — e.g. a
    /// freshly loaded main chunk's `_ENV` upvalue, which is bound straight
    /// to the globals table rather than captured from a stack slot.
    pub fn closed(value: LuaValue) -> Self {
        UpvalueCell {
            header: GcHeader::new(crate::value::TAG_NIL),
            state: UpvalueState::Closed(value),
            refcount: 1,
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self.state, UpvalueState::Open { .. })
    }

    pub fn open_slot(&self) -> Option<usize> {
        match self.state {
            UpvalueState::Open { thread_slot } => Some(thread_slot),
            UpvalueState::Closed(_) => None,
        }
    }

    /// Closes the cell over `value`, called when the owning frame's stack
    /// slot is about to go out of scope (the frame returns).
    pub fn close(&mut self, value: LuaValue) {
        self.state = UpvalueState::Closed(value);
    }

    pub fn closed_value(&self) -> Option<LuaValue> {
        match self.state {
            UpvalueState::Closed(v) => Some(v),
            UpvalueState::Open { .. } => None,
        }
    }

    pub fn retain(&mut self) {
        self.refcount += 1;
    }

    /// Returns `true` once the last reference has been released, at
    /// which point the owning arena slot may be freed.
    pub fn release(&mut self) -> bool {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount == 0
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
    }
}

/// `LuaClosure = (prototype, upvalue cells)`.
pub struct LuaClosure {
    pub header: GcHeader,
    pub prototype: PrototypeId,
    pub upvalues: Vec<UpvalueCellId>,
}

impl LuaClosure {
    pub fn new(prototype: PrototypeId, upvalues: Vec<UpvalueCellId>) -> Self {
        LuaClosure {
            header: GcHeader::new(TAG_LUA_CLOSURE),
            prototype,
            upvalues,
        }
    }
}

/// A registered host function: the small integer token `LuaValue::
/// light_cfunction`/`c_closure` carries is an index into a host-side
/// registration table (kept outside this module, by `GlobalState`) that
/// maps back to the actual Rust `fn` pointer; `CClosure` additionally
/// carries its own inline upvalue values (no cell indirection, since a
/// `CClosure`'s upvalues are never captured by a nested Lua closure).
pub struct CClosure {
    pub header: GcHeader,
    pub function_token: usize,
    pub upvalues: Vec<LuaValue>,
}

impl CClosure {
    pub fn new(function_token: usize, upvalues: Vec<LuaValue>) -> Self {
        CClosure {
            header: GcHeader::new(TAG_C_CLOSURE),
            function_token,
            upvalues,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn userdata_holds_declared_size_and_user_value() {
        let mut u = Userdata::new(8);
        assert_eq!(u.len(), 8);
        u.bytes_mut()[0] = 0xAB;
        assert_eq!(u.bytes()[0], 0xAB);
        u.user_value = LuaValue::integer(42);
        assert_eq!(u.user_value.as_integer(), Some(42));
    }

    #[test]
    fn upvalue_cell_open_then_close() {
        let mut cell = UpvalueCell::open(3);
        assert!(cell.is_open());
        assert_eq!(cell.open_slot(), Some(3));
        cell.close(LuaValue::integer(9));
        assert!(!cell.is_open());
        assert_eq!(cell.closed_value().unwrap().as_integer(), Some(9));
    }

    #[test]
    fn upvalue_cell_refcounting() {
        let mut cell = UpvalueCell::open(0);
        cell.retain();
        cell.retain();
        assert_eq!(cell.refcount(), 3);
        assert!(!cell.release());
        assert!(!cell.release());
        assert!(cell.release());
    }

    #[test]
    fn prototype_starts_empty_and_immutable_shape() {
        let p = Prototype::new(2, false, 10);
        assert_eq!(p.num_params, 2);
        assert!(!p.is_vararg);
        assert_eq!(p.max_stack_size, 10);
        assert!(p.constants.is_empty());
    }
}
