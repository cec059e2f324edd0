//! Per-call bookkeeping on the `ExecutionState`'s frame chain.
//!
//! Grounded on this crate's teacher's `LuaCallFrame` (`lua_vm/
//! lua_call_frame.rs`): same fields (`base`, `top`/`ci_top`, saved `pc`,
//! a packed flags byte for `is_lua`/`is_protected`), generalized from
//! that struct's VM-register-file addressing (`base_ptr` into a flat
//! `register_stack`) to this crate's stack-index addressing (`base`/
//! `top` as indices into `ExecutionState::stack`) since this module has
//! no bytecode VM of its own to drive register allocation.

const FLAG_IS_LUA: u8 = 1 << 0;
const FLAG_IS_PROTECTED: u8 = 1 << 1;
const FLAG_ALLOW_YIELD: u8 = 1 << 2;

/// `NUM_RESULTS_MULTI` sentinel for "return everything", mirroring the
/// Host API's `MULTI` result-count convention (SPEC_FULL.md §4.6).
pub const MULTI: i32 = -1;

/// One active (possibly suspended, for a yielded coroutine) call. The
/// function itself occupies `stack[func]`; `base == func + 1` is where
/// its locals/scratch begin; `top` is the current one-past-last slot in
/// use; `ci_top` is the highest slot ever pre-reserved for this frame
/// (used by positive-index resolution's range check).
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub func: usize,
    pub base: usize,
    pub top: usize,
    pub ci_top: usize,
    /// Saved bytecode program counter for a suspended (yielded) Lua
    /// frame; meaningless for a C-function frame.
    pub saved_pc: usize,
    pub num_results_wanted: i32,
    flags: u8,
}

impl CallFrame {
    pub fn new_lua(func: usize, base: usize, ci_top: usize, num_results_wanted: i32) -> Self {
        CallFrame {
            func,
            base,
            top: base,
            ci_top,
            saved_pc: 0,
            num_results_wanted,
            flags: FLAG_IS_LUA,
        }
    }

    pub fn new_c(func: usize, base: usize, ci_top: usize, num_results_wanted: i32) -> Self {
        CallFrame {
            func,
            base,
            top: base,
            ci_top,
            saved_pc: 0,
            num_results_wanted,
            flags: 0,
        }
    }

    #[inline]
    pub fn is_lua(&self) -> bool {
        self.flags & FLAG_IS_LUA != 0
    }

    #[inline]
    pub fn is_protected(&self) -> bool {
        self.flags & FLAG_IS_PROTECTED != 0
    }

    #[inline]
    pub fn set_protected(&mut self, protected: bool) {
        if protected {
            self.flags |= FLAG_IS_PROTECTED;
        } else {
            self.flags &= !FLAG_IS_PROTECTED;
        }
    }

    #[inline]
    pub fn allows_yield(&self) -> bool {
        self.flags & FLAG_ALLOW_YIELD != 0
    }

    #[inline]
    pub fn set_allows_yield(&mut self, allow: bool) {
        if allow {
            self.flags |= FLAG_ALLOW_YIELD;
        } else {
            self.flags &= !FLAG_ALLOW_YIELD;
        }
    }
}

/// Thread status, matching SPEC_FULL.md §3's `ExecutionState.status`
/// (kept here, next to `CallFrame`, since both are consumed together by
/// `ExecutionState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadStatus {
    Running,
    Suspended,
    Normal,
    Yielded,
    /// `Error*` in the spec: the thread is dead after an unhandled error.
    Dead,
}

