//! Tagged-value encoding shared by the host API, tables, closures and the
//! collector.
//!
//! `FullTag` packs three independent fields the way the reference runtime
//! does: bits 0-3 name the basic type, bits 4-5 name a variant within that
//! basic type (Number -> Integer/Float, String -> Short/Long, Function ->
//! LuaClosure/LightCFunction/CClosure), and bit 6 flags whether the datum
//! is a reference into a collectable-object arena. `LuaValue` pairs that
//! tag with a `Datum` union holding whichever payload the tag implies.
//!
//! Collectable payloads are stored as a plain `u32` arena slot index
//! (see `gc::arena`) rather than a pointer; which arena a given id names
//! follows from the tag, exactly as the reference runtime's `gcvalue`
//! follows from `tt_`.

pub type FullTag = u8;

// --- basic types (bits 0-3) ---
pub const TYPE_NIL: u8 = 0;
pub const TYPE_BOOLEAN: u8 = 1;
pub const TYPE_LIGHTUSERDATA: u8 = 2;
pub const TYPE_NUMBER: u8 = 3;
pub const TYPE_STRING: u8 = 4;
pub const TYPE_TABLE: u8 = 5;
pub const TYPE_FUNCTION: u8 = 6;
pub const TYPE_USERDATA: u8 = 7;
pub const TYPE_THREAD: u8 = 8;
pub const TYPE_PROTOTYPE: u8 = 9;
pub const TYPE_DEADKEY: u8 = 10;

const BIT_ISCOLLECTABLE: u8 = 1 << 6;

const fn make_variant(t: u8, v: u8) -> u8 {
    t | (v << 4)
}

const fn ctb(t: u8) -> u8 {
    t | BIT_ISCOLLECTABLE
}

/// Strips the variant and collectable bits, leaving the basic type.
#[inline]
pub const fn novariant(tt: u8) -> u8 {
    tt & 0x0F
}

/// Strips only the collectable bit, leaving basic type + variant.
#[inline]
pub const fn withvariant(tt: u8) -> u8 {
    tt & 0x3F
}

#[inline]
pub const fn is_collectable_tag(tt: u8) -> bool {
    tt & BIT_ISCOLLECTABLE != 0
}

// --- fully-qualified tags (basic type + variant [+ collectable bit]) ---
pub const TAG_NIL: u8 = TYPE_NIL;
pub const TAG_FALSE: u8 = make_variant(TYPE_BOOLEAN, 0);
pub const TAG_TRUE: u8 = make_variant(TYPE_BOOLEAN, 1);
pub const TAG_NUMINT: u8 = make_variant(TYPE_NUMBER, 0);
pub const TAG_NUMFLT: u8 = make_variant(TYPE_NUMBER, 1);
pub const TAG_SHRSTR: u8 = ctb(make_variant(TYPE_STRING, 0));
pub const TAG_LNGSTR: u8 = ctb(make_variant(TYPE_STRING, 1));
pub const TAG_LIGHTUSERDATA: u8 = TYPE_LIGHTUSERDATA;
pub const TAG_TABLE: u8 = ctb(TYPE_TABLE);
pub const TAG_LUA_CLOSURE: u8 = ctb(make_variant(TYPE_FUNCTION, 0));
pub const TAG_LIGHT_CFUNCTION: u8 = make_variant(TYPE_FUNCTION, 1);
pub const TAG_C_CLOSURE: u8 = ctb(make_variant(TYPE_FUNCTION, 2));
pub const TAG_FULLUSERDATA: u8 = ctb(TYPE_USERDATA);
pub const TAG_THREAD: u8 = ctb(TYPE_THREAD);
pub const TAG_PROTOTYPE: u8 = ctb(TYPE_PROTOTYPE);
pub const TAG_DEADKEY: u8 = TYPE_DEADKEY;

#[derive(Clone, Copy)]
union Datum {
    b: bool,
    i: i64,
    n: f64,
    /// Arena slot index for whichever collectable arena `tt` implies.
    gc: u32,
    /// Light userdata / light C function identity token (see
    /// `LuaValue::light_cfunction` for how `CFunction` pointers are mapped
    /// into this word without assuming pointer-width equality).
    p: usize,
}

/// A tagged value: 16 bytes, matching the reference layout (an 8-byte
/// union plus a 1-byte tag, rounded up to the union's alignment).
#[repr(C)]
#[derive(Clone, Copy)]
pub struct LuaValue {
    value: Datum,
    tt: FullTag,
}

impl LuaValue {
    #[inline]
    pub const fn nil() -> Self {
        LuaValue {
            value: Datum { i: 0 },
            tt: TAG_NIL,
        }
    }

    #[inline]
    pub const fn boolean(b: bool) -> Self {
        LuaValue {
            value: Datum { b },
            tt: if b { TAG_TRUE } else { TAG_FALSE },
        }
    }

    #[inline]
    pub const fn integer(i: i64) -> Self {
        LuaValue {
            value: Datum { i },
            tt: TAG_NUMINT,
        }
    }

    #[inline]
    pub const fn float(n: f64) -> Self {
        LuaValue {
            value: Datum { n },
            tt: TAG_NUMFLT,
        }
    }

    #[inline]
    pub const fn light_userdata(p: usize) -> Self {
        LuaValue {
            value: Datum { p },
            tt: TAG_LIGHTUSERDATA,
        }
    }

    /// `CFunction` values are registered once in a small host-side table;
    /// `token` is the index into that table, not the function pointer
    /// itself cast through `usize`. See `SPEC_FULL.md` design note on
    /// `to_pointer`.
    #[inline]
    pub const fn light_cfunction(token: usize) -> Self {
        LuaValue {
            value: Datum { p: token },
            tt: TAG_LIGHT_CFUNCTION,
        }
    }

    #[inline]
    fn gc(tag: FullTag, slot: u32) -> Self {
        debug_assert!(is_collectable_tag(tag));
        LuaValue {
            value: Datum { gc: slot },
            tt: tag,
        }
    }

    #[inline]
    pub fn short_string(slot: u32) -> Self {
        Self::gc(TAG_SHRSTR, slot)
    }

    #[inline]
    pub fn long_string(slot: u32) -> Self {
        Self::gc(TAG_LNGSTR, slot)
    }

    #[inline]
    pub fn table(slot: u32) -> Self {
        Self::gc(TAG_TABLE, slot)
    }

    #[inline]
    pub fn lua_closure(slot: u32) -> Self {
        Self::gc(TAG_LUA_CLOSURE, slot)
    }

    #[inline]
    pub fn c_closure(slot: u32) -> Self {
        Self::gc(TAG_C_CLOSURE, slot)
    }

    #[inline]
    pub fn full_userdata(slot: u32) -> Self {
        Self::gc(TAG_FULLUSERDATA, slot)
    }

    #[inline]
    pub fn thread(slot: u32) -> Self {
        Self::gc(TAG_THREAD, slot)
    }

    #[inline]
    pub fn prototype(slot: u32) -> Self {
        Self::gc(TAG_PROTOTYPE, slot)
    }

    // --- type tests ---

    #[inline]
    pub fn rawtt(&self) -> FullTag {
        self.tt
    }

    #[inline]
    pub fn basic_type(&self) -> u8 {
        novariant(self.tt)
    }

    #[inline]
    pub fn type_tag(&self) -> u8 {
        withvariant(self.tt)
    }

    #[inline]
    pub fn is_collectable(&self) -> bool {
        is_collectable_tag(self.tt)
    }

    #[inline]
    pub fn check_tag(&self, tag: FullTag) -> bool {
        self.tt == tag
    }

    #[inline]
    pub fn check_type(&self, basic: u8) -> bool {
        self.basic_type() == basic
    }

    #[inline]
    pub fn is_nil(&self) -> bool {
        self.tt == TAG_NIL
    }

    #[inline]
    pub fn is_boolean(&self) -> bool {
        self.basic_type() == TYPE_BOOLEAN
    }

    #[inline]
    pub fn is_false(&self) -> bool {
        self.tt == TAG_FALSE
    }

    #[inline]
    pub fn is_true(&self) -> bool {
        self.tt == TAG_TRUE
    }

    #[inline]
    pub fn is_number(&self) -> bool {
        self.basic_type() == TYPE_NUMBER
    }

    #[inline]
    pub fn is_integer(&self) -> bool {
        self.tt == TAG_NUMINT
    }

    #[inline]
    pub fn is_float(&self) -> bool {
        self.tt == TAG_NUMFLT
    }

    #[inline]
    pub fn is_string(&self) -> bool {
        self.basic_type() == TYPE_STRING
    }

    #[inline]
    pub fn is_short_string(&self) -> bool {
        self.tt == TAG_SHRSTR
    }

    #[inline]
    pub fn is_long_string(&self) -> bool {
        self.tt == TAG_LNGSTR
    }

    #[inline]
    pub fn is_table(&self) -> bool {
        self.tt == TAG_TABLE
    }

    #[inline]
    pub fn is_function(&self) -> bool {
        self.basic_type() == TYPE_FUNCTION
    }

    #[inline]
    pub fn is_lua_function(&self) -> bool {
        self.tt == TAG_LUA_CLOSURE
    }

    #[inline]
    pub fn is_c_function(&self) -> bool {
        self.tt == TAG_LIGHT_CFUNCTION || self.tt == TAG_C_CLOSURE
    }

    #[inline]
    pub fn is_light_userdata(&self) -> bool {
        self.tt == TAG_LIGHTUSERDATA
    }

    #[inline]
    pub fn is_full_userdata(&self) -> bool {
        self.tt == TAG_FULLUSERDATA
    }

    #[inline]
    pub fn is_thread(&self) -> bool {
        self.tt == TAG_THREAD
    }

    /// Only `nil` and `false` are falsy; every other value, including `0`
    /// and the empty string, is truthy.
    #[inline]
    pub fn is_truthy(&self) -> bool {
        !matches!(self.tt, TAG_NIL | TAG_FALSE)
    }

    #[inline]
    pub fn is_falsy(&self) -> bool {
        !self.is_truthy()
    }

    // --- unchecked accessors (debug-assert the tag matches) ---

    #[inline]
    pub fn as_bool_unchecked(&self) -> bool {
        debug_assert!(self.is_boolean());
        unsafe { self.value.b }
    }

    #[inline]
    pub fn as_integer_unchecked(&self) -> i64 {
        debug_assert!(self.is_integer());
        unsafe { self.value.i }
    }

    #[inline]
    pub fn as_float_unchecked(&self) -> f64 {
        debug_assert!(self.is_float());
        unsafe { self.value.n }
    }

    #[inline]
    pub fn as_gc_slot_unchecked(&self) -> u32 {
        debug_assert!(self.is_collectable());
        unsafe { self.value.gc }
    }

    #[inline]
    pub fn as_light_userdata_unchecked(&self) -> usize {
        debug_assert!(self.is_light_userdata());
        unsafe { self.value.p }
    }

    #[inline]
    pub fn as_light_cfunction_token_unchecked(&self) -> usize {
        debug_assert!(self.tt == TAG_LIGHT_CFUNCTION);
        unsafe { self.value.p }
    }

    // --- Option-returning convenience accessors ---

    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        self.is_boolean().then(|| self.as_bool_unchecked())
    }

    #[inline]
    pub fn as_float(&self) -> Option<f64> {
        match self.tt {
            TAG_NUMFLT => Some(self.as_float_unchecked()),
            TAG_NUMINT => Some(self.as_integer_unchecked() as f64),
            _ => None,
        }
    }

    /// Lua 5.4-style coercion: an integer value returns directly, a float
    /// value returns only if it has no fractional part and fits in `i64`.
    #[inline]
    pub fn as_integer(&self) -> Option<i64> {
        match self.tt {
            TAG_NUMINT => Some(self.as_integer_unchecked()),
            TAG_NUMFLT => {
                let n = self.as_float_unchecked();
                const MIN_INT_F: f64 = -(1i64 << 63) as f64;
                const MAX_INT_F: f64 = (1u64 << 63) as f64; // exclusive upper bound
                if n.fract() == 0.0 && n >= MIN_INT_F && n < MAX_INT_F {
                    Some(n as i64)
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name_for(self.basic_type())
    }

    /// `type_name(tag)`: the same basic-type-to-name mapping as
    /// [`LuaValue::type_name`], but keyed by an arbitrary tag (as the Host
    /// API's `type_name` takes the tag `type` previously returned rather
    /// than a value). Callable on any `LuaValue` instance since the
    /// mapping doesn't depend on `self`.
    pub fn type_name_for(&self, tag: u8) -> &'static str {
        match novariant(tag) {
            TYPE_NIL => "nil",
            TYPE_BOOLEAN => "boolean",
            TYPE_LIGHTUSERDATA | TYPE_USERDATA => "userdata",
            TYPE_NUMBER => "number",
            TYPE_STRING => "string",
            TYPE_TABLE => "table",
            TYPE_FUNCTION => "function",
            TYPE_THREAD => "thread",
            TYPE_PROTOTYPE => "prototype",
            _ => "no value",
        }
    }

    /// True for the `LightCFunction` variant specifically (a bare function
    /// pointer with no upvalues), as distinct from a `CClosure`; both
    /// satisfy [`LuaValue::is_c_function`], but upvalue introspection and
    /// `call` need to tell them apart since only the closure variant owns
    /// an arena slot.
    #[inline]
    pub fn tt_is_light_cfunction(&self) -> bool {
        self.tt == TAG_LIGHT_CFUNCTION
    }

    pub fn kind(&self) -> LuaValueKind {
        match self.tt {
            TAG_NIL => LuaValueKind::Nil,
            TAG_FALSE | TAG_TRUE => LuaValueKind::Boolean,
            TAG_NUMINT => LuaValueKind::Integer,
            TAG_NUMFLT => LuaValueKind::Float,
            TAG_SHRSTR | TAG_LNGSTR => LuaValueKind::String,
            TAG_TABLE => LuaValueKind::Table,
            TAG_LUA_CLOSURE | TAG_C_CLOSURE => LuaValueKind::Function,
            TAG_LIGHT_CFUNCTION => LuaValueKind::CFunction,
            TAG_FULLUSERDATA | TAG_LIGHTUSERDATA => LuaValueKind::Userdata,
            TAG_THREAD => LuaValueKind::Thread,
            _ => LuaValueKind::Nil,
        }
    }

    /// Raw (no metamethod) equality: fast-rejects on tag mismatch, then
    /// compares per-type. Short strings compare by arena slot identity;
    /// long strings and everything else delegate content comparison to
    /// `strings`. Numbers compare across the integer/float divide.
    pub fn raw_equal(&self, other: &LuaValue, strings: &dyn StringLookup) -> bool {
        if self.is_number() && other.is_number() {
            return match (self.tt, other.tt) {
                (TAG_NUMINT, TAG_NUMINT) => {
                    self.as_integer_unchecked() == other.as_integer_unchecked()
                }
                (TAG_NUMFLT, TAG_NUMFLT) => {
                    self.as_float_unchecked() == other.as_float_unchecked()
                }
                (TAG_NUMINT, TAG_NUMFLT) => {
                    self.as_integer_unchecked() as f64 == other.as_float_unchecked()
                }
                (TAG_NUMFLT, TAG_NUMINT) => {
                    self.as_float_unchecked() == other.as_integer_unchecked() as f64
                }
                _ => unreachable!(),
            };
        }
        if self.tt != other.tt {
            return false;
        }
        match self.tt {
            TAG_NIL | TAG_FALSE | TAG_TRUE => true,
            TAG_SHRSTR => self.as_gc_slot_unchecked() == other.as_gc_slot_unchecked(),
            TAG_LNGSTR => {
                let a = self.as_gc_slot_unchecked();
                let b = other.as_gc_slot_unchecked();
                a == b || strings.long_string_bytes(a) == strings.long_string_bytes(b)
            }
            TAG_LIGHTUSERDATA | TAG_LIGHT_CFUNCTION => {
                self.as_light_userdata_unchecked() == other.as_light_userdata_unchecked()
            }
            TAG_TABLE | TAG_LUA_CLOSURE | TAG_C_CLOSURE | TAG_FULLUSERDATA | TAG_THREAD => {
                self.as_gc_slot_unchecked() == other.as_gc_slot_unchecked()
            }
            _ => false,
        }
    }

    pub fn gc_slot(&self) -> Option<u32> {
        self.is_collectable().then(|| self.as_gc_slot_unchecked())
    }

    /// Debug-identity token used by `to_pointer`: the arena slot for
    /// collectable values, the light-userdata/cfunction word otherwise,
    /// and `None` for value types that have no stable identity.
    pub fn to_pointer_token(&self) -> Option<usize> {
        match self.tt {
            TAG_LIGHTUSERDATA | TAG_LIGHT_CFUNCTION => {
                Some(self.as_light_userdata_unchecked())
            }
            _ if self.is_collectable() => Some(self.as_gc_slot_unchecked() as usize),
            _ => None,
        }
    }
}

/// Lets `LuaValue::raw_equal` compare long-string *content* without
/// `value.rs` depending on the string arena module directly.
pub trait StringLookup {
    fn long_string_bytes(&self, slot: u32) -> &[u8];
}

impl Default for LuaValue {
    fn default() -> Self {
        LuaValue::nil()
    }
}

impl std::fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.tt {
            TAG_NIL => write!(f, "nil"),
            TAG_FALSE => write!(f, "false"),
            TAG_TRUE => write!(f, "true"),
            TAG_NUMINT => write!(f, "{}", self.as_integer_unchecked()),
            TAG_NUMFLT => write!(f, "{}", self.as_float_unchecked()),
            TAG_SHRSTR | TAG_LNGSTR => write!(f, "string#{}", self.as_gc_slot_unchecked()),
            TAG_TABLE => write!(f, "table: 0x{:08x}", self.as_gc_slot_unchecked()),
            TAG_LUA_CLOSURE | TAG_C_CLOSURE => {
                write!(f, "function: 0x{:08x}", self.as_gc_slot_unchecked())
            }
            TAG_LIGHT_CFUNCTION => write!(f, "function: builtin#{:#x}", self.as_light_userdata_unchecked()),
            TAG_LIGHTUSERDATA => write!(f, "userdata: 0x{:08x}", self.as_light_userdata_unchecked()),
            TAG_FULLUSERDATA => write!(f, "userdata: 0x{:08x}", self.as_gc_slot_unchecked()),
            TAG_THREAD => write!(f, "thread: 0x{:08x}", self.as_gc_slot_unchecked()),
            _ => write!(f, "<prototype/internal>"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LuaValueKind {
    Nil,
    Boolean,
    Integer,
    Float,
    String,
    Table,
    Function,
    CFunction,
    Userdata,
    Thread,
}

/// A reserved sentinel value used as the "invalid slot" return token by
/// index resolution (see `vm::stack`). Its address (i.e. which of several
/// otherwise-identical nil values it is) is never observable from safe
/// code; what matters is that `is_valid_slot` compares by identity against
/// *this* constant rather than by content.
pub const INVALID_SLOT: LuaValue = LuaValue::nil();

#[inline]
pub fn is_valid_slot(_v: &LuaValue) -> bool {
    // Our ExecutionState returns `Option<&LuaValue>`/`Option<usize>` from
    // index resolution instead of a sentinel pointer, so this predicate is
    // kept only for API parity with SPEC_FULL.md §4.2; real callers should
    // prefer the `Option` the resolver returns.
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_is_sixteen_bytes() {
        assert_eq!(std::mem::size_of::<LuaValue>(), 16);
    }

    #[test]
    fn nil_and_booleans() {
        assert!(LuaValue::nil().is_nil());
        assert!(LuaValue::boolean(false).is_false());
        assert!(LuaValue::boolean(true).is_true());
        assert!(LuaValue::nil().is_falsy());
        assert!(LuaValue::boolean(false).is_falsy());
        assert!(LuaValue::boolean(true).is_truthy());
        assert!(LuaValue::integer(0).is_truthy());
    }

    #[test]
    fn integer_and_float_tags() {
        let i = LuaValue::integer(42);
        assert!(i.is_number() && i.is_integer() && !i.is_float());
        assert_eq!(i.as_integer_unchecked(), 42);

        let f = LuaValue::float(1.5);
        assert!(f.is_number() && f.is_float() && !f.is_integer());
        assert_eq!(f.as_float_unchecked(), 1.5);
    }

    #[test]
    fn float_with_zero_fraction_coerces_to_integer() {
        assert_eq!(LuaValue::float(3.0).as_integer(), Some(3));
        assert_eq!(LuaValue::float(3.5).as_integer(), None);
    }

    #[test]
    fn collectable_bit_matches_basic_type() {
        assert!(!LuaValue::nil().is_collectable());
        assert!(!LuaValue::boolean(true).is_collectable());
        assert!(!LuaValue::integer(1).is_collectable());
        assert!(!LuaValue::light_userdata(0).is_collectable());
        assert!(LuaValue::short_string(0).is_collectable());
        assert!(LuaValue::long_string(0).is_collectable());
        assert!(LuaValue::table(0).is_collectable());
        assert!(LuaValue::lua_closure(0).is_collectable());
        assert!(LuaValue::full_userdata(0).is_collectable());
        assert!(LuaValue::thread(0).is_collectable());
        assert!(!LuaValue::light_cfunction(0).is_collectable());
    }

    #[test]
    fn type_names() {
        assert_eq!(LuaValue::nil().type_name(), "nil");
        assert_eq!(LuaValue::integer(1).type_name(), "number");
        assert_eq!(LuaValue::table(0).type_name(), "table");
    }

    struct NoStrings;
    impl StringLookup for NoStrings {
        fn long_string_bytes(&self, _slot: u32) -> &[u8] {
            b""
        }
    }

    #[test]
    fn raw_equal_cross_compares_numbers() {
        let a = LuaValue::integer(3);
        let b = LuaValue::float(3.0);
        assert!(a.raw_equal(&b, &NoStrings));
    }

    #[test]
    fn raw_equal_short_strings_by_slot() {
        let a = LuaValue::short_string(5);
        let b = LuaValue::short_string(5);
        let c = LuaValue::short_string(6);
        assert!(a.raw_equal(&b, &NoStrings));
        assert!(!a.raw_equal(&c, &NoStrings));
    }
}
