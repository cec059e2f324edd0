//! Build-time limits shared by the value, string, table and stack substrates.
//!
//! These mirror the compile-time constants of the reference runtime; an
//! embedder that needs different ceilings recompiles against different
//! consts rather than tuning them at runtime.

/// Short strings (`len <= SHORT_MAX`) are interned; longer strings are not.
pub const SHORT_MAX: usize = 40;

/// `1 + (len >> HASH_LIMIT)` is the byte-skip step used by the short-string
/// hash so hashing cost stays bounded for very long candidate strings.
pub const HASH_LIMIT: u32 = 5;

/// Minimum stack growth an embedder is always guaranteed on top of a call.
pub const MIN_STACK: usize = 20;

pub const BASIC_STACK_SIZE: usize = 2 * MIN_STACK;

/// Extra slots reserved above the logical top for error handling and
/// metamethod dispatch bookkeeping.
pub const EXTRA_STACK: usize = 5;

/// Hard ceiling on the value stack of a single thread.
pub const MAX_STACK: usize = 1_000_000;

/// Hard ceiling on nested (non-tail) calls, guarding the Rust call stack
/// that mirrors the script call chain.
pub const MAX_CALL_DEPTH: usize = 256;

/// Number of pseudo-index slots reserved for C-closure upvalues.
pub const MAX_UPVAL: i32 = 255;

/// Reserved pseudo-index denoting the registry.
pub const REGISTRY_INDEX: i32 = -MAX_STACK as i32 - 1000;

/// Maximum fields flushed per table constructor instruction by collaborators
/// that build tables incrementally; kept here since Table sizing helpers use
/// it as a sane default batch size.
pub const FIELDS_PER_FLUSH: u32 = 50;

/// Size of the host string-pointer cache: `CACHE_ROWS` buckets of
/// `CACHE_COLS` entries each (see `StringCache`).
pub const CACHE_ROWS: usize = 53;
pub const CACHE_COLS: usize = 2;

/// Longest numeric literal `str2d` will retry with a locale-substituted
/// radix point before giving up.
pub const MAX_NUMBER_LEN: usize = 200;

/// Byte length above which a `str2int`/`str2d` candidate is rejected
/// outright rather than scanned (defends against unbounded allocation on
/// pathological input).
pub const MAX_STRING_TO_NUMBER_LEN: usize = 256;
