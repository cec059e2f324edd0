//! The allocator shim: the single realloc-style accounting hook every
//! arena allocation runs through, plus the overflow-safe vector-grow
//! helper the string table, table hash part, and execution stack all use.
//!
//! This crate's arenas don't actually need a raw `realloc` (Rust's `Vec`
//! already owns its storage safely), so the shim here realizes the
//! spec'd contract as *accounting*: every allocation/free/resize reports
//! its size delta, the shim tracks `gc_debt` from that, and an emergency
//! collection is attempted (via the `EmergencyCollector` trait, an
//! abstract seam the same way `MetamethodHost` is) when debt crosses the
//! configured threshold on a growth request. Grounded on this crate's
//! teacher's `gc.rs` `bytes_allocated`/`threshold`/`adjust_threshold`
//! bookkeeping, generalized from "grow only" to the full
//! alloc/free/grow/shrink contract SPEC_FULL.md §4.1 names.

use crate::error::LuaError;

/// Abstract seam for the (out-of-scope) garbage collector: the allocator
/// shim calls this when a growth request would otherwise fail, exactly
/// where SPEC_FULL.md says "the shim first asks the GC for an emergency
/// full collection ... and retries". A collector-less build (such as
/// this crate's own test suite) uses `NoEmergencyCollection`, which
/// always declines — matching an embedder that hasn't wired a GC in yet.
pub trait EmergencyCollector {
    /// Runs a full collection with finalizers deferred; returns the
    /// number of bytes it freed (0 if nothing could be reclaimed).
    fn emergency_collect(&mut self) -> usize;
}

pub struct NoEmergencyCollection;

impl EmergencyCollector for NoEmergencyCollection {
    fn emergency_collect(&mut self) -> usize {
        0
    }
}

/// Tracks the signed debt counter and pause/step-multiplier policy the GC
/// (out of scope) reads to decide when to run an incremental slice; the
/// allocator shim only owns the *counter*, not the collection policy.
pub struct AllocatorShim {
    gc_debt: i64,
    total_bytes: usize,
    /// Once debt crosses this many bytes over budget, the next
    /// `ensure_step` call signals that a GC step is due. Mirrors the
    /// teacher's `threshold` field, generalized to a debt delta rather
    /// than an absolute byte count.
    step_threshold: i64,
}

impl AllocatorShim {
    pub fn new(step_threshold: i64) -> Self {
        AllocatorShim {
            gc_debt: 0,
            total_bytes: 0,
            step_threshold,
        }
    }

    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    pub fn gc_debt(&self) -> i64 {
        self.gc_debt
    }

    /// `realloc(old_size, new_size)`: `new_size == 0` is a free (always
    /// succeeds); growth that can't be satisfied asks `collector` for an
    /// emergency collection and retries once before raising
    /// `MemoryError`. `should_satisfy` is the caller's own capacity test
    /// (this shim has no real heap to exhaust, so the actual allocation
    /// decision stays with the caller; the shim's job is the debt
    /// accounting and the emergency-retry protocol).
    pub fn realloc(
        &mut self,
        old_size: usize,
        new_size: usize,
        collector: &mut dyn EmergencyCollector,
        can_satisfy: impl Fn() -> bool,
    ) -> Result<(), LuaError> {
        if new_size <= old_size {
            self.account(old_size, new_size);
            return Ok(());
        }
        if can_satisfy() {
            self.account(old_size, new_size);
            return Ok(());
        }
        collector.emergency_collect();
        if can_satisfy() {
            self.account(old_size, new_size);
            return Ok(());
        }
        Err(LuaError::MemoryError)
    }

    fn account(&mut self, old_size: usize, new_size: usize) {
        let delta = new_size as i64 - old_size as i64;
        self.gc_debt += delta;
        self.total_bytes = (self.total_bytes as i64 + delta).max(0) as usize;
    }

    /// Returns `true` (and resets the counter by one step-worth) when
    /// debt has crossed zero and an incremental GC slice is due, matching
    /// "when debt crosses zero the next GC check step runs one
    /// incremental slice".
    pub fn step_due(&mut self) -> bool {
        if self.gc_debt >= self.step_threshold {
            self.gc_debt -= self.step_threshold;
            true
        } else {
            false
        }
    }
}

impl Default for AllocatorShim {
    fn default() -> Self {
        AllocatorShim::new(1024 * 1024)
    }
}

/// Overflow-safe `Vec` growth: doubles `current` subject to `max`, never
/// silently truncating past it. Raises a named "too many X" error (as
/// `LuaError::RuntimeError`, since this closed error enum has no room for
/// a parameterized message; the `what` string is surfaced via the
/// `LuaFullError` wrapper at the call site) on overshoot.
pub fn grow_capacity(current: usize, min_needed: usize, max: usize, what: &str) -> Result<usize, (LuaError, String)> {
    if min_needed > max {
        return Err((LuaError::RuntimeError, format!("too many {what}")));
    }
    let mut new_size = current.max(4);
    while new_size < min_needed {
        new_size = match new_size.checked_mul(2) {
            Some(n) if n <= max => n,
            _ => max,
        };
    }
    Ok(new_size.min(max))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shrink_never_fails() {
        let mut shim = AllocatorShim::new(1000);
        let mut no_gc = NoEmergencyCollection;
        assert!(shim.realloc(100, 0, &mut no_gc, || false).is_ok());
        assert_eq!(shim.total_bytes(), 0);
    }

    #[test]
    fn growth_failure_after_emergency_retry_raises_memory_error() {
        let mut shim = AllocatorShim::new(1000);
        let mut no_gc = NoEmergencyCollection;
        let result = shim.realloc(0, 100, &mut no_gc, || false);
        assert_eq!(result, Err(LuaError::MemoryError));
    }

    #[test]
    fn debt_crosses_zero_triggers_step() {
        let mut shim = AllocatorShim::new(100);
        let mut no_gc = NoEmergencyCollection;
        shim.realloc(0, 150, &mut no_gc, || true).unwrap();
        assert!(shim.step_due());
        assert!(!shim.step_due());
    }

    #[test]
    fn grow_capacity_doubles_and_caps() {
        assert_eq!(grow_capacity(4, 5, 1000, "locals").unwrap(), 8);
        assert_eq!(grow_capacity(4, 2000, 1000, "locals").unwrap_err().1, "too many locals");
    }
}
