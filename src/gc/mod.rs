//! Object storage: typed arenas standing in for the intrusive
//! next-linked, mark-bit-carrying `CollectableObject` header.
//!
//! Every collectable kind gets its own [`Arena`], indexed by a small
//! `Copy` id newtype instead of a pointer. A slot's occupied/free state in
//! the arena's free list stands in for the source header's liveness link;
//! each occupied slot still carries the two remaining logical header
//! fields literally: a one-byte GC mark and the object's full tag.

pub mod arena;

pub use arena::{Arena, GcHeader, GcMark};
