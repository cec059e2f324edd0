//! The `load`/`dump` seam of SPEC_FULL.md §4.6: Host API entry points the
//! spec names, built on a parser and a binary-chunk dumper that are both
//! out-of-scope external collaborators per §1. `ChunkLoader` is the
//! abstract boundary `Api::load`/`Api::dump` call through, the same shape
//! as [`crate::api::MetamethodHost`]; a real embedding wires a parser/
//! dumper implementation in, this crate's own test suite uses
//! [`NoChunkLoader`].

use crate::error::LuaResult;
use crate::objects::PrototypeId;

/// `Reader: (state, user) -> (bytes, length)` from SPEC_FULL.md §6: pulls
/// the next chunk of source/bytecode bytes; `None` signals end of input.
pub type ReaderFn<'a> = &'a mut dyn FnMut() -> Option<Vec<u8>>;

/// `Writer: (state, bytes, length, user) -> int`: receives one piece of a
/// dumped binary chunk; returning `false` aborts the dump, mirroring the
/// reference convention that a nonzero return from the C callback stops
/// writing.
pub type WriterFn<'a> = &'a mut dyn FnMut(&[u8]) -> bool;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    Text,
    Binary,
    Both,
}

/// The external parser/dumper collaborator §1 leaves out of scope for this
/// crate's core. `load` must hand back a `Prototype` ready for the Host
/// API to wrap in a main `LuaClosure` bound to the globals table; `dump`
/// must serialize one already-compiled `Prototype`.
pub trait ChunkLoader {
    fn load(&mut self, name: &str, mode: LoadMode, reader: ReaderFn) -> LuaResult<PrototypeId>;
    fn dump(&mut self, proto: PrototypeId, strip: bool, writer: WriterFn) -> LuaResult<()>;
}

/// Always declines, matching an embedder that hasn't wired a parser/dumper
/// in yet — the posture this crate's own test suite needs, the same way
/// `NoMetamethods` stands in for the VM.
pub struct NoChunkLoader;

impl ChunkLoader for NoChunkLoader {
    fn load(&mut self, _name: &str, _mode: LoadMode, _reader: ReaderFn) -> LuaResult<PrototypeId> {
        Err(crate::error::LuaError::SyntaxError)
    }

    fn dump(&mut self, _proto: PrototypeId, _strip: bool, _writer: WriterFn) -> LuaResult<()> {
        Err(crate::error::LuaError::RuntimeError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gc::arena::ArenaId;

    #[test]
    fn no_chunk_loader_declines_load_and_dump() {
        let mut loader = NoChunkLoader;
        let mut reader: ReaderFn = &mut || None;
        assert!(loader.load("chunk", LoadMode::Text, &mut reader).is_err());
        let mut writer: WriterFn = &mut |_| true;
        assert!(loader
            .dump(PrototypeId::from_index(0), false, &mut writer)
            .is_err());
    }
}
