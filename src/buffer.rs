//! The instruction buffer: an owned, append-only byte stream with a small
//! label/fixup mechanism, sealed into a [`CodeBlob`] once an emitter is
//! done.
//!
//! This plays the role upstream's EBB-offset table and branch relaxation
//! play for a whole function body (`binemit::relaxation`), collapsed to
//! what a single emitted kernel actually needs: forward references for
//! `jcc`/`jmp` targets within one tile, and backward references for
//! loop-back branches. There is no cross-tile control flow and no shared
//! mutable state: each emitter owns exactly one `CodeBuffer` for the
//! duration of its call, matching the concurrency model in §5 (a private
//! buffer, transferred to the caller at seal time).
//!
//! Unlike upstream, we don't need branch relaxation (choosing between an
//! 8-bit and 32-bit displacement encoding): every relative jump emitted
//! here uses a 32-bit displacement unconditionally, so a label can always
//! be bound after it is referenced without invalidating already-emitted
//! bytes. This trades a few bytes of code size for a fixup scheme with no
//! iteration-to-a-fixpoint step.

use core::convert::TryFrom;
use smallvec::SmallVec;
use std::vec::Vec;

/// A forward- or backward-referenceable position in the instruction
/// stream, local to one `CodeBuffer`.
///
/// Labels are allocated from a per-buffer counter rather than named with
/// upstream's single-character `pad_label` suffix convention; see
/// DESIGN.md for why that sidesteps the label-uniqueness discipline the
/// design notes call out as the hard part of sharing an emitter across
/// sibling tiles.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Label(u32);

#[derive(Debug, Copy, Clone)]
struct Fixup {
    /// Byte offset of the 4-byte rel32 placeholder to patch.
    at: u32,
    /// Byte offset immediately after the placeholder (rel32 is relative to
    /// the end of the instruction that encodes it).
    end_of_insn: u32,
    label: Label,
}

/// The buffer an emitter streams machine code into.
pub struct CodeBuffer {
    bytes: Vec<u8>,
    label_offsets: Vec<Option<u32>>,
    fixups: SmallVec<[Fixup; 8]>,
}

impl CodeBuffer {
    /// Start a new, empty buffer.
    pub fn new() -> Self {
        Self {
            bytes: Vec::with_capacity(256),
            label_offsets: Vec::new(),
            fixups: SmallVec::new(),
        }
    }

    /// Current write position, in bytes from the start of the buffer.
    pub fn offset(&self) -> u32 {
        self.bytes.len() as u32
    }

    /// Allocate a fresh, unbound label.
    pub fn new_label(&mut self) -> Label {
        let id = self.label_offsets.len() as u32;
        self.label_offsets.push(None);
        Label(id)
    }

    /// Bind `label` to the current write position.
    ///
    /// Binding the same label twice is an emitter bug (two tiles sharing a
    /// label they should each have allocated their own copy of): asserted,
    /// not reported, per §7's "emitter invariant violation" category.
    pub fn bind_label(&mut self, label: Label) {
        let slot = &mut self.label_offsets[label.0 as usize];
        assert!(slot.is_none(), "label {:?} bound twice", label);
        *slot = Some(self.offset());
    }

    /// Append raw bytes (used by the ISA encoder).
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.bytes.extend_from_slice(bytes);
    }

    /// Append a single raw byte (used by the ISA encoder).
    pub fn put1(&mut self, b: u8) {
        self.bytes.push(b);
    }

    /// Append a 4-byte little-endian immediate or displacement.
    pub fn put4_le(&mut self, v: u32) {
        self.bytes.extend_from_slice(&v.to_le_bytes());
    }

    /// Emit a 4-byte placeholder for a rel32 displacement to `label`,
    /// recording a fixup to patch it once `label` is bound and the buffer
    /// is sealed. Returns the offset of the placeholder, useful for tests
    /// that want to assert on raw bytes before relocation.
    pub fn reserve_rel32(&mut self, label: Label) -> u32 {
        let at = self.offset();
        self.put4_le(0); // placeholder, patched in `finish`
        self.fixups.push(Fixup {
            at,
            end_of_insn: self.offset(),
            label,
        });
        at
    }

    /// Resolve every fixup and seal the buffer into an executable-ready
    /// blob.
    ///
    /// An unbound label at this point is an emitter bug: every label this
    /// crate allocates is bound unconditionally before `finish` is called
    /// (see each `emit_*` entry point), so this is an assertion rather
    /// than a `Result`.
    pub fn finish(mut self) -> CodeBlob {
        for fixup in &self.fixups {
            let target = self.label_offsets[fixup.label.0 as usize]
                .unwrap_or_else(|| panic!("label {:?} referenced but never bound", fixup.label));
            let rel = target as i64 - fixup.end_of_insn as i64;
            let rel = i32::try_from(rel)
                .unwrap_or_else(|_| panic!("branch displacement {} does not fit in rel32", rel));
            let at = fixup.at as usize;
            self.bytes[at..at + 4].copy_from_slice(&rel.to_le_bytes());
        }
        CodeBlob { code: self.bytes }
    }
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// A sealed, position-independent* machine-code blob for one kernel call.
///
/// (*) Position-independent with respect to its own internal branches;
/// entry is always byte 0. Mapping it into executable memory, flushing
/// the instruction cache, and invoking it through a function-pointer cast
/// are the out-of-scope code cache's job (§1), not this crate's: we hand
/// back bytes, not a callable.
#[derive(Debug, Clone)]
pub struct CodeBlob {
    code: Vec<u8>,
}

impl CodeBlob {
    /// The raw machine code, entry point at offset 0, System-V calling
    /// convention, taking one argument: `*const `[`CallArgs`](crate::args::CallArgs).
    pub fn code(&self) -> &[u8] {
        &self.code
    }

    /// Size of the emitted code, in bytes.
    pub fn len(&self) -> usize {
        self.code.len()
    }

    /// Is this an empty (degenerate) blob?
    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_label_reference_patches_correctly() {
        let mut buf = CodeBuffer::new();
        let done = buf.new_label();
        buf.put1(0x90); // nop, just to offset things
        buf.put1(0xe9); // jmp rel32 opcode
        let placeholder = buf.reserve_rel32(done);
        buf.put1(0x90);
        buf.put1(0x90);
        buf.bind_label(done);
        buf.put1(0xc3); // ret
        let blob = buf.finish();
        let code = blob.code();
        let rel = i32::from_le_bytes([
            code[placeholder as usize],
            code[placeholder as usize + 1],
            code[placeholder as usize + 2],
            code[placeholder as usize + 3],
        ]);
        // end_of_insn was placeholder + 4; label bound 2 bytes later.
        assert_eq!(rel, 2);
        assert_eq!(code.last(), Some(&0xc3));
    }

    #[test]
    fn backward_label_reference_patches_correctly() {
        let mut buf = CodeBuffer::new();
        let top = buf.new_label();
        buf.bind_label(top);
        buf.put1(0x90);
        buf.put1(0xe9);
        let placeholder = buf.reserve_rel32(top);
        let blob = buf.finish();
        let code = blob.code();
        let rel = i32::from_le_bytes([
            code[placeholder as usize],
            code[placeholder as usize + 1],
            code[placeholder as usize + 2],
            code[placeholder as usize + 3],
        ]);
        // Loop back one byte (the leading nop) past the end of the jmp.
        assert_eq!(rel, -5);
    }

    #[test]
    #[should_panic(expected = "never bound")]
    fn unbound_label_panics_on_finish() {
        let mut buf = CodeBuffer::new();
        let stray = buf.new_label();
        buf.reserve_rel32(stray);
        let _ = buf.finish();
    }
}
