//! Translates a validated [`ConvConf`] into machine code: the direction
//! dispatch upstream's three `generate()` overrides provide via virtual
//! dispatch, done here with a plain `match` since there is no class
//! hierarchy to speak of (§4 of the design notes: "one struct, one
//! dispatch").
//!
//! Each submodule owns the register-role assignment and address arithmetic
//! for one direction, grounded line-for-line on the corresponding
//! `generate()`/`*_step*()` method in the original kernel source. None of
//! the three share a register layout, matching upstream: each `generate()`
//! picks its own `Reg64` members independent of the other two classes.

use crate::buffer::{CodeBlob, CodeBuffer};
use crate::conf::{ConvConf, Direction};
use crate::isa::x64::asm::{Assembler, Mem};
use crate::isa::x64::reg::{Gpr, ARG_PTR};
use log::trace;

mod bwd_data;
mod bwd_weights;
mod fwd;

/// Registers callee-saved under the System V AMD64 ABI that an emitter may
/// clobber; `emit::prologue`/`emit::epilogue` save and restore exactly
/// these, mirroring Xbyak's `preamble()`/`postamble()` pair that upstream
/// calls at the top and bottom of every `generate()`.
const CALLEE_SAVED: [Gpr; 5] = [
    crate::isa::x64::reg::RBX,
    crate::isa::x64::reg::R12,
    crate::isa::x64::reg::R13,
    crate::isa::x64::reg::R14,
    crate::isa::x64::reg::R15,
];

fn prologue(asm: &mut Assembler) {
    for &reg in &CALLEE_SAVED {
        asm.push(reg);
    }
}

fn epilogue(asm: &mut Assembler) {
    for &reg in CALLEE_SAVED.iter().rev() {
        asm.pop(reg);
    }
    asm.ret();
}

/// `mov dst, [rdi + offset]`: read one field out of the incoming
/// [`args::CallArgs`] pointer. Called only in a prologue, before `rdi` is
/// put to any other use.
fn load_arg(asm: &mut Assembler, dst: Gpr, offset: i32) {
    asm.mov_load(dst, Mem::new(ARG_PTR, offset));
}

/// Emit machine code for one convolution direction.
///
/// Returns a sealed [`crate::buffer::CodeBlob`]; handing it to executable
/// memory and invoking it is the embedder's job (§1, §6).
pub fn emit(conf: &ConvConf) -> CodeBlob {
    trace!("emit: entering {:?}", conf.direction);
    let mut buf = CodeBuffer::new();
    {
        let mut asm = Assembler::new(&mut buf);
        prologue(&mut asm);
        match conf.direction {
            Direction::Forward => fwd::generate(&mut asm, conf),
            Direction::BackwardData => bwd_data::generate(&mut asm, conf),
            Direction::BackwardWeights => bwd_weights::generate(&mut asm, conf),
        }
        epilogue(&mut asm);
    }
    let blob = buf.finish();
    trace!("emit: {:?} done, {} bytes", conf.direction, blob.len());
    blob
}

/// Size in bytes of one `f32` lane, the unit every displacement in §4's
/// address arithmetic is expressed in before scaling to bytes.
const F32: i32 = 4;
