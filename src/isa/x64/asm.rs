//! VEX/REX instruction encoding for the handful of AVX2/FMA and scalar
//! GP instructions the three emitters need.
//!
//! This is deliberately not a general x86-64 assembler: it encodes exactly
//! the opcodes `emit::{fwd,bwd_data,bwd_weights}` use, the same scope
//! discipline upstream's `binemit` applies per-ISA (only the forms a given
//! target's `MachInst` actually lowers to are implemented). Every vector
//! instruction always emits the long (3-byte) VEX prefix, even where a
//! 2-byte VEX would do; see DESIGN.md for that trade-off.
//!
//! Memory operands are always `[base + disp32]`: a fixed-size displacement
//! and no index register, because that is the only addressing form any of
//! the three kernel bodies construct (§4's "strength-reduced" pointer
//! bumping keeps a running base, never an index). A `disp32` is always
//! emitted, even for small displacements that would fit in a `disp8`,
//! mirroring the unconditional-rel32 trade-off in `buffer.rs`.

use crate::isa::x64::reg::{Gpr, Ymm};
use crate::buffer::{CodeBuffer, Label};

/// `[base + disp]`: the only memory form this encoder emits.
#[derive(Debug, Copy, Clone)]
pub struct Mem {
    /// The base register the displacement is added to.
    pub base: Gpr,
    /// Byte displacement from `base`, always encoded as a full `disp32`.
    pub disp: i32,
}

impl Mem {
    /// Build a `[base + disp]` memory operand.
    pub fn new(base: Gpr, disp: i32) -> Self {
        Mem { base, disp }
    }
}

/// Condition codes for conditional jumps, named the way the emitters
/// reason about loop trip counts (`Jl`/`Jge` guard `dec`/`cmp` loop
/// counters, `Jle`/`Jg` guard tail-vs-full-tile branches).
#[derive(Debug, Copy, Clone)]
pub enum Cond {
    /// Signed less-than (`jl`).
    L,
    /// Signed greater-or-equal (`jge`).
    Ge,
    /// Signed less-or-equal (`jle`).
    Le,
    /// Signed greater-than (`jg`).
    G,
    /// Equal / zero flag set (`je`).
    E,
    /// Not equal / zero flag clear (`jne`).
    Ne,
}

impl Cond {
    fn tttn(self) -> u8 {
        match self {
            Cond::E => 0x4,
            Cond::Ne => 0x5,
            Cond::L => 0xc,
            Cond::Ge => 0xd,
            Cond::Le => 0xe,
            Cond::G => 0xf,
        }
    }
}

/// VEX `map_select` field values (the escape byte(s) a legacy opcode would
/// have used).
mod map {
    pub const MAP0F: u8 = 1;
    pub const MAP0F38: u8 = 2;
    pub const MAP0F3A: u8 = 3;
}

/// VEX `pp` field values (the mandatory legacy prefix a non-VEX form of
/// the opcode would have carried).
mod pp {
    pub const NONE: u8 = 0;
    pub const P66: u8 = 1;
}

fn rex_if_needed(w: bool, r: bool, x: bool, b: bool, buf: &mut CodeBuffer) {
    if w || r || x || b {
        buf.put1(0x40 | (w as u8) << 3 | (r as u8) << 2 | (x as u8) << 1 | b as u8);
    }
}

/// Always-3-byte VEX prefix. `reg` is the ModRM.reg operand, `vvvv` the
/// second source (the non-destructive operand), `rm` the ModRM.rm /
/// SIB.base operand; all three take their low-3-bit encoding from the
/// caller and their extension bit from here.
fn vex3(buf: &mut CodeBuffer, map_select: u8, w: bool, reg: u8, vvvv: u8, rm_or_base: u8, p: u8) {
    let r = (reg >> 3) & 1;
    let b = (rm_or_base >> 3) & 1;
    buf.put1(0xc4);
    buf.put1((!r & 1) << 7 | (1 << 6) /* X=1 (unused, no index) */ | (!b & 1) << 5 | map_select);
    buf.put1((w as u8) << 7 | (!vvvv & 0xf) << 3 | (1 << 2) /* L=1, 256-bit */ | p);
}

fn modrm_reg(reg: u8, rm: u8, buf: &mut CodeBuffer) {
    buf.put1(0xc0 | (reg & 7) << 3 | (rm & 7));
}

fn modrm_mem(reg: u8, mem: Mem, buf: &mut CodeBuffer) {
    let base_low = mem.base.low3();
    buf.put1(0b1000_0000 | (reg & 7) << 3 | if base_low == 4 { 4 } else { base_low });
    if base_low == 4 {
        // rsp/r12 as a base always needs a SIB byte; no index, scale is moot.
        buf.put1(0x24);
    }
    buf.put4_le(mem.disp as u32);
}

/// The AVX2/FMA and scalar-GP assembler. Borrows the buffer it streams
/// bytes into; one instance per emitter call, matching `CodeBuffer`'s own
/// one-owner-per-emit lifetime (see `buffer.rs`).
pub struct Assembler<'a> {
    buf: &'a mut CodeBuffer,
}

impl<'a> Assembler<'a> {
    /// Wrap a buffer for the duration of one emitter call.
    pub fn new(buf: &'a mut CodeBuffer) -> Self {
        Assembler { buf }
    }

    /// Borrow the underlying buffer, for label allocation/binding between
    /// instruction-emitting calls.
    pub fn buffer(&mut self) -> &mut CodeBuffer {
        self.buf
    }

    // ---- AVX2 vector instructions ----------------------------------

    /// `vmovups ymm, [mem]`
    pub fn vmovups_load(&mut self, dst: Ymm, src: Mem) {
        vex3(self.buf, map::MAP0F, false, dst.0, 0, src.base.0, pp::NONE);
        self.buf.put1(0x10);
        modrm_mem(dst.0, src, self.buf);
    }

    /// `vmovups [mem], ymm`
    pub fn vmovups_store(&mut self, dst: Mem, src: Ymm) {
        vex3(self.buf, map::MAP0F, false, src.0, 0, dst.base.0, pp::NONE);
        self.buf.put1(0x11);
        modrm_mem(src.0, dst, self.buf);
    }

    /// `vbroadcastss ymm, [mem]`: the per-column input broadcast.
    pub fn vbroadcastss(&mut self, dst: Ymm, src: Mem) {
        vex3(self.buf, map::MAP0F38, false, dst.0, 0, src.base.0, pp::P66);
        self.buf.put1(0x18);
        modrm_mem(dst.0, src, self.buf);
    }

    /// `vfmadd231ps dst, src1, src2` (reg-reg form): `dst += src1 * src2`.
    pub fn vfmadd231ps(&mut self, dst: Ymm, src1: Ymm, src2: Ymm) {
        vex3(self.buf, map::MAP0F38, false, dst.0, src1.0, src2.0, pp::P66);
        self.buf.put1(0xb8);
        modrm_reg(dst.0, src2.0, self.buf);
    }

    /// `vxorps dst, src1, src2`, used with `dst == src1 == src2` to zero a
    /// register without a false output dependency.
    pub fn vxorps(&mut self, dst: Ymm, src1: Ymm, src2: Ymm) {
        vex3(self.buf, map::MAP0F, false, dst.0, src1.0, src2.0, pp::NONE);
        self.buf.put1(0x57);
        modrm_reg(dst.0, src2.0, self.buf);
    }

    /// `vcmpgtps mask, src1, src2`: `VCMPPS` with the greater-than-ordered
    /// predicate (`0x0e`), used to build the ReLU select mask.
    pub fn vcmpgtps(&mut self, mask: Ymm, src1: Ymm, src2: Ymm) {
        vex3(self.buf, map::MAP0F, false, mask.0, src1.0, src2.0, pp::NONE);
        self.buf.put1(0xc2);
        modrm_reg(mask.0, src2.0, self.buf);
        self.buf.put1(0x0e);
    }

    /// `vblendvps dst, src1, src2, mask`: select `src2` where `mask` is
    /// set, `src1` otherwise; the ReLU epilogue's `max(x, 0)` in two
    /// instructions (`vcmpgtps` + this).
    pub fn vblendvps(&mut self, dst: Ymm, src1: Ymm, src2: Ymm, mask: Ymm) {
        vex3(self.buf, map::MAP0F3A, false, dst.0, src1.0, src2.0, pp::P66);
        self.buf.put1(0x4a);
        modrm_reg(dst.0, src2.0, self.buf);
        self.buf.put1((mask.0 & 0xf) << 4);
    }

    // ---- scalar GP instructions -------------------------------------

    /// `mov dst, [mem]` (64-bit).
    pub fn mov_load(&mut self, dst: Gpr, src: Mem) {
        rex_if_needed(true, dst.is_extended(), false, src.base.is_extended(), self.buf);
        self.buf.put1(0x8b);
        modrm_mem(dst.low3(), src, self.buf);
    }

    /// `mov dst, src` (64-bit, register-to-register).
    pub fn mov_reg(&mut self, dst: Gpr, src: Gpr) {
        rex_if_needed(true, dst.is_extended(), false, src.is_extended(), self.buf);
        self.buf.put1(0x8b);
        modrm_reg(dst.low3(), src.low3(), self.buf);
    }

    /// `mov dst, imm32` (64-bit, sign-extended immediate), used to seed a
    /// loop counter with a compile-time-known trip count.
    pub fn mov_imm(&mut self, dst: Gpr, imm: i32) {
        rex_if_needed(true, false, false, dst.is_extended(), self.buf);
        self.buf.put1(0xc7);
        modrm_reg(0, dst.low3(), self.buf);
        self.buf.put4_le(imm as u32);
    }

    /// `sub dst, src` (64-bit, register-to-register).
    pub fn sub_reg(&mut self, dst: Gpr, src: Gpr) {
        rex_if_needed(true, src.is_extended(), false, dst.is_extended(), self.buf);
        self.buf.put1(0x29);
        modrm_reg(src.low3(), dst.low3(), self.buf);
    }

    /// `add dst, imm32` (64-bit, sign-extended immediate).
    pub fn add_imm(&mut self, dst: Gpr, imm: i32) {
        rex_if_needed(true, false, false, dst.is_extended(), self.buf);
        self.buf.put1(0x81);
        modrm_reg(0, dst.low3(), self.buf);
        self.buf.put4_le(imm as u32);
    }

    /// `sub dst, imm32`.
    pub fn sub_imm(&mut self, dst: Gpr, imm: i32) {
        rex_if_needed(true, false, false, dst.is_extended(), self.buf);
        self.buf.put1(0x81);
        modrm_reg(5, dst.low3(), self.buf);
        self.buf.put4_le(imm as u32);
    }

    /// `cmp lhs, imm32`.
    pub fn cmp_imm(&mut self, lhs: Gpr, imm: i32) {
        rex_if_needed(true, false, false, lhs.is_extended(), self.buf);
        self.buf.put1(0x81);
        modrm_reg(7, lhs.low3(), self.buf);
        self.buf.put4_le(imm as u32);
    }

    /// `test lhs, imm32`: used to probe `ic_flag` bits.
    pub fn test_imm(&mut self, lhs: Gpr, imm: i32) {
        rex_if_needed(true, false, false, lhs.is_extended(), self.buf);
        self.buf.put1(0xf7);
        modrm_reg(0, lhs.low3(), self.buf);
        self.buf.put4_le(imm as u32);
    }

    /// `dec reg`: the per-iteration K_H loop-counter decrement.
    pub fn dec(&mut self, reg: Gpr) {
        rex_if_needed(true, false, false, reg.is_extended(), self.buf);
        self.buf.put1(0xff);
        modrm_reg(1, reg.low3(), self.buf);
    }

    /// `inc reg`: the per-iteration O_W / K_W trip-counter increment.
    pub fn inc(&mut self, reg: Gpr) {
        rex_if_needed(true, false, false, reg.is_extended(), self.buf);
        self.buf.put1(0xff);
        modrm_reg(0, reg.low3(), self.buf);
    }

    /// `xor dst, dst`: zero a GP register.
    pub fn xor_self(&mut self, dst: Gpr) {
        rex_if_needed(true, dst.is_extended(), false, dst.is_extended(), self.buf);
        self.buf.put1(0x31);
        modrm_reg(dst.low3(), dst.low3(), self.buf);
    }

    /// `jmp rel32` to `label`.
    pub fn jmp(&mut self, label: Label) {
        self.buf.put1(0xe9);
        self.buf.reserve_rel32(label);
    }

    /// `jcc rel32` to `label`.
    pub fn jcc(&mut self, cond: Cond, label: Label) {
        self.buf.put1(0x0f);
        self.buf.put1(0x80 | cond.tttn());
        self.buf.reserve_rel32(label);
    }

    /// `push reg`.
    pub fn push(&mut self, reg: Gpr) {
        if reg.is_extended() {
            self.buf.put1(0x41);
        }
        self.buf.put1(0x50 | reg.low3());
    }

    /// `pop reg`.
    pub fn pop(&mut self, reg: Gpr) {
        if reg.is_extended() {
            self.buf.put1(0x41);
        }
        self.buf.put1(0x58 | reg.low3());
    }

    /// `ret`.
    pub fn ret(&mut self) {
        self.buf.put1(0xc3);
    }
}
