//! Architectural register numbering for the x86-64/AVX2 target.
//!
//! Both register files use the same 4-bit encoding upstream's
//! `isa::x86::registers` assigns: register number 0..=7 addressable with a
//! 2-byte opcode, 8..=15 requiring the corresponding REX/VEX extension bit.
//! We keep general-purpose and vector registers as distinct newtypes so a
//! caller can't pass a `Ymm` where a `Gpr` belongs, the same separation
//! upstream's `RegUnit` vs. class-tagged register draws with `RegClass`.

/// A general-purpose 64-bit register (`rax`..`r15`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Gpr(pub u8);

/// `rax`, register number 0.
pub const RAX: Gpr = Gpr(0);
/// `rcx`, register number 1.
pub const RCX: Gpr = Gpr(1);
/// `rdx`, register number 2.
pub const RDX: Gpr = Gpr(2);
/// `rbx`, register number 3.
pub const RBX: Gpr = Gpr(3);
/// `rsp`, register number 4; never assigned to an emitter role (see
/// [`ARG_PTR`] and [`SCRATCH_GPRS`] below).
pub const RSP: Gpr = Gpr(4);
/// `rbp`, register number 5; never assigned to an emitter role.
pub const RBP: Gpr = Gpr(5);
/// `rsi`, register number 6.
pub const RSI: Gpr = Gpr(6);
/// `rdi`, register number 7; see [`ARG_PTR`].
pub const RDI: Gpr = Gpr(7);
/// `r8`, register number 8 (first extended register).
pub const R8: Gpr = Gpr(8);
/// `r9`, register number 9.
pub const R9: Gpr = Gpr(9);
/// `r10`, register number 10.
pub const R10: Gpr = Gpr(10);
/// `r11`, register number 11.
pub const R11: Gpr = Gpr(11);
/// `r12`, register number 12; callee-saved, see [`crate::emit`]'s prologue.
pub const R12: Gpr = Gpr(12);
/// `r13`, register number 13; callee-saved.
pub const R13: Gpr = Gpr(13);
/// `r14`, register number 14; callee-saved.
pub const R14: Gpr = Gpr(14);
/// `r15`, register number 15; callee-saved.
pub const R15: Gpr = Gpr(15);

impl Gpr {
    /// Low 3 bits, as they appear in a ModRM or SIB byte.
    pub fn low3(self) -> u8 {
        self.0 & 7
    }

    /// The extension bit a REX/VEX prefix must carry for this register.
    pub fn is_extended(self) -> bool {
        self.0 >= 8
    }
}

/// A 256-bit vector register (`ymm0`..`ymm15`).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Ymm(pub u8);

impl Ymm {
    /// Low 3 bits, as they appear in a ModRM byte.
    pub fn low3(self) -> u8 {
        self.0 & 7
    }

    /// The extension bit a VEX prefix must carry for this register.
    pub fn is_extended(self) -> bool {
        self.0 >= 8
    }
}

impl From<u8> for Ymm {
    fn from(id: u8) -> Self {
        Ymm(id)
    }
}

/// Registers this crate never asks the ISA encoder to allocate because
/// they carry the frame (`rbp`) or hold the incoming [`CallArgs`] pointer
/// for the whole call (`rdi`, read once in the prologue; see
/// `emit::prologue`).
///
/// [`CallArgs`]: crate::args::CallArgs
pub const ARG_PTR: Gpr = RDI;

/// General-purpose scratch pool available to an emitter: caller-saved,
/// excluding `rsp`/`rbp` (frame) and `rdi` (argument pointer). Emitters
/// pick roles from this pool positionally; none of our kernels need more
/// than a handful of live GPRs at once, so no frame-local spill slots are
/// ever needed (see DESIGN.md).
pub const SCRATCH_GPRS: [Gpr; 7] = [RAX, RCX, RDX, RSI, R8, R9, R10];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_bit_matches_register_number() {
        assert!(!RAX.is_extended());
        assert!(!RDI.is_extended());
        assert!(R8.is_extended());
        assert!(R15.is_extended());
        assert_eq!(R12.low3(), 4);
    }
}
