//! The argument record: the ABI between the (out-of-scope) outer driver and
//! an emitted kernel call.
//!
//! A kernel takes a single pointer to one of these in its first integer
//! argument register, System-V style. Field offsets are computed at
//! planning/emit time and burned directly into the generated code's
//! addressing, so this layout must never change without re-emitting every
//! existing `CodeBlob`.

/// Bit 0 of [`CallArgs::ic_flag`]: initialise accumulators instead of
/// loading/accumulating into an in-progress reduction.
pub const IC_FLAG_FIRST: u8 = 1 << 0;

/// Bit 1 of [`CallArgs::ic_flag`]: this is the last ic-block in the
/// reduction, so apply bias-free epilogue modifiers (ReLU) before storing.
pub const IC_FLAG_LAST: u8 = 1 << 1;

/// Both bits set: this call covers the entire ic reduction by itself.
pub const IC_FLAG_BOTH: u8 = IC_FLAG_FIRST | IC_FLAG_LAST;

/// Neither bit set: a continuation call in the middle of a multi-block ic
/// reduction (load, accumulate, store straight back, no epilogue).
pub const IC_FLAG_MIDDLE: u8 = 0;

/// The dense, `#[repr(C)]` record every emitted kernel reads its operands
/// from.
///
/// Interpretation of `src`/`dst`/`filt` depends on the direction the
/// `CodeBlob` was emitted for (§6):
///
/// | direction | `src` | `dst` | `filt` |
/// |---|---|---|---|
/// | forward | input tile | output tile | filter slice |
/// | backward-data | d_src tile (read-modify-write) | d_dst tile | filter slice |
/// | backward-weights | input tile | d_dst tile | d_filter slice (accumulated into) |
///
/// `bias` is only read by a forward kernel with `with_bias` set; it is
/// otherwise ignored and may be null.
#[repr(C)]
#[derive(Debug, Copy, Clone)]
pub struct CallArgs {
    /// Base of the source operand tile (see table above).
    pub src: *const f32,
    /// Base of the destination operand tile.
    pub dst: *mut f32,
    /// Base of the filter (or diff-filter) slice.
    pub filt: *mut f32,
    /// Base of the bias vector; forward-only.
    pub bias: *const f32,
    /// Effective K_H extent after the caller trims top/bottom overflow.
    pub kh_padding: i64,
    /// `IC_FLAG_*` bitmask selecting accumulator init/epilogue behaviour.
    pub ic_flag: i64,
}

/// Byte offsets of each [`CallArgs`] field, the way `GET_OFF` computes them
/// at emit time: burned into the generated `mov reg, [rdi + offset]`
/// prologue loads as plain `i32` displacements.
pub mod offsets {
    /// Offset of [`CallArgs::src`](super::CallArgs::src).
    pub const SRC: i32 = 0;
    /// Offset of [`CallArgs::dst`](super::CallArgs::dst).
    pub const DST: i32 = 8;
    /// Offset of [`CallArgs::filt`](super::CallArgs::filt).
    pub const FILT: i32 = 16;
    /// Offset of [`CallArgs::bias`](super::CallArgs::bias).
    pub const BIAS: i32 = 24;
    /// Offset of [`CallArgs::kh_padding`](super::CallArgs::kh_padding).
    pub const KH_PADDING: i32 = 32;
    /// Offset of [`CallArgs::ic_flag`](super::CallArgs::ic_flag).
    pub const IC_FLAG: i32 = 40;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_match_repr_c_field_layout() {
        let args = CallArgs {
            src: core::ptr::null(),
            dst: core::ptr::null_mut(),
            filt: core::ptr::null_mut(),
            bias: core::ptr::null(),
            kh_padding: 0,
            ic_flag: 0,
        };
        let base = &args as *const CallArgs as usize;
        assert_eq!(&args.src as *const _ as usize - base, offsets::SRC as usize);
        assert_eq!(&args.dst as *const _ as usize - base, offsets::DST as usize);
        assert_eq!(&args.filt as *const _ as usize - base, offsets::FILT as usize);
        assert_eq!(&args.bias as *const _ as usize - base, offsets::BIAS as usize);
        assert_eq!(
            &args.kh_padding as *const _ as usize - base,
            offsets::KH_PADDING as usize
        );
        assert_eq!(&args.ic_flag as *const _ as usize - base, offsets::IC_FLAG as usize);
    }
}
