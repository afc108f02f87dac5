//! Fixed, rule-based assignment of the 16 architectural vector registers
//! (`ymm0`..`ymm15`) to the logical roles each emitter needs.
//!
//! Register allocation here is not a search: every role's register number
//! is a pure function of tile coordinates, following upstream's convention
//! of numbering accumulators by position (`ur_w * ii + jj`) and reserving
//! the high end of the register file for broadcast/scratch values. What
//! this module adds over inlining the arithmetic at each call site is a
//! single place that asserts the roles don't collide, so a planner change
//! that quietly busts the register budget fails loudly at emit time
//! instead of corrupting a neighboring accumulator.
//!
//! This mirrors the role `RegisterSet` plays upstream: the allocator there
//! tracks availability as a bitset over register *units* so taking an
//! already-taken register is a checked invariant violation rather than
//! silent aliasing. We don't need a general bitset here because the plan
//! is fixed ahead of time, but we keep the same "assert on collision"
//! discipline.

/// Total number of architectural vector registers available (`ymm0..=15`).
pub const NUM_VREGS: u8 = 16;

/// A vector register role has been assigned a register number outside
/// `0..16`, or two roles collided. This can only happen for a `ConvConf`
/// whose blocking factors violate the invariants the planner is supposed
/// to enforce (§7): a fatal assertion, not a reportable error.
fn check(id: u32, what: &str) -> u8 {
    assert!(
        id < u32::from(NUM_VREGS),
        "{} register {} does not fit in the 16-register file",
        what,
        id
    );
    id as u8
}

/// Forward / backward-data accumulator register for output/d_src tile
/// position `(ii, jj)`: the `ii`-th channel block, `jj`-th unrolled
/// column. Matches upstream's `Ymm(ur_w * ii + jj)`.
pub fn acc_reg(ii: usize, jj: usize, ur_w: usize) -> u8 {
    check((ur_w * ii + jj) as u32, "accumulator")
}

/// Forward / backward-data broadcast-input register for unrolled column
/// `jj`, placed immediately after the last accumulator.
pub fn bcast_reg(jj: usize, nb_blocking: usize, ur_w: usize) -> u8 {
    check((nb_blocking * ur_w + jj) as u32, "broadcast")
}

/// The forward/backward-data kernel-load scratch register: always the
/// top of the file. Reused as `yzero` in the ReLU epilogue once the K_H
/// reduction (the only place it holds a live kernel vector) has finished.
pub fn scratch_reg() -> u8 {
    NUM_VREGS - 1
}

/// The forward ReLU comparison-mask register, one below `scratch_reg`.
/// Only live in the epilogue, after the broadcast registers are dead, so
/// it never collides with `bcast_reg` despite numeric overlap being
/// possible for small tiles.
pub fn relu_mask_reg() -> u8 {
    NUM_VREGS - 2
}

/// Assert the forward/backward-data register plan fits. `with_relu` also
/// reserves `relu_mask_reg` for the epilogue, which must stay clear of
/// every accumulator (the epilogue's `yzero`/`ymask` pair is read only
/// after the main K_H loop retires its broadcast registers, but
/// accumulators are live across both phases).
pub fn verify_tile_plan(nb_blocking: usize, ur_w: usize, with_relu: bool) {
    let last_bcast = bcast_reg(ur_w.saturating_sub(1), nb_blocking, ur_w);
    assert!(
        last_bcast < scratch_reg(),
        "nb_blocking({}) * ur_w({}) + ur_w leaves no scratch register free",
        nb_blocking,
        ur_w
    );
    if with_relu {
        let last_acc = acc_reg(nb_blocking.saturating_sub(1), ur_w.saturating_sub(1), ur_w);
        assert!(
            last_acc < relu_mask_reg(),
            "nb_blocking({}) * ur_w({}) accumulators collide with the ReLU mask register",
            nb_blocking,
            ur_w
        );
    }
}

/// Backward-weights filter-accumulator register for `(i_kw, i_ic)` within
/// one `ic_block_step`-wide IC step. Matches upstream's
/// `Ymm(i_kw * ic_block_step + i_ic)`.
pub fn bw_acc_reg(i_kw: usize, i_ic: usize, ic_block_step: usize) -> u8 {
    check((i_kw * ic_block_step + i_ic) as u32, "bwd-weights accumulator")
}

/// Backward-weights scratch register holding one `d_dst` row vector.
pub fn bw_ddst_reg(kw: usize, ic_block_step: usize) -> u8 {
    check((kw * ic_block_step) as u32, "bwd-weights d_dst scratch")
}

/// Backward-weights scratch register holding a broadcast source scalar.
pub fn bw_src_bcast_reg(kw: usize, ic_block_step: usize) -> u8 {
    check((kw * ic_block_step + 1) as u32, "bwd-weights src broadcast")
}

/// Assert the backward-weights register plan fits: `kw * ic_block_step`
/// accumulators plus the two scratch registers above them.
pub fn verify_bw_plan(kw: usize, ic_block_step: usize) {
    let top = bw_src_bcast_reg(kw, ic_block_step);
    assert!(
        u32::from(top) < u32::from(NUM_VREGS),
        "kw({}) * ic_block_step({}) + 2 overflows the 16-register file",
        kw,
        ic_block_step
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fwd_layout_matches_upstream_formula() {
        // nb_oc_blocking = 4, ur_w = 3 (AlexNet conv1's forward plan).
        assert_eq!(acc_reg(0, 0, 3), 0);
        assert_eq!(acc_reg(1, 0, 3), 3);
        assert_eq!(acc_reg(3, 2, 3), 11);
        assert_eq!(bcast_reg(0, 4, 3), 12);
        assert_eq!(bcast_reg(2, 4, 3), 14);
        assert_eq!(scratch_reg(), 15);
        verify_tile_plan(4, 3, false);
    }

    #[test]
    #[should_panic]
    fn oversized_tile_plan_panics() {
        verify_tile_plan(4, 4, false); // 4*4 + 4 = 20 > 16
    }

    #[test]
    fn relu_plan_reserves_mask_register() {
        // nb_oc_blocking = 3, ur_w = 3: accumulators occupy 0..9, well clear
        // of the mask register at 14.
        verify_tile_plan(3, 3, true);
    }

    #[test]
    fn bwd_weights_layout() {
        // AlexNet conv1 backward-weights: kw = 11, ic_block_step = 1.
        assert_eq!(bw_acc_reg(0, 0, 1), 0);
        assert_eq!(bw_acc_reg(10, 0, 1), 10);
        assert_eq!(bw_ddst_reg(11, 1), 11);
        assert_eq!(bw_src_bcast_reg(11, 1), 12);
        verify_bw_plan(11, 1);
    }
}
