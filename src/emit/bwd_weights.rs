//! Backward-weights kernel emission, grounded on
//! `jit_avx2_conv_bwd_weights_kernel_f32::{compute_ic_block_step,
//! compute_oh_step_unroll_ow, compute_oh_step_common,
//! oh_step_comeback_pointers, compute_oh_loop_common, generate}`.
//!
//! This is the one direction where upstream's own split between an
//! "unrolled" and a "common" O_W path survives unchanged here: for an O_W
//! within `max_ur_w` the whole row is unrolled statically
//! ([`compute_oh_step_unroll_ow`]); past that, a runtime `ow_block` loop
//! walks the row in `ur_w`-wide strips with a separate, possibly-shorter
//! tail strip ([`compute_oh_step_common`]).
//!
//! | role | register |
//! |---|---|
//! | `reg_input` | r8 |
//! | `reg_output` (d_dst) | r9 |
//! | `reg_kernel` (d_filt, accumulated in place) | r10 |
//! | `reg_kh` | rax |
//! | `kj` (K_H trip counter) | rsi |
//! | `b_ic` (IC_BLOCK trip counter) | rcx |
//! | `reg_ur_w_trips` | rdx |
//! | `reg_oj` (O_H position) | r12 |
//! | `reg_ih_count` | r13 |

use crate::args;
use crate::conf::ConvConf;
use crate::isa::x64::asm::{Assembler, Cond, Mem};
use crate::isa::x64::reg::*;
use crate::regs;
use crate::emit::{load_arg, F32};
use log::trace;

const REG_INPUT: Gpr = R8;
const REG_OUTPUT: Gpr = R9;
const REG_KERNEL: Gpr = R10;
const REG_KH: Gpr = RAX;
const KJ: Gpr = RSI;
const B_IC: Gpr = RCX;
const REG_UR_W_TRIPS: Gpr = RDX;
const REG_OJ: Gpr = R12;
const REG_IH_COUNT: Gpr = R13;

/// Accumulate one `ic_block_step`-wide strip of `ur_w` output positions
/// into the `kw * ic_block_step` filter accumulators: load the current
/// partial sums, FMA in every valid `(i_kw, i_ur)` input/d_dst pair
/// (skipping positions the `pad_l`/`pad_r` window excludes), write back.
fn compute_ic_block_step(
    asm: &mut Assembler,
    conf: &ConvConf,
    ur_w: usize,
    pad_l: usize,
    pad_r: usize,
    ic_block_step: usize,
) {
    let kw = conf.kw;
    let ic_block = conf.ic_block as i32;
    let oc_block = conf.oc_block as i32;
    let stride_w = conf.stride_w as i32;

    regs::verify_bw_plan(kw, ic_block_step);

    for i_kw in 0..kw {
        for i_ic in 0..ic_block_step {
            let off = (i_kw as i32 * ic_block + i_ic as i32) * oc_block;
            asm.vmovups_load(
                Ymm(regs::bw_acc_reg(i_kw, i_ic, ic_block_step)),
                Mem::new(REG_KERNEL, F32 * off),
            );
        }
    }

    for i_ur in 0..ur_w {
        asm.vmovups_load(
            Ymm(regs::bw_ddst_reg(kw, ic_block_step)),
            Mem::new(REG_OUTPUT, F32 * i_ur as i32 * oc_block),
        );
        for i_kw in 0..kw {
            let i_iw = i_ur as i32 * stride_w + i_kw as i32;
            if i_iw - pad_l as i32 < 0
                || i_iw > (ur_w as i32 - 1) * stride_w + kw as i32 - 1 - pad_r as i32
            {
                continue;
            }
            for i_ic in 0..ic_block_step {
                let i_off = (i_iw - pad_l as i32) * ic_block + i_ic as i32;
                asm.vbroadcastss(
                    Ymm(regs::bw_src_bcast_reg(kw, ic_block_step)),
                    Mem::new(REG_INPUT, F32 * i_off),
                );
                asm.vfmadd231ps(
                    Ymm(regs::bw_acc_reg(i_kw, i_ic, ic_block_step)),
                    Ymm(regs::bw_ddst_reg(kw, ic_block_step)),
                    Ymm(regs::bw_src_bcast_reg(kw, ic_block_step)),
                );
            }
        }
    }

    for i_kw in 0..kw {
        for i_ic in 0..ic_block_step {
            let off = (i_kw as i32 * ic_block + i_ic as i32) * oc_block;
            asm.vmovups_store(
                Mem::new(REG_KERNEL, F32 * off),
                Ymm(regs::bw_acc_reg(i_kw, i_ic, ic_block_step)),
            );
        }
    }
}

/// Undo one K_H row's pointer advance after `compute_ic_block_step` has
/// walked the whole width: `reg_input`/`reg_kernel` return to where they
/// stood before the row, so the caller's per-row advance (one input row,
/// one kernel row) lands them at the next row's start.
fn oh_step_comeback_pointers(asm: &mut Assembler, conf: &ConvConf) {
    asm.mov_reg(KJ, REG_KH);
    let top = asm.buffer().new_label();
    asm.buffer().bind_label(top);
    asm.sub_imm(REG_INPUT, F32 * conf.iw as i32 * conf.ic_block as i32);
    asm.sub_imm(REG_KERNEL, F32 * conf.kw as i32 * conf.ic_block as i32 * conf.oc_block as i32);
    asm.dec(KJ);
    asm.cmp_imm(KJ, 0);
    asm.jcc(Cond::G, top);
}

fn compute_oh_step_unroll_ow(asm: &mut Assembler, conf: &ConvConf, ic_block_step: usize) {
    let ic_block = conf.ic_block;
    let oc_block = conf.oc_block as i32;
    let r_pad = ((conf.ow as i32 - 1) * conf.stride_w as i32 + conf.kw as i32
        - conf.iw as i32
        - conf.l_pad as i32)
        .max(0) as usize;

    asm.mov_reg(KJ, REG_KH);
    let kh_top = asm.buffer().new_label();
    asm.buffer().bind_label(kh_top);
    {
        asm.xor_self(B_IC);
        let ic_top = asm.buffer().new_label();
        asm.buffer().bind_label(ic_top);
        {
            compute_ic_block_step(asm, conf, conf.ow, conf.l_pad, r_pad, ic_block_step);
            asm.add_imm(REG_INPUT, F32 * ic_block_step as i32);
            asm.add_imm(REG_KERNEL, F32 * ic_block_step as i32 * oc_block);
            asm.add_imm(B_IC, ic_block_step as i32);
            asm.cmp_imm(B_IC, ic_block as i32);
            asm.jcc(Cond::L, ic_top);
        }
        asm.add_imm(REG_INPUT, F32 * (conf.iw as i32 - 1) * ic_block as i32);
        asm.add_imm(REG_KERNEL, F32 * (conf.kw as i32 - 1) * ic_block as i32 * oc_block);
        asm.dec(KJ);
        asm.cmp_imm(KJ, 0);
        asm.jcc(Cond::G, kh_top);
    }
    oh_step_comeback_pointers(asm, conf);
}

fn compute_oh_step_common(asm: &mut Assembler, conf: &ConvConf, ic_block_step: usize, max_ur_w: usize) {
    let ic_block = conf.ic_block;
    let oc_block = conf.oc_block as i32;
    let stride_w = conf.stride_w;
    let r_pad = ((conf.ow as i32 - 1) * stride_w as i32 + conf.kw as i32
        - conf.iw as i32
        - conf.l_pad as i32)
        .max(0) as usize;

    let mut ur_w = conf.ow.min(max_ur_w);
    let mut ur_w_trips = conf.ow / ur_w;
    let mut ur_w_tail = conf.ow % ur_w;
    if (ur_w_tail == 0 && r_pad != 0) || r_pad >= ur_w_tail {
        if ur_w_trips > 1 {
            ur_w_tail += ur_w;
            ur_w_trips -= 1;
        } else {
            ur_w_tail += ur_w - ur_w / 2;
            ur_w /= 2;
        }
    }
    let input_comeback = (ur_w_trips as i32 * ur_w as i32 * stride_w as i32 - conf.l_pad as i32)
        * ic_block as i32;
    let output_comeback = ur_w_trips as i32 * ur_w as i32 * oc_block;

    asm.mov_reg(KJ, REG_KH);
    let kh_top = asm.buffer().new_label();
    asm.buffer().bind_label(kh_top);
    {
        asm.xor_self(B_IC);
        let ic_top = asm.buffer().new_label();
        asm.buffer().bind_label(ic_top);
        {
            let mut trips_left = ur_w_trips;
            if conf.l_pad != 0 {
                trips_left -= 1;
                compute_ic_block_step(asm, conf, ur_w, conf.l_pad, 0, ic_block_step);
                asm.add_imm(
                    REG_INPUT,
                    F32 * (ur_w as i32 * stride_w as i32 - conf.l_pad as i32) * ic_block as i32,
                );
                asm.add_imm(REG_OUTPUT, F32 * ur_w as i32 * oc_block);
            }

            if trips_left > 0 {
                asm.xor_self(REG_UR_W_TRIPS);
                let ow_top = asm.buffer().new_label();
                asm.buffer().bind_label(ow_top);
                {
                    compute_ic_block_step(asm, conf, ur_w, 0, 0, ic_block_step);
                    asm.add_imm(REG_INPUT, F32 * ur_w as i32 * stride_w as i32 * ic_block as i32);
                    asm.add_imm(REG_OUTPUT, F32 * ur_w as i32 * oc_block);

                    asm.inc(REG_UR_W_TRIPS);
                    asm.cmp_imm(REG_UR_W_TRIPS, trips_left as i32);
                    asm.jcc(Cond::L, ow_top);
                }
            }

            if ur_w_tail > 0 {
                compute_ic_block_step(asm, conf, ur_w_tail, 0, r_pad, ic_block_step);
            }

            asm.sub_imm(REG_INPUT, F32 * input_comeback);
            asm.sub_imm(REG_OUTPUT, F32 * output_comeback);

            asm.add_imm(REG_INPUT, F32 * ic_block_step as i32);
            asm.add_imm(REG_KERNEL, F32 * ic_block_step as i32 * oc_block);

            asm.add_imm(B_IC, ic_block_step as i32);
            asm.cmp_imm(B_IC, conf.ic_block as i32);
            asm.jcc(Cond::L, ic_top);
        }
        asm.add_imm(REG_INPUT, F32 * (conf.iw as i32 - 1) * ic_block as i32);
        asm.add_imm(REG_KERNEL, F32 * (conf.kw as i32 - 1) * ic_block as i32 * oc_block);
        asm.dec(KJ);
        asm.cmp_imm(KJ, 0);
        asm.jcc(Cond::G, kh_top);
    }
    oh_step_comeback_pointers(asm, conf);
}

/// One O_H row's worth of `compute_ic_block_step` calls, choosing the
/// unrolled or common path by row width (matches `compute_oh_step_disp`).
fn compute_oh_step_disp(asm: &mut Assembler, conf: &ConvConf) {
    let ic_block_step = conf.ic_block_step;
    let max_ur_w = conf.max_ur_w;
    if conf.ow <= max_ur_w {
        trace!("compute_oh_step_disp: ow={} <= max_ur_w={}, unrolled row", conf.ow, max_ur_w);
        compute_oh_step_unroll_ow(asm, conf, ic_block_step);
    } else {
        trace!("compute_oh_step_disp: ow={} > max_ur_w={}, tiled row", conf.ow, max_ur_w);
        compute_oh_step_common(asm, conf, ic_block_step, max_ur_w);
    }
}

pub fn generate(asm: &mut Assembler, conf: &ConvConf) {
    load_arg(asm, REG_INPUT, args::offsets::SRC);
    load_arg(asm, REG_OUTPUT, args::offsets::DST);
    load_arg(asm, REG_KERNEL, args::offsets::FILT);

    let icoc_block = (conf.ic_block * conf.oc_block) as i32;
    let t_pad = conf.t_pad;
    let stride_h = conf.stride_h as i32;
    let b_pad = ((conf.oh as i32 - 1) * stride_h + conf.kh as i32 - conf.ih as i32 - t_pad as i32)
        .max(0);

    asm.mov_imm(REG_KH, conf.kh as i32);
    asm.xor_self(REG_IH_COUNT);
    asm.xor_self(REG_OJ);

    if t_pad > 0 {
        asm.mov_imm(REG_KH, conf.kh as i32 - t_pad as i32);
        asm.add_imm(REG_KERNEL, F32 * t_pad as i32 * conf.kw as i32 * icoc_block);

        let tpad_top = asm.buffer().new_label();
        asm.buffer().bind_label(tpad_top);
        compute_oh_step_disp(asm, conf);
        asm.add_imm(REG_OUTPUT, F32 * conf.ow as i32 * conf.oc_block as i32);
        asm.sub_imm(REG_KERNEL, F32 * stride_h * conf.kw as i32 * icoc_block);

        asm.inc(REG_OJ);
        asm.add_imm(REG_IH_COUNT, stride_h);

        asm.add_imm(REG_KH, stride_h);
        asm.cmp_imm(REG_KH, conf.kh as i32);
        asm.jcc(Cond::L, tpad_top);

        if t_pad % conf.stride_h != 0 {
            let inp_corr = conf.stride_h as i32 - t_pad as i32 % conf.stride_h as i32;
            asm.add_imm(REG_KERNEL, F32 * inp_corr * conf.kw as i32 * icoc_block);
            asm.add_imm(REG_INPUT, F32 * inp_corr * conf.iw as i32 * conf.ic_block as i32);
        }
    }

    let oh_end = asm.buffer().new_label();
    asm.cmp_imm(REG_IH_COUNT, conf.ih as i32 + t_pad as i32 - conf.kh as i32 + 1);
    asm.jcc(Cond::Ge, oh_end);
    let skip_main = asm.buffer().new_label();
    asm.cmp_imm(REG_OJ, conf.oh as i32);
    asm.jcc(Cond::Ge, skip_main);

    asm.mov_imm(REG_KH, conf.kh as i32);
    let oh_top = asm.buffer().new_label();
    asm.buffer().bind_label(oh_top);
    {
        compute_oh_step_disp(asm, conf);
        asm.add_imm(REG_INPUT, F32 * stride_h * conf.iw as i32 * conf.ic_block as i32);
        asm.add_imm(REG_OUTPUT, F32 * conf.ow as i32 * conf.oc_block as i32);

        asm.inc(REG_OJ);
        asm.add_imm(REG_IH_COUNT, stride_h);

        asm.cmp_imm(REG_IH_COUNT, conf.ih as i32 + t_pad as i32 - conf.kh as i32 + 1);
        asm.jcc(Cond::Ge, oh_end);

        asm.cmp_imm(REG_OJ, conf.oh as i32);
        asm.jcc(Cond::L, oh_top);
    }
    asm.buffer().bind_label(oh_end);
    asm.buffer().bind_label(skip_main);

    if b_pad > 0 {
        let bpad_end = asm.buffer().new_label();
        asm.cmp_imm(REG_OJ, conf.oh as i32);
        asm.jcc(Cond::Ge, bpad_end);

        asm.mov_imm(REG_KH, conf.ih as i32 + t_pad as i32);
        asm.sub_reg(REG_KH, REG_IH_COUNT);
        let bpad_top = asm.buffer().new_label();
        asm.buffer().bind_label(bpad_top);
        {
            compute_oh_step_disp(asm, conf);
            asm.add_imm(REG_INPUT, F32 * stride_h * conf.iw as i32 * conf.ic_block as i32);
            asm.add_imm(REG_OUTPUT, F32 * conf.ow as i32 * conf.oc_block as i32);

            asm.sub_imm(REG_KH, stride_h);
            asm.cmp_imm(REG_KH, 0);
            asm.jcc(Cond::Le, bpad_end);

            asm.inc(REG_OJ);
            asm.cmp_imm(REG_OJ, conf.oh as i32);
            asm.jcc(Cond::L, bpad_top);
        }
        asm.buffer().bind_label(bpad_end);
    }
}
