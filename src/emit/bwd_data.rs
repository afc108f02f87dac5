//! Backward-data kernel emission, grounded on
//! `jit_avx2_conv_bwd_data_kernel_f32::{hsw_iter_s1, generate}`.
//!
//! Register roles (see the note in `emit::fwd` on why these are assigned
//! here rather than copied from a header):
//!
//! | role | register |
//! |---|---|
//! | `reg_dsrc` | r8 |
//! | `reg_ddst` | r9 |
//! | `reg_kernel` | r10 |
//! | `reg_kh` | rax |
//! | `aux_reg_ddst` | rdx |
//! | `aux_reg_kernel` | rbx |
//! | `kj` (K_H trip counter) | rsi |
//! | `oi_iter` (O_W tile counter) | r12 |

use crate::args;
use crate::conf::ConvConf;
use crate::isa::x64::asm::{Assembler, Cond, Mem};
use crate::isa::x64::reg::*;
use crate::regs;
use crate::emit::{load_arg, F32};
use log::trace;

const REG_DSRC: Gpr = R8;
const REG_DDST: Gpr = R9;
const REG_KERNEL: Gpr = R10;
const REG_KH: Gpr = RAX;
const AUX_REG_DDST: Gpr = RDX;
const AUX_REG_KERNEL: Gpr = RBX;
const KJ: Gpr = RSI;
const OI_ITER: Gpr = R12;

/// One tile's full K_H/K_W reduction: load the d_src accumulators, walk
/// every kernel row against the corresponding d_dst row (skipping (ki, jj)
/// pairs that fall outside the tile per `l_overflow`/`r_overflow`), then
/// store. Matches `hsw_iter_s1` one-for-one; unlike upstream the `kh_label`
/// is a private [`Label`](crate::buffer::Label) rather than a caller-chosen
/// string, so each call site gets a fresh one automatically.
fn hsw_iter_s1(asm: &mut Assembler, conf: &ConvConf, ur_w: usize, l_overflow: usize, r_overflow: usize) {
    trace!(
        "hsw_iter_s1: ur_w={} l_overflow={} r_overflow={}",
        ur_w, l_overflow, r_overflow
    );
    let kw = conf.kw;
    let ih = conf.ih as i32;
    let iw = conf.iw as i32;
    let ow = conf.ow as i32;
    let ic_block = conf.ic_block as i32;
    let oc_block = conf.oc_block as i32;
    let nb_ic_block = conf.nb_ic_blocking;

    for ii in 0..nb_ic_block {
        for jj in 0..ur_w {
            let off = (ii as i32 * ih * iw + jj as i32) * ic_block;
            asm.vmovups_load(Ymm(regs::acc_reg(ii, jj, ur_w)), Mem::new(REG_DSRC, F32 * off));
        }
    }

    asm.mov_reg(AUX_REG_DDST, REG_DDST);
    asm.mov_reg(AUX_REG_KERNEL, REG_KERNEL);
    asm.mov_reg(KJ, REG_KH);

    let kh_top = asm.buffer().new_label();
    asm.buffer().bind_label(kh_top);
    for ki in 0..kw {
        let jj_start = (l_overflow as isize - (kw as isize - 1) + ki as isize).max(0) as usize;
        let jj_end = ur_w - (r_overflow as isize - ki as isize).max(0) as usize;
        for ofm2 in 0..conf.oc_block {
            for jj in jj_start..jj_end {
                let aux_output_offset =
                    (jj as i32 + conf.l_pad as i32 - ki as i32) * oc_block + ofm2 as i32;
                asm.vbroadcastss(
                    Ymm(regs::bcast_reg(jj, nb_ic_block, ur_w)),
                    Mem::new(AUX_REG_DDST, F32 * aux_output_offset),
                );
            }
            for ii in 0..nb_ic_block {
                let aux_kernel_offset = ii as i32 * conf.kh as i32 * kw as i32 * ic_block * oc_block
                    + ki as i32 * ic_block * oc_block
                    + ofm2 as i32 * ic_block;
                asm.vmovups_load(Ymm(regs::scratch_reg()), Mem::new(AUX_REG_KERNEL, F32 * aux_kernel_offset));
                for jj in jj_start..jj_end {
                    asm.vfmadd231ps(
                        Ymm(regs::acc_reg(ii, jj, ur_w)),
                        Ymm(regs::bcast_reg(jj, nb_ic_block, ur_w)),
                        Ymm(regs::scratch_reg()),
                    );
                }
            }
        }
    }
    asm.add_imm(AUX_REG_KERNEL, F32 * kw as i32 * oc_block * ic_block);
    asm.sub_imm(AUX_REG_DDST, F32 * ow * oc_block);

    asm.dec(KJ);
    asm.cmp_imm(KJ, 0);
    asm.jcc(Cond::G, kh_top);

    for ii in 0..nb_ic_block {
        for jj in 0..ur_w {
            let off = (ii as i32 * ih * iw + jj as i32) * ic_block;
            asm.vmovups_store(Mem::new(REG_DSRC, F32 * off), Ymm(regs::acc_reg(ii, jj, ur_w)));
        }
    }
}

pub fn generate(asm: &mut Assembler, conf: &ConvConf) {
    load_arg(asm, REG_DSRC, args::offsets::SRC);
    load_arg(asm, REG_DDST, args::offsets::DST);
    load_arg(asm, REG_KERNEL, args::offsets::FILT);
    load_arg(asm, REG_KH, args::offsets::KH_PADDING);

    let ur_w = conf.ur_w;
    let mut n_oi = (conf.iw / ur_w) as isize;
    asm.xor_self(OI_ITER);

    let l_overflow = (conf.kw as isize - 1 - conf.l_pad as isize).max(0) as usize;
    if l_overflow > 0 {
        hsw_iter_s1(asm, conf, ur_w, l_overflow, 0);
        asm.add_imm(REG_DSRC, F32 * ur_w as i32 * conf.ic_block as i32);
        asm.add_imm(REG_DDST, F32 * ur_w as i32 * conf.oc_block as i32);
        asm.inc(OI_ITER);
    }

    let r_pad = conf.iwp as isize - conf.iw as isize - conf.l_pad as isize;
    let r_overflow1 =
        (conf.kw as isize - 1 - (conf.iw as isize - ur_w as isize * n_oi) - r_pad).max(0) as usize;
    let r_overflow = (conf.kw as isize - 1 - r_pad).max(0) as usize;
    if r_overflow1 > 0 {
        n_oi -= 1;
    }

    if (l_overflow == 0 && n_oi > 0) || (l_overflow > 0 && n_oi > 1) {
        let ow_loop = asm.buffer().new_label();
        asm.buffer().bind_label(ow_loop);
        hsw_iter_s1(asm, conf, ur_w, 0, 0);
        asm.add_imm(REG_DSRC, F32 * ur_w as i32 * conf.ic_block as i32);
        asm.add_imm(REG_DDST, F32 * ur_w as i32 * conf.oc_block as i32);

        asm.inc(OI_ITER);
        asm.cmp_imm(OI_ITER, n_oi as i32);
        asm.jcc(Cond::L, ow_loop);
    }

    if r_overflow1 > 0 {
        hsw_iter_s1(asm, conf, ur_w, 0, r_overflow1);
        asm.add_imm(REG_DSRC, F32 * ur_w as i32 * conf.ic_block as i32);
        asm.add_imm(REG_DDST, F32 * ur_w as i32 * conf.oc_block as i32);
    }
    if conf.ur_w_tail != 0 {
        hsw_iter_s1(asm, conf, conf.ur_w_tail, 0, r_overflow);
    }
}
