//! Forward kernel emission, grounded on
//! `jit_avx2_conv_fwd_kernel_f32::{oh_step_unroll_kw, oh_step_nopad,
//! width_blk_step, generate}`.
//!
//! Register roles (upstream leaves these as `Xbyak::Reg64` class members;
//! picked here since the header that named them wasn't part of the
//! retrieved source):
//!
//! | role | register |
//! |---|---|
//! | `reg_input` | r8 |
//! | `reg_output` | r9 |
//! | `reg_kernel` | r10 |
//! | `reg_bias` | r11 |
//! | `reg_kh` | rax |
//! | `reg_ci_flag` | rcx |
//! | `aux_reg_input` | rdx |
//! | `aux_reg_kernel` | rbx |
//! | `kj` (K_H trip counter) | rsi |
//! | `oi_iter` (O_W tile counter) | r12 |
//! | `ki_iter` (K_W trip counter, no-pad fast path only) | r13 |

use crate::args::{self, IC_FLAG_FIRST, IC_FLAG_LAST};
use crate::conf::ConvConf;
use crate::format::ActivationFormat;
use crate::isa::x64::asm::{Assembler, Cond, Mem};
use crate::isa::x64::reg::*;
use crate::regs;
use crate::emit::{load_arg, F32};
use log::trace;

const REG_INPUT: Gpr = R8;
const REG_OUTPUT: Gpr = R9;
const REG_KERNEL: Gpr = R10;
const REG_BIAS: Gpr = R11;
const REG_KH: Gpr = RAX;
const REG_CI_FLAG: Gpr = RCX;
const AUX_REG_INPUT: Gpr = RDX;
const AUX_REG_KERNEL: Gpr = RBX;
const KJ: Gpr = RSI;
const OI_ITER: Gpr = R12;
const KI_ITER: Gpr = R13;

/// One K_W-unrolled pass over a K_H row: every `ki` handled as a distinct
/// static code path, with per-`ki` overlap trimming on both edges. Used
/// whenever a narrow kernel or padded tile makes the no-pad fast path
/// (`oh_step_nopad`) unsafe.
fn oh_step_unroll_kw(asm: &mut Assembler, conf: &ConvConf, ur_w: usize, pad_l: usize, pad_r: usize) {
    let iw = conf.iw as i32;
    let ih = conf.ih as i32;
    let kw = conf.kw;
    let kh = conf.kh as i32;
    let nb_ic = conf.nb_ic as i32;
    let stride_w = conf.stride_w;
    let nb_oc_block = conf.nb_oc_blocking;
    let ic_blk = conf.ic_block as i32;
    let oc_blk = conf.oc_block as i32;

    for ki in 0..kw {
        let jj_start = (pad_l as isize - ki as isize + stride_w as isize - 1)
            .div_euclid(stride_w as isize)
            .max(0) as usize;
        let jj_end = ur_w
            - (((ki + pad_r) as isize - (kw - 1) as isize + stride_w as isize - 1)
                .div_euclid(stride_w as isize)
                .max(0) as usize);
        for ifm2 in 0..conf.ic_block {
            for jj in jj_start..jj_end {
                let inp_off = if conf.src_fmt == ActivationFormat::Nchw {
                    ifm2 as i32 * ih * iw + (ki as i32 + jj as i32 * stride_w as i32 - pad_l as i32)
                } else {
                    (ki as i32 + jj as i32 * stride_w as i32 - pad_l as i32) * ic_blk + ifm2 as i32
                };
                asm.vbroadcastss(
                    Ymm(regs::bcast_reg(jj, nb_oc_block, ur_w)),
                    Mem::new(AUX_REG_INPUT, F32 * inp_off),
                );
            }
            for ii in 0..nb_oc_block {
                let ker_off = ii as i32 * nb_ic * kh * kw as i32 * ic_blk * oc_blk
                    + ki as i32 * ic_blk * oc_blk
                    + ifm2 as i32 * oc_blk;
                asm.vmovups_load(Ymm(regs::scratch_reg()), Mem::new(AUX_REG_KERNEL, F32 * ker_off));
                for jj in jj_start..jj_end {
                    asm.vfmadd231ps(
                        Ymm(regs::acc_reg(ii, jj, ur_w)),
                        Ymm(regs::bcast_reg(jj, nb_oc_block, ur_w)),
                        Ymm(regs::scratch_reg()),
                    );
                }
            }
        }
    }
}

/// The no-overlap-trimming fast path, valid only when `kw >= 5` and
/// neither tile edge touches padding: every `ki` is identical, so it is a
/// runtime loop over `ki_iter` instead of `kw` unrolled copies.
fn oh_step_nopad(asm: &mut Assembler, conf: &ConvConf, ur_w: usize) {
    let iw = conf.iw as i32;
    let ih = conf.ih as i32;
    let kw = conf.kw as i32;
    let nb_ic = conf.nb_ic as i32;
    let stride_w = conf.stride_w as i32;
    let nb_oc_block = conf.nb_oc_blocking;
    let ic_blk = conf.ic_block as i32;
    let oc_blk = conf.oc_block as i32;
    let inp_mult = if conf.src_fmt == ActivationFormat::Nchw { 1 } else { ic_blk };

    asm.xor_self(KI_ITER);
    let top = asm.buffer().new_label();
    asm.buffer().bind_label(top);
    for ifm2 in 0..conf.ic_block {
        for jj in 0..ur_w {
            let inp_off = if conf.src_fmt == ActivationFormat::Nchw {
                ifm2 as i32 * ih * iw + jj as i32 * stride_w
            } else {
                jj as i32 * stride_w * ic_blk + ifm2 as i32
            };
            asm.vbroadcastss(
                Ymm(regs::bcast_reg(jj, nb_oc_block, ur_w)),
                Mem::new(AUX_REG_INPUT, F32 * inp_off),
            );
        }
        for ii in 0..nb_oc_block {
            let aux_off = ii as i32 * nb_ic * conf.kh as i32 * kw * ic_blk * oc_blk
                + ifm2 as i32 * oc_blk;
            asm.vmovups_load(Ymm(regs::scratch_reg()), Mem::new(AUX_REG_KERNEL, F32 * aux_off));
            for jj in 0..ur_w {
                asm.vfmadd231ps(
                    Ymm(regs::acc_reg(ii, jj, ur_w)),
                    Ymm(regs::bcast_reg(jj, nb_oc_block, ur_w)),
                    Ymm(regs::scratch_reg()),
                );
            }
        }
    }
    asm.add_imm(AUX_REG_KERNEL, F32 * oc_blk * ic_blk);
    asm.add_imm(AUX_REG_INPUT, F32 * inp_mult);

    asm.inc(KI_ITER);
    asm.cmp_imm(KI_ITER, kw);
    asm.jcc(Cond::L, top);
}

/// Zero/load the accumulator tile, run the K_H reduction loop, and store
/// (optionally through a ReLU). One `pad_label`-suffixed block in upstream
/// becomes one private set of [`Label`](crate::buffer::Label)s here.
fn width_blk_step(asm: &mut Assembler, conf: &ConvConf, ur_w: usize, pad_l: usize, pad_r: usize) {
    trace!("width_blk_step: ur_w={} pad_l={} pad_r={}", ur_w, pad_l, pad_r);
    let oh = conf.oh as i32;
    let ow = conf.ow as i32;
    let nb_oc_block = conf.nb_oc_blocking;
    let oc_blk = conf.oc_block as i32;
    let inp_mult = if conf.src_fmt == ActivationFormat::Nchw { 1 } else { conf.ic_block as i32 };

    let init_first = asm.buffer().new_label();
    let init_done = asm.buffer().new_label();

    asm.test_imm(REG_CI_FLAG, i32::from(IC_FLAG_FIRST));
    asm.jcc(Cond::Ne, init_first);
    for ii in 0..nb_oc_block {
        for jj in 0..ur_w {
            let o_off = (ii as i32 * oh * ow + jj as i32) * oc_blk;
            asm.vmovups_load(Ymm(regs::acc_reg(ii, jj, ur_w)), Mem::new(REG_OUTPUT, F32 * o_off));
        }
    }
    asm.jmp(init_done);

    asm.buffer().bind_label(init_first);
    if conf.with_bias {
        for ii in 0..nb_oc_block {
            for jj in 0..ur_w {
                asm.vmovups_load(
                    Ymm(regs::acc_reg(ii, jj, ur_w)),
                    Mem::new(REG_BIAS, F32 * ii as i32 * oc_blk),
                );
            }
        }
    } else {
        for ii in 0..nb_oc_block {
            for jj in 0..ur_w {
                let acc = Ymm(regs::acc_reg(ii, jj, ur_w));
                asm.vxorps(acc, acc, acc);
            }
        }
    }
    asm.buffer().bind_label(init_done);

    asm.mov_reg(AUX_REG_INPUT, REG_INPUT);
    asm.mov_reg(AUX_REG_KERNEL, REG_KERNEL);
    asm.mov_reg(KJ, REG_KH);

    let kh_top = asm.buffer().new_label();
    asm.buffer().bind_label(kh_top);
    {
        if conf.kw >= 5 && pad_l == 0 && pad_r == 0 {
            oh_step_nopad(asm, conf, ur_w);
            asm.sub_imm(AUX_REG_INPUT, F32 * conf.kw as i32 * inp_mult);
            asm.add_imm(AUX_REG_INPUT, F32 * conf.iw as i32 * inp_mult);
        } else {
            oh_step_unroll_kw(asm, conf, ur_w, pad_l, pad_r);
            asm.add_imm(AUX_REG_KERNEL, F32 * conf.kw as i32 * oc_blk * conf.ic_block as i32);
            asm.add_imm(AUX_REG_INPUT, F32 * conf.iw as i32 * inp_mult);
        }
        asm.dec(KJ);
        asm.cmp_imm(KJ, 0);
        asm.jcc(Cond::G, kh_top);
    }

    let done = asm.buffer().new_label();
    if conf.with_relu {
        regs::verify_tile_plan(nb_oc_block, ur_w, true);
        let regular_store = asm.buffer().new_label();
        asm.test_imm(REG_CI_FLAG, i32::from(IC_FLAG_LAST));
        asm.jcc(Cond::E, regular_store);

        let yzero = Ymm(regs::scratch_reg());
        let ymask = Ymm(regs::relu_mask_reg());
        asm.vxorps(yzero, yzero, yzero);
        for ii in 0..nb_oc_block {
            for jj in 0..ur_w {
                let o_off = (ii as i32 * oh * ow + jj as i32) * oc_blk;
                let reg_out = Ymm(regs::acc_reg(ii, jj, ur_w));
                asm.vcmpgtps(ymask, reg_out, yzero);
                asm.vblendvps(reg_out, yzero, reg_out, ymask);
                asm.vmovups_store(Mem::new(REG_OUTPUT, F32 * o_off), reg_out);
            }
        }
        asm.jmp(done);
        asm.buffer().bind_label(regular_store);
    } else {
        regs::verify_tile_plan(nb_oc_block, ur_w, false);
    }
    for ii in 0..nb_oc_block {
        for jj in 0..ur_w {
            let o_off = (ii as i32 * oh * ow + jj as i32) * oc_blk;
            asm.vmovups_store(Mem::new(REG_OUTPUT, F32 * o_off), Ymm(regs::acc_reg(ii, jj, ur_w)));
        }
    }
    asm.buffer().bind_label(done);
}

pub fn generate(asm: &mut Assembler, conf: &ConvConf) {
    load_arg(asm, REG_INPUT, args::offsets::SRC);
    load_arg(asm, REG_OUTPUT, args::offsets::DST);
    load_arg(asm, REG_KERNEL, args::offsets::FILT);
    if conf.with_bias {
        load_arg(asm, REG_BIAS, args::offsets::BIAS);
    }
    load_arg(asm, REG_KH, args::offsets::KH_PADDING);
    load_arg(asm, REG_CI_FLAG, args::offsets::IC_FLAG);

    let ur_w = conf.ur_w;
    let ur_w_tail = conf.ur_w_tail;
    let mut n_oi = (conf.ow / ur_w) as isize;
    let iw = conf.iw as i32;
    let kw = conf.kw as i32;
    let oc_blk = conf.oc_block as i32;
    let str_w = conf.stride_w as i32;
    let inp_mult = if conf.src_fmt == ActivationFormat::Nchw { 1 } else { conf.ic_block as i32 };
    let l_pad = conf.l_pad;

    let r_pad1 = (ur_w as i32 * n_oi as i32 - 1) * str_w + kw - 1 - (iw + l_pad as i32 - 1);
    if r_pad1 > 0 {
        n_oi -= 1;
    }

    if l_pad > 0 {
        n_oi -= 1;
        if n_oi < 0 && r_pad1 > 0 {
            width_blk_step(asm, conf, ur_w, l_pad, r_pad1 as usize);
        } else {
            width_blk_step(asm, conf, ur_w, l_pad, 0);
        }
        asm.add_imm(REG_INPUT, F32 * (ur_w as i32 * str_w - l_pad as i32) * inp_mult);
        asm.add_imm(REG_OUTPUT, F32 * ur_w as i32 * oc_blk);
    }

    asm.xor_self(OI_ITER);
    if n_oi > 0 {
        let ow_loop = asm.buffer().new_label();
        asm.buffer().bind_label(ow_loop);
        width_blk_step(asm, conf, ur_w, 0, 0);
        asm.add_imm(REG_INPUT, F32 * ur_w as i32 * str_w * inp_mult);
        asm.add_imm(REG_OUTPUT, F32 * ur_w as i32 * oc_blk);

        asm.inc(OI_ITER);
        asm.cmp_imm(OI_ITER, n_oi as i32);
        asm.jcc(Cond::L, ow_loop);
    }

    if r_pad1 > 0 && n_oi >= 0 {
        width_blk_step(asm, conf, ur_w, 0, r_pad1 as usize);
        asm.add_imm(REG_INPUT, F32 * ur_w as i32 * str_w * inp_mult);
        asm.add_imm(REG_OUTPUT, F32 * ur_w as i32 * oc_blk);
    }

    if ur_w_tail != 0 {
        let r_pad = ((conf.ow as i32 - 1) * str_w + kw - 1 - (iw + l_pad as i32 - 1)).max(0);
        width_blk_step(asm, conf, ur_w_tail, 0, r_pad as usize);
    }
}
