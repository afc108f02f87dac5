//! Instruction-set backends.
//!
//! Upstream keeps one `isa/` submodule per target architecture behind a
//! registry (`isa::lookup`) and a `TargetIsa` trait whose `triple()`
//! accessor tells a caller which `target_lexicon::Triple` a given backend
//! was built for; this crate has exactly one target, so there is no
//! registry and no trait object to speak of; `emit` reaches into
//! `isa::x64` directly. The module boundary is kept anyway so a second
//! target (e.g. AVX-512) would slot in as a sibling of `x64` without
//! disturbing `emit`'s call sites, and [`triple`] keeps the one-target
//! assumption an explicit, checkable fact rather than an implicit one.

use core::str::FromStr;
use target_lexicon::Triple;

#[cfg(feature = "x64")]
pub mod x64;

/// The single target this crate's emitter is written for: 64-bit x86,
/// System V calling convention, AVX2+FMA required. Embedders that want to
/// guard at runtime against running on an unsupported host can compare
/// this against `target_lexicon::HOST`.
pub fn triple() -> Triple {
    Triple::from_str("x86_64-unknown-unknown").expect("static target triple always parses")
}
