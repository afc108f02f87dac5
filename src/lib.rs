//! A JIT machine-code generator for 2-D single-precision AVX2/FMA
//! convolution kernels.
//!
//! Given a convolution problem description, [`conf::plan`] either rejects
//! it outright (unsupported shape, layout, or blocking; see
//! [`result::Unimplemented`]) or produces an immutable [`conf::ConvConf`];
//! [`emit::emit`] turns a `ConvConf` into a sealed [`buffer::CodeBlob`] of
//! position-independent machine code, callable with one argument: a
//! pointer to [`args::CallArgs`].
//!
//! This crate does not allocate executable memory, flush the instruction
//! cache, or invoke the generated code: mapping a `CodeBlob` into a
//! callable function pointer is the embedder's job.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]
#![cfg_attr(feature = "std", deny(unstable_features))]
#![no_std]

#[cfg(not(feature = "std"))]
#[macro_use]
extern crate alloc as std;
#[cfg(feature = "std")]
#[macro_use]
extern crate std;

pub mod args;
pub mod buffer;
pub mod conf;
pub mod desc;
#[cfg(feature = "x64")]
pub mod emit;
pub mod format;
#[cfg(feature = "x64")]
pub mod isa;
pub mod regs;
pub mod result;

pub use crate::args::CallArgs;
pub use crate::buffer::CodeBlob;
pub use crate::conf::{ConvConf, Direction};
pub use crate::result::{PlanResult, Unimplemented};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
