//! The x86-64/AVX2/FMA backend: the only target this crate emits for
//! (see the `x64` Cargo feature).

pub mod asm;
pub mod reg;
