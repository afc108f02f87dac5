//! Stand-ins for the out-of-scope tensor descriptor and convolution
//! descriptor library.
//!
//! The real system gets shape/stride/format queries from a memory-format
//! library that lives outside this crate (§1, §6). These plain structs are
//! the minimal surface the planner actually reads from that library:
//! dimensions and a format tag, nothing about physical strides. Whoever
//! embeds this crate is expected to adapt their own descriptor type to
//! these.

use crate::format::{ActivationFormat, WeightsFormat};

/// Shape and layout of an activation tensor (source or destination).
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ActivationDesc {
    /// Minibatch size.
    pub mb: usize,
    /// Total channel count (all groups combined).
    pub c: usize,
    /// Spatial height.
    pub h: usize,
    /// Spatial width.
    pub w: usize,
    /// Memory format.
    pub format: ActivationFormat,
}

/// Shape and layout of a weights (filter) tensor.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct WeightsDesc {
    /// Whether the leading group dimension is present.
    pub with_groups: bool,
    /// Number of groups (1 when `with_groups` is false).
    pub g: usize,
    /// Output channels per group.
    pub oc: usize,
    /// Input channels per group.
    pub ic: usize,
    /// Kernel height.
    pub kh: usize,
    /// Kernel width.
    pub kw: usize,
    /// Memory format.
    pub format: WeightsFormat,
}

/// Presence/absence of a bias (or diff-bias) tensor.
///
/// The real descriptor carries a format tag (`undef`, `any`, `x`); this
/// crate only needs to know whether a bias is supplied at all, so the tag
/// is collapsed to a `bool` at the boundary.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct BiasDesc {
    /// `false` when the bias format is `undef`.
    pub present: bool,
}

/// Zero top/left padding and unit stride, as a convenience constructor
/// argument for the common case.
pub const NO_PAD: Padding = Padding { t: 0, l: 0 };

/// Top/left zero-padding applied to the input before convolving.
///
/// Bottom/right padding are not independent inputs: they fall out of the
/// other dimensions (see [`crate::conf::ConvConf::r_pad`] and the
/// backward-weights `b_pad` computation in §4.4).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub struct Padding {
    /// Top padding, in input rows.
    pub t: usize,
    /// Left padding, in input columns.
    pub l: usize,
}

/// The convolution-wide parameters that aren't carried by a tensor
/// descriptor: padding and stride.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ConvDesc {
    /// Input-side zero padding.
    pub padding: Padding,
    /// Vertical stride.
    pub stride_h: usize,
    /// Horizontal stride.
    pub stride_w: usize,
    /// Bias tensor presence (forward pass only; ignored otherwise).
    pub bias: BiasDesc,
}

impl ConvDesc {
    /// A convenience constructor for the common unit-stride, no-bias case.
    pub fn new(padding: Padding, stride_h: usize, stride_w: usize) -> Self {
        Self {
            padding,
            stride_h,
            stride_w,
            bias: BiasDesc { present: false },
        }
    }

    /// Builder-style setter enabling the bias tensor.
    pub fn with_bias(mut self) -> Self {
        self.bias.present = true;
        self
    }
}

/// Epilogue options for the forward kernel: bias add and/or ReLU.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FwdOptions {
    /// Fold a ReLU into the last ic-block's store.
    pub with_relu: bool,
    /// Negative-slope coefficient; `0.0` is a plain ReLU.
    ///
    /// Retained on [`crate::conf::ConvConf`] for parity with the upstream
    /// `jcp.relu_negative_slope` field, but the emitter only implements the
    /// `0.0` case (see Non-goals in the design notes: graph-level fusion is
    /// limited to an optional plain ReLU).
    pub relu_negative_slope: f32,
}

impl Default for FwdOptions {
    fn default() -> Self {
        Self {
            with_relu: false,
            relu_negative_slope: 0.0,
        }
    }
}

impl FwdOptions {
    /// Enable a plain (zero negative-slope) ReLU epilogue.
    pub fn with_relu() -> Self {
        Self {
            with_relu: true,
            relu_negative_slope: 0.0,
        }
    }
}
