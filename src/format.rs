//! Memory-format tags recognised by the planner.
//!
//! These are opaque names as far as this crate is concerned: the
//! out-of-scope tensor descriptor library is the authority on the actual
//! strides each tag implies. We only need to tell the formats apart and
//! know which ones are "blocked" (`nChw8c`-style, channel-innermost-8)
//! versus "flat".

use core::fmt;
use core::str;

/// Layout tag for an activation tensor (source or destination).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ActivationFormat {
    /// Plane-major: `N C H W`, channels outermost.
    Nchw,
    /// Channel-minor flat: `N H W C`.
    Nhwc,
    /// Blocked: `N C/8 H W 8c`, 8 channels innermost.
    NChw8c,
}

impl ActivationFormat {
    /// Blocked formats carry the channel-block factor in the layout itself;
    /// flat formats don't and require `ic_block` to be picked by the
    /// planner from the raw channel count instead.
    pub fn is_blocked(self) -> bool {
        self == ActivationFormat::NChw8c
    }
}

impl fmt::Display for ActivationFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            ActivationFormat::Nchw => "nchw",
            ActivationFormat::Nhwc => "nhwc",
            ActivationFormat::NChw8c => "nChw8c",
        })
    }
}

impl str::FromStr for ActivationFormat {
    type Err = ();
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nchw" => Ok(ActivationFormat::Nchw),
            "nhwc" => Ok(ActivationFormat::Nhwc),
            "nChw8c" => Ok(ActivationFormat::NChw8c),
            _ => Err(()),
        }
    }
}

/// Layout tag for a weights (filter) tensor.
///
/// The `G`-prefixed variants are the grouped-convolution counterparts of
/// the non-grouped tag with the same suffix; `with_groups` on
/// [`crate::desc::WeightsDesc`] says which family applies; mixing the two
/// (e.g. grouped dims with a non-grouped tag) is rejected by the planner.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WeightsFormat {
    /// `O I/8 h w 8i 8o`: used by the forward kernel's blocked (non-flat) path.
    OIhw8i8o,
    /// `O I/8 h w 8o 8i`: used by the backward-data kernel.
    OIhw8o8i,
    /// Grouped counterpart of [`OIhw8i8o`](Self::OIhw8i8o).
    GOIhw8i8o,
    /// Grouped counterpart of [`OIhw8o8i`](Self::OIhw8o8i).
    GOIhw8o8i,
    /// `O h w 8o`: used by the forward kernel's flat (`ic == 3`) path.
    Ohwi8o,
}

impl WeightsFormat {
    /// Is this one of the grouped-convolution tags?
    pub fn is_grouped(self) -> bool {
        matches!(
            self,
            WeightsFormat::GOIhw8i8o | WeightsFormat::GOIhw8o8i
        )
    }
}

impl fmt::Display for WeightsFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            WeightsFormat::OIhw8i8o => "OIhw8i8o",
            WeightsFormat::OIhw8o8i => "OIhw8o8i",
            WeightsFormat::GOIhw8i8o => "gOIhw8i8o",
            WeightsFormat::GOIhw8o8i => "gOIhw8o8i",
            WeightsFormat::Ohwi8o => "Ohwi8o",
        })
    }
}
