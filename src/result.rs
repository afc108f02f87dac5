//! Error types returned while planning a convolution kernel.
//!
//! Emission itself has no recoverable error surface (see §7 of the design
//! notes): an invariant violation discovered while emitting code for a
//! `ConvConf` that already passed planning is a contract bug, not a
//! reportable error, and is raised as a Rust assertion instead of a `Result`.

use failure::Fail;

/// Result of [`plan`](crate::conf::plan).
///
/// There is no partial configuration and no distinction between "bad shape"
/// and "bad format" outcomes: any input that fails an invariant is rejected
/// wholesale, matching the single `Unimplemented` status the surrounding
/// library exposes to its callers.
pub type PlanResult<T> = Result<T, Unimplemented>;

/// A convolution problem that does not fit the template this crate
/// generates code for.
///
/// This is an ordinary, expected outcome of planning, not a bug: the caller
/// is expected to fall back to a reference implementation when it sees this
/// error. `reason` is a short, static, human-readable note identifying which
/// invariant failed, useful for logging why a particular shape fell back.
#[derive(Debug, Fail, Clone, Copy, PartialEq, Eq)]
#[fail(display = "convolution problem unimplemented by this kernel template: {}", reason)]
pub struct Unimplemented {
    reason: &'static str,
}

impl Unimplemented {
    pub(crate) fn new(reason: &'static str) -> Self {
        Self { reason }
    }

    /// The invariant that made the problem fall outside the template.
    pub fn reason(&self) -> &'static str {
        self.reason
    }
}

/// Shorthand for `Err(Unimplemented::new(reason))`, used throughout the
/// planner to keep each rejection to one line.
pub(crate) fn unimplemented<T>(reason: &'static str) -> PlanResult<T> {
    Err(Unimplemented::new(reason))
}
