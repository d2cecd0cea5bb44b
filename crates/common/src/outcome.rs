//! Explicit outcome of an idempotent step.

use std::fmt;

/// Result of a step that may find its work already done.
///
/// Failures are carried by the surrounding `Result`; this type only
/// distinguishes "changed something" from "nothing to change".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    /// The step performed its action
    Done,
    /// The desired state already held; nothing was changed
    AlreadyDone,
}

impl StepOutcome {
    /// Whether the step changed anything
    pub fn changed(self) -> bool {
        matches!(self, Self::Done)
    }
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Done => f.write_str("done"),
            Self::AlreadyDone => f.write_str("already done"),
        }
    }
}
