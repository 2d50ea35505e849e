use std::fmt;

use serde::{Deserialize, Serialize};

use crate::identity::VmIdentity;

/// The phase a migration was in when something happened.
///
/// Transitions are strictly forward; a failed phase is never retried in
/// place. The phase travels inside [`MigrationOutcome::Failed`] so the
/// caller can see exactly where the run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum MigrationPhase {
    Preflight,
    Shutdown,
    Disarm,
    Export,
    Compare,
    Resolve,
    Import,
    Move,
    Restore,
    Cleanup,
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Preflight => "preflight",
            Self::Shutdown => "shutdown",
            Self::Disarm => "disarm",
            Self::Export => "export",
            Self::Compare => "compare",
            Self::Resolve => "resolve",
            Self::Import => "import",
            Self::Move => "move",
            Self::Restore => "restore",
            Self::Cleanup => "cleanup",
        };
        f.write_str(name)
    }
}

/// The result of one migration attempt.
///
/// Drives which host the rollback/restore manager treats as authoritative:
/// the destination after [`MigrationOutcome::Moved`], the source after
/// [`MigrationOutcome::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationOutcome {
    /// The VM is realized on the destination.
    Moved {
        /// The identity as it now exists on the destination.
        new_vm: VmIdentity,
    },
    /// The run stopped at `phase`; the source remains authoritative.
    Failed {
        phase: MigrationPhase,
        reason: String,
    },
}

impl MigrationOutcome {
    /// Returns `true` if the destination is authoritative.
    #[must_use]
    pub fn is_moved(&self) -> bool {
        matches!(self, Self::Moved { .. })
    }

    /// A `Failed` outcome from a phase and any displayable reason.
    pub fn failed(phase: MigrationPhase, reason: impl fmt::Display) -> Self {
        Self::Failed { phase, reason: reason.to_string() }
    }
}
