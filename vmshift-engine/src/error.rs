//! Error taxonomy for the migration engine.
//!
//! Absence is data, not an error: lookups return `Result<Option<T>, _>` and
//! only genuine faults (connectivity, permission, parse) surface here.

use std::path::PathBuf;
use std::time::Duration;

use vmshift_core::{CoreError, HostName};

/// Errors that can occur while preparing or executing a migration.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum EngineError {
    /// A session to a required host could not be established. Always fatal
    /// for that host and never retried silently: a flaky session would mask
    /// genuine divergence between the two hosts' views of the VM.
    #[error("cannot establish a session to {host}: {reason}")]
    Connectivity { host: HostName, reason: String },

    /// The VM to migrate is not enumerable on its source host.
    #[error("VM '{vm}' not found on {host}")]
    VmNotFound { vm: String, host: HostName },

    /// The VM has an active point-in-time snapshot; exported or imported
    /// copies would diverge from the checkpoint chain.
    #[error("VM '{vm}' has {count} active snapshot(s); relocation is unsafe")]
    SnapshotPresent { vm: String, count: u32 },

    /// The VM already exists (planned or realized) on a destination
    /// candidate host. Presence on more than one host is the single worst
    /// failure mode this engine must prevent.
    #[error("VM '{vm}' is already present on {host}")]
    AlreadyPresent { vm: String, host: HostName },

    /// The destination storage path does not land on any shared volume of
    /// the destination cluster.
    #[error("path '{}' is not on a shared volume of cluster '{cluster}'", path.display())]
    NotOnSharedVolume { path: PathBuf, cluster: String },

    /// The shared volume backing the destination path is owned by another
    /// node. The volume must be moved first; this is surfaced rather than
    /// silently worked around.
    #[error(
        "shared volume '{}' is owned by node {owner}; move it to {wanted} before migrating",
        path.display()
    )]
    VolumeOwnedElsewhere { path: PathBuf, owner: HostName, wanted: HostName },

    /// The compatibility resolver exhausted its rules.
    #[error("unresolved incompatibilities: {}", reasons.join("; "))]
    Unresolved { reasons: Vec<String> },

    /// The caller's approval policy declined stopping a running VM.
    #[error("stop of running VM '{vm}' was declined")]
    StopDeclined { vm: String },

    /// A remote command completed with a failure status.
    #[error("remote command on {host} failed: {detail}")]
    Remote { host: HostName, detail: String },

    /// A convergence check exceeded its retry budget before the engine had
    /// mutated anything worth rolling back.
    #[error("'{what}' did not converge within {attempts} attempts")]
    Convergence { what: String, attempts: u32 },

    /// The caller's wall-clock budget for the whole migration expired.
    /// Platform primitives are not cancellable once started, so remote
    /// state may still be changing and needs review.
    #[error("migration exceeded its {budget:?} wall-clock budget")]
    DeadlineExceeded { budget: Duration },

    /// Plan-level validation failure.
    #[error(transparent)]
    Plan(#[from] CoreError),

    /// Remote command output could not be parsed.
    #[error("malformed remote output: {0}")]
    Parse(#[from] serde_json::Error),

    /// Underlying I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
