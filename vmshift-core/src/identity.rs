use std::fmt;

use serde::{Deserialize, Serialize};

use crate::id::{HostName, VmId};

/// The immutable identity of the VM being migrated.
///
/// Constructed once when a migration begins and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct VmIdentity {
    /// Cluster-unique identifier; the sole cross-host correlation key.
    pub id: VmId,
    /// Display name. May collide across clusters.
    pub name: String,
    /// The host that held the realized copy when migration began.
    pub source_host: HostName,
}

impl VmIdentity {
    /// Creates a new identity.
    pub fn new(id: VmId, name: impl Into<String>, source_host: HostName) -> Self {
        Self { id, name: name.into(), source_host }
    }
}

impl fmt::Display for VmIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.id)
    }
}

/// Runtime state of a VM as reported by the hypervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum VmState {
    Running,
    Off,
    Saved,
    Paused,
}

impl VmState {
    /// Returns `true` for states that require a stop before an offline
    /// export can produce a point-in-time-consistent copy.
    #[must_use]
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running | Self::Paused)
    }
}

/// Whether a VM representation on a host is fully materialized or a
/// transient import target.
///
/// A planned copy may coexist with the realized copy mid-import, but must
/// resolve to realized-or-removed before a migration is complete. Both
/// representations must independently disappear after removal; a stale
/// planned entry can linger after the realized one is gone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum Realization {
    /// Fully materialized and schedulable on the host.
    Realized,
    /// Mid-import target; can be abandoned without affecting the source.
    Planned,
}

/// The hypervisor's automatic-start policy for a VM.
///
/// Disarmed (set to [`StartAction::Nothing`]) before an offline export so
/// the hypervisor cannot auto-start a half-migrated VM, and restored by
/// the rollback/restore manager on whichever host ends up authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StartAction {
    Nothing,
    StartIfRunning,
    Start,
}
