use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::id::HostName;
use crate::identity::VmIdentity;

/// How the VM's state crosses hosts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MigrationMode {
    /// Export at the source, import at the destination. The VM is stopped
    /// first if it is running.
    Offline,
    /// Single compare-and-move against the live VM, delegated to the
    /// hypervisor's live-move primitive.
    Online,
}

/// One virtual-disk relocation: where a disk lives on the source and where
/// it should land on the destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct VhdMapping {
    pub source: PathBuf,
    pub destination: PathBuf,
}

impl VhdMapping {
    /// Creates a mapping.
    pub fn new(source: impl Into<PathBuf>, destination: impl Into<PathBuf>) -> Self {
        Self { source: source.into(), destination: destination.into() }
    }
}

/// Everything a single migration needs, fixed before the first remote call.
///
/// Constructed once from caller input and host defaults; read-only
/// thereafter. Every value a remote operation needs is an explicit field
/// here, never an implicit outer-scope capture.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct MigrationPlan {
    /// The VM being migrated.
    pub vm: VmIdentity,
    /// Target host.
    pub destination_host: HostName,
    /// Root directory for the VM's files on the destination. `None` keeps
    /// the destination host's default storage location.
    pub destination_storage_path: Option<PathBuf>,
    /// Explicit virtual switch to rebind adapters to, if the caller has a
    /// preference. Checked against the destination before use.
    pub switch_name: Option<String>,
    /// Per-disk relocation targets. Empty means every disk follows
    /// `destination_storage_path`.
    pub vhd_mappings: Vec<VhdMapping>,
}

impl MigrationPlan {
    /// Creates a plan with host defaults for storage and switches.
    #[must_use]
    pub fn new(vm: VmIdentity, destination_host: HostName) -> Self {
        Self {
            vm,
            destination_host,
            destination_storage_path: None,
            switch_name: None,
            vhd_mappings: Vec::new(),
        }
    }

    /// Sets the destination storage root.
    #[must_use]
    pub fn with_storage_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.destination_storage_path = Some(path.into());
        self
    }

    /// Sets the preferred destination switch.
    #[must_use]
    pub fn with_switch(mut self, name: impl Into<String>) -> Self {
        self.switch_name = Some(name.into());
        self
    }

    /// Adds a per-disk relocation target.
    #[must_use]
    pub fn with_vhd_mapping(mut self, mapping: VhdMapping) -> Self {
        self.vhd_mappings.push(mapping);
        self
    }

    /// Validates invariants that do not need a remote call.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidPlan`] if source and destination are the
    /// same host, or two disks map to the same destination path.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.vm.source_host == self.destination_host {
            return Err(CoreError::InvalidPlan {
                reason: format!(
                    "source and destination are both '{}'",
                    self.destination_host
                ),
            });
        }
        for (i, a) in self.vhd_mappings.iter().enumerate() {
            for b in &self.vhd_mappings[i + 1..] {
                if a.destination == b.destination {
                    return Err(CoreError::InvalidPlan {
                        reason: format!(
                            "two disks map to the same destination '{}'",
                            a.destination.display()
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}
