//! Collaborator interfaces.
//!
//! The hypervisor's VM inventory, the cluster resource manager, the remote
//! filesystem, and the administrative trust bootstrap are external
//! collaborators. Each is specified at its interface here so the engine can
//! run against the real platform backend or an in-memory test double
//! without changing the orchestration logic.
//!
//! Lookups are tri-state: `Ok(Some(_))` found, `Ok(None)` not found,
//! `Err(_)` a genuine fault. "Not found" is never modeled as an error.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use vmshift_core::{
    CompatibilityReport, HostName, MigrationPlan, Realization, StartAction, VmId, VmIdentity,
    VmPathSet, VmState,
};

use crate::error::EngineError;
use crate::event::ProgressSink;
use crate::resolver::AdapterFix;
use crate::retry::RetryBudget;

// ── Wire-shape types ─────────────────────────────────────────────────────────

/// A VM as one host currently sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmRecord {
    pub id: VmId,
    pub name: String,
    pub state: VmState,
    pub realization: Realization,
    pub start_action: StartAction,
    /// Number of point-in-time snapshots currently attached.
    pub snapshot_count: u32,
}

impl VmRecord {
    /// The identity of this record as seen from `host`.
    #[must_use]
    pub fn identity_on(&self, host: &HostName) -> VmIdentity {
        VmIdentity::new(self.id, self.name.clone(), host.clone())
    }
}

/// How to look a VM up on a host. Matches planned and realized
/// representations alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VmQuery {
    ById(VmId),
    ByName(String),
}

/// A virtual switch present on a host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VirtualSwitch {
    pub name: String,
    pub kind: SwitchKind,
}

impl VirtualSwitch {
    /// An external switch with the given name.
    pub fn external(name: impl Into<String>) -> Self {
        Self { name: name.into(), kind: SwitchKind::External }
    }

    /// Returns `true` if adapters bound to this switch reach the physical
    /// network.
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.kind == SwitchKind::External
    }
}

/// Connectivity class of a virtual switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub enum SwitchKind {
    External,
    Internal,
    Private,
}

/// One shared volume of a cluster and the node currently owning it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SharedVolume {
    pub path: PathBuf,
    pub owner: HostName,
}

/// The result of comparing a VM's configuration against a destination.
///
/// For offline migrations the comparison materializes a planned VM on the
/// destination; `planned` references it so a failed import can be cleaned
/// up.
#[derive(Debug, Clone)]
pub struct Comparison {
    pub report: CompatibilityReport,
    pub planned: Option<VmRecord>,
}

/// File-name filter for remote child enumeration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ChildFilter {
    /// Keep only entries whose file name contains this substring.
    pub name_contains: Option<String>,
    pub recurse: bool,
}

impl ChildFilter {
    /// Matches every child, non-recursively.
    #[must_use]
    pub fn everything() -> Self {
        Self::default()
    }

    /// Matches children whose file name contains `needle`, non-recursively.
    #[must_use]
    pub fn named(needle: impl Into<String>) -> Self {
        Self { name_contains: Some(needle.into()), recurse: false }
    }
}

// ── Collaborator traits ──────────────────────────────────────────────────────

/// The hypervisor's VM inventory and compute operations.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    /// Look a VM up on one host. Planned and realized representations both
    /// match; `Ok(None)` means neither exists.
    async fn get_vm(
        &self,
        host: &HostName,
        query: &VmQuery,
    ) -> Result<Option<VmRecord>, EngineError>;

    /// Every filesystem path the VM's identity touches on `host`.
    async fn vm_paths(&self, host: &HostName, vm: VmId) -> Result<VmPathSet, EngineError>;

    /// Export the stopped VM's configuration and disks under
    /// `destination_root` (the export lands in a subdirectory named after
    /// the VM).
    async fn export_vm(
        &self,
        host: &HostName,
        vm: VmId,
        destination_root: &Path,
    ) -> Result<(), EngineError>;

    /// Compare an exported configuration against the destination host,
    /// materializing a planned VM there.
    async fn compare_import(
        &self,
        destination: &HostName,
        export_dir: &Path,
        plan: &MigrationPlan,
    ) -> Result<Comparison, EngineError>;

    /// Realize a planned VM on the destination, applying adapter fixes.
    ///
    /// # Errors
    /// A failure leaves the planned VM behind for the rollback manager.
    async fn realize_import(
        &self,
        destination: &HostName,
        planned: VmId,
        fixes: &[AdapterFix],
    ) -> Result<VmRecord, EngineError>;

    /// Compare the live VM against the destination ahead of a move.
    async fn compare_move(
        &self,
        source: &HostName,
        vm: VmId,
        plan: &MigrationPlan,
    ) -> Result<Comparison, EngineError>;

    /// The hypervisor's live-move primitive. Handles memory-state transfer
    /// internally; offers no cluster awareness and no incompatibility
    /// resolution of its own.
    async fn move_vm(
        &self,
        source: &HostName,
        vm: VmId,
        plan: &MigrationPlan,
        fixes: &[AdapterFix],
    ) -> Result<VmRecord, EngineError>;

    async fn stop_vm(&self, host: &HostName, vm: VmId) -> Result<(), EngineError>;

    async fn start_vm(&self, host: &HostName, vm: VmId) -> Result<(), EngineError>;

    /// Remove the VM object (planned or realized). Removing an absent VM is
    /// success: removal visibility is asynchronous and the caller re-checks
    /// through the retry engine.
    async fn remove_vm(&self, host: &HostName, vm: VmId) -> Result<(), EngineError>;

    async fn set_start_action(
        &self,
        host: &HostName,
        vm: VmId,
        action: StartAction,
    ) -> Result<(), EngineError>;

    async fn list_switches(&self, host: &HostName) -> Result<Vec<VirtualSwitch>, EngineError>;
}

/// The cluster resource manager.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// The cluster this host belongs to, if any. Absence of a cluster
    /// service is not an error.
    async fn cluster_name(&self, host: &HostName) -> Result<Option<String>, EngineError>;

    async fn nodes(&self, cluster: &str) -> Result<Vec<HostName>, EngineError>;

    /// The node currently hosting the VM's cluster resource group, or
    /// `None` if the VM has no group (unclustered, or does not exist).
    async fn owner_node(&self, cluster: &str, vm: VmId) -> Result<Option<HostName>, EngineError>;

    /// Current priority of the VM's cluster group, captured before removal
    /// so it can be restored.
    async fn group_priority(&self, cluster: &str, vm: VmId) -> Result<Option<u32>, EngineError>;

    async fn add_vm_role(
        &self,
        cluster: &str,
        vm: VmId,
        priority: Option<u32>,
    ) -> Result<(), EngineError>;

    /// Remove the VM's cluster resource group. Removing an absent group is
    /// success.
    async fn remove_group(
        &self,
        cluster: &str,
        vm: VmId,
        remove_resources: bool,
    ) -> Result<(), EngineError>;

    async fn shared_volumes(&self, cluster: &str) -> Result<Vec<SharedVolume>, EngineError>;
}

/// Remote filesystem operations on a host.
#[async_trait]
pub trait StorageApi: Send + Sync {
    async fn path_exists(&self, host: &HostName, path: &Path) -> Result<bool, EngineError>;

    /// Create a directory. Already-exists is success, not failure.
    async fn create_dir(&self, host: &HostName, path: &Path) -> Result<(), EngineError>;

    /// Remove a file or directory tree. Missing is success.
    async fn remove_path(&self, host: &HostName, path: &Path) -> Result<(), EngineError>;

    async fn list_children(
        &self,
        host: &HostName,
        path: &Path,
        filter: &ChildFilter,
    ) -> Result<Vec<PathBuf>, EngineError>;

    /// Translate a host-local path into a UNC path reachable from other
    /// hosts.
    async fn resolve_unc(&self, host: &HostName, path: &Path) -> Result<PathBuf, EngineError>;
}

/// Temporary administrative trust between hosts.
///
/// The source host's machine identity is added to the destination's local
/// administrative group for the duration of the export/transfer step only;
/// the grant must not outlive the single operation that requires it.
#[async_trait]
pub trait TrustApi: Send + Sync {
    async fn grant(&self, grantee: &HostName, on: &HostName) -> Result<(), EngineError>;

    async fn revoke(&self, grantee: &HostName, on: &HostName) -> Result<(), EngineError>;
}

/// Caller-supplied policy for decisions the engine cannot make alone,
/// replacing interactive prompts so the engine is usable both attended and
/// unattended.
#[async_trait]
pub trait ApprovalPolicy: Send + Sync {
    /// May the engine stop this running VM before an offline export?
    async fn approve_stop(&self, vm: &VmIdentity) -> bool;
}

/// Fixed-answer approval policy for unattended runs.
#[derive(Debug, Clone, Copy)]
pub struct Unattended {
    approve: bool,
}

impl Unattended {
    /// Approves every stop request.
    #[must_use]
    pub fn approve_all() -> Self {
        Self { approve: true }
    }

    /// Declines every stop request.
    #[must_use]
    pub fn deny_all() -> Self {
        Self { approve: false }
    }
}

#[async_trait]
impl ApprovalPolicy for Unattended {
    async fn approve_stop(&self, _vm: &VmIdentity) -> bool {
        self.approve
    }
}

// ── Per-run context ──────────────────────────────────────────────────────────

/// Everything one migration run needs, passed explicitly into each
/// component — no component reaches into ambient state.
#[derive(Clone, Copy)]
pub struct MigrationContext<'a> {
    pub compute: &'a dyn ComputeApi,
    pub cluster: &'a dyn ClusterApi,
    pub storage: &'a dyn StorageApi,
    pub trust: &'a dyn TrustApi,
    pub events: &'a dyn ProgressSink,
    pub retry: RetryBudget,
}
