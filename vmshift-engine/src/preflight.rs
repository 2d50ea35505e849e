//! Precondition validator.
//!
//! Sequential checks, each a hard stop: nothing is mutated until every
//! check passes, so a failed preflight never needs a rollback. The
//! captured [`PreflightReport`] doubles as the restore manager's record of
//! what the source looked like before the attempt began.

use std::path::Path;

use vmshift_core::{
    HostClusterInfo, MigrationMode, MigrationPlan, Realization, StartAction, VmPathSet,
};
use vmshift_core::CoreError;

use crate::api::{MigrationContext, VmQuery, VmRecord};
use crate::error::EngineError;
use crate::inspect::ClusterInspector;
use crate::retry::assert_until;

/// Everything preflight learned, frozen for the rest of the run.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PreflightReport {
    pub source_info: HostClusterInfo,
    pub destination_info: HostClusterInfo,
    /// The realized record on the source at validation time.
    pub vm: VmRecord,
    /// Every path the VM touches on the source host.
    pub paths: VmPathSet,
    /// Whether the VM was running when the attempt began; drives the
    /// restart decision on whichever host ends up authoritative.
    pub was_running: bool,
    /// The automatic-start setting to restore after transfer.
    pub start_action: StartAction,
    /// Cluster-group priority captured before removal, if the source is
    /// clustered and the VM has a group.
    pub cluster_priority: Option<u32>,
}

/// Run every precondition check for the plan.
///
/// # Errors
/// Each violated condition maps to its own [`EngineError`] variant; the
/// first violation stops the run with zero mutations on either host. The
/// only filesystem change this function makes is the idempotent creation
/// of destination directories, which happens after all presence and
/// shared-volume checks have passed.
pub async fn validate(
    ctx: &MigrationContext<'_>,
    plan: &MigrationPlan,
    mode: MigrationMode,
) -> Result<PreflightReport, EngineError> {
    let source = &plan.vm.source_host;
    let destination = &plan.destination_host;
    let inspector = ClusterInspector::new(ctx.cluster);

    if mode == MigrationMode::Offline && plan.destination_storage_path.is_none() {
        return Err(EngineError::Plan(CoreError::InvalidPlan {
            reason: "offline migration requires a destination storage path".to_owned(),
        }));
    }

    // The VM must exist exactly once, realized, on the source.
    let record = ctx
        .compute
        .get_vm(source, &VmQuery::ById(plan.vm.id))
        .await?
        .filter(|r| r.realization == Realization::Realized)
        .ok_or_else(|| EngineError::VmNotFound {
            vm: plan.vm.name.clone(),
            host: source.clone(),
        })?;

    // An active checkpoint chain would diverge from any exported copy.
    if record.snapshot_count > 0 {
        return Err(EngineError::SnapshotPresent {
            vm: record.name.clone(),
            count: record.snapshot_count,
        });
    }

    let source_info = inspector.host_info(source).await?;
    let destination_info = inspector.host_info(destination).await?;

    // Not already present — planned or realized — on the destination, or on
    // any node of the destination cluster. Presence on more than one host
    // is the failure mode this engine exists to prevent.
    let candidates = match &destination_info.cluster_name {
        Some(cluster) => ctx.cluster.nodes(cluster).await?,
        None => vec![destination.clone()],
    };
    for candidate in &candidates {
        if candidate == source {
            continue;
        }
        if let Some(found) = ctx.compute.get_vm(candidate, &VmQuery::ById(plan.vm.id)).await? {
            return Err(EngineError::AlreadyPresent {
                vm: found.name,
                host: candidate.clone(),
            });
        }
    }

    // Capture the cluster-group priority now; removing the group later must
    // be reversible.
    let cluster_priority = match &source_info.cluster_name {
        Some(cluster) => ctx.cluster.group_priority(cluster, plan.vm.id).await?,
        None => None,
    };

    // Destination paths: shared-volume placement first, then idempotent
    // creation.
    if let Some(storage_root) = &plan.destination_storage_path {
        check_shared_placement(ctx, plan, &destination_info, storage_root).await?;
        ensure_dir(ctx, plan, storage_root).await?;
    }
    for mapping in &plan.vhd_mappings {
        if let Some(parent) = mapping.destination.parent() {
            if destination_info.is_clustered {
                check_shared_placement(ctx, plan, &destination_info, parent).await?;
            }
            ensure_dir(ctx, plan, parent).await?;
        }
    }

    let paths = ctx.compute.vm_paths(source, plan.vm.id).await?;

    Ok(PreflightReport {
        source_info,
        destination_info,
        was_running: record.state.is_running(),
        start_action: record.start_action,
        vm: record,
        paths,
        cluster_priority,
    })
}

/// When the destination is clustered, the path must land on a shared
/// volume owned by the destination node itself. A volume owned by a
/// different node must be moved first; that is surfaced as an actionable
/// error, never worked around silently.
async fn check_shared_placement(
    ctx: &MigrationContext<'_>,
    plan: &MigrationPlan,
    destination_info: &HostClusterInfo,
    path: &Path,
) -> Result<(), EngineError> {
    let Some(cluster) = &destination_info.cluster_name else {
        return Ok(());
    };
    if destination_info.shared_volume_for(path).is_none() {
        return Err(EngineError::NotOnSharedVolume {
            path: path.to_path_buf(),
            cluster: cluster.clone(),
        });
    }
    let inspector = ClusterInspector::new(ctx.cluster);
    if let Some(volume) = inspector.volume_owner(cluster, path).await? {
        if volume.owner != plan.destination_host {
            return Err(EngineError::VolumeOwnedElsewhere {
                path: volume.path,
                owner: volume.owner,
                wanted: plan.destination_host.clone(),
            });
        }
    }
    Ok(())
}

/// Create a destination directory idempotently: already-exists is success
/// and skips the create call entirely.
async fn ensure_dir(
    ctx: &MigrationContext<'_>,
    plan: &MigrationPlan,
    path: &Path,
) -> Result<(), EngineError> {
    let host = &plan.destination_host;
    let created = assert_until(
        ctx.retry,
        || async move { ctx.storage.path_exists(host, path).await },
        || async move { ctx.storage.create_dir(host, path).await },
    )
    .await?;
    if created {
        Ok(())
    } else {
        Err(EngineError::Convergence {
            what: format!("destination path {}", path.display()),
            attempts: ctx.retry.max_attempts,
        })
    }
}
