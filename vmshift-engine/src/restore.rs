//! Rollback/restore manager.
//!
//! Runs after every transfer, whatever its outcome, and drives the world
//! to exactly one authoritative copy: after success the destination gets
//! its cluster role or start action back and the source remnants are
//! scrubbed; after failure the source is re-armed and the destination's
//! partial artifacts are removed. Finalization is infallible by
//! construction — anything that cannot be completed becomes a
//! [`MigrationEvent::Warning`] for human review, because failing here
//! would discard an outcome that already happened.

use std::path::Path;

use vmshift_core::{
    HostName, MigrationMode, MigrationOutcome, MigrationPhase, MigrationPlan, VmId, VmState,
};

use crate::api::{ChildFilter, MigrationContext, VmQuery};
use crate::driver::MigrationOptions;
use crate::event::MigrationEvent;
use crate::preflight::PreflightReport;
use crate::retry::{assert_until, poll_until};

/// Restores invariants after a transfer attempt.
pub struct RestoreManager<'a> {
    ctx: &'a MigrationContext<'a>,
}

impl<'a> RestoreManager<'a> {
    /// Creates a restore manager for one run.
    #[must_use]
    pub fn new(ctx: &'a MigrationContext<'a>) -> Self {
        Self { ctx }
    }

    /// Bring whichever host ended up authoritative back to a fully armed
    /// state and scrub the other.
    pub async fn finalize(
        &self,
        plan: &MigrationPlan,
        pre: &PreflightReport,
        options: &MigrationOptions,
        outcome: &MigrationOutcome,
    ) {
        self.ctx.events.emit(&MigrationEvent::PhaseStarted {
            phase: match outcome {
                MigrationOutcome::Moved { .. } => MigrationPhase::Cleanup,
                MigrationOutcome::Failed { .. } => MigrationPhase::Restore,
            },
        });
        match outcome {
            MigrationOutcome::Moved { .. } => {
                self.rearm_destination(plan, pre, options).await;
                match options.mode {
                    MigrationMode::Offline => self.scrub_source(plan, pre).await,
                    MigrationMode::Online => self.confirm_source_gone(plan).await,
                }
            }
            MigrationOutcome::Failed { .. } => {
                self.rearm_source(plan, pre).await;
                self.scrub_destination(plan).await;
            }
        }
        self.ctx.events.emit(&MigrationEvent::PhaseCompleted {
            phase: match outcome {
                MigrationOutcome::Moved { .. } => MigrationPhase::Cleanup,
                MigrationOutcome::Failed { .. } => MigrationPhase::Restore,
            },
        });
    }

    // ── Success path ─────────────────────────────────────────────────────────

    /// The migrated copy gets back what disarm took away: a cluster role
    /// with the captured priority when the destination is clustered, the
    /// original start action otherwise.
    async fn rearm_destination(
        &self,
        plan: &MigrationPlan,
        pre: &PreflightReport,
        options: &MigrationOptions,
    ) {
        let destination = &plan.destination_host;
        if let Some(cluster) = &pre.destination_info.cluster_name {
            if let Err(e) =
                self.ctx.cluster.add_vm_role(cluster, plan.vm.id, pre.cluster_priority).await
            {
                self.warn(format!("could not re-add cluster role for {}: {e}", plan.vm));
            }
        } else if let Err(e) = self
            .ctx
            .compute
            .set_start_action(destination, plan.vm.id, pre.start_action)
            .await
        {
            self.warn(format!("could not restore start action for {}: {e}", plan.vm));
        }

        if options.restart_after && pre.was_running {
            match self.ctx.compute.start_vm(destination, plan.vm.id).await {
                Ok(()) => self.ctx.events.emit(&MigrationEvent::VmStarted {
                    vm: plan.vm.id,
                    host: destination.clone(),
                }),
                Err(e) => self.warn(format!("could not start {} on {destination}: {e}", plan.vm)),
            }
        }
    }

    /// Offline transfers copy; the stale source VM and its files are still
    /// there and must go, both the VM object and every path it owned.
    async fn scrub_source(&self, plan: &MigrationPlan, pre: &PreflightReport) {
        let source = &plan.vm.source_host;
        if !self.remove_vm_object(source, plan.vm.id).await {
            return;
        }

        for vhd in &pre.paths.vhd_paths {
            if let Err(e) = self.ctx.storage.remove_path(source, vhd).await {
                self.warn(format!("could not remove {} on {source}: {e}", vhd.display()));
            }
        }
        for folder in pre.paths.folders() {
            self.remove_folder_if_ours(source, &folder, plan.vm.id).await;
        }
        self.ctx.events.emit(&MigrationEvent::SourceRemoved { vm: plan.vm.id });
    }

    /// A live move relocates in place; the platform removes the source
    /// copy itself. Confirm it actually disappeared.
    async fn confirm_source_gone(&self, plan: &MigrationPlan) {
        let source = &plan.vm.source_host;
        let ctx = self.ctx;
        let vm = plan.vm.id;
        let gone = poll_until(ctx.retry, || async move {
            Ok(ctx.compute.get_vm(source, &VmQuery::ById(vm)).await?.is_none())
        })
        .await;
        match gone {
            Ok(true) => self.ctx.events.emit(&MigrationEvent::SourceRemoved { vm: plan.vm.id }),
            Ok(false) => self.warn(format!(
                "{} is still enumerable on {source} after the move; review manually",
                plan.vm
            )),
            Err(e) => self.warn(format!("could not confirm source removal of {}: {e}", plan.vm)),
        }
    }

    // ── Failure path ─────────────────────────────────────────────────────────

    /// Undo disarm on the source so the surviving copy is fully serviceable
    /// again: cluster membership, start action, and running state all go
    /// back to what preflight captured. The restart option only qualifies
    /// the success path; a rollback always restores the original state.
    async fn rearm_source(&self, plan: &MigrationPlan, pre: &PreflightReport) {
        let source = &plan.vm.source_host;

        if let Some(cluster) = &pre.source_info.cluster_name {
            // Disarm may have failed before removing the group; re-adding an
            // existing role would fail, so only add when it is gone.
            match self.ctx.cluster.owner_node(cluster, plan.vm.id).await {
                Ok(None) => {
                    if let Err(e) = self
                        .ctx
                        .cluster
                        .add_vm_role(cluster, plan.vm.id, pre.cluster_priority)
                        .await
                    {
                        self.warn(format!(
                            "could not re-add cluster role for {}: {e}",
                            plan.vm
                        ));
                    }
                }
                Ok(Some(_)) => {}
                Err(e) => self.warn(format!(
                    "could not inspect cluster role of {}: {e}",
                    plan.vm
                )),
            }
        }

        if let Err(e) = self
            .ctx
            .compute
            .set_start_action(source, plan.vm.id, pre.start_action)
            .await
        {
            self.warn(format!("could not restore start action for {}: {e}", plan.vm));
        }

        if pre.was_running {
            match self.ctx.compute.get_vm(source, &VmQuery::ById(plan.vm.id)).await {
                Ok(Some(record)) if record.state == VmState::Off => {
                    match self.ctx.compute.start_vm(source, plan.vm.id).await {
                        Ok(()) => self.ctx.events.emit(&MigrationEvent::VmStarted {
                            vm: plan.vm.id,
                            host: source.clone(),
                        }),
                        Err(e) => {
                            self.warn(format!("could not restart {} on {source}: {e}", plan.vm));
                        }
                    }
                }
                Ok(_) => {}
                Err(e) => self.warn(format!("could not inspect {} on {source}: {e}", plan.vm)),
            }
        }
    }

    /// Remove whatever half-materialized on the destination: the planned or
    /// partially imported VM object and the exported files.
    async fn scrub_destination(&self, plan: &MigrationPlan) {
        let destination = &plan.destination_host;
        self.remove_vm_object(destination, plan.vm.id).await;

        if let Some(root) = &plan.destination_storage_path {
            let export_dir = root.join(&plan.vm.name);
            if let Err(e) = self.ctx.storage.remove_path(destination, &export_dir).await {
                self.warn(format!(
                    "could not remove {} on {destination}: {e}",
                    export_dir.display()
                ));
            }
        }
        self.ctx.events.emit(&MigrationEvent::DestinationCleaned { vm: plan.vm.id });
    }

    // ── Shared helpers ───────────────────────────────────────────────────────

    /// Remove a VM object and wait until neither its planned nor realized
    /// representation is enumerable. Returns whether removal converged.
    async fn remove_vm_object(&self, host: &HostName, vm: VmId) -> bool {
        let ctx = self.ctx;
        let removed = assert_until(
            ctx.retry,
            || async move { Ok(ctx.compute.get_vm(host, &VmQuery::ById(vm)).await?.is_none()) },
            || async move { ctx.compute.remove_vm(host, vm).await },
        )
        .await;
        match removed {
            Ok(true) => true,
            Ok(false) => {
                self.warn(format!(
                    "VM {vm} is still enumerable on {host} after removal; review manually"
                ));
                false
            }
            Err(e) => {
                self.warn(format!("could not remove VM {vm} on {host}: {e}"));
                false
            }
        }
    }

    /// Remove a per-VM folder, but only what belongs to this VM: leftover
    /// children carrying the VM's identifier are scrubbed first, and the
    /// folder itself goes only once it is empty.
    async fn remove_folder_if_ours(&self, host: &HostName, folder: &Path, vm: VmId) {
        let ours = match self
            .ctx
            .storage
            .list_children(host, folder, &ChildFilter::named(vm.to_string()))
            .await
        {
            Ok(c) => c,
            Err(e) => {
                self.warn(format!("could not list {} on {host}: {e}", folder.display()));
                return;
            }
        };
        for child in &ours {
            if let Err(e) = self.ctx.storage.remove_path(host, child).await {
                self.warn(format!("could not remove {} on {host}: {e}", child.display()));
            }
        }

        let remaining = match self
            .ctx
            .storage
            .list_children(host, folder, &ChildFilter::everything())
            .await
        {
            Ok(c) => c,
            Err(e) => {
                self.warn(format!("could not list {} on {host}: {e}", folder.display()));
                return;
            }
        };
        if remaining.is_empty() {
            if let Err(e) = self.ctx.storage.remove_path(host, folder).await {
                self.warn(format!("could not remove {} on {host}: {e}", folder.display()));
            }
        } else {
            tracing::debug!(
                folder = %folder.display(),
                remaining = remaining.len(),
                "folder shared with other VMs, leaving in place"
            );
        }
    }

    fn warn(&self, message: String) {
        self.ctx.events.emit(&MigrationEvent::Warning { message });
    }
}
