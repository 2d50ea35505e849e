//! Transfer engine.
//!
//! Runs the phases that actually move a VM: shutdown, disarm, export,
//! compare, resolve, import for the offline path; disarm, compare,
//! resolve, move for the online path. The first mutation marks the point
//! of no plain return — from there on, any phase failure becomes a
//! [`MigrationOutcome::Failed`] for the restore manager to act on, never a
//! bare error that would leave two half-configured copies behind.

use std::path::Path;

use vmshift_core::{
    CoreError, MigrationMode, MigrationOutcome, MigrationPhase, MigrationPlan, StartAction,
};

use crate::api::{ApprovalPolicy, MigrationContext};
use crate::driver::MigrationOptions;
use crate::error::EngineError;
use crate::event::MigrationEvent;
use crate::preflight::PreflightReport;
use crate::resolver::{AdapterFix, SwitchResolver};

/// Executes the mutating phases of one migration.
pub struct TransferEngine<'a> {
    ctx: &'a MigrationContext<'a>,
    resolver: SwitchResolver,
}

impl<'a> TransferEngine<'a> {
    /// Creates a transfer engine for one run.
    #[must_use]
    pub fn new(ctx: &'a MigrationContext<'a>, resolver: SwitchResolver) -> Self {
        Self { ctx, resolver }
    }

    /// Run the transfer. Never returns `Err` once the source has been
    /// mutated; failures after that point come back as
    /// [`MigrationOutcome::Failed`] with the phase that broke.
    ///
    /// # Errors
    /// Only before the first mutation: a declined stop, or a plan that lost
    /// its storage path between preflight and here.
    pub async fn run(
        &self,
        plan: &MigrationPlan,
        pre: &PreflightReport,
        options: &MigrationOptions,
        approval: &dyn ApprovalPolicy,
    ) -> Result<MigrationOutcome, EngineError> {
        match options.mode {
            MigrationMode::Offline => self.run_offline(plan, pre, options, approval).await,
            MigrationMode::Online => Ok(self.run_online(plan, pre).await),
        }
    }

    async fn run_offline(
        &self,
        plan: &MigrationPlan,
        pre: &PreflightReport,
        options: &MigrationOptions,
        approval: &dyn ApprovalPolicy,
    ) -> Result<MigrationOutcome, EngineError> {
        // Preflight guarantees the path for offline mode; re-check before
        // touching anything so a hole here is a clean abort.
        let export_root = plan.destination_storage_path.clone().ok_or_else(|| {
            EngineError::Plan(CoreError::InvalidPlan {
                reason: "offline migration requires a destination storage path".to_owned(),
            })
        })?;

        // Shutdown is the last point that may abort with a plain error: a
        // declined stop leaves the source untouched.
        if pre.was_running {
            if !options.force_stop && !approval.approve_stop(&plan.vm).await {
                return Err(EngineError::StopDeclined { vm: plan.vm.name.clone() });
            }
            if let Err((phase, reason)) = self
                .phase(MigrationPhase::Shutdown, async {
                    self.ctx.compute.stop_vm(&plan.vm.source_host, plan.vm.id).await?;
                    self.ctx.events.emit(&MigrationEvent::VmStopped { vm: plan.vm.id });
                    Ok(())
                })
                .await
            {
                return Ok(MigrationOutcome::failed(phase, reason));
            }
        }

        if let Err((phase, reason)) = self
            .phase(MigrationPhase::Disarm, self.disarm(plan, pre, true))
            .await
        {
            return Ok(MigrationOutcome::failed(phase, reason));
        }

        if let Err((phase, reason)) = self
            .phase(MigrationPhase::Export, self.export(plan, &export_root))
            .await
        {
            return Ok(MigrationOutcome::failed(phase, reason));
        }

        let comparison = match self
            .phase(MigrationPhase::Compare, async {
                let export_dir = export_root.join(&plan.vm.name);
                self.ctx
                    .compute
                    .compare_import(&plan.destination_host, &export_dir, plan)
                    .await
            })
            .await
        {
            Ok(c) => c,
            Err((phase, reason)) => return Ok(MigrationOutcome::failed(phase, reason)),
        };

        let mut report = comparison.report;
        let fixes: Vec<AdapterFix> = match self
            .phase(MigrationPhase::Resolve, async {
                self.resolver.resolve(self.ctx, plan, &mut report).await
            })
            .await
        {
            Ok(f) => f,
            Err((phase, reason)) => return Ok(MigrationOutcome::failed(phase, reason)),
        };

        // The planned VM materialized by the comparison keeps the source
        // VM's identity unless the platform says otherwise.
        let planned_id = comparison.planned.as_ref().map_or(plan.vm.id, |p| p.id);

        match self
            .phase(MigrationPhase::Import, async {
                self.ctx
                    .compute
                    .realize_import(&plan.destination_host, planned_id, &fixes)
                    .await
            })
            .await
        {
            Ok(record) => Ok(MigrationOutcome::Moved {
                new_vm: record.identity_on(&plan.destination_host),
            }),
            Err((phase, reason)) => Ok(MigrationOutcome::failed(phase, reason)),
        }
    }

    async fn run_online(&self, plan: &MigrationPlan, pre: &PreflightReport) -> MigrationOutcome {
        // A live move keeps the VM running; only the cluster group is
        // disarmed ahead of the move.
        if let Err((phase, reason)) = self
            .phase(MigrationPhase::Disarm, self.disarm(plan, pre, false))
            .await
        {
            return MigrationOutcome::failed(phase, reason);
        }

        let comparison = match self
            .phase(MigrationPhase::Compare, async {
                self.ctx.compute.compare_move(&plan.vm.source_host, plan.vm.id, plan).await
            })
            .await
        {
            Ok(c) => c,
            Err((phase, reason)) => return MigrationOutcome::failed(phase, reason),
        };

        let mut report = comparison.report;
        let fixes = match self
            .phase(MigrationPhase::Resolve, async {
                self.resolver.resolve(self.ctx, plan, &mut report).await
            })
            .await
        {
            Ok(f) => f,
            Err((phase, reason)) => return MigrationOutcome::failed(phase, reason),
        };

        match self
            .phase(MigrationPhase::Move, async {
                self.ctx.compute.move_vm(&plan.vm.source_host, plan.vm.id, plan, &fixes).await
            })
            .await
        {
            Ok(record) => MigrationOutcome::Moved {
                new_vm: record.identity_on(&plan.destination_host),
            },
            Err((phase, reason)) => MigrationOutcome::failed(phase, reason),
        }
    }

    /// Strip the VM of everything that could resurrect it mid-transfer: the
    /// automatic start action (offline only) and its cluster resource
    /// group.
    async fn disarm(
        &self,
        plan: &MigrationPlan,
        pre: &PreflightReport,
        clear_start_action: bool,
    ) -> Result<(), EngineError> {
        if clear_start_action {
            self.ctx
                .compute
                .set_start_action(&plan.vm.source_host, plan.vm.id, StartAction::Nothing)
                .await?;
        }
        if let Some(cluster) = &pre.source_info.cluster_name {
            self.ctx.cluster.remove_group(cluster, plan.vm.id, false).await?;
        }
        Ok(())
    }

    /// Export under the destination's storage root, addressed from the
    /// source as a UNC path. The cross-host write needs temporary
    /// administrative trust; the grant is revoked on every exit path, with
    /// a revoke failure downgraded to a warning so it cannot shadow the
    /// export result.
    async fn export(&self, plan: &MigrationPlan, root: &Path) -> Result<(), EngineError> {
        let source = &plan.vm.source_host;
        let destination = &plan.destination_host;

        self.ctx.trust.grant(source, destination).await?;
        let result = async {
            let unc_root = self.ctx.storage.resolve_unc(destination, root).await?;
            self.ctx.compute.export_vm(source, plan.vm.id, &unc_root).await
        }
        .await;
        if let Err(e) = self.ctx.trust.revoke(source, destination).await {
            self.ctx.events.emit(&MigrationEvent::Warning {
                message: format!("could not revoke trust grant of {source} on {destination}: {e}"),
            });
        }
        result
    }

    /// Run one phase with start/complete events, turning its error into the
    /// (phase, reason) pair a failed outcome carries.
    async fn phase<T, F>(
        &self,
        phase: MigrationPhase,
        work: F,
    ) -> Result<T, (MigrationPhase, String)>
    where
        F: std::future::Future<Output = Result<T, EngineError>>,
    {
        self.ctx.events.emit(&MigrationEvent::PhaseStarted { phase });
        match work.await {
            Ok(value) => {
                self.ctx.events.emit(&MigrationEvent::PhaseCompleted { phase });
                Ok(value)
            }
            Err(e) => Err((phase, e.to_string())),
        }
    }
}
