//! Top-level migration driver.
//!
//! Owns the collaborator handles, wires one [`MigrationContext`] per run,
//! and sequences preflight, transfer, and restore. The driver is where the
//! error model splits: anything that goes wrong before the first mutation
//! is a plain `Err` and nothing needs undoing; from the first mutation on,
//! failures travel inside [`MigrationOutcome::Failed`] with the restore
//! manager already run.

use std::sync::Arc;
use std::time::Duration;

use vmshift_core::{MigrationMode, MigrationOutcome, MigrationPhase, MigrationPlan};

use crate::api::{ApprovalPolicy, ClusterApi, ComputeApi, MigrationContext, StorageApi, TrustApi};
use crate::broker::SessionBroker;
use crate::error::EngineError;
use crate::event::{LogSink, MigrationEvent, ProgressSink};
use crate::preflight;
use crate::resolver::SwitchResolver;
use crate::restore::RestoreManager;
use crate::retry::RetryBudget;
use crate::transfer::TransferEngine;

/// Caller-tunable knobs for one migration (or one batch).
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct MigrationOptions {
    pub mode: MigrationMode,
    /// Stop a running VM without consulting the approval policy.
    pub force_stop: bool,
    /// Start the migrated copy if the VM was running when the attempt
    /// began.
    pub restart_after: bool,
    /// Preferred substring for destination switch selection.
    pub switch_hint: Option<String>,
    /// Wall-clock budget for the whole run. Platform primitives are not
    /// cancellable once started, so expiry means "stop waiting and report",
    /// not "undone".
    pub deadline: Option<Duration>,
    pub retry: RetryBudget,
}

impl MigrationOptions {
    /// Offline (export/import) defaults: approval-gated stop, restart
    /// after, no deadline.
    #[must_use]
    pub fn offline() -> Self {
        Self {
            mode: MigrationMode::Offline,
            force_stop: false,
            restart_after: true,
            switch_hint: None,
            deadline: None,
            retry: RetryBudget::default(),
        }
    }

    /// Online (live move) defaults.
    #[must_use]
    pub fn online() -> Self {
        Self { mode: MigrationMode::Online, ..Self::offline() }
    }

    fn resolver(&self) -> SwitchResolver {
        match &self.switch_hint {
            Some(hint) => SwitchResolver::with_hint(hint.clone()),
            None => SwitchResolver::default(),
        }
    }
}

/// Drives migrations end to end against a set of collaborators.
pub struct Migrator {
    compute: Arc<dyn ComputeApi>,
    cluster: Arc<dyn ClusterApi>,
    storage: Arc<dyn StorageApi>,
    trust: Arc<dyn TrustApi>,
    events: Arc<dyn ProgressSink>,
    broker: Option<Arc<SessionBroker>>,
}

impl Migrator {
    /// A migrator over the given collaborators, reporting progress through
    /// `tracing`.
    #[must_use]
    pub fn new(
        compute: Arc<dyn ComputeApi>,
        cluster: Arc<dyn ClusterApi>,
        storage: Arc<dyn StorageApi>,
        trust: Arc<dyn TrustApi>,
    ) -> Self {
        Self { compute, cluster, storage, trust, events: Arc::new(LogSink), broker: None }
    }

    /// Replaces the progress sink.
    #[must_use]
    pub fn with_events(mut self, events: Arc<dyn ProgressSink>) -> Self {
        self.events = events;
        self
    }

    /// Registers the session broker whose channels back the collaborators,
    /// so [`Migrator::close_sessions`] can release them.
    #[must_use]
    pub fn with_broker(mut self, broker: Arc<SessionBroker>) -> Self {
        self.broker = Some(broker);
        self
    }

    /// Migrate one VM.
    ///
    /// # Errors
    /// `Err` means the source VM is untouched: a plan or precondition
    /// violation, a declined stop, or connectivity loss before the first
    /// mutation. [`EngineError::DeadlineExceeded`] is the one exception —
    /// remote state may still be changing and needs review. Failures after
    /// the first mutation come back as `Ok(MigrationOutcome::Failed)` with
    /// rollback already performed.
    pub async fn migrate(
        &self,
        plan: &MigrationPlan,
        options: &MigrationOptions,
        approval: &dyn ApprovalPolicy,
    ) -> Result<MigrationOutcome, EngineError> {
        plan.validate()?;
        tracing::info!(vm = %plan.vm, destination = %plan.destination_host, mode = ?options.mode, "migration starting");

        let result = match options.deadline {
            Some(budget) => {
                match tokio::time::timeout(budget, self.migrate_inner(plan, options, approval))
                    .await
                {
                    Ok(result) => result,
                    Err(_) => Err(EngineError::DeadlineExceeded { budget }),
                }
            }
            None => self.migrate_inner(plan, options, approval).await,
        };

        match &result {
            Ok(outcome) => {
                tracing::info!(vm = %plan.vm, moved = outcome.is_moved(), "migration finished");
            }
            Err(e) => tracing::warn!(vm = %plan.vm, error = %e, "migration aborted"),
        }
        result
    }

    async fn migrate_inner(
        &self,
        plan: &MigrationPlan,
        options: &MigrationOptions,
        approval: &dyn ApprovalPolicy,
    ) -> Result<MigrationOutcome, EngineError> {
        let ctx = MigrationContext {
            compute: self.compute.as_ref(),
            cluster: self.cluster.as_ref(),
            storage: self.storage.as_ref(),
            trust: self.trust.as_ref(),
            events: self.events.as_ref(),
            retry: options.retry,
        };

        ctx.events.emit(&MigrationEvent::PhaseStarted { phase: MigrationPhase::Preflight });
        let pre = preflight::validate(&ctx, plan, options.mode).await?;
        ctx.events.emit(&MigrationEvent::PhaseCompleted { phase: MigrationPhase::Preflight });

        let transfer = TransferEngine::new(&ctx, options.resolver());
        let outcome = transfer.run(plan, &pre, options, approval).await?;

        RestoreManager::new(&ctx).finalize(plan, &pre, options, &outcome).await;
        Ok(outcome)
    }

    /// Migrate several VMs sequentially, in plan order.
    ///
    /// Sequential on purpose: runs against the same source host share
    /// sessions and the single-writer-per-host contract, and two plans
    /// naming the same destination path would race. One result per plan,
    /// same order; a failed plan does not stop the rest. Sessions are
    /// released when the batch ends.
    pub async fn migrate_batch(
        &self,
        plans: &[MigrationPlan],
        options: &MigrationOptions,
        approval: &dyn ApprovalPolicy,
    ) -> Vec<Result<MigrationOutcome, EngineError>> {
        let mut results = Vec::with_capacity(plans.len());
        for plan in plans {
            results.push(self.migrate(plan, options, approval).await);
        }
        self.close_sessions().await;
        results
    }

    /// Release every cached remote session. Idempotent.
    pub async fn close_sessions(&self) {
        if let Some(broker) = &self.broker {
            broker.close_all().await;
        }
    }
}
