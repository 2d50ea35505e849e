//! Phase-by-phase progress reporting.
//!
//! A human operator watching a long-running migration needs to see which
//! phase is active and which host is currently authoritative as it
//! happens, not only at the end. Events are pushed into a caller-supplied
//! sink; the default sink forwards to `tracing`.

use vmshift_core::{HostName, MigrationPhase, VmId};

/// One observable step of a migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum MigrationEvent {
    PhaseStarted { phase: MigrationPhase },
    PhaseCompleted { phase: MigrationPhase },
    /// Something went wrong that does not change the outcome — typically a
    /// convergence timeout where the true remote state is unknown and left
    /// for human review.
    Warning { message: String },
    /// An adapter was rebound to a switch that exists on the destination.
    AdapterRebound { adapter: String, switch: String },
    /// No external switch exists on the destination; the adapter boots
    /// disconnected rather than failing the migration.
    AdapterDisconnected { adapter: String },
    VmStopped { vm: VmId },
    VmStarted { vm: VmId, host: HostName },
    /// The source copy and its on-disk remnants are gone.
    SourceRemoved { vm: VmId },
    /// Partial artifacts on the destination were cleaned up after failure.
    DestinationCleaned { vm: VmId },
}

/// Receives progress events as the migration produces them.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: &MigrationEvent);
}

/// Default sink: structured `tracing` output.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl ProgressSink for LogSink {
    fn emit(&self, event: &MigrationEvent) {
        match event {
            MigrationEvent::PhaseStarted { phase } => {
                tracing::info!(%phase, "phase started");
            }
            MigrationEvent::PhaseCompleted { phase } => {
                tracing::info!(%phase, "phase completed");
            }
            MigrationEvent::Warning { message } => {
                tracing::warn!(%message, "migration warning");
            }
            MigrationEvent::AdapterRebound { adapter, switch } => {
                tracing::info!(%adapter, %switch, "adapter rebound");
            }
            MigrationEvent::AdapterDisconnected { adapter } => {
                tracing::warn!(%adapter, "adapter left disconnected");
            }
            MigrationEvent::VmStopped { vm } => tracing::info!(%vm, "VM stopped"),
            MigrationEvent::VmStarted { vm, host } => {
                tracing::info!(%vm, %host, "VM started");
            }
            MigrationEvent::SourceRemoved { vm } => {
                tracing::info!(%vm, "source copy removed");
            }
            MigrationEvent::DestinationCleaned { vm } => {
                tracing::info!(%vm, "destination artifacts removed");
            }
        }
    }
}
