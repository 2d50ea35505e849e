//! Cluster-aware VM relocation engine.
//!
//! Moves a VM between hypervisor hosts — offline via export/import, online
//! via the platform's live-move primitive — while keeping one invariant
//! above all others: at no point may two authoritative copies of the same
//! VM exist. Preflight validates before anything mutates, the transfer
//! engine runs the phases, and the restore manager brings whichever side
//! lost back to a clean state.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod api;
pub mod broker;
pub mod driver;
pub mod error;
pub mod event;
pub mod hyperv;
pub mod inspect;
pub mod preflight;
pub mod resolver;
pub mod restore;
pub mod retry;
pub mod transfer;

pub use api::{
    ApprovalPolicy, ChildFilter, ClusterApi, Comparison, ComputeApi, MigrationContext,
    SharedVolume, StorageApi, SwitchKind, TrustApi, Unattended, VirtualSwitch, VmQuery, VmRecord,
};
pub use broker::{
    CommandOutput, CommandSpec, ProcessTransport, RemoteSession, SessionBroker, SessionTransport,
};
pub use driver::{MigrationOptions, Migrator};
pub use error::EngineError;
pub use event::{LogSink, MigrationEvent, ProgressSink};
pub use hyperv::HyperVApi;
pub use inspect::ClusterInspector;
pub use preflight::PreflightReport;
pub use resolver::{AdapterFix, SwitchChoice, SwitchResolver};
pub use restore::RestoreManager;
pub use retry::{assert_until, poll_until, RetryBudget};
pub use transfer::TransferEngine;
