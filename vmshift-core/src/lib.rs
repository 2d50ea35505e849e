//! Core types for the vmshift VM relocation engine.
//!
//! Defines the fundamental domain types: VM identities, migration plans,
//! host cluster info, per-host path sets, compatibility reports, and
//! migration outcomes. No I/O lives here.

#![warn(clippy::pedantic)]
#![deny(clippy::unwrap_used)]

pub mod cluster;
pub mod compat;
pub mod error;
pub mod id;
pub mod identity;
pub mod outcome;
pub mod paths;
pub mod plan;

pub use cluster::HostClusterInfo;
pub use compat::{CompatibilityReport, Incompatibility, IncompatibilityCode};
pub use error::CoreError;
pub use id::{HostName, VmId};
pub use identity::{Realization, StartAction, VmIdentity, VmState};
pub use outcome::{MigrationOutcome, MigrationPhase};
pub use paths::VmPathSet;
pub use plan::{MigrationMode, MigrationPlan, VhdMapping};
