//! Compatibility resolver.
//!
//! The one class of incompatibility resolved automatically is a network
//! adapter referencing a virtual switch that does not exist on the
//! destination. Switch selection is a pure function of its inputs, so two
//! runs against the same destination always pick the same switch; every
//! other incompatibility code marks the report unresolved and stops the
//! migration before transfer.

use serde::{Deserialize, Serialize};

use vmshift_core::{CompatibilityReport, IncompatibilityCode, MigrationPlan};

use crate::api::{MigrationContext, VirtualSwitch};
use crate::error::EngineError;
use crate::event::MigrationEvent;

/// Substring used to prefer one external switch over others when several
/// exist and the caller expressed no preference.
pub const DEFAULT_SWITCH_HINT: &str = "compute";

/// What to do with one adapter whose switch is missing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SwitchChoice {
    /// Bind the adapter to this destination switch.
    Rebind(String),
    /// No external switch exists; boot the adapter disconnected. A VM that
    /// boots disconnected is recoverable, a VM that never migrates is not.
    Disconnect,
}

/// A resolved fix for one adapter, applied by the backend during import or
/// move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct AdapterFix {
    pub adapter: String,
    pub choice: SwitchChoice,
}

/// Pick the destination switch for an adapter whose original switch is
/// missing.
///
/// Policy, in order:
/// 1. the caller's explicit switch, if it exists on the destination;
/// 2. the only external switch, if there is exactly one;
/// 3. among external switches whose name contains `hint`: the only match,
///    or the lexicographically first of several;
/// 4. the lexicographically first external switch when nothing matches the
///    hint;
/// 5. disconnect when no external switch exists at all.
///
/// Deterministic: the answer depends only on the set of switches, never on
/// their enumeration order.
#[must_use]
pub fn choose_switch(
    requested: Option<&str>,
    available: &[VirtualSwitch],
    hint: &str,
) -> SwitchChoice {
    if let Some(name) = requested {
        if available.iter().any(|s| s.name == name) {
            return SwitchChoice::Rebind(name.to_owned());
        }
    }

    let mut external: Vec<&str> = available
        .iter()
        .filter(|s| s.is_external())
        .map(|s| s.name.as_str())
        .collect();
    external.sort_unstable();
    external.dedup();

    match external.as_slice() {
        [] => SwitchChoice::Disconnect,
        [only] => SwitchChoice::Rebind((*only).to_owned()),
        several => {
            let matching: Vec<&str> = several
                .iter()
                .copied()
                .filter(|name| name.contains(hint))
                .collect();
            // `several` is sorted, so the first element of either list is
            // the lexicographic tie-break.
            let pick = matching.first().unwrap_or(&several[0]);
            SwitchChoice::Rebind((*pick).to_owned())
        }
    }
}

/// Applies the switch policy to a whole compatibility report.
#[derive(Debug, Clone)]
pub struct SwitchResolver {
    hint: String,
}

impl Default for SwitchResolver {
    fn default() -> Self {
        Self { hint: DEFAULT_SWITCH_HINT.to_owned() }
    }
}

impl SwitchResolver {
    /// A resolver preferring external switches whose name contains `hint`.
    pub fn with_hint(hint: impl Into<String>) -> Self {
        Self { hint: hint.into() }
    }

    /// Resolve every incompatibility in the report or mark it unresolved.
    ///
    /// Mutates only the report; the fixes come back as data and are applied
    /// by the backend during import or move.
    ///
    /// # Errors
    /// Returns [`EngineError::Unresolved`] when any incompatibility has no
    /// rule; the transfer engine must not proceed past that.
    pub async fn resolve(
        &self,
        ctx: &MigrationContext<'_>,
        plan: &MigrationPlan,
        report: &mut CompatibilityReport,
    ) -> Result<Vec<AdapterFix>, EngineError> {
        if report.incompatibilities.is_empty() {
            report.mark_resolved();
            return Ok(Vec::new());
        }

        let switches = ctx.compute.list_switches(&plan.destination_host).await?;
        let mut fixes = Vec::new();
        let mut unresolved = Vec::new();

        for incompatibility in &report.incompatibilities {
            match &incompatibility.code {
                IncompatibilityCode::MissingSwitch => {
                    let Some(adapter) = incompatibility.adapter.clone() else {
                        unresolved.push(format!(
                            "missing-switch report without an adapter reference: {}",
                            incompatibility.message
                        ));
                        continue;
                    };
                    let choice =
                        choose_switch(plan.switch_name.as_deref(), &switches, &self.hint);
                    match &choice {
                        SwitchChoice::Rebind(switch) => {
                            ctx.events.emit(&MigrationEvent::AdapterRebound {
                                adapter: adapter.clone(),
                                switch: switch.clone(),
                            });
                        }
                        SwitchChoice::Disconnect => {
                            ctx.events.emit(&MigrationEvent::AdapterDisconnected {
                                adapter: adapter.clone(),
                            });
                        }
                    }
                    fixes.push(AdapterFix { adapter, choice });
                }
                IncompatibilityCode::Unknown(code) => {
                    unresolved.push(format!(
                        "no resolution rule for code {code}: {}",
                        incompatibility.message
                    ));
                }
            }
        }

        for reason in unresolved {
            report.add_unresolved(reason);
        }
        report.mark_resolved();

        if report.resolved {
            Ok(fixes)
        } else {
            Err(EngineError::Unresolved { reasons: report.unresolved_reasons.clone() })
        }
    }
}
