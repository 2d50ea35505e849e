use serde::{Deserialize, Serialize};

/// Machine-checkable classification of a single incompatibility between a
/// VM's configuration and a destination host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IncompatibilityCode {
    /// A network adapter references a virtual switch that does not exist on
    /// the destination. The only class resolved automatically.
    MissingSwitch,
    /// Anything the resolver does not know how to fix. Carries the
    /// platform's raw code so operators can look it up.
    Unknown(String),
}

/// One entry of the structured diff between a VM's configuration and a
/// destination host's capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Incompatibility {
    pub code: IncompatibilityCode,
    /// Human-readable description from the platform.
    pub message: String,
    /// The offending configuration element, when the code concerns a
    /// network adapter.
    pub adapter: Option<String>,
}

impl Incompatibility {
    /// A missing-switch incompatibility for the named adapter.
    pub fn missing_switch(adapter: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: IncompatibilityCode::MissingSwitch,
            message: message.into(),
            adapter: Some(adapter.into()),
        }
    }

    /// An incompatibility the resolver has no rule for.
    pub fn unknown(raw_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: IncompatibilityCode::Unknown(raw_code.into()),
            message: message.into(),
            adapter: None,
        }
    }
}

/// The structured diff gating a migration.
///
/// Produced by comparing the VM against the destination host, mutated only
/// by the compatibility resolver, and discarded at the end of the run. The
/// transfer engine must not proceed past an unresolved report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[non_exhaustive]
pub struct CompatibilityReport {
    pub incompatibilities: Vec<Incompatibility>,
    pub resolved: bool,
    pub unresolved_reasons: Vec<String>,
}

impl CompatibilityReport {
    /// A report with no incompatibilities; resolved from the start.
    #[must_use]
    pub fn clean() -> Self {
        Self {
            incompatibilities: Vec::new(),
            resolved: true,
            unresolved_reasons: Vec::new(),
        }
    }

    /// A report carrying raw incompatibilities, not yet resolved.
    #[must_use]
    pub fn with_incompatibilities(incompatibilities: Vec<Incompatibility>) -> Self {
        let resolved = incompatibilities.is_empty();
        Self {
            incompatibilities,
            resolved,
            unresolved_reasons: Vec::new(),
        }
    }

    /// Records a reason the report cannot be resolved automatically.
    pub fn add_unresolved(&mut self, reason: impl Into<String>) {
        self.unresolved_reasons.push(reason.into());
        self.resolved = false;
    }

    /// Marks the report resolved. Only valid once every incompatibility has
    /// a fix; the resolver is the sole caller.
    pub fn mark_resolved(&mut self) {
        if self.unresolved_reasons.is_empty() {
            self.resolved = true;
        }
    }
}
