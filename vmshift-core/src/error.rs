/// Errors produced by the `vmshift-core` crate.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CoreError {
    /// A migration plan failed pre-flight validation that needs no remote
    /// call.
    #[error("invalid migration plan: {reason}")]
    InvalidPlan { reason: String },

    /// A VM identifier could not be parsed.
    #[error("invalid vm id '{raw}': {reason}")]
    InvalidVmId { raw: String, reason: String },
}
