//! Error taxonomy of the simulation core.

use crate::registry::SimulationId;

/// Errors returned by the simulation core.
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    /// A config or request parameter is out of range or inconsistent.
    ///
    /// Carries every violated constraint, in field order.
    #[error("validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// No simulation is registered under the given id.
    #[error("simulation not found: {0}")]
    NotFound(SimulationId),

    /// An internal invariant does not hold. This is a programming error.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),
}

impl SimError {
    /// Shorthand for a validation error with a single violation.
    pub fn invalid(msg: impl Into<String>) -> Self {
        SimError::Validation(vec![msg.into()])
    }
}
