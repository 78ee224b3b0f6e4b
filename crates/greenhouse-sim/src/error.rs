//! Error types for the `greenhouse-sim` crate.
//!
//! These are invariant violations: the caller passed input the
//! simulation refuses to coerce.

/// Errors that can occur while stepping a simulation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SimError {
    /// `step` was called without a window level.
    #[error("invalid argument: window level is required")]
    MissingWindowLevel,

    /// `step` was called with a negative or NaN time step.
    #[error("invalid argument: time step must be a non-negative number, got {0}")]
    InvalidTimeStep(f64),
}
