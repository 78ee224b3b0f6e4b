//! Physical simulation for the greenhouse telemetry server.
//!
//! # Modules
//!
//! - [`environment`] -- [`EnvironmentState`], the four physical readings of
//!   one node and the `step` function that advances them.
//! - [`runtime`] -- [`NodeRuntime`], one node's environment plus actuator,
//!   window and sampling state.
//! - [`error`] -- Invalid-argument failures of `step`.

pub mod environment;
pub mod error;
pub mod runtime;

// Re-export primary types at crate root.
pub use environment::EnvironmentState;
pub use error::SimError;
pub use runtime::{DEFAULT_SAMPLING_INTERVAL_MS, NodeRuntime};
