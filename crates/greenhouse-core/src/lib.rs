//! Node topology, sampling scheduler and configuration for the greenhouse
//! server.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `greenhouse-config.yaml` into
//!   strongly-typed structs.
//! - [`nodes`] -- [`NodeManager`], the owner of node records and their
//!   simulation runtimes.
//! - [`engine`] -- [`SensorEngine`], one reschedulable ticker per node,
//!   emitting into an [`UpdateSink`].
//!
//! [`NodeManager`]: nodes::NodeManager
//! [`SensorEngine`]: engine::SensorEngine
//! [`UpdateSink`]: engine::UpdateSink

pub mod config;
pub mod engine;
pub mod nodes;

pub use config::{ConfigError, GreenhouseConfig, LogFormat};
pub use engine::{SensorEngine, UpdateSink};
pub use nodes::{NodeManager, RuntimeHandle};
