//! Shared type definitions for the greenhouse telemetry server.
//!
//! This crate is the single source of truth for the topology records,
//! readings, events and wire messages exchanged between the simulation,
//! the scheduling engine, the session registry and connected clients.
//!
//! # Modules
//!
//! - [`ids`] -- Node, session and user identifiers
//! - [`enums`] -- Sensor/actuator kinds, window levels, event kinds, roles
//! - [`structs`] -- Nodes, patches, commands, snapshots and push payloads
//! - [`protocol`] -- Client/server messages and the line codec

pub mod enums;
pub mod ids;
pub mod protocol;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{
    ActuatorKind, ComponentKind, EventKind, NodeChangeOp, Role, SensorKind, UnknownName,
    WindowLevel,
};
pub use ids::{NodeId, SessionId, UserId};
pub use protocol::{
    ClientMessage, DecodeError, ErrorCode, PROTOCOL_VERSION, RequestId, ServerMessage,
    decode_line, encode_line,
};
pub use structs::{
    Command, Component, Node, NodeChange, NodePatch, NodeSpec, SensorUpdate, Snapshot,
    UserSummary, parse_names,
};
