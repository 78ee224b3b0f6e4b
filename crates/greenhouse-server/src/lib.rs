//! TCP front end of the greenhouse telemetry server.
//!
//! Clients speak newline-delimited JSON over a plain TCP socket. Each
//! connection performs a `hello` handshake, then issues topology, control
//! and subscription requests; subscribed sessions receive `sensor_update`
//! and `node_change` pushes.
//!
//! # Modules
//!
//! - [`registry`] -- [`ClientRegistry`], sessions and their subscription
//!   filters, and the broadcast fan-out.
//! - [`dispatcher`] -- per-connection state machine and request handling.
//! - [`connection`] -- reader/writer tasks for one socket.
//! - [`server`] -- listener and accept loop.
//! - [`users`] -- [`UserService`] and the file-backed store.
//! - [`error`] -- [`ServerError`] and [`UserError`].
//!
//! [`ClientRegistry`]: registry::ClientRegistry
//! [`UserService`]: users::UserService
//! [`ServerError`]: error::ServerError
//! [`UserError`]: error::UserError

pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod registry;
pub mod server;
pub mod users;

pub use connection::ConnectionSettings;
pub use dispatcher::{Connection, Dispatcher, Phase};
pub use error::{ServerError, UserError};
pub use registry::{ClientRegistry, Subscriptions, WILDCARD};
pub use server::{ServerConfig, bind, local_addr, serve};
pub use users::{FileUserService, UserService};
