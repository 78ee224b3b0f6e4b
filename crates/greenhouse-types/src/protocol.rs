//! Line-delimited JSON wire protocol.
//!
//! Every line is one JSON object whose `type` field selects the message.
//! Requests carry a caller-chosen `id` that the reply echoes; unsolicited
//! pushes (`sensor_update`, `node_change`) carry none.
//!
//! Decoding happens in two steps so errors can be classified precisely:
//! the line is first parsed as a JSON object (`INVALID_JSON`), then its
//! `type` is checked against [`ClientMessage::TYPES`] (`UNSUPPORTED`),
//! and only then is the body decoded into a variant (`INVALID_REQUEST`).
//! The request id is recovered from the raw object whenever possible so
//! error replies can still be correlated.

use serde::{Deserialize, Serialize};

use crate::enums::Role;
use crate::ids::{NodeId, SessionId, UserId};
use crate::structs::{
    Component, Node, NodeChange, NodePatch, NodeSpec, SensorUpdate, Snapshot, UserSummary,
};

/// Protocol version reported in `welcome`.
pub const PROTOCOL_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Caller-chosen request id, echoed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    /// Integer id.
    Number(i64),
    /// String id.
    Text(String),
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self::Text(id.to_owned())
    }
}

impl core::fmt::Display for RequestId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// Error codes carried by `error` replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The line is not a JSON object.
    InvalidJson,
    /// Unknown or missing `type`.
    Unsupported,
    /// Known `type` with malformed fields.
    InvalidRequest,
    /// A request other than `hello` arrived before the handshake.
    HandshakeRequired,
    /// The line exceeded the configured maximum length.
    LineTooLong,
    /// A user with that name already exists.
    UserExists,
    /// The referenced user does not exist.
    NotFound,
    /// Server-side failure.
    Internal,
}

// ---------------------------------------------------------------------------
// Client -> server
// ---------------------------------------------------------------------------

/// A request sent by a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    /// Handshake.
    Hello {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Client-chosen identifier, informational.
        #[serde(default)]
        client_id: Option<String>,
        /// User name, informational.
        #[serde(default)]
        user: Option<String>,
        /// Advertised client capabilities.
        #[serde(default)]
        capabilities: Vec<String>,
    },
    /// Request the full node list.
    GetTopology {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
    },
    /// Add subscription filters.
    Subscribe {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Node ids, may include `"*"`.
        #[serde(default)]
        nodes: Vec<String>,
        /// Event names.
        #[serde(default)]
        events: Vec<String>,
    },
    /// Remove subscription filters.
    Unsubscribe {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Node ids, may include `"*"`.
        #[serde(default)]
        nodes: Vec<String>,
        /// Event names.
        #[serde(default)]
        events: Vec<String>,
    },
    /// Create a node.
    CreateNode {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Node description.
        #[serde(default)]
        node: NodeSpec,
    },
    /// Patch a node.
    UpdateNode {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Target node.
        node_id: NodeId,
        /// Changes to apply.
        #[serde(default)]
        patch: NodePatch,
    },
    /// Delete a node.
    DeleteNode {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Target node.
        node_id: NodeId,
    },
    /// Add a sensor or actuator to a node.
    AddComponent {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Target node.
        node_id: NodeId,
        /// Component to add.
        component: Component,
    },
    /// Remove a sensor or actuator from a node.
    RemoveComponent {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Target node.
        node_id: NodeId,
        /// Component to remove.
        component: Component,
    },
    /// Change a node's sampling interval.
    SetSampling {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Target node.
        node_id: NodeId,
        /// New interval in milliseconds.
        interval_ms: u64,
    },
    /// Drive an actuator.
    Command {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Target node.
        node_id: NodeId,
        /// Actuator name.
        target: String,
        /// Verb.
        #[serde(default)]
        action: Option<String>,
        /// Parameters.
        #[serde(default)]
        params: serde_json::Map<String, serde_json::Value>,
    },
    /// Read a node's current snapshot.
    GetLastValues {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Target node.
        node_id: NodeId,
    },
    /// Liveness probe.
    Ping {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
    },
    /// Check credentials.
    Login {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Login name.
        user: String,
        /// Plain-text password.
        password: String,
    },
    /// Create a user.
    RegisterUser {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Login name.
        user: String,
        /// Plain-text password.
        password: String,
        /// Role, `viewer` when absent.
        #[serde(default)]
        role: Option<Role>,
    },
    /// List users.
    ListUsers {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
    },
    /// Change a user's password and/or role.
    UpdateUser {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Target user.
        user_id: UserId,
        /// New password.
        #[serde(default)]
        password: Option<String>,
        /// New role.
        #[serde(default)]
        role: Option<Role>,
    },
    /// Delete a user.
    DeleteUser {
        /// Request id.
        #[serde(default)]
        id: Option<RequestId>,
        /// Target user.
        user_id: UserId,
    },
}

impl ClientMessage {
    /// Every `type` value a client may send.
    pub const TYPES: [&'static str; 18] = [
        "hello",
        "get_topology",
        "subscribe",
        "unsubscribe",
        "create_node",
        "update_node",
        "delete_node",
        "add_component",
        "remove_component",
        "set_sampling",
        "command",
        "get_last_values",
        "ping",
        "login",
        "register_user",
        "list_users",
        "update_user",
        "delete_user",
    ];

    /// The request id, if the client sent one.
    pub const fn id(&self) -> Option<&RequestId> {
        match self {
            Self::Hello { id, .. }
            | Self::GetTopology { id }
            | Self::Subscribe { id, .. }
            | Self::Unsubscribe { id, .. }
            | Self::CreateNode { id, .. }
            | Self::UpdateNode { id, .. }
            | Self::DeleteNode { id, .. }
            | Self::AddComponent { id, .. }
            | Self::RemoveComponent { id, .. }
            | Self::SetSampling { id, .. }
            | Self::Command { id, .. }
            | Self::GetLastValues { id, .. }
            | Self::Ping { id }
            | Self::Login { id, .. }
            | Self::RegisterUser { id, .. }
            | Self::ListUsers { id }
            | Self::UpdateUser { id, .. }
            | Self::DeleteUser { id, .. } => id.as_ref(),
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> client
// ---------------------------------------------------------------------------

/// A message written by the server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    /// Greeting on accept, and handshake reply.
    Welcome {
        /// Echoed `hello` id; absent on the unsolicited greeting.
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<RequestId>,
        /// Server name.
        server: String,
        /// Protocol version.
        version: String,
        /// Session registered by the handshake.
        #[serde(skip_serializing_if = "Option::is_none")]
        session_id: Option<SessionId>,
    },
    /// Reply to `get_topology`.
    Topology {
        /// Echoed id.
        id: Option<RequestId>,
        /// Point-in-time node list.
        nodes: Vec<Node>,
    },
    /// Generic success reply.
    Ack {
        /// Echoed id.
        id: Option<RequestId>,
        /// Node created by `create_node`.
        #[serde(skip_serializing_if = "Option::is_none")]
        node_id: Option<NodeId>,
        /// User created by `register_user`.
        #[serde(skip_serializing_if = "Option::is_none")]
        user_id: Option<UserId>,
    },
    /// Reply to `get_last_values`; snapshot keys are inlined, and absent
    /// for an unknown node.
    LastValues {
        /// Echoed id.
        id: Option<RequestId>,
        /// Queried node.
        node_id: NodeId,
        /// Current snapshot.
        #[serde(flatten)]
        values: Option<Snapshot>,
    },
    /// Reply to `ping`.
    Pong {
        /// Echoed id.
        id: Option<RequestId>,
    },
    /// Reply to `login`.
    LoginResult {
        /// Echoed id.
        id: Option<RequestId>,
        /// Whether the credentials matched.
        ok: bool,
    },
    /// Reply to `list_users`.
    Users {
        /// Echoed id.
        id: Option<RequestId>,
        /// Registered users.
        users: Vec<UserSummary>,
    },
    /// Failure reply.
    Error {
        /// Echoed id when it could be parsed, `null` otherwise.
        id: Option<RequestId>,
        /// Machine-readable code.
        code: ErrorCode,
        /// Human-readable description.
        message: String,
    },
    /// Periodic readings push.
    SensorUpdate(SensorUpdate),
    /// Topology change push.
    NodeChange(NodeChange),
}

impl ServerMessage {
    /// Plain acknowledgement.
    pub const fn ack(id: Option<RequestId>) -> Self {
        Self::Ack {
            id,
            node_id: None,
            user_id: None,
        }
    }

    /// Error reply.
    pub fn error(id: Option<RequestId>, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error {
            id,
            code,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Codec
// ---------------------------------------------------------------------------

/// A line that could not be decoded into a [`ClientMessage`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct DecodeError {
    /// Request id recovered from the raw line, if any.
    pub id: Option<RequestId>,
    /// Classification of the failure.
    pub code: ErrorCode,
    /// Description for the client.
    pub message: String,
}

impl DecodeError {
    /// Turn the failure into the `error` reply sent to the client.
    pub fn into_message(self) -> ServerMessage {
        ServerMessage::Error {
            id: self.id,
            code: self.code,
            message: self.message,
        }
    }
}

/// Decode one protocol line.
pub fn decode_line(line: &str) -> Result<ClientMessage, DecodeError> {
    let value: serde_json::Value = serde_json::from_str(line.trim()).map_err(|e| DecodeError {
        id: None,
        code: ErrorCode::InvalidJson,
        message: format!("malformed JSON: {e}"),
    })?;

    let Some(object) = value.as_object() else {
        return Err(DecodeError {
            id: None,
            code: ErrorCode::InvalidJson,
            message: String::from("expected a JSON object"),
        });
    };

    let id = object
        .get("id")
        .and_then(|raw| RequestId::deserialize(raw).ok());

    let Some(kind) = object
        .get("type")
        .and_then(serde_json::Value::as_str)
        .map(str::to_owned)
    else {
        return Err(DecodeError {
            id,
            code: ErrorCode::Unsupported,
            message: String::from("missing message type"),
        });
    };

    if !ClientMessage::TYPES.contains(&kind.as_str()) {
        return Err(DecodeError {
            id,
            code: ErrorCode::Unsupported,
            message: format!("unsupported message type: {kind}"),
        });
    }

    serde_json::from_value(value).map_err(|e| DecodeError {
        id,
        code: ErrorCode::InvalidRequest,
        message: format!("invalid {kind} request: {e}"),
    })
}

/// Encode one server message as a newline-terminated line.
pub fn encode_line(message: &ServerMessage) -> Result<String, serde_json::Error> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
