//! Per-connection protocol state machine and request dispatch.
//!
//! A [`Connection`] starts in [`Phase::Handshaking`]. The first `hello`
//! registers a session in the [`ClientRegistry`] and moves it to
//! [`Phase::Active`]; any other request before that is refused with
//! `HANDSHAKE_REQUIRED`. Replies are queued on the connection's own line
//! queue before any broadcast the request triggers, so a client sees its
//! `ack` ahead of the matching `node_change`.

use std::sync::Arc;

use greenhouse_core::{NodeManager, SensorEngine};
use greenhouse_types::{
    ClientMessage, Command, ErrorCode, Node, NodeChange, NodeId, NodeSpec, PROTOCOL_VERSION,
    RequestId, ServerMessage, SessionId, UserId, decode_line, encode_line,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::UserError;
use crate::registry::{ClientRegistry, resolve_events};
use crate::users::UserService;

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for `hello`.
    Handshaking,
    /// Session registered.
    Active(SessionId),
    /// Session removed; nothing more is dispatched.
    Closed,
}

/// State of one client connection.
#[derive(Debug)]
pub struct Connection {
    phase: Phase,
    sender: mpsc::Sender<String>,
}

impl Connection {
    /// A fresh connection writing into `sender`.
    pub const fn new(sender: mpsc::Sender<String>) -> Self {
        Self {
            phase: Phase::Handshaking,
            sender,
        }
    }

    /// Current phase.
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Session id once the handshake completed.
    pub const fn session_id(&self) -> Option<SessionId> {
        match self.phase {
            Phase::Active(id) => Some(id),
            Phase::Handshaking | Phase::Closed => None,
        }
    }

    /// The outbound line queue.
    pub const fn sender(&self) -> &mpsc::Sender<String> {
        &self.sender
    }

    /// Queue a message. Returns `false` once the writer side is gone.
    pub async fn send(&self, message: &ServerMessage) -> bool {
        match encode_line(message) {
            Ok(line) => self.sender.send(line).await.is_ok(),
            Err(err) => {
                error!(error = %err, "Failed to encode reply");
                true
            }
        }
    }
}

/// Shared services every connection dispatches into.
pub struct Dispatcher {
    nodes: Arc<NodeManager>,
    engine: Arc<SensorEngine>,
    registry: Arc<ClientRegistry>,
    users: Arc<dyn UserService>,
    server_name: String,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Wire the dispatcher to its collaborators.
    pub fn new(
        nodes: Arc<NodeManager>,
        engine: Arc<SensorEngine>,
        registry: Arc<ClientRegistry>,
        users: Arc<dyn UserService>,
        server_name: impl Into<String>,
    ) -> Self {
        Self {
            nodes,
            engine,
            registry,
            users,
            server_name: server_name.into(),
        }
    }

    /// The session registry.
    pub const fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// A `welcome` message.
    pub fn welcome(&self, id: Option<RequestId>, session_id: Option<SessionId>) -> ServerMessage {
        ServerMessage::Welcome {
            id,
            server: self.server_name.clone(),
            version: String::from(PROTOCOL_VERSION),
            session_id,
        }
    }

    /// Handle one inbound line. Blank lines are ignored. Returns `false`
    /// once the connection can no longer be written to.
    pub async fn handle_line(&self, conn: &mut Connection, line: &str) -> bool {
        if line.trim().is_empty() {
            return true;
        }
        match decode_line(line) {
            Ok(message) => self.handle_message(conn, message).await,
            Err(err) => {
                debug!(code = ?err.code, error = %err.message, "Rejected line");
                conn.send(&err.into_message()).await
            }
        }
    }

    /// Handle one decoded request.
    pub async fn handle_message(&self, conn: &mut Connection, message: ClientMessage) -> bool {
        let session = match (conn.phase, &message) {
            (Phase::Closed, _) => return false,
            (Phase::Handshaking, ClientMessage::Hello { id, client_id, user, .. }) => {
                let session = self.registry.add_session(conn.sender.clone()).await;
                conn.phase = Phase::Active(session);
                info!(
                    session_id = %session,
                    client_id = client_id.as_deref().unwrap_or(""),
                    user = user.as_deref().unwrap_or(""),
                    "Handshake complete"
                );
                return conn.send(&self.welcome(id.clone(), Some(session))).await;
            }
            (Phase::Handshaking, other) => {
                let reply = ServerMessage::error(
                    other.id().cloned(),
                    ErrorCode::HandshakeRequired,
                    "send hello first",
                );
                return conn.send(&reply).await;
            }
            (Phase::Active(session), _) => session,
        };

        match message {
            ClientMessage::Hello { id, .. } => conn.send(&self.welcome(id, Some(session))).await,
            ClientMessage::GetTopology { id } => {
                let nodes = self.nodes.get_all_nodes().await;
                conn.send(&ServerMessage::Topology { id, nodes }).await
            }
            ClientMessage::Subscribe { id, nodes, events } => {
                let events = resolve_events(&events);
                self.registry.subscribe(session, &events, &nodes).await;
                conn.send(&ServerMessage::ack(id)).await
            }
            ClientMessage::Unsubscribe { id, nodes, events } => {
                let events = resolve_events(&events);
                self.registry.unsubscribe(session, &events, &nodes).await;
                conn.send(&ServerMessage::ack(id)).await
            }
            ClientMessage::CreateNode { id, node } => self.create_node(conn, id, node).await,
            ClientMessage::UpdateNode { id, node_id, patch } => {
                let changed = !patch.is_empty();
                let updated = self.nodes.update_node(&node_id, patch).await;
                self.ack_with_update(conn, id, updated.filter(|_| changed)).await
            }
            ClientMessage::DeleteNode { id, node_id } => self.delete_node(conn, id, node_id).await,
            ClientMessage::AddComponent { id, node_id, component } => {
                let updated = self.nodes.add_component(&node_id, &component).await;
                self.ack_with_update(conn, id, updated).await
            }
            ClientMessage::RemoveComponent { id, node_id, component } => {
                let updated = self.nodes.remove_component(&node_id, &component).await;
                self.ack_with_update(conn, id, updated).await
            }
            ClientMessage::SetSampling { id, node_id, interval_ms } => {
                if self.nodes.set_sampling_interval(&node_id, interval_ms).await {
                    self.engine.reschedule_node(&node_id).await;
                }
                conn.send(&ServerMessage::ack(id)).await
            }
            ClientMessage::Command { id, node_id, target, action, params } => {
                let command = Command { node_id, target, action, params };
                self.nodes.execute_command(&command).await;
                conn.send(&ServerMessage::ack(id)).await
            }
            ClientMessage::GetLastValues { id, node_id } => {
                let values = self.nodes.snapshot(&node_id).await;
                conn.send(&ServerMessage::LastValues { id, node_id, values }).await
            }
            ClientMessage::Ping { id } => conn.send(&ServerMessage::Pong { id }).await,
            ClientMessage::Login { id, user, password } => {
                conn.send(&self.login(session, id, user, password).await).await
            }
            ClientMessage::RegisterUser { id, user, password, role } => {
                let role = role.unwrap_or_default();
                let result = self
                    .with_users(move |users| users.register_user(&user, &password, role))
                    .await;
                conn.send(&registration_reply(id, result)).await
            }
            ClientMessage::ListUsers { id } => conn.send(&self.list_users(id).await).await,
            ClientMessage::UpdateUser { id, user_id, password, role } => {
                let result = self
                    .with_users(move |users| users.update_user(user_id, password.as_deref(), role))
                    .await;
                conn.send(&user_result_reply(id, result)).await
            }
            ClientMessage::DeleteUser { id, user_id } => {
                let result = self.with_users(move |users| users.delete_user(user_id)).await;
                conn.send(&user_result_reply(id, result)).await
            }
        }
    }

    async fn login(
        &self,
        session: SessionId,
        id: Option<RequestId>,
        user: String,
        password: String,
    ) -> ServerMessage {
        let name = user.clone();
        match self
            .with_users(move |users| users.validate_user(&user, &password))
            .await
        {
            Some(ok) => {
                info!(session_id = %session, user = name, ok, "Login attempt");
                ServerMessage::LoginResult { id, ok }
            }
            None => internal_error(id),
        }
    }

    async fn list_users(&self, id: Option<RequestId>) -> ServerMessage {
        match self.with_users(|users| users.get_all_users()).await {
            Some(users) => ServerMessage::Users { id, users },
            None => internal_error(id),
        }
    }

    /// Run a user store call on the blocking pool. `None` when the call
    /// panicked or was cancelled.
    async fn with_users<T, F>(&self, call: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&dyn UserService) -> T + Send + 'static,
    {
        let users = Arc::clone(&self.users);
        match tokio::task::spawn_blocking(move || call(users.as_ref())).await {
            Ok(value) => Some(value),
            Err(err) => {
                error!(error = %err, "User store call failed");
                None
            }
        }
    }

    async fn create_node(&self, conn: &Connection, id: Option<RequestId>, spec: NodeSpec) -> bool {
        let node_id = self.nodes.add_node(spec).await;
        self.engine.schedule_node(&node_id).await;
        let reply = ServerMessage::Ack {
            id,
            node_id: Some(node_id.clone()),
            user_id: None,
        };
        let open = conn.send(&reply).await;
        if let Some(node) = self.nodes.get_node(&node_id).await {
            self.registry.broadcast(&NodeChange::added(node)).await;
        }
        open
    }

    async fn delete_node(&self, conn: &Connection, id: Option<RequestId>, node_id: NodeId) -> bool {
        self.engine.on_node_removed(&node_id);
        let removed = self.nodes.delete_node(&node_id).await;
        let open = conn.send(&ServerMessage::ack(id)).await;
        if removed.is_some() {
            self.registry.broadcast(&NodeChange::removed(node_id)).await;
        }
        open
    }

    async fn ack_with_update(
        &self,
        conn: &Connection,
        id: Option<RequestId>,
        updated: Option<Node>,
    ) -> bool {
        let open = conn.send(&ServerMessage::ack(id)).await;
        if let Some(node) = updated {
            self.registry.broadcast(&NodeChange::updated(node)).await;
        }
        open
    }

    /// Unregister the connection's session, if any.
    pub async fn disconnect(&self, conn: &mut Connection) {
        if let Phase::Active(session) = conn.phase {
            self.registry.remove_session(session).await;
        }
        conn.phase = Phase::Closed;
    }
}

fn registration_reply(
    id: Option<RequestId>,
    result: Option<Result<UserId, UserError>>,
) -> ServerMessage {
    match result {
        Some(Ok(user_id)) => ServerMessage::Ack {
            id,
            node_id: None,
            user_id: Some(user_id),
        },
        Some(Err(err)) => user_error_reply(id, &err),
        None => internal_error(id),
    }
}

fn user_result_reply(
    id: Option<RequestId>,
    result: Option<Result<bool, UserError>>,
) -> ServerMessage {
    match result {
        Some(Ok(true)) => ServerMessage::ack(id),
        Some(Ok(false)) => ServerMessage::error(id, ErrorCode::NotFound, "unknown user"),
        Some(Err(err)) => user_error_reply(id, &err),
        None => internal_error(id),
    }
}

fn internal_error(id: Option<RequestId>) -> ServerMessage {
    ServerMessage::error(id, ErrorCode::Internal, "user store unavailable")
}

fn user_error_reply(id: Option<RequestId>, err: &UserError) -> ServerMessage {
    match err {
        UserError::Duplicate(_) => ServerMessage::error(id, ErrorCode::UserExists, err.to_string()),
        UserError::Io(_) | UserError::Json(_) => {
            warn!(error = %err, "User store failure");
            internal_error(id)
        }
    }
}
