//! Connected sessions and subscription-filtered fan-out.
//!
//! Every session owns a bounded queue of encoded lines, drained by its
//! connection's writer task. Broadcasts encode a message once, pick the
//! sessions whose [`Subscriptions`] match, and push with `try_send`, so a
//! slow client only loses its own messages and never stalls the caller.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use greenhouse_types::{
    EventKind, NodeChange, SensorUpdate, ServerMessage, SessionId, encode_line, parse_names,
};
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

/// Node filter matching every node.
pub const WILDCARD: &str = "*";

/// Per-session interest, kept independently for each event kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Subscriptions {
    by_event: BTreeMap<EventKind, BTreeSet<String>>,
}

impl Subscriptions {
    /// Add node filters to each listed event kind. An empty `nodes` list
    /// subscribes to [`WILDCARD`].
    pub fn subscribe(&mut self, events: &[EventKind], nodes: &[String]) {
        for event in events {
            let filters = self.by_event.entry(*event).or_default();
            if nodes.is_empty() {
                filters.insert(String::from(WILDCARD));
            } else {
                filters.extend(nodes.iter().cloned());
            }
        }
    }

    /// Remove node filters from each listed event kind, leaving other
    /// kinds untouched. An empty `nodes` list clears every specific node
    /// filter of the kind.
    ///
    /// The wildcard is only removed when `"*"` itself is listed.
    pub fn unsubscribe(&mut self, events: &[EventKind], nodes: &[String]) {
        for event in events {
            let Some(filters) = self.by_event.get_mut(event) else {
                continue;
            };
            if nodes.is_empty() {
                filters.retain(|node| node == WILDCARD);
            } else {
                for node in nodes {
                    filters.remove(node);
                }
            }
            if filters.is_empty() {
                self.by_event.remove(event);
            }
        }
    }

    /// Whether a message of `event` about `node_id` should be delivered.
    pub fn interested_in(&self, event: EventKind, node_id: &str) -> bool {
        self.by_event
            .get(&event)
            .is_some_and(|filters| filters.contains(WILDCARD) || filters.contains(node_id))
    }

    /// Node filters registered for one event kind.
    pub fn nodes_for(&self, event: EventKind) -> Option<&BTreeSet<String>> {
        self.by_event.get(&event)
    }

    /// Whether nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.by_event.is_empty()
    }
}

/// Resolve wire event names. An empty list means every event kind;
/// unknown names are logged and skipped.
pub fn resolve_events(names: &[String]) -> Vec<EventKind> {
    if names.is_empty() {
        return EventKind::ALL.to_vec();
    }
    let (events, rejected) = parse_names::<EventKind>(names);
    if !rejected.is_empty() {
        warn!(?rejected, "Ignoring unknown event names");
    }
    events
}

#[derive(Debug)]
struct SessionEntry {
    subscriptions: Subscriptions,
    sender: mpsc::Sender<String>,
}

/// Owns every connected session.
#[derive(Debug, Default)]
pub struct ClientRegistry {
    sessions: RwLock<HashMap<SessionId, SessionEntry>>,
}

impl ClientRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session with no subscriptions.
    pub async fn add_session(&self, sender: mpsc::Sender<String>) -> SessionId {
        let id = SessionId::new();
        self.sessions.write().await.insert(
            id,
            SessionEntry {
                subscriptions: Subscriptions::default(),
                sender,
            },
        );
        info!(session_id = %id, "Session registered");
        id
    }

    /// Drop a session. Returns whether it was registered.
    pub async fn remove_session(&self, id: SessionId) -> bool {
        let removed = self.sessions.write().await.remove(&id).is_some();
        if removed {
            info!(session_id = %id, "Session removed");
        }
        removed
    }

    /// Number of registered sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Add filters to a session. Returns `false` for an unknown session.
    pub async fn subscribe(&self, id: SessionId, events: &[EventKind], nodes: &[String]) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&id) else {
            return false;
        };
        entry.subscriptions.subscribe(events, nodes);
        debug!(session_id = %id, ?events, ?nodes, "Subscribed");
        true
    }

    /// Remove filters from a session. Returns `false` for an unknown
    /// session.
    pub async fn unsubscribe(&self, id: SessionId, events: &[EventKind], nodes: &[String]) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(entry) = sessions.get_mut(&id) else {
            return false;
        };
        entry.subscriptions.unsubscribe(events, nodes);
        debug!(session_id = %id, ?events, ?nodes, "Unsubscribed");
        true
    }

    /// Copy of a session's filters.
    pub async fn subscriptions(&self, id: SessionId) -> Option<Subscriptions> {
        self.sessions
            .read()
            .await
            .get(&id)
            .map(|entry| entry.subscriptions.clone())
    }

    /// Queue a line for one session. Returns whether it was queued.
    pub async fn send_to(&self, id: SessionId, line: String) -> bool {
        let sender = self.sessions.read().await.get(&id).map(|e| e.sender.clone());
        let Some(sender) = sender else {
            return false;
        };
        match sender.try_send(line) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.remove_session(id).await;
                false
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(session_id = %id, "Slow consumer, dropping reply");
                false
            }
        }
    }

    /// Deliver a topology change to interested sessions. Returns the
    /// number of sessions it was queued for.
    pub async fn broadcast(&self, change: &NodeChange) -> usize {
        let message = ServerMessage::NodeChange(change.clone());
        self.fan_out(EventKind::NodeChange, change.node_id.as_str(), &message)
            .await
    }

    /// Deliver a sensor update to interested sessions. Returns the number
    /// of sessions it was queued for.
    pub async fn broadcast_sensor_update(&self, update: &SensorUpdate) -> usize {
        let message = ServerMessage::SensorUpdate(update.clone());
        self.fan_out(EventKind::SensorUpdate, update.node_id.as_str(), &message)
            .await
    }

    async fn fan_out(&self, event: EventKind, node_id: &str, message: &ServerMessage) -> usize {
        let targets: Vec<(SessionId, mpsc::Sender<String>)> = {
            let sessions = self.sessions.read().await;
            sessions
                .iter()
                .filter(|(_, entry)| entry.subscriptions.interested_in(event, node_id))
                .map(|(id, entry)| (*id, entry.sender.clone()))
                .collect()
        };
        if targets.is_empty() {
            return 0;
        }

        let line = match encode_line(message) {
            Ok(line) => line,
            Err(err) => {
                warn!(event = event.as_str(), node_id, error = %err, "Failed to encode broadcast");
                return 0;
            }
        };

        let mut delivered = 0_usize;
        let mut closed = Vec::new();
        for (id, sender) in targets {
            match sender.try_send(line.clone()) {
                Ok(()) => delivered = delivered.saturating_add(1),
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(id),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(
                        session_id = %id,
                        event = event.as_str(),
                        "Slow consumer, dropping message"
                    );
                }
            }
        }

        if !closed.is_empty() {
            let mut sessions = self.sessions.write().await;
            for id in closed {
                sessions.remove(&id);
                debug!(session_id = %id, "Removed session with closed channel");
            }
        }
        delivered
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn nodes(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| String::from(*s)).collect()
    }

    #[test]
    fn interest_requires_event_and_node() {
        let mut subs = Subscriptions::default();
        subs.subscribe(&[EventKind::SensorUpdate], &nodes(&["node-2"]));
        assert!(subs.interested_in(EventKind::SensorUpdate, "node-2"));
        assert!(!subs.interested_in(EventKind::SensorUpdate, "node-1"));
        assert!(!subs.interested_in(EventKind::NodeChange, "node-2"));
    }

    #[test]
    fn empty_nodes_means_wildcard() {
        let mut subs = Subscriptions::default();
        subs.subscribe(&[EventKind::NodeChange], &[]);
        assert!(subs.interested_in(EventKind::NodeChange, "anything"));
    }

    #[test]
    fn unsubscribe_is_per_event_kind() {
        let mut subs = Subscriptions::default();
        subs.subscribe(&EventKind::ALL, &nodes(&["a", "b"]));
        subs.unsubscribe(&[EventKind::SensorUpdate], &nodes(&["a"]));
        assert!(!subs.interested_in(EventKind::SensorUpdate, "a"));
        assert!(subs.interested_in(EventKind::SensorUpdate, "b"));
        assert!(subs.interested_in(EventKind::NodeChange, "a"));
    }

    #[test]
    fn unsubscribing_a_node_keeps_wildcard() {
        let mut subs = Subscriptions::default();
        subs.subscribe(&[EventKind::SensorUpdate], &nodes(&["*", "a"]));
        subs.unsubscribe(&[EventKind::SensorUpdate], &nodes(&["a"]));
        assert!(subs.interested_in(EventKind::SensorUpdate, "a"));
        subs.unsubscribe(&[EventKind::SensorUpdate], &nodes(&["*"]));
        assert!(!subs.interested_in(EventKind::SensorUpdate, "a"));
        assert!(subs.is_empty());
    }

    #[test]
    fn unsubscribe_without_nodes_clears_specific_filters() {
        let mut subs = Subscriptions::default();
        subs.subscribe(&EventKind::ALL, &nodes(&["a"]));
        subs.unsubscribe(&[EventKind::NodeChange], &[]);
        assert!(subs.nodes_for(EventKind::NodeChange).is_none());
        assert!(subs.interested_in(EventKind::SensorUpdate, "a"));
    }

    #[test]
    fn unsubscribe_without_nodes_keeps_wildcard() {
        let mut subs = Subscriptions::default();
        subs.subscribe(&[EventKind::SensorUpdate], &nodes(&["*", "a"]));
        subs.unsubscribe(&[EventKind::SensorUpdate], &[]);
        let filters = subs.nodes_for(EventKind::SensorUpdate).unwrap();
        assert_eq!(filters.len(), 1);
        assert!(filters.contains(WILDCARD));
        assert!(subs.interested_in(EventKind::SensorUpdate, "b"));
    }

    #[test]
    fn resolve_events_defaults_to_all() {
        assert_eq!(resolve_events(&[]), EventKind::ALL.to_vec());
        assert_eq!(
            resolve_events(&nodes(&["node_change", "bogus"])),
            vec![EventKind::NodeChange]
        );
    }

    #[tokio::test]
    async fn full_queue_drops_only_for_that_session() {
        let registry = ClientRegistry::new();
        let (slow_tx, _slow_rx) = mpsc::channel(1);
        let (fast_tx, mut fast_rx) = mpsc::channel(8);
        let slow = registry.add_session(slow_tx).await;
        let fast = registry.add_session(fast_tx).await;
        for id in [slow, fast] {
            registry.subscribe(id, &[EventKind::NodeChange], &[]).await;
        }

        let change = NodeChange::removed("n1".into());
        assert_eq!(registry.broadcast(&change).await, 2);
        assert_eq!(registry.broadcast(&change).await, 1);
        assert_eq!(registry.session_count().await, 2);
        assert!(fast_rx.try_recv().is_ok());
        assert!(fast_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn closed_session_is_pruned_on_broadcast() {
        let registry = ClientRegistry::new();
        let (tx, rx) = mpsc::channel(4);
        let id = registry.add_session(tx).await;
        registry.subscribe(id, &[EventKind::NodeChange], &[]).await;
        drop(rx);
        assert_eq!(registry.broadcast(&NodeChange::removed("n1".into())).await, 0);
        assert_eq!(registry.session_count().await, 0);
        assert!(!registry.remove_session(id).await);
    }
}
