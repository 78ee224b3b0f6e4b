//! Topology and per-node runtime ownership.
//!
//! [`NodeManager`] is the single source of truth for which nodes exist. It
//! stores each [`Node`] record next to the [`NodeRuntime`] that backs it,
//! so the two are created and destroyed together. Callers receive copies
//! of records and snapshots; the only shared handle handed out is the
//! runtime mutex, used by the sampling engine to step a node.
//!
//! Operations on unknown ids are logged and complete without effect.

use std::collections::HashMap;
use std::sync::Arc;

use greenhouse_sim::NodeRuntime;
use greenhouse_types::{
    ActuatorKind, Command, Component, ComponentKind, Node, NodeId, NodePatch, NodeSpec, SensorKind,
    Snapshot, parse_names,
};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// Shared handle to one node's runtime.
pub type RuntimeHandle = Arc<Mutex<NodeRuntime>>;

#[derive(Debug)]
struct NodeEntry {
    node: Node,
    runtime: RuntimeHandle,
}

/// Owns the node topology and the runtime paired with each node.
#[derive(Debug)]
pub struct NodeManager {
    nodes: RwLock<HashMap<NodeId, NodeEntry>>,
    default_interval_ms: u64,
}

impl Default for NodeManager {
    fn default() -> Self {
        Self::new(greenhouse_sim::DEFAULT_SAMPLING_INTERVAL_MS)
    }
}

impl NodeManager {
    /// Create an empty manager. New nodes start with `default_interval_ms`.
    pub fn new(default_interval_ms: u64) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            default_interval_ms,
        }
    }

    /// Create a node and its runtime, returning the node id.
    ///
    /// A missing or blank id is generated. A requested id that is already
    /// taken is replaced by a generated one. Missing lists default to
    /// empty and unknown sensor/actuator names are dropped, so creation
    /// never fails.
    pub async fn add_node(&self, spec: NodeSpec) -> NodeId {
        let (sensor_types, rejected_sensors) =
            parse_names::<SensorKind>(spec.sensors.as_deref().unwrap_or_default());
        let (actuator_types, rejected_actuators) =
            parse_names::<ActuatorKind>(spec.actuators.as_deref().unwrap_or_default());
        if !rejected_sensors.is_empty() || !rejected_actuators.is_empty() {
            warn!(
                ?rejected_sensors,
                ?rejected_actuators,
                "Dropping unknown component names"
            );
        }

        let mut nodes = self.nodes.write().await;
        let id = match spec.id {
            Some(requested) if requested.as_str().trim().is_empty() => NodeId::generate(),
            Some(requested) if nodes.contains_key(&requested) => {
                let fresh = NodeId::generate();
                warn!(requested = %requested, assigned = %fresh, "Node id already taken");
                fresh
            }
            Some(requested) => requested,
            None => NodeId::generate(),
        };

        let node = Node {
            id: id.clone(),
            name: spec.name.unwrap_or_default(),
            location: spec.location.unwrap_or_default(),
            ip: spec.ip.unwrap_or_default(),
            sensor_types,
            actuator_types,
        };
        let runtime = NodeRuntime::with_interval(id.clone(), self.default_interval_ms);
        nodes.insert(
            id.clone(),
            NodeEntry {
                node,
                runtime: Arc::new(Mutex::new(runtime)),
            },
        );
        info!(node_id = %id, "Node added");
        id
    }

    /// Point-in-time copy of every node record, ordered by id.
    pub async fn get_all_nodes(&self) -> Vec<Node> {
        let nodes = self.nodes.read().await;
        let mut all: Vec<Node> = nodes.values().map(|entry| entry.node.clone()).collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all
    }

    /// Copy of one node record.
    pub async fn get_node(&self, id: &NodeId) -> Option<Node> {
        self.nodes.read().await.get(id).map(|entry| entry.node.clone())
    }

    /// Whether a node with this id exists.
    pub async fn contains(&self, id: &NodeId) -> bool {
        self.nodes.read().await.contains_key(id)
    }

    /// Number of nodes.
    pub async fn len(&self) -> usize {
        self.nodes.read().await.len()
    }

    /// Whether there are no nodes.
    pub async fn is_empty(&self) -> bool {
        self.nodes.read().await.is_empty()
    }

    /// Ids of all nodes, sorted.
    pub async fn node_ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Apply a patch and return the updated record.
    ///
    /// `name`, `location` and `ip` are set when present; `sensors` and
    /// `actuators` replace the whole list when present.
    pub async fn update_node(&self, id: &NodeId, patch: NodePatch) -> Option<Node> {
        let mut nodes = self.nodes.write().await;
        let Some(entry) = nodes.get_mut(id) else {
            warn!(node_id = %id, "update_node: unknown node");
            return None;
        };
        let node = &mut entry.node;
        if let Some(name) = patch.name {
            node.name = name;
        }
        if let Some(location) = patch.location {
            node.location = location;
        }
        if let Some(ip) = patch.ip {
            node.ip = ip;
        }
        if let Some(sensors) = patch.sensors {
            let (parsed, rejected) = parse_names::<SensorKind>(&sensors);
            if !rejected.is_empty() {
                warn!(node_id = %id, ?rejected, "Dropping unknown sensor names");
            }
            node.sensor_types = parsed;
        }
        if let Some(actuators) = patch.actuators {
            let (parsed, rejected) = parse_names::<ActuatorKind>(&actuators);
            if !rejected.is_empty() {
                warn!(node_id = %id, ?rejected, "Dropping unknown actuator names");
            }
            node.actuator_types = parsed;
        }
        debug!(node_id = %id, "Node updated");
        Some(node.clone())
    }

    /// Remove a node and its runtime, returning the removed record.
    ///
    /// Stopping the node's ticker and announcing the removal are the
    /// caller's job.
    pub async fn delete_node(&self, id: &NodeId) -> Option<Node> {
        let removed = self.nodes.write().await.remove(id);
        match removed {
            Some(entry) => {
                info!(node_id = %id, "Node deleted");
                Some(entry.node)
            }
            None => {
                debug!(node_id = %id, "delete_node: unknown node");
                None
            }
        }
    }

    /// Add a sensor or actuator type to a node.
    ///
    /// Returns the updated record when the node's lists actually changed.
    pub async fn add_component(&self, id: &NodeId, component: &Component) -> Option<Node> {
        self.edit_component(id, component, true).await
    }

    /// Remove a sensor or actuator type from a node.
    ///
    /// Returns the updated record when the node's lists actually changed.
    pub async fn remove_component(&self, id: &NodeId, component: &Component) -> Option<Node> {
        self.edit_component(id, component, false).await
    }

    async fn edit_component(&self, id: &NodeId, component: &Component, add: bool) -> Option<Node> {
        let mut nodes = self.nodes.write().await;
        let Some(entry) = nodes.get_mut(id) else {
            warn!(node_id = %id, "Component change for unknown node");
            return None;
        };
        let node = &mut entry.node;
        let changed = match component.kind {
            ComponentKind::Sensor => match component.name.parse::<SensorKind>() {
                Ok(kind) => edit_list(&mut node.sensor_types, kind, add),
                Err(err) => {
                    warn!(node_id = %id, error = %err, "Ignoring component");
                    false
                }
            },
            ComponentKind::Actuator => match component.name.parse::<ActuatorKind>() {
                Ok(kind) => edit_list(&mut node.actuator_types, kind, add),
                Err(err) => {
                    warn!(node_id = %id, error = %err, "Ignoring component");
                    false
                }
            },
        };
        changed.then(|| node.clone())
    }

    /// Shared handle to a node's runtime.
    pub async fn runtime(&self, id: &NodeId) -> Option<RuntimeHandle> {
        self.nodes
            .read()
            .await
            .get(id)
            .map(|entry| Arc::clone(&entry.runtime))
    }

    /// Current readings and actuator states; `None` for an unknown node.
    pub async fn snapshot(&self, id: &NodeId) -> Option<Snapshot> {
        let Some(runtime) = self.runtime(id).await else {
            debug!(node_id = %id, "snapshot: unknown node");
            return None;
        };
        let snapshot = runtime.lock().await.snapshot();
        Some(snapshot)
    }

    /// Store a node's sampling interval. Returns `false` for an unknown
    /// node. The caller reschedules the node's ticker.
    pub async fn set_sampling_interval(&self, id: &NodeId, interval_ms: u64) -> bool {
        let Some(runtime) = self.runtime(id).await else {
            warn!(node_id = %id, "set_sampling_interval: unknown node");
            return false;
        };
        runtime.lock().await.sampling_interval_ms = interval_ms;
        debug!(node_id = %id, interval_ms, "Sampling interval set");
        true
    }

    /// A node's sampling interval in milliseconds.
    pub async fn sampling_interval(&self, id: &NodeId) -> Option<u64> {
        let runtime = self.runtime(id).await?;
        let interval = runtime.lock().await.sampling_interval_ms;
        Some(interval)
    }

    /// Apply an actuator command. Returns whether any state changed hands.
    ///
    /// Unknown nodes and targets, and commands without a usable parameter,
    /// are ignored.
    pub async fn execute_command(&self, cmd: &Command) -> bool {
        let Some(runtime) = self.runtime(&cmd.node_id).await else {
            debug!(node_id = %cmd.node_id, target = %cmd.target, "Command for unknown node");
            return false;
        };
        let Some(actuator) = cmd.actuator() else {
            debug!(node_id = %cmd.node_id, target = %cmd.target, "Ignoring unknown command target");
            return false;
        };

        let mut runtime = runtime.lock().await;
        let applied = match actuator {
            ActuatorKind::Window => match cmd.level_param() {
                Some(level) => {
                    runtime.window_level = level;
                    true
                }
                None => false,
            },
            switch => {
                let current = runtime.switch(switch).unwrap_or_default();
                match (cmd.on_param(), cmd.is_toggle()) {
                    (Some(on), _) => runtime.set_switch(switch, on),
                    (None, true) => runtime.set_switch(switch, !current),
                    (None, false) => false,
                }
            }
        };
        if applied {
            debug!(
                node_id = %cmd.node_id,
                target = actuator.as_str(),
                action = cmd.action.as_deref().unwrap_or("set"),
                "Command applied"
            );
        } else {
            debug!(node_id = %cmd.node_id, target = actuator.as_str(), "Command missing parameter");
        }
        applied
    }
}

fn edit_list<T: PartialEq>(list: &mut Vec<T>, value: T, add: bool) -> bool {
    let present = list.contains(&value);
    if add && !present {
        list.push(value);
        true
    } else if !add && present {
        list.retain(|existing| *existing != value);
        true
    } else {
        false
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use greenhouse_types::WindowLevel;
    use serde_json::json;

    use super::*;

    fn spec(name: &str, sensors: &[&str], actuators: &[&str]) -> NodeSpec {
        NodeSpec {
            name: Some(String::from(name)),
            sensors: Some(sensors.iter().map(|s| String::from(*s)).collect()),
            actuators: Some(actuators.iter().map(|s| String::from(*s)).collect()),
            ..NodeSpec::default()
        }
    }

    fn command(node_id: &NodeId, target: &str, params: serde_json::Value) -> Command {
        Command {
            node_id: node_id.clone(),
            target: String::from(target),
            action: Some(String::from("set")),
            params: params.as_object().cloned().unwrap_or_default(),
        }
    }

    #[tokio::test]
    async fn add_node_without_lists_gets_empty_lists() {
        let manager = NodeManager::default();
        let id = manager.add_node(NodeSpec::default()).await;
        let node = manager.get_node(&id).await.unwrap();
        assert!(node.sensor_types.is_empty());
        assert!(node.actuator_types.is_empty());
        assert!(id.as_str().starts_with("node-"));
    }

    #[tokio::test]
    async fn add_node_keeps_requested_id_and_drops_unknown_names() {
        let manager = NodeManager::default();
        let mut request = spec("Bay", &["temperature", "sonar"], &["fan", "laser"]);
        request.id = Some(NodeId::from("bay-1"));
        let id = manager.add_node(request).await;
        assert_eq!(id.as_str(), "bay-1");
        let node = manager.get_node(&id).await.unwrap();
        assert_eq!(node.sensor_types, vec![SensorKind::Temperature]);
        assert_eq!(node.actuator_types, vec![ActuatorKind::Fan]);
    }

    #[tokio::test]
    async fn duplicate_requested_id_gets_fresh_id() {
        let manager = NodeManager::default();
        let first = NodeSpec {
            id: Some(NodeId::from("dup")),
            ..NodeSpec::default()
        };
        let second = first.clone();
        let a = manager.add_node(first).await;
        let b = manager.add_node(second).await;
        assert_ne!(a, b);
        assert_eq!(manager.len().await, 2);
    }

    #[tokio::test]
    async fn get_all_nodes_is_a_copy() {
        let manager = NodeManager::default();
        let id = manager.add_node(spec("A", &[], &[])).await;
        let mut all = manager.get_all_nodes().await;
        all[0].name = String::from("changed");
        assert_eq!(manager.get_node(&id).await.unwrap().name, "A");
    }

    #[tokio::test]
    async fn update_replaces_lists_and_sets_scalars() {
        let manager = NodeManager::default();
        let id = manager
            .add_node(spec("A", &["temperature", "humidity"], &["fan"]))
            .await;
        let patch = NodePatch {
            location: Some(String::from("house 2")),
            sensors: Some(vec![String::from("ph")]),
            ..NodePatch::default()
        };
        let node = manager.update_node(&id, patch).await.unwrap();
        assert_eq!(node.name, "A");
        assert_eq!(node.location, "house 2");
        assert_eq!(node.sensor_types, vec![SensorKind::Ph]);
        assert_eq!(node.actuator_types, vec![ActuatorKind::Fan]);
    }

    #[tokio::test]
    async fn unknown_ids_are_no_ops() {
        let manager = NodeManager::default();
        let id = manager.add_node(spec("A", &[], &[])).await;
        let before = manager.get_all_nodes().await;
        let ghost = NodeId::from("ghost");

        let patch = NodePatch {
            name: Some(String::from("x")),
            ..NodePatch::default()
        };
        assert!(manager.update_node(&ghost, patch).await.is_none());
        assert!(!manager.execute_command(&command(&ghost, "fan", json!({"on": true}))).await);
        assert!(manager.snapshot(&ghost).await.is_none());
        assert!(manager.delete_node(&ghost).await.is_none());
        assert!(!manager.set_sampling_interval(&ghost, 10).await);

        assert_eq!(manager.get_all_nodes().await, before);
        assert!(!manager.snapshot(&id).await.unwrap().fan);
    }

    #[tokio::test]
    async fn snapshot_has_all_keys_for_bare_node() {
        let manager = NodeManager::default();
        let id = manager.add_node(NodeSpec::default()).await;
        let snapshot = manager.snapshot(&id).await.unwrap();
        let value = serde_json::to_value(snapshot).unwrap();
        for key in Snapshot::KEYS {
            assert!(value.get(key).is_some(), "missing {key}");
        }
    }

    #[tokio::test]
    async fn commands_drive_actuators() {
        let manager = NodeManager::default();
        let id = manager.add_node(NodeSpec::default()).await;

        assert!(manager.execute_command(&command(&id, "fan", json!({"on": true}))).await);
        assert!(
            manager
                .execute_command(&command(&id, "water_pump", json!({"on": true})))
                .await
        );
        assert!(
            manager
                .execute_command(&command(&id, "window", json!({"level": "HALF"})))
                .await
        );
        let snapshot = manager.snapshot(&id).await.unwrap();
        assert!(snapshot.fan && snapshot.water_pump && !snapshot.co2);
        assert_eq!(snapshot.window, WindowLevel::Half);
    }

    #[tokio::test]
    async fn unknown_target_and_missing_params_are_ignored() {
        let manager = NodeManager::default();
        let id = manager.add_node(NodeSpec::default()).await;
        assert!(!manager.execute_command(&command(&id, "sprinkler", json!({"on": true}))).await);
        assert!(!manager.execute_command(&command(&id, "co2", json!({}))).await);
        assert!(
            !manager
                .execute_command(&command(&id, "window", json!({"level": "AJAR"})))
                .await
        );
        let snapshot = manager.snapshot(&id).await.unwrap();
        assert!(!snapshot.co2);
        assert_eq!(snapshot.window, WindowLevel::Closed);
    }

    #[tokio::test]
    async fn toggle_flips_without_on_param() {
        let manager = NodeManager::default();
        let id = manager.add_node(NodeSpec::default()).await;
        let mut toggle = command(&id, "co2", json!({}));
        toggle.action = Some(String::from("toggle"));
        assert!(manager.execute_command(&toggle).await);
        assert!(manager.snapshot(&id).await.unwrap().co2);
        assert!(manager.execute_command(&toggle).await);
        assert!(!manager.snapshot(&id).await.unwrap().co2);
    }

    #[tokio::test]
    async fn components_add_and_remove() {
        let manager = NodeManager::default();
        let id = manager.add_node(NodeSpec::default()).await;
        let light = Component {
            kind: ComponentKind::Sensor,
            name: String::from("light"),
        };
        let node = manager.add_component(&id, &light).await.unwrap();
        assert_eq!(node.sensor_types, vec![SensorKind::Light]);
        assert!(manager.add_component(&id, &light).await.is_none());
        let node = manager.remove_component(&id, &light).await.unwrap();
        assert!(node.sensor_types.is_empty());
        assert!(manager.remove_component(&id, &light).await.is_none());

        let bogus = Component {
            kind: ComponentKind::Actuator,
            name: String::from("laser"),
        };
        assert!(manager.add_component(&id, &bogus).await.is_none());
    }

    #[tokio::test]
    async fn sampling_interval_is_stored_unclamped() {
        let manager = NodeManager::new(250);
        let id = manager.add_node(NodeSpec::default()).await;
        assert_eq!(manager.sampling_interval(&id).await, Some(250));
        assert!(manager.set_sampling_interval(&id, 1).await);
        assert_eq!(manager.sampling_interval(&id).await, Some(1));
    }

    #[tokio::test]
    async fn delete_removes_record_and_runtime() {
        let manager = NodeManager::default();
        let id = manager.add_node(NodeSpec::default()).await;
        assert!(manager.delete_node(&id).await.is_some());
        assert!(!manager.contains(&id).await);
        assert!(manager.runtime(&id).await.is_none());
        assert!(manager.is_empty().await);
    }
}
