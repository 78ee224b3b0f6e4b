//! Core entity and event structs.
//!
//! Wire field names are camelCase (`nodeId`, `sensorTypes`) except inside
//! [`Snapshot`], whose keys are the fixed reading names clients index by
//! (`water_pump` included).

use core::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::enums::{ActuatorKind, ComponentKind, NodeChangeOp, Role, SensorKind, WindowLevel};
use crate::ids::{NodeId, UserId};

// ---------------------------------------------------------------------------
// Topology
// ---------------------------------------------------------------------------

/// A greenhouse node as stored in the topology.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique node id.
    pub id: NodeId,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Free-form location (bed, bay, house).
    #[serde(default)]
    pub location: String,
    /// Network address of the physical unit.
    #[serde(default)]
    pub ip: String,
    /// Sensors this node declares.
    #[serde(default, alias = "sensors")]
    pub sensor_types: Vec<SensorKind>,
    /// Actuators this node declares.
    #[serde(default, alias = "actuators")]
    pub actuator_types: Vec<ActuatorKind>,
}

/// Creation request for a node. Every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeSpec {
    /// Requested id; the server assigns one when absent.
    pub id: Option<NodeId>,
    /// Display name.
    pub name: Option<String>,
    /// Free-form location.
    pub location: Option<String>,
    /// Network address.
    pub ip: Option<String>,
    /// Sensor names; unknown names are dropped.
    #[serde(alias = "sensorTypes")]
    pub sensors: Option<Vec<String>>,
    /// Actuator names; unknown names are dropped.
    #[serde(alias = "actuatorTypes")]
    pub actuators: Option<Vec<String>>,
}

/// Partial update of a node.
///
/// Scalar fields are set when present. `sensors` and `actuators` replace
/// the whole list when present.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodePatch {
    /// New display name.
    pub name: Option<String>,
    /// New location.
    pub location: Option<String>,
    /// New network address.
    pub ip: Option<String>,
    /// Replacement sensor list.
    #[serde(alias = "sensorTypes")]
    pub sensors: Option<Vec<String>>,
    /// Replacement actuator list.
    #[serde(alias = "actuatorTypes")]
    pub actuators: Option<Vec<String>>,
}

impl NodePatch {
    /// Whether the patch carries no recognised key.
    pub const fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.location.is_none()
            && self.ip.is_none()
            && self.sensors.is_none()
            && self.actuators.is_none()
    }
}

/// Parse a list of wire names, keeping known names once in input order.
///
/// Returns the parsed values and the names that were rejected.
pub fn parse_names<T>(names: &[String]) -> (Vec<T>, Vec<String>)
where
    T: FromStr + PartialEq,
{
    let mut known = Vec::with_capacity(names.len());
    let mut rejected = Vec::new();
    for name in names {
        match name.parse::<T>() {
            Ok(value) if !known.contains(&value) => known.push(value),
            Ok(_) => {}
            Err(_) => rejected.push(name.clone()),
        }
    }
    (known, rejected)
}

/// A sensor or actuator entry added to / removed from a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    /// Which list the entry belongs to.
    pub kind: ComponentKind,
    /// Sensor or actuator name.
    pub name: String,
}

// ---------------------------------------------------------------------------
// Commands and readings
// ---------------------------------------------------------------------------

/// An actuator command addressed to one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Target node.
    pub node_id: NodeId,
    /// Actuator name (`fan`, `water_pump`, `co2`, `window`).
    pub target: String,
    /// Free-form verb (`set`, `toggle`).
    #[serde(default)]
    pub action: Option<String>,
    /// Parameters: `on` for boolean actuators, `level` for the window.
    #[serde(default)]
    pub params: serde_json::Map<String, serde_json::Value>,
}

impl Command {
    /// Resolve the target name, `None` when it names no known actuator.
    pub fn actuator(&self) -> Option<ActuatorKind> {
        self.target.parse().ok()
    }

    /// The boolean `on` parameter, if present and boolean.
    pub fn on_param(&self) -> Option<bool> {
        self.params.get("on").and_then(serde_json::Value::as_bool)
    }

    /// The `level` parameter parsed as a window level.
    pub fn level_param(&self) -> Option<WindowLevel> {
        self.params
            .get("level")
            .and_then(serde_json::Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    /// Whether the command asks to flip a boolean actuator.
    pub fn is_toggle(&self) -> bool {
        self.action
            .as_deref()
            .is_some_and(|a| a.eq_ignore_ascii_case("toggle"))
    }
}

/// The fixed set of current readings and actuator states of one node.
///
/// Always carries all eight keys, independent of which sensors or
/// actuators the node declares.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Air temperature, degrees Celsius.
    pub temperature: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
    /// Illuminance, lux.
    pub light: f64,
    /// Acidity.
    pub ph: f64,
    /// Fan running.
    pub fan: bool,
    /// Irrigation pump running.
    pub water_pump: bool,
    /// CO2 generator running.
    pub co2: bool,
    /// Roof window opening.
    pub window: WindowLevel,
}

impl Snapshot {
    /// The fixed key set, in wire order.
    pub const KEYS: [&'static str; 8] = [
        "temperature",
        "humidity",
        "light",
        "ph",
        "fan",
        "water_pump",
        "co2",
        "window",
    ];
}

/// One tick's readings for one node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SensorUpdate {
    /// Node the readings belong to.
    pub node_id: NodeId,
    /// Wall-clock time of the tick, milliseconds since the Unix epoch.
    pub timestamp: i64,
    /// Readings and actuator states.
    pub data: Snapshot,
}

impl SensorUpdate {
    /// Stamp a snapshot with the current time.
    pub fn now(node_id: NodeId, data: Snapshot) -> Self {
        Self {
            node_id,
            timestamp: Utc::now().timestamp_millis(),
            data,
        }
    }
}

/// A topology change pushed to subscribed sessions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeChange {
    /// What happened.
    pub op: NodeChangeOp,
    /// Affected node.
    pub node_id: NodeId,
    /// Full record after the change; absent for removals.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<Node>,
}

impl NodeChange {
    /// A node was created.
    pub fn added(node: Node) -> Self {
        Self {
            op: NodeChangeOp::Added,
            node_id: node.id.clone(),
            node: Some(node),
        }
    }

    /// A node's record changed.
    pub fn updated(node: Node) -> Self {
        Self {
            op: NodeChangeOp::Updated,
            node_id: node.id.clone(),
            node: Some(node),
        }
    }

    /// A node was deleted.
    pub const fn removed(node_id: NodeId) -> Self {
        Self {
            op: NodeChangeOp::Removed,
            node_id,
            node: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Public view of a registered user (no credentials).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    /// User id.
    pub id: UserId,
    /// Login name.
    pub user: String,
    /// Assigned role.
    pub role: Role,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn node_spec_accepts_missing_fields() {
        let spec: NodeSpec = serde_json::from_str(r#"{"name":"N1"}"#).unwrap();
        assert_eq!(spec.name.as_deref(), Some("N1"));
        assert!(spec.sensors.is_none());
        assert!(spec.id.is_none());
    }

    #[test]
    fn parse_names_drops_unknown_and_duplicates() {
        let names = vec![
            String::from("temperature"),
            String::from("bogus"),
            String::from("temperature"),
            String::from("ph"),
        ];
        let (known, rejected) = parse_names::<SensorKind>(&names);
        assert_eq!(known, vec![SensorKind::Temperature, SensorKind::Ph]);
        assert_eq!(rejected, vec![String::from("bogus")]);
    }

    #[test]
    fn snapshot_serializes_all_fixed_keys() {
        let snap = Snapshot {
            temperature: 21.5,
            humidity: 60.0,
            light: 12_000.0,
            ph: 6.5,
            fan: true,
            water_pump: false,
            co2: false,
            window: WindowLevel::Half,
        };
        let value = serde_json::to_value(snap).unwrap();
        let object = value.as_object().unwrap();
        assert_eq!(object.len(), Snapshot::KEYS.len());
        for key in Snapshot::KEYS {
            assert!(object.contains_key(key), "missing {key}");
        }
        assert_eq!(object.get("window").unwrap(), "HALF");
    }

    #[test]
    fn node_serializes_camel_case_lists() {
        let node = Node {
            id: NodeId::from("n1"),
            name: String::from("N1"),
            location: String::new(),
            ip: String::new(),
            sensor_types: vec![SensorKind::Light],
            actuator_types: vec![ActuatorKind::WaterPump],
        };
        let value = serde_json::to_value(&node).unwrap();
        assert_eq!(value["sensorTypes"][0], "light");
        assert_eq!(value["actuatorTypes"][0], "water_pump");
    }

    #[test]
    fn removal_change_omits_node() {
        let change = NodeChange::removed(NodeId::from("n1"));
        let value = serde_json::to_value(&change).unwrap();
        assert_eq!(value["op"], "removed");
        assert_eq!(value["nodeId"], "n1");
        assert!(value.get("node").is_none());
    }

    #[test]
    fn command_reads_params() {
        let cmd: Command = serde_json::from_str(
            r#"{"nodeId":"n1","target":"window","action":"set","params":{"level":"OPEN"}}"#,
        )
        .unwrap();
        assert_eq!(cmd.actuator(), Some(ActuatorKind::Window));
        assert_eq!(cmd.level_param(), Some(WindowLevel::Open));
        assert_eq!(cmd.on_param(), None);
        assert!(!cmd.is_toggle());
    }
}
