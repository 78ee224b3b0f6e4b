//! Enumeration types shared by the simulation, the engine and the wire
//! protocol.
//!
//! Every enum that travels as a bare string on the wire implements
//! [`FromStr`] so lenient inputs (lists of names inside a `create_node`
//! request, event names inside a `subscribe`) can be parsed entry by
//! entry without failing the whole message.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

/// A name on the wire did not match any variant of the target enum.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} name: {name:?}")]
pub struct UnknownName {
    /// Which enum was being parsed.
    pub kind: &'static str,
    /// The rejected input.
    pub name: String,
}

impl UnknownName {
    fn new(kind: &'static str, name: &str) -> Self {
        Self {
            kind,
            name: name.to_owned(),
        }
    }
}

// ---------------------------------------------------------------------------
// Node capabilities
// ---------------------------------------------------------------------------

/// A sensor a node may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensorKind {
    /// Air temperature in degrees Celsius.
    Temperature,
    /// Relative humidity in percent.
    Humidity,
    /// Illuminance in lux.
    Light,
    /// Soil/nutrient solution acidity.
    Ph,
}

impl SensorKind {
    /// All sensor kinds in wire order.
    pub const ALL: [Self; 4] = [Self::Temperature, Self::Humidity, Self::Light, Self::Ph];

    /// The wire name of this sensor kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::Light => "light",
            Self::Ph => "ph",
        }
    }
}

impl FromStr for SensorKind {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownName::new("sensor", s))
    }
}

/// An actuator a node may declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActuatorKind {
    /// Ventilation fan.
    Fan,
    /// Irrigation pump.
    WaterPump,
    /// CO2 generator.
    Co2,
    /// Motorised roof window.
    Window,
}

impl ActuatorKind {
    /// All actuator kinds in wire order.
    pub const ALL: [Self; 4] = [Self::Fan, Self::WaterPump, Self::Co2, Self::Window];

    /// The wire name of this actuator kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Fan => "fan",
            Self::WaterPump => "water_pump",
            Self::Co2 => "co2",
            Self::Window => "window",
        }
    }
}

impl FromStr for ActuatorKind {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownName::new("actuator", s))
    }
}

/// Opening of the roof window.
///
/// Drives how strongly the greenhouse exchanges heat and moisture with
/// the outside air.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WindowLevel {
    /// Fully closed, no exchange with the outside.
    #[default]
    #[serde(alias = "closed")]
    Closed,
    /// Half open.
    #[serde(alias = "half")]
    Half,
    /// Fully open.
    #[serde(alias = "open")]
    Open,
}

impl WindowLevel {
    /// Fraction of full outside-air exchange this opening allows.
    pub const fn openness(self) -> f64 {
        match self {
            Self::Closed => 0.0,
            Self::Half => 0.5,
            Self::Open => 1.0,
        }
    }

    /// The wire name of this level.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Closed => "CLOSED",
            Self::Half => "HALF",
            Self::Open => "OPEN",
        }
    }
}

impl FromStr for WindowLevel {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::Closed, Self::Half, Self::Open]
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownName::new("window level", s))
    }
}

/// Which list of a node a component belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComponentKind {
    /// Entry of the node's sensor list.
    Sensor,
    /// Entry of the node's actuator list.
    Actuator,
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Kind of unsolicited push a session can subscribe to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Periodic readings of one node.
    SensorUpdate,
    /// Topology change of one node.
    NodeChange,
}

impl EventKind {
    /// All event kinds.
    pub const ALL: [Self; 2] = [Self::SensorUpdate, Self::NodeChange];

    /// The wire name of this event kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SensorUpdate => "sensor_update",
            Self::NodeChange => "node_change",
        }
    }
}

impl FromStr for EventKind {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s.trim())
            .ok_or_else(|| UnknownName::new("event", s))
    }
}

/// Operation carried by a `node_change` push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeChangeOp {
    /// A node was created.
    Added,
    /// A node's record changed.
    Updated,
    /// A node was deleted.
    Removed,
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

/// Role of a registered user.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Full control including user management.
    Admin,
    /// May change topology and drive actuators.
    Operator,
    /// Read-only access.
    #[default]
    Viewer,
}
