//! Mutable simulation state backing one node.
//!
//! A [`NodeRuntime`] lives exactly as long as its topology record. It owns
//! no timer: the ticker that steps it is owned by the scheduling engine and
//! keyed by the same node id.

use core::time::Duration;

use greenhouse_types::{ActuatorKind, NodeId, Snapshot, WindowLevel};

use crate::environment::EnvironmentState;
use crate::error::SimError;

/// Sampling interval of a freshly created node, in milliseconds.
pub const DEFAULT_SAMPLING_INTERVAL_MS: u64 = 1_000;

/// Environment, actuator, window and sampling state of one node.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRuntime {
    id: NodeId,
    /// Physical readings.
    pub environment: EnvironmentState,
    /// Fan running.
    pub fan_on: bool,
    /// Irrigation pump running.
    pub pump_on: bool,
    /// CO2 generator running.
    pub co2_on: bool,
    /// Roof window opening.
    pub window_level: WindowLevel,
    /// Period between ticks. Not clamped here.
    pub sampling_interval_ms: u64,
}

impl NodeRuntime {
    /// Create a runtime with default environment, all actuators off, the
    /// window closed and the default sampling interval.
    pub fn new(id: NodeId) -> Self {
        Self::with_interval(id, DEFAULT_SAMPLING_INTERVAL_MS)
    }

    /// Create a runtime with a specific sampling interval.
    pub fn with_interval(id: NodeId, sampling_interval_ms: u64) -> Self {
        Self {
            id,
            environment: EnvironmentState::default(),
            fan_on: false,
            pump_on: false,
            co2_on: false,
            window_level: WindowLevel::Closed,
            sampling_interval_ms,
        }
    }

    /// The node this runtime belongs to.
    pub const fn id(&self) -> &NodeId {
        &self.id
    }

    /// Timer period for this node. A zero interval becomes one millisecond
    /// because a timer cannot have a zero period.
    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.sampling_interval_ms.max(1))
    }

    /// Advance the environment by `dt_seconds` with the current actuator
    /// and window state.
    pub fn step(&mut self, dt_seconds: f64) -> Result<(), SimError> {
        self.environment.step(
            dt_seconds,
            self.fan_on,
            self.pump_on,
            self.co2_on,
            Some(self.window_level),
        )
    }

    /// Current state of a boolean actuator; `None` for the window.
    pub const fn switch(&self, actuator: ActuatorKind) -> Option<bool> {
        match actuator {
            ActuatorKind::Fan => Some(self.fan_on),
            ActuatorKind::WaterPump => Some(self.pump_on),
            ActuatorKind::Co2 => Some(self.co2_on),
            ActuatorKind::Window => None,
        }
    }

    /// Set a boolean actuator. Returns `false` (and does nothing) for the
    /// window, which takes a level instead.
    pub const fn set_switch(&mut self, actuator: ActuatorKind, on: bool) -> bool {
        match actuator {
            ActuatorKind::Fan => self.fan_on = on,
            ActuatorKind::WaterPump => self.pump_on = on,
            ActuatorKind::Co2 => self.co2_on = on,
            ActuatorKind::Window => return false,
        }
        true
    }

    /// The fixed eight-key snapshot of readings and actuator states.
    pub const fn snapshot(&self) -> Snapshot {
        Snapshot {
            temperature: self.environment.temperature_c(),
            humidity: self.environment.humidity_pct(),
            light: self.environment.light_lux(),
            ph: self.environment.ph(),
            fan: self.fan_on,
            water_pump: self.pump_on,
            co2: self.co2_on,
            window: self.window_level,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let runtime = NodeRuntime::new(NodeId::from("n1"));
        assert!(!runtime.fan_on && !runtime.pump_on && !runtime.co2_on);
        assert_eq!(runtime.window_level, WindowLevel::Closed);
        assert_eq!(runtime.sampling_interval_ms, DEFAULT_SAMPLING_INTERVAL_MS);
        assert_eq!(runtime.id().as_str(), "n1");
    }

    #[test]
    fn zero_interval_ticks_every_millisecond() {
        let mut runtime = NodeRuntime::new(NodeId::from("n1"));
        runtime.sampling_interval_ms = 0;
        assert_eq!(runtime.tick_period(), Duration::from_millis(1));
    }

    #[test]
    fn switches_map_to_fields() {
        let mut runtime = NodeRuntime::new(NodeId::from("n1"));
        assert!(runtime.set_switch(ActuatorKind::WaterPump, true));
        assert!(!runtime.set_switch(ActuatorKind::Window, true));
        assert_eq!(runtime.switch(ActuatorKind::WaterPump), Some(true));
        assert_eq!(runtime.switch(ActuatorKind::Window), None);
        assert!(runtime.snapshot().water_pump);
    }

    #[test]
    fn step_uses_runtime_window() {
        let mut closed = NodeRuntime::new(NodeId::from("a"));
        let mut open = NodeRuntime::new(NodeId::from("b"));
        open.window_level = WindowLevel::Open;
        closed.step(5.0).unwrap();
        open.step(5.0).unwrap();
        assert!(open.snapshot().temperature < closed.snapshot().temperature);
    }
}
