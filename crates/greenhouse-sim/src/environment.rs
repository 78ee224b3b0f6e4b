//! Physical readings of one greenhouse node and their evolution over time.
//!
//! [`EnvironmentState::step`] advances temperature, humidity, light and pH
//! by `dt` seconds given the actuator and window inputs. Each influence is
//! modelled as an exponential relaxation toward a target:
//!
//! ```text
//! x' = x + (target - x) * (1 - e^(-rate * dt))
//! ```
//!
//! The relaxation factor stays in `[0, 1]` for every non-negative `dt`, so
//! a single step can never overshoot its target no matter how long the
//! scheduler stalled. Every reading is clamped to its envelope afterwards.
//!
//! # Influences
//!
//! | Reading     | Target / driver                                              |
//! |-------------|--------------------------------------------------------------|
//! | temperature | solar gain (always), outside air scaled by window openness,  |
//! |             | fan cooling, CO2 generator heat                              |
//! | humidity    | pump set point or indoor baseline, outside air via window,   |
//! |             | fan drying                                                   |
//! | light       | baseline scaled by window, plus bounded jitter               |
//! | pH          | CO2 acidifies, irrigation alkalises, otherwise drifts back   |
//!
//! # Determinism
//!
//! Light jitter is drawn from an `xorshift64` generator seeded from the
//! current light reading and the step size, so `step` stays a pure
//! function of prior state and inputs.

use greenhouse_types::WindowLevel;
use serde::{Deserialize, Serialize};

use crate::error::SimError;

// ---------------------------------------------------------------------------
// Envelopes
// ---------------------------------------------------------------------------

/// Lowest temperature the model reports, degrees Celsius.
pub const TEMPERATURE_MIN_C: f64 = 8.0;
/// Highest temperature the model reports, degrees Celsius.
pub const TEMPERATURE_MAX_C: f64 = 40.0;
/// Humidity bounds, percent.
pub const HUMIDITY_RANGE: (f64, f64) = (0.0, 100.0);
/// Light bounds, lux.
pub const LIGHT_RANGE: (f64, f64) = (50.0, 50_000.0);
/// pH bounds.
pub const PH_RANGE: (f64, f64) = (0.0, 14.0);

// ---------------------------------------------------------------------------
// Model constants
// ---------------------------------------------------------------------------

const AMBIENT_TEMPERATURE_C: f64 = 15.0;
const AMBIENT_EXCHANGE_RATE: f64 = 0.01;
const SOLAR_GAIN_TARGET_C: f64 = 32.0;
const SOLAR_GAIN_RATE: f64 = 0.002;
const FAN_TARGET_C: f64 = 12.0;
const FAN_COOLING_RATE: f64 = 0.004;
const CO2_HEAT_TARGET_C: f64 = 38.0;
const CO2_HEAT_RATE: f64 = 0.0008;

const PUMP_HUMIDITY_TARGET: f64 = 85.0;
const PUMP_HUMIDITY_RATE: f64 = 0.02;
const BASELINE_HUMIDITY: f64 = 55.0;
const BASELINE_HUMIDITY_RATE: f64 = 0.004;
const OUTSIDE_HUMIDITY: f64 = 45.0;
const OUTSIDE_HUMIDITY_RATE: f64 = 0.006;
const FAN_HUMIDITY_TARGET: f64 = 40.0;
const FAN_DRYING_RATE: f64 = 0.002;

const LIGHT_BASELINE_LUX: f64 = 12_000.0;
const LIGHT_WINDOW_GAIN: f64 = 0.25;
const LIGHT_RELAX_RATE: f64 = 0.05;
const LIGHT_JITTER_LUX: f64 = 300.0;

const CO2_PH_TARGET: f64 = 5.2;
const PUMP_PH_TARGET: f64 = 7.4;
const NEUTRAL_PH_TARGET: f64 = 6.5;
const ACTIVE_PH_RATE: f64 = 0.001;
const NEUTRAL_PH_RATE: f64 = 0.0002;

/// The four physical readings of one node.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentState {
    temperature_c: f64,
    humidity_pct: f64,
    light_lux: f64,
    ph: f64,
}

impl Default for EnvironmentState {
    fn default() -> Self {
        Self {
            temperature_c: 22.0,
            humidity_pct: BASELINE_HUMIDITY,
            light_lux: LIGHT_BASELINE_LUX,
            ph: NEUTRAL_PH_TARGET,
        }
    }
}

impl EnvironmentState {
    /// Create a state from explicit readings, clamped to their envelopes.
    ///
    /// Non-finite inputs fall back to the default reading.
    pub fn new(temperature_c: f64, humidity_pct: f64, light_lux: f64, ph: f64) -> Self {
        let defaults = Self::default();
        let mut state = Self {
            temperature_c: finite_or(temperature_c, defaults.temperature_c),
            humidity_pct: finite_or(humidity_pct, defaults.humidity_pct),
            light_lux: finite_or(light_lux, defaults.light_lux),
            ph: finite_or(ph, defaults.ph),
        };
        state.clamp_all();
        state
    }

    /// Air temperature, degrees Celsius.
    pub const fn temperature_c(&self) -> f64 {
        self.temperature_c
    }

    /// Relative humidity, percent.
    pub const fn humidity_pct(&self) -> f64 {
        self.humidity_pct
    }

    /// Illuminance, lux.
    pub const fn light_lux(&self) -> f64 {
        self.light_lux
    }

    /// Acidity.
    pub const fn ph(&self) -> f64 {
        self.ph
    }

    /// Advance all readings by `dt_seconds`.
    ///
    /// `window` is an `Option` only so a missing level can be rejected
    /// instead of defaulted: `None` fails with
    /// [`SimError::MissingWindowLevel`] and leaves the state untouched.
    /// A negative or NaN `dt_seconds` fails with
    /// [`SimError::InvalidTimeStep`]. Any non-negative `dt_seconds`,
    /// including infinity, is accepted.
    pub fn step(
        &mut self,
        dt_seconds: f64,
        fan_on: bool,
        pump_on: bool,
        co2_on: bool,
        window: Option<WindowLevel>,
    ) -> Result<(), SimError> {
        let window = window.ok_or(SimError::MissingWindowLevel)?;
        if dt_seconds.is_nan() || dt_seconds < 0.0 {
            return Err(SimError::InvalidTimeStep(dt_seconds));
        }
        let dt = dt_seconds;
        let openness = window.openness();

        // Temperature
        let mut t = relax(self.temperature_c, SOLAR_GAIN_TARGET_C, SOLAR_GAIN_RATE, dt);
        t = relax(t, AMBIENT_TEMPERATURE_C, AMBIENT_EXCHANGE_RATE * openness, dt);
        if fan_on {
            t = relax(t, FAN_TARGET_C, FAN_COOLING_RATE, dt);
        }
        if co2_on {
            t = relax(t, CO2_HEAT_TARGET_C, CO2_HEAT_RATE, dt);
        }
        self.temperature_c = t;

        // Humidity
        let mut h = if pump_on {
            relax(self.humidity_pct, PUMP_HUMIDITY_TARGET, PUMP_HUMIDITY_RATE, dt)
        } else {
            relax(self.humidity_pct, BASELINE_HUMIDITY, BASELINE_HUMIDITY_RATE, dt)
        };
        h = relax(h, OUTSIDE_HUMIDITY, OUTSIDE_HUMIDITY_RATE * openness, dt);
        if fan_on {
            h = relax(h, FAN_HUMIDITY_TARGET, FAN_DRYING_RATE, dt);
        }
        self.humidity_pct = h;

        // Light
        let light_target = LIGHT_BASELINE_LUX * LIGHT_WINDOW_GAIN.mul_add(openness, 1.0);
        let jitter = unit_noise(self.light_lux.to_bits() ^ dt.to_bits()) * LIGHT_JITTER_LUX;
        self.light_lux = relax(self.light_lux, light_target, LIGHT_RELAX_RATE, dt) + jitter;

        // pH
        let mut p = self.ph;
        if co2_on {
            p = relax(p, CO2_PH_TARGET, ACTIVE_PH_RATE, dt);
        }
        if pump_on {
            p = relax(p, PUMP_PH_TARGET, ACTIVE_PH_RATE, dt);
        }
        if !co2_on && !pump_on {
            p = relax(p, NEUTRAL_PH_TARGET, NEUTRAL_PH_RATE, dt);
        }
        self.ph = p;

        self.clamp_all();
        Ok(())
    }

    fn clamp_all(&mut self) {
        let defaults = Self::default();
        let (h_min, h_max) = HUMIDITY_RANGE;
        let (l_min, l_max) = LIGHT_RANGE;
        let (p_min, p_max) = PH_RANGE;
        self.temperature_c = finite_or(self.temperature_c, defaults.temperature_c)
            .clamp(TEMPERATURE_MIN_C, TEMPERATURE_MAX_C);
        self.humidity_pct = finite_or(self.humidity_pct, defaults.humidity_pct).clamp(h_min, h_max);
        self.light_lux = finite_or(self.light_lux, defaults.light_lux).clamp(l_min, l_max);
        self.ph = finite_or(self.ph, defaults.ph).clamp(p_min, p_max);
    }
}

/// Exponential relaxation of `current` toward `target`.
///
/// The factor `1 - e^(-rate * dt)` lies in `[0, 1]` for non-negative
/// `rate * dt`, infinity included.
fn relax(current: f64, target: f64, rate_per_second: f64, dt_seconds: f64) -> f64 {
    let exponent = -rate_per_second * dt_seconds;
    let factor = if exponent.is_nan() {
        // 0 * inf: no rate, no change.
        0.0
    } else {
        -exponent.exp_m1()
    };
    (target - current).mul_add(factor.clamp(0.0, 1.0), current)
}

const fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() { value } else { fallback }
}

/// Deterministic noise in `[-1, 1]` derived from `seed`.
fn unit_noise(seed: u64) -> f64 {
    let bits = xorshift64(seed);
    let high = u32::try_from(bits >> 32).unwrap_or(0);
    (f64::from(high) / f64::from(u32::MAX)).mul_add(2.0, -1.0)
}

/// One round of `xorshift64` over a mixed seed.
const fn xorshift64(seed: u64) -> u64 {
    // The constant 0x517cc1b727220a95 is a well-known mixing constant.
    let mut state = seed.wrapping_mul(0x517c_c1b7_2722_0a95);

    // Ensure non-zero state (xorshift requires non-zero input).
    if state == 0 {
        state = 0xdead_beef_cafe_babe;
    }

    state ^= state << 13;
    state ^= state >> 7;
    state ^= state << 17;

    state
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::arithmetic_side_effects,
    clippy::float_cmp,
    clippy::indexing_slicing,
    clippy::cast_possible_truncation
)]
mod tests {
    use super::*;

    const LEVELS: [WindowLevel; 3] = [WindowLevel::Closed, WindowLevel::Half, WindowLevel::Open];

    fn assert_in_bounds(state: &EnvironmentState) {
        assert!(
            (HUMIDITY_RANGE.0..=HUMIDITY_RANGE.1).contains(&state.humidity_pct()),
            "humidity out of range: {state:?}"
        );
        assert!(
            (LIGHT_RANGE.0..=LIGHT_RANGE.1).contains(&state.light_lux()),
            "light out of range: {state:?}"
        );
        assert!((PH_RANGE.0..=PH_RANGE.1).contains(&state.ph()), "ph out of range: {state:?}");
        assert!(
            (TEMPERATURE_MIN_C..=TEMPERATURE_MAX_C).contains(&state.temperature_c()),
            "temperature out of range: {state:?}"
        );
    }

    #[test]
    fn bounds_hold_for_fuzzed_inputs() {
        let mut state = EnvironmentState::default();
        let mut seed: u64 = 42;
        let step_sizes = [
            0.0,
            0.001,
            0.5,
            1.0,
            10.0,
            3_600.0,
            86_400.0,
            1.0e12,
            f64::MAX,
            f64::INFINITY,
        ];

        for _ in 0..5_000 {
            seed = xorshift64(seed);
            let dt = step_sizes[(seed % step_sizes.len() as u64) as usize];
            let window = LEVELS[((seed >> 8) % 3) as usize];
            let fan = seed & (1 << 20) != 0;
            let pump = seed & (1 << 21) != 0;
            let co2 = seed & (1 << 22) != 0;

            state.step(dt, fan, pump, co2, Some(window)).unwrap();
            assert_in_bounds(&state);
        }
    }

    #[test]
    fn huge_step_from_extreme_start_stays_in_bounds() {
        let mut state = EnvironmentState::new(40.0, 100.0, 50_000.0, 14.0);
        state.step(f64::MAX, true, true, true, Some(WindowLevel::Open)).unwrap();
        assert_in_bounds(&state);
        assert!(state.temperature_c().is_finite());
    }

    #[test]
    fn missing_window_level_is_rejected() {
        for fan in [false, true] {
            for dt in [0.0, 1.0, 1.0e9] {
                let mut state = EnvironmentState::default();
                let before = state;
                let err = state.step(dt, fan, !fan, fan, None).unwrap_err();
                assert_eq!(err, SimError::MissingWindowLevel);
                assert_eq!(state, before);
            }
        }
    }

    #[test]
    fn negative_or_nan_step_is_rejected() {
        let mut state = EnvironmentState::default();
        assert!(state.step(-1.0, false, false, false, Some(WindowLevel::Closed)).is_err());
        assert!(state.step(f64::NAN, false, false, false, Some(WindowLevel::Closed)).is_err());
    }

    #[test]
    fn window_level_changes_temperature() {
        let mut closed = EnvironmentState::default();
        let mut open = EnvironmentState::default();
        closed.step(1.0, false, false, false, Some(WindowLevel::Closed)).unwrap();
        open.step(1.0, false, false, false, Some(WindowLevel::Open)).unwrap();
        assert!(
            open.temperature_c() < closed.temperature_c(),
            "open {} vs closed {}",
            open.temperature_c(),
            closed.temperature_c()
        );
    }

    #[test]
    fn half_window_sits_between_closed_and_open() {
        let mut states = LEVELS.map(|_| EnvironmentState::default());
        for (state, level) in states.iter_mut().zip(LEVELS) {
            state.step(60.0, false, false, false, Some(level)).unwrap();
        }
        assert!(states[0].temperature_c() > states[1].temperature_c());
        assert!(states[1].temperature_c() > states[2].temperature_c());
    }

    #[test]
    fn fan_cools_and_co2_warms() {
        let base = EnvironmentState::default();
        let mut idle = base;
        let mut fan = base;
        let mut co2 = base;
        idle.step(30.0, false, false, false, Some(WindowLevel::Closed)).unwrap();
        fan.step(30.0, true, false, false, Some(WindowLevel::Closed)).unwrap();
        co2.step(30.0, false, false, true, Some(WindowLevel::Closed)).unwrap();
        assert!(fan.temperature_c() < idle.temperature_c());
        assert!(co2.temperature_c() > idle.temperature_c());
    }

    #[test]
    fn pump_raises_humidity_and_ph() {
        let base = EnvironmentState::new(22.0, 50.0, 12_000.0, 6.5);
        let mut pumped = base;
        pumped.step(120.0, false, true, false, Some(WindowLevel::Closed)).unwrap();
        assert!(pumped.humidity_pct() > base.humidity_pct());
        assert!(pumped.ph() > base.ph());
    }

    #[test]
    fn co2_acidifies() {
        let base = EnvironmentState::default();
        let mut gassed = base;
        gassed.step(120.0, false, false, true, Some(WindowLevel::Closed)).unwrap();
        assert!(gassed.ph() < base.ph());
    }

    #[test]
    fn long_pump_run_converges_near_set_point() {
        let mut state = EnvironmentState::default();
        for _ in 0..100 {
            state.step(60.0, false, true, false, Some(WindowLevel::Closed)).unwrap();
        }
        assert!((state.humidity_pct() - PUMP_HUMIDITY_TARGET).abs() < 1.0);
    }

    #[test]
    fn step_is_deterministic() {
        let mut a = EnvironmentState::default();
        let mut b = EnvironmentState::default();
        for _ in 0..50 {
            a.step(1.0, true, false, true, Some(WindowLevel::Half)).unwrap();
            b.step(1.0, true, false, true, Some(WindowLevel::Half)).unwrap();
        }
        assert_eq!(a, b);
    }

    #[test]
    fn constructor_sanitizes_inputs() {
        let state = EnvironmentState::new(f64::NAN, 250.0, -5.0, f64::INFINITY);
        assert_in_bounds(&state);
        assert_eq!(state.humidity_pct(), 100.0);
        assert_eq!(state.light_lux(), 50.0);
    }

    #[test]
    fn unit_noise_stays_in_range() {
        for seed in 0_u64..10_000 {
            let n = unit_noise(seed);
            assert!((-1.0..=1.0).contains(&n));
        }
    }

    #[test]
    fn state_serializes_with_named_readings() {
        let state = EnvironmentState::new(21.5, 60.0, 15_000.0, 6.25);
        let value = serde_json::to_value(state).unwrap();
        assert_eq!(value["temperature_c"], 21.5);
        assert_eq!(value["humidity_pct"], 60.0);
        assert_eq!(value["light_lux"], 15_000.0);
        assert_eq!(value["ph"], 6.25);

        let restored: EnvironmentState = serde_json::from_value(value).unwrap();
        assert_eq!(restored, state);
    }
}
