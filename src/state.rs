//! Device State Store
//!
//! Latest known telemetry from the motion controller and latest known laser
//! state. Each value lives in a `tokio::sync::watch` channel: writers (the link
//! receive tasks and, for the laser-on flag, the command layer) mutate in place,
//! readers get cloned snapshots or subscribe for change notifications. Nobody
//! reads the values through shared references without going through the
//! channel.

use crate::protocol::laser::LaserReport;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

// =============================================================================
// Telemetry
// =============================================================================

/// Last known readings from the motion / gas-flow controller.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct TelemetryRecord {
    /// Argon flow (sccm)
    pub argon_flow: f64,
    /// Nitrogen flow (sccm)
    pub nitrogen_flow: f64,
    /// Chamber temperature (°C)
    pub chamber_temperature: f64,
    /// Stepper motor position (steps)
    pub motor_position: i32,
}

impl TelemetryRecord {
    /// Colour band of the chamber temperature readout.
    pub fn temperature_band(&self) -> TemperatureBand {
        TemperatureBand::from_celsius(self.chamber_temperature)
    }
}

/// One decoded `DATA` line. `None` fields failed to parse and keep their
/// previous value when applied.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct TelemetryUpdate {
    /// Nitrogen flow, first on the wire
    pub nitrogen_flow: Option<f64>,
    /// Argon flow
    pub argon_flow: Option<f64>,
    /// Chamber temperature
    pub chamber_temperature: Option<f64>,
    /// Motor position
    pub motor_position: Option<i32>,
}

impl TelemetryUpdate {
    /// `true` if no field parsed.
    pub fn is_empty(&self) -> bool {
        self.nitrogen_flow.is_none()
            && self.argon_flow.is_none()
            && self.chamber_temperature.is_none()
            && self.motor_position.is_none()
    }

    /// Overwrite the fields of `record` that this update carries.
    pub fn apply_to(&self, record: &mut TelemetryRecord) {
        if let Some(v) = self.nitrogen_flow {
            record.nitrogen_flow = v;
        }
        if let Some(v) = self.argon_flow {
            record.argon_flow = v;
        }
        if let Some(v) = self.chamber_temperature {
            record.chamber_temperature = v;
        }
        if let Some(v) = self.motor_position {
            record.motor_position = v;
        }
    }
}

/// Chamber temperature classification used by the display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TemperatureBand {
    /// Below 30 °C
    Normal,
    /// 30 °C up to 50 °C
    Warm,
    /// 50 °C and above
    Hot,
}

impl TemperatureBand {
    /// Classify a temperature in °C.
    pub fn from_celsius(celsius: f64) -> Self {
        if celsius >= 50.0 {
            TemperatureBand::Hot
        } else if celsius >= 30.0 {
            TemperatureBand::Warm
        } else {
            TemperatureBand::Normal
        }
    }
}

// =============================================================================
// Laser
// =============================================================================

/// Laser output mode (`E0` register).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaserMode {
    /// Electro-optics off
    Off,
    /// Adjust (low) output
    Adjust,
    /// Maximum output
    Max,
}

impl LaserMode {
    /// Map the `E0/S<n>` register value.
    pub fn from_register(value: i32) -> Option<Self> {
        match value {
            0 => Some(LaserMode::Off),
            1 => Some(LaserMode::Adjust),
            2 => Some(LaserMode::Max),
            _ => None,
        }
    }

    /// Register value written with `E0/S<n>`.
    pub fn register(self) -> u8 {
        match self {
            LaserMode::Off => 0,
            LaserMode::Adjust => 1,
            LaserMode::Max => 2,
        }
    }
}

impl fmt::Display for LaserMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaserMode::Off => f.write_str("OFF"),
            LaserMode::Adjust => f.write_str("ADJUST"),
            LaserMode::Max => f.write_str("MAX"),
        }
    }
}

/// Laser status as reported by `READY` / `START` messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LaserStatus {
    /// Ready to fire
    Ready,
    /// Firing
    Busy,
    /// Problem code 1
    NotReady,
    /// Problem code 2
    Overheated,
    /// Problem code 4
    FlashLampError,
    /// Problem code 8
    InterlockError,
    /// Problem code 16
    CoverError,
}

impl LaserStatus {
    /// Map a `READY=<code>` / `START=<code>` problem code. Unknown codes map to nothing.
    pub fn from_problem_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(LaserStatus::NotReady),
            2 => Some(LaserStatus::Overheated),
            4 => Some(LaserStatus::FlashLampError),
            8 => Some(LaserStatus::InterlockError),
            16 => Some(LaserStatus::CoverError),
            _ => None,
        }
    }

    /// Operator-facing description of a problem status.
    pub fn problem_message(self) -> Option<&'static str> {
        match self {
            LaserStatus::NotReady => Some("Laser not ready"),
            LaserStatus::Overheated => Some("Laser overheated"),
            LaserStatus::FlashLampError => Some("Flash lamp error"),
            LaserStatus::InterlockError => Some("Interlock error"),
            LaserStatus::CoverError => Some("Cover error"),
            LaserStatus::Ready | LaserStatus::Busy => None,
        }
    }
}

impl fmt::Display for LaserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LaserStatus::Ready => "Ready",
            LaserStatus::Busy => "Busy",
            LaserStatus::NotReady => "Not ready",
            LaserStatus::Overheated => "Overheated",
            LaserStatus::FlashLampError => "Flash lamp error",
            LaserStatus::InterlockError => "Interlock error",
            LaserStatus::CoverError => "Cover error",
        };
        f.write_str(text)
    }
}

/// Everything known about the laser.
///
/// Fields are updated one message at a time; a snapshot taken mid-round mixes
/// values from the current and previous rounds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LaserState {
    /// Output mode, unknown until first reported
    pub mode: Option<LaserMode>,
    /// Status, unset until first reported
    pub status: Option<LaserStatus>,
    /// Cooling water temperature (°C)
    pub cooling_temperature: f64,
    /// Electro-optics delay in MAX mode
    pub eo_delay_max: i32,
    /// Electro-optics delay in ADJUST mode
    pub eo_delay_adjust: i32,
    /// PACK pulse count
    pub pack_pulses: i32,
    /// Whether the operator has the laser switched on
    pub laser_on: bool,
}

impl LaserState {
    /// Human-readable summary shown at the end of a status round.
    pub fn summary(&self) -> String {
        let status = self.status.map(|s| s.to_string()).unwrap_or_default();
        let mode = self
            .mode
            .map(|m| m.to_string())
            .unwrap_or_else(|| "unknown".to_string());
        format!(
            "Laser status: {status}\n\
             Laser mode: {mode}\n\
             Cooling water temperature: {}°C\n\
             Electro-optics delay in MAX: {}\n\
             Electro-optics delay in ADJ: {}\n\
             Number of PACK pulses: {}\n",
            self.cooling_temperature, self.eo_delay_max, self.eo_delay_adjust, self.pack_pulses
        )
    }

    /// Apply one decoded laser report.
    pub fn apply(&mut self, report: &LaserReport) {
        match *report {
            LaserReport::Mode(mode) => self.mode = Some(mode),
            LaserReport::Status(status) => self.status = Some(status),
            LaserReport::CoolingTemperature(t) => self.cooling_temperature = t,
            LaserReport::EoDelayMax(d) => self.eo_delay_max = d,
            LaserReport::PackPulses(n) => self.pack_pulses = n,
            LaserReport::EoDelayAdjust(d) => self.eo_delay_adjust = d,
        }
    }
}

// =============================================================================
// Store
// =============================================================================

/// Shared handle to the current device state.
///
/// Cloning is cheap and every clone sees the same values.
#[derive(Debug, Clone)]
pub struct DeviceStateStore {
    inner: Arc<StoreInner>,
}

#[derive(Debug)]
struct StoreInner {
    telemetry: watch::Sender<TelemetryRecord>,
    laser: watch::Sender<LaserState>,
}

impl Default for DeviceStateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceStateStore {
    /// Create a store with zeroed telemetry and unset laser state.
    pub fn new() -> Self {
        let (telemetry, _) = watch::channel(TelemetryRecord::default());
        let (laser, _) = watch::channel(LaserState::default());
        Self {
            inner: Arc::new(StoreInner { telemetry, laser }),
        }
    }

    /// Snapshot of the current telemetry.
    pub fn telemetry(&self) -> TelemetryRecord {
        *self.inner.telemetry.borrow()
    }

    /// Snapshot of the current laser state.
    pub fn laser(&self) -> LaserState {
        *self.inner.laser.borrow()
    }

    /// Receive a notification every time the telemetry changes.
    pub fn subscribe_telemetry(&self) -> watch::Receiver<TelemetryRecord> {
        self.inner.telemetry.subscribe()
    }

    /// Receive a notification every time the laser state changes.
    pub fn subscribe_laser(&self) -> watch::Receiver<LaserState> {
        self.inner.laser.subscribe()
    }

    /// Merge a decoded telemetry update and return the resulting snapshot.
    pub fn apply_telemetry(&self, update: &TelemetryUpdate) -> TelemetryRecord {
        self.inner
            .telemetry
            .send_modify(|record| update.apply_to(record));
        self.telemetry()
    }

    /// Apply a decoded laser report and return the resulting snapshot.
    pub fn apply_laser(&self, report: &LaserReport) -> LaserState {
        self.inner.laser.send_modify(|state| state.apply(report));
        self.laser()
    }

    /// Record whether the laser is switched on.
    pub fn set_laser_on(&self, on: bool) -> LaserState {
        self.inner.laser.send_modify(|state| state.laser_on = on);
        self.laser()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_keeps_previous_values() {
        let store = DeviceStateStore::new();
        store.apply_telemetry(&TelemetryUpdate {
            nitrogen_flow: Some(1.5),
            argon_flow: Some(2.5),
            chamber_temperature: Some(24.0),
            motor_position: Some(120),
        });

        let record = store.apply_telemetry(&TelemetryUpdate {
            argon_flow: Some(3.0),
            ..Default::default()
        });

        assert_eq!(record.nitrogen_flow, 1.5);
        assert_eq!(record.argon_flow, 3.0);
        assert_eq!(record.chamber_temperature, 24.0);
        assert_eq!(record.motor_position, 120);
    }

    #[test]
    fn laser_state_starts_unset() {
        let store = DeviceStateStore::new();
        let state = store.laser();
        assert_eq!(state.mode, None);
        assert_eq!(state.status, None);
        assert!(!state.laser_on);
    }

    #[test]
    fn laser_reports_update_single_fields() {
        let store = DeviceStateStore::new();
        store.apply_laser(&LaserReport::Mode(LaserMode::Max));
        let state = store.apply_laser(&LaserReport::CoolingTemperature(23.5));
        assert_eq!(state.mode, Some(LaserMode::Max));
        assert_eq!(state.cooling_temperature, 23.5);
        assert_eq!(state.eo_delay_adjust, 0);
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let store = DeviceStateStore::new();
        let mut rx = store.subscribe_laser();
        store.set_laser_on(true);
        rx.changed().await.unwrap();
        assert!(rx.borrow().laser_on);
    }

    #[test]
    fn temperature_bands() {
        assert_eq!(TemperatureBand::from_celsius(29.9), TemperatureBand::Normal);
        assert_eq!(TemperatureBand::from_celsius(30.0), TemperatureBand::Warm);
        assert_eq!(TemperatureBand::from_celsius(49.9), TemperatureBand::Warm);
        assert_eq!(TemperatureBand::from_celsius(50.0), TemperatureBand::Hot);
    }

    #[test]
    fn problem_codes() {
        assert_eq!(LaserStatus::from_problem_code(8), Some(LaserStatus::InterlockError));
        assert_eq!(LaserStatus::from_problem_code(3), None);
        assert!(LaserStatus::CoverError.problem_message().is_some());
        assert!(LaserStatus::Busy.problem_message().is_none());
        assert_eq!(LaserStatus::NotReady.to_string(), "Not ready");
    }

    #[test]
    fn summary_lists_every_field() {
        let state = LaserState {
            mode: Some(LaserMode::Adjust),
            status: Some(LaserStatus::Ready),
            cooling_temperature: 23.5,
            eo_delay_max: 140,
            eo_delay_adjust: 10,
            pack_pulses: 3,
            laser_on: false,
        };
        let summary = state.summary();
        assert!(summary.contains("Laser status: Ready"));
        assert!(summary.contains("Laser mode: ADJUST"));
        assert!(summary.contains("Cooling water temperature: 23.5°C"));
        assert!(summary.contains("Electro-optics delay in MAX: 140"));
        assert!(summary.contains("Electro-optics delay in ADJ: 10"));
        assert!(summary.contains("Number of PACK pulses: 3"));
    }
}
