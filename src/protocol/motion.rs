//! Motion / gas-flow controller protocol
//!
//! ## Inbound
//!
//! ```text
//! DATA[<n2> <ar> <temp> <pos>]
//! ```
//!
//! Nitrogen flow comes first on the wire. The three flows/temperature are
//! dot-decimal floats, the position an integer. Any other line is free text
//! from the firmware and goes to the operator log.
//!
//! ## Outbound
//!
//! `STOP`, `LEFT`, `RIGHT`, `GOTO[<int>]`, `SWEEP[<range> <midpoint>]`,
//! `GAS[<n2>% <ar>%]`, each newline terminated by the writer.

use crate::state::TelemetryUpdate;
use std::fmt;

/// Tag that marks a telemetry line.
pub const DATA_TAG: &str = "DATA";

/// Resolution of the gas flow controllers' setpoint input.
pub const GAS_SLIDER_RESOLUTION: u32 = 4096;

/// Flow at full scale of the gas flow controllers (sccm).
pub const GAS_FULL_SCALE_SCCM: f64 = 10.0;

/// A decoded line from the motion controller.
#[derive(Debug, Clone, PartialEq)]
pub enum MotionMessage {
    /// `DATA[...]` telemetry; fields that failed to parse are `None`
    Telemetry(TelemetryUpdate),
    /// Any other line, forwarded to the operator log
    Log(String),
}

/// Decode one motion-link frame.
pub fn decode(frame: &str) -> MotionMessage {
    if !frame.starts_with(DATA_TAG) {
        return MotionMessage::Log(frame.to_string());
    }

    let Some(payload) = frame.split(['[', ']']).nth(1) else {
        tracing::debug!(frame, "DATA line without bracketed payload");
        return MotionMessage::Telemetry(TelemetryUpdate::default());
    };

    let fields: Vec<&str> = payload.split(' ').collect();
    let float_at = |i: usize| fields.get(i).and_then(|f| f.trim().parse::<f64>().ok());

    MotionMessage::Telemetry(TelemetryUpdate {
        nitrogen_flow: float_at(0),
        argon_flow: float_at(1),
        chamber_temperature: float_at(2),
        motor_position: fields.get(3).and_then(|f| f.trim().parse::<i32>().ok()),
    })
}

/// Outbound command for the motion controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionCommand {
    /// Stop the stepper
    Stop,
    /// Jog left
    Left,
    /// Jog right
    Right,
    /// Move to an absolute position
    GoTo(i32),
    /// Sweep `range` steps around `midpoint`
    Sweep {
        /// Sweep width in steps
        range: i32,
        /// Centre of the sweep
        midpoint: i32,
    },
    /// Set both gas flow setpoints (sccm)
    Gas {
        /// Nitrogen setpoint
        n2_sccm: f64,
        /// Argon setpoint
        ar_sccm: f64,
    },
}

impl fmt::Display for MotionCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MotionCommand::Stop => f.write_str("STOP"),
            MotionCommand::Left => f.write_str("LEFT"),
            MotionCommand::Right => f.write_str("RIGHT"),
            MotionCommand::GoTo(position) => write!(f, "GOTO[{position}]"),
            MotionCommand::Sweep { range, midpoint } => write!(f, "SWEEP[{range} {midpoint}]"),
            MotionCommand::Gas { n2_sccm, ar_sccm } => {
                write!(f, "GAS[{n2_sccm:.3}% {ar_sccm:.3}%]")
            }
        }
    }
}

/// Convert a setpoint slider position into a flow in sccm.
pub fn sccm_from_slider(position: u32, max: u32) -> f64 {
    if max == 0 {
        return 0.0;
    }
    GAS_FULL_SCALE_SCCM * (f64::from(position.min(max)) / f64::from(max))
}

/// Convert a flow in sccm back into a slider position.
pub fn slider_from_sccm(sccm: f64, max: u32) -> u32 {
    let clamped = sccm.clamp(0.0, GAS_FULL_SCALE_SCCM);
    (clamped * f64::from(max) / GAS_FULL_SCALE_SCCM) as u32
}
