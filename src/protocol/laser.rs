//! Laser power supply protocol
//!
//! Every message has the shape `[<routing>:<body>\<sender>]`. The console sends
//! with routing `NL` and sender `PC`; replies come back addressed `PC` from
//! `NL`. A single frame from the framer may hold several messages back to back.
//!
//! ## Reply bodies
//!
//! | Prefix            | Meaning                         | Value after `S` |
//! |-------------------|---------------------------------|-----------------|
//! | `E0`              | output mode                     | 0/1/2 |
//! | `READY`, `START`  | status, `=<code>` on a problem  | - |
//! | `U2`              | cooling water temperature       | float |
//! | `D0`              | EO delay in MAX mode            | int |
//! | `P0`              | PACK pulse count                | int |
//! | `D1`              | EO delay in ADJUST mode         | int |
//!
//! `D1` is the last answer of a status round. Anything that does not parse is
//! ignored. The substring `ERROR` anywhere in a frame is reported once.

use crate::state::{DeviceStateStore, LaserMode, LaserState, LaserStatus};
use std::fmt;

/// Substring that flags a device error anywhere in a frame.
pub const ERROR_MARKER: &str = "ERROR";

/// One decoded laser reply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LaserReport {
    /// `E0/S<n>`
    Mode(LaserMode),
    /// `READY`, `START`, or a problem code
    Status(LaserStatus),
    /// `U2/S<t>`
    CoolingTemperature(f64),
    /// `D0/S<n>`
    EoDelayMax(i32),
    /// `P0/S<n>`
    PackPulses(i32),
    /// `D1/S<n>`, ends a status round
    EoDelayAdjust(i32),
}

impl LaserReport {
    /// `true` for the reply that completes a status round.
    pub fn ends_status_round(&self) -> bool {
        matches!(self, LaserReport::EoDelayAdjust(_))
    }
}

/// Event produced by [`LaserDecoder::decode`], in frame order.
#[derive(Debug, Clone, PartialEq)]
pub enum LaserEvent {
    /// A reply was decoded and applied to the state store
    Report(LaserReport),
    /// The status round completed; carries the state after the final update
    StatusSummaryReady(LaserState),
    /// The frame contained `ERROR`
    ErrorReported,
}

/// Message bodies in a frame, skipping empty and malformed candidates.
pub fn message_bodies(frame: &str) -> impl Iterator<Item = &str> {
    frame
        .split(['[', ']'])
        .filter(|candidate| !candidate.is_empty())
        .filter_map(|candidate| candidate.split([':', '\\']).nth(1))
}

/// Decode a single message body.
pub fn parse_body(body: &str) -> Option<LaserReport> {
    if body.starts_with("E0") {
        let register = suffix_after_s(body)?.parse::<i32>().ok()?;
        return LaserMode::from_register(register).map(LaserReport::Mode);
    }

    if body.starts_with("READY") || body.starts_with("START") {
        if body.contains('=') {
            let code = body.split('=').nth(1)?.trim().parse::<i32>().ok()?;
            return LaserStatus::from_problem_code(code).map(LaserReport::Status);
        }
        let status = if body.starts_with("READY") {
            LaserStatus::Ready
        } else {
            LaserStatus::Busy
        };
        return Some(LaserReport::Status(status));
    }

    if body.starts_with("U2") {
        return suffix_after_s(body)?
            .parse::<f64>()
            .ok()
            .map(LaserReport::CoolingTemperature);
    }
    if body.starts_with("D0") {
        return parse_int(body).map(LaserReport::EoDelayMax);
    }
    if body.starts_with("P0") {
        return parse_int(body).map(LaserReport::PackPulses);
    }
    if body.starts_with("D1") {
        return parse_int(body).map(LaserReport::EoDelayAdjust);
    }

    None
}

fn suffix_after_s(body: &str) -> Option<&str> {
    body.split('S').nth(1).map(str::trim)
}

fn parse_int(body: &str) -> Option<i32> {
    suffix_after_s(body)?.parse::<i32>().ok()
}

/// Laser message decoder bound to the device state store.
///
/// Each decoded reply is applied to the store before the next one is looked
/// at, so the summary emitted on `D1` includes everything earlier in the same
/// frame.
#[derive(Debug, Clone)]
pub struct LaserDecoder {
    store: DeviceStateStore,
}

impl LaserDecoder {
    /// Create a decoder that writes into `store`.
    pub fn new(store: DeviceStateStore) -> Self {
        Self { store }
    }

    /// Decode a complete frame, apply it, and return the resulting events.
    pub fn decode(&self, frame: &str) -> Vec<LaserEvent> {
        let mut events = Vec::new();

        for body in message_bodies(frame) {
            let Some(report) = parse_body(body) else {
                tracing::trace!(body, "Ignoring unrecognised laser message");
                continue;
            };
            let state = self.store.apply_laser(&report);
            events.push(LaserEvent::Report(report));
            if report.ends_status_round() {
                events.push(LaserEvent::StatusSummaryReady(state));
            }
        }

        if frame.contains(ERROR_MARKER) {
            events.push(LaserEvent::ErrorReported);
        }

        events
    }
}

/// A query from the status round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusQuery {
    /// `SAY`: general status
    Say,
    /// `E0/?`: output mode
    Mode,
    /// `U2/?`: cooling water temperature
    CoolingTemperature,
    /// `P0/?`: PACK pulse count
    PackPulses,
    /// `D0/?`: EO delay in MAX mode
    EoDelayMax,
    /// `D1/?`: EO delay in ADJUST mode
    EoDelayAdjust,
}

impl StatusQuery {
    /// The six queries of a status round, in send order.
    pub const ROUND: [StatusQuery; 6] = [
        StatusQuery::Say,
        StatusQuery::Mode,
        StatusQuery::CoolingTemperature,
        StatusQuery::PackPulses,
        StatusQuery::EoDelayMax,
        StatusQuery::EoDelayAdjust,
    ];

    /// Message body of the query.
    pub fn body(self) -> &'static str {
        match self {
            StatusQuery::Say => "SAY",
            StatusQuery::Mode => "E0/?",
            StatusQuery::CoolingTemperature => "U2/?",
            StatusQuery::PackPulses => "P0/?",
            StatusQuery::EoDelayMax => "D0/?",
            StatusQuery::EoDelayAdjust => "D1/?",
        }
    }
}

/// Outbound laser command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaserCommand {
    /// Start firing
    Start,
    /// Stop firing
    Stop,
    /// Select the output mode
    SetMode(LaserMode),
    /// One status query
    Query(StatusQuery),
}

impl fmt::Display for LaserCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LaserCommand::Start => f.write_str("[NL:START\\PC]"),
            LaserCommand::Stop => f.write_str("[NL:STOP\\PC]"),
            LaserCommand::SetMode(mode) => write!(f, "[NL:E0/S{}\\PC]", mode.register()),
            LaserCommand::Query(query) => write!(f, "[NL:{}\\PC]", query.body()),
        }
    }
}
