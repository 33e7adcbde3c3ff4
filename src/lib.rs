//! Core library for the PLD control console.
//!
//! Talks to the two serial-attached devices of a pulsed laser deposition
//! chamber: the motion / gas-flow microcontroller and the laser power supply.
//! Raw bytes from each link are framed, decoded into typed events, applied to
//! a shared state store and published to the display; outbound commands go
//! through a single writer that also keeps the operator log.
//!
//! The `pld_control` binary is a line-oriented terminal front end built on
//! [`console::Console`].

pub mod adapters;
pub mod command;
pub mod config;
pub mod console;
pub mod error;
pub mod framing;
pub mod laser_control;
pub mod link;
pub mod log_sink;
pub mod messages;
pub mod protocol;
pub mod receiver;
pub mod state;
pub mod status_query;
pub mod tracing_setup;

pub use config::Settings;
pub use error::{AppResult, PldError, SendError, TransportError};
pub use link::Link;
