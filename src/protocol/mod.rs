//! Wire protocols of the two devices.
//!
//! - [`motion`]: newline-framed ASCII of the motion / gas-flow controller
//! - [`laser`]: bracketed `[<routing>:<body>\<sender>]` messages of the laser
//!
//! Both decoders are forgiving: a field or sub-message that does not parse is
//! skipped and the rest of the frame still applies.

pub mod laser;
pub mod motion;

pub use laser::{LaserCommand, LaserDecoder, LaserEvent, LaserReport, StatusQuery};
pub use motion::{MotionCommand, MotionMessage};
