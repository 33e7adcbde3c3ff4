//! The two serial links of the console.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one of the two serial-attached devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Link {
    /// Motion / gas-flow microcontroller, newline framed.
    Motion,
    /// Pulsed laser power supply, bracket framed.
    Laser,
}

impl Link {
    /// Prefix written to the operator log for outbound messages on this link.
    pub fn outbound_tag(self) -> &'static str {
        match self {
            Link::Motion => "PLDcontrol: ",
            Link::Laser => "PC->NL: ",
        }
    }

    /// Prefix written to the operator log for inbound text on this link.
    pub fn inbound_tag(self) -> &'static str {
        match self {
            Link::Motion => "Device: ",
            Link::Laser => "NL->PC: ",
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Motion => f.write_str("motion"),
            Link::Laser => f.write_str("laser"),
        }
    }
}
