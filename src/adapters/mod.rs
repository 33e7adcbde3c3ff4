//! Serial link adapters
//!
//! [`LinkTransport`] is the seam between the command writer and a physical
//! port. The real implementation wraps the `serialport` crate; the mock keeps a
//! call log and can be told to fail, for tests and for running without
//! hardware.
//!
//! Inbound data does not go through the trait: an adapter pushes
//! [`LinkInput`] values into the channel given at construction, and the link's
//! receive task consumes them one at a time.

pub mod mock_adapter;
#[cfg(feature = "instrument_serial")]
pub mod serial_adapter;

pub use mock_adapter::MockAdapter;
#[cfg(feature = "instrument_serial")]
pub use serial_adapter::{available_ports, SerialAdapter};

use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;

/// What a port reader hands to the link's receive task.
#[derive(Debug)]
pub enum LinkInput {
    /// One read's worth of bytes (one line on the motion link)
    Chunk(Bytes),
    /// The reader hit an I/O fault and stopped; the port is now closed
    Fault(TransportError),
}

/// Outbound side of a serial link.
#[async_trait]
pub trait LinkTransport: Send + Sync {
    /// Port name for logs and errors.
    fn port_name(&self) -> &str;

    /// Whether the port is currently open.
    async fn is_open(&self) -> bool;

    /// Open (or reopen) the port.
    async fn open(&self) -> Result<(), TransportError>;

    /// Close the port. Closing a closed port is a no-op.
    async fn close(&self);

    /// Write `message` followed by a newline.
    async fn write_line(&self, message: &str) -> Result<(), TransportError>;
}
