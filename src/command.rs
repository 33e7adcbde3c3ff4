//! Outbound command path
//!
//! [`CommandWriter`] is the only thing that writes to the serial links. For
//! every send it:
//!
//! 1. refuses with [`SendError::NoDevice`] if the link has no device, touching
//!    no port;
//! 2. writes the message plus newline if the port is open;
//! 3. if the port is closed, reopens it once and writes once more;
//! 4. on success appends `<tag><message>` to the operator log.
//!
//! Every failure is written to the operator log and published as a
//! [`DisplayEvent::Notice`].

use crate::adapters::LinkTransport;
use crate::error::{SendError, TransportError};
use crate::link::Link;
use crate::log_sink::LogSink;
use crate::messages::EventBus;
use crate::protocol::{LaserCommand, MotionCommand};
use std::sync::Arc;

/// Shared handle for sending commands to both links.
#[derive(Clone)]
pub struct CommandWriter {
    motion: Option<Arc<dyn LinkTransport>>,
    laser: Option<Arc<dyn LinkTransport>>,
    log: LogSink,
    events: EventBus,
}

impl std::fmt::Debug for CommandWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandWriter")
            .field("motion", &self.motion.as_ref().map(|t| t.port_name().to_string()))
            .field("laser", &self.laser.as_ref().map(|t| t.port_name().to_string()))
            .finish_non_exhaustive()
    }
}

impl CommandWriter {
    /// Create a writer. `None` for a link means no device was found for it.
    pub fn new(
        motion: Option<Arc<dyn LinkTransport>>,
        laser: Option<Arc<dyn LinkTransport>>,
        log: LogSink,
        events: EventBus,
    ) -> Self {
        Self {
            motion,
            laser,
            log,
            events,
        }
    }

    /// Transport attached to `link`, if any.
    pub fn transport(&self, link: Link) -> Option<&Arc<dyn LinkTransport>> {
        match link {
            Link::Motion => self.motion.as_ref(),
            Link::Laser => self.laser.as_ref(),
        }
    }

    /// Whether a device is attached to `link`.
    pub fn has_device(&self, link: Link) -> bool {
        self.transport(link).is_some()
    }

    /// Operator log this writer appends to.
    pub fn log(&self) -> &LogSink {
        &self.log
    }

    /// Send one message on `link`.
    pub async fn send(&self, link: Link, message: &str) -> Result<(), SendError> {
        match self.try_send(link, message).await {
            Ok(()) => {
                tracing::debug!(%link, message, "Sent");
                self.log
                    .record(format!("{}{}", link.outbound_tag(), message))
                    .await;
                Ok(())
            }
            Err(err) => {
                self.report(&err, message).await;
                Err(err)
            }
        }
    }

    /// Send a motion controller command.
    pub async fn send_motion(&self, command: MotionCommand) -> Result<(), SendError> {
        self.send(Link::Motion, &command.to_string()).await
    }

    /// Send a laser command.
    pub async fn send_laser(&self, command: LaserCommand) -> Result<(), SendError> {
        self.send(Link::Laser, &command.to_string()).await
    }

    async fn try_send(&self, link: Link, message: &str) -> Result<(), SendError> {
        let Some(transport) = self.transport(link) else {
            return Err(SendError::NoDevice(link));
        };
        let fail = |source| SendError::Transport { link, source };

        if transport.is_open().await {
            match transport.write_line(message).await {
                // Port went away between the check and the write.
                Err(TransportError::Closed(_)) => {}
                other => return other.map_err(fail),
            }
        }

        tracing::info!(%link, port = transport.port_name(), "Port closed, reopening");
        transport.open().await.map_err(fail)?;
        transport.write_line(message).await.map_err(fail)
    }

    async fn report(&self, err: &SendError, message: &str) {
        let text = match err {
            SendError::NoDevice(link) => {
                tracing::warn!(%link, message, "No device, command dropped");
                format!("No device found on the {link} link")
            }
            SendError::Transport { link, source } => {
                tracing::error!(%link, message, error = %source, "Send failed");
                format!("Message sending error on the {link} link: {source}")
            }
        };
        self.log.record(text.clone()).await;
        self.events.notice(text);
    }
}
