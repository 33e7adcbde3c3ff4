use super::{LinkInput, LinkTransport};
use crate::config::{LinkSettings, Parity};
use crate::error::TransportError;
use crate::link::Link;
use async_trait::async_trait;
use bytes::Bytes;
use serialport::SerialPort;
use std::io::{BufRead, BufReader, ErrorKind, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Internal read timeout; bounds how long a reader takes to notice it was superseded.
const READ_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Largest chunk handed over from a raw read.
const RAW_READ_SIZE: usize = 256;

/// How the reader thread cuts the byte stream into chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// One chunk per newline-terminated line
    Lines,
    /// Whatever a single read returns
    Raw,
}

impl ReadMode {
    /// The motion controller is line oriented, the laser is not.
    pub fn for_link(link: Link) -> Self {
        match link {
            Link::Motion => ReadMode::Lines,
            Link::Laser => ReadMode::Raw,
        }
    }
}

/// Serial adapter for one RS-232 / USB-serial link
///
/// Wraps the `serialport` crate. Writes run on Tokio's blocking pool with the
/// port handle behind a mutex. Each successful `open` starts a reader thread on
/// a cloned handle that pushes [`LinkInput`]s into the link's receive channel.
/// Reopening bumps a generation counter so a reader left over from the previous
/// handle exits on its next poll.
#[derive(Clone)]
pub struct SerialAdapter {
    link: Link,
    settings: LinkSettings,
    /// Write handle, `None` while closed
    port: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    generation: Arc<AtomicU64>,
    input: mpsc::Sender<LinkInput>,
}

impl SerialAdapter {
    /// Create a closed adapter for `link` that will deliver input to `input`.
    pub fn new(link: Link, settings: LinkSettings, input: mpsc::Sender<LinkInput>) -> Self {
        Self {
            link,
            settings,
            port: Arc::new(Mutex::new(None)),
            generation: Arc::new(AtomicU64::new(0)),
            input,
        }
    }

    /// Link this adapter serves.
    pub fn link(&self) -> Link {
        self.link
    }

    /// Baud rate from the link settings.
    pub fn baud_rate(&self) -> u32 {
        self.settings.baud_rate
    }
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(err) => {
            tracing::warn!(%err, "Serial port enumeration failed");
            Vec::new()
        }
    }
}

fn open_port(settings: &LinkSettings) -> Result<Box<dyn SerialPort>, TransportError> {
    let data_bits = match settings.data_bits {
        5 => serialport::DataBits::Five,
        6 => serialport::DataBits::Six,
        7 => serialport::DataBits::Seven,
        _ => serialport::DataBits::Eight,
    };
    let stop_bits = match settings.stop_bits {
        2 => serialport::StopBits::Two,
        _ => serialport::StopBits::One,
    };
    let parity = match settings.parity {
        Parity::None => serialport::Parity::None,
        Parity::Even => serialport::Parity::Even,
        Parity::Odd => serialport::Parity::Odd,
    };

    let mut port = serialport::new(&settings.port, settings.baud_rate)
        .data_bits(data_bits)
        .stop_bits(stop_bits)
        .parity(parity)
        .timeout(READ_POLL_TIMEOUT)
        .open()
        .map_err(|e| TransportError::Open {
            port: settings.port.clone(),
            reason: e.to_string(),
        })?;

    // Some USB CDC drivers reject modem control lines; the link still works.
    if let Err(err) = port.write_data_terminal_ready(settings.dtr) {
        tracing::warn!(port = %settings.port, %err, "Could not set DTR");
    }
    if let Err(err) = port.write_request_to_send(settings.rts) {
        tracing::warn!(port = %settings.port, %err, "Could not set RTS");
    }

    Ok(port)
}

fn is_poll_timeout(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
    )
}

struct Reader {
    link: Link,
    port_name: String,
    generation: Arc<AtomicU64>,
    my_generation: u64,
    slot: Arc<Mutex<Option<Box<dyn SerialPort>>>>,
    input: mpsc::Sender<LinkInput>,
}

impl Reader {
    fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.my_generation
    }

    /// Returns `false` when the receive side has gone away.
    fn deliver(&self, chunk: Bytes) -> bool {
        self.input.blocking_send(LinkInput::Chunk(chunk)).is_ok()
    }

    fn run(self, port: Box<dyn SerialPort>) {
        let result = match ReadMode::for_link(self.link) {
            ReadMode::Lines => self.read_lines(port),
            ReadMode::Raw => self.read_raw(port),
        };

        let Err(source) = result else {
            tracing::debug!(link = %self.link, port = %self.port_name, "Serial reader finished");
            return;
        };

        tracing::warn!(link = %self.link, port = %self.port_name, %source, "Serial reader stopped");
        {
            let mut slot = self.slot.blocking_lock();
            if self.is_current() {
                *slot = None;
            }
        }
        let _ = self.input.blocking_send(LinkInput::Fault(TransportError::Read {
            port: self.port_name.clone(),
            source,
        }));
    }

    fn read_lines(&self, port: Box<dyn SerialPort>) -> std::io::Result<()> {
        let mut reader = BufReader::new(port);
        let mut line = Vec::new();
        while self.is_current() {
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "serial port returned EOF",
                    ))
                }
                Ok(_) if line.last() == Some(&b'\n') => {
                    if !self.deliver(Bytes::from(std::mem::take(&mut line))) {
                        return Ok(());
                    }
                }
                Ok(_) => {}
                // Partial line stays in `line` until the rest arrives.
                Err(e) if is_poll_timeout(&e) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    fn read_raw(&self, mut port: Box<dyn SerialPort>) -> std::io::Result<()> {
        let mut buffer = [0u8; RAW_READ_SIZE];
        while self.is_current() {
            match port.read(&mut buffer) {
                Ok(0) => {
                    return Err(std::io::Error::new(
                        ErrorKind::UnexpectedEof,
                        "serial port returned EOF",
                    ))
                }
                Ok(n) => {
                    if !self.deliver(Bytes::copy_from_slice(&buffer[..n])) {
                        return Ok(());
                    }
                }
                Err(e) if is_poll_timeout(&e) => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

#[async_trait]
impl LinkTransport for SerialAdapter {
    fn port_name(&self) -> &str {
        &self.settings.port
    }

    async fn is_open(&self) -> bool {
        self.port.lock().await.is_some()
    }

    async fn open(&self) -> Result<(), TransportError> {
        let settings = self.settings.clone();
        let slot = self.port.clone();
        let generation = self.generation.clone();
        let input = self.input.clone();
        let link = self.link;

        tokio::task::spawn_blocking(move || -> Result<(), TransportError> {
            let port = open_port(&settings)?;
            let read_half = port.try_clone().map_err(|e| TransportError::Open {
                port: settings.port.clone(),
                reason: format!("cannot clone handle for reader: {e}"),
            })?;

            let my_generation = {
                let mut guard = slot.blocking_lock();
                let my_generation = generation.fetch_add(1, Ordering::SeqCst) + 1;
                *guard = Some(port);
                my_generation
            };

            let reader = Reader {
                link,
                port_name: settings.port.clone(),
                generation,
                my_generation,
                slot,
                input,
            };
            std::thread::Builder::new()
                .name(format!("{link}-serial-reader"))
                .spawn(move || reader.run(read_half))
                .map_err(|e| TransportError::Open {
                    port: settings.port.clone(),
                    reason: format!("cannot start reader thread: {e}"),
                })?;

            tracing::info!(
                %link,
                port = %settings.port,
                baud = settings.baud_rate,
                "Serial port opened"
            );
            Ok(())
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?
    }

    async fn close(&self) {
        let mut guard = self.port.lock().await;
        self.generation.fetch_add(1, Ordering::SeqCst);
        if guard.take().is_some() {
            tracing::debug!(link = %self.link, port = %self.settings.port, "Serial port closed");
        }
    }

    async fn write_line(&self, message: &str) -> Result<(), TransportError> {
        let slot = self.port.clone();
        let generation = self.generation.clone();
        let port_name = self.settings.port.clone();
        let line = format!("{message}\n");

        // Execute blocking serial I/O on dedicated thread
        tokio::task::spawn_blocking(move || {
            let mut guard = slot.blocking_lock();
            let handle = guard
                .as_mut()
                .ok_or_else(|| TransportError::Closed(port_name.clone()))?;

            let result = handle
                .write_all(line.as_bytes())
                .and_then(|()| handle.flush());

            if let Err(source) = result {
                // Treat the handle as dead so the next send reopens it.
                *guard = None;
                generation.fetch_add(1, Ordering::SeqCst);
                return Err(TransportError::Write {
                    port: port_name,
                    source,
                });
            }
            Ok(())
        })
        .await
        .map_err(|e| TransportError::Task(e.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LinkSettings;

    #[test]
    fn test_read_mode_per_link() {
        assert_eq!(ReadMode::for_link(Link::Motion), ReadMode::Lines);
        assert_eq!(ReadMode::for_link(Link::Laser), ReadMode::Raw);
    }

    #[tokio::test]
    async fn test_serial_adapter_creation() {
        let (tx, _rx) = mpsc::channel(4);
        let adapter = SerialAdapter::new(Link::Laser, LinkSettings::laser_defaults(), tx);
        assert_eq!(adapter.port_name(), "COM1");
        assert_eq!(adapter.baud_rate(), 19200);
        assert_eq!(adapter.link(), Link::Laser);
        assert!(!adapter.is_open().await);
    }

    #[tokio::test]
    async fn test_open_missing_port_fails() {
        let (tx, _rx) = mpsc::channel(4);
        let settings = LinkSettings {
            port: "/dev/pld-control-no-such-port".to_string(),
            ..LinkSettings::motion_defaults()
        };
        let adapter = SerialAdapter::new(Link::Motion, settings, tx);
        let err = adapter.open().await.unwrap_err();
        assert!(matches!(err, TransportError::Open { .. }));
        assert!(!adapter.is_open().await);
    }

    #[tokio::test]
    async fn test_write_on_closed_port_fails() {
        let (tx, _rx) = mpsc::channel(4);
        let adapter = SerialAdapter::new(Link::Laser, LinkSettings::laser_defaults(), tx);
        let err = adapter.write_line("[NL:SAY\\PC]").await.unwrap_err();
        assert!(matches!(err, TransportError::Closed(_)));
    }
}
