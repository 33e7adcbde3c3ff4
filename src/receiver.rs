//! Per-link receive tasks
//!
//! Each link has exactly one [`LinkReceiver`], running on its own task and fed
//! by the adapter's channel. It owns the link's [`FrameExtractor`], so frame
//! assembly and decoding for a link never run concurrently with themselves.
//!
//! ```text
//! adapter reader --LinkInput--> LinkReceiver --+--> DeviceStateStore
//!                                              +--> LogSink
//!                                              +--> EventBus (display)
//! ```

use crate::adapters::LinkInput;
use crate::error::TransportError;
use crate::framing::{Frame, FrameExtractor};
use crate::link::Link;
use crate::log_sink::LogSink;
use crate::messages::{DisplayEvent, EventBus};
use crate::protocol::{motion, LaserDecoder, LaserEvent, LaserReport, MotionMessage};
use crate::state::{DeviceStateStore, LaserStatus};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Capacity of a link's input channel.
pub const INPUT_CAPACITY: usize = 64;

/// Create the channel an adapter writes into and a receiver reads from.
pub fn input_channel() -> (mpsc::Sender<LinkInput>, mpsc::Receiver<LinkInput>) {
    mpsc::channel(INPUT_CAPACITY)
}

/// Receive-side state of one link.
#[derive(Debug)]
pub struct LinkReceiver {
    extractor: FrameExtractor,
    laser: LaserDecoder,
    store: DeviceStateStore,
    log: LogSink,
    events: EventBus,
}

impl LinkReceiver {
    /// Create the receiver for `link`.
    pub fn new(link: Link, store: DeviceStateStore, log: LogSink, events: EventBus) -> Self {
        Self {
            extractor: FrameExtractor::new(link),
            laser: LaserDecoder::new(store.clone()),
            store,
            log,
            events,
        }
    }

    /// Link this receiver serves.
    pub fn link(&self) -> Link {
        self.extractor.link()
    }

    /// Consume input until every sender is gone.
    pub async fn run(mut self, mut input: mpsc::Receiver<LinkInput>) {
        let link = self.link();
        tracing::debug!(%link, "Receive task started");
        while let Some(item) = input.recv().await {
            self.handle(item).await;
        }
        tracing::debug!(%link, "Receive task finished");
    }

    /// Run on a new task.
    pub fn spawn(self, input: mpsc::Receiver<LinkInput>) -> JoinHandle<()> {
        tokio::spawn(self.run(input))
    }

    /// Process one item from the adapter.
    pub async fn handle(&mut self, item: LinkInput) {
        match item {
            LinkInput::Chunk(chunk) => {
                if let Some(frame) = self.extractor.feed(&chunk) {
                    self.handle_frame(frame).await;
                }
            }
            LinkInput::Fault(err) => self.handle_fault(err).await,
        }
    }

    async fn handle_frame(&mut self, frame: Frame) {
        match frame.link {
            Link::Motion => self.handle_motion(frame.text).await,
            Link::Laser => self.handle_laser(frame.text).await,
        }
    }

    async fn handle_motion(&mut self, line: String) {
        match motion::decode(&line) {
            MotionMessage::Telemetry(update) => {
                if update.is_empty() {
                    tracing::debug!(line = %line, "Telemetry line without usable fields");
                    return;
                }
                let record = self.store.apply_telemetry(&update);
                self.events.publish(DisplayEvent::Telemetry(record));
            }
            MotionMessage::Log(text) => {
                self.log
                    .record(format!("{}{}", Link::Motion.inbound_tag(), text))
                    .await;
                self.events.publish(DisplayEvent::LogLine(text));
            }
        }
    }

    async fn handle_laser(&mut self, frame: String) {
        self.log
            .record(format!("{}{}", Link::Laser.inbound_tag(), frame))
            .await;

        let mut changed = false;
        for event in self.laser.decode(&frame) {
            match event {
                LaserEvent::Report(report) => {
                    changed = true;
                    self.announce(report);
                }
                LaserEvent::StatusSummaryReady(state) => {
                    self.events.publish(DisplayEvent::StatusSummary(state));
                }
                LaserEvent::ErrorReported => {
                    tracing::warn!(frame = %frame, "Laser reported an error");
                    self.events.publish(DisplayEvent::DeviceError);
                    self.events.notice("Laser reported ERROR");
                }
            }
        }

        if changed {
            self.events.publish(DisplayEvent::Laser(self.store.laser()));
        }
    }

    fn announce(&self, report: LaserReport) {
        let LaserReport::Status(status) = report else {
            return;
        };
        if let Some(message) = status.problem_message() {
            tracing::warn!(%status, "Laser problem");
            self.events.publish(DisplayEvent::Problem(status));
            self.events.notice(message);
        } else if status == LaserStatus::Busy {
            self.events.notice("Laser started");
        }
    }

    async fn handle_fault(&mut self, err: TransportError) {
        let link = self.link();
        tracing::error!(%link, error = %err, "Link read fault");
        let text = format!("Connection error on the {link} link: {err}");
        self.log.record(text.clone()).await;
        self.events.notice(text);
    }
}
