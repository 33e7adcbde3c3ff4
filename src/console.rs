//! Console assembly
//!
//! [`Console`] wires the pieces together for one session: operator log, state
//! store, event bus, one receive task per attached link, the command writer,
//! the status sequencer and the laser controller. It also maps
//! [`OperatorCommand`]s onto them.
//!
//! Port selection at startup: the laser always uses its configured port. The
//! motion controller uses its configured port if that port exists, otherwise
//! the first other available port; with no candidate at all the motion link
//! has no device and every motion command fails with `NoDevice`.

use crate::adapters::{LinkInput, LinkTransport};
use crate::command::CommandWriter;
use crate::config::Settings;
use crate::error::AppResult;
use crate::laser_control::{LaserController, StartOutcome};
use crate::link::Link;
use crate::log_sink::LogSink;
use crate::messages::{DisplayEvent, EventBus, OperatorCommand, HELP_TEXT};
use crate::receiver::LinkReceiver;
use crate::state::{DeviceStateStore, LaserState, TelemetryRecord, TemperatureBand};
use crate::status_query::StatusQuerySequencer;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// A transport plus the channel its reader delivers into.
pub struct LinkEndpoint {
    /// Outbound side
    pub transport: Arc<dyn LinkTransport>,
    /// Inbound side, consumed by the link's receive task
    pub input: mpsc::Receiver<LinkInput>,
}

/// Port picked for the motion controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortChoice {
    /// Port name
    pub port: String,
    /// `true` if the configured port was missing and another one was taken
    pub fallback: bool,
}

/// Pick the motion controller port from the available ones.
///
/// `exclude` is the laser's port, which is never handed to the motion link.
pub fn choose_motion_port(preferred: &str, available: &[String], exclude: &str) -> Option<PortChoice> {
    if available.iter().any(|p| p == preferred) {
        return Some(PortChoice {
            port: preferred.to_string(),
            fallback: false,
        });
    }
    available
        .iter()
        .find(|p| p.as_str() != exclude)
        .map(|p| PortChoice {
            port: p.clone(),
            fallback: true,
        })
}

/// What the front end should do after a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Nothing to print; results arrive as display events
    Done,
    /// Print this text
    Text(String),
    /// End the session
    Quit,
}

/// One running console session.
pub struct Console {
    settings: Settings,
    store: DeviceStateStore,
    log: LogSink,
    events: EventBus,
    writer: CommandWriter,
    sequencer: StatusQuerySequencer,
    laser: LaserController,
    receivers: Vec<JoinHandle<()>>,
}

impl Console {
    /// Build a session from already constructed link endpoints.
    ///
    /// Truncates the operator log and spawns a receive task per endpoint.
    /// Subscribe to `events` beforehand to see startup notices.
    pub async fn assemble(
        settings: Settings,
        events: EventBus,
        motion: Option<LinkEndpoint>,
        laser: Option<LinkEndpoint>,
    ) -> AppResult<Self> {
        let log = LogSink::open_truncated(settings.log_file()).await?;
        let store = DeviceStateStore::new();

        let mut receivers = Vec::new();
        let mut spawn_link = |link: Link, endpoint: Option<LinkEndpoint>| {
            endpoint.map(|LinkEndpoint { transport, input }| {
                let receiver = LinkReceiver::new(link, store.clone(), log.clone(), events.clone());
                receivers.push(receiver.spawn(input));
                transport
            })
        };
        let motion = spawn_link(Link::Motion, motion);
        let laser = spawn_link(Link::Laser, laser);

        let writer = CommandWriter::new(motion, laser, log.clone(), events.clone());
        let sequencer =
            StatusQuerySequencer::new(writer.clone(), events.clone(), settings.status_query.pacing());
        let controller = LaserController::new(writer.clone(), store.clone(), events.clone());

        Ok(Self {
            settings,
            store,
            log,
            events,
            writer,
            sequencer,
            laser: controller,
            receivers,
        })
    }

    /// Enumerate serial ports, open both links and build the session.
    ///
    /// A port that fails to open is kept; the writer retries the open on the
    /// next send.
    #[cfg(feature = "instrument_serial")]
    pub async fn connect(settings: Settings, events: EventBus) -> AppResult<Self> {
        use crate::adapters::{available_ports, SerialAdapter};
        use crate::receiver::input_channel;

        let ports = available_ports();
        tracing::info!(?ports, "Serial ports found");

        let mut notes = Vec::new();
        let motion_port = choose_motion_port(&settings.motion.port, &ports, &settings.laser.port);
        match &motion_port {
            Some(choice) if choice.fallback => notes.push(format!(
                "Motion controller port {} not found, using {}",
                settings.motion.port, choice.port
            )),
            Some(_) => {}
            None => notes.push("No serial port available for the motion controller".to_string()),
        }

        let endpoint = |link: Link, port: String| {
            let (tx, rx) = input_channel();
            let mut link_settings = settings.link(link).clone();
            link_settings.port = port;
            LinkEndpoint {
                transport: Arc::new(SerialAdapter::new(link, link_settings, tx)),
                input: rx,
            }
        };
        let motion = motion_port.map(|choice| endpoint(Link::Motion, choice.port));
        let laser = Some(endpoint(Link::Laser, settings.laser.port.clone()));

        let console = Self::assemble(settings, events, motion, laser).await?;
        for note in notes {
            tracing::warn!("{note}");
            console.log.record(note.clone()).await;
            console.events.notice(note);
        }
        console.open_links().await;
        Ok(console)
    }

    /// Serial support was compiled out.
    #[cfg(not(feature = "instrument_serial"))]
    pub async fn connect(_settings: Settings, _events: EventBus) -> AppResult<Self> {
        Err(crate::error::PldError::SerialFeatureDisabled)
    }

    /// Open every attached link, reporting failures without giving up.
    pub async fn open_links(&self) {
        for link in [Link::Motion, Link::Laser] {
            let Some(transport) = self.writer.transport(link) else {
                continue;
            };
            if let Err(err) = transport.open().await {
                let text = format!("Could not open the {link} link: {err}");
                tracing::warn!(%link, error = %err, "Open failed");
                self.log.record(text.clone()).await;
                self.events.notice(text);
            }
        }
    }

    /// Startup sequence: one status round, then reflect the reported mode in
    /// the selection without echoing it, then enable mode selection.
    pub async fn initialize(&self) {
        if self.writer.has_device(Link::Laser) {
            if let Some(round) = self.sequencer.spawn() {
                if let Err(err) = round.await {
                    tracing::error!(%err, "Startup status round failed");
                }
            }
        }
        if let Some(mode) = self.store.laser().mode {
            // Suppressed while initializing, only records the selection.
            let _ = self.laser.select_mode(mode).await;
        }
        self.laser.finish_startup();
        tracing::info!("Console initialized");
    }

    /// Close both links and stop the receive tasks.
    pub async fn shutdown(self) {
        for link in [Link::Motion, Link::Laser] {
            if let Some(transport) = self.writer.transport(link) {
                transport.close().await;
            }
        }
        for task in self.receivers {
            task.abort();
        }
        tracing::info!("Console shut down");
    }

    /// Loaded settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Device state.
    pub fn store(&self) -> &DeviceStateStore {
        &self.store
    }

    /// Display event bus.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Operator log.
    pub fn log(&self) -> &LogSink {
        &self.log
    }

    /// Command writer.
    pub fn writer(&self) -> &CommandWriter {
        &self.writer
    }

    /// Status round sequencer.
    pub fn sequencer(&self) -> &StatusQuerySequencer {
        &self.sequencer
    }

    /// Laser on/off control.
    pub fn laser(&self) -> &LaserController {
        &self.laser
    }

    /// Carry out one operator command.
    ///
    /// Send failures have already been logged and published when this
    /// returns, so they only show up here as [`Reply::Done`].
    pub async fn execute(&self, command: OperatorCommand) -> Reply {
        match command {
            OperatorCommand::Motion(cmd) => {
                let _ = self.writer.send_motion(cmd).await;
                Reply::Done
            }
            OperatorCommand::LaserStart(duration) => {
                let auto_stop = duration.or_else(|| self.settings.laser_timer.auto_stop());
                match self.laser.start(auto_stop).await {
                    Ok(StartOutcome::Started) => match auto_stop {
                        Some(d) => Reply::Text(format!("Laser on, stopping in {}s", d.as_secs())),
                        None => Reply::Text("Laser on".to_string()),
                    },
                    Ok(StartOutcome::ModeOff) | Err(_) => Reply::Done,
                }
            }
            OperatorCommand::LaserStop => {
                let _ = self.laser.stop().await;
                Reply::Text(format!("Laser off after {}", self.laser.stopwatch().display()))
            }
            OperatorCommand::LaserMode(mode) => {
                let _ = self.laser.select_mode(mode).await;
                Reply::Done
            }
            OperatorCommand::Status => match self.sequencer.spawn() {
                Some(_) => Reply::Done,
                None => Reply::Text("Status round already running".to_string()),
            },
            OperatorCommand::Show => Reply::Text(format!(
                "{}\n{}",
                render_telemetry(&self.store.telemetry()),
                render_laser(&self.store.laser())
            )),
            OperatorCommand::Stopwatch => Reply::Text(self.laser.stopwatch().display()),
            OperatorCommand::ResetStopwatch => {
                self.laser.reset_stopwatch();
                Reply::Text(self.laser.stopwatch().display())
            }
            OperatorCommand::Ports => Reply::Text(self.port_listing()),
            OperatorCommand::Help => Reply::Text(HELP_TEXT.to_string()),
            OperatorCommand::Quit => Reply::Quit,
        }
    }

    fn port_listing(&self) -> String {
        let attached = |link: Link| {
            self.writer
                .transport(link)
                .map_or_else(|| "no device".to_string(), |t| t.port_name().to_string())
        };
        #[cfg(feature = "instrument_serial")]
        let available = crate::adapters::available_ports().join(", ");
        #[cfg(not(feature = "instrument_serial"))]
        let available = String::from("(serial support disabled)");
        format!(
            "Motion: {}\nLaser: {}\nAvailable: {}",
            attached(Link::Motion),
            attached(Link::Laser),
            available
        )
    }
}

fn band_label(band: TemperatureBand) -> &'static str {
    match band {
        TemperatureBand::Normal => "normal",
        TemperatureBand::Warm => "warm",
        TemperatureBand::Hot => "HOT",
    }
}

/// One-line telemetry readout.
pub fn render_telemetry(record: &TelemetryRecord) -> String {
    format!(
        "N2 {:.3} sccm | Ar {:.3} sccm | chamber {:.1}°C ({}) | motor {}",
        record.nitrogen_flow,
        record.argon_flow,
        record.chamber_temperature,
        band_label(record.temperature_band()),
        record.motor_position
    )
}

/// One-line laser readout.
pub fn render_laser(state: &LaserState) -> String {
    let mode = state.mode.map_or_else(|| "unknown".to_string(), |m| m.to_string());
    let status = state.status.map_or_else(|| "-".to_string(), |s| s.to_string());
    format!(
        "Laser {} | mode {} | status {} | cooling {}°C",
        if state.laser_on { "ON" } else { "off" },
        mode,
        status,
        state.cooling_temperature
    )
}

/// Text for a display event, or `None` for events not worth printing.
pub fn render_event(event: &DisplayEvent) -> Option<String> {
    match event {
        DisplayEvent::Telemetry(record) => Some(render_telemetry(record)),
        DisplayEvent::Laser(_) => None,
        DisplayEvent::StatusSummary(state) => Some(state.summary()),
        DisplayEvent::Problem(status) => Some(format!("!! Laser problem: {status}")),
        DisplayEvent::DeviceError => Some("!! Laser reported ERROR".to_string()),
        DisplayEvent::LogLine(line) => Some(format!("Device: {line}")),
        DisplayEvent::Notice(text) => Some(format!("* {text}")),
        DisplayEvent::Busy(true) => Some("Status query running...".to_string()),
        DisplayEvent::Busy(false) => Some("Status query done".to_string()),
    }
}
