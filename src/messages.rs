//! Message types between the device plumbing and the front end
//!
//! Two directions:
//! - [`DisplayEvent`]s flow out of the receive tasks, command writer and
//!   sequencer to whatever is showing the console (push model, one
//!   `tokio::sync::broadcast` channel wrapped in [`EventBus`]).
//! - [`OperatorCommand`]s are operator intents parsed from the console's input
//!   line and dispatched onto the writer, sequencer and laser controller.

use crate::protocol::MotionCommand;
use crate::state::{LaserMode, LaserState, LaserStatus, TelemetryRecord};
use std::str::FromStr;
use std::time::Duration;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

/// Something the display should show.
#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    /// New telemetry snapshot from the motion controller
    Telemetry(TelemetryRecord),
    /// Laser state changed
    Laser(LaserState),
    /// A status round completed
    StatusSummary(LaserState),
    /// The laser reported a problem code
    Problem(LaserStatus),
    /// A laser frame contained `ERROR`
    DeviceError,
    /// Free text line from a device
    LogLine(String),
    /// Message for the operator (failures, confirmations)
    Notice(String),
    /// Status round running (`true`) or finished (`false`)
    Busy(bool),
}

/// Fan-out of display events to any number of subscribers.
///
/// Publishing never blocks and never fails; with nobody subscribed the event is
/// dropped. A subscriber that falls behind by more than the channel capacity
/// loses the oldest events.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DisplayEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a bus with no subscribers.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CAPACITY);
        Self { sender }
    }

    /// Publish an event.
    pub fn publish(&self, event: DisplayEvent) {
        let _ = self.sender.send(event);
    }

    /// Publish an operator notice.
    pub fn notice(&self, text: impl Into<String>) {
        self.publish(DisplayEvent::Notice(text.into()));
    }

    /// Receive events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<DisplayEvent> {
        self.sender.subscribe()
    }
}

/// Errors from parsing an operator command line
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommandParseError {
    /// Empty input
    #[error("Empty command")]
    Empty,
    /// First word not recognised
    #[error("Unknown command '{0}'")]
    Unknown(String),
    /// Wrong number or kind of arguments
    #[error("Usage: {0}")]
    Usage(&'static str),
}

/// Operator intent entered at the console.
#[derive(Debug, Clone, PartialEq)]
pub enum OperatorCommand {
    /// Send a command to the motion controller
    Motion(MotionCommand),
    /// Switch the laser on, optionally with an auto-stop delay
    LaserStart(Option<Duration>),
    /// Switch the laser off
    LaserStop,
    /// Select the laser output mode
    LaserMode(LaserMode),
    /// Run a laser status round
    Status,
    /// Show telemetry and laser state
    Show,
    /// Show the firing stopwatch
    Stopwatch,
    /// Reset the firing stopwatch
    ResetStopwatch,
    /// List serial ports
    Ports,
    /// Print the command list
    Help,
    /// Leave the console
    Quit,
}

/// Command list printed by `help`.
pub const HELP_TEXT: &str = "\
Motion:  stop | left | right | goto <pos> | sweep <range> <midpoint>
         gas <n2 sccm> <ar sccm> | gasraw <n2 slider> <ar slider>
Laser:   laser start [seconds] | laser stop | mode off|adjust|max | status
Other:   show | time | time reset | ports | help | quit";

fn parse_arg<T: FromStr>(arg: Option<&str>, usage: &'static str) -> Result<T, CommandParseError> {
    arg.and_then(|a| a.parse().ok())
        .ok_or(CommandParseError::Usage(usage))
}

impl FromStr for OperatorCommand {
    type Err = CommandParseError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(head) = words.next() else {
            return Err(CommandParseError::Empty);
        };
        let head = head.to_ascii_lowercase();

        let command = match head.as_str() {
            "stop" => OperatorCommand::Motion(MotionCommand::Stop),
            "left" => OperatorCommand::Motion(MotionCommand::Left),
            "right" => OperatorCommand::Motion(MotionCommand::Right),
            "goto" => OperatorCommand::Motion(MotionCommand::GoTo(parse_arg(
                words.next(),
                "goto <pos>",
            )?)),
            "sweep" => {
                let usage = "sweep <range> <midpoint>";
                let range = parse_arg(words.next(), usage)?;
                let midpoint = parse_arg(words.next(), usage)?;
                OperatorCommand::Motion(MotionCommand::Sweep { range, midpoint })
            }
            "gas" => {
                let usage = "gas <n2 sccm> <ar sccm>";
                let n2_sccm: f64 = parse_arg(words.next(), usage)?;
                let ar_sccm: f64 = parse_arg(words.next(), usage)?;
                OperatorCommand::Motion(MotionCommand::Gas { n2_sccm, ar_sccm })
            }
            "gasraw" => {
                let usage = "gasraw <n2 slider> <ar slider>";
                let n2: u32 = parse_arg(words.next(), usage)?;
                let ar: u32 = parse_arg(words.next(), usage)?;
                OperatorCommand::Motion(MotionCommand::Gas {
                    n2_sccm: crate::protocol::motion::sccm_from_slider(
                        n2,
                        crate::protocol::motion::GAS_SLIDER_RESOLUTION,
                    ),
                    ar_sccm: crate::protocol::motion::sccm_from_slider(
                        ar,
                        crate::protocol::motion::GAS_SLIDER_RESOLUTION,
                    ),
                })
            }
            "laser" => {
                let usage = "laser start [seconds] | laser stop";
                match words.next().map(str::to_ascii_lowercase).as_deref() {
                    Some("start") => match words.next() {
                        None => OperatorCommand::LaserStart(None),
                        Some(secs) => {
                            let secs: u64 = parse_arg(Some(secs), usage)?;
                            if secs == 0 {
                                return Err(CommandParseError::Usage(usage));
                            }
                            OperatorCommand::LaserStart(Some(Duration::from_secs(secs)))
                        }
                    },
                    Some("stop") => OperatorCommand::LaserStop,
                    _ => return Err(CommandParseError::Usage(usage)),
                }
            }
            "mode" => {
                let usage = "mode off|adjust|max";
                let mode = match words.next().map(str::to_ascii_lowercase).as_deref() {
                    Some("off") => LaserMode::Off,
                    Some("adjust" | "adj") => LaserMode::Adjust,
                    Some("max") => LaserMode::Max,
                    _ => return Err(CommandParseError::Usage(usage)),
                };
                OperatorCommand::LaserMode(mode)
            }
            "status" => OperatorCommand::Status,
            "show" => OperatorCommand::Show,
            "time" => match words.next() {
                None => OperatorCommand::Stopwatch,
                Some("reset") => OperatorCommand::ResetStopwatch,
                Some(_) => return Err(CommandParseError::Usage("time [reset]")),
            },
            "ports" => OperatorCommand::Ports,
            "help" | "?" => OperatorCommand::Help,
            "quit" | "exit" => OperatorCommand::Quit,
            _ => return Err(CommandParseError::Unknown(head)),
        };

        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_motion_commands() {
        assert_eq!(
            "goto -250".parse(),
            Ok(OperatorCommand::Motion(MotionCommand::GoTo(-250)))
        );
        assert_eq!(
            "SWEEP 400 1200".parse(),
            Ok(OperatorCommand::Motion(MotionCommand::Sweep {
                range: 400,
                midpoint: 1200
            }))
        );
        assert_eq!(
            "gas 2.5 7".parse(),
            Ok(OperatorCommand::Motion(MotionCommand::Gas {
                n2_sccm: 2.5,
                ar_sccm: 7.0
            }))
        );
    }

    #[test]
    fn gasraw_scales_slider_positions() {
        let Ok(OperatorCommand::Motion(MotionCommand::Gas { n2_sccm, ar_sccm })) =
            "gasraw 2048 4096".parse()
        else {
            panic!("expected gas command");
        };
        assert!((n2_sccm - 5.0).abs() < 1e-9);
        assert!((ar_sccm - 10.0).abs() < 1e-9);
    }

    #[test]
    fn parses_laser_commands() {
        assert_eq!("laser start".parse(), Ok(OperatorCommand::LaserStart(None)));
        assert_eq!(
            "laser start 30".parse(),
            Ok(OperatorCommand::LaserStart(Some(Duration::from_secs(30))))
        );
        assert_eq!("laser stop".parse(), Ok(OperatorCommand::LaserStop));
        assert_eq!("mode adj".parse(), Ok(OperatorCommand::LaserMode(LaserMode::Adjust)));
        assert_eq!("status".parse(), Ok(OperatorCommand::Status));
    }

    #[test]
    fn rejects_bad_input() {
        assert_eq!("".parse::<OperatorCommand>(), Err(CommandParseError::Empty));
        assert_eq!(
            "fire".parse::<OperatorCommand>(),
            Err(CommandParseError::Unknown("fire".into()))
        );
        assert!(matches!(
            "goto here".parse::<OperatorCommand>(),
            Err(CommandParseError::Usage(_))
        ));
        assert!(matches!(
            "laser start 0".parse::<OperatorCommand>(),
            Err(CommandParseError::Usage(_))
        ));
        assert!(matches!(
            "mode turbo".parse::<OperatorCommand>(),
            Err(CommandParseError::Usage(_))
        ));
    }

    #[tokio::test]
    async fn bus_delivers_to_every_subscriber() {
        let bus = EventBus::new();
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();
        bus.notice("Laser started");
        assert_eq!(a.recv().await.unwrap(), DisplayEvent::Notice("Laser started".into()));
        assert_eq!(b.recv().await.unwrap(), DisplayEvent::Notice("Laser started".into()));
    }

    #[test]
    fn publish_without_subscribers_is_fine() {
        EventBus::new().publish(DisplayEvent::Busy(true));
    }
}
