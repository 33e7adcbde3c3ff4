//! End-to-end console tests against mock links
//!
//! Inbound bytes are injected through the same channel a serial reader would
//! use; outbound traffic is captured by `MockAdapter`.

use bytes::Bytes;
use pld_control::adapters::{LinkInput, LinkTransport, MockAdapter};
use pld_control::config::Settings;
use pld_control::console::{Console, LinkEndpoint, Reply};
use pld_control::messages::{DisplayEvent, EventBus, OperatorCommand};
use pld_control::protocol::MotionCommand;
use pld_control::receiver::input_channel;
use pld_control::state::{LaserMode, LaserStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

struct Bench {
    console: Console,
    events: broadcast::Receiver<DisplayEvent>,
    laser: MockAdapter,
    laser_tx: mpsc::Sender<LinkInput>,
    motion: Option<(MockAdapter, mpsc::Sender<LinkInput>)>,
    _dir: tempfile::TempDir,
}

fn endpoint(adapter: &MockAdapter) -> (LinkEndpoint, mpsc::Sender<LinkInput>) {
    let (tx, rx) = input_channel();
    (
        LinkEndpoint {
            transport: Arc::new(adapter.clone()) as Arc<dyn LinkTransport>,
            input: rx,
        },
        tx,
    )
}

async fn bench(with_motion: bool) -> Bench {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.application.log_file = Some(dir.path().join("pldcontrol_log_file.aki"));

    let laser = MockAdapter::opened("COM1");
    let (laser_endpoint, laser_tx) = endpoint(&laser);

    let (motion_endpoint, motion) = if with_motion {
        let adapter = MockAdapter::opened("COM4");
        let (ep, tx) = endpoint(&adapter);
        (Some(ep), Some((adapter, tx)))
    } else {
        (None, None)
    };

    let bus = EventBus::new();
    let events = bus.subscribe();
    let console = Console::assemble(settings, bus, motion_endpoint, Some(laser_endpoint))
        .await
        .unwrap();

    Bench {
        console,
        events,
        laser,
        laser_tx,
        motion,
        _dir: dir,
    }
}

async fn inject(tx: &mpsc::Sender<LinkInput>, text: &str) {
    tx.send(LinkInput::Chunk(Bytes::copy_from_slice(text.as_bytes())))
        .await
        .unwrap();
}

async fn next_notice(events: &mut broadcast::Receiver<DisplayEvent>) -> String {
    loop {
        if let DisplayEvent::Notice(text) = events.recv().await.unwrap() {
            return text;
        }
    }
}

#[tokio::test]
async fn motion_command_without_device_is_refused() {
    let mut bench = bench(false).await;

    let reply = bench
        .console
        .execute(OperatorCommand::Motion(MotionCommand::Stop))
        .await;
    assert_eq!(reply, Reply::Done);
    assert!(next_notice(&mut bench.events).await.contains("No device"));
    assert_eq!(bench.laser.write_attempts(), 0);

    let log = tokio::fs::read_to_string(bench.console.log().path()).await.unwrap();
    assert!(log.contains("No device found on the motion link"));
    assert!(!log.contains("PLDcontrol: STOP"));
}

#[tokio::test(start_paused = true)]
async fn startup_round_records_mode_without_echo() {
    let bench = bench(false).await;
    let mut laser_rx = bench.console.store().subscribe_laser();

    // The device answers the mode query before the round ends.
    inject(&bench.laser_tx, "[PC:E0/S2\\NL]").await;
    laser_rx
        .wait_for(|s| s.mode == Some(LaserMode::Max))
        .await
        .unwrap();

    bench.console.initialize().await;

    assert_eq!(
        bench.laser.written(),
        vec![
            "[NL:SAY\\PC]",
            "[NL:E0/?\\PC]",
            "[NL:U2/?\\PC]",
            "[NL:P0/?\\PC]",
            "[NL:D0/?\\PC]",
            "[NL:D1/?\\PC]",
        ]
    );
    assert_eq!(bench.console.laser().selected_mode(), LaserMode::Max);
    assert!(!bench.console.sequencer().is_busy());

    // After startup a selection goes out on the wire.
    bench
        .console
        .execute(OperatorCommand::LaserMode(LaserMode::Adjust))
        .await;
    assert_eq!(
        bench.laser.written().last().map(String::as_str),
        Some("[NL:E0/S1\\PC]")
    );
}

#[tokio::test(start_paused = true)]
async fn silent_laser_keeps_mode_off() {
    let mut bench = bench(false).await;
    bench.console.initialize().await;
    assert_eq!(bench.laser.written().len(), 6);
    assert_eq!(bench.console.store().laser().mode, None);
    assert_eq!(bench.console.laser().selected_mode(), LaserMode::Off);

    let reply = bench.console.execute(OperatorCommand::LaserStart(None)).await;
    assert_eq!(reply, Reply::Done);
    assert_eq!(bench.laser.written().len(), 6);
    assert!(!bench.laser.written().contains(&"[NL:START\\PC]".to_string()));
    assert!(!bench.console.store().laser().laser_on);
    assert!(next_notice(&mut bench.events).await.contains("Laser mode is OFF"));
}

#[tokio::test]
async fn status_replies_produce_one_summary() {
    let mut bench = bench(false).await;

    inject(&bench.laser_tx, "[PC:READY\\NL][PC:E0/S1\\NL]").await;
    inject(&bench.laser_tx, "[PC:U2/S").await;
    inject(&bench.laser_tx, "23.5\\NL]").await;
    inject(&bench.laser_tx, "[PC:P0/S3\\NL][PC:D0/S140\\NL][PC:D1/S10\\NL]").await;

    let summary = loop {
        if let DisplayEvent::StatusSummary(state) = bench.events.recv().await.unwrap() {
            break state;
        }
    };
    assert_eq!(summary.status, Some(LaserStatus::Ready));
    assert_eq!(summary.mode, Some(LaserMode::Adjust));
    assert_eq!(summary.cooling_temperature, 23.5);
    assert_eq!(summary.pack_pulses, 3);
    assert_eq!(summary.eo_delay_max, 140);
    assert_eq!(summary.eo_delay_adjust, 10);

    let text = summary.summary();
    assert!(text.contains("Laser mode: ADJUST"));

    let log = tokio::fs::read_to_string(bench.console.log().path()).await.unwrap();
    assert!(log.contains("NL->PC: [PC:P0/S3\\NL][PC:D0/S140\\NL][PC:D1/S10\\NL]"));
}

#[tokio::test]
async fn telemetry_and_motion_commands() {
    let mut bench = bench(true).await;
    let (motion, motion_tx) = bench.motion.take().unwrap();
    let mut telemetry = bench.console.store().subscribe_telemetry();

    inject(&motion_tx, "DATA[1.250 2.500 48.2 300]\r\n").await;
    telemetry.wait_for(|t| t.motor_position == 300).await.unwrap();
    let record = bench.console.store().telemetry();
    assert_eq!(record.nitrogen_flow, 1.25);
    assert_eq!(record.argon_flow, 2.5);

    bench
        .console
        .execute(OperatorCommand::Motion(MotionCommand::Gas {
            n2_sccm: 1.5,
            ar_sccm: 2.0,
        }))
        .await;
    bench
        .console
        .execute(OperatorCommand::Motion(MotionCommand::Sweep {
            range: 200,
            midpoint: 1000,
        }))
        .await;
    assert_eq!(
        motion.written(),
        vec!["GAS[1.500% 2.000%]", "SWEEP[200 1000]"]
    );

    let Reply::Text(show) = bench.console.execute(OperatorCommand::Show).await else {
        panic!("show prints text");
    };
    assert!(show.contains("motor 300"));
    assert!(show.contains("warm"));
}

#[tokio::test(start_paused = true)]
async fn laser_timer_from_settings() {
    let dir = tempfile::tempdir().unwrap();
    let mut settings = Settings::default();
    settings.application.log_file = Some(dir.path().join("log.aki"));
    settings.laser_timer.auto_stop_secs = Some(30);

    let laser = MockAdapter::opened("COM1");
    let (laser_endpoint, _laser_tx) = endpoint(&laser);
    let console = Console::assemble(settings, EventBus::new(), None, Some(laser_endpoint))
        .await
        .unwrap();
    // Recorded during startup, so no E0/S echo goes out.
    console.laser().select_mode(LaserMode::Max).await.unwrap();
    console.laser().finish_startup();
    let mut laser_rx = console.store().subscribe_laser();

    let reply = console.execute(OperatorCommand::LaserStart(None)).await;
    assert_eq!(reply, Reply::Text("Laser on, stopping in 30s".into()));
    assert!(console.store().laser().laser_on);

    laser_rx.wait_for(|s| !s.laser_on).await.unwrap();
    assert_eq!(laser.written(), vec!["[NL:START\\PC]", "[NL:STOP\\PC]"]);
    assert!(console.laser().stopwatch().elapsed() >= Duration::from_secs(30));
}

#[tokio::test]
async fn reopen_after_link_drop() {
    let bench = bench(false).await;
    bench.laser.set_open(false);

    bench
        .console
        .execute(OperatorCommand::LaserStop)
        .await;
    assert_eq!(bench.laser.call_log(), vec!["open", "write: [NL:STOP\\PC]"]);
}
