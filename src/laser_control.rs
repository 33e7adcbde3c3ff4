//! Laser on/off control
//!
//! [`LaserController`] owns the laser-on flag in the state store, the firing
//! [`Stopwatch`] and the optional auto-stop timer. Firing is only started when
//! the selected output mode is not OFF. The selection starts at OFF, so the
//! laser cannot fire until a mode is reported or chosen.
//!
//! Mode selection is suppressed while the console is initializing: the first
//! status round reports the device's mode, and reflecting that report in the
//! selection must not echo an `E0/S<n>` back to the laser.

use crate::command::CommandWriter;
use crate::error::SendError;
use crate::messages::{DisplayEvent, EventBus};
use crate::protocol::LaserCommand;
use crate::state::{DeviceStateStore, LaserMode};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Accumulated laser-on time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stopwatch {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl Stopwatch {
    /// Start or resume timing. No-op if already running.
    pub fn start(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    /// Pause timing, keeping the accumulated time.
    pub fn stop(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    /// Clear the accumulated time. A running stopwatch keeps running from zero.
    pub fn reset(&mut self) {
        self.accumulated = Duration::ZERO;
        if self.running_since.is_some() {
            self.running_since = Some(Instant::now());
        }
    }

    /// Whether the stopwatch is running.
    pub fn is_running(&self) -> bool {
        self.running_since.is_some()
    }

    /// Total time, including the current run.
    pub fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map_or(Duration::ZERO, |s| s.elapsed())
    }

    /// Elapsed time as `HH:MM:SS.cc`.
    pub fn display(&self) -> String {
        format_elapsed(self.elapsed())
    }
}

/// Format a duration as `HH:MM:SS.cc` (hundredths, truncated).
pub fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs();
    let centis = elapsed.subsec_millis() / 10;
    format!(
        "{:02}:{:02}:{:02}.{:02}",
        secs / 3600,
        (secs / 60) % 60,
        secs % 60,
        centis
    )
}

/// Result of [`LaserController::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// `START` was sent and the laser is flagged on
    Started,
    /// OFF mode is selected; nothing was sent
    ModeOff,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

struct ControllerInner {
    writer: CommandWriter,
    store: DeviceStateStore,
    events: EventBus,
    initializing: AtomicBool,
    selected: Mutex<LaserMode>,
    stopwatch: Mutex<Stopwatch>,
    auto_stop: tokio::sync::Mutex<Option<(u64, JoinHandle<()>)>>,
    next_timer: AtomicU64,
}

/// Shared handle to the laser on/off logic.
#[derive(Clone)]
pub struct LaserController {
    inner: Arc<ControllerInner>,
}

impl LaserController {
    /// Create a controller. It starts in the initializing state.
    pub fn new(writer: CommandWriter, store: DeviceStateStore, events: EventBus) -> Self {
        Self {
            inner: Arc::new(ControllerInner {
                writer,
                store,
                events,
                initializing: AtomicBool::new(true),
                selected: Mutex::new(LaserMode::Off),
                stopwatch: Mutex::new(Stopwatch::default()),
                auto_stop: tokio::sync::Mutex::new(None),
                next_timer: AtomicU64::new(0),
            }),
        }
    }

    /// End startup initialization; mode selections are sent from now on.
    pub fn finish_startup(&self) {
        self.inner.initializing.store(false, Ordering::SeqCst);
    }

    /// Whether startup initialization is still in progress.
    pub fn is_initializing(&self) -> bool {
        self.inner.initializing.load(Ordering::SeqCst)
    }

    /// Mode used to decide whether `START` may be sent.
    pub fn selected_mode(&self) -> LaserMode {
        *lock(&self.inner.selected)
    }

    /// Select an output mode. Returns `Ok(true)` if `E0/S<n>` was sent,
    /// `Ok(false)` if suppressed during initialization.
    pub async fn select_mode(&self, mode: LaserMode) -> Result<bool, SendError> {
        *lock(&self.inner.selected) = mode;
        if self.is_initializing() {
            tracing::debug!(%mode, "Mode selection during startup, not sent");
            return Ok(false);
        }
        self.inner
            .writer
            .send_laser(LaserCommand::SetMode(mode))
            .await?;
        Ok(true)
    }

    /// Switch the laser on, optionally stopping it again after `auto_stop`.
    pub async fn start(&self, auto_stop: Option<Duration>) -> Result<StartOutcome, SendError> {
        if self.selected_mode() == LaserMode::Off {
            self.inner
                .events
                .notice("Laser mode is OFF; select ADJUST or MAX to fire");
            return Ok(StartOutcome::ModeOff);
        }

        self.inner.writer.send_laser(LaserCommand::Start).await?;

        let state = self.inner.store.set_laser_on(true);
        self.inner.events.publish(DisplayEvent::Laser(state));
        lock(&self.inner.stopwatch).start();

        if let Some(delay) = auto_stop {
            self.arm_auto_stop(delay).await;
        }
        Ok(StartOutcome::Started)
    }

    /// Switch the laser off.
    ///
    /// Local state (flag, stopwatch, timer) is cleared even if `STOP` could not
    /// be sent; the send error is still returned.
    pub async fn stop(&self) -> Result<(), SendError> {
        if let Some((_, handle)) = self.inner.auto_stop.lock().await.take() {
            handle.abort();
        }
        self.stop_firing().await
    }

    async fn stop_firing(&self) -> Result<(), SendError> {
        let sent = self.inner.writer.send_laser(LaserCommand::Stop).await;

        let state = self.inner.store.set_laser_on(false);
        self.inner.events.publish(DisplayEvent::Laser(state));
        lock(&self.inner.stopwatch).stop();

        sent
    }

    async fn arm_auto_stop(&self, delay: Duration) {
        let id = self.inner.next_timer.fetch_add(1, Ordering::SeqCst);
        let controller = self.clone();

        let mut slot = self.inner.auto_stop.lock().await;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            {
                // Detach ourselves so stop() does not abort this task mid-send.
                let mut slot = controller.inner.auto_stop.lock().await;
                if !matches!(slot.as_ref(), Some((current, _)) if *current == id) {
                    return;
                }
                slot.take();
            }
            tracing::info!(?delay, "Laser timer elapsed, stopping");
            controller.inner.events.notice("Laser timer elapsed");
            let _ = controller.stop_firing().await;
        });
        if let Some((_, previous)) = slot.replace((id, handle)) {
            previous.abort();
        }
    }

    /// Whether an auto-stop timer is pending.
    pub async fn auto_stop_pending(&self) -> bool {
        self.inner.auto_stop.lock().await.is_some()
    }

    /// Snapshot of the firing stopwatch.
    pub fn stopwatch(&self) -> Stopwatch {
        *lock(&self.inner.stopwatch)
    }

    /// Reset the firing stopwatch.
    pub fn reset_stopwatch(&self) {
        lock(&self.inner.stopwatch).reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{LinkTransport, MockAdapter};
    use crate::log_sink::LogSink;

    async fn controller() -> (LaserController, MockAdapter, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let log = LogSink::open_truncated(dir.path().join("log.aki")).await.unwrap();
        let laser = MockAdapter::opened("COM1");
        let events = EventBus::new();
        let writer = CommandWriter::new(
            None,
            Some(Arc::new(laser.clone()) as Arc<dyn LinkTransport>),
            log,
            events.clone(),
        );
        let controller = LaserController::new(writer, DeviceStateStore::new(), events);
        (controller, laser, dir)
    }

    /// Record a selection while still initializing, so nothing is written.
    async fn select_unechoed(controller: &LaserController, mode: LaserMode) {
        assert!(!controller.select_mode(mode).await.unwrap());
    }

    #[test]
    fn elapsed_format() {
        assert_eq!(format_elapsed(Duration::ZERO), "00:00:00.00");
        assert_eq!(format_elapsed(Duration::from_millis(61_239)), "00:01:01.23");
        assert_eq!(format_elapsed(Duration::from_secs(3 * 3600 + 7)), "03:00:07.00");
    }

    #[tokio::test(start_paused = true)]
    async fn stopwatch_accumulates_runs() {
        let mut watch = Stopwatch::default();
        watch.start();
        tokio::time::advance(Duration::from_secs(2)).await;
        watch.stop();
        tokio::time::advance(Duration::from_secs(10)).await;
        watch.start();
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(watch.elapsed(), Duration::from_millis(2500));
        assert_eq!(watch.display(), "00:00:02.50");

        watch.stop();
        watch.reset();
        assert_eq!(watch.elapsed(), Duration::ZERO);
        assert!(!watch.is_running());
    }

    #[tokio::test]
    async fn mode_selection_suppressed_during_startup() {
        let (controller, laser, _dir) = controller().await;
        assert!(!controller.select_mode(LaserMode::Max).await.unwrap());
        assert!(laser.written().is_empty());
        assert_eq!(controller.selected_mode(), LaserMode::Max);

        controller.finish_startup();
        assert!(controller.select_mode(LaserMode::Adjust).await.unwrap());
        assert_eq!(laser.written(), vec!["[NL:E0/S1\\PC]"]);
    }

    #[tokio::test]
    async fn start_refused_in_off_mode() {
        let (controller, laser, _dir) = controller().await;
        controller.finish_startup();
        controller.select_mode(LaserMode::Off).await.unwrap();

        let outcome = controller.start(None).await.unwrap();
        assert_eq!(outcome, StartOutcome::ModeOff);
        assert_eq!(laser.written(), vec!["[NL:E0/S0\\PC]"]);
        assert!(!controller.inner.store.laser().laser_on);
    }

    #[tokio::test]
    async fn selection_starts_off() {
        let (controller, laser, _dir) = controller().await;
        assert_eq!(controller.selected_mode(), LaserMode::Off);
        controller.finish_startup();

        assert_eq!(controller.start(None).await.unwrap(), StartOutcome::ModeOff);
        assert!(laser.written().is_empty());
    }

    #[tokio::test]
    async fn start_and_stop() {
        let (controller, laser, _dir) = controller().await;
        controller.finish_startup();
        controller.select_mode(LaserMode::Max).await.unwrap();

        assert_eq!(controller.start(None).await.unwrap(), StartOutcome::Started);
        assert!(controller.inner.store.laser().laser_on);
        assert!(controller.stopwatch().is_running());

        controller.stop().await.unwrap();
        assert!(!controller.inner.store.laser().laser_on);
        assert!(!controller.stopwatch().is_running());
        assert_eq!(
            laser.written(),
            vec!["[NL:E0/S2\\PC]", "[NL:START\\PC]", "[NL:STOP\\PC]"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn auto_stop_timer_fires() {
        let (controller, laser, _dir) = controller().await;
        select_unechoed(&controller, LaserMode::Adjust).await;
        let mut laser_rx = controller.inner.store.subscribe_laser();
        let started = Instant::now();
        controller.start(Some(Duration::from_secs(5))).await.unwrap();
        assert!(controller.auto_stop_pending().await);

        laser_rx.wait_for(|state| !state.laser_on).await.unwrap();

        assert!(started.elapsed() >= Duration::from_secs(5));
        assert!(!controller.auto_stop_pending().await);
        assert!(!controller.inner.store.laser().laser_on);
        assert_eq!(laser.written(), vec!["[NL:START\\PC]", "[NL:STOP\\PC]"]);
    }

    #[tokio::test(start_paused = true)]
    async fn manual_stop_cancels_timer() {
        let (controller, laser, _dir) = controller().await;
        select_unechoed(&controller, LaserMode::Adjust).await;
        controller.start(Some(Duration::from_secs(5))).await.unwrap();
        controller.stop().await.unwrap();
        assert!(!controller.auto_stop_pending().await);

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(laser.written(), vec!["[NL:START\\PC]", "[NL:STOP\\PC]"]);
    }

    #[tokio::test]
    async fn failed_start_leaves_laser_off() {
        let (controller, laser, _dir) = controller().await;
        select_unechoed(&controller, LaserMode::Max).await;
        laser.fail_writes_at(&[0]);
        assert!(controller.start(None).await.is_err());
        assert!(!controller.inner.store.laser().laser_on);
        assert!(!controller.stopwatch().is_running());
    }
}
