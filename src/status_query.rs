//! Laser status round
//!
//! A status round sends the six queries of [`StatusQuery::ROUND`] in order,
//! each followed by the configured pacing delay (200 ms by default). The
//! answers come back through the laser receive task; the last one (`D1`)
//! triggers the status summary there. The sequencer itself never waits for
//! responses.
//!
//! A failed send is reported by the command writer and the round carries on
//! with the next query.

use crate::command::CommandWriter;
use crate::error::SendError;
use crate::messages::{DisplayEvent, EventBus};
use crate::protocol::{LaserCommand, StatusQuery};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Result of one query within a round.
#[derive(Debug)]
pub struct QueryOutcome {
    /// Query that was sent
    pub query: StatusQuery,
    /// Writer result
    pub result: Result<(), SendError>,
}

/// What happened during one status round.
#[derive(Debug, Default)]
pub struct StatusRoundReport {
    /// One entry per query, in send order
    pub outcomes: Vec<QueryOutcome>,
}

impl StatusRoundReport {
    /// Number of queries written successfully.
    pub fn sent(&self) -> usize {
        self.outcomes.iter().filter(|o| o.result.is_ok()).count()
    }

    /// Queries whose send failed.
    pub fn failed(&self) -> Vec<StatusQuery> {
        self.outcomes
            .iter()
            .filter(|o| o.result.is_err())
            .map(|o| o.query)
            .collect()
    }
}

/// Drives status rounds and tracks whether one is running.
#[derive(Debug, Clone)]
pub struct StatusQuerySequencer {
    writer: CommandWriter,
    events: EventBus,
    pacing: Duration,
    busy: Arc<watch::Sender<bool>>,
}

/// Clears the busy flag when the round ends, however it ends.
struct BusyGuard {
    busy: Arc<watch::Sender<bool>>,
    events: EventBus,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.busy.send_replace(false);
        self.events.publish(DisplayEvent::Busy(false));
    }
}

impl StatusQuerySequencer {
    /// Create a sequencer that waits `pacing` after every query.
    pub fn new(writer: CommandWriter, events: EventBus, pacing: Duration) -> Self {
        let (busy, _) = watch::channel(false);
        Self {
            writer,
            events,
            pacing,
            busy: Arc::new(busy),
        }
    }

    /// Delay after each query.
    pub fn pacing(&self) -> Duration {
        self.pacing
    }

    /// Whether a spawned round is in progress.
    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Run one status round on the current task.
    ///
    /// Takes six times the pacing. Does not touch the busy flag.
    pub async fn run_status_query(&self) -> StatusRoundReport {
        let mut report = StatusRoundReport::default();

        for query in StatusQuery::ROUND {
            let result = self.writer.send_laser(LaserCommand::Query(query)).await;
            if let Err(err) = &result {
                tracing::warn!(query = query.body(), %err, "Status query not sent, continuing");
            }
            report.outcomes.push(QueryOutcome { query, result });
            tokio::time::sleep(self.pacing).await;
        }

        tracing::debug!(
            sent = report.sent(),
            failed = report.failed().len(),
            "Status round finished"
        );
        report
    }

    /// Run a status round on a background task.
    ///
    /// The busy flag is raised before this returns and cleared when the task
    /// ends, so awaiting the handle and then reading [`is_busy`](Self::is_busy)
    /// always sees idle. Returns `None` if a round is already running.
    pub fn spawn(&self) -> Option<JoinHandle<StatusRoundReport>> {
        let acquired = self.busy.send_if_modified(|busy| {
            if *busy {
                false
            } else {
                *busy = true;
                true
            }
        });
        if !acquired {
            tracing::debug!("Status round already running");
            return None;
        }
        self.events.publish(DisplayEvent::Busy(true));

        let guard = BusyGuard {
            busy: self.busy.clone(),
            events: self.events.clone(),
        };
        let sequencer = self.clone();
        Some(tokio::spawn(async move {
            let _guard = guard;
            sequencer.run_status_query().await
        }))
    }
}
