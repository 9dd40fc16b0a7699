//! Bus subscriptions that feed delivered events to handlers.
//!
//! The in-memory bus never redelivers, so each consumer does it itself: a
//! failed event is retried a few times in place, and a periodic sweep over
//! the outbox log hands every recent published row for the topic to the
//! handler again. Handlers are idempotent (dedup store or atomic projector),
//! so rows that were already handled come back as duplicates.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use outbox::{BusMessage, CloudEvent, OutboxStore};
use projections::{EventHandler, HandleOutcome};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

const SWEEP_PAGE_SIZE: usize = 500;

/// How a consumer retries events its handler failed on.
#[derive(Debug, Clone)]
pub struct Redelivery {
    /// Handler attempts per delivery before the event is left to the sweep.
    pub attempts: u32,
    /// Wait before the first in-place retry; doubles after each one.
    pub backoff: Duration,
    pub sweep_interval: Duration,
    /// Rows older than this are not swept. Kept equal to the dedup
    /// retention so a handled row is still recognised as a duplicate.
    pub window: chrono::Duration,
}

impl Default for Redelivery {
    fn default() -> Self {
        Self {
            attempts: 5,
            backoff: Duration::from_millis(100),
            sweep_interval: Duration::from_secs(30),
            window: chrono::Duration::hours(24),
        }
    }
}

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub scanned: u64,
    pub redelivered: u64,
    pub failed: u64,
}

/// One named subscription to a topic.
pub struct Consumer<L> {
    name: &'static str,
    topic: &'static str,
    handler: Arc<dyn EventHandler>,
    log: L,
    redelivery: Redelivery,
}

impl<L: OutboxStore + Clone + 'static> Consumer<L> {
    pub fn new(
        name: &'static str,
        topic: &'static str,
        handler: Arc<dyn EventHandler>,
        log: L,
        redelivery: Redelivery,
    ) -> Self {
        Self {
            name,
            topic,
            handler,
            log,
            redelivery,
        }
    }

    /// Runs the consumer until shutdown or until the topic closes.
    ///
    /// The first sweep runs right away, which picks up events published
    /// before a restart that were never handled.
    pub fn spawn(
        self,
        mut receiver: broadcast::Receiver<BusMessage>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let name = self.name;
            tracing::info!(consumer = name, topic = self.topic, "consumer started");

            let mut cursor = 0_i64;
            let period = self.redelivery.sweep_interval.max(Duration::from_millis(1));
            let mut sweep = tokio::time::interval(period);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = sweep.tick() => self.run_sweep(&mut cursor).await,
                    message = receiver.recv() => match message {
                        Ok(message) => self.deliver_message(&message).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(consumer = name, skipped, "consumer lagged behind the bus, sweeping the log");
                            self.run_sweep(&mut cursor).await;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            tracing::info!(consumer = name, "consumer stopped");
        })
    }

    async fn deliver_message(&self, message: &BusMessage) {
        match CloudEvent::from_bytes(&message.payload) {
            Ok(event) => {
                self.deliver(&event).await;
            }
            Err(e) => {
                tracing::error!(consumer = self.name, topic = %message.topic, error = %e, "undecodable message dropped");
            }
        }
    }

    /// Hands `event` to the handler, retrying in place with backoff.
    ///
    /// Returns the outcome, or `None` if every attempt failed. The event is
    /// then still unmarked and the next sweep tries again.
    pub async fn deliver(&self, event: &CloudEvent) -> Option<HandleOutcome> {
        let attempts = self.redelivery.attempts.max(1);
        let mut backoff = self.redelivery.backoff;

        for attempt in 1..=attempts {
            match self.handler.handle(event).await {
                Ok(outcome) => {
                    if outcome == HandleOutcome::Applied {
                        tracing::debug!(consumer = self.name, event_id = %event.id, attempt, "event applied");
                    }
                    return Some(outcome);
                }
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        consumer = self.name,
                        event_id = %event.id,
                        event_type = %event.event_type,
                        attempt,
                        error = %e,
                        "event handling failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
                Err(e) => {
                    metrics::counter!("consumer_handler_failures_total", "consumer" => self.name)
                        .increment(1);
                    tracing::error!(
                        consumer = self.name,
                        event_id = %event.id,
                        event_type = %event.event_type,
                        attempts,
                        error = %e,
                        "event handling failed, left for redelivery"
                    );
                }
            }
        }
        None
    }

    async fn run_sweep(&self, cursor: &mut i64) {
        match self.sweep(cursor).await {
            Ok(report) if report.redelivered > 0 || report.failed > 0 => {
                tracing::info!(
                    consumer = self.name,
                    scanned = report.scanned,
                    redelivered = report.redelivered,
                    failed = report.failed,
                    "redelivery sweep complete"
                );
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(consumer = self.name, error = %e, "redelivery sweep failed");
            }
        }
    }

    /// Hands every published row for this topic created within the window
    /// to the handler once, starting after `cursor`.
    ///
    /// `cursor` moves past the leading rows that have aged out of the
    /// window, so later sweeps skip them.
    pub async fn sweep(&self, cursor: &mut i64) -> outbox::Result<SweepReport> {
        let cutoff = Utc::now() - self.redelivery.window;
        let mut report = SweepReport::default();
        let mut after = *cursor;
        let mut advancing = true;

        loop {
            let rows = self.log.read_from(after, SWEEP_PAGE_SIZE).await?;
            let Some(last) = rows.last() else {
                break;
            };
            after = last.position;
            let full_page = rows.len() == SWEEP_PAGE_SIZE;

            for row in rows {
                if row.created_at < cutoff {
                    if advancing {
                        *cursor = row.position;
                    }
                    continue;
                }
                advancing = false;
                if row.topic != self.topic || row.published_at.is_none() {
                    continue;
                }

                report.scanned += 1;
                let event = match row.cloud_event() {
                    Ok(event) => event,
                    Err(e) => {
                        tracing::error!(consumer = self.name, event_id = %row.id, error = %e, "undecodable outbox row skipped");
                        continue;
                    }
                };
                match self.handler.handle(&event).await {
                    Ok(HandleOutcome::Applied) => {
                        report.redelivered += 1;
                        tracing::info!(consumer = self.name, event_id = %event.id, "event redelivered from the log");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        report.failed += 1;
                        tracing::warn!(consumer = self.name, event_id = %event.id, error = %e, "redelivered event failed again");
                    }
                }
            }

            if !full_page {
                break;
            }
        }
        Ok(report)
    }
}
