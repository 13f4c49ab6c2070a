//! The host loop.
//!
//! One actor task owns the orchestrator. Adapters push [`HostEvent`]s into
//! an mpsc channel; a periodic tick drives the reaper. Handler errors are
//! logged and discarded here — one failing conversation must never block
//! event processing for anyone else.

use crate::orchestrator::Orchestrator;
use crate::HostEvent;

use chrono::Utc;
use tokio::sync::mpsc;

/// Queue depth for inbound events. Senders use `try_send` and drop with a
/// log line if the orchestrator ever falls this far behind.
const EVENT_QUEUE_DEPTH: usize = 256;

/// Owns the orchestrator and drains its event queue.
pub struct Runtime {
    orchestrator: Orchestrator,
    event_rx: mpsc::Receiver<HostEvent>,
    tick_interval: std::time::Duration,
}

impl Runtime {
    /// Create a runtime and the sender adapters use to reach it.
    pub fn new(
        orchestrator: Orchestrator,
        tick_interval: std::time::Duration,
    ) -> (Self, mpsc::Sender<HostEvent>) {
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        (
            Self {
                orchestrator,
                event_rx,
                tick_interval,
            },
            event_tx,
        )
    }

    /// Run until every sender is dropped.
    pub async fn run(mut self) {
        tracing::info!("orchestrator runtime started");
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe_event = self.event_rx.recv() => {
                    match maybe_event {
                        Some(event) => {
                            if let Err(error) = self.orchestrator.handle_event(event, Utc::now()) {
                                tracing::error!(%error, "error handling event");
                            }
                        }
                        None => break,
                    }
                }
                _ = ticker.tick() => {
                    if let Err(error) = self.orchestrator.handle_event(HostEvent::Tick, Utc::now()) {
                        tracing::error!(%error, "error handling tick");
                    }
                }
            }
        }

        tracing::info!("orchestrator runtime stopped");
    }
}
