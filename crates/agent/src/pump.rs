//! Background delivery of agent events to persistence and an observer.
//!
//! The loop only publishes to the [`EventBus`](taskloop_core::EventBus); this
//! task drains a subscription so a slow or failing consumer never stalls it.

use std::sync::Arc;
use taskloop_core::event::{AgentEvent, EventKind, EventObserver};
use taskloop_core::session::{SessionId, SessionStore};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Counters reported when the pump stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpStats {
    pub received: u64,
    pub persisted: u64,
    pub delivered: u64,
    /// Events lost because the pump fell behind
    pub lagged: u64,
}

#[derive(Default)]
pub struct EventPump {
    session_id: Option<SessionId>,
    store: Option<Arc<dyn SessionStore>>,
    observer: Option<Arc<dyn EventObserver>>,
}

impl EventPump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist events under `session_id` through `store`.
    pub fn with_persistence(mut self, session_id: SessionId, store: Arc<dyn SessionStore>) -> Self {
        self.session_id = Some(session_id);
        self.store = Some(store);
        self
    }

    /// Store without a session id: events are not persisted.
    pub fn with_store(mut self, store: Arc<dyn SessionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn EventObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Drain `rx` until every sender is gone.
    pub fn spawn(self, mut rx: broadcast::Receiver<Arc<AgentEvent>>) -> JoinHandle<PumpStats> {
        tokio::spawn(async move {
            let mut pump = self;
            let mut stats = PumpStats::default();
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        stats.received += 1;
                        pump.handle(&event, &mut stats).await;
                    }
                    Err(RecvError::Lagged(missed)) => {
                        stats.lagged += missed;
                        warn!(missed, "Event consumer lagged, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            debug!(?stats, "Event pump stopped");
            stats
        })
    }

    async fn handle(&mut self, event: &AgentEvent, stats: &mut PumpStats) {
        match (&self.session_id, &self.store) {
            (Some(session_id), Some(store)) => match store.save_event(session_id, event).await {
                Ok(()) => stats.persisted += 1,
                Err(e) => warn!(
                    session_id = %session_id,
                    store = store.name(),
                    error = %e,
                    "Failed to persist event"
                ),
            },
            _ => debug!(kind = ?event.kind, "No session id, skipping persistence"),
        }

        if event.kind == EventKind::UserMessage {
            return;
        }
        if let Some(observer) = self.observer.clone() {
            match observer.deliver(event).await {
                Ok(()) => stats.delivered += 1,
                Err(e) => {
                    warn!(error = %e, "Event observer failed, detaching it");
                    self.observer = None;
                }
            }
        }
    }
}
