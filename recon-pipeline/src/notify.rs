//! Notification dispatcher
//!
//! Fans reconciliation events out to injected sinks. Dispatch is
//! best-effort and asynchronous relative to the pipeline: each delivery
//! runs on its own task, failures are logged and never propagate, and
//! the pipeline reaching its terminal state does not wait for delivery
//! confirmation. Channel policy (email/SMS selection) belongs to the
//! sinks, not here.

use parking_lot::Mutex;
use recon_core::{InvoiceId, ReasonCode};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Domain event emitted at the end of a reconciliation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReconciliationEvent {
    /// A proof was validated against an invoice
    Validated {
        /// Settled invoice
        invoice_id: InvoiceId,
        /// Archived proof record
        proof_record_id: Uuid,
        /// Archived receipt record, absent when flagged for manual issuance
        receipt_record_id: Option<Uuid>,
    },
    /// A proof needs human review
    PendingReview {
        /// Best candidate invoice, when one exists
        invoice_id: Option<InvoiceId>,
        /// Archived proof record
        proof_record_id: Uuid,
        /// Why the run did not validate
        reasons: Vec<ReasonCode>,
    },
}

/// One delivery channel
pub trait NotificationSink: Send + Sync {
    /// Channel name for logging
    fn name(&self) -> &str;

    /// Deliver one event; errors are logged by the dispatcher, not retried
    /// synchronously
    fn deliver(&self, event: &ReconciliationEvent) -> Result<(), String>;
}

/// Best-effort fan-out dispatcher
#[derive(Clone)]
pub struct NotificationDispatcher {
    sinks: Vec<Arc<dyn NotificationSink>>,
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("sinks", &self.sinks.iter().map(|s| s.name()).collect::<Vec<_>>())
            .finish()
    }
}

impl NotificationDispatcher {
    /// Create dispatcher over the given sinks
    pub fn new(sinks: Vec<Arc<dyn NotificationSink>>) -> Self {
        Self { sinks }
    }

    /// Dispatch an event to every sink on detached tasks
    pub fn dispatch(&self, event: ReconciliationEvent) {
        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(err) = sink.deliver(&event) {
                    tracing::warn!(sink = sink.name(), %err, "Notification delivery failed");
                } else {
                    tracing::debug!(sink = sink.name(), "Notification delivered");
                }
            });
        }
    }

    /// Dispatch and wait for every delivery attempt to finish
    ///
    /// Delivery failures are still swallowed; this only removes the
    /// timing race for callers that need the attempts completed (tests,
    /// shutdown paths).
    pub async fn dispatch_and_wait(&self, event: ReconciliationEvent) {
        let mut handles = Vec::with_capacity(self.sinks.len());
        for sink in &self.sinks {
            let sink = Arc::clone(sink);
            let event = event.clone();
            handles.push(tokio::spawn(async move {
                if let Err(err) = sink.deliver(&event) {
                    tracing::warn!(sink = sink.name(), %err, "Notification delivery failed");
                }
            }));
        }
        for handle in handles {
            let _ = handle.await;
        }
    }
}

/// In-app notification feed, always on
///
/// Holds the most recent events in memory for the in-app channel; the
/// bound keeps a quiet reviewer queue from growing without limit.
pub struct InAppSink {
    feed: Mutex<Vec<ReconciliationEvent>>,
    capacity: usize,
}

impl std::fmt::Debug for InAppSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InAppSink")
            .field("events", &self.feed.lock().len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl InAppSink {
    /// Create a feed holding at most `capacity` events
    pub fn new(capacity: usize) -> Self {
        Self {
            feed: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// Snapshot of the current feed, oldest first
    pub fn events(&self) -> Vec<ReconciliationEvent> {
        self.feed.lock().clone()
    }
}

impl NotificationSink for InAppSink {
    fn name(&self) -> &str {
        "in-app"
    }

    fn deliver(&self, event: &ReconciliationEvent) -> Result<(), String> {
        let mut feed = self.feed.lock();
        if feed.len() == self.capacity {
            feed.remove(0);
        }
        feed.push(event.clone());
        Ok(())
    }
}
