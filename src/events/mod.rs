use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a sender/receiver pair with the given buffer size.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), String> {
        self.sender
            .send(event)
            .await
            .map_err(|e| format!("Failed to send event: {}", e))
    }

    /// Publishes an event without waiting on the consumer. A full or closed
    /// channel drops the event with a warning; ledger writes never block on it.
    pub fn publish(&self, event: Event) {
        if let Err(e) = self.sender.try_send(event) {
            warn!(error = %e, "event dropped");
        }
    }
}

/// Stock ledger and catalog events published for the host application.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    BatchReceived {
        batch_id: i64,
        medicine_id: i64,
        location_id: i64,
        quantity: i64,
        new_quantity: i64,
        expiration_date: NaiveDate,
    },
    StockReduced {
        medicine_id: i64,
        location_id: i64,
        removed: i64,
        batch_ids: Vec<i64>,
    },
    BatchAdjusted {
        batch_id: i64,
        medicine_id: i64,
        old_quantity: i64,
        new_quantity: i64,
    },
    BatchDeleted {
        batch_id: i64,
        medicine_id: i64,
        location_id: i64,
    },
    ReorderRequested {
        medicine_id: i64,
        shortfall: i64,
        reorder_quantity: i32,
        total_quantity: i64,
    },
    BatchExpired {
        batch_id: i64,
        medicine_id: i64,
        location_id: i64,
        quantity: i64,
        expiration_date: NaiveDate,
    },
    MedicineCreated(i64),
    MedicineUpdated(i64),
    MedicineDeleted(i64),
    LocationCreated(i64),
    LocationDeleted(i64),
}

/// Drains the event channel, logging each event.
///
/// The host application replaces this loop with its own consumer when it
/// wants to act on reorder or expiry events (ordering, notifications).
pub async fn process_events(mut rx: mpsc::Receiver<Event>) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::ReorderRequested {
                medicine_id,
                shortfall,
                reorder_quantity,
                ..
            } => {
                info!(
                    medicine_id,
                    shortfall, reorder_quantity, "Reorder requested"
                );
            }
            Event::BatchExpired {
                batch_id,
                medicine_id,
                location_id,
                quantity,
                ..
            } => {
                warn!(
                    batch_id,
                    medicine_id, location_id, quantity, "Batch expired with stock on hand"
                );
            }
            other => {
                info!(event = ?other, "Received event");
            }
        }
    }

    warn!("Event processing loop has ended");
}
