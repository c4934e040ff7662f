use crate::{
    db::DbPool,
    entities::batch,
    errors::ServiceError,
    events::{Event, EventSender},
    services::stock_accessor::{self, StockScope},
};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// The notification collaborator for expired stock. Repeated notices for
/// the same batch across sweeps are its problem to collapse.
#[async_trait]
pub trait ExpiryAlertSink: Send + Sync {
    async fn notify_expired(&self, batch: &batch::Model) -> Result<(), ServiceError>;
}

/// Publishes `Event::BatchExpired` for each expired batch.
#[derive(Clone)]
pub struct EventExpiryAlertSink {
    events: EventSender,
}

impl EventExpiryAlertSink {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

#[async_trait]
impl ExpiryAlertSink for EventExpiryAlertSink {
    async fn notify_expired(&self, batch: &batch::Model) -> Result<(), ServiceError> {
        self.events
            .send(Event::BatchExpired {
                batch_id: batch.id,
                medicine_id: batch.medicine_id,
                location_id: batch.location_id,
                quantity: batch.quantity,
                expiration_date: batch.expiration_date,
            })
            .await
            .map_err(ServiceError::EventError)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpiryReport {
    pub as_of: NaiveDate,
    pub window_days: i64,
    pub expired: Vec<batch::Model>,
    pub expiring_soon: Vec<batch::Model>,
    pub notified: usize,
    pub failed: usize,
}

/// One pass of the periodic expiry check. Scheduling is left to the host.
#[derive(Clone)]
pub struct ExpirySweep {
    db: Arc<DbPool>,
    sink: Arc<dyn ExpiryAlertSink>,
}

impl ExpirySweep {
    pub fn new(db: Arc<DbPool>, sink: Arc<dyn ExpiryAlertSink>) -> Self {
        Self { db, sink }
    }

    /// Collects expired and expiring-soon batches across the whole ledger
    /// and notifies the sink of each expired one. A failing notification is
    /// counted and logged; the sweep carries on.
    #[instrument(skip(self))]
    pub async fn run(
        &self,
        as_of: NaiveDate,
        window_days: i64,
    ) -> Result<ExpiryReport, ServiceError> {
        let db = self.db.as_ref();
        let expired = stock_accessor::expired_batches(db, StockScope::All, as_of).await?;
        let expiring_soon =
            stock_accessor::expiring_soon_batches(db, StockScope::All, as_of, window_days).await?;

        let mut notified = 0;
        let mut failed = 0;
        for batch in &expired {
            match self.sink.notify_expired(batch).await {
                Ok(()) => notified += 1,
                Err(e) => {
                    failed += 1;
                    warn!(batch_id = batch.id, error = %e, "expiry notification failed");
                }
            }
        }

        info!(
            expired = expired.len(),
            expiring_soon = expiring_soon.len(),
            notified,
            failed,
            "Expiry sweep finished"
        );

        Ok(ExpiryReport {
            as_of,
            window_days,
            expired,
            expiring_soon,
            notified,
            failed,
        })
    }
}
