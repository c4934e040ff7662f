use crate::{
    entities::medicine,
    errors::ServiceError,
    events::{Event, EventSender},
    services::stock_accessor::StockAccessor,
};
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// What the ordering side receives when a medicine needs restocking.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReorderSignal {
    pub medicine_id: i64,
    /// `alert_threshold - total_quantity`, always positive.
    pub shortfall: i64,
    pub reorder_quantity: i32,
    pub total_quantity: i64,
    pub alert_threshold: i32,
    pub provider_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ReorderDecision {
    /// At or above the alert threshold.
    Sufficient { total_quantity: i64 },
    /// Low, but the medicine is restocked by hand.
    LowStock { total_quantity: i64, shortfall: i64 },
    Reorder(ReorderSignal),
}

impl ReorderDecision {
    pub fn evaluate(medicine: &medicine::Model, total_quantity: i64) -> Self {
        if !medicine.is_low_stock(total_quantity) {
            return ReorderDecision::Sufficient { total_quantity };
        }

        let shortfall = i64::from(medicine.alert_threshold) - total_quantity;
        if !medicine.automatic_reorder {
            return ReorderDecision::LowStock {
                total_quantity,
                shortfall,
            };
        }

        // A stored rule always has reorder_quantity >= 1; older rows without
        // one fall back to the shortfall.
        let reorder_quantity = medicine
            .reorder_quantity
            .filter(|q| *q >= 1)
            .unwrap_or_else(|| i32::try_from(shortfall.max(1)).unwrap_or(i32::MAX));

        ReorderDecision::Reorder(ReorderSignal {
            medicine_id: medicine.id,
            shortfall,
            reorder_quantity,
            total_quantity,
            alert_threshold: medicine.alert_threshold,
            provider_id: medicine.provider_id,
        })
    }

    pub fn signal(&self) -> Option<&ReorderSignal> {
        match self {
            ReorderDecision::Reorder(signal) => Some(signal),
            _ => None,
        }
    }

    pub fn is_low_stock(&self) -> bool {
        !matches!(self, ReorderDecision::Sufficient { .. })
    }
}

/// The ordering collaborator: supplier selection, order records and
/// notification mail live behind this trait.
#[async_trait]
pub trait ReorderSink: Send + Sync {
    async fn request_reorder(&self, signal: &ReorderSignal) -> Result<(), ServiceError>;
}

/// Publishes `Event::ReorderRequested` for the host application to act on.
#[derive(Clone)]
pub struct EventReorderSink {
    events: EventSender,
}

impl EventReorderSink {
    pub fn new(events: EventSender) -> Self {
        Self { events }
    }
}

#[async_trait]
impl ReorderSink for EventReorderSink {
    async fn request_reorder(&self, signal: &ReorderSignal) -> Result<(), ServiceError> {
        self.events
            .send(Event::ReorderRequested {
                medicine_id: signal.medicine_id,
                shortfall: signal.shortfall,
                reorder_quantity: signal.reorder_quantity,
                total_quantity: signal.total_quantity,
            })
            .await
            .map_err(ServiceError::EventError)
    }
}

/// Turns post-mutation totals into reorder signals.
///
/// Re-evaluating without a stock change does not repeat a signal: the last
/// (total, threshold) sent per medicine is remembered until the ledger
/// changes, the medicine recovers or the sink fails.
pub struct ReorderEvaluator {
    accessor: StockAccessor,
    sink: Arc<dyn ReorderSink>,
    last_signalled: DashMap<i64, (i64, i32)>,
}

impl ReorderEvaluator {
    pub fn new(accessor: StockAccessor, sink: Arc<dyn ReorderSink>) -> Self {
        Self {
            accessor,
            sink,
            last_signalled: DashMap::new(),
        }
    }

    /// Evaluates a total the caller has just committed and dispatches the
    /// signal if one is due. Returns the signal that reached the sink.
    #[instrument(skip(self, medicine), fields(medicine_id = medicine.id))]
    pub async fn process(
        &self,
        medicine: &medicine::Model,
        total_quantity: i64,
    ) -> Option<ReorderSignal> {
        let decision = ReorderDecision::evaluate(medicine, total_quantity);
        let signal = match decision {
            ReorderDecision::Reorder(signal) => signal,
            _ => {
                self.last_signalled.remove(&medicine.id);
                return None;
            }
        };

        let key = (signal.total_quantity, signal.alert_threshold);
        if self.last_signalled.insert(medicine.id, key) == Some(key) {
            debug!(total_quantity, "reorder already signalled at this level");
            return None;
        }

        match self.sink.request_reorder(&signal).await {
            Ok(()) => {
                info!(
                    shortfall = signal.shortfall,
                    reorder_quantity = signal.reorder_quantity,
                    "Reorder requested"
                );
                Some(signal)
            }
            Err(e) => {
                self.last_signalled.remove(&medicine.id);
                warn!(error = %e, "reorder sink failed; will retry on next evaluation");
                None
            }
        }
    }

    /// Marks a committed ledger change for the medicine. The next
    /// evaluation signals again even if it lands on the same total.
    pub fn stock_changed(&self, medicine_id: i64) {
        self.last_signalled.remove(&medicine_id);
    }

    pub fn forget(&self, medicine_id: i64) {
        self.last_signalled.remove(&medicine_id);
    }

    /// On-demand check from a fresh snapshot.
    pub async fn evaluate_now(
        &self,
        medicine_id: i64,
    ) -> Result<(ReorderDecision, Option<ReorderSignal>), ServiceError> {
        let snapshot = self.accessor.snapshot(medicine_id).await?;
        let decision = ReorderDecision::evaluate(&snapshot.medicine, snapshot.total_quantity);
        let dispatched = self
            .process(&snapshot.medicine, snapshot.total_quantity)
            .await;
        Ok((decision, dispatched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::medicine::Formulation;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn medicine(
        alert_threshold: i32,
        automatic_reorder: bool,
        reorder_quantity: Option<i32>,
    ) -> medicine::Model {
        medicine::Model {
            id: 7,
            name: "Amoxicillin".into(),
            barcode: "5901234123457".into(),
            dosage: "500mg".into(),
            formulation: Formulation::Tablet,
            unit_price: dec!(4.20),
            alert_threshold,
            automatic_reorder,
            reorder_quantity,
            provider_id: Some(3),
            image_path: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn at_threshold_is_sufficient() {
        let m = medicine(20, true, Some(50));
        assert_eq!(
            ReorderDecision::evaluate(&m, 20),
            ReorderDecision::Sufficient { total_quantity: 20 }
        );
    }

    #[test]
    fn below_threshold_with_automatic_reorder_signals() {
        let m = medicine(20, true, Some(50));
        let decision = ReorderDecision::evaluate(&m, 15);
        let signal = decision.signal().expect("should reorder");
        assert_eq!(signal.shortfall, 5);
        assert_eq!(signal.reorder_quantity, 50);
        assert_eq!(signal.provider_id, Some(3));
    }

    #[test]
    fn manual_medicines_are_low_but_never_signal() {
        let m = medicine(20, false, None);
        let decision = ReorderDecision::evaluate(&m, 19);
        assert!(decision.is_low_stock());
        assert!(decision.signal().is_none());
    }

    #[test]
    fn missing_reorder_quantity_falls_back_to_shortfall() {
        let m = medicine(20, true, None);
        let decision = ReorderDecision::evaluate(&m, 12);
        assert_eq!(decision.signal().map(|s| s.reorder_quantity), Some(8));
    }
}
