// Stock ledger
pub mod locks;
pub mod stock_accessor;
pub mod stock_mutator;

// Decisions and collaborators
pub mod expiry;
pub mod reorder;

// Catalog management
pub mod catalog;

use crate::{db::DbPool, events::EventSender};
use catalog::CatalogService;
use expiry::{EventExpiryAlertSink, ExpiryAlertSink, ExpirySweep};
use locks::StockLocks;
use reorder::{EventReorderSink, ReorderEvaluator, ReorderSink};
use std::sync::Arc;
use stock_accessor::StockAccessor;
use stock_mutator::StockMutator;

/// All services wired against one pool, sharing one lock registry and one
/// reorder evaluator.
#[derive(Clone)]
pub struct StockServices {
    pub accessor: StockAccessor,
    pub mutator: StockMutator,
    pub reorder: Arc<ReorderEvaluator>,
    pub catalog: CatalogService,
    pub expiry: ExpirySweep,
}

impl StockServices {
    /// Collaborators report through the event channel.
    pub fn new(db: Arc<DbPool>, events: EventSender) -> Self {
        let reorder_sink = Arc::new(EventReorderSink::new(events.clone()));
        let expiry_sink = Arc::new(EventExpiryAlertSink::new(events.clone()));
        Self::with_sinks(db, events, reorder_sink, expiry_sink)
    }

    pub fn with_sinks(
        db: Arc<DbPool>,
        events: EventSender,
        reorder_sink: Arc<dyn ReorderSink>,
        expiry_sink: Arc<dyn ExpiryAlertSink>,
    ) -> Self {
        let accessor = StockAccessor::new(db.clone());
        let reorder = Arc::new(ReorderEvaluator::new(accessor.clone(), reorder_sink));
        let mutator = StockMutator::new(
            db.clone(),
            StockLocks::new(),
            events.clone(),
            reorder.clone(),
        );
        let catalog = CatalogService::new(db.clone(), events, reorder.clone());
        let expiry = ExpirySweep::new(db, expiry_sink);

        Self {
            accessor,
            mutator,
            reorder,
            catalog,
            expiry,
        }
    }
}
