#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use async_trait::async_trait;
use axum::Router;
use chrono::{Duration, NaiveDate, Utc};
use medstock::{
    app_router,
    config::AppConfig,
    db::{self, DbPool},
    entities::{batch, location, medicine, Formulation},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        catalog::{NewLocation, NewMedicine},
        expiry::ExpiryAlertSink,
        reorder::{ReorderSignal, ReorderSink},
        StockServices,
    },
    AppState,
};
use rust_decimal_macros::dec;
use tokio::sync::mpsc;

/// Captures reorder signals instead of ordering anything.
#[derive(Default)]
pub struct RecordingReorderSink {
    signals: Mutex<Vec<ReorderSignal>>,
    failing: AtomicBool,
}

impl RecordingReorderSink {
    pub fn signals(&self) -> Vec<ReorderSignal> {
        self.signals.lock().unwrap().clone()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReorderSink for RecordingReorderSink {
    async fn request_reorder(&self, signal: &ReorderSignal) -> Result<(), ServiceError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ServiceError::CollaboratorError("ordering offline".into()));
        }
        self.signals.lock().unwrap().push(signal.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingExpirySink {
    batch_ids: Mutex<Vec<i64>>,
}

impl RecordingExpirySink {
    pub fn batch_ids(&self) -> Vec<i64> {
        self.batch_ids.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExpiryAlertSink for RecordingExpirySink {
    async fn notify_expired(&self, batch: &batch::Model) -> Result<(), ServiceError> {
        self.batch_ids.lock().unwrap().push(batch.id);
        Ok(())
    }
}

/// Fresh in-memory ledger with recording collaborators.
pub struct TestContext {
    pub db: Arc<DbPool>,
    pub services: StockServices,
    pub reorders: Arc<RecordingReorderSink>,
    pub expiries: Arc<RecordingExpirySink>,
    pub events: mpsc::Receiver<Event>,
    pub event_sender: EventSender,
}

impl TestContext {
    pub async fn new() -> Self {
        let pool = db::establish_connection("sqlite::memory:")
            .await
            .expect("failed to open in-memory database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db = Arc::new(pool);

        let (event_sender, events) = EventSender::channel(1024);
        let reorders = Arc::new(RecordingReorderSink::default());
        let expiries = Arc::new(RecordingExpirySink::default());
        let services = StockServices::with_sinks(
            db.clone(),
            event_sender.clone(),
            reorders.clone(),
            expiries.clone(),
        );

        Self {
            db,
            services,
            reorders,
            expiries,
            events,
            event_sender,
        }
    }

    pub fn router(&self) -> Router {
        let config = AppConfig::new(
            "sqlite::memory:".to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        let state = AppState {
            db: self.db.clone(),
            config,
            services: self.services.clone(),
        };
        app_router(state)
    }

    pub async fn medicine(
        &self,
        name: &str,
        alert_threshold: i32,
        automatic_reorder: bool,
        reorder_quantity: Option<i32>,
    ) -> medicine::Model {
        self.services
            .catalog
            .create_medicine(new_medicine(
                name,
                alert_threshold,
                automatic_reorder,
                reorder_quantity,
            ))
            .await
            .expect("failed to create medicine")
    }

    pub async fn location(&self, name: &str) -> location::Model {
        self.services
            .catalog
            .create_location(NewLocation {
                name: name.to_string(),
                description: None,
            })
            .await
            .expect("failed to create location")
    }

    pub async fn receive(
        &self,
        medicine_id: i64,
        location_id: i64,
        quantity: i64,
        expiration_date: NaiveDate,
    ) -> batch::Model {
        self.services
            .mutator
            .receive_batch(medicine_id, location_id, quantity, expiration_date)
            .await
            .expect("failed to receive batch")
    }

    /// Every batch row for a medicine, empty ones included, by id.
    pub async fn ledger(&self, medicine_id: i64) -> Vec<batch::Model> {
        use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

        batch::Entity::find()
            .filter(batch::Column::MedicineId.eq(medicine_id))
            .order_by_asc(batch::Column::Id)
            .all(self.db.as_ref())
            .await
            .expect("failed to read ledger")
    }

    pub fn drain_events(&mut self) -> Vec<Event> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }
}

pub fn new_medicine(
    name: &str,
    alert_threshold: i32,
    automatic_reorder: bool,
    reorder_quantity: Option<i32>,
) -> NewMedicine {
    NewMedicine {
        name: name.to_string(),
        barcode: format!("BC-{}", name.to_uppercase()),
        dosage: "500mg".to_string(),
        formulation: Formulation::Tablet,
        unit_price: dec!(3.75),
        alert_threshold,
        automatic_reorder,
        reorder_quantity,
        provider_id: None,
        image_path: None,
    }
}

pub fn today() -> NaiveDate {
    Utc::now().date_naive()
}

pub fn days_from_today(days: i64) -> NaiveDate {
    today() + Duration::days(days)
}
