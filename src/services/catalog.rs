use crate::{
    db::DbPool,
    entities::{
        batch::{self, Entity as Batch},
        location::{self, Entity as Location},
        medicine::{self, Entity as Medicine, Formulation},
        provider::{self, Entity as Provider},
    },
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        reorder::{ReorderEvaluator, ReorderSignal},
        stock_accessor::{self, StockScope},
    },
};
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::{Validate, ValidationError};

fn validate_decimal_min_zero(value: &Decimal) -> Result<(), ValidationError> {
    if *value < Decimal::ZERO {
        return Err(ValidationError::new("decimal_min_zero"));
    }
    Ok(())
}

fn validate_reorder_rule(input: &NewMedicine) -> Result<(), ValidationError> {
    check_reorder_rule(input.automatic_reorder, input.reorder_quantity)
}

/// Automatic reorder needs a quantity to order.
fn check_reorder_rule(
    automatic_reorder: bool,
    reorder_quantity: Option<i32>,
) -> Result<(), ValidationError> {
    if automatic_reorder && reorder_quantity.is_none() {
        let mut err = ValidationError::new("reorder_quantity_required");
        err.message = Some("reorder_quantity is required when automatic_reorder is set".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[validate(schema(function = "validate_reorder_rule"))]
pub struct NewMedicine {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(min = 1, max = 64))]
    pub barcode: String,
    #[validate(length(min = 1, max = 64))]
    pub dosage: String,
    pub formulation: Formulation,
    #[validate(custom = "validate_decimal_min_zero")]
    pub unit_price: Decimal,
    #[validate(range(min = 0))]
    pub alert_threshold: i32,
    #[serde(default)]
    pub automatic_reorder: bool,
    #[validate(range(min = 1))]
    pub reorder_quantity: Option<i32>,
    pub provider_id: Option<i64>,
    #[validate(length(max = 512))]
    pub image_path: Option<String>,
}

/// Partial update; absent fields are left alone.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct MedicineUpdate {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub barcode: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub dosage: Option<String>,
    pub formulation: Option<Formulation>,
    #[validate(custom = "validate_decimal_min_zero")]
    pub unit_price: Option<Decimal>,
    #[validate(range(min = 0))]
    pub alert_threshold: Option<i32>,
    pub automatic_reorder: Option<bool>,
    #[validate(range(min = 1))]
    pub reorder_quantity: Option<i32>,
    pub provider_id: Option<i64>,
    #[validate(length(max = 512))]
    pub image_path: Option<String>,
}

impl MedicineUpdate {
    fn touches_reorder_rule(&self) -> bool {
        self.alert_threshold.is_some()
            || self.automatic_reorder.is_some()
            || self.reorder_quantity.is_some()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MedicineChange {
    pub medicine: medicine::Model,
    pub total_quantity: i64,
    pub reorder: Option<ReorderSignal>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewLocation {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct LocationUpdate {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationRemoval {
    pub location_id: i64,
    pub batches_removed: u64,
    pub reorders: Vec<ReorderSignal>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewProvider {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
}

/// Medicines, locations and providers: the two ends of the ledger and
/// who supplies them.
#[derive(Clone)]
pub struct CatalogService {
    db: Arc<DbPool>,
    events: EventSender,
    reorder: Arc<ReorderEvaluator>,
}

impl CatalogService {
    pub fn new(db: Arc<DbPool>, events: EventSender, reorder: Arc<ReorderEvaluator>) -> Self {
        Self { db, events, reorder }
    }

    #[instrument(skip(self, input), fields(barcode = %input.barcode))]
    pub async fn create_medicine(
        &self,
        input: NewMedicine,
    ) -> Result<medicine::Model, ServiceError> {
        input.validate()?;
        let db = self.db.as_ref();

        if let Some(provider_id) = input.provider_id {
            ensure_provider(db, provider_id).await?;
        }

        let created = medicine::ActiveModel {
            name: Set(input.name),
            barcode: Set(input.barcode),
            dosage: Set(input.dosage),
            formulation: Set(input.formulation),
            unit_price: Set(input.unit_price),
            alert_threshold: Set(input.alert_threshold),
            automatic_reorder: Set(input.automatic_reorder),
            reorder_quantity: Set(input.reorder_quantity),
            provider_id: Set(input.provider_id),
            image_path: Set(input.image_path),
            ..Default::default()
        }
        .insert(db)
        .await
        .map_err(ServiceError::db_error)?;

        info!(medicine_id = created.id, "Medicine created");
        self.events.publish(Event::MedicineCreated(created.id));
        Ok(created)
    }

    pub async fn get_medicine(&self, medicine_id: i64) -> Result<medicine::Model, ServiceError> {
        stock_accessor::load_medicine(self.db.as_ref(), medicine_id).await
    }

    pub async fn list_medicines(&self) -> Result<Vec<medicine::Model>, ServiceError> {
        Medicine::find()
            .order_by_asc(medicine::Column::Name)
            .order_by_asc(medicine::Column::Id)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Applies a partial update. Changing the threshold or the reorder
    /// settings re-runs the reorder check against current stock.
    #[instrument(skip(self, changes))]
    pub async fn update_medicine(
        &self,
        medicine_id: i64,
        changes: MedicineUpdate,
    ) -> Result<MedicineChange, ServiceError> {
        changes.validate()?;
        let reorder_relevant = changes.touches_reorder_rule();

        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let current = stock_accessor::load_medicine(&txn, medicine_id).await?;

        let automatic_reorder = changes.automatic_reorder.unwrap_or(current.automatic_reorder);
        let reorder_quantity = changes.reorder_quantity.or(current.reorder_quantity);
        check_reorder_rule(automatic_reorder, reorder_quantity)
            .map_err(|e| ServiceError::ValidationError(e.to_string()))?;

        if let Some(provider_id) = changes.provider_id {
            ensure_provider(&txn, provider_id).await?;
        }

        let mut active: medicine::ActiveModel = current.into();
        if let Some(name) = changes.name {
            active.name = Set(name);
        }
        if let Some(barcode) = changes.barcode {
            active.barcode = Set(barcode);
        }
        if let Some(dosage) = changes.dosage {
            active.dosage = Set(dosage);
        }
        if let Some(formulation) = changes.formulation {
            active.formulation = Set(formulation);
        }
        if let Some(unit_price) = changes.unit_price {
            active.unit_price = Set(unit_price);
        }
        if let Some(alert_threshold) = changes.alert_threshold {
            active.alert_threshold = Set(alert_threshold);
        }
        if changes.provider_id.is_some() {
            active.provider_id = Set(changes.provider_id);
        }
        if changes.image_path.is_some() {
            active.image_path = Set(changes.image_path);
        }
        active.automatic_reorder = Set(automatic_reorder);
        active.reorder_quantity = Set(reorder_quantity);

        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;
        let total = stock_accessor::total_quantity(&txn, StockScope::Medicine(medicine_id)).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!("Medicine updated");
        self.events.publish(Event::MedicineUpdated(medicine_id));

        let reorder = if reorder_relevant {
            self.reorder.process(&updated, total).await
        } else {
            None
        };

        Ok(MedicineChange {
            medicine: updated,
            total_quantity: total,
            reorder,
        })
    }

    /// Deletes a medicine together with all of its batches.
    #[instrument(skip(self))]
    pub async fn delete_medicine(&self, medicine_id: i64) -> Result<u64, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let current = stock_accessor::load_medicine(&txn, medicine_id).await?;

        let removed = Batch::delete_many()
            .filter(batch::Column::MedicineId.eq(medicine_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .rows_affected;
        current.delete(&txn).await.map_err(ServiceError::db_error)?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(batches_removed = removed, "Medicine deleted");
        self.reorder.forget(medicine_id);
        self.events.publish(Event::MedicineDeleted(medicine_id));
        Ok(removed)
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_location(
        &self,
        input: NewLocation,
    ) -> Result<location::Model, ServiceError> {
        input.validate()?;

        let created = location::ActiveModel {
            name: Set(input.name),
            description: Set(input.description),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .map_err(ServiceError::db_error)?;

        info!(location_id = created.id, "Location created");
        self.events.publish(Event::LocationCreated(created.id));
        Ok(created)
    }

    pub async fn get_location(&self, location_id: i64) -> Result<location::Model, ServiceError> {
        stock_accessor::load_location(self.db.as_ref(), location_id).await
    }

    pub async fn list_locations(&self) -> Result<Vec<location::Model>, ServiceError> {
        Location::find()
            .order_by_asc(location::Column::Name)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    pub async fn update_location(
        &self,
        location_id: i64,
        changes: LocationUpdate,
    ) -> Result<location::Model, ServiceError> {
        changes.validate()?;
        let db = self.db.as_ref();
        let current = stock_accessor::load_location(db, location_id).await?;

        let mut active: location::ActiveModel = current.into();
        if let Some(name) = changes.name {
            active.name = Set(name);
        }
        if changes.description.is_some() {
            active.description = Set(changes.description);
        }
        active.update(db).await.map_err(ServiceError::db_error)
    }

    /// Deletes a location and every batch stored there, then re-checks
    /// reorder for each medicine that lost stock.
    #[instrument(skip(self))]
    pub async fn delete_location(&self, location_id: i64) -> Result<LocationRemoval, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let current = stock_accessor::load_location(&txn, location_id).await?;

        let affected: Vec<i64> = Batch::find()
            .select_only()
            .column(batch::Column::MedicineId)
            .distinct()
            .filter(batch::Column::LocationId.eq(location_id))
            .filter(batch::Column::Quantity.gt(0))
            .into_tuple::<i64>()
            .all(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let removed = Batch::delete_many()
            .filter(batch::Column::LocationId.eq(location_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .rows_affected;
        current.delete(&txn).await.map_err(ServiceError::db_error)?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!(batches_removed = removed, "Location deleted");
        self.events.publish(Event::LocationDeleted(location_id));

        // The delete is committed; a failed re-check is logged, not returned.
        let mut reorders = Vec::new();
        for medicine_id in affected {
            self.reorder.stock_changed(medicine_id);
            match self.reorder.evaluate_now(medicine_id).await {
                Ok((_, dispatched)) => reorders.extend(dispatched),
                Err(e) => warn!(
                    medicine_id,
                    error = %e,
                    "reorder re-check after location delete failed"
                ),
            }
        }

        Ok(LocationRemoval {
            location_id,
            batches_removed: removed,
            reorders,
        })
    }

    #[instrument(skip(self, input), fields(name = %input.name))]
    pub async fn create_provider(
        &self,
        input: NewProvider,
    ) -> Result<provider::Model, ServiceError> {
        input.validate()?;

        let created = provider::ActiveModel {
            name: Set(input.name),
            email: Set(input.email),
            phone: Set(input.phone),
            ..Default::default()
        }
        .insert(self.db.as_ref())
        .await
        .map_err(ServiceError::db_error)?;

        info!(provider_id = created.id, "Provider created");
        Ok(created)
    }

    pub async fn get_provider(&self, provider_id: i64) -> Result<provider::Model, ServiceError> {
        ensure_provider(self.db.as_ref(), provider_id).await
    }

    pub async fn list_providers(&self) -> Result<Vec<provider::Model>, ServiceError> {
        Provider::find()
            .order_by_asc(provider::Column::Name)
            .all(self.db.as_ref())
            .await
            .map_err(ServiceError::db_error)
    }

    /// Deletes a provider; its medicines stay and lose the reference.
    #[instrument(skip(self))]
    pub async fn delete_provider(&self, provider_id: i64) -> Result<(), ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let current = ensure_provider(&txn, provider_id).await?;

        Medicine::update_many()
            .col_expr(medicine::Column::ProviderId, Expr::value(Option::<i64>::None))
            .filter(medicine::Column::ProviderId.eq(provider_id))
            .exec(&txn)
            .await
            .map_err(ServiceError::db_error)?;
        current.delete(&txn).await.map_err(ServiceError::db_error)?;
        txn.commit().await.map_err(ServiceError::db_error)?;

        info!("Provider deleted");
        Ok(())
    }
}

async fn ensure_provider<C>(db: &C, provider_id: i64) -> Result<provider::Model, ServiceError>
where
    C: ConnectionTrait,
{
    Provider::find_by_id(provider_id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Provider", provider_id))
}
