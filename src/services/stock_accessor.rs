use crate::{
    db::DbPool,
    entities::{
        batch::{self, Entity as Batch},
        location,
        medicine::{self, Entity as Medicine},
    },
    errors::ServiceError,
};
use chrono::{Duration, NaiveDate, Utc};
use sea_orm::{
    sea_query::{Alias, Expr, Func, SimpleExpr},
    ColumnTrait, Condition, ConnectionTrait, EntityTrait, FromQueryResult, JoinType, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::instrument;

/// Which part of the ledger a read covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "scope", content = "id", rename_all = "snake_case")]
pub enum StockScope {
    Medicine(i64),
    Location(i64),
    /// One medicine at one location.
    Shelf { medicine_id: i64, location_id: i64 },
    All,
}

impl StockScope {
    fn condition(self) -> Condition {
        match self {
            StockScope::Medicine(id) => Condition::all().add(batch::Column::MedicineId.eq(id)),
            StockScope::Location(id) => Condition::all().add(batch::Column::LocationId.eq(id)),
            StockScope::Shelf {
                medicine_id,
                location_id,
            } => Condition::all()
                .add(batch::Column::MedicineId.eq(medicine_id))
                .add(batch::Column::LocationId.eq(location_id)),
            StockScope::All => Condition::all(),
        }
    }
}

/// A medicine whose summed batch quantity is under its alert threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromQueryResult)]
pub struct LowStockMedicine {
    pub medicine_id: i64,
    pub name: String,
    pub alert_threshold: i32,
    pub automatic_reorder: bool,
    pub total_quantity: i64,
}

impl LowStockMedicine {
    pub fn shortfall(&self) -> i64 {
        i64::from(self.alert_threshold) - self.total_quantity
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, FromQueryResult)]
pub struct LocationStock {
    pub location_id: i64,
    pub location_name: String,
    pub total_quantity: i64,
}

/// Everything the stock views and the reorder check need for one medicine,
/// read from a single snapshot of the ledger.
#[derive(Debug, Clone, Serialize)]
pub struct StockSnapshot {
    pub medicine: medicine::Model,
    pub total_quantity: i64,
    pub earliest_expiration: Option<NaiveDate>,
    pub expiration_dates: Vec<NaiveDate>,
    pub locations: Vec<LocationStock>,
    pub is_low_stock: bool,
    pub needs_reorder: bool,
}

/// `CAST(COALESCE(SUM(batches.quantity), 0) AS BIGINT)`
///
/// The cast keeps the column an integer on Postgres, where SUM(bigint)
/// comes back as numeric.
fn summed_quantity() -> SimpleExpr {
    Func::cast_as(
        Func::coalesce([
            Expr::col((Batch, batch::Column::Quantity)).sum(),
            Expr::val(0i64).into(),
        ]),
        Alias::new("BIGINT"),
    )
    .into()
}

pub async fn load_medicine<C>(db: &C, medicine_id: i64) -> Result<medicine::Model, ServiceError>
where
    C: ConnectionTrait,
{
    Medicine::find_by_id(medicine_id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Medicine", medicine_id))
}

pub async fn load_location<C>(db: &C, location_id: i64) -> Result<location::Model, ServiceError>
where
    C: ConnectionTrait,
{
    location::Entity::find_by_id(location_id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Location", location_id))
}

/// Sum of batch quantities in scope; zero when nothing matches.
pub async fn total_quantity<C>(db: &C, scope: StockScope) -> Result<i64, ServiceError>
where
    C: ConnectionTrait,
{
    let total = Batch::find()
        .select_only()
        .column_as(summed_quantity(), "total_quantity")
        .filter(scope.condition())
        .into_tuple::<i64>()
        .one(db)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(total.unwrap_or(0))
}

/// Earliest expiration among batches that still hold stock.
pub async fn earliest_expiration<C>(
    db: &C,
    medicine_id: i64,
) -> Result<Option<NaiveDate>, ServiceError>
where
    C: ConnectionTrait,
{
    let first = Batch::find()
        .filter(batch::Column::MedicineId.eq(medicine_id))
        .filter(batch::Column::Quantity.gt(0))
        .order_by_asc(batch::Column::ExpirationDate)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?;

    Ok(first.map(|b| b.expiration_date))
}

pub async fn distinct_expiration_dates<C>(
    db: &C,
    medicine_id: i64,
) -> Result<Vec<NaiveDate>, ServiceError>
where
    C: ConnectionTrait,
{
    Batch::find()
        .select_only()
        .column(batch::Column::ExpirationDate)
        .distinct()
        .filter(batch::Column::MedicineId.eq(medicine_id))
        .filter(batch::Column::Quantity.gt(0))
        .order_by_asc(batch::Column::ExpirationDate)
        .into_tuple::<NaiveDate>()
        .all(db)
        .await
        .map_err(ServiceError::db_error)
}

/// Batches in scope, earliest expiration first. Empty batches are included
/// only when asked for.
pub async fn batches<C>(
    db: &C,
    scope: StockScope,
    include_empty: bool,
) -> Result<Vec<batch::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    let mut query = Batch::find().filter(scope.condition());
    if !include_empty {
        query = query.filter(batch::Column::Quantity.gt(0));
    }

    query
        .order_by_asc(batch::Column::ExpirationDate)
        .order_by_asc(batch::Column::Id)
        .all(db)
        .await
        .map_err(ServiceError::db_error)
}

/// Batches with stock whose expiration date is strictly before `today`.
pub async fn expired_batches<C>(
    db: &C,
    scope: StockScope,
    today: NaiveDate,
) -> Result<Vec<batch::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Batch::find()
        .filter(scope.condition())
        .filter(batch::Column::Quantity.gt(0))
        .filter(batch::Column::ExpirationDate.lt(today))
        .order_by_asc(batch::Column::ExpirationDate)
        .order_by_asc(batch::Column::Id)
        .all(db)
        .await
        .map_err(ServiceError::db_error)
}

/// Batches with stock expiring in `[today, today + window_days]`.
pub async fn expiring_soon_batches<C>(
    db: &C,
    scope: StockScope,
    today: NaiveDate,
    window_days: i64,
) -> Result<Vec<batch::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    if window_days < 0 {
        return Err(ServiceError::ValidationError(format!(
            "expiring-soon window must not be negative, got {}",
            window_days
        )));
    }
    let horizon = Duration::try_days(window_days)
        .and_then(|window| today.checked_add_signed(window))
        .ok_or_else(|| {
            ServiceError::ValidationError(format!(
                "expiring-soon window of {} days is out of range",
                window_days
            ))
        })?;

    Batch::find()
        .filter(scope.condition())
        .filter(batch::Column::Quantity.gt(0))
        .filter(batch::Column::ExpirationDate.gte(today))
        .filter(batch::Column::ExpirationDate.lte(horizon))
        .order_by_asc(batch::Column::ExpirationDate)
        .order_by_asc(batch::Column::Id)
        .all(db)
        .await
        .map_err(ServiceError::db_error)
}

/// Every medicine whose total quantity is under its own alert threshold,
/// computed in one grouped query. Medicines with no batches count as zero.
pub async fn below_alert_threshold<C>(db: &C) -> Result<Vec<LowStockMedicine>, ServiceError>
where
    C: ConnectionTrait,
{
    Medicine::find()
        .select_only()
        .column_as(medicine::Column::Id, "medicine_id")
        .column_as(medicine::Column::Name, "name")
        .column_as(medicine::Column::AlertThreshold, "alert_threshold")
        .column_as(medicine::Column::AutomaticReorder, "automatic_reorder")
        .column_as(summed_quantity(), "total_quantity")
        .join(JoinType::LeftJoin, medicine::Relation::Batches.def())
        .group_by(medicine::Column::Id)
        .group_by(medicine::Column::Name)
        .group_by(medicine::Column::AlertThreshold)
        .group_by(medicine::Column::AutomaticReorder)
        .having(
            Expr::expr(summed_quantity())
                .lt(Expr::col((Medicine, medicine::Column::AlertThreshold))),
        )
        .order_by_asc(medicine::Column::Id)
        .into_model::<LowStockMedicine>()
        .all(db)
        .await
        .map_err(ServiceError::db_error)
}

/// Per-location totals for one medicine, including locations whose
/// batches are all empty.
pub async fn location_totals<C>(
    db: &C,
    medicine_id: i64,
) -> Result<Vec<LocationStock>, ServiceError>
where
    C: ConnectionTrait,
{
    Batch::find()
        .select_only()
        .column_as(batch::Column::LocationId, "location_id")
        .column_as(location::Column::Name, "location_name")
        .column_as(summed_quantity(), "total_quantity")
        .join(JoinType::InnerJoin, batch::Relation::Location.def())
        .filter(batch::Column::MedicineId.eq(medicine_id))
        .group_by(batch::Column::LocationId)
        .group_by(location::Column::Name)
        .order_by_asc(batch::Column::LocationId)
        .into_model::<LocationStock>()
        .all(db)
        .await
        .map_err(ServiceError::db_error)
}

pub async fn snapshot_with<C>(db: &C, medicine_id: i64) -> Result<StockSnapshot, ServiceError>
where
    C: ConnectionTrait,
{
    let medicine = load_medicine(db, medicine_id).await?;
    let total_quantity = total_quantity(db, StockScope::Medicine(medicine_id)).await?;
    let earliest_expiration = earliest_expiration(db, medicine_id).await?;
    let expiration_dates = distinct_expiration_dates(db, medicine_id).await?;
    let locations = location_totals(db, medicine_id).await?;

    Ok(StockSnapshot {
        is_low_stock: medicine.is_low_stock(total_quantity),
        needs_reorder: medicine.needs_reorder(total_quantity),
        medicine,
        total_quantity,
        earliest_expiration,
        expiration_dates,
        locations,
    })
}

/// Read side of the ledger. Never writes.
#[derive(Clone)]
pub struct StockAccessor {
    db: Arc<DbPool>,
}

impl StockAccessor {
    pub fn new(db: Arc<DbPool>) -> Self {
        Self { db }
    }

    pub fn today() -> NaiveDate {
        Utc::now().date_naive()
    }

    #[instrument(skip(self))]
    pub async fn total_quantity(&self, scope: StockScope) -> Result<i64, ServiceError> {
        total_quantity(self.db.as_ref(), scope).await
    }

    #[instrument(skip(self))]
    pub async fn earliest_expiration(
        &self,
        medicine_id: i64,
    ) -> Result<Option<NaiveDate>, ServiceError> {
        earliest_expiration(self.db.as_ref(), medicine_id).await
    }

    #[instrument(skip(self))]
    pub async fn distinct_expiration_dates(
        &self,
        medicine_id: i64,
    ) -> Result<Vec<NaiveDate>, ServiceError> {
        distinct_expiration_dates(self.db.as_ref(), medicine_id).await
    }

    pub async fn is_low_stock(&self, medicine_id: i64) -> Result<bool, ServiceError> {
        Ok(self.snapshot(medicine_id).await?.is_low_stock)
    }

    pub async fn needs_reorder(&self, medicine_id: i64) -> Result<bool, ServiceError> {
        Ok(self.snapshot(medicine_id).await?.needs_reorder)
    }

    pub async fn batches(
        &self,
        scope: StockScope,
        include_empty: bool,
    ) -> Result<Vec<batch::Model>, ServiceError> {
        batches(self.db.as_ref(), scope, include_empty).await
    }

    /// Expired batches as of `as_of`, or today when not given.
    #[instrument(skip(self))]
    pub async fn expired_batches(
        &self,
        scope: StockScope,
        as_of: Option<NaiveDate>,
    ) -> Result<Vec<batch::Model>, ServiceError> {
        let today = as_of.unwrap_or_else(Self::today);
        expired_batches(self.db.as_ref(), scope, today).await
    }

    #[instrument(skip(self))]
    pub async fn expiring_soon_batches(
        &self,
        scope: StockScope,
        as_of: Option<NaiveDate>,
        window_days: i64,
    ) -> Result<Vec<batch::Model>, ServiceError> {
        let today = as_of.unwrap_or_else(Self::today);
        expiring_soon_batches(self.db.as_ref(), scope, today, window_days).await
    }

    #[instrument(skip(self))]
    pub async fn below_alert_threshold(&self) -> Result<Vec<LowStockMedicine>, ServiceError> {
        below_alert_threshold(self.db.as_ref()).await
    }

    pub async fn location_totals(
        &self,
        medicine_id: i64,
    ) -> Result<Vec<LocationStock>, ServiceError> {
        location_totals(self.db.as_ref(), medicine_id).await
    }

    /// Reads the whole stock picture for a medicine inside one transaction.
    #[instrument(skip(self))]
    pub async fn snapshot(&self, medicine_id: i64) -> Result<StockSnapshot, ServiceError> {
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;
        let snapshot = snapshot_with(&txn, medicine_id).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        Ok(snapshot)
    }
}
