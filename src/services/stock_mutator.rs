use crate::{
    db::DbPool,
    entities::batch::{self, Entity as Batch},
    errors::ServiceError,
    events::{Event, EventSender},
    services::{
        locks::StockLocks,
        reorder::{ReorderEvaluator, ReorderSignal},
        stock_accessor::{self, StockScope},
    },
};
use chrono::{NaiveDate, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, ModelTrait,
    QueryFilter, QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One planned or applied decrement against a single batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchDraw {
    pub batch_id: i64,
    pub expiration_date: NaiveDate,
    pub taken: i64,
    /// Quantity left on the batch after the draw.
    pub remaining: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StockReduction {
    pub medicine_id: i64,
    pub location_id: i64,
    pub requested: i64,
    pub removed: i64,
    pub draws: Vec<BatchDraw>,
    /// Medicine total across all locations after the reduction.
    pub total_quantity: i64,
    pub reorder: Option<ReorderSignal>,
}

/// Result of a direct edit to one batch.
#[derive(Debug, Clone, Serialize)]
pub struct BatchChange {
    pub batch: batch::Model,
    pub previous_quantity: i64,
    pub total_quantity: i64,
    pub reorder: Option<ReorderSignal>,
}

/// Plans a first-expired-first-out removal of `quantity` from `batches`.
///
/// Batches are consumed in (expiration_date, id) order and empty batches
/// are skipped. Fails with `InsufficientStock` before producing any draw
/// when the batches cannot cover the request.
pub fn plan_fefo(batches: &[batch::Model], quantity: i64) -> Result<Vec<BatchDraw>, ServiceError> {
    if quantity <= 0 {
        return Ok(Vec::new());
    }

    let mut eligible: Vec<&batch::Model> = batches.iter().filter(|b| b.has_stock()).collect();
    eligible.sort_by_key(|b| (b.expiration_date, b.id));

    let available: i64 = eligible.iter().map(|b| b.quantity).sum();
    if available < quantity {
        return Err(ServiceError::InsufficientStock {
            requested: quantity,
            available,
        });
    }

    let mut outstanding = quantity;
    let mut draws = Vec::new();
    for b in eligible {
        if outstanding == 0 {
            break;
        }
        let taken = outstanding.min(b.quantity);
        outstanding -= taken;
        draws.push(BatchDraw {
            batch_id: b.id,
            expiration_date: b.expiration_date,
            taken,
            remaining: b.quantity - taken,
        });
    }

    Ok(draws)
}

/// Write side of the ledger.
///
/// Each operation holds the (medicine, location) lock for its whole
/// read-modify-write, runs in one transaction and reads rows `FOR UPDATE`.
/// Events and reorder signals go out only after commit.
#[derive(Clone)]
pub struct StockMutator {
    db: Arc<DbPool>,
    locks: StockLocks,
    events: EventSender,
    reorder: Arc<ReorderEvaluator>,
}

impl StockMutator {
    pub fn new(
        db: Arc<DbPool>,
        locks: StockLocks,
        events: EventSender,
        reorder: Arc<ReorderEvaluator>,
    ) -> Self {
        Self {
            db,
            locks,
            events,
            reorder,
        }
    }

    /// Adds stock, merging into the batch with the same medicine, location
    /// and expiration date when one exists.
    #[instrument(skip(self))]
    pub async fn receive_batch(
        &self,
        medicine_id: i64,
        location_id: i64,
        quantity: i64,
        expiration_date: NaiveDate,
    ) -> Result<batch::Model, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::InvalidQuantity(format!(
                "received quantity must be positive, got {}",
                quantity
            )));
        }

        let guard = self.locks.acquire(medicine_id, location_id).await;
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        stock_accessor::load_medicine(&txn, medicine_id).await?;
        stock_accessor::load_location(&txn, location_id).await?;

        let existing = Batch::find()
            .filter(batch::Column::MedicineId.eq(medicine_id))
            .filter(batch::Column::LocationId.eq(location_id))
            .filter(batch::Column::ExpirationDate.eq(expiration_date))
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let saved = match existing {
            Some(current) => {
                let merged = current.quantity.checked_add(quantity).ok_or_else(|| {
                    ServiceError::InvalidQuantity(format!(
                        "receiving {} would overflow batch {}",
                        quantity, current.id
                    ))
                })?;
                let mut active: batch::ActiveModel = current.into();
                active.quantity = Set(merged);
                active.update(&txn).await.map_err(ServiceError::db_error)?
            }
            None => batch::ActiveModel {
                medicine_id: Set(medicine_id),
                location_id: Set(location_id),
                quantity: Set(quantity),
                expiration_date: Set(expiration_date),
                ..Default::default()
            }
            .insert(&txn)
            .await
            .map_err(ServiceError::db_error)?,
        };

        let total = stock_accessor::total_quantity(&txn, StockScope::Medicine(medicine_id)).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        drop(guard);

        info!(
            batch_id = saved.id,
            new_quantity = saved.quantity,
            total_quantity = total,
            "Batch received"
        );
        self.events.publish(Event::BatchReceived {
            batch_id: saved.id,
            medicine_id,
            location_id,
            quantity,
            new_quantity: saved.quantity,
            expiration_date,
        });
        self.reorder.stock_changed(medicine_id);

        Ok(saved)
    }

    /// Removes stock of one medicine at one location.
    ///
    /// Without `expiration_date` the removal walks batches earliest-expiring
    /// first. With it, only the batch carrying that exact date is touched.
    /// Either the whole quantity is removed or nothing is.
    #[instrument(skip(self))]
    pub async fn reduce_stock(
        &self,
        medicine_id: i64,
        location_id: i64,
        quantity: i64,
        expiration_date: Option<NaiveDate>,
    ) -> Result<StockReduction, ServiceError> {
        if quantity <= 0 {
            debug!("nothing to remove");
            return Ok(StockReduction {
                medicine_id,
                location_id,
                requested: quantity,
                removed: 0,
                draws: Vec::new(),
                total_quantity: stock_accessor::total_quantity(
                    self.db.as_ref(),
                    StockScope::Medicine(medicine_id),
                )
                .await?,
                reorder: None,
            });
        }

        let guard = self.locks.acquire(medicine_id, location_id).await;
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let medicine = stock_accessor::load_medicine(&txn, medicine_id).await?;
        stock_accessor::load_location(&txn, location_id).await?;

        let draws = match expiration_date {
            Some(date) => {
                let target = Batch::find()
                    .filter(batch::Column::MedicineId.eq(medicine_id))
                    .filter(batch::Column::LocationId.eq(location_id))
                    .filter(batch::Column::ExpirationDate.eq(date))
                    .lock_exclusive()
                    .one(&txn)
                    .await
                    .map_err(ServiceError::db_error)?
                    .ok_or_else(|| {
                        ServiceError::NotFound(format!(
                            "No batch of medicine {} at location {} expiring {}",
                            medicine_id, location_id, date
                        ))
                    })?;

                if target.quantity < quantity {
                    return Err(ServiceError::InsufficientStock {
                        requested: quantity,
                        available: target.quantity,
                    });
                }

                vec![BatchDraw {
                    batch_id: target.id,
                    expiration_date: date,
                    taken: quantity,
                    remaining: target.quantity - quantity,
                }]
            }
            None => {
                let candidates = Batch::find()
                    .filter(batch::Column::MedicineId.eq(medicine_id))
                    .filter(batch::Column::LocationId.eq(location_id))
                    .filter(batch::Column::Quantity.gt(0))
                    .order_by_asc(batch::Column::ExpirationDate)
                    .order_by_asc(batch::Column::Id)
                    .lock_exclusive()
                    .all(&txn)
                    .await
                    .map_err(ServiceError::db_error)?;

                plan_fefo(&candidates, quantity)?
            }
        };

        for draw in &draws {
            // Conditional decrement: a row that moved under us fails the
            // whole transaction instead of going negative.
            let result = Batch::update_many()
                .col_expr(
                    batch::Column::Quantity,
                    Expr::col(batch::Column::Quantity).sub(draw.taken),
                )
                .col_expr(batch::Column::UpdatedAt, Expr::value(Utc::now()))
                .filter(batch::Column::Id.eq(draw.batch_id))
                .filter(batch::Column::Quantity.gte(draw.taken))
                .exec(&txn)
                .await
                .map_err(ServiceError::db_error)?;

            if result.rows_affected != 1 {
                warn!(batch_id = draw.batch_id, "batch changed during reduction");
                return Err(ServiceError::ConstraintViolation(format!(
                    "batch {} changed during reduction",
                    draw.batch_id
                )));
            }
        }

        let total = stock_accessor::total_quantity(&txn, StockScope::Medicine(medicine_id)).await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        drop(guard);

        let removed: i64 = draws.iter().map(|d| d.taken).sum();
        info!(removed, total_quantity = total, "Stock reduced");
        self.events.publish(Event::StockReduced {
            medicine_id,
            location_id,
            removed,
            batch_ids: draws.iter().map(|d| d.batch_id).collect(),
        });

        self.reorder.stock_changed(medicine.id);
        let reorder = self.reorder.process(&medicine, total).await;

        Ok(StockReduction {
            medicine_id,
            location_id,
            requested: quantity,
            removed,
            draws,
            total_quantity: total,
            reorder,
        })
    }

    /// Sets one batch's quantity outright, bypassing FEFO. Used for
    /// physical count corrections.
    #[instrument(skip(self))]
    pub async fn adjust_batch_quantity(
        &self,
        batch_id: i64,
        new_quantity: i64,
    ) -> Result<BatchChange, ServiceError> {
        if new_quantity < 0 {
            return Err(ServiceError::InvalidQuantity(format!(
                "batch quantity must not be negative, got {}",
                new_quantity
            )));
        }

        let located = self.find_batch(batch_id).await?;
        let guard = self
            .locks
            .acquire(located.medicine_id, located.location_id)
            .await;
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let current = Batch::find_by_id(batch_id)
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Batch", batch_id))?;
        let medicine = stock_accessor::load_medicine(&txn, current.medicine_id).await?;

        let previous_quantity = current.quantity;
        let mut active: batch::ActiveModel = current.into();
        active.quantity = Set(new_quantity);
        let updated = active.update(&txn).await.map_err(ServiceError::db_error)?;

        let total =
            stock_accessor::total_quantity(&txn, StockScope::Medicine(updated.medicine_id))
                .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        drop(guard);

        info!(
            previous_quantity,
            new_quantity, "Batch quantity adjusted"
        );
        self.events.publish(Event::BatchAdjusted {
            batch_id,
            medicine_id: updated.medicine_id,
            old_quantity: previous_quantity,
            new_quantity,
        });

        self.reorder.stock_changed(medicine.id);
        let reorder = self.reorder.process(&medicine, total).await;

        Ok(BatchChange {
            batch: updated,
            previous_quantity,
            total_quantity: total,
            reorder,
        })
    }

    /// Removes a batch row entirely, whatever its quantity.
    #[instrument(skip(self))]
    pub async fn delete_batch(&self, batch_id: i64) -> Result<BatchChange, ServiceError> {
        let located = self.find_batch(batch_id).await?;
        let guard = self
            .locks
            .acquire(located.medicine_id, located.location_id)
            .await;
        let txn = self.db.begin().await.map_err(ServiceError::db_error)?;

        let current = Batch::find_by_id(batch_id)
            .lock_exclusive()
            .one(&txn)
            .await
            .map_err(ServiceError::db_error)?
            .ok_or_else(|| ServiceError::not_found("Batch", batch_id))?;
        let medicine = stock_accessor::load_medicine(&txn, current.medicine_id).await?;

        current
            .clone()
            .delete(&txn)
            .await
            .map_err(ServiceError::db_error)?;

        let total =
            stock_accessor::total_quantity(&txn, StockScope::Medicine(current.medicine_id))
                .await?;
        txn.commit().await.map_err(ServiceError::db_error)?;
        drop(guard);

        info!(quantity = current.quantity, "Batch deleted");
        self.events.publish(Event::BatchDeleted {
            batch_id,
            medicine_id: current.medicine_id,
            location_id: current.location_id,
        });

        self.reorder.stock_changed(medicine.id);
        let reorder = self.reorder.process(&medicine, total).await;

        Ok(BatchChange {
            previous_quantity: current.quantity,
            batch: current,
            total_quantity: total,
            reorder,
        })
    }

    async fn find_batch(&self, batch_id: i64) -> Result<batch::Model, ServiceError> {
        find_batch(self.db.as_ref(), batch_id).await
    }
}

async fn find_batch<C>(db: &C, batch_id: i64) -> Result<batch::Model, ServiceError>
where
    C: ConnectionTrait,
{
    Batch::find_by_id(batch_id)
        .one(db)
        .await
        .map_err(ServiceError::db_error)?
        .ok_or_else(|| ServiceError::not_found("Batch", batch_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 6, d).unwrap()
    }

    fn batch(id: i64, quantity: i64, expiration_date: NaiveDate) -> batch::Model {
        batch::Model {
            id,
            medicine_id: 1,
            location_id: 1,
            quantity,
            expiration_date,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn fefo_drains_earliest_first() {
        let batches = vec![batch(3, 5, day(30)), batch(1, 5, day(10)), batch(2, 5, day(20))];
        let draws = plan_fefo(&batches, 7).unwrap();

        assert_eq!(
            draws,
            vec![
                BatchDraw {
                    batch_id: 1,
                    expiration_date: day(10),
                    taken: 5,
                    remaining: 0
                },
                BatchDraw {
                    batch_id: 2,
                    expiration_date: day(20),
                    taken: 2,
                    remaining: 3
                },
            ]
        );
    }

    #[test]
    fn fefo_breaks_date_ties_by_id() {
        let batches = vec![batch(9, 4, day(10)), batch(4, 4, day(10))];
        let draws = plan_fefo(&batches, 5).unwrap();
        assert_eq!(draws[0].batch_id, 4);
        assert_eq!(draws[1].batch_id, 9);
        assert_eq!(draws[1].taken, 1);
    }

    #[test]
    fn fefo_skips_empty_batches() {
        let batches = vec![batch(1, 0, day(1)), batch(2, 3, day(2))];
        let draws = plan_fefo(&batches, 3).unwrap();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].batch_id, 2);
    }

    #[test]
    fn fefo_rejects_overdraw_without_planning() {
        let batches = vec![batch(1, 2, day(1)), batch(2, 3, day(2))];
        assert_matches!(
            plan_fefo(&batches, 6),
            Err(ServiceError::InsufficientStock {
                requested: 6,
                available: 5
            })
        );
    }

    #[test]
    fn fefo_non_positive_request_is_empty_plan() {
        let batches = vec![batch(1, 2, day(1))];
        assert!(plan_fefo(&batches, 0).unwrap().is_empty());
        assert!(plan_fefo(&batches, -4).unwrap().is_empty());
    }

    #[test]
    fn fefo_exact_fit_empties_everything() {
        let batches = vec![batch(1, 2, day(1)), batch(2, 3, day(2))];
        let draws = plan_fefo(&batches, 5).unwrap();
        assert!(draws.iter().all(|d| d.remaining == 0));
    }
}
