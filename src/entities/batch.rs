use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};

/// Default look-ahead, in days, for the expiring-soon predicate.
pub const DEFAULT_EXPIRING_SOON_DAYS: i64 = 30;

/// A quantity of one medicine at one location with one expiration date.
///
/// Rows are unique per (medicine_id, location_id, expiration_date) and are
/// kept when their quantity reaches zero.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "batches")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub medicine_id: i64,
    pub location_id: i64,
    pub quantity: i64,
    pub expiration_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    pub fn has_stock(&self) -> bool {
        self.quantity > 0
    }

    /// Expired strictly before `today`; a batch expiring today is still sellable.
    pub fn is_expired(&self, today: NaiveDate) -> bool {
        self.has_stock() && self.expiration_date < today
    }

    pub fn is_expiring_soon(&self, today: NaiveDate, window_days: i64) -> bool {
        if !self.has_stock() || window_days < 0 || self.expiration_date < today {
            return false;
        }
        // A horizon past the calendar's end covers every later date.
        Duration::try_days(window_days)
            .and_then(|window| today.checked_add_signed(window))
            .map_or(true, |horizon| self.expiration_date <= horizon)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::medicine::Entity",
        from = "Column::MedicineId",
        to = "super::medicine::Column::Id",
        on_delete = "Cascade"
    )]
    Medicine,
    #[sea_orm(
        belongs_to = "super::location::Entity",
        from = "Column::LocationId",
        to = "super::location::Column::Id",
        on_delete = "Cascade"
    )]
    Location,
}

impl Related<super::medicine::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Medicine.def()
    }
}

impl Related<super::location::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Location.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let mut active_model = self;
        let now = Utc::now();
        if insert {
            if let ActiveValue::NotSet = active_model.created_at {
                active_model.created_at = Set(now);
            }
        }
        active_model.updated_at = Set(now);
        Ok(active_model)
    }
}
