use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue, Set};
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, DeriveActiveEnum, Serialize, Deserialize,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(16))")]
#[serde(rename_all = "lowercase")]
pub enum Formulation {
    #[sea_orm(string_value = "tablet")]
    Tablet,
    #[sea_orm(string_value = "syrup")]
    Syrup,
    #[sea_orm(string_value = "injection")]
    Injection,
    #[sea_orm(string_value = "ointment")]
    Ointment,
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "medicines")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub name: String,
    #[sea_orm(unique)]
    pub barcode: String,
    pub dosage: String,
    pub formulation: Formulation,
    #[sea_orm(column_type = "Decimal(Some((10, 2)))")]
    pub unit_price: Decimal,
    pub alert_threshold: i32,
    pub automatic_reorder: bool,
    pub reorder_quantity: Option<i32>,
    pub provider_id: Option<i64>,
    pub image_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Model {
    /// Strictly below the alert threshold; a medicine sitting exactly on
    /// its threshold is not low.
    pub fn is_low_stock(&self, total_quantity: i64) -> bool {
        total_quantity < i64::from(self.alert_threshold)
    }

    pub fn needs_reorder(&self, total_quantity: i64) -> bool {
        self.automatic_reorder && self.is_low_stock(total_quantity)
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::provider::Entity",
        from = "Column::ProviderId",
        to = "super::provider::Column::Id",
        on_delete = "SetNull"
    )]
    Provider,
    #[sea_orm(has_many = "super::batch::Entity")]
    Batches,
}

impl Related<super::provider::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Provider.def()
    }
}

impl Related<super::batch::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Batches.def()
    }
}

impl Related<super::location::Entity> for Entity {
    fn to() -> RelationDef {
        super::batch::Relation::Location.def()
    }

    fn via() -> Option<RelationDef> {
        Some(super::batch::Relation::Medicine.def().rev())
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
