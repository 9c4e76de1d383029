use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Order header: one row per placed order. The row is written exactly once
/// during placement and never mutated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Owning customer, threaded in from the authenticated caller
    pub customer_id: Uuid,

    /// Server-assigned insertion timestamp
    pub placed_at: DateTime<Utc>,

    pub total: Decimal,

    /// Rendered from the fixed payment-status enumeration
    pub status: String,

    /// External payment-request id; NULL until a gateway interaction succeeds
    pub gateway_reference: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_line::Entity")]
    OrderLine,
}

impl Related<super::order_line::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderLine.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
