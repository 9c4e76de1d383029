use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, DatabaseTransaction,
    DbErr, EntityTrait, QueryFilter, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::cart::{self, OrderLine, RawCartItem};
use crate::entities::order::{
    ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
};
use crate::entities::order_line::{
    self, ActiveModel as OrderLineActiveModel, Entity as OrderLineEntity,
    Model as OrderLineModel,
};
use crate::errors::ServiceError;
use crate::gateway::PaymentGateway;

/// Substring that marks a payment-method token as gateway-settled.
const GATEWAY_MARKER: &str = "gateway";

/// Fixed set of statuses an order can be placed with. Classified once per
/// placement from the payment-method token; nothing mutates it afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    CardPaid,
    CashPaid,
    GatewayPaid,
    Pending,
}

impl PaymentStatus {
    /// Case-insensitive classification of a payment-method token.
    pub fn classify(payment_method: &str) -> Self {
        let token = payment_method.trim().to_ascii_lowercase();
        match token.as_str() {
            "card" => Self::CardPaid,
            "cash" => Self::CashPaid,
            _ if token.contains(GATEWAY_MARKER) => Self::GatewayPaid,
            _ => Self::Pending,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CardPaid => "paid by card",
            Self::CashPaid => "paid in cash",
            Self::GatewayPaid => "paid via gateway",
            Self::Pending => "pending",
        }
    }
}

/// Short human-facing code for an order, derived from its id.
pub fn order_label(order_id: Uuid) -> String {
    let hex = order_id.simple().to_string();
    format!("OD-{}", hex[..8].to_ascii_uppercase())
}

/// Sum of `unit_price * quantity` over the lines, used when the direct path
/// is called without an explicit total.
pub fn compute_total(lines: &[OrderLine]) -> Decimal {
    lines
        .iter()
        .map(|line| line.unit_price * Decimal::from(line.quantity))
        .sum()
}

/// Result of a gateway-backed placement.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct GatewayPlacement {
    pub order_id: Uuid,
    pub gateway_request_id: String,
    pub redirect_url: String,
}

/// Result of a direct placement.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DirectPlacement {
    pub order_id: Uuid,
    pub order_label: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderLineResponse {
    pub product_id: Uuid,
    pub unit_price: Decimal,
    pub quantity: i32,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub customer_id: Uuid,
    pub placed_at: DateTime<Utc>,
    pub total: Decimal,
    pub status: String,
    pub gateway_reference: Option<String>,
    pub lines: Vec<OrderLineResponse>,
}

/// Row-level persistence for orders and their lines. Every write takes the
/// caller's transaction; the coordinator owns the scope's lifecycle.
struct OrderStore;

impl OrderStore {
    async fn insert_order(
        txn: &DatabaseTransaction,
        customer_id: Uuid,
        total: Decimal,
        status: PaymentStatus,
        gateway_reference: Option<String>,
    ) -> Result<OrderModel, DbErr> {
        let order = OrderActiveModel {
            id: Set(Uuid::new_v4()),
            customer_id: Set(customer_id),
            placed_at: Set(Utc::now()),
            total: Set(total),
            status: Set(status.as_str().to_string()),
            gateway_reference: Set(gateway_reference),
        };
        order.insert(txn).await
    }

    /// Inserts every line as its own awaited statement inside the scope.
    /// The first failure aborts the whole placement.
    async fn insert_lines(
        txn: &DatabaseTransaction,
        order_id: Uuid,
        lines: &[OrderLine],
    ) -> Result<(), DbErr> {
        for line in lines {
            let row = OrderLineActiveModel {
                order_id: Set(order_id),
                product_id: Set(line.product_id),
                unit_price: Set(line.unit_price),
                quantity: Set(line.quantity),
            };
            // plain INSERT; the composite key makes RETURNING-based insert
            // awkward and nothing here needs the row back
            OrderLineEntity::insert(row)
                .exec_without_returning(txn)
                .await?;
        }
        Ok(())
    }

    async fn set_gateway_reference(
        txn: &DatabaseTransaction,
        order: OrderModel,
        reference: String,
    ) -> Result<OrderModel, DbErr> {
        let mut active: OrderActiveModel = order.into();
        active.gateway_reference = Set(Some(reference));
        active.update(txn).await
    }

    async fn find_order<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<Option<OrderModel>, DbErr> {
        OrderEntity::find_by_id(order_id).one(conn).await
    }

    async fn find_lines<C: ConnectionTrait>(
        conn: &C,
        order_id: Uuid,
    ) -> Result<Vec<OrderLineModel>, DbErr> {
        OrderLineEntity::find()
            .filter(order_line::Column::OrderId.eq(order_id))
            .all(conn)
            .await
    }
}

/// The order-placement coordinator.
///
/// Reconciles the ACID local write with the non-idempotent remote payment
/// call: on the gateway path the transaction stays open across the round
/// trip and commits only once the payment request exists, so no order row
/// ever survives an unconfirmed payment request. The direct path has no such
/// hazard and commits eagerly.
#[derive(Clone)]
pub struct OrderPlacementService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn PaymentGateway>,
}

impl OrderPlacementService {
    pub fn new(db: Arc<DatabaseConnection>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { db, gateway }
    }

    /// Places an order whose payment happens through the external gateway.
    ///
    /// Protocol: validate -> begin -> insert header (status "paid via
    /// gateway", no reference yet) -> insert lines -> create the payment
    /// request -> commit, or roll everything back on any failure. The
    /// gateway is never invoked when persistence already failed.
    #[instrument(skip(self, items), fields(customer_id = %customer_id))]
    pub async fn place_gateway_order(
        &self,
        customer_id: Uuid,
        items: &[RawCartItem],
        total: Decimal,
    ) -> Result<GatewayPlacement, ServiceError> {
        // Validation happens before any resource is acquired.
        let lines = cart::normalize(items)?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to open placement transaction");
            ServiceError::DatabaseError(e)
        })?;

        let placed = async {
            let order = OrderStore::insert_order(
                &txn,
                customer_id,
                total,
                PaymentStatus::GatewayPaid,
                None,
            )
            .await?;
            OrderStore::insert_lines(&txn, order.id, &lines).await?;
            Ok::<OrderModel, DbErr>(order)
        }
        .await;

        let order = match placed {
            Ok(order) => order,
            Err(e) => {
                error!(error = %e, "persistence failed before gateway call");
                Self::rollback(txn).await;
                return Err(ServiceError::DatabaseError(e));
            }
        };

        // The scope stays open across this round trip; the gateway client's
        // timeout bounds how long the pooled connection can be pinned.
        let request = match self
            .gateway
            .create_payment_request(&lines, &order.id.to_string())
            .await
        {
            Ok(request) => request,
            Err(e) => {
                warn!(order_id = %order.id, error = %e, "payment request failed, rolling back");
                Self::rollback(txn).await;
                return Err(e.into());
            }
        };

        let order = OrderStore::set_gateway_reference(&txn, order, request.id.clone())
            .await
            .map_err(|e| {
                error!(error = %e, "failed to record gateway reference");
                ServiceError::DatabaseError(e)
            })?;

        txn.commit().await.map_err(|e| {
            error!(order_id = %order.id, error = %e, "failed to commit placement");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order.id, gateway_request_id = %request.id, "gateway order placed");

        Ok(GatewayPlacement {
            order_id: order.id,
            gateway_request_id: request.id,
            redirect_url: request.redirect_url,
        })
    }

    /// Places an order settled outside the gateway (cash, card, or a
    /// reference the caller already holds). Commits as soon as the rows are
    /// written; no external call is awaited inside the scope.
    #[instrument(skip(self, items), fields(customer_id = %customer_id))]
    pub async fn place_direct_order(
        &self,
        customer_id: Uuid,
        items: &[RawCartItem],
        total: Option<Decimal>,
        payment_method: Option<&str>,
        gateway_reference: Option<String>,
    ) -> Result<DirectPlacement, ServiceError> {
        let lines = cart::normalize(items)?;
        let status = PaymentStatus::classify(payment_method.unwrap_or(""));
        let total = total.unwrap_or_else(|| compute_total(&lines));

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to open placement transaction");
            ServiceError::DatabaseError(e)
        })?;

        let placed = async {
            let order =
                OrderStore::insert_order(&txn, customer_id, total, status, gateway_reference)
                    .await?;
            OrderStore::insert_lines(&txn, order.id, &lines).await?;
            Ok::<Uuid, DbErr>(order.id)
        }
        .await;

        let order_id = match placed {
            Ok(id) => id,
            Err(e) => {
                error!(error = %e, "persistence failed, rolling back");
                Self::rollback(txn).await;
                return Err(ServiceError::DatabaseError(e));
            }
        };

        txn.commit().await.map_err(|e| {
            error!(order_id = %order_id, error = %e, "failed to commit placement");
            ServiceError::DatabaseError(e)
        })?;

        info!(order_id = %order_id, status = status.as_str(), "direct order placed");

        Ok(DirectPlacement {
            order_id,
            order_label: order_label(order_id),
        })
    }

    /// Fetches an order header with its lines.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderResponse>, ServiceError> {
        let db = &*self.db;

        let Some(order) = OrderStore::find_order(db, order_id).await? else {
            return Ok(None);
        };
        let lines = OrderStore::find_lines(db, order_id).await?;

        Ok(Some(OrderResponse {
            id: order.id,
            customer_id: order.customer_id,
            placed_at: order.placed_at,
            total: order.total,
            status: order.status,
            gateway_reference: order.gateway_reference,
            lines: lines
                .into_iter()
                .map(|line| OrderLineResponse {
                    product_id: line.product_id,
                    unit_price: line.unit_price,
                    quantity: line.quantity,
                })
                .collect(),
        }))
    }

    /// Discards the scope. A failed rollback leaves nothing committed (the
    /// connection is torn down), so it is logged rather than propagated over
    /// the originating error.
    async fn rollback(txn: DatabaseTransaction) {
        if let Err(e) = txn.rollback().await {
            error!(error = %e, "rollback failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use test_case::test_case;

    #[test_case("card", PaymentStatus::CardPaid ; "card token")]
    #[test_case("CARD", PaymentStatus::CardPaid ; "card is case insensitive")]
    #[test_case("cash", PaymentStatus::CashPaid ; "cash token")]
    #[test_case("CASH", PaymentStatus::CashPaid ; "cash is case insensitive")]
    #[test_case("gateway", PaymentStatus::GatewayPaid ; "bare marker")]
    #[test_case("PayGateway-Checkout", PaymentStatus::GatewayPaid ; "marker inside token")]
    #[test_case("wire", PaymentStatus::Pending ; "unknown token")]
    #[test_case("", PaymentStatus::Pending ; "empty token")]
    fn classification_is_pure_and_case_insensitive(token: &str, expected: PaymentStatus) {
        assert_eq!(PaymentStatus::classify(token), expected);
    }

    #[test]
    fn status_labels_are_fixed() {
        assert_eq!(PaymentStatus::CardPaid.as_str(), "paid by card");
        assert_eq!(PaymentStatus::CashPaid.as_str(), "paid in cash");
        assert_eq!(PaymentStatus::GatewayPaid.as_str(), "paid via gateway");
        assert_eq!(PaymentStatus::Pending.as_str(), "pending");
    }

    #[test]
    fn order_label_is_short_and_stable() {
        let id = Uuid::parse_str("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(order_label(id), "OD-550E8400");
        assert_eq!(order_label(id), order_label(id));
    }

    #[test]
    fn total_is_recomputed_from_lines() {
        let lines = vec![
            OrderLine {
                product_id: Uuid::new_v4(),
                name: None,
                unit_price: dec!(10.01),
                quantity: 2,
            },
            OrderLine {
                product_id: Uuid::new_v4(),
                name: None,
                unit_price: dec!(0.99),
                quantity: 1,
            },
        ];
        assert_eq!(compute_total(&lines), dec!(21.01));
    }
}
