use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::cart::RawCartItem;
use crate::errors::ServiceError;
use crate::{ApiResponse, AppState};

/// Body for the gateway-backed placement operation.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PlaceGatewayOrderRequest {
    /// Authenticated caller placing the order
    pub customer_id: Uuid,
    pub items: Vec<RawCartItem>,
    pub total: Decimal,
}

/// Optional buyer contact details. Accepted for forward compatibility with
/// delivery flows; placement does not consume them.
#[derive(Debug, Deserialize, Serialize, ToSchema)]
pub struct BuyerInfo {
    pub name: Option<String>,
    pub address: Option<String>,
    pub phone: Option<String>,
}

/// Body for the direct placement operation.
#[derive(Debug, Deserialize, ToSchema)]
pub struct PlaceDirectOrderRequest {
    pub customer_id: Uuid,
    pub items: Vec<RawCartItem>,
    /// Recomputed from the lines when absent
    pub total: Option<Decimal>,
    pub payment_method: Option<String>,
    /// Transaction id the caller already holds, if payment happened upstream
    pub gateway_reference: Option<String>,
    pub buyer: Option<BuyerInfo>,
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", post(place_direct_order))
        .route("/orders/gateway", post(place_gateway_order))
        .route("/orders/:id", get(get_order))
}

/// POST /api/v1/orders/gateway
///
/// Persists the order and creates the payment request in one placement
/// protocol; responds 201 with the redirect target, 400 on an unusable cart,
/// 500 when persistence or the gateway failed (nothing persisted).
async fn place_gateway_order(
    State(state): State<AppState>,
    Json(req): Json<PlaceGatewayOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let placement = state
        .placement
        .place_gateway_order(req.customer_id, &req.items, req.total)
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(placement))))
}

/// POST /api/v1/orders
async fn place_direct_order(
    State(state): State<AppState>,
    Json(req): Json<PlaceDirectOrderRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let placement = state
        .placement
        .place_direct_order(
            req.customer_id,
            &req.items,
            req.total,
            req.payment_method.as_deref(),
            req.gateway_reference,
        )
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(placement))))
}

/// GET /api/v1/orders/{id}
async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .placement
        .get_order(order_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

    Ok(Json(ApiResponse::success(order)))
}
