use async_trait::async_trait;
use reqwest::Client;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument};

use crate::cart::OrderLine;
use crate::config::GatewayConfig;
use crate::errors::ServiceError;

/// Smallest unit price the provider accepts; non-positive prices floor here.
const MIN_UNIT_PRICE: Decimal = dec!(0.01);

/// Handle returned by a successful payment-request creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentRequest {
    /// Provider-assigned request/preference id
    pub id: String,
    /// Where to send the buyer to complete payment
    pub redirect_url: String,
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("gateway transport failure: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("gateway rejected the payment request: {0}")]
    Rejected(String),
}

impl From<GatewayError> for ServiceError {
    fn from(err: GatewayError) -> Self {
        ServiceError::GatewayError(err.to_string())
    }
}

/// Narrow seam onto the external payment provider: one round trip that either
/// yields a redirect handle or fails. No retries at this layer.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a payment request for the given lines. `external_reference`
    /// is the caller-assigned string (the local order id) that correlates
    /// the provider's record with ours.
    async fn create_payment_request(
        &self,
        lines: &[OrderLine],
        external_reference: &str,
    ) -> Result<PaymentRequest, GatewayError>;
}

#[derive(Debug, Serialize)]
struct GatewayItem {
    title: String,
    quantity: i32,
    unit_price: Decimal,
}

#[derive(Debug, Serialize)]
struct BackUrls {
    success: String,
    failure: String,
    pending: String,
}

#[derive(Debug, Serialize)]
struct CreateRequestBody {
    items: Vec<GatewayItem>,
    currency_id: String,
    external_reference: String,
    back_urls: BackUrls,
    auto_return: String,
}

#[derive(Debug, Deserialize)]
struct CreateRequestResponse {
    id: String,
    #[serde(default, alias = "init_point")]
    redirect_url: Option<String>,
    #[serde(default, alias = "sandbox_init_point")]
    sandbox_redirect_url: Option<String>,
}

/// Maps order lines onto the provider's item shape. The provider rejects
/// non-positive amounts, so prices floor to the minimal positive unit and
/// quantities floor to 1.
fn gateway_items(lines: &[OrderLine]) -> Vec<GatewayItem> {
    lines
        .iter()
        .map(|line| GatewayItem {
            title: line
                .name
                .clone()
                .unwrap_or_else(|| format!("Product {}", line.product_id)),
            quantity: line.quantity.max(1),
            unit_price: line.unit_price.max(MIN_UNIT_PRICE),
        })
        .collect()
}

/// reqwest-backed gateway client. The request timeout is the configured
/// `gateway.timeout_secs`; the placement transaction is pinned for at most
/// that long when the provider stalls.
pub struct HttpPaymentGateway {
    client: Client,
    config: GatewayConfig,
}

impl HttpPaymentGateway {
    pub fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self::with_client(config, client))
    }

    /// Build from an existing client (useful for testing).
    pub fn with_client(config: GatewayConfig, client: Client) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, lines), fields(external_reference = %external_reference))]
    async fn create_payment_request(
        &self,
        lines: &[OrderLine],
        external_reference: &str,
    ) -> Result<PaymentRequest, GatewayError> {
        let body = CreateRequestBody {
            items: gateway_items(lines),
            currency_id: self.config.currency.clone(),
            external_reference: external_reference.to_string(),
            back_urls: BackUrls {
                success: self.config.success_url.clone(),
                failure: self.config.failure_url.clone(),
                pending: self.config.pending_url.clone(),
            },
            auto_return: "approved".to_string(),
        };

        debug!(items = body.items.len(), "creating payment request");

        let response = self
            .client
            .post(format!("{}/checkout/preferences", self.config.base_url))
            .bearer_auth(&self.config.access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            error!(%status, "payment request rejected");
            return Err(GatewayError::Rejected(format!("HTTP {status}: {detail}")));
        }

        let parsed: CreateRequestResponse = response.json().await?;
        let redirect_url = parsed
            .redirect_url
            .or(parsed.sandbox_redirect_url)
            .ok_or_else(|| {
                GatewayError::Rejected("response carried no redirect URL".to_string())
            })?;

        Ok(PaymentRequest {
            id: parsed.id,
            redirect_url,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn line(price: Decimal, quantity: i32) -> OrderLine {
        OrderLine {
            product_id: Uuid::new_v4(),
            name: None,
            unit_price: price,
            quantity,
        }
    }

    #[test]
    fn non_positive_price_floors_to_minimal_unit() {
        let items = gateway_items(&[line(Decimal::ZERO, 1), line(dec!(-2.00), 1)]);
        assert_eq!(items[0].unit_price, MIN_UNIT_PRICE);
        assert_eq!(items[1].unit_price, MIN_UNIT_PRICE);
    }

    #[test]
    fn positive_price_passes_through() {
        let items = gateway_items(&[line(dec!(10.01), 2)]);
        assert_eq!(items[0].unit_price, dec!(10.01));
        assert_eq!(items[0].quantity, 2);
    }

    #[test]
    fn quantity_floors_to_one() {
        let items = gateway_items(&[line(dec!(1.00), 0)]);
        assert_eq!(items[0].quantity, 1);
    }

    #[test]
    fn title_falls_back_to_product_reference() {
        let mut named = line(dec!(1.00), 1);
        named.name = Some("Empanadas".to_string());
        let unnamed = line(dec!(2.00), 1);
        let fallback = format!("Product {}", unnamed.product_id);

        let items = gateway_items(&[named, unnamed]);
        assert_eq!(items[0].title, "Empanadas");
        assert_eq!(items[1].title, fallback);
    }

    #[test]
    fn redirect_url_prefers_primary_over_sandbox() {
        let parsed: CreateRequestResponse = serde_json::from_value(serde_json::json!({
            "id": "pref-1",
            "init_point": "https://pay.example/p/1",
            "sandbox_init_point": "https://sandbox.example/p/1"
        }))
        .unwrap();
        assert_eq!(
            parsed.redirect_url.or(parsed.sandbox_redirect_url),
            Some("https://pay.example/p/1".to_string())
        );
    }
}
