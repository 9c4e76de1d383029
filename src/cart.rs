use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::errors::ServiceError;

/// Raw cart entry as submitted by the storefront.
///
/// Intake is deliberately permissive: prices and quantities arrive as JSON
/// numbers or numeric strings depending on the client, and garbage values
/// degrade to "absent" rather than failing the whole request body.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RawCartItem {
    /// Catalog product reference; entries without one are dropped
    #[serde(default)]
    pub id: Option<Uuid>,

    /// Display name, used for the gateway item title
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default, deserialize_with = "lenient_decimal")]
    #[schema(value_type = Option<String>)]
    pub price: Option<Decimal>,

    #[serde(default, deserialize_with = "lenient_int")]
    #[schema(value_type = Option<i64>)]
    pub quantity: Option<i64>,
}

/// A validated, well-formed cart line ready for persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderLine {
    pub product_id: Uuid,
    pub name: Option<String>,
    /// Non-negative, exactly two fractional digits
    pub unit_price: Decimal,
    /// Always positive
    pub quantity: i32,
}

/// Accepts a JSON number or a numeric string; anything else becomes `None`.
fn lenient_decimal<'de, D>(deserializer: D) -> Result<Option<Decimal>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.to_string().parse().ok(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Accepts a JSON integer or an integer string; anything else becomes `None`.
fn lenient_int<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    })
}

/// Validates and coerces raw cart entries into order lines.
///
/// Entries missing an `id` are silently dropped. Prices are clamped to be
/// non-negative and rounded to two fractional digits, half away from zero
/// (so `10.005` becomes `10.01`). Quantities default to 1 when absent,
/// non-numeric, or non-positive.
///
/// Fails with a validation error when nothing usable remains, so every
/// persisted order is guaranteed at least one line.
pub fn normalize(items: &[RawCartItem]) -> Result<Vec<OrderLine>, ServiceError> {
    let lines: Vec<OrderLine> = items
        .iter()
        .filter_map(|item| {
            let product_id = item.id?;
            let unit_price = item
                .price
                .unwrap_or(Decimal::ZERO)
                .max(Decimal::ZERO)
                .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
            let quantity = match item.quantity {
                Some(q) if q > 0 => i32::try_from(q).unwrap_or(i32::MAX),
                _ => 1,
            };
            Some(OrderLine {
                product_id,
                name: item.name.clone(),
                unit_price,
                quantity,
            })
        })
        .collect();

    if lines.is_empty() {
        return Err(ServiceError::ValidationError("cart is empty".to_string()));
    }

    Ok(lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use serde_json::json;

    fn item(id: Option<Uuid>, price: &str, quantity: i64) -> RawCartItem {
        RawCartItem {
            id,
            name: None,
            price: price.parse().ok(),
            quantity: Some(quantity),
        }
    }

    #[test]
    fn empty_cart_is_rejected() {
        assert_matches!(normalize(&[]), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn entries_without_id_are_dropped() {
        let items = vec![item(None, "10.00", 1), item(Some(Uuid::new_v4()), "5.00", 2)];
        let lines = normalize(&items).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].quantity, 2);
    }

    #[test]
    fn cart_of_only_malformed_entries_is_rejected() {
        let items = vec![item(None, "10.00", 1), item(None, "5.00", 2)];
        assert_matches!(normalize(&items), Err(ServiceError::ValidationError(_)));
    }

    #[test]
    fn price_rounds_half_away_from_zero_to_two_digits() {
        let items = vec![item(Some(Uuid::new_v4()), "10.005", 2)];
        let lines = normalize(&items).unwrap();
        assert_eq!(lines[0].unit_price, dec!(10.01));
    }

    #[test]
    fn negative_price_clamps_to_zero() {
        let items = vec![item(Some(Uuid::new_v4()), "-3.50", 1)];
        let lines = normalize(&items).unwrap();
        assert_eq!(lines[0].unit_price, Decimal::ZERO);
    }

    #[test]
    fn missing_price_defaults_to_zero() {
        let items = vec![RawCartItem {
            id: Some(Uuid::new_v4()),
            name: None,
            price: None,
            quantity: Some(1),
        }];
        let lines = normalize(&items).unwrap();
        assert_eq!(lines[0].unit_price, Decimal::ZERO);
    }

    #[test]
    fn zero_or_negative_quantity_becomes_one() {
        for q in [0, -4] {
            let items = vec![item(Some(Uuid::new_v4()), "1.00", q)];
            assert_eq!(normalize(&items).unwrap()[0].quantity, 1);
        }
    }

    #[test]
    fn missing_quantity_becomes_one() {
        let items = vec![RawCartItem {
            id: Some(Uuid::new_v4()),
            name: None,
            price: Some(dec!(1.00)),
            quantity: None,
        }];
        assert_eq!(normalize(&items).unwrap()[0].quantity, 1);
    }

    #[test]
    fn lenient_intake_accepts_string_and_number_forms() {
        let id = Uuid::new_v4();
        let parsed: RawCartItem = serde_json::from_value(json!({
            "id": id,
            "price": "10.005",
            "quantity": "2"
        }))
        .unwrap();
        assert_eq!(parsed.price, Some(dec!(10.005)));
        assert_eq!(parsed.quantity, Some(2));

        let parsed: RawCartItem = serde_json::from_value(json!({
            "id": id,
            "price": 10.5,
            "quantity": 2
        }))
        .unwrap();
        assert_eq!(parsed.price, Some(dec!(10.5)));
        assert_eq!(parsed.quantity, Some(2));
    }

    #[test]
    fn lenient_intake_degrades_garbage_to_absent() {
        let parsed: RawCartItem = serde_json::from_value(json!({
            "id": Uuid::new_v4(),
            "price": "not-a-price",
            "quantity": {"nested": true}
        }))
        .unwrap();
        assert_eq!(parsed.price, None);
        assert_eq!(parsed.quantity, None);
    }
}
