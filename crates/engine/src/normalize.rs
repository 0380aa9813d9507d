//! Defensive normalization of heterogeneous venue response shapes.
//!
//! The external client's payloads have changed field names across versions
//! (`orderID` vs `order_id`, `filledSize` vs `matched_size`, decimal strings
//! vs numbers). Every known alias is mapped here, in one place, so the live
//! engine stays free of field-probing code and the tables are testable on
//! their own.

use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

use crate::types::{OrderBook, OrderStatus};

/// Known aliases for the order id field.
const ORDER_ID_KEYS: [&str; 4] = ["orderID", "orderId", "order_id", "id"];

/// Known aliases for the filled-quantity field.
const FILLED_SIZE_KEYS: [&str; 4] = ["filledSize", "filled_size", "matchedSize", "matched_size"];

/// Known aliases for the average fill price field.
const AVG_PRICE_KEYS: [&str; 4] = [
    "avgFillPrice",
    "avg_fill_price",
    "averageFillPrice",
    "average_fill_price",
];

/// Parses a decimal that may be encoded as a JSON string or number.
#[must_use]
pub fn parse_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::String(s) => Decimal::from_str(s.trim()).ok(),
        Value::Number(n) => Decimal::from_str(&n.to_string()).ok(),
        _ => None,
    }
}

/// Extracts an order id from any of the known alias fields.
#[must_use]
pub fn extract_order_id(response: &Value) -> Option<String> {
    let obj = response.as_object()?;
    ORDER_ID_KEYS
        .iter()
        .filter_map(|key| obj.get(*key))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
        .map(str::to_string)
}

/// Extracts an order status from the `status` field, if recognizable.
///
/// Unknown or missing values return `None`; callers keep their current
/// status rather than guessing.
#[must_use]
pub fn extract_status(response: &Value) -> Option<OrderStatus> {
    let status = response.get("status")?.as_str()?;
    match status.to_ascii_lowercase().as_str() {
        "open" | "live" => Some(OrderStatus::Open),
        "filled" | "matched" => Some(OrderStatus::Filled),
        "cancelled" | "canceled" => Some(OrderStatus::Cancelled),
        "rejected" => Some(OrderStatus::Rejected),
        _ => None,
    }
}

/// Extracts the filled quantity, defaulting to zero on missing/garbled data.
#[must_use]
pub fn extract_filled_size(response: &Value) -> Decimal {
    extract_first_decimal(response, &FILLED_SIZE_KEYS)
}

/// Extracts the average fill price, defaulting to zero on missing/garbled
/// data.
#[must_use]
pub fn extract_avg_fill_price(response: &Value) -> Decimal {
    extract_first_decimal(response, &AVG_PRICE_KEYS)
}

fn extract_first_decimal(response: &Value, keys: &[&str]) -> Decimal {
    let Some(obj) = response.as_object() else {
        return Decimal::ZERO;
    };
    keys.iter()
        .filter_map(|key| obj.get(*key))
        .filter_map(parse_decimal)
        .next()
        .unwrap_or(Decimal::ZERO)
}

/// Normalizes a raw book payload (`{bids: [{price, size}], asks: [...]}`,
/// decimal-string fields) into an [`OrderBook`].
///
/// Garbage levels are skipped; the constructor enforces sorting and drops
/// non-positive entries. A payload with no parseable sides yields an empty
/// book.
#[must_use]
pub fn book_from_value(payload: &Value) -> OrderBook {
    let bids = levels_from_value(payload.get("bids"));
    let asks = levels_from_value(payload.get("asks"));
    OrderBook::new(bids, asks)
}

fn levels_from_value(side: Option<&Value>) -> Vec<(Decimal, Decimal)> {
    let Some(Value::Array(levels)) = side else {
        return Vec::new();
    };
    levels
        .iter()
        .filter_map(|level| {
            let price = parse_decimal(level.get("price")?)?;
            let size = parse_decimal(level.get("size")?)?;
            Some((price, size))
        })
        .collect()
}
