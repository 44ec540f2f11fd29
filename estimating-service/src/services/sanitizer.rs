//! Line-item sanitizer.
//!
//! Turns whatever the client tier sent as `line_items` into canonical
//! [`LineItem`]s. Caller-supplied totals are ignored; item ids are kept only
//! when they are valid UUIDs and otherwise derived from the item content so
//! the output is a pure function of the input.

use std::str::FromStr;

use rust_decimal::Decimal;
use serde_json::Value;
use uuid::Uuid;

use crate::error::DocumentError;
use crate::models::{round_money, subtotal, total_with_tax, LineItem};

/// Exclusive upper bound on a document's total or deposit. Matches the
/// `NUMERIC(14, 2)` money columns.
const MAX_DOCUMENT_TOTAL: i64 = 1_000_000_000_000;

const LINE_ITEM_NAMESPACE: Uuid = Uuid::from_u128(0x6c1d_02a4_9b3e_4f57_a0c2_51e8_7d90_b3f1);

/// Normalize raw line items.
///
/// Accepts an array, a JSON-encoded string of an array, or null. Any other
/// shape yields an empty list.
pub fn sanitize(raw: &Value) -> Result<Vec<LineItem>, DocumentError> {
    let items = match raw {
        Value::Array(items) => sanitize_array(items),
        Value::String(encoded) => match serde_json::from_str::<Value>(encoded) {
            Ok(Value::Array(items)) => sanitize_array(&items),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };

    verify_round_trip(&items)?;
    Ok(items)
}

/// Tax rate is a percentage in `0..=100`.
pub fn normalize_tax_rate(rate: Decimal) -> Result<Decimal, DocumentError> {
    if rate < Decimal::ZERO || rate > Decimal::ONE_HUNDRED {
        return Err(DocumentError::validation(
            "Tax rate must be between 0 and 100",
        ));
    }
    Ok(rate.normalize())
}

/// Total for sanitized `items` at `tax_rate`. Oversized documents are rejected
/// so later sums (payments, dashboard values) stay representable.
pub fn price(items: &[LineItem], tax_rate: Decimal) -> Result<Decimal, DocumentError> {
    subtotal(items)
        .and_then(|subtotal| total_with_tax(subtotal, tax_rate))
        .filter(|total| *total < Decimal::from(MAX_DOCUMENT_TOTAL))
        .ok_or_else(|| {
            DocumentError::validation(format!(
                "Document total must be below {}",
                MAX_DOCUMENT_TOTAL
            ))
        })
}

pub fn normalize_deposit(deposit: Decimal) -> Result<Decimal, DocumentError> {
    if deposit < Decimal::ZERO {
        return Err(DocumentError::validation("Deposit cannot be negative"));
    }
    let deposit = round_money(deposit);
    if deposit >= Decimal::from(MAX_DOCUMENT_TOTAL) {
        return Err(DocumentError::validation(format!(
            "Deposit must be below {}",
            MAX_DOCUMENT_TOTAL
        )));
    }
    Ok(deposit)
}

fn sanitize_array(items: &[Value]) -> Vec<LineItem> {
    items
        .iter()
        .enumerate()
        .filter_map(|(index, item)| sanitize_item(index, item))
        .collect()
}

fn sanitize_item(index: usize, item: &Value) -> Option<LineItem> {
    let fields = item.as_object()?;

    let description = fields
        .get("description")
        .map(coerce_text)
        .unwrap_or_default();
    let quantity = fields.get("quantity").map(coerce_number).unwrap_or_default();
    let rate = fields.get("rate").map(coerce_number).unwrap_or_default();

    if description.is_empty() || quantity <= Decimal::ZERO || rate < Decimal::ZERO {
        return None;
    }

    let total = round_money(quantity.checked_mul(rate)?);

    let id = fields
        .get("id")
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .unwrap_or_else(|| {
            let seed = format!("{}|{}|{}|{}", index, description, quantity, rate);
            Uuid::new_v5(&LINE_ITEM_NAMESPACE, seed.as_bytes())
        });

    Some(LineItem {
        id,
        description,
        quantity,
        rate,
        total,
    })
}

fn coerce_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => String::new(),
    }
}

/// Missing or unparseable numbers become zero.
fn coerce_number(value: &Value) -> Decimal {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return Decimal::ZERO,
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .unwrap_or(Decimal::ZERO)
}

fn verify_round_trip(items: &[LineItem]) -> Result<(), DocumentError> {
    let encoded =
        serde_json::to_value(items).map_err(|e| DocumentError::Integrity(e.to_string()))?;
    let decoded: Vec<LineItem> =
        serde_json::from_value(encoded).map_err(|e| DocumentError::Integrity(e.to_string()))?;

    if decoded != items {
        return Err(DocumentError::Integrity(
            "line items changed across serialization".to_string(),
        ));
    }
    Ok(())
}
