//! Line item model and the pricing rules shared by estimates and invoices.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One priced row on an estimate or invoice.
///
/// Only the sanitizer constructs these; `total` is always `quantity * rate`
/// rounded to cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LineItem {
    pub id: Uuid,
    pub description: String,
    pub quantity: Decimal,
    pub rate: Decimal,
    pub total: Decimal,
}

/// Round a monetary amount to cents, half away from zero.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Sum of line totals. `None` when the sum does not fit in a `Decimal`.
pub fn subtotal(items: &[LineItem]) -> Option<Decimal> {
    items
        .iter()
        .try_fold(Decimal::ZERO, |acc, item| acc.checked_add(item.total))
        .map(round_money)
}

/// Document total: `subtotal * (1 + tax_rate / 100)`, rounded to cents.
pub fn total_with_tax(subtotal: Decimal, tax_rate: Decimal) -> Option<Decimal> {
    let multiplier = Decimal::ONE.checked_add(tax_rate.checked_div(Decimal::ONE_HUNDRED)?)?;
    subtotal.checked_mul(multiplier).map(round_money)
}
