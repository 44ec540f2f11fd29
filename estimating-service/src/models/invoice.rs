//! Invoice model for estimating-service.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::LineItem;

/// Invoice status. Always derived from `(amount_paid, total)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Unpaid,
    PartiallyPaid,
    Paid,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Unpaid => "unpaid",
            InvoiceStatus::PartiallyPaid => "partially_paid",
            InvoiceStatus::Paid => "paid",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "partially_paid" => InvoiceStatus::PartiallyPaid,
            "paid" => InvoiceStatus::Paid,
            _ => InvoiceStatus::Unpaid,
        }
    }

    /// The only way an invoice status is ever computed.
    pub fn derive(amount_paid: Decimal, total: Decimal) -> Self {
        if amount_paid <= Decimal::ZERO {
            InvoiceStatus::Unpaid
        } else if amount_paid < total {
            InvoiceStatus::PartiallyPaid
        } else {
            InvoiceStatus::Paid
        }
    }
}

/// A recorded payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentEntry {
    pub amount: Decimal,
    pub date: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Processor authorization id; makes re-recording the same charge a no-op.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,
}

/// Invoice document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub estimate_id: Option<Uuid>,
    pub invoice_number: String,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub project_name: String,
    pub line_items: Vec<LineItem>,
    pub tax_rate: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub payment_history: Vec<PaymentEntry>,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
    pub view_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl Invoice {
    /// Amount still owed.
    pub fn balance_due(&self) -> Decimal {
        (self.total - self.amount_paid).max(Decimal::ZERO)
    }

    /// Recompute `amount_paid` and `status` from the payment history.
    pub fn settle(&mut self) {
        self.amount_paid = self.payment_history.iter().map(|p| p.amount).sum();
        self.status = InvoiceStatus::derive(self.amount_paid, self.total);
    }
}

/// A sanitized, priced invoice ready to be inserted.
///
/// The store assigns `id`, `invoice_number`, `view_token` and timestamps.
#[derive(Debug, Clone)]
pub struct InvoiceDraft {
    pub owner_id: Uuid,
    pub estimate_id: Option<Uuid>,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub project_name: String,
    pub line_items: Vec<LineItem>,
    pub tax_rate: Decimal,
    pub total: Decimal,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

/// Input for creating a standalone invoice.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateInvoiceInput {
    #[validate(length(min = 1, max = 200, message = "Client name is required"))]
    pub client_name: String,
    #[validate(email(message = "Invalid client email"))]
    pub client_email: String,
    #[validate(length(max = 50, message = "Client phone is too long"))]
    #[serde(default)]
    pub client_phone: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Project name is required"))]
    pub project_name: String,
    #[serde(default)]
    pub line_items: serde_json::Value,
    #[serde(default)]
    pub tax_rate: Decimal,
    #[serde(default)]
    pub issue_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[validate(length(max = 5000, message = "Notes are too long"))]
    #[serde(default)]
    pub notes: Option<String>,
}

/// Input for converting an approved estimate into an invoice.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct ConvertEstimateInput {
    #[serde(default)]
    pub issue_date: Option<NaiveDate>,
    #[serde(default)]
    pub due_date: Option<NaiveDate>,
    #[validate(length(max = 5000, message = "Notes are too long"))]
    #[serde(default)]
    pub notes: Option<String>,
}

/// Input for updating an invoice. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateInvoiceInput {
    #[validate(length(min = 1, max = 200, message = "Client name cannot be empty"))]
    pub client_name: Option<String>,
    #[validate(email(message = "Invalid client email"))]
    pub client_email: Option<String>,
    #[validate(length(max = 50, message = "Client phone is too long"))]
    pub client_phone: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Project name cannot be empty"))]
    pub project_name: Option<String>,
    pub line_items: Option<serde_json::Value>,
    pub tax_rate: Option<Decimal>,
    pub due_date: Option<NaiveDate>,
    #[validate(length(max = 5000, message = "Notes are too long"))]
    pub notes: Option<String>,
}

/// Input for recording a payment.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RecordPaymentInput {
    pub amount: Decimal,
    #[validate(length(max = 500, message = "Note is too long"))]
    #[serde(default)]
    pub note: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Reference cannot be empty"))]
    #[serde(default)]
    pub reference: Option<String>,
}

/// What a token holder sees. Carries no owner or document identifiers.
#[derive(Debug, Clone, Serialize)]
pub struct InvoiceView {
    pub invoice_number: String,
    pub client_name: String,
    pub project_name: String,
    pub line_items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub total: Decimal,
    pub amount_paid: Decimal,
    pub balance_due: Decimal,
    pub status: InvoiceStatus,
    pub issue_date: NaiveDate,
    pub due_date: Option<NaiveDate>,
    pub notes: Option<String>,
}

impl From<&Invoice> for InvoiceView {
    fn from(invoice: &Invoice) -> Self {
        Self {
            invoice_number: invoice.invoice_number.clone(),
            client_name: invoice.client_name.clone(),
            project_name: invoice.project_name.clone(),
            line_items: invoice.line_items.clone(),
            // Stored documents were priced on write, so the sum fits.
            subtotal: super::subtotal(&invoice.line_items).unwrap_or(invoice.total),
            tax_rate: invoice.tax_rate,
            total: invoice.total,
            amount_paid: invoice.amount_paid,
            balance_due: invoice.balance_due(),
            status: invoice.status,
            issue_date: invoice.issue_date,
            due_date: invoice.due_date,
            notes: invoice.notes.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        s.parse().unwrap()
    }

    #[test]
    fn status_is_a_function_of_paid_and_total() {
        let total = dec("500");
        assert_eq!(InvoiceStatus::derive(dec("0"), total), InvoiceStatus::Unpaid);
        assert_eq!(
            InvoiceStatus::derive(dec("0.01"), total),
            InvoiceStatus::PartiallyPaid
        );
        assert_eq!(
            InvoiceStatus::derive(dec("499.99"), total),
            InvoiceStatus::PartiallyPaid
        );
        assert_eq!(InvoiceStatus::derive(dec("500"), total), InvoiceStatus::Paid);
        assert_eq!(InvoiceStatus::derive(dec("650"), total), InvoiceStatus::Paid);
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            InvoiceStatus::Unpaid,
            InvoiceStatus::PartiallyPaid,
            InvoiceStatus::Paid,
        ] {
            assert_eq!(InvoiceStatus::from_string(status.as_str()), status);
        }
    }
}
