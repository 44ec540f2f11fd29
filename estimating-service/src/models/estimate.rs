//! Estimate model for estimating-service.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use super::LineItem;

/// Estimate status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateStatus {
    Draft,
    Sent,
    Approved,
    Rejected,
}

impl EstimateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EstimateStatus::Draft => "draft",
            EstimateStatus::Sent => "sent",
            EstimateStatus::Approved => "approved",
            EstimateStatus::Rejected => "rejected",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "sent" => EstimateStatus::Sent,
            "approved" => EstimateStatus::Approved,
            "rejected" => EstimateStatus::Rejected,
            _ => EstimateStatus::Draft,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, EstimateStatus::Approved | EstimateStatus::Rejected)
    }
}

/// Estimate document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Estimate {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub project_name: String,
    pub line_items: Vec<LineItem>,
    pub tax_rate: Decimal,
    pub deposit: Decimal,
    pub total: Decimal,
    pub status: EstimateStatus,
    pub view_token: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub signed_by_name: Option<String>,
    pub signed_by_email: Option<String>,
    pub signature_ref: Option<String>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
}

/// A sanitized, priced estimate ready to be inserted.
///
/// The store assigns `id`, `view_token` and timestamps.
#[derive(Debug, Clone)]
pub struct EstimateDraft {
    pub owner_id: Uuid,
    pub client_name: String,
    pub client_email: Option<String>,
    pub client_phone: Option<String>,
    pub project_name: String,
    pub line_items: Vec<LineItem>,
    pub tax_rate: Decimal,
    pub deposit: Decimal,
    pub total: Decimal,
}

/// Input for creating an estimate.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateEstimateInput {
    #[validate(length(min = 1, max = 200, message = "Client name is required"))]
    pub client_name: String,
    #[validate(email(message = "Invalid client email"))]
    #[serde(default)]
    pub client_email: Option<String>,
    #[validate(length(max = 50, message = "Client phone is too long"))]
    #[serde(default)]
    pub client_phone: Option<String>,
    #[validate(length(min = 1, max = 200, message = "Project name is required"))]
    pub project_name: String,
    /// Raw line items; normalized by the sanitizer.
    #[serde(default)]
    pub line_items: serde_json::Value,
    #[serde(default)]
    pub tax_rate: Decimal,
    #[serde(default)]
    pub deposit: Decimal,
}

/// Input for updating an estimate. Absent fields are left untouched.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateEstimateInput {
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
    pub deposit: Option<Decimal>,
}

/// Signature submitted by the client through the public view.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct SignEstimateInput {
    #[validate(length(min = 1, max = 200, message = "Signer name is required"))]
    pub signer_name: String,
    #[validate(email(message = "Invalid signer email"))]
    pub signer_email: String,
    /// Signature artifact (data URL or storage reference).
    #[validate(length(min = 1, max = 500000, message = "Signature is required"))]
    pub signature: String,
}

/// Rejection submitted by the client through the public view.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct RejectEstimateInput {
    #[validate(length(max = 2000, message = "Reason is too long"))]
    pub reason: Option<String>,
}

/// What a token holder sees. Carries no owner or document identifiers.
#[derive(Debug, Clone, Serialize)]
pub struct EstimateView {
    pub client_name: String,
    pub client_email: Option<String>,
    pub project_name: String,
    pub line_items: Vec<LineItem>,
    pub subtotal: Decimal,
    pub tax_rate: Decimal,
    pub deposit: Decimal,
    pub total: Decimal,
    pub status: EstimateStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub signed_at: Option<DateTime<Utc>>,
    pub signed_by_name: Option<String>,
}

impl From<&Estimate> for EstimateView {
    fn from(estimate: &Estimate) -> Self {
        Self {
            client_name: estimate.client_name.clone(),
            client_email: estimate.client_email.clone(),
            project_name: estimate.project_name.clone(),
            line_items: estimate.line_items.clone(),
            // Stored documents were priced on write, so the sum fits.
            subtotal: super::subtotal(&estimate.line_items).unwrap_or(estimate.total),
            tax_rate: estimate.tax_rate,
            deposit: estimate.deposit,
            total: estimate.total,
            status: estimate.status,
            sent_at: estimate.sent_at,
            signed_at: estimate.signed_at,
            signed_by_name: estimate.signed_by_name.clone(),
        }
    }
}
