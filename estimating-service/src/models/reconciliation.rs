//! Payment reconciliation queue model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why an entry needs reconciling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationKind {
    /// The processor call timed out; whether money moved is unknown.
    AmbiguousAuthorization,
    /// The processor authorized the charge but recording it locally failed.
    UnrecordedPayment,
}

impl ReconciliationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationKind::AmbiguousAuthorization => "ambiguous_authorization",
            ReconciliationKind::UnrecordedPayment => "unrecorded_payment",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "unrecorded_payment" => ReconciliationKind::UnrecordedPayment,
            _ => ReconciliationKind::AmbiguousAuthorization,
        }
    }
}

/// Where an entry is in its resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationState {
    Pending,
    Recorded,
    NoCharge,
    NeedsRefund,
    /// Out of attempts with the processor outcome still unknown.
    Escalated,
}

impl ReconciliationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReconciliationState::Pending => "pending",
            ReconciliationState::Recorded => "recorded",
            ReconciliationState::NoCharge => "no_charge",
            ReconciliationState::NeedsRefund => "needs_refund",
            ReconciliationState::Escalated => "escalated",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "recorded" => ReconciliationState::Recorded,
            "no_charge" => ReconciliationState::NoCharge,
            "needs_refund" => ReconciliationState::NeedsRefund,
            "escalated" => ReconciliationState::Escalated,
            _ => ReconciliationState::Pending,
        }
    }
}

/// A payment the processor may have taken that is not (yet) on the invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationEntry {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub invoice_id: Uuid,
    pub kind: ReconciliationKind,
    pub state: ReconciliationState,
    pub amount: Decimal,
    pub idempotency_key: String,
    pub authorization_id: Option<String>,
    pub attempts: i32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReconciliationEntry {
    pub fn new(
        owner_id: Uuid,
        invoice_id: Uuid,
        kind: ReconciliationKind,
        amount: Decimal,
        idempotency_key: String,
        authorization_id: Option<String>,
        last_error: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            invoice_id,
            kind,
            state: ReconciliationState::Pending,
            amount,
            idempotency_key,
            authorization_id,
            attempts: 0,
            last_error,
            created_at: now,
            updated_at: now,
        }
    }
}
