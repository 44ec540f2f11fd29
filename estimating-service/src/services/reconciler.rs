//! Background settlement of payments whose outcome was not known at request
//! time.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use service_core::retry::Retryable;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::invoices::{InvoiceService, NewPayment};
use super::metrics::RECONCILIATIONS_TOTAL;
use super::payments::{AuthorizationOutcome, PaymentProcessor};
use super::store::{DocumentKey, ReconciliationStore};
use crate::error::DocumentError;
use crate::models::{ReconciliationEntry, ReconciliationKind, ReconciliationState};

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileSummary {
    pub examined: usize,
    pub recorded: usize,
    pub no_charge: usize,
    pub needs_refund: usize,
    pub escalated: usize,
    pub still_pending: usize,
}

#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ReconciliationStore>,
    invoices: InvoiceService,
    processor: Arc<dyn PaymentProcessor>,
    batch_size: usize,
    max_attempts: i32,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ReconciliationStore>,
        invoices: InvoiceService,
        processor: Arc<dyn PaymentProcessor>,
        batch_size: usize,
        max_attempts: i32,
    ) -> Self {
        Self {
            store,
            invoices,
            processor,
            batch_size,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Work through one batch of pending entries.
    pub async fn reconcile_pending(&self) -> Result<ReconcileSummary, DocumentError> {
        let pending = self.store.pending_reconciliations(self.batch_size).await?;
        let mut summary = ReconcileSummary::default();

        for mut entry in pending {
            summary.examined += 1;
            entry.attempts += 1;

            match entry.kind {
                ReconciliationKind::AmbiguousAuthorization => self.resolve_ambiguous(&mut entry).await,
                ReconciliationKind::UnrecordedPayment => self.record(&mut entry).await,
            }
            if entry.state == ReconciliationState::Pending && entry.attempts >= self.max_attempts {
                self.give_up(&mut entry);
            }
            entry.updated_at = Utc::now();

            match entry.state {
                ReconciliationState::Recorded => summary.recorded += 1,
                ReconciliationState::NoCharge => summary.no_charge += 1,
                ReconciliationState::NeedsRefund => summary.needs_refund += 1,
                ReconciliationState::Escalated => summary.escalated += 1,
                ReconciliationState::Pending => summary.still_pending += 1,
            }
            if entry.state != ReconciliationState::Pending {
                RECONCILIATIONS_TOTAL
                    .with_label_values(&[entry.kind.as_str(), entry.state.as_str()])
                    .inc();
            }

            if let Err(e) = self.store.update_reconciliation(&entry).await {
                error!(reconciliation_id = %entry.id, error = %e, "Failed to save reconciliation entry");
            }
        }

        if summary.examined > 0 {
            info!(
                examined = summary.examined,
                recorded = summary.recorded,
                no_charge = summary.no_charge,
                needs_refund = summary.needs_refund,
                escalated = summary.escalated,
                still_pending = summary.still_pending,
                "Reconciliation pass complete"
            );
        }
        Ok(summary)
    }

    async fn resolve_ambiguous(&self, entry: &mut ReconciliationEntry) {
        match self.processor.lookup(&entry.idempotency_key).await {
            Ok(Some(AuthorizationOutcome::Authorized { authorization_id })) => {
                entry.authorization_id = Some(authorization_id);
                self.record(entry).await;
            }
            Ok(Some(AuthorizationOutcome::Declined { reason })) => {
                entry.state = ReconciliationState::NoCharge;
                entry.last_error = Some(reason);
            }
            Ok(None) => {
                entry.state = ReconciliationState::NoCharge;
            }
            Err(e) => {
                warn!(reconciliation_id = %entry.id, error = %e, "Processor lookup failed");
                entry.last_error = Some(e.to_string());
            }
        }
    }

    async fn record(&self, entry: &mut ReconciliationEntry) {
        let Some(reference) = entry.authorization_id.clone() else {
            entry.state = ReconciliationState::NeedsRefund;
            entry.last_error = Some("Missing authorization id".to_string());
            return;
        };

        let payment = NewPayment {
            amount: entry.amount,
            note: Some("Online payment (reconciled)".to_string()),
            reference: Some(reference),
        };
        let key = DocumentKey::owned(entry.owner_id, entry.invoice_id);

        match self.invoices.add_payment(key, payment).await {
            Ok(_) => {
                entry.state = ReconciliationState::Recorded;
                entry.last_error = None;
            }
            Err(e) if !e.is_transient() => {
                error!(
                    reconciliation_id = %entry.id,
                    invoice_id = %entry.invoice_id,
                    amount = %entry.amount,
                    error = %e,
                    "Charged payment cannot be applied to its invoice; refund required"
                );
                entry.state = ReconciliationState::NeedsRefund;
                entry.last_error = Some(e.to_string());
            }
            Err(e) => {
                warn!(reconciliation_id = %entry.id, error = %e, "Recording reconciled payment failed");
                entry.last_error = Some(e.to_string());
            }
        }
    }

    /// Out of attempts. A charge the processor confirmed needs a refund; one
    /// whose outcome is still unknown goes to manual review.
    fn give_up(&self, entry: &mut ReconciliationEntry) {
        entry.state = if entry.authorization_id.is_some() {
            ReconciliationState::NeedsRefund
        } else {
            ReconciliationState::Escalated
        };
        error!(
            reconciliation_id = %entry.id,
            invoice_id = %entry.invoice_id,
            kind = entry.kind.as_str(),
            state = entry.state.as_str(),
            attempts = entry.attempts,
            last_error = entry.last_error.as_deref().unwrap_or(""),
            "Reconciliation attempts exhausted"
        );
    }

    /// Run a pass every `interval` until `shutdown` fires.
    pub fn spawn(self, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = interval.as_secs(), "Payment reconciler started");
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Payment reconciler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.reconcile_pending().await {
                            error!(error = %e, "Reconciliation pass failed");
                        }
                    }
                }
            }
        })
    }
}
