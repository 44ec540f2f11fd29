//! Public token gateway.
//!
//! Everything a token holder can do goes through here. The token is the only
//! credential: no owner id is accepted, and the view types carry none back.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;
use service_core::retry::{retry_call, RetryConfig, Retryable};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::estimates::EstimateService;
use super::invoices::{check_payment_amount, InvoiceService, NewPayment};
use super::metrics::PAYMENT_OUTCOMES_TOTAL;
use super::payments::{
    idempotency_key, AuthorizationOutcome, AuthorizationRequest, PaymentProcessor,
};
use super::store::{DocumentKey, DocumentStore, ReconciliationStore};
use super::tokens::is_well_formed;
use crate::error::DocumentError;
use crate::models::{
    EstimateView, Invoice, InvoiceStatus, InvoiceView, ReconciliationEntry, ReconciliationKind,
    ReconciliationState, RejectEstimateInput, SignEstimateInput,
};

/// Body of `POST /view-invoice/{token}/pay`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PayInvoiceInput {
    pub amount: Decimal,
    /// Opaque to this service; forwarded to the processor.
    pub payment_method: serde_json::Value,
    /// Client-generated per payment attempt. Resubmitting the same nonce
    /// never charges twice.
    #[validate(length(min = 8, max = 200, message = "Nonce must be 8-200 characters"))]
    pub nonce: String,
}

#[derive(Debug, Clone)]
pub enum PaymentResult {
    Recorded(InvoiceView),
    /// The processor may have charged; the reconciler will settle it.
    Pending { reconciliation_id: Uuid },
}

/// Processor call limits for the public payment path.
#[derive(Debug, Clone)]
pub struct PaymentSettings {
    pub currency: String,
    pub timeout: Duration,
    pub retry: RetryConfig,
}

#[derive(Clone)]
pub struct PublicGateway {
    documents: Arc<dyn DocumentStore>,
    estimates: EstimateService,
    invoices: InvoiceService,
    processor: Arc<dyn PaymentProcessor>,
    reconciliations: Arc<dyn ReconciliationStore>,
    settings: PaymentSettings,
}

fn check_token(token: &str) -> Result<(), DocumentError> {
    if is_well_formed(token) {
        Ok(())
    } else {
        Err(DocumentError::NotFound("Document"))
    }
}

fn count_outcome(outcome: &str) {
    PAYMENT_OUTCOMES_TOTAL.with_label_values(&[outcome]).inc();
}

impl PublicGateway {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        estimates: EstimateService,
        invoices: InvoiceService,
        processor: Arc<dyn PaymentProcessor>,
        reconciliations: Arc<dyn ReconciliationStore>,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            documents,
            estimates,
            invoices,
            processor,
            reconciliations,
            settings,
        }
    }

    pub async fn fetch_estimate(&self, token: &str) -> Result<EstimateView, DocumentError> {
        check_token(token)?;
        let estimate = self.estimates.get_by_token(token).await?;
        Ok(EstimateView::from(&estimate))
    }

    pub async fn sign_estimate(
        &self,
        token: &str,
        input: SignEstimateInput,
    ) -> Result<EstimateView, DocumentError> {
        check_token(token)?;
        let estimate = self.estimates.sign(token, input).await?;
        Ok(EstimateView::from(&estimate))
    }

    pub async fn reject_estimate(
        &self,
        token: &str,
        input: RejectEstimateInput,
    ) -> Result<EstimateView, DocumentError> {
        check_token(token)?;
        let estimate = self.estimates.reject(token, input).await?;
        Ok(EstimateView::from(&estimate))
    }

    pub async fn fetch_invoice(&self, token: &str) -> Result<InvoiceView, DocumentError> {
        check_token(token)?;
        let invoice = self.documents.get_invoice(DocumentKey::Token(token)).await?;
        Ok(InvoiceView::from(&invoice))
    }

    /// Charge through the processor, then record the payment.
    ///
    /// A payment is only recorded against a processor authorization. When the
    /// processor's answer is unknown (timeout, transport failure after
    /// retries) or the authorized charge cannot be written, the attempt is
    /// queued for reconciliation and reported as pending.
    #[instrument(skip(self, token, input), fields(amount = %input.amount))]
    pub async fn pay_invoice(
        &self,
        token: &str,
        input: PayInvoiceInput,
    ) -> Result<PaymentResult, DocumentError> {
        check_token(token)?;
        input.validate()?;
        check_payment_amount(input.amount)?;

        let invoice = self.documents.get_invoice(DocumentKey::Token(token)).await?;
        if invoice.status == InvoiceStatus::Paid {
            return Err(DocumentError::conflict("Invoice is already paid"));
        }
        if input.amount > invoice.balance_due() {
            return Err(DocumentError::conflict("Payment exceeds balance due"));
        }

        let key = idempotency_key(invoice.id, input.amount, &input.nonce);
        let request = AuthorizationRequest {
            amount: input.amount,
            currency: self.settings.currency.clone(),
            payment_method: input.payment_method,
            description: format!("Invoice {}", invoice.invoice_number),
            idempotency_key: key.clone(),
        };

        let processor = self.processor.clone();
        let attempt = tokio::time::timeout(
            self.settings.timeout,
            retry_call(&self.settings.retry, "authorize_payment", || {
                let processor = processor.clone();
                let request = request.clone();
                async move { processor.authorize(&request).await }
            }),
        )
        .await;

        let authorization_id = match attempt {
            Ok(Ok(AuthorizationOutcome::Authorized { authorization_id })) => authorization_id,
            Ok(Ok(AuthorizationOutcome::Declined { reason })) => {
                count_outcome("declined");
                info!(invoice_id = %invoice.id, reason = %reason, "Payment declined");
                return Err(DocumentError::Declined(reason));
            }
            Ok(Err(e)) if !e.is_transient() => {
                count_outcome("rejected");
                warn!(invoice_id = %invoice.id, error = %e, "Processor rejected the request");
                return Err(DocumentError::Upstream(
                    "Payment processor rejected the request".to_string(),
                ));
            }
            Ok(Err(e)) => {
                return self
                    .defer(
                        &invoice,
                        ReconciliationKind::AmbiguousAuthorization,
                        ReconciliationState::Pending,
                        input.amount,
                        key,
                        None,
                        e.to_string(),
                    )
                    .await;
            }
            Err(_) => {
                return self
                    .defer(
                        &invoice,
                        ReconciliationKind::AmbiguousAuthorization,
                        ReconciliationState::Pending,
                        input.amount,
                        key,
                        None,
                        "Authorization timed out".to_string(),
                    )
                    .await;
            }
        };

        let payment = NewPayment {
            amount: input.amount,
            note: Some("Online payment".to_string()),
            reference: Some(authorization_id.clone()),
        };
        let recorded = retry_call(&self.settings.retry, "record_payment", || {
            self.invoices.add_payment(
                DocumentKey::owned(invoice.owner_id, invoice.id),
                payment.clone(),
            )
        })
        .await;

        match recorded {
            Ok((updated, _)) => {
                count_outcome("recorded");
                Ok(PaymentResult::Recorded(InvoiceView::from(&updated)))
            }
            Err(e) => {
                error!(
                    invoice_id = %invoice.id,
                    authorization_id = %authorization_id,
                    error = %e,
                    "Authorized payment could not be recorded"
                );
                // A charge the invoice can no longer accept goes straight to refund.
                let state = if matches!(e, DocumentError::Conflict(_)) {
                    ReconciliationState::NeedsRefund
                } else {
                    ReconciliationState::Pending
                };
                self.defer(
                    &invoice,
                    ReconciliationKind::UnrecordedPayment,
                    state,
                    input.amount,
                    key,
                    Some(authorization_id),
                    e.to_string(),
                )
                .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn defer(
        &self,
        invoice: &Invoice,
        kind: ReconciliationKind,
        state: ReconciliationState,
        amount: Decimal,
        key: String,
        authorization_id: Option<String>,
        reason: String,
    ) -> Result<PaymentResult, DocumentError> {
        let mut entry = ReconciliationEntry::new(
            invoice.owner_id,
            invoice.id,
            kind,
            amount,
            key,
            authorization_id,
            Some(reason),
        );
        entry.state = state;

        let entry = self.reconciliations.enqueue(entry).await?;
        count_outcome("pending");
        warn!(
            invoice_id = %invoice.id,
            reconciliation_id = %entry.id,
            kind = kind.as_str(),
            "Payment outcome deferred to reconciliation"
        );
        Ok(PaymentResult::Pending {
            reconciliation_id: entry.id,
        })
    }
}
