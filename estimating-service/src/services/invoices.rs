//! Invoice lifecycle. Status is always derived from the payment history.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::metrics::{record_invoice_event, PAYMENT_AMOUNT_TOTAL};
use super::notifications::{NotificationService, Template};
use super::sanitizer::{normalize_tax_rate, price, sanitize};
use super::store::{Change, DocumentKey, DocumentStore};
use crate::error::DocumentError;
use crate::models::{
    round_money, ConvertEstimateInput, CreateInvoiceInput, EstimateStatus, Invoice, InvoiceDraft,
    InvoiceStatus, PaymentEntry, RecordPaymentInput, UpdateInvoiceInput,
};

/// A payment about to be appended to an invoice.
#[derive(Debug, Clone)]
pub struct NewPayment {
    pub amount: Decimal,
    pub note: Option<String>,
    /// Processor authorization id, when the charge came through one.
    pub reference: Option<String>,
}

/// A payment amount must be positive and in whole cents.
pub(crate) fn check_payment_amount(amount: Decimal) -> Result<(), DocumentError> {
    if amount <= Decimal::ZERO {
        return Err(DocumentError::validation("Payment amount must be positive"));
    }
    if round_money(amount) != amount {
        return Err(DocumentError::validation(
            "Payment amount cannot have fractional cents",
        ));
    }
    Ok(())
}

impl NewPayment {
    fn validated(self) -> Result<Self, DocumentError> {
        check_payment_amount(self.amount)?;
        Ok(self)
    }
}

/// Append `payment` to `invoice`, enforcing the balance.
///
/// A repeated `reference` with the same amount is a no-op.
fn apply_payment(invoice: &mut Invoice, payment: NewPayment) -> Result<Change, DocumentError> {
    if let Some(reference) = payment.reference.as_deref() {
        let existing = invoice
            .payment_history
            .iter()
            .find(|entry| entry.reference.as_deref() == Some(reference));
        if let Some(existing) = existing {
            return if existing.amount == payment.amount {
                Ok(Change::Unchanged)
            } else {
                Err(DocumentError::conflict(
                    "Payment reference already recorded with a different amount",
                ))
            };
        }
    }

    if invoice.status == InvoiceStatus::Paid {
        return Err(DocumentError::conflict("Invoice is already paid"));
    }
    let balance = invoice.balance_due();
    if payment.amount > balance {
        return Err(DocumentError::conflict(format!(
            "Payment of {} exceeds balance due of {}",
            payment.amount, balance
        )));
    }

    invoice.payment_history.push(PaymentEntry {
        amount: payment.amount,
        date: Utc::now(),
        note: payment.note,
        reference: payment.reference,
    });
    invoice.settle();
    Ok(Change::Changed)
}

fn check_dates(issue_date: NaiveDate, due_date: Option<NaiveDate>) -> Result<(), DocumentError> {
    match due_date {
        Some(due) if due < issue_date => Err(DocumentError::validation(
            "Due date cannot be before the issue date",
        )),
        _ => Ok(()),
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[derive(Clone)]
pub struct InvoiceService {
    store: Arc<dyn DocumentStore>,
    notifications: NotificationService,
    currency: String,
}

impl InvoiceService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        notifications: NotificationService,
        currency: String,
    ) -> Self {
        Self {
            store,
            notifications,
            currency,
        }
    }

    /// Standalone invoice, not tied to an estimate.
    #[instrument(skip(self, input), fields(owner_id = %owner_id))]
    pub async fn create(
        &self,
        owner_id: Uuid,
        input: CreateInvoiceInput,
    ) -> Result<Invoice, DocumentError> {
        input.validate()?;

        let line_items = sanitize(&input.line_items)?;
        if line_items.is_empty() {
            return Err(DocumentError::EmptyDocument);
        }
        let tax_rate = normalize_tax_rate(input.tax_rate)?;
        let issue_date = input.issue_date.unwrap_or_else(|| Utc::now().date_naive());
        check_dates(issue_date, input.due_date)?;
        let total = price(&line_items, tax_rate)?;

        let invoice = self
            .store
            .insert_invoice(InvoiceDraft {
                owner_id,
                estimate_id: None,
                client_name: input.client_name.trim().to_string(),
                client_email: Some(input.client_email.trim().to_string()),
                client_phone: trimmed(input.client_phone),
                project_name: input.project_name.trim().to_string(),
                total,
                line_items,
                tax_rate,
                issue_date,
                due_date: input.due_date,
                notes: trimmed(input.notes),
            })
            .await?;

        record_invoice_event("created");
        info!(invoice_id = %invoice.id, number = %invoice.invoice_number, "Invoice created");
        Ok(invoice)
    }

    /// Snapshot an approved estimate into a new invoice.
    ///
    /// The invoice keeps its own copy of the line items; later changes to the
    /// estimate (including deletion) do not affect it.
    #[instrument(skip(self, input), fields(owner_id = %owner_id, estimate_id = %estimate_id))]
    pub async fn convert(
        &self,
        owner_id: Uuid,
        estimate_id: Uuid,
        input: ConvertEstimateInput,
    ) -> Result<Invoice, DocumentError> {
        input.validate()?;

        let estimate = self
            .store
            .get_estimate(DocumentKey::owned(owner_id, estimate_id))
            .await?;
        if estimate.status != EstimateStatus::Approved {
            return Err(DocumentError::conflict(
                "Only approved estimates can be converted to invoices",
            ));
        }

        let issue_date = input.issue_date.unwrap_or_else(|| Utc::now().date_naive());
        check_dates(issue_date, input.due_date)?;

        let invoice = self
            .store
            .insert_invoice(InvoiceDraft {
                owner_id,
                estimate_id: Some(estimate.id),
                client_name: estimate.client_name,
                client_email: estimate.client_email,
                client_phone: estimate.client_phone,
                project_name: estimate.project_name,
                line_items: estimate.line_items,
                tax_rate: estimate.tax_rate,
                total: estimate.total,
                issue_date,
                due_date: input.due_date,
                notes: trimmed(input.notes),
            })
            .await?;

        record_invoice_event("converted");
        info!(invoice_id = %invoice.id, number = %invoice.invoice_number, "Estimate converted to invoice");
        Ok(invoice)
    }

    pub async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Invoice, DocumentError> {
        self.store.get_invoice(DocumentKey::owned(owner_id, id)).await
    }

    pub async fn list(&self, owner_id: Uuid) -> Result<Vec<Invoice>, DocumentError> {
        self.store.list_invoices(owner_id).await
    }

    /// Owner edit. Pricing is frozen once any payment is recorded.
    #[instrument(skip(self, input), fields(owner_id = %owner_id, invoice_id = %id))]
    pub async fn update(
        &self,
        owner_id: Uuid,
        id: Uuid,
        input: UpdateInvoiceInput,
    ) -> Result<Invoice, DocumentError> {
        input.validate()?;

        let line_items = match &input.line_items {
            Some(raw) => {
                let items = sanitize(raw)?;
                if items.is_empty() {
                    return Err(DocumentError::EmptyDocument);
                }
                Some(items)
            }
            None => None,
        };
        let tax_rate = input.tax_rate.map(normalize_tax_rate).transpose()?;

        let (invoice, _) = self
            .store
            .mutate_invoice(
                DocumentKey::owned(owner_id, id),
                Box::new(move |invoice: &mut Invoice| {
                    let repricing = line_items.is_some() || tax_rate.is_some();
                    if repricing && !invoice.payment_history.is_empty() {
                        return Err(DocumentError::conflict(
                            "Line items and tax rate cannot change after a payment",
                        ));
                    }
                    check_dates(invoice.issue_date, input.due_date)?;

                    if let Some(name) = input.client_name {
                        invoice.client_name = name.trim().to_string();
                    }
                    if input.client_email.is_some() {
                        invoice.client_email = trimmed(input.client_email);
                    }
                    if input.client_phone.is_some() {
                        invoice.client_phone = trimmed(input.client_phone);
                    }
                    if let Some(project) = input.project_name {
                        invoice.project_name = project.trim().to_string();
                    }
                    if let Some(due) = input.due_date {
                        invoice.due_date = Some(due);
                    }
                    if input.notes.is_some() {
                        invoice.notes = trimmed(input.notes);
                    }
                    if let Some(items) = line_items {
                        invoice.line_items = items;
                    }
                    if let Some(rate) = tax_rate {
                        invoice.tax_rate = rate;
                    }
                    if repricing {
                        invoice.total = price(&invoice.line_items, invoice.tax_rate)?;
                    }
                    invoice.settle();
                    Ok(Change::Changed)
                }),
            )
            .await?;

        Ok(invoice)
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %id))]
    pub async fn delete(&self, owner_id: Uuid, id: Uuid) -> Result<(), DocumentError> {
        self.store.delete_invoice(owner_id, id).await?;
        record_invoice_event("deleted");
        info!("Invoice deleted");
        Ok(())
    }

    /// Record dispatch. Requires a client email.
    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %id))]
    pub async fn mark_sent(&self, owner_id: Uuid, id: Uuid) -> Result<Invoice, DocumentError> {
        let (invoice, _) = self
            .store
            .mutate_invoice(
                DocumentKey::owned(owner_id, id),
                Box::new(|invoice: &mut Invoice| {
                    if invoice.client_email.is_none() {
                        return Err(DocumentError::validation(
                            "Client email is required to send an invoice",
                        ));
                    }
                    invoice.sent_at = Some(Utc::now());
                    Ok(Change::Changed)
                }),
            )
            .await?;

        record_invoice_event("sent");
        Ok(invoice)
    }

    /// `mark_sent`, then email the client their payment link.
    pub async fn send(&self, owner_id: Uuid, id: Uuid) -> Result<Invoice, DocumentError> {
        let invoice = self.mark_sent(owner_id, id).await?;
        let to = invoice
            .client_email
            .clone()
            .ok_or_else(|| DocumentError::validation("Client email is required"))?;

        self.notifications
            .send(
                &to,
                Template::InvoiceSent {
                    client_name: invoice.client_name.clone(),
                    invoice_number: invoice.invoice_number.clone(),
                    project_name: invoice.project_name.clone(),
                    balance_due: invoice.balance_due(),
                    link: self.notifications.invoice_link(&invoice.view_token),
                },
            )
            .await?;

        Ok(invoice)
    }

    /// Manual payment entered by the owner (cash, cheque, transfer).
    pub async fn record_payment(
        &self,
        owner_id: Uuid,
        id: Uuid,
        input: RecordPaymentInput,
    ) -> Result<Invoice, DocumentError> {
        input.validate()?;
        let (invoice, _) = self
            .add_payment(
                DocumentKey::owned(owner_id, id),
                NewPayment {
                    amount: input.amount,
                    note: trimmed(input.note),
                    reference: trimmed(input.reference),
                },
            )
            .await?;
        Ok(invoice)
    }

    /// Shared by owner entry, the public gateway and the reconciler.
    #[instrument(skip(self, key, payment), fields(amount = %payment.amount))]
    pub(crate) async fn add_payment(
        &self,
        key: DocumentKey<'_>,
        payment: NewPayment,
    ) -> Result<(Invoice, Change), DocumentError> {
        let payment = payment.validated()?;
        let amount = payment.amount;

        let (invoice, change) = self
            .store
            .mutate_invoice(
                key,
                Box::new(move |invoice: &mut Invoice| apply_payment(invoice, payment)),
            )
            .await?;

        if change == Change::Changed {
            record_invoice_event("payment_recorded");
            PAYMENT_AMOUNT_TOTAL
                .with_label_values(&[self.currency.as_str()])
                .inc_by(amount.to_f64().unwrap_or(0.0));
            info!(
                invoice_id = %invoice.id,
                amount_paid = %invoice.amount_paid,
                status = invoice.status.as_str(),
                "Payment recorded"
            );
        }

        Ok((invoice, change))
    }
}
