//! In-memory store backed by `dashmap`.
//!
//! A mutation holds the document's shard write lock for its whole
//! read-modify-write, which serializes writes per id.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::instrument;
use uuid::Uuid;

use super::{
    pin_estimate_identity, pin_invoice_identity, Change, DocumentKey, DocumentStore, Mutation,
    ReconciliationStore, RecordStore,
};
use crate::error::DocumentError;
use crate::models::{
    Client, Estimate, EstimateDraft, EstimateStatus, Invoice, InvoiceDraft, InvoiceStatus, Job,
    JobStatus, ReconciliationEntry, ReconciliationState, UpdateClientInput,
};
use crate::services::tokens::{generate_invoice_number, generate_view_token};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenTarget {
    Estimate(Uuid),
    Invoice(Uuid),
}

#[derive(Default)]
pub struct MemoryStore {
    estimates: DashMap<Uuid, Estimate>,
    invoices: DashMap<Uuid, Invoice>,
    tokens: DashMap<String, TokenTarget>,
    invoice_numbers: DashMap<(Uuid, String), Uuid>,
    jobs: DashMap<Uuid, Job>,
    clients: DashMap<Uuid, Client>,
    reconciliations: DashMap<Uuid, ReconciliationEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve a fresh token for `target`, retrying on collision.
    fn reserve_token(&self, target: TokenTarget) -> String {
        loop {
            let token = generate_view_token();
            if let Entry::Vacant(slot) = self.tokens.entry(token.clone()) {
                slot.insert(target);
                return token;
            }
        }
    }

    fn reserve_invoice_number(&self, owner_id: Uuid, id: Uuid) -> String {
        loop {
            let number = generate_invoice_number();
            if let Entry::Vacant(slot) = self.invoice_numbers.entry((owner_id, number.clone())) {
                slot.insert(id);
                return number;
            }
        }
    }

    fn resolve_estimate(&self, key: DocumentKey<'_>) -> Result<Uuid, DocumentError> {
        match key {
            DocumentKey::Owned { id, .. } => Ok(id),
            DocumentKey::Token(token) => match self.tokens.get(token).map(|t| *t.value()) {
                Some(TokenTarget::Estimate(id)) => Ok(id),
                _ => Err(DocumentError::NotFound("Estimate")),
            },
        }
    }

    fn resolve_invoice(&self, key: DocumentKey<'_>) -> Result<Uuid, DocumentError> {
        match key {
            DocumentKey::Owned { id, .. } => Ok(id),
            DocumentKey::Token(token) => match self.tokens.get(token).map(|t| *t.value()) {
                Some(TokenTarget::Invoice(id)) => Ok(id),
                _ => Err(DocumentError::NotFound("Invoice")),
            },
        }
    }
}

fn owner_matches(key: DocumentKey<'_>, owner_id: Uuid) -> bool {
    match key {
        DocumentKey::Owned { owner_id: expected, .. } => expected == owner_id,
        DocumentKey::Token(_) => true,
    }
}

fn newest_first<T, F>(mut items: Vec<T>, created: F) -> Vec<T>
where
    F: Fn(&T) -> chrono::DateTime<Utc>,
{
    items.sort_by_key(|item| std::cmp::Reverse(created(item)));
    items
}

#[async_trait]
impl DocumentStore for MemoryStore {
    #[instrument(skip(self, draft), fields(owner_id = %draft.owner_id))]
    async fn insert_estimate(&self, draft: EstimateDraft) -> Result<Estimate, DocumentError> {
        let id = Uuid::new_v4();
        let view_token = self.reserve_token(TokenTarget::Estimate(id));
        let now = Utc::now();

        let estimate = Estimate {
            id,
            owner_id: draft.owner_id,
            client_name: draft.client_name,
            client_email: draft.client_email,
            client_phone: draft.client_phone,
            project_name: draft.project_name,
            line_items: draft.line_items,
            tax_rate: draft.tax_rate,
            deposit: draft.deposit,
            total: draft.total,
            status: EstimateStatus::Draft,
            view_token,
            created_at: now,
            updated_at: now,
            sent_at: None,
            signed_at: None,
            signed_by_name: None,
            signed_by_email: None,
            signature_ref: None,
            rejected_at: None,
            rejection_reason: None,
        };

        self.estimates.insert(id, estimate.clone());
        Ok(estimate)
    }

    async fn get_estimate(&self, key: DocumentKey<'_>) -> Result<Estimate, DocumentError> {
        let id = self.resolve_estimate(key)?;
        self.estimates
            .get(&id)
            .filter(|e| owner_matches(key, e.owner_id))
            .map(|e| e.value().clone())
            .ok_or(DocumentError::NotFound("Estimate"))
    }

    async fn list_estimates(&self, owner_id: Uuid) -> Result<Vec<Estimate>, DocumentError> {
        let items: Vec<Estimate> = self
            .estimates
            .iter()
            .filter(|e| e.owner_id == owner_id)
            .map(|e| e.value().clone())
            .collect();
        Ok(newest_first(items, |e| e.created_at))
    }

    async fn mutate_estimate(
        &self,
        key: DocumentKey<'_>,
        mutation: Mutation<'_, Estimate>,
    ) -> Result<(Estimate, Change), DocumentError> {
        let id = self.resolve_estimate(key)?;
        let mut entry = self
            .estimates
            .get_mut(&id)
            .filter(|e| owner_matches(key, e.owner_id))
            .ok_or(DocumentError::NotFound("Estimate"))?;

        let mut working = entry.value().clone();
        match mutation(&mut working)? {
            Change::Unchanged => Ok((entry.value().clone(), Change::Unchanged)),
            Change::Changed => {
                pin_estimate_identity(entry.value(), &mut working);
                working.updated_at = Utc::now();
                *entry.value_mut() = working.clone();
                Ok((working, Change::Changed))
            }
        }
    }

    async fn delete_estimate(&self, owner_id: Uuid, id: Uuid) -> Result<(), DocumentError> {
        let (_, removed) = self
            .estimates
            .remove_if(&id, |_, e| e.owner_id == owner_id)
            .ok_or(DocumentError::NotFound("Estimate"))?;
        self.tokens.remove(&removed.view_token);
        Ok(())
    }

    #[instrument(skip(self, draft), fields(owner_id = %draft.owner_id))]
    async fn insert_invoice(&self, draft: InvoiceDraft) -> Result<Invoice, DocumentError> {
        let id = Uuid::new_v4();
        let view_token = self.reserve_token(TokenTarget::Invoice(id));
        let invoice_number = self.reserve_invoice_number(draft.owner_id, id);
        let now = Utc::now();

        let invoice = Invoice {
            id,
            owner_id: draft.owner_id,
            estimate_id: draft.estimate_id,
            invoice_number,
            client_name: draft.client_name,
            client_email: draft.client_email,
            client_phone: draft.client_phone,
            project_name: draft.project_name,
            line_items: draft.line_items,
            tax_rate: draft.tax_rate,
            total: draft.total,
            amount_paid: Decimal::ZERO,
            payment_history: Vec::new(),
            status: InvoiceStatus::derive(Decimal::ZERO, draft.total),
            issue_date: draft.issue_date,
            due_date: draft.due_date,
            notes: draft.notes,
            view_token,
            created_at: now,
            updated_at: now,
            sent_at: None,
        };

        self.invoices.insert(id, invoice.clone());
        Ok(invoice)
    }

    async fn get_invoice(&self, key: DocumentKey<'_>) -> Result<Invoice, DocumentError> {
        let id = self.resolve_invoice(key)?;
        self.invoices
            .get(&id)
            .filter(|i| owner_matches(key, i.owner_id))
            .map(|i| i.value().clone())
            .ok_or(DocumentError::NotFound("Invoice"))
    }

    async fn list_invoices(&self, owner_id: Uuid) -> Result<Vec<Invoice>, DocumentError> {
        let items: Vec<Invoice> = self
            .invoices
            .iter()
            .filter(|i| i.owner_id == owner_id)
            .map(|i| i.value().clone())
            .collect();
        Ok(newest_first(items, |i| i.created_at))
    }

    async fn mutate_invoice(
        &self,
        key: DocumentKey<'_>,
        mutation: Mutation<'_, Invoice>,
    ) -> Result<(Invoice, Change), DocumentError> {
        let id = self.resolve_invoice(key)?;
        let mut entry = self
            .invoices
            .get_mut(&id)
            .filter(|i| owner_matches(key, i.owner_id))
            .ok_or(DocumentError::NotFound("Invoice"))?;

        let mut working = entry.value().clone();
        match mutation(&mut working)? {
            Change::Unchanged => Ok((entry.value().clone(), Change::Unchanged)),
            Change::Changed => {
                pin_invoice_identity(entry.value(), &mut working);
                working.updated_at = Utc::now();
                *entry.value_mut() = working.clone();
                Ok((working, Change::Changed))
            }
        }
    }

    async fn delete_invoice(&self, owner_id: Uuid, id: Uuid) -> Result<(), DocumentError> {
        let (_, removed) = self
            .invoices
            .remove_if(&id, |_, i| i.owner_id == owner_id)
            .ok_or(DocumentError::NotFound("Invoice"))?;
        self.tokens.remove(&removed.view_token);
        self.invoice_numbers
            .remove(&(removed.owner_id, removed.invoice_number));
        Ok(())
    }

    async fn health_check(&self) -> Result<(), DocumentError> {
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn insert_job(&self, job: Job) -> Result<Job, DocumentError> {
        self.jobs.insert(job.id, job.clone());
        Ok(job)
    }

    async fn update_job_for_estimate(
        &self,
        owner_id: Uuid,
        estimate_id: Uuid,
        status: JobStatus,
        total: Decimal,
    ) -> Result<(), DocumentError> {
        for mut job in self.jobs.iter_mut() {
            if job.owner_id == owner_id && job.estimate_id == Some(estimate_id) {
                job.status = status;
                job.total = total;
            }
        }
        Ok(())
    }

    async fn list_jobs(&self, owner_id: Uuid) -> Result<Vec<Job>, DocumentError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| j.owner_id == owner_id)
            .map(|j| j.value().clone())
            .collect();
        jobs.sort_by(|a, b| b.date.cmp(&a.date));
        Ok(jobs)
    }

    async fn insert_client(&self, client: Client) -> Result<Client, DocumentError> {
        self.clients.insert(client.id, client.clone());
        Ok(client)
    }

    async fn get_client(&self, owner_id: Uuid, id: Uuid) -> Result<Client, DocumentError> {
        self.clients
            .get(&id)
            .filter(|c| c.owner_id == owner_id)
            .map(|c| c.value().clone())
            .ok_or(DocumentError::NotFound("Client"))
    }

    async fn list_clients(&self, owner_id: Uuid) -> Result<Vec<Client>, DocumentError> {
        let mut clients: Vec<Client> = self
            .clients
            .iter()
            .filter(|c| c.owner_id == owner_id)
            .map(|c| c.value().clone())
            .collect();
        clients.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(clients)
    }

    async fn update_client(
        &self,
        owner_id: Uuid,
        id: Uuid,
        input: &UpdateClientInput,
    ) -> Result<Client, DocumentError> {
        let mut client = self
            .clients
            .get_mut(&id)
            .filter(|c| c.owner_id == owner_id)
            .ok_or(DocumentError::NotFound("Client"))?;
        client.apply(input);
        Ok(client.value().clone())
    }

    async fn delete_client(&self, owner_id: Uuid, id: Uuid) -> Result<(), DocumentError> {
        self.clients
            .remove_if(&id, |_, c| c.owner_id == owner_id)
            .map(|_| ())
            .ok_or(DocumentError::NotFound("Client"))
    }
}

#[async_trait]
impl ReconciliationStore for MemoryStore {
    async fn enqueue(
        &self,
        entry: ReconciliationEntry,
    ) -> Result<ReconciliationEntry, DocumentError> {
        self.reconciliations.insert(entry.id, entry.clone());
        Ok(entry)
    }

    async fn list_reconciliations(
        &self,
        owner_id: Uuid,
    ) -> Result<Vec<ReconciliationEntry>, DocumentError> {
        let items: Vec<ReconciliationEntry> = self
            .reconciliations
            .iter()
            .filter(|r| r.owner_id == owner_id)
            .map(|r| r.value().clone())
            .collect();
        Ok(newest_first(items, |r| r.created_at))
    }

    async fn pending_reconciliations(
        &self,
        limit: usize,
    ) -> Result<Vec<ReconciliationEntry>, DocumentError> {
        let mut pending: Vec<ReconciliationEntry> = self
            .reconciliations
            .iter()
            .filter(|r| r.state == ReconciliationState::Pending)
            .map(|r| r.value().clone())
            .collect();
        pending.sort_by_key(|r| r.created_at);
        pending.truncate(limit);
        Ok(pending)
    }

    async fn update_reconciliation(
        &self,
        entry: &ReconciliationEntry,
    ) -> Result<(), DocumentError> {
        let mut stored = self
            .reconciliations
            .get_mut(&entry.id)
            .ok_or(DocumentError::NotFound("Reconciliation"))?;
        *stored.value_mut() = ReconciliationEntry {
            updated_at: Utc::now(),
            ..entry.clone()
        };
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{LineItem, PaymentEntry};
    use std::sync::Arc;

    fn estimate_draft(owner_id: Uuid) -> EstimateDraft {
        EstimateDraft {
            owner_id,
            client_name: "Dana".to_string(),
            client_email: Some("dana@example.com".to_string()),
            client_phone: None,
            project_name: "Kitchen".to_string(),
            line_items: vec![LineItem {
                id: Uuid::new_v4(),
                description: "Cabinets".to_string(),
                quantity: Decimal::ONE,
                rate: Decimal::from(500),
                total: Decimal::from(500),
            }],
            tax_rate: Decimal::ZERO,
            deposit: Decimal::ZERO,
            total: Decimal::from(500),
        }
    }

    fn invoice_draft(owner_id: Uuid, total: i64) -> InvoiceDraft {
        InvoiceDraft {
            owner_id,
            estimate_id: None,
            client_name: "Dana".to_string(),
            client_email: Some("dana@example.com".to_string()),
            client_phone: None,
            project_name: "Kitchen".to_string(),
            line_items: Vec::new(),
            tax_rate: Decimal::ZERO,
            total: Decimal::from(total),
            issue_date: Utc::now().date_naive(),
            due_date: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn insert_returns_the_persisted_token() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let inserted = store.insert_estimate(estimate_draft(owner)).await.unwrap();

        let by_token = store
            .get_estimate(DocumentKey::Token(&inserted.view_token))
            .await
            .unwrap();
        assert_eq!(by_token.id, inserted.id);
    }

    #[tokio::test]
    async fn other_owners_cannot_see_documents() {
        let store = MemoryStore::new();
        let inserted = store
            .insert_estimate(estimate_draft(Uuid::new_v4()))
            .await
            .unwrap();

        let err = store
            .get_estimate(DocumentKey::owned(Uuid::new_v4(), inserted.id))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store
            .delete_estimate(Uuid::new_v4(), inserted.id)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn invoice_token_does_not_resolve_estimates() {
        let store = MemoryStore::new();
        let invoice = store
            .insert_invoice(invoice_draft(Uuid::new_v4(), 10))
            .await
            .unwrap();
        assert!(store
            .get_estimate(DocumentKey::Token(&invoice.view_token))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn mutation_cannot_rewrite_identity() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let inserted = store.insert_estimate(estimate_draft(owner)).await.unwrap();

        let (updated, change) = store
            .mutate_estimate(
                DocumentKey::owned(owner, inserted.id),
                Box::new(|e: &mut Estimate| {
                    e.view_token = "forged".to_string();
                    e.owner_id = Uuid::nil();
                    e.status = EstimateStatus::Sent;
                    Ok(Change::Changed)
                }),
            )
            .await
            .unwrap();

        assert_eq!(change, Change::Changed);
        assert_eq!(updated.view_token, inserted.view_token);
        assert_eq!(updated.owner_id, owner);
        assert_eq!(updated.status, EstimateStatus::Sent);
    }

    #[tokio::test]
    async fn failed_mutation_writes_nothing() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let inserted = store.insert_estimate(estimate_draft(owner)).await.unwrap();

        let result = store
            .mutate_estimate(
                DocumentKey::owned(owner, inserted.id),
                Box::new(|e: &mut Estimate| {
                    e.client_name = "Changed".to_string();
                    Err(DocumentError::conflict("nope"))
                }),
            )
            .await;
        assert!(result.is_err());

        let stored = store
            .get_estimate(DocumentKey::owned(owner, inserted.id))
            .await
            .unwrap();
        assert_eq!(stored.client_name, "Dana");
    }

    #[tokio::test]
    async fn concurrent_payments_are_not_lost() {
        let store = Arc::new(MemoryStore::new());
        let owner = Uuid::new_v4();
        let invoice = store
            .insert_invoice(invoice_draft(owner, 10_000))
            .await
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            let id = invoice.id;
            handles.push(tokio::spawn(async move {
                store
                    .mutate_invoice(
                        DocumentKey::owned(owner, id),
                        Box::new(|inv: &mut Invoice| {
                            inv.payment_history.push(PaymentEntry {
                                amount: Decimal::from(7),
                                date: Utc::now(),
                                note: None,
                                reference: None,
                            });
                            inv.settle();
                            Ok(Change::Changed)
                        }),
                    )
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = store
            .get_invoice(DocumentKey::owned(owner, invoice.id))
            .await
            .unwrap();
        assert_eq!(stored.payment_history.len(), 50);
        assert_eq!(stored.amount_paid, Decimal::from(350));
        assert_eq!(stored.status, InvoiceStatus::PartiallyPaid);
    }

    #[tokio::test]
    async fn deleting_releases_the_token() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let inserted = store.insert_estimate(estimate_draft(owner)).await.unwrap();
        store.delete_estimate(owner, inserted.id).await.unwrap();

        assert!(store
            .get_estimate(DocumentKey::Token(&inserted.view_token))
            .await
            .is_err());
    }
}
