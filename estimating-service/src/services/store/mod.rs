//! Persistence seams for documents, side records and the reconciliation queue.
//!
//! Two implementations: [`MemoryStore`] (dashmap, used in tests and when no
//! database is configured) and [`PgStore`] (sqlx/Postgres).

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::DocumentError;
use crate::models::{
    Client, Estimate, EstimateDraft, Invoice, InvoiceDraft, Job, JobStatus, ReconciliationEntry,
    UpdateClientInput,
};

/// Outcome reported by a mutation closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    /// Persist the modified copy.
    Changed,
    /// Nothing to write; the call is an idempotent no-op.
    Unchanged,
}

/// A read-modify-write step run while the document is locked.
///
/// The closure receives a copy of the current document. Returning an error
/// aborts without writing. Identity columns (`id`, `owner_id`, `view_token`,
/// `created_at`, and for invoices `invoice_number`, `estimate_id`) are never
/// written back, whatever the closure does to them.
pub type Mutation<'a, T> = Box<dyn FnOnce(&mut T) -> Result<Change, DocumentError> + Send + 'a>;

/// How a document is addressed: by its owner, or by bearer token.
#[derive(Debug, Clone, Copy)]
pub enum DocumentKey<'a> {
    Owned { owner_id: Uuid, id: Uuid },
    Token(&'a str),
}

impl<'a> DocumentKey<'a> {
    pub fn owned(owner_id: Uuid, id: Uuid) -> Self {
        DocumentKey::Owned { owner_id, id }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Persist a new estimate, minting its id and view token atomically.
    async fn insert_estimate(&self, draft: EstimateDraft) -> Result<Estimate, DocumentError>;
    async fn get_estimate(&self, key: DocumentKey<'_>) -> Result<Estimate, DocumentError>;
    async fn list_estimates(&self, owner_id: Uuid) -> Result<Vec<Estimate>, DocumentError>;
    async fn mutate_estimate(
        &self,
        key: DocumentKey<'_>,
        mutation: Mutation<'_, Estimate>,
    ) -> Result<(Estimate, Change), DocumentError>;
    async fn delete_estimate(&self, owner_id: Uuid, id: Uuid) -> Result<(), DocumentError>;

    /// Persist a new invoice, minting id, view token and invoice number.
    async fn insert_invoice(&self, draft: InvoiceDraft) -> Result<Invoice, DocumentError>;
    async fn get_invoice(&self, key: DocumentKey<'_>) -> Result<Invoice, DocumentError>;
    async fn list_invoices(&self, owner_id: Uuid) -> Result<Vec<Invoice>, DocumentError>;
    async fn mutate_invoice(
        &self,
        key: DocumentKey<'_>,
        mutation: Mutation<'_, Invoice>,
    ) -> Result<(Invoice, Change), DocumentError>;
    async fn delete_invoice(&self, owner_id: Uuid, id: Uuid) -> Result<(), DocumentError>;

    async fn health_check(&self) -> Result<(), DocumentError>;
}

/// Jobs and clients. Neither is authoritative for document logic.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn insert_job(&self, job: Job) -> Result<Job, DocumentError>;
    /// Mirror an estimate's status onto its job. Missing jobs are ignored.
    async fn update_job_for_estimate(
        &self,
        owner_id: Uuid,
        estimate_id: Uuid,
        status: JobStatus,
        total: Decimal,
    ) -> Result<(), DocumentError>;
    async fn list_jobs(&self, owner_id: Uuid) -> Result<Vec<Job>, DocumentError>;

    async fn insert_client(&self, client: Client) -> Result<Client, DocumentError>;
    async fn get_client(&self, owner_id: Uuid, id: Uuid) -> Result<Client, DocumentError>;
    async fn list_clients(&self, owner_id: Uuid) -> Result<Vec<Client>, DocumentError>;
    async fn update_client(
        &self,
        owner_id: Uuid,
        id: Uuid,
        input: &UpdateClientInput,
    ) -> Result<Client, DocumentError>;
    async fn delete_client(&self, owner_id: Uuid, id: Uuid) -> Result<(), DocumentError>;
}

/// Queue of payments the processor may hold that are not on an invoice.
#[async_trait]
pub trait ReconciliationStore: Send + Sync {
    async fn enqueue(
        &self,
        entry: ReconciliationEntry,
    ) -> Result<ReconciliationEntry, DocumentError>;
    async fn list_reconciliations(
        &self,
        owner_id: Uuid,
    ) -> Result<Vec<ReconciliationEntry>, DocumentError>;
    /// Oldest pending entries first.
    async fn pending_reconciliations(
        &self,
        limit: usize,
    ) -> Result<Vec<ReconciliationEntry>, DocumentError>;
    async fn update_reconciliation(&self, entry: &ReconciliationEntry)
        -> Result<(), DocumentError>;
}

/// Restore identity fields a mutation must not touch.
pub(crate) fn pin_estimate_identity(original: &Estimate, working: &mut Estimate) {
    working.id = original.id;
    working.owner_id = original.owner_id;
    working.view_token = original.view_token.clone();
    working.created_at = original.created_at;
}

pub(crate) fn pin_invoice_identity(original: &Invoice, working: &mut Invoice) {
    working.id = original.id;
    working.owner_id = original.owner_id;
    working.view_token = original.view_token.clone();
    working.invoice_number = original.invoice_number.clone();
    working.estimate_id = original.estimate_id;
    working.created_at = original.created_at;
}
