//! Postgres store.
//!
//! Line items and payment history are JSONB columns. Every mutation runs
//! `SELECT ... FOR UPDATE` and `UPDATE` in one transaction, so token-driven
//! writes and owner edits on the same row are serialized.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::types::Json;
use std::time::Duration;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::{
    pin_estimate_identity, pin_invoice_identity, Change, DocumentKey, DocumentStore, Mutation,
    ReconciliationStore, RecordStore,
};
use crate::error::DocumentError;
use crate::models::{
    Client, Estimate, EstimateDraft, EstimateStatus, Invoice, InvoiceDraft, InvoiceStatus, Job,
    JobStatus, LineItem, PaymentEntry, ReconciliationEntry, ReconciliationKind,
    ReconciliationState, UpdateClientInput,
};
use crate::services::metrics::DB_QUERY_DURATION;
use crate::services::tokens::{generate_invoice_number, generate_view_token};

const MAX_MINT_ATTEMPTS: u32 = 5;

const ESTIMATE_COLUMNS: &str = "id, owner_id, client_name, client_email, client_phone, \
    project_name, line_items, tax_rate, deposit, total, status, view_token, created_at, \
    updated_at, sent_at, signed_at, signed_by_name, signed_by_email, signature_ref, \
    rejected_at, rejection_reason";

const INVOICE_COLUMNS: &str = "id, owner_id, estimate_id, invoice_number, client_name, \
    client_email, client_phone, project_name, line_items, tax_rate, total, amount_paid, \
    payment_history, status, issue_date, due_date, notes, view_token, created_at, updated_at, \
    sent_at";

const JOB_COLUMNS: &str = "id, owner_id, estimate_id, client_name, project_type, status, total, date";

const CLIENT_COLUMNS: &str =
    "id, owner_id, name, email, phone, address, total_jobs, total_value, created_at";

const RECONCILIATION_COLUMNS: &str = "id, owner_id, invoice_id, kind, state, amount, \
    idempotency_key, authorization_id, attempts, last_error, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct EstimateRow {
    id: Uuid,
    owner_id: Uuid,
    client_name: String,
    client_email: Option<String>,
    client_phone: Option<String>,
    project_name: String,
    line_items: Json<Vec<LineItem>>,
    tax_rate: Decimal,
    deposit: Decimal,
    total: Decimal,
    status: String,
    view_token: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    signed_at: Option<DateTime<Utc>>,
    signed_by_name: Option<String>,
    signed_by_email: Option<String>,
    signature_ref: Option<String>,
    rejected_at: Option<DateTime<Utc>>,
    rejection_reason: Option<String>,
}

impl From<EstimateRow> for Estimate {
    fn from(row: EstimateRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            client_name: row.client_name,
            client_email: row.client_email,
            client_phone: row.client_phone,
            project_name: row.project_name,
            line_items: row.line_items.0,
            tax_rate: row.tax_rate,
            deposit: row.deposit,
            total: row.total,
            status: EstimateStatus::from_string(&row.status),
            view_token: row.view_token,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sent_at: row.sent_at,
            signed_at: row.signed_at,
            signed_by_name: row.signed_by_name,
            signed_by_email: row.signed_by_email,
            signature_ref: row.signature_ref,
            rejected_at: row.rejected_at,
            rejection_reason: row.rejection_reason,
        }
    }
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    owner_id: Uuid,
    estimate_id: Option<Uuid>,
    invoice_number: String,
    client_name: String,
    client_email: Option<String>,
    client_phone: Option<String>,
    project_name: String,
    line_items: Json<Vec<LineItem>>,
    tax_rate: Decimal,
    total: Decimal,
    amount_paid: Decimal,
    payment_history: Json<Vec<PaymentEntry>>,
    status: String,
    issue_date: NaiveDate,
    due_date: Option<NaiveDate>,
    notes: Option<String>,
    view_token: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
}

impl From<InvoiceRow> for Invoice {
    fn from(row: InvoiceRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            estimate_id: row.estimate_id,
            invoice_number: row.invoice_number,
            client_name: row.client_name,
            client_email: row.client_email,
            client_phone: row.client_phone,
            project_name: row.project_name,
            line_items: row.line_items.0,
            tax_rate: row.tax_rate,
            total: row.total,
            amount_paid: row.amount_paid,
            payment_history: row.payment_history.0,
            status: InvoiceStatus::from_string(&row.status),
            issue_date: row.issue_date,
            due_date: row.due_date,
            notes: row.notes,
            view_token: row.view_token,
            created_at: row.created_at,
            updated_at: row.updated_at,
            sent_at: row.sent_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    owner_id: Uuid,
    estimate_id: Option<Uuid>,
    client_name: String,
    project_type: String,
    status: String,
    total: Decimal,
    date: NaiveDate,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            estimate_id: row.estimate_id,
            client_name: row.client_name,
            project_type: row.project_type,
            status: JobStatus::from_string(&row.status),
            total: row.total,
            date: row.date,
        }
    }
}

#[derive(sqlx::FromRow)]
struct ReconciliationRow {
    id: Uuid,
    owner_id: Uuid,
    invoice_id: Uuid,
    kind: String,
    state: String,
    amount: Decimal,
    idempotency_key: String,
    authorization_id: Option<String>,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<ReconciliationRow> for ReconciliationEntry {
    fn from(row: ReconciliationRow) -> Self {
        Self {
            id: row.id,
            owner_id: row.owner_id,
            invoice_id: row.invoice_id,
            kind: ReconciliationKind::from_string(&row.kind),
            state: ReconciliationState::from_string(&row.state),
            amount: row.amount,
            idempotency_key: row.idempotency_key,
            authorization_id: row.authorization_id,
            attempts: row.attempts,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

fn db_err(context: &'static str) -> impl FnOnce(sqlx::Error) -> DocumentError {
    move |e| DocumentError::storage(anyhow::anyhow!("{}: {}", context, e))
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// `SELECT` for one document by owner or token, optionally row-locked.
fn select_by_key(table: &str, columns: &str, key: &DocumentKey<'_>, lock: bool) -> String {
    let filter = match key {
        DocumentKey::Owned { .. } => "owner_id = $1 AND id = $2",
        DocumentKey::Token(_) => "view_token = $1",
    };
    let suffix = if lock { " FOR UPDATE" } else { "" };
    format!("SELECT {} FROM {} WHERE {}{}", columns, table, filter, suffix)
}

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Create a new database connection pool.
    #[instrument(skip(database_url), fields(service = "estimating-service"))]
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self, DocumentError> {
        info!(
            max_connections = max_connections,
            min_connections = min_connections,
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .idle_timeout(Duration::from_secs(600))
            .connect(database_url)
            .await
            .map_err(db_err("Failed to connect"))?;

        info!("PostgreSQL connection pool established");

        Ok(Self { pool })
    }

    /// Run database migrations.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> Result<(), DocumentError> {
        info!("Running database migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DocumentError::storage(anyhow::anyhow!("Migration failed: {}", e)))?;
        info!("Database migrations completed");
        Ok(())
    }

    async fn fetch_estimate(
        &self,
        key: DocumentKey<'_>,
    ) -> Result<Option<EstimateRow>, DocumentError> {
        let sql = select_by_key("estimates", ESTIMATE_COLUMNS, &key, false);
        let query = sqlx::query_as::<_, EstimateRow>(&sql);
        let query = match key {
            DocumentKey::Owned { owner_id, id } => query.bind(owner_id).bind(id),
            DocumentKey::Token(token) => query.bind(token),
        };
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to get estimate"))
    }

    async fn fetch_invoice(&self, key: DocumentKey<'_>) -> Result<Option<InvoiceRow>, DocumentError> {
        let sql = select_by_key("invoices", INVOICE_COLUMNS, &key, false);
        let query = sqlx::query_as::<_, InvoiceRow>(&sql);
        let query = match key {
            DocumentKey::Owned { owner_id, id } => query.bind(owner_id).bind(id),
            DocumentKey::Token(token) => query.bind(token),
        };
        query
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to get invoice"))
    }
}

#[async_trait]
impl DocumentStore for PgStore {
    #[instrument(skip(self, draft), fields(owner_id = %draft.owner_id))]
    async fn insert_estimate(&self, draft: EstimateDraft) -> Result<Estimate, DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["insert_estimate"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO estimates (id, owner_id, client_name, client_email, client_phone,
                project_name, line_items, tax_rate, deposit, total, status, view_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            ESTIMATE_COLUMNS
        );

        for attempt in 1..=MAX_MINT_ATTEMPTS {
            let result = sqlx::query_as::<_, EstimateRow>(&sql)
                .bind(Uuid::new_v4())
                .bind(draft.owner_id)
                .bind(&draft.client_name)
                .bind(&draft.client_email)
                .bind(&draft.client_phone)
                .bind(&draft.project_name)
                .bind(Json(&draft.line_items))
                .bind(draft.tax_rate)
                .bind(draft.deposit)
                .bind(draft.total)
                .bind(EstimateStatus::Draft.as_str())
                .bind(generate_view_token())
                .fetch_one(&self.pool)
                .await;

            match result {
                Ok(row) => {
                    let estimate = Estimate::from(row);
                    info!(estimate_id = %estimate.id, "Estimate inserted");
                    return Ok(estimate);
                }
                Err(e) if is_unique_violation(&e) => {
                    warn!(attempt = attempt, "View token collision, regenerating");
                }
                Err(e) => return Err(db_err("Failed to insert estimate")(e)),
            }
        }

        Err(DocumentError::storage(anyhow::anyhow!(
            "Could not mint a unique view token"
        )))
    }

    #[instrument(skip(self, key))]
    async fn get_estimate(&self, key: DocumentKey<'_>) -> Result<Estimate, DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["get_estimate"])
            .start_timer();

        self.fetch_estimate(key)
            .await?
            .map(Estimate::from)
            .ok_or(DocumentError::NotFound("Estimate"))
    }

    #[instrument(skip(self), fields(owner_id = %owner_id))]
    async fn list_estimates(&self, owner_id: Uuid) -> Result<Vec<Estimate>, DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["list_estimates"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM estimates WHERE owner_id = $1 ORDER BY created_at DESC",
            ESTIMATE_COLUMNS
        );
        let rows = sqlx::query_as::<_, EstimateRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to list estimates"))?;

        Ok(rows.into_iter().map(Estimate::from).collect())
    }

    #[instrument(skip(self, key, mutation))]
    async fn mutate_estimate(
        &self,
        key: DocumentKey<'_>,
        mutation: Mutation<'_, Estimate>,
    ) -> Result<(Estimate, Change), DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["mutate_estimate"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin"))?;

        let sql = select_by_key("estimates", ESTIMATE_COLUMNS, &key, true);
        let query = sqlx::query_as::<_, EstimateRow>(&sql);
        let query = match key {
            DocumentKey::Owned { owner_id, id } => query.bind(owner_id).bind(id),
            DocumentKey::Token(token) => query.bind(token),
        };
        let current: Estimate = query
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err("Failed to lock estimate"))?
            .map(Estimate::from)
            .ok_or(DocumentError::NotFound("Estimate"))?;

        let mut working = current.clone();
        if mutation(&mut working)? == Change::Unchanged {
            return Ok((current, Change::Unchanged));
        }
        pin_estimate_identity(&current, &mut working);

        let sql = format!(
            r#"
            UPDATE estimates
            SET client_name = $2, client_email = $3, client_phone = $4, project_name = $5,
                line_items = $6, tax_rate = $7, deposit = $8, total = $9, status = $10,
                sent_at = $11, signed_at = $12, signed_by_name = $13, signed_by_email = $14,
                signature_ref = $15, rejected_at = $16, rejection_reason = $17,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            ESTIMATE_COLUMNS
        );
        let row = sqlx::query_as::<_, EstimateRow>(&sql)
            .bind(working.id)
            .bind(&working.client_name)
            .bind(&working.client_email)
            .bind(&working.client_phone)
            .bind(&working.project_name)
            .bind(Json(&working.line_items))
            .bind(working.tax_rate)
            .bind(working.deposit)
            .bind(working.total)
            .bind(working.status.as_str())
            .bind(working.sent_at)
            .bind(working.signed_at)
            .bind(&working.signed_by_name)
            .bind(&working.signed_by_email)
            .bind(&working.signature_ref)
            .bind(working.rejected_at)
            .bind(&working.rejection_reason)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("Failed to update estimate"))?;

        tx.commit().await.map_err(db_err("Failed to commit"))?;

        Ok((Estimate::from(row), Change::Changed))
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, estimate_id = %id))]
    async fn delete_estimate(&self, owner_id: Uuid, id: Uuid) -> Result<(), DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["delete_estimate"])
            .start_timer();

        let result = sqlx::query("DELETE FROM estimates WHERE owner_id = $1 AND id = $2")
            .bind(owner_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("Failed to delete estimate"))?;

        if result.rows_affected() == 0 {
            return Err(DocumentError::NotFound("Estimate"));
        }
        Ok(())
    }

    #[instrument(skip(self, draft), fields(owner_id = %draft.owner_id))]
    async fn insert_invoice(&self, draft: InvoiceDraft) -> Result<Invoice, DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["insert_invoice"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO invoices (id, owner_id, estimate_id, invoice_number, client_name,
                client_email, client_phone, project_name, line_items, tax_rate, total,
                amount_paid, payment_history, status, issue_date, due_date, notes, view_token)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0, '[]'::jsonb, $12, $13, $14,
                $15, $16)
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        );
        let status = InvoiceStatus::derive(Decimal::ZERO, draft.total);

        for attempt in 1..=MAX_MINT_ATTEMPTS {
            let result = sqlx::query_as::<_, InvoiceRow>(&sql)
                .bind(Uuid::new_v4())
                .bind(draft.owner_id)
                .bind(draft.estimate_id)
                .bind(generate_invoice_number())
                .bind(&draft.client_name)
                .bind(&draft.client_email)
                .bind(&draft.client_phone)
                .bind(&draft.project_name)
                .bind(Json(&draft.line_items))
                .bind(draft.tax_rate)
                .bind(draft.total)
                .bind(status.as_str())
                .bind(draft.issue_date)
                .bind(draft.due_date)
                .bind(&draft.notes)
                .bind(generate_view_token())
                .fetch_one(&self.pool)
                .await;

            match result {
                Ok(row) => {
                    let invoice = Invoice::from(row);
                    info!(
                        invoice_id = %invoice.id,
                        invoice_number = %invoice.invoice_number,
                        "Invoice inserted"
                    );
                    return Ok(invoice);
                }
                Err(e) if is_unique_violation(&e) => {
                    warn!(
                        attempt = attempt,
                        "Invoice number or view token collision, regenerating"
                    );
                }
                Err(e) => return Err(db_err("Failed to insert invoice")(e)),
            }
        }

        Err(DocumentError::storage(anyhow::anyhow!(
            "Could not mint a unique invoice number and view token"
        )))
    }

    #[instrument(skip(self, key))]
    async fn get_invoice(&self, key: DocumentKey<'_>) -> Result<Invoice, DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["get_invoice"])
            .start_timer();

        self.fetch_invoice(key)
            .await?
            .map(Invoice::from)
            .ok_or(DocumentError::NotFound("Invoice"))
    }

    #[instrument(skip(self), fields(owner_id = %owner_id))]
    async fn list_invoices(&self, owner_id: Uuid) -> Result<Vec<Invoice>, DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["list_invoices"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM invoices WHERE owner_id = $1 ORDER BY created_at DESC",
            INVOICE_COLUMNS
        );
        let rows = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to list invoices"))?;

        Ok(rows.into_iter().map(Invoice::from).collect())
    }

    #[instrument(skip(self, key, mutation))]
    async fn mutate_invoice(
        &self,
        key: DocumentKey<'_>,
        mutation: Mutation<'_, Invoice>,
    ) -> Result<(Invoice, Change), DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["mutate_invoice"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_err("Failed to begin"))?;

        let sql = select_by_key("invoices", INVOICE_COLUMNS, &key, true);
        let query = sqlx::query_as::<_, InvoiceRow>(&sql);
        let query = match key {
            DocumentKey::Owned { owner_id, id } => query.bind(owner_id).bind(id),
            DocumentKey::Token(token) => query.bind(token),
        };
        let current: Invoice = query
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err("Failed to lock invoice"))?
            .map(Invoice::from)
            .ok_or(DocumentError::NotFound("Invoice"))?;

        let mut working = current.clone();
        if mutation(&mut working)? == Change::Unchanged {
            return Ok((current, Change::Unchanged));
        }
        pin_invoice_identity(&current, &mut working);

        let sql = format!(
            r#"
            UPDATE invoices
            SET client_name = $2, client_email = $3, client_phone = $4, project_name = $5,
                line_items = $6, tax_rate = $7, total = $8, amount_paid = $9,
                payment_history = $10, status = $11, due_date = $12, notes = $13,
                sent_at = $14, updated_at = NOW()
            WHERE id = $1
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        );
        let row = sqlx::query_as::<_, InvoiceRow>(&sql)
            .bind(working.id)
            .bind(&working.client_name)
            .bind(&working.client_email)
            .bind(&working.client_phone)
            .bind(&working.project_name)
            .bind(Json(&working.line_items))
            .bind(working.tax_rate)
            .bind(working.total)
            .bind(working.amount_paid)
            .bind(Json(&working.payment_history))
            .bind(working.status.as_str())
            .bind(working.due_date)
            .bind(&working.notes)
            .bind(working.sent_at)
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err("Failed to update invoice"))?;

        tx.commit().await.map_err(db_err("Failed to commit"))?;

        Ok((Invoice::from(row), Change::Changed))
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, invoice_id = %id))]
    async fn delete_invoice(&self, owner_id: Uuid, id: Uuid) -> Result<(), DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["delete_invoice"])
            .start_timer();

        let result = sqlx::query("DELETE FROM invoices WHERE owner_id = $1 AND id = $2")
            .bind(owner_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("Failed to delete invoice"))?;

        if result.rows_affected() == 0 {
            return Err(DocumentError::NotFound("Invoice"));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> Result<(), DocumentError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err("Health check failed"))?;
        Ok(())
    }
}

#[async_trait]
impl RecordStore for PgStore {
    #[instrument(skip(self, job), fields(owner_id = %job.owner_id, job_id = %job.id))]
    async fn insert_job(&self, job: Job) -> Result<Job, DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["insert_job"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO jobs (id, owner_id, estimate_id, client_name, project_type, status, total, date)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {}
            "#,
            JOB_COLUMNS
        );
        let row = sqlx::query_as::<_, JobRow>(&sql)
            .bind(job.id)
            .bind(job.owner_id)
            .bind(job.estimate_id)
            .bind(&job.client_name)
            .bind(&job.project_type)
            .bind(job.status.as_str())
            .bind(job.total)
            .bind(job.date)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Failed to insert job"))?;

        Ok(Job::from(row))
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, estimate_id = %estimate_id))]
    async fn update_job_for_estimate(
        &self,
        owner_id: Uuid,
        estimate_id: Uuid,
        status: JobStatus,
        total: Decimal,
    ) -> Result<(), DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["update_job_for_estimate"])
            .start_timer();

        sqlx::query(
            "UPDATE jobs SET status = $3, total = $4 WHERE owner_id = $1 AND estimate_id = $2",
        )
        .bind(owner_id)
        .bind(estimate_id)
        .bind(status.as_str())
        .bind(total)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to update job"))?;

        Ok(())
    }

    #[instrument(skip(self), fields(owner_id = %owner_id))]
    async fn list_jobs(&self, owner_id: Uuid) -> Result<Vec<Job>, DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["list_jobs"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM jobs WHERE owner_id = $1 ORDER BY date DESC",
            JOB_COLUMNS
        );
        let rows = sqlx::query_as::<_, JobRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to list jobs"))?;

        Ok(rows.into_iter().map(Job::from).collect())
    }

    #[instrument(skip(self, client), fields(owner_id = %client.owner_id))]
    async fn insert_client(&self, client: Client) -> Result<Client, DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["insert_client"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO clients (id, owner_id, name, email, phone, address, total_jobs, total_value, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {}
            "#,
            CLIENT_COLUMNS
        );
        sqlx::query_as::<_, Client>(&sql)
            .bind(client.id)
            .bind(client.owner_id)
            .bind(&client.name)
            .bind(&client.email)
            .bind(&client.phone)
            .bind(&client.address)
            .bind(client.total_jobs)
            .bind(client.total_value)
            .bind(client.created_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Failed to insert client"))
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, client_id = %id))]
    async fn get_client(&self, owner_id: Uuid, id: Uuid) -> Result<Client, DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["get_client"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM clients WHERE owner_id = $1 AND id = $2",
            CLIENT_COLUMNS
        );
        sqlx::query_as::<_, Client>(&sql)
            .bind(owner_id)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to get client"))?
            .ok_or(DocumentError::NotFound("Client"))
    }

    #[instrument(skip(self), fields(owner_id = %owner_id))]
    async fn list_clients(&self, owner_id: Uuid) -> Result<Vec<Client>, DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["list_clients"])
            .start_timer();

        let sql = format!(
            "SELECT {} FROM clients WHERE owner_id = $1 ORDER BY name",
            CLIENT_COLUMNS
        );
        sqlx::query_as::<_, Client>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to list clients"))
    }

    #[instrument(skip(self, input), fields(owner_id = %owner_id, client_id = %id))]
    async fn update_client(
        &self,
        owner_id: Uuid,
        id: Uuid,
        input: &UpdateClientInput,
    ) -> Result<Client, DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["update_client"])
            .start_timer();

        let sql = format!(
            r#"
            UPDATE clients
            SET name = COALESCE($3, name),
                email = COALESCE($4, email),
                phone = COALESCE($5, phone),
                address = COALESCE($6, address),
                total_jobs = COALESCE($7, total_jobs),
                total_value = COALESCE($8, total_value)
            WHERE owner_id = $1 AND id = $2
            RETURNING {}
            "#,
            CLIENT_COLUMNS
        );
        sqlx::query_as::<_, Client>(&sql)
            .bind(owner_id)
            .bind(id)
            .bind(input.name.as_deref().map(str::trim))
            .bind(input.email.as_deref().map(str::trim))
            .bind(input.phone.as_deref().map(str::trim))
            .bind(input.address.as_deref().map(str::trim))
            .bind(input.total_jobs)
            .bind(input.total_value)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err("Failed to update client"))?
            .ok_or(DocumentError::NotFound("Client"))
    }

    #[instrument(skip(self), fields(owner_id = %owner_id, client_id = %id))]
    async fn delete_client(&self, owner_id: Uuid, id: Uuid) -> Result<(), DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["delete_client"])
            .start_timer();

        let result = sqlx::query("DELETE FROM clients WHERE owner_id = $1 AND id = $2")
            .bind(owner_id)
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err("Failed to delete client"))?;

        if result.rows_affected() == 0 {
            return Err(DocumentError::NotFound("Client"));
        }
        Ok(())
    }
}

#[async_trait]
impl ReconciliationStore for PgStore {
    #[instrument(skip(self, entry), fields(invoice_id = %entry.invoice_id, kind = entry.kind.as_str()))]
    async fn enqueue(
        &self,
        entry: ReconciliationEntry,
    ) -> Result<ReconciliationEntry, DocumentError> {
        let _timer = DB_QUERY_DURATION
            .with_label_values(&["enqueue_reconciliation"])
            .start_timer();

        let sql = format!(
            r#"
            INSERT INTO payment_reconciliations (id, owner_id, invoice_id, kind, state, amount,
                idempotency_key, authorization_id, attempts, last_error, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            RECONCILIATION_COLUMNS
        );
        let row = sqlx::query_as::<_, ReconciliationRow>(&sql)
            .bind(entry.id)
            .bind(entry.owner_id)
            .bind(entry.invoice_id)
            .bind(entry.kind.as_str())
            .bind(entry.state.as_str())
            .bind(entry.amount)
            .bind(&entry.idempotency_key)
            .bind(&entry.authorization_id)
            .bind(entry.attempts)
            .bind(&entry.last_error)
            .bind(entry.created_at)
            .bind(entry.updated_at)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err("Failed to enqueue reconciliation"))?;

        Ok(ReconciliationEntry::from(row))
    }

    #[instrument(skip(self), fields(owner_id = %owner_id))]
    async fn list_reconciliations(
        &self,
        owner_id: Uuid,
    ) -> Result<Vec<ReconciliationEntry>, DocumentError> {
        let sql = format!(
            "SELECT {} FROM payment_reconciliations WHERE owner_id = $1 ORDER BY created_at DESC",
            RECONCILIATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ReconciliationRow>(&sql)
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to list reconciliations"))?;

        Ok(rows.into_iter().map(ReconciliationEntry::from).collect())
    }

    #[instrument(skip(self))]
    async fn pending_reconciliations(
        &self,
        limit: usize,
    ) -> Result<Vec<ReconciliationEntry>, DocumentError> {
        let sql = format!(
            "SELECT {} FROM payment_reconciliations WHERE state = 'pending' \
             ORDER BY created_at LIMIT $1",
            RECONCILIATION_COLUMNS
        );
        let rows = sqlx::query_as::<_, ReconciliationRow>(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err("Failed to list pending reconciliations"))?;

        Ok(rows.into_iter().map(ReconciliationEntry::from).collect())
    }

    #[instrument(skip(self, entry), fields(reconciliation_id = %entry.id))]
    async fn update_reconciliation(
        &self,
        entry: &ReconciliationEntry,
    ) -> Result<(), DocumentError> {
        let result = sqlx::query(
            r#"
            UPDATE payment_reconciliations
            SET state = $2, authorization_id = $3, attempts = $4, last_error = $5,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(entry.id)
        .bind(entry.state.as_str())
        .bind(&entry.authorization_id)
        .bind(entry.attempts)
        .bind(&entry.last_error)
        .execute(&self.pool)
        .await
        .map_err(db_err("Failed to update reconciliation"))?;

        if result.rows_affected() == 0 {
            return Err(DocumentError::NotFound("Reconciliation"));
        }
        Ok(())
    }
}
