//! Domain models for estimating-service.

mod client;
mod estimate;
mod invoice;
mod job;
mod line_item;
mod reconciliation;

pub use client::{Client, CreateClientInput, UpdateClientInput};
pub use estimate::{
    CreateEstimateInput, Estimate, EstimateDraft, EstimateStatus, EstimateView,
    RejectEstimateInput, SignEstimateInput, UpdateEstimateInput,
};
pub use invoice::{
    ConvertEstimateInput, CreateInvoiceInput, Invoice, InvoiceDraft, InvoiceStatus, InvoiceView,
    PaymentEntry, RecordPaymentInput, UpdateInvoiceInput,
};
pub use job::{DashboardSummary, Job, JobStatus};
pub use line_item::{round_money, subtotal, total_with_tax, LineItem};
pub use reconciliation::{ReconciliationEntry, ReconciliationKind, ReconciliationState};
