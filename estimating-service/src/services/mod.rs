pub mod clients;
pub mod estimates;
pub mod gateway;
pub mod invoices;
pub mod jobs;
pub mod metrics;
pub mod notifications;
pub mod payments;
pub mod reconciler;
pub mod sanitizer;
pub mod store;
pub mod tokens;
