//! Domain errors for the document lifecycle.
//!
//! Owner-facing handlers convert with `From<DocumentError> for AppError`, which
//! keeps details. The public gateway converts with [`DocumentError::into_public`].

use service_core::error::AppError;
use service_core::retry::Retryable;
use thiserror::Error;

/// Body rendered for every not-found on the public path.
pub const PUBLIC_NOT_FOUND: &str = "Document not found";

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("{0}")]
    Validation(String),

    #[error("Document has no valid line items")]
    EmptyDocument,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("Payment declined: {0}")]
    Declined(String),

    #[error("Upstream failure: {0}")]
    Upstream(String),

    #[error("Integrity check failed: {0}")]
    Integrity(String),

    #[error("Storage error: {0}")]
    Storage(#[source] anyhow::Error),
}

impl DocumentError {
    pub fn validation(msg: impl Into<String>) -> Self {
        DocumentError::Validation(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        DocumentError::Conflict(msg.into())
    }

    pub fn storage(err: impl Into<anyhow::Error>) -> Self {
        DocumentError::Storage(err.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, DocumentError::NotFound(_))
    }

    /// Conversion for token holders.
    ///
    /// Not-found collapses to one body regardless of cause. Conflict and
    /// integrity failures are logged here and rendered generically.
    pub fn into_public(self) -> AppError {
        match self {
            DocumentError::NotFound(_) => AppError::NotFound(anyhow::anyhow!(PUBLIC_NOT_FOUND)),
            DocumentError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            DocumentError::EmptyDocument => {
                AppError::BadRequest(anyhow::anyhow!("Document has no valid line items"))
            }
            DocumentError::Conflict(msg) => {
                tracing::error!(reason = %msg, "Conflict on public document path");
                AppError::Conflict(anyhow::anyhow!("Request could not be completed"))
            }
            DocumentError::Integrity(msg) => {
                tracing::error!(reason = %msg, "Integrity failure on public document path");
                AppError::InternalError(anyhow::anyhow!("integrity failure"))
            }
            DocumentError::Declined(_) => {
                AppError::PaymentRequired(anyhow::anyhow!("Payment was declined"))
            }
            DocumentError::Upstream(msg) => AppError::BadGateway(msg),
            DocumentError::Storage(err) => AppError::DatabaseError(err),
        }
    }
}

impl Retryable for DocumentError {
    fn is_transient(&self) -> bool {
        matches!(self, DocumentError::Storage(_))
    }
}

impl From<validator::ValidationErrors> for DocumentError {
    fn from(err: validator::ValidationErrors) -> Self {
        DocumentError::Validation(err.to_string())
    }
}

impl From<sqlx::Error> for DocumentError {
    fn from(err: sqlx::Error) -> Self {
        DocumentError::Storage(err.into())
    }
}

impl From<DocumentError> for AppError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::Validation(msg) => AppError::BadRequest(anyhow::anyhow!(msg)),
            DocumentError::EmptyDocument => {
                AppError::BadRequest(anyhow::anyhow!("Document has no valid line items"))
            }
            DocumentError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            DocumentError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            DocumentError::Declined(msg) => AppError::PaymentRequired(anyhow::anyhow!(msg)),
            DocumentError::Upstream(msg) => AppError::BadGateway(msg),
            DocumentError::Integrity(msg) => {
                tracing::error!(reason = %msg, "Integrity failure");
                AppError::InternalError(anyhow::anyhow!("Integrity check failed: {}", msg))
            }
            DocumentError::Storage(err) => AppError::DatabaseError(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn public_not_found_hides_the_document_kind() {
        let estimate = DocumentError::NotFound("Estimate").into_public();
        let invoice = DocumentError::NotFound("Invoice").into_public();
        assert_eq!(estimate.to_string(), invoice.to_string());
        assert_eq!(estimate.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn public_conflict_is_generic() {
        let err = DocumentError::conflict("signed by alice@example.com").into_public();
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert!(!err.to_string().contains("alice"));
    }

    #[test]
    fn owner_conflict_keeps_details() {
        let err: AppError = DocumentError::conflict("Invoice is already paid").into();
        assert!(err.to_string().contains("already paid"));
    }

    #[test]
    fn declined_is_payment_required() {
        let err: AppError = DocumentError::Declined("insufficient funds".into()).into();
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);
    }
}
