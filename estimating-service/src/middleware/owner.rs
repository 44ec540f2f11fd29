//! Owner context for authenticated routes.
//!
//! The owner id is set by the authenticating proxy in front of this service.
//! Public token routes never use this extractor.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;
use uuid::Uuid;

pub const OWNER_ID_HEADER: &str = "x-owner-id";

/// The business owner every owner-side operation is scoped to.
#[derive(Debug, Clone, Copy)]
pub struct OwnerContext {
    pub owner_id: Uuid,
}

#[async_trait]
impl<S> FromRequestParts<S> for OwnerContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(OWNER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized(anyhow::anyhow!("Missing owner identity")))?;

        let owner_id = Uuid::parse_str(raw.trim())
            .map_err(|_| AppError::Unauthorized(anyhow::anyhow!("Invalid owner identity")))?;

        tracing::Span::current().record("owner_id", raw);

        Ok(OwnerContext { owner_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::{Request, StatusCode};

    async fn extract(header: Option<&str>) -> Result<OwnerContext, AppError> {
        let mut builder = Request::builder().uri("/estimates");
        if let Some(value) = header {
            builder = builder.header(OWNER_ID_HEADER, value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        OwnerContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn parses_owner_header() {
        let id = Uuid::new_v4();
        let ctx = extract(Some(&id.to_string())).await.unwrap();
        assert_eq!(ctx.owner_id, id);
    }

    #[tokio::test]
    async fn missing_or_malformed_owner_is_unauthorized() {
        for header in [None, Some("not-a-uuid")] {
            let err = extract(header).await.unwrap_err();
            assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        }
    }
}
