//! Payment-processor collaborator.
//!
//! Every authorization carries an idempotency key derived from the invoice,
//! the amount and a client nonce, so retrying a call can never charge twice.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use service_core::retry::Retryable;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::PaymentConfig;

/// `hex(sha256("{invoice_id}|{amount}|{nonce}"))`.
pub fn idempotency_key(invoice_id: Uuid, amount: Decimal, nonce: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{}|{}|{}", invoice_id, amount.normalize(), nonce).as_bytes());
    hex::encode(hasher.finalize())
}

#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationRequest {
    pub amount: Decimal,
    pub currency: String,
    pub payment_method: serde_json::Value,
    pub description: String,
    #[serde(skip)]
    pub idempotency_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    Authorized { authorization_id: String },
    Declined { reason: String },
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Processor returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl Retryable for ProcessorError {
    fn is_transient(&self) -> bool {
        matches!(
            self,
            ProcessorError::Transport(_) | ProcessorError::Server { .. }
        )
    }
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationOutcome, ProcessorError>;

    /// What happened to an earlier authorization. `None` if the processor
    /// never saw the key.
    async fn lookup(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<AuthorizationOutcome>, ProcessorError>;
}

/// Wire shape of an authorization returned by the processor.
#[derive(Debug, Deserialize)]
struct AuthorizationResponse {
    id: String,
    status: String,
    #[serde(default)]
    decline_reason: Option<String>,
}

impl AuthorizationResponse {
    fn into_outcome(self) -> Result<AuthorizationOutcome, ProcessorError> {
        match self.status.as_str() {
            "authorized" | "succeeded" | "captured" => Ok(AuthorizationOutcome::Authorized {
                authorization_id: self.id,
            }),
            "declined" | "failed" => Ok(AuthorizationOutcome::Declined {
                reason: self
                    .decline_reason
                    .unwrap_or_else(|| "declined by processor".to_string()),
            }),
            other => Err(ProcessorError::Server {
                status: 200,
                body: format!("unexpected authorization status '{}'", other),
            }),
        }
    }
}

#[derive(Debug, Deserialize)]
struct DeclineBody {
    #[serde(default)]
    decline_reason: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

/// JSON-over-HTTP processor client.
#[derive(Clone)]
pub struct HttpPaymentProcessor {
    client: Client,
    config: PaymentConfig,
}

impl HttpPaymentProcessor {
    pub fn new(config: PaymentConfig) -> Result<Self, ProcessorError> {
        let client = Client::builder()
            .timeout(config.timeout())
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ProcessorError::Configuration(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn is_configured(&self) -> bool {
        !self.config.api_key.expose_secret().is_empty()
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base_url.trim_end_matches('/'), path)
    }
}

fn transport(err: reqwest::Error) -> ProcessorError {
    ProcessorError::Transport(err.to_string())
}

#[async_trait]
impl PaymentProcessor for HttpPaymentProcessor {
    #[instrument(skip(self, request), fields(amount = %request.amount))]
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationOutcome, ProcessorError> {
        let response = self
            .client
            .post(self.url("/authorizations"))
            .bearer_auth(self.config.api_key.expose_secret())
            .header("Idempotency-Key", &request.idempotency_key)
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        let body = response.text().await.map_err(transport)?;
        debug!(status = %status, "Processor authorize response");

        if status.is_success() {
            let parsed: AuthorizationResponse = serde_json::from_str(&body).map_err(|e| {
                ProcessorError::Server {
                    status: status.as_u16(),
                    body: format!("malformed response: {}", e),
                }
            })?;
            let outcome = parsed.into_outcome()?;
            if let AuthorizationOutcome::Authorized { authorization_id } = &outcome {
                info!(authorization_id = %authorization_id, "Payment authorized");
            }
            return Ok(outcome);
        }

        match status {
            StatusCode::PAYMENT_REQUIRED => {
                let reason = serde_json::from_str::<DeclineBody>(&body)
                    .ok()
                    .and_then(|b| b.decline_reason.or(b.message))
                    .unwrap_or_else(|| "declined by processor".to_string());
                Ok(AuthorizationOutcome::Declined { reason })
            }
            s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                Err(ProcessorError::Server {
                    status: s.as_u16(),
                    body,
                })
            }
            s => {
                warn!(status = %s, "Processor rejected authorization request");
                Err(ProcessorError::Rejected(format!("{}: {}", s, body)))
            }
        }
    }

    #[instrument(skip(self, idempotency_key))]
    async fn lookup(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<AuthorizationOutcome>, ProcessorError> {
        let response = self
            .client
            .get(self.url(&format!("/authorizations/{}", idempotency_key)))
            .bearer_auth(self.config.api_key.expose_secret())
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body = response.text().await.map_err(transport)?;
        if !status.is_success() {
            return Err(ProcessorError::Server {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AuthorizationResponse =
            serde_json::from_str(&body).map_err(|e| ProcessorError::Server {
                status: status.as_u16(),
                body: format!("malformed response: {}", e),
            })?;
        parsed.into_outcome().map(Some)
    }
}

/// How the mock answers `authorize`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    Approve,
    Decline(String),
    /// Transient failure on every call, lookups included.
    Unavailable,
    /// Takes the money, then never answers.
    Hang,
}

/// In-process processor used in development and tests.
pub struct MockPaymentProcessor {
    behavior: Mutex<MockBehavior>,
    calls: AtomicU64,
    authorizations: DashMap<String, AuthorizationOutcome>,
}

impl Default for MockPaymentProcessor {
    fn default() -> Self {
        Self::new(MockBehavior::Approve)
    }
}

impl MockPaymentProcessor {
    pub fn new(behavior: MockBehavior) -> Self {
        Self {
            behavior: Mutex::new(behavior),
            calls: AtomicU64::new(0),
            authorizations: DashMap::new(),
        }
    }

    pub fn set_behavior(&self, behavior: MockBehavior) {
        if let Ok(mut current) = self.behavior.lock() {
            *current = behavior;
        }
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn behavior(&self) -> MockBehavior {
        self.behavior
            .lock()
            .map(|b| b.clone())
            .unwrap_or(MockBehavior::Unavailable)
    }

    fn approve(&self, key: &str) -> AuthorizationOutcome {
        self.authorizations
            .entry(key.to_string())
            .or_insert_with(|| AuthorizationOutcome::Authorized {
                authorization_id: format!("auth_{}", &key[..key.len().min(16)]),
            })
            .clone()
    }
}

#[async_trait]
impl PaymentProcessor for MockPaymentProcessor {
    async fn authorize(
        &self,
        request: &AuthorizationRequest,
    ) -> Result<AuthorizationOutcome, ProcessorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(existing) = self.authorizations.get(&request.idempotency_key) {
            return Ok(existing.value().clone());
        }

        match self.behavior() {
            MockBehavior::Approve => Ok(self.approve(&request.idempotency_key)),
            MockBehavior::Decline(reason) => {
                let outcome = AuthorizationOutcome::Declined { reason };
                self.authorizations
                    .insert(request.idempotency_key.clone(), outcome.clone());
                Ok(outcome)
            }
            MockBehavior::Unavailable => Err(ProcessorError::Transport(
                "mock processor unavailable".to_string(),
            )),
            MockBehavior::Hang => {
                self.approve(&request.idempotency_key);
                std::future::pending::<()>().await;
                Err(ProcessorError::Transport("unreachable".to_string()))
            }
        }
    }

    async fn lookup(
        &self,
        idempotency_key: &str,
    ) -> Result<Option<AuthorizationOutcome>, ProcessorError> {
        if self.behavior() == MockBehavior::Unavailable {
            return Err(ProcessorError::Transport(
                "mock processor unavailable".to_string(),
            ));
        }
        Ok(self
            .authorizations
            .get(idempotency_key)
            .map(|o| o.value().clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(key: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            amount: Decimal::from(50),
            currency: "USD".to_string(),
            payment_method: serde_json::json!({"type": "card"}),
            description: "INV-1".to_string(),
            idempotency_key: key.to_string(),
        }
    }

    #[test]
    fn idempotency_key_ignores_amount_scale() {
        let id = Uuid::new_v4();
        let a = idempotency_key(id, "200".parse().unwrap(), "n1");
        let b = idempotency_key(id, "200.00".parse().unwrap(), "n1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, idempotency_key(id, Decimal::from(200), "n2"));
    }

    #[tokio::test]
    async fn mock_replays_by_key() {
        let processor = MockPaymentProcessor::default();
        let first = processor.authorize(&request("k1")).await.unwrap();
        processor.set_behavior(MockBehavior::Decline("no".to_string()));
        let second = processor.authorize(&request("k1")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(processor.call_count(), 2);
    }

    #[tokio::test]
    async fn mock_lookup_sees_hung_authorization() {
        let processor = std::sync::Arc::new(MockPaymentProcessor::new(MockBehavior::Hang));
        let result = tokio::time::timeout(
            Duration::from_millis(20),
            processor.authorize(&request("k2")),
        )
        .await;
        assert!(result.is_err());
        assert!(matches!(
            processor.lookup("k2").await.unwrap(),
            Some(AuthorizationOutcome::Authorized { .. })
        ));
    }
}
