#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use estimating_service::config::{
    EstimatingConfig, PaymentConfig, ProcessorKind, SmtpConfig, WorkerConfig,
};
use estimating_service::services::notifications::MockNotifier;
use estimating_service::services::payments::MockPaymentProcessor;
use estimating_service::{AppState, Application, Collaborators};
use reqwest::{Method, RequestBuilder};
use rust_decimal::Decimal;
use secrecy::Secret;
use serde_json::{json, Value};
use service_core::config::Config as CoreConfig;
use uuid::Uuid;

pub struct TestApp {
    pub address: String,
    pub port: u16,
    pub owner_id: Uuid,
    pub client: reqwest::Client,
    pub processor: Arc<MockPaymentProcessor>,
    pub notifier: Arc<MockNotifier>,
    pub state: AppState,
}

pub fn test_config() -> EstimatingConfig {
    EstimatingConfig {
        common: CoreConfig {
            port: 0, // Random port
            log_level: "warn".to_string(),
            otlp_endpoint: None,
        },
        service_name: "estimating-service-test".to_string(),
        public_base_url: "https://estimates.test".to_string(),
        database: None,
        payment: PaymentConfig {
            processor: ProcessorKind::Mock,
            api_base_url: "http://127.0.0.1:1".to_string(),
            api_key: Secret::new(String::new()),
            timeout_ms: 300,
            max_retries: 0,
            currency: "USD".to_string(),
        },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 587,
            user: String::new(),
            password: Secret::new(String::new()),
            from_email: "noreply@estimates.test".to_string(),
            from_name: "Estimates".to_string(),
            enabled: false,
        },
        workers: WorkerConfig {
            event_queue_size: 64,
            // Tests drive reconciliation explicitly
            reconcile_interval_secs: 3600,
            reconcile_batch_size: 50,
            reconcile_max_attempts: 5,
        },
    }
}

impl TestApp {
    pub async fn spawn() -> Self {
        let processor = Arc::new(MockPaymentProcessor::default());
        let notifier = Arc::new(MockNotifier::new());

        let app = Application::build_with(
            test_config(),
            Collaborators {
                processor: processor.clone(),
                notifier: notifier.clone(),
            },
        )
        .await
        .expect("Failed to build test application");

        let port = app.port();
        let state = app.state();
        let address = format!("http://127.0.0.1:{}", port);

        tokio::spawn(async move {
            app.run_until_stopped().await.ok();
        });

        // Wait for the server to be ready by polling the health endpoint
        let client = reqwest::Client::new();
        let health_url = format!("{}/health", address);
        for _ in 0..50 {
            if client.get(&health_url).send().await.is_ok() {
                break;
            }
            tokio::time::sleep(tokio::time::Duration::from_millis(50)).await;
        }

        TestApp {
            address,
            port,
            owner_id: Uuid::new_v4(),
            client,
            processor,
            notifier,
            state,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.address, path)
    }

    /// Request carrying this app's owner identity.
    pub fn owner(&self, method: Method, path: &str) -> RequestBuilder {
        self.as_owner(self.owner_id, method, path)
    }

    pub fn as_owner(&self, owner_id: Uuid, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header("x-owner-id", owner_id.to_string())
    }

    /// Request with no owner identity, as an end client would send it.
    pub fn public(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path))
    }

    pub async fn create_estimate(&self, body: Value) -> Value {
        let response = self
            .owner(Method::POST, "/estimates")
            .json(&body)
            .send()
            .await
            .expect("Failed to create estimate");
        assert_eq!(response.status().as_u16(), 201);
        response.json().await.expect("Invalid estimate body")
    }

    /// A sent estimate, ready for the client to sign.
    pub async fn sent_estimate(&self) -> Value {
        let estimate = self.create_estimate(sample_estimate()).await;
        let response = self
            .owner(
                Method::POST,
                &format!("/estimates/{}/send", estimate["id"].as_str().unwrap()),
            )
            .send()
            .await
            .expect("Failed to send estimate");
        assert_eq!(response.status().as_u16(), 200);
        response.json().await.expect("Invalid estimate body")
    }

    pub async fn create_invoice(&self, body: Value) -> Value {
        let response = self
            .owner(Method::POST, "/invoices")
            .json(&body)
            .send()
            .await
            .expect("Failed to create invoice");
        assert_eq!(response.status().as_u16(), 201);
        response.json().await.expect("Invalid invoice body")
    }

    pub async fn sign(&self, token: &str, name: &str, email: &str) -> reqwest::Response {
        self.public(Method::POST, &format!("/view-estimate/{}/sign", token))
            .json(&json!({
                "signer_name": name,
                "signer_email": email,
                "signature": "data:image/png;base64,iVBORw0KGgo="
            }))
            .send()
            .await
            .expect("Failed to sign estimate")
    }

    pub async fn pay(&self, token: &str, amount: &str, nonce: &str) -> reqwest::Response {
        self.public(Method::POST, &format!("/view-invoice/{}/pay", token))
            .json(&json!({
                "amount": amount,
                "payment_method": { "type": "card", "token": "tok_test" },
                "nonce": nonce
            }))
            .send()
            .await
            .expect("Failed to pay invoice")
    }
}

pub fn sample_estimate() -> Value {
    json!({
        "client_name": "Jordan Lee",
        "client_email": "jordan@example.com",
        "project_name": "Kitchen repaint",
        "line_items": [
            { "description": "Paint", "quantity": 2, "rate": 50 },
            { "description": "", "quantity": 1, "rate": 10 }
        ],
        "tax_rate": 8
    })
}

pub fn sample_invoice(rate: u32) -> Value {
    json!({
        "client_name": "Jordan Lee",
        "client_email": "jordan@example.com",
        "project_name": "Fence",
        "line_items": [{ "description": "Fence panels", "quantity": 1, "rate": rate }],
        "tax_rate": 0
    })
}

/// Money fields are decimal strings on the wire.
pub fn money(value: &Value) -> Decimal {
    match value {
        Value::String(s) => Decimal::from_str(s).expect("Invalid decimal string"),
        other => Decimal::from_str(&other.to_string()).expect("Invalid decimal"),
    }
}

pub fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}
