//! Outbound notifications.
//!
//! The lifecycle only needs "send this template to this address" and a
//! success/failure signal. Delivery is SMTP via `lettre`, or a mock that
//! records what would have been sent.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Mailbox},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use rust_decimal::Decimal;
use secrecy::ExposeSecret;
use service_core::retry::{retry_call, RetryConfig, Retryable};
use thiserror::Error;
use tracing::{info, instrument};

use crate::config::SmtpConfig;
use crate::error::DocumentError;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid recipient: {0}")]
    InvalidRecipient(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Send error: {0}")]
    SendFailed(String),
}

impl Retryable for NotifyError {
    fn is_transient(&self) -> bool {
        matches!(self, NotifyError::Connection(_) | NotifyError::SendFailed(_))
    }
}

/// Message templates with the data each one needs.
#[derive(Debug, Clone, PartialEq)]
pub enum Template {
    EstimateSent {
        client_name: String,
        project_name: String,
        total: Decimal,
        link: String,
    },
    InvoiceSent {
        client_name: String,
        invoice_number: String,
        project_name: String,
        balance_due: Decimal,
        link: String,
    },
    EstimateSigned {
        signer_name: String,
        project_name: String,
        total: Decimal,
    },
}

impl Template {
    pub fn kind(&self) -> &'static str {
        match self {
            Template::EstimateSent { .. } => "estimate_sent",
            Template::InvoiceSent { .. } => "invoice_sent",
            Template::EstimateSigned { .. } => "estimate_signed",
        }
    }

    /// Subject and plain-text body.
    pub fn render(&self) -> (String, String) {
        match self {
            Template::EstimateSent {
                client_name,
                project_name,
                total,
                link,
            } => (
                format!("Your estimate for {}", project_name),
                format!(
                    "Hi {},\n\nYour estimate for {} is ready. Total: {}.\n\n\
                     Review and sign it here: {}\n",
                    client_name, project_name, total, link
                ),
            ),
            Template::InvoiceSent {
                client_name,
                invoice_number,
                project_name,
                balance_due,
                link,
            } => (
                format!("Invoice {} for {}", invoice_number, project_name),
                format!(
                    "Hi {},\n\nInvoice {} for {} has been issued. Balance due: {}.\n\n\
                     View and pay it here: {}\n",
                    client_name, invoice_number, project_name, balance_due, link
                ),
            ),
            Template::EstimateSigned {
                signer_name,
                project_name,
                total,
            } => (
                format!("Estimate for {} approved", project_name),
                format!(
                    "Thank you {}.\n\nYou approved the estimate for {} (total {}). \
                     We will be in touch about next steps.\n",
                    signer_name, project_name, total
                ),
            ),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub to: String,
    pub template: Template,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

pub struct SmtpNotifier {
    config: SmtpConfig,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    pub fn new(config: SmtpConfig) -> Result<Self, NotifyError> {
        let creds = Credentials::new(
            config.user.clone(),
            config.password.expose_secret().clone(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
            .map_err(|e| NotifyError::Configuration(format!("Failed to create SMTP relay: {}", e)))?
            .port(config.port)
            .credentials(creds)
            .build();

        Ok(Self { config, transport })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    #[instrument(skip(self, notification), fields(template = notification.template.kind()))]
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let from: Mailbox = format!("{} <{}>", self.config.from_name, self.config.from_email)
            .parse()
            .map_err(|e| NotifyError::Configuration(format!("Invalid from address: {}", e)))?;
        let to: Mailbox = notification
            .to
            .parse()
            .map_err(|e| NotifyError::InvalidRecipient(format!("{}", e)))?;

        let (subject, body) = notification.template.render();
        let message = Message::builder()
            .from(from)
            .to(to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body)
            .map_err(|e| NotifyError::Configuration(format!("Failed to build message: {}", e)))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| NotifyError::SendFailed(format!("Failed to send email: {}", e)))?;

        info!("Email sent successfully");
        Ok(())
    }
}

/// Records notifications instead of delivering them.
#[derive(Default)]
pub struct MockNotifier {
    sent_count: AtomicU64,
    fail: AtomicBool,
    sent: Mutex<Vec<Notification>>,
}

impl MockNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail permanently.
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn sent_count(&self) -> u64 {
        self.sent_count.load(Ordering::SeqCst)
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent
            .lock()
            .map(|sent| sent.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Notifier for MockNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(NotifyError::InvalidRecipient(
                "mock notifier configured to fail".to_string(),
            ));
        }

        self.sent_count.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
        info!(
            template = notification.template.kind(),
            "Mock notification recorded"
        );
        Ok(())
    }
}

/// Builds links and sends with retry on transient failures.
#[derive(Clone)]
pub struct NotificationService {
    notifier: Arc<dyn Notifier>,
    retry: RetryConfig,
    public_base_url: String,
}

impl NotificationService {
    pub fn new(notifier: Arc<dyn Notifier>, retry: RetryConfig, public_base_url: String) -> Self {
        Self {
            notifier,
            retry,
            public_base_url,
        }
    }

    pub fn estimate_link(&self, token: &str) -> String {
        format!("{}/view-estimate/{}", self.public_base_url, token)
    }

    pub fn invoice_link(&self, token: &str) -> String {
        format!("{}/view-invoice/{}", self.public_base_url, token)
    }

    pub async fn send(&self, to: &str, template: Template) -> Result<(), DocumentError> {
        let notification = Notification {
            to: to.to_string(),
            template,
        };
        let operation = notification.template.kind();

        retry_call(&self.retry, operation, || self.notifier.send(&notification))
            .await
            .map_err(|e| DocumentError::Upstream(format!("Notification failed: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_template_carries_the_link() {
        let template = Template::EstimateSent {
            client_name: "Ana".to_string(),
            project_name: "Roof".to_string(),
            total: Decimal::from(900),
            link: "https://app.example.com/view-estimate/abc".to_string(),
        };
        let (subject, body) = template.render();
        assert!(subject.contains("Roof"));
        assert!(body.contains("https://app.example.com/view-estimate/abc"));
        assert_eq!(template.kind(), "estimate_sent");
    }

    #[tokio::test]
    async fn service_surfaces_permanent_failure_as_upstream() {
        let mock = Arc::new(MockNotifier::new());
        mock.set_failing(true);
        let service = NotificationService::new(
            mock.clone(),
            RetryConfig::no_retry(),
            "https://app.example.com".to_string(),
        );

        let result = service
            .send(
                "client@example.com",
                Template::EstimateSigned {
                    signer_name: "Ana".to_string(),
                    project_name: "Roof".to_string(),
                    total: Decimal::from(900),
                },
            )
            .await;

        assert!(matches!(result, Err(DocumentError::Upstream(_))));
        assert_eq!(mock.sent_count(), 0);
    }

    #[test]
    fn links_use_public_base_url() {
        let service = NotificationService::new(
            Arc::new(MockNotifier::new()),
            RetryConfig::no_retry(),
            "https://app.example.com".to_string(),
        );
        assert_eq!(
            service.invoice_link("tok"),
            "https://app.example.com/view-invoice/tok"
        );
    }
}
