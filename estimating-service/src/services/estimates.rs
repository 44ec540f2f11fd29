//! Estimate lifecycle: `draft -> sent -> approved | rejected`.
//!
//! Owners create, edit, send and delete. Approval and rejection are only
//! reachable through the public gateway, keyed by view token.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument, warn};
use uuid::Uuid;
use validator::Validate;

use super::jobs::{EstimateEvent, EventPublisher};
use super::metrics::record_estimate_event;
use super::notifications::{NotificationService, Template};
use super::sanitizer::{normalize_deposit, normalize_tax_rate, price, sanitize};
use super::store::{Change, DocumentKey, DocumentStore};
use crate::error::DocumentError;
use crate::models::{
    CreateEstimateInput, Estimate, EstimateDraft, EstimateStatus, RejectEstimateInput,
    SignEstimateInput, UpdateEstimateInput,
};

#[derive(Clone)]
pub struct EstimateService {
    store: Arc<dyn DocumentStore>,
    events: EventPublisher,
    notifications: NotificationService,
}

fn trimmed(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl EstimateService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        events: EventPublisher,
        notifications: NotificationService,
    ) -> Self {
        Self {
            store,
            events,
            notifications,
        }
    }

    /// Sanitize, price and persist a new draft, then publish `Created`.
    #[instrument(skip(self, input), fields(owner_id = %owner_id))]
    pub async fn create(
        &self,
        owner_id: Uuid,
        input: CreateEstimateInput,
    ) -> Result<Estimate, DocumentError> {
        input.validate()?;

        let line_items = sanitize(&input.line_items)?;
        if line_items.is_empty() {
            return Err(DocumentError::EmptyDocument);
        }
        let tax_rate = normalize_tax_rate(input.tax_rate)?;
        let deposit = normalize_deposit(input.deposit)?;
        let total = price(&line_items, tax_rate)?;

        let estimate = self
            .store
            .insert_estimate(EstimateDraft {
                owner_id,
                client_name: input.client_name.trim().to_string(),
                client_email: trimmed(input.client_email),
                client_phone: trimmed(input.client_phone),
                project_name: input.project_name.trim().to_string(),
                line_items,
                tax_rate,
                deposit,
                total,
            })
            .await?;

        record_estimate_event("created");
        self.events.publish(EstimateEvent::created(&estimate));

        info!(estimate_id = %estimate.id, total = %estimate.total, "Estimate created");
        Ok(estimate)
    }

    pub async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Estimate, DocumentError> {
        self.store
            .get_estimate(DocumentKey::owned(owner_id, id))
            .await
    }

    pub async fn list(&self, owner_id: Uuid) -> Result<Vec<Estimate>, DocumentError> {
        self.store.list_estimates(owner_id).await
    }

    /// Owner edit. Never changes status; approved estimates are read-only.
    #[instrument(skip(self, input), fields(owner_id = %owner_id, estimate_id = %id))]
    pub async fn update(
        &self,
        owner_id: Uuid,
        id: Uuid,
        input: UpdateEstimateInput,
    ) -> Result<Estimate, DocumentError> {
        input.validate()?;

        let line_items = match &input.line_items {
            Some(raw) => {
                let items = sanitize(raw)?;
                if items.is_empty() {
                    return Err(DocumentError::EmptyDocument);
                }
                Some(items)
            }
            None => None,
        };
        let tax_rate = input.tax_rate.map(normalize_tax_rate).transpose()?;
        let deposit = input.deposit.map(normalize_deposit).transpose()?;

        let (estimate, _) = self
            .store
            .mutate_estimate(
                DocumentKey::owned(owner_id, id),
                Box::new(move |estimate: &mut Estimate| {
                    if estimate.status == EstimateStatus::Approved {
                        return Err(DocumentError::conflict(
                            "Approved estimates are read-only",
                        ));
                    }

                    if let Some(name) = input.client_name {
                        estimate.client_name = name.trim().to_string();
                    }
                    if input.client_email.is_some() {
                        estimate.client_email = trimmed(input.client_email);
                    }
                    if input.client_phone.is_some() {
                        estimate.client_phone = trimmed(input.client_phone);
                    }
                    if let Some(project) = input.project_name {
                        estimate.project_name = project.trim().to_string();
                    }
                    if let Some(items) = line_items {
                        estimate.line_items = items;
                    }
                    if let Some(rate) = tax_rate {
                        estimate.tax_rate = rate;
                    }
                    if let Some(deposit) = deposit {
                        estimate.deposit = deposit;
                    }
                    estimate.total = price(&estimate.line_items, estimate.tax_rate)?;
                    Ok(Change::Changed)
                }),
            )
            .await?;

        self.events.publish(EstimateEvent::status_changed(&estimate));
        Ok(estimate)
    }

    /// Deletion is allowed in any state and never touches converted invoices.
    #[instrument(skip(self), fields(owner_id = %owner_id, estimate_id = %id))]
    pub async fn delete(&self, owner_id: Uuid, id: Uuid) -> Result<(), DocumentError> {
        self.store.delete_estimate(owner_id, id).await?;
        record_estimate_event("deleted");
        info!("Estimate deleted");
        Ok(())
    }

    /// Record dispatch. Requires a client email; allowed from draft or sent.
    #[instrument(skip(self), fields(owner_id = %owner_id, estimate_id = %id))]
    pub async fn mark_sent(&self, owner_id: Uuid, id: Uuid) -> Result<Estimate, DocumentError> {
        let (estimate, _) = self
            .store
            .mutate_estimate(
                DocumentKey::owned(owner_id, id),
                Box::new(|estimate: &mut Estimate| {
                    if estimate.status.is_terminal() {
                        return Err(DocumentError::conflict(format!(
                            "Cannot send an estimate that is {}",
                            estimate.status.as_str()
                        )));
                    }
                    if estimate.client_email.is_none() {
                        return Err(DocumentError::validation(
                            "Client email is required to send an estimate",
                        ));
                    }
                    estimate.status = EstimateStatus::Sent;
                    estimate.sent_at = Some(Utc::now());
                    Ok(Change::Changed)
                }),
            )
            .await?;

        record_estimate_event("sent");
        self.events.publish(EstimateEvent::status_changed(&estimate));
        Ok(estimate)
    }

    /// `mark_sent`, then email the client their link.
    ///
    /// The transition is recorded first so a failed delivery can be resent.
    pub async fn send(&self, owner_id: Uuid, id: Uuid) -> Result<Estimate, DocumentError> {
        let estimate = self.mark_sent(owner_id, id).await?;
        let to = estimate
            .client_email
            .clone()
            .ok_or_else(|| DocumentError::validation("Client email is required"))?;

        self.notifications
            .send(
                &to,
                Template::EstimateSent {
                    client_name: estimate.client_name.clone(),
                    project_name: estimate.project_name.clone(),
                    total: estimate.total,
                    link: self.notifications.estimate_link(&estimate.view_token),
                },
            )
            .await?;

        Ok(estimate)
    }

    /// Token lookup. Drafts are not visible to token holders.
    pub(crate) async fn get_by_token(&self, token: &str) -> Result<Estimate, DocumentError> {
        let estimate = self.store.get_estimate(DocumentKey::Token(token)).await?;
        if estimate.status == EstimateStatus::Draft {
            return Err(DocumentError::NotFound("Estimate"));
        }
        Ok(estimate)
    }

    /// Approve a sent estimate. Repeating with the same signer is a no-op.
    #[instrument(skip(self, token, input))]
    pub(crate) async fn sign(
        &self,
        token: &str,
        input: SignEstimateInput,
    ) -> Result<Estimate, DocumentError> {
        let input = SignEstimateInput {
            signer_name: input.signer_name.trim().to_string(),
            signer_email: input.signer_email.trim().to_string(),
            signature: input.signature.trim().to_string(),
        };
        input.validate()?;
        let SignEstimateInput {
            signer_name,
            signer_email,
            signature,
        } = input;

        let (estimate, change) = self
            .store
            .mutate_estimate(
                DocumentKey::Token(token),
                Box::new(move |estimate: &mut Estimate| match estimate.status {
                    EstimateStatus::Sent => {
                        estimate.status = EstimateStatus::Approved;
                        estimate.signed_at = Some(Utc::now());
                        estimate.signed_by_name = Some(signer_name);
                        estimate.signed_by_email = Some(signer_email);
                        estimate.signature_ref = Some(signature);
                        Ok(Change::Changed)
                    }
                    EstimateStatus::Approved => {
                        let same_name =
                            estimate.signed_by_name.as_deref() == Some(signer_name.as_str());
                        let same_email = estimate
                            .signed_by_email
                            .as_deref()
                            .is_some_and(|email| email.eq_ignore_ascii_case(&signer_email));
                        if same_name && same_email {
                            Ok(Change::Unchanged)
                        } else {
                            Err(DocumentError::conflict(
                                "Estimate was already signed by a different signer",
                            ))
                        }
                    }
                    EstimateStatus::Rejected => {
                        Err(DocumentError::conflict("Estimate was rejected"))
                    }
                    EstimateStatus::Draft => Err(DocumentError::NotFound("Estimate")),
                }),
            )
            .await?;

        if change == Change::Changed {
            record_estimate_event("signed");
            self.events.publish(EstimateEvent::status_changed(&estimate));
            info!(estimate_id = %estimate.id, "Estimate signed");
            self.notify_signed(&estimate);
        }

        Ok(estimate)
    }

    /// Reject a sent estimate. Repeating is a no-op.
    #[instrument(skip(self, token, input))]
    pub(crate) async fn reject(
        &self,
        token: &str,
        input: RejectEstimateInput,
    ) -> Result<Estimate, DocumentError> {
        input.validate()?;
        let reason = trimmed(input.reason);

        let (estimate, change) = self
            .store
            .mutate_estimate(
                DocumentKey::Token(token),
                Box::new(move |estimate: &mut Estimate| match estimate.status {
                    EstimateStatus::Sent => {
                        estimate.status = EstimateStatus::Rejected;
                        estimate.rejected_at = Some(Utc::now());
                        estimate.rejection_reason = reason;
                        Ok(Change::Changed)
                    }
                    EstimateStatus::Rejected => Ok(Change::Unchanged),
                    EstimateStatus::Approved => {
                        Err(DocumentError::conflict("Estimate was already approved"))
                    }
                    EstimateStatus::Draft => Err(DocumentError::NotFound("Estimate")),
                }),
            )
            .await?;

        if change == Change::Changed {
            record_estimate_event("rejected");
            self.events.publish(EstimateEvent::status_changed(&estimate));
            info!(estimate_id = %estimate.id, "Estimate rejected");
        }

        Ok(estimate)
    }

    /// Confirmation email after signing. Failures are logged only.
    fn notify_signed(&self, estimate: &Estimate) {
        let Some(to) = estimate
            .client_email
            .clone()
            .or_else(|| estimate.signed_by_email.clone())
        else {
            return;
        };
        let notifications = self.notifications.clone();
        let estimate_id = estimate.id;
        let template = Template::EstimateSigned {
            signer_name: estimate.signed_by_name.clone().unwrap_or_default(),
            project_name: estimate.project_name.clone(),
            total: estimate.total,
        };

        tokio::spawn(async move {
            if let Err(e) = notifications.send(&to, template).await {
                warn!(estimate_id = %estimate_id, error = %e, "Signed confirmation not delivered");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::notifications::MockNotifier;
    use crate::services::store::MemoryStore;
    use rust_decimal::Decimal;
    use serde_json::json;
    use service_core::retry::RetryConfig;

    fn service() -> (EstimateService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let (events, _rx) = EventPublisher::channel(16);
        let notifications = NotificationService::new(
            Arc::new(MockNotifier::new()),
            RetryConfig::no_retry(),
            "https://app.example.com".to_string(),
        );
        (
            EstimateService::new(store.clone(), events, notifications),
            store,
        )
    }

    fn input(items: serde_json::Value) -> CreateEstimateInput {
        CreateEstimateInput {
            client_name: "Lee".to_string(),
            client_email: Some("lee@example.com".to_string()),
            client_phone: None,
            project_name: "Bathroom".to_string(),
            line_items: items,
            tax_rate: Decimal::from(8),
            deposit: Decimal::ZERO,
        }
    }

    fn signer(name: &str, email: &str) -> SignEstimateInput {
        SignEstimateInput {
            signer_name: name.to_string(),
            signer_email: email.to_string(),
            signature: "data:image/png;base64,AAAA".to_string(),
        }
    }

    #[tokio::test]
    async fn create_prices_sanitized_items() {
        let (service, _) = service();
        let estimate = service
            .create(
                Uuid::new_v4(),
                input(json!([
                    {"description": "Paint", "quantity": 2, "rate": 50},
                    {"description": "", "quantity": 1, "rate": 10}
                ])),
            )
            .await
            .unwrap();

        assert_eq!(estimate.line_items.len(), 1);
        assert_eq!(estimate.total, Decimal::from(108));
        assert_eq!(estimate.status, EstimateStatus::Draft);
    }

    #[tokio::test]
    async fn create_rejects_totals_that_overflow() {
        let (service, store) = service();
        let owner = Uuid::new_v4();
        let err = service
            .create(
                owner,
                input(json!([
                    {"description": "Slab", "quantity": "50000000000000000000000000000", "rate": 1},
                    {"description": "Slab", "quantity": "50000000000000000000000000000", "rate": 1}
                ])),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, DocumentError::Validation(_)));
        assert!(store.list_estimates(owner).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn create_without_valid_items_is_empty_document() {
        let (service, _) = service();
        let err = service
            .create(Uuid::new_v4(), input(json!([{"description": "", "quantity": 1}])))
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::EmptyDocument));
    }

    #[tokio::test]
    async fn edits_keep_token_and_status() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let created = service
            .create(owner, input(json!([{"description": "A", "quantity": 1, "rate": 10}])))
            .await
            .unwrap();
        service.mark_sent(owner, created.id).await.unwrap();

        let updated = service
            .update(
                owner,
                created.id,
                UpdateEstimateInput {
                    line_items: Some(json!([{"description": "B", "quantity": 2, "rate": 10}])),
                    tax_rate: Some(Decimal::ZERO),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.view_token, created.view_token);
        assert_eq!(updated.status, EstimateStatus::Sent);
        assert_eq!(updated.total, Decimal::from(20));
    }

    #[tokio::test]
    async fn mark_sent_requires_client_email() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let mut create = input(json!([{"description": "A", "quantity": 1, "rate": 10}]));
        create.client_email = None;
        let created = service.create(owner, create).await.unwrap();

        let err = service.mark_sent(owner, created.id).await.unwrap_err();
        assert!(matches!(err, DocumentError::Validation(_)));
    }

    #[tokio::test]
    async fn sign_is_idempotent_for_same_signer_only() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let created = service
            .create(owner, input(json!([{"description": "A", "quantity": 1, "rate": 10}])))
            .await
            .unwrap();
        service.mark_sent(owner, created.id).await.unwrap();

        let first = service
            .sign(&created.view_token, signer("Lee Park", "lee@example.com"))
            .await
            .unwrap();
        assert_eq!(first.status, EstimateStatus::Approved);

        let again = service
            .sign(&created.view_token, signer("Lee Park", "LEE@example.com "))
            .await
            .unwrap();
        assert_eq!(again.signed_at, first.signed_at);

        let err = service
            .sign(&created.view_token, signer("Someone Else", "else@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Conflict(_)));
    }

    #[tokio::test]
    async fn sign_trims_signer_details_before_validating() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let created = service
            .create(owner, input(json!([{"description": "A", "quantity": 1, "rate": 10}])))
            .await
            .unwrap();
        service.mark_sent(owner, created.id).await.unwrap();

        let signed = service
            .sign(&created.view_token, signer("  Lee Park ", " lee@example.com\n"))
            .await
            .unwrap();
        assert_eq!(signed.signed_by_name.as_deref(), Some("Lee Park"));
        assert_eq!(signed.signed_by_email.as_deref(), Some("lee@example.com"));

        let err = service
            .sign(&created.view_token, signer("   ", "lee@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Validation(_)));
    }

    #[tokio::test]
    async fn draft_cannot_be_signed_and_approved_cannot_be_edited() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let created = service
            .create(owner, input(json!([{"description": "A", "quantity": 1, "rate": 10}])))
            .await
            .unwrap();

        let err = service
            .sign(&created.view_token, signer("Lee", "lee@example.com"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        service.mark_sent(owner, created.id).await.unwrap();
        service
            .sign(&created.view_token, signer("Lee", "lee@example.com"))
            .await
            .unwrap();

        let err = service
            .update(
                owner,
                created.id,
                UpdateEstimateInput {
                    client_name: Some("Other".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Conflict(_)));
    }

    #[tokio::test]
    async fn reject_then_sign_conflicts() {
        let (service, _) = service();
        let owner = Uuid::new_v4();
        let created = service
            .create(owner, input(json!([{"description": "A", "quantity": 1, "rate": 10}])))
            .await
            .unwrap();
        service.mark_sent(owner, created.id).await.unwrap();

        let rejected = service
            .reject(&created.view_token, RejectEstimateInput { reason: Some("Too high".into()) })
            .await
            .unwrap();
        assert_eq!(rejected.status, EstimateStatus::Rejected);
        service
            .reject(&created.view_token, RejectEstimateInput::default())
            .await
            .unwrap();

        let err = service
            .sign(&created.view_token, signer("Lee", "lee@example.com"))
            .await
            .unwrap_err();
        assert!(matches!(err, DocumentError::Conflict(_)));
    }

    #[tokio::test]
    async fn concurrent_sign_and_edit_never_edit_an_approved_estimate() {
        let (service, store) = service();
        let owner = Uuid::new_v4();
        let created = service
            .create(owner, input(json!([{"description": "A", "quantity": 1, "rate": 10}])))
            .await
            .unwrap();
        service.mark_sent(owner, created.id).await.unwrap();

        let signing = {
            let service = service.clone();
            let token = created.view_token.clone();
            tokio::spawn(async move { service.sign(&token, signer("Lee", "lee@example.com")).await })
        };
        let editing = {
            let service = service.clone();
            let id = created.id;
            tokio::spawn(async move {
                service
                    .update(
                        owner,
                        id,
                        UpdateEstimateInput {
                            project_name: Some("Edited".to_string()),
                            ..Default::default()
                        },
                    )
                    .await
            })
        };

        assert!(signing.await.unwrap().is_ok());
        let edit = editing.await.unwrap();

        let stored = store
            .get_estimate(DocumentKey::owned(owner, created.id))
            .await
            .unwrap();
        assert_eq!(stored.status, EstimateStatus::Approved);
        match edit {
            Ok(_) => assert_eq!(stored.project_name, "Edited"),
            Err(e) => {
                assert!(matches!(e, DocumentError::Conflict(_)));
                assert_eq!(stored.project_name, "Bathroom");
            }
        }
    }
}
