//! Client records. Plain owner-scoped CRUD.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, instrument};
use uuid::Uuid;
use validator::Validate;

use super::store::RecordStore;
use crate::error::DocumentError;
use crate::models::{Client, CreateClientInput, UpdateClientInput};

#[derive(Clone)]
pub struct ClientService {
    records: Arc<dyn RecordStore>,
}

impl ClientService {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    #[instrument(skip(self, input), fields(owner_id = %owner_id))]
    pub async fn create(
        &self,
        owner_id: Uuid,
        input: CreateClientInput,
    ) -> Result<Client, DocumentError> {
        input.validate()?;
        let client = self
            .records
            .insert_client(Client {
                id: Uuid::new_v4(),
                owner_id,
                name: input.name.trim().to_string(),
                email: input.email.map(|e| e.trim().to_string()),
                phone: input.phone.map(|p| p.trim().to_string()),
                address: input.address.map(|a| a.trim().to_string()),
                total_jobs: input.total_jobs,
                total_value: input.total_value,
                created_at: Utc::now(),
            })
            .await?;
        info!(client_id = %client.id, "Client created");
        Ok(client)
    }

    pub async fn get(&self, owner_id: Uuid, id: Uuid) -> Result<Client, DocumentError> {
        self.records.get_client(owner_id, id).await
    }

    pub async fn list(&self, owner_id: Uuid) -> Result<Vec<Client>, DocumentError> {
        self.records.list_clients(owner_id).await
    }

    pub async fn update(
        &self,
        owner_id: Uuid,
        id: Uuid,
        input: UpdateClientInput,
    ) -> Result<Client, DocumentError> {
        input.validate()?;
        self.records.update_client(owner_id, id, &input).await
    }

    pub async fn delete(&self, owner_id: Uuid, id: Uuid) -> Result<(), DocumentError> {
        self.records.delete_client(owner_id, id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::store::MemoryStore;

    fn create_input(name: &str) -> CreateClientInput {
        CreateClientInput {
            name: name.to_string(),
            email: Some("pat@example.com".to_string()),
            phone: None,
            address: None,
            total_jobs: 0,
            total_value: Default::default(),
        }
    }

    #[tokio::test]
    async fn clients_are_owner_scoped() {
        let service = ClientService::new(Arc::new(MemoryStore::new()));
        let owner = Uuid::new_v4();
        let client = service.create(owner, create_input(" Pat ")).await.unwrap();
        assert_eq!(client.name, "Pat");

        let err = service.get(Uuid::new_v4(), client.id).await.unwrap_err();
        assert!(err.is_not_found());
        assert!(service.list(Uuid::new_v4()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_and_delete() {
        let service = ClientService::new(Arc::new(MemoryStore::new()));
        let owner = Uuid::new_v4();
        let client = service.create(owner, create_input("Pat")).await.unwrap();

        let updated = service
            .update(
                owner,
                client.id,
                UpdateClientInput {
                    phone: Some("555-0100".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.phone.as_deref(), Some("555-0100"));
        assert_eq!(updated.name, "Pat");

        service.delete(owner, client.id).await.unwrap();
        assert!(service.get(owner, client.id).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn invalid_email_is_rejected() {
        let service = ClientService::new(Arc::new(MemoryStore::new()));
        let mut input = create_input("Pat");
        input.email = Some("not-an-email".to_string());
        let err = service.create(Uuid::new_v4(), input).await.unwrap_err();
        assert!(matches!(err, DocumentError::Validation(_)));
    }
}
