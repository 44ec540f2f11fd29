//! Client record model.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Client aggregate, maintained by direct CRUD.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct Client {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub total_jobs: i32,
    pub total_value: Decimal,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a client.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateClientInput {
    #[validate(length(min = 1, max = 200, message = "Name is required"))]
    pub name: String,
    #[validate(email(message = "Invalid email"))]
    #[serde(default)]
    pub email: Option<String>,
    #[validate(length(max = 50, message = "Phone is too long"))]
    #[serde(default)]
    pub phone: Option<String>,
    #[validate(length(max = 500, message = "Address is too long"))]
    #[serde(default)]
    pub address: Option<String>,
    #[validate(range(min = 0, message = "Total jobs cannot be negative"))]
    #[serde(default)]
    pub total_jobs: i32,
    #[serde(default)]
    pub total_value: Decimal,
}

/// Input for updating a client.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateClientInput {
    #[validate(length(min = 1, max = 200, message = "Name cannot be empty"))]
    pub name: Option<String>,
    #[validate(email(message = "Invalid email"))]
    pub email: Option<String>,
    #[validate(length(max = 50, message = "Phone is too long"))]
    pub phone: Option<String>,
    #[validate(length(max = 500, message = "Address is too long"))]
    pub address: Option<String>,
    #[validate(range(min = 0, message = "Total jobs cannot be negative"))]
    pub total_jobs: Option<i32>,
    pub total_value: Option<Decimal>,
}

impl Client {
    /// Apply a partial update in place.
    pub fn apply(&mut self, input: &UpdateClientInput) {
        if let Some(name) = &input.name {
            self.name = name.trim().to_string();
        }
        if let Some(email) = &input.email {
            self.email = Some(email.trim().to_string());
        }
        if let Some(phone) = &input.phone {
            self.phone = Some(phone.trim().to_string());
        }
        if let Some(address) = &input.address {
            self.address = Some(address.trim().to_string());
        }
        if let Some(total_jobs) = input.total_jobs {
            self.total_jobs = total_jobs;
        }
        if let Some(total_value) = input.total_value {
            self.total_value = total_value;
        }
    }
}
