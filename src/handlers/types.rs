//! # Common API Types
//!
//! Response envelope and DTOs shared by the tenant and whitelist handlers.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{ApiError, validation_error};
use crate::models::TenantStatus;
use crate::models::tenant::Model as TenantModel;
use crate::models::whitelist_entry::Model as EntryModel;

/// Envelope for every successful response
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ApiResponse<T> {
    /// Always `true` for success bodies
    pub success: bool,
    /// Human-readable outcome
    pub message: String,
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(message: impl Into<String>, data: T) -> Self {
        Self {
            success: true,
            message: message.into(),
            data,
        }
    }
}

/// Tenant record as exposed over HTTP. Never carries credentials.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TenantDto {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub id: Uuid,
    #[schema(example = "tenant_3f2a9c1d4e5b6a70")]
    pub database_name: String,
    #[schema(example = "user_3f2a9c1d4e5b6a70")]
    pub role_name: String,
    #[schema(example = "owner@example.com")]
    pub owner_email: String,
    #[schema(example = "Acme staging")]
    pub friendly_name: String,
    pub max_connections: i32,
    pub status: TenantStatus,
    /// RFC 3339 creation timestamp
    pub created_at: String,
    pub updated_at: String,
}

impl From<&TenantModel> for TenantDto {
    fn from(tenant: &TenantModel) -> Self {
        Self {
            id: tenant.id,
            database_name: tenant.database_name.clone(),
            role_name: tenant.role_name.clone(),
            owner_email: tenant.owner_email.clone(),
            friendly_name: tenant.friendly_name.clone(),
            max_connections: tenant.max_connections,
            status: tenant.status,
            created_at: tenant.created_at.to_rfc3339(),
            updated_at: tenant.updated_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct WhitelistEntryDto {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Canonical IPv4 CIDR
    #[schema(example = "10.0.0.1/32")]
    pub address: String,
    pub description: Option<String>,
    pub created_at: String,
}

impl From<&EntryModel> for WhitelistEntryDto {
    fn from(entry: &EntryModel) -> Self {
        Self {
            id: entry.id,
            tenant_id: entry.tenant_id,
            address: entry.address.clone(),
            description: entry.description.clone(),
            created_at: entry.created_at.to_rfc3339(),
        }
    }
}

/// Parse a UUID path segment into a 400 on failure
pub fn parse_uuid(raw: &str, field: &str) -> Result<Uuid, ApiError> {
    raw.parse::<Uuid>().map_err(|_| {
        validation_error(
            &format!("Invalid {field}"),
            serde_json::json!({ field: "Must be a valid UUID" }),
        )
    })
}

/// Location header for a created resource
pub fn location(path: String) -> [(axum::http::HeaderName, String); 1] {
    [(axum::http::header::LOCATION, path)]
}
