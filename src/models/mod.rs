//! # Data Models
//!
//! This module contains the SeaORM entities backing the metadata store.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod audit_log;
pub mod tenant;
pub mod whitelist_entry;

pub use audit_log::Entity as AuditLog;
pub use tenant::{Entity as Tenant, TenantStatus};
pub use whitelist_entry::Entity as WhitelistEntry;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "tenant-provisioner".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
