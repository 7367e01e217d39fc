//! # Audit Repository
//!
//! Append-only writes to `audit_logs`. There is intentionally no update or
//! delete here; retention is handled outside this service.

use crate::error::RepositoryError;
use crate::models::audit_log::{
    ActiveModel as AuditActiveModel, Column, Entity as AuditLog, Model as AuditModel,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value;
use uuid::Uuid;

/// Resource kinds referenced by audit records
pub const RESOURCE_TENANT: &str = "tenant";
pub const RESOURCE_WHITELIST_ENTRY: &str = "whitelist_entry";
pub const RESOURCE_ACCESS_CONTROL: &str = "access_control";

pub struct AuditRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> AuditRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn append(
        &self,
        action: &str,
        resource_type: &str,
        resource_id: impl ToString,
        details: Value,
    ) -> Result<AuditModel, RepositoryError> {
        let record = AuditActiveModel {
            id: Set(Uuid::new_v4()),
            action: Set(action.to_string()),
            resource_type: Set(resource_type.to_string()),
            resource_id: Set(resource_id.to_string()),
            details: Set(Some(details)),
            created_at: Set(Utc::now().into()),
        };

        record
            .insert(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// History of one resource, oldest first
    pub async fn list_for_resource(
        &self,
        resource_type: &str,
        resource_id: impl ToString,
    ) -> Result<Vec<AuditModel>, RepositoryError> {
        AuditLog::find()
            .filter(Column::ResourceType.eq(resource_type))
            .filter(Column::ResourceId.eq(resource_id.to_string()))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::setup_test_db;
    use serde_json::json;

    #[tokio::test]
    async fn test_append_and_list() {
        let db = setup_test_db().await;
        let repo = AuditRepository::new(&db);
        let id = Uuid::new_v4();

        repo.append("tenant.created", RESOURCE_TENANT, id, json!({"a": 1}))
            .await
            .unwrap();
        repo.append("tenant.deleted", RESOURCE_TENANT, id, json!({}))
            .await
            .unwrap();
        repo.append("tenant.created", RESOURCE_TENANT, Uuid::new_v4(), json!({}))
            .await
            .unwrap();

        let history = repo.list_for_resource(RESOURCE_TENANT, id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].details, Some(json!({"a": 1})));
    }
}
