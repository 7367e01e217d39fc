//! # Whitelist Repository
//!
//! Per-tenant IPv4 allow-list rows. Addresses arrive here already
//! canonicalised; the `(tenant_id, address)` unique index rejects repeats.

use std::collections::HashMap;

use crate::error::RepositoryError;
use crate::models::tenant::Model as TenantModel;
use crate::models::whitelist_entry::{
    ActiveModel as EntryActiveModel, Column, Entity as WhitelistEntry, Model as EntryModel,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use super::TenantRepository;

/// An active tenant together with its entries in insertion order
pub type TenantRules = (TenantModel, Vec<EntryModel>);

pub struct WhitelistRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> WhitelistRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    pub async fn insert(
        &self,
        tenant_id: Uuid,
        address: String,
        description: Option<String>,
    ) -> Result<EntryModel, RepositoryError> {
        let entry = EntryActiveModel {
            id: Set(Uuid::new_v4()),
            tenant_id: Set(tenant_id),
            address: Set(address),
            description: Set(description),
            created_at: Set(Utc::now().into()),
        };

        entry
            .insert(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Entry scoped to its tenant; an entry id under another tenant is not found
    pub async fn find(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<Option<EntryModel>, RepositoryError> {
        WhitelistEntry::find_by_id(entry_id)
            .filter(Column::TenantId.eq(tenant_id))
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Entries for one tenant, newest first
    pub async fn list_for_tenant(&self, tenant_id: Uuid) -> Result<Vec<EntryModel>, RepositoryError> {
        WhitelistEntry::find()
            .filter(Column::TenantId.eq(tenant_id))
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn delete(&self, tenant_id: Uuid, entry_id: Uuid) -> Result<(), RepositoryError> {
        let result = WhitelistEntry::delete_many()
            .filter(Column::Id.eq(entry_id))
            .filter(Column::TenantId.eq(tenant_id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("whitelist entry", entry_id));
        }
        Ok(())
    }

    /// Remove every entry of a tenant, returning how many went
    pub async fn delete_for_tenant(&self, tenant_id: Uuid) -> Result<u64, RepositoryError> {
        let result = WhitelistEntry::delete_many()
            .filter(Column::TenantId.eq(tenant_id))
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;
        Ok(result.rows_affected)
    }

    /// Every active tenant (by database name) with its entries (by insertion
    /// order). Tenants without entries are included with an empty list.
    pub async fn active_rules(&self) -> Result<Vec<TenantRules>, RepositoryError> {
        let tenants = TenantRepository::new(self.db)
            .list_active_by_database_name()
            .await?;
        if tenants.is_empty() {
            return Ok(Vec::new());
        }

        let entries = WhitelistEntry::find()
            .filter(Column::TenantId.is_in(tenants.iter().map(|t| t.id)))
            .order_by_asc(Column::CreatedAt)
            .order_by_asc(Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        let mut grouped: HashMap<Uuid, Vec<EntryModel>> = HashMap::new();
        for entry in entries {
            grouped.entry(entry.tenant_id).or_default().push(entry);
        }

        Ok(tenants
            .into_iter()
            .map(|tenant| {
                let entries = grouped.remove(&tenant.id).unwrap_or_default();
                (tenant, entries)
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::tenant::NewTenant;
    use crate::test_support::setup_test_db;

    async fn seed_tenant(db: &sea_orm::DatabaseConnection, token: &str) -> TenantModel {
        TenantRepository::new(db)
            .insert(NewTenant {
                database_name: format!("tenant_{token}"),
                role_name: format!("user_{token}"),
                password_hash: "$argon2id$fixture".to_string(),
                owner_email: "owner@example.com".to_string(),
                friendly_name: token.to_string(),
                max_connections: 5,
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_duplicate_address_conflicts_per_tenant_only() {
        let db = setup_test_db().await;
        let a = seed_tenant(&db, "aaaa").await;
        let b = seed_tenant(&db, "bbbb").await;
        let repo = WhitelistRepository::new(&db);

        repo.insert(a.id, "10.0.0.1/32".into(), None).await.unwrap();
        repo.insert(b.id, "10.0.0.1/32".into(), None).await.unwrap();
        let err = repo
            .insert(a.id, "10.0.0.1/32".into(), None)
            .await
            .unwrap_err();

        assert!(matches!(err, RepositoryError::Conflict(_)));
        assert_eq!(repo.list_for_tenant(a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_is_scoped_to_tenant() {
        let db = setup_test_db().await;
        let a = seed_tenant(&db, "aaaa").await;
        let b = seed_tenant(&db, "bbbb").await;
        let repo = WhitelistRepository::new(&db);

        let entry = repo.insert(a.id, "10.1.0.0/16".into(), None).await.unwrap();

        let err = repo.delete(b.id, entry.id).await.unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound { .. }));

        repo.delete(a.id, entry.id).await.unwrap();
        assert!(repo.find(a.id, entry.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_active_rules_grouping_and_order() {
        let db = setup_test_db().await;
        let z = seed_tenant(&db, "zzzz").await;
        let a = seed_tenant(&db, "aaaa").await;
        let empty = seed_tenant(&db, "mmmm").await;
        let repo = WhitelistRepository::new(&db);

        repo.insert(z.id, "10.0.0.1/32".into(), None).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        repo.insert(z.id, "10.0.0.0/8".into(), None).await.unwrap();
        repo.insert(a.id, "192.168.1.0/24".into(), None).await.unwrap();

        let rules = repo.active_rules().await.unwrap();
        let names: Vec<_> = rules.iter().map(|(t, _)| t.id).collect();
        assert_eq!(names, vec![a.id, empty.id, z.id]);

        let z_addresses: Vec<_> = rules[2].1.iter().map(|e| e.address.as_str()).collect();
        assert_eq!(z_addresses, vec!["10.0.0.1/32", "10.0.0.0/8"]);
        assert!(rules[1].1.is_empty());
    }
}
