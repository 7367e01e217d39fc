//! # Metadata Store
//!
//! Units of work over the control database. Every mutation is paired with its
//! audit record inside one transaction, so a reader never sees a tenant or
//! whitelist change without the matching audit entry. Every call runs under
//! the configured operation timeout.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use serde_json::{Value, json};
use uuid::Uuid;

use crate::error::RepositoryError;
use crate::models::tenant::{Model as TenantModel, TenantStatus};
use crate::models::{audit_log, whitelist_entry};
use crate::repositories::audit::{RESOURCE_TENANT, RESOURCE_WHITELIST_ENTRY};
use crate::repositories::{
    AuditRepository, NewTenant, TenantRepository, TenantRules, WhitelistRepository,
};

type TxnFuture<'t, T> = Pin<Box<dyn Future<Output = Result<T, RepositoryError>> + Send + 't>>;

/// Transactional facade over the tenant, whitelist and audit repositories
#[derive(Clone)]
pub struct MetadataStore {
    db: DatabaseConnection,
    timeout: Duration,
}

impl MetadataStore {
    pub fn new(db: DatabaseConnection, timeout: Duration) -> Self {
        Self { db, timeout }
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.db
    }

    /// Insert an active tenant and its `tenant.created` audit record.
    pub async fn create_tenant_record(&self, new: NewTenant) -> Result<TenantModel, RepositoryError> {
        self.in_transaction("create_tenant_record", move |txn| {
            Box::pin(async move {
                let tenant = TenantRepository::new(txn).insert(new).await?;
                AuditRepository::new(txn)
                    .append(
                        "tenant.created",
                        RESOURCE_TENANT,
                        tenant.id,
                        json!({
                            "database_name": tenant.database_name,
                            "role_name": tenant.role_name,
                            "friendly_name": tenant.friendly_name,
                            "owner_email": tenant.owner_email,
                            "max_connections": tenant.max_connections,
                        }),
                    )
                    .await?;
                Ok(tenant)
            })
        })
        .await
    }

    /// Delete a tenant, its whitelist entries, and record `tenant.deleted`.
    /// Returns the number of whitelist entries removed with it.
    pub async fn delete_tenant_record(&self, tenant: &TenantModel) -> Result<u64, RepositoryError> {
        let tenant_id = tenant.id;
        let details = json!({
            "database_name": tenant.database_name,
            "role_name": tenant.role_name,
        });
        self.in_transaction("delete_tenant_record", move |txn| {
            Box::pin(async move {
                let removed = WhitelistRepository::new(txn)
                    .delete_for_tenant(tenant_id)
                    .await?;
                TenantRepository::new(txn).delete(tenant_id).await?;
                let mut details = details;
                details["whitelist_entries_removed"] = json!(removed);
                AuditRepository::new(txn)
                    .append("tenant.deleted", RESOURCE_TENANT, tenant_id, details)
                    .await?;
                Ok(removed)
            })
        })
        .await
    }

    /// Remove the row of a tenant whose creation is being rolled back.
    pub async fn purge_tenant_record(&self, tenant_id: Uuid, reason: Value) -> Result<(), RepositoryError> {
        self.in_transaction("purge_tenant_record", move |txn| {
            Box::pin(async move {
                WhitelistRepository::new(txn)
                    .delete_for_tenant(tenant_id)
                    .await?;
                TenantRepository::new(txn).delete(tenant_id).await?;
                AuditRepository::new(txn)
                    .append("tenant.create_rolled_back", RESOURCE_TENANT, tenant_id, reason)
                    .await?;
                Ok(())
            })
        })
        .await
    }

    /// Add a canonical address to an active tenant's whitelist.
    pub async fn insert_whitelist_entry(
        &self,
        tenant_id: Uuid,
        address: String,
        description: Option<String>,
    ) -> Result<whitelist_entry::Model, RepositoryError> {
        self.in_transaction("insert_whitelist_entry", move |txn| {
            Box::pin(async move {
                require_active(&TenantRepository::new(txn).get(tenant_id).await?)?;
                let entry = WhitelistRepository::new(txn)
                    .insert(tenant_id, address, description)
                    .await?;
                AuditRepository::new(txn)
                    .append(
                        "whitelist.added",
                        RESOURCE_WHITELIST_ENTRY,
                        entry.id,
                        json!({
                            "tenant_id": tenant_id,
                            "address": entry.address,
                            "description": entry.description,
                        }),
                    )
                    .await?;
                Ok(entry)
            })
        })
        .await
    }

    /// Remove one whitelist entry of a tenant.
    pub async fn delete_whitelist_entry(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<whitelist_entry::Model, RepositoryError> {
        self.in_transaction("delete_whitelist_entry", move |txn| {
            Box::pin(async move {
                TenantRepository::new(txn).get(tenant_id).await?;
                let repo = WhitelistRepository::new(txn);
                let entry = repo
                    .find(tenant_id, entry_id)
                    .await?
                    .ok_or_else(|| RepositoryError::not_found("whitelist entry", entry_id))?;
                repo.delete(tenant_id, entry_id).await?;
                AuditRepository::new(txn)
                    .append(
                        "whitelist.removed",
                        RESOURCE_WHITELIST_ENTRY,
                        entry_id,
                        json!({ "tenant_id": tenant_id, "address": entry.address }),
                    )
                    .await?;
                Ok(entry)
            })
        })
        .await
    }

    /// Standalone audit append, used for failures outside any unit of work.
    pub async fn append_audit(
        &self,
        action: &str,
        resource_type: &str,
        resource_id: impl ToString,
        details: Value,
    ) -> Result<audit_log::Model, RepositoryError> {
        let resource_id = resource_id.to_string();
        self.timed("append_audit", async {
            AuditRepository::new(&self.db)
                .append(action, resource_type, resource_id, details)
                .await
        })
        .await
    }

    pub async fn get_tenant(&self, tenant_id: Uuid) -> Result<TenantModel, RepositoryError> {
        self.timed("get_tenant", TenantRepository::new(&self.db).get(tenant_id))
            .await
    }

    pub async fn list_tenants(&self) -> Result<Vec<TenantModel>, RepositoryError> {
        self.timed("list_tenants", TenantRepository::new(&self.db).list())
            .await
    }

    /// Entries of an existing tenant, newest first
    pub async fn list_whitelist(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<whitelist_entry::Model>, RepositoryError> {
        self.timed("list_whitelist", async {
            TenantRepository::new(&self.db).get(tenant_id).await?;
            WhitelistRepository::new(&self.db)
                .list_for_tenant(tenant_id)
                .await
        })
        .await
    }

    /// Snapshot of every active tenant with its entries, in rule order
    pub async fn active_rules(&self) -> Result<Vec<TenantRules>, RepositoryError> {
        self.timed("active_rules", WhitelistRepository::new(&self.db).active_rules())
            .await
    }

    pub async fn audit_history(
        &self,
        resource_type: &str,
        resource_id: impl ToString,
    ) -> Result<Vec<audit_log::Model>, RepositoryError> {
        let resource_id = resource_id.to_string();
        self.timed("audit_history", async {
            AuditRepository::new(&self.db)
                .list_for_resource(resource_type, resource_id)
                .await
        })
        .await
    }

    async fn in_transaction<T, F>(&self, operation: &'static str, work: F) -> Result<T, RepositoryError>
    where
        T: Send,
        F: for<'t> FnOnce(&'t DatabaseTransaction) -> TxnFuture<'t, T> + Send,
    {
        let txn = self.begin().await?;
        self.timed(operation, async move {
            match work(&txn).await {
                Ok(value) => {
                    txn.commit().await.map_err(RepositoryError::database_error)?;
                    Ok(value)
                }
                Err(err) => {
                    if let Err(rollback_err) = txn.rollback().await {
                        tracing::warn!(operation, error = %rollback_err, "Rollback failed");
                    }
                    Err(err)
                }
            }
        })
        .await
    }

    /// Open a unit of work. Dropping the transaction without committing rolls it back.
    async fn begin(&self) -> Result<DatabaseTransaction, RepositoryError> {
        self.timed("begin", async {
            self.db.begin().await.map_err(RepositoryError::database_error)
        })
        .await
    }

    async fn timed<T>(
        &self,
        operation: &'static str,
        future: impl Future<Output = Result<T, RepositoryError>>,
    ) -> Result<T, RepositoryError> {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(operation, timeout_ms = self.timeout.as_millis() as u64, "Metadata store call timed out");
                Err(RepositoryError::Timeout {
                    operation,
                    timeout_ms: self.timeout.as_millis() as u64,
                })
            }
        }
    }
}

fn require_active(tenant: &TenantModel) -> Result<(), RepositoryError> {
    if tenant.status == TenantStatus::Active {
        Ok(())
    } else {
        Err(RepositoryError::not_found("tenant", tenant.id))
    }
}
