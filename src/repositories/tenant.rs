//! # Tenant Repository
//!
//! Single-statement operations on tenant records. Methods work on any
//! [`ConnectionTrait`], so the same calls run on the pool or inside a
//! transaction opened by [`crate::store::MetadataStore`].

use crate::error::RepositoryError;
use crate::models::tenant::{
    ActiveModel as TenantActiveModel, Column, Entity as Tenant, Model as TenantModel, TenantStatus,
};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, Set,
};
use uuid::Uuid;

/// Values for a new tenant record
#[derive(Debug, Clone)]
pub struct NewTenant {
    pub database_name: String,
    pub role_name: String,
    pub password_hash: String,
    pub owner_email: String,
    pub friendly_name: String,
    pub max_connections: i32,
}

/// Repository for tenant rows
pub struct TenantRepository<'a, C: ConnectionTrait> {
    db: &'a C,
}

impl<'a, C: ConnectionTrait> TenantRepository<'a, C> {
    pub fn new(db: &'a C) -> Self {
        Self { db }
    }

    /// Insert an active tenant. Duplicate generated names surface as
    /// [`RepositoryError::Conflict`].
    pub async fn insert(&self, new: NewTenant) -> Result<TenantModel, RepositoryError> {
        let now = Utc::now();

        let tenant = TenantActiveModel {
            id: Set(Uuid::new_v4()),
            database_name: Set(new.database_name),
            role_name: Set(new.role_name),
            password_hash: Set(new.password_hash),
            owner_email: Set(new.owner_email),
            friendly_name: Set(new.friendly_name),
            max_connections: Set(new.max_connections),
            status: Set(TenantStatus::Active),
            created_at: Set(now.into()),
            updated_at: Set(now.into()),
        };

        tenant
            .insert(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn find(&self, tenant_id: Uuid) -> Result<Option<TenantModel>, RepositoryError> {
        Tenant::find_by_id(tenant_id)
            .one(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Like [`Self::find`] but absent rows are an error
    pub async fn get(&self, tenant_id: Uuid) -> Result<TenantModel, RepositoryError> {
        self.find(tenant_id)
            .await?
            .ok_or_else(|| RepositoryError::not_found("tenant", tenant_id))
    }

    /// All tenants, newest first
    pub async fn list(&self) -> Result<Vec<TenantModel>, RepositoryError> {
        Tenant::find()
            .order_by_desc(Column::CreatedAt)
            .order_by_desc(Column::Id)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    /// Active tenants ordered by database name
    pub async fn list_active_by_database_name(&self) -> Result<Vec<TenantModel>, RepositoryError> {
        Tenant::find()
            .filter(Column::Status.eq(TenantStatus::Active))
            .order_by_asc(Column::DatabaseName)
            .all(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }

    pub async fn delete(&self, tenant_id: Uuid) -> Result<(), RepositoryError> {
        let result = Tenant::delete_by_id(tenant_id)
            .exec(self.db)
            .await
            .map_err(RepositoryError::database_error)?;

        if result.rows_affected == 0 {
            return Err(RepositoryError::not_found("tenant", tenant_id));
        }
        Ok(())
    }

    pub async fn count(&self) -> Result<u64, RepositoryError> {
        Tenant::find()
            .count(self.db)
            .await
            .map_err(RepositoryError::database_error)
    }
}
