//! Tenant entity model
//!
//! This module contains the SeaORM entity model for the tenants table. A
//! tenant owns one engine database and one login role; both names are
//! generated at creation and never change afterwards.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Tenant record as stored in the metadata store
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "tenants")]
pub struct Model {
    /// Unique identifier for the tenant (primary key)
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Generated engine database name (`tenant_<token>`)
    #[sea_orm(unique)]
    pub database_name: String,

    /// Generated engine role name (`user_<token>`)
    #[sea_orm(unique)]
    pub role_name: String,

    /// One-way hash of the role password; the plaintext is never stored
    pub password_hash: String,

    /// Contact address of the tenant owner
    pub owner_email: String,

    /// Human label
    pub friendly_name: String,

    /// Connection limit applied to the tenant role
    pub max_connections: i32,

    pub status: TenantStatus,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

/// Lifecycle status of a tenant
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    EnumIter,
    DeriveActiveEnum,
    Serialize,
    Deserialize,
    ToSchema,
    Default,
)]
#[sea_orm(rs_type = "String", db_type = "Text")]
pub enum TenantStatus {
    #[sea_orm(string_value = "active")]
    #[serde(rename = "active")]
    #[default]
    Active,

    #[sea_orm(string_value = "deleted")]
    #[serde(rename = "deleted")]
    Deleted,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::whitelist_entry::Entity")]
    WhitelistEntry,
}

impl Related<super::whitelist_entry::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WhitelistEntry.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
