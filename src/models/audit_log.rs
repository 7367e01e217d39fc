//! Audit log entity model
//!
//! Append-only record of every mutating operation and every failure the
//! provisioner observed. Rows are never updated or deleted by this service.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "audit_logs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Dotted action name, e.g. `tenant.created`
    pub action: String,

    /// Kind of resource the action touched (`tenant`, `whitelist_entry`)
    pub resource_type: String,

    /// Identifier of the touched resource, kept as text
    pub resource_id: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub details: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
