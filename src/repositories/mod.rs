//! # Repository Layer
//!
//! Thin SeaORM wrappers, one per table. Transaction boundaries and audit
//! pairing live one level up in [`crate::store`].

pub mod audit;
pub mod tenant;
pub mod whitelist;

pub use audit::AuditRepository;
pub use tenant::{NewTenant, TenantRepository};
pub use whitelist::{TenantRules, WhitelistRepository};
