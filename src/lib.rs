//! # Tenant Database Provisioner
//!
//! Provisions isolated PostgreSQL databases for client applications, keeps
//! their network allow-lists enforced in the engine's host-based-access file,
//! and exposes both over an HTTP control surface.

pub mod access_control;
pub mod auth;
pub mod config;
pub mod connection_strings;
pub mod credentials;
pub mod db;
pub mod engine;
pub mod error;
pub mod handlers;
pub mod models;
pub mod provisioning;
pub mod repositories;
pub mod server;
pub mod store;
pub mod telemetry;
pub use migration;

#[cfg(test)]
mod test_support;
