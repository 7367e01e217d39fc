//! Connection pools for the metadata store and the admin engine path.
//!
//! Both pools are built once at startup and injected into the provisioner;
//! [`Resources::shutdown`] drains them when the server stops.

use anyhow::{Context, Result};
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::time::Duration;
use tokio::time::sleep;

use crate::config::AppConfig;

const CONNECT_ATTEMPTS: u32 = 5;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Failed to connect to {pool} database: {source}")]
    ConnectionFailed {
        pool: &'static str,
        #[source]
        source: sea_orm::DbErr,
    },
    #[error("Invalid database configuration: {message}")]
    InvalidConfiguration { message: String },
}

/// Shared database resources handed to the provisioner at startup
#[derive(Clone)]
pub struct Resources {
    /// Transactional metadata store
    pub metadata: DatabaseConnection,
    /// Direct, unpooled superuser path to the engine for DDL
    pub admin: DatabaseConnection,
}

impl Resources {
    /// Open both pools.
    pub async fn connect(cfg: &AppConfig) -> Result<Self> {
        let metadata = init_pool(cfg).await?;
        let admin = init_admin_pool(cfg).await?;
        Ok(Self { metadata, admin })
    }

    /// Close both pools, waiting for checked-out connections to return.
    pub async fn shutdown(self) -> Result<()> {
        self.admin
            .close()
            .await
            .context("closing admin engine pool")?;
        self.metadata
            .close()
            .await
            .context("closing metadata pool")?;
        log::info!("Database pools closed");
        Ok(())
    }
}

/// Initializes the metadata store pool.
///
/// Retries with exponential backoff so the service can start while the
/// control database is still coming up.
///
/// # Examples
///
/// ```no_run
/// use provisioner::{config::AppConfig, db::init_pool};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = AppConfig::default();
///     let db = init_pool(&config).await?;
///     Ok(())
/// }
/// ```
pub async fn init_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut opt = ConnectOptions::new(&cfg.database_url);
    opt.max_connections(cfg.db_max_connections)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    connect_with_retry("metadata", opt).await
}

/// Initializes the admin engine pool.
///
/// Every statement on this pool autocommits; connections are short-lived so
/// a dropped engine session never lingers holding DDL locks.
pub async fn init_admin_pool(cfg: &AppConfig) -> Result<DatabaseConnection> {
    if cfg.admin_database_url.is_empty() {
        return Err(DatabaseError::InvalidConfiguration {
            message: "Admin database URL cannot be empty".to_string(),
        }
        .into());
    }

    let mut opt = ConnectOptions::new(&cfg.admin_database_url);
    opt.max_connections(cfg.admin_max_connections)
        .min_connections(0)
        .acquire_timeout(Duration::from_millis(cfg.db_acquire_timeout_ms))
        .idle_timeout(Duration::from_secs(60))
        .max_lifetime(Duration::from_secs(300))
        .sqlx_logging(true)
        .sqlx_logging_level(log::LevelFilter::Debug);

    connect_with_retry("admin", opt).await
}

async fn connect_with_retry(pool: &'static str, opt: ConnectOptions) -> Result<DatabaseConnection> {
    let mut retry_delay = Duration::from_millis(100);
    let mut attempt = 1;

    loop {
        match Database::connect(opt.clone()).await {
            Ok(conn) => {
                log::info!("Connected to {} database (attempt {})", pool, attempt);
                return Ok(conn);
            }
            Err(e) if attempt >= CONNECT_ATTEMPTS => {
                log::error!(
                    "Failed to connect to {} database after {} attempts: {}",
                    pool,
                    attempt,
                    e
                );
                return Err(DatabaseError::ConnectionFailed { pool, source: e }.into());
            }
            Err(e) => {
                log::warn!(
                    "{} database connection attempt {} failed: {}, retrying in {:?}",
                    pool,
                    attempt,
                    e,
                    retry_delay
                );
                sleep(retry_delay).await;
                retry_delay *= 2;
                attempt += 1;
            }
        }
    }
}

/// Health check for a database connection.
pub async fn health_check(db: &DatabaseConnection) -> Result<()> {
    let stmt = Statement::from_string(db.get_database_backend(), "SELECT 1".to_string());

    db.query_one(stmt)
        .await
        .context("Database health check failed")?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_database_url() {
        let config = AppConfig {
            database_url: String::new(),
            ..Default::default()
        };

        let result = init_pool(&config).await;

        assert!(matches!(
            result.unwrap_err().downcast::<DatabaseError>(),
            Ok(DatabaseError::InvalidConfiguration { .. })
        ));
    }

    #[tokio::test]
    async fn test_invalid_admin_url() {
        let config = AppConfig {
            admin_database_url: String::new(),
            ..Default::default()
        };

        assert!(init_admin_pool(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_health_check_on_sqlite() {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        assert!(health_check(&db).await.is_ok());
    }
}
