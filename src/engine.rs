//! # Admin Engine
//!
//! Non-transactional DDL against the PostgreSQL engine hosting tenant
//! databases. `CREATE DATABASE` cannot run inside a transaction block, so each
//! primitive here commits on its own; recovery from a partial sequence is the
//! caller's job (see [`crate::provisioning`]).

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, Statement};
use thiserror::Error;

static IDENTIFIER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_]{1,63}$").expect("valid identifier regex"));
static PASSWORD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9]{1,128}$").expect("valid password regex"));

/// Errors raised by admin engine primitives
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("engine statement failed: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// A value would need quoting to be interpolated into DDL
    #[error("refusing to interpolate unsafe {kind} into DDL")]
    UnsafeLiteral { kind: &'static str },

    #[error("engine call '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },

    /// The engine answered but declined the request
    #[error("engine rejected request: {0}")]
    Rejected(String),
}

/// Size and load figures for one tenant database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DatabaseStats {
    pub size_bytes: i64,
    pub active_connections: i64,
}

/// Autocommit administrative primitives. Each call is independently committed.
#[async_trait]
pub trait AdminEngine: Send + Sync {
    async fn create_role(
        &self,
        role: &str,
        password: &str,
        connection_limit: i32,
    ) -> Result<(), EngineError>;

    async fn create_database(&self, database: &str, owner: &str) -> Result<(), EngineError>;

    async fn grant_all(&self, database: &str, role: &str) -> Result<(), EngineError>;

    /// Terminate every backend connected to `database`; returns how many were signalled
    async fn terminate_sessions(&self, database: &str) -> Result<u64, EngineError>;

    async fn drop_database_if_exists(&self, database: &str) -> Result<(), EngineError>;

    async fn drop_role_if_exists(&self, role: &str) -> Result<(), EngineError>;

    /// Ask the engine to re-read its configuration files
    async fn reload_config(&self) -> Result<(), EngineError>;

    async fn database_stats(&self, database: &str) -> Result<DatabaseStats, EngineError>;
}

/// [`AdminEngine`] over a direct superuser connection pool.
///
/// The pool must not go through a transaction pooler: multiplexing could put
/// consecutive statements of one sequence on different backend sessions.
#[derive(Clone)]
pub struct PostgresAdminEngine {
    db: DatabaseConnection,
}

impl PostgresAdminEngine {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    async fn execute(&self, sql: String) -> Result<(), EngineError> {
        self.db
            .execute(Statement::from_string(DbBackend::Postgres, sql))
            .await?;
        Ok(())
    }

    async fn query_i64(
        &self,
        sql: &str,
        database: &str,
        column: &str,
    ) -> Result<i64, EngineError> {
        let row = self
            .db
            .query_one(Statement::from_sql_and_values(
                DbBackend::Postgres,
                sql,
                [database.into()],
            ))
            .await?
            .ok_or_else(|| EngineError::Rejected(format!("no row returned for {column}")))?;
        Ok(row.try_get::<i64>("", column)?)
    }
}

/// Double-quoted identifier after checking it needs no escaping
pub fn quote_identifier(value: &str) -> Result<String, EngineError> {
    if IDENTIFIER_RE.is_match(value) {
        Ok(format!("\"{value}\""))
    } else {
        Err(EngineError::UnsafeLiteral { kind: "identifier" })
    }
}

/// Single-quoted password literal after checking it needs no escaping
pub fn quote_password(value: &str) -> Result<String, EngineError> {
    if PASSWORD_RE.is_match(value) {
        Ok(format!("'{value}'"))
    } else {
        Err(EngineError::UnsafeLiteral { kind: "password" })
    }
}

#[async_trait]
impl AdminEngine for PostgresAdminEngine {
    async fn create_role(
        &self,
        role: &str,
        password: &str,
        connection_limit: i32,
    ) -> Result<(), EngineError> {
        let sql = format!(
            "CREATE ROLE {} WITH LOGIN PASSWORD {} CONNECTION LIMIT {}",
            quote_identifier(role)?,
            quote_password(password)?,
            connection_limit
        );
        self.execute(sql).await?;
        tracing::info!(role, "Created role");
        Ok(())
    }

    async fn create_database(&self, database: &str, owner: &str) -> Result<(), EngineError> {
        let sql = format!(
            "CREATE DATABASE {} OWNER {}",
            quote_identifier(database)?,
            quote_identifier(owner)?
        );
        self.execute(sql).await?;
        tracing::info!(database, owner, "Created database");
        Ok(())
    }

    async fn grant_all(&self, database: &str, role: &str) -> Result<(), EngineError> {
        let database = quote_identifier(database)?;
        let role = quote_identifier(role)?;
        self.execute(format!("REVOKE ALL ON DATABASE {database} FROM PUBLIC"))
            .await?;
        self.execute(format!(
            "GRANT ALL PRIVILEGES ON DATABASE {database} TO {role}"
        ))
        .await
    }

    async fn terminate_sessions(&self, database: &str) -> Result<u64, EngineError> {
        quote_identifier(database)?;
        let terminated = self
            .query_i64(
                "SELECT count(pg_terminate_backend(pid))::bigint AS terminated \
                 FROM pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()",
                database,
                "terminated",
            )
            .await?;
        Ok(terminated.max(0) as u64)
    }

    async fn drop_database_if_exists(&self, database: &str) -> Result<(), EngineError> {
        self.execute(format!(
            "DROP DATABASE IF EXISTS {}",
            quote_identifier(database)?
        ))
        .await
    }

    async fn drop_role_if_exists(&self, role: &str) -> Result<(), EngineError> {
        self.execute(format!("DROP ROLE IF EXISTS {}", quote_identifier(role)?))
            .await
    }

    async fn reload_config(&self) -> Result<(), EngineError> {
        let row = self
            .db
            .query_one(Statement::from_string(
                DbBackend::Postgres,
                "SELECT pg_reload_conf() AS reloaded".to_string(),
            ))
            .await?
            .ok_or_else(|| EngineError::Rejected("pg_reload_conf returned no row".into()))?;
        if row.try_get::<bool>("", "reloaded")? {
            Ok(())
        } else {
            Err(EngineError::Rejected("pg_reload_conf returned false".into()))
        }
    }

    async fn database_stats(&self, database: &str) -> Result<DatabaseStats, EngineError> {
        quote_identifier(database)?;
        let size_bytes = self
            .query_i64(
                "SELECT pg_database_size($1)::bigint AS size_bytes",
                database,
                "size_bytes",
            )
            .await?;
        let active_connections = self
            .query_i64(
                "SELECT count(*)::bigint AS active FROM pg_stat_activity WHERE datname = $1",
                database,
                "active",
            )
            .await?;
        Ok(DatabaseStats {
            size_bytes,
            active_connections,
        })
    }
}
