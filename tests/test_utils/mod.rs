//! Test utilities shared by the integration tests.
//!
//! Provides an in-memory SQLite metadata store, a recording [`AdminEngine`]
//! fake with failure injection, and a temporary access-control file.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use migration::{Migrator, MigratorTrait};
use provisioner::access_control::hba_file::{BEGIN_MARKER, END_MARKER};
use provisioner::config::{AppConfig, ConnectionTemplateConfig};
use provisioner::engine::{AdminEngine, DatabaseStats, EngineError};
use provisioner::provisioning::Provisioner;
use provisioner::server::{AppState, create_app};
use provisioner::store::MetadataStore;
use sea_orm::{ConnectionTrait, Database, DatabaseConnection, Statement};
use tempfile::TempDir;

pub const OPERATOR_TOKEN: &str = "test-operator-token";

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    db.execute(Statement::from_string(
        db.get_database_backend(),
        "PRAGMA foreign_keys = ON".to_string(),
    ))
    .await?;
    Ok(db)
}

#[derive(Default)]
struct EngineState {
    /// Role name to connection limit
    roles: BTreeMap<String, i32>,
    /// Database name to owning role
    databases: BTreeMap<String, String>,
    calls: Vec<String>,
    fail_on: HashSet<&'static str>,
    hang_on: HashSet<&'static str>,
    close_store_on: Option<(&'static str, DatabaseConnection)>,
    reloads: usize,
}

/// In-memory engine that records every call and can be told to fail or hang
#[derive(Default)]
pub struct RecordingEngine {
    state: Mutex<EngineState>,
}

impl RecordingEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call of `operation` fail with [`EngineError::Rejected`]
    pub fn fail_on(&self, operation: &'static str) {
        self.state.lock().unwrap().fail_on.insert(operation);
    }

    pub fn clear_failures(&self) {
        let mut state = self.state.lock().unwrap();
        state.fail_on.clear();
        state.hang_on.clear();
    }

    /// Make every call of `operation` block far beyond any test timeout
    pub fn hang_on(&self, operation: &'static str) {
        self.state.lock().unwrap().hang_on.insert(operation);
    }

    /// Close the metadata store's pool when `operation` is next called.
    pub fn close_store_on(&self, operation: &'static str, db: DatabaseConnection) {
        self.state.lock().unwrap().close_store_on = Some((operation, db));
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn roles(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().roles.keys().cloned().collect()
    }

    pub fn databases(&self) -> BTreeSet<String> {
        self.state.lock().unwrap().databases.keys().cloned().collect()
    }

    pub fn connection_limit(&self, role: &str) -> Option<i32> {
        self.state.lock().unwrap().roles.get(role).copied()
    }

    pub fn reloads(&self) -> usize {
        self.state.lock().unwrap().reloads
    }

    async fn enter(&self, operation: &'static str, target: &str) -> Result<(), EngineError> {
        let (fail, hang, close) = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(format!("{operation}:{target}"));
            let close = if state
                .close_store_on
                .as_ref()
                .is_some_and(|(op, _)| *op == operation)
            {
                state.close_store_on.take().map(|(_, db)| db)
            } else {
                None
            };
            (
                state.fail_on.contains(operation),
                state.hang_on.contains(operation),
                close,
            )
        };
        if let Some(db) = close {
            db.close().await.unwrap();
        }
        if hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if fail {
            return Err(EngineError::Rejected(format!("injected failure in {operation}")));
        }
        Ok(())
    }
}

#[async_trait]
impl AdminEngine for RecordingEngine {
    async fn create_role(
        &self,
        role: &str,
        password: &str,
        connection_limit: i32,
    ) -> Result<(), EngineError> {
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        self.enter("create_role", role).await?;
        self.state
            .lock()
            .unwrap()
            .roles
            .insert(role.to_string(), connection_limit);
        Ok(())
    }

    async fn create_database(&self, database: &str, owner: &str) -> Result<(), EngineError> {
        self.enter("create_database", database).await?;
        let mut state = self.state.lock().unwrap();
        if !state.roles.contains_key(owner) {
            return Err(EngineError::Rejected(format!("role {owner} does not exist")));
        }
        state
            .databases
            .insert(database.to_string(), owner.to_string());
        Ok(())
    }

    async fn grant_all(&self, database: &str, _role: &str) -> Result<(), EngineError> {
        self.enter("grant_all", database).await
    }

    async fn terminate_sessions(&self, database: &str) -> Result<u64, EngineError> {
        self.enter("terminate_sessions", database).await?;
        Ok(0)
    }

    async fn drop_database_if_exists(&self, database: &str) -> Result<(), EngineError> {
        self.enter("drop_database", database).await?;
        self.state.lock().unwrap().databases.remove(database);
        Ok(())
    }

    async fn drop_role_if_exists(&self, role: &str) -> Result<(), EngineError> {
        self.enter("drop_role", role).await?;
        let mut state = self.state.lock().unwrap();
        if let Some((database, _)) = state.databases.iter().find(|(_, owner)| *owner == role) {
            return Err(EngineError::Rejected(format!(
                "role {role} cannot be dropped because it owns database {database}"
            )));
        }
        state.roles.remove(role);
        Ok(())
    }

    async fn reload_config(&self) -> Result<(), EngineError> {
        self.enter("reload_config", "").await?;
        self.state.lock().unwrap().reloads += 1;
        Ok(())
    }

    async fn database_stats(&self, database: &str) -> Result<DatabaseStats, EngineError> {
        self.enter("database_stats", database).await?;
        Ok(DatabaseStats {
            size_bytes: 8_192_000,
            active_connections: 3,
        })
    }
}

/// Access-control file with unmanaged content around an empty managed region
pub fn hba_template() -> String {
    format!(
        "# TYPE DATABASE USER ADDRESS METHOD\nlocal all postgres peer\n{BEGIN_MARKER}\n{END_MARKER}\nhost all all 127.0.0.1/32 scram-sha-256\n"
    )
}

/// Everything a provisioning test needs, wired together
pub struct TestContext {
    pub db: DatabaseConnection,
    pub engine: Arc<RecordingEngine>,
    pub provisioner: Provisioner,
    pub config: AppConfig,
    pub hba_path: PathBuf,
    _dir: TempDir,
}

impl TestContext {
    pub async fn new() -> Result<Self> {
        Self::with_timeout_ms(5_000).await
    }

    pub async fn with_timeout_ms(operation_timeout_ms: u64) -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let hba_path = dir.path().join("pg_hba.conf");
        std::fs::write(&hba_path, hba_template())?;

        let config = AppConfig {
            profile: "test".to_string(),
            operation_timeout_ms,
            hba_path: hba_path.clone(),
            operator_tokens: vec![OPERATOR_TOKEN.to_string()],
            connection: ConnectionTemplateConfig {
                public_host: "db.example.com".to_string(),
                ..Default::default()
            },
            ..Default::default()
        };

        let db = setup_test_db().await?;
        let engine = RecordingEngine::new();
        let store = MetadataStore::new(db.clone(), config.operation_timeout());
        let provisioner = Provisioner::new(&config, store, engine.clone());

        Ok(Self {
            db,
            engine,
            provisioner,
            config,
            hba_path,
            _dir: dir,
        })
    }

    pub fn hba_contents(&self) -> String {
        std::fs::read_to_string(&self.hba_path).unwrap()
    }

    pub fn app(&self) -> axum::Router {
        create_app(AppState::new(self.config.clone(), self.provisioner.clone()))
    }
}
