//! # Tenant Lifecycle
//!
//! Creates and destroys tenants across two failure domains: the transactional
//! metadata store and the autocommit admin engine. A create attempt moves
//! through `MetaInserted → RoleCreated → DbCreated → Granted → Done`; every
//! successful step registers its undo in a [`Compensations`] list, which is
//! drained newest-first when a later step fails.
//!
//! Every failure of a create or delete is written to the audit log. If the
//! audit itself cannot be written the caller receives
//! [`ProvisionError::StoreUnreachable`] wrapping the original error.

pub mod compensation;

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::{Value, json};
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::access_control::{AccessControl, RecompileReport};
use crate::config::{AppConfig, ConnectionTemplateConfig};
use crate::connection_strings::ConnectionStrings;
use crate::credentials::{self, TenantIdentifiers};
use crate::engine::{AdminEngine, DatabaseStats, EngineError};
use crate::error::{ProvisionError, RepositoryError};
use crate::models::tenant::Model as TenantModel;
use crate::models::whitelist_entry;
use crate::repositories::NewTenant;
use crate::repositories::audit::RESOURCE_TENANT;
use crate::store::MetadataStore;

pub use compensation::{CompensationOutcome, Compensations};

const MAX_FRIENDLY_NAME_LEN: usize = 255;
const MAX_EMAIL_LEN: usize = 320;
const MAX_TENANT_CONNECTIONS: i32 = 10_000;

/// Step of a tenant lifecycle. For a failure, the step being attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleStep {
    MetaInserted,
    RoleCreated,
    DbCreated,
    Granted,
    Done,
    SessionsTerminated,
    DbDropped,
    RoleDropped,
    MetaDeleted,
}

impl LifecycleStep {
    /// Name of the action that reaches this step
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MetaInserted => "insert_metadata",
            Self::RoleCreated => "create_role",
            Self::DbCreated => "create_database",
            Self::Granted => "grant_privileges",
            Self::Done => "done",
            Self::SessionsTerminated => "terminate_sessions",
            Self::DbDropped => "drop_database",
            Self::RoleDropped => "drop_role",
            Self::MetaDeleted => "delete_metadata",
        }
    }
}

impl fmt::Display for LifecycleStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Input for [`Provisioner::create_tenant`]
#[derive(Debug, Clone, Default)]
pub struct CreateTenant {
    pub friendly_name: String,
    pub owner_email: String,
    pub max_connections: Option<i32>,
}

impl CreateTenant {
    /// Trimmed copy, or a validation error. No I/O.
    fn validated(&self, default_max_connections: i32) -> Result<(String, String, i32), ProvisionError> {
        let friendly_name = self.friendly_name.trim();
        if friendly_name.is_empty() {
            return Err(ProvisionError::validation("friendly_name is required"));
        }
        if friendly_name.chars().count() > MAX_FRIENDLY_NAME_LEN {
            return Err(ProvisionError::validation(format!(
                "friendly_name must be at most {MAX_FRIENDLY_NAME_LEN} characters"
            )));
        }

        let owner_email = self.owner_email.trim();
        if owner_email.is_empty() {
            return Err(ProvisionError::validation("owner_email is required"));
        }
        let looks_like_email = owner_email.len() <= MAX_EMAIL_LEN
            && !owner_email.chars().any(char::is_whitespace)
            && owner_email
                .split_once('@')
                .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
        if !looks_like_email {
            return Err(ProvisionError::validation("owner_email is not a valid email address"));
        }

        let max_connections = self.max_connections.unwrap_or(default_max_connections);
        if !(1..=MAX_TENANT_CONNECTIONS).contains(&max_connections) {
            return Err(ProvisionError::validation(format!(
                "max_connections must be between 1 and {MAX_TENANT_CONNECTIONS}"
            )));
        }

        Ok((friendly_name.to_string(), owner_email.to_string(), max_connections))
    }
}

/// A freshly created tenant. The plaintext password is never stored and is
/// wiped from memory when this value is dropped.
pub struct ProvisionedTenant {
    pub tenant: TenantModel,
    pub password: Zeroizing<String>,
    pub connection_strings: ConnectionStrings,
}

impl fmt::Debug for ProvisionedTenant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionedTenant")
            .field("tenant", &self.tenant.id)
            .field("database_name", &self.tenant.database_name)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct TenantDeletion {
    pub tenant: TenantModel,
    pub whitelist_entries_removed: u64,
    pub sessions_terminated: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct TenantStats {
    pub size_bytes: i64,
    pub active_connections: i64,
    pub max_connections: i32,
}

/// Produces the database and role names for one create attempt
pub type IdentifierSource = Arc<dyn Fn() -> TenantIdentifiers + Send + Sync>;

/// Orchestrates tenant lifecycles over injected store and engine handles
#[derive(Clone)]
pub struct Provisioner {
    store: MetadataStore,
    engine: Arc<dyn AdminEngine>,
    access_control: AccessControl,
    identifiers: IdentifierSource,
    templates: ConnectionTemplateConfig,
    timeout: Duration,
    create_max_attempts: u32,
    default_max_connections: i32,
}

impl Provisioner {
    pub fn new(config: &AppConfig, store: MetadataStore, engine: Arc<dyn AdminEngine>) -> Self {
        let timeout = config.operation_timeout();
        let access_control =
            AccessControl::new(store.clone(), engine.clone(), config.hba_path.clone(), timeout);
        Self {
            store,
            engine,
            access_control,
            identifiers: Arc::new(credentials::new_identifiers),
            templates: config.connection.clone(),
            timeout,
            create_max_attempts: config.create_max_attempts.max(1),
            default_max_connections: config.default_tenant_max_connections,
        }
    }

    /// Replace the random name generator, e.g. to force identifier collisions.
    pub fn with_identifier_source(
        mut self,
        source: impl Fn() -> TenantIdentifiers + Send + Sync + 'static,
    ) -> Self {
        self.identifiers = Arc::new(source);
        self
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    pub fn access_control(&self) -> &AccessControl {
        &self.access_control
    }

    /// Create a tenant database, its login role, and the metadata row.
    ///
    /// Identifier collisions surface as a `Conflict` from the metadata store
    /// and are retried with fresh identifiers up to the configured attempt
    /// count. Engine failures are compensated before the error is returned.
    pub async fn create_tenant(&self, request: CreateTenant) -> Result<ProvisionedTenant, ProvisionError> {
        let (friendly_name, owner_email, max_connections) =
            request.validated(self.default_max_connections)?;
        let started = Instant::now();

        let result = self
            .create_with_retry(friendly_name, owner_email, max_connections)
            .await;

        let outcome = if result.is_ok() { "success" } else { "failure" };
        counter!("tenant_create_total", "outcome" => outcome).increment(1);
        histogram!("tenant_create_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        result
    }

    async fn create_with_retry(
        &self,
        friendly_name: String,
        owner_email: String,
        max_connections: i32,
    ) -> Result<ProvisionedTenant, ProvisionError> {
        let mut attempt = 1;
        loop {
            let identifiers = (self.identifiers)();
            let password = credentials::new_password();
            let password_hash = {
                let password = password.clone();
                tokio::task::spawn_blocking(move || credentials::hash_password(&password))
                    .await
                    .map_err(|err| ProvisionError::Credential(err.to_string()))?
                    .map_err(|err| ProvisionError::Credential(err.to_string()))?
            };
            let record = NewTenant {
                database_name: identifiers.database_name.clone(),
                role_name: identifiers.role_name.clone(),
                password_hash,
                owner_email: owner_email.clone(),
                friendly_name: friendly_name.clone(),
                max_connections,
            };

            match self.store.create_tenant_record(record).await {
                Ok(tenant) => {
                    info!(tenant_id = %tenant.id, database = %tenant.database_name, attempt, "Tenant metadata inserted");
                    return self.provision_engine(tenant, password).await;
                }
                Err(RepositoryError::Conflict(reason)) if attempt < self.create_max_attempts => {
                    warn!(attempt, database = %identifiers.database_name, %reason, "Identifier collision, regenerating");
                    counter!("tenant_create_identifier_retries_total").increment(1);
                    attempt += 1;
                }
                Err(err) => {
                    let error = ProvisionError::from(err);
                    error!(attempt, error = %error, "Tenant metadata insert failed");
                    return Err(self
                        .audit_create_failure(&identifiers, None, LifecycleStep::MetaInserted, error, Vec::new())
                        .await);
                }
            }
        }
    }

    async fn provision_engine(
        &self,
        tenant: TenantModel,
        password: Zeroizing<String>,
    ) -> Result<ProvisionedTenant, ProvisionError> {
        let identifiers = TenantIdentifiers {
            database_name: tenant.database_name.clone(),
            role_name: tenant.role_name.clone(),
        };
        let mut compensations = Compensations::new();
        {
            let store = self.store.clone();
            let tenant_id = tenant.id;
            let reason = json!({ "database_name": tenant.database_name });
            compensations.push("purge_metadata", move || async move {
                store.purge_tenant_record(tenant_id, reason).await
            });
        }

        let step = LifecycleStep::RoleCreated;
        if let Err(source) = self
            .engine_call(
                step,
                self.engine
                    .create_role(&tenant.role_name, &password, tenant.max_connections),
            )
            .await
        {
            return Err(self.abort_create(&identifiers, &tenant, step, source, compensations).await);
        }
        {
            let engine = self.engine.clone();
            let role = tenant.role_name.clone();
            let timeout = self.timeout;
            compensations.push("drop_role", move || async move {
                with_timeout(timeout, "drop_role", engine.drop_role_if_exists(&role)).await
            });
        }

        let step = LifecycleStep::DbCreated;
        if let Err(source) = self
            .engine_call(
                step,
                self.engine
                    .create_database(&tenant.database_name, &tenant.role_name),
            )
            .await
        {
            return Err(self.abort_create(&identifiers, &tenant, step, source, compensations).await);
        }
        {
            let engine = self.engine.clone();
            let database = tenant.database_name.clone();
            let timeout = self.timeout;
            compensations.push("drop_database", move || async move {
                with_timeout(timeout, "drop_database", engine.drop_database_if_exists(&database)).await
            });
        }
        // Registered separately and last so it runs first; its failure must not skip the drop.
        {
            let engine = self.engine.clone();
            let database = tenant.database_name.clone();
            let timeout = self.timeout;
            compensations.push("terminate_sessions", move || async move {
                with_timeout(timeout, "terminate_sessions", engine.terminate_sessions(&database))
                    .await
                    .map(|_| ())
            });
        }

        let step = LifecycleStep::Granted;
        if let Err(source) = self
            .engine_call(
                step,
                self.engine.grant_all(&tenant.database_name, &tenant.role_name),
            )
            .await
        {
            return Err(self.abort_create(&identifiers, &tenant, step, source, compensations).await);
        }

        info!(
            tenant_id = %tenant.id,
            database = %tenant.database_name,
            role = %tenant.role_name,
            step = %LifecycleStep::Done,
            "Tenant provisioned"
        );

        let connection_strings = ConnectionStrings::build(
            &self.templates,
            &tenant.database_name,
            &tenant.role_name,
            &password,
        );
        Ok(ProvisionedTenant {
            tenant,
            password,
            connection_strings,
        })
    }

    async fn abort_create(
        &self,
        identifiers: &TenantIdentifiers,
        tenant: &TenantModel,
        step: LifecycleStep,
        source: EngineError,
        compensations: Compensations,
    ) -> ProvisionError {
        error!(
            tenant_id = %tenant.id,
            database = %tenant.database_name,
            %step,
            error = %source,
            pending = ?compensations.pending(),
            "Tenant provisioning step failed, compensating"
        );
        let outcomes = compensations.drain().await;
        let error = ProvisionError::Provisioning { step, source };
        self.audit_create_failure(identifiers, Some(tenant.id), step, error, outcomes)
            .await
    }

    async fn audit_create_failure(
        &self,
        identifiers: &TenantIdentifiers,
        tenant_id: Option<Uuid>,
        step: LifecycleStep,
        error: ProvisionError,
        compensations: Vec<CompensationOutcome>,
    ) -> ProvisionError {
        let resource_id = tenant_id
            .map(|id| id.to_string())
            .unwrap_or_else(|| identifiers.database_name.clone());
        let details = json!({
            "step": step.as_str(),
            "database_name": identifiers.database_name,
            "role_name": identifiers.role_name,
            "error": error.to_string(),
            "compensations": compensations,
        });
        self.audit_failure("tenant.create_failed", resource_id, details, error)
            .await
    }

    /// Record a failure; escalate to `StoreUnreachable` if the audit write fails.
    async fn audit_failure(
        &self,
        action: &str,
        resource_id: String,
        details: Value,
        error: ProvisionError,
    ) -> ProvisionError {
        match self
            .store
            .append_audit(action, RESOURCE_TENANT, &resource_id, details)
            .await
        {
            Ok(_) => error,
            Err(source) => {
                error!(
                    action,
                    %resource_id,
                    original = %error,
                    audit_error = %source,
                    "Failure could not be audited; metadata store unreachable"
                );
                ProvisionError::StoreUnreachable {
                    original: Box::new(error),
                    source,
                }
            }
        }
    }

    /// Drop a tenant's engine resources, then its metadata.
    ///
    /// Engine objects go first: a metadata row without a database is easier to
    /// clean up than a database nobody knows about.
    pub async fn delete_tenant(&self, tenant_id: Uuid) -> Result<TenantDeletion, ProvisionError> {
        let started = Instant::now();
        let result = self.delete_inner(tenant_id).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(ProvisionError::NotFound { .. }) => "not_found",
            Err(ProvisionError::EnforcementStale { .. }) => "enforcement_stale",
            Err(_) => "failure",
        };
        counter!("tenant_delete_total", "outcome" => outcome).increment(1);
        histogram!("tenant_delete_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        result
    }

    async fn delete_inner(&self, tenant_id: Uuid) -> Result<TenantDeletion, ProvisionError> {
        let tenant = self.store.get_tenant(tenant_id).await?;

        let step = LifecycleStep::SessionsTerminated;
        let sessions_terminated = match self
            .engine_call(step, self.engine.terminate_sessions(&tenant.database_name))
            .await
        {
            Ok(count) => count,
            Err(source) => return Err(self.abort_delete(&tenant, step, source).await),
        };

        let step = LifecycleStep::DbDropped;
        if let Err(source) = self
            .engine_call(step, self.engine.drop_database_if_exists(&tenant.database_name))
            .await
        {
            return Err(self.abort_delete(&tenant, step, source).await);
        }

        let step = LifecycleStep::RoleDropped;
        if let Err(source) = self
            .engine_call(step, self.engine.drop_role_if_exists(&tenant.role_name))
            .await
        {
            return Err(self.abort_delete(&tenant, step, source).await);
        }

        let whitelist_entries_removed = match self.store.delete_tenant_record(&tenant).await {
            Ok(removed) => removed,
            Err(err) => {
                let error = ProvisionError::from(err);
                error!(%tenant_id, error = %error, "Engine resources dropped but metadata delete failed");
                let details = json!({
                    "step": LifecycleStep::MetaDeleted.as_str(),
                    "database_name": tenant.database_name,
                    "error": error.to_string(),
                });
                return Err(self
                    .audit_failure("tenant.delete_failed", tenant_id.to_string(), details, error)
                    .await);
            }
        };

        info!(
            %tenant_id,
            database = %tenant.database_name,
            sessions_terminated,
            whitelist_entries_removed,
            "Tenant deleted"
        );

        if whitelist_entries_removed > 0 {
            if let Err(err) = self.access_control.recompile().await {
                warn!(%tenant_id, error = %err, "Tenant deleted but access-control file is stale");
                let details = json!({
                    "step": "recompile_access_control",
                    "database_name": tenant.database_name,
                    "error": err.to_string(),
                });
                let err = self
                    .audit_failure("tenant.delete_failed", tenant_id.to_string(), details, err)
                    .await;
                return Err(ProvisionError::EnforcementStale {
                    entry: None,
                    source: Box::new(err),
                });
            }
        }

        Ok(TenantDeletion {
            tenant,
            whitelist_entries_removed,
            sessions_terminated,
        })
    }

    async fn abort_delete(
        &self,
        tenant: &TenantModel,
        step: LifecycleStep,
        source: EngineError,
    ) -> ProvisionError {
        error!(tenant_id = %tenant.id, database = %tenant.database_name, %step, error = %source, "Tenant delete step failed");
        let error = ProvisionError::Provisioning { step, source };
        let details = json!({
            "step": step.as_str(),
            "database_name": tenant.database_name,
            "role_name": tenant.role_name,
            "error": error.to_string(),
        });
        self.audit_failure("tenant.delete_failed", tenant.id.to_string(), details, error)
            .await
    }

    /// Size and connection figures. The metadata lookup comes first, so an
    /// unknown tenant never reaches the engine.
    pub async fn tenant_stats(&self, tenant_id: Uuid) -> Result<TenantStats, ProvisionError> {
        let tenant = self.store.get_tenant(tenant_id).await?;
        let DatabaseStats {
            size_bytes,
            active_connections,
        } = with_timeout(
            self.timeout,
            "database_stats",
            self.engine.database_stats(&tenant.database_name),
        )
        .await
        .map_err(|source| ProvisionError::Engine {
            operation: "database_stats",
            source,
        })?;

        Ok(TenantStats {
            size_bytes,
            active_connections,
            max_connections: tenant.max_connections,
        })
    }

    pub async fn get_tenant(&self, tenant_id: Uuid) -> Result<TenantModel, ProvisionError> {
        Ok(self.store.get_tenant(tenant_id).await?)
    }

    pub async fn list_tenants(&self) -> Result<Vec<TenantModel>, ProvisionError> {
        Ok(self.store.list_tenants().await?)
    }

    pub async fn list_whitelist(
        &self,
        tenant_id: Uuid,
    ) -> Result<Vec<whitelist_entry::Model>, ProvisionError> {
        Ok(self.store.list_whitelist(tenant_id).await?)
    }

    pub async fn add_ip(
        &self,
        tenant_id: Uuid,
        address: &str,
        description: Option<String>,
    ) -> Result<whitelist_entry::Model, ProvisionError> {
        self.access_control
            .add_ip(tenant_id, address, description)
            .await
    }

    pub async fn remove_ip(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<whitelist_entry::Model, ProvisionError> {
        self.access_control.remove_ip(tenant_id, entry_id).await
    }

    pub async fn recompile(&self) -> Result<RecompileReport, ProvisionError> {
        self.access_control.recompile().await
    }

    /// Masked connection strings for an existing tenant
    pub async fn connection_strings(&self, tenant_id: Uuid) -> Result<ConnectionStrings, ProvisionError> {
        let tenant = self.store.get_tenant(tenant_id).await?;
        Ok(ConnectionStrings::masked(
            &self.templates,
            &tenant.database_name,
            &tenant.role_name,
        ))
    }

    async fn engine_call<T>(
        &self,
        step: LifecycleStep,
        future: impl Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        with_timeout(self.timeout, step.as_str(), future).await
    }
}

/// Run an engine call under `timeout`; a timeout counts as a step failure.
async fn with_timeout<T>(
    timeout: Duration,
    operation: &'static str,
    future: impl Future<Output = Result<T, EngineError>>,
) -> Result<T, EngineError> {
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result,
        Err(_) => Err(EngineError::Timeout {
            operation,
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}
