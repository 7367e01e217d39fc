//! # Access Control Compiler
//!
//! Keeps the engine's host-based-access file in line with the per-tenant
//! allow-lists held in the metadata store. The metadata store is the source
//! of truth; the file is a derived artifact regenerated by [`AccessControl::recompile`].
//!
//! Whitelist mutations commit first and recompile second. When the recompile
//! fails after the commit the change is kept and the caller receives
//! [`ProvisionError::EnforcementStale`].

pub mod address;
pub mod hba_file;
pub mod rules;

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::engine::{AdminEngine, EngineError};
use crate::error::ProvisionError;
use crate::models::whitelist_entry;
use crate::repositories::audit::RESOURCE_ACCESS_CONTROL;
use crate::store::MetadataStore;

pub use address::canonicalize;
pub use rules::{HbaRule, parse_rules};

const MAX_DESCRIPTION_LEN: usize = 255;

/// Serialises every read-modify-rename of the access-control file in this process
static RECOMPILE_LOCK: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

/// Outcome of a successful recompile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct RecompileReport {
    /// Active tenants with at least one whitelist entry
    pub tenants: usize,
    /// Rule lines in the managed region, deny pairs included
    pub rules: usize,
    /// Whether the file content changed on disk
    pub changed: bool,
}

#[derive(Clone)]
pub struct AccessControl {
    store: MetadataStore,
    engine: Arc<dyn AdminEngine>,
    hba_path: PathBuf,
    timeout: Duration,
}

impl AccessControl {
    pub fn new(
        store: MetadataStore,
        engine: Arc<dyn AdminEngine>,
        hba_path: PathBuf,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            engine,
            hba_path,
            timeout,
        }
    }

    pub fn hba_path(&self) -> &Path {
        &self.hba_path
    }

    /// Regenerate the managed region from the current whitelist state,
    /// install it, and ask the engine to reload.
    ///
    /// Idempotent: with no intervening whitelist change a second run produces
    /// byte-identical output and skips the write.
    pub async fn recompile(&self) -> Result<RecompileReport, ProvisionError> {
        let _guard = RECOMPILE_LOCK.lock().await;
        let started = Instant::now();

        let result = self.recompile_locked().await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(ProvisionError::ReloadFailed { .. }) => "reload_failed",
            Err(_) => "failure",
        };
        counter!("access_control_recompile_total", "outcome" => outcome).increment(1);
        histogram!("access_control_recompile_duration_ms")
            .record(started.elapsed().as_secs_f64() * 1_000.0);

        result
    }

    async fn recompile_locked(&self) -> Result<RecompileReport, ProvisionError> {
        let snapshot = self.store.active_rules().await?;
        let rules = rules::build_rules(&snapshot);
        let managed = rules::render_managed_region(&snapshot);
        let tenants = snapshot.iter().filter(|(_, e)| !e.is_empty()).count();

        let current = self.read_file().await?;
        let updated = hba_file::splice(&current, &managed).map_err(|reason| {
            ProvisionError::ConfigCorrupted {
                path: self.hba_path.clone(),
                reason,
            }
        })?;

        let changed = updated != current;
        if changed {
            self.with_file_timeout(hba_file::install(&self.hba_path, &updated))
                .await
                .map_err(|source| ProvisionError::ConfigWrite {
                    path: self.hba_path.clone(),
                    source,
                })?;
            info!(path = %self.hba_path.display(), tenants, rules = rules.len(), "Installed access-control file");
        } else {
            debug!(path = %self.hba_path.display(), "Access-control file already up to date");
        }

        self.reload().await?;

        Ok(RecompileReport {
            tenants,
            rules: rules.len(),
            changed,
        })
    }

    async fn read_file(&self) -> Result<String, ProvisionError> {
        self.with_file_timeout(tokio::fs::read_to_string(&self.hba_path))
            .await
            .map_err(|err| ProvisionError::ConfigCorrupted {
                path: self.hba_path.clone(),
                reason: format!("unreadable: {err}"),
            })
    }

    async fn reload(&self) -> Result<(), ProvisionError> {
        let result = match tokio::time::timeout(self.timeout, self.engine.reload_config()).await {
            Ok(result) => result,
            Err(_) => Err(EngineError::Timeout {
                operation: "reload_config",
                timeout_ms: self.timeout.as_millis() as u64,
            }),
        };
        result.map_err(|source| ProvisionError::ReloadFailed { source })
    }

    async fn with_file_timeout<T>(
        &self,
        future: impl Future<Output = std::io::Result<T>>,
    ) -> std::io::Result<T> {
        match tokio::time::timeout(self.timeout, future).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("file operation timed out after {}ms", self.timeout.as_millis()),
            )),
        }
    }

    /// Validate, store and enforce a new allow-list address for a tenant.
    pub async fn add_ip(
        &self,
        tenant_id: Uuid,
        address: &str,
        description: Option<String>,
    ) -> Result<whitelist_entry::Model, ProvisionError> {
        let address = canonicalize(address)?;
        let description = normalize_description(description)?;

        let entry = self
            .store
            .insert_whitelist_entry(tenant_id, address, description)
            .await?;
        info!(%tenant_id, entry_id = %entry.id, address = %entry.address, "Whitelist entry added");

        self.enforce(entry, "whitelist.added").await
    }

    /// Remove an allow-list entry and enforce the result.
    pub async fn remove_ip(
        &self,
        tenant_id: Uuid,
        entry_id: Uuid,
    ) -> Result<whitelist_entry::Model, ProvisionError> {
        let entry = self
            .store
            .delete_whitelist_entry(tenant_id, entry_id)
            .await?;
        info!(%tenant_id, %entry_id, address = %entry.address, "Whitelist entry removed");

        self.enforce(entry, "whitelist.removed").await
    }

    async fn enforce(
        &self,
        entry: whitelist_entry::Model,
        change: &'static str,
    ) -> Result<whitelist_entry::Model, ProvisionError> {
        match self.recompile().await {
            Ok(_) => Ok(entry),
            Err(err) => {
                warn!(
                    entry_id = %entry.id,
                    tenant_id = %entry.tenant_id,
                    change,
                    error = %err,
                    "Whitelist change stored but access-control file is stale"
                );
                self.record_stale(&entry, change, &err).await;
                Err(ProvisionError::EnforcementStale {
                    entry: Some(Box::new(entry)),
                    source: Box::new(err),
                })
            }
        }
    }

    /// Best-effort audit of a failed enforcement after a committed change
    pub(crate) async fn record_stale(
        &self,
        entry: &whitelist_entry::Model,
        change: &str,
        error: &ProvisionError,
    ) {
        let details = json!({
            "change": change,
            "tenant_id": entry.tenant_id,
            "entry_id": entry.id,
            "address": entry.address,
            "error": error.to_string(),
        });
        if let Err(audit_err) = self
            .store
            .append_audit(
                "access_control.recompile_failed",
                RESOURCE_ACCESS_CONTROL,
                self.hba_path.display(),
                details,
            )
            .await
        {
            warn!(error = %audit_err, "Could not audit stale access-control state");
        }
    }
}

fn normalize_description(description: Option<String>) -> Result<Option<String>, ProvisionError> {
    let Some(description) = description else {
        return Ok(None);
    };
    let trimmed = description.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    if trimmed.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(ProvisionError::validation(format!(
            "description must be at most {MAX_DESCRIPTION_LEN} characters"
        )));
    }
    if trimmed.chars().any(char::is_control) {
        return Err(ProvisionError::validation(
            "description must not contain control characters",
        ));
    }
    Ok(Some(trimmed.to_string()))
}

/// Read a file and return the rules currently in its managed region.
pub async fn inspect_file(path: &Path) -> Result<Vec<HbaRule>, ProvisionError> {
    let corrupted = |reason: String| ProvisionError::ConfigCorrupted {
        path: path.to_path_buf(),
        reason,
    };
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|err| corrupted(format!("unreadable: {err}")))?;
    let region = hba_file::managed_text(&contents).map_err(corrupted)?;
    parse_rules(region).map_err(corrupted)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptions_are_trimmed_and_bounded() {
        assert_eq!(normalize_description(None).unwrap(), None);
        assert_eq!(normalize_description(Some("  ".into())).unwrap(), None);
        assert_eq!(
            normalize_description(Some(" office ".into())).unwrap().as_deref(),
            Some("office")
        );
        assert!(normalize_description(Some("a".repeat(256))).is_err());
        assert!(normalize_description(Some("line\nbreak".into())).is_err());
    }
}
