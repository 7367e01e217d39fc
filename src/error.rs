//! # Error Handling
//!
//! This module provides the error taxonomy of the provisioner and the unified
//! problem+json response format used by the HTTP layer, with trace ID
//! propagation.

use std::path::PathBuf;

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::engine::EngineError;
use crate::models::whitelist_entry;
use crate::provisioning::LifecycleStep;
use crate::telemetry;

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Always `false` for error bodies
    pub success: bool,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            success: false,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Convert a domain error, attaching the full error chain only when
    /// `include_debug` is set (development profiles).
    pub fn from_provision(error: &ProvisionError, include_debug: bool) -> Self {
        let (status, code) = error.status_and_code();

        match status {
            s if s.is_server_error() => tracing::error!(error = %error, code, "Request failed"),
            _ => tracing::debug!(error = %error, code, "Request rejected"),
        }

        let mut api_error = Self::new(status, code, &error.to_string());

        let mut details = serde_json::Map::new();
        if let ProvisionError::EnforcementStale {
            entry: Some(entry), ..
        } = error
        {
            details.insert(
                "entry".to_string(),
                json!({
                    "id": entry.id,
                    "tenant_id": entry.tenant_id,
                    "address": entry.address,
                }),
            );
        }
        if let ProvisionError::Provisioning { step, .. } = error {
            details.insert("step".to_string(), json!(step.as_str()));
        }
        if include_debug {
            details.insert("chain".to_string(), json!(error_chain(error)));
        }
        if !details.is_empty() {
            api_error = api_error.with_details(serde_json::Value::Object(details));
        }

        api_error
    }

    /// Extract current trace ID from the active tracing span (falls back to generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().simple().to_string()[..8]).into_boxed_str())
            })
    }
}

fn error_chain(error: &(dyn std::error::Error + 'static)) -> Vec<String> {
    let mut chain = vec![error.to_string()];
    let mut current = error.source();
    while let Some(source) = current {
        chain.push(source.to_string());
        current = source.source();
    }
    chain
}

pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    db_error
        .code()
        .is_some_and(|code| code == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code.as_ref()))
}

/// Errors raised by the metadata repositories and the store built on them
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[source] sea_orm::DbErr),
    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },
    #[error("uniqueness violation: {0}")]
    Conflict(String),
    #[error("metadata store call '{operation}' timed out after {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        timeout_ms: u64,
    },
}

impl RepositoryError {
    /// Classify a SeaORM error, folding unique violations into [`RepositoryError::Conflict`]
    pub fn database_error(error: sea_orm::DbErr) -> Self {
        if is_unique_violation(&error) {
            tracing::debug!(?error, "Unique constraint violation detected");
            return Self::Conflict(error.to_string());
        }
        Self::Database(error)
    }

    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Whether the store itself could not be reached (as opposed to rejecting the request)
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Database(sea_orm::DbErr::Conn(_))
                | Self::Database(sea_orm::DbErr::ConnectionAcquire(_))
        )
    }
}

/// Domain errors surfaced by the provisioning core
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// Malformed input, rejected before any I/O
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: &'static str, id: String },

    /// Uniqueness violation that is not retried
    #[error("conflict: {0}")]
    Conflict(String),

    /// An admin engine step failed; compensation has already run
    #[error("provisioning failed during {step}: {source}")]
    Provisioning {
        step: LifecycleStep,
        #[source]
        source: EngineError,
    },

    /// An engine read outside the create/delete flows failed
    #[error("engine call '{operation}' failed: {source}")]
    Engine {
        operation: &'static str,
        #[source]
        source: EngineError,
    },

    /// The access-control file is missing its managed-region markers
    #[error("access-control file {path} is corrupted: {reason}")]
    ConfigCorrupted { path: PathBuf, reason: String },

    #[error("failed to install access-control file {path}: {source}")]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is correct on disk but the engine did not reload it
    #[error("access-control file updated but engine reload failed: {source}")]
    ReloadFailed {
        #[source]
        source: EngineError,
    },

    /// Metadata committed, enforcement artifact not refreshed
    #[error("change stored but access-control enforcement is stale: {source}")]
    EnforcementStale {
        entry: Option<Box<whitelist_entry::Model>>,
        #[source]
        source: Box<ProvisionError>,
    },

    /// A failure could not be audited because the store is gone
    #[error("metadata store unreachable while recording failure ({source}); original error: {original}")]
    StoreUnreachable {
        original: Box<ProvisionError>,
        #[source]
        source: RepositoryError,
    },

    #[error("metadata store error: {0}")]
    Store(#[source] RepositoryError),

    #[error("credential hashing failed: {0}")]
    Credential(String),
}

impl From<RepositoryError> for ProvisionError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::NotFound { resource, id } => Self::NotFound { resource, id },
            RepositoryError::Conflict(message) => Self::Conflict(message),
            other => Self::Store(other),
        }
    }
}

impl ProvisionError {
    pub fn validation<S: Into<String>>(message: S) -> Self {
        Self::Validation(message.into())
    }

    /// HTTP status and SCREAMING_SNAKE_CASE code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            Self::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
            Self::NotFound { .. } => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            Self::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            Self::Provisioning { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "PROVISIONING_FAILED"),
            Self::Engine { .. } => (StatusCode::BAD_GATEWAY, "ENGINE_UNAVAILABLE"),
            Self::ConfigCorrupted { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_CORRUPTED"),
            Self::ConfigWrite { .. } => (StatusCode::INTERNAL_SERVER_ERROR, "CONFIG_WRITE_FAILED"),
            Self::ReloadFailed { .. } => (StatusCode::BAD_GATEWAY, "RELOAD_FAILED"),
            Self::EnforcementStale { .. } => (StatusCode::SERVICE_UNAVAILABLE, "ENFORCEMENT_STALE"),
            Self::StoreUnreachable { .. } => (StatusCode::SERVICE_UNAVAILABLE, "STORE_UNREACHABLE"),
            Self::Store(inner) if inner.is_unreachable() => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE")
            }
            Self::Store(_) | Self::Credential(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_SERVER_ERROR")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<ProvisionError> for ApiError {
    fn from(error: ProvisionError) -> Self {
        Self::from_provision(&error, false)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}
