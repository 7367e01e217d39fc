//! # Tenants API Handlers
//!
//! Tenant creation, inspection and deletion.

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::OperatorAuth;
use crate::connection_strings::ConnectionStrings;
use crate::error::ApiError;
use crate::handlers::types::{ApiResponse, TenantDto, location, parse_uuid};
use crate::provisioning::{CreateTenant, TenantStats};
use crate::server::AppState;

/// Request payload for creating a new tenant
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreateTenantRequestDto {
    /// Display name for the tenant (required, max 255 characters)
    #[schema(example = "Acme staging")]
    #[serde(default)]
    pub friendly_name: String,
    /// Contact address of the owner (required)
    #[schema(example = "owner@example.com")]
    #[serde(default)]
    pub owner_email: String,
    /// Connection limit for the tenant role; the configured default when absent
    pub max_connections: Option<i32>,
}

/// Tenant plus the one-time credentials returned by creation
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct CreatedTenantDto {
    pub tenant: TenantDto,
    /// Plaintext role password. Shown once and never stored.
    pub password: String,
    pub connection_strings: ConnectionStrings,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DeletedTenantDto {
    pub id: Uuid,
    pub database_name: String,
    pub whitelist_entries_removed: u64,
    pub sessions_terminated: u64,
}

/// Create a new tenant
#[utoipa::path(
    post,
    path = "/api/v1/tenants",
    security(("bearer_auth" = [])),
    request_body = CreateTenantRequestDto,
    responses(
        (status = 201, description = "Tenant provisioned", body = ApiResponse<CreatedTenantDto>, headers(
            ("Location", description = "URL of the created tenant"),
        )),
        (status = 400, description = "Validation failed", body = ApiError),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError),
        (status = 500, description = "Provisioning failed; compensation has run", body = ApiError),
        (status = 503, description = "Metadata store unreachable", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn create_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    payload: Result<Json<CreateTenantRequestDto>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload?;

    let provisioned = state
        .provisioner
        .create_tenant(CreateTenant {
            friendly_name: request.friendly_name,
            owner_email: request.owner_email,
            max_connections: request.max_connections,
        })
        .await
        .map_err(|err| state.api_error(err))?;

    let tenant = TenantDto::from(&provisioned.tenant);
    let headers = location(format!("/api/v1/tenants/{}", tenant.id));
    let body = ApiResponse::ok(
        "Tenant provisioned",
        CreatedTenantDto {
            tenant,
            password: provisioned.password.as_str().to_owned(),
            connection_strings: provisioned.connection_strings.clone(),
        },
    );

    Ok((StatusCode::CREATED, headers, Json(body)))
}

/// List tenants, newest first
#[utoipa::path(
    get,
    path = "/api/v1/tenants",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Tenants", body = ApiResponse<Vec<TenantDto>>),
        (status = 401, description = "Missing or invalid bearer token", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn list_tenants(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<ApiResponse<Vec<TenantDto>>>, ApiError> {
    let tenants = state
        .provisioner
        .list_tenants()
        .await
        .map_err(|err| state.api_error(err))?;
    let data: Vec<TenantDto> = tenants.iter().map(TenantDto::from).collect();
    Ok(Json(ApiResponse::ok(format!("{} tenant(s)", data.len()), data)))
}

/// Get a tenant by ID
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Tenant UUID")
    ),
    responses(
        (status = 200, description = "Tenant", body = ApiResponse<TenantDto>),
        (status = 400, description = "Malformed id", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn get_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<TenantDto>>, ApiError> {
    let tenant_id = parse_uuid(&id, "id")?;
    let tenant = state
        .provisioner
        .get_tenant(tenant_id)
        .await
        .map_err(|err| state.api_error(err))?;
    Ok(Json(ApiResponse::ok("Tenant found", TenantDto::from(&tenant))))
}

/// Database size and connection usage
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{id}/stats",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Tenant UUID")
    ),
    responses(
        (status = 200, description = "Tenant statistics", body = ApiResponse<TenantStats>),
        (status = 404, description = "Tenant not found", body = ApiError),
        (status = 502, description = "Engine unavailable", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn tenant_stats(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<TenantStats>>, ApiError> {
    let tenant_id = parse_uuid(&id, "id")?;
    let stats = state
        .provisioner
        .tenant_stats(tenant_id)
        .await
        .map_err(|err| state.api_error(err))?;
    Ok(Json(ApiResponse::ok("Tenant statistics", stats)))
}

/// Drop a tenant's database, role, whitelist and metadata
#[utoipa::path(
    delete,
    path = "/api/v1/tenants/{id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Tenant UUID")
    ),
    responses(
        (status = 200, description = "Tenant deleted", body = ApiResponse<DeletedTenantDto>),
        (status = 404, description = "Tenant not found", body = ApiError),
        (status = 500, description = "Engine step failed", body = ApiError),
        (status = 503, description = "Deleted, but access control is stale", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn delete_tenant(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<DeletedTenantDto>>, ApiError> {
    let tenant_id = parse_uuid(&id, "id")?;
    let deletion = state
        .provisioner
        .delete_tenant(tenant_id)
        .await
        .map_err(|err| state.api_error(err))?;

    Ok(Json(ApiResponse::ok(
        "Tenant deleted",
        DeletedTenantDto {
            id: deletion.tenant.id,
            database_name: deletion.tenant.database_name,
            whitelist_entries_removed: deletion.whitelist_entries_removed,
            sessions_terminated: deletion.sessions_terminated,
        },
    )))
}

/// Connection strings with the password masked
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{id}/connection-strings",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Tenant UUID")
    ),
    responses(
        (status = 200, description = "Masked connection strings", body = ApiResponse<ConnectionStrings>),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "tenants"
)]
pub async fn connection_strings(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<ConnectionStrings>>, ApiError> {
    let tenant_id = parse_uuid(&id, "id")?;
    let strings = state
        .provisioner
        .connection_strings(tenant_id)
        .await
        .map_err(|err| state.api_error(err))?;
    Ok(Json(ApiResponse::ok("Connection strings", strings)))
}
