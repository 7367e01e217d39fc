//! # Whitelist API Handlers

use axum::{
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::access_control::RecompileReport;
use crate::auth::OperatorAuth;
use crate::error::ApiError;
use crate::handlers::types::{ApiResponse, WhitelistEntryDto, location, parse_uuid};
use crate::server::AppState;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct AddWhitelistEntryRequestDto {
    /// IPv4 address or CIDR; a bare address is stored as /32
    #[schema(example = "203.0.113.7/32")]
    #[serde(default)]
    pub address: String,
    #[schema(example = "office VPN")]
    pub description: Option<String>,
}

/// Allow an address to reach a tenant's database
#[utoipa::path(
    post,
    path = "/api/v1/tenants/{id}/whitelist",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Tenant UUID")
    ),
    request_body = AddWhitelistEntryRequestDto,
    responses(
        (status = 201, description = "Entry stored and enforced", body = ApiResponse<WhitelistEntryDto>),
        (status = 400, description = "Malformed address", body = ApiError),
        (status = 404, description = "Tenant not found", body = ApiError),
        (status = 409, description = "Address already whitelisted", body = ApiError),
        (status = 503, description = "Entry stored but access control is stale", body = ApiError)
    ),
    tag = "whitelist"
)]
pub async fn add_entry(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<String>,
    payload: Result<Json<AddWhitelistEntryRequestDto>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let tenant_id = parse_uuid(&id, "id")?;
    let Json(request) = payload?;

    let entry = state
        .provisioner
        .add_ip(tenant_id, &request.address, request.description)
        .await
        .map_err(|err| state.api_error(err))?;

    let headers = location(format!("/api/v1/tenants/{tenant_id}/whitelist/{}", entry.id));
    Ok((
        StatusCode::CREATED,
        headers,
        Json(ApiResponse::ok(
            "Whitelist entry added",
            WhitelistEntryDto::from(&entry),
        )),
    ))
}

/// Whitelist of a tenant, newest first
#[utoipa::path(
    get,
    path = "/api/v1/tenants/{id}/whitelist",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Tenant UUID")
    ),
    responses(
        (status = 200, description = "Entries", body = ApiResponse<Vec<WhitelistEntryDto>>),
        (status = 404, description = "Tenant not found", body = ApiError)
    ),
    tag = "whitelist"
)]
pub async fn list_entries(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<Vec<WhitelistEntryDto>>>, ApiError> {
    let tenant_id = parse_uuid(&id, "id")?;
    let entries = state
        .provisioner
        .list_whitelist(tenant_id)
        .await
        .map_err(|err| state.api_error(err))?;
    let data: Vec<WhitelistEntryDto> = entries.iter().map(WhitelistEntryDto::from).collect();
    Ok(Json(ApiResponse::ok(format!("{} entr(ies)", data.len()), data)))
}

/// Revoke a whitelist entry
#[utoipa::path(
    delete,
    path = "/api/v1/tenants/{id}/whitelist/{entry_id}",
    security(("bearer_auth" = [])),
    params(
        ("id" = Uuid, Path, description = "Tenant UUID"),
        ("entry_id" = Uuid, Path, description = "Whitelist entry UUID")
    ),
    responses(
        (status = 200, description = "Entry removed", body = ApiResponse<WhitelistEntryDto>),
        (status = 404, description = "Tenant or entry not found", body = ApiError),
        (status = 503, description = "Entry removed but access control is stale", body = ApiError)
    ),
    tag = "whitelist"
)]
pub async fn remove_entry(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
    Path((id, entry_id)): Path<(String, String)>,
) -> Result<Json<ApiResponse<WhitelistEntryDto>>, ApiError> {
    let tenant_id = parse_uuid(&id, "id")?;
    let entry_id = parse_uuid(&entry_id, "entry_id")?;
    let entry = state
        .provisioner
        .remove_ip(tenant_id, entry_id)
        .await
        .map_err(|err| state.api_error(err))?;
    Ok(Json(ApiResponse::ok(
        "Whitelist entry removed",
        WhitelistEntryDto::from(&entry),
    )))
}

/// Regenerate the access-control file from the stored whitelist
#[utoipa::path(
    post,
    path = "/api/v1/access-control/recompile",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "File installed and engine reloaded", body = ApiResponse<RecompileReport>),
        (status = 500, description = "File corrupted or not writable", body = ApiError),
        (status = 502, description = "File installed but reload failed", body = ApiError)
    ),
    tag = "access-control"
)]
pub async fn recompile(
    State(state): State<AppState>,
    _operator_auth: OperatorAuth,
) -> Result<Json<ApiResponse<RecompileReport>>, ApiError> {
    let report = state
        .provisioner
        .recompile()
        .await
        .map_err(|err| state.api_error(err))?;
    let message = if report.changed {
        "Access control updated"
    } else {
        "Access control already up to date"
    };
    Ok(Json(ApiResponse::ok(message, report)))
}
