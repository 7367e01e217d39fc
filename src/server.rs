//! # Server Configuration
//!
//! Router assembly, OpenAPI document and the serve loop with graceful
//! shutdown.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    Router, middleware,
    routing::{delete, get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use utoipa::{
    Modify, OpenApi,
    openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_middleware;
use crate::config::AppConfig;
use crate::error::{ApiError, ProvisionError};
use crate::handlers::{self, tenants, whitelist};
use crate::provisioning::Provisioner;
use crate::telemetry::trace_context_middleware;

/// Application state containing shared resources
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub provisioner: Provisioner,
}

impl AppState {
    pub fn new(config: AppConfig, provisioner: Provisioner) -> Self {
        Self {
            config: Arc::new(config),
            provisioner,
        }
    }

    /// Render a domain error, exposing the error chain on development profiles
    pub fn api_error(&self, error: ProvisionError) -> ApiError {
        ApiError::from_provision(&error, self.config.is_development())
    }
}

/// Creates and configures the Axum application router
pub fn create_app(state: AppState) -> Router {
    let api = Router::new()
        .route(
            "/tenants",
            post(tenants::create_tenant).get(tenants::list_tenants),
        )
        .route(
            "/tenants/{id}",
            get(tenants::get_tenant).delete(tenants::delete_tenant),
        )
        .route("/tenants/{id}/stats", get(tenants::tenant_stats))
        .route(
            "/tenants/{id}/connection-strings",
            get(tenants::connection_strings),
        )
        .route(
            "/tenants/{id}/whitelist",
            post(whitelist::add_entry).get(whitelist::list_entries),
        )
        .route(
            "/tenants/{id}/whitelist/{entry_id}",
            delete(whitelist::remove_entry),
        )
        .route("/access-control/recompile", post(whitelist::recompile))
        .route_layer(middleware::from_fn_with_state(
            Arc::clone(&state.config),
            auth_middleware,
        ));

    Router::new()
        .route("/", get(handlers::root))
        .route("/healthz", get(handlers::healthz))
        .nest("/api/v1", api)
        .with_state(state)
        .merge(SwaggerUi::new("/docs").url("/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn(trace_context_middleware))
}

/// Serve until `shutdown` is cancelled, then drain in-flight requests.
pub async fn run_server(state: AppState, shutdown: CancellationToken) -> Result<()> {
    let addr = state
        .config
        .bind_addr()
        .context("Invalid server address")?;
    let profile = state.config.profile.clone();
    let app = create_app(state);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(%addr, %profile, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .context("server error")?;

    tracing::info!("Server stopped");
    Ok(())
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(HttpBuilder::new().scheme(HttpAuthScheme::Bearer).build()),
            );
        }
    }
}

/// OpenAPI documentation
#[derive(OpenApi)]
#[openapi(
    paths(
        crate::handlers::root,
        crate::handlers::healthz,
        crate::handlers::tenants::create_tenant,
        crate::handlers::tenants::list_tenants,
        crate::handlers::tenants::get_tenant,
        crate::handlers::tenants::tenant_stats,
        crate::handlers::tenants::delete_tenant,
        crate::handlers::tenants::connection_strings,
        crate::handlers::whitelist::add_entry,
        crate::handlers::whitelist::list_entries,
        crate::handlers::whitelist::remove_entry,
        crate::handlers::whitelist::recompile,
    ),
    components(
        schemas(
            crate::models::ServiceInfo,
            crate::models::TenantStatus,
            crate::handlers::HealthStatus,
            crate::handlers::types::TenantDto,
            crate::handlers::types::WhitelistEntryDto,
            crate::handlers::tenants::CreateTenantRequestDto,
            crate::handlers::tenants::CreatedTenantDto,
            crate::handlers::tenants::DeletedTenantDto,
            crate::handlers::whitelist::AddWhitelistEntryRequestDto,
            crate::connection_strings::ConnectionStrings,
            crate::provisioning::TenantStats,
            crate::access_control::RecompileReport,
            crate::error::ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Tenant Database Provisioner API",
        description = "Provision isolated PostgreSQL databases and manage their network allow-lists",
        version = env!("CARGO_PKG_VERSION"),
    )
)]
pub struct ApiDoc;
