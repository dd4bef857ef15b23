// SPDX-License-Identifier: PMPL-1.0-or-later
//! Rapport API
//!
//! HTTP application tier for the relationship store. Requests are
//! authenticated by API key ([`auth`]); the application-layer mirror of
//! the tenant predicates then rejects obviously foreign requests with an
//! explicit error before the repository applies its own enforcement.

pub mod auth;
pub mod config;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Extension, Path, Query, State},
    http::{header, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{delete, get, patch, post},
    Json, Router,
};
use prometheus::{Registry, TextEncoder};
use rapport_audit::{AuditError, AuditRecord, AuditSummary, AuditView, IntegrityReport, StoredAuditLog};
use rapport_authz::{AccessMirror, AccessRequest, AuthzError, RolloutState, RolloutTransition, SessionState};
use rapport_repository::{
    AuditViewRows, MigrationId, PerformanceRow, PolicyCounts, Repository, RepositoryError, Row,
    RowQuery, TENANT_COLUMN,
};
use rapport_storage::{InMemoryBackend, SharedBackend};
use rapport_tenancy::{
    AdminRosterEntry, DirectoryError, Principal, PrincipalId, PrincipalPatch, Tenant, TenantId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{error, info, instrument};

pub use auth::{auth_middleware, hash_key, ApiKeyEntry, ApiKeyRegistry, Authenticated};
pub use config::{parse_key_bindings, ApiConfig, ApiKeyBinding, ConfigError};

/// Default trailing window for audit surfaces.
const DEFAULT_WINDOW_HOURS: i64 = 24;

/// API error types
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Unauthenticated(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Unauthenticated(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = Json(ErrorResponse {
            error: message,
            code: status.as_u16(),
        });

        (status, body).into_response()
    }
}

impl From<AuthzError> for ApiError {
    fn from(err: AuthzError) -> Self {
        ApiError::Forbidden(err.to_string())
    }
}

impl From<DirectoryError> for ApiError {
    fn from(err: DirectoryError) -> Self {
        let message = err.to_string();
        match err {
            DirectoryError::TenantNotFound(_)
            | DirectoryError::PrincipalNotFound(_)
            | DirectoryError::AdminNotFound(_) => ApiError::NotFound(message),
            DirectoryError::AlreadyExists(_) | DirectoryError::TenantDeleted(_) => {
                ApiError::Conflict(message)
            }
            DirectoryError::CrossTenantTransfer | DirectoryError::Unauthorized(_) => {
                ApiError::Forbidden(message)
            }
            DirectoryError::InvalidInput(_) => ApiError::BadRequest(message),
        }
    }
}

impl From<AuditError> for ApiError {
    fn from(err: AuditError) -> Self {
        match err {
            AuditError::InvalidInput(msg) => ApiError::BadRequest(msg),
            AuditError::NotFound(_) => ApiError::NotFound(err.to_string()),
            other => {
                error!(error = %other, "Audit failure");
                ApiError::Internal(other.to_string())
            }
        }
    }
}

impl From<RepositoryError> for ApiError {
    fn from(err: RepositoryError) -> Self {
        let message = err.to_string();
        match err {
            RepositoryError::UnknownTable(_) => ApiError::NotFound(message),
            RepositoryError::ReservedTable(_) | RepositoryError::Forbidden(_) => {
                ApiError::Forbidden(message)
            }
            RepositoryError::Conflict { .. } => ApiError::Conflict(message),
            RepositoryError::InvalidRow(_) => ApiError::BadRequest(message),
            RepositoryError::Authz(err) => err.into(),
            RepositoryError::Guard(_) => ApiError::Forbidden(message),
            RepositoryError::Directory(err) => err.into(),
            RepositoryError::Rollout(rapport_authz::RolloutError::AlreadyActive(_)) => {
                ApiError::Conflict(message)
            }
            RepositoryError::Rollout(_) => ApiError::BadRequest(message),
            RepositoryError::Migration(_)
            | RepositoryError::Storage(_)
            | RepositoryError::Audit(_)
            | RepositoryError::Anomaly(_) => {
                error!(error = %message, "Repository failure");
                ApiError::Internal(message)
            }
        }
    }
}

/// Error response body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: u16,
}

/// Failures while assembling or starting the server.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Audit(#[from] AuditError),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
}

/// Policy rollout status
#[derive(Debug, Serialize, Deserialize)]
pub struct PolicyStatusResponse {
    pub state: RolloutState,
    pub counts: PolicyCounts,
    pub applied_migrations: Vec<MigrationId>,
    pub pending_migrations: Vec<MigrationId>,
}

#[derive(Debug, Deserialize)]
pub struct WindowParams {
    #[serde(default = "default_window")]
    pub hours: i64,
}

fn default_window() -> i64 {
    DEFAULT_WINDOW_HOURS
}

#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct RegisterPrincipalRequest {
    pub id: String,
    pub email: String,
    pub tenant_id: String,
}

/// Partial principal update. All fields are applied together or not at all.
#[derive(Debug, Default, Deserialize)]
pub struct UpdatePrincipalRequest {
    pub email: Option<String>,
    pub tenant_id: Option<String>,
    pub active: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct GrantAdminRequest {
    pub identity: String,
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub start_time: Instant,
    pub repository: Arc<Repository>,
    pub mirror: AccessMirror,
    pub keys: Arc<ApiKeyRegistry>,
    pub registry: Registry,
}

impl AppState {
    /// Open an in-memory repository, migrate it to the configured policy
    /// generation and bootstrap the first administrator.
    pub async fn build(config: &ApiConfig) -> Result<Self, StartupError> {
        let backend: SharedBackend = Arc::new(InMemoryBackend::new());
        let audit_log = Arc::new(StoredAuditLog::open(backend.clone()).await?);
        let registry = Registry::new();

        let repository = Repository::open_with(
            config.repository.clone(),
            backend,
            audit_log,
            Some(&registry),
        )?;
        let applied = repository.migrate_to_configured().await?;
        info!(
            applied = applied.len(),
            generation = %config.repository.policy_generation,
            "Migrations applied"
        );

        if let Some(admin) = &config.bootstrap_admin {
            repository
                .directory()
                .bootstrap_admin(PrincipalId::new(admin.as_str()))
                .await?;
        }

        let mirror = AccessMirror::new()
            .with_sink(repository.recorder())
            .with_prometheus(&registry)?;

        Ok(Self {
            start_time: Instant::now(),
            repository: Arc::new(repository),
            mirror,
            keys: Arc::new(ApiKeyRegistry::from_bindings(&config.api_keys)),
            registry,
        })
    }

    /// Mirror check of `request` for the authenticated actor.
    async fn check(
        &self,
        auth: &Authenticated,
        request: &AccessRequest,
        operation: &str,
    ) -> Result<(), ApiError> {
        let predicate = self.repository.active_predicate().await;
        self.mirror
            .check(predicate.as_ref(), &auth.session, &auth.ctx, request, operation)
            .await?;
        Ok(())
    }

    async fn require_admin(&self, auth: &Authenticated, operation: &str) -> Result<(), ApiError> {
        self.check(auth, &AccessRequest::admin_only(), operation).await
    }
}

/// Build the API router
pub fn build_router(state: AppState) -> Router {
    let protected = Router::new()
        // Rows
        .route("/tables/{table}", post(create_row_handler).get(list_rows_handler))
        .route(
            "/tables/{table}/{id}",
            get(get_row_handler)
                .patch(update_row_handler)
                .delete(delete_row_handler),
        )
        // Audit surfaces
        .route("/audit/trail/{table}/{id}", get(audit_trail_handler))
        .route("/audit/summary", get(audit_summary_handler))
        .route("/audit/views/{view}", get(audit_view_handler))
        .route("/audit/verify", get(audit_verify_handler))
        .route("/audit/performance", get(performance_handler))
        // Policy rollout
        .route("/admin/policy", get(policy_status_handler))
        .route("/admin/policy/switchover", post(switchover_handler))
        .route("/admin/policy/rollback", post(rollback_handler))
        // Directory
        .route("/directory/me", get(whoami_handler))
        .route("/directory/tenants", post(create_tenant_handler))
        .route(
            "/directory/tenants/{id}",
            delete(delete_tenant_handler),
        )
        .route("/directory/principals", post(register_principal_handler))
        .route(
            "/directory/principals/{id}",
            patch(update_principal_handler),
        )
        .route("/directory/admins", post(grant_admin_handler))
        .route(
            "/directory/admins/{id}",
            delete(deactivate_admin_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth_middleware,
        ));

    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .merge(protected)
        .with_state(state)
}

/// Health check handler
#[instrument(skip_all)]
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
    })
}

/// Ready once the core tables exist.
#[instrument(skip_all)]
async fn ready_handler(State(state): State<AppState>) -> StatusCode {
    if state.repository.tables().await.is_empty() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    }
}

async fn metrics_handler(State(state): State<AppState>) -> Result<Response, ApiError> {
    let encoder = TextEncoder::new();
    let body = encoder
        .encode_to_string(&state.registry.gather())
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        body,
    )
        .into_response())
}

/// `limit` caps the result; every other parameter is an equality filter
/// on a string-valued field.
fn row_query(params: &HashMap<String, String>) -> Result<RowQuery, ApiError> {
    let mut query = RowQuery::all();
    for (field, value) in params {
        if field == "limit" {
            let limit = value
                .parse()
                .map_err(|_| ApiError::BadRequest(format!("invalid limit: {}", value)))?;
            query = query.limit(limit);
        } else {
            query = query.eq(field, value.as_str());
        }
    }
    Ok(query)
}

#[instrument(skip_all, fields(actor = %auth.ctx.actor_id, table = %table))]
async fn create_row_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Path(table): Path<String>,
    Json(row): Json<Row>,
) -> Result<(StatusCode, Json<Row>), ApiError> {
    if let Some(tenant) = row.get(TENANT_COLUMN).and_then(Value::as_str) {
        state
            .check(
                &auth,
                &AccessRequest::tenant(TenantId::new(tenant)),
                &format!("create {}", table),
            )
            .await?;
    }
    let created = state.repository.insert(&auth.ctx, &table, row).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[instrument(skip_all, fields(actor = %auth.ctx.actor_id, table = %table))]
async fn list_rows_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Path(table): Path<String>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<Vec<Row>>, ApiError> {
    if let Some(tenant) = params.get(TENANT_COLUMN) {
        state
            .check(
                &auth,
                &AccessRequest::tenant(TenantId::new(tenant.as_str())),
                &format!("read {}", table),
            )
            .await?;
    }
    let query = row_query(&params)?;
    Ok(Json(state.repository.select(&auth.ctx, &table, &query).await?))
}

async fn get_row_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<Row>, ApiError> {
    state
        .repository
        .get(&auth.ctx, &table, &id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{} {}", table, id)))
}

#[instrument(skip_all, fields(actor = %auth.ctx.actor_id, table = %table, id = %id))]
async fn update_row_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Path((table, id)): Path<(String, String)>,
    Json(patch): Json<Row>,
) -> Result<Json<Row>, ApiError> {
    state
        .repository
        .update(&auth.ctx, &table, &id, &patch)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("{} {}", table, id)))
}

#[instrument(skip_all, fields(actor = %auth.ctx.actor_id, table = %table, id = %id))]
async fn delete_row_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Path((table, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    if state.repository.delete(&auth.ctx, &table, &id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::NotFound(format!("{} {}", table, id)))
    }
}

async fn audit_trail_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<Vec<AuditRecord>>, ApiError> {
    state.require_admin(&auth, "read the audit trail").await?;
    Ok(Json(
        state.repository.audit_trail(&auth.ctx, &table, &id).await?,
    ))
}

async fn audit_summary_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Query(window): Query<WindowParams>,
) -> Result<Json<AuditSummary>, ApiError> {
    state.require_admin(&auth, "read the audit summary").await?;
    Ok(Json(
        state.repository.audit_summary(&auth.ctx, window.hours).await?,
    ))
}

async fn audit_view_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Path(view): Path<String>,
    Query(window): Query<WindowParams>,
) -> Result<Json<AuditViewRows>, ApiError> {
    let view: AuditView = view.parse()?;
    state.require_admin(&auth, "read audit views").await?;
    Ok(Json(
        state
            .repository
            .audit_view(&auth.ctx, view, window.hours)
            .await?,
    ))
}

async fn audit_verify_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
) -> Result<Json<IntegrityReport>, ApiError> {
    state.require_admin(&auth, "verify the audit log").await?;
    Ok(Json(state.repository.verify_audit(&auth.ctx).await?))
}

async fn performance_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
) -> Result<Json<Vec<PerformanceRow>>, ApiError> {
    state.require_admin(&auth, "read performance metrics").await?;
    Ok(Json(state.repository.performance_metrics(&auth.ctx).await?))
}

async fn policy_status_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
) -> Result<Json<PolicyStatusResponse>, ApiError> {
    state.require_admin(&auth, "read policy status").await?;
    let repo = &state.repository;
    Ok(Json(PolicyStatusResponse {
        state: repo.rollout_state().await,
        counts: repo.policy_counts().await,
        applied_migrations: repo.applied_migrations().await,
        pending_migrations: repo.pending_migrations().await,
    }))
}

#[instrument(skip_all, fields(actor = %auth.ctx.actor_id))]
async fn switchover_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
) -> Result<Json<RolloutTransition>, ApiError> {
    state.require_admin(&auth, "switch policy generation").await?;
    Ok(Json(state.repository.switch_policy(&auth.ctx).await?))
}

#[instrument(skip_all, fields(actor = %auth.ctx.actor_id))]
async fn rollback_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
) -> Result<Json<RolloutTransition>, ApiError> {
    state.require_admin(&auth, "roll back policy generation").await?;
    Ok(Json(state.repository.rollback_policy(&auth.ctx).await?))
}

async fn whoami_handler(Extension(auth): Extension<Authenticated>) -> Json<SessionState> {
    Json(auth.session)
}

async fn create_tenant_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Json(request): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<Tenant>), ApiError> {
    state.require_admin(&auth, "create tenants").await?;
    let tenant = state
        .repository
        .directory()
        .create_tenant(&auth.ctx, TenantId::new(request.id), &request.name)
        .await?;
    Ok((StatusCode::CREATED, Json(tenant)))
}

async fn delete_tenant_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Path(id): Path<String>,
) -> Result<Json<Tenant>, ApiError> {
    state.require_admin(&auth, "delete tenants").await?;
    Ok(Json(
        state
            .repository
            .directory()
            .soft_delete_tenant(&auth.ctx, &TenantId::new(id))
            .await?,
    ))
}

async fn register_principal_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Json(request): Json<RegisterPrincipalRequest>,
) -> Result<(StatusCode, Json<Principal>), ApiError> {
    state.require_admin(&auth, "register principals").await?;
    let principal = state
        .repository
        .directory()
        .register_principal(
            &auth.ctx,
            PrincipalId::new(request.id),
            &request.email,
            TenantId::new(request.tenant_id),
        )
        .await?;
    Ok((StatusCode::CREATED, Json(principal)))
}

/// Principals may change their own email; everything else is checked by
/// the directory.
async fn update_principal_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Path(id): Path<String>,
    Json(request): Json<UpdatePrincipalRequest>,
) -> Result<Json<Principal>, ApiError> {
    let id = PrincipalId::new(id);
    state
        .check(&auth, &AccessRequest::principal(id.clone()), "update principals")
        .await?;

    let patch = PrincipalPatch {
        email: request.email,
        tenant_id: request.tenant_id.map(TenantId::new),
        active: request.active,
    };
    let principal = state
        .repository
        .directory()
        .update_principal(&auth.ctx, &id, &patch)
        .await?;
    Ok(Json(principal))
}

async fn grant_admin_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Json(request): Json<GrantAdminRequest>,
) -> Result<(StatusCode, Json<AdminRosterEntry>), ApiError> {
    state.require_admin(&auth, "grant administrator access").await?;
    let entry = state
        .repository
        .directory()
        .grant_admin(&auth.ctx, PrincipalId::new(request.identity))
        .await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

async fn deactivate_admin_handler(
    State(state): State<AppState>,
    Extension(auth): Extension<Authenticated>,
    Path(id): Path<String>,
) -> Result<Json<AdminRosterEntry>, ApiError> {
    state.require_admin(&auth, "revoke administrator access").await?;
    Ok(Json(
        state
            .repository
            .directory()
            .deactivate_admin(&auth.ctx, &PrincipalId::new(id))
            .await?,
    ))
}

/// Start the API server
pub async fn serve(config: ApiConfig) -> Result<(), StartupError> {
    let state = AppState::build(&config).await?;
    if state.keys.is_empty() {
        tracing::warn!("No API keys configured; every protected request will be rejected");
    }
    let app = build_router(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Starting Rapport API server on {}", addr);

    let listener = TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
