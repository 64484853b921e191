use std::sync::Arc;

use axum::extract::{Path, Query, Request, State};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use chrono::{DateTime, Utc};
use fieldsync_protocol::{
    EntityKind, EntityStatus, PullRequest, PullResponse, PushRequest, PushResponse,
    ResolveRequest, ResolveResponse,
};
use fieldsync_server::{ServerConfig, SyncService, TokenValidator};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{extract_bearer_token, header_value, RequestIdentity};
use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    service: Arc<SyncService>,
    validator: Option<Arc<TokenValidator>>,
}

impl AppState {
    pub fn new(config: Arc<AppConfig>, service: Arc<SyncService>) -> Result<Self, AppError> {
        let validator = service
            .token_validator()
            .map_err(AppError::from)?
            .map(Arc::new);
        Ok(Self {
            config,
            service,
            validator,
        })
    }
}

pub fn server_config(config: &AppConfig) -> ServerConfig {
    let engine = fieldsync_engine::EngineConfig::new()
        .with_default_page_size(config.default_page_size)
        .with_max_page_size(config.max_page_size);
    let mut server = ServerConfig::new()
        .with_max_push_batch(config.max_push_batch)
        .with_token_expiry(config.token_expiry)
        .with_engine(engine);
    if let Some(secret) = config.auth_secret.clone() {
        server = server.with_auth(secret);
    }
    server
}

pub fn app_router(state: AppState) -> Router {
    let sync_routes = Router::new()
        .route("/sync/push", post(push))
        .route("/sync/pull", get(pull))
        .route("/sync/resolve", post(resolve))
        .route("/sync/conflicts", get(conflicts))
        .route("/sync/status/{entity_type}/{entity_id}", get(status))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            resolve_identity,
        ));

    Router::new()
        .route("/healthz", get(healthz))
        .nest("/v1", sync_routes)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .with_state(state)
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: i64,
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        timestamp: Utc::now().timestamp(),
    })
}

/// Resolves the caller's organization before any sync handler runs.
///
/// With authentication enabled the organization and device come from the
/// validated token. Without it (development setups) they come from the
/// `x-org-id` and `x-device-id` headers. The acting user is `x-user-id`
/// either way.
async fn resolve_identity(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let headers = request.headers();
    let identity = match state.validator.as_ref() {
        Some(validator) => {
            let token = extract_bearer_token(headers)?;
            let claims = validator
                .validate_token(token)
                .map_err(|e| AppError::unauthorized(e.to_string()))?;
            RequestIdentity {
                user_id: header_value(headers, "x-user-id")
                    .unwrap_or_else(|| format!("device:{}", claims.device_id)),
                org_id: claims.org_id,
                device_id: Some(claims.device_id),
            }
        }
        None => RequestIdentity {
            org_id: header_value(headers, "x-org-id")
                .ok_or_else(|| AppError::unauthorized("missing x-org-id header"))?,
            user_id: header_value(headers, "x-user-id")
                .unwrap_or_else(|| "anonymous".to_string()),
            device_id: header_value(headers, "x-device-id"),
        },
    };
    request.extensions_mut().insert(identity);
    Ok(next.run(request).await)
}

async fn push(
    State(state): State<AppState>,
    Extension(identity): Extension<RequestIdentity>,
    Json(mut request): Json<PushRequest>,
) -> Result<Json<PushResponse>, AppError> {
    // Changes queued on a device inherit its id unless they carry their own.
    for change in &mut request.changes {
        if change.device_id.is_none() {
            change.device_id = identity.device_id.clone();
        }
    }

    let service = Arc::clone(&state.service);
    let response = tokio::task::spawn_blocking(move || {
        service.handle_push(&identity.org_id, &identity.user_id, &request)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;
    Ok(Json(response))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PullQuery {
    last_sync: Option<DateTime<Utc>>,
    entity_types: Option<String>,
    limit: Option<usize>,
}

impl PullQuery {
    fn into_request(self) -> Result<PullRequest, AppError> {
        let mut request = PullRequest::everything();
        if let Some(since) = self.last_sync {
            request = request.since(since);
        }
        if let Some(raw) = self.entity_types {
            let kinds = raw
                .split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| {
                    name.parse::<EntityKind>()
                        .map_err(|e| AppError::bad_request(e.to_string()))
                })
                .collect::<Result<Vec<_>, _>>()?;
            if !kinds.is_empty() {
                request = request.kinds(kinds);
            }
        }
        if let Some(limit) = self.limit {
            request = request.limit(limit);
        }
        Ok(request)
    }
}

async fn pull(
    State(state): State<AppState>,
    Extension(identity): Extension<RequestIdentity>,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>, AppError> {
    let request = query.into_request()?;
    let service = Arc::clone(&state.service);
    let response =
        tokio::task::spawn_blocking(move || service.handle_pull(&identity.org_id, &request))
            .await
            .map_err(|e| AppError::Internal(e.to_string()))??;
    Ok(Json(response))
}

async fn resolve(
    State(state): State<AppState>,
    Extension(identity): Extension<RequestIdentity>,
    Json(request): Json<ResolveRequest>,
) -> Result<Json<ResolveResponse>, AppError> {
    let service = Arc::clone(&state.service);
    let response = tokio::task::spawn_blocking(move || {
        service.handle_resolve(&identity.org_id, &identity.user_id, &request)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))??;
    Ok(Json(response))
}

async fn conflicts(
    State(state): State<AppState>,
    Extension(identity): Extension<RequestIdentity>,
) -> Json<Value> {
    let listed = state.service.list_conflicts(&identity.org_id);
    Json(serde_json::json!({ "conflicts": listed }))
}

async fn status(
    State(state): State<AppState>,
    Extension(identity): Extension<RequestIdentity>,
    Path((entity_type, entity_id)): Path<(String, String)>,
) -> Result<Json<EntityStatus>, AppError> {
    let kind = entity_type
        .parse::<EntityKind>()
        .map_err(|e| AppError::bad_request(e.to_string()))?;
    Ok(Json(state.service.entity_status(
        &identity.org_id,
        kind,
        &entity_id,
    )))
}
