//! HTTP server implementation
//!
//! Implements:
//! - Health check (GET {base}/health)
//! - Hook management API (GET/POST {base}/api/hooks, GET/PUT/DELETE {base}/api/hooks/:id)
//! - Webhook trigger (POST {base}/webhook/:id)
//! - Admin auth middleware (bearer admin token)
//! - Request logging middleware

use axum::{
    body::{Body, Bytes},
    extract::{rejection::BytesRejection, ConnectInfo, DefaultBodyLimit, Path, State},
    http::{HeaderMap, Request, StatusCode, Uri},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};

use crate::config::ServerSettings;
use crate::hooks::auth::{extract_bearer_token, extract_trigger_token, timing_safe_equal};
use crate::hooks::{Hook, HookError, HookService};
use crate::logging::targets;

/// Default max request body size (256KB)
pub const DEFAULT_MAX_BODY_BYTES: usize = 262144;

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Prefix for every route ("" or "/path")
    pub base_path: String,
    /// Token required by the management API
    pub admin_token: String,
    /// Max request body size in bytes
    pub max_body_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig {
            base_path: String::new(),
            admin_token: String::new(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

impl HttpConfig {
    pub fn from_settings(settings: &ServerSettings) -> Self {
        HttpConfig {
            base_path: normalize_base_path(&settings.base_path),
            admin_token: settings.admin_token.clone(),
            max_body_bytes: settings.max_body_bytes,
        }
    }
}

/// Shared state for HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<HttpConfig>,
    pub service: Arc<HookService>,
    /// Server start time (Unix timestamp)
    pub start_time: i64,
}

/// Response envelope used by every JSON endpoint
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<&'static str>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        ApiResponse {
            success: true,
            data: Some(data),
            errors: Vec::new(),
            code: None,
        }
    }
}

impl ApiResponse<()> {
    pub fn error(code: &'static str, message: impl Into<String>) -> Self {
        ApiResponse {
            success: false,
            data: None,
            errors: vec![message.into()],
            code: Some(code),
        }
    }
}

/// Body accepted by create and update.
///
/// On update the path id wins over `id`.
#[derive(Debug, Deserialize)]
pub struct HookPayload {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub flag_file: String,
    #[serde(default)]
    pub enabled: bool,
}

impl HookPayload {
    fn into_hook(self) -> Hook {
        Hook::new(self.id, self.name, self.flag_file)
            .with_description(self.description)
            .with_token(self.token)
            .with_enabled(self.enabled)
    }
}

/// Create the HTTP router
pub fn create_router(config: HttpConfig, service: Arc<HookService>) -> Router {
    let base = normalize_base_path(&config.base_path);
    let max_body_bytes = config.max_body_bytes;

    let state = AppState {
        config: Arc::new(config),
        service,
        start_time: chrono::Utc::now().timestamp(),
    };

    let admin_router: Router<AppState> = Router::new()
        .route(
            &format!("{}/api/hooks", base),
            get(list_hooks_handler).post(create_hook_handler),
        )
        .route(
            &format!("{}/api/hooks/:id", base),
            get(get_hook_handler)
                .put(update_hook_handler)
                .delete(delete_hook_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            admin_auth_middleware,
        ));

    Router::new()
        .route(&format!("{}/health", base), get(health_handler))
        .route(&format!("{}/webhook/:id", base), post(trigger_hook_handler))
        .merge(admin_router)
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn(request_log_middleware))
        .with_state(state)
}

/// Normalize base path (leading slash, no trailing slash, "" for root)
pub fn normalize_base_path(path: &str) -> String {
    let trimmed = path.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return String::new();
    }
    if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    }
}

// ============================================================================
// Responses
// ============================================================================

fn error_response(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (status, Json(ApiResponse::error(code, message))).into_response()
}

fn hook_error_status(err: &HookError) -> StatusCode {
    match err {
        HookError::NotFound(_) => StatusCode::NOT_FOUND,
        HookError::AlreadyExists(_) => StatusCode::CONFLICT,
        HookError::InvalidToken(_) => StatusCode::UNAUTHORIZED,
        HookError::Disabled(_) => StatusCode::FORBIDDEN,
        HookError::Validation(_) => StatusCode::BAD_REQUEST,
        HookError::Io { .. } | HookError::Serialization(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn hook_error_response(err: &HookError) -> Response {
    let status = hook_error_status(err);
    if err.is_client_error() {
        error_response(status, err.code(), err.to_string())
    } else {
        // Details stay in the log
        error_response(status, err.code(), "internal server error")
    }
}

/// Run a blocking service call off the async executor.
async fn run_blocking<T, F>(f: F) -> Result<T, Response>
where
    F: FnOnce() -> Result<T, HookError> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(hook_error_response(&e)),
        Err(e) => {
            error!(target: targets::HTTP, error = %e, "blocking task failed");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "io_error",
                "internal server error",
            ))
        }
    }
}

#[allow(clippy::result_large_err)]
fn parse_payload(body: Result<Bytes, BytesRejection>) -> Result<HookPayload, Response> {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let status = rejection.status();
            let code = if status == StatusCode::PAYLOAD_TOO_LARGE {
                "payload_too_large"
            } else {
                "bad_request"
            };
            return Err(error_response(status, code, rejection.body_text()));
        }
    };

    serde_json::from_slice(&body).map_err(|e| {
        error_response(
            StatusCode::BAD_REQUEST,
            "bad_request",
            format!("invalid request body: {}", e),
        )
    })
}

// ============================================================================
// Health Check
// ============================================================================

/// GET {base}/health - reports whether the hook store is reachable
async fn health_handler(State(state): State<AppState>) -> Response {
    let registry = state.service.registry();
    let up = match registry.storage_path() {
        Some(path) => match tokio::fs::metadata(path).await {
            Ok(meta) => meta.is_file(),
            Err(e) => {
                error!(target: targets::HTTP, path = %path.display(), error = %e, "health check failed");
                false
            }
        },
        None => true,
    };

    let status = if up {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    let uptime = chrono::Utc::now().timestamp() - state.start_time;
    let hook_count = {
        let registry = registry.clone();
        run_blocking(move || Ok(registry.len())).await.unwrap_or(0)
    };

    (
        status,
        Json(ApiResponse::success(json!({
            "status": if up { "up" } else { "down" },
            "version": env!("CARGO_PKG_VERSION"),
            "timestamp": chrono::Utc::now(),
            "uptimeSeconds": uptime,
            "hooks": hook_count,
        }))),
    )
        .into_response()
}

// ============================================================================
// Hook Management
// ============================================================================

/// GET {base}/api/hooks
async fn list_hooks_handler(State(state): State<AppState>) -> Response {
    let service = state.service.clone();
    match run_blocking(move || Ok(service.get_all_hooks())).await {
        Ok(hooks) => (StatusCode::OK, Json(ApiResponse::success(hooks))).into_response(),
        Err(resp) => resp,
    }
}

/// GET {base}/api/hooks/:id
async fn get_hook_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let service = state.service.clone();
    match run_blocking(move || service.get_hook(&id)).await {
        Ok(hook) => (StatusCode::OK, Json(ApiResponse::success(hook))).into_response(),
        Err(resp) => resp,
    }
}

/// POST {base}/api/hooks - generates a token when none is given
async fn create_hook_handler(
    State(state): State<AppState>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let payload = match parse_payload(body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let mut hook = payload.into_hook();
    if hook.token.is_empty() {
        hook.token = state.service.generate_token();
    }

    let service = state.service.clone();
    match run_blocking(move || service.create_hook(hook)).await {
        Ok(created) => (StatusCode::CREATED, Json(ApiResponse::success(created))).into_response(),
        Err(resp) => resp,
    }
}

/// PUT {base}/api/hooks/:id - an empty token keeps the stored one
async fn update_hook_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let payload = match parse_payload(body) {
        Ok(p) => p,
        Err(resp) => return resp,
    };

    let mut hook = payload.into_hook();
    hook.id = id;

    let service = state.service.clone();
    let result = run_blocking(move || {
        if hook.token.is_empty() {
            hook.token = service.get_hook(&hook.id)?.token;
        }
        service.update_hook(hook)
    })
    .await;

    match result {
        Ok(updated) => (StatusCode::OK, Json(ApiResponse::success(updated))).into_response(),
        Err(resp) => resp,
    }
}

/// DELETE {base}/api/hooks/:id
async fn delete_hook_handler(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    let service = state.service.clone();
    match run_blocking(move || service.delete_hook(&id)).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(resp) => resp,
    }
}

// ============================================================================
// Webhook Trigger
// ============================================================================

/// POST {base}/webhook/:id
async fn trigger_hook_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    uri: Uri,
) -> Response {
    let ip = client_ip_label(connect_info.map(|ci| ci.0), &headers);

    if id.is_empty() {
        warn!(target: targets::HTTP, ip = %ip, path = %uri.path(), "missing hook ID in webhook request");
        return error_response(StatusCode::BAD_REQUEST, "bad_request", "missing hook ID");
    }

    let token = match extract_trigger_token(&headers, &uri) {
        Some(token) => token,
        None => {
            warn!(target: targets::AUTH, ip = %ip, id = %id, "missing webhook token");
            return error_response(StatusCode::BAD_REQUEST, "bad_request", "missing token");
        }
    };

    let service = state.service.clone();
    let hook_id = id.clone();
    match run_blocking(move || service.trigger_hook(&hook_id, &token)).await {
        Ok(_) => {
            info!(target: targets::HTTP, ip = %ip, id = %id, "webhook accepted");
            (
                StatusCode::OK,
                Json(ApiResponse::success(json!({ "status": "success" }))),
            )
                .into_response()
        }
        Err(resp) => resp,
    }
}

// ============================================================================
// Middleware
// ============================================================================

/// Require `Authorization: Bearer <admin token>`.
/// Missing credentials get 401, wrong ones 403.
async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let configured = state.config.admin_token.as_str();

    let Some(token) = extract_bearer_token(request.headers()) else {
        warn!(target: targets::AUTH, path = %request.uri().path(), "missing admin token");
        return error_response(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            "admin authentication required",
        );
    };

    if configured.is_empty() || !timing_safe_equal(&token, configured) {
        warn!(target: targets::AUTH, path = %request.uri().path(), "admin authentication failed");
        return error_response(StatusCode::FORBIDDEN, "forbidden", "invalid admin token");
    }

    next.run(request).await
}

/// Log every request at a level chosen by the response status.
async fn request_log_middleware(
    connect_info: Option<ConnectInfo<SocketAddr>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let start = Instant::now();
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let ip = client_ip_label(connect_info.map(|ci| ci.0), request.headers());

    let response = next.run(request).await;

    let status = response.status().as_u16();
    let duration_ms = start.elapsed().as_secs_f64() * 1000.0;

    if status >= 500 {
        error!(target: targets::HTTP, method = %method, path = %path, ip = %ip, status, duration_ms, "request failed");
    } else if status >= 400 {
        warn!(target: targets::HTTP, method = %method, path = %path, ip = %ip, status, duration_ms, "request rejected");
    } else {
        info!(target: targets::HTTP, method = %method, path = %path, ip = %ip, status, duration_ms, "request completed");
    }

    response
}

/// Client IP: first X-Forwarded-For entry, then X-Real-IP, then the peer.
fn extract_client_ip(remote_addr: Option<SocketAddr>, headers: &HeaderMap) -> Option<IpAddr> {
    if let Some(xff) = headers.get("x-forwarded-for") {
        if let Ok(xff_str) = xff.to_str() {
            if let Some(ip_str) = xff_str.split(',').next() {
                if let Ok(ip) = ip_str.trim().parse::<IpAddr>() {
                    return Some(ip);
                }
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip") {
        if let Ok(ip_str) = real_ip.to_str() {
            if let Ok(ip) = ip_str.trim().parse::<IpAddr>() {
                return Some(ip);
            }
        }
    }

    remote_addr.map(|addr| addr.ip())
}

fn client_ip_label(remote_addr: Option<SocketAddr>, headers: &HeaderMap) -> String {
    extract_client_ip(remote_addr, headers)
        .map(|ip| ip.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
