//! HTTP API endpoints

use std::sync::Arc;
use std::time::Duration;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use lockctl_core::actions::{ensure_locked, ensure_unlocked, with_session, ActionOutcome};
use lockctl_core::config::Config;
use lockctl_core::LockStatus;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::cache::{cache_key, ResponseCache};
use crate::registry::{LockRegistry, Locator, Lookup, ManagedLock};

/// Body of every successful lock response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse {
    /// 0 locked, 1 unlocked, -1 unknown.
    pub status: i32,
    pub ret: String,
    pub msg: String,
}

impl ApiResponse {
    fn new(status: LockStatus, msg: String) -> Self {
        Self {
            status: status.code(),
            ret: status.as_str().to_string(),
            msg,
        }
    }
}

pub struct AppState<L: Locator> {
    pub registry: Arc<LockRegistry<L>>,
    pub cache: Arc<ResponseCache<ApiResponse>>,
    pub status_ttl: Duration,
    pub action_ttl: Duration,
}

impl<L: Locator> Clone for AppState<L> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            cache: Arc::clone(&self.cache),
            status_ttl: self.status_ttl,
            action_ttl: self.action_ttl,
        }
    }
}

impl<L: Locator> AppState<L> {
    pub fn new(config: &Config, registry: Arc<LockRegistry<L>>) -> Self {
        Self {
            registry,
            cache: Arc::new(ResponseCache::new()),
            status_ttl: Duration::from_secs(config.server.status_cache_seconds),
            action_ttl: Duration::from_secs(config.server.action_cache_seconds),
        }
    }
}

/// Create API router
pub fn create_router<L: Locator>(state: AppState<L>) -> Router {
    Router::new()
        .route("/api/status/:lock_name", get(status_handler::<L>))
        .route("/api/lock/:lock_name", get(lock_handler::<L>))
        .route("/api/unlock/:lock_name", get(unlock_handler::<L>))
        .route("/api/disconnect/:lock_name", get(disconnect_handler::<L>))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Resolve a lock, or the response to send when it is not available.
fn managed<L: Locator>(
    state: &AppState<L>,
    name: &str,
) -> Result<Arc<ManagedLock<L::Peripheral>>, Response> {
    match state.registry.lookup(name) {
        Lookup::Ready(managed) => Ok(managed),
        Lookup::Locating => {
            info!(lock = name, "lock not located yet, retrying in background");
            state.registry.locate(name);
            state.cache.clear_lock(name);
            Err(StatusCode::BAD_REQUEST.into_response())
        }
        Lookup::Unconfigured => Err(StatusCode::NOT_FOUND.into_response()),
    }
}

/// GET /api/status/{lock_name}
async fn status_handler<L: Locator>(
    State(state): State<AppState<L>>,
    Path(name): Path<String>,
) -> Response {
    let key = cache_key("status", &name);
    if let Some(hit) = state.cache.get(&key) {
        return Json(hit).into_response();
    }
    let managed = match managed(&state, &name) {
        Ok(managed) => managed,
        Err(response) => return response,
    };

    let _gate = managed.gate.lock().await;
    match with_session(&managed.lock, |l| l.status()).await {
        Ok(status) => {
            let body = ApiResponse::new(status, "Status checked successfully.".to_string());
            state.cache.put(key, body.clone(), state.status_ttl);
            Json(body).into_response()
        }
        Err(e) => {
            error!(lock = %name, error = %e, "status failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum Action {
    Lock,
    Unlock,
}

/// GET /api/lock/{lock_name}
async fn lock_handler<L: Locator>(state: State<AppState<L>>, name: Path<String>) -> Response {
    action_handler(state, name, Action::Lock).await
}

/// GET /api/unlock/{lock_name}
async fn unlock_handler<L: Locator>(state: State<AppState<L>>, name: Path<String>) -> Response {
    action_handler(state, name, Action::Unlock).await
}

async fn action_handler<L: Locator>(
    State(state): State<AppState<L>>,
    Path(name): Path<String>,
    action: Action,
) -> Response {
    let route = match action {
        Action::Lock => "lock",
        Action::Unlock => "unlock",
    };
    let key = cache_key(route, &name);
    if let Some(hit) = state.cache.get(&key) {
        return Json(hit).into_response();
    }
    let managed = match managed(&state, &name) {
        Ok(managed) => managed,
        Err(response) => return response,
    };

    let _gate = managed.gate.lock().await;
    let result: Result<ActionOutcome, _> = match action {
        Action::Lock => with_session(&managed.lock, |l| ensure_locked(l)).await,
        Action::Unlock => with_session(&managed.lock, |l| ensure_unlocked(l)).await,
    };
    match result {
        Ok(outcome) => {
            let body = ApiResponse::new(outcome.status, outcome.describe());
            state.cache.clear_lock(&name);
            state.cache.put(key, body.clone(), state.action_ttl);
            if outcome.changed {
                info!(lock = %name, %route, "lock actuated");
            }
            Json(body).into_response()
        }
        Err(e) => {
            error!(lock = %name, %route, error = %e, "action failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

/// GET /api/disconnect/{lock_name}
async fn disconnect_handler<L: Locator>(
    State(state): State<AppState<L>>,
    Path(name): Path<String>,
) -> Response {
    let managed = match managed(&state, &name) {
        Ok(managed) => managed,
        Err(response) => return response,
    };
    if managed.gate.try_lock().is_err() {
        warn!(lock = %name, "disconnecting while a request is in flight");
    }
    managed.lock.disconnect().await;
    state.cache.clear_lock(&name);
    StatusCode::NO_CONTENT.into_response()
}

/// GET /health
async fn health_handler() -> &'static str {
    "OK"
}
