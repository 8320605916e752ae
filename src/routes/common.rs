//! Common routes: health, version, and reflection over the assembled API.

use crate::auth::AuthAction;
use crate::response::{success_ok, SuccessOne};
use crate::routing::RegisteredRoute;
use crate::state::AppState;
use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use serde::Serialize;

#[derive(Serialize)]
struct HealthBody {
    status: &'static str,
}

async fn health() -> Json<HealthBody> {
    Json(HealthBody { status: "ok" })
}

async fn version() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Deprecated: prefer `/auth-actions`.
async fn available_resources(State(state): State<AppState>) -> (StatusCode, Json<SuccessOne<Vec<String>>>) {
    success_ok(state.resources.as_ref().clone())
}

async fn auth_actions(State(state): State<AppState>) -> (StatusCode, Json<SuccessOne<Vec<AuthAction>>>) {
    success_ok(state.auth_actions.all().to_vec())
}

async fn route_manifest(State(state): State<AppState>) -> (StatusCode, Json<SuccessOne<Vec<RegisteredRoute>>>) {
    success_ok(state.routes.as_ref().clone())
}

/// GET /health, /version, /available-resources, /auth-actions, /route-manifest.
pub fn common_routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/version", get(version))
        .route("/available-resources", get(available_resources))
        .route("/auth-actions", get(auth_actions))
        .route("/route-manifest", get(route_manifest))
        .with_state(state)
}
