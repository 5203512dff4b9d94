use axum::{extract::State, routing::get, Json, Router};
use repochat::protocol::HealthReport;

use crate::state::AppState;

async fn health(State(state): State<AppState>) -> Json<HealthReport> {
    Json(HealthReport {
        status: "healthy".to_string(),
        systems: state.registry.status().await,
    })
}

async fn index() -> &'static str {
    "repochat server is running"
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/health", get(health))
        .with_state(state)
}
