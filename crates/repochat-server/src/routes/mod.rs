pub mod health;
pub mod reply;

use axum::http::HeaderValue;
use axum::Router;
use http::header::InvalidHeaderValue;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::state::AppState;

pub fn configure(state: AppState) -> Router {
    Router::new()
        .merge(reply::routes(state.clone()))
        .merge(health::routes(state))
}

/// CORS for the browser client; any origin when `allowed_origins` is empty
pub fn cors(allowed_origins: &[String]) -> Result<CorsLayer, InvalidHeaderValue> {
    let origin = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let origins = allowed_origins
            .iter()
            .map(|origin| origin.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };
    Ok(CorsLayer::new()
        .allow_origin(origin)
        .allow_methods(Any)
        .allow_headers(Any))
}
