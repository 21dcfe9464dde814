use axum::{middleware::from_fn, routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::{hub, metrics, AppState};

mod auth;
pub mod errors;
mod v1;

pub use auth::Token;

pub fn app(state: AppState, metrics_enabled: bool) -> Router {
    Router::new()
        .nest("/api/v1", v1::router())
        .route("/ws", get(hub::ws))
        .route("/health", get(|| async { "ok" }))
        .merge(metrics::metrics_router(metrics_enabled))
        .route_layer(from_fn(metrics::track_metrics))
        .with_state(state)
        .layer(TraceLayer::new_for_http().on_request(()))
}
