use axum::{routing::{get, post}, Router};

use crate::AppState;

mod events;
mod health;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/forms/{form_id}/subscribers", get(health::subscribers))
        .route("/forms/{form_id}/events", post(events::publish_to_form))
        .route("/events", post(events::publish_to_all))
}
