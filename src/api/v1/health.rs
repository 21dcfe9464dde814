use axum::{extract::{Path, State}, Json};
use serde::Serialize;

use crate::{ApiResult, AppState, FORMHUB_VERSION, GIT_HASH};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Health {
    status: &'static str,
    message: &'static str,
    version: &'static str,
    git_hash: &'static str,
    uptime_secs: u64,
    connected_clients: usize,
}

pub(super) async fn health(State(state): State<AppState>) -> ApiResult<Json<Health>> {
    Ok(Json(Health {
        status: "ok",
        message: "Form Builder broadcast hub is running",
        version: FORMHUB_VERSION,
        git_hash: GIT_HASH,
        uptime_secs: state.uptime.elapsed().as_secs(),
        connected_clients: state.hub.connected_count().await?,
    }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct Subscribers {
    form_id: String,
    subscribers: usize,
}

pub(super) async fn subscribers(
    Path(form_id): Path<String>,
    State(state): State<AppState>,
) -> ApiResult<Json<Subscribers>> {
    let subscribers = state.hub.subscriber_count(form_id.as_str()).await?;
    Ok(Json(Subscribers { form_id, subscribers }))
}
