use axum::extract::{Path, State};
use serde::Deserialize;
use serde_json::Value;
use tracing::instrument;

use crate::{
    api::{errors::error_and_log, Token},
    hub::types::{MessageKind, S2CMessage},
    ApiError, ApiResult, AppState,
};

/// Event handed over by the response-submission side. `data` is passed
/// through untouched.
#[derive(Deserialize)]
struct PublishRequest {
    #[serde(rename = "type")]
    kind: MessageKind,
    #[serde(default)]
    data: Value,
}

fn parse_event(body: &str) -> ApiResult<S2CMessage> {
    let request: PublishRequest = serde_json::from_str(body)
        .map_err(|err| error_and_log(err, ApiError::BadRequest))?;
    match request.kind {
        MessageKind::NewResponse => Ok(S2CMessage::new_response(request.data)),
        MessageKind::AnalyticsUpdate => Ok(S2CMessage::analytics_update(request.data)),
        kind => {
            tracing::warn!(kind = kind.name(), "only events can be published");
            Err(ApiError::BadRequest)
        },
    }
}

#[instrument(skip(token, state, body))]
pub(super) async fn publish_to_form(
    Token(token): Token,
    Path(form_id): Path<String>,
    State(state): State<AppState>,
    body: String,
) -> ApiResult<&'static str> {
    tracing::trace!(body = body);
    state.config.verify_token(&token)?;
    let message = parse_event(&body)?;
    state.hub.broadcast_to_topic(form_id, message).await?;
    Ok("ok")
}

#[instrument(skip(token, state, body))]
pub(super) async fn publish_to_all(
    Token(token): Token,
    State(state): State<AppState>,
    body: String,
) -> ApiResult<&'static str> {
    tracing::trace!(body = body);
    state.config.verify_token(&token)?;
    let message = parse_event(&body)?;
    state.hub.broadcast_to_all(message).await?;
    Ok("ok")
}

#[cfg(test)]
#[test]
fn publishable_events() {
    let msg = parse_event(r#"{"type":"analytics_update","data":{"totalResponses":4}}"#).unwrap();
    assert_eq!(msg.kind, MessageKind::AnalyticsUpdate);
    assert_eq!(msg.data["totalResponses"], 4);
    assert_eq!(msg.form_id, None);

    assert!(parse_event(r#"{"type":"new_response"}"#).unwrap().data.is_null());
    assert!(matches!(parse_event(r#"{"type":"heartbeat"}"#), Err(ApiError::BadRequest)));
    assert!(matches!(parse_event(r#"{"type":"bogus","data":1}"#), Err(ApiError::BadRequest)));
    assert!(matches!(parse_event("[]"), Err(ApiError::BadRequest)));
}
