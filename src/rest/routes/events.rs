//! `POST /events` (§4.6, §6): the webhook entrypoint.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde_json::json;

use crate::rest::error::ApiError;
use crate::rest::state::AppState;
use crate::webhook::{parse_event, verify_signature};

const SIGNATURE_HEADER: &str = "x-hub-signature-256";
const EVENT_TYPE_HEADER: &str = "x-github-event";

pub async fn events(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ApiError> {
    if state.config.webhook.require_signature {
        let secret = state
            .config
            .webhook
            .secret
            .as_deref()
            .ok_or_else(|| ApiError::InternalError("webhook secret not configured".into()))?;
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok());
        if !verify_signature(secret, signature, &body) {
            return Err(ApiError::Unauthorized("invalid webhook signature".into()));
        }
    }

    let event_type = headers
        .get(EVENT_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::BadRequest(format!("missing {EVENT_TYPE_HEADER} header")))?;

    let relevant = parse_event(event_type, &body)
        .map_err(|err| ApiError::BadRequest(format!("{err:?}")))?;

    match relevant {
        Some(event) => {
            state.submit_event(event.repo, event.number).await;
            Ok(Json(json!({ "status": "accepted" })))
        }
        None => Ok(Json(json!({ "status": "ignored" }))),
    }
}
