use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::post;
use axum::{Form, Json};
use axum::Router;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::AppError;
use crate::models::message::{MessageLogUpdate, SendStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/webhooks/twilio/status", post(twilio_status))
}

#[derive(Deserialize)]
pub struct WebhookQuery {
    pub secret: Option<String>,
}

/// Delivery receipt posted by the messaging provider.
#[derive(Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub struct StatusCallback {
    pub message_sid: Option<String>,
    pub message_status: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
}

fn non_blank(value: Option<&String>) -> Option<&str> {
    value.map(|v| v.trim()).filter(|v| !v.is_empty())
}

pub fn status_update(callback: &StatusCallback, status: SendStatus) -> MessageLogUpdate {
    let error = if status.is_failure() {
        let detail = [
            non_blank(callback.error_code.as_ref()),
            non_blank(callback.error_message.as_ref()),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
        Some(if detail.is_empty() { "Delivery failed".to_string() } else { detail })
    } else {
        None
    };

    let sent_at = matches!(status, SendStatus::Sent | SendStatus::Delivered).then(Utc::now);

    MessageLogUpdate {
        provider_message_id: None,
        send_status: Some(status),
        error: Some(error),
        sent_at,
    }
}

async fn twilio_status(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WebhookQuery>,
    Form(callback): Form<StatusCallback>,
) -> Result<Json<Value>, AppError> {
    let authorized = match (&state.webhook_secret, &query.secret) {
        (Some(expected), Some(given)) => expected == given,
        _ => false,
    };
    if !authorized {
        return Err(AppError::Unauthorized);
    }

    let (Some(sid), Some(raw_status)) = (
        non_blank(callback.message_sid.as_ref()),
        non_blank(callback.message_status.as_ref()),
    ) else {
        return Ok(Json(json!({ "ok": true })));
    };

    let status = SendStatus::from_provider(raw_status);
    let update = status_update(&callback, status);
    let matched = state
        .store
        .update_message_log_by_provider_id(sid, update)
        .await?;

    if matched {
        debug!(sid, status = raw_status, "message status updated");
    } else {
        warn!(sid, status = raw_status, "status callback for unknown message");
    }

    Ok(Json(json!({ "ok": true })))
}
