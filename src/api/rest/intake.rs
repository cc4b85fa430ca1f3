use std::sync::Arc;

use axum::extract::multipart::{Field, Multipart, MultipartRejection};
use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;

use crate::auth::Caller;
use crate::engine::ingest::{ingest, IntakeSubmission};
use crate::error::AppError;
use crate::models::intake::IntakeAck;
use crate::models::outbox::Attachment;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/field/intake", post(field_intake))
}

pub(crate) fn invalid_form(err: impl std::fmt::Display) -> AppError {
    AppError::BadRequest(format!("Invalid form data: {err}"))
}

/// Reads a file part; empty parts are treated as absent.
pub(crate) async fn read_attachment(field: Field<'_>) -> Result<Option<Attachment>, AppError> {
    let file_name = field.file_name().unwrap_or("upload").to_string();
    let content_type = field.content_type().unwrap_or("image/jpeg").to_string();
    let bytes = field.bytes().await.map_err(invalid_form)?;

    if bytes.is_empty() {
        return Ok(None);
    }
    Ok(Some(Attachment::new(file_name, content_type, bytes.to_vec())))
}

async fn field_intake(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<IntakeAck>, AppError> {
    let mut multipart = multipart.map_err(invalid_form)?;

    let mut submission = IntakeSubmission::default();
    let mut raw_payload = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "clientEventId" => {
                submission.client_event_id = field.text().await.map_err(invalid_form)?;
            }
            "payload" => raw_payload = Some(field.text().await.map_err(invalid_form)?),
            "photos" => {
                if let Some(photo) = read_attachment(field).await? {
                    submission.photos.push(photo);
                }
            }
            "signature" => {
                if let Some(signature) = read_attachment(field).await? {
                    submission.signature = Some(signature);
                }
            }
            _ => {}
        }
    }

    let raw_payload = raw_payload.unwrap_or_default();
    let raw_payload = if raw_payload.trim().is_empty() { "{}" } else { raw_payload.as_str() };
    submission.payload = serde_json::from_str(raw_payload)
        .map_err(|_| AppError::BadRequest("payload must be valid JSON".to_string()))?;

    let ack = ingest(&state, &caller.user_id, submission).await?;
    Ok(Json(ack))
}
