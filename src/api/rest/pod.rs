use std::sync::Arc;

use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;
use uuid::Uuid;

use crate::api::rest::intake::{invalid_form, read_attachment};
use crate::auth::Caller;
use crate::engine::transition::{complete_pod, PodReceipt};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/api/pod/complete", post(pod_complete))
}

async fn pod_complete(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<PodReceipt>, AppError> {
    let mut multipart = multipart.map_err(invalid_form)?;

    let mut shipment_id = String::new();
    let mut receiver_name = String::new();
    let mut photo = None;

    while let Some(field) = multipart.next_field().await.map_err(invalid_form)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "shipmentId" => shipment_id = field.text().await.map_err(invalid_form)?,
            "receiverName" => receiver_name = field.text().await.map_err(invalid_form)?,
            "file" => photo = read_attachment(field).await?,
            _ => {}
        }
    }

    let shipment_id = shipment_id.trim();
    if shipment_id.is_empty() {
        return Err(AppError::BadRequest("shipmentId is required".to_string()));
    }
    let shipment_id = Uuid::parse_str(shipment_id)
        .map_err(|_| AppError::BadRequest("shipmentId must be a UUID".to_string()))?;
    if receiver_name.trim().is_empty() {
        return Err(AppError::BadRequest("receiverName is required".to_string()));
    }
    let photo = photo.ok_or_else(|| AppError::BadRequest("file is required".to_string()))?;

    let org_id = caller.membership(&state).await?.org_id;
    let receipt = complete_pod(
        &state,
        org_id,
        &caller.user_id,
        shipment_id,
        &receiver_name,
        photo,
    )
    .await?;

    Ok(Json(receipt))
}
