use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::auth::Caller;
use crate::engine::transition::{bulk_update_status, update_status, BulkStatusOutcome};
use crate::error::AppError;
use crate::models::message::MessageLog;
use crate::models::shipment::{
    Asset, Customer, ProofOfDelivery, Shipment, ShipmentEvent, ShipmentStatus,
};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/shipments/status", post(set_status))
        .route("/api/shipments/bulk/status", post(set_bulk_status))
        .route("/api/shipments/:id", get(get_shipment))
}

#[derive(Serialize)]
pub struct AssetView {
    #[serde(flatten)]
    pub asset: Asset,
    pub signed_url: Option<String>,
}

#[derive(Serialize)]
pub struct PodView {
    #[serde(flatten)]
    pub pod: ProofOfDelivery,
    pub signed_url: Option<String>,
}

#[derive(Serialize)]
pub struct ShipmentDetail {
    pub shipment: Shipment,
    pub customer: Option<Customer>,
    pub events: Vec<ShipmentEvent>,
    pub assets: Vec<AssetView>,
    pub messages: Vec<MessageLog>,
    pub pod: Option<PodView>,
}

async fn signed(state: &AppState, path: &str) -> Option<String> {
    match state.blobs.signed_url(path, state.signed_url_ttl).await {
        Ok(url) => Some(url),
        Err(err) => {
            warn!(path, error = %err, "could not sign asset url");
            None
        }
    }
}

async fn get_shipment(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Path(id): Path<Uuid>,
) -> Result<Json<ShipmentDetail>, AppError> {
    let org_id = caller.membership(&state).await?.org_id;

    let shipment = state
        .store
        .get_shipment(org_id, id)
        .await?
        .ok_or_else(|| AppError::NotFound("Shipment not found".to_string()))?;

    let customer = state.store.get_customer(org_id, shipment.customer_id).await?;
    let events = state.store.list_events(id).await?;
    let messages = state.store.list_message_logs(id).await?;

    let mut assets = Vec::new();
    for asset in state.store.list_assets(id).await? {
        let signed_url = signed(&state, &asset.path).await;
        assets.push(AssetView { asset, signed_url });
    }

    let pod = match state.store.get_pod(id).await? {
        Some(pod) => {
            let signed_url = signed(&state, &pod.photo_path).await;
            Some(PodView { pod, signed_url })
        }
        None => None,
    };

    Ok(Json(ShipmentDetail {
        shipment,
        customer,
        events,
        assets,
        messages,
        pod,
    }))
}

fn parse_status(raw: &str) -> Result<ShipmentStatus, AppError> {
    if raw.trim().is_empty() {
        return Err(AppError::BadRequest("status is required".to_string()));
    }
    ShipmentStatus::parse(raw).ok_or_else(|| AppError::BadRequest(format!("unknown status {raw:?}")))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdateRequest {
    pub shipment_id: Uuid,
    pub status: String,
    pub note: Option<String>,
}

#[derive(Serialize)]
pub struct StatusUpdateResponse {
    pub ok: bool,
    pub shipment: Shipment,
}

async fn set_status(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(request): Json<StatusUpdateRequest>,
) -> Result<Json<StatusUpdateResponse>, AppError> {
    let status = parse_status(&request.status)?;
    let org_id = caller.membership(&state).await?.org_id;

    let shipment = update_status(
        &state,
        org_id,
        &caller.user_id,
        request.shipment_id,
        status,
        request.note,
    )
    .await?;

    Ok(Json(StatusUpdateResponse { ok: true, shipment }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkStatusRequest {
    #[serde(default)]
    pub shipment_ids: Vec<Uuid>,
    pub status: String,
    pub note: Option<String>,
    #[serde(default)]
    pub auto_log: bool,
}

async fn set_bulk_status(
    State(state): State<Arc<AppState>>,
    caller: Caller,
    Json(request): Json<BulkStatusRequest>,
) -> Result<Json<BulkStatusOutcome>, AppError> {
    let status = parse_status(&request.status)?;
    let org_id = caller.membership(&state).await?.org_id;

    let outcome = bulk_update_status(
        &state,
        org_id,
        &caller.user_id,
        &request.shipment_ids,
        status,
        request.note,
        request.auto_log,
    )
    .await?;

    Ok(Json(outcome))
}
