use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::models::outbox::Attachment;
use crate::models::shipment::{ProofOfDelivery, Shipment, ShipmentEvent, ShipmentStatus};
use crate::state::AppState;
use crate::store::blob::extension_for;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    #[error("Delivered is terminal")]
    Terminal,

    #[error("Delivered is set via POD capture")]
    DeliveredRequiresPod,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionSource {
    StatusUpdate,
    ProofOfDelivery,
}

/// The one rule every status write goes through: nothing leaves
/// `delivered`, and only proof-of-delivery capture enters it.
pub fn check(
    current: ShipmentStatus,
    next: ShipmentStatus,
    via: TransitionSource,
) -> Result<(), TransitionError> {
    if current.is_terminal() {
        return Err(TransitionError::Terminal);
    }
    if next == ShipmentStatus::Delivered && via != TransitionSource::ProofOfDelivery {
        return Err(TransitionError::DeliveredRequiresPod);
    }
    Ok(())
}

/// Appends the timeline event and moves the shipment to `next`.
async fn apply(
    state: &AppState,
    shipment: &Shipment,
    next: ShipmentStatus,
    note: Option<String>,
    actor: &str,
    via: TransitionSource,
    at: DateTime<Utc>,
) -> Result<Shipment, AppError> {
    if let Err(err) = check(shipment.current_status, next, via) {
        state
            .metrics
            .status_updates_total
            .with_label_values(&["rejected"])
            .inc();
        return Err(err.into());
    }

    state
        .store
        .insert_event(ShipmentEvent {
            id: Uuid::new_v4(),
            org_id: shipment.org_id,
            shipment_id: shipment.id,
            status: next,
            note,
            occurred_at: at,
            created_by: Some(actor.to_string()),
        })
        .await?;
    state.store.set_shipment_status(shipment.id, next, at).await?;

    state
        .metrics
        .status_updates_total
        .with_label_values(&["updated"])
        .inc();
    info!(
        shipment_id = %shipment.id,
        from = %shipment.current_status,
        to = %next,
        "shipment status changed"
    );

    let mut updated = shipment.clone();
    updated.current_status = next;
    updated.last_event_at = at;
    Ok(updated)
}

fn clean_note(note: Option<String>) -> Option<String> {
    note.map(|n| n.trim().to_string()).filter(|n| !n.is_empty())
}

async fn load(state: &AppState, org_id: Uuid, shipment_id: Uuid) -> Result<Shipment, AppError> {
    state
        .store
        .get_shipment(org_id, shipment_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Shipment not found".to_string()))
}

/// Moves one shipment to `status` and notifies the customer.
pub async fn update_status(
    state: &AppState,
    org_id: Uuid,
    actor: &str,
    shipment_id: Uuid,
    status: ShipmentStatus,
    note: Option<String>,
) -> Result<Shipment, AppError> {
    let shipment = load(state, org_id, shipment_id).await?;
    let note = clean_note(note);

    let updated = apply(
        state,
        &shipment,
        status,
        note.clone(),
        actor,
        TransitionSource::StatusUpdate,
        Utc::now(),
    )
    .await?;

    state
        .dispatcher
        .notify_best_effort(&updated, status, note.as_deref())
        .await;

    Ok(updated)
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct BulkItemResult {
    pub id: Uuid,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkStatusOutcome {
    pub ok: bool,
    pub updated: usize,
    pub skipped: usize,
    pub results: Vec<BulkItemResult>,
}

/// Applies `status` to every listed shipment independently. Delivered
/// shipments are skipped as `delivered_locked`; one failure never stops
/// the rest.
pub async fn bulk_update_status(
    state: &AppState,
    org_id: Uuid,
    actor: &str,
    shipment_ids: &[Uuid],
    status: ShipmentStatus,
    note: Option<String>,
    auto_log: bool,
) -> Result<BulkStatusOutcome, AppError> {
    if shipment_ids.is_empty() {
        return Err(AppError::BadRequest("shipmentIds is required".to_string()));
    }
    if status == ShipmentStatus::Delivered {
        return Err(TransitionError::DeliveredRequiresPod.into());
    }

    let note = clean_note(note);
    let mut seen = HashSet::new();
    let mut outcome = BulkStatusOutcome {
        ok: true,
        updated: 0,
        skipped: 0,
        results: Vec::with_capacity(shipment_ids.len()),
    };

    for &id in shipment_ids.iter().filter(|id| seen.insert(**id)) {
        let result = match state.store.get_shipment(org_id, id).await {
            Ok(Some(shipment)) if shipment.current_status.is_terminal() => {
                Err("delivered_locked".to_string())
            }
            Ok(Some(shipment)) => apply(
                state,
                &shipment,
                status,
                note.clone(),
                actor,
                TransitionSource::StatusUpdate,
                Utc::now(),
            )
            .await
            .map_err(|err| err.to_string()),
            Ok(None) => Err("not_found".to_string()),
            Err(err) => Err(err.to_string()),
        };

        match result {
            Ok(updated) => {
                outcome.updated += 1;
                outcome.results.push(BulkItemResult { id, ok: true, reason: None });
                if auto_log {
                    state
                        .dispatcher
                        .notify_best_effort(&updated, status, note.as_deref())
                        .await;
                }
            }
            Err(reason) => {
                warn!(shipment_id = %id, reason = %reason, "bulk status update skipped shipment");
                outcome.skipped += 1;
                outcome.results.push(BulkItemResult {
                    id,
                    ok: false,
                    reason: Some(reason),
                });
            }
        }
    }

    Ok(outcome)
}

#[derive(Debug, Clone, Serialize)]
pub struct PodReceipt {
    pub ok: bool,
    pub path: String,
}

/// Stores the delivery photo, records the receiver and closes the shipment.
pub async fn complete_pod(
    state: &AppState,
    org_id: Uuid,
    actor: &str,
    shipment_id: Uuid,
    receiver_name: &str,
    photo: Attachment,
) -> Result<PodReceipt, AppError> {
    let receiver_name = receiver_name.trim();
    if receiver_name.is_empty() {
        return Err(AppError::BadRequest("receiverName is required".to_string()));
    }

    let shipment = load(state, org_id, shipment_id).await?;
    check(
        shipment.current_status,
        ShipmentStatus::Delivered,
        TransitionSource::ProofOfDelivery,
    )?;

    let delivered_at = Utc::now();
    let path = format!(
        "org/{org_id}/shipments/{shipment_id}/pod/{}.{}",
        delivered_at.timestamp_millis(),
        extension_for(&photo.content_type)
    );

    if let Err(err) = state
        .blobs
        .upload(&path, photo.bytes, &photo.content_type)
        .await
    {
        state.metrics.asset_uploads_total.with_label_values(&["error"]).inc();
        return Err(err.into());
    }
    state.metrics.asset_uploads_total.with_label_values(&["ok"]).inc();

    state
        .store
        .upsert_pod(ProofOfDelivery {
            shipment_id,
            org_id,
            photo_path: path.clone(),
            receiver_name: receiver_name.to_string(),
            delivered_at,
        })
        .await?;

    let note = format!("POD captured ({receiver_name})");
    let updated = apply(
        state,
        &shipment,
        ShipmentStatus::Delivered,
        Some(note.clone()),
        actor,
        TransitionSource::ProofOfDelivery,
        delivered_at,
    )
    .await?;

    state
        .dispatcher
        .notify_best_effort(&updated, ShipmentStatus::Delivered, Some(&note))
        .await;

    Ok(PodReceipt { ok: true, path })
}
