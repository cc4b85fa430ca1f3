use std::time::Instant;

use chrono::{Duration, Utc};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::engine::normalize::normalize_intake;
use crate::engine::tracking::{make_tracking_code, MAX_TRACKING_CODE_ATTEMPTS};
use crate::engine::validate::validate_intake;
use crate::error::AppError;
use crate::models::intake::{IntakeAck, IntakePayload};
use crate::models::ledger::{SyncEvent, SyncOutcome, INTAKE_CREATE};
use crate::models::outbox::Attachment;
use crate::models::shipment::{
    Asset, AssetKind, CargoMeta, Customer, Shipment, ShipmentEvent, ShipmentStatus,
};
use crate::state::AppState;
use crate::store::blob::extension_for;
use crate::store::StoreError;

/// A ledger row still unprocessed this long after its last claim belongs
/// to an attempt that died; a retry may take it over.
const ABANDONED_AFTER_SECS: i64 = 300;

/// One field-intake request as received over the wire.
#[derive(Debug, Clone, Default)]
pub struct IntakeSubmission {
    pub client_event_id: String,
    pub payload: Value,
    pub photos: Vec<Attachment>,
    pub signature: Option<Attachment>,
}

/// Processes a field intake exactly once per `(organization, client event id)`.
///
/// The ledger insert is the only dedup gate. A losing insert replays the
/// winner's recorded result and performs no side effects, unless the winner
/// failed before creating a shipment (or died mid-way): then exactly one
/// retry takes the row over and processes it again. Everything after
/// shipment creation is partial-failure tolerant: an asset upload failure is
/// reported in `asset_error` and recorded on the ledger, and the shipment is
/// kept.
pub async fn ingest(
    state: &AppState,
    user_id: &str,
    submission: IntakeSubmission,
) -> Result<IntakeAck, AppError> {
    let started = Instant::now();
    let result = process(state, user_id, submission).await;

    let outcome = match &result {
        Ok(ack) if ack.duplicate => "duplicate",
        Ok(ack) if ack.asset_error.is_some() => "partial",
        Ok(_) => "created",
        Err(AppError::BadRequest(_)) | Err(AppError::Unauthorized) => "rejected",
        Err(AppError::Conflict(_)) => "conflict",
        Err(_) => "error",
    };
    state
        .metrics
        .intake_requests_total
        .with_label_values(&[outcome])
        .inc();
    state
        .metrics
        .intake_latency_seconds
        .with_label_values(&[outcome])
        .observe(started.elapsed().as_secs_f64());

    result
}

async fn process(
    state: &AppState,
    user_id: &str,
    submission: IntakeSubmission,
) -> Result<IntakeAck, AppError> {
    let client_event_id = submission.client_event_id.trim().to_string();
    if client_event_id.is_empty() {
        return Err(AppError::BadRequest("clientEventId is required".to_string()));
    }

    let payload = normalize_intake(&submission.payload);
    validate_intake(&payload)?;

    let org_id = state
        .store
        .membership_for_user(user_id)
        .await?
        .map(|membership| membership.org_id)
        .ok_or_else(|| AppError::BadRequest("No organization membership".to_string()))?;

    let ledger = SyncEvent::new(org_id, &client_event_id, INTAKE_CREATE, submission.payload);
    match state.store.insert_sync_event(ledger).await {
        Ok(()) => {}
        Err(err) if err.is_unique_violation() => {
            if let Some(ack) = replay(state, org_id, &client_event_id).await? {
                return Ok(ack);
            }
        }
        Err(err) => return Err(err.into()),
    }

    let shipment = match create_shipment(state, org_id, user_id, &payload).await {
        Ok(shipment) => shipment,
        Err(err) => {
            annotate(state, org_id, &client_event_id, SyncOutcome {
                error: Some(err.to_string()),
                ..SyncOutcome::default()
            })
            .await;
            return Err(err);
        }
    };
    // Pin the shipment on the ledger at once so a takeover never creates a second one.
    annotate(state, org_id, &client_event_id, SyncOutcome {
        shipment_id: Some(shipment.id),
        tracking_code: Some(shipment.tracking_code.clone()),
        error: None,
    })
    .await;

    let initial_event = ShipmentEvent {
        id: Uuid::new_v4(),
        org_id,
        shipment_id: shipment.id,
        status: ShipmentStatus::Collected,
        note: Some(
            payload
                .notes
                .clone()
                .unwrap_or_else(|| ShipmentStatus::Collected.default_note().to_string()),
        ),
        occurred_at: shipment.last_event_at,
        created_by: Some(user_id.to_string()),
    };
    if let Err(err) = state.store.insert_event(initial_event).await {
        let err = AppError::from(err);
        annotate(state, org_id, &client_event_id, SyncOutcome {
            shipment_id: Some(shipment.id),
            tracking_code: Some(shipment.tracking_code.clone()),
            error: Some(err.to_string()),
        })
        .await;
        return Err(err);
    }

    let asset_error = upload_assets(state, &shipment, user_id, submission.photos, submission.signature)
        .await
        .err();
    if let Some(error) = &asset_error {
        warn!(
            org_id = %org_id,
            client_event_id = %client_event_id,
            shipment_id = %shipment.id,
            error = %error,
            "intake asset upload failed; shipment kept"
        );
    }

    state
        .dispatcher
        .notify_best_effort(&shipment, ShipmentStatus::Collected, payload.notes.as_deref())
        .await;

    annotate(state, org_id, &client_event_id, SyncOutcome {
        shipment_id: Some(shipment.id),
        tracking_code: Some(shipment.tracking_code.clone()),
        error: asset_error.clone(),
    })
    .await;

    info!(
        org_id = %org_id,
        client_event_id = %client_event_id,
        shipment_id = %shipment.id,
        tracking_code = %shipment.tracking_code,
        "field intake processed"
    );

    Ok(IntakeAck {
        ok: true,
        shipment_id: shipment.id,
        tracking_code: shipment.tracking_code,
        duplicate: false,
        asset_error,
    })
}

/// Answers a retried submission from the ledger. Returns `None` when this
/// request took over a failed or abandoned row and must process it itself.
async fn replay(
    state: &AppState,
    org_id: Uuid,
    client_event_id: &str,
) -> Result<Option<IntakeAck>, AppError> {
    let abandoned_before = Utc::now() - Duration::seconds(ABANDONED_AFTER_SECS);
    if state
        .store
        .claim_sync_event(org_id, client_event_id, abandoned_before)
        .await?
    {
        info!(
            org_id = %org_id,
            client_event_id = %client_event_id,
            "retrying field intake after an unfinished attempt"
        );
        return Ok(None);
    }

    let existing = state
        .store
        .get_sync_event(org_id, client_event_id)
        .await?
        .ok_or_else(|| AppError::Internal(format!("ledger entry {client_event_id} vanished")))?;

    info!(
        org_id = %org_id,
        client_event_id = %client_event_id,
        "duplicate field intake"
    );

    match (existing.shipment_id, existing.tracking_code) {
        (Some(shipment_id), Some(tracking_code)) => Ok(Some(IntakeAck {
            ok: true,
            shipment_id,
            tracking_code,
            duplicate: true,
            asset_error: None,
        })),
        _ => match (existing.processed_at, existing.error) {
            // Failed again after a concurrent takeover; the next retry may claim it.
            (Some(_), Some(error)) => Err(AppError::Conflict(format!(
                "previous attempt failed: {error}"
            ))),
            _ => Err(AppError::Conflict(
                "submission is still processing".to_string(),
            )),
        },
    }
}

/// Records the outcome on the ledger. A failure here is logged only: the
/// caller already has its answer.
async fn annotate(state: &AppState, org_id: Uuid, client_event_id: &str, outcome: SyncOutcome) {
    if let Err(err) = state
        .store
        .finish_sync_event(org_id, client_event_id, outcome)
        .await
    {
        warn!(
            org_id = %org_id,
            client_event_id = %client_event_id,
            error = %err,
            "failed to record ledger outcome"
        );
    }
}

async fn create_shipment(
    state: &AppState,
    org_id: Uuid,
    user_id: &str,
    payload: &IntakePayload,
) -> Result<Shipment, AppError> {
    let customer = upsert_customer(state, org_id, &payload.customer_name, &payload.phone).await?;
    let now = Utc::now();

    let mut template = Shipment {
        id: Uuid::new_v4(),
        org_id,
        customer_id: customer.id,
        tracking_code: String::new(),
        destination: payload.destination.clone(),
        service_type: payload.service_type,
        current_status: ShipmentStatus::Collected,
        cargo_type: payload.cargo_type,
        cargo_meta: CargoMeta {
            pickup_address: payload.pickup_address.clone(),
            pickup_contact_phone: payload.pickup_contact_phone.clone(),
            notes: payload.notes.clone(),
            quantity: payload.quantity,
            dimensions: payload.dimensions.clone(),
            vehicle: payload.vehicle.clone(),
        },
        last_event_at: payload.occurred_at_iso.unwrap_or(now),
        created_at: now,
    };

    for attempt in 1..=MAX_TRACKING_CODE_ATTEMPTS {
        template.tracking_code = make_tracking_code(&state.tracking_code_prefix);
        match state.store.insert_shipment(template.clone()).await {
            Ok(shipment) => {
                info!(
                    shipment_id = %shipment.id,
                    created_by = %user_id,
                    "shipment created from field intake"
                );
                return Ok(shipment);
            }
            Err(err) if err.is_unique_violation() => {
                warn!(attempt, tracking_code = %template.tracking_code, "tracking code collision");
            }
            Err(err) => return Err(err.into()),
        }
    }

    Err(AppError::Internal(
        "could not allocate a unique tracking code".to_string(),
    ))
}

/// Customers are keyed by `(organization, phone)`; a repeat sender keeps
/// their id and takes the latest name.
async fn upsert_customer(
    state: &AppState,
    org_id: Uuid,
    name: &str,
    phone: &str,
) -> Result<Customer, StoreError> {
    if let Some(existing) = state.store.find_customer_by_phone(org_id, phone).await? {
        return rename(state, existing, name).await;
    }

    let candidate = Customer {
        id: Uuid::new_v4(),
        org_id,
        name: name.to_string(),
        phone: phone.to_string(),
        created_at: Utc::now(),
    };

    match state.store.insert_customer(candidate).await {
        Ok(customer) => Ok(customer),
        Err(err) if err.is_unique_violation() => {
            let existing = state
                .store
                .find_customer_by_phone(org_id, phone)
                .await?
                .ok_or_else(|| StoreError::NotFound(format!("customer with phone {phone}")))?;
            rename(state, existing, name).await
        }
        Err(err) => Err(err),
    }
}

async fn rename(state: &AppState, mut customer: Customer, name: &str) -> Result<Customer, StoreError> {
    if customer.name != name {
        state.store.rename_customer(customer.id, name).await?;
        customer.name = name.to_string();
    }
    Ok(customer)
}

/// Uploads photos then the signature, stopping at the first failure.
async fn upload_assets(
    state: &AppState,
    shipment: &Shipment,
    user_id: &str,
    photos: Vec<Attachment>,
    signature: Option<Attachment>,
) -> Result<(), String> {
    let attachments = photos
        .into_iter()
        .map(|photo| (AssetKind::PickupPhoto, photo))
        .chain(signature.map(|sig| (AssetKind::PickupSignature, sig)));

    for (index, (kind, attachment)) in attachments.enumerate() {
        let path = format!(
            "org/{}/shipments/{}/intake/{}-{index}.{}",
            shipment.org_id,
            shipment.id,
            Utc::now().timestamp_millis(),
            extension_for(&attachment.content_type)
        );

        let uploaded = state
            .blobs
            .upload(&path, attachment.bytes, &attachment.content_type)
            .await;
        if let Err(err) = uploaded {
            state.metrics.asset_uploads_total.with_label_values(&["error"]).inc();
            return Err(err.to_string());
        }
        state.metrics.asset_uploads_total.with_label_values(&["ok"]).inc();

        state
            .store
            .insert_asset(Asset {
                id: Uuid::new_v4(),
                org_id: shipment.org_id,
                shipment_id: shipment.id,
                kind,
                path,
                created_by: Some(user_id.to_string()),
                created_at: Utc::now(),
            })
            .await
            .map_err(|err| err.to_string())?;
    }

    Ok(())
}
