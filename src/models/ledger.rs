use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const INTAKE_CREATE: &str = "intake_create";

/// Idempotency ledger row. `(org_id, client_event_id)` is unique.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncEvent {
    pub org_id: Uuid,
    pub client_event_id: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    /// When the current attempt took the row; refreshed on takeover.
    pub claimed_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub shipment_id: Option<Uuid>,
    pub tracking_code: Option<String>,
    pub error: Option<String>,
}

impl SyncEvent {
    pub fn new(org_id: Uuid, client_event_id: &str, kind: &str, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            org_id,
            client_event_id: client_event_id.to_string(),
            kind: kind.to_string(),
            payload,
            created_at: now,
            claimed_at: now,
            processed_at: None,
            shipment_id: None,
            tracking_code: None,
            error: None,
        }
    }
}

impl SyncEvent {
    /// A retry may take this row over: no shipment was recorded, and the
    /// last attempt either failed or has held the row since before
    /// `abandoned_before`.
    pub fn is_reclaimable(&self, abandoned_before: DateTime<Utc>) -> bool {
        if self.shipment_id.is_some() {
            return false;
        }
        match self.processed_at {
            Some(_) => self.error.is_some(),
            None => self.claimed_at <= abandoned_before,
        }
    }
}

/// Result written back onto a ledger row once processing stops.
#[derive(Debug, Clone, Default)]
pub struct SyncOutcome {
    pub shipment_id: Option<Uuid>,
    pub tracking_code: Option<String>,
    pub error: Option<String>,
}
