//! Seams to the external collaborators: the relational datastore and
//! ([`blob`]) the binary object store.

pub mod blob;
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::ledger::{SyncEvent, SyncOutcome};
use crate::models::message::{MessageLog, MessageLogUpdate, MessageTemplate};
use crate::models::shipment::{
    Asset, Customer, Membership, ProofOfDelivery, Shipment, ShipmentEvent, ShipmentStatus,
};

pub use memory::MemoryStore;

#[derive(Debug, Error)]
pub enum StoreError {
    /// A unique constraint rejected the write.
    #[error("duplicate key violates unique constraint {0}")]
    UniqueViolation(&'static str),

    #[error("{0} not found")]
    NotFound(String),

    #[error("datastore unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn is_unique_violation(&self) -> bool {
        matches!(self, StoreError::UniqueViolation(_))
    }
}

/// Transactional datastore with per-organization row isolation.
///
/// Every `insert_*` that is backed by a unique constraint reports a
/// conflict as [`StoreError::UniqueViolation`] and leaves the existing row
/// untouched. Callers use that as their concurrency gate.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn membership_for_user(&self, user_id: &str) -> Result<Option<Membership>, StoreError>;

    /// Creates an organization with `user_id` as its admin.
    async fn create_org(&self, user_id: &str, name: &str) -> Result<Membership, StoreError>;

    /// Unique on `(org_id, client_event_id)`.
    async fn insert_sync_event(&self, event: SyncEvent) -> Result<(), StoreError>;

    async fn get_sync_event(
        &self,
        org_id: Uuid,
        client_event_id: &str,
    ) -> Result<Option<SyncEvent>, StoreError>;

    /// Compare-and-set takeover of a row a retry may reprocess (see
    /// [`SyncEvent::is_reclaimable`]). The winner gets `true` and the row is
    /// reset to in-progress; every other caller gets `false`.
    async fn claim_sync_event(
        &self,
        org_id: Uuid,
        client_event_id: &str,
        abandoned_before: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Stamps `processed_at` and records the outcome.
    async fn finish_sync_event(
        &self,
        org_id: Uuid,
        client_event_id: &str,
        outcome: SyncOutcome,
    ) -> Result<(), StoreError>;

    async fn find_customer_by_phone(
        &self,
        org_id: Uuid,
        phone: &str,
    ) -> Result<Option<Customer>, StoreError>;

    async fn get_customer(&self, org_id: Uuid, id: Uuid) -> Result<Option<Customer>, StoreError>;

    /// Unique on `(org_id, phone)`.
    async fn insert_customer(&self, customer: Customer) -> Result<Customer, StoreError>;

    async fn rename_customer(&self, id: Uuid, name: &str) -> Result<(), StoreError>;

    /// Unique on `tracking_code`.
    async fn insert_shipment(&self, shipment: Shipment) -> Result<Shipment, StoreError>;

    async fn get_shipment(&self, org_id: Uuid, id: Uuid) -> Result<Option<Shipment>, StoreError>;

    async fn set_shipment_status(
        &self,
        id: Uuid,
        status: ShipmentStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn insert_event(&self, event: ShipmentEvent) -> Result<(), StoreError>;

    /// Newest first.
    async fn list_events(&self, shipment_id: Uuid) -> Result<Vec<ShipmentEvent>, StoreError>;

    async fn insert_asset(&self, asset: Asset) -> Result<(), StoreError>;

    async fn list_assets(&self, shipment_id: Uuid) -> Result<Vec<Asset>, StoreError>;

    async fn upsert_pod(&self, pod: ProofOfDelivery) -> Result<(), StoreError>;

    async fn get_pod(&self, shipment_id: Uuid) -> Result<Option<ProofOfDelivery>, StoreError>;

    async fn find_enabled_template(
        &self,
        org_id: Uuid,
        status: ShipmentStatus,
    ) -> Result<Option<MessageTemplate>, StoreError>;

    /// Replaces the body of the `(org_id, status)` template, or inserts it enabled.
    async fn upsert_template(
        &self,
        org_id: Uuid,
        status: ShipmentStatus,
        body: &str,
    ) -> Result<MessageTemplate, StoreError>;

    /// Unique on `(org_id, shipment_id, status)` for `delivered` notifications.
    async fn insert_message_log(&self, log: MessageLog) -> Result<MessageLog, StoreError>;

    async fn update_message_log(&self, id: Uuid, update: MessageLogUpdate) -> Result<(), StoreError>;

    /// Returns `false` when no log carries that provider id.
    async fn update_message_log_by_provider_id(
        &self,
        provider_message_id: &str,
        update: MessageLogUpdate,
    ) -> Result<bool, StoreError>;

    async fn list_message_logs(&self, shipment_id: Uuid) -> Result<Vec<MessageLog>, StoreError>;

    async fn counts(&self) -> Result<StoreCounts, StoreError>;
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct StoreCounts {
    pub shipments: usize,
    pub customers: usize,
    pub sync_events: usize,
}
