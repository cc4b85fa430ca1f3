use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::models::ledger::{SyncEvent, SyncOutcome};
use crate::models::message::{MessageLog, MessageLogUpdate, MessageTemplate};
use crate::models::shipment::{
    Asset, Customer, MemberRole, Membership, ProofOfDelivery, Shipment, ShipmentEvent,
    ShipmentStatus,
};
use crate::store::{Datastore, StoreCounts, StoreError};

/// In-process [`Datastore`]. Unique constraints are enforced through
/// `DashMap` entries, so a losing concurrent insert observes the winner.
#[derive(Default)]
pub struct MemoryStore {
    orgs: DashMap<Uuid, String>,
    members: DashMap<String, Membership>,
    sync_events: DashMap<(Uuid, String), SyncEvent>,
    customers: DashMap<Uuid, Customer>,
    customer_phones: DashMap<(Uuid, String), Uuid>,
    shipments: DashMap<Uuid, Shipment>,
    tracking_codes: DashMap<String, Uuid>,
    events: DashMap<Uuid, Vec<ShipmentEvent>>,
    assets: DashMap<Uuid, Vec<Asset>>,
    pods: DashMap<Uuid, ProofOfDelivery>,
    templates: DashMap<(Uuid, ShipmentStatus), MessageTemplate>,
    message_logs: DashMap<Uuid, MessageLog>,
    delivered_notices: DashMap<(Uuid, Uuid), Uuid>,
    provider_ids: DashMap<String, Uuid>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_member(&self, user_id: &str, org_id: Uuid, role: MemberRole) -> Membership {
        let membership = Membership {
            user_id: user_id.to_string(),
            org_id,
            role,
        };
        self.orgs.entry(org_id).or_insert_with(|| "Organization".to_string());
        self.members.insert(user_id.to_string(), membership.clone());
        membership
    }

    pub fn set_template_enabled(&self, org_id: Uuid, status: ShipmentStatus, enabled: bool) {
        if let Some(mut template) = self.templates.get_mut(&(org_id, status)) {
            template.enabled = enabled;
        }
    }

    pub fn shipments_for_org(&self, org_id: Uuid) -> Vec<Shipment> {
        self.shipments
            .iter()
            .filter(|entry| entry.org_id == org_id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    pub fn customers_for_org(&self, org_id: Uuid) -> Vec<Customer> {
        self.customers
            .iter()
            .filter(|entry| entry.org_id == org_id)
            .map(|entry| entry.value().clone())
            .collect()
    }
}

fn apply_log_update(log: &mut MessageLog, update: MessageLogUpdate) {
    if let Some(provider_message_id) = update.provider_message_id {
        log.provider_message_id = Some(provider_message_id);
    }
    if let Some(send_status) = update.send_status {
        log.send_status = send_status;
    }
    if let Some(error) = update.error {
        log.error = error;
    }
    if let Some(sent_at) = update.sent_at {
        log.sent_at = sent_at;
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn membership_for_user(&self, user_id: &str) -> Result<Option<Membership>, StoreError> {
        Ok(self.members.get(user_id).map(|entry| entry.value().clone()))
    }

    async fn create_org(&self, user_id: &str, name: &str) -> Result<Membership, StoreError> {
        match self.members.entry(user_id.to_string()) {
            Entry::Occupied(_) => Err(StoreError::UniqueViolation("org_members_user_id_key")),
            Entry::Vacant(slot) => {
                let org_id = Uuid::new_v4();
                self.orgs.insert(org_id, name.to_string());
                let membership = Membership {
                    user_id: user_id.to_string(),
                    org_id,
                    role: MemberRole::Admin,
                };
                slot.insert(membership.clone());
                Ok(membership)
            }
        }
    }

    async fn insert_sync_event(&self, event: SyncEvent) -> Result<(), StoreError> {
        match self
            .sync_events
            .entry((event.org_id, event.client_event_id.clone()))
        {
            Entry::Occupied(_) => Err(StoreError::UniqueViolation("client_sync_events_pkey")),
            Entry::Vacant(slot) => {
                slot.insert(event);
                Ok(())
            }
        }
    }

    async fn get_sync_event(
        &self,
        org_id: Uuid,
        client_event_id: &str,
    ) -> Result<Option<SyncEvent>, StoreError> {
        Ok(self
            .sync_events
            .get(&(org_id, client_event_id.to_string()))
            .map(|entry| entry.value().clone()))
    }

    async fn claim_sync_event(
        &self,
        org_id: Uuid,
        client_event_id: &str,
        abandoned_before: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        // The shard write lock makes check-and-reset one step.
        let Some(mut event) = self
            .sync_events
            .get_mut(&(org_id, client_event_id.to_string()))
        else {
            return Ok(false);
        };
        if !event.is_reclaimable(abandoned_before) {
            return Ok(false);
        }

        event.claimed_at = Utc::now();
        event.processed_at = None;
        event.error = None;
        Ok(true)
    }

    async fn finish_sync_event(
        &self,
        org_id: Uuid,
        client_event_id: &str,
        outcome: SyncOutcome,
    ) -> Result<(), StoreError> {
        let mut event = self
            .sync_events
            .get_mut(&(org_id, client_event_id.to_string()))
            .ok_or_else(|| StoreError::NotFound(format!("sync event {client_event_id}")))?;

        event.processed_at = Some(Utc::now());
        if outcome.shipment_id.is_some() {
            event.shipment_id = outcome.shipment_id;
        }
        if outcome.tracking_code.is_some() {
            event.tracking_code = outcome.tracking_code;
        }
        event.error = outcome.error;
        Ok(())
    }

    async fn find_customer_by_phone(
        &self,
        org_id: Uuid,
        phone: &str,
    ) -> Result<Option<Customer>, StoreError> {
        let id = self
            .customer_phones
            .get(&(org_id, phone.to_string()))
            .map(|entry| *entry.value());

        Ok(id.and_then(|id| self.customers.get(&id).map(|entry| entry.value().clone())))
    }

    async fn get_customer(&self, org_id: Uuid, id: Uuid) -> Result<Option<Customer>, StoreError> {
        Ok(self
            .customers
            .get(&id)
            .filter(|entry| entry.org_id == org_id)
            .map(|entry| entry.value().clone()))
    }

    async fn insert_customer(&self, customer: Customer) -> Result<Customer, StoreError> {
        match self
            .customer_phones
            .entry((customer.org_id, customer.phone.clone()))
        {
            Entry::Occupied(_) => Err(StoreError::UniqueViolation("customers_org_id_phone_key")),
            Entry::Vacant(slot) => {
                slot.insert(customer.id);
                self.customers.insert(customer.id, customer.clone());
                Ok(customer)
            }
        }
    }

    async fn rename_customer(&self, id: Uuid, name: &str) -> Result<(), StoreError> {
        let mut customer = self
            .customers
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("customer {id}")))?;
        customer.name = name.to_string();
        Ok(())
    }

    async fn insert_shipment(&self, shipment: Shipment) -> Result<Shipment, StoreError> {
        match self.tracking_codes.entry(shipment.tracking_code.clone()) {
            Entry::Occupied(_) => Err(StoreError::UniqueViolation("shipments_tracking_code_key")),
            Entry::Vacant(slot) => {
                slot.insert(shipment.id);
                self.shipments.insert(shipment.id, shipment.clone());
                Ok(shipment)
            }
        }
    }

    async fn get_shipment(&self, org_id: Uuid, id: Uuid) -> Result<Option<Shipment>, StoreError> {
        Ok(self
            .shipments
            .get(&id)
            .filter(|entry| entry.org_id == org_id)
            .map(|entry| entry.value().clone()))
    }

    async fn set_shipment_status(
        &self,
        id: Uuid,
        status: ShipmentStatus,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let mut shipment = self
            .shipments
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("shipment {id}")))?;
        shipment.current_status = status;
        shipment.last_event_at = at;
        Ok(())
    }

    async fn insert_event(&self, event: ShipmentEvent) -> Result<(), StoreError> {
        self.events.entry(event.shipment_id).or_default().push(event);
        Ok(())
    }

    async fn list_events(&self, shipment_id: Uuid) -> Result<Vec<ShipmentEvent>, StoreError> {
        let mut events = self
            .events
            .get(&shipment_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();
        events.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
        Ok(events)
    }

    async fn insert_asset(&self, asset: Asset) -> Result<(), StoreError> {
        self.assets.entry(asset.shipment_id).or_default().push(asset);
        Ok(())
    }

    async fn list_assets(&self, shipment_id: Uuid) -> Result<Vec<Asset>, StoreError> {
        Ok(self
            .assets
            .get(&shipment_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn upsert_pod(&self, pod: ProofOfDelivery) -> Result<(), StoreError> {
        self.pods.insert(pod.shipment_id, pod);
        Ok(())
    }

    async fn get_pod(&self, shipment_id: Uuid) -> Result<Option<ProofOfDelivery>, StoreError> {
        Ok(self.pods.get(&shipment_id).map(|entry| entry.value().clone()))
    }

    async fn find_enabled_template(
        &self,
        org_id: Uuid,
        status: ShipmentStatus,
    ) -> Result<Option<MessageTemplate>, StoreError> {
        Ok(self
            .templates
            .get(&(org_id, status))
            .filter(|entry| entry.enabled)
            .map(|entry| entry.value().clone()))
    }

    async fn upsert_template(
        &self,
        org_id: Uuid,
        status: ShipmentStatus,
        body: &str,
    ) -> Result<MessageTemplate, StoreError> {
        let mut template = self
            .templates
            .entry((org_id, status))
            .or_insert_with(|| MessageTemplate {
                id: Uuid::new_v4(),
                org_id,
                status,
                body: String::new(),
                enabled: true,
            });
        template.body = body.to_string();
        Ok(template.value().clone())
    }

    async fn insert_message_log(&self, log: MessageLog) -> Result<MessageLog, StoreError> {
        if log.status == ShipmentStatus::Delivered {
            match self.delivered_notices.entry((log.org_id, log.shipment_id)) {
                Entry::Occupied(_) => {
                    return Err(StoreError::UniqueViolation(
                        "message_logs_delivered_once_key",
                    ));
                }
                Entry::Vacant(slot) => {
                    slot.insert(log.id);
                }
            }
        }

        if let Some(provider_message_id) = &log.provider_message_id {
            self.provider_ids.insert(provider_message_id.clone(), log.id);
        }
        self.message_logs.insert(log.id, log.clone());
        Ok(log)
    }

    async fn update_message_log(&self, id: Uuid, update: MessageLogUpdate) -> Result<(), StoreError> {
        if let Some(provider_message_id) = &update.provider_message_id {
            self.provider_ids.insert(provider_message_id.clone(), id);
        }
        let mut log = self
            .message_logs
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("message log {id}")))?;
        apply_log_update(&mut log, update);
        Ok(())
    }

    async fn update_message_log_by_provider_id(
        &self,
        provider_message_id: &str,
        update: MessageLogUpdate,
    ) -> Result<bool, StoreError> {
        let Some(id) = self
            .provider_ids
            .get(provider_message_id)
            .map(|entry| *entry.value())
        else {
            return Ok(false);
        };

        match self.message_logs.get_mut(&id) {
            Some(mut log) => {
                apply_log_update(&mut log, update);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_message_logs(&self, shipment_id: Uuid) -> Result<Vec<MessageLog>, StoreError> {
        let mut logs: Vec<MessageLog> = self
            .message_logs
            .iter()
            .filter(|entry| entry.shipment_id == shipment_id)
            .map(|entry| entry.value().clone())
            .collect();
        logs.sort_by(|a, b| b.sent_at.cmp(&a.sent_at));
        Ok(logs)
    }

    async fn counts(&self) -> Result<StoreCounts, StoreError> {
        Ok(StoreCounts {
            shipments: self.shipments.len(),
            customers: self.customers.len(),
            sync_events: self.sync_events.len(),
        })
    }
}
