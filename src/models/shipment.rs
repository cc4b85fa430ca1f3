use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::intake::{CargoDimensions, CargoType, ServiceType, VehicleDetails};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentStatus {
    Received,
    Collected,
    Loaded,
    DepartedUk,
    ArrivedDestination,
    CollectedByCustomer,
    OutForDelivery,
    Delivered,
}

impl ShipmentStatus {
    pub const ORDERED: [ShipmentStatus; 8] = [
        ShipmentStatus::Received,
        ShipmentStatus::Collected,
        ShipmentStatus::Loaded,
        ShipmentStatus::DepartedUk,
        ShipmentStatus::ArrivedDestination,
        ShipmentStatus::CollectedByCustomer,
        ShipmentStatus::OutForDelivery,
        ShipmentStatus::Delivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ShipmentStatus::Received => "received",
            ShipmentStatus::Collected => "collected",
            ShipmentStatus::Loaded => "loaded",
            ShipmentStatus::DepartedUk => "departed_uk",
            ShipmentStatus::ArrivedDestination => "arrived_destination",
            ShipmentStatus::CollectedByCustomer => "collected_by_customer",
            ShipmentStatus::OutForDelivery => "out_for_delivery",
            ShipmentStatus::Delivered => "delivered",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_ascii_lowercase();
        Self::ORDERED.into_iter().find(|status| status.as_str() == raw)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ShipmentStatus::Delivered)
    }

    pub fn default_note(&self) -> &'static str {
        match self {
            ShipmentStatus::Received => "Created",
            ShipmentStatus::Collected => "Collected (field intake)",
            ShipmentStatus::Loaded => "Loaded",
            ShipmentStatus::DepartedUk => "Departed UK",
            ShipmentStatus::ArrivedDestination => "Arrived at destination",
            ShipmentStatus::CollectedByCustomer => "Collected by customer",
            ShipmentStatus::OutForDelivery => "Out for delivery",
            ShipmentStatus::Delivered => "Delivered",
        }
    }
}

impl std::fmt::Display for ShipmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cargo side-record. The nested record present depends on the cargo type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CargoMeta {
    pub pickup_address: Option<String>,
    pub pickup_contact_phone: Option<String>,
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<CargoDimensions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<VehicleDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: Uuid,
    pub org_id: Uuid,
    pub name: String,
    pub phone: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Shipment {
    pub id: Uuid,
    pub org_id: Uuid,
    pub customer_id: Uuid,
    pub tracking_code: String,
    pub destination: String,
    pub service_type: ServiceType,
    pub current_status: ShipmentStatus,
    pub cargo_type: CargoType,
    pub cargo_meta: CargoMeta,
    pub last_event_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipmentEvent {
    pub id: Uuid,
    pub org_id: Uuid,
    pub shipment_id: Uuid,
    pub status: ShipmentStatus,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub created_by: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    PickupPhoto,
    PickupSignature,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub org_id: Uuid,
    pub shipment_id: Uuid,
    pub kind: AssetKind,
    pub path: String,
    pub created_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofOfDelivery {
    pub shipment_id: Uuid,
    pub org_id: Uuid,
    pub photo_path: String,
    pub receiver_name: String,
    pub delivered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MemberRole {
    Admin,
    Staff,
    Field,
    Agent,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub user_id: String,
    pub org_id: Uuid,
    pub role: MemberRole,
}

#[cfg(test)]
mod tests {
    use super::ShipmentStatus;

    #[test]
    fn statuses_parse_from_their_wire_names() {
        for status in ShipmentStatus::ORDERED {
            assert_eq!(ShipmentStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ShipmentStatus::parse("arrived_jamaica"), None);
    }

    #[test]
    fn only_delivered_is_terminal() {
        assert!(ShipmentStatus::Delivered.is_terminal());
        assert!(!ShipmentStatus::OutForDelivery.is_terminal());
    }
}
