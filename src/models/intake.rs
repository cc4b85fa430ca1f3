use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    #[default]
    Depot,
    DoorToDoor,
}

impl ServiceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Depot => "depot",
            ServiceType::DoorToDoor => "door_to_door",
        }
    }

    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "door_to_door" => ServiceType::DoorToDoor,
            _ => ServiceType::Depot,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CargoType {
    #[default]
    General,
    Barrel,
    Box,
    Crate,
    Pallet,
    Vehicle,
    Machinery,
    Mixed,
    Other,
}

impl CargoType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CargoType::General => "general",
            CargoType::Barrel => "barrel",
            CargoType::Box => "box",
            CargoType::Crate => "crate",
            CargoType::Pallet => "pallet",
            CargoType::Vehicle => "vehicle",
            CargoType::Machinery => "machinery",
            CargoType::Mixed => "mixed",
            CargoType::Other => "other",
        }
    }

    /// Missing or blank input is `General`; anything unrecognised is `Other`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "general" => CargoType::General,
            "barrel" => CargoType::Barrel,
            "box" => CargoType::Box,
            "crate" => CargoType::Crate,
            "pallet" => CargoType::Pallet,
            "vehicle" => CargoType::Vehicle,
            "machinery" => CargoType::Machinery,
            "mixed" => CargoType::Mixed,
            _ => CargoType::Other,
        }
    }

    pub fn counts_units(&self) -> bool {
        matches!(self, CargoType::Barrel | CargoType::Box)
    }

    pub fn has_dimensions(&self) -> bool {
        matches!(
            self,
            CargoType::Crate | CargoType::Pallet | CargoType::Machinery
        )
    }

    pub fn is_vehicle(&self) -> bool {
        matches!(self, CargoType::Vehicle)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct CargoDimensions {
    pub weight_kg: Option<f64>,
    pub length_cm: Option<f64>,
    pub width_cm: Option<f64>,
    pub height_cm: Option<f64>,
    pub forklift_required: Option<bool>,
    pub handling_notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct VehicleDetails {
    pub make: Option<String>,
    pub model: Option<String>,
    pub year: Option<String>,
    pub vin: Option<String>,
    pub reg: Option<String>,
    pub keys_received: Option<bool>,
    pub handling_notes: Option<String>,
}

/// Canonical field-intake record, as produced by
/// [`normalize_intake`](crate::engine::normalize::normalize_intake).
///
/// Only the sub-record matching `cargo_type` is ever populated.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntakePayload {
    pub customer_name: String,
    pub phone: String,
    pub destination: String,
    pub service_type: ServiceType,
    pub cargo_type: CargoType,
    pub pickup_address: Option<String>,
    pub pickup_contact_phone: Option<String>,
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<CargoDimensions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vehicle: Option<VehicleDetails>,
    #[serde(rename = "occurredAtISO")]
    pub occurred_at_iso: Option<DateTime<Utc>>,
}

/// Response body of the ingestion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IntakeAck {
    pub ok: bool,
    pub shipment_id: Uuid,
    pub tracking_code: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub duplicate: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_error: Option<String>,
}
