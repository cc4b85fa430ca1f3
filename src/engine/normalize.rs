//! Turns loosely-typed intake form state into a canonical [`IntakePayload`].
//!
//! The same function runs on the device before an intake is queued and on the
//! server when a queued payload arrives, so payloads written by older clients
//! (flat `vehicleMake`, `keysReceived`, `weightKg`, ...) still resolve.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::models::intake::{
    CargoDimensions, CargoType, IntakePayload, ServiceType, VehicleDetails,
};

/// Candidate source keys for each canonical field, highest priority first.
///
/// Dotted candidates address the nested records the current client writes;
/// the remaining names are the flat keys earlier clients queued. The first
/// candidate holding a non-null value wins.
pub const FIELD_ALIASES: &[(&str, &[&str])] = &[
    ("customerName", &["customerName", "customer_name"]),
    ("phone", &["phone"]),
    ("destination", &["destination"]),
    ("serviceType", &["serviceType", "service_type"]),
    ("cargoType", &["cargoType", "cargo_type"]),
    ("pickupAddress", &["pickupAddress", "pickup_address"]),
    ("pickupContactPhone", &["pickupContactPhone", "pickup_contact_phone"]),
    ("notes", &["notes"]),
    ("quantity", &["quantity"]),
    ("occurredAtISO", &["occurredAtISO", "occurredAt", "occurred_at"]),
    ("dimensions.weightKg", &["dimensions.weightKg", "weightKg", "weight_kg"]),
    ("dimensions.lengthCm", &["dimensions.lengthCm", "lengthCm", "length_cm"]),
    ("dimensions.widthCm", &["dimensions.widthCm", "widthCm", "width_cm"]),
    ("dimensions.heightCm", &["dimensions.heightCm", "heightCm", "height_cm"]),
    (
        "dimensions.forkliftRequired",
        &["dimensions.forkliftRequired", "forkliftRequired", "forklift_required"],
    ),
    (
        "dimensions.handlingNotes",
        &["dimensions.handlingNotes", "handlingNotes", "handling_notes"],
    ),
    ("vehicle.make", &["vehicle.make", "vehicleMake", "vehicle_make"]),
    ("vehicle.model", &["vehicle.model", "vehicleModel", "vehicle_model"]),
    ("vehicle.year", &["vehicle.year", "vehicleYear", "vehicle_year"]),
    ("vehicle.vin", &["vehicle.vin", "vehicleVin", "vehicle_vin"]),
    ("vehicle.reg", &["vehicle.reg", "vehicleReg", "vehicle_reg"]),
    (
        "vehicle.keysReceived",
        &[
            "vehicle.keysReceived",
            "keysReceived",
            "vehicleKeysReceived",
            "keys_received",
        ],
    ),
    (
        "vehicle.handlingNotes",
        &["vehicle.handlingNotes", "handlingNotes", "handling_notes"],
    ),
];

pub fn normalize_intake(raw: &Value) -> IntakePayload {
    let cargo_type = CargoType::parse(&text(field(raw, "cargoType")));

    let quantity = if cargo_type.counts_units() {
        count(field(raw, "quantity"))
    } else {
        None
    };

    let dimensions = cargo_type.has_dimensions().then(|| CargoDimensions {
        weight_kg: number(field(raw, "dimensions.weightKg")),
        length_cm: number(field(raw, "dimensions.lengthCm")),
        width_cm: number(field(raw, "dimensions.widthCm")),
        height_cm: number(field(raw, "dimensions.heightCm")),
        forklift_required: flag(field(raw, "dimensions.forkliftRequired")),
        handling_notes: opt_text(field(raw, "dimensions.handlingNotes")),
    });

    let vehicle = cargo_type.is_vehicle().then(|| VehicleDetails {
        make: opt_text(field(raw, "vehicle.make")),
        model: opt_text(field(raw, "vehicle.model")),
        year: opt_text(field(raw, "vehicle.year")),
        vin: opt_text(field(raw, "vehicle.vin")),
        reg: opt_text(field(raw, "vehicle.reg")),
        keys_received: flag(field(raw, "vehicle.keysReceived")),
        handling_notes: opt_text(field(raw, "vehicle.handlingNotes")),
    });

    IntakePayload {
        customer_name: text(field(raw, "customerName")),
        phone: text(field(raw, "phone")),
        destination: text(field(raw, "destination")),
        service_type: ServiceType::parse(&text(field(raw, "serviceType"))),
        cargo_type,
        pickup_address: opt_text(field(raw, "pickupAddress")),
        pickup_contact_phone: opt_text(field(raw, "pickupContactPhone")),
        notes: opt_text(field(raw, "notes")),
        quantity,
        dimensions,
        vehicle,
        occurred_at_iso: timestamp(field(raw, "occurredAtISO")),
    }
}

fn field<'a>(raw: &'a Value, canonical: &str) -> Option<&'a Value> {
    let candidates = FIELD_ALIASES
        .iter()
        .find(|(name, _)| *name == canonical)
        .map(|(_, candidates)| *candidates)
        .unwrap_or_default();

    candidates
        .iter()
        .find_map(|path| resolve(raw, path).filter(|value| !value.is_null()))
}

fn resolve<'a>(raw: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(raw, |value, key| value.get(key))
}

fn text(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        Some(Value::Bool(b)) => b.to_string(),
        _ => String::new(),
    }
}

fn opt_text(value: Option<&Value>) -> Option<String> {
    let s = text(value);
    if s.is_empty() { None } else { Some(s) }
}

fn number(value: Option<&Value>) -> Option<f64> {
    let n = match value? {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn count(value: Option<&Value>) -> Option<u32> {
    let n = number(value)?;
    if n < 0.0 || n.fract() != 0.0 || n > f64::from(u32::MAX) {
        return None;
    }
    Some(n as u32)
}

fn flag(value: Option<&Value>) -> Option<bool> {
    match value? {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|n| n != 0.0),
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "" => None,
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    match value? {
        Value::String(s) => DateTime::parse_from_rfc3339(s.trim())
            .ok()
            .map(|at| at.with_timezone(&Utc)),
        _ => None,
    }
}
