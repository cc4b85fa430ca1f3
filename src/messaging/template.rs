use std::collections::HashMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::models::shipment::ShipmentStatus;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([a-zA-Z0-9_]+)\s*\}\}").expect("valid placeholder regex")
});

/// Replaces every `{{token}}` with its mapped value, or nothing when unmapped.
///
/// Substituted values are not rescanned.
pub fn render_template(body: &str, vars: &HashMap<&str, String>) -> String {
    PLACEHOLDER
        .replace_all(body, |caps: &Captures<'_>| {
            vars.get(&caps[1]).cloned().unwrap_or_default()
        })
        .into_owned()
}

/// Values a status notification can reference. Each value is published
/// under both its current and legacy token names.
#[derive(Debug, Clone, Default)]
pub struct TemplateContext {
    pub customer_name: String,
    pub tracking_code: String,
    pub destination: String,
    pub status: String,
    pub note: String,
    pub tracking_url: String,
}

impl TemplateContext {
    pub fn vars(&self) -> HashMap<&'static str, String> {
        HashMap::from([
            ("customer_name", self.customer_name.clone()),
            ("name", self.customer_name.clone()),
            ("tracking_code", self.tracking_code.clone()),
            ("code", self.tracking_code.clone()),
            ("destination", self.destination.clone()),
            ("status", self.status.clone()),
            ("note", self.note.clone()),
            ("tracking_url", self.tracking_url.clone()),
        ])
    }

    pub fn render(&self, body: &str) -> String {
        render_template(body, &self.vars())
    }
}

pub const DEFAULT_TEMPLATES: &[(ShipmentStatus, &str)] = &[
    (
        ShipmentStatus::Received,
        "Hi {{name}}, we received your shipment ({{code}}) at our UK depot.",
    ),
    (
        ShipmentStatus::Collected,
        "Hi {{name}}, we collected your shipment ({{code}}) for {{destination}}.",
    ),
    (
        ShipmentStatus::Loaded,
        "Update: shipment {{code}} has been loaded and is preparing to depart.",
    ),
    (
        ShipmentStatus::DepartedUk,
        "Update: shipment {{code}} has departed the UK.",
    ),
    (
        ShipmentStatus::ArrivedDestination,
        "Update: shipment {{code}} has arrived in {{destination}}.",
    ),
    (
        ShipmentStatus::OutForDelivery,
        "Update: shipment {{code}} is out for delivery.",
    ),
    (
        ShipmentStatus::Delivered,
        "Delivered: shipment {{code}} has been delivered. Thank you.",
    ),
];
