use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::shipment::ShipmentStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageTemplate {
    pub id: Uuid,
    pub org_id: Uuid,
    pub status: ShipmentStatus,
    pub body: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(into = "String", from = "String")]
pub enum SendStatus {
    Logged,
    Queued,
    Sent,
    Delivered,
    Undelivered,
    Failed,
    /// Any other status string reported by the provider.
    Provider(String),
}

impl From<String> for SendStatus {
    fn from(raw: String) -> Self {
        SendStatus::from_provider(&raw)
    }
}

impl From<SendStatus> for String {
    fn from(status: SendStatus) -> Self {
        status.as_str().to_string()
    }
}

impl SendStatus {
    pub fn from_provider(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "logged" => SendStatus::Logged,
            "queued" | "accepted" => SendStatus::Queued,
            "sent" => SendStatus::Sent,
            "delivered" | "read" => SendStatus::Delivered,
            "undelivered" => SendStatus::Undelivered,
            "failed" => SendStatus::Failed,
            other => SendStatus::Provider(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SendStatus::Logged => "logged",
            SendStatus::Queued => "queued",
            SendStatus::Sent => "sent",
            SendStatus::Delivered => "delivered",
            SendStatus::Undelivered => "undelivered",
            SendStatus::Failed => "failed",
            SendStatus::Provider(raw) => raw,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, SendStatus::Failed | SendStatus::Undelivered)
    }
}

/// Durable record of every customer notification, sent or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageLog {
    pub id: Uuid,
    pub org_id: Uuid,
    pub shipment_id: Uuid,
    pub template_id: Option<Uuid>,
    pub to_phone: String,
    pub provider: String,
    pub provider_message_id: Option<String>,
    pub send_status: SendStatus,
    pub body: String,
    pub status: ShipmentStatus,
    pub error: Option<String>,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct MessageLogUpdate {
    pub provider_message_id: Option<String>,
    pub send_status: Option<SendStatus>,
    /// `Some(None)` clears the error.
    pub error: Option<Option<String>>,
    pub sent_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::SendStatus;

    #[test]
    fn provider_statuses_map_onto_known_variants() {
        assert_eq!(SendStatus::from_provider("Delivered"), SendStatus::Delivered);
        assert_eq!(SendStatus::from_provider("undelivered"), SendStatus::Undelivered);
        assert!(SendStatus::from_provider("failed").is_failure());
        assert_eq!(
            SendStatus::from_provider("sending"),
            SendStatus::Provider("sending".to_string())
        );
    }
}
