use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::models::intake::IntakePayload;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutboxKind {
    #[default]
    IntakeCreate,
}

impl OutboxKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxKind::IntakeCreate => "intake_create",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "intake_create" => Some(OutboxKind::IntakeCreate),
            _ => None,
        }
    }
}

/// Lifecycle of a queued submission:
///
/// ```text
/// pending ──► syncing ──► synced
///                │  ▲
///                ▼  │
///              failed
/// ```
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OutboxStatus {
    Pending,
    Syncing,
    Synced,
    Failed,
}

impl OutboxStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutboxStatus::Pending => "pending",
            OutboxStatus::Syncing => "syncing",
            OutboxStatus::Synced => "synced",
            OutboxStatus::Failed => "failed",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(OutboxStatus::Pending),
            "syncing" => Some(OutboxStatus::Syncing),
            "synced" => Some(OutboxStatus::Synced),
            "failed" => Some(OutboxStatus::Failed),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: OutboxStatus) -> bool {
        matches!(
            (self, next),
            (OutboxStatus::Pending, OutboxStatus::Syncing)
                | (OutboxStatus::Failed, OutboxStatus::Syncing)
                | (OutboxStatus::Syncing, OutboxStatus::Synced)
                | (OutboxStatus::Syncing, OutboxStatus::Failed)
        )
    }
}

/// A status change the outbox lifecycle does not allow.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("outbox entry cannot move from {} to {}", .from.as_str(), .to.as_str())]
pub struct IllegalTransition {
    pub from: OutboxStatus,
    pub to: OutboxStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl Attachment {
    pub fn new(file_name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            content_type: content_type.into(),
            bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerResult {
    pub shipment_id: Uuid,
    pub tracking_code: String,
}

/// A field intake waiting on the device for server confirmation.
///
/// `id` is the client event id and doubles as the server-side idempotency key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboxItem {
    pub id: Uuid,
    pub kind: OutboxKind,
    pub status: OutboxStatus,
    pub created_at: DateTime<Utc>,
    pub payload: IntakePayload,
    pub photos: Vec<Attachment>,
    pub signature: Option<Attachment>,
    pub server: Option<ServerResult>,
    pub error: Option<String>,
}

impl OutboxItem {
    /// Queues a new submission. The capture time is stamped into the payload
    /// unless the form already carried one, so a late sync still records
    /// when the cargo was actually collected.
    pub fn pending(mut payload: IntakePayload, photos: Vec<Attachment>, signature: Option<Attachment>) -> Self {
        let created_at = Utc::now().trunc_subsecs(6);
        payload.occurred_at_iso.get_or_insert(created_at);

        Self {
            id: Uuid::new_v4(),
            kind: OutboxKind::IntakeCreate,
            status: OutboxStatus::Pending,
            created_at,
            payload,
            photos,
            signature,
            server: None,
            error: None,
        }
    }

    /// Merges `patch` into the entry. A status change must follow the
    /// lifecycle; on rejection the entry is left untouched.
    pub fn apply(&mut self, patch: OutboxPatch) -> Result<(), IllegalTransition> {
        if let Some(status) = patch.status {
            if !self.status.can_transition_to(status) {
                return Err(IllegalTransition {
                    from: self.status,
                    to: status,
                });
            }
            self.status = status;
        }
        if let Some(server) = patch.server {
            self.server = server;
        }
        if let Some(error) = patch.error {
            self.error = error;
        }
        Ok(())
    }
}

/// Partial update merged into an existing [`OutboxItem`].
#[derive(Debug, Clone, Default)]
pub struct OutboxPatch {
    pub status: Option<OutboxStatus>,
    pub server: Option<Option<ServerResult>>,
    pub error: Option<Option<String>>,
}

impl OutboxPatch {
    pub fn syncing() -> Self {
        Self {
            status: Some(OutboxStatus::Syncing),
            error: Some(None),
            ..Self::default()
        }
    }

    pub fn synced(server: ServerResult, warning: Option<String>) -> Self {
        Self {
            status: Some(OutboxStatus::Synced),
            server: Some(Some(server)),
            error: Some(warning),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(OutboxStatus::Failed),
            error: Some(Some(message.into())),
            ..Self::default()
        }
    }
}
