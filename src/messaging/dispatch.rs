use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::messaging::template::TemplateContext;
use crate::messaging::twilio::normalize_e164;
use crate::models::message::{MessageLog, MessageLogUpdate, SendStatus};
use crate::models::shipment::{Shipment, ShipmentStatus};
use crate::observability::metrics::Metrics;
use crate::store::{Datastore, StoreError};

const LOG_ONLY_PROVIDER: &str = "log";
const INVALID_PHONE_NOTE: &str = "Invalid phone number for WhatsApp (expected E.164)";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),

    #[error("{0}")]
    Rejected(String),
}

#[derive(Debug, Clone)]
pub struct ProviderReceipt {
    pub provider_message_id: String,
    pub status: SendStatus,
}

/// Outbound messaging channel.
#[async_trait]
pub trait NotificationProvider: Send + Sync {
    fn name(&self) -> &'static str;

    async fn send(&self, to_e164: &str, body: &str) -> Result<ProviderReceipt, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct Notification {
    pub org_id: Uuid,
    pub shipment_id: Uuid,
    pub status: ShipmentStatus,
    pub template_id: Option<Uuid>,
    pub to_phone: String,
    pub body: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Recorded without sending: no provider, or the phone is unusable.
    Logged,
    Sent { provider_message_id: String },
    Failed(String),
    /// A delivered notification already exists for this shipment.
    AlreadyNotified,
}

/// Logs every notification and sends it through the provider when one is
/// configured and the phone number is usable.
pub struct NotificationDispatcher {
    store: Arc<dyn Datastore>,
    provider: Option<Arc<dyn NotificationProvider>>,
    metrics: Metrics,
    app_url: Option<String>,
}

impl NotificationDispatcher {
    pub fn new(
        store: Arc<dyn Datastore>,
        provider: Option<Arc<dyn NotificationProvider>>,
        metrics: Metrics,
        app_url: Option<String>,
    ) -> Self {
        Self {
            store,
            provider,
            metrics,
            app_url: app_url.map(|url| url.trim_end_matches('/').to_string()),
        }
    }

    pub async fn dispatch(&self, notification: Notification) -> Result<DispatchOutcome, StoreError> {
        let e164 = normalize_e164(&notification.to_phone);
        let sender = match (&self.provider, &e164) {
            (Some(provider), Some(to)) => Some((provider.clone(), to.clone())),
            _ => None,
        };

        let error = match (&self.provider, &e164) {
            (Some(_), None) => Some(INVALID_PHONE_NOTE.to_string()),
            _ => None,
        };

        let log = MessageLog {
            id: Uuid::new_v4(),
            org_id: notification.org_id,
            shipment_id: notification.shipment_id,
            template_id: notification.template_id,
            to_phone: e164.unwrap_or_else(|| notification.to_phone.clone()),
            provider: sender
                .as_ref()
                .map_or(LOG_ONLY_PROVIDER, |(provider, _)| provider.name())
                .to_string(),
            provider_message_id: None,
            send_status: if sender.is_some() {
                SendStatus::Queued
            } else {
                SendStatus::Logged
            },
            body: notification.body.clone(),
            status: notification.status,
            error,
            sent_at: Utc::now(),
        };

        let log = match self.store.insert_message_log(log).await {
            Ok(log) => log,
            Err(err) if err.is_unique_violation() => {
                debug!(
                    shipment_id = %notification.shipment_id,
                    status = %notification.status,
                    "notification already recorded"
                );
                return Ok(DispatchOutcome::AlreadyNotified);
            }
            Err(err) => return Err(err),
        };

        let Some((provider, to)) = sender else {
            self.record(&SendStatus::Logged);
            return Ok(DispatchOutcome::Logged);
        };

        match provider.send(&to, &notification.body).await {
            Ok(receipt) => {
                self.store
                    .update_message_log(
                        log.id,
                        MessageLogUpdate {
                            provider_message_id: Some(receipt.provider_message_id.clone()),
                            send_status: Some(receipt.status.clone()),
                            error: Some(None),
                            sent_at: Some(Utc::now()),
                        },
                    )
                    .await?;
                self.record(&receipt.status);
                info!(
                    shipment_id = %notification.shipment_id,
                    provider_message_id = %receipt.provider_message_id,
                    "notification sent"
                );
                Ok(DispatchOutcome::Sent {
                    provider_message_id: receipt.provider_message_id,
                })
            }
            Err(err) => {
                let message = err.to_string();
                self.store
                    .update_message_log(
                        log.id,
                        MessageLogUpdate {
                            send_status: Some(SendStatus::Failed),
                            error: Some(Some(message.clone())),
                            ..MessageLogUpdate::default()
                        },
                    )
                    .await?;
                self.record(&SendStatus::Failed);
                warn!(shipment_id = %notification.shipment_id, error = %message, "notification send failed");
                Ok(DispatchOutcome::Failed(message))
            }
        }
    }

    /// Renders the organization's enabled template for `status` and
    /// dispatches it. Never fails the caller: missing templates are skipped
    /// and errors are logged.
    pub async fn notify_best_effort(
        &self,
        shipment: &Shipment,
        status: ShipmentStatus,
        note: Option<&str>,
    ) -> Option<DispatchOutcome> {
        match self.notify(shipment, status, note).await {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(
                    shipment_id = %shipment.id,
                    status = %status,
                    error = %err,
                    "notification skipped after datastore error"
                );
                None
            }
        }
    }

    async fn notify(
        &self,
        shipment: &Shipment,
        status: ShipmentStatus,
        note: Option<&str>,
    ) -> Result<Option<DispatchOutcome>, StoreError> {
        let Some(template) = self
            .store
            .find_enabled_template(shipment.org_id, status)
            .await?
        else {
            debug!(shipment_id = %shipment.id, status = %status, "no enabled template");
            return Ok(None);
        };

        let Some(customer) = self
            .store
            .get_customer(shipment.org_id, shipment.customer_id)
            .await?
        else {
            return Err(StoreError::NotFound(format!("customer {}", shipment.customer_id)));
        };

        let context = TemplateContext {
            customer_name: customer.name,
            tracking_code: shipment.tracking_code.clone(),
            destination: shipment.destination.clone(),
            status: status.as_str().to_string(),
            note: note.unwrap_or_default().to_string(),
            tracking_url: self
                .app_url
                .as_ref()
                .map(|base| format!("{base}/t/{}", shipment.tracking_code))
                .unwrap_or_default(),
        };

        let outcome = self
            .dispatch(Notification {
                org_id: shipment.org_id,
                shipment_id: shipment.id,
                status,
                template_id: Some(template.id),
                to_phone: customer.phone,
                body: context.render(&template.body),
            })
            .await?;

        Ok(Some(outcome))
    }

    fn record(&self, status: &SendStatus) {
        self.metrics
            .notifications_total
            .with_label_values(&[status.as_str()])
            .inc();
    }
}
