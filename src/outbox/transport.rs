use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use thiserror::Error;

use crate::auth::USER_ID_HEADER;
use crate::models::intake::IntakeAck;
use crate::models::outbox::{Attachment, OutboxItem};

#[derive(Debug, Error)]
pub enum TransportError {
    /// The server answered with a non-success status.
    #[error("{message}")]
    Rejected { status: u16, message: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("could not encode submission: {0}")]
    Encode(String),

    #[error("invalid server response: {0}")]
    InvalidResponse(String),
}

/// Delivers one queued intake to the ingestion endpoint.
#[async_trait]
pub trait IntakeTransport: Send + Sync {
    async fn submit(&self, item: &OutboxItem) -> Result<IntakeAck, TransportError>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Multipart submission over HTTP: `clientEventId`, `payload` (JSON text),
/// repeated `photos` parts and an optional `signature` part.
pub struct HttpIntakeTransport {
    client: reqwest::Client,
    endpoint: String,
    user_id: String,
}

impl HttpIntakeTransport {
    pub fn new(endpoint: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            user_id: user_id.into(),
        }
    }

    fn part(file: &Attachment) -> Result<Part, TransportError> {
        Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)
            .map_err(|err| TransportError::Encode(err.to_string()))
    }

    fn form(item: &OutboxItem) -> Result<Form, TransportError> {
        let payload = serde_json::to_string(&item.payload)
            .map_err(|err| TransportError::Encode(err.to_string()))?;

        let mut form = Form::new()
            .text("clientEventId", item.id.to_string())
            .text("payload", payload);
        for photo in &item.photos {
            form = form.part("photos", Self::part(photo)?);
        }
        if let Some(signature) = &item.signature {
            form = form.part("signature", Self::part(signature)?);
        }
        Ok(form)
    }
}

#[async_trait]
impl IntakeTransport for HttpIntakeTransport {
    async fn submit(&self, item: &OutboxItem) -> Result<IntakeAck, TransportError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header(USER_ID_HEADER, &self.user_id)
            .multipart(Self::form(item)?)
            .send()
            .await
            .map_err(|err| TransportError::Network(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .json::<ErrorBody>()
                .await
                .ok()
                .and_then(|body| body.error)
                .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));
            return Err(TransportError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<IntakeAck>()
            .await
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))
    }
}
