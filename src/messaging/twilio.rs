use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::messaging::dispatch::{NotificationProvider, ProviderError, ProviderReceipt};
use crate::models::message::SendStatus;

const DEFAULT_API_BASE: &str = "https://api.twilio.com";

/// Normalises a stored phone number to strict E.164 (`+` and 7-15 digits).
///
/// Accepts `whatsapp:` prefixes and the `00` international prefix. Numbers
/// without an international prefix are rejected rather than guessed.
pub fn normalize_e164(input: &str) -> Option<String> {
    let compact: String = input
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '(' | ')'))
        .collect();

    let number = compact.strip_prefix("whatsapp:").unwrap_or(&compact);

    let digits = if let Some(rest) = number.strip_prefix('+') {
        rest
    } else if let Some(rest) = number.strip_prefix("00") {
        rest
    } else {
        return None;
    };

    let valid = (7..=15).contains(&digits.len())
        && digits.chars().all(|c| c.is_ascii_digit())
        && !digits.starts_with('0');

    valid.then(|| format!("+{digits}"))
}

#[derive(Debug, Clone)]
pub struct TwilioSettings {
    pub account_sid: String,
    pub auth_token: String,
    pub whatsapp_from: String,
    pub status_callback_url: Option<String>,
    pub api_base: String,
}

impl TwilioSettings {
    /// Present only when the account sid, auth token and sender are all set.
    pub fn from_parts(
        account_sid: Option<String>,
        auth_token: Option<String>,
        whatsapp_from: Option<String>,
    ) -> Option<Self> {
        let non_empty = |v: Option<String>| v.filter(|s| !s.trim().is_empty());
        Some(Self {
            account_sid: non_empty(account_sid)?,
            auth_token: non_empty(auth_token)?,
            whatsapp_from: non_empty(whatsapp_from)?,
            status_callback_url: None,
            api_base: DEFAULT_API_BASE.to_string(),
        })
    }

    /// Status callbacks are only requested when both the public app URL and
    /// the webhook secret are known.
    pub fn with_status_callback(mut self, app_url: Option<&str>, secret: Option<&str>) -> Self {
        self.status_callback_url = match (app_url, secret) {
            (Some(base), Some(secret)) if !base.is_empty() && !secret.is_empty() => {
                let endpoint = format!("{}/api/webhooks/twilio/status", base.trim_end_matches('/'));
                reqwest::Url::parse_with_params(&endpoint, &[("secret", secret)])
                    .ok()
                    .map(String::from)
            }
            _ => None,
        };
        self
    }
}

#[derive(Deserialize)]
struct MessageResource {
    sid: Option<String>,
    status: Option<String>,
    message: Option<String>,
}

/// WhatsApp sender over the Twilio Messages API.
pub struct TwilioWhatsApp {
    client: reqwest::Client,
    settings: TwilioSettings,
}

impl TwilioWhatsApp {
    pub fn new(settings: TwilioSettings) -> Self {
        Self {
            client: reqwest::Client::new(),
            settings,
        }
    }

    fn whatsapp_address(number: &str) -> String {
        if number.starts_with("whatsapp:") {
            number.to_string()
        } else {
            format!("whatsapp:{number}")
        }
    }
}

#[async_trait]
impl NotificationProvider for TwilioWhatsApp {
    fn name(&self) -> &'static str {
        "twilio_whatsapp"
    }

    async fn send(&self, to_e164: &str, body: &str) -> Result<ProviderReceipt, ProviderError> {
        let url = format!(
            "{}/2010-04-01/Accounts/{}/Messages.json",
            self.settings.api_base.trim_end_matches('/'),
            self.settings.account_sid
        );

        let mut form = vec![
            ("To", Self::whatsapp_address(to_e164)),
            ("From", Self::whatsapp_address(&self.settings.whatsapp_from)),
            ("Body", body.to_string()),
        ];
        if let Some(callback) = &self.settings.status_callback_url {
            form.push(("StatusCallback", callback.clone()));
        }

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.settings.account_sid, Some(&self.settings.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|err| ProviderError::Request(err.to_string()))?;

        let status = response.status();
        let resource: Option<MessageResource> = response.json().await.ok();

        if !status.is_success() {
            let message = resource
                .and_then(|r| r.message)
                .unwrap_or_else(|| format!("Twilio error ({})", status.as_u16()));
            return Err(ProviderError::Rejected(message));
        }

        let resource = resource
            .ok_or_else(|| ProviderError::Request("unreadable provider response".to_string()))?;
        let provider_message_id = resource
            .sid
            .ok_or_else(|| ProviderError::Request("provider response missing sid".to_string()))?;

        debug!(provider_message_id = %provider_message_id, "whatsapp message accepted");

        Ok(ProviderReceipt {
            provider_message_id,
            status: SendStatus::from_provider(resource.status.as_deref().unwrap_or("queued")),
        })
    }
}
