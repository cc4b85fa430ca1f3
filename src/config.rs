use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;
use crate::messaging::twilio::TwilioSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub max_upload_bytes: usize,
    pub tracking_code_prefix: String,
    pub blob_root: PathBuf,
    pub blob_public_base_url: String,
    pub signed_url_ttl: Duration,
    pub twilio: Option<TwilioSettings>,
    pub twilio_webhook_secret: Option<String>,
    pub app_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let twilio_webhook_secret = optional("TWILIO_WEBHOOK_SECRET");
        let app_url = optional("APP_URL");
        let twilio = TwilioSettings::from_parts(
            optional("TWILIO_ACCOUNT_SID"),
            optional("TWILIO_AUTH_TOKEN"),
            optional("TWILIO_WHATSAPP_FROM"),
        )
        .map(|settings| {
            settings.with_status_callback(app_url.as_deref(), twilio_webhook_secret.as_deref())
        });

        Ok(Self {
            http_port: parse_or_default(&lookup, "HTTP_PORT", 3000)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format: match lookup("LOG_FORMAT").as_deref() {
                Some("json") => LogFormat::Json,
                _ => LogFormat::Compact,
            },
            max_upload_bytes: parse_or_default(&lookup, "MAX_UPLOAD_BYTES", 25 * 1024 * 1024)?,
            tracking_code_prefix: lookup("TRACKING_CODE_PREFIX").unwrap_or_else(|| "SHP".to_string()),
            blob_root: lookup("BLOB_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/blobs")),
            blob_public_base_url: lookup("BLOB_PUBLIC_BASE_URL")
                .unwrap_or_else(|| "http://localhost:3000/blobs".to_string()),
            signed_url_ttl: Duration::from_secs(parse_or_default(&lookup, "SIGNED_URL_TTL_SECS", 300)?),
            twilio,
            twilio_webhook_secret,
            app_url,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            max_upload_bytes: 25 * 1024 * 1024,
            tracking_code_prefix: "SHP".to_string(),
            blob_root: PathBuf::from("./data/blobs"),
            blob_public_base_url: "http://localhost:3000/blobs".to_string(),
            signed_url_ttl: Duration::from_secs(300),
            twilio: None,
            twilio_webhook_secret: None,
            app_url: None,
        }
    }
}

/// Settings for the on-device outbox and its sync engine.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub intake_endpoint: String,
    pub outbox_path: PathBuf,
    pub auto_sync_debounce: Duration,
    pub reload_debounce: Duration,
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        Ok(Self {
            intake_endpoint: lookup("INTAKE_ENDPOINT")
                .unwrap_or_else(|| "http://localhost:3000/api/field/intake".to_string()),
            outbox_path: lookup("OUTBOX_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./data/outbox.db")),
            auto_sync_debounce: Duration::from_millis(parse_or_default(
                &lookup,
                "AUTO_SYNC_DEBOUNCE_MS",
                400,
            )?),
            reload_debounce: Duration::from_millis(parse_or_default(
                &lookup,
                "RELOAD_DEBOUNCE_MS",
                150,
            )?),
        })
    }
}

fn parse_or_default<T, F>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}
