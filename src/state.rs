use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::messaging::dispatch::{NotificationDispatcher, NotificationProvider};
use crate::observability::metrics::Metrics;
use crate::store::blob::BlobStore;
use crate::store::Datastore;

pub struct AppState {
    pub store: Arc<dyn Datastore>,
    pub blobs: Arc<dyn BlobStore>,
    pub dispatcher: NotificationDispatcher,
    pub metrics: Metrics,
    pub tracking_code_prefix: String,
    pub signed_url_ttl: Duration,
    pub max_upload_bytes: usize,
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(
        config: &Config,
        store: Arc<dyn Datastore>,
        blobs: Arc<dyn BlobStore>,
        provider: Option<Arc<dyn NotificationProvider>>,
    ) -> Self {
        let metrics = Metrics::new();
        let dispatcher =
            NotificationDispatcher::new(store.clone(), provider, metrics.clone(), config.app_url.clone());

        Self {
            store,
            blobs,
            dispatcher,
            metrics,
            tracking_code_prefix: config.tracking_code_prefix.clone(),
            signed_url_ttl: config.signed_url_ttl,
            max_upload_bytes: config.max_upload_bytes,
            webhook_secret: config.twilio_webhook_secret.clone(),
        }
    }
}
