use prometheus::{Encoder, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub intake_requests_total: IntCounterVec,
    pub intake_latency_seconds: HistogramVec,
    pub asset_uploads_total: IntCounterVec,
    pub notifications_total: IntCounterVec,
    pub status_updates_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let intake_requests_total = IntCounterVec::new(
            Opts::new("intake_requests_total", "Field intake submissions by outcome"),
            &["outcome"],
        )
        .expect("valid intake_requests_total metric");

        let intake_latency_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "intake_latency_seconds",
                "Latency of field intake processing in seconds",
            ),
            &["outcome"],
        )
        .expect("valid intake_latency_seconds metric");

        let asset_uploads_total = IntCounterVec::new(
            Opts::new("asset_uploads_total", "Pickup and POD image uploads by outcome"),
            &["outcome"],
        )
        .expect("valid asset_uploads_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Customer notifications by send status"),
            &["send_status"],
        )
        .expect("valid notifications_total metric");

        let status_updates_total = IntCounterVec::new(
            Opts::new("status_updates_total", "Shipment status changes by outcome"),
            &["outcome"],
        )
        .expect("valid status_updates_total metric");

        registry
            .register(Box::new(intake_requests_total.clone()))
            .expect("register intake_requests_total");
        registry
            .register(Box::new(intake_latency_seconds.clone()))
            .expect("register intake_latency_seconds");
        registry
            .register(Box::new(asset_uploads_total.clone()))
            .expect("register asset_uploads_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(status_updates_total.clone()))
            .expect("register status_updates_total");

        Self {
            registry,
            intake_requests_total,
            intake_latency_seconds,
            asset_uploads_total,
            notifications_total,
            status_updates_total,
        }
    }

    pub fn encode(&self) -> Result<String, String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();

        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|err| format!("failed to encode metrics: {err}"))?;

        String::from_utf8(buffer).map_err(|err| format!("metrics are not valid utf8: {err}"))
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
