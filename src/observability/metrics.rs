use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub parcels_submitted_total: IntCounter,
    pub lifecycle_transitions_total: IntCounterVec,
    pub location_fixes_total: IntCounterVec,
    pub parcel_location_updates_total: IntCounterVec,
    pub notifications_total: IntCounterVec,
    pub notifications_in_queue: IntGauge,
    pub geocoder_lookups_total: IntCounterVec,
    pub ingest_latency_seconds: Histogram,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let parcels_submitted_total =
            IntCounter::new("parcels_submitted_total", "Parcels accepted for approval")
                .expect("valid parcels_submitted_total metric");

        let lifecycle_transitions_total = IntCounterVec::new(
            Opts::new(
                "lifecycle_transitions_total",
                "Committed parcel lifecycle transitions",
            ),
            &["transition"],
        )
        .expect("valid lifecycle_transitions_total metric");

        let location_fixes_total = IntCounterVec::new(
            Opts::new("location_fixes_total", "Driver GPS fixes by outcome"),
            &["outcome"],
        )
        .expect("valid location_fixes_total metric");

        let parcel_location_updates_total = IntCounterVec::new(
            Opts::new(
                "parcel_location_updates_total",
                "Per-parcel fan-out writes by outcome",
            ),
            &["outcome"],
        )
        .expect("valid parcel_location_updates_total metric");

        let notifications_total = IntCounterVec::new(
            Opts::new("notifications_total", "Notification dispatch by outcome"),
            &["outcome"],
        )
        .expect("valid notifications_total metric");

        let notifications_in_queue = IntGauge::new(
            "notifications_in_queue",
            "Notifications waiting for the dispatcher",
        )
        .expect("valid notifications_in_queue metric");

        let geocoder_lookups_total = IntCounterVec::new(
            Opts::new("geocoder_lookups_total", "Reverse geocoding by outcome"),
            &["outcome"],
        )
        .expect("valid geocoder_lookups_total metric");

        let ingest_latency_seconds = Histogram::with_opts(HistogramOpts::new(
            "ingest_latency_seconds",
            "Latency of GPS fix ingestion in seconds",
        ))
        .expect("valid ingest_latency_seconds metric");

        registry
            .register(Box::new(parcels_submitted_total.clone()))
            .expect("register parcels_submitted_total");
        registry
            .register(Box::new(lifecycle_transitions_total.clone()))
            .expect("register lifecycle_transitions_total");
        registry
            .register(Box::new(location_fixes_total.clone()))
            .expect("register location_fixes_total");
        registry
            .register(Box::new(parcel_location_updates_total.clone()))
            .expect("register parcel_location_updates_total");
        registry
            .register(Box::new(notifications_total.clone()))
            .expect("register notifications_total");
        registry
            .register(Box::new(notifications_in_queue.clone()))
            .expect("register notifications_in_queue");
        registry
            .register(Box::new(geocoder_lookups_total.clone()))
            .expect("register geocoder_lookups_total");
        registry
            .register(Box::new(ingest_latency_seconds.clone()))
            .expect("register ingest_latency_seconds");

        Self {
            registry,
            parcels_submitted_total,
            lifecycle_transitions_total,
            location_fixes_total,
            parcel_location_updates_total,
            notifications_total,
            notifications_in_queue,
            geocoder_lookups_total,
            ingest_latency_seconds,
        }
    }

    pub fn transition(&self, name: &str) {
        self.lifecycle_transitions_total
            .with_label_values(&[name])
            .inc();
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
