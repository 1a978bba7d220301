use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub delivery_transitions_total: IntCounterVec,
    pub assignments_total: IntCounterVec,
    pub reassignments_total: IntCounterVec,
    pub route_events_total: IntCounterVec,
    pub geo_fallbacks_total: IntCounterVec,
    pub operation_latency_seconds: HistogramVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let delivery_transitions_total = IntCounterVec::new(
            Opts::new(
                "delivery_transitions_total",
                "Committed delivery state transitions by event",
            ),
            &["transition"],
        )
        .expect("valid delivery_transitions_total metric");

        let assignments_total = IntCounterVec::new(
            Opts::new("assignments_total", "Assignment requests by outcome"),
            &["outcome"],
        )
        .expect("valid assignments_total metric");

        let reassignments_total = IntCounterVec::new(
            Opts::new(
                "reassignments_total",
                "Cancel-and-reassign runs by outcome",
            ),
            &["outcome"],
        )
        .expect("valid reassignments_total metric");

        let route_events_total = IntCounterVec::new(
            Opts::new("route_events_total", "Route lifecycle events"),
            &["event"],
        )
        .expect("valid route_events_total metric");

        let geo_fallbacks_total = IntCounterVec::new(
            Opts::new(
                "geo_fallbacks_total",
                "Mapping provider calls that failed and were degraded",
            ),
            &["operation"],
        )
        .expect("valid geo_fallbacks_total metric");

        let operation_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "operation_latency_seconds",
                "Latency of dispatch operations in seconds",
            ),
            &["operation"],
        )
        .expect("valid operation_latency_seconds metric");

        registry
            .register(Box::new(delivery_transitions_total.clone()))
            .expect("register delivery_transitions_total");
        registry
            .register(Box::new(assignments_total.clone()))
            .expect("register assignments_total");
        registry
            .register(Box::new(reassignments_total.clone()))
            .expect("register reassignments_total");
        registry
            .register(Box::new(route_events_total.clone()))
            .expect("register route_events_total");
        registry
            .register(Box::new(geo_fallbacks_total.clone()))
            .expect("register geo_fallbacks_total");
        registry
            .register(Box::new(operation_latency_seconds.clone()))
            .expect("register operation_latency_seconds");

        Self {
            registry,
            delivery_transitions_total,
            assignments_total,
            reassignments_total,
            route_events_total,
            geo_fallbacks_total,
            operation_latency_seconds,
        }
    }

    pub fn observe(&self, operation: &str, started: std::time::Instant) {
        self.operation_latency_seconds
            .with_label_values(&[operation])
            .observe(started.elapsed().as_secs_f64());
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
