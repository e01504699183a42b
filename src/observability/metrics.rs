use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub opportunities_created_total: IntCounter,
    pub opportunities_expired_total: IntCounter,
    pub acceptances_total: IntCounterVec,
    pub confirmations_total: IntCounterVec,
    pub payment_releases_total: IntCounterVec,
    pub assignment_queue_depth: IntGauge,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let opportunities_created_total = IntCounter::new(
            "opportunities_created_total",
            "Delivery opportunities offered to couriers",
        )
        .expect("valid opportunities_created_total metric");

        let opportunities_expired_total = IntCounter::new(
            "opportunities_expired_total",
            "Opportunities that reached their TTL unaccepted",
        )
        .expect("valid opportunities_expired_total metric");

        let acceptances_total = IntCounterVec::new(
            Opts::new("acceptances_total", "Accept attempts by outcome"),
            &["outcome"],
        )
        .expect("valid acceptances_total metric");

        let confirmations_total = IntCounterVec::new(
            Opts::new("confirmations_total", "Checkpoint confirmations by stage and outcome"),
            &["stage", "outcome"],
        )
        .expect("valid confirmations_total metric");

        let payment_releases_total = IntCounterVec::new(
            Opts::new("payment_releases_total", "Payment release calls by outcome"),
            &["outcome"],
        )
        .expect("valid payment_releases_total metric");

        let assignment_queue_depth =
            IntGauge::new("assignment_queue_depth", "Assignment jobs waiting for the worker")
                .expect("valid assignment_queue_depth metric");

        registry
            .register(Box::new(opportunities_created_total.clone()))
            .expect("register opportunities_created_total");
        registry
            .register(Box::new(opportunities_expired_total.clone()))
            .expect("register opportunities_expired_total");
        registry
            .register(Box::new(acceptances_total.clone()))
            .expect("register acceptances_total");
        registry
            .register(Box::new(confirmations_total.clone()))
            .expect("register confirmations_total");
        registry
            .register(Box::new(payment_releases_total.clone()))
            .expect("register payment_releases_total");
        registry
            .register(Box::new(assignment_queue_depth.clone()))
            .expect("register assignment_queue_depth");

        Self {
            registry,
            opportunities_created_total,
            opportunities_expired_total,
            acceptances_total,
            confirmations_total,
            payment_releases_total,
            assignment_queue_depth,
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
