use anyhow::Result;
use log::info;
use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

// Metrics for monitoring
pub const METRIC_FETCHES: &str = "holders_fetches_total";
pub const METRIC_FETCH_FAILURES: &str = "holders_fetch_failures_total";
pub const METRIC_STALE_RESPONSES: &str = "holders_stale_responses_total";
pub const METRIC_FETCH_DURATION: &str = "holders_fetch_duration_seconds";

pub fn describe() {
    describe_counter!(METRIC_FETCHES, "Holder lookups started");
    describe_counter!(METRIC_FETCH_FAILURES, "Holder lookups that ended in an error");
    describe_counter!(
        METRIC_STALE_RESPONSES,
        "Responses dropped because a newer lookup superseded them"
    );
    describe_histogram!(
        METRIC_FETCH_DURATION,
        Unit::Seconds,
        "Time spent waiting on the holder provider"
    );
}

/// Serves Prometheus metrics on `0.0.0.0:<port>/metrics`. Needs a running tokio runtime.
pub fn install_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    describe();
    info!("Metrics exporter listening on {}", addr);
    Ok(())
}
