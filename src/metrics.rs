use anyhow::{Context, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;

/// Install the Prometheus recorder and serve `/metrics` on `port`.
/// Must be called from within a tokio runtime.
pub fn start_metrics_exporter(port: u16) -> Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Metrics exporter listening on http://{}/metrics", addr);
    initialize_sync_metrics();
    Ok(())
}

/// Initialize synchronization engine metrics to zero/default values
/// This ensures metrics always appear in Prometheus queries even if no events have occurred
pub fn initialize_sync_metrics() {
    // Live feed
    metrics::counter!("transport.messages.received_total").absolute(0);
    metrics::counter!("transport.messages.dropped_total").absolute(0);
    metrics::counter!("transport.messages.ignored_total").absolute(0);
    metrics::counter!("transport.messages.control_total").absolute(0);
    metrics::counter!("transport.events.stale_total").absolute(0);
    metrics::gauge!("transport.connected").set(0.0);

    // Supervisor
    metrics::counter!("supervisor.reconnect_attempts_total").absolute(0);
    metrics::counter!("supervisor.reset_failures_total").absolute(0);
    metrics::gauge!("supervisor.mode").set(0.0);

    // Store and simulator
    metrics::gauge!("store.entities").set(0.0);
    metrics::counter!("simulator.ticks_total").absolute(0);
}
