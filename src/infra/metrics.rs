//! Prometheus exposition of the `contentproxy_*` counters and gauges.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

use super::{error::InfraError, telemetry};

/// Install the process-wide Prometheus recorder and describe every metric.
///
/// Pull-based: nothing listens on its own, the handle is rendered by the
/// scrape route on the proxy listener.
pub fn install() -> Result<PrometheusHandle, InfraError> {
    let handle = PrometheusBuilder::new().install_recorder().map_err(|err| {
        InfraError::telemetry(format!("failed to install prometheus recorder: {err}"))
    })?;
    telemetry::describe_metrics();
    info!("prometheus metrics initialized");
    Ok(handle)
}
