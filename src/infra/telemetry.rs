use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

/// Register metric metadata with the installed recorder. Call after installing it.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "contentproxy_update_total",
            Unit::Count,
            "Total number of cache invalidation requests."
        );
        describe_counter!(
            "contentproxy_proxy_request_total",
            Unit::Count,
            "Total number of proxied GET requests."
        );
        describe_counter!(
            "contentproxy_upstream_request_total",
            Unit::Count,
            "Total number of fetches sent to the backend."
        );
        describe_counter!(
            "contentproxy_cache_hit_total",
            Unit::Count,
            "Total number of proxied requests answered from the cache."
        );
        describe_counter!(
            "contentproxy_cache_miss_total",
            Unit::Count,
            "Total number of proxied requests that had to wait for a fetch."
        );
        describe_gauge!(
            "contentproxy_cache_entries",
            Unit::Count,
            "Current number of cached responses."
        );
        describe_gauge!(
            "contentproxy_pending_keys",
            Unit::Count,
            "Current number of keys with a fetch in flight."
        );
        describe_counter!(
            "contentproxy_webhook_failure_total",
            Unit::Count,
            "Total number of webhook calls that failed."
        );
    });
}
