use std::sync::Once;

use metrics::{Unit, describe_counter, describe_gauge, describe_histogram};
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
    describe_metrics();

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

fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "telaio_cache_hit_total",
            Unit::Count,
            "Total number of cache handler hits."
        );
        describe_counter!(
            "telaio_cache_miss_total",
            Unit::Count,
            "Total number of cache handler misses (including expired entries)."
        );
        describe_counter!(
            "telaio_cache_evict_total",
            Unit::Count,
            "Total number of cache handler evictions."
        );
        describe_gauge!(
            "telaio_cache_entries",
            Unit::Count,
            "Current number of live cache handlers."
        );
        describe_gauge!(
            "telaio_change_queue_len",
            Unit::Count,
            "Current number of change records read but not yet dispatched."
        );
        describe_histogram!(
            "telaio_change_dispatch_ms",
            Unit::Milliseconds,
            "Per-record change dispatch latency in milliseconds."
        );
    });
}
