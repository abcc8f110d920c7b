use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
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
///
/// Logs go to stderr so `convert` can print artifact ids on stdout.
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
            .with_writer(std::io::stderr)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_target(true)
            .with_writer(std::io::stderr)
            .boxed(),
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

/// Register units and help text for every metric the service emits.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "pressroom_render_total",
            Unit::Count,
            "Total number of render requests, labelled by outcome."
        );
        describe_histogram!(
            "pressroom_render_ms",
            Unit::Milliseconds,
            "End-to-end render latency in milliseconds, labelled by outcome."
        );
        describe_histogram!(
            "pressroom_pool_acquire_ms",
            Unit::Milliseconds,
            "Time spent waiting for a pooled renderer in milliseconds."
        );
        describe_counter!(
            "pressroom_pool_created_total",
            Unit::Count,
            "Total number of renderers launched by the pool."
        );
        describe_counter!(
            "pressroom_pool_retired_total",
            Unit::Count,
            "Total number of renderers terminated by the pool, labelled by reason (dead, expired, invalidated, idle, abandoned)."
        );
    });
}
