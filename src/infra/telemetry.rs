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

pub const METRIC_UPSTREAM_REQUEST_MS: &str = "community_node_upstream_request_ms";
pub const METRIC_HEARTBEAT_TOTAL: &str = "community_node_heartbeat_total";

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

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "community_node_cache_hit_total",
            Unit::Count,
            "Total number of reads answered from the cache store."
        );
        describe_counter!(
            "community_node_cache_miss_total",
            Unit::Count,
            "Total number of reads fetched synchronously from the registry."
        );
        describe_counter!(
            "community_node_cache_store_error_total",
            Unit::Count,
            "Total number of cache store failures absorbed as misses or skipped writes."
        );
        describe_counter!(
            "community_node_refresh_total",
            Unit::Count,
            "Total number of background refreshes, labelled by outcome."
        );
        describe_counter!(
            "community_node_refresh_skipped_total",
            Unit::Count,
            "Total number of refreshes skipped because one was already in flight."
        );
        describe_histogram!(
            METRIC_UPSTREAM_REQUEST_MS,
            Unit::Milliseconds,
            "Registry request latency in milliseconds."
        );
        describe_counter!(
            METRIC_HEARTBEAT_TOTAL,
            Unit::Count,
            "Total number of registration heartbeats, labelled by outcome."
        );
    });
}

