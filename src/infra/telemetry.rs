use std::sync::Once;

use metrics::{Unit, describe_counter};
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

/// Register metric descriptions with the installed recorder. Safe to call
/// more than once.
pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "usercache_cache_hit_total",
            Unit::Count,
            "Cache reads answered from the cache store."
        );
        describe_counter!(
            "usercache_cache_miss_total",
            Unit::Count,
            "Cache reads that found no live entry."
        );
        describe_counter!(
            "usercache_cache_fill_total",
            Unit::Count,
            "Entries written into the cache after a miss."
        );
        describe_counter!(
            "usercache_cache_degraded_total",
            Unit::Count,
            "Cache operations that failed or timed out and were bypassed."
        );
        describe_counter!(
            "usercache_cache_evict_total",
            Unit::Count,
            "Successful key or namespace evictions."
        );
        describe_counter!(
            "usercache_store_read_total",
            Unit::Count,
            "Reads issued against the backing store."
        );
        describe_counter!(
            "usercache_cache_capacity_evict_total",
            Unit::Count,
            "In-process cache entries dropped to make room."
        );
    });
}
