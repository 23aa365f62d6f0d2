use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::{
    application::{
        page::{METRIC_RENDER_PAGE_MS, METRIC_RENDER_PAGES},
        render::{METRIC_BINDING_PASSES, METRIC_DRAINED_CALLS},
    },
    config::{LogFormat, LoggingSettings},
};

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
            METRIC_RENDER_PAGES,
            Unit::Count,
            "Total number of rendered pages, labelled by mode."
        );
        describe_counter!(
            METRIC_BINDING_PASSES,
            Unit::Count,
            "Total number of binding passes run by compiled templates."
        );
        describe_counter!(
            METRIC_DRAINED_CALLS,
            Unit::Count,
            "Total number of deferred calls drained between binding passes."
        );
        describe_histogram!(
            METRIC_RENDER_PAGE_MS,
            Unit::Milliseconds,
            "Page render latency in milliseconds."
        );
    });
}
