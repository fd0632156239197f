//! tracing configuration
use anyhow::Result;
use nats_connect::SinkRegistry;
use tracing_subscriber::{
    filter::EnvFilter,
    fmt::{
        self,
        format::{Format, PrettyFields},
    },
    prelude::__tracing_subscriber_SubscriberExt,
    util::SubscriberInitExt,
};

use crate::cli::LogFormat;

/// Install the global subscriber. Records reaching the fmt layer also reach
/// any log sinks attached to `sinks`
pub fn init(log: &str, log_frmt: LogFormat, sinks: &SinkRegistry) -> Result<()> {
    let filter = EnvFilter::try_new(log).or_else(|_| EnvFilter::try_new("info"))?;
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(sinks.layer());

    match log_frmt {
        LogFormat::Json => {
            registry.with(fmt::layer().json()).try_init()?;
        }
        LogFormat::Pretty => {
            registry
                .with(
                    fmt::layer()
                        .event_format(Format::default().pretty().with_source_location(false))
                        .fmt_fields(PrettyFields::new()),
                )
                .try_init()?;
        }
        LogFormat::Standard => {
            registry.with(fmt::layer()).try_init()?;
        }
    }

    Ok(())
}
