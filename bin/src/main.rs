#![allow(clippy::cognitive_complexity)]
use anyhow::{Context, Result, anyhow};
use tokio::{
    runtime::Builder,
    signal::{
        self,
        unix::{SignalKind, signal},
    },
};
use tracing::{Span, debug, error, info};

mod cli;
mod trace;

use cli::Parser;
use config::NatsConfig;
use nats_connect::{NatsConnector, NatsTransport, SinkRegistry, configure_connection};

#[cfg(not(target_env = "musl"))]
use jemallocator::Jemalloc;

#[cfg(not(target_env = "musl"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

fn main() -> Result<()> {
    let dotenv = dotenv::dotenv();
    // parses from cli or environment var
    let config = cli::Config::parse();
    let sinks = SinkRegistry::new();
    trace::init(&config.log, config.log_format, &sinks)?;
    debug!(?config);
    if let Err(err) = dotenv {
        debug!(?err, ".env file not loaded");
    }

    let mut builder = Builder::new_multi_thread();
    // configure thread name & enable IO/time
    builder.thread_name(&config.thread_name).enable_all();
    // default num threads will be num logical CPUs
    // if we have a configured value here, set it
    if let Some(num) = config.threads {
        builder.worker_threads(num);
    }
    // build the runtime
    let rt = builder.build()?;

    rt.block_on(async move {
        match tokio::spawn(async move { start(config, sinks).await }).await {
            Err(err) => error!(?err, "failed to start"),
            Ok(Err(err)) => error!(?err, "exited with error"),
            Ok(_) => debug!("exiting..."),
        }
    });

    Ok(())
}

async fn start(config: cli::Config, sinks: SinkRegistry) -> Result<()> {
    debug!(path = %config.config_path.display(), "parsing config");
    let app_cfg = config::Config::parse(&config.config_path)?;

    if let Some(metrics) = app_cfg.metrics() {
        info!(
            subject = %metrics.subject,
            default_dims = metrics.default_dims.len(),
            "metrics subject configured"
        );
    }

    let span = app_cfg.nats().map(NatsConfig::span).unwrap_or_else(Span::none);
    let connector = NatsConnector::nats(NatsTransport::new().with_name(&config.client_name));

    let Some(configured) = configure_connection(&connector, app_cfg.nats(), &span, &sinks)
        .await
        .context("failed to configure nats connection")?
    else {
        info!("no nats config found, nothing to connect");
        return Ok(());
    };
    info!(parent: &span, "nats connection configured");

    shutdown_signal().await?;
    info!("shutting down");

    // publish what the log sink still has queued before the final flush
    if let Some(sink) = configured.sink {
        sink.close().await;
    }
    configured
        .connection
        .flush()
        .await
        .context("failed to flush nats connection")?;
    Ok(())
}

async fn shutdown_signal() -> Result<()> {
    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        ret = signal::ctrl_c() => ret.map_err(|err| anyhow!(err)),
        _ = terminate.recv() => Ok(()),
    }
}
