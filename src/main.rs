mod collector;
mod config;
mod device;
mod http;
mod metrics;

use crate::config::Config;
use crate::device::{DeviceDriver, DeviceFamilies};
use anyhow::Result;
use futures::future;
use prometheus_client::registry::Registry;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn init_tracing() -> Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,homepower_exporter=info".into());
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init()
        .map_err(|err| anyhow::anyhow!(err.to_string()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;
    let config = Config::load()?;
    tracing::info!(devices = config.devices.len(), "loaded device manifest");

    let mut registry = Registry::default();
    let poller_families = collector::PollerFamilies::register(&mut registry);
    let mut device_families = DeviceFamilies::default();
    let mut pollers = Vec::with_capacity(config.devices.len());
    for device in &config.devices {
        let driver = DeviceDriver::new(
            device,
            config.tapo_credentials.as_ref(),
            &mut device_families,
            &mut registry,
        )?;
        let poller_metrics = collector::PollerMetrics::new(&poller_families, device);
        pollers.push((driver, poller_metrics));
    }

    let cancel = CancellationToken::new();
    let mut poller_handles = Vec::with_capacity(pollers.len());
    for (driver, poller_metrics) in pollers {
        poller_handles.push(tokio::spawn(collector::run_poller(
            driver,
            poller_metrics,
            config.poll_interval,
            config.poll_jitter,
            cancel.clone(),
        )));
    }

    let state = http::HttpState {
        registry: Arc::new(registry),
    };
    let listener = tokio::net::TcpListener::bind(&config.http_bind).await?;
    tracing::info!(bind = %config.http_bind, "metrics endpoint listening");
    let http_cancel = cancel.clone();
    let server_handle = tokio::spawn(async move {
        axum::serve(listener, http::router(state))
            .with_graceful_shutdown(async move { http_cancel.cancelled().await })
            .await
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutdown signal received");
    cancel.cancel();

    future::join_all(poller_handles).await;
    server_handle.await??;
    Ok(())
}
