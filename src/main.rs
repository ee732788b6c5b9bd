use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use dirsess_registry::{AnonymousAccessFlag, Registry, RegistryConfig};
use dirsess_server::{DelayedExecutor, ServerSettings};
use dirsess_telemetry::TelemetryConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let (settings, rejected) = dirsess_server::load_settings().context("failed to load settings")?;
    let _telemetry = dirsess_telemetry::init_telemetry(telemetry_config(&settings));
    for reject in &rejected {
        reject.log();
    }

    tracing::info!(
        addr = %settings.bind_addr(),
        allow_anonymous = settings.allow_anonymous,
        "starting directory session server"
    );

    let access = Arc::new(AnonymousAccessFlag::new(settings.allow_anonymous));
    let registry = Arc::new(Registry::new(
        RegistryConfig {
            provider_url: settings.provider_url.clone(),
            ..Default::default()
        },
        access,
    ));
    let executor = Arc::new(DelayedExecutor::new(Duration::from_millis(
        settings.operation_delay_ms,
    )));

    let handle = dirsess_server::start(&settings, registry, executor)
        .await
        .context("failed to start server")?;
    tracing::info!(addr = %handle.local_addr(), "server ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;

    tracing::info!("shutting down");
    let closed = handle.shutdown().await;
    tracing::info!(closed, "bye");
    Ok(())
}

fn telemetry_config(settings: &ServerSettings) -> TelemetryConfig {
    let log_level = settings.log_level.parse().unwrap_or_else(|_| {
        eprintln!("unknown log level {:?}, using info", settings.log_level);
        tracing::Level::INFO
    });
    TelemetryConfig {
        log_level,
        json: settings.log_json,
        ..Default::default()
    }
}
