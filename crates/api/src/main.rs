use std::sync::Arc;

use anyhow::Context;

use devboard_api::app::{self, AppServices};
use devboard_api::config::AppConfig;
use devboard_api::consumers::LogNotifier;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    devboard_observability::init();

    let config = AppConfig::from_env().context("invalid configuration")?;
    let services = Arc::new(
        AppServices::from_config(&config)
            .await
            .context("failed to build services")?,
    );

    let dispatcher = services.dispatcher().spawn();
    let reaper = services.reaper().spawn();
    let consumer = match services.subscribe() {
        Some(subscription) => Some(
            services
                .consumer_runner(Arc::new(LogNotifier))
                .spawn("devboard-consumer", subscription, None)
                .context("failed to spawn consumer thread")?,
        ),
        None => None,
    };

    let router = app::build_router(services.clone());
    let listener = tokio::net::TcpListener::bind(config.http_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http_addr))?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server failed")?;

    tracing::info!("shutting down workers");
    dispatcher.shutdown().await;
    reaper.shutdown().await;
    if let Some(consumer) = consumer {
        tokio::task::spawn_blocking(move || consumer.shutdown())
            .await
            .context("consumer shutdown panicked")?;
    }
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for ctrl-c");
    }
}
