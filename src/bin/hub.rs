use std::sync::Arc;

use clap::Parser;
use dairy_monitoring::{
    api::{ApiState, spawn_api_server},
    config::{Config, read_config_file},
    notifier::{Notifier, WebhookNotifier},
    storage,
};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: String,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("dairy_monitoring", LevelFilter::DEBUG),
        ("hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

fn notifiers(config: &Config) -> anyhow::Result<Vec<Arc<dyn Notifier>>> {
    let mut notifiers: Vec<Arc<dyn Notifier>> = vec![];
    if let Some(webhook) = &config.notifications.webhook {
        info!("forwarding monitor events to webhook {}", webhook.url);
        notifiers.push(Arc::new(WebhookNotifier::new(webhook.url.clone())?));
    }
    Ok(notifiers)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = read_config_file(&args.file)?;

    let storage_config = config.storage.clone().unwrap_or_default();
    info!("opening storage: {storage_config:?}");
    let storage = storage::open(&storage_config).await?;

    let state = ApiState::start(storage.clone(), notifiers(&config)?, &config.settings).await?;

    let api_config = config.api.clone().unwrap_or_default().with_env_overrides();
    let server = spawn_api_server(&api_config, state.clone()).await?;
    info!("monitoring hub ready on {}", server.addr);

    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    if let Err(e) = state.monitor.shutdown().await {
        error!("monitor worker did not stop cleanly: {e}");
    }
    let terminated = state.sessions.terminate_all().await;
    trace!("terminated {terminated} monitor sessions");
    server.stop().await;

    if let Err(e) = storage.close().await {
        error!("failed to close storage: {e}");
    }

    Ok(())
}
