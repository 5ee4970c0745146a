use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info};

use filter_registry::config::Config;
use filter_registry::filters::{FilterController, HttpFetcher};
use filter_registry::init::{seed_filters, setup_logging};

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Load Config
    let config_path = std::env::args().nth(1).unwrap_or("config.toml".to_string());
    let config_exists = std::path::Path::new(&config_path).exists();
    let config = if config_exists {
        Config::load(&config_path).await?
    } else {
        Config::default()
    };

    // 2. Setup Logging
    setup_logging(&config);
    info!("Starting filter-registry...");
    if !config_exists {
        info!("Config file not found, using defaults.");
    }

    // 3. Init Controller
    let fetcher = HttpFetcher::new(config.filtering.max_size_bytes)
        .context("Failed to build HTTP client")?;
    let controller = Arc::new(
        FilterController::new(&config, Arc::new(fetcher))
            .await
            .context("Failed to open filter directory")?,
    );

    // 4. Fetch Configured Lists
    seed_filters(&controller, &config.filters).await;

    // 5. Spawn Periodic Updater
    let update_interval = Duration::from_secs(config.updates.interval_hours.max(1) * 3600);
    let (refresh_tx, mut refresh_rx) = tokio::sync::mpsc::channel::<()>(1);
    let updater = controller.clone();

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(update_interval);
        // The first tick completes immediately
        interval.tick().await;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    info!("Scheduled filter update...");
                }
                Some(()) = refresh_rx.recv() => {
                    info!("Forced filter update triggered via API...");
                    interval.reset();
                }
            }
            if updater.is_closed() {
                break;
            }
            updater.refresh_all().await;
        }
    });

    // 6. Start API Server
    if config.api.enable {
        let addr: SocketAddr = format!("{}:{}", config.api.host, config.api.port)
            .parse()
            .context("Invalid API listen address")?;
        let api_controller = controller.clone();
        tokio::spawn(async move {
            if let Err(e) =
                filter_registry::api::start_api_server(api_controller, refresh_tx, addr).await
            {
                error!("{:#}", e);
            }
        });
    }

    // 7. Graceful Shutdown
    signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    controller.close();

    Ok(())
}
