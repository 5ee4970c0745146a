//! Initialization helpers for the application startup.

use crate::config::{Config, FilterSource};
use crate::filters::FilterController;
use tracing::{error, info};

/// Sets up the tracing subscriber with the configured filters.
pub fn setup_logging(config: &Config) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let mut filter = config.logging.level.clone();

        // Keep the HTTP client quiet unless explicitly requested.
        for target in ["hyper", "reqwest"] {
            if !filter.contains(target) {
                filter.push_str(&format!(",{}=warn", target));
            }
        }

        tracing_subscriber::EnvFilter::new(filter)
    });

    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

/// Registers the configured filter lists. Lists that fail to download are
/// logged and skipped; returns how many were added.
pub async fn seed_filters(controller: &FilterController, sources: &[FilterSource]) -> usize {
    let mut added = 0;
    for source in sources {
        let name = source.name.as_deref().unwrap_or(&source.url);
        match controller.add_with(&source.url, name, source.enabled).await {
            Ok(_) => added += 1,
            Err(e) => error!("Failed to add filter {}: {}", source.url, e),
        }
    }
    info!("Registered {} of {} configured filters", added, sources.len());
    added
}
