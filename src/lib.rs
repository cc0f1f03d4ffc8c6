//! Watches a DNS-over-TLS resolver and tells Telegram subscribers when it
//! goes down or comes back.

pub mod channel;
pub mod commands;
pub mod config;
pub mod error;
pub mod media;
pub mod monitor;
pub mod probe;
pub mod stats;
pub mod subscriptions;

#[cfg(test)]
mod testing;

use log::{error, info, warn};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::channel::TelegramChannel;
use crate::commands::{CommandTable, Handlers};
use crate::config::Config;
use crate::error::Error;
use crate::monitor::HealthMonitor;
use crate::probe::{DotResolver, Resolve};
use crate::stats::{PiholeStats, StatsSource};
use crate::subscriptions::{SubscriberId, SubscriptionStore};

/// Runs the health monitor and the command listener until `token` is cancelled.
///
/// Missing required settings are only warned about; the affected calls fail
/// at runtime and are logged.
///
/// # Errors
///
/// Fails if the subscriber file exists but cannot be read, or if an HTTP
/// client cannot be built.
pub async fn run(config: Config, token: CancellationToken) -> Result<(), Error> {
    for key in config.missing_required() {
        warn!("{key} needs to be set");
    }
    log_config(&config);

    let main_channel = config
        .telegram
        .main_channel
        .as_deref()
        .map(SubscriberId::from);
    let store = Arc::new(SubscriptionStore::load(
        config.subscribers_file(),
        main_channel.clone(),
    )?);
    let resolver: Arc<dyn Resolve> = Arc::new(DotResolver::from_config(&config));
    let stats: Arc<dyn StatsSource> = Arc::new(PiholeStats::from_config(&config)?);
    let channel = Arc::new(TelegramChannel::from_config(&config)?);

    let monitor = Arc::new(HealthMonitor::new(
        resolver.clone(),
        channel.clone(),
        stats.clone(),
        store.clone(),
        config.resolver.test_domain.clone(),
        main_channel,
    ));
    let handlers = Arc::new(Handlers::new(
        store,
        monitor.clone(),
        resolver,
        stats,
        channel.clone(),
        &config,
    ));
    let table = CommandTable::new()?;

    let interval = config.check_interval();
    let ticks = {
        let token = token.clone();
        tokio::spawn(async move { monitor.run(interval, token).await })
    };
    let listener = tokio::spawn(commands::run(handlers, channel, table, token));

    let (ticks, listener) = tokio::join!(ticks, listener);
    if let Err(e) = ticks {
        error!("Monitor task ended abnormally: {e}");
    }
    if let Err(e) = listener {
        error!("Command task ended abnormally: {e}");
    }
    Ok(())
}

fn log_config(config: &Config) {
    match (&config.resolver.address, &config.resolver.hostname) {
        (Some(ip), Some(host)) => info!(
            "Resolver: {host} at {ip}:{}",
            config.resolver.port
        ),
        _ => warn!("Resolver is not fully configured, every check will fail"),
    }
    info!("Test domain: {}", config.resolver.test_domain);
    info!("Timeout: {} seconds", config.resolver.timeout_secs);
    match &config.stats.url {
        Some(url) => info!("Stats endpoint: {url}"),
        None => info!("Stats endpoint is not set, stats will be unavailable"),
    }
    info!("Subscriber file: {}", config.subscribers_file().display());
}
