use log::{error, info};
use tokio_util::sync::CancellationToken;

use dotmonitor::config::Config;

#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    let token = CancellationToken::new();
    {
        let token = token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Received Ctrl-C, shutting down");
                    token.cancel();
                }
                Err(e) => error!("Unable to listen for shutdown signal: {e}"),
            }
        });
    }

    if let Err(e) = dotmonitor::run(config, token).await {
        error!("{e}");
        std::process::exit(1);
    }
}
