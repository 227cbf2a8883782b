use reel_resolver::config::AppConfig;
use reel_resolver::server::{self, AppState};
use std::time::Duration;

const CACHE_PURGE_INTERVAL: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() {
    // Respect RUST_LOG if set
    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "reel_resolver=debug,tower_http=info".to_string());

    tracing_subscriber::fmt().with_env_filter(&env_filter).init();

    let config = AppConfig::from_env();
    tracing::info!(
        bind = %config.bind_addr,
        cache_dir = %config.cache_dir.display(),
        production = config.production,
        debug_endpoints = config.debug_endpoints,
        proxy = ?config.proxy,
        "configuration loaded"
    );

    if let Err(e) = std::fs::create_dir_all(&config.cache_dir) {
        tracing::error!("Failed to create cache dir {}: {}", config.cache_dir.display(), e);
        std::process::exit(1);
    }

    let state = match AppState::from_config(config) {
        Ok(state) => state,
        Err(e) => {
            tracing::error!("Failed to initialize: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(max_age) = state.config.cache_max_age {
        let purger = state.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(max_age.min(CACHE_PURGE_INTERVAL));
            loop {
                tick.tick().await;
                purger.purge_stale_cache().await;
            }
        });
    }

    if let Err(e) = server::start_server(state).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }

    tracing::info!("Server shutdown complete");
}
