//! Crash Observer - Main Entry Point
//!
//! Runs a single observer: stream client, round watcher and query surface.
//! Stops on Ctrl+C or on a request to `/shutdown`.

use tracing::info;

use crash_observer::config::json_logs_requested;
use crash_observer::utils::{init_telemetry, init_telemetry_json};
use crash_observer::{ObserverConfig, ObserverService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("Note: No .env file found or error loading it: {}", e);
    }

    // Logging comes up first so configuration warnings are not lost
    if json_logs_requested(std::env::var("LOG_FORMAT").ok().as_deref()) {
        init_telemetry_json();
    } else {
        init_telemetry();
    }

    let config = ObserverConfig::from_env();

    info!("╔════════════════════════════════════════════════════════╗");
    info!("║   Crash Observer                                       ║");
    info!("║   Round lifecycle and wager aggregation                ║");
    info!("╚════════════════════════════════════════════════════════╝");
    info!("");
    info!("Stream:   {}", config.stream.ws_url);
    info!("Channel:  {}", config.stream.channel);
    info!("Token:    {}", config.token_url);
    info!("Listen:   {}:{}", config.host, config.port);
    info!("History:  {} rounds", config.history_capacity);
    if let Some(url) = &config.self_ping_url {
        info!("Ping:     {} every {}s", url, config.self_ping_interval.as_secs());
    }
    info!("");

    ObserverService::new(config).run().await?;

    info!("Observer stopped. Bye.");
    Ok(())
}
