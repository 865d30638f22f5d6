// =============================================================================
// crossbar-engine — Main Entry Point
// =============================================================================
//
// Wires the feed adapter, broker gateway, ban list, journal writer, and
// strategy engine together, then runs the single-threaded dispatch loop
// (§5) until shutdown.
// =============================================================================

mod ban_list;
mod broker;
mod clock;
mod config;
mod crossover;
mod engine;
mod feed;
mod indicators;
mod journal;
mod model;
mod status;
mod strategy;
mod types;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::ban_list::BanList;
use crate::broker::BrokerClient;
use crate::clock::Clock;
use crate::config::RuntimeConfig;
use crate::engine::Engine;
use crate::journal::JournalWriter;

const CONFIG_PATH: &str = "runtime_config.json";
const BAN_LIST_PATH: &str = "ban_list.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("crossbar-engine starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load runtime config, using defaults");
        RuntimeConfig::default()
    });

    if let Ok(syms) = std::env::var("CROSSBAR_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }

    info!(symbols = ?config.symbols, formula = %config.formula_variant, "runtime configuration loaded");

    let key_id = std::env::var("BROKER_KEY_ID").unwrap_or_default();
    let secret_key = std::env::var("BROKER_SECRET_KEY").unwrap_or_default();
    let base_url = std::env::var("BROKER_BASE_URL").unwrap_or_else(|_| "https://paper-api.alpaca.markets".into());
    let data_base_url = std::env::var("BROKER_DATA_BASE_URL").unwrap_or_else(|_| "https://data.alpaca.markets".into());
    let feed_url = std::env::var("FEED_WS_URL").unwrap_or_else(|_| "wss://stream.data.alpaca.markets/v2/sip".into());

    let broker = BrokerClient::new(key_id, secret_key, base_url, data_base_url);
    let clock = Clock::los_angeles();
    let journal = JournalWriter::new(".");
    let banned = BanList::load(BAN_LIST_PATH);

    let symbols = config.symbols.clone();
    let mut engine = Engine::new(config, clock, broker, journal, banned);

    let shared_snapshot = status::new_shared_snapshot();

    let bind_addr = std::env::var("STATUS_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".into());
    let status_snapshot = shared_snapshot.clone();
    tokio::spawn(async move {
        let app = status::router(status_snapshot);
        let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, addr = %bind_addr, "failed to bind status server");
                return;
            }
        };
        info!(addr = %bind_addr, "status server listening");
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "status server failed");
        }
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(feed::run(feed_url, tx));

    info!(count = symbols.len(), "engine dispatch loop running. press Ctrl+C to stop.");

    loop {
        tokio::select! {
            maybe_event = rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        engine.dispatch(event).await;
                        *shared_snapshot.write() = engine.snapshot();
                    }
                    None => {
                        warn!("feed channel closed — shutting down");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                warn!("shutdown signal received — stopping gracefully");
                break;
            }
        }
    }

    if let Err(e) = engine.config.save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("crossbar-engine shut down complete.");
    Ok(())
}
