// src/main.rs
use env_logger::Builder;
use log::{error, info, LevelFilter};
use pkp_tracker::api;
use pkp_tracker::config::{Config, StoreBackend};
use pkp_tracker::db::{LedgerStore, MemoryLedgerStore, ScyllaLedgerStore};
use pkp_tracker::ledger::LedgerEngine;
use pkp_tracker::prices::{AlphaVantageSource, PriceService, PriceSource};
use reqwest::Client;
use std::sync::Arc;

#[tokio::main]
async fn main() {
    Builder::new()
        .filter_level(LevelFilter::Info)
        .parse_default_env()
        .format_timestamp_secs()
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            return;
        }
    };

    let store: Arc<dyn LedgerStore> = match config.store.backend {
        StoreBackend::Scylla => match ScyllaLedgerStore::connect(&config.store).await {
            Ok(store) => Arc::new(store),
            Err(e) => {
                error!("Failed to initialize ledger store: {}", e);
                return;
            }
        },
        StoreBackend::Memory => {
            info!("Using in-memory ledger; rows are lost on exit.");
            Arc::new(MemoryLedgerStore::default())
        }
    };

    let source: Option<Arc<dyn PriceSource>> = match &config.alpha_vantage_api_key {
        Some(api_key) => Some(Arc::new(AlphaVantageSource::new(
            Client::new(),
            api_key.clone(),
        ))),
        None => {
            info!("ALPHA_VANTAGE_API_KEY not set; LTP must be entered manually.");
            None
        }
    };

    info!(
        "Starting the PKP tracker ({:?} units, {:?} cost basis, booking at {})...",
        config.policy.units, config.policy.cost_basis, config.policy.booking_threshold
    );
    let engine = Arc::new(LedgerEngine::new(store, config.policy.clone()));
    let prices = Arc::new(PriceService::new(source));

    info!("Server running on http://{}", config.bind_addr);
    warp::serve(api::app(engine, prices))
        .run(config.bind_addr)
        .await;
}
