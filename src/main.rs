//! Arbitrage bot entry point: loads configuration, builds both venue
//! clients, wires them into the `Bot` orchestrator, and runs until
//! interrupted. Grounded on `original_source/src/arbitrage/bot.py`'s
//! module-level `main()` plus the teacher's `load_env`/`init_tracing`
//! composition-root pattern.

use anyhow::Context;
use arb_engine::bot::Bot;
use arb_engine::config::Config;
use arb_engine::signing::EnvSigner;
use arb_engine::venues::clob::ClobClient;
use arb_engine::venues::onchain::OnchainClient;
use arb_engine::venues::ExchangeClient;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    info!("arb_bot_starting");

    let config = Config::from_env().context("loading configuration")?;
    let shutdown = Arc::new(Notify::new());

    let venue_a: Arc<dyn ExchangeClient> = {
        let client = Arc::new(ClobClient::new(config.clob.clone(), config.fill_estimate));
        client.start().await.context("starting venue A client")?;
        client
    };

    let venue_b: Arc<dyn ExchangeClient> = {
        let signer = Arc::new(EnvSigner::new(config.onchain.private_key.clone()));
        let client = Arc::new(OnchainClient::new(config.onchain.clone(), signer, config.fill_estimate));
        client.start().await.context("starting venue B client")?;
        client
    };

    let bot = Arc::new(Bot::new(&config, venue_a, venue_b, shutdown.clone()));
    bot.start().await.context("bot startup sequence")?;

    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown_signal_received");
            shutdown_signal.notify_waiters();
        }
    });

    bot.run().await;
    info!("arb_bot_stopped");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arb_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    let _ = dotenv::dotenv();

    let manifest_dir = Path::new(env!("CARGO_MANIFEST_DIR"));
    let candidates = [manifest_dir.join(".env"), manifest_dir.join("../.env")];
    for p in candidates {
        if p.exists() {
            let _ = dotenv::from_path(&p);
        }
    }
}
