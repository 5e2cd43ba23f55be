//! Standalone close-everything utility (§4.9): a separate composition root
//! from `arb-bot` so it can run even if the bot process is wedged. Builds
//! its own venue clients, flattens every open position on both venues, and
//! reports success/failure via the process exit code.
//!
//! Grounded on `original_source/src/utils/emergency_shutdown.py`'s `main()`:
//! `initialize_exchanges` → `close_all_positions` → exit 0/1.

use anyhow::Context;
use arb_engine::config::Config;
use arb_engine::emergency::EmergencyShutdown;
use arb_engine::signing::EnvSigner;
use arb_engine::venues::clob::ClobClient;
use arb_engine::venues::onchain::OnchainClient;
use arb_engine::venues::ExchangeClient;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "emergency-shutdown", about = "Flatten every open position on both venues")]
struct Args {
    /// Skip the interactive confirmation prompt.
    #[arg(long, env = "EMERGENCY_SHUTDOWN_YES")]
    yes: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Config::from_env().context("loading configuration")?;

    if !args.yes {
        eprintln!("This will close EVERY open position on both venues at market price.");
        eprintln!("Re-run with --yes (or EMERGENCY_SHUTDOWN_YES=1) to proceed.");
        std::process::exit(1);
    }

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

    info!("emergency_shutdown_starting");
    let shutdown = EmergencyShutdown::new(venue_a, venue_b);
    let all_closed = shutdown.close_all_positions().await;

    if all_closed {
        info!("emergency_shutdown_done");
        Ok(())
    } else {
        error!("emergency_shutdown_incomplete: manual intervention required, see logs above");
        std::process::exit(1);
    }
}
