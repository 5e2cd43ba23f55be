//! Venue B (on-chain) price monitor: a single `allMids` subscription
//! overwriting the symbol→price map in one pass per update.

use crate::error::{ExchangeError, ExchangeResult, Venue};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

const WS_URL: &str = "wss://api.hyperliquid.xyz/ws";

pub struct OnchainPriceMonitor {
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
    ready: Arc<Notify>,
    is_ready: Arc<std::sync::atomic::AtomicBool>,
    shutdown: Arc<Notify>,
}

impl OnchainPriceMonitor {
    pub fn new() -> Self {
        Self {
            prices: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(Notify::new()),
            is_ready: Arc::new(std::sync::atomic::AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn get_price(&self, symbol: &str) -> Option<Decimal> {
        self.prices.read().get(symbol).copied()
    }

    pub fn has_price(&self, symbol: &str) -> bool {
        self.prices.read().contains_key(symbol)
    }

    pub async fn start(&self) -> ExchangeResult<()> {
        let prices = self.prices.clone();
        let ready = self.ready.clone();
        let is_ready = self.is_ready.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(run_loop(prices, ready, is_ready, shutdown));

        tokio::select! {
            _ = self.ready.notified() => Ok(()),
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                Err(ExchangeError::ws(Venue::Onchain, "price monitor failed to start within 30s"))
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Default for OnchainPriceMonitor {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_loop(
    prices: Arc<RwLock<HashMap<String, Decimal>>>,
    ready: Arc<Notify>,
    is_ready: Arc<std::sync::atomic::AtomicBool>,
    shutdown: Arc<Notify>,
) {
    let mut reconnect_delay = Duration::from_secs(1);
    let max_reconnect_delay = Duration::from_secs(60);

    loop {
        tokio::select! {
            _ = shutdown.notified() => return,
            result = connect_and_stream(&prices, &ready, &is_ready, &shutdown) => {
                match result {
                    Ok(_) => reconnect_delay = Duration::from_secs(1),
                    Err(e) => {
                        warn!(error = %e, "hyperliquid_price_monitor_ws_error");
                        tokio::time::sleep(reconnect_delay).await;
                        reconnect_delay = (reconnect_delay * 2).min(max_reconnect_delay);
                    }
                }
            }
        }
    }
}

async fn connect_and_stream(
    prices: &Arc<RwLock<HashMap<String, Decimal>>>,
    ready: &Arc<Notify>,
    is_ready: &Arc<std::sync::atomic::AtomicBool>,
    shutdown: &Arc<Notify>,
) -> anyhow::Result<()> {
    info!(url = WS_URL, "hyperliquid_price_monitor_connecting");
    let (ws_stream, _resp) = connect_async(WS_URL).await?;
    let (mut write, mut read) = ws_stream.split();

    let subscribe_msg = serde_json::json!({
        "method": "subscribe",
        "subscription": {"type": "allMids"},
    });
    write.send(Message::Text(subscribe_msg.to_string())).await?;

    loop {
        tokio::select! {
            _ = shutdown.notified() => return Ok(()),
            msg = read.next() => {
                let Some(msg) = msg else {
                    return Err(anyhow::anyhow!("hyperliquid price monitor ws stream ended"));
                };
                match msg? {
                    Message::Text(text) => handle_text_message(&text, prices, ready, is_ready),
                    Message::Ping(payload) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
        }
    }
}

fn handle_text_message(
    text: &str,
    prices: &Arc<RwLock<HashMap<String, Decimal>>>,
    ready: &Arc<Notify>,
    is_ready: &Arc<std::sync::atomic::AtomicBool>,
) {
    let json: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return,
    };

    if json.get("channel").and_then(|v| v.as_str()) != Some("allMids") {
        return;
    }

    let mids = &json["data"]["mids"];
    let Some(mids) = mids.as_object() else { return };

    let mut symbols_seen = 0;
    {
        let mut prices = prices.write();
        for (coin, px) in mids {
            let price = px
                .as_str()
                .and_then(|s| Decimal::from_str(s).ok())
                .unwrap_or(Decimal::ZERO);
            prices.insert(coin.clone(), price);
            symbols_seen += 1;
        }
    }

    if !is_ready.swap(true, std::sync::atomic::Ordering::SeqCst) {
        info!(symbols = symbols_seen, "hyperliquid_price_monitor_ready");
        ready.notify_waiters();
    }
}
