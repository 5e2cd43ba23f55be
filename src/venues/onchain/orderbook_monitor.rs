//! Venue B orderbook monitor: each WS frame carries the full top-N book,
//! replaced wholesale. No gap logic (§4.4).

use crate::error::{ExchangeError, ExchangeResult, Venue};
use crate::types::Orderbook;
use crate::venues::onchain::adapters::adapt_orderbook;
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

const WS_URL: &str = "wss://api.hyperliquid.xyz/ws";

pub struct OnchainOrderbookMonitor {
    books: Arc<RwLock<HashMap<String, Orderbook>>>,
    ready: Arc<Notify>,
    is_ready: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
}

impl OnchainOrderbookMonitor {
    pub fn new() -> Self {
        Self {
            books: Arc::new(RwLock::new(HashMap::new())),
            ready: Arc::new(Notify::new()),
            is_ready: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn get_orderbook(&self, symbol: &str) -> Option<Orderbook> {
        self.books.read().get(symbol).cloned()
    }

    pub fn has_orderbook(&self, symbol: &str) -> bool {
        self.books.read().contains_key(symbol)
    }

    pub async fn start(&self, symbols: Vec<String>) -> ExchangeResult<()> {
        let books = self.books.clone();
        let ready = self.ready.clone();
        let is_ready = self.is_ready.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(run_loop(symbols, books, ready, is_ready, shutdown));

        tokio::select! {
            _ = self.ready.notified() => Ok(()),
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                Err(ExchangeError::ws(Venue::Onchain, "orderbook monitor failed to start within 30s"))
            }
        }
    }

    pub fn stop(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Default for OnchainOrderbookMonitor {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_loop(
    symbols: Vec<String>,
    books: Arc<RwLock<HashMap<String, Orderbook>>>,
    ready: Arc<Notify>,
    is_ready: Arc<AtomicBool>,
    shutdown: Arc<Notify>,
) {
    let mut reconnect_delay = Duration::from_secs(1);
    let max_reconnect_delay = Duration::from_secs(60);

    loop {
        tokio::select! {
            _ = shutdown.notified() => return,
            result = connect_and_stream(&symbols, &books, &ready, &is_ready, &shutdown) => {
                match result {
                    Ok(_) => reconnect_delay = Duration::from_secs(1),
                    Err(e) => {
                        warn!(error = %e, "hyperliquid_orderbook_ws_error");
                        tokio::time::sleep(reconnect_delay).await;
                        reconnect_delay = (reconnect_delay * 2).min(max_reconnect_delay);
                    }
                }
            }
        }
    }
}

async fn connect_and_stream(
    symbols: &[String],
    books: &Arc<RwLock<HashMap<String, Orderbook>>>,
    ready: &Arc<Notify>,
    is_ready: &Arc<AtomicBool>,
    shutdown: &Arc<Notify>,
) -> anyhow::Result<()> {
    info!(url = WS_URL, "hyperliquid_orderbook_monitor_connecting");
    let (ws_stream, _resp) = connect_async(WS_URL).await?;
    let (mut write, mut read) = ws_stream.split();

    for symbol in symbols {
        let sub = serde_json::json!({
            "method": "subscribe",
            "subscription": {"type": "l2Book", "coin": symbol},
        });
        write.send(Message::Text(sub.to_string())).await?;
    }
    info!(symbols = symbols.len(), "hyperliquid_orderbook_subscribe_sent");

    loop {
        tokio::select! {
            _ = shutdown.notified() => return Ok(()),
            msg = read.next() => {
                let Some(msg) = msg else {
                    return Err(anyhow::anyhow!("hyperliquid orderbook monitor ws stream ended"));
                };
                match msg? {
                    Message::Text(text) => {
                        if handle_text_message(&text, books) && !is_ready.swap(true, Ordering::SeqCst) {
                            info!("hyperliquid_orderbook_monitor_ready");
                            ready.notify_waiters();
                        }
                    }
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

fn handle_text_message(text: &str, books: &Arc<RwLock<HashMap<String, Orderbook>>>) -> bool {
    let json: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return false,
    };

    if json.get("channel").and_then(|v| v.as_str()) != Some("l2Book") {
        return false;
    }

    let data = &json["data"];
    let symbol = data["coin"].as_str().unwrap_or_default().to_string();
    if symbol.is_empty() {
        return false;
    }

    let ob = adapt_orderbook(data, &symbol);
    books.write().insert(symbol, ob);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn handle_text_message_replaces_book_wholesale() {
        let books = Arc::new(RwLock::new(HashMap::new()));
        let text = serde_json::json!({
            "channel": "l2Book",
            "data": {"coin": "BTC", "time": 123, "levels": [
                [{"px": "100", "sz": "1"}], [{"px": "101", "sz": "1"}]
            ]}
        })
        .to_string();

        assert!(handle_text_message(&text, &books));
        let ob = books.read().get("BTC").cloned().unwrap();
        assert_eq!(ob.best_bid().unwrap().price, dec!(100));
        assert_eq!(ob.best_ask().unwrap().price, dec!(101));
    }

    #[test]
    fn ignores_other_channels() {
        let books = Arc::new(RwLock::new(HashMap::new()));
        let text = serde_json::json!({"channel": "allMids", "data": {}}).to_string();
        assert!(!handle_text_message(&text, &books));
    }
}
