//! Venue B (on-chain) exchange client: wraps the price/orderbook monitors
//! plus REST operations behind the shared `ExchangeClient` capability trait.
//! Order-payload signing is delegated to a `Signer` implementation supplied
//! by the caller (§1: ECDSA signing is out of scope here).

use crate::config::{FillEstimateConfig, OnchainConfig};
use crate::error::{ExchangeError, ExchangeResult, Venue};
use crate::types::{Balance, FundingRate, Order, Orderbook, Position, Side, Symbol, SymbolInfo, Volume24h};
use crate::venues::onchain::adapters::{
    adapt_balance, adapt_funding_rate, adapt_order, adapt_orderbook, adapt_position,
    adapt_symbol_info, adapt_volume_24h,
};
use crate::venues::onchain::orderbook_monitor::OnchainOrderbookMonitor;
use crate::venues::onchain::price_monitor::OnchainPriceMonitor;
use crate::venues::{estimate_fill_from_book, ExchangeClient, Signer};
use async_trait::async_trait;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{error, info};

const API_HOST: &str = "https://api.hyperliquid.xyz";
const META_UPDATE_INTERVAL: Duration = Duration::from_secs(300);
const LEVERAGE_CACHE_TTL: Duration = Duration::from_secs(3600);
const DEFAULT_SLIPPAGE: Decimal = dec!(0.05);

struct RestClient {
    http: reqwest::Client,
}

impl RestClient {
    fn new() -> Self {
        Self { http: reqwest::Client::new() }
    }

    async fn info(&self, body: &serde_json::Value) -> ExchangeResult<serde_json::Value> {
        let resp = self
            .http
            .post(format!("{API_HOST}/info"))
            .json(body)
            .send()
            .await
            .map_err(|e| ExchangeError::connection(Venue::Onchain, e.to_string()))?;
        resp.json().await.map_err(|e| ExchangeError::connection(Venue::Onchain, e.to_string()))
    }

    async fn exchange(&self, action: &serde_json::Value, signature: &str, nonce: i64) -> ExchangeResult<serde_json::Value> {
        let body = serde_json::json!({
            "action": action,
            "signature": signature,
            "nonce": nonce,
        });
        let resp = self
            .http
            .post(format!("{API_HOST}/exchange"))
            .json(&body)
            .send()
            .await
            .map_err(|e| ExchangeError::connection(Venue::Onchain, e.to_string()))?;
        resp.json().await.map_err(|e| ExchangeError::connection(Venue::Onchain, e.to_string()))
    }
}

struct LeverageCacheEntry {
    leverage: u32,
    set_at: Instant,
}

pub struct OnchainClient {
    rest: RestClient,
    account_address: String,
    signer: Arc<dyn Signer>,
    fill_estimate: FillEstimateConfig,
    price_monitor: OnchainPriceMonitor,
    orderbook_monitor: OnchainOrderbookMonitor,
    assets_meta: RwLock<HashMap<Symbol, serde_json::Value>>,
    leverage_cache: RwLock<HashMap<Symbol, LeverageCacheEntry>>,
    shutdown: Arc<Notify>,
}

impl OnchainClient {
    pub fn new(config: OnchainConfig, signer: Arc<dyn Signer>, fill_estimate: FillEstimateConfig) -> Self {
        let _ = &config.private_key; // consumed by the real signer, not by this client
        Self {
            rest: RestClient::new(),
            account_address: config.account_address,
            signer,
            fill_estimate,
            price_monitor: OnchainPriceMonitor::new(),
            orderbook_monitor: OnchainOrderbookMonitor::new(),
            assets_meta: RwLock::new(HashMap::new()),
            leverage_cache: RwLock::new(HashMap::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub async fn start(self: &Arc<Self>) -> ExchangeResult<()> {
        info!("onchain_client_starting");
        self.refresh_meta().await?;

        let symbols: Vec<String> = self.assets_meta.read().keys().cloned().collect();
        self.price_monitor.start().await?;
        self.orderbook_monitor.start(symbols.clone()).await?;

        self.spawn_meta_updater();
        info!(symbols = symbols.len(), "onchain_client_started");
        Ok(())
    }

    fn spawn_meta_updater(self: &Arc<Self>) {
        let this = self.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => return,
                    _ = tokio::time::sleep(META_UPDATE_INTERVAL) => {
                        if let Err(e) = this.refresh_meta().await {
                            error!(error = %e, "meta_refresh_error");
                        }
                    }
                }
            }
        });
    }

    async fn refresh_meta(&self) -> ExchangeResult<()> {
        let meta = fetch_meta(&self.rest).await?;
        *self.assets_meta.write() = meta;
        Ok(())
    }
}

async fn fetch_meta(rest: &RestClient) -> ExchangeResult<HashMap<Symbol, serde_json::Value>> {
    let raw = rest.info(&serde_json::json!({"type": "metaAndAssetCtxs"})).await?;
    let universe = raw
        .get(0)
        .and_then(|m| m["universe"].as_array())
        .cloned()
        .unwrap_or_default();

    let mut cache = HashMap::new();
    for asset in universe {
        if asset["isDelisted"].as_bool().unwrap_or(false) {
            continue;
        }
        if let Some(name) = asset["name"].as_str() {
            cache.insert(name.to_string(), asset.clone());
        }
    }
    info!(count = cache.len(), "hyperliquid_meta_refreshed");
    Ok(cache)
}

#[async_trait]
impl ExchangeClient for OnchainClient {
    fn venue(&self) -> Venue {
        Venue::Onchain
    }

    fn get_available_symbols(&self) -> Vec<Symbol> {
        self.assets_meta.read().keys().cloned().collect()
    }

    fn get_symbol_info(&self, symbol: &str) -> Option<SymbolInfo> {
        let raw = self.assets_meta.read().get(symbol)?.clone();
        Some(adapt_symbol_info(&raw))
    }

    async fn get_balance(&self) -> ExchangeResult<Balance> {
        let state = self
            .rest
            .info(&serde_json::json!({"type": "clearinghouseState", "user": self.account_address}))
            .await?;
        Ok(adapt_balance(&state))
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<Position>> {
        let state = self
            .rest
            .info(&serde_json::json!({"type": "clearinghouseState", "user": self.account_address}))
            .await?;
        Ok(state["assetPositions"]
            .as_array()
            .into_iter()
            .flatten()
            .map(adapt_position)
            .filter(|p| !p.size.is_zero())
            .collect())
    }

    async fn get_funding_rate(&self, symbol: &str) -> ExchangeResult<FundingRate> {
        let raw = self.rest.info(&serde_json::json!({"type": "metaAndAssetCtxs"})).await?;
        let universe = raw.get(0).and_then(|m| m["universe"].as_array()).cloned().unwrap_or_default();
        let ctxs = raw.get(1).and_then(|c| c.as_array()).cloned().unwrap_or_default();
        let idx = universe
            .iter()
            .position(|a| a["name"].as_str() == Some(symbol))
            .ok_or_else(|| ExchangeError::invalid_symbol(Venue::Onchain, symbol))?;
        let ctx = ctxs.get(idx).ok_or_else(|| ExchangeError::invalid_symbol(Venue::Onchain, symbol))?;
        let now = chrono::Utc::now().timestamp();
        Ok(adapt_funding_rate(ctx, now))
    }

    async fn get_24h_volume(&self, symbol: &str) -> ExchangeResult<Volume24h> {
        let raw = self.rest.info(&serde_json::json!({"type": "metaAndAssetCtxs"})).await?;
        let universe = raw.get(0).and_then(|m| m["universe"].as_array()).cloned().unwrap_or_default();
        let ctxs = raw.get(1).and_then(|c| c.as_array()).cloned().unwrap_or_default();
        let idx = universe
            .iter()
            .position(|a| a["name"].as_str() == Some(symbol))
            .ok_or_else(|| ExchangeError::invalid_symbol(Venue::Onchain, symbol))?;
        let ctx = ctxs.get(idx).ok_or_else(|| ExchangeError::invalid_symbol(Venue::Onchain, symbol))?;
        Ok(adapt_volume_24h(ctx))
    }

    async fn get_orderbook(&self, symbol: &str, depth: usize) -> ExchangeResult<Orderbook> {
        let raw = self.rest.info(&serde_json::json!({"type": "l2Book", "coin": symbol})).await?;
        let mut book = adapt_orderbook(&raw, symbol);
        let bids: Vec<_> = book.bids.into_iter().rev().take(depth).collect();
        let asks: Vec<_> = book.asks.into_iter().take(depth).collect();
        book.bids = bids.into_iter().collect();
        book.asks = asks.into_iter().collect();
        Ok(book)
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        {
            let cache = self.leverage_cache.read();
            if let Some(entry) = cache.get(symbol) {
                if entry.leverage == leverage && entry.set_at.elapsed() < LEVERAGE_CACHE_TTL {
                    return Ok(());
                }
            }
        }

        let action = serde_json::json!({
            "type": "updateLeverage",
            "asset": symbol,
            "isCross": true,
            "leverage": leverage,
        });
        let nonce = chrono::Utc::now().timestamp_millis();
        let signature = self.signer.sign_l1_action(&action)?;
        let resp = self.rest.exchange(&action, &signature, nonce).await?;
        if resp["status"].as_str() != Some("ok") {
            return Err(ExchangeError::order(Venue::Onchain, format!("failed to set leverage for {symbol}")));
        }

        self.leverage_cache
            .write()
            .insert(symbol.to_string(), LeverageCacheEntry { leverage, set_at: Instant::now() });
        info!(symbol = %symbol, leverage, "hyperliquid_leverage_set");
        Ok(())
    }

    async fn set_leverages(&self, leverages: HashMap<Symbol, u32>) -> ExchangeResult<()> {
        let futures = leverages.into_iter().map(|(symbol, lev)| self.set_leverage(&symbol, lev));
        let results = futures_util::future::join_all(futures).await;
        results.into_iter().collect::<ExchangeResult<Vec<()>>>().map(|_| ())
    }

    async fn buy_market(&self, symbol: &str, size: Decimal) -> ExchangeResult<Order> {
        self.market_order(symbol, size, Side::Long).await
    }

    async fn sell_market(&self, symbol: &str, size: Decimal) -> ExchangeResult<Order> {
        self.market_order(symbol, size, Side::Short).await
    }

    fn get_price(&self, symbol: &str) -> Option<Decimal> {
        self.price_monitor.get_price(symbol)
    }

    fn has_price(&self, symbol: &str) -> bool {
        self.price_monitor.has_price(symbol)
    }

    fn estimate_fill_price(&self, symbol: &str, size: Decimal, side: Side) -> ExchangeResult<Decimal> {
        let book = self
            .orderbook_monitor
            .get_orderbook(symbol)
            .ok_or_else(|| ExchangeError::order(Venue::Onchain, format!("no orderbook data for {symbol}")))?;
        estimate_fill_from_book(&book, size, side, self.fill_estimate.tail_slippage_pct)
            .ok_or_else(|| ExchangeError::order(Venue::Onchain, format!("no orderbook data for {symbol}")))
    }
}

impl OnchainClient {
    /// Builds an aggressive IOC limit order around the current reference
    /// price, the way `market_open` fakes a market order on a pure limit-book
    /// venue: walk `slippage` past the touch so the order is marketable.
    async fn market_order(&self, symbol: &str, size: Decimal, side: Side) -> ExchangeResult<Order> {
        let is_buy = side == Side::Long;
        let reference_price = self
            .price_monitor
            .get_price(symbol)
            .ok_or_else(|| ExchangeError::order(Venue::Onchain, format!("no reference price for {symbol}")))?;
        let limit_price = if is_buy {
            reference_price * (Decimal::ONE + DEFAULT_SLIPPAGE)
        } else {
            reference_price * (Decimal::ONE - DEFAULT_SLIPPAGE)
        };

        let action = serde_json::json!({
            "type": "order",
            "orders": [{
                "a": symbol,
                "b": is_buy,
                "p": limit_price.to_string(),
                "s": size.abs().to_string(),
                "r": false,
                "t": {"limit": {"tif": "Ioc"}},
            }],
            "grouping": "na",
        });
        let nonce = chrono::Utc::now().timestamp_millis();
        let signature = self.signer.sign_l1_action(&action)?;
        let raw = self
            .rest
            .exchange(&action, &signature, nonce)
            .await
            .map_err(|e| ExchangeError::order(Venue::Onchain, e.to_string()))?;

        let order = adapt_order(&raw, symbol, size.abs(), side);
        info!(symbol = %symbol, size = %size, fill_price = %order.fill_price, "hyperliquid_market_order");
        Ok(order)
    }
}
