//! Venue A (CLOB) exchange client: wraps the price/orderbook monitors plus
//! REST operations behind the shared `ExchangeClient` capability trait.

use crate::config::{ClobConfig, FillEstimateConfig};
use crate::error::{ExchangeError, ExchangeResult, Venue};
use crate::types::{Balance, FundingRate, Order, Orderbook, Position, Side, Symbol, SymbolInfo, Volume24h};
use crate::venues::clob::adapters::{
    adapt_balance, adapt_funding_rate, adapt_order, adapt_orderbook, adapt_position,
    adapt_symbol_info, adapt_volume_24h, denormalize_symbol,
};
use crate::venues::clob::orderbook_monitor::{ClobOrderbookMonitor, RawSnapshot, SnapshotSource};
use crate::venues::clob::price_monitor::ClobPriceMonitor;
use crate::venues::{estimate_fill_from_book, ExchangeClient};
use async_trait::async_trait;
use hmac::{Hmac, Mac};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use sha2::Sha512;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{error, info};

const API_HOST: &str = "https://api.gateio.ws/api/v4";
const SETTLE: &str = "usdt";
const CONTRACTS_CACHE_INTERVAL: Duration = Duration::from_secs(300);
const LEVERAGE_CACHE_TTL: Duration = Duration::from_secs(3600);

type HmacSha512 = Hmac<Sha512>;

struct RestClient {
    http: reqwest::Client,
    api_key: String,
    api_secret: String,
}

impl RestClient {
    fn new(api_key: String, api_secret: String) -> Self {
        Self { http: reqwest::Client::new(), api_key, api_secret }
    }

    /// HMAC-SHA512 request signing, the same primitive the teacher uses to
    /// sign Polymarket CLOB requests (`hmac`+`sha2`+timestamp+body digest).
    fn sign(&self, method: &str, path: &str, query: &str, body: &str, timestamp: i64) -> String {
        let hashed_payload = {
            use sha2::Digest;
            hex::encode(sha2::Sha512::digest(body.as_bytes()))
        };
        let payload = format!("{method}\n{path}\n{query}\n{hashed_payload}\n{timestamp}");
        let mut mac = HmacSha512::new_from_slice(self.api_secret.as_bytes())
            .expect("hmac accepts key of any length");
        mac.update(payload.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    async fn get(&self, path: &str, query: &str) -> ExchangeResult<serde_json::Value> {
        let timestamp = chrono::Utc::now().timestamp();
        let sign = self.sign("GET", path, query, "", timestamp);
        let url = if query.is_empty() {
            format!("{API_HOST}{path}")
        } else {
            format!("{API_HOST}{path}?{query}")
        };
        let resp = self
            .http
            .get(&url)
            .header("KEY", &self.api_key)
            .header("Timestamp", timestamp.to_string())
            .header("SIGN", sign)
            .send()
            .await
            .map_err(|e| ExchangeError::connection(Venue::Clob, e.to_string()))?;
        resp.json().await.map_err(|e| ExchangeError::connection(Venue::Clob, e.to_string()))
    }

    async fn post(&self, path: &str, body: &serde_json::Value) -> ExchangeResult<serde_json::Value> {
        let timestamp = chrono::Utc::now().timestamp();
        let body_str = body.to_string();
        let sign = self.sign("POST", path, "", &body_str, timestamp);
        let resp = self
            .http
            .post(format!("{API_HOST}{path}"))
            .header("KEY", &self.api_key)
            .header("Timestamp", timestamp.to_string())
            .header("SIGN", sign)
            .json(body)
            .send()
            .await
            .map_err(|e| ExchangeError::connection(Venue::Clob, e.to_string()))?;
        resp.json().await.map_err(|e| ExchangeError::connection(Venue::Clob, e.to_string()))
    }
}

struct LeverageCacheEntry {
    leverage: u32,
    set_at: Instant,
}

pub struct ClobClient {
    rest: Arc<RestClient>,
    dual_mode: bool,
    fill_estimate: FillEstimateConfig,
    price_monitor: ClobPriceMonitor,
    orderbook_monitor: ClobOrderbookMonitor,
    contracts_meta: RwLock<HashMap<Symbol, serde_json::Value>>,
    leverage_cache: RwLock<HashMap<Symbol, LeverageCacheEntry>>,
    shutdown: Arc<Notify>,
}

struct RestSnapshotSource {
    rest: Arc<RestClient>,
}

#[async_trait]
impl SnapshotSource for RestSnapshotSource {
    async fn fetch_snapshot(&self, symbol: &str) -> ExchangeResult<RawSnapshot> {
        let contract = denormalize_symbol(symbol);
        let query = format!("contract={contract}&settle={SETTLE}&limit=100&with_id=true");
        let raw = self.rest.get("/futures/usdt/order_book", &query).await?;
        let ob = adapt_orderbook(&raw, symbol);
        Ok(RawSnapshot {
            base_id: raw["id"].as_i64().unwrap_or(0),
            bids: ob.bids.into_iter().map(|(price, size)| crate::types::OrderbookLevel { price, size }).collect(),
            asks: ob.asks.into_iter().map(|(price, size)| crate::types::OrderbookLevel { price, size }).collect(),
            timestamp_ms: ob.timestamp,
        })
    }
}

impl ClobClient {
    pub fn new(config: ClobConfig, fill_estimate: FillEstimateConfig) -> Self {
        let rest = Arc::new(RestClient::new(config.api_key.clone(), config.api_secret.clone()));
        Self {
            orderbook_monitor: ClobOrderbookMonitor::new(Arc::new(RestSnapshotSource { rest: rest.clone() })),
            rest,
            dual_mode: config.dual_mode,
            fill_estimate,
            price_monitor: ClobPriceMonitor::new(),
            contracts_meta: RwLock::new(HashMap::new()),
            leverage_cache: RwLock::new(HashMap::new()),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub async fn start(self: &Arc<Self>) -> ExchangeResult<()> {
        info!("clob_client_starting");
        self.refresh_contracts().await?;
        self.enforce_position_mode().await?;

        let contracts: Vec<String> = self.contracts_meta.read().keys().cloned().collect();
        let symbols: Vec<String> = contracts
            .iter()
            .map(|c| crate::venues::clob::adapters::normalize_symbol(c))
            .collect();
        self.price_monitor.start(contracts.clone()).await?;
        self.orderbook_monitor.start(symbols.clone()).await?;

        self.spawn_contracts_updater();
        info!(contracts = contracts.len(), "clob_client_started");
        Ok(())
    }

    fn spawn_contracts_updater(self: &Arc<Self>) {
        let this = self.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.notified() => return,
                    _ = tokio::time::sleep(CONTRACTS_CACHE_INTERVAL) => {
                        if let Err(e) = this.refresh_contracts().await {
                            error!(error = %e, "contracts_refresh_error");
                        }
                    }
                }
            }
        });
    }

    async fn refresh_contracts(&self) -> ExchangeResult<()> {
        let cache = refresh_contracts_into(&self.rest).await?;
        *self.contracts_meta.write() = cache;
        Ok(())
    }

    async fn enforce_position_mode(&self) -> ExchangeResult<()> {
        let account = self.rest.get(&format!("/futures/{SETTLE}/accounts"), "").await?;
        let current_dual = account["in_dual_mode"].as_bool().unwrap_or(false)
            || account["enable_new_dual_mode"].as_bool().unwrap_or(false);

        if current_dual != self.dual_mode {
            let positions = self.rest.get(&format!("/futures/{SETTLE}/positions"), "").await?;
            let has_open = positions
                .as_array()
                .map(|ps| ps.iter().any(|p| p["size"].as_i64().unwrap_or(0) != 0))
                .unwrap_or(false);
            if has_open {
                return Err(ExchangeError::order(
                    Venue::Clob,
                    "cannot switch position mode: close all positions first",
                ));
            }
            self.rest
                .post(
                    &format!("/futures/{SETTLE}/dual_mode"),
                    &serde_json::json!({"dual_mode": self.dual_mode}),
                )
                .await?;
            info!(dual_mode = self.dual_mode, "position_mode_set");
        }
        Ok(())
    }
}

async fn refresh_contracts_into(
    rest: &Arc<RestClient>,
) -> ExchangeResult<HashMap<Symbol, serde_json::Value>> {
    let contracts = rest.get(&format!("/futures/{SETTLE}/contracts"), "").await?;
    let mut cache = HashMap::new();
    if let Some(arr) = contracts.as_array() {
        for c in arr {
            if let Some(name) = c["name"].as_str() {
                cache.insert(name.to_string(), c.clone());
            }
        }
    }
    info!(count = cache.len(), "contracts_refreshed");
    Ok(cache)
}

#[async_trait]
impl ExchangeClient for ClobClient {
    fn venue(&self) -> Venue {
        Venue::Clob
    }

    fn get_available_symbols(&self) -> Vec<Symbol> {
        self.contracts_meta
            .read()
            .keys()
            .map(|contract| crate::venues::clob::adapters::normalize_symbol(contract))
            .collect()
    }

    fn get_symbol_info(&self, symbol: &str) -> Option<SymbolInfo> {
        let contract = denormalize_symbol(symbol);
        let raw = self.contracts_meta.read().get(&contract)?.clone();
        Some(adapt_symbol_info(&raw, symbol))
    }

    async fn get_balance(&self) -> ExchangeResult<Balance> {
        let raw = self.rest.get(&format!("/futures/{SETTLE}/accounts"), "").await?;
        Ok(adapt_balance(&raw))
    }

    async fn get_positions(&self) -> ExchangeResult<Vec<Position>> {
        let raw = self.rest.get(&format!("/futures/{SETTLE}/positions"), "").await?;
        Ok(raw
            .as_array()
            .into_iter()
            .flatten()
            .filter_map(adapt_position)
            .collect())
    }

    async fn get_funding_rate(&self, symbol: &str) -> ExchangeResult<FundingRate> {
        let contract = denormalize_symbol(symbol);
        let query = format!("contract={contract}&limit=1");
        let raw = self
            .rest
            .get(&format!("/futures/{SETTLE}/funding_rate"), &query)
            .await?;
        let first = raw
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| ExchangeError::order(Venue::Clob, format!("no funding rate data for {symbol}")))?;
        Ok(adapt_funding_rate(first))
    }

    async fn get_24h_volume(&self, symbol: &str) -> ExchangeResult<Volume24h> {
        let contract = denormalize_symbol(symbol);
        let query = format!("contract={contract}");
        let raw = self.rest.get(&format!("/futures/{SETTLE}/tickers"), &query).await?;
        let first = raw
            .as_array()
            .and_then(|a| a.first())
            .ok_or_else(|| ExchangeError::order(Venue::Clob, format!("no ticker data for {symbol}")))?;
        Ok(adapt_volume_24h(first))
    }

    async fn get_orderbook(&self, symbol: &str, depth: usize) -> ExchangeResult<Orderbook> {
        let contract = denormalize_symbol(symbol);
        let query = format!("contract={contract}&limit={depth}");
        let raw = self
            .rest
            .get(&format!("/futures/{SETTLE}/order_book"), &query)
            .await?;
        Ok(adapt_orderbook(&raw, symbol))
    }

    async fn set_leverage(&self, symbol: &str, leverage: u32) -> ExchangeResult<()> {
        let contract = denormalize_symbol(symbol);
        {
            let cache = self.leverage_cache.read();
            if let Some(entry) = cache.get(&contract) {
                if entry.leverage == leverage && entry.set_at.elapsed() < LEVERAGE_CACHE_TTL {
                    return Ok(());
                }
            }
        }

        self.rest
            .post(
                &format!("/futures/{SETTLE}/positions/{contract}/leverage"),
                &serde_json::json!({"leverage": leverage.to_string()}),
            )
            .await?;

        self.leverage_cache
            .write()
            .insert(contract, LeverageCacheEntry { leverage, set_at: Instant::now() });
        info!(symbol = %symbol, leverage, "leverage_set");
        Ok(())
    }

    async fn set_leverages(&self, leverages: HashMap<Symbol, u32>) -> ExchangeResult<()> {
        let futures = leverages
            .into_iter()
            .map(|(symbol, lev)| self.set_leverage(&symbol, lev));
        let results = futures_util::future::join_all(futures).await;
        results.into_iter().collect::<ExchangeResult<Vec<()>>>().map(|_| ())
    }

    async fn buy_market(&self, symbol: &str, size: Decimal) -> ExchangeResult<Order> {
        let contract = denormalize_symbol(symbol);
        let body = serde_json::json!({
            "contract": contract,
            "size": size.trunc().to_string(),
            "price": "0",
            "tif": "ioc",
        });
        let raw = self.rest.post(&format!("/futures/{SETTLE}/orders"), &body).await?;
        let order = adapt_order(&raw);
        info!(symbol = %symbol, size = %size, fill_price = %order.fill_price, "buy_market_success");
        Ok(order)
    }

    async fn sell_market(&self, symbol: &str, size: Decimal) -> ExchangeResult<Order> {
        let contract = denormalize_symbol(symbol);
        let body = serde_json::json!({
            "contract": contract,
            "size": (-size.abs().trunc()).to_string(),
            "price": "0",
            "tif": "ioc",
        });
        let raw = self.rest.post(&format!("/futures/{SETTLE}/orders"), &body).await?;
        let order = adapt_order(&raw);
        info!(symbol = %symbol, size = %size, fill_price = %order.fill_price, "sell_market_success");
        Ok(order)
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
            .ok_or_else(|| ExchangeError::order(Venue::Clob, format!("no orderbook data for {symbol}")))?;
        estimate_fill_from_book(&book, size, side, self.fill_estimate.tail_slippage_pct)
            .ok_or_else(|| ExchangeError::order(Venue::Clob, format!("no orderbook data for {symbol}")))
    }
}
