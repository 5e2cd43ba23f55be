//! Bot orchestrator (§4.8): wires the two Exchange Clients, the Spread
//! Finder, and the Position Manager together and drives the main scan loop.
//! Grounded on `original_source/src/arbitrage/bot.py`, generalized from its
//! Gate/Hyperliquid-specific field names to the venue-A/venue-B split this
//! engine uses throughout.

use crate::config::{Config, MinSpreadMode};
use crate::position::PositionManager;
use crate::spread::SpreadFinder;
use crate::types::{Balance, PositionClosed, Symbol};
use crate::venues::ExchangeClient;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify, RwLock, Semaphore};
use tokio::time::{sleep, Duration};

pub struct Bot {
    venue_a: Arc<dyn ExchangeClient>,
    venue_b: Arc<dyn ExchangeClient>,
    finder: SpreadFinder,
    positions: Arc<PositionManager>,
    mode: MinSpreadMode,
    symbols: RwLock<Vec<Symbol>>,
    volume_cache: RwLock<HashMap<Symbol, Decimal>>,
    balance_a: RwLock<Option<Balance>>,
    balance_b: RwLock<Option<Balance>>,
    open_permit: Semaphore,
    shutdown: Arc<Notify>,
    volume_refresh_interval: Duration,
    closed_rx: tokio::sync::Mutex<mpsc::Receiver<PositionClosed>>,
}

impl Bot {
    /// Builds the Bot and its Position Manager; does not start any network
    /// activity — call `run` for that (it performs the startup sequence
    /// described in §4.8 before entering the scan loop).
    pub fn new(config: &Config, venue_a: Arc<dyn ExchangeClient>, venue_b: Arc<dyn ExchangeClient>, shutdown: Arc<Notify>) -> Self {
        let finder = SpreadFinder::new(
            venue_a.clone(),
            venue_b.clone(),
            config.clob.taker_fee_pct,
            config.onchain.taker_fee_pct,
        );
        let (closed_tx, closed_rx) = mpsc::channel(64);
        let positions = Arc::new(PositionManager::new(venue_a.clone(), venue_b.clone(), closed_tx, shutdown.clone()));

        Self {
            venue_a,
            venue_b,
            finder,
            positions,
            mode: config.mode.clone(),
            symbols: RwLock::new(Vec::new()),
            volume_cache: RwLock::new(HashMap::new()),
            balance_a: RwLock::new(None),
            balance_b: RwLock::new(None),
            open_permit: Semaphore::new(1),
            shutdown,
            volume_refresh_interval: Duration::from_secs(config.volume_refresh_interval_secs),
            closed_rx: tokio::sync::Mutex::new(closed_rx),
        }
    }

    /// §4.8 startup sequence: symbol intersection, start all monitors,
    /// fetch balances, set leverages, optional volume filtering, start the
    /// Position Manager's close monitor.
    pub async fn start(self: &Arc<Self>) -> anyhow::Result<()> {
        let symbols_a: std::collections::BTreeSet<Symbol> = self.venue_a.get_available_symbols().into_iter().collect();
        let symbols_b: std::collections::BTreeSet<Symbol> = self.venue_b.get_available_symbols().into_iter().collect();
        let symbols: Vec<Symbol> = symbols_a.intersection(&symbols_b).cloned().collect();

        tracing::info!(symbol_count = symbols.len(), "bot_starting");

        let (balance_a, balance_b) = tokio::join!(self.venue_a.get_balance(), self.venue_b.get_balance());
        *self.balance_a.write().await = Some(balance_a?);
        *self.balance_b.write().await = Some(balance_b?);

        tracing::info!(
            balance_a = %self.balance_a.read().await.as_ref().unwrap().available,
            balance_b = %self.balance_b.read().await.as_ref().unwrap().available,
            "bot_balances_ready"
        );

        self.prepare_leverages(&symbols).await?;

        let symbols = if self.mode.min_24h_quote_volume_usd > Decimal::ZERO {
            self.filter_by_volume(symbols).await
        } else {
            symbols
        };

        let symbol_count = symbols.len();
        *self.symbols.write().await = symbols;

        self.positions.start_monitor();
        self.spawn_volume_updater();

        tracing::info!(symbol_count, "bot_ready");
        Ok(())
    }

    async fn prepare_leverages(&self, symbols: &[Symbol]) -> anyhow::Result<()> {
        let mut leverages = HashMap::new();
        for symbol in symbols {
            let Some(info_a) = self.venue_a.get_symbol_info(symbol) else { continue };
            let Some(info_b) = self.venue_b.get_symbol_info(symbol) else { continue };
            leverages.insert(symbol.clone(), info_a.max_leverage.min(info_b.max_leverage));
        }

        if leverages.is_empty() {
            return Ok(());
        }

        let count = leverages.len();
        let (res_a, res_b) = tokio::join!(self.venue_a.set_leverages(leverages.clone()), self.venue_b.set_leverages(leverages));
        res_a?;
        res_b?;
        tracing::info!(count, "bot_leverages_set");
        Ok(())
    }

    async fn filter_by_volume(&self, symbols: Vec<Symbol>) -> Vec<Symbol> {
        let min_volume = self.mode.min_24h_quote_volume_usd;
        tracing::info!(%min_volume, "bot_filtering_by_volume");

        let mut filtered = Vec::with_capacity(symbols.len());
        let mut fresh = Vec::with_capacity(symbols.len());
        for symbol in &symbols {
            match self.venue_a.get_24h_volume(symbol).await {
                Ok(volume) => {
                    fresh.push((symbol.clone(), volume.quote_volume));
                    if volume.quote_volume >= min_volume {
                        filtered.push(symbol.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!(symbol = %symbol, error = %e, "bot_volume_fetch_failed");
                }
            }
        }
        self.volume_cache.write().await.extend(fresh);

        tracing::info!(kept = filtered.len(), removed = symbols.len() - filtered.len(), "bot_volume_filtered");
        filtered
    }

    /// Background task refreshing the 24h volume cache every
    /// `volume_refresh_interval` (§4.8 "optional 24h-volume filtering with
    /// background refresh").
    pub fn spawn_volume_updater(self: &Arc<Self>) {
        if self.mode.min_24h_quote_volume_usd <= Decimal::ZERO {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = sleep(this.volume_refresh_interval) => {}
                    _ = this.shutdown.notified() => break,
                }
                let symbols = this.symbols.read().await.clone();
                let mut fresh = Vec::with_capacity(symbols.len());
                for symbol in &symbols {
                    if let Ok(volume) = this.venue_a.get_24h_volume(symbol).await {
                        fresh.push((symbol.clone(), volume.quote_volume));
                    }
                }
                let mut cache = this.volume_cache.write().await;
                cache.extend(fresh);
            }
        });
    }

    fn check_balance_available(&self, balance_a: &Balance, balance_b: &Balance, usd_size: Decimal) -> bool {
        balance_a.available >= usd_size && balance_b.available >= usd_size
    }

    async fn handle_symbol(&self, symbol: &Symbol) {
        let Some(raw) = self.finder.get_raw_spread(symbol) else { return };
        if raw.spread_pct < self.mode.entry_threshold_pct {
            return;
        }

        // Serializes position opens across all concurrently-scanned symbols,
        // mirroring `asyncio.Semaphore(1)`'s blocking `async with`.
        let _permit = self.open_permit.acquire().await.expect("semaphore never closed");

        if self.positions.has_position(symbol) {
            return;
        }

        let (balance_a, balance_b) = {
            let a = self.balance_a.read().await;
            let b = self.balance_b.read().await;
            match (*a, *b) {
                (Some(a), Some(b)) => (a, b),
                _ => return,
            }
        };
        if !self.check_balance_available(&balance_a, &balance_b, self.mode.usd_size_per_pos) {
            return;
        }

        let net = match self.finder.calculate_net_spread(symbol, self.mode.usd_size_per_pos) {
            Ok(net) => net,
            Err(e) => {
                tracing::warn!(symbol = %symbol, error = %e, "bot_net_spread_failed");
                return;
            }
        };

        let spread_pct = net.for_direction(net.best_direction).spread_pct;
        if spread_pct < self.mode.entry_threshold_pct {
            return;
        }

        tracing::info!(
            symbol = %symbol,
            direction = ?net.best_direction,
            spread_pct = %spread_pct,
            profit_usd = %net.best_profit_usd,
            "bot_opening_position"
        );

        let position = self
            .positions
            .open_position(symbol, net.best_direction, net.size, spread_pct, self.mode.clone())
            .await;

        match position {
            Some(position) => {
                let size_a_usd = position.leg_a_order.size * position.leg_a_order.fill_price + position.leg_a_order.fee;
                let size_b_usd = position.leg_b_order.size * position.leg_b_order.fill_price + position.leg_b_order.fee;
                if let Some(b) = self.balance_a.write().await.as_mut() {
                    b.available -= size_a_usd;
                }
                if let Some(b) = self.balance_b.write().await.as_mut() {
                    b.available -= size_b_usd;
                }
            }
            None => {
                self.refresh_balances().await;
            }
        }
    }

    async fn refresh_balances(&self) {
        let (balance_a, balance_b) = tokio::join!(self.venue_a.get_balance(), self.venue_b.get_balance());
        match balance_a {
            Ok(b) => *self.balance_a.write().await = Some(b),
            Err(e) => tracing::warn!(error = %e, "bot_balance_refresh_failed"),
        }
        match balance_b {
            Ok(b) => *self.balance_b.write().await = Some(b),
            Err(e) => tracing::warn!(error = %e, "bot_balance_refresh_failed"),
        }
    }

    async fn drain_closed_positions(&self) {
        let mut rx = self.closed_rx.lock().await;
        while let Ok(closed) = rx.try_recv() {
            tracing::info!(
                position_id = %closed.position_id,
                symbol = %closed.symbol,
                reason = ?closed.reason,
                net_pnl = %closed.pnl.net(),
                "bot_position_closed_observed"
            );
            self.refresh_balances().await;
        }
    }

    /// Main scan loop (§4.8): per tick, scans every tracked symbol
    /// concurrently for an entry; a 10ms sleep caps CPU usage rather than
    /// gating throughput on venue latency.
    pub async fn run(self: &Arc<Self>) {
        tracing::info!("bot_main_loop_started");
        let symbols = self.symbols.read().await.clone();
        loop {
            if !self.positions.is_emergency_stopped() {
                let tasks: Vec<_> = symbols.iter().map(|symbol| self.handle_symbol(symbol)).collect();
                futures_util::future::join_all(tasks).await;
            }

            self.drain_closed_positions().await;

            tokio::select! {
                _ = sleep(Duration::from_millis(10)) => {}
                _ = self.shutdown.notified() => break,
            }
        }
        tracing::info!("bot_main_loop_stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ClobConfig, FillEstimateConfig, OnchainConfig};
    use crate::error::{ExchangeResult, Venue};
    use crate::types::{FundingRate, Order, Orderbook, Position, Side, SymbolInfo, Volume24h};
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use rust_decimal_macros::dec;

    struct StubClient {
        venue: Venue,
        symbols: Vec<Symbol>,
        volumes: HashMap<Symbol, Decimal>,
        balance: PlMutex<Balance>,
    }

    #[async_trait]
    impl ExchangeClient for StubClient {
        fn venue(&self) -> Venue {
            self.venue
        }
        fn get_available_symbols(&self) -> Vec<Symbol> {
            self.symbols.clone()
        }
        fn get_symbol_info(&self, symbol: &str) -> Option<SymbolInfo> {
            Some(SymbolInfo { symbol: symbol.to_string(), max_leverage: 10, sz_decimals: 3, quanto_multiplier: Decimal::ONE })
        }
        async fn get_balance(&self) -> ExchangeResult<Balance> {
            Ok(*self.balance.lock())
        }
        async fn get_positions(&self) -> ExchangeResult<Vec<Position>> {
            Ok(vec![])
        }
        async fn get_funding_rate(&self, _symbol: &str) -> ExchangeResult<FundingRate> {
            unimplemented!()
        }
        async fn get_24h_volume(&self, symbol: &str) -> ExchangeResult<Volume24h> {
            let quote_volume = *self.volumes.get(symbol).unwrap_or(&Decimal::ZERO);
            Ok(Volume24h { base_volume: quote_volume, quote_volume })
        }
        async fn get_orderbook(&self, _symbol: &str, _depth: usize) -> ExchangeResult<Orderbook> {
            unimplemented!()
        }
        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> ExchangeResult<()> {
            Ok(())
        }
        async fn set_leverages(&self, _leverages: HashMap<Symbol, u32>) -> ExchangeResult<()> {
            Ok(())
        }
        async fn buy_market(&self, _symbol: &str, _size: Decimal) -> ExchangeResult<Order> {
            unimplemented!()
        }
        async fn sell_market(&self, _symbol: &str, _size: Decimal) -> ExchangeResult<Order> {
            unimplemented!()
        }
        fn get_price(&self, _symbol: &str) -> Option<Decimal> {
            None
        }
        fn has_price(&self, symbol: &str) -> bool {
            self.get_price(symbol).is_some()
        }
        fn estimate_fill_price(&self, _symbol: &str, _size: Decimal, _side: Side) -> ExchangeResult<Decimal> {
            unimplemented!()
        }
    }

    fn test_config() -> Config {
        Config {
            clob: ClobConfig { api_key: "k".into(), api_secret: "s".into(), dual_mode: true, taker_fee_pct: dec!(0.0005) },
            onchain: OnchainConfig { account_address: "0x0".into(), private_key: "pk".into(), taker_fee_pct: dec!(0.00025) },
            mode: MinSpreadMode {
                entry_threshold_pct: dec!(2.5),
                usd_size_per_pos: dec!(100),
                take_profit_spread_pct: dec!(0.5),
                stop_loss_widening_pct: dec!(2.0),
                timeout_minutes: 20,
                min_24h_quote_volume_usd: dec!(1_000_000),
            },
            fill_estimate: FillEstimateConfig::default(),
            min_balance_usd: dec!(100),
            max_positions: 5,
            volume_refresh_interval_secs: 300,
        }
    }

    fn bot_with_stubs(volumes_a: HashMap<Symbol, Decimal>) -> Arc<Bot> {
        let venue_a: Arc<dyn ExchangeClient> = Arc::new(StubClient {
            venue: Venue::Clob,
            symbols: vec!["BTC".into(), "ETH".into()],
            volumes: volumes_a,
            balance: PlMutex::new(Balance { total: dec!(1000), available: dec!(1000) }),
        });
        let venue_b: Arc<dyn ExchangeClient> = Arc::new(StubClient {
            venue: Venue::Onchain,
            symbols: vec!["BTC".into(), "ETH".into()],
            volumes: HashMap::new(),
            balance: PlMutex::new(Balance { total: dec!(1000), available: dec!(1000) }),
        });
        Arc::new(Bot::new(&test_config(), venue_a, venue_b, Arc::new(Notify::new())))
    }

    #[test]
    fn check_balance_available_requires_both_venues() {
        let bot = bot_with_stubs(HashMap::new());
        let rich = Balance { total: dec!(1000), available: dec!(500) };
        let poor = Balance { total: dec!(1000), available: dec!(10) };
        assert!(bot.check_balance_available(&rich, &rich, dec!(100)));
        assert!(!bot.check_balance_available(&rich, &poor, dec!(100)));
    }

    #[tokio::test]
    async fn filter_by_volume_drops_below_threshold() {
        let mut volumes = HashMap::new();
        volumes.insert("BTC".to_string(), dec!(2_000_000));
        volumes.insert("ETH".to_string(), dec!(10_000));
        let bot = bot_with_stubs(volumes);

        let filtered = bot.filter_by_volume(vec!["BTC".into(), "ETH".into()]).await;
        assert_eq!(filtered, vec!["BTC".to_string()]);
    }

    #[tokio::test]
    async fn start_computes_symbol_intersection_and_balances() {
        let bot = bot_with_stubs(HashMap::from([("BTC".to_string(), dec!(2_000_000)), ("ETH".to_string(), dec!(2_000_000))]));
        bot.start().await.unwrap();
        assert_eq!(bot.symbols.read().await.len(), 2);
        assert!(bot.balance_a.read().await.is_some());
        assert!(bot.balance_b.read().await.is_some());
    }
}
