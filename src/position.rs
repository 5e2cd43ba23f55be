//! Position Manager (§4.7): atomic two-legged open/close and a background
//! close-condition monitor. Grounded on
//! `original_source/src/strategy/arbitrage.py` (`_execute_arbitrage`,
//! `_close_position`, `_monitor_positions_loop`, `_verify_positions_consistency`)
//! rather than the weaker generic `original_source/src/arbitrage/
//! position_manager.py`, since only the former implements partial-failure
//! compensation and desync detection (see DESIGN.md).

use crate::config::MinSpreadMode;
use crate::error::ExchangeResult;
use crate::types::{
    ArbitragePosition, CloseReason, Order, PositionClosed, PositionStatus, RealizedPnl, Side,
    SpreadDirection, Symbol,
};
use crate::venues::ExchangeClient;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

const CLOSE_MONITOR_TICK: Duration = Duration::from_millis(100);
const CONSISTENCY_CHECK_INTERVAL: Duration = Duration::from_secs(60);

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

async fn place(venue: &dyn ExchangeClient, symbol: &str, size: Decimal, side: Side) -> ExchangeResult<Order> {
    match side {
        Side::Long => venue.buy_market(symbol, size).await,
        Side::Short => venue.sell_market(symbol, size).await,
    }
}

/// Legs open in opposite directions: `VenueAShort` sells A and buys B.
fn open_sides(direction: SpreadDirection) -> (Side, Side) {
    match direction {
        SpreadDirection::VenueAShort => (Side::Short, Side::Long),
        SpreadDirection::VenueBShort => (Side::Long, Side::Short),
    }
}

fn compute_realized_pnl(position: &ArbitragePosition, close_a: &Order, close_b: &Order, fees: Decimal) -> RealizedPnl {
    let entry_a = position.leg_a_order.fill_price;
    let entry_b = position.leg_b_order.fill_price;
    let exit_a = close_a.fill_price;
    let exit_b = close_b.fill_price;
    let size_a = position.leg_a_order.size;
    let size_b = position.leg_b_order.size;

    let (pnl_a, pnl_b) = match position.direction {
        SpreadDirection::VenueAShort => ((entry_a - exit_a) * size_a, (exit_b - entry_b) * size_b),
        SpreadDirection::VenueBShort => ((exit_a - entry_a) * size_a, (entry_b - exit_b) * size_b),
    };

    RealizedPnl { pnl_a, pnl_b, fees }
}

pub struct PositionManager {
    venue_a: Arc<dyn ExchangeClient>,
    venue_b: Arc<dyn ExchangeClient>,
    positions: RwLock<HashMap<String, ArbitragePosition>>,
    close_notify: Notify,
    closed_tx: mpsc::Sender<PositionClosed>,
    shutdown: Arc<Notify>,
    emergency_stop: AtomicBool,
}

impl PositionManager {
    pub fn new(
        venue_a: Arc<dyn ExchangeClient>,
        venue_b: Arc<dyn ExchangeClient>,
        closed_tx: mpsc::Sender<PositionClosed>,
        shutdown: Arc<Notify>,
    ) -> Self {
        Self {
            venue_a,
            venue_b,
            positions: RwLock::new(HashMap::new()),
            close_notify: Notify::new(),
            closed_tx,
            shutdown,
            emergency_stop: AtomicBool::new(false),
        }
    }

    pub fn is_emergency_stopped(&self) -> bool {
        self.emergency_stop.load(Ordering::SeqCst)
    }

    pub fn has_position(&self, symbol: &str) -> bool {
        self.positions
            .read()
            .values()
            .any(|p| p.symbol == symbol && p.status == PositionStatus::Open)
    }

    pub fn get_position(&self, position_id: &str) -> Option<ArbitragePosition> {
        self.positions.read().get(position_id).cloned()
    }

    pub fn open_positions(&self) -> Vec<ArbitragePosition> {
        self.positions
            .read()
            .values()
            .filter(|p| p.status == PositionStatus::Open)
            .cloned()
            .collect()
    }

    pub fn all_positions(&self) -> Vec<ArbitragePosition> {
        self.positions.read().values().cloned().collect()
    }

    /// Opens both legs concurrently. Returns `None` if either leg fails — the
    /// surviving leg is closed as compensation before returning, per §4.7's
    /// four-outcome contract. Never holds the bot's open-semaphore (it isn't
    /// passed in here at all).
    pub async fn open_position(
        &self,
        symbol: &Symbol,
        direction: SpreadDirection,
        size: Decimal,
        entry_spread_pct: Decimal,
        mode: MinSpreadMode,
    ) -> Option<ArbitragePosition> {
        let position_id = Uuid::new_v4().to_string();
        let (a_side, b_side) = open_sides(direction);

        let (leg_a_res, leg_b_res) = tokio::join!(
            place(self.venue_a.as_ref(), symbol, size, a_side),
            place(self.venue_b.as_ref(), symbol, size, b_side),
        );

        match (leg_a_res, leg_b_res) {
            (Ok(leg_a), Ok(leg_b)) => {
                let position = ArbitragePosition {
                    position_id,
                    symbol: symbol.clone(),
                    leg_a_order: leg_a,
                    leg_b_order: leg_b,
                    direction,
                    entry_spread_pct,
                    open_time_ms: now_ms(),
                    mode,
                    status: PositionStatus::Open,
                };
                self.positions.write().insert(position.position_id.clone(), position.clone());
                self.close_notify.notify_one();
                tracing::info!(
                    position_id = %position.position_id,
                    symbol = %symbol,
                    direction = ?direction,
                    size = %size,
                    "pos_open_success"
                );
                Some(position)
            }
            (Ok(leg_a), Err(e)) => {
                tracing::error!(position_id = %position_id, symbol = %symbol, error = %e, "pos_open_leg_b_failed");
                if let Err(comp_err) = place(self.venue_a.as_ref(), symbol, leg_a.size, a_side.opposite()).await {
                    tracing::error!(
                        event = "CRITICAL_UNRECONCILED",
                        position_id = %position_id,
                        symbol = %symbol,
                        error = %comp_err,
                        "pos_open_compensation_failed"
                    );
                }
                None
            }
            (Err(e), Ok(leg_b)) => {
                tracing::error!(position_id = %position_id, symbol = %symbol, error = %e, "pos_open_leg_a_failed");
                if let Err(comp_err) = place(self.venue_b.as_ref(), symbol, leg_b.size, b_side.opposite()).await {
                    tracing::error!(
                        event = "CRITICAL_UNRECONCILED",
                        position_id = %position_id,
                        symbol = %symbol,
                        error = %comp_err,
                        "pos_open_compensation_failed"
                    );
                }
                None
            }
            (Err(ea), Err(eb)) => {
                tracing::warn!(position_id = %position_id, symbol = %symbol, error_a = %ea, error_b = %eb, "pos_open_both_legs_failed");
                None
            }
        }
    }

    /// Closes both legs concurrently and removes the position on success. On
    /// partial failure the position is left in the map with `Failed` status
    /// instead of removed, so a later consistency pass (or the emergency
    /// utility) can still find it (§9 Open Question 3).
    pub async fn close_position(&self, position_id: &str, reason: CloseReason) -> Option<RealizedPnl> {
        let position = self.positions.read().get(position_id).cloned()?;

        let (a_close_side, b_close_side) = {
            let (a_open, b_open) = open_sides(position.direction);
            (a_open.opposite(), b_open.opposite())
        };
        let size_a = position.leg_a_order.size;
        let size_b = position.leg_b_order.size;

        let (close_a_res, close_b_res) = tokio::join!(
            place(self.venue_a.as_ref(), &position.symbol, size_a, a_close_side),
            place(self.venue_b.as_ref(), &position.symbol, size_b, b_close_side),
        );

        match (close_a_res, close_b_res) {
            (Ok(close_a), Ok(close_b)) => {
                self.positions.write().remove(position_id);

                let fees = position.leg_a_order.fee + position.leg_b_order.fee + close_a.fee + close_b.fee;
                let pnl = compute_realized_pnl(&position, &close_a, &close_b, fees);

                tracing::info!(
                    position_id = %position_id,
                    symbol = %position.symbol,
                    reason = ?reason,
                    net_pnl = %pnl.net(),
                    "position_closed"
                );

                let _ = self
                    .closed_tx
                    .send(PositionClosed {
                        position_id: position_id.to_string(),
                        symbol: position.symbol.clone(),
                        reason,
                        pnl,
                    })
                    .await;

                Some(pnl)
            }
            (a_res, b_res) => {
                tracing::error!(
                    event = "CRITICAL_UNRECONCILED",
                    position_id = %position_id,
                    symbol = %position.symbol,
                    leg_a_closed = a_res.is_ok(),
                    leg_b_closed = b_res.is_ok(),
                    "critical_close_failure"
                );
                if let Some(p) = self.positions.write().get_mut(position_id) {
                    p.status = PositionStatus::Failed;
                }
                self.emergency_stop.store(true, Ordering::SeqCst);
                tracing::error!(
                    event = "emergency_stop_activated",
                    position_id = %position_id,
                    "Bot stopped due to partial position close. Manual intervention required."
                );
                None
            }
        }
    }

    /// Unsigned mid-relative spread for `symbol`, same formula as the raw
    /// spread the Spread Finder computes (§4.6) — local price-monitor reads
    /// only, no book walk.
    fn current_spread_pct(&self, symbol: &str) -> Option<Decimal> {
        let price_a = self.venue_a.get_price(symbol)?;
        let price_b = self.venue_b.get_price(symbol)?;
        let mid = (price_a + price_b) / dec!(2);
        if mid.is_zero() {
            return None;
        }
        Some((price_a - price_b).abs() / mid * dec!(100))
    }

    async fn check_close_conditions(&self) {
        let snapshot = self.open_positions();
        let now = now_ms();

        for position in snapshot {
            let Some(current) = self.current_spread_pct(&position.symbol) else {
                continue;
            };
            let age_minutes = (now - position.open_time_ms) / 60_000;

            let reason = if current <= position.mode.take_profit_spread_pct {
                Some(CloseReason::TakeProfit)
            } else if current >= position.entry_spread_pct + position.mode.stop_loss_widening_pct {
                Some(CloseReason::StopLoss)
            } else if age_minutes >= position.mode.timeout_minutes as i64 {
                Some(CloseReason::Timeout)
            } else {
                None
            };

            if let Some(reason) = reason {
                self.close_position(&position.position_id, reason).await;
            }
        }
    }

    /// Periodic desync check (§4.7 "desynced position map"): a position
    /// tracked here with a leg missing on the venue itself means a leg was
    /// closed out-of-band (liquidation, manual intervention). Closes the
    /// surviving leg, marks the position `Failed`, and trips the emergency
    /// stop flag.
    async fn verify_consistency(&self) {
        let open = self.open_positions();
        if open.is_empty() {
            return;
        }

        let (a_positions, b_positions) = tokio::join!(self.venue_a.get_positions(), self.venue_b.get_positions());
        let a_positions = match a_positions {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "consistency_check_fetch_failed");
                return;
            }
        };
        let b_positions = match b_positions {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(error = %e, "consistency_check_fetch_failed");
                return;
            }
        };

        for position in open {
            let has_a = a_positions.iter().any(|p| p.symbol == position.symbol && !p.size.is_zero());
            let has_b = b_positions.iter().any(|p| p.symbol == position.symbol && !p.size.is_zero());
            if has_a && has_b {
                continue;
            }

            tracing::error!(
                position_id = %position.position_id,
                symbol = %position.symbol,
                has_a,
                has_b,
                "position_inconsistency_detected"
            );
            self.handle_partial_close(&position, has_a, has_b).await;
        }
    }

    async fn handle_partial_close(&self, position: &ArbitragePosition, has_a: bool, has_b: bool) {
        tracing::error!(position_id = %position.position_id, "handling_partial_close");
        let (a_open, b_open) = open_sides(position.direction);

        if has_a {
            if let Err(e) = place(self.venue_a.as_ref(), &position.symbol, position.leg_a_order.size, a_open.opposite()).await {
                tracing::error!(
                    event = "CRITICAL_UNRECONCILED",
                    position_id = %position.position_id,
                    error = %e,
                    "orphaned_leg_close_failed"
                );
            }
        }
        if has_b {
            if let Err(e) = place(self.venue_b.as_ref(), &position.symbol, position.leg_b_order.size, b_open.opposite()).await {
                tracing::error!(
                    event = "CRITICAL_UNRECONCILED",
                    position_id = %position.position_id,
                    error = %e,
                    "orphaned_leg_close_failed"
                );
            }
        }

        if let Some(p) = self.positions.write().get_mut(&position.position_id) {
            p.status = PositionStatus::Failed;
        }
        self.emergency_stop.store(true, Ordering::SeqCst);
        tracing::error!(
            event = "emergency_stop_activated",
            position_id = %position.position_id,
            "Bot stopped due to position inconsistency. Manual intervention required."
        );
    }

    /// Spawns the close-condition monitor (event-or-100ms-tick) and the
    /// periodic consistency check (60s). Both exit once `shutdown` fires.
    pub fn start_monitor(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = this.close_notify.notified() => {}
                    _ = tokio::time::sleep(CLOSE_MONITOR_TICK) => {}
                    _ = this.shutdown.notified() => break,
                }
                this.check_close_conditions().await;
            }
        });

        let this = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(CONSISTENCY_CHECK_INTERVAL) => {}
                    _ = this.shutdown.notified() => break,
                }
                this.verify_consistency().await;
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExchangeError, Venue};
    use crate::types::{Balance, FundingRate, Orderbook, Position, SymbolInfo, Volume24h};
    use async_trait::async_trait;
    use parking_lot::Mutex as PlMutex;
    use rust_decimal_macros::dec;

    struct StubClient {
        venue: Venue,
        price: PlMutex<Option<Decimal>>,
        fail_buy: PlMutex<bool>,
        fail_sell: PlMutex<bool>,
        fill_price: PlMutex<Decimal>,
        fee: Decimal,
        positions: PlMutex<Vec<Position>>,
        orders_placed: PlMutex<Vec<(Side, Decimal)>>,
    }

    impl StubClient {
        fn new(venue: Venue, price: Decimal, fill_price: Decimal, fee: Decimal) -> Self {
            Self {
                venue,
                price: PlMutex::new(Some(price)),
                fail_buy: PlMutex::new(false),
                fail_sell: PlMutex::new(false),
                fill_price: PlMutex::new(fill_price),
                fee,
                positions: PlMutex::new(vec![]),
                orders_placed: PlMutex::new(vec![]),
            }
        }
    }

    #[async_trait]
    impl ExchangeClient for StubClient {
        fn venue(&self) -> Venue {
            self.venue
        }
        fn get_available_symbols(&self) -> Vec<Symbol> {
            vec![]
        }
        fn get_symbol_info(&self, symbol: &str) -> Option<SymbolInfo> {
            Some(SymbolInfo { symbol: symbol.to_string(), max_leverage: 10, sz_decimals: 3, quanto_multiplier: Decimal::ONE })
        }
        async fn get_balance(&self) -> ExchangeResult<Balance> {
            unimplemented!()
        }
        async fn get_positions(&self) -> ExchangeResult<Vec<Position>> {
            Ok(self.positions.lock().clone())
        }
        async fn get_funding_rate(&self, _symbol: &str) -> ExchangeResult<FundingRate> {
            unimplemented!()
        }
        async fn get_24h_volume(&self, _symbol: &str) -> ExchangeResult<Volume24h> {
            unimplemented!()
        }
        async fn get_orderbook(&self, _symbol: &str, _depth: usize) -> ExchangeResult<Orderbook> {
            unimplemented!()
        }
        async fn set_leverage(&self, _symbol: &str, _leverage: u32) -> ExchangeResult<()> {
            unimplemented!()
        }
        async fn set_leverages(&self, _leverages: HashMap<Symbol, u32>) -> ExchangeResult<()> {
            unimplemented!()
        }
        async fn buy_market(&self, symbol: &str, size: Decimal) -> ExchangeResult<Order> {
            self.orders_placed.lock().push((Side::Long, size));
            if *self.fail_buy.lock() {
                return Err(ExchangeError::order(self.venue, "stub buy failure"));
            }
            Ok(Order {
                order_id: "stub".into(),
                symbol: symbol.to_string(),
                size,
                side: Side::Long,
                fill_price: *self.fill_price.lock(),
                status: crate::types::OrderStatus::Filled,
                fee: self.fee,
            })
        }
        async fn sell_market(&self, symbol: &str, size: Decimal) -> ExchangeResult<Order> {
            self.orders_placed.lock().push((Side::Short, size));
            if *self.fail_sell.lock() {
                return Err(ExchangeError::order(self.venue, "stub sell failure"));
            }
            Ok(Order {
                order_id: "stub".into(),
                symbol: symbol.to_string(),
                size,
                side: Side::Short,
                fill_price: *self.fill_price.lock(),
                status: crate::types::OrderStatus::Filled,
                fee: self.fee,
            })
        }
        fn get_price(&self, _symbol: &str) -> Option<Decimal> {
            *self.price.lock()
        }
        fn has_price(&self, symbol: &str) -> bool {
            self.get_price(symbol).is_some()
        }
        fn estimate_fill_price(&self, _symbol: &str, _size: Decimal, _side: Side) -> ExchangeResult<Decimal> {
            Ok(self.fill_price)
        }
    }

    fn test_mode() -> MinSpreadMode {
        MinSpreadMode {
            entry_threshold_pct: dec!(2.5),
            usd_size_per_pos: dec!(100),
            take_profit_spread_pct: dec!(0.5),
            stop_loss_widening_pct: dec!(2.0),
            timeout_minutes: 20,
            min_24h_quote_volume_usd: dec!(1_000_000),
        }
    }

    #[tokio::test]
    async fn open_both_legs_succeed_creates_position() {
        let a = Arc::new(StubClient::new(Venue::Clob, dec!(100), dec!(100), dec!(0.05)));
        let b = Arc::new(StubClient::new(Venue::Onchain, dec!(101), dec!(101), dec!(0.025)));
        let (tx, _rx) = mpsc::channel(8);
        let pm = PositionManager::new(a, b, tx, Arc::new(Notify::new()));

        let position = pm
            .open_position(&"BTC".to_string(), SpreadDirection::VenueAShort, dec!(10), dec!(2.5), test_mode())
            .await
            .expect("both legs should fill");

        assert_eq!(position.status, PositionStatus::Open);
        assert!(pm.has_position("BTC"));
        assert_eq!(position.leg_a_order.side, Side::Short);
        assert_eq!(position.leg_b_order.side, Side::Long);
    }

    #[tokio::test]
    async fn open_partial_failure_compensates_and_returns_none() {
        let a = Arc::new(StubClient::new(Venue::Clob, dec!(100), dec!(100), dec!(0.05)));
        let b = Arc::new(StubClient::new(Venue::Onchain, dec!(101), dec!(101), dec!(0.025)));
        *b.fail_buy.lock() = true;

        let (tx, _rx) = mpsc::channel(8);
        let pm = PositionManager::new(a.clone(), b, tx, Arc::new(Notify::new()));

        let position = pm
            .open_position(&"BTC".to_string(), SpreadDirection::VenueAShort, dec!(10), dec!(2.5), test_mode())
            .await;

        assert!(position.is_none());
        assert!(!pm.has_position("BTC"));
        // leg A opened short, then compensated with a long of the same size.
        let placed = a.orders_placed.lock().clone();
        assert_eq!(placed, vec![(Side::Short, dec!(10)), (Side::Long, dec!(10))]);
    }

    #[tokio::test]
    async fn close_both_legs_succeed_computes_pnl_and_removes_position() {
        let a = Arc::new(StubClient::new(Venue::Clob, dec!(100), dec!(100), dec!(0.05)));
        let b = Arc::new(StubClient::new(Venue::Onchain, dec!(101), dec!(100), dec!(0.025)));
        let (tx, mut rx) = mpsc::channel(8);
        let pm = PositionManager::new(a.clone(), b.clone(), tx, Arc::new(Notify::new()));

        let position = pm
            .open_position(&"BTC".to_string(), SpreadDirection::VenueAShort, dec!(10), dec!(2.5), test_mode())
            .await
            .unwrap();

        // Entry fills were both 100; move fill prices for the closing orders.
        *a.fill_price.lock() = dec!(95);
        *b.fill_price.lock() = dec!(99);
        let pnl = pm.close_position(&position.position_id, CloseReason::TakeProfit).await.unwrap();

        // entry_a=100 (short), exit_a=95 -> pnl_a = (100-95)*10 = 50
        // entry_b=100 (long), exit_b=99 -> pnl_b = (99-100)*10 = -10
        assert_eq!(pnl.pnl_a, dec!(50));
        assert_eq!(pnl.pnl_b, dec!(-10));
        assert!(pm.get_position(&position.position_id).is_none());

        let closed = rx.recv().await.unwrap();
        assert_eq!(closed.reason, CloseReason::TakeProfit);
    }

    #[tokio::test]
    async fn close_partial_failure_marks_failed_and_keeps_position() {
        let a = Arc::new(StubClient::new(Venue::Clob, dec!(100), dec!(95), dec!(0.05)));
        let b = Arc::new(StubClient::new(Venue::Onchain, dec!(101), dec!(99), dec!(0.025)));
        let (tx, _rx) = mpsc::channel(8);
        let pm = PositionManager::new(a.clone(), b.clone(), tx, Arc::new(Notify::new()));

        let position = pm
            .open_position(&"BTC".to_string(), SpreadDirection::VenueAShort, dec!(10), dec!(2.5), test_mode())
            .await
            .unwrap();

        *b.fail_buy.lock() = true;
        *b.fail_sell.lock() = true;
        let pnl = pm.close_position(&position.position_id, CloseReason::StopLoss).await;

        assert!(pnl.is_none());
        assert!(pm.is_emergency_stopped());
        let stored = pm.get_position(&position.position_id).unwrap();
        assert_eq!(stored.status, PositionStatus::Failed);
    }
}
