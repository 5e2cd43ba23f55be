//! Whole-engine integration test: spread detection -> position open ->
//! position close, driven entirely through `arb_engine`'s public API against
//! stub `ExchangeClient` implementations (no real venue I/O). Mirrors the
//! teacher's `tests/backtest_run_integration.rs` placement as a top-level
//! integration suite separate from the per-module `#[cfg(test)]` units.

use arb_engine::error::{ExchangeError, ExchangeResult, Venue};
use arb_engine::position::PositionManager;
use arb_engine::spread::SpreadFinder;
use arb_engine::types::{
    Balance, CloseReason, FundingRate, Order, OrderStatus, Orderbook, Position, PositionStatus,
    Side, Symbol, SymbolInfo, Volume24h,
};
use arb_engine::venues::ExchangeClient;
use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Notify};

struct StubVenue {
    venue: Venue,
    price: Mutex<Decimal>,
    fill_price: Mutex<Decimal>,
    fee: Decimal,
    fail_buy: Mutex<bool>,
}

impl StubVenue {
    fn new(venue: Venue, price: Decimal, fee: Decimal) -> Self {
        Self {
            venue,
            price: Mutex::new(price),
            fill_price: Mutex::new(price),
            fee,
            fail_buy: Mutex::new(false),
        }
    }
}

#[async_trait]
impl ExchangeClient for StubVenue {
    fn venue(&self) -> Venue {
        self.venue
    }
    fn get_available_symbols(&self) -> Vec<Symbol> {
        vec!["BTC".to_string()]
    }
    fn get_symbol_info(&self, symbol: &str) -> Option<SymbolInfo> {
        Some(SymbolInfo {
            symbol: symbol.to_string(),
            max_leverage: 10,
            sz_decimals: 3,
            quanto_multiplier: Decimal::ONE,
        })
    }
    async fn get_balance(&self) -> ExchangeResult<Balance> {
        Ok(Balance { total: dec!(10_000), available: dec!(10_000) })
    }
    async fn get_positions(&self) -> ExchangeResult<Vec<Position>> {
        Ok(vec![])
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
        Ok(())
    }
    async fn set_leverages(&self, _leverages: HashMap<Symbol, u32>) -> ExchangeResult<()> {
        Ok(())
    }
    async fn buy_market(&self, symbol: &str, size: Decimal) -> ExchangeResult<Order> {
        if *self.fail_buy.lock() {
            return Err(ExchangeError::order(self.venue, "stub buy failure"));
        }
        Ok(Order {
            order_id: "stub".into(),
            symbol: symbol.to_string(),
            size,
            side: Side::Long,
            fill_price: *self.fill_price.lock(),
            status: OrderStatus::Filled,
            fee: self.fee,
        })
    }
    async fn sell_market(&self, symbol: &str, size: Decimal) -> ExchangeResult<Order> {
        Ok(Order {
            order_id: "stub".into(),
            symbol: symbol.to_string(),
            size,
            side: Side::Short,
            fill_price: *self.fill_price.lock(),
            status: OrderStatus::Filled,
            fee: self.fee,
        })
    }
    fn get_price(&self, _symbol: &str) -> Option<Decimal> {
        Some(*self.price.lock())
    }
    fn has_price(&self, symbol: &str) -> bool {
        self.get_price(symbol).is_some()
    }
    fn estimate_fill_price(&self, _symbol: &str, _size: Decimal, _side: Side) -> ExchangeResult<Decimal> {
        Ok(*self.fill_price.lock())
    }
}

/// End-to-end: a wide venue A/B price gap is detected by the Spread Finder,
/// both legs open through the Position Manager, the spread then collapses
/// and the take-profit close nets the expected per-leg PnL.
#[tokio::test]
async fn spread_detected_position_opens_and_closes_on_take_profit() {
    let venue_a = Arc::new(StubVenue::new(Venue::Clob, dec!(100), dec!(0.0005)));
    let venue_b = Arc::new(StubVenue::new(Venue::Onchain, dec!(105), dec!(0.00025)));

    let finder = SpreadFinder::new(venue_a.clone(), venue_b.clone(), dec!(0.0005), dec!(0.00025));
    let raw = finder.get_raw_spread(&"BTC".to_string()).expect("both venues quote BTC");
    assert!(raw.spread_pct > dec!(2.5), "a 5% gap should clear a typical entry threshold");

    let net = finder
        .calculate_net_spread(&"BTC".to_string(), dec!(1000))
        .expect("fill estimates available on both venues");

    let (closed_tx, mut closed_rx) = mpsc::channel(8);
    let positions = PositionManager::new(venue_a.clone(), venue_b.clone(), closed_tx, Arc::new(Notify::new()));

    let position = positions
        .open_position(&"BTC".to_string(), net.best_direction, net.size, raw.spread_pct, test_mode())
        .await
        .expect("both legs fill cleanly");
    assert_eq!(position.status, PositionStatus::Open);
    assert!(positions.has_position("BTC"));

    // Spread collapses to flat; both venues now quote the same price.
    *venue_a.price.lock() = dec!(100);
    *venue_a.fill_price.lock() = dec!(100);
    *venue_b.price.lock() = dec!(100);
    *venue_b.fill_price.lock() = dec!(100);

    let pnl = positions
        .close_position(&position.position_id, CloseReason::TakeProfit)
        .await
        .expect("both legs close cleanly");

    assert!(!positions.has_position("BTC"));
    assert!(pnl.net() > Decimal::ZERO, "closing into a collapsed spread should realize a profit");

    let closed = closed_rx.recv().await.expect("close event emitted");
    assert_eq!(closed.reason, CloseReason::TakeProfit);
    assert_eq!(closed.symbol, "BTC");
}

/// A failed second leg during open is compensated by unwinding the first leg,
/// and the position never enters the book.
#[tokio::test]
async fn failed_leg_open_compensates_and_leaves_no_position() {
    let venue_a = Arc::new(StubVenue::new(Venue::Clob, dec!(100), dec!(0.0005)));
    let venue_b = Arc::new(StubVenue::new(Venue::Onchain, dec!(105), dec!(0.00025)));
    *venue_b.fail_buy.lock() = true;

    let (closed_tx, _closed_rx) = mpsc::channel(8);
    let positions = PositionManager::new(venue_a, venue_b, closed_tx, Arc::new(Notify::new()));

    let result = positions
        .open_position(&"BTC".to_string(), arb_engine::types::SpreadDirection::VenueAShort, dec!(1), dec!(5), test_mode())
        .await;

    assert!(result.is_none());
    assert!(!positions.has_position("BTC"));
}

fn test_mode() -> arb_engine::config::MinSpreadMode {
    arb_engine::config::MinSpreadMode {
        entry_threshold_pct: dec!(2.5),
        usd_size_per_pos: dec!(100),
        take_profit_spread_pct: dec!(0.5),
        stop_loss_widening_pct: dec!(2.0),
        timeout_minutes: 20,
        min_24h_quote_volume_usd: dec!(1_000_000),
    }
}
