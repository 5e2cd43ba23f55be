//! Numeric & Types Layer: tagged enums and immutable value records shared by
//! every venue and engine component. All money/size fields are fixed-point
//! `Decimal`; only the log boundary widens to `f64`/string.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Canonical base-asset symbol, e.g. `BTC`. Each venue maps this to its own
/// native instrument identifier (§4.1).
pub type Symbol = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Side {
    Long,
    Short,
}

impl Side {
    pub fn opposite(self) -> Side {
        match self {
            Side::Long => Side::Short,
            Side::Short => Side::Long,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Filled,
    Partial,
    Rejected,
}

/// Which venue is short in a given spread/position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpreadDirection {
    VenueAShort,
    VenueBShort,
}

impl SpreadDirection {
    pub fn opposite(self) -> SpreadDirection {
        match self {
            SpreadDirection::VenueAShort => SpreadDirection::VenueBShort,
            SpreadDirection::VenueBShort => SpreadDirection::VenueAShort,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: Symbol,
    pub max_leverage: u32,
    pub sz_decimals: u32,
    /// Venue A contract multiplier converting contract count to coin
    /// quantity; `1` on venues with no such notion.
    pub quanto_multiplier: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderbookLevel {
    pub price: Decimal,
    pub size: Decimal,
}

/// L2 book, maintained as two ordered maps keyed by price so upsert/delete is
/// O(log n) and best bid/ask is always the boundary entry — no full-sort
/// rebuild on every delta (§9 redesign note).
#[derive(Debug, Clone, Default)]
pub struct Orderbook {
    pub symbol: Symbol,
    /// Descending by price: iterate `.iter().rev()` for best-first.
    pub bids: BTreeMap<Decimal, Decimal>,
    /// Ascending by price: iterate `.iter()` for best-first.
    pub asks: BTreeMap<Decimal, Decimal>,
    pub timestamp: i64,
}

impl Orderbook {
    pub fn new(symbol: Symbol) -> Self {
        Self {
            symbol,
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            timestamp: 0,
        }
    }

    pub fn best_bid(&self) -> Option<OrderbookLevel> {
        self.bids.iter().next_back().map(|(&price, &size)| OrderbookLevel { price, size })
    }

    pub fn best_ask(&self) -> Option<OrderbookLevel> {
        self.asks.iter().next().map(|(&price, &size)| OrderbookLevel { price, size })
    }

    /// True iff the book obeys its crossing/ordering invariants (§3, §8). An
    /// empty book on either side is trivially valid.
    pub fn is_valid(&self) -> bool {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => bid.price < ask.price,
            _ => true,
        }
    }

    /// Apply one upsert/remove delta: `size == 0` removes the level.
    pub fn apply_bid(&mut self, level: OrderbookLevel) {
        if level.size.is_zero() {
            self.bids.remove(&level.price);
        } else {
            self.bids.insert(level.price, level.size);
        }
    }

    pub fn apply_ask(&mut self, level: OrderbookLevel) {
        if level.size.is_zero() {
            self.asks.remove(&level.price);
        } else {
            self.asks.insert(level.price, level.size);
        }
    }

    pub fn replace_bids(&mut self, levels: impl IntoIterator<Item = OrderbookLevel>) {
        self.bids.clear();
        for l in levels {
            if !l.size.is_zero() {
                self.bids.insert(l.price, l.size);
            }
        }
    }

    pub fn replace_asks(&mut self, levels: impl IntoIterator<Item = OrderbookLevel>) {
        self.asks.clear();
        for l in levels {
            if !l.size.is_zero() {
                self.asks.insert(l.price, l.size);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balance {
    pub total: Decimal,
    pub available: Decimal,
}

impl Balance {
    pub fn used(&self) -> Decimal {
        self.total - self.available
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub size: Decimal,
    pub side: Side,
    pub entry_price: Decimal,
    pub mark_price: Decimal,
    pub unrealized_pnl: Decimal,
    pub liquidation_price: Option<Decimal>,
    pub margin_used: Decimal,
    pub leverage: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub symbol: Symbol,
    pub size: Decimal,
    pub side: Side,
    pub fill_price: Decimal,
    pub status: OrderStatus,
    pub fee: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FundingRate {
    pub rate: Decimal,
    pub next_apply_ts_ms: i64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Volume24h {
    pub base_volume: Decimal,
    pub quote_volume: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RawSpread {
    pub spread_pct: Decimal,
    pub direction: SpreadDirection,
    pub price_a: Decimal,
    pub price_b: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DirectionalSpread {
    pub spread_pct: Decimal,
    pub profit_usd: Decimal,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NetSpread {
    pub size: Decimal,
    pub venue_a_short: DirectionalSpread,
    pub venue_b_short: DirectionalSpread,
    pub best_direction: SpreadDirection,
    pub best_profit_usd: Decimal,
}

impl NetSpread {
    pub fn for_direction(&self, direction: SpreadDirection) -> DirectionalSpread {
        match direction {
            SpreadDirection::VenueAShort => self.venue_a_short,
            SpreadDirection::VenueBShort => self.venue_b_short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CloseReason {
    TakeProfit,
    StopLoss,
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Open,
    Closed,
    Failed,
}

/// Engine-owned position: exactly two legs, opposite sides, created only once
/// both legs have filled.
#[derive(Debug, Clone)]
pub struct ArbitragePosition {
    pub position_id: String,
    pub symbol: Symbol,
    pub leg_a_order: Order,
    pub leg_b_order: Order,
    pub direction: SpreadDirection,
    pub entry_spread_pct: Decimal,
    pub open_time_ms: i64,
    pub mode: crate::config::MinSpreadMode,
    pub status: PositionStatus,
}

#[derive(Debug, Clone, Copy)]
pub struct RealizedPnl {
    pub pnl_a: Decimal,
    pub pnl_b: Decimal,
    pub fees: Decimal,
}

impl RealizedPnl {
    pub fn net(&self) -> Decimal {
        self.pnl_a + self.pnl_b - self.fees
    }
}

/// Emitted once per completed close; drained by the Bot to refresh local
/// balance bookkeeping (§4.7 completion callback).
#[derive(Debug, Clone)]
pub struct PositionClosed {
    pub position_id: String,
    pub symbol: Symbol,
    pub reason: CloseReason,
    pub pnl: RealizedPnl,
}
