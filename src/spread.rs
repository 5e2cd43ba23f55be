//! Spread Finder (§4.6): raw mid-vs-mid spread (O(1), local) and fee/
//! liquidity-aware net spread (book-walked fill estimates, per-direction
//! profit). Grounded on `original_source/src/arbitrage/spread.py` and
//! `calculator.py`, adapted from the N-exchange generic finder there to the
//! fixed two-venue shape this engine needs.

use crate::error::{ExchangeError, ExchangeResult, Venue};
use crate::types::{DirectionalSpread, NetSpread, RawSpread, Side, SpreadDirection, Symbol};
use crate::venues::ExchangeClient;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

pub struct SpreadFinder {
    venue_a: Arc<dyn ExchangeClient>,
    venue_b: Arc<dyn ExchangeClient>,
    fee_a: Decimal,
    fee_b: Decimal,
}

impl SpreadFinder {
    pub fn new(
        venue_a: Arc<dyn ExchangeClient>,
        venue_b: Arc<dyn ExchangeClient>,
        fee_a: Decimal,
        fee_b: Decimal,
    ) -> Self {
        Self { venue_a, venue_b, fee_a, fee_b }
    }

    /// `None` if either venue lacks a current price for `symbol` (§8).
    pub fn get_raw_spread(&self, symbol: &Symbol) -> Option<RawSpread> {
        let price_a = self.venue_a.get_price(symbol)?;
        let price_b = self.venue_b.get_price(symbol)?;
        let mid = (price_a + price_b) / dec!(2);
        if mid.is_zero() {
            return None;
        }

        let spread_pct = ((price_a - price_b).abs() / mid) * dec!(100);
        let direction = if price_a > price_b {
            SpreadDirection::VenueAShort
        } else {
            SpreadDirection::VenueBShort
        };

        Some(RawSpread { spread_pct, direction, price_a, price_b })
    }

    /// Converts `usd_size` to a coin quantity at the current mid, rounds to
    /// each venue's own sizing rule, and walks both books for fill estimates
    /// in both directions so the caller can pick whichever nets more.
    pub fn calculate_net_spread(&self, symbol: &Symbol, usd_size: Decimal) -> ExchangeResult<NetSpread> {
        let price_a = self
            .venue_a
            .get_price(symbol)
            .ok_or_else(|| ExchangeError::invalid_symbol(Venue::Clob, symbol.clone()))?;
        let price_b = self
            .venue_b
            .get_price(symbol)
            .ok_or_else(|| ExchangeError::invalid_symbol(Venue::Onchain, symbol.clone()))?;
        let mid = (price_a + price_b) / dec!(2);

        let raw_coin_size = usd_size / mid;
        let size_a = raw_coin_size.round_dp(0);
        let sz_decimals = self
            .venue_b
            .get_symbol_info(symbol)
            .map(|info| info.sz_decimals)
            .unwrap_or(0);
        let size_b = raw_coin_size.round_dp(sz_decimals);
        let size = size_a.min(size_b);

        let buy_a = self.venue_a.estimate_fill_price(symbol, size, Side::Long)?;
        let sell_a = self.venue_a.estimate_fill_price(symbol, size, Side::Short)?;
        let buy_b = self.venue_b.estimate_fill_price(symbol, size, Side::Long)?;
        let sell_b = self.venue_b.estimate_fill_price(symbol, size, Side::Short)?;

        // VENUE_A_SHORT: sell on A, buy on B.
        let venue_a_short = directional_spread(sell_a * (Decimal::ONE - self.fee_a) * size, buy_b * (Decimal::ONE + self.fee_b) * size);
        // VENUE_B_SHORT: sell on B, buy on A.
        let venue_b_short = directional_spread(sell_b * (Decimal::ONE - self.fee_b) * size, buy_a * (Decimal::ONE + self.fee_a) * size);

        let best_direction = if venue_a_short.profit_usd >= venue_b_short.profit_usd {
            SpreadDirection::VenueAShort
        } else {
            SpreadDirection::VenueBShort
        };
        let best_profit_usd = match best_direction {
            SpreadDirection::VenueAShort => venue_a_short.profit_usd,
            SpreadDirection::VenueBShort => venue_b_short.profit_usd,
        };

        Ok(NetSpread { size, venue_a_short, venue_b_short, best_direction, best_profit_usd })
    }
}

fn directional_spread(revenue: Decimal, cost: Decimal) -> DirectionalSpread {
    let profit_usd = revenue - cost;
    let spread_pct = if cost.is_zero() { Decimal::ZERO } else { (profit_usd / cost) * dec!(100) };
    DirectionalSpread { spread_pct, profit_usd }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExchangeResult;
    use crate::types::{Balance, FundingRate, Order, Orderbook, Position, SymbolInfo, Volume24h};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashMap;

    struct StubClient {
        venue: Venue,
        price: Mutex<Option<Decimal>>,
        fill_price: Decimal,
    }

    impl StubClient {
        fn new(venue: Venue, price: Decimal, fill_price: Decimal) -> Self {
            Self { venue, price: Mutex::new(Some(price)), fill_price }
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
            Some(SymbolInfo {
                symbol: symbol.to_string(),
                max_leverage: 10,
                sz_decimals: 3,
                quanto_multiplier: Decimal::ONE,
            })
        }
        async fn get_balance(&self) -> ExchangeResult<Balance> {
            unimplemented!()
        }
        async fn get_positions(&self) -> ExchangeResult<Vec<Position>> {
            unimplemented!()
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
        async fn buy_market(&self, _symbol: &str, _size: Decimal) -> ExchangeResult<Order> {
            unimplemented!()
        }
        async fn sell_market(&self, _symbol: &str, _size: Decimal) -> ExchangeResult<Order> {
            unimplemented!()
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

    #[test]
    fn raw_spread_basic_scenario() {
        let a = Arc::new(StubClient::new(Venue::Clob, dec!(100), dec!(100)));
        let b = Arc::new(StubClient::new(Venue::Onchain, dec!(101), dec!(101)));
        let finder = SpreadFinder::new(a, b, dec!(0.0005), dec!(0.00025));

        let spread = finder.get_raw_spread(&"BTC".to_string()).unwrap();
        assert_eq!(spread.direction, SpreadDirection::VenueBShort);
        assert_eq!(spread.price_a, dec!(100));
        assert_eq!(spread.price_b, dec!(101));
        let expected = (dec!(101) - dec!(100)).abs() / dec!(100.5) * dec!(100);
        assert_eq!(spread.spread_pct, expected);
    }

    #[test]
    fn raw_spread_none_when_price_missing() {
        let a = Arc::new(StubClient::new(Venue::Clob, dec!(100), dec!(100)));
        *a.price.lock() = None;
        let b = Arc::new(StubClient::new(Venue::Onchain, dec!(101), dec!(101)));
        let finder = SpreadFinder::new(a, b, dec!(0.0005), dec!(0.00025));
        assert!(finder.get_raw_spread(&"BTC".to_string()).is_none());
    }

    #[test]
    fn net_spread_with_fees_scenario() {
        let a = Arc::new(StubClient::new(Venue::Clob, dec!(100), dec!(100)));
        let b = Arc::new(StubClient::new(Venue::Onchain, dec!(100), dec!(100)));
        let finder = SpreadFinder::new(a, b, dec!(0.0005), dec!(0.00025));

        let net = finder.calculate_net_spread(&"BTC".to_string(), dec!(1000)).unwrap();
        assert_eq!(net.size, dec!(10));
        assert_eq!(net.venue_a_short.profit_usd, dec!(-0.75));
        assert_eq!(net.venue_b_short.profit_usd, dec!(-0.75));
    }
}
