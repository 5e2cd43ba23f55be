//! Emergency shutdown (§4.9): reversing market-close every live position on
//! both venues with bounded retry. A standalone escape hatch for when the
//! bot's own consistency check (§4.7) has already flagged a desync and a
//! human needs to flatten everything without waiting on the running process.
//! Grounded on `original_source/src/utils/emergency_shutdown.py`
//! (`_close_with_retry`, `close_all_positions`, `_close_single_position`).

use crate::error::Venue;
use crate::types::{Position, Side};
use crate::venues::ExchangeClient;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Matches `tenacity.stop_after_attempt(5)` in the original utility.
const MAX_ATTEMPTS: u32 = 5;
/// Matches `tenacity.wait_exponential(multiplier=2, min=4, max=30)`'s floor.
const BACKOFF_FLOOR: Duration = Duration::from_secs(4);
const BACKOFF_CAP: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct FailedClose {
    pub venue: Venue,
    pub symbol: String,
    pub side: Side,
    pub error: String,
}

/// Closes out both venues' books. Owns no state beyond the two clients; the
/// caller (the `emergency-shutdown` binary) is responsible for constructing
/// them and deciding what to do with a `false` return.
pub struct EmergencyShutdown {
    venue_a: Arc<dyn ExchangeClient>,
    venue_b: Arc<dyn ExchangeClient>,
}

impl EmergencyShutdown {
    pub fn new(venue_a: Arc<dyn ExchangeClient>, venue_b: Arc<dyn ExchangeClient>) -> Self {
        Self { venue_a, venue_b }
    }

    /// Fetches every open position on both venues and closes each with
    /// retry, concurrently. Returns `true` iff every close succeeded.
    pub async fn close_all_positions(&self) -> bool {
        let mut tasks: Vec<(Venue, Arc<dyn ExchangeClient>, Position)> = Vec::new();

        for (venue, client) in [
            (Venue::Clob, self.venue_a.clone()),
            (Venue::Onchain, self.venue_b.clone()),
        ] {
            match client.get_positions().await {
                Ok(positions) => {
                    for position in positions {
                        tasks.push((venue, client.clone(), position));
                    }
                }
                Err(e) => {
                    error!(%venue, error = %e, "emergency_fetch_positions_failed");
                }
            }
        }

        if tasks.is_empty() {
            info!("emergency_no_open_positions");
            return true;
        }

        let results = futures_util::future::join_all(
            tasks
                .into_iter()
                .map(|(venue, client, position)| close_with_retry(venue, client, position)),
        )
        .await;

        let failed: Vec<FailedClose> = results.into_iter().filter_map(|r| r.err()).collect();

        if failed.is_empty() {
            info!("emergency_shutdown_complete_all_closed");
            true
        } else {
            error!(
                failed_count = failed.len(),
                failed_closes = ?failed,
                "emergency_shutdown_incomplete"
            );
            false
        }
    }
}

async fn close_with_retry(
    venue: Venue,
    client: Arc<dyn ExchangeClient>,
    position: Position,
) -> Result<(), FailedClose> {
    // Reversing a Long is a sell; reversing a Short is a buy.
    let close_side = position.side.opposite();
    let symbol = position.symbol.clone();
    let size = position.size;

    info!(%venue, symbol = %symbol, side = ?close_side, %size, "emergency_closing_position");

    let mut attempt = 0u32;
    let mut backoff = BACKOFF_FLOOR;
    loop {
        attempt += 1;
        let result = match close_side {
            Side::Long => client.buy_market(&symbol, size).await,
            Side::Short => client.sell_market(&symbol, size).await,
        };

        match result {
            Ok(order) => {
                info!(%venue, symbol = %symbol, order_id = %order.order_id, "emergency_position_closed");
                return Ok(());
            }
            Err(e) if attempt >= MAX_ATTEMPTS => {
                error!(%venue, symbol = %symbol, attempt, error = %e, "emergency_close_failed_max_retries");
                return Err(FailedClose {
                    venue,
                    symbol,
                    side: close_side,
                    error: e.to_string(),
                });
            }
            Err(e) => {
                warn!(%venue, symbol = %symbol, attempt, error = %e, backoff_secs = backoff.as_secs(), "emergency_close_retry");
                tokio::time::sleep(backoff).await;
                backoff = (backoff * 2).min(BACKOFF_CAP);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ExchangeError, ExchangeResult};
    use crate::types::{Balance, FundingRate, Order, OrderStatus, Orderbook, SymbolInfo, Volume24h};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;

    struct StubClient {
        venue: Venue,
        positions: Vec<Position>,
        fail_until_attempt: u32,
        calls: Mutex<u32>,
    }

    #[async_trait]
    impl ExchangeClient for StubClient {
        fn venue(&self) -> Venue {
            self.venue
        }
        fn get_available_symbols(&self) -> Vec<String> {
            vec![]
        }
        fn get_symbol_info(&self, _symbol: &str) -> Option<SymbolInfo> {
            None
        }
        async fn get_balance(&self) -> ExchangeResult<Balance> {
            unimplemented!()
        }
        async fn get_positions(&self) -> ExchangeResult<Vec<Position>> {
            Ok(self.positions.clone())
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
        async fn set_leverages(&self, _leverages: HashMap<String, u32>) -> ExchangeResult<()> {
            unimplemented!()
        }
        async fn buy_market(&self, symbol: &str, size: Decimal) -> ExchangeResult<Order> {
            self.attempt_close(symbol, size)
        }
        async fn sell_market(&self, symbol: &str, size: Decimal) -> ExchangeResult<Order> {
            self.attempt_close(symbol, size)
        }
        fn get_price(&self, _symbol: &str) -> Option<Decimal> {
            None
        }
        fn has_price(&self, _symbol: &str) -> bool {
            false
        }
        fn estimate_fill_price(&self, _symbol: &str, _size: Decimal, _side: Side) -> ExchangeResult<Decimal> {
            unimplemented!()
        }
    }

    impl StubClient {
        fn attempt_close(&self, symbol: &str, size: Decimal) -> ExchangeResult<Order> {
            let mut calls = self.calls.lock();
            *calls += 1;
            if *calls < self.fail_until_attempt {
                return Err(ExchangeError::order(self.venue, "simulated close failure"));
            }
            Ok(Order {
                order_id: "order-1".into(),
                symbol: symbol.to_string(),
                size,
                side: Side::Long,
                fill_price: dec!(100),
                status: OrderStatus::Filled,
                fee: dec!(0),
            })
        }
    }

    fn position() -> Position {
        Position {
            symbol: "BTC".into(),
            size: dec!(1),
            side: Side::Long,
            entry_price: dec!(100),
            mark_price: dec!(100),
            unrealized_pnl: dec!(0),
            liquidation_price: None,
            margin_used: dec!(10),
            leverage: Some(5),
        }
    }

    #[tokio::test]
    async fn close_all_positions_succeeds_when_no_positions_open() {
        let a = Arc::new(StubClient {
            venue: Venue::Clob,
            positions: vec![],
            fail_until_attempt: 1,
            calls: Mutex::new(0),
        });
        let b = Arc::new(StubClient {
            venue: Venue::Onchain,
            positions: vec![],
            fail_until_attempt: 1,
            calls: Mutex::new(0),
        });

        let shutdown = EmergencyShutdown::new(a, b);
        assert!(shutdown.close_all_positions().await);
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_positions_retries_then_succeeds() {
        let a = Arc::new(StubClient {
            venue: Venue::Clob,
            positions: vec![position()],
            fail_until_attempt: 3,
            calls: Mutex::new(0),
        });
        let b = Arc::new(StubClient {
            venue: Venue::Onchain,
            positions: vec![],
            fail_until_attempt: 1,
            calls: Mutex::new(0),
        });

        let shutdown = EmergencyShutdown::new(a.clone(), b);
        assert!(shutdown.close_all_positions().await);
        assert_eq!(*a.calls.lock(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn close_all_positions_fails_after_max_attempts() {
        let a = Arc::new(StubClient {
            venue: Venue::Clob,
            positions: vec![position()],
            fail_until_attempt: MAX_ATTEMPTS + 1,
            calls: Mutex::new(0),
        });
        let b = Arc::new(StubClient {
            venue: Venue::Onchain,
            positions: vec![],
            fail_until_attempt: 1,
            calls: Mutex::new(0),
        });

        let shutdown = EmergencyShutdown::new(a.clone(), b);
        assert!(!shutdown.close_all_positions().await);
        assert_eq!(*a.calls.lock(), MAX_ATTEMPTS);
    }
}
