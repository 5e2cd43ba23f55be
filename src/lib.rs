//! Delta-neutral cross-venue perpetual-futures arbitrage engine.
//!
//! Long one venue, short the other, on the same symbol and size; profit from
//! the spread between them while staying market-neutral. See `bot::Bot` for
//! the orchestration loop and `position::PositionManager` for the atomic
//! open/close/monitor machinery underneath it.

pub mod bot;
pub mod config;
pub mod emergency;
pub mod error;
pub mod position;
pub mod signing;
pub mod spread;
pub mod types;
pub mod venues;
