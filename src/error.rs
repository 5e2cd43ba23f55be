//! Error taxonomy shared by both venue clients and the arbitrage components.

use thiserror::Error;

/// The venue an error originated from, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Venue {
    Clob,
    Onchain,
}

impl std::fmt::Display for Venue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Venue::Clob => write!(f, "clob"),
            Venue::Onchain => write!(f, "onchain"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("[{venue}] invalid symbol: {symbol}")]
    InvalidSymbol { venue: Venue, symbol: String },

    #[error("[{venue}] insufficient balance: need {needed}, have {available}")]
    InsufficientBalance {
        venue: Venue,
        needed: String,
        available: String,
    },

    #[error("[{venue}] order error: {reason}")]
    Order { venue: Venue, reason: String },

    #[error("[{venue}] websocket error: {reason}")]
    WebSocket { venue: Venue, reason: String },

    #[error("[{venue}] connection error: {reason}")]
    Connection { venue: Venue, reason: String },
}

impl ExchangeError {
    pub fn invalid_symbol(venue: Venue, symbol: impl Into<String>) -> Self {
        Self::InvalidSymbol {
            venue,
            symbol: symbol.into(),
        }
    }

    pub fn order(venue: Venue, reason: impl Into<String>) -> Self {
        Self::Order {
            venue,
            reason: reason.into(),
        }
    }

    pub fn ws(venue: Venue, reason: impl Into<String>) -> Self {
        Self::WebSocket {
            venue,
            reason: reason.into(),
        }
    }

    pub fn connection(venue: Venue, reason: impl Into<String>) -> Self {
        Self::Connection {
            venue,
            reason: reason.into(),
        }
    }
}

pub type ExchangeResult<T> = Result<T, ExchangeError>;
