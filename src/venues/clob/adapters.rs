//! Pure translation between venue A's (CLOB-style) wire payloads and internal
//! value records. No I/O. Grounded on the venue A adapter surface.

use crate::types::{
    Balance, FundingRate, Order, OrderStatus, Orderbook, OrderbookLevel, Position, Side,
    SymbolInfo, Volume24h,
};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Treats missing/empty/"0" numeric strings as zero rather than raising
/// (§4.1). Accepts both JSON strings and numbers.
pub fn safe_decimal(value: &Value, default: Decimal) -> Decimal {
    match value {
        Value::Null => default,
        Value::String(s) if s.is_empty() => default,
        Value::String(s) => Decimal::from_str(s).unwrap_or(default),
        Value::Number(n) => Decimal::from_str(&n.to_string()).unwrap_or(default),
        _ => default,
    }
}

pub fn safe_int(value: &Value, default: u32) -> u32 {
    match value {
        Value::String(s) if s.is_empty() || s == "0" => default,
        Value::String(s) => s.parse().unwrap_or(default),
        Value::Number(n) => n.as_u64().map(|v| v as u32).unwrap_or(default),
        _ => default,
    }
}

/// Strips the venue's quote suffix: `XYZ_USDT` → `XYZ`.
pub fn normalize_symbol(contract: &str) -> String {
    contract.trim_end_matches("_USDT").to_string()
}

pub fn denormalize_symbol(symbol: &str) -> String {
    format!("{symbol}_USDT")
}

/// `None` when the venue reports a flat (size==0) position.
pub fn adapt_position(raw: &Value) -> Option<Position> {
    let size = safe_decimal(&raw["size"], Decimal::ZERO);
    if size.is_zero() {
        return None;
    }

    let value = safe_decimal(&raw["value"], Decimal::ZERO);
    let leverage_raw = safe_int(&raw["leverage"], 0);
    let margin_used = {
        let initial_margin = safe_decimal(&raw["initial_margin"], Decimal::ZERO);
        if !initial_margin.is_zero() {
            initial_margin
        } else if leverage_raw > 0 {
            value / Decimal::from(leverage_raw)
        } else {
            Decimal::ZERO
        }
    };

    let liq_price = safe_decimal(&raw["liq_price"], Decimal::ZERO);

    Some(Position {
        symbol: normalize_symbol(raw["contract"].as_str().unwrap_or_default()),
        size: size.abs(),
        side: if size > Decimal::ZERO { Side::Long } else { Side::Short },
        entry_price: safe_decimal(&raw["entry_price"], Decimal::ZERO),
        mark_price: safe_decimal(&raw["mark_price"], Decimal::ZERO),
        unrealized_pnl: safe_decimal(&raw["unrealised_pnl"], Decimal::ZERO),
        liquidation_price: if liq_price.is_zero() { None } else { Some(liq_price) },
        margin_used,
        leverage: if leverage_raw > 0 { Some(leverage_raw) } else { None },
    })
}

pub fn adapt_order(raw: &Value) -> Order {
    let size = safe_decimal(&raw["size"], Decimal::ZERO);
    let fee_rate = safe_decimal(&raw["tkfr"], Decimal::ZERO);
    let fill_price = safe_decimal(&raw["fill_price"], Decimal::ZERO);
    let fee = (size * fill_price * fee_rate).abs();

    let status = match raw["status"].as_str() {
        Some("finished") => OrderStatus::Filled,
        Some("open") => OrderStatus::Partial,
        _ => OrderStatus::Filled,
    };

    Order {
        order_id: raw["id"].to_string().trim_matches('"').to_string(),
        symbol: normalize_symbol(raw["contract"].as_str().unwrap_or_default()),
        size: size.abs(),
        side: if size > Decimal::ZERO { Side::Long } else { Side::Short },
        fill_price,
        status,
        fee,
    }
}

pub fn adapt_balance(raw: &Value) -> Balance {
    Balance {
        total: safe_decimal(&raw["total"], Decimal::ZERO),
        available: safe_decimal(&raw["available"], Decimal::ZERO),
    }
}

pub fn adapt_symbol_info(raw: &Value, symbol: &str) -> SymbolInfo {
    SymbolInfo {
        symbol: symbol.to_string(),
        max_leverage: safe_int(&raw["leverage_max"], 1),
        sz_decimals: 0,
        // Parsed for completeness but not applied anywhere downstream: the
        // reference venue A adapter hardcodes sz_decimals=0 and has no
        // multiplier conversion either, so `client.rs` truncates raw coin
        // size straight to a contract count the same way.
        quanto_multiplier: safe_decimal(&raw["quanto_multiplier"], Decimal::ONE),
    }
}

pub fn adapt_funding_rate(raw: &Value) -> FundingRate {
    FundingRate {
        rate: safe_decimal(&raw["r"], Decimal::ZERO),
        next_apply_ts_ms: raw["t"].as_i64().unwrap_or(0) * 1000,
    }
}

pub fn adapt_orderbook(raw: &Value, symbol: &str) -> Orderbook {
    let mut ob = Orderbook::new(symbol.to_string());
    if let Some(bids) = raw["bids"].as_array() {
        for level in bids {
            ob.apply_bid(OrderbookLevel {
                price: safe_decimal(&level["p"], Decimal::ZERO),
                size: safe_decimal(&level["s"], Decimal::ZERO),
            });
        }
    }
    if let Some(asks) = raw["asks"].as_array() {
        for level in asks {
            ob.apply_ask(OrderbookLevel {
                price: safe_decimal(&level["p"], Decimal::ZERO),
                size: safe_decimal(&level["s"], Decimal::ZERO),
            });
        }
    }
    ob.timestamp = (raw["current"].as_f64().unwrap_or(0.0) * 1000.0) as i64;
    ob
}

pub fn adapt_volume_24h(raw: &Value) -> Volume24h {
    Volume24h {
        base_volume: safe_decimal(&raw["volume_24h_base"], Decimal::ZERO),
        quote_volume: safe_decimal(&raw["volume_24h_settle"], Decimal::ZERO),
    }
}
