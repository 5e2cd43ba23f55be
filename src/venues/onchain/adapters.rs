//! Pure translation between venue B's (on-chain) wire payloads and internal
//! value records. No I/O. Grounded on the venue B adapter surface.

use crate::types::{
    Balance, FundingRate, Order, OrderStatus, Orderbook, OrderbookLevel, Position, Side,
    SymbolInfo, Volume24h,
};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

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

pub fn adapt_position(raw: &Value) -> Position {
    let pos = &raw["position"];
    let szi = safe_decimal(&pos["szi"], Decimal::ZERO);

    let leverage = pos["leverage"]["value"]
        .as_u64()
        .map(|v| v as u32)
        .or_else(|| pos["leverage"]["value"].as_str().and_then(|s| s.parse().ok()));

    let liq_price = safe_decimal(&pos["liquidationPx"], Decimal::ZERO);

    Position {
        symbol: pos["coin"].as_str().unwrap_or_default().to_string(),
        size: szi.abs(),
        side: if szi > Decimal::ZERO { Side::Long } else { Side::Short },
        entry_price: safe_decimal(&pos["entryPx"], Decimal::ZERO),
        mark_price: safe_decimal(&pos["entryPx"], Decimal::ZERO),
        unrealized_pnl: safe_decimal(&pos["unrealizedPnl"], Decimal::ZERO),
        liquidation_price: if liq_price.is_zero() { None } else { Some(liq_price) },
        margin_used: safe_decimal(&pos["marginUsed"], Decimal::ZERO),
        leverage,
    }
}

/// Venue B's order-fill payload is deeply nested and can terminate early at
/// several stages (non-`ok` status, non-`order` response, empty statuses,
/// partial fill) — each must degrade to a typed order rather than panicking.
pub fn adapt_order(raw: &Value, symbol: &str, size: Decimal, side: Side) -> Order {
    let rejected = || Order {
        order_id: "0".to_string(),
        symbol: symbol.to_string(),
        size,
        side,
        fill_price: Decimal::ZERO,
        status: OrderStatus::Rejected,
        fee: Decimal::ZERO,
    };

    if raw["status"].as_str() != Some("ok") {
        return rejected();
    }
    let response = &raw["response"];
    if response["type"].as_str() != Some("order") {
        return rejected();
    }
    let statuses = response["data"]["statuses"].as_array();
    let Some(statuses) = statuses.filter(|s| !s.is_empty()) else {
        return rejected();
    };
    let first_status = &statuses[0];
    let filled = &first_status["filled"];
    if filled.is_null() {
        return Order {
            order_id: "0".to_string(),
            symbol: symbol.to_string(),
            size,
            side,
            fill_price: Decimal::ZERO,
            status: OrderStatus::Partial,
            fee: Decimal::ZERO,
        };
    }

    Order {
        order_id: filled["oid"].to_string().trim_matches('"').to_string(),
        symbol: symbol.to_string(),
        size: safe_decimal(&filled["totalSz"], Decimal::ZERO),
        side,
        fill_price: safe_decimal(&filled["avgPx"], Decimal::ZERO),
        status: OrderStatus::Filled,
        fee: Decimal::ZERO,
    }
}

pub fn adapt_balance(raw: &Value) -> Balance {
    let total = safe_decimal(&raw["marginSummary"]["accountValue"], Decimal::ZERO);
    let available = safe_decimal(&raw["withdrawable"], Decimal::ZERO);
    Balance { total, available }
}

pub fn adapt_symbol_info(raw: &Value) -> SymbolInfo {
    SymbolInfo {
        symbol: raw["name"].as_str().unwrap_or_default().to_string(),
        max_leverage: safe_int(&raw["max_leverage"], 1),
        sz_decimals: safe_int(&raw["sz_decimals"], 0),
        quanto_multiplier: Decimal::ONE,
    }
}

pub fn adapt_funding_rate(raw: &Value, now_unix_secs: i64) -> FundingRate {
    let next_hour = ((now_unix_secs / 3600) + 1) * 3600;
    FundingRate {
        rate: safe_decimal(&raw["funding"], Decimal::ZERO),
        next_apply_ts_ms: next_hour * 1000,
    }
}

pub fn adapt_orderbook(raw: &Value, symbol: &str) -> Orderbook {
    let mut ob = Orderbook::new(symbol.to_string());
    let levels = raw["levels"].as_array();
    if let Some(levels) = levels {
        if let Some(bids) = levels.first().and_then(|v| v.as_array()) {
            ob.replace_bids(bids.iter().map(|l| OrderbookLevel {
                price: safe_decimal(&l["px"], Decimal::ZERO),
                size: safe_decimal(&l["sz"], Decimal::ZERO),
            }));
        }
        if let Some(asks) = levels.get(1).and_then(|v| v.as_array()) {
            ob.replace_asks(asks.iter().map(|l| OrderbookLevel {
                price: safe_decimal(&l["px"], Decimal::ZERO),
                size: safe_decimal(&l["sz"], Decimal::ZERO),
            }));
        }
    }
    ob.timestamp = raw["time"].as_i64().unwrap_or(0);
    ob
}

pub fn adapt_volume_24h(raw: &Value) -> Volume24h {
    Volume24h {
        base_volume: safe_decimal(&raw["dayBaseVlm"], Decimal::ZERO),
        quote_volume: safe_decimal(&raw["dayNtlVlm"], Decimal::ZERO),
    }
}
