//! Environment-driven configuration.
//!
//! Mirrors the `Config::from_env` pattern: required credentials hard-error,
//! everything else parses with a sane default.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;

#[derive(Debug, Clone)]
pub struct ClobConfig {
    pub api_key: String,
    pub api_secret: String,
    pub dual_mode: bool,
    pub taker_fee_pct: Decimal,
}

#[derive(Debug, Clone)]
pub struct OnchainConfig {
    pub account_address: String,
    pub private_key: String,
    pub taker_fee_pct: Decimal,
}

/// Tail-slippage extrapolation factor used by `estimate_fill_price` when the
/// requested size exceeds visible book depth. Named per the spec's open
/// question rather than inlined as a magic literal.
#[derive(Debug, Clone, Copy)]
pub struct FillEstimateConfig {
    pub tail_slippage_pct: Decimal,
}

impl Default for FillEstimateConfig {
    fn default() -> Self {
        Self {
            tail_slippage_pct: dec!(0.005),
        }
    }
}

/// `MinSpread` mode parameters (spec.md §3 `ArbitrageMode`). Immutable for the
/// life of the bot.
#[derive(Debug, Clone)]
pub struct MinSpreadMode {
    pub entry_threshold_pct: Decimal,
    pub usd_size_per_pos: Decimal,
    pub take_profit_spread_pct: Decimal,
    pub stop_loss_widening_pct: Decimal,
    pub timeout_minutes: u32,
    pub min_24h_quote_volume_usd: Decimal,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub clob: ClobConfig,
    pub onchain: OnchainConfig,
    pub mode: MinSpreadMode,
    pub fill_estimate: FillEstimateConfig,
    pub min_balance_usd: Decimal,
    pub max_positions: usize,
    pub volume_refresh_interval_secs: u64,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|v| Decimal::from_str_exact(&v).ok())
        .unwrap_or(default)
}

fn env_required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("missing required env var {key}"))
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let clob = ClobConfig {
            api_key: env_required("GATE_API_KEY")?,
            api_secret: env_required("GATE_API_SECRET")?,
            dual_mode: env_required("GATE_DUAL_MODE")?
                .parse()
                .map_err(|e| anyhow::anyhow!("invalid GATE_DUAL_MODE: {e}"))?,
            taker_fee_pct: env_decimal("GATE_TAKER_FEE_PCT", dec!(0.0005)),
        };

        let onchain = OnchainConfig {
            account_address: env_required("HYPERLIQUID_ACCOUNT_ADDRESS")?,
            private_key: env_required("HYPERLIQUID_PRIVATE_KEY")?,
            taker_fee_pct: env_decimal("HYPERLIQUID_TAKER_FEE_PCT", dec!(0.00025)),
        };

        let mode = MinSpreadMode {
            entry_threshold_pct: env_decimal("MIN_SPREAD_PCT", dec!(2.5)),
            usd_size_per_pos: env_decimal("USD_SIZE_PER_POS", dec!(100)),
            take_profit_spread_pct: env_decimal("TAKE_PROFIT_SPREAD_PCT", dec!(0.5)),
            stop_loss_widening_pct: env_decimal("STOP_LOSS_WIDENING_PCT", dec!(2.0)),
            timeout_minutes: env_parse("MAX_POSITION_TIME_MINUTES", 20),
            min_24h_quote_volume_usd: env_decimal("MIN_24H_VOLUME_USD", dec!(1_000_000)),
        };

        Ok(Self {
            clob,
            onchain,
            mode,
            fill_estimate: FillEstimateConfig::default(),
            min_balance_usd: env_decimal("MIN_BALANCE_USD", dec!(100)),
            max_positions: env_parse("MAX_POSITIONS", 5usize),
            volume_refresh_interval_secs: env_parse("VOLUME_REFRESH_INTERVAL_SECS", 300u64),
        })
    }
}
