pub mod adapters;
pub mod client;
pub mod orderbook_monitor;
pub mod price_monitor;

pub use client::ClobClient;
