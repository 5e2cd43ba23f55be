//! Venue A orderbook monitor: snapshot+delta reconciliation with gap
//! detection and resync (§4.3). State machine per symbol:
//! `WaitingSnapshot → Syncing → Ready`.

use crate::error::{ExchangeError, ExchangeResult, Venue};
use crate::types::{Orderbook, OrderbookLevel};
use crate::venues::clob::adapters::normalize_symbol;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{info, warn};

const WS_URL: &str = "wss://fx-ws.gateio.ws/v4/ws/usdt";
const MAX_QUEUE_LEN: usize = 1000;
const MAX_RESYNC_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BookState {
    WaitingSnapshot,
    Syncing,
    Ready,
}

#[derive(Debug, Clone, Deserialize)]
struct UpdateResult {
    #[serde(rename = "s")]
    contract: String,
    #[serde(rename = "U")]
    update_id_first: i64,
    #[serde(rename = "u")]
    update_id_last: i64,
    #[serde(rename = "b", default)]
    bids: Vec<WireLevel>,
    #[serde(rename = "a", default)]
    asks: Vec<WireLevel>,
    #[serde(rename = "t", default)]
    time_secs: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct WireLevel {
    p: String,
    s: String,
}

struct SymbolState {
    book: Orderbook,
    queue: VecDeque<UpdateResult>,
    base_id: Option<i64>,
    state: BookState,
}

impl SymbolState {
    fn new(symbol: &str) -> Self {
        Self {
            book: Orderbook::new(symbol.to_string()),
            queue: VecDeque::with_capacity(16),
            base_id: None,
            state: BookState::WaitingSnapshot,
        }
    }
}

struct Symbols {
    map: HashMap<String, SymbolState>,
}

/// REST source for the initial/resync snapshot fetch; the monitor is
/// transport-agnostic beyond this seam so its reconciliation logic can be
/// tested without a network dependency.
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn fetch_snapshot(&self, contract: &str) -> ExchangeResult<RawSnapshot>;
}

pub struct RawSnapshot {
    pub base_id: i64,
    pub bids: Vec<OrderbookLevel>,
    pub asks: Vec<OrderbookLevel>,
    pub timestamp_ms: i64,
}

/// Shared mutable state plus the resync operation, owned as one `Arc` so the
/// WS task and `start()`'s initial-snapshot fan-out both reach the same
/// reconciliation path (§9: "every monitor state must be behind a lock or a
/// single owning actor").
struct Core {
    symbols: Mutex<Symbols>,
    ready: Notify,
    is_ready: AtomicBool,
    shutdown: Notify,
    snapshot_source: Arc<dyn SnapshotSource>,
}

impl Core {
    async fn resync(&self, symbol: &str) {
        {
            let mut guard = self.symbols.lock();
            if let Some(s) = guard.map.get_mut(symbol) {
                s.state = BookState::Syncing;
            }
        }

        let mut attempt = 0;
        loop {
            match self.snapshot_source.fetch_snapshot(symbol).await {
                Ok(snapshot) => {
                    self.apply_snapshot(symbol, snapshot);
                    return;
                }
                Err(e) if attempt < MAX_RESYNC_ATTEMPTS => {
                    attempt += 1;
                    warn!(symbol = %symbol, attempt, error = %e, "orderbook_snapshot_retry");
                    tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "orderbook_snapshot_error");
                    let mut guard = self.symbols.lock();
                    if let Some(s) = guard.map.get_mut(symbol) {
                        s.state = BookState::WaitingSnapshot;
                    }
                    return;
                }
            }
        }
    }

    fn apply_snapshot(&self, symbol: &str, snapshot: RawSnapshot) {
        let mut guard = self.symbols.lock();
        let Some(s) = guard.map.get_mut(symbol) else { return };

        let mut book = Orderbook::new(symbol.to_string());
        book.replace_bids(snapshot.bids);
        book.replace_asks(snapshot.asks);
        book.timestamp = snapshot.timestamp_ms;
        s.book = book;
        s.base_id = Some(snapshot.base_id);

        while let Some(update) = s.queue.front() {
            let base_id = s.base_id.unwrap();
            if update.update_id_last < base_id + 1 {
                s.queue.pop_front();
                continue;
            }
            if update.update_id_first <= base_id + 1 {
                let update = s.queue.pop_front().unwrap();
                apply_delta(&mut s.book, &update);
                s.base_id = Some(update.update_id_last);
            } else {
                break;
            }
        }
        s.queue.clear();
        s.state = BookState::Ready;
        info!(symbol = %symbol, base_id = ?s.base_id, "orderbook_synced");
    }

    /// Applies a WS delta against current state; spawns a resync task if a
    /// gap is detected. Returns nothing — the gap handling is fire-and-forget
    /// exactly like the WS loop itself, matching the source's
    /// `asyncio.create_task`-free inline-await shape translated to a spawn
    /// (the synchronous message handler cannot itself `.await`).
    fn handle_update(self: &Arc<Self>, update: UpdateResult) {
        let symbol = normalize_symbol(&update.contract);
        let mut needs_resync = false;
        {
            let mut guard = self.symbols.lock();
            let Some(s) = guard.map.get_mut(&symbol) else { return };

            match s.state {
                // A resync is already in flight for this symbol: buffer deltas
                // exactly like `WaitingSnapshot` does, and let `apply_snapshot`'s
                // queue replay reconcile them once the fresh snapshot lands.
                // Re-running the gap check here against the same stale `base_id`
                // is what used to spawn a second `resync()` on top of the first.
                BookState::WaitingSnapshot | BookState::Syncing => {
                    if s.queue.len() >= MAX_QUEUE_LEN {
                        s.queue.pop_front();
                    }
                    s.queue.push_back(update);
                    return;
                }
                BookState::Ready => {
                    let Some(base_id) = s.base_id else {
                        warn!(symbol = %symbol, "orderbook_no_base_id");
                        return;
                    };

                    if update.update_id_first > base_id + 1 {
                        warn!(
                            symbol = %symbol,
                            expected = base_id + 1,
                            got = update.update_id_first,
                            "orderbook_gap_detected"
                        );
                        s.state = BookState::Syncing;
                        s.queue.push_back(update);
                        needs_resync = true;
                    } else if update.update_id_last < base_id + 1 {
                        // already applied, discard
                    } else {
                        apply_delta(&mut s.book, &update);
                        s.base_id = Some(update.update_id_last);
                        s.state = BookState::Ready;
                    }
                }
            }
        }

        if needs_resync {
            let core = self.clone();
            tokio::spawn(async move { core.resync(&symbol).await });
        }
    }
}

fn apply_delta(book: &mut Orderbook, update: &UpdateResult) {
    for bid in &update.bids {
        let price = Decimal::from_str(&bid.p).unwrap_or(Decimal::ZERO);
        let size = Decimal::from_str(&bid.s).unwrap_or(Decimal::ZERO);
        book.apply_bid(OrderbookLevel { price, size });
    }
    for ask in &update.asks {
        let price = Decimal::from_str(&ask.p).unwrap_or(Decimal::ZERO);
        let size = Decimal::from_str(&ask.s).unwrap_or(Decimal::ZERO);
        book.apply_ask(OrderbookLevel { price, size });
    }
    book.timestamp = (update.time_secs * 1000.0) as i64;
}

pub struct ClobOrderbookMonitor {
    core: Arc<Core>,
}

impl ClobOrderbookMonitor {
    pub fn new(snapshot_source: Arc<dyn SnapshotSource>) -> Self {
        Self {
            core: Arc::new(Core {
                symbols: Mutex::new(Symbols { map: HashMap::new() }),
                ready: Notify::new(),
                is_ready: AtomicBool::new(false),
                shutdown: Notify::new(),
                snapshot_source,
            }),
        }
    }

    pub fn get_orderbook(&self, symbol: &str) -> Option<Orderbook> {
        self.core.symbols.lock().map.get(symbol).map(|s| s.book.clone())
    }

    pub fn has_orderbook(&self, symbol: &str) -> bool {
        self.core
            .symbols
            .lock()
            .map
            .get(symbol)
            .map(|s| s.state == BookState::Ready)
            .unwrap_or(false)
    }

    pub async fn start(&self, symbols: Vec<String>) -> ExchangeResult<()> {
        {
            let mut guard = self.core.symbols.lock();
            for symbol in &symbols {
                guard.map.insert(symbol.clone(), SymbolState::new(symbol));
            }
        }

        let contracts: Vec<String> = symbols
            .iter()
            .map(|s| crate::venues::clob::adapters::denormalize_symbol(s))
            .collect();

        let core = self.core.clone();
        tokio::spawn(run_loop(contracts, core));

        tokio::select! {
            _ = self.core.ready.notified() => {}
            _ = tokio::time::sleep(Duration::from_secs(30)) => {
                return Err(ExchangeError::ws(Venue::Clob, "orderbook monitor failed to start within 30s"));
            }
        }

        let fetches = symbols.iter().map(|symbol| self.core.resync(symbol));
        futures_util::future::join_all(fetches).await;

        Ok(())
    }

    pub fn stop(&self) {
        self.core.shutdown.notify_waiters();
    }
}

async fn run_loop(contracts: Vec<String>, core: Arc<Core>) {
    let mut reconnect_delay = Duration::from_secs(1);
    let max_reconnect_delay = Duration::from_secs(60);

    loop {
        tokio::select! {
            _ = core.shutdown.notified() => return,
            result = connect_and_stream(&contracts, &core) => {
                match result {
                    Ok(_) => reconnect_delay = Duration::from_secs(1),
                    Err(e) => {
                        warn!(error = %e, "orderbook_ws_error");
                        tokio::time::sleep(reconnect_delay).await;
                        reconnect_delay = (reconnect_delay * 2).min(max_reconnect_delay);
                    }
                }
            }
        }
    }
}

async fn connect_and_stream(contracts: &[String], core: &Arc<Core>) -> anyhow::Result<()> {
    info!(url = WS_URL, "orderbook_monitor_connecting");
    let (ws_stream, _resp) = connect_async(WS_URL).await?;
    let (mut write, mut read) = ws_stream.split();

    let subscriptions: Vec<[String; 3]> = contracts
        .iter()
        .map(|c| [c.clone(), "100ms".to_string(), "100".to_string()])
        .collect();
    let subscribe_msg = serde_json::json!({
        "time": chrono::Utc::now().timestamp(),
        "channel": "futures.order_book_update",
        "event": "subscribe",
        "payload": subscriptions,
    });
    write.send(Message::Text(subscribe_msg.to_string())).await?;
    info!(contracts = contracts.len(), "orderbook_monitor_subscribe_sent");

    let mut ping = tokio::time::interval(Duration::from_secs(20));

    loop {
        tokio::select! {
            _ = core.shutdown.notified() => return Ok(()),
            _ = ping.tick() => {
                let _ = write.send(Message::Ping(vec![])).await;
            }
            msg = read.next() => {
                let Some(msg) = msg else {
                    return Err(anyhow::anyhow!("orderbook monitor ws stream ended"));
                };
                match msg? {
                    Message::Text(text) => handle_text_message(&text, core),
                    Message::Ping(payload) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
        }
    }
}

fn handle_text_message(text: &str, core: &Arc<Core>) {
    let json: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(_) => return,
    };

    if json.get("channel").and_then(|v| v.as_str()) != Some("futures.order_book_update") {
        return;
    }

    match json.get("event").and_then(|v| v.as_str()) {
        Some("update") => {
            let Some(result) = json.get("result") else { return };
            let update: UpdateResult = match serde_json::from_value(result.clone()) {
                Ok(u) => u,
                Err(e) => {
                    warn!(error = %e, "orderbook_parse_error");
                    return;
                }
            };
            core.handle_update(update);
        }
        Some("subscribe") => {
            if !core.is_ready.swap(true, Ordering::SeqCst) {
                info!("orderbook_monitor_subscribed");
                core.ready.notify_waiters();
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn level(p: &str, s: &str) -> WireLevel {
        WireLevel { p: p.to_string(), s: s.to_string() }
    }

    struct NeverSnapshot;
    #[async_trait::async_trait]
    impl SnapshotSource for NeverSnapshot {
        async fn fetch_snapshot(&self, _contract: &str) -> ExchangeResult<RawSnapshot> {
            Err(ExchangeError::connection(Venue::Clob, "unused in this test"))
        }
    }

    fn test_core() -> Arc<Core> {
        Arc::new(Core {
            symbols: Mutex::new(Symbols { map: HashMap::new() }),
            ready: Notify::new(),
            is_ready: AtomicBool::new(false),
            shutdown: Notify::new(),
            snapshot_source: Arc::new(NeverSnapshot),
        })
    }

    fn seed(core: &Arc<Core>, symbol: &str, base_id: i64, state: BookState) {
        let mut guard = core.symbols.lock();
        let mut st = SymbolState::new(symbol);
        st.base_id = Some(base_id);
        st.state = state;
        guard.map.insert(symbol.to_string(), st);
    }

    #[test]
    fn gap_triggers_resync_state() {
        let core = test_core();
        seed(&core, "BTC", 50, BookState::Ready);

        core.handle_update(UpdateResult {
            contract: "BTC_USDT".to_string(),
            update_id_first: 52,
            update_id_last: 54,
            bids: vec![],
            asks: vec![],
            time_secs: 0.0,
        });

        assert_eq!(core.symbols.lock().map["BTC"].state, BookState::Syncing);
    }

    #[test]
    fn stale_update_discarded_without_gap() {
        let core = test_core();
        seed(&core, "BTC", 50, BookState::Ready);

        core.handle_update(UpdateResult {
            contract: "BTC_USDT".to_string(),
            update_id_first: 10,
            update_id_last: 20,
            bids: vec![],
            asks: vec![],
            time_secs: 0.0,
        });

        let guard = core.symbols.lock();
        assert_eq!(guard.map["BTC"].base_id, Some(50));
        assert_eq!(guard.map["BTC"].state, BookState::Ready);
    }

    #[test]
    fn in_order_update_advances_base_id() {
        let core = test_core();
        seed(&core, "BTC", 54, BookState::Ready);

        core.handle_update(UpdateResult {
            contract: "BTC_USDT".to_string(),
            update_id_first: 55,
            update_id_last: 55,
            bids: vec![level("100", "2")],
            asks: vec![],
            time_secs: 1.0,
        });

        let guard = core.symbols.lock();
        assert_eq!(guard.map["BTC"].base_id, Some(55));
        assert_eq!(guard.map["BTC"].book.best_bid().unwrap().price, dec!(100));
    }

    #[test]
    fn waiting_snapshot_buffers_updates() {
        let core = test_core();
        core.symbols.lock().map.insert("BTC".to_string(), SymbolState::new("BTC"));

        core.handle_update(UpdateResult {
            contract: "BTC_USDT".to_string(),
            update_id_first: 1,
            update_id_last: 1,
            bids: vec![],
            asks: vec![],
            time_secs: 0.0,
        });

        assert_eq!(core.symbols.lock().map["BTC"].queue.len(), 1);
    }

    #[test]
    fn zero_size_delta_removes_level() {
        let core = test_core();
        seed(&core, "BTC", 10, BookState::Ready);
        core.symbols.lock().map.get_mut("BTC").unwrap().book.apply_bid(OrderbookLevel { price: dec!(100), size: dec!(5) });

        core.handle_update(UpdateResult {
            contract: "BTC_USDT".to_string(),
            update_id_first: 11,
            update_id_last: 11,
            bids: vec![level("100", "0")],
            asks: vec![],
            time_secs: 0.0,
        });

        assert!(core.symbols.lock().map["BTC"].book.best_bid().is_none());
    }
}
