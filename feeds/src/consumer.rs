//! Per-symbol stream ownership and snapshot refresh

use crate::messages::{parse_levels, DepthEvent, DepthSnapshot, TradeEvent};
use anyhow::{Context, Result};
use common::{
    MarketUpdate, OrderId, PriceCache, Px, Qty, Side, TickerId, TickerRegistry, UpdateKind,
};
use lob::{DeltaOutcome, OrderBook};
use net::{HttpClient, WsClient};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Period of the snapshot refresh loop when nothing wakes it earlier
pub const SNAPSHOT_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Depth levels requested per snapshot
const DEFAULT_DEPTH_LIMIT: u32 = 20;

/// Wakes the refresh thread on disconnects and sequence gaps
struct RefreshSignal {
    state: Mutex<RefreshState>,
    cv: Condvar,
}

struct RefreshState {
    stop: bool,
    kick: bool,
}

impl RefreshSignal {
    fn new() -> Self {
        Self {
            state: Mutex::new(RefreshState {
                stop: false,
                kick: false,
            }),
            cv: Condvar::new(),
        }
    }

    fn kick(&self) {
        let mut state = self.state.lock();
        state.kick = true;
        self.cv.notify_one();
    }

    fn stop(&self) {
        let mut state = self.state.lock();
        state.stop = true;
        self.cv.notify_all();
    }

    /// Wait for the next refresh cycle; returns true when stopping
    fn wait_cycle(&self, period: Duration) -> bool {
        let mut state = self.state.lock();
        if !state.stop && !state.kick {
            let _ = self.cv.wait_for(&mut state, period);
        }
        state.kick = false;
        state.stop
    }
}

/// Streams depth and trades for every configured symbol into the engine's
/// market-update queue, keeping local books synchronized via REST snapshots.
///
/// Exclusively owns its order books and WebSocket clients.
pub struct MarketDataConsumer {
    registry: Arc<TickerRegistry>,
    rest_host: String,
    ws_host: String,
    depth_limit: u32,
    updates: bus::Sender<MarketUpdate>,
    price_cache: Arc<PriceCache>,
    books: FxHashMap<String, Arc<Mutex<OrderBook>>>,
    depth_clients: Vec<WsClient>,
    trade_clients: Vec<WsClient>,
    refresh: Arc<RefreshSignal>,
    refresh_thread: Option<std::thread::JoinHandle<()>>,
    running: bool,
}

impl MarketDataConsumer {
    /// Create a consumer for the configured instruments
    #[must_use]
    pub fn new(
        registry: Arc<TickerRegistry>,
        use_testnet: bool,
        updates: bus::Sender<MarketUpdate>,
        price_cache: Arc<PriceCache>,
    ) -> Self {
        let (rest_host, ws_host) = if use_testnet {
            ("testnet.binance.vision", "stream.testnet.binance.vision")
        } else {
            ("api.binance.com", "stream.binance.com")
        };
        Self {
            registry,
            rest_host: rest_host.to_string(),
            ws_host: ws_host.to_string(),
            depth_limit: DEFAULT_DEPTH_LIMIT,
            updates,
            price_cache,
            books: FxHashMap::default(),
            depth_clients: Vec::new(),
            trade_clients: Vec::new(),
            refresh: Arc::new(RefreshSignal::new()),
            refresh_thread: None,
            running: false,
        }
    }

    /// Open both streams per symbol, apply initial snapshots, and start the
    /// refresh thread
    pub fn start(&mut self) -> Result<()> {
        if self.running {
            info!("market-data consumer already running");
            return Ok(());
        }
        let http = HttpClient::new().context("building snapshot http client")?;

        let registry = Arc::clone(&self.registry);
        for ticker_info in registry.iter() {
            let symbol = ticker_info.symbol.clone();
            let ticker_id = TickerId::new(ticker_info.ticker_id);
            let lower = symbol.to_lowercase();
            let book = Arc::new(Mutex::new(OrderBook::new(symbol.clone(), ticker_id)));
            self.books.insert(symbol.clone(), Arc::clone(&book));

            let mut depth_client = WsClient::new();
            depth_client.set_max_reconnect_attempts(0);
            {
                let book = Arc::clone(&book);
                let updates = self.updates.clone();
                let cache = Arc::clone(&self.price_cache);
                let refresh = Arc::clone(&self.refresh);
                let status_book = Arc::clone(&book);
                let status_refresh = Arc::clone(&self.refresh);
                let status_symbol = symbol.clone();
                let msg_symbol = symbol.clone();
                depth_client.connect(
                    &self.ws_host,
                    443,
                    &format!("/ws/{lower}@depth"),
                    Box::new(move |raw| {
                        handle_depth_message(&msg_symbol, raw, &book, &updates, &cache, &refresh);
                    }),
                    Box::new(move |connected| {
                        if !connected {
                            status_book.lock().mark_needs_refresh();
                            status_refresh.kick();
                            warn!(symbol = %status_symbol, "depth stream disconnected");
                        }
                    }),
                )?;
            }

            let mut trade_client = WsClient::new();
            trade_client.set_max_reconnect_attempts(0);
            {
                let updates = self.updates.clone();
                let msg_symbol = symbol.clone();
                trade_client.connect(
                    &self.ws_host,
                    443,
                    &format!("/ws/{lower}@trade"),
                    Box::new(move |raw| {
                        handle_trade_message(&msg_symbol, raw, ticker_id, &updates);
                    }),
                    Box::new(|_| {}),
                )?;
            }

            self.depth_clients.push(depth_client);
            self.trade_clients.push(trade_client);
            info!(%symbol, "opened depth and trade streams");

            if let Err(e) = refresh_snapshot(
                &http,
                &self.rest_host,
                self.depth_limit,
                &symbol,
                &book,
                &self.updates,
                &self.price_cache,
            ) {
                warn!(%symbol, error = %e, "initial snapshot failed, refresh loop will retry");
                book.lock().mark_needs_refresh();
            }
        }

        self.spawn_refresh_thread()?;
        self.running = true;
        info!(symbols = self.books.len(), "market-data consumer started");
        Ok(())
    }

    /// Stop the refresh thread, disconnect all streams, and drop the books
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.refresh.stop();
        if let Some(handle) = self.refresh_thread.take() {
            if handle.join().is_err() {
                error!("snapshot refresh thread panicked");
            }
        }
        for client in &mut self.depth_clients {
            client.disconnect();
        }
        for client in &mut self.trade_clients {
            client.disconnect();
        }
        self.depth_clients.clear();
        self.trade_clients.clear();
        self.books.clear();
        self.running = false;
        info!("market-data consumer stopped");
    }

    /// Best bid for a symbol, or the invalid sentinel
    #[must_use]
    pub fn best_bid(&self, symbol: &str) -> Px {
        self.books
            .get(symbol)
            .map_or(Px::INVALID, |book| book.lock().best_bid())
    }

    /// Best ask for a symbol, or the invalid sentinel
    #[must_use]
    pub fn best_ask(&self, symbol: &str) -> Px {
        self.books
            .get(symbol)
            .map_or(Px::INVALID, |book| book.lock().best_ask())
    }

    /// Whether the symbol's book is currently synchronized
    #[must_use]
    pub fn is_book_valid(&self, symbol: &str) -> bool {
        self.books
            .get(symbol)
            .is_some_and(|book| book.lock().is_valid())
    }

    fn spawn_refresh_thread(&mut self) -> Result<()> {
        let refresh = Arc::clone(&self.refresh);
        let books: Vec<(String, Arc<Mutex<OrderBook>>)> = self
            .books
            .iter()
            .map(|(symbol, book)| (symbol.clone(), Arc::clone(book)))
            .collect();
        let rest_host = self.rest_host.clone();
        let depth_limit = self.depth_limit;
        let updates = self.updates.clone();
        let cache = Arc::clone(&self.price_cache);

        let handle = std::thread::Builder::new()
            .name("md-refresh".to_string())
            .spawn(move || {
                let http = match HttpClient::new() {
                    Ok(client) => client,
                    Err(e) => {
                        error!(error = %e, "refresh thread could not build http client");
                        return;
                    }
                };
                info!("snapshot refresh thread started");
                loop {
                    if refresh.wait_cycle(SNAPSHOT_REFRESH_INTERVAL) {
                        break;
                    }
                    for (symbol, book) in &books {
                        if !book.lock().needs_refresh() {
                            continue;
                        }
                        info!(%symbol, "refreshing order book snapshot");
                        if let Err(e) = refresh_snapshot(
                            &http,
                            &rest_host,
                            depth_limit,
                            symbol,
                            book,
                            &updates,
                            &cache,
                        ) {
                            warn!(%symbol, error = %e, "snapshot refresh failed");
                        }
                    }
                }
                info!("snapshot refresh thread stopped");
            })
            .context("spawning snapshot refresh thread")?;
        self.refresh_thread = Some(handle);
        Ok(())
    }
}

impl Drop for MarketDataConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Fetch and apply one snapshot, emitting CLEAR + ADDs downstream
fn refresh_snapshot(
    http: &HttpClient,
    rest_host: &str,
    depth_limit: u32,
    symbol: &str,
    book: &Arc<Mutex<OrderBook>>,
    updates: &bus::Sender<MarketUpdate>,
    cache: &Arc<PriceCache>,
) -> Result<()> {
    let query = [
        ("symbol".to_string(), symbol.to_uppercase()),
        ("limit".to_string(), depth_limit.to_string()),
    ];
    let raw = http
        .get(rest_host, "/api/v3/depth", &query, &[])
        .with_context(|| format!("fetching depth snapshot for {symbol}"))?;
    let snapshot: DepthSnapshot = serde_json::from_str(&raw)
        .with_context(|| format!("parsing depth snapshot for {symbol}"))?;
    let bids = parse_levels(&snapshot.bids);
    let asks = parse_levels(&snapshot.asks);

    let mut emitted = Vec::new();
    {
        let mut book = book.lock();
        if book.apply_snapshot(snapshot.last_update_id, &bids, &asks) {
            book.generate_updates(&mut emitted);
        }
    }
    push_updates(emitted, updates, cache);
    Ok(())
}

fn push_updates(
    emitted: Vec<MarketUpdate>,
    updates: &bus::Sender<MarketUpdate>,
    cache: &Arc<PriceCache>,
) {
    for update in emitted {
        cache.observe(&update);
        if updates.send(update).is_err() {
            warn!("engine market-update queue closed");
            break;
        }
    }
}

fn handle_depth_message(
    symbol: &str,
    raw: &str,
    book: &Arc<Mutex<OrderBook>>,
    updates: &bus::Sender<MarketUpdate>,
    cache: &Arc<PriceCache>,
    refresh: &Arc<RefreshSignal>,
) {
    let event: DepthEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => {
            warn!(%symbol, error = %e, "dropping unparseable depth frame");
            return;
        }
    };
    let bids = parse_levels(&event.bids);
    let asks = parse_levels(&event.asks);

    let mut emitted = Vec::new();
    let outcome = {
        let mut book = book.lock();
        let outcome = book.apply_delta(
            event.first_update_id,
            event.final_update_id,
            &bids,
            &asks,
        );
        if outcome == DeltaOutcome::Applied {
            book.generate_updates(&mut emitted);
        }
        outcome
    };
    match outcome {
        DeltaOutcome::Applied => push_updates(emitted, updates, cache),
        DeltaOutcome::NotSynced | DeltaOutcome::Gap | DeltaOutcome::Crossed => {
            debug!(%symbol, ?outcome, "depth delta dropped, requesting refresh");
            refresh.kick();
        }
        DeltaOutcome::Stale => {}
    }
}

// trade prints go straight to the engine; the price cache only follows
// book updates
fn handle_trade_message(
    symbol: &str,
    raw: &str,
    ticker_id: TickerId,
    updates: &bus::Sender<MarketUpdate>,
) {
    let event: TradeEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(e) => {
            warn!(%symbol, error = %e, "dropping unparseable trade frame");
            return;
        }
    };
    let price = Px::from_decimal_str(&event.price);
    let qty = Qty::from_decimal_str(&event.quantity);
    if !price.is_valid() || !qty.is_valid() {
        warn!(%symbol, "dropping trade with unparseable price or quantity");
        return;
    }
    let side = if event.is_buyer_maker {
        Side::Sell
    } else {
        Side::Buy
    };
    let update = MarketUpdate {
        kind: UpdateKind::Trade,
        ticker_id,
        side,
        price,
        qty,
        order_id: OrderId::INVALID,
        priority: 0,
    };
    if updates.send(update).is_err() {
        warn!("engine market-update queue closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_message_flows_into_book_and_queue() {
        let (tx, rx) = bus::unbounded::<MarketUpdate>();
        let cache = Arc::new(PriceCache::new());
        let refresh = Arc::new(RefreshSignal::new());
        let book = Arc::new(Mutex::new(OrderBook::new("BTCUSDT", TickerId::new(1))));
        book.lock().apply_snapshot(
            100,
            &[(Px::new(10.0), Qty::new(1.0))],
            &[(Px::new(10.5), Qty::new(2.0))],
        );

        let raw = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":101,"u":102,
                      "b":[["10.0","0"]],"a":[["10.4","3.0"]]}"#;
        handle_depth_message("BTCUSDT", raw, &book, &tx, &cache, &refresh);

        assert_eq!(book.lock().last_update_id(), 102);
        // CLEAR + two asks, no bids left
        let mut received = Vec::new();
        while let Ok(Some(update)) = rx.try_recv() {
            received.push(update);
        }
        assert_eq!(received.len(), 3);
        assert_eq!(received[0].kind, UpdateKind::Clear);
        assert_eq!(received[1].price, Px::new(10.4));
        assert_eq!(received[2].price, Px::new(10.5));
        assert_eq!(cache.last_price(TickerId::new(1)), Some(Px::new(10.5)));
    }

    #[test]
    fn gap_delta_kicks_the_refresh_signal() {
        let (tx, rx) = bus::unbounded::<MarketUpdate>();
        let cache = Arc::new(PriceCache::new());
        let refresh = Arc::new(RefreshSignal::new());
        let book = Arc::new(Mutex::new(OrderBook::new("BTCUSDT", TickerId::new(1))));
        book.lock().apply_snapshot(
            100,
            &[(Px::new(10.0), Qty::new(1.0))],
            &[(Px::new(10.5), Qty::new(2.0))],
        );

        let raw = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":250,"u":260,
                      "b":[],"a":[]}"#;
        handle_depth_message("BTCUSDT", raw, &book, &tx, &cache, &refresh);

        assert!(book.lock().needs_refresh());
        assert!(rx.try_recv().expect("queue intact").is_none());
        // the kick is consumed by the next wait cycle without sleeping
        assert!(!refresh.wait_cycle(Duration::from_millis(1)));
    }

    #[test]
    fn trade_message_maps_maker_flag_to_side() {
        let (tx, rx) = bus::unbounded::<MarketUpdate>();
        let ticker = TickerId::new(2);

        let sell_raw = r#"{"e":"trade","E":1,"s":"ETHUSDT","p":"2000.5","q":"0.25","m":true}"#;
        handle_trade_message("ETHUSDT", sell_raw, ticker, &tx);
        let buy_raw = r#"{"e":"trade","E":2,"s":"ETHUSDT","p":"2001.0","q":"0.5","m":false}"#;
        handle_trade_message("ETHUSDT", buy_raw, ticker, &tx);

        let first = rx.try_recv().expect("intact").expect("first trade");
        assert_eq!(first.kind, UpdateKind::Trade);
        assert_eq!(first.side, Side::Sell);
        assert_eq!(first.price, Px::new(2000.5));
        assert_eq!(first.qty, Qty::new(0.25));

        let second = rx.try_recv().expect("intact").expect("second trade");
        assert_eq!(second.side, Side::Buy);
    }

    #[test]
    fn trade_prints_do_not_feed_the_price_cache() {
        let (tx, rx) = bus::unbounded::<MarketUpdate>();
        let cache = Arc::new(PriceCache::new());
        let refresh = Arc::new(RefreshSignal::new());
        let ticker = TickerId::new(1);
        let book = Arc::new(Mutex::new(OrderBook::new("BTCUSDT", ticker)));
        book.lock().apply_snapshot(
            100,
            &[(Px::new(30_000.0), Qty::new(1.0))],
            &[(Px::new(30_000.5), Qty::new(2.0))],
        );
        let depth_raw = r#"{"e":"depthUpdate","E":1,"s":"BTCUSDT","U":101,"u":101,
                            "b":[["29999.5","1.0"]],"a":[]}"#;
        handle_depth_message("BTCUSDT", depth_raw, &book, &tx, &cache, &refresh);
        let book_price = cache.last_price(ticker).expect("book updates cached");

        // an aggressive print through the book must not move the validation
        // price the gateway reads
        let trade_raw = r#"{"e":"trade","E":2,"s":"BTCUSDT","p":"28000.0","q":"3.0","m":true}"#;
        handle_trade_message("BTCUSDT", trade_raw, ticker, &tx);
        assert_eq!(cache.last_price(ticker), Some(book_price));
        assert!(rx.try_recv().expect("queue intact").is_some());
    }

    #[test]
    fn unparseable_frames_are_dropped_without_panic() {
        let (tx, rx) = bus::unbounded::<MarketUpdate>();
        let cache = Arc::new(PriceCache::new());
        let refresh = Arc::new(RefreshSignal::new());
        let book = Arc::new(Mutex::new(OrderBook::new("BTCUSDT", TickerId::new(1))));

        handle_depth_message("BTCUSDT", "{ not json", &book, &tx, &cache, &refresh);
        handle_trade_message("BTCUSDT", "{}", TickerId::new(1), &tx);
        assert!(rx.try_recv().expect("queue intact").is_none());
    }
}
