//! Request loop, order submission, and execution-report demultiplexing

use crate::error::GatewayError;
use crate::filters::{self, LotSize};
use crate::user_data::{OwnerCallback, UserDataStream};
use auth::Signer;
use common::{
    ClientId, ClientRequest, ClientResponse, OrderId, PriceCache, Px, Qty, RequestKind,
    ResponseKind, Side, TickerId, TickerInfo, TickerRegistry, TradingConfig,
};
use net::{HttpClient, RateLimiter};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Idle poll interval of the request loop; keeps idle latency well under
/// the 10 ms bound
const IDLE_POLL: Duration = Duration::from_millis(5);

const ORDER_PATH: &str = "/api/v3/order";

/// Cached `/api/v3/exchangeInfo` payload, keyed by symbol
struct SymbolInfoCache {
    entries: FxHashMap<String, Value>,
    refreshed_at: Option<Instant>,
    ttl: Duration,
}

impl SymbolInfoCache {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: FxHashMap::default(),
            refreshed_at: None,
            ttl,
        }
    }

    fn is_stale(&self) -> bool {
        self.entries.is_empty()
            || self
                .refreshed_at
                .is_none_or(|stamp| stamp.elapsed() > self.ttl)
    }

    fn install(&mut self, exchange_info: &Value) {
        self.entries.clear();
        if let Some(symbols) = exchange_info.get("symbols").and_then(Value::as_array) {
            for symbol_info in symbols {
                if let Some(name) = symbol_info.get("symbol").and_then(Value::as_str) {
                    self.entries.insert(name.to_string(), symbol_info.clone());
                }
            }
        }
        self.refreshed_at = Some(Instant::now());
    }

    fn get(&self, symbol: &str) -> Option<Value> {
        self.entries.get(symbol).cloned()
    }
}

/// Order update pushed on the user-data stream
#[derive(Debug, Deserialize)]
struct ExecutionReport {
    #[serde(rename = "c")]
    client_order_id: String,
    // the exchange documents this as a number but has sent it as a string
    #[serde(rename = "i", deserialize_with = "u64_from_number_or_string")]
    exchange_order_id: u64,
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "p")]
    price: String,
    #[serde(rename = "q")]
    orig_qty: String,
    #[serde(rename = "z")]
    cum_exec_qty: String,
}

fn u64_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
    }
}

/// Shared gateway state reachable from both the request-processing thread
/// and the user-data callback thread. Each map has its own mutex and no
/// I/O happens while one is held.
struct GatewayCore {
    client_id: ClientId,
    signer: Arc<Signer>,
    registry: Arc<TickerRegistry>,
    http: HttpClient,
    limiter: RateLimiter,
    responses: bus::Sender<ClientResponse>,
    price_cache: Arc<PriceCache>,
    order_ids: Mutex<FxHashMap<u64, String>>,
    symbol_info: Mutex<SymbolInfoCache>,
    balances: Mutex<FxHashMap<String, f64>>,
}

impl GatewayCore {
    fn handle_request(&self, request: ClientRequest) {
        debug!(kind = ?request.kind, order_id = %request.order_id, "processing request");
        let result = match request.kind {
            RequestKind::New => self.handle_new(&request),
            RequestKind::Cancel => self.handle_cancel(&request),
        };
        if let Err(e) = result {
            warn!(order_id = %request.order_id, error = %e, "request rejected");
            self.respond(
                ResponseKind::CancelRejected,
                &request,
                OrderId::INVALID,
                Qty::ZERO,
                request.qty,
            );
        }
    }

    fn handle_new(&self, request: &ClientRequest) -> Result<(), GatewayError> {
        let ticker_info = self
            .registry
            .info(request.ticker_id)
            .ok_or(GatewayError::UnknownTicker(request.ticker_id))?
            .clone();
        let symbol = ticker_info.symbol.clone();
        if !request.price.is_valid() || request.price <= Px::ZERO {
            return Err(GatewayError::Validation(format!(
                "invalid price {}",
                request.price
            )));
        }
        let mut price = request.price.as_f64();
        let info = self.symbol_info(&symbol);

        // the request's quantity is advisory; actual size comes from the
        // account's free balance
        let qty = self.calc_quantity(&ticker_info, info.as_ref(), price, request.side)?;
        if qty <= 0.0 {
            return Err(GatewayError::Validation(format!(
                "computed quantity {qty} is not positive"
            )));
        }

        self.validate_order_price(&symbol, request.ticker_id, info.as_ref(), price, request.side)?;

        if let Some(info) = info.as_ref() {
            let (min, max) = filters::price_bounds(info);
            if let Some(min) = min {
                if price < min {
                    debug!(%symbol, price, min, "raising price to the filter minimum");
                    price = min;
                }
            }
            if let Some(max) = max {
                if price > max {
                    debug!(%symbol, price, max, "lowering price to the filter maximum");
                    price = max;
                }
            }
        }

        let price_decimals = info
            .as_ref()
            .and_then(filters::tick_decimals)
            .unwrap_or(ticker_info.price_precision as usize);
        let qty_decimals = info
            .as_ref()
            .and_then(filters::step_decimals)
            .unwrap_or(ticker_info.qty_precision as usize);
        let formatted_price = filters::format_decimal(price, price_decimals);
        let formatted_qty = filters::format_decimal(qty, qty_decimals);

        let params = [
            ("symbol", symbol.clone()),
            ("side", request.side.as_exchange_str().to_string()),
            ("type", "LIMIT".to_string()),
            ("timeInForce", "GTC".to_string()),
            ("quantity", formatted_qty.clone()),
            ("price", formatted_price.clone()),
            ("newClientOrderId", format!("x-{}", request.order_id.0)),
        ];
        self.limiter.acquire();
        let signed = self.signer.sign(&params, true);
        let mut headers = Vec::new();
        self.signer.add_auth_header(&mut headers);
        info!(
            %symbol,
            order_id = %request.order_id,
            side = %request.side,
            price = %formatted_price,
            qty = %formatted_qty,
            "submitting order"
        );
        let raw = self.http.post(
            self.signer.rest_base(),
            &format!("{ORDER_PATH}?{signed}"),
            &[],
            &headers,
            None,
        )?;
        let response: Value = serde_json::from_str(&raw)
            .map_err(|_| GatewayError::MalformedResponse("orderId"))?;
        let exchange_id = response
            .get("orderId")
            .and_then(Value::as_i64)
            .ok_or(GatewayError::MalformedResponse("orderId"))?;
        self.order_ids
            .lock()
            .insert(request.order_id.0, exchange_id.to_string());
        info!(order_id = %request.order_id, exchange_id, "order accepted");
        self.respond(
            ResponseKind::Accepted,
            request,
            OrderId::new(exchange_id.unsigned_abs()),
            Qty::ZERO,
            request.qty,
        );
        Ok(())
    }

    fn handle_cancel(&self, request: &ClientRequest) -> Result<(), GatewayError> {
        let symbol = self
            .registry
            .symbol(request.ticker_id)
            .ok_or(GatewayError::UnknownTicker(request.ticker_id))?
            .to_string();
        let exchange_id = self
            .order_ids
            .lock()
            .get(&request.order_id.0)
            .cloned()
            .unwrap_or_else(|| request.order_id.0.to_string());
        let params = [
            ("symbol", symbol.clone()),
            ("orderId", exchange_id.clone()),
        ];
        self.limiter.acquire();
        let signed = self.signer.sign(&params, true);
        let mut headers = Vec::new();
        self.signer.add_auth_header(&mut headers);
        self.http.delete(
            self.signer.rest_base(),
            &format!("{ORDER_PATH}?{signed}"),
            &[],
            &headers,
        )?;
        info!(%symbol, order_id = %request.order_id, %exchange_id, "order canceled");
        let market_order_id = exchange_id
            .parse::<u64>()
            .map_or(request.order_id, OrderId::new);
        self.respond(
            ResponseKind::Canceled,
            request,
            market_order_id,
            Qty::ZERO,
            Qty::ZERO,
        );
        Ok(())
    }

    /// Percent-price validation against the most recent market price.
    /// Fails closed when no market price is obtainable.
    fn validate_order_price(
        &self,
        symbol: &str,
        ticker_id: TickerId,
        info: Option<&Value>,
        order_price: f64,
        side: Side,
    ) -> Result<(), GatewayError> {
        let market_price = self
            .latest_market_price(ticker_id, symbol)
            .ok_or_else(|| {
                GatewayError::Validation(format!("no market price available for {symbol}"))
            })?;
        let bounds = info
            .map(|info| filters::percent_price_bounds(info, side))
            .unwrap_or_default();
        if !filters::price_within_band(order_price, market_price, bounds) {
            return Err(GatewayError::Validation(format!(
                "price {order_price} outside the allowed band around {market_price}"
            )));
        }
        Ok(())
    }

    /// Most recent price: the tee'd price cache first, the REST ticker
    /// endpoint second
    fn latest_market_price(&self, ticker_id: TickerId, symbol: &str) -> Option<f64> {
        if let Some(px) = self.price_cache.last_price(ticker_id) {
            if px.is_valid() && px > Px::ZERO {
                return Some(px.as_f64());
            }
        }
        let query = [("symbol".to_string(), symbol.to_string())];
        match self
            .http
            .get(self.signer.rest_base(), "/api/v3/ticker/price", &query, &[])
        {
            Ok(raw) => serde_json::from_str::<Value>(&raw)
                .ok()?
                .get("price")
                .and_then(filters::num_or_str)
                .filter(|&price| price > 0.0),
            Err(e) => {
                warn!(%symbol, error = %e, "ticker price fetch failed");
                None
            }
        }
    }

    /// Quantity from the free balance of the funding asset, shaped by the
    /// symbol's lot and notional rules
    fn calc_quantity(
        &self,
        ticker_info: &TickerInfo,
        info: Option<&Value>,
        price: f64,
        side: Side,
    ) -> Result<f64, GatewayError> {
        let (base_asset, quote_asset) = info
            .and_then(|info| {
                let base = info.get("baseAsset").and_then(Value::as_str)?;
                let quote = info.get("quoteAsset").and_then(Value::as_str)?;
                Some((base.to_string(), quote.to_string()))
            })
            .unwrap_or_else(|| {
                (
                    ticker_info.base_asset.clone(),
                    ticker_info.quote_asset.clone(),
                )
            });
        let funding_asset = match side {
            Side::Buy => quote_asset,
            Side::Sell => base_asset,
        };
        let balance = self.free_balance(&funding_asset).ok_or_else(|| {
            GatewayError::Validation(format!("no balance available for {funding_asset}"))
        })?;
        let lot = info.and_then(filters::lot_size).unwrap_or(LotSize {
            min_qty: ticker_info.min_qty,
            max_qty: ticker_info.max_qty,
            step_size: ticker_info.step_size,
        });
        let min_notional = info
            .and_then(filters::min_notional)
            .or(Some(ticker_info.min_notional));
        let mut qty = filters::size_order(balance, price, side, lot, min_notional);
        if self.signer.is_testnet() {
            let clipped = qty.min(ticker_info.test_qty).max(lot.min_qty);
            if (clipped - qty).abs() > f64::EPSILON {
                debug!(
                    symbol = %ticker_info.symbol,
                    qty,
                    clipped,
                    "clipping quantity to the testnet ceiling"
                );
            }
            qty = clipped;
        }
        Ok(qty)
    }

    /// Free balance of an asset from a signed account fetch, falling back
    /// to the last snapshot on failure
    fn free_balance(&self, asset: &str) -> Option<f64> {
        self.limiter.acquire();
        let signed = self.signer.sign(&[], true);
        let mut headers = Vec::new();
        self.signer.add_auth_header(&mut headers);
        match self.http.get(
            self.signer.rest_base(),
            &format!("/api/v3/account?{signed}"),
            &[],
            &headers,
        ) {
            Ok(raw) => {
                if let Some(balances) = serde_json::from_str::<Value>(&raw)
                    .ok()
                    .and_then(|value| value.get("balances").and_then(Value::as_array).cloned())
                {
                    let mut cache = self.balances.lock();
                    for balance in &balances {
                        if let (Some(name), Some(free)) = (
                            balance.get("asset").and_then(Value::as_str),
                            balance.get("free").and_then(filters::num_or_str),
                        ) {
                            cache.insert(name.to_string(), free);
                        }
                    }
                    return cache.get(asset).copied();
                }
                warn!("account response missing balances");
                self.balances.lock().get(asset).copied()
            }
            Err(e) => {
                warn!(error = %e, "account fetch failed, using cached balances");
                self.balances.lock().get(asset).copied()
            }
        }
    }

    /// Cached exchange info for a symbol, refreshed when the cache is empty
    /// or older than its TTL. The fetch happens outside the cache lock.
    fn symbol_info(&self, symbol: &str) -> Option<Value> {
        {
            let cache = self.symbol_info.lock();
            if !cache.is_stale() {
                return cache.get(symbol);
            }
        }
        match self
            .http
            .get(self.signer.rest_base(), "/api/v3/exchangeInfo", &[], &[])
        {
            Ok(raw) => match serde_json::from_str::<Value>(&raw) {
                Ok(exchange_info) => {
                    let mut cache = self.symbol_info.lock();
                    cache.install(&exchange_info);
                    info!(symbols = cache.entries.len(), "refreshed symbol info cache");
                    cache.get(symbol)
                }
                Err(e) => {
                    warn!(error = %e, "unparseable exchange info");
                    self.symbol_info.lock().get(symbol)
                }
            },
            Err(e) => {
                warn!(error = %e, "exchange info fetch failed, serving stale cache");
                self.symbol_info.lock().get(symbol)
            }
        }
    }

    /// Entry point for every user-data frame; runs on the stream's I/O
    /// thread and must not block
    fn handle_user_message(&self, raw: &str) {
        let value: Value = match serde_json::from_str(raw) {
            Ok(value) => value,
            Err(e) => {
                warn!(error = %e, "dropping unparseable user-data frame");
                return;
            }
        };
        match value.get("e").and_then(Value::as_str) {
            Some("executionReport") => self.process_execution_report(&value),
            Some("outboundAccountPosition") => self.process_account_position(&value),
            Some(other) => debug!(event = %other, "ignoring user-data event"),
            None => {
                if value.get("event").and_then(Value::as_str) == Some("connection_failure") {
                    error!("user-data stream terminated after exhausting reconnects");
                } else {
                    debug!("user-data frame without an event type");
                }
            }
        }
    }

    fn process_execution_report(&self, value: &Value) {
        let report: ExecutionReport = match serde_json::from_value(value.clone()) {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, "malformed execution report");
                return;
            }
        };
        let Some(order_id) = report
            .client_order_id
            .strip_prefix("x-")
            .and_then(|id| id.parse::<u64>().ok())
        else {
            debug!(
                client_order_id = %report.client_order_id,
                "execution report without an internal order id"
            );
            return;
        };
        self.order_ids
            .lock()
            .insert(order_id, report.exchange_order_id.to_string());

        let kind = match report.status.as_str() {
            "NEW" | "PARTIALLY_FILLED" => ResponseKind::Accepted,
            "FILLED" => ResponseKind::Filled,
            "CANCELED" | "EXPIRED" | "REJECTED" => ResponseKind::Canceled,
            other => {
                debug!(status = %other, "unmapped order status, reporting as accepted");
                ResponseKind::Accepted
            }
        };
        let price = Px::from_decimal_str(&report.price);
        let orig_qty = Qty::from_decimal_str(&report.orig_qty);
        let cum_qty = Qty::from_decimal_str(&report.cum_exec_qty);
        let leaves_qty = if orig_qty.is_valid() && cum_qty.is_valid() {
            Qty::from_units(orig_qty.as_units() - cum_qty.as_units())
        } else {
            Qty::INVALID
        };
        let response = ClientResponse {
            kind,
            client_id: self.client_id,
            ticker_id: self
                .registry
                .ticker_id(&report.symbol)
                .unwrap_or(TickerId::INVALID),
            client_order_id: OrderId::new(order_id),
            market_order_id: OrderId::new(report.exchange_order_id),
            side: Side::from_exchange_str(&report.side).unwrap_or(Side::Buy),
            price,
            exec_qty: cum_qty,
            leaves_qty,
        };
        debug!(
            order_id,
            exchange_id = report.exchange_order_id,
            status = %report.status,
            "execution report demultiplexed"
        );
        if self.responses.send(response).is_err() {
            warn!("engine response queue closed");
        }
    }

    /// Balance snapshot update; produces no engine response
    fn process_account_position(&self, value: &Value) {
        let Some(balances) = value.get("B").and_then(Value::as_array) else {
            return;
        };
        let mut cache = self.balances.lock();
        for balance in balances {
            if let (Some(asset), Some(free)) = (
                balance.get("a").and_then(Value::as_str),
                balance.get("f").and_then(filters::num_or_str),
            ) {
                debug!(%asset, free, "balance updated");
                cache.insert(asset.to_string(), free);
            }
        }
    }

    fn respond(
        &self,
        kind: ResponseKind,
        request: &ClientRequest,
        market_order_id: OrderId,
        exec_qty: Qty,
        leaves_qty: Qty,
    ) {
        let response = ClientResponse {
            kind,
            client_id: self.client_id,
            ticker_id: request.ticker_id,
            client_order_id: request.order_id,
            market_order_id: if market_order_id.is_valid() {
                market_order_id
            } else {
                request.order_id
            },
            side: request.side,
            price: request.price,
            exec_qty,
            leaves_qty,
        };
        if self.responses.send(response).is_err() {
            warn!("engine response queue closed");
        }
    }
}

/// Consumes engine order requests, submits them to the exchange, and emits
/// typed responses from both REST outcomes and user-data events
pub struct OrderGateway {
    core: Arc<GatewayCore>,
    signer: Arc<Signer>,
    max_reconnect_attempts: u32,
    requests: Option<bus::Receiver<ClientRequest>>,
    run_flag: Arc<AtomicBool>,
    worker: Option<std::thread::JoinHandle<()>>,
    user_stream: Option<UserDataStream>,
}

impl OrderGateway {
    /// Wire the gateway to its queues and collaborators
    pub fn new(
        config: &TradingConfig,
        signer: Arc<Signer>,
        registry: Arc<TickerRegistry>,
        requests: bus::Receiver<ClientRequest>,
        responses: bus::Sender<ClientResponse>,
        price_cache: Arc<PriceCache>,
    ) -> Result<Self, GatewayError> {
        let core = Arc::new(GatewayCore {
            client_id: ClientId::new(config.order_gateway.client_id),
            signer: Arc::clone(&signer),
            registry,
            http: HttpClient::new()?,
            limiter: RateLimiter::new(
                config.order_gateway.rate_burst,
                config.order_gateway.rate_limit_per_sec,
            ),
            responses,
            price_cache,
            order_ids: Mutex::new(FxHashMap::default()),
            symbol_info: Mutex::new(SymbolInfoCache::new(Duration::from_secs(
                config.cache_settings.symbol_info_cache_minutes * 60,
            ))),
            balances: Mutex::new(FxHashMap::default()),
        });
        Ok(Self {
            core,
            signer,
            max_reconnect_attempts: config.order_gateway.max_reconnect_attempts,
            requests: Some(requests),
            run_flag: Arc::new(AtomicBool::new(false)),
            worker: None,
            user_stream: None,
        })
    }

    /// Start the user-data stream and the request-processing loop.
    /// Refuses to start without credentials.
    pub fn start(&mut self) -> Result<(), GatewayError> {
        if self.worker.is_some() {
            info!("order gateway already running");
            return Ok(());
        }
        if self.signer.api_key().is_empty() {
            return Err(GatewayError::Credentials(
                "refusing to start without an api key".to_string(),
            ));
        }

        match self
            .core
            .http
            .get(self.signer.rest_base(), "/api/v3/ping", &[], &[])
        {
            Ok(_) => info!(host = self.signer.rest_base(), "exchange reachable"),
            Err(e) => warn!(error = %e, "exchange ping failed, continuing"),
        }

        // user-data stream first so no execution report is missed
        let stream_core = Arc::clone(&self.core);
        let callback: OwnerCallback = Arc::new(move |raw| stream_core.handle_user_message(raw));
        let mut user_stream = UserDataStream::new(
            Arc::clone(&self.signer),
            self.max_reconnect_attempts,
            callback,
        );
        user_stream.start()?;
        self.user_stream = Some(user_stream);

        let requests = self.requests.take().ok_or_else(|| {
            GatewayError::Validation("gateway request queue already consumed".to_string())
        })?;
        self.run_flag.store(true, Ordering::Release);
        let run = Arc::clone(&self.run_flag);
        let core = Arc::clone(&self.core);
        let handle = std::thread::Builder::new()
            .name("order-gateway".to_string())
            .spawn(move || {
                info!("order gateway loop started");
                while run.load(Ordering::Acquire) {
                    match requests.try_recv() {
                        Ok(Some(request)) => core.handle_request(request),
                        Ok(None) => std::thread::sleep(IDLE_POLL),
                        Err(_) => {
                            warn!("engine request queue closed");
                            break;
                        }
                    }
                }
                info!("order gateway loop stopped");
            })
            .map_err(|e| GatewayError::Validation(format!("spawning gateway loop: {e}")))?;
        self.worker = Some(handle);
        info!(client_id = %self.core.client_id, "order gateway started");
        Ok(())
    }

    /// Stop the request loop and the user-data stream
    pub fn stop(&mut self) {
        self.run_flag.store(false, Ordering::Release);
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                error!("order gateway loop panicked");
            }
        }
        if let Some(mut stream) = self.user_stream.take() {
            stream.stop();
        }
        info!("order gateway stopped");
    }
}

impl Drop for OrderGateway {
    fn drop(&mut self) {
        self.stop();
    }
}
