//! User-data stream: listen-key lifecycle, keep-alive, reconnect
//!
//! Private account and order events arrive on a WebSocket authorized by an
//! opaque listen key. The key must be extended every 30 minutes; a dropped
//! connection or failed keep-alive is recovered by issuing a fresh key and
//! reopening the socket. All blocking recovery work runs on one supervisor
//! thread; WebSocket callbacks only record state and notify it.
//!
//! Connects are asynchronous: initiating one marks it pending, and only the
//! status callback settles it. The supervisor acts on settled state, so an
//! in-flight handshake is never counted as a failure.

use crate::error::GatewayError;
use auth::Signer;
use net::{backoff, HttpClient, WsClient};
use parking_lot::{Condvar, Mutex};
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Listen keys stay valid for 60 minutes; extend them at half that
pub const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(30 * 60);

const LISTEN_KEY_PATH: &str = "/api/v3/userDataStream";

/// Callback receiving every user-data frame verbatim; must not block
pub type OwnerCallback = Arc<dyn Fn(&str) + Send + Sync + 'static>;

struct StreamState {
    listen_key: String,
    disconnected: bool,
    /// A connect was initiated but its handshake has not settled yet
    pending_connect: bool,
}

struct StreamShared {
    running: AtomicBool,
    state: Mutex<StreamState>,
    cv: Condvar,
}

impl StreamShared {
    fn new() -> Self {
        Self {
            running: AtomicBool::new(false),
            state: Mutex::new(StreamState {
                listen_key: String::new(),
                disconnected: false,
                pending_connect: false,
            }),
            cv: Condvar::new(),
        }
    }

    /// Interruptible sleep; returns early when the stream is stopped or a
    /// disconnect settles. Blocks while a connect is still in flight.
    fn wait(&self, timeout: Duration) {
        let mut state = self.state.lock();
        if self.running.load(Ordering::Acquire) && (state.pending_connect || !state.disconnected) {
            let _ = self.cv.wait_for(&mut state, timeout);
        }
    }

    /// Socket status transition, recorded from the WS I/O thread
    fn on_socket_status(&self, connected: bool) {
        let mut state = self.state.lock();
        state.disconnected = !connected;
        state.pending_connect = false;
        self.cv.notify_all();
    }

    /// Flag an initiated connect whose handshake has not settled
    fn mark_connect_pending(&self) {
        self.state.lock().pending_connect = true;
    }

    fn health(&self) -> StreamHealth {
        let state = self.state.lock();
        if state.pending_connect {
            StreamHealth::Settling
        } else if state.disconnected {
            StreamHealth::Disconnected
        } else {
            StreamHealth::Connected
        }
    }
}

/// Settled stream condition, read by the supervisor each cycle
enum StreamHealth {
    Connected,
    Disconnected,
    Settling,
}

/// Consecutive-failure tracking against the reconnect budget
struct ReconnectPolicy {
    attempts: u32,
    delay: Duration,
    max_attempts: u32,
}

impl ReconnectPolicy {
    fn new(max_attempts: u32) -> Self {
        Self {
            attempts: 0,
            delay: backoff::INITIAL_DELAY,
            max_attempts,
        }
    }

    /// Backoff delay for the next attempt, or None once the budget is spent
    fn next_attempt(&mut self) -> Option<Duration> {
        self.attempts += 1;
        if self.max_attempts != 0 && self.attempts > self.max_attempts {
            return None;
        }
        let delay = self.delay;
        self.delay = backoff::next_delay(self.delay);
        Some(delay)
    }

    /// A connection settled healthy; clear the failure streak
    fn reset(&mut self) {
        self.attempts = 0;
        self.delay = backoff::INITIAL_DELAY;
    }

    fn attempts(&self) -> u32 {
        self.attempts
    }
}

fn connection_failure_payload(reconnect_attempts: u32, max_attempts: u32) -> String {
    json!({
        "event": "connection_failure",
        "error": "Max reconnection attempts reached",
        "reconnect_attempts": reconnect_attempts,
        "max_attempts": max_attempts,
    })
    .to_string()
}

/// Private account + order event stream with listen-key lifecycle
pub struct UserDataStream {
    signer: Arc<Signer>,
    callback: OwnerCallback,
    max_reconnect_attempts: u32,
    shared: Arc<StreamShared>,
    supervisor: Option<std::thread::JoinHandle<()>>,
}

impl UserDataStream {
    /// Create a stopped stream
    #[must_use]
    pub fn new(signer: Arc<Signer>, max_reconnect_attempts: u32, callback: OwnerCallback) -> Self {
        Self {
            signer,
            callback,
            max_reconnect_attempts,
            shared: Arc::new(StreamShared::new()),
            supervisor: None,
        }
    }

    /// Obtain a listen key, open the stream, and start the keep-alive /
    /// reconnect supervisor
    pub fn start(&mut self) -> Result<(), GatewayError> {
        if self.shared.running.load(Ordering::Acquire) {
            info!("user-data stream already running");
            return Ok(());
        }
        let http = HttpClient::new()?;
        let listen_key = create_listen_key(&http, &self.signer)?;
        info!("user-data stream listen key obtained");
        {
            let mut state = self.shared.state.lock();
            state.listen_key = listen_key.clone();
            state.disconnected = false;
            state.pending_connect = false;
        }
        self.shared.running.store(true, Ordering::Release);

        let mut ws = WsClient::new();
        if let Err(e) =
            connect_user_ws(&mut ws, &self.signer, &listen_key, &self.callback, &self.shared)
        {
            self.shared.running.store(false, Ordering::Release);
            return Err(e);
        }

        let shared = Arc::clone(&self.shared);
        let signer = Arc::clone(&self.signer);
        let callback = Arc::clone(&self.callback);
        let max_attempts = self.max_reconnect_attempts;
        let handle = std::thread::Builder::new()
            .name("user-data-supervisor".to_string())
            .spawn(move || supervisor_loop(shared, signer, callback, max_attempts, http, ws))
            .map_err(|e| {
                GatewayError::Validation(format!("spawning user-data supervisor: {e}"))
            })?;
        self.supervisor = Some(handle);
        info!("user-data stream started");
        Ok(())
    }

    /// Stop the supervisor, close the socket, and release the listen key
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.cv.notify_all();
        if let Some(handle) = self.supervisor.take() {
            if handle.join().is_err() {
                error!("user-data supervisor panicked");
            }
        }
        let listen_key = self.shared.state.lock().listen_key.clone();
        if !listen_key.is_empty() {
            match HttpClient::new() {
                Ok(http) => {
                    if let Err(e) = close_listen_key(&http, &self.signer, &listen_key) {
                        warn!(error = %e, "failed to close listen key");
                    }
                }
                Err(e) => warn!(error = %e, "no http client to close listen key"),
            }
            self.shared.state.lock().listen_key.clear();
        }
        info!("user-data stream stopped");
    }

    /// Whether the stream is running
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }
}

impl Drop for UserDataStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn supervisor_loop(
    shared: Arc<StreamShared>,
    signer: Arc<Signer>,
    callback: OwnerCallback,
    max_attempts: u32,
    http: HttpClient,
    mut ws: WsClient,
) {
    info!("user-data supervisor started");
    let mut policy = ReconnectPolicy::new(max_attempts);
    loop {
        shared.wait(KEEP_ALIVE_INTERVAL);
        if !shared.running.load(Ordering::Acquire) {
            break;
        }
        match shared.health() {
            // a handshake is still in flight; let it settle
            StreamHealth::Settling => continue,
            StreamHealth::Disconnected => {
                let Some(delay) = policy.next_attempt() else {
                    error!(
                        attempts = policy.attempts() - 1,
                        "user-data reconnect budget exhausted"
                    );
                    callback(&connection_failure_payload(
                        policy.attempts() - 1,
                        max_attempts,
                    ));
                    shared.running.store(false, Ordering::Release);
                    break;
                };
                warn!(
                    attempt = policy.attempts(),
                    delay_secs = delay.as_secs(),
                    "user-data stream reconnecting"
                );
                sleep_interruptible(&shared, delay);
                if !shared.running.load(Ordering::Acquire) {
                    break;
                }
                match create_listen_key(&http, &signer) {
                    Ok(new_key) => {
                        ws.disconnect();
                        let mut fresh = WsClient::new();
                        match connect_user_ws(&mut fresh, &signer, &new_key, &callback, &shared) {
                            Ok(()) => {
                                shared.state.lock().listen_key = new_key;
                                ws = fresh;
                                // the status callback settles the pending
                                // connect once the handshake completes
                            }
                            Err(e) => warn!(error = %e, "user-data reconnect failed"),
                        }
                    }
                    Err(e) => warn!(error = %e, "failed to obtain fresh listen key"),
                }
            }
            StreamHealth::Connected => {
                policy.reset();
                let listen_key = shared.state.lock().listen_key.clone();
                match keep_alive_listen_key(&http, &signer, &listen_key) {
                    Ok(()) => debug!("listen key extended"),
                    Err(e) => {
                        warn!(error = %e, "listen-key keep-alive failed, will reconnect");
                        shared.state.lock().disconnected = true;
                    }
                }
            }
        }
    }
    ws.disconnect();
    info!("user-data supervisor stopped");
}

/// Sleep that wakes early on stop
fn sleep_interruptible(shared: &Arc<StreamShared>, timeout: Duration) {
    let mut state = shared.state.lock();
    if shared.running.load(Ordering::Acquire) {
        let _ = shared.cv.wait_for(&mut state, timeout);
    }
}

fn connect_user_ws(
    ws: &mut WsClient,
    signer: &Arc<Signer>,
    listen_key: &str,
    callback: &OwnerCallback,
    shared: &Arc<StreamShared>,
) -> Result<(), GatewayError> {
    // recovery is owned by the supervisor, so the client itself gets a
    // single connection attempt
    ws.set_max_reconnect_attempts(1);
    let target = format!("/ws/{listen_key}");
    let message_callback = {
        let callback = Arc::clone(callback);
        Box::new(move |raw: &str| callback(raw))
    };
    let status_callback = {
        let shared = Arc::clone(shared);
        Box::new(move |connected: bool| shared.on_socket_status(connected))
    };
    // pending must be set before the I/O thread can fire the callback
    shared.mark_connect_pending();
    if let Err(e) = ws.connect(
        signer.ws_base(),
        443,
        &target,
        message_callback,
        status_callback,
    ) {
        shared.state.lock().pending_connect = false;
        return Err(e.into());
    }
    Ok(())
}

fn create_listen_key(http: &HttpClient, signer: &Arc<Signer>) -> Result<String, GatewayError> {
    let mut headers = Vec::new();
    signer.add_auth_header(&mut headers);
    let raw = http.post(signer.rest_base(), LISTEN_KEY_PATH, &[], &headers, None)?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|_| GatewayError::MalformedResponse("listenKey"))?;
    value
        .get("listenKey")
        .and_then(serde_json::Value::as_str)
        .map(str::to_string)
        .ok_or(GatewayError::MalformedResponse("listenKey"))
}

fn keep_alive_listen_key(
    http: &HttpClient,
    signer: &Arc<Signer>,
    listen_key: &str,
) -> Result<(), GatewayError> {
    let mut headers = Vec::new();
    signer.add_auth_header(&mut headers);
    let query = [("listenKey".to_string(), listen_key.to_string())];
    http.put(signer.rest_base(), LISTEN_KEY_PATH, &query, &headers)?;
    Ok(())
}

fn close_listen_key(
    http: &HttpClient,
    signer: &Arc<Signer>,
    listen_key: &str,
) -> Result<(), GatewayError> {
    let mut headers = Vec::new();
    signer.add_auth_header(&mut headers);
    let query = [("listenKey".to_string(), listen_key.to_string())];
    http.delete(signer.rest_base(), LISTEN_KEY_PATH, &query, &headers)?;
    Ok(())
}
