//! Persistent TLS WebSocket client with reconnect and a FIFO send queue
//!
//! Each client owns one OS thread running a current-thread tokio runtime.
//! The connection lifecycle runs entirely on that thread:
//!
//! `Idle -> Resolving -> Connecting -> TlsHandshake -> WsHandshake ->
//! Connected -> Closing -> Idle`, with any failure detouring through a
//! backoff delay before the next attempt.
//!
//! `on_message` fires once per received text frame and `on_status` on every
//! connected/disconnected transition, both on the I/O thread; neither may
//! block it.

use crate::backoff;
use crate::error::{NetError, NetResult};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

/// Callback invoked once per received text frame, on the I/O thread
pub type MessageCallback = Box<dyn Fn(&str) + Send + 'static>;

/// Callback invoked on every connected/disconnected transition
pub type StatusCallback = Box<dyn Fn(bool) + Send + 'static>;

struct Shared {
    connected: AtomicBool,
    max_reconnect_attempts: AtomicU32,
}

/// Persistent outbound WebSocket connection
pub struct WsClient {
    shared: Arc<Shared>,
    outbox: Option<mpsc::UnboundedSender<String>>,
    stop_tx: Option<watch::Sender<bool>>,
    io_thread: Option<std::thread::JoinHandle<()>>,
}

impl WsClient {
    /// Create an idle client
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                connected: AtomicBool::new(false),
                max_reconnect_attempts: AtomicU32::new(0),
            }),
            outbox: None,
            stop_tx: None,
            io_thread: None,
        }
    }

    /// Cap consecutive failed connection attempts; 0 = unlimited
    pub fn set_max_reconnect_attempts(&self, attempts: u32) {
        self.shared
            .max_reconnect_attempts
            .store(attempts, Ordering::Release);
    }

    /// Whether the connection is currently established
    pub fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Acquire)
    }

    /// Start the connection lifecycle toward `wss://{host}:{port}{target}`.
    /// Returns immediately; progress is reported through `on_status`.
    pub fn connect(
        &mut self,
        host: &str,
        port: u16,
        target: &str,
        on_message: MessageCallback,
        on_status: StatusCallback,
    ) -> NetResult<()> {
        if self.io_thread.is_some() {
            return Err(NetError::Transport(
                "already connected or connecting".to_string(),
            ));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let (stop_tx, stop_rx) = watch::channel(false);
        self.outbox = Some(tx);
        self.stop_tx = Some(stop_tx);

        let shared = Arc::clone(&self.shared);
        let host = host.to_string();
        let target = target.to_string();
        let thread_name = format!("ws-io-{host}{target}");
        let handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_io()
                    .enable_time()
                    .build();
                match runtime {
                    Ok(runtime) => runtime.block_on(run(
                        shared, host, port, target, rx, stop_rx, on_message, on_status,
                    )),
                    Err(e) => error!(error = %e, "failed to build websocket runtime"),
                }
            })
            .map_err(|e| NetError::Transport(format!("spawning io thread: {e}")))?;
        self.io_thread = Some(handle);
        Ok(())
    }

    /// Enqueue a text frame. Returns false (and drops the message) while not
    /// connected; delivery is FIFO while connected.
    pub fn send(&self, message: impl Into<String>) -> bool {
        if !self.is_connected() {
            debug!("dropping websocket message sent while disconnected");
            return false;
        }
        match &self.outbox {
            Some(tx) => tx.send(message.into()).is_ok(),
            None => false,
        }
    }

    /// Gracefully close, drain pending state, and stop the I/O thread
    pub fn disconnect(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(true);
        }
        self.outbox = None;
        if let Some(handle) = self.io_thread.take() {
            if handle.join().is_err() {
                error!("websocket io thread panicked");
            }
        }
        self.shared.connected.store(false, Ordering::Release);
    }
}

impl Default for WsClient {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WsClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

enum ExitReason {
    Closed,
    Errored,
    Shutdown,
}

#[allow(clippy::too_many_arguments)]
async fn run(
    shared: Arc<Shared>,
    host: String,
    port: u16,
    target: String,
    mut outbox: mpsc::UnboundedReceiver<String>,
    mut stop_rx: watch::Receiver<bool>,
    on_message: MessageCallback,
    on_status: StatusCallback,
) {
    let url = format!("wss://{host}:{port}{target}");
    let mut delay = backoff::INITIAL_DELAY;
    let mut attempts: u32 = 0;
    #[allow(unused_assignments)]
    let mut connect_failed = false;
    loop {
        if *stop_rx.borrow() {
            break;
        }
        match establish(&host, port, &url).await {
            Ok(ws) => {
                info!(%host, %target, "websocket connected");
                attempts = 0;
                delay = backoff::INITIAL_DELAY;
                connect_failed = false;
                shared.connected.store(true, Ordering::Release);
                on_status(true);
                let reason = serve(ws, &mut outbox, &mut stop_rx, &on_message).await;
                shared.connected.store(false, Ordering::Release);
                on_status(false);
                // pending sends belong to the dead connection
                while outbox.try_recv().is_ok() {}
                match reason {
                    ExitReason::Shutdown => break,
                    ExitReason::Closed => info!(%host, %target, "websocket closed by peer"),
                    ExitReason::Errored => warn!(%host, %target, "websocket errored"),
                }
            }
            Err(e) => {
                warn!(%host, %target, error = %e, "websocket connect failed");
                connect_failed = true;
            }
        }
        attempts += 1;
        let max = shared.max_reconnect_attempts.load(Ordering::Acquire);
        if max != 0 && attempts >= max {
            warn!(%host, %target, attempts, "reconnect budget exhausted, giving up");
            // a failed connect never reached Connected, so nothing has told
            // the owner yet
            if connect_failed {
                on_status(false);
            }
            break;
        }
        debug!(%host, %target, attempt = attempts, delay_ms = delay.as_millis() as u64, "scheduling reconnect");
        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            _ = stop_rx.changed() => break,
        }
        delay = backoff::next_delay(delay);
    }
    debug!(%host, %target, "websocket io thread exiting");
}

async fn establish(
    host: &str,
    port: u16,
    url: &str,
) -> NetResult<WebSocketStream<MaybeTlsStream<TcpStream>>> {
    // Resolving
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| NetError::Transport(format!("resolve {host}: {e}")))?;
    let addr = addrs
        .next()
        .ok_or_else(|| NetError::Transport(format!("no addresses for {host}")))?;
    // Connecting
    let tcp = TcpStream::connect(addr)
        .await
        .map_err(|e| NetError::Transport(format!("connect {addr}: {e}")))?;
    // TlsHandshake + WsHandshake; SNI comes from the request host
    let (ws, _response) = tokio_tungstenite::client_async_tls(url, tcp)
        .await
        .map_err(|e| NetError::Transport(format!("handshake with {host}: {e}")))?;
    Ok(ws)
}

async fn serve(
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    outbox: &mut mpsc::UnboundedReceiver<String>,
    stop_rx: &mut watch::Receiver<bool>,
    on_message: &MessageCallback,
) -> ExitReason {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => on_message(&text),
                Some(Ok(Message::Ping(payload))) => {
                    if sink.send(Message::Pong(payload)).await.is_err() {
                        return ExitReason::Errored;
                    }
                }
                Some(Ok(Message::Close(_))) | None => return ExitReason::Closed,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(error = %e, "websocket read failed");
                    return ExitReason::Errored;
                }
            },
            queued = outbox.recv() => match queued {
                Some(text) => {
                    if sink.send(Message::Text(text)).await.is_err() {
                        return ExitReason::Errored;
                    }
                }
                None => return ExitReason::Shutdown,
            },
            _ = stop_rx.changed() => {
                // Closing
                let _ = sink.send(Message::Close(None)).await;
                return ExitReason::Shutdown;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn send_while_idle_drops_message() {
        let client = WsClient::new();
        assert!(!client.is_connected());
        assert!(!client.send("hello"));
    }

    #[test]
    fn disconnect_on_idle_client_is_a_no_op() {
        let mut client = WsClient::new();
        client.disconnect();
        assert!(!client.is_connected());
    }

    #[test]
    fn connect_twice_is_rejected() {
        let mut client = WsClient::new();
        client
            .connect(
                "localhost",
                1,
                "/ws/test",
                Box::new(|_| {}),
                Box::new(|_| {}),
            )
            .expect("first connect starts");
        client.set_max_reconnect_attempts(1);
        let err = client
            .connect(
                "localhost",
                1,
                "/ws/test",
                Box::new(|_| {}),
                Box::new(|_| {}),
            )
            .unwrap_err();
        assert!(matches!(err, NetError::Transport(_)));
        client.disconnect();
    }
}
