//! WebSocket client for `UserManager` dashboards.
//!
//! This crate owns the live channel between a dashboard client and the
//! backend: it connects, reconnects with a linearly increasing (capped)
//! backoff, heartbeats, and forwards server pushes to the rest of the
//! application. There is at most one in-flight connection attempt at a time;
//! the connect/reconnect loop owns every timer it arms.
//!
//! # Features
//!
//! * Automatic reconnection with linear capped backoff, terminal after a
//!   configurable number of consecutive failures
//! * Connect timeout so a stalled handshake becomes a retry, never a hang
//! * Periodic heartbeat `ping` envelopes with the client identity
//! * Connection status reporting for the UI
//! * Graceful cancellation and connection closing
//!
//! # Examples
//!
//! ```rust,no_run
//! # use usermanager_app_ws::{WsClient, WsMessage};
//! # use tokio::sync::mpsc;
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (client, handle) = WsClient::new("ws://localhost:8068/ws".to_string());
//! let (tx, mut rx) = mpsc::channel(100);
//!
//! // Start the websocket connection
//! tokio::spawn(async move {
//!     client.start("client_1".to_string(), false, |_status| {}, || {}, tx).await
//! });
//!
//! // Receive messages
//! while let Some(msg) = rx.recv().await {
//!     match msg {
//!         WsMessage::TextMessage(text) => println!("Received: {text}"),
//!         WsMessage::Message(bytes) => println!("Received {} bytes", bytes.len()),
//!         WsMessage::Ping => println!("Received ping"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

use std::future::Future;
use std::sync::{Arc, RwLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use bytes::Bytes;
use futures_channel::mpsc::UnboundedSender;
use futures_util::{StreamExt as _, future, pin_mut};
use thiserror::Error;
use tokio::select;
use tokio::sync::mpsc::Sender;
use tokio::sync::mpsc::error::SendError;
use tokio::time::sleep;
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error, Message},
};
use tokio_util::sync::CancellationToken;
use usermanager_ws::models::{ConnectPayload, EmptyPayload, InboundPayload, PingPayload};

/// Reconnection policy: linear backoff with a cap.
///
/// The delay before reconnect attempt `n` (1-indexed) is
/// `min(base_delay * n, max_delay)`. After `max_attempts` consecutive
/// failures the client stops retrying entirely.
#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(2000),
            max_delay: Duration::from_secs(10),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Returns the delay to wait before reconnect attempt `attempt`
    /// (1-indexed).
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        std::cmp::min(self.base_delay.saturating_mul(attempt), self.max_delay)
    }
}

/// Tunables for a [`WsClient`].
#[derive(Debug, Clone, Copy)]
pub struct WsClientOptions {
    /// Abort a connection attempt that has not completed its handshake
    /// within this window and treat it as a failure.
    pub connect_timeout: Duration,
    /// Interval between heartbeat `ping` envelopes on an open connection.
    pub heartbeat_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for WsClientOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(25),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Lifecycle of the websocket connection, as surfaced to the UI.
///
/// `Disconnected` is terminal: it is only reported once the reconnect
/// attempts are exhausted (or the handshake was rejected outright).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Reconnecting,
    Disconnected,
}

/// Error type for websocket connection failures.
#[derive(Debug, Error)]
pub enum ConnectWsError {
    /// The websocket connection was rejected with an HTTP 401 Unauthorized response.
    #[error("Unauthorized")]
    Unauthorized,
    /// Every allowed reconnect attempt failed; the client will not retry.
    #[error("Gave up reconnecting after {attempts} failed attempts")]
    RetryExhausted { attempts: u32 },
}

/// Messages that can be sent or received over a websocket connection.
pub enum WsMessage {
    /// A text message.
    TextMessage(String),
    /// A binary message.
    Message(Bytes),
    /// A ping frame.
    Ping,
}

/// Error type for websocket send operations.
#[derive(Debug, Error)]
pub enum WebsocketSendError {
    /// An unknown error occurred during the send operation.
    #[error("Unknown: {0}")]
    Unknown(String),
}

/// Trait for types that can send messages over a websocket connection.
#[async_trait]
pub trait WebsocketSender: Send + Sync {
    /// Sends a text message over the websocket connection.
    ///
    /// # Errors
    ///
    /// * Returns [`WebsocketSendError::Unknown`] if the send operation fails
    async fn send(&self, data: &str) -> Result<(), WebsocketSendError>;

    /// Sends a ping frame over the websocket connection.
    ///
    /// # Errors
    ///
    /// * Returns [`WebsocketSendError::Unknown`] if the send operation fails
    async fn ping(&self) -> Result<(), WebsocketSendError>;
}

impl core::fmt::Debug for dyn WebsocketSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{{WebsocketSender}}")
    }
}

/// A handle to a websocket connection that allows sending messages and
/// closing the connection.
#[derive(Clone)]
pub struct WsHandle {
    sender: Arc<RwLock<Option<UnboundedSender<WsMessage>>>>,
    cancellation_token: CancellationToken,
}

impl WsHandle {
    /// Closes the websocket connection.
    ///
    /// Cancels the client's internal token; the connect/reconnect loop exits
    /// after any pending operations complete and no reconnect is scheduled.
    pub fn close(&self) {
        self.cancellation_token.cancel();
    }
}

#[async_trait]
impl WebsocketSender for WsHandle {
    /// # Errors
    ///
    /// * Returns [`WebsocketSendError::Unknown`] if the send operation fails
    ///
    /// # Panics
    ///
    /// * Panics if the internal `RwLock` is poisoned
    async fn send(&self, data: &str) -> Result<(), WebsocketSendError> {
        if let Some(sender) = self.sender.read().unwrap().as_ref() {
            sender
                .unbounded_send(WsMessage::TextMessage(data.to_string()))
                .map_err(|e| WebsocketSendError::Unknown(e.to_string()))?;
        }
        Ok(())
    }

    /// # Errors
    ///
    /// * Returns [`WebsocketSendError::Unknown`] if the send operation fails
    ///
    /// # Panics
    ///
    /// * Panics if the internal `RwLock` is poisoned
    async fn ping(&self) -> Result<(), WebsocketSendError> {
        if let Some(sender) = self.sender.read().unwrap().as_ref() {
            sender
                .unbounded_send(WsMessage::Ping)
                .map_err(|e| WebsocketSendError::Unknown(e.to_string()))?;
        }
        Ok(())
    }
}

/// A websocket client that owns the connect/reconnect loop.
#[derive(Clone)]
pub struct WsClient {
    url: String,
    sender: Arc<RwLock<Option<UnboundedSender<WsMessage>>>>,
    cancellation_token: CancellationToken,
    options: WsClientOptions,
}

impl WsClient {
    /// Creates a new websocket client for the given URL.
    ///
    /// Returns a tuple containing the client and a handle to control the
    /// connection.
    #[must_use]
    pub fn new(url: String) -> (Self, WsHandle) {
        Self::new_inner(url, CancellationToken::new())
    }

    fn new_inner(url: String, cancellation_token: CancellationToken) -> (Self, WsHandle) {
        let sender = Arc::new(RwLock::new(None));
        let handle = WsHandle {
            sender: sender.clone(),
            cancellation_token: cancellation_token.clone(),
        };

        (
            Self {
                url,
                sender,
                cancellation_token,
                options: WsClientOptions::default(),
            },
            handle,
        )
    }

    /// Overrides the connect-timeout/heartbeat/reconnect tunables.
    #[must_use]
    pub fn with_options(mut self, options: WsClientOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets a custom cancellation token for the websocket client.
    ///
    /// This allows external cancellation of the websocket connection.
    #[must_use]
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    async fn message_handler(
        tx: Sender<WsMessage>,
        m: Message,
    ) -> Result<(), SendError<WsMessage>> {
        log::trace!("Message from ws server: {m:?}");
        tx.send(match m {
            Message::Text(m) => WsMessage::TextMessage(m.to_string()),
            Message::Binary(m) => WsMessage::Message(m),
            Message::Ping(_m) => WsMessage::Ping,
            Message::Pong(_m) => {
                log::trace!("Received pong frame");
                return Ok(());
            }
            Message::Close(frame) => {
                log::debug!("Received close frame: {frame:?}");
                return Ok(());
            }
            // raw frames are never surfaced by the stream on read
            Message::Frame(_m) => return Ok(()),
        })
        .await
    }

    /// Starts the websocket connection with automatic reconnection on
    /// failure.
    ///
    /// On every successful open the attempt counter resets to zero and the
    /// client sends a `connect` envelope (with the client id and admin flag)
    /// followed by a `get_mode` request, then invokes `on_open`.
    /// `on_status` observes every lifecycle transition. The future resolves
    /// when the connection is cancelled via the [`WsHandle`] or retries are
    /// exhausted.
    ///
    /// # Errors
    ///
    /// * Returns [`ConnectWsError::Unauthorized`] if the websocket connection
    ///   is unauthorized
    /// * Returns [`ConnectWsError::RetryExhausted`] once
    ///   [`ReconnectPolicy::max_attempts`] consecutive attempts have failed
    ///
    /// # Panics
    ///
    /// * Panics if the internal `RwLock` is poisoned
    pub async fn start(
        &self,
        client_id: String,
        is_admin: bool,
        on_status: impl Fn(ConnectionStatus) + Send + Sync + 'static,
        on_open: impl Fn() + Send + 'static,
        tx: Sender<WsMessage>,
    ) -> Result<(), ConnectWsError> {
        self.start_handler(
            client_id,
            is_admin,
            Self::message_handler,
            on_status,
            on_open,
            tx,
        )
        .await
    }

    #[allow(clippy::too_many_lines, clippy::cognitive_complexity)]
    async fn start_handler<T, O>(
        &self,
        client_id: String,
        is_admin: bool,
        handler: fn(sender: Sender<T>, m: Message) -> O,
        on_status: impl Fn(ConnectionStatus) + Send + Sync + 'static,
        on_open: impl Fn() + Send + 'static,
        tx: Sender<T>,
    ) -> Result<(), ConnectWsError>
    where
        T: Send + 'static,
        O: Future<Output = Result<(), SendError<T>>> + Send + 'static,
    {
        let base_url = self.url.clone();
        let sender_arc = self.sender.clone();
        let cancellation_token = self.cancellation_token.clone();
        let options = self.options;

        let mut attempts: u32 = 0;

        loop {
            let close_token = CancellationToken::new();

            let (txf, rxf) = futures_channel::mpsc::unbounded();

            sender_arc.write().unwrap().replace(txf.clone());

            let url = format!("{base_url}?clientId={client_id}");
            log::debug!("Connecting to websocket '{url}'...");
            on_status(ConnectionStatus::Connecting);

            #[allow(clippy::redundant_pub_crate)]
            match select!(
                resp = connect_async(url) => Some(resp),
                () = sleep(options.connect_timeout) => None,
                () = cancellation_token.cancelled() => {
                    log::debug!("Cancelling connect");
                    break;
                }
            ) {
                Some(Ok((ws_stream, _))) => {
                    log::debug!("WebSocket handshake has been successfully completed");

                    if attempts > 0 {
                        log::info!("WebSocket successfully reconnected");
                    }
                    attempts = 0;

                    on_status(ConnectionStatus::Connected);

                    send_payload(
                        &txf,
                        &InboundPayload::Connect(ConnectPayload {
                            client_id: client_id.clone(),
                            is_admin,
                            user_agent: format!("usermanager/{}", env!("CARGO_PKG_VERSION")),
                            timestamp: now_millis(),
                        }),
                    );
                    send_payload(&txf, &InboundPayload::GetMode(EmptyPayload {}));

                    on_open();

                    let (write, read) = ws_stream.split();

                    let ws_writer = rxf
                        .map(|message| match message {
                            WsMessage::TextMessage(message) => {
                                log::trace!("Sending text packet message={message}");
                                Ok(Message::Text(message.into()))
                            }
                            WsMessage::Message(bytes) => {
                                log::debug!("Sending binary packet");
                                Ok(Message::Binary(bytes.to_vec().into()))
                            }
                            WsMessage::Ping => {
                                log::trace!("Sending ping frame");
                                Ok(Message::Ping(vec![].into()))
                            }
                        })
                        .forward(write);

                    let ws_reader = read.for_each(|m| async {
                        let m = match m {
                            Ok(m) => m,
                            Err(e) => {
                                log::error!("Read loop error: {e:?}");
                                close_token.cancel();
                                return;
                            }
                        };

                        tokio::spawn({
                            let tx = tx.clone();
                            let close_token = close_token.clone();

                            async move {
                                if let Err(e) = handler(tx.clone(), m).await {
                                    log::error!("Handler loop error: {e:?}");
                                    close_token.cancel();
                                }
                            }
                        });
                    });

                    let heartbeat = tokio::spawn({
                        let txf = txf.clone();
                        let close_token = close_token.clone();
                        let cancellation_token = cancellation_token.clone();
                        let client_id = client_id.clone();
                        let interval = options.heartbeat_interval;

                        async move {
                            loop {
                                select!(
                                    () = close_token.cancelled() => { break; }
                                    () = cancellation_token.cancelled() => { break; }
                                    () = sleep(interval) => {
                                        log::trace!("Sending heartbeat to server");
                                        let heartbeat = InboundPayload::Ping(PingPayload {
                                            timestamp: now_millis(),
                                            client_id: client_id.clone(),
                                        });
                                        if !send_payload(&txf, &heartbeat) {
                                            close_token.cancel();
                                            break;
                                        }
                                    }
                                );
                            }
                        }
                    });

                    pin_mut!(ws_writer, ws_reader);
                    select!(
                        () = close_token.cancelled() => {}
                        () = cancellation_token.cancelled() => {}
                        _ = future::select(ws_writer, ws_reader) => {}
                    );
                    if !close_token.is_cancelled() {
                        close_token.cancel();
                    }
                    log::debug!("start_handler: Waiting for heartbeat to finish...");
                    if let Err(e) = heartbeat.await {
                        log::warn!("start_handler: Heartbeat failed to finish: {e:?}");
                    }
                    log::info!("WebSocket connection closed");
                }
                Some(Err(err)) => {
                    log::error!("Websocket error: {err:?}");
                    if let Error::Http(response) = err {
                        if response.status() == StatusCode::UNAUTHORIZED {
                            log::error!("Unauthorized ws connection");
                            on_status(ConnectionStatus::Disconnected);
                            return Err(ConnectWsError::Unauthorized);
                        }

                        if let Ok(body) =
                            std::str::from_utf8(response.body().as_ref().unwrap_or(&vec![]))
                        {
                            log::error!("error ({}): {body}", response.status());
                        } else {
                            log::error!("body: (unable to get body)");
                        }
                    } else {
                        log::error!("Failed to connect to websocket server: {err:?}");
                    }
                }
                None => {
                    log::error!(
                        "Websocket connect timed out after {:?}",
                        options.connect_timeout
                    );
                }
            }

            if cancellation_token.is_cancelled() {
                break;
            }

            attempts += 1;
            if attempts >= options.reconnect.max_attempts {
                log::error!("Websocket gave up after {attempts} failed attempts");
                on_status(ConnectionStatus::Disconnected);
                return Err(ConnectWsError::RetryExhausted { attempts });
            }

            let delay = options.reconnect.delay_for_attempt(attempts);
            log::debug!("Retrying websocket connection in {delay:?} (attempt {attempts})");
            on_status(ConnectionStatus::Reconnecting);

            #[allow(clippy::redundant_pub_crate)]
            {
                select!(
                    () = sleep(delay) => {}
                    () = cancellation_token.cancelled() => {
                        log::debug!("Cancelling retry");
                        break;
                    }
                );
            }
        }

        log::debug!("Handler closed");

        Ok(())
    }
}

fn send_payload(txf: &UnboundedSender<WsMessage>, payload: &InboundPayload) -> bool {
    match serde_json::to_string(payload) {
        Ok(json) => {
            if let Err(e) = txf.unbounded_send(WsMessage::TextMessage(json)) {
                log::error!("Failed to queue {payload} message: {e:?}");
                return false;
            }
            true
        }
        Err(e) => {
            log::error!("Failed to serialize {payload} message: {e:?}");
            false
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |x| u64::try_from(x.as_millis()).unwrap_or(u64::MAX))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    use futures_util::StreamExt;
    use tokio::sync::mpsc;

    use super::*;

    #[test]
    fn test_delay_is_linear_until_the_cap() {
        let policy = ReconnectPolicy::default();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(2000));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(4000));
        assert_eq!(policy.delay_for_attempt(5), Duration::from_millis(10000));
        assert_eq!(policy.delay_for_attempt(6), Duration::from_millis(10000));
        assert_eq!(policy.delay_for_attempt(10), Duration::from_millis(10000));
    }

    #[test]
    fn test_delay_respects_custom_base_and_cap() {
        let policy = ReconnectPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(250),
            max_attempts: 5,
        };

        assert_eq!(policy.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_millis(250));
    }

    #[test]
    fn test_default_options() {
        let options = WsClientOptions::default();

        assert_eq!(options.connect_timeout, Duration::from_secs(5));
        assert_eq!(options.heartbeat_interval, Duration::from_secs(25));
        assert_eq!(options.reconnect.max_attempts, 10);
    }

    #[test_log::test(tokio::test)]
    async fn test_message_handler_forwards_text() {
        let (tx, mut rx) = mpsc::channel(10);
        let text = "hello world".to_string();

        let result = WsClient::message_handler(tx, Message::Text(text.clone().into())).await;

        assert!(result.is_ok());
        match rx.recv().await.unwrap() {
            WsMessage::TextMessage(s) => assert_eq!(s, text),
            _ => panic!("Expected TextMessage"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_message_handler_forwards_binary() {
        let (tx, mut rx) = mpsc::channel(10);
        let data = vec![1u8, 2, 3];

        let result = WsClient::message_handler(tx, Message::Binary(data.clone().into())).await;

        assert!(result.is_ok());
        match rx.recv().await.unwrap() {
            WsMessage::Message(bytes) => assert_eq!(bytes.as_ref(), &data[..]),
            _ => panic!("Expected Message with bytes"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_message_handler_drops_pong_and_close_frames() {
        let (tx, mut rx) = mpsc::channel(10);

        assert!(
            WsClient::message_handler(tx.clone(), Message::Pong(vec![].into()))
                .await
                .is_ok()
        );
        assert!(
            WsClient::message_handler(tx, Message::Close(None))
                .await
                .is_ok()
        );
        assert!(rx.try_recv().is_err());
    }

    #[test_log::test(tokio::test)]
    async fn test_handle_send_without_connection_is_a_no_op() {
        let handle = WsHandle {
            sender: Arc::new(RwLock::new(None)),
            cancellation_token: CancellationToken::new(),
        };

        assert!(handle.send("test message").await.is_ok());
        assert!(handle.ping().await.is_ok());
    }

    #[test_log::test(tokio::test)]
    async fn test_handle_send_reaches_the_writer_channel() {
        let (tx, mut rx) = futures_channel::mpsc::unbounded();
        let handle = WsHandle {
            sender: Arc::new(RwLock::new(Some(tx))),
            cancellation_token: CancellationToken::new(),
        };

        handle.send("test message").await.unwrap();

        match rx.try_next().unwrap().unwrap() {
            WsMessage::TextMessage(s) => assert_eq!(s, "test message"),
            _ => panic!("Expected TextMessage"),
        }
    }

    #[test_log::test]
    fn test_handle_close_cancels_token() {
        let token = CancellationToken::new();
        let handle = WsHandle {
            sender: Arc::new(RwLock::new(None)),
            cancellation_token: token.clone(),
        };

        assert!(!token.is_cancelled());
        handle.close();
        assert!(token.is_cancelled());
    }

    fn test_options(max_attempts: u32) -> WsClientOptions {
        WsClientOptions {
            connect_timeout: Duration::from_millis(500),
            heartbeat_interval: Duration::from_millis(10),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                max_attempts,
            },
        }
    }

    #[test_log::test(tokio::test)]
    async fn test_retry_exhaustion_is_terminal() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let (client, _handle) = WsClient::new(format!("ws://{addr}/ws"));
        let client = client.with_options(test_options(3));

        let statuses = Arc::new(Mutex::new(vec![]));
        let (tx, _rx) = mpsc::channel(10);

        let result = client
            .start(
                "client_test".to_string(),
                false,
                {
                    let statuses = statuses.clone();
                    move |status| statuses.lock().unwrap().push(status)
                },
                || {},
                tx,
            )
            .await;

        assert!(matches!(
            result,
            Err(ConnectWsError::RetryExhausted { attempts: 3 })
        ));

        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses.last(), Some(&ConnectionStatus::Disconnected));
        assert_eq!(
            statuses
                .iter()
                .filter(|x| **x == ConnectionStatus::Connecting)
                .count(),
            3
        );
        assert!(!statuses.contains(&ConnectionStatus::Connected));
    }

    #[test_log::test(tokio::test)]
    async fn test_successful_open_resets_attempt_counter() {
        // reserve a port, then leave it unbound until partway through the
        // client's retry schedule
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        // the first attempt at t=0 is refused; the server comes up during the
        // first retry delay, accepts one connection, hangs up, and frees the
        // port again
        let server = tokio::spawn(async move {
            sleep(Duration::from_millis(50)).await;
            let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            let _ = ws.next().await;
            let _ = ws.next().await;
            drop(ws);
            drop(listener);
        });

        let (client, _handle) = WsClient::new(format!("ws://{addr}/ws"));
        let client = client.with_options(WsClientOptions {
            connect_timeout: Duration::from_millis(500),
            heartbeat_interval: Duration::from_millis(10),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_millis(200),
                max_attempts: 3,
            },
        });

        let statuses = Arc::new(Mutex::new(vec![]));
        let (tx, _rx) = mpsc::channel(10);

        let result = client
            .start(
                "client_test".to_string(),
                false,
                {
                    let statuses = statuses.clone();
                    move |status| statuses.lock().unwrap().push(status)
                },
                || {},
                tx,
            )
            .await;

        server.await.unwrap();

        // the counter restarted from zero after the successful open: the
        // pre-open failure did not count toward the 3 post-open failures
        assert!(matches!(
            result,
            Err(ConnectWsError::RetryExhausted { attempts: 3 })
        ));

        let statuses = statuses.lock().unwrap();
        assert_eq!(
            statuses
                .iter()
                .filter(|x| **x == ConnectionStatus::Connected)
                .count(),
            1
        );
        // 1 refused + 1 successful + 2 refused attempts; without the reset
        // the third iteration would already have exhausted the counter
        assert_eq!(
            statuses
                .iter()
                .filter(|x| **x == ConnectionStatus::Connecting)
                .count(),
            4
        );
    }

    #[test_log::test(tokio::test)]
    async fn test_open_sends_connect_then_heartbeats() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let mut payloads = vec![];
            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let payload: InboundPayload = serde_json::from_str(text.as_str()).unwrap();
                    let is_ping = matches!(&payload, InboundPayload::Ping(_));
                    payloads.push(payload);
                    if is_ping {
                        break;
                    }
                }
            }
            payloads
        });

        let (client, handle) = WsClient::new(format!("ws://{addr}/ws"));
        // retries are slow enough here that the close below always lands
        // before the attempts run out
        let client = client.with_options(WsClientOptions {
            connect_timeout: Duration::from_millis(500),
            heartbeat_interval: Duration::from_millis(10),
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(200),
                max_delay: Duration::from_millis(500),
                max_attempts: 100,
            },
        });

        let opened = Arc::new(AtomicBool::new(false));
        let (tx, _rx) = mpsc::channel(10);

        let start = tokio::spawn({
            let opened = opened.clone();
            async move {
                client
                    .start(
                        "client_test".to_string(),
                        true,
                        |_status| {},
                        move || opened.store(true, Ordering::SeqCst),
                        tx,
                    )
                    .await
            }
        });

        let payloads = tokio::time::timeout(Duration::from_secs(5), server)
            .await
            .unwrap()
            .unwrap();

        handle.close();
        assert!(start.await.unwrap().is_ok());

        assert!(opened.load(Ordering::SeqCst));
        match &payloads[0] {
            InboundPayload::Connect(payload) => {
                assert_eq!(payload.client_id, "client_test");
                assert!(payload.is_admin);
            }
            other => panic!("Expected Connect first, got {other}"),
        }
        assert!(matches!(&payloads[1], InboundPayload::GetMode(_)));
        match payloads.last().unwrap() {
            InboundPayload::Ping(payload) => {
                assert_eq!(payload.client_id, "client_test");
            }
            other => panic!("Expected Ping last, got {other}"),
        }
    }
}
