//! WebSocket client for the game stream with reconnection logic.
//!
//! Key requirements:
//! 1. Handshake: connect with token, then subscribe after a short delay
//! 2. Keepalive: answer `{}` with `{"type":3}` and transport pings with pongs
//! 3. Liveness: reconnect when no inbound traffic arrives for `idle_timeout`
//! 4. Exponential backoff between attempts: x1.5 per failure, capped
//! 5. Nothing is fatal except an explicit shutdown

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use thiserror::Error;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval_at, timeout, Instant};
use tokio_tungstenite::{
    connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use crate::config::StreamConfig;
use crate::events::{Envelope, StreamEvent};
use crate::utils::{sleep_or_shutdown, wait_for_shutdown, LogJournal};

use super::frame::{decode_frame, FramePart};
use super::token::TokenSource;

/// Reply to an empty-object keepalive.
pub const KEEPALIVE_PONG: &str = r#"{"type":3}"#;

/// Request id of the connect command.
const CONNECT_ID: u32 = 1;

/// Request id of the subscribe command.
const SUBSCRIBE_ID: u32 = 100;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

#[derive(Debug, Error)]
pub enum WebSocketError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Connection attempt timed out after {0:?}")]
    OpenTimeout(Duration),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Receive failed: {0}")]
    ReceiveFailed(String),

    #[error("No inbound traffic for {0:?}")]
    IdleTimeout(Duration),

    #[error("Connection closed by server: {0}")]
    ConnectionClosed(String),

    #[error("Event consumer stopped")]
    ConsumerGone,
}

/// Connection state for the WebSocket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Stopped,
}

/// Diagnostics for the most recent socket lifetime.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionSession {
    pub state: ConnectionState,
    pub opened_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Reason the previous socket closed; kept across reconnects.
    pub close_reason: Option<String>,
    pub attempts: u64,
    pub consecutive_failures: u32,
}

/// Why the session loop returned.
enum SessionEnd {
    Shutdown,
    Disconnected(WebSocketError),
}

/// Stream client: owns the socket and forwards decoded events.
pub struct GameStreamSocket<T: TokenSource> {
    config: StreamConfig,
    token_source: T,
    connection: Option<WsStream>,
    state: ConnectionState,
    session: ConnectionSession,
    last_inbound: Instant,
    consecutive_failures: u32,
    event_tx: mpsc::Sender<StreamEvent>,
    session_tx: watch::Sender<ConnectionSession>,
    journal: LogJournal,
}

impl<T: TokenSource> GameStreamSocket<T> {
    pub fn new(
        config: StreamConfig,
        token_source: T,
        event_tx: mpsc::Sender<StreamEvent>,
        session_tx: watch::Sender<ConnectionSession>,
        journal: LogJournal,
    ) -> Self {
        Self {
            config,
            token_source,
            connection: None,
            state: ConnectionState::Disconnected,
            session: ConnectionSession::default(),
            last_inbound: Instant::now(),
            consecutive_failures: 0,
            event_tx,
            session_tx,
            journal,
        }
    }

    /// Returns the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    fn tag(&self) -> &str {
        &self.config.channel
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.session.state = state;
        self.session.consecutive_failures = self.consecutive_failures;
        self.session_tx.send_replace(self.session.clone());
    }

    /// Runs the reconnect loop until shutdown is requested.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("[{}] Stream client starting: {}", self.tag(), self.config.ws_url);

        loop {
            if *shutdown.borrow() {
                break;
            }

            let token = tokio::select! {
                token = self.token_source.fetch_token() => token,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };
            let Some(token) = token else {
                warn!(
                    "[{}] No stream token, retrying in {}ms",
                    self.tag(),
                    self.config.token_retry.as_millis()
                );
                self.journal.record("TOKEN_MISSING", Value::Null);
                if sleep_or_shutdown(self.config.token_retry, &mut shutdown).await {
                    break;
                }
                continue;
            };

            let opened = tokio::select! {
                result = self.connect() => result,
                _ = wait_for_shutdown(&mut shutdown) => break,
            };

            match opened {
                Ok(()) => {
                    self.consecutive_failures = 0;
                    let end = match self.handshake(&token).await {
                        Ok(()) => self.run_until_disconnect(&mut shutdown).await,
                        Err(e) => SessionEnd::Disconnected(e),
                    };
                    match end {
                        SessionEnd::Shutdown => {
                            self.close("shutdown requested").await;
                            break;
                        }
                        SessionEnd::Disconnected(WebSocketError::ConsumerGone) => {
                            error!("[{}] Event consumer is gone, stopping stream client", self.tag());
                            self.close("event consumer stopped").await;
                            break;
                        }
                        SessionEnd::Disconnected(e) => {
                            warn!("[{}] Disconnected: {}", self.tag(), e);
                            self.close(&e.to_string()).await;
                        }
                    }
                }
                Err(e) => {
                    self.consecutive_failures = self.consecutive_failures.saturating_add(1);
                    self.journal
                        .record("WS_ERROR", json!({ "error": e.to_string() }));
                }
            }

            let delay = self.config.backoff.delay_for(self.consecutive_failures);
            info!(
                "[{}] Reconnecting in {}ms (consecutive failures: {})",
                self.tag(),
                delay.as_millis(),
                self.consecutive_failures
            );
            self.set_state(ConnectionState::Reconnecting);
            if sleep_or_shutdown(delay, &mut shutdown).await {
                break;
            }
        }

        self.close("shutdown requested").await;
        self.set_state(ConnectionState::Stopped);
        info!("[{}] Stream client stopped", self.tag());
    }

    /// Opens the socket, bounded by `open_timeout`.
    pub async fn connect(&mut self) -> Result<(), WebSocketError> {
        info!("[{}] Connecting to WebSocket: {}", self.tag(), self.config.ws_url);
        self.session.attempts += 1;
        self.set_state(ConnectionState::Connecting);

        let result = timeout(self.config.open_timeout, connect_async(self.config.ws_url.as_str()))
            .await
            .map_err(|_| WebSocketError::OpenTimeout(self.config.open_timeout))
            .and_then(|r| r.map_err(|e| WebSocketError::ConnectionFailed(e.to_string())));

        match result {
            Ok((ws_stream, _response)) => {
                info!("[{}] WebSocket connected", self.tag());
                self.connection = Some(ws_stream);
                self.last_inbound = Instant::now();
                self.session.opened_at = Some(Utc::now());
                self.session.last_heartbeat_at = None;
                self.set_state(ConnectionState::Connected);
                self.journal.record(
                    "WS_OPEN",
                    json!({ "url": self.config.ws_url, "attempt": self.session.attempts }),
                );
                Ok(())
            }
            Err(e) => {
                error!("[{}] WebSocket connection failed: {}", self.tag(), e);
                self.set_state(ConnectionState::Disconnected);
                Err(e)
            }
        }
    }

    /// Sends the connect command, waits `subscribe_delay`, then subscribes.
    pub async fn handshake(&mut self, token: &str) -> Result<(), WebSocketError> {
        self.send_text(connect_command(token)).await?;
        debug!("[{}] Sent connect command", self.tag());

        tokio::time::sleep(self.config.subscribe_delay).await;

        let channel = self.config.channel.clone();
        self.send_text(subscribe_command(&channel)).await?;
        info!("[{}] Subscribed to channel", self.tag());
        Ok(())
    }

    async fn send_text(&mut self, text: String) -> Result<(), WebSocketError> {
        let conn = self
            .connection
            .as_mut()
            .ok_or_else(|| WebSocketError::SendFailed("Not connected".to_string()))?;

        conn.send(Message::Text(text))
            .await
            .map_err(|e| WebSocketError::SendFailed(e.to_string()))
    }

    /// Checks whether the connection has gone quiet for too long.
    pub fn is_idle(&self) -> bool {
        self.last_inbound.elapsed() > self.config.idle_timeout
    }

    /// Reads the socket until it closes, fails, goes idle or shutdown is
    /// requested.
    async fn run_until_disconnect(&mut self, shutdown: &mut watch::Receiver<bool>) -> SessionEnd {
        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);

        loop {
            let conn = match self.connection.as_mut() {
                Some(conn) => conn,
                None => {
                    return SessionEnd::Disconnected(WebSocketError::ConnectionFailed(
                        "No connection".to_string(),
                    ))
                }
            };

            tokio::select! {
                msg_result = conn.next() => {
                    match msg_result {
                        Some(Ok(msg)) => {
                            self.last_inbound = Instant::now();
                            if let Err(e) = self.handle_message(msg).await {
                                return SessionEnd::Disconnected(e);
                            }
                        }
                        Some(Err(e)) => {
                            error!("[{}] WebSocket receive error: {}", self.tag(), e);
                            return SessionEnd::Disconnected(WebSocketError::ReceiveFailed(e.to_string()));
                        }
                        None => {
                            info!("[{}] WebSocket stream ended", self.tag());
                            return SessionEnd::Disconnected(WebSocketError::ConnectionClosed(
                                "Stream ended".to_string(),
                            ));
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    if self.is_idle() {
                        warn!("[{}] No inbound traffic, dropping connection", self.tag());
                        return SessionEnd::Disconnected(WebSocketError::IdleTimeout(self.config.idle_timeout));
                    }
                    if let Some(conn) = self.connection.as_mut() {
                        if let Err(e) = conn.send(Message::Ping(Vec::new())).await {
                            return SessionEnd::Disconnected(WebSocketError::SendFailed(e.to_string()));
                        }
                    }
                }

                _ = wait_for_shutdown(shutdown) => {
                    return SessionEnd::Shutdown;
                }
            }
        }
    }

    /// Handles an incoming WebSocket message.
    async fn handle_message(&mut self, msg: Message) -> Result<(), WebSocketError> {
        match msg {
            Message::Text(text) => self.handle_text(&text).await?,
            Message::Binary(bytes) => match String::from_utf8(bytes) {
                Ok(text) => self.handle_text(&text).await?,
                Err(e) => {
                    let sample = String::from_utf8_lossy(e.as_bytes()).into_owned();
                    self.drop_frame("binary frame is not valid UTF-8", &sample);
                }
            },
            Message::Ping(data) => {
                self.touch_heartbeat();
                if let Some(conn) = self.connection.as_mut() {
                    conn.send(Message::Pong(data))
                        .await
                        .map_err(|e| WebSocketError::SendFailed(e.to_string()))?;
                }
            }
            Message::Pong(_) => {
                debug!("[{}] Received Pong frame", self.tag());
                self.touch_heartbeat();
            }
            Message::Close(frame) => {
                let reason = frame
                    .map(|f| format!("{} {}", u16::from(f.code), f.reason))
                    .unwrap_or_else(|| "Unknown".to_string());
                info!("[{}] WebSocket closed by server: {}", self.tag(), reason);
                return Err(WebSocketError::ConnectionClosed(reason));
            }
            Message::Frame(_) => {
                // Raw frames are not surfaced at this level
            }
        }

        Ok(())
    }

    /// Decodes a text payload, answers keepalives and forwards events.
    async fn handle_text(&mut self, text: &str) -> Result<(), WebSocketError> {
        let parts = match decode_frame(text) {
            Ok(parts) => parts,
            Err(e) => {
                self.drop_frame(&e.to_string(), text);
                return Ok(());
            }
        };

        for part in parts {
            match part {
                FramePart::Keepalive => {
                    self.send_text(KEEPALIVE_PONG.to_string()).await?;
                    self.touch_heartbeat();
                }
                FramePart::Document(document) => {
                    let Some(envelope) = Envelope::from_document(document) else {
                        debug!("[{}] Non-push document ignored", self.tag());
                        continue;
                    };
                    if let Some(channel) = envelope.channel.as_deref() {
                        if channel != self.config.channel {
                            debug!("[{}] Publication on foreign channel {} ignored", self.tag(), channel);
                            continue;
                        }
                    }
                    for event in envelope.events() {
                        self.event_tx
                            .send(event)
                            .await
                            .map_err(|_| WebSocketError::ConsumerGone)?;
                    }
                }
            }
        }

        Ok(())
    }

    fn drop_frame(&self, error: &str, text: &str) {
        warn!("[{}] Dropping frame: {}", self.tag(), error);
        self.journal.record(
            "FRAME_DROPPED",
            json!({ "error": error, "sample": sample(text) }),
        );
    }

        fn touch_heartbeat(&mut self) {
        self.session.last_heartbeat_at = Some(Utc::now());
        self.session_tx.send_replace(self.session.clone());
    }

    /// Gracefully closes the WebSocket connection, if open.
    async fn close(&mut self, reason: &str) {
        let Some(mut conn) = self.connection.take() else {
            return;
        };
        let _ = conn.close(None).await;

        let duration_ms = self
            .session
            .opened_at
            .map(|opened| (Utc::now() - opened).num_milliseconds())
            .unwrap_or(0);
        self.session.close_reason = Some(reason.to_string());
        self.journal.record(
            "WS_CLOSE",
            json!({ "reason": reason, "durationMs": duration_ms }),
        );
        self.set_state(ConnectionState::Disconnected);
        info!("[{}] WebSocket closed after {}ms: {}", self.tag(), duration_ms, reason);
    }
}

impl<T: TokenSource> std::fmt::Debug for GameStreamSocket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GameStreamSocket")
            .field("url", &self.config.ws_url)
            .field("channel", &self.config.channel)
            .field("state", &self.state)
            .field("consecutive_failures", &self.consecutive_failures)
            .finish()
    }
}

// ============ Control Messages ============

#[derive(Debug, Serialize)]
struct ConnectCommand<'a> {
    id: u32,
    connect: ConnectParams<'a>,
}

#[derive(Debug, Serialize)]
struct ConnectParams<'a> {
    token: &'a str,
    subs: Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct SubscribeCommand<'a> {
    id: u32,
    subscribe: SubscribeParams<'a>,
}

#[derive(Debug, Serialize)]
struct SubscribeParams<'a> {
    channel: &'a str,
}

/// `{"id":1,"connect":{"token":<token>,"subs":{}}}`
pub fn connect_command(token: &str) -> String {
    let command = ConnectCommand {
        id: CONNECT_ID,
        connect: ConnectParams {
            token,
            subs: Map::new(),
        },
    };
    // Serializing string and map fields cannot fail.
    serde_json::to_string(&command).unwrap_or_default()
}

/// `{"id":100,"subscribe":{"channel":<channel>}}`
pub fn subscribe_command(channel: &str) -> String {
    let command = SubscribeCommand {
        id: SUBSCRIBE_ID,
        subscribe: SubscribeParams { channel },
    };
    serde_json::to_string(&command).unwrap_or_default()
}

fn sample(text: &str) -> String {
    text.chars().take(200).collect()
}
