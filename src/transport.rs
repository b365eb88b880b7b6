// Copyright (c) 2026 Elias Bachaalany
// SPDX-License-Identifier: MIT

//! Transport layer for the VCAI session client.
//!
//! A transport is a reconnecting duplex text channel: text frames in, an
//! ordered stream of [`TransportEvent`]s out. It does not interpret payloads;
//! parsing and state live in the session.

use crate::error::{Result, SessionError};
use crate::types::{ConnectionState, NORMAL_CLOSURE, ReconnectPolicy};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

const LOG_TARGET: &str = "vcai_session::transport";

/// How long `disconnect` waits for the close handshake before abandoning it.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// Transport Trait
// =============================================================================

/// Something that happened on the channel, delivered in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The channel opened (initially or after a reconnect).
    Open,
    /// A text frame arrived.
    Message(String),
    /// A transient failure; the transport may still recover.
    Error(String),
    /// The channel closed. `code` is `None` when no close frame was received.
    Closed { code: Option<u16>, reason: String },
    /// Reconnect attempts are used up; the transport has stopped.
    Exhausted { attempts: u32 },
}

/// Receiving half of a transport's event stream.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

/// Builds one unconnected transport per conversation id.
pub type TransportFactory = Arc<dyn Fn(&str) -> Box<dyn Transport> + Send + Sync>;

/// Reconnecting duplex message channel.
///
/// Implementations must emit events in the order they happen and must never
/// surface channel failures as errors from these methods; failures travel
/// through the event stream.
pub trait Transport: Send + Sync {
    /// Open the channel. No-op when already open or connecting.
    fn connect(&mut self, endpoint: &str) -> Result<()>;

    /// Close with a normal-closure code, cancel any pending reconnect, and
    /// reset the attempt counter.
    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;

    /// Queue a text payload. Returns false (and logs) when the channel is not open.
    fn send(&self, payload: &str) -> bool;

    /// Current connection state.
    fn state(&self) -> ConnectionState;

    /// Take the event stream. Returns `None` after the first call.
    fn take_events(&mut self) -> Option<TransportEvents>;

    /// Check if the channel is open.
    fn is_open(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
}

// =============================================================================
// Reconnect Tracker
// =============================================================================

/// What to do after the channel closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Normal closure; stay closed.
    Stop,
    /// Reconnect after `delay`. `attempt` counts from 1.
    Retry { attempt: u32, delay: Duration },
    /// Attempts exhausted.
    GiveUp { attempts: u32 },
}

/// Bounded retry bookkeeping, independent of any socket.
#[derive(Debug, Clone)]
pub struct ReconnectTracker {
    policy: ReconnectPolicy,
    attempts: u32,
}

impl ReconnectTracker {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            attempts: 0,
        }
    }

    /// Reconnects scheduled since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// A successful open resets the counter.
    pub fn on_open(&mut self) {
        self.attempts = 0;
    }

    /// Decide what follows a close. `code` is `None` for failed connects and
    /// for closes without a close frame; both count as abnormal.
    pub fn on_close(&mut self, code: Option<u16>) -> ReconnectDecision {
        if code == Some(NORMAL_CLOSURE) {
            return ReconnectDecision::Stop;
        }
        if self.attempts >= self.policy.max_attempts {
            return ReconnectDecision::GiveUp {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        ReconnectDecision::Retry {
            attempt: self.attempts,
            delay: self.policy.delay,
        }
    }
}

// =============================================================================
// WebSocket Transport
// =============================================================================

enum Outbound {
    Text(String),
    Close,
}

pub(crate) type SharedState = Arc<StdMutex<ConnectionState>>;
type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub(crate) fn load_state(state: &SharedState) -> ConnectionState {
    *state.lock().unwrap_or_else(|e| e.into_inner())
}

pub(crate) fn store_state(state: &SharedState, next: ConnectionState) {
    *state.lock().unwrap_or_else(|e| e.into_inner()) = next;
}

/// Transport over a WebSocket, with bounded fixed-delay reconnection.
///
/// A single driver task owns the socket and the only reconnect timer.
/// Dropping the transport closes the channel.
pub struct WebSocketTransport {
    policy: ReconnectPolicy,
    state: SharedState,
    events_tx: mpsc::UnboundedSender<TransportEvent>,
    events_rx: Option<TransportEvents>,
    commands: Option<mpsc::UnboundedSender<Outbound>>,
    driver: Option<JoinHandle<()>>,
}

impl WebSocketTransport {
    pub fn new(policy: ReconnectPolicy) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            policy,
            state: Arc::new(StdMutex::new(ConnectionState::Disconnected)),
            events_tx,
            events_rx: Some(events_rx),
            commands: None,
            driver: None,
        }
    }

    /// Factory producing a fresh transport per conversation.
    pub fn factory(policy: ReconnectPolicy) -> TransportFactory {
        Arc::new(move |_conversation_id: &str| {
            Box::new(WebSocketTransport::new(policy)) as Box<dyn Transport>
        })
    }

    pub fn policy(&self) -> ReconnectPolicy {
        self.policy
    }
}

impl Transport for WebSocketTransport {
    /// Must be called from within a tokio runtime.
    fn connect(&mut self, endpoint: &str) -> Result<()> {
        if load_state(&self.state).is_active() {
            return Ok(());
        }

        let url = url::Url::parse(endpoint)?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(SessionError::invalid_config(format!(
                "channel endpoint must use ws or wss: {endpoint}"
            )));
        }

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        store_state(&self.state, ConnectionState::Connecting);
        self.commands = Some(commands_tx);
        self.driver = Some(tokio::spawn(drive(
            url.to_string(),
            self.policy,
            Arc::clone(&self.state),
            self.events_tx.clone(),
            commands_rx,
        )));
        Ok(())
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            if let Some(commands) = self.commands.take() {
                let _ = commands.send(Outbound::Close);
            }
            if let Some(mut driver) = self.driver.take() {
                if tokio::time::timeout(CLOSE_TIMEOUT, &mut driver).await.is_err() {
                    warn!(target: LOG_TARGET, "close handshake timed out");
                    driver.abort();
                }
            }
            store_state(&self.state, ConnectionState::Disconnected);
        })
    }

    fn send(&self, payload: &str) -> bool {
        if load_state(&self.state) != ConnectionState::Connected {
            warn!(target: LOG_TARGET, "channel is not open, cannot send message");
            return false;
        }
        match &self.commands {
            Some(commands) => commands.send(Outbound::Text(payload.to_string())).is_ok(),
            None => false,
        }
    }

    fn state(&self) -> ConnectionState {
        load_state(&self.state)
    }

    fn take_events(&mut self) -> Option<TransportEvents> {
        self.events_rx.take()
    }
}

// =============================================================================
// Driver
// =============================================================================

enum PumpExit {
    Shutdown,
    Closed { code: Option<u16>, reason: String },
}

async fn drive(
    url: String,
    policy: ReconnectPolicy,
    state: SharedState,
    events: mpsc::UnboundedSender<TransportEvent>,
    mut commands: mpsc::UnboundedReceiver<Outbound>,
) {
    let mut tracker = ReconnectTracker::new(policy);

    loop {
        store_state(&state, ConnectionState::Connecting);
        let connected = tokio::select! {
            result = connect_async(url.as_str()) => result,
            _ = wait_for_shutdown(&mut commands) => break,
        };

        let close_code = match connected {
            Ok((socket, _response)) => {
                tracker.on_open();
                store_state(&state, ConnectionState::Connected);
                info!(target: LOG_TARGET, %url, "channel connected");
                let _ = events.send(TransportEvent::Open);

                match pump(socket, &events, &mut commands).await {
                    PumpExit::Shutdown => break,
                    PumpExit::Closed { code, reason } => {
                        info!(target: LOG_TARGET, ?code, %reason, "channel disconnected");
                        let _ = events.send(TransportEvent::Closed { code, reason });
                        code
                    }
                }
            }
            Err(err) => {
                let message = err.to_string();
                warn!(
                    target: LOG_TARGET,
                    %url,
                    error = %SessionError::from(err),
                    "failed to open channel"
                );
                let _ = events.send(TransportEvent::Error(message));
                None
            }
        };

        match tracker.on_close(close_code) {
            ReconnectDecision::Stop => break,
            ReconnectDecision::Retry { attempt, delay } => {
                store_state(&state, ConnectionState::Reconnecting);
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = wait_for_shutdown(&mut commands) => break,
                }
                info!(
                    target: LOG_TARGET,
                    "attempting to reconnect ({attempt}/{})",
                    policy.max_attempts
                );
            }
            ReconnectDecision::GiveUp { attempts } => {
                warn!(target: LOG_TARGET, attempts, "maximum reconnection attempts reached");
                store_state(&state, ConnectionState::Error);
                let _ = events.send(TransportEvent::Exhausted { attempts });
                return;
            }
        }
    }

    store_state(&state, ConnectionState::Disconnected);
}

/// Resolve once a close is requested or the transport handle is dropped.
async fn wait_for_shutdown(commands: &mut mpsc::UnboundedReceiver<Outbound>) {
    loop {
        match commands.recv().await {
            Some(Outbound::Text(_)) => {
                warn!(target: LOG_TARGET, "channel is not open, dropping queued message");
            }
            Some(Outbound::Close) | None => return,
        }
    }
}

async fn pump(
    socket: Socket,
    events: &mpsc::UnboundedSender<TransportEvent>,
    commands: &mut mpsc::UnboundedReceiver<Outbound>,
) -> PumpExit {
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Outbound::Text(text)) => {
                    if let Err(err) = sink.send(WsMessage::Text(text)).await {
                        return fail(events, "failed to send frame", err);
                    }
                }
                Some(Outbound::Close) | None => {
                    let frame = CloseFrame {
                        code: CloseCode::Normal,
                        reason: "Intentional disconnect".into(),
                    };
                    if let Err(err) = sink.send(WsMessage::Close(Some(frame))).await {
                        debug!(target: LOG_TARGET, error = %err, "close frame not delivered");
                    }
                    return PumpExit::Shutdown;
                }
            },
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = events.send(TransportEvent::Message(text));
                }
                Some(Ok(WsMessage::Binary(bytes))) => match String::from_utf8(bytes) {
                    Ok(text) => {
                        let _ = events.send(TransportEvent::Message(text));
                    }
                    Err(_) => warn!(target: LOG_TARGET, "dropping non-UTF-8 binary frame"),
                },
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.to_string()),
                        None => (None, String::new()),
                    };
                    return PumpExit::Closed { code, reason };
                }
                // ping/pong are answered by tungstenite
                Some(Ok(_)) => {}
                Some(Err(err)) => return fail(events, "channel error", err),
                None => {
                    return PumpExit::Closed { code: None, reason: "stream ended".into() };
                }
            },
        }
    }
}

/// Report a protocol failure and end the current connection.
fn fail(
    events: &mpsc::UnboundedSender<TransportEvent>,
    context: &str,
    err: tokio_tungstenite::tungstenite::Error,
) -> PumpExit {
    let reason = err.to_string();
    warn!(target: LOG_TARGET, error = %SessionError::from(err), "{context}");
    let _ = events.send(TransportEvent::Error(reason.clone()));
    PumpExit::Closed { code: None, reason }
}

// =============================================================================
// In-Memory Transport (for testing)
// =============================================================================

/// What a [`MemoryTransport`] was asked to do.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct MemoryLog {
    pub connects: Vec<String>,
    pub sent: Vec<String>,
    pub disconnects: usize,
}

/// In-memory transport for testing. Events are injected through the remote.
#[cfg(test)]
pub(crate) struct MemoryTransport {
    state: ConnectionState,
    events_rx: Option<TransportEvents>,
    log: Arc<StdMutex<MemoryLog>>,
}

/// Test-side handle of a [`MemoryTransport`].
#[cfg(test)]
#[derive(Clone)]
pub(crate) struct MemoryRemote {
    pub events: mpsc::UnboundedSender<TransportEvent>,
    pub log: Arc<StdMutex<MemoryLog>>,
}

#[cfg(test)]
impl MemoryTransport {
    pub fn new() -> (Self, MemoryRemote) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let log = Arc::new(StdMutex::new(MemoryLog::default()));
        let transport = Self {
            state: ConnectionState::Disconnected,
            events_rx: Some(events_rx),
            log: Arc::clone(&log),
        };
        (
            transport,
            MemoryRemote {
                events: events_tx,
                log,
            },
        )
    }
}

#[cfg(test)]
impl MemoryRemote {
    pub fn emit(&self, event: TransportEvent) {
        self.events.send(event).unwrap();
    }

    pub fn emit_raw(&self, raw: &str) {
        self.emit(TransportEvent::Message(raw.to_string()));
    }
}

#[cfg(test)]
impl Transport for MemoryTransport {
    fn connect(&mut self, endpoint: &str) -> Result<()> {
        if self.state.is_active() {
            return Ok(());
        }
        self.state = ConnectionState::Connected;
        self.log.lock().unwrap().connects.push(endpoint.to_string());
        Ok(())
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.state = ConnectionState::Disconnected;
            self.log.lock().unwrap().disconnects += 1;
        })
    }

    fn send(&self, payload: &str) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        self.log.lock().unwrap().sent.push(payload.to_string());
        true
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn take_events(&mut self) -> Option<TransportEvents> {
        self.events_rx.take()
    }
}
