//! Live channel to the dashboard server
//!
//! Two transports deliver the same JSON stats events:
//! - Server-Sent Events on `<base>/events` (primary)
//! - WebSocket on `ws(s)://<host>/<base>/ws` (alternative, bidirectional)
//!
//! Each channel runs in its own task and hands decoded payloads to the
//! caller's callbacks in arrival order. Payloads that fail to decode are
//! logged and dropped; the channel keeps running.

mod sse;
mod websocket;

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{mpsc, watch, Notify};
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{info, warn};

use crate::api::{ApiClient, ApiError};
use crate::config::RealtimeConfig;

/// Lifecycle of one live channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Sse,
    WebSocket,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Sse => f.write_str("SSE"),
            ChannelKind::WebSocket => f.write_str("WebSocket"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid endpoint: {0}")]
    Endpoint(#[from] ApiError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected status: {0}")]
    Status(reqwest::StatusCode),
    #[error("Unexpected content type: {0}")]
    ContentType(String),
    #[error("Event stream error: {0}")]
    Stream(String),
    #[error("Event stream ended by the server")]
    StreamEnded,
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("No WebSocket connection is open")]
    NotConnected,
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Why a WebSocket closed, as reported to `on_close`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseEvent {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseEvent {
    /// 1006: the connection dropped without a close frame
    pub fn abnormal() -> Self {
        Self {
            code: 1006,
            reason: String::new(),
            was_clean: false,
        }
    }
}

struct ChannelShared {
    kind: ChannelKind,
    state: watch::Sender<ConnectionState>,
    shutdown: Notify,
    closed: AtomicBool,
}

impl ChannelShared {
    fn set_state(&self, state: ConnectionState) {
        // A closed channel stays Disconnected whatever its task was doing
        if !self.is_closed() {
            self.state.send_replace(state);
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// Handle to one open channel
#[derive(Clone)]
pub struct ChannelHandle {
    shared: Arc<ChannelShared>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
}

impl ChannelHandle {
    fn new(kind: ChannelKind, outbound: Option<mpsc::UnboundedSender<Message>>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Connecting);
        Self {
            shared: Arc::new(ChannelShared {
                kind,
                state,
                shutdown: Notify::new(),
                closed: AtomicBool::new(false),
            }),
            outbound,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.shared.kind
    }

    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Receiver that observes every state transition of this channel
    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state.subscribe()
    }

    /// Stop the channel. Idempotent; no callback fires for a local close.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shared.shutdown.notify_one();
        self.shared.state.send_replace(ConnectionState::Disconnected);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

/// Owner of the application's live channels: at most one per transport kind
pub struct RealtimeClient {
    api: ApiClient,
    sse_retry: Duration,
    sse: Mutex<Option<ChannelHandle>>,
    websocket: Mutex<Option<ChannelHandle>>,
}

impl RealtimeClient {
    pub fn new(api: ApiClient, config: &RealtimeConfig) -> Self {
        Self {
            api,
            sse_retry: config.sse_retry(),
            sse: Mutex::new(None),
            websocket: Mutex::new(None),
        }
    }

    /// Open the SSE channel, closing any SSE channel already open.
    ///
    /// Transport errors go to `on_error` and the stream reconnects on its own
    /// after the retry delay, like a browser `EventSource`. A non-2xx answer or
    /// a non event-stream response fails the channel for good.
    ///
    /// Must be called from within a Tokio runtime: the channel runs on a
    /// spawned task.
    pub fn connect_sse<T, M, E>(&self, on_message: M, on_error: E) -> Result<ChannelHandle, TransportError>
    where
        T: DeserializeOwned + Send + 'static,
        M: FnMut(T) + Send + 'static,
        E: FnMut(TransportError) + Send + 'static,
    {
        let url = self.api.events_url()?;
        let mut slot = self.sse.lock();
        if let Some(previous) = slot.take() {
            info!("Closing previous SSE channel before reconnecting");
            previous.close();
        }

        let handle = ChannelHandle::new(ChannelKind::Sse, None);
        info!(%url, "Opening SSE channel");
        tokio::spawn(sse::run(
            self.api.streaming().clone(),
            url,
            self.sse_retry,
            handle.shared.clone(),
            on_message,
            on_error,
        ));
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Open the WebSocket channel, closing any WebSocket already open.
    ///
    /// Remote closes and network failures are reported to `on_close`; whether
    /// to reconnect is up to the caller.
    ///
    /// Must be called from within a Tokio runtime: the channel runs on a
    /// spawned task.
    pub fn connect_websocket<T, M, E, C>(
        &self,
        on_message: M,
        on_error: E,
        on_close: C,
    ) -> Result<ChannelHandle, TransportError>
    where
        T: DeserializeOwned + Send + 'static,
        M: FnMut(T) + Send + 'static,
        E: FnMut(TransportError) + Send + 'static,
        C: FnMut(CloseEvent) + Send + 'static,
    {
        let url = self.api.websocket_url()?;
        let request = websocket::handshake_request(&url, self.api.cookie_header(&url))?;

        let mut slot = self.websocket.lock();
        if let Some(previous) = slot.take() {
            info!("Closing previous WebSocket before reconnecting");
            previous.close();
        }

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let handle = ChannelHandle::new(ChannelKind::WebSocket, Some(outbound_tx));
        info!(%url, "Opening WebSocket channel");
        tokio::spawn(websocket::run(
            request,
            handle.shared.clone(),
            outbound_rx,
            on_message,
            on_error,
            on_close,
        ));
        *slot = Some(handle.clone());
        Ok(handle)
    }

    /// Send a JSON payload over the open WebSocket.
    pub fn send_ws<P: Serialize + ?Sized>(&self, payload: &P) -> Result<(), TransportError> {
        let text = serde_json::to_string(payload)?;
        let slot = self.websocket.lock();
        let sender = slot
            .as_ref()
            .filter(|handle| !handle.is_closed())
            .and_then(|handle| handle.outbound.as_ref())
            .ok_or(TransportError::NotConnected)?;
        sender
            .send(Message::Text(text))
            .map_err(|_| TransportError::NotConnected)
    }

    /// Close every open channel. Safe to call when nothing is connected.
    pub fn disconnect(&self) {
        if let Some(handle) = self.sse.lock().take() {
            info!("Closing SSE channel");
            handle.close();
        }
        if let Some(handle) = self.websocket.lock().take() {
            info!("Closing WebSocket channel");
            handle.close();
        }
    }

    pub fn sse_state(&self) -> ConnectionState {
        Self::slot_state(&self.sse)
    }

    pub fn ws_state(&self) -> ConnectionState {
        Self::slot_state(&self.websocket)
    }

    /// True when any channel is currently delivering events
    pub fn is_connected(&self) -> bool {
        self.sse_state() == ConnectionState::Connected || self.ws_state() == ConnectionState::Connected
    }

    pub fn has_open_channels(&self) -> bool {
        self.sse.lock().is_some() || self.websocket.lock().is_some()
    }

    fn slot_state(slot: &Mutex<Option<ChannelHandle>>) -> ConnectionState {
        slot.lock()
            .as_ref()
            .map(ChannelHandle::state)
            .unwrap_or(ConnectionState::Disconnected)
    }
}

impl Drop for RealtimeClient {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Decode one payload, logging and dropping it when it is not valid JSON for `T`.
fn decode<T: DeserializeOwned>(kind: ChannelKind, payload: &[u8]) -> Option<T> {
    match serde_json::from_slice(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(channel = %kind, error = %e, "Error parsing {} data, message dropped", kind);
            None
        }
    }
}
