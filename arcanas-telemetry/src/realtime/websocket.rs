use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::header::COOKIE;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info};
use url::Url;

use super::{decode, ChannelKind, ChannelShared, CloseEvent, ConnectionState, TransportError};

/// Close code sent by a peer that closed without giving one
const NO_STATUS_RECEIVED: u16 = 1005;

/// Handshake request for `url`, carrying the session cookie when there is one.
pub(super) fn handshake_request(url: &Url, cookie: Option<String>) -> Result<Request, tungstenite::Error> {
    let mut request = url.as_str().into_client_request()?;
    if let Some(value) = cookie.and_then(|c| HeaderValue::from_str(&c).ok()) {
        request.headers_mut().insert(COOKIE, value);
    }
    Ok(request)
}

/// WebSocket channel task. Runs until the socket closes or the handle is closed.
pub(super) async fn run<T, M, E, C>(
    request: Request,
    channel: Arc<ChannelShared>,
    mut outbound: mpsc::UnboundedReceiver<Message>,
    mut on_message: M,
    mut on_error: E,
    mut on_close: C,
) where
    T: DeserializeOwned + Send + 'static,
    M: FnMut(T) + Send + 'static,
    E: FnMut(TransportError) + Send + 'static,
    C: FnMut(CloseEvent) + Send + 'static,
{
    channel.set_state(ConnectionState::Connecting);

    let connected = tokio::select! {
        biased;
        _ = channel.shutdown.notified() => return,
        connected = connect_async(request) => connected,
    };

    let stream = match connected {
        Ok((stream, _response)) => stream,
        Err(e) => {
            error!(error = %e, "WebSocket connection error");
            channel.set_state(ConnectionState::Errored);
            on_error(TransportError::WebSocket(e));
            on_close(CloseEvent::abnormal());
            return;
        }
    };

    channel.set_state(ConnectionState::Connected);
    info!("WebSocket channel connected");
    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            biased;
            _ = channel.shutdown.notified() => {
                // Local close: say goodbye, no on_close callback
                if let Err(e) = write.send(Message::Close(None)).await {
                    debug!(error = %e, "WebSocket close frame not delivered");
                }
                return;
            }
            Some(message) = outbound.recv() => {
                if let Err(e) = write.send(message).await {
                    error!(error = %e, "WebSocket send failed");
                    on_error(TransportError::WebSocket(e));
                }
            }
            frame = read.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    if let Some(payload) = decode::<T>(ChannelKind::WebSocket, text.as_bytes()) {
                        on_message(payload);
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if let Some(payload) = decode::<T>(ChannelKind::WebSocket, &bytes) {
                        on_message(payload);
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let event = match frame {
                        Some(frame) => CloseEvent {
                            code: u16::from(frame.code),
                            reason: frame.reason.to_string(),
                            was_clean: true,
                        },
                        None => CloseEvent {
                            code: NO_STATUS_RECEIVED,
                            reason: String::new(),
                            was_clean: true,
                        },
                    };
                    info!(code = event.code, reason = %event.reason, "WebSocket connection closed");
                    // Flush the queued close reply to complete the handshake
                    if let Err(e) = write.close().await {
                        debug!(error = %e, "WebSocket close reply not delivered");
                    }
                    channel.set_state(ConnectionState::Disconnected);
                    on_close(event);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!(error = %e, "WebSocket connection error");
                    channel.set_state(ConnectionState::Errored);
                    on_error(TransportError::WebSocket(e));
                    on_close(CloseEvent::abnormal());
                    return;
                }
                None => {
                    info!("WebSocket stream ended without a close frame");
                    channel.set_state(ConnectionState::Errored);
                    on_close(CloseEvent::abnormal());
                    return;
                }
            },
        }
    }
}
