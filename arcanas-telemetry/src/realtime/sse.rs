use std::sync::Arc;
use std::time::Duration;

use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, error, info, warn};
use url::Url;

use super::{decode, ChannelKind, ChannelShared, ConnectionState, TransportError};

const EVENT_STREAM: &str = "text/event-stream";

/// SSE channel task: connect, dispatch `message` events, reconnect after errors.
pub(super) async fn run<T, M, E>(
    client: Client,
    url: Url,
    initial_retry: Duration,
    channel: Arc<ChannelShared>,
    mut on_message: M,
    mut on_error: E,
) where
    T: DeserializeOwned + Send + 'static,
    M: FnMut(T) + Send + 'static,
    E: FnMut(TransportError) + Send + 'static,
{
    let mut retry = initial_retry;
    let mut last_event_id: Option<String> = None;

    loop {
        if channel.is_closed() {
            return;
        }
        channel.set_state(ConnectionState::Connecting);

        let mut request = client
            .get(url.clone())
            .header(ACCEPT, EVENT_STREAM)
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = &last_event_id {
            request = request.header("Last-Event-ID", id.as_str());
        }

        let response = tokio::select! {
            biased;
            _ = channel.shutdown.notified() => return,
            response = request.send() => response,
        };

        match response {
            Err(e) => {
                error!(error = %e, "SSE connection error");
                channel.set_state(ConnectionState::Errored);
                on_error(TransportError::Http(e));
            }
            Ok(response) => {
                if let Err(e) = check_response(&response) {
                    // Same as a browser EventSource: no retry after a bad answer
                    error!(error = %e, "SSE connection refused");
                    channel.set_state(ConnectionState::Errored);
                    on_error(e);
                    return;
                }

                channel.set_state(ConnectionState::Connected);
                info!(%url, "SSE channel connected");

                let mut events = response.bytes_stream().eventsource();
                let failure = loop {
                    let next = tokio::select! {
                        biased;
                        _ = channel.shutdown.notified() => return,
                        next = events.next() => next,
                    };

                    match next {
                        Some(Ok(event)) => {
                            if let Some(server_retry) = event.retry {
                                retry = server_retry;
                            }
                            if !event.id.is_empty() {
                                last_event_id = Some(event.id.clone());
                            }
                            if !event.event.is_empty() && event.event != "message" {
                                debug!(event = %event.event, "Ignoring named SSE event");
                                continue;
                            }
                            if let Some(payload) = decode::<T>(ChannelKind::Sse, event.data.as_bytes()) {
                                on_message(payload);
                            }
                        }
                        Some(Err(e)) => break TransportError::Stream(e.to_string()),
                        None => break TransportError::StreamEnded,
                    }
                };

                warn!(error = %failure, "SSE connection error");
                channel.set_state(ConnectionState::Errored);
                on_error(failure);
            }
        }

        debug!(retry_ms = retry.as_millis() as u64, "SSE channel will reconnect");
        tokio::select! {
            biased;
            _ = channel.shutdown.notified() => return,
            _ = tokio::time::sleep(retry) => {}
        }
    }
}

fn check_response(response: &Response) -> Result<(), TransportError> {
    let status = response.status();
    if !status.is_success() {
        return Err(TransportError::Status(status));
    }

    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !content_type.starts_with(EVENT_STREAM) {
        return Err(TransportError::ContentType(content_type.to_string()));
    }
    Ok(())
}
