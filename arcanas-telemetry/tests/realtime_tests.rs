use arcanas_devkit::fixtures::{sequenced_stats, StatsBuilder};
use arcanas_devkit::test_utils::{wait_until, DEFAULT_TIMEOUT_MS};
use arcanas_devkit::{Recorder, TestHarness};
use arcanas_telemetry::config::{ApiConfig, RealtimeConfig};
use arcanas_telemetry::{ApiClient, CloseEvent, ConnectionState, RealtimeClient, SystemStats, TransportError};
use serde_json::json;
use std::time::Duration;

fn realtime_client(base_url: String) -> RealtimeClient {
    let api = ApiClient::new(&ApiConfig {
        base_url,
        request_timeout_secs: Some(5),
    })
    .unwrap();
    let config = RealtimeConfig {
        sse_retry_ms: 50,
        ..RealtimeConfig::default()
    };
    RealtimeClient::new(api, &config)
}

fn error_sink(errors: &Recorder<String>) -> impl FnMut(TransportError) + Send + 'static {
    let mut record = errors.callback();
    move |e: TransportError| record(e.to_string())
}

fn cpu_usages(stats: &[SystemStats]) -> Vec<f64> {
    stats.iter().map(|s| s.cpu.usage).collect()
}

#[tokio::test]
async fn test_sse_delivers_messages_in_order() {
    let harness = TestHarness::start().await.unwrap();
    let client = realtime_client(harness.base_url());
    let messages = Recorder::<SystemStats>::new();
    let errors = Recorder::new();

    let handle = client.connect_sse(messages.callback(), error_sink(&errors)).unwrap();
    harness.wait_for_sse_subscribers(1).await.unwrap();
    assert!(wait_until(DEFAULT_TIMEOUT_MS, || handle.state() == ConnectionState::Connected).await);
    assert!(client.is_connected());

    for seq in 1..=5 {
        harness.server.push_json(&sequenced_stats(seq));
    }

    assert!(messages.wait_for(5, DEFAULT_TIMEOUT_MS).await);
    let received = messages.items();
    assert_eq!(cpu_usages(&received), vec![1.0, 2.0, 3.0, 4.0, 5.0]);
    assert_eq!(received[4].timestamp, Some(5_000));
    assert!(errors.is_empty());

    client.disconnect();
}

#[tokio::test]
async fn test_sse_drops_malformed_payload_and_continues() {
    let harness = TestHarness::start().await.unwrap();
    let client = realtime_client(harness.base_url());
    let messages = Recorder::<SystemStats>::new();
    let errors = Recorder::new();

    client.connect_sse(messages.callback(), error_sink(&errors)).unwrap();
    harness.wait_for_sse_subscribers(1).await.unwrap();

    harness.server.push_raw("{not json");
    harness.server.push_named("ping", "{}");
    harness
        .server
        .push_json(&StatsBuilder::new().at(2_000).cpu(12.5).network(1_000_000.0, 0.0).build());

    assert!(messages.wait_for(1, DEFAULT_TIMEOUT_MS).await);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let received = messages.items();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].cpu.usage, 12.5);
    assert_eq!(received[0].network.rx_rate, 1_000_000.0);
    // A bad payload is not a transport error
    assert!(errors.is_empty());
    assert_eq!(client.sse_state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_sse_reconnects_with_last_event_id() {
    let harness = TestHarness::start().await.unwrap();
    let client = realtime_client(harness.base_url());
    let messages = Recorder::<SystemStats>::new();
    let errors = Recorder::new();

    client.connect_sse(messages.callback(), error_sink(&errors)).unwrap();
    harness.wait_for_sse_subscribers(1).await.unwrap();
    harness.server.push_json(&sequenced_stats(1));
    harness.server.push_json(&sequenced_stats(2));
    assert!(messages.wait_for(2, DEFAULT_TIMEOUT_MS).await);

    // Server ends the stream; the channel retries on its own
    harness.server.close_streams(1000, "restart");
    let server = &harness.server;
    assert!(wait_until(DEFAULT_TIMEOUT_MS, || server.sse_connections() == 2).await);
    harness.wait_for_sse_subscribers(1).await.unwrap();

    assert!(!errors.is_empty());
    assert_eq!(server.last_event_ids(), vec![None, Some("2".to_string())]);

    server.push_json(&sequenced_stats(3));
    assert!(messages.wait_for(3, DEFAULT_TIMEOUT_MS).await);
    assert_eq!(cpu_usages(&messages.items()), vec![1.0, 2.0, 3.0]);
}

#[tokio::test]
async fn test_sse_bad_endpoint_fails_without_retry() {
    let harness = TestHarness::start().await.unwrap();
    let client = realtime_client(format!("http://{}/nowhere", harness.server.addr()));
    let errors = Recorder::new();

    let handle = client
        .connect_sse(|_: SystemStats| {}, error_sink(&errors))
        .unwrap();
    assert!(errors.wait_for(1, DEFAULT_TIMEOUT_MS).await);
    assert!(wait_until(DEFAULT_TIMEOUT_MS, || handle.state() == ConnectionState::Errored).await);

    // Several retry intervals later, still a single failure
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(errors.len(), 1);
    assert!(errors.items()[0].contains("404"));
    assert_eq!(harness.server.sse_connections(), 0);
}

#[tokio::test]
async fn test_connect_sse_twice_closes_previous_channel() {
    let harness = TestHarness::start().await.unwrap();
    let client = realtime_client(harness.base_url());
    let first = Recorder::<SystemStats>::new();
    let second = Recorder::<SystemStats>::new();
    let errors = Recorder::new();

    let first_handle = client.connect_sse(first.callback(), error_sink(&errors)).unwrap();
    harness.wait_for_sse_subscribers(1).await.unwrap();

    let second_handle = client.connect_sse(second.callback(), error_sink(&errors)).unwrap();
    assert!(first_handle.is_closed());
    assert_eq!(first_handle.state(), ConnectionState::Disconnected);

    let server = &harness.server;
    assert!(wait_until(DEFAULT_TIMEOUT_MS, || server.sse_connections() == 2).await);
    assert!(wait_until(DEFAULT_TIMEOUT_MS, || second_handle.state() == ConnectionState::Connected).await);
    harness.wait_for_sse_subscribers(1).await.unwrap();

    server.push_json(&sequenced_stats(7));
    assert!(second.wait_for(1, DEFAULT_TIMEOUT_MS).await);
    assert!(first.is_empty());
}

#[tokio::test]
async fn test_websocket_receives_and_sends() {
    let harness = TestHarness::start().await.unwrap();
    let client = realtime_client(harness.base_url());
    let messages = Recorder::<SystemStats>::new();
    let errors = Recorder::new();
    let closes = Recorder::<CloseEvent>::new();

    let handle = client
        .connect_websocket(messages.callback(), error_sink(&errors), closes.callback())
        .unwrap();
    harness.wait_for_ws_subscribers(1).await.unwrap();
    assert!(wait_until(DEFAULT_TIMEOUT_MS, || handle.state() == ConnectionState::Connected).await);

    harness.server.push_raw("definitely not json");
    harness.server.push_json(&sequenced_stats(4));
    assert!(messages.wait_for(1, DEFAULT_TIMEOUT_MS).await);
    assert_eq!(cpu_usages(&messages.items()), vec![4.0]);

    client.send_ws(&json!({"type": "ping"})).unwrap();
    let server = &harness.server;
    assert!(wait_until(DEFAULT_TIMEOUT_MS, || server.ws_received().len() == 1).await);
    assert_eq!(server.ws_received()[0], r#"{"type":"ping"}"#);

    assert!(errors.is_empty());
    assert!(closes.is_empty());
}

#[tokio::test]
async fn test_websocket_remote_close_reaches_on_close() {
    let harness = TestHarness::start().await.unwrap();
    let client = realtime_client(harness.base_url());
    let errors = Recorder::new();
    let closes = Recorder::<CloseEvent>::new();

    client
        .connect_websocket(|_: SystemStats| {}, error_sink(&errors), closes.callback())
        .unwrap();
    harness.wait_for_ws_subscribers(1).await.unwrap();

    harness.server.close_streams(4000, "maintenance");
    assert!(closes.wait_for(1, DEFAULT_TIMEOUT_MS).await);
    assert_eq!(
        closes.items(),
        vec![CloseEvent {
            code: 4000,
            reason: "maintenance".to_string(),
            was_clean: true,
        }]
    );
    assert_eq!(client.ws_state(), ConnectionState::Disconnected);

    // The client answers the server's close frame
    let server = &harness.server;
    assert!(wait_until(DEFAULT_TIMEOUT_MS, || server.ws_close_replies() == 1).await);
}

#[tokio::test]
async fn test_connect_websocket_twice_closes_previous_channel() {
    let harness = TestHarness::start().await.unwrap();
    let client = realtime_client(harness.base_url());
    let first = Recorder::<SystemStats>::new();
    let second = Recorder::<SystemStats>::new();
    let first_closes = Recorder::<CloseEvent>::new();
    let second_closes = Recorder::<CloseEvent>::new();
    let errors = Recorder::new();

    let first_handle = client
        .connect_websocket(first.callback(), error_sink(&errors), first_closes.callback())
        .unwrap();
    harness.wait_for_ws_subscribers(1).await.unwrap();

    let second_handle = client
        .connect_websocket(second.callback(), error_sink(&errors), second_closes.callback())
        .unwrap();
    assert!(first_handle.is_closed());
    assert_eq!(first_handle.state(), ConnectionState::Disconnected);

    let server = &harness.server;
    assert!(wait_until(DEFAULT_TIMEOUT_MS, || server.ws_connections() == 2).await);
    assert!(wait_until(DEFAULT_TIMEOUT_MS, || second_handle.state() == ConnectionState::Connected).await);
    assert!(wait_until(DEFAULT_TIMEOUT_MS, || server.ws_subscribers() == 1).await);

    server.push_json(&sequenced_stats(9));
    assert!(second.wait_for(1, DEFAULT_TIMEOUT_MS).await);
    assert_eq!(cpu_usages(&second.items()), vec![9.0]);
    assert!(first.is_empty());

    // Replacing a channel is a local close: no callback for the old one
    assert!(first_closes.is_empty());
    assert!(second_closes.is_empty());
    assert!(errors.is_empty());
}

#[tokio::test]
async fn test_websocket_connect_failure_reports_abnormal_close() {
    // Reserve a port, then free it so nothing is listening there
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = realtime_client(format!("http://{}/api", addr));
    let errors = Recorder::new();
    let closes = Recorder::<CloseEvent>::new();

    let handle = client
        .connect_websocket(|_: SystemStats| {}, error_sink(&errors), closes.callback())
        .unwrap();
    assert!(closes.wait_for(1, DEFAULT_TIMEOUT_MS).await);
    assert_eq!(errors.len(), 1);
    assert_eq!(closes.items(), vec![CloseEvent::abnormal()]);
    assert_eq!(handle.state(), ConnectionState::Errored);
}

#[tokio::test]
async fn test_disconnect_closes_everything_quietly() {
    let harness = TestHarness::start().await.unwrap();
    let client = realtime_client(harness.base_url());
    let errors = Recorder::new();
    let closes = Recorder::<CloseEvent>::new();

    let sse = client.connect_sse(|_: SystemStats| {}, error_sink(&errors)).unwrap();
    let ws = client
        .connect_websocket(|_: SystemStats| {}, error_sink(&errors), closes.callback())
        .unwrap();
    harness.wait_for_sse_subscribers(1).await.unwrap();
    harness.wait_for_ws_subscribers(1).await.unwrap();
    assert!(client.has_open_channels());

    client.disconnect();
    client.disconnect();

    assert!(!client.has_open_channels());
    assert!(!client.is_connected());
    assert!(sse.is_closed() && ws.is_closed());
    assert_eq!(sse.state(), ConnectionState::Disconnected);
    assert_eq!(ws.state(), ConnectionState::Disconnected);

    // A local close never reports through the callbacks
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(closes.is_empty());
    assert!(errors.is_empty());
    assert!(matches!(
        client.send_ws(&json!({"type": "ping"})),
        Err(TransportError::NotConnected)
    ));
}

#[test]
#[should_panic]
fn test_connect_outside_tokio_runtime_panics() {
    let client = realtime_client("http://127.0.0.1:9/api".to_string());
    let _ = client.connect_sse(|_: SystemStats| {}, |_: TransportError| {});
}
