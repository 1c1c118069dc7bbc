//! Arcanas Console - terminal companion for the storage dashboard
//!
//! Wires the telemetry layer together and reports through logs:
//! - Session check and optional login from the environment
//! - Live stats over SSE or WebSocket into a bounded history
//! - Periodic chart scales per metric, with unit labels
//! - "System Online" / "System Offline" on connection changes

mod render;

use anyhow::{Context, Result};
use arcanas_telemetry::config::DashboardConfig;
use arcanas_telemetry::session::HttpAuthApi;
use arcanas_telemetry::{
    ApiClient, CloseEvent, ConnectionState, MetricHistory, MetricStream, RealtimeClient, SessionStore,
    SystemStats, Transport, TransportError,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, sleep_until, Instant};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const USERNAME_ENV: &str = "ARCANAS_USERNAME";
const PASSWORD_ENV: &str = "ARCANAS_PASSWORD";

struct Console {
    config: DashboardConfig,
    session: SessionStore,
    realtime: RealtimeClient,
    history: Arc<Mutex<MetricHistory>>,
    closes_tx: mpsc::UnboundedSender<CloseEvent>,
    closes_rx: mpsc::UnboundedReceiver<CloseEvent>,
}

impl Console {
    fn new(config: DashboardConfig) -> Result<Self> {
        let api = ApiClient::new(&config.api).context("Invalid API configuration")?;
        let session = SessionStore::new(Arc::new(HttpAuthApi::new(api.clone())));
        let realtime = RealtimeClient::new(api, &config.realtime);
        let history = Arc::new(Mutex::new(MetricHistory::new(config.history.capacity)));
        let (closes_tx, closes_rx) = mpsc::unbounded_channel();

        info!(base_url = %config.api.base_url, transport = ?config.realtime.transport, "Console initialized");
        Ok(Self {
            config,
            session,
            realtime,
            history,
            closes_tx,
            closes_rx,
        })
    }

    /// Restore the server session, or log in with credentials from the environment
    async fn authenticate(&self) {
        self.session.validate().await;

        if !self.session.snapshot().is_authenticated() {
            match (std::env::var(USERNAME_ENV), std::env::var(PASSWORD_ENV)) {
                (Ok(username), Ok(password)) => {
                    if !self.session.login(&username, &password).await {
                        let state = self.session.snapshot();
                        warn!(error = state.error().unwrap_or("unknown"), "Login failed");
                    }
                }
                _ => debug!("No credentials in the environment, continuing signed out"),
            }
        }

        let state = self.session.snapshot();
        if state.is_authenticated() {
            info!(
                username = state.username().unwrap_or(""),
                is_root = self.session.is_root(),
                is_admin = self.session.is_admin(),
                can_manage_all_shares = self.session.can_manage_all_shares(),
                "Session active"
            );
        } else {
            info!("Not signed in");
        }
    }

    /// Open the configured live channel; returns its state receiver
    fn connect(&self) -> Result<watch::Receiver<ConnectionState>> {
        let history = self.history.clone();
        let on_message = move |stats: SystemStats| history.lock().record(&stats);
        let on_error = |e: TransportError| error!(error = %e, "Realtime error");

        let handle = match self.config.realtime.transport {
            Transport::Sse => self.realtime.connect_sse(on_message, on_error)?,
            Transport::Websocket => {
                let closes = self.closes_tx.clone();
                let on_close = move |event: CloseEvent| {
                    // Receiver lives as long as the console
                    let _ = closes.send(event);
                };
                self.realtime.connect_websocket(on_message, on_error, on_close)?
            }
        };
        Ok(handle.subscribe())
    }

    fn render(&self) {
        let history = self.history.lock();
        for stream in MetricStream::ALL {
            let scale = history.scale(stream);
            let reading = history
                .buffer(stream)
                .and_then(|buffer| buffer.latest())
                .and_then(|sample| render::reading(stream, sample));
            info!(
                chart = %stream,
                samples = history.buffer(stream).map(|b| b.len()).unwrap_or(0),
                latest = reading.as_deref().unwrap_or("-"),
                axis = ?render::axis_labels(stream, &scale),
                "Chart scale"
            );
        }
    }

    async fn run(&mut self) -> Result<()> {
        self.authenticate().await;

        let mut states = self.connect().context("Failed to open realtime channel")?;
        let mut states_live = true;
        let mut online = false;
        let mut reconnect_at: Option<Instant> = None;
        let reconnect_delay = self.config.realtime.reconnect_delay();
        let mut render_timer = interval(Duration::from_secs(self.config.history.render_interval_secs.max(1)));

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    self.realtime.disconnect();
                    return Ok(());
                }

                _ = render_timer.tick() => self.render(),

                changed = states.changed(), if states_live => {
                    if changed.is_err() {
                        // Channel gone; the next reconnect hands over a new receiver
                        states_live = false;
                        continue;
                    }
                    let state = *states.borrow_and_update();
                    match (online, state) {
                        (false, ConnectionState::Connected) => {
                            online = true;
                            info!("System Online");
                        }
                        (true, ConnectionState::Disconnected | ConnectionState::Errored) => {
                            online = false;
                            warn!("System Offline");
                        }
                        _ => {}
                    }
                }

                Some(event) = self.closes_rx.recv() => {
                    info!(code = event.code, reason = %event.reason, "WebSocket closed, reconnecting in {:?}", reconnect_delay);
                    reconnect_at = Some(Instant::now() + reconnect_delay);
                }

                _ = sleep_until(reconnect_at.unwrap_or_else(Instant::now)), if reconnect_at.is_some() => {
                    reconnect_at = None;
                    match self.connect() {
                        Ok(receiver) => {
                            states = receiver;
                            states_live = true;
                        }
                        Err(e) => {
                            error!(error = %e, "Reconnect failed, retrying in {:?}", reconnect_delay);
                            reconnect_at = Some(Instant::now() + reconnect_delay);
                        }
                    }
                }
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("arcanas_console=info,arcanas_telemetry=info")),
        )
        .init();

    info!("Arcanas Console starting...");

    let config = DashboardConfig::load().await.context("Failed to load configuration")?;
    let mut console = Console::new(config).context("Failed to create console")?;

    console.run().await.context("Console execution failed")?;

    Ok(())
}
