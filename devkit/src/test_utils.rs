/*!
Test harness for the telemetry client

- Starts a [`StubServer`] with logging initialised
- Polling waits with timeouts instead of fixed sleeps
- [`Recorder`] to capture what client callbacks receive
*/

use crate::stub_server::StubServer;
use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default wait for anything network-bound in tests
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

pub struct TestHarness {
    pub server: StubServer,
}

impl TestHarness {
    pub async fn start() -> Result<Self> {
        env_logger::builder().is_test(true).try_init().ok();
        Ok(Self {
            server: StubServer::start().await?,
        })
    }

    pub fn base_url(&self) -> String {
        self.server.base_url()
    }

    /// Wait until `count` SSE clients are subscribed to pushes
    pub async fn wait_for_sse_subscribers(&self, count: usize) -> Result<()> {
        let server = &self.server;
        if wait_until(DEFAULT_TIMEOUT_MS, || server.sse_subscribers() >= count).await {
            log::info!("✅ {} SSE subscriber(s) ready", count);
            Ok(())
        } else {
            anyhow::bail!(
                "Timeout waiting for {} SSE subscribers (have {})",
                count,
                server.sse_subscribers()
            )
        }
    }

    /// Wait until `count` WebSocket clients are subscribed to pushes
    pub async fn wait_for_ws_subscribers(&self, count: usize) -> Result<()> {
        let server = &self.server;
        if wait_until(DEFAULT_TIMEOUT_MS, || server.ws_subscribers() >= count).await {
            log::info!("✅ {} WebSocket subscriber(s) ready", count);
            Ok(())
        } else {
            anyhow::bail!(
                "Timeout waiting for {} WebSocket subscribers (have {})",
                count,
                server.ws_subscribers()
            )
        }
    }
}

/// Poll `condition` until it holds or `timeout_ms` elapses; returns the last result.
pub async fn wait_until<F>(timeout_ms: u64, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + Duration::from_millis(timeout_ms);
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Shared log of values handed to a callback
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            items: self.items.clone(),
        }
    }
}

impl<T: Send + 'static> Recorder<T> {
    pub fn new() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Callback that appends every value it receives
    pub fn callback(&self) -> impl FnMut(T) + Send + 'static {
        let items = self.items.clone();
        move |item| items.lock().push(item)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until at least `count` values were recorded
    pub async fn wait_for(&self, count: usize, timeout_ms: u64) -> bool {
        wait_until(timeout_ms, || self.len() >= count).await
    }
}

impl<T: Clone + Send + 'static> Recorder<T> {
    pub fn items(&self) -> Vec<T> {
        self.items.lock().clone()
    }
}

impl<T: Send + 'static> Default for Recorder<T> {
    fn default() -> Self {
        Self::new()
    }
}
