/*!
# Arcanas DevKit - stubs and helpers for client tests

Lets the telemetry client be tested without a real dashboard server:
- In-process stub server (SSE stream, WebSocket, cookie auth)
- Builders for stats payloads
- Harness with polling waits and callback recorders
*/

pub mod fixtures;
pub mod stub_server;
pub mod test_utils;

pub use fixtures::StatsBuilder;
pub use stub_server::{StubServer, StubUser};
pub use test_utils::{Recorder, TestHarness};
