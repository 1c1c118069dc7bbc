/*!
# Arcanas Telemetry - client side of the storage dashboard

Everything a dashboard front end needs between the server and its charts:
- `realtime` : live stats over Server-Sent Events or WebSocket
- `metrics` + `scale` : bounded sample history and adaptive chart axes
- `session` : login / logout / validate with a single-writer state store
- `units` : byte formatting and storage usage helpers
- `api` + `config` : HTTP client (cookie session) and TOML configuration
*/

pub mod api;
pub mod config;
pub mod metrics;
pub mod realtime;
pub mod scale;
pub mod session;
pub mod units;

pub use api::{ApiClient, ApiError};
pub use config::{DashboardConfig, Transport};
pub use metrics::{MetricHistory, MetricKey, MetricStream, Sample, SystemStats};
pub use realtime::{ChannelHandle, CloseEvent, ConnectionState, RealtimeClient, TransportError};
pub use scale::ScaleDescriptor;
pub use session::{SessionState, SessionStore};
