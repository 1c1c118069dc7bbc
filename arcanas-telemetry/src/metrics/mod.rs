//! System metrics as received from the dashboard server
//!
//! Provides the client-side view of a stats event:
//! - CPU usage, load averages and core count
//! - Memory usage statistics
//! - Network throughput (receive / transmit rates)
//! - Disk I/O throughput (read / write rates)
//!
//! A stats event is split into one [`Sample`] per [`MetricStream`] and kept in
//! a bounded [`HistoryBuffer`].

mod history;

pub use history::{HistoryBuffer, HistoryError, MetricHistory, DEFAULT_HISTORY_CAPACITY};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Complete system stats event (one SSE / WebSocket message)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemStats {
    pub cpu: CpuStats,
    pub memory: MemoryStats,
    pub network: NetworkStats,
    pub disk_io: Option<DiskIoStats>,
    /// Milliseconds since the epoch, stamped by the server when present
    pub timestamp: Option<i64>,
}

/// CPU usage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CpuStats {
    pub usage: f64,
    pub cores: u32,
    pub model: String,
    pub frequency: String,
    pub temperature: f64,
    pub load_average: Vec<f64>,  // [1min, 5min, 15min]
}

/// Memory usage in bytes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryStats {
    pub total: u64,
    pub used: u64,
    pub available: u64,
    pub usage: f64,
}

/// Network counters and rates in bytes/second
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkStats {
    pub total_rx: u64,
    pub total_tx: u64,
    pub rx_rate: f64,
    pub tx_rate: f64,
}

/// Disk throughput in bytes/second
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DiskIoStats {
    pub read: f64,
    pub write: f64,
}

impl SystemStats {
    /// Timestamp to record this event under: the server stamp, or now.
    pub fn effective_timestamp(&self) -> i64 {
        self.timestamp.unwrap_or_else(|| Utc::now().timestamp_millis())
    }

    /// Split the event into one sample per stream.
    pub fn samples(&self, timestamp: i64) -> Vec<(MetricStream, Sample)> {
        let mut samples = vec![
            (MetricStream::Cpu, Sample::value(timestamp, self.cpu.usage)),
            (MetricStream::Memory, Sample::value(timestamp, self.memory.usage)),
            (
                MetricStream::Network,
                Sample::network(timestamp, self.network.rx_rate, self.network.tx_rate),
            ),
        ];
        if let Some(disk) = &self.disk_io {
            samples.push((MetricStream::Disk, Sample::disk(timestamp, disk.read, disk.write)));
        }
        samples
    }
}

/// Metric streams charted by the dashboard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MetricStream {
    Cpu,
    Memory,
    Network,
    Disk,
}

impl MetricStream {
    pub const ALL: [MetricStream; 4] = [
        MetricStream::Cpu,
        MetricStream::Memory,
        MetricStream::Network,
        MetricStream::Disk,
    ];

    /// Key used to scale this stream's chart
    pub fn chart_key(self) -> MetricKey {
        match self {
            MetricStream::Cpu | MetricStream::Memory => MetricKey::Percent,
            MetricStream::Network => MetricKey::Network,
            MetricStream::Disk => MetricKey::DiskIo,
        }
    }
}

impl fmt::Display for MetricStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MetricStream::Cpu => "cpu",
            MetricStream::Memory => "memory",
            MetricStream::Network => "network",
            MetricStream::Disk => "disk",
        };
        f.write_str(name)
    }
}

/// One named component of a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    Value,
    Rx,
    Tx,
    Read,
    Write,
}

/// Values carried by a sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SampleValues {
    Network { rx: f64, tx: f64 },
    Disk { read: f64, write: f64 },
    Value { value: f64 },
}

/// One timestamped reading, immutable once built
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub timestamp: i64,
    #[serde(flatten)]
    pub values: SampleValues,
}

impl Sample {
    pub fn value(timestamp: i64, value: f64) -> Self {
        Self { timestamp, values: SampleValues::Value { value } }
    }

    pub fn network(timestamp: i64, rx: f64, tx: f64) -> Self {
        Self { timestamp, values: SampleValues::Network { rx, tx } }
    }

    pub fn disk(timestamp: i64, read: f64, write: f64) -> Self {
        Self { timestamp, values: SampleValues::Disk { read, write } }
    }

    /// Component value, `None` when this sample does not carry it
    pub fn component(&self, component: Component) -> Option<f64> {
        match (self.values, component) {
            (SampleValues::Value { value }, Component::Value) => Some(value),
            (SampleValues::Network { rx, .. }, Component::Rx) => Some(rx),
            (SampleValues::Network { tx, .. }, Component::Tx) => Some(tx),
            (SampleValues::Disk { read, .. }, Component::Read) => Some(read),
            (SampleValues::Disk { write, .. }, Component::Write) => Some(write),
            _ => None,
        }
    }
}

/// Which part of a history a chart scales on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKey {
    /// 0-100 percentage (legacy name `value`)
    Percent,
    Rx,
    Tx,
    /// Both network directions (legacy name `net`)
    Network,
    Read,
    Write,
    /// Both disk directions (legacy name `all`)
    DiskIo,
}

/// Value domain of a metric key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Domain {
    Percentage,
    /// Bytes/second displayed in decimal megabytes
    NetworkThroughput,
    /// Bytes/second displayed in binary mebibytes
    DiskThroughput,
}

impl MetricKey {
    pub fn components(self) -> &'static [Component] {
        match self {
            MetricKey::Percent => &[Component::Value],
            MetricKey::Rx => &[Component::Rx],
            MetricKey::Tx => &[Component::Tx],
            MetricKey::Network => &[Component::Rx, Component::Tx],
            MetricKey::Read => &[Component::Read],
            MetricKey::Write => &[Component::Write],
            MetricKey::DiskIo => &[Component::Read, Component::Write],
        }
    }

    pub fn domain(self) -> Domain {
        match self {
            MetricKey::Percent => Domain::Percentage,
            MetricKey::Rx | MetricKey::Tx | MetricKey::Network => Domain::NetworkThroughput,
            MetricKey::Read | MetricKey::Write | MetricKey::DiskIo => Domain::DiskThroughput,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("Unknown metric key: {0}")]
pub struct UnknownMetricKey(pub String);

impl FromStr for MetricKey {
    type Err = UnknownMetricKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "value" => Ok(MetricKey::Percent),
            "rx" => Ok(MetricKey::Rx),
            "tx" => Ok(MetricKey::Tx),
            "net" => Ok(MetricKey::Network),
            "read" => Ok(MetricKey::Read),
            "write" => Ok(MetricKey::Write),
            "all" => Ok(MetricKey::DiskIo),
            other => Err(UnknownMetricKey(other.to_string())),
        }
    }
}
