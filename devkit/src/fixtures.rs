/*!
Payload builders shaped like the dashboard's stats events
*/

use serde_json::{json, Value};

/// Builder for one stats event as the server streams it
#[derive(Debug, Clone, Default)]
pub struct StatsBuilder {
    timestamp: Option<i64>,
    cpu_usage: f64,
    memory_usage: f64,
    rx_rate: f64,
    tx_rate: f64,
    disk_io: Option<(f64, f64)>,
}

impl StatsBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Server timestamp in milliseconds
    pub fn at(mut self, timestamp: i64) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn cpu(mut self, usage: f64) -> Self {
        self.cpu_usage = usage;
        self
    }

    pub fn memory(mut self, usage: f64) -> Self {
        self.memory_usage = usage;
        self
    }

    /// Receive / transmit rates in bytes per second
    pub fn network(mut self, rx_rate: f64, tx_rate: f64) -> Self {
        self.rx_rate = rx_rate;
        self.tx_rate = tx_rate;
        self
    }

    pub fn disk_io(mut self, read: f64, write: f64) -> Self {
        self.disk_io = Some((read, write));
        self
    }

    pub fn build(&self) -> Value {
        let mut payload = json!({
            "cpu": {
                "usage": self.cpu_usage,
                "cores": 4,
                "model": "Stub CPU",
                "frequency": "2.4 GHz",
                "temperature": 42.0,
                "load_average": [0.5, 0.4, 0.3]
            },
            "memory": {
                "total": 8_589_934_592u64,
                "used": (8_589_934_592.0 * self.memory_usage / 100.0) as u64,
                "available": (8_589_934_592.0 * (100.0 - self.memory_usage) / 100.0) as u64,
                "usage": self.memory_usage
            },
            "network": {
                "total_rx": 0,
                "total_tx": 0,
                "rx_rate": self.rx_rate,
                "tx_rate": self.tx_rate
            }
        });
        if let Some(ts) = self.timestamp {
            payload["timestamp"] = json!(ts);
        }
        if let Some((read, write)) = self.disk_io {
            payload["disk_io"] = json!({ "read": read, "write": write });
        }
        payload
    }
}

/// Stats event for a given sequence number: timestamp `seq * 1000`, CPU `seq %`
pub fn sequenced_stats(seq: u32) -> Value {
    StatsBuilder::new()
        .at(i64::from(seq) * 1000)
        .cpu(f64::from(seq))
        .build()
}
