use std::collections::{BTreeMap, VecDeque};

use tracing::{debug, warn};

use super::{MetricKey, MetricStream, Sample, SystemStats};
use crate::scale::{self, ScaleDescriptor};

/// One minute of history at the server's one-second push rate
pub const DEFAULT_HISTORY_CAPACITY: usize = 60;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error("Sample at {got} is older than the newest sample at {newest}")]
    OutOfOrder { newest: i64, got: i64 },
}

/// Sliding window over the most recent samples of one stream
#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    samples: VecDeque<Sample>,
    capacity: usize,
}

impl HistoryBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a sample, evicting the oldest one when full.
    ///
    /// Timestamps must be non-decreasing; an older sample is rejected and the
    /// buffer is left untouched.
    pub fn push(&mut self, sample: Sample) -> Result<(), HistoryError> {
        if let Some(newest) = self.samples.back() {
            if sample.timestamp < newest.timestamp {
                return Err(HistoryError::OutOfOrder {
                    newest: newest.timestamp,
                    got: sample.timestamp,
                });
            }
        }
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }

    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn scale(&self, key: MetricKey) -> ScaleDescriptor {
        scale::compute(self.iter(), key)
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

/// History buffers for every charted stream
#[derive(Debug, Clone)]
pub struct MetricHistory {
    buffers: BTreeMap<MetricStream, HistoryBuffer>,
}

impl MetricHistory {
    pub fn new(capacity: usize) -> Self {
        let buffers = MetricStream::ALL
            .into_iter()
            .map(|stream| (stream, HistoryBuffer::new(capacity)))
            .collect();
        Self { buffers }
    }

    /// Record one stats event into each stream it carries.
    ///
    /// Out-of-order samples are skipped with a warning; delivery is best effort.
    pub fn record(&mut self, stats: &SystemStats) {
        let timestamp = stats.effective_timestamp();
        for (stream, sample) in stats.samples(timestamp) {
            if let Err(e) = self.push(stream, sample) {
                warn!(%stream, error = %e, "Dropping out-of-order sample");
            }
        }
        debug!(timestamp, "Recorded stats event");
    }

    pub fn push(&mut self, stream: MetricStream, sample: Sample) -> Result<(), HistoryError> {
        self.buffers
            .entry(stream)
            .or_default()
            .push(sample)
    }

    pub fn buffer(&self, stream: MetricStream) -> Option<&HistoryBuffer> {
        self.buffers.get(&stream)
    }

    /// Scale for the stream's chart; the default scale when nothing was recorded.
    pub fn scale(&self, stream: MetricStream) -> ScaleDescriptor {
        match self.buffers.get(&stream) {
            Some(buffer) => buffer.scale(stream.chart_key()),
            None => ScaleDescriptor::default(),
        }
    }

    pub fn clear(&mut self) {
        self.buffers.values_mut().for_each(HistoryBuffer::clear);
    }
}

impl Default for MetricHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}
