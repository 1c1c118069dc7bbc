//! Text rendering of chart axes and latest readings

use arcanas_telemetry::metrics::{Component, Domain, Sample};
use arcanas_telemetry::units::{format_bytes, UsageLevel};
use arcanas_telemetry::{MetricStream, ScaleDescriptor};

const MEGABYTE: f64 = 1_000_000.0;
const MEBIBYTE: f64 = 1024.0 * 1024.0;

/// Label of one gridline value in the chart's display unit
pub fn axis_label(domain: Domain, value: f64) -> String {
    match domain {
        Domain::Percentage => format!("{}%", round2(value)),
        Domain::NetworkThroughput => format!("{} MB/s", round2(value / MEGABYTE)),
        Domain::DiskThroughput => format!("{} MB/s", round2(value / MEBIBYTE)),
    }
}

/// Gridline labels of a stream's chart, top to bottom
pub fn axis_labels(stream: MetricStream, scale: &ScaleDescriptor) -> Vec<String> {
    let domain = stream.chart_key().domain();
    scale
        .gridlines
        .iter()
        .map(|&value| axis_label(domain, value))
        .collect()
}

/// Latest reading of a stream, e.g. `42.5% (normal)` or `↓ 1.5 MB/s ↑ 200 KB/s`
pub fn reading(stream: MetricStream, sample: &Sample) -> Option<String> {
    match stream {
        MetricStream::Cpu | MetricStream::Memory => {
            let value = sample.component(Component::Value)?;
            let level = UsageLevel::from_percentage(value.max(0.0).round() as u32);
            Some(format!("{}% ({})", round2(value), level_name(level)))
        }
        MetricStream::Network => Some(format!(
            "↓ {} ↑ {}",
            rate(sample.component(Component::Rx)?),
            rate(sample.component(Component::Tx)?)
        )),
        MetricStream::Disk => Some(format!(
            "read {} write {}",
            rate(sample.component(Component::Read)?),
            rate(sample.component(Component::Write)?)
        )),
    }
}

fn rate(bytes_per_sec: f64) -> String {
    format!("{}/s", format_bytes(bytes_per_sec, 1))
}

fn level_name(level: UsageLevel) -> &'static str {
    match level {
        UsageLevel::Normal => "normal",
        UsageLevel::Warning => "warning",
        UsageLevel::Critical => "critical",
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
