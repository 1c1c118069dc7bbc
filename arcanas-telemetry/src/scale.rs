//! Adaptive chart scale
//!
//! Turns a window of samples into an axis maximum plus five gridlines. Throughput
//! maxima are snapped to 1/2/5/10 × 10^n so the axis only moves when the data
//! crosses a snap boundary, not on every small fluctuation.

use serde::Serialize;

use crate::metrics::{Domain, MetricKey, Sample};

const GRID_FRACTIONS: [f64; 5] = [1.0, 0.75, 0.5, 0.25, 0.0];
const PERCENT_HEADROOM: f64 = 1.2;
const THROUGHPUT_HEADROOM: f64 = 1.1;
const NETWORK_DISPLAY_UNIT: f64 = 1_000_000.0;
const DISK_DISPLAY_UNIT: f64 = 1024.0 * 1024.0;

/// Axis maximum and the five tick positions, highest first
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScaleDescriptor {
    pub max: f64,
    pub gridlines: [f64; 5],
}

impl ScaleDescriptor {
    fn from_max(max: f64) -> Self {
        Self {
            max,
            gridlines: GRID_FRACTIONS.map(|fraction| (max * fraction).round()),
        }
    }
}

impl Default for ScaleDescriptor {
    fn default() -> Self {
        Self::from_max(100.0)
    }
}

/// Compute the scale for `key` over a chronological window of samples.
pub fn compute<'a, I>(history: I, key: MetricKey) -> ScaleDescriptor
where
    I: IntoIterator<Item = &'a Sample>,
{
    let mut seen_any = false;
    let mut max_value = 1.0_f64;
    for sample in history {
        seen_any = true;
        for &component in key.components() {
            max_value = max_value.max(sample.component(component).unwrap_or(0.0));
        }
    }

    if !seen_any {
        return ScaleDescriptor::default();
    }

    match key.domain() {
        Domain::Percentage => {
            let padded = (max_value * PERCENT_HEADROOM).ceil();
            ScaleDescriptor::from_max(padded.min(100.0))
        }
        Domain::NetworkThroughput => throughput_scale(max_value, NETWORK_DISPLAY_UNIT),
        Domain::DiskThroughput => throughput_scale(max_value, DISK_DISPLAY_UNIT),
    }
}

fn throughput_scale(max_value: f64, display_unit: f64) -> ScaleDescriptor {
    let display_max = nice_scale(max_value / display_unit);
    ScaleDescriptor::from_max(display_max * display_unit)
}

/// Round `value` (plus 10 % headroom) up to 1, 2, 5 or 10 times a power of ten.
pub fn nice_scale(value: f64) -> f64 {
    if value == 0.0 {
        return 10.0;
    }

    let padded = value * THROUGHPUT_HEADROOM;
    let exponent = padded.log10().floor() as i32;
    let base = 10f64.powi(exponent);
    let fraction = padded / base;

    let step = if fraction <= 1.0 {
        1.0
    } else if fraction <= 2.0 {
        2.0
    } else if fraction <= 5.0 {
        5.0
    } else {
        10.0
    };
    step * base
}
