//! Byte-count formatting and unit conversion
//!
//! Every size and throughput shown by the dashboard goes through these helpers:
//! - Binary units (1 KB = 1024 B) from bytes up to exabytes
//! - Short ("2.5 GB"), compact ("2.5GB") and long ("2.5 Gigabytes") labels
//! - Usage percentages and their severity level

use std::fmt;
use std::str::FromStr;

const STEP: f64 = 1024.0;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum UnitError {
    #[error("Invalid target unit: {0}. Must be one of: B, KB, MB, GB, TB, PB, EB")]
    InvalidUnit(String),
}

/// Binary byte unit, indexed by its power of 1024
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ByteUnit {
    B,
    KB,
    MB,
    GB,
    TB,
    PB,
    EB,
}

impl ByteUnit {
    pub const ALL: [ByteUnit; 7] = [
        ByteUnit::B,
        ByteUnit::KB,
        ByteUnit::MB,
        ByteUnit::GB,
        ByteUnit::TB,
        ByteUnit::PB,
        ByteUnit::EB,
    ];

    /// Power of 1024 this unit represents
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn symbol(self) -> &'static str {
        match self {
            ByteUnit::B => "B",
            ByteUnit::KB => "KB",
            ByteUnit::MB => "MB",
            ByteUnit::GB => "GB",
            ByteUnit::TB => "TB",
            ByteUnit::PB => "PB",
            ByteUnit::EB => "EB",
        }
    }

    pub fn full_name(self) -> &'static str {
        match self {
            ByteUnit::B => "Bytes",
            ByteUnit::KB => "Kilobytes",
            ByteUnit::MB => "Megabytes",
            ByteUnit::GB => "Gigabytes",
            ByteUnit::TB => "Terabytes",
            ByteUnit::PB => "Petabytes",
            ByteUnit::EB => "Exabytes",
        }
    }

    /// Number of bytes in one of this unit
    pub fn factor(self) -> f64 {
        STEP.powi(self.index() as i32)
    }

    /// Largest unit not exceeding `bytes` (floor of log1024), clamped to the table.
    pub fn for_bytes(bytes: f64) -> Self {
        if !(bytes > 0.0) {
            return ByteUnit::B;
        }
        let index = (bytes.ln() / STEP.ln()).floor();
        let index = index.clamp(0.0, (Self::ALL.len() - 1) as f64) as usize;
        Self::ALL[index]
    }

    /// Value of `bytes` expressed in this unit, rounded to `decimals` places.
    pub fn convert(self, bytes: f64, decimals: u32) -> f64 {
        if bytes == 0.0 {
            return 0.0;
        }
        round_to(bytes / self.factor(), decimals)
    }
}

impl fmt::Display for ByteUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for ByteUnit {
    type Err = UnitError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        ByteUnit::ALL
            .into_iter()
            .find(|unit| unit.symbol() == upper)
            .ok_or_else(|| UnitError::InvalidUnit(s.to_string()))
    }
}

/// Severity of a usage percentage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageLevel {
    Normal,
    Warning,
    Critical,
}

impl UsageLevel {
    pub fn from_percentage(percentage: u32) -> Self {
        if percentage >= 90 {
            UsageLevel::Critical
        } else if percentage >= 75 {
            UsageLevel::Warning
        } else {
            UsageLevel::Normal
        }
    }
}

fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}

fn scaled(bytes: f64, decimals: u32) -> Option<(f64, ByteUnit)> {
    if bytes == 0.0 || bytes.is_nan() {
        return None;
    }
    let unit = ByteUnit::for_bytes(bytes);
    Some((unit.convert(bytes, decimals), unit))
}

/// "2.5 GB"
pub fn format_bytes(bytes: f64, decimals: u32) -> String {
    match scaled(bytes, decimals) {
        Some((value, unit)) => format!("{} {}", value, unit.symbol()),
        None => "0 B".to_string(),
    }
}

/// "2.5 Gigabytes"
pub fn format_bytes_full(bytes: f64, decimals: u32) -> String {
    match scaled(bytes, decimals) {
        Some((value, unit)) => format!("{} {}", value, unit.full_name()),
        None => "0 Bytes".to_string(),
    }
}

/// "2.5GB"
pub fn format_bytes_compact(bytes: f64, decimals: u32) -> String {
    match scaled(bytes, decimals) {
        Some((value, unit)) => format!("{}{}", value, unit.symbol()),
        None => "0B".to_string(),
    }
}

pub fn byte_unit(bytes: f64) -> ByteUnit {
    ByteUnit::for_bytes(bytes)
}

/// Convert `bytes` to the unit named `target_unit` (case-insensitive).
///
/// An unknown unit name is a caller bug and is reported as [`UnitError::InvalidUnit`].
pub fn convert_to_unit(bytes: f64, target_unit: &str, decimals: u32) -> Result<f64, UnitError> {
    if bytes == 0.0 {
        return Ok(0.0);
    }
    let unit: ByteUnit = target_unit.parse()?;
    Ok(unit.convert(bytes, decimals))
}

/// Rounded percentage of `used` over `total`, 0 when `total` is 0.
pub fn usage_percentage(used: f64, total: f64) -> u32 {
    if !(total > 0.0) {
        return 0;
    }
    ((used / total) * 100.0).round().max(0.0) as u32
}

/// "2.5 GB of 10 GB (25%)"
pub fn format_storage_usage(used: f64, total: f64, decimals: u32) -> String {
    format!(
        "{} of {} ({}%)",
        format_bytes(used, decimals),
        format_bytes(total, decimals),
        usage_percentage(used, total)
    )
}
