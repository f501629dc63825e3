//! Kubernetes quantity parsing for the handful of shapes the stack accepts:
//! memory/storage sizes (`512Mi`, `20Gi`, `1.5G`), CPU (`500m`, `0.5`, `2`)
//! and percentage-of-host targets (`40%`).

use std::fmt;

use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use serde::{Serialize, Serializer};

use super::errors::ConfigError;

const MIB: u64 = 1024 * 1024;

/// A sizing target as written in configuration.
#[derive(Clone, Debug, PartialEq)]
pub enum ResourceAmount {
    /// Bytes for memory, millicores for CPU.
    Absolute(u64),
    /// Fraction of the host total, in `(0, 1]`.
    Percent(f64),
}

impl ResourceAmount {
    pub fn memory(field: &str, raw: &str) -> Result<Self, ConfigError> {
        let amount = match parse_percent(raw) {
            Some(p) => ResourceAmount::Percent(p),
            None => parse_bytes(raw)
                .map(ResourceAmount::Absolute)
                .ok_or_else(|| invalid(field, raw))?,
        };
        check_percent(field, raw, amount)
    }

    pub fn cpu(field: &str, raw: &str) -> Result<Self, ConfigError> {
        let amount = match parse_percent(raw) {
            Some(p) => ResourceAmount::Percent(p),
            None => parse_millicores(raw)
                .map(ResourceAmount::Absolute)
                .ok_or_else(|| invalid(field, raw))?,
        };
        check_percent(field, raw, amount)
    }
}

impl fmt::Display for ResourceAmount {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ResourceAmount::Absolute(v) => write!(f, "{v}"),
            ResourceAmount::Percent(p) => write!(f, "{}%", (p * 10_000.0).round() / 100.0),
        }
    }
}

impl Serialize for ResourceAmount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A validated storage request, kept in the form it was written.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StorageSize(String);

impl StorageSize {
    pub fn parse(field: &str, raw: &str) -> Result<Self, ConfigError> {
        match parse_bytes(raw) {
            Some(bytes) if bytes > 0 => Ok(StorageSize(raw.trim().to_string())),
            _ => Err(invalid(field, raw)),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn to_quantity(&self) -> Quantity {
        Quantity(self.0.clone())
    }
}

pub fn memory_quantity(bytes: u64) -> Quantity {
    Quantity(format!("{}Mi", bytes / MIB))
}

pub fn cpu_quantity(millicores: u64) -> Quantity {
    Quantity(format!("{millicores}m"))
}

/// Bytes in a memory or storage quantity.
pub fn parse_bytes(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    let split = raw
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(raw.len());
    let (number, suffix) = raw.split_at(split);
    let multiplier: u64 = match suffix {
        "" => 1,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "P" => 1_000_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        "Pi" => 1 << 50,
        _ => return None,
    };
    let value = parse_number(number)?;
    Some((value * multiplier as f64).round() as u64)
}

/// Millicores in a CPU quantity.
pub fn parse_millicores(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Some(milli) = raw.strip_suffix('m') {
        return milli.parse::<u64>().ok();
    }
    parse_number(raw).map(|cores| (cores * 1000.0).round() as u64)
}

fn parse_percent(raw: &str) -> Option<f64> {
    let number = raw.trim().strip_suffix('%')?;
    parse_number(number.trim()).map(|p| p / 100.0)
}

fn parse_number(raw: &str) -> Option<f64> {
    if raw.is_empty() || raw.starts_with('.') || raw.ends_with('.') {
        return None;
    }
    raw.parse::<f64>().ok().filter(|v| v.is_finite() && *v >= 0.0)
}

fn check_percent(
    field: &str,
    raw: &str,
    amount: ResourceAmount,
) -> Result<ResourceAmount, ConfigError> {
    match amount {
        ResourceAmount::Percent(p) if p <= 0.0 || p > 1.0 => Err(invalid(field, raw)),
        ResourceAmount::Absolute(0) => Err(invalid(field, raw)),
        other => Ok(other),
    }
}

fn invalid(field: &str, raw: &str) -> ConfigError {
    ConfigError::InvalidQuantity {
        field: field.to_string(),
        value: raw.to_string(),
    }
}
