//! Resource governor
//!
//! Turns the memory/CPU/timeout knobs of a request (or the process defaults)
//! into the units the backends enforce: bytes for memory and a CFS quota over
//! a fixed period for CPU. Nothing here fails on bad request values; they are
//! replaced by defaults or clamped, and the adjustment is reported as a warning.

use crate::config::types::ExecutionDefaults;
use crate::errors::LimitsError;
use crate::executors::ExecutionRequest;
use std::time::Duration;

/// CFS scheduling period in microseconds.
pub const CPU_PERIOD_MICROS: i64 = 100_000;

/// Smallest memory limit the docker daemon accepts.
pub const MIN_MEMORY_BYTES: i64 = 6 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct BackendLimits {
    pub memory_bytes: i64,
    pub cpu_period: i64,
    pub cpu_quota: i64,
    pub cpu_quota_ratio: f64,
    pub pids_limit: i64,
    pub wall_clock_timeout: Duration,
    /// Always true; only the container backend can honor it.
    pub network_isolated: bool,
}

/// Limits plus any adjustments made while deriving them.
#[derive(Debug, Clone)]
pub struct GovernedLimits {
    pub limits: BackendLimits,
    pub warnings: Vec<String>,
}

/// Parse a docker-style memory string (`256m`, `1g`, `524288k`, `1048576`).
pub fn parse_memory_limit(raw: &str) -> Result<i64, LimitsError> {
    let invalid = || LimitsError::InvalidMemory(raw.to_string());
    let lower = raw.trim().to_lowercase();
    let digits_end = lower
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (digits, unit) = lower.split_at(digits_end);

    let value: i64 = digits.parse().map_err(|_| invalid())?;
    let multiplier: i64 = match unit {
        "" | "b" => 1,
        "k" | "kb" | "kib" => 1024,
        "m" | "mb" | "mib" => 1024 * 1024,
        "g" | "gb" | "gib" => 1024 * 1024 * 1024,
        _ => return Err(invalid()),
    };

    match value.checked_mul(multiplier) {
        Some(bytes) if bytes > 0 => Ok(bytes),
        _ => Err(invalid()),
    }
}

pub struct ResourceGovernor {
    default_memory_bytes: i64,
    default_cpu_share: f64,
    default_timeout_seconds: u64,
    cpu_floor: f64,
    pids_limit: i64,
}

impl ResourceGovernor {
    pub fn new(defaults: &ExecutionDefaults) -> Result<Self, LimitsError> {
        if !(defaults.cpu_share > 0.0 && defaults.cpu_share <= 1.0) {
            return Err(LimitsError::InvalidCpuShare(defaults.cpu_share));
        }
        if defaults.timeout_seconds == 0 {
            return Err(LimitsError::InvalidTimeout);
        }
        Ok(Self {
            default_memory_bytes: parse_memory_limit(&defaults.memory_limit)?,
            default_cpu_share: defaults.cpu_share,
            default_timeout_seconds: defaults.timeout_seconds,
            cpu_floor: defaults.cpu_floor.clamp(0.001, 1.0),
            pids_limit: defaults.pids_limit,
        })
    }

    pub fn build_limits(&self, request: &ExecutionRequest) -> GovernedLimits {
        let mut warnings = Vec::new();

        let mut memory_bytes = match request.memory_limit.as_deref() {
            Some(raw) => parse_memory_limit(raw).unwrap_or_else(|e| {
                warnings.push(format!("{}; using the default limit", e));
                self.default_memory_bytes
            }),
            None => self.default_memory_bytes,
        };
        if memory_bytes < MIN_MEMORY_BYTES {
            warnings.push(format!(
                "memory limit raised to the {} byte minimum",
                MIN_MEMORY_BYTES
            ));
            memory_bytes = MIN_MEMORY_BYTES;
        }

        let requested_share = request.cpu_share.unwrap_or(self.default_cpu_share);
        let cpu_share = if requested_share.is_nan() || requested_share <= 0.0 {
            warnings.push(format!(
                "{}; using the default share",
                LimitsError::InvalidCpuShare(requested_share)
            ));
            self.default_cpu_share
        } else {
            requested_share
        };
        let cpu_quota_ratio = cpu_share.clamp(self.cpu_floor, 1.0);
        if (cpu_quota_ratio - cpu_share).abs() > f64::EPSILON {
            warnings.push(format!(
                "cpu share {} clamped to {}",
                cpu_share, cpu_quota_ratio
            ));
        }
        let cpu_quota = (cpu_quota_ratio * CPU_PERIOD_MICROS as f64).round() as i64;

        let timeout_seconds = match request.timeout_seconds {
            Some(0) => {
                warnings.push(format!(
                    "{}; using {}s",
                    LimitsError::InvalidTimeout,
                    self.default_timeout_seconds
                ));
                self.default_timeout_seconds
            }
            Some(secs) => secs,
            None => self.default_timeout_seconds,
        };

        GovernedLimits {
            limits: BackendLimits {
                memory_bytes,
                cpu_period: CPU_PERIOD_MICROS,
                cpu_quota,
                cpu_quota_ratio,
                pids_limit: self.pids_limit,
                wall_clock_timeout: Duration::from_secs(timeout_seconds),
                network_isolated: true,
            },
            warnings,
        }
    }
}
