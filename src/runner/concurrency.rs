//! Worker pool sizing

use crate::error::{ConfigError, ConfigResult};
use std::env;

/// Environment variable overriding the detected CPU count
pub const CPU_COUNT_VAR: &str = "VCPU_COUNT";

/// Turn a fractional concurrency request into a pool width.
///
/// 0 (or less) means sequential; otherwise the CPU count is scaled and
/// rounded, never below one worker.
pub fn resolve_concurrency(requested: f64, cpu_count: usize) -> usize {
    if !requested.is_finite() || requested <= 0.0 {
        return 0;
    }
    let width = (requested * cpu_count as f64).round();
    (width as usize).max(1)
}

/// Number of logical CPUs, honoring `VCPU_COUNT`
pub fn cpu_count() -> ConfigResult<usize> {
    let value = env::var(CPU_COUNT_VAR).ok();
    parse_cpu_count(value.as_deref(), num_cpus::get())
}

/// Use `value` when set and non-empty, else `detected`
pub fn parse_cpu_count(value: Option<&str>, detected: usize) -> ConfigResult<usize> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(detected);
    };

    let number: f64 = value.parse().map_err(|_| {
        ConfigError::InvalidCpuCount(format!("expected a number but got `{}`", value))
    })?;
    if number.fract() != 0.0 || number <= 0.0 {
        return Err(ConfigError::InvalidCpuCount(format!(
            "expected a positive integer but got `{}`",
            value
        )));
    }
    Ok(number as usize)
}
