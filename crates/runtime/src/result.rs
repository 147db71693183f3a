//! Outcome of a script execution.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Resource usage of one execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metrics {
    pub duration_ms: f64,
    #[serde(rename = "memoryUsedMB")]
    pub memory_used_mb: f64,
    pub cpu_percent: f64,
}

impl Metrics {
    /// Metrics from wall time and two resource samples.
    pub fn between(elapsed: Duration, before: &ResourceSample, after: &ResourceSample) -> Self {
        let duration_ms = elapsed.as_secs_f64() * 1000.0;
        let cpu = after.cpu.saturating_sub(before.cpu).as_secs_f64();
        let cpu_percent = if elapsed.is_zero() {
            0.0
        } else {
            cpu / elapsed.as_secs_f64() * 100.0
        };
        Self {
            duration_ms,
            memory_used_mb: after.resident_bytes as f64 / (1024.0 * 1024.0),
            cpu_percent,
        }
    }
}

/// Process-wide CPU time and peak resident memory.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResourceSample {
    pub cpu: Duration,
    pub resident_bytes: u64,
}

impl ResourceSample {
    #[cfg(unix)]
    pub fn now() -> Self {
        use nix::sys::resource::{UsageWho, getrusage};

        let Ok(usage) = getrusage(UsageWho::RUSAGE_SELF) else {
            return Self::default();
        };
        let user = usage.user_time();
        let system = usage.system_time();
        let micros = (user.tv_sec() + system.tv_sec()) as i128 * 1_000_000
            + (user.tv_usec() + system.tv_usec()) as i128;
        let max_rss = usage.max_rss().max(0) as u64;
        // ru_maxrss is bytes on macOS, kilobytes elsewhere.
        let resident_bytes = if cfg!(target_os = "macos") {
            max_rss
        } else {
            max_rss * 1024
        };

        Self {
            cpu: Duration::from_micros(micros.max(0) as u64),
            resident_bytes,
        }
    }

    #[cfg(not(unix))]
    pub fn now() -> Self {
        Self::default()
    }
}

/// Final outcome of `execute_code`.
///
/// `success = false` always comes with `data = null` and a non-empty
/// `error`; `success = true` always has `error = null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub success: bool,
    pub data: Value,
    pub error: Option<String>,
    pub logs: Vec<String>,
    pub metrics: Metrics,
}

impl ExecutionResult {
    pub fn success(data: Value, logs: Vec<String>, metrics: Metrics) -> Self {
        Self {
            success: true,
            data,
            error: None,
            logs,
            metrics,
        }
    }

    pub fn failure(error: impl Into<String>, logs: Vec<String>, metrics: Metrics) -> Self {
        let mut error = error.into();
        if error.trim().is_empty() {
            error = "script failed without a message".to_string();
        }
        Self {
            success: false,
            data: Value::Null,
            error: Some(error),
            logs,
            metrics,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn serializes_camel_case() {
        let result = ExecutionResult::success(json!(2), vec!["hi".into()], Metrics::default());
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(value["success"], true);
        assert_eq!(value["data"], 2);
        assert_eq!(value["error"], Value::Null);
        assert!(value["metrics"].get("durationMs").is_some());
        assert!(value["metrics"].get("memoryUsedMB").is_some());
        assert!(value["metrics"].get("cpuPercent").is_some());
    }

    #[test]
    fn failure_always_has_a_message() {
        let result = ExecutionResult::failure("", Vec::new(), Metrics::default());
        assert!(!result.success);
        assert_eq!(result.data, Value::Null);
        assert!(!result.error.unwrap().is_empty());
    }

    #[test]
    fn metrics_between_samples() {
        let before = ResourceSample {
            cpu: Duration::from_millis(100),
            resident_bytes: 0,
        };
        let after = ResourceSample {
            cpu: Duration::from_millis(150),
            resident_bytes: 2 * 1024 * 1024,
        };
        let metrics = Metrics::between(Duration::from_millis(100), &before, &after);
        assert!((metrics.duration_ms - 100.0).abs() < 1e-6);
        assert!((metrics.cpu_percent - 50.0).abs() < 1e-6);
        assert!((metrics.memory_used_mb - 2.0).abs() < 1e-6);
    }

    #[test]
    fn sampling_is_monotonic() {
        let a = ResourceSample::now();
        let b = ResourceSample::now();
        assert!(b.cpu >= a.cpu);
    }
}
