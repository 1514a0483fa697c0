//! Operation health tracking.
//!
//! In-memory sliding-window metrics per `tool.operation`: success rate,
//! average latency and recent backing-store failures. Reported by the health
//! probe; nothing here blocks a call.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::time::{Duration, Instant};

// =============================================================================
// Configuration
// =============================================================================

/// Health assessment thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    /// Minimum success rate for HEALTHY status (default: 0.95).
    pub success_rate_healthy: f64,
    /// Minimum success rate for DEGRADED status (default: 0.80).
    pub success_rate_degraded: f64,
    /// Maximum avg latency (ms) for HEALTHY status (default: 2000).
    pub latency_healthy_ms: f64,
    /// Maximum avg latency (ms) for DEGRADED status (default: 5000).
    pub latency_degraded_ms: f64,
    /// Minimum calls before health assessment (default: 5).
    pub min_calls_for_assessment: usize,
    /// Failures inside `failure_window` that flag an operation as failing (default: 5).
    pub failure_threshold: usize,
    #[serde(with = "humantime_serde")]
    pub failure_window: Duration,
    /// Sliding window size per operation (default: 100).
    pub window_size: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            success_rate_healthy: 0.95,
            success_rate_degraded: 0.80,
            latency_healthy_ms: 2000.0,
            latency_degraded_ms: 5000.0,
            min_calls_for_assessment: 5,
            failure_threshold: 5,
            failure_window: Duration::from_secs(300),
            window_size: 100,
        }
    }
}

/// Health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl HealthStatus {
    fn rank(self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Unknown => 1,
            HealthStatus::Degraded => 2,
            HealthStatus::Unhealthy => 3,
        }
    }

    fn worse(self, other: HealthStatus) -> HealthStatus {
        if self.rank() >= other.rank() {
            self
        } else {
            other
        }
    }
}

// =============================================================================
// Per-operation metrics
// =============================================================================

#[derive(Debug, Clone)]
struct Sample {
    /// `None` on success, the error kind otherwise.
    failure: Option<&'static str>,
    latency_ms: f64,
    at: Instant,
}

#[derive(Debug)]
struct OperationMetrics {
    samples: VecDeque<Sample>,
    window_size: usize,
}

impl OperationMetrics {
    fn new(window_size: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(window_size),
            window_size,
        }
    }

    fn push(&mut self, sample: Sample) {
        if self.samples.len() >= self.window_size {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    fn success_rate(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let ok = self.samples.iter().filter(|s| s.failure.is_none()).count();
        ok as f64 / self.samples.len() as f64
    }

    fn avg_latency_ms(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().map(|s| s.latency_ms).sum::<f64>() / self.samples.len() as f64
    }

    fn failures_since(&self, window: Duration) -> usize {
        let now = Instant::now();
        self.samples
            .iter()
            .filter(|s| s.failure.is_some() && now.duration_since(s.at) <= window)
            .count()
    }

    fn failure_kinds(&self) -> BTreeMap<&'static str, usize> {
        let mut counts = BTreeMap::new();
        for kind in self.samples.iter().filter_map(|s| s.failure) {
            *counts.entry(kind).or_default() += 1;
        }
        counts
    }
}

// =============================================================================
// Reports
// =============================================================================

/// Health report for a single operation.
#[derive(Debug, Clone, Serialize)]
pub struct OperationHealthReport {
    pub operation: String,
    pub status: HealthStatus,
    pub success_rate: f64,
    pub avg_latency_ms: f64,
    pub total_calls: usize,
    pub recent_failures: usize,
    pub failure_kinds: BTreeMap<&'static str, usize>,
    pub issues: Vec<String>,
}

/// Gateway-wide health report.
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealthReport {
    pub status: HealthStatus,
    pub operations: Vec<OperationHealthReport>,
}

// =============================================================================
// Tracker
// =============================================================================

/// Sliding-window health tracker keyed by `tool.operation`.
#[derive(Debug)]
pub struct OperationHealthTracker {
    config: HealthConfig,
    metrics: HashMap<String, OperationMetrics>,
}

impl OperationHealthTracker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            metrics: HashMap::new(),
        }
    }

    /// Record one execution. `failure` is the error kind, if any.
    pub fn record(&mut self, operation: &str, failure: Option<&'static str>, latency_ms: f64) {
        let window = self.config.window_size.max(1);
        self.metrics
            .entry(operation.to_string())
            .or_insert_with(|| OperationMetrics::new(window))
            .push(Sample {
                failure,
                latency_ms,
                at: Instant::now(),
            });
    }

    pub fn report(&self, operation: &str) -> OperationHealthReport {
        let Some(m) = self.metrics.get(operation) else {
            return OperationHealthReport {
                operation: operation.to_string(),
                status: HealthStatus::Unknown,
                success_rate: 0.0,
                avg_latency_ms: 0.0,
                total_calls: 0,
                recent_failures: 0,
                failure_kinds: BTreeMap::new(),
                issues: vec!["No execution history".to_string()],
            };
        };

        let total = m.samples.len();
        let success_rate = m.success_rate();
        let avg_latency = m.avg_latency_ms();
        let recent_failures = m.failures_since(self.config.failure_window);
        let mut issues = Vec::new();

        let status = if total < self.config.min_calls_for_assessment {
            issues.push(format!(
                "Insufficient data ({}/{})",
                total, self.config.min_calls_for_assessment
            ));
            HealthStatus::Unknown
        } else {
            let by_rate = if success_rate >= self.config.success_rate_healthy {
                HealthStatus::Healthy
            } else if success_rate >= self.config.success_rate_degraded {
                HealthStatus::Degraded
            } else {
                HealthStatus::Unhealthy
            };
            let by_latency = if avg_latency <= self.config.latency_healthy_ms {
                HealthStatus::Healthy
            } else if avg_latency <= self.config.latency_degraded_ms {
                HealthStatus::Degraded
            } else {
                HealthStatus::Unhealthy
            };

            if success_rate < self.config.success_rate_healthy {
                issues.push(format!(
                    "Success rate {:.1}% below {:.0}% threshold",
                    success_rate * 100.0,
                    self.config.success_rate_healthy * 100.0,
                ));
            }
            if avg_latency > self.config.latency_healthy_ms {
                issues.push(format!(
                    "Avg latency {:.0}ms exceeds {:.0}ms threshold",
                    avg_latency, self.config.latency_healthy_ms,
                ));
            }
            by_rate.worse(by_latency)
        };

        let status = if recent_failures >= self.config.failure_threshold {
            issues.push(format!(
                "{} failures in last {}s",
                recent_failures,
                self.config.failure_window.as_secs(),
            ));
            status.worse(HealthStatus::Unhealthy)
        } else {
            status
        };

        OperationHealthReport {
            operation: operation.to_string(),
            status,
            success_rate,
            avg_latency_ms: avg_latency,
            total_calls: total,
            recent_failures,
            failure_kinds: m.failure_kinds(),
            issues,
        }
    }

    /// Report every configured operation plus any with recorded history.
    pub fn system_report(&self, configured: &[String]) -> SystemHealthReport {
        let mut names: Vec<String> = configured.to_vec();
        for name in self.metrics.keys() {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names.sort();

        let operations: Vec<OperationHealthReport> =
            names.iter().map(|name| self.report(name)).collect();

        let status = operations
            .iter()
            .filter(|r| r.status != HealthStatus::Unknown)
            .map(|r| r.status)
            .fold(None, |acc: Option<HealthStatus>, s| {
                Some(acc.map_or(s, |a| a.worse(s)))
            })
            .unwrap_or(HealthStatus::Unknown);

        SystemHealthReport { status, operations }
    }
}

impl Default for OperationHealthTracker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

// =============================================================================
// Tests
// =============================================================================
