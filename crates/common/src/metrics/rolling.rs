//! Rolling in-process metric windows
//!
//! Each metric keeps a bounded deque of timestamped samples. Entries are
//! independent, so a `DashMap` shard lock per metric is all the
//! coordination concurrent requests need.

use super::METRICS_PREFIX;
use dashmap::DashMap;
use metrics::{gauge, histogram};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Observability sink consumed by the pipeline and the degrade policy
pub trait MetricsSink: Send + Sync {
    /// Record one histogram sample
    fn record_histogram(&self, name: &str, value: f64);

    /// Samples recorded within `window`, oldest first
    fn get_metric_values(&self, name: &str, window: Duration) -> Vec<f64>;

    /// Set a gauge value
    fn set_gauge(&self, name: &str, value: f64);
}

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    value: f64,
}

/// Bounded rolling metric store that also forwards to the `metrics` facade
pub struct RollingMetrics {
    series: DashMap<String, VecDeque<Sample>>,
    gauges: DashMap<String, f64>,
    capacity: usize,
    retention: Duration,
}

impl RollingMetrics {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            series: DashMap::new(),
            gauges: DashMap::new(),
            capacity: capacity.max(1),
            retention,
        }
    }

    /// Record a sample with an explicit timestamp
    pub fn record_at(&self, name: &str, value: f64, at: Instant) {
        let mut entry = self.series.entry(name.to_string()).or_default();
        entry.push_back(Sample { at, value });
        while entry.len() > self.capacity {
            entry.pop_front();
        }
        let now = Instant::now();
        while let Some(front) = entry.front() {
            if now.saturating_duration_since(front.at) > self.retention {
                entry.pop_front();
            } else {
                break;
            }
        }
    }

    /// Drop every sample of a metric
    pub fn clear(&self, name: &str) {
        self.series.remove(name);
    }

    /// Current gauge value
    pub fn gauge_value(&self, name: &str) -> Option<f64> {
        self.gauges.get(name).map(|v| *v)
    }

    /// Number of retained samples for a metric
    pub fn len(&self, name: &str) -> usize {
        self.series.get(name).map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self, name: &str) -> bool {
        self.len(name) == 0
    }
}

impl Default for RollingMetrics {
    fn default() -> Self {
        Self::new(1000, Duration::from_secs(3600))
    }
}

impl MetricsSink for RollingMetrics {
    fn record_histogram(&self, name: &str, value: f64) {
        self.record_at(name, value, Instant::now());
        histogram!(format!("{}_{}", METRICS_PREFIX, name)).record(value);
    }

    fn get_metric_values(&self, name: &str, window: Duration) -> Vec<f64> {
        let now = Instant::now();
        self.series
            .get(name)
            .map(|samples| {
                samples
                    .iter()
                    .filter(|s| now.saturating_duration_since(s.at) <= window)
                    .map(|s| s.value)
                    .collect()
            })
            .unwrap_or_default()
    }

    fn set_gauge(&self, name: &str, value: f64) {
        self.gauges.insert(name.to_string(), value);
        gauge!(format!("{}_{}", METRICS_PREFIX, name)).set(value);
    }
}

/// Nearest-rank percentile (`pct` in 0..=100); `None` for an empty slice
pub fn percentile(values: &[f64], pct: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    let index = rank.clamp(1, sorted.len()) - 1;
    Some(sorted[index])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_evicts_oldest() {
        let store = RollingMetrics::new(3, Duration::from_secs(60));
        for v in 1..=5 {
            store.record_histogram("rag_latency", v as f64);
        }
        let values = store.get_metric_values("rag_latency", Duration::from_secs(60));
        assert_eq!(values, vec![3.0, 4.0, 5.0]);
    }

    #[test]
    fn test_window_filters_old_samples() {
        let store = RollingMetrics::default();
        let old = Instant::now()
            .checked_sub(Duration::from_secs(600))
            .unwrap_or_else(Instant::now);
        store.record_at("llm_cost_per_answer_usd", 0.5, old);
        store.record_histogram("llm_cost_per_answer_usd", 0.002);
        let recent = store.get_metric_values("llm_cost_per_answer_usd", Duration::from_secs(60));
        assert_eq!(recent, vec![0.002]);
    }

    #[test]
    fn test_gauge_and_clear() {
        let store = RollingMetrics::default();
        store.set_gauge("rag_degrade_active", 1.0);
        assert_eq!(store.gauge_value("rag_degrade_active"), Some(1.0));
        store.record_histogram("coverage_score", 0.4);
        store.clear("coverage_score");
        assert!(store.is_empty("coverage_score"));
    }

    #[test]
    fn test_nearest_rank_percentile() {
        let values: Vec<f64> = (1..=20).map(|v| v as f64).collect();
        assert_eq!(percentile(&values, 95.0), Some(19.0));
        assert_eq!(percentile(&[7.0], 95.0), Some(7.0));
        assert_eq!(percentile(&[], 95.0), None);
    }
}
