//! In-process metrics for herbtrace
//!
//! Counters, gauges and latency histograms keyed by name, exportable as JSON
//! or Prometheus text. Names live in [`metric_names`].

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Process-wide metrics registry
pub struct MetricsRegistry {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
    gauges: RwLock<HashMap<String, Arc<AtomicU64>>>,
    histograms: RwLock<HashMap<String, Arc<Histogram>>>,
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    pub async fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    /// Counter split by a single label, stored as `name.label`
    pub async fn inc_labeled(&self, name: &str, label: &str) {
        self.add_counter(&format!("{name}.{label}"), 1).await;
    }

    pub async fn add_counter(&self, name: &str, value: u64) {
        let counters = self.counters.read().await;
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        drop(counters);

        let mut counters = self.counters.write().await;
        counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)))
            .fetch_add(value, Ordering::Relaxed);
    }

    pub async fn set_gauge(&self, name: &str, value: u64) {
        let gauges = self.gauges.read().await;
        if let Some(gauge) = gauges.get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        drop(gauges);

        let mut gauges = self.gauges.write().await;
        gauges.insert(name.to_string(), Arc::new(AtomicU64::new(value)));
    }

    pub async fn get_counter(&self, name: &str) -> u64 {
        self.counters
            .read()
            .await
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub async fn get_gauge(&self, name: &str) -> u64 {
        self.gauges
            .read()
            .await
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub async fn observe_histogram(&self, name: &str, value: f64) {
        let histograms = self.histograms.read().await;
        if let Some(histogram) = histograms.get(name) {
            histogram.observe(value);
            return;
        }
        drop(histograms);

        let mut histograms = self.histograms.write().await;
        histograms
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::default()))
            .observe(value);
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Snapshot of every metric, sorted by name
    pub async fn to_json(&self) -> serde_json::Value {
        let counters: BTreeMap<String, u64> = self
            .counters
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();
        let gauges: BTreeMap<String, u64> = self
            .gauges
            .read()
            .await
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();
        let histograms: BTreeMap<String, serde_json::Value> = self
            .histograms
            .read()
            .await
            .iter()
            .map(|(k, h)| (k.clone(), h.to_json()))
            .collect();

        serde_json::json!({
            "uptime_seconds": self.uptime_seconds(),
            "counters": counters,
            "gauges": gauges,
            "histograms": histograms,
        })
    }

    pub async fn to_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP herbtrace_uptime_seconds Time since service start\n");
        output.push_str("# TYPE herbtrace_uptime_seconds gauge\n");
        output.push_str(&format!("herbtrace_uptime_seconds {}\n\n", self.uptime_seconds()));

        for (name, counter) in self.counters.read().await.iter() {
            let name = prometheus_name(name);
            output.push_str(&format!("# TYPE {name} counter\n"));
            output.push_str(&format!("{name} {}\n", counter.load(Ordering::Relaxed)));
        }

        for (name, gauge) in self.gauges.read().await.iter() {
            let name = prometheus_name(name);
            output.push_str(&format!("# TYPE {name} gauge\n"));
            output.push_str(&format!("{name} {}\n", gauge.load(Ordering::Relaxed)));
        }

        for (name, histogram) in self.histograms.read().await.iter() {
            output.push_str(&histogram.to_prometheus(&prometheus_name(name)));
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn prometheus_name(name: &str) -> String {
    name.replace(['.', '-'], "_")
}

/// Fixed-bucket histogram. Sum is kept in milliseconds.
pub struct Histogram {
    buckets: Vec<f64>,
    counts: Vec<AtomicU64>,
    sum_millis: AtomicU64,
    count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts,
            sum_millis: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: f64) {
        self.sum_millis
            .fetch_add((value * 1000.0) as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        if let Some(i) = self.buckets.iter().position(|b| value <= *b) {
            self.counts[i].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    fn sum(&self) -> f64 {
        self.sum_millis.load(Ordering::Relaxed) as f64 / 1000.0
    }

    pub fn to_json(&self) -> serde_json::Value {
        let counts: Vec<u64> = self.counts.iter().map(|c| c.load(Ordering::Relaxed)).collect();
        serde_json::json!({
            "buckets": self.buckets,
            "counts": counts,
            "sum": self.sum(),
            "count": self.count(),
        })
    }

    fn to_prometheus(&self, name: &str) -> String {
        let mut output = format!("# TYPE {name} histogram\n");
        let mut cumulative = 0u64;
        for (bucket, count) in self.buckets.iter().zip(&self.counts) {
            cumulative += count.load(Ordering::Relaxed);
            output.push_str(&format!("{name}_bucket{{le=\"{bucket}\"}} {cumulative}\n"));
        }
        output.push_str(&format!("{name}_bucket{{le=\"+Inf\"}} {}\n", self.count()));
        output.push_str(&format!("{name}_sum {}\n", self.sum()));
        output.push_str(&format!("{name}_count {}\n", self.count()));
        output
    }
}

impl Default for Histogram {
    /// Seconds, tuned for ledger round-trips as well as local writes
    fn default() -> Self {
        Self::new(vec![
            0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0,
        ])
    }
}

/// Metric names
pub mod metric_names {
    // Transitions, suffixed with the transition name
    pub const TRANSITIONS_COMMITTED: &str = "herbtrace.transitions.committed";
    pub const TRANSITIONS_REFUSED: &str = "herbtrace.transitions.refused";
    pub const CAS_CONFLICTS: &str = "herbtrace.transitions.cas_conflicts";

    // Ledger mirror, suffixed with the outcome or error kind
    pub const LEDGER_CONFIRMED: &str = "herbtrace.ledger.confirmed";
    pub const LEDGER_FAILED: &str = "herbtrace.ledger.failed";
    pub const LEDGER_BACKGROUND: &str = "herbtrace.ledger.background";
    pub const LEDGER_ANNOTATION_ERRORS: &str = "herbtrace.ledger.annotation_errors";
    pub const LEDGER_STALE_ANNOTATIONS: &str = "herbtrace.ledger.stale_annotations";

    pub const COMMIT_LATENCY: &str = "herbtrace.commit.latency_seconds";
    pub const LEDGER_LATENCY: &str = "herbtrace.ledger.latency_seconds";

    pub const DB_POOL_SIZE: &str = "herbtrace.db.pool_size";
}

/// Time an async operation into a histogram
pub async fn timed<F, T>(metrics: &MetricsRegistry, metric_name: &str, f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    let start = Instant::now();
    let result = f.await;
    metrics
        .observe_histogram(metric_name, start.elapsed().as_secs_f64())
        .await;
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counters_accumulate() {
        let registry = MetricsRegistry::new();

        registry.inc_counter("test.counter").await;
        registry.add_counter("test.counter", 5).await;
        registry.inc_labeled("test.counter", "verify").await;

        assert_eq!(registry.get_counter("test.counter").await, 6);
        assert_eq!(registry.get_counter("test.counter.verify").await, 1);
        assert_eq!(registry.get_counter("missing").await, 0);
    }

    #[tokio::test]
    async fn gauge_overwrites() {
        let registry = MetricsRegistry::new();
        registry.set_gauge("test.gauge", 100).await;
        registry.set_gauge("test.gauge", 50).await;
        assert_eq!(registry.get_gauge("test.gauge").await, 50);
    }

    #[tokio::test]
    async fn histogram_counts_observations() {
        let registry = MetricsRegistry::new();
        for v in [0.004, 0.2, 20.0, 99.0] {
            registry.observe_histogram("test.latency", v).await;
        }

        let json = registry.to_json().await;
        assert_eq!(json["histograms"]["test.latency"]["count"], 4);
    }

    #[tokio::test]
    async fn prometheus_export_sanitizes_names() {
        let registry = MetricsRegistry::new();
        registry.inc_labeled(metric_names::LEDGER_FAILED, "timeout").await;
        let _ = timed(&registry, metric_names::LEDGER_LATENCY, async {}).await;

        let text = registry.to_prometheus().await;
        assert!(text.contains("herbtrace_ledger_failed_timeout 1"), "{text}");
        assert!(text.contains("herbtrace_ledger_latency_seconds_count 1"), "{text}");
    }
}
