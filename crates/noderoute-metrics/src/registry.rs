use crate::snapshot::NodeMetrics;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

const NUM_HISTOGRAM_BINS: usize = 100;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Logarithmic latency histogram for percentile estimation.
///
/// Each power of ten between 1µs and 1s is split into ten bins; anything
/// slower lands in the overflow bins. Recording is lock-free.
#[derive(Debug)]
struct LatencyHistogram {
    bins: [AtomicU64; NUM_HISTOGRAM_BINS],
    total_latency: AtomicU64,
    sample_count: AtomicU64,
}

impl LatencyHistogram {
    fn new() -> Self {
        Self {
            bins: std::array::from_fn(|_| AtomicU64::new(0)),
            total_latency: AtomicU64::new(0),
            sample_count: AtomicU64::new(0),
        }
    }

    fn record(&self, latency_us: u64) {
        self.bins[Self::latency_to_bin(latency_us)].fetch_add(1, Ordering::Relaxed);
        self.total_latency.fetch_add(latency_us, Ordering::Relaxed);
        self.sample_count.fetch_add(1, Ordering::Relaxed);
    }

    fn latency_to_bin(latency_us: u64) -> usize {
        if latency_us == 0 {
            return 0;
        }
        let decade = latency_us.ilog10() as usize;
        let leading_digit = (latency_us / 10u64.pow(decade as u32)) as usize;
        (decade * 10 + leading_digit.min(9)).min(NUM_HISTOGRAM_BINS - 1)
    }

    /// Lower bound of a bin's range.
    fn bin_to_latency(bin: usize) -> u64 {
        if bin == 0 {
            return 1;
        }
        let decade = (bin / 10) as u32;
        let sub_bin = (bin % 10).max(1) as u64;
        10u64.saturating_pow(decade).saturating_mul(sub_bin)
    }

    fn estimate_percentile(&self, percentile: u64) -> u64 {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return 0;
        }

        let target = ((total * percentile) / 100).max(1);
        let mut cumulative = 0;
        for (idx, bin) in self.bins.iter().enumerate() {
            let count = bin.load(Ordering::Relaxed);
            if count > 0 && cumulative + count >= target {
                // interpolate inside the bin
                let start = Self::bin_to_latency(idx);
                let end = Self::bin_to_latency(idx + 1).max(start);
                let fraction = (target - cumulative) as f64 / count as f64;
                return start + ((end - start) as f64 * fraction) as u64;
            }
            cumulative += count;
        }
        Self::bin_to_latency(NUM_HISTOGRAM_BINS)
    }

    /// `(avg, p50, p95, p99)` in microseconds.
    fn summary(&self) -> (u64, u64, u64, u64) {
        let total = self.sample_count.load(Ordering::Relaxed);
        if total == 0 {
            return (0, 0, 0, 0);
        }
        let avg = self.total_latency.load(Ordering::Relaxed) / total;
        (
            avg,
            self.estimate_percentile(50),
            self.estimate_percentile(95),
            self.estimate_percentile(99),
        )
    }
}

/// Per-node counters.
#[derive(Debug)]
struct NodeStats {
    request_count: AtomicU64,
    success_count: AtomicU64,
    failure_count: AtomicU64,
    latencies: LatencyHistogram,
    last_request_ms: AtomicU64,
}

impl NodeStats {
    fn new() -> Self {
        Self {
            request_count: AtomicU64::new(0),
            success_count: AtomicU64::new(0),
            failure_count: AtomicU64::new(0),
            latencies: LatencyHistogram::new(),
            last_request_ms: AtomicU64::new(0),
        }
    }

    fn snapshot(&self, node_id: &str) -> NodeMetrics {
        let (avg, p50, p95, p99) = self.latencies.summary();
        NodeMetrics {
            node_id: node_id.to_string(),
            request_count: self.request_count.load(Ordering::Relaxed),
            success_count: self.success_count.load(Ordering::Relaxed),
            failure_count: self.failure_count.load(Ordering::Relaxed),
            avg_latency_us: avg,
            p50_latency_us: p50,
            p95_latency_us: p95,
            p99_latency_us: p99,
            last_request_ms: self.last_request_ms.load(Ordering::Relaxed),
        }
    }
}

/// Thread-safe request counters.
///
/// Global totals are plain atomics. Per-node entries live behind a
/// `RwLock` that is only written when a node is seen for the first time
/// or forgotten; increments after that are lock-free.
///
/// All atomics use `Relaxed` ordering: counters are independent and a
/// snapshot is allowed to be a few increments behind.
#[derive(Debug)]
pub struct MetricsRegistry {
    total_requests: AtomicU64,
    successful_requests: AtomicU64,
    failed_requests: AtomicU64,
    nodes: RwLock<HashMap<String, Arc<NodeStats>>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            total_requests: AtomicU64::new(0),
            successful_requests: AtomicU64::new(0),
            failed_requests: AtomicU64::new(0),
            nodes: RwLock::new(HashMap::new()),
        }
    }

    fn node(&self, node_id: &str) -> Arc<NodeStats> {
        if let Some(stats) = self.nodes.read().get(node_id) {
            return stats.clone();
        }
        self.nodes
            .write()
            .entry(node_id.to_string())
            .or_insert_with(|| Arc::new(NodeStats::new()))
            .clone()
    }

    /// A request was dispatched to `node_id`.
    pub fn record_request(&self, node_id: &str) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let stats = self.node(node_id);
        stats.request_count.fetch_add(1, Ordering::Relaxed);
        stats.last_request_ms.store(now_ms(), Ordering::Relaxed);
    }

    pub fn record_success(&self, node_id: &str, latency_us: u64) {
        self.successful_requests.fetch_add(1, Ordering::Relaxed);
        let stats = self.node(node_id);
        stats.success_count.fetch_add(1, Ordering::Relaxed);
        stats.latencies.record(latency_us);
    }

    pub fn record_failure(&self, node_id: &str, latency_us: u64) {
        self.failed_requests.fetch_add(1, Ordering::Relaxed);
        let stats = self.node(node_id);
        stats.failure_count.fetch_add(1, Ordering::Relaxed);
        stats.latencies.record(latency_us);
    }

    /// Drops the per-node entry. Cluster totals are kept.
    pub fn forget_node(&self, node_id: &str) {
        self.nodes.write().remove(node_id);
    }

    pub fn total_requests(&self) -> u64 {
        self.total_requests.load(Ordering::Relaxed)
    }

    pub fn successful_requests(&self) -> u64 {
        self.successful_requests.load(Ordering::Relaxed)
    }

    pub fn failed_requests(&self) -> u64 {
        self.failed_requests.load(Ordering::Relaxed)
    }

    pub fn node_metrics(&self) -> Vec<NodeMetrics> {
        self.nodes
            .read()
            .iter()
            .map(|(id, stats)| stats.snapshot(id))
            .collect()
    }

    pub fn node_metrics_for(&self, node_id: &str) -> Option<NodeMetrics> {
        self.nodes.read().get(node_id).map(|stats| stats.snapshot(node_id))
    }

    /// Zeroes every counter and forgets all nodes.
    pub fn reset(&self) {
        self.total_requests.store(0, Ordering::Relaxed);
        self.successful_requests.store(0, Ordering::Relaxed);
        self.failed_requests.store(0, Ordering::Relaxed);
        self.nodes.write().clear();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_latency_to_bin() {
        assert_eq!(LatencyHistogram::latency_to_bin(0), 0);
        assert_eq!(LatencyHistogram::latency_to_bin(5), 5);
        assert_eq!(LatencyHistogram::latency_to_bin(10), 11);
        assert_eq!(LatencyHistogram::latency_to_bin(250), 22);
        assert_eq!(LatencyHistogram::latency_to_bin(u64::MAX), NUM_HISTOGRAM_BINS - 1);
    }

    #[test]
    fn test_histogram_empty() {
        let histogram = LatencyHistogram::new();
        assert_eq!(histogram.summary(), (0, 0, 0, 0));
    }

    #[test]
    fn test_histogram_percentiles_are_ordered() {
        let histogram = LatencyHistogram::new();
        for latency in 1..=1000u64 {
            histogram.record(latency * 10);
        }
        let (avg, p50, p95, p99) = histogram.summary();
        assert_eq!(avg, 5005);
        assert!(p50 > 0);
        assert!(p50 <= p95);
        assert!(p95 <= p99);
    }

    #[test]
    fn test_record_counts() {
        let registry = MetricsRegistry::new();
        registry.record_request("node-1");
        registry.record_request("node-1");
        registry.record_request("node-2");
        registry.record_success("node-1", 100);
        registry.record_failure("node-1", 300);
        registry.record_success("node-2", 50);

        assert_eq!(registry.total_requests(), 3);
        assert_eq!(registry.successful_requests(), 2);
        assert_eq!(registry.failed_requests(), 1);

        let node1 = registry.node_metrics_for("node-1").unwrap();
        assert_eq!(node1.request_count, 2);
        assert_eq!(node1.success_count, 1);
        assert_eq!(node1.failure_count, 1);
        assert_eq!(node1.avg_latency_us, 200);
        assert!(node1.last_request_ms > 0);
    }

    #[test]
    fn test_forget_node_keeps_totals() {
        let registry = MetricsRegistry::new();
        registry.record_request("node-1");
        registry.record_success("node-1", 10);
        registry.forget_node("node-1");

        assert!(registry.node_metrics_for("node-1").is_none());
        assert_eq!(registry.total_requests(), 1);
    }

    #[test]
    fn test_reset() {
        let registry = MetricsRegistry::new();
        registry.record_request("node-1");
        registry.reset();
        assert_eq!(registry.total_requests(), 0);
        assert!(registry.node_metrics().is_empty());
    }

    #[test]
    fn test_concurrent_recording() {
        let registry = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                thread::spawn(move || {
                    let node = format!("node-{}", i % 2);
                    for _ in 0..1000 {
                        registry.record_request(&node);
                        registry.record_success(&node, 5);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.total_requests(), 8000);
        assert_eq!(registry.successful_requests(), 8000);
        let per_node: u64 = registry.node_metrics().iter().map(|m| m.request_count).sum();
        assert_eq!(per_node, 8000);
    }
}
