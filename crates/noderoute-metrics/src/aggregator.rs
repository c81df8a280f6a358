// Copyright 2025 noderoute Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::registry::MetricsRegistry;
use crate::snapshot::{ratio, ClusterMetrics, Topology};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Running request tally for a routed cluster.
///
/// The aggregator only counts. Node totals are not stored here; the router
/// passes a live [`Topology`] to [`snapshot`](Self::snapshot) so the numbers
/// always match current membership.
///
/// # Example
///
/// ```rust
/// use noderoute_metrics::{MetricsAggregator, Topology};
/// use std::time::Instant;
///
/// let metrics = MetricsAggregator::new();
/// let start = Instant::now();
/// metrics.record_request("node-1");
/// metrics.record_success("node-1", start);
///
/// let snapshot = metrics.snapshot(Topology { total_nodes: 1, healthy_nodes: 1 });
/// assert_eq!(snapshot.total_requests, 1);
/// assert_eq!(snapshot.success_rate, 1.0);
/// ```
#[derive(Debug)]
pub struct MetricsAggregator {
    registry: Arc<MetricsRegistry>,
    in_flight: AtomicU64,
    started_at: Instant,
}

impl MetricsAggregator {
    pub fn new() -> Self {
        Self::with_registry(Arc::new(MetricsRegistry::new()))
    }

    /// Shares an existing registry, e.g. with an exporter.
    pub fn with_registry(registry: Arc<MetricsRegistry>) -> Self {
        Self {
            registry,
            in_flight: AtomicU64::new(0),
            started_at: Instant::now(),
        }
    }

    pub fn registry(&self) -> &Arc<MetricsRegistry> {
        &self.registry
    }

    pub fn record_request(&self, node_id: &str) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        self.registry.record_request(node_id);
    }

    pub fn record_success(&self, node_id: &str, start_time: Instant) {
        self.finish();
        self.registry.record_success(node_id, elapsed_us(start_time));
    }

    pub fn record_failure(&self, node_id: &str, start_time: Instant) {
        self.finish();
        self.registry.record_failure(node_id, elapsed_us(start_time));
    }

    fn finish(&self) {
        // saturating: a reset between dispatch and completion must not wrap
        let _ = self
            .in_flight
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| Some(n.saturating_sub(1)));
    }

    pub fn forget_node(&self, node_id: &str) {
        self.registry.forget_node(node_id);
    }

    pub fn uptime_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn snapshot(&self, topology: Topology) -> ClusterMetrics {
        let total_requests = self.registry.total_requests();
        let successful_requests = self.registry.successful_requests();
        let failed_requests = self.registry.failed_requests();
        let completed = successful_requests + failed_requests;

        ClusterMetrics {
            total_nodes: topology.total_nodes,
            healthy_nodes: topology.healthy_nodes,
            total_requests,
            successful_requests,
            failed_requests,
            in_flight: self.in_flight.load(Ordering::Relaxed),
            success_rate: ratio(successful_requests, completed),
            failure_rate: ratio(failed_requests, completed),
            uptime_ms: self.uptime_ms(),
            nodes: self
                .registry
                .node_metrics()
                .into_iter()
                .map(|m| (m.node_id.clone(), m))
                .collect(),
        }
    }
}

impl Default for MetricsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

fn elapsed_us(start_time: Instant) -> u64 {
    start_time.elapsed().as_micros() as u64
}
