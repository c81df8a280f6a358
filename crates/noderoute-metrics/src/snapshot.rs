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

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Live view of cluster membership, supplied by the router at snapshot time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
}

/// Request statistics for a single node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeMetrics {
    pub node_id: String,
    pub request_count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub avg_latency_us: u64,
    pub p50_latency_us: u64,
    pub p95_latency_us: u64,
    pub p99_latency_us: u64,
    pub last_request_ms: u64,
}

impl NodeMetrics {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self {
            node_id: node_id.into(),
            ..Default::default()
        }
    }
}

/// Cluster-wide metrics snapshot
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClusterMetrics {
    pub total_nodes: usize,
    pub healthy_nodes: usize,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Requests dispatched but not yet completed
    pub in_flight: u64,
    pub success_rate: f64,
    pub failure_rate: f64,
    pub uptime_ms: u64,
    pub nodes: BTreeMap<String, NodeMetrics>,
}

impl ClusterMetrics {
    pub fn completed_requests(&self) -> u64 {
        self.successful_requests + self.failed_requests
    }
}

/// Fraction of `part` in `whole`, 0.0 when nothing has completed.
pub(crate) fn ratio(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ratio() {
        assert_eq!(ratio(0, 0), 0.0);
        assert_eq!(ratio(1, 4), 0.25);
    }

    #[test]
    fn test_snapshot_serializes() {
        let mut metrics = ClusterMetrics {
            total_nodes: 2,
            total_requests: 3,
            successful_requests: 2,
            failed_requests: 1,
            ..Default::default()
        };
        metrics.nodes.insert("node-1".to_string(), NodeMetrics::new("node-1"));

        let value = serde_json::to_value(&metrics).unwrap();
        assert_eq!(value["total_requests"], 3);
        assert_eq!(value["nodes"]["node-1"]["node_id"], "node-1");
        assert_eq!(metrics.completed_requests(), 3);
    }
}
