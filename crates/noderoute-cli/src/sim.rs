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

//! Simulated cluster for the `simulate` command.
//!
//! Nodes are not contacted; [`SimulatedExecutor`] sleeps for a random latency
//! and fails at a configurable rate, so routing, circuit breaking and metrics
//! can be observed against a config file without a real cluster.

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use noderoute_common::{Result, RouterError, ServiceNode};
use noderoute_router::{HealthProbe, NodeExecutor, RouteOptions, Router};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

/// Executor that fakes node calls.
pub struct SimulatedExecutor {
    failure_rate: f64,
    latency_us: Range<u64>,
    down: HashSet<String>,
    rng: Mutex<StdRng>,
}

impl SimulatedExecutor {
    pub fn new(failure_rate: f64, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            failure_rate: failure_rate.clamp(0.0, 1.0),
            latency_us: 200..2_000,
            down: HashSet::new(),
            rng: Mutex::new(rng),
        }
    }

    /// Nodes that fail every call.
    pub fn with_down_nodes(mut self, nodes: impl IntoIterator<Item = String>) -> Self {
        self.down = nodes.into_iter().collect();
        self
    }

    pub fn with_latency(mut self, latency_us: Range<u64>) -> Self {
        if !latency_us.is_empty() {
            self.latency_us = latency_us;
        }
        self
    }

    pub fn down_nodes(&self) -> &HashSet<String> {
        &self.down
    }
}

#[async_trait]
impl NodeExecutor for SimulatedExecutor {
    async fn execute(&self, node: &ServiceNode, operation: &str, payload: &Value) -> Result<Value> {
        let (latency, fail) = {
            let mut rng = self.rng.lock();
            (
                rng.gen_range(self.latency_us.clone()),
                rng.gen_bool(self.failure_rate),
            )
        };
        tokio::time::sleep(Duration::from_micros(latency)).await;

        if fail || self.down.contains(&node.id) {
            return Err(RouterError::execution(node.id.clone(), "simulated failure"));
        }
        Ok(json!({
            "node": node.id,
            "operation": operation,
            "payload": payload,
            "latency_us": latency,
        }))
    }
}

/// Probe that reports the executor's down nodes as unreachable.
pub struct SimulatedProbe {
    down: HashSet<String>,
}

impl SimulatedProbe {
    pub fn new(down: HashSet<String>) -> Self {
        Self { down }
    }
}

#[async_trait]
impl HealthProbe for SimulatedProbe {
    async fn probe(&self, node: &ServiceNode) -> Result<()> {
        if self.down.contains(&node.id) {
            return Err(RouterError::execution(node.id.clone(), "unreachable"));
        }
        Ok(())
    }
}

/// What to send through the router.
#[derive(Debug, Clone)]
pub struct Workload {
    pub requests: usize,
    pub operation: String,
    pub session_id: Option<String>,
    pub concurrency: usize,
    pub timeout: Option<Duration>,
}

/// Outcome counts of a workload run.
#[derive(Debug, Default, Clone, Serialize, PartialEq, Eq)]
pub struct WorkloadSummary {
    pub requests: usize,
    pub succeeded: usize,
    /// Executed on a node but failed
    pub failed: usize,
    /// Refused before reaching any node
    pub rejected: usize,
    /// Selected node id -> successful responses
    pub responses_by_node: BTreeMap<String, usize>,
    pub errors: BTreeMap<String, usize>,
}

/// Sends the workload through `router`, `concurrency` calls at a time.
pub async fn run_workload(router: Arc<Router>, workload: &Workload) -> WorkloadSummary {
    let options = RouteOptions {
        session_id: workload.session_id.clone(),
        timeout: workload.timeout,
    };

    let results: Vec<Result<Value>> = stream::iter(0..workload.requests)
        .map(|i| {
            let router = Arc::clone(&router);
            let options = options.clone();
            let operation = workload.operation.clone();
            async move { router.route(&operation, json!({ "seq": i }), options).await }
        })
        .buffer_unordered(workload.concurrency.max(1))
        .collect()
        .await;

    let mut summary = WorkloadSummary {
        requests: workload.requests,
        ..WorkloadSummary::default()
    };
    for result in results {
        match result {
            Ok(response) => {
                summary.succeeded += 1;
                if let Some(node) = response.get("node").and_then(Value::as_str) {
                    *summary.responses_by_node.entry(node.to_string()).or_default() += 1;
                }
            }
            Err(e) => {
                if e.is_selection_failure() {
                    summary.rejected += 1;
                } else {
                    summary.failed += 1;
                }
                *summary.errors.entry(error_kind(&e).to_string()).or_default() += 1;
            }
        }
    }
    summary
}

fn error_kind(error: &RouterError) -> &'static str {
    match error {
        RouterError::NoAvailableNode { .. } => "no_available_node",
        RouterError::ClusterUnavailable => "cluster_unavailable",
        RouterError::MissingSessionId => "missing_session_id",
        RouterError::Timeout(_) => "timeout",
        RouterError::Execution { .. } => "execution",
        RouterError::NotFound(_) => "not_found",
        RouterError::Discovery(_) => "discovery",
        RouterError::State(_) => "state",
        RouterError::Config(_) => "config",
        RouterError::JsonSerialization(_) => "json",
    }
}
