//! noderoute metrics
//!
//! Request accounting for the router:
//!
//! - [`MetricsRegistry`]: lock-free cluster and per-node counters with
//!   logarithmic latency histograms (P50/P95/P99)
//! - [`MetricsAggregator`]: the router-facing tally; tracks in-flight requests
//!   and turns counters into a [`ClusterMetrics`] snapshot with derived rates
//!
//! Node membership is not tracked here. Callers pass a [`Topology`] when they
//! take a snapshot so node counts always reflect the live cluster.

mod aggregator;
mod registry;
mod snapshot;

pub use aggregator::MetricsAggregator;
pub use registry::MetricsRegistry;
pub use snapshot::{ClusterMetrics, NodeMetrics, Topology};
