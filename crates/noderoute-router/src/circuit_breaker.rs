//! Per-node circuit breakers.
//!
//! ```text
//! Closed   --(failure_threshold consecutive failures)--> Open
//! Open     --(reset timeout elapsed, checked lazily)-->   HalfOpen
//! HalfOpen --(one success)-->                              Closed
//! HalfOpen --(any failure)-->                              Open
//! ```

use crate::events::{EventBus, RouterEvent};
use noderoute_common::CircuitBreakerConfig;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::Instant;
use tracing::{info, warn};

/// Circuit breaker state for each node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation, requests flow through
    Closed,
    /// Circuit is tripped, the node is skipped
    Open,
    /// Admitting a limited number of trial requests
    HalfOpen,
}

/// Externally visible breaker summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BreakerStatus {
    pub node_id: String,
    pub state: CircuitState,
    pub consecutive_failures: u32,
}

#[derive(Debug, Clone)]
struct Breaker {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    half_open_trials_remaining: u32,
    /// Opens since the breaker last closed; drives reset backoff.
    consecutive_opens: u32,
}

impl Breaker {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            half_open_trials_remaining: 0,
            consecutive_opens: 0,
        }
    }

    fn reset_elapsed(&self, config: &CircuitBreakerConfig, now: Instant) -> bool {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened_at)) => {
                now.duration_since(opened_at) >= config.reset_timeout_for(self.consecutive_opens)
            }
            _ => false,
        }
    }
}

/// One breaker per node, behind a single mutex.
///
/// Every transition is logged and published as
/// [`RouterEvent::BreakerTransition`]. With `enabled = false` every node is
/// available and the recorders do nothing.
#[derive(Debug)]
pub struct CircuitBreakerBank {
    config: CircuitBreakerConfig,
    breakers: Mutex<HashMap<String, Breaker>>,
    events: EventBus,
}

impl CircuitBreakerBank {
    pub fn new(config: CircuitBreakerConfig, events: EventBus) -> Self {
        Self {
            config,
            breakers: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Starts tracking `node_id` with a closed breaker. Existing state is kept.
    pub fn insert(&self, node_id: &str) {
        self.breakers
            .lock()
            .entry(node_id.to_string())
            .or_insert_with(Breaker::new);
    }

    pub fn remove(&self, node_id: &str) {
        self.breakers.lock().remove(node_id);
    }

    /// Whether the node may receive traffic right now.
    ///
    /// An open breaker whose reset timeout has passed moves to half-open here.
    /// Unknown nodes are never available.
    pub fn is_available(&self, node_id: &str) -> bool {
        if !self.config.enabled {
            return true;
        }
        let now = Instant::now();
        let mut breakers = self.breakers.lock();
        let Some(breaker) = breakers.get_mut(node_id) else {
            return false;
        };

        if breaker.reset_elapsed(&self.config, now) {
            self.half_open(node_id, breaker);
        }

        match breaker.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => breaker.half_open_trials_remaining > 0,
        }
    }

    /// A request is being dispatched to the node; consumes a half-open trial.
    pub fn begin_request(&self, node_id: &str) {
        if !self.config.enabled {
            return;
        }
        if let Some(breaker) = self.breakers.lock().get_mut(node_id) {
            if breaker.state == CircuitState::HalfOpen {
                breaker.half_open_trials_remaining =
                    breaker.half_open_trials_remaining.saturating_sub(1);
            }
        }
    }

    pub fn record_success(&self, node_id: &str) {
        if !self.config.enabled {
            return;
        }
        let mut breakers = self.breakers.lock();
        let Some(breaker) = breakers.get_mut(node_id) else {
            return;
        };

        match breaker.state {
            CircuitState::Closed => breaker.consecutive_failures = 0,
            CircuitState::HalfOpen => {
                breaker.state = CircuitState::Closed;
                breaker.consecutive_failures = 0;
                breaker.consecutive_opens = 0;
                breaker.opened_at = None;
                info!(node_id, "circuit closed after successful trial");
                self.publish(node_id, CircuitState::HalfOpen, CircuitState::Closed);
            }
            // Late result from a request dispatched before the circuit opened.
            CircuitState::Open => {}
        }
    }

    pub fn record_failure(&self, node_id: &str) {
        if !self.config.enabled {
            return;
        }
        let mut breakers = self.breakers.lock();
        let Some(breaker) = breakers.get_mut(node_id) else {
            return;
        };

        breaker.consecutive_failures = breaker.consecutive_failures.saturating_add(1);
        match breaker.state {
            CircuitState::Closed if breaker.consecutive_failures >= self.config.failure_threshold => {
                self.open(node_id, breaker, CircuitState::Closed);
            }
            CircuitState::HalfOpen => self.open(node_id, breaker, CircuitState::HalfOpen),
            CircuitState::Closed | CircuitState::Open => {}
        }
    }

    /// Moves every open breaker whose timeout has elapsed to half-open.
    /// Returns the number of transitions.
    pub fn poll_timeouts(&self) -> usize {
        if !self.config.enabled {
            return 0;
        }
        let now = Instant::now();
        let mut transitioned = 0;
        let mut breakers = self.breakers.lock();
        for (node_id, breaker) in breakers.iter_mut() {
            if breaker.reset_elapsed(&self.config, now) {
                self.half_open(node_id, breaker);
                transitioned += 1;
            }
        }
        transitioned
    }

    /// Forces the breaker closed, e.g. after an operator intervention.
    pub fn reset(&self, node_id: &str) -> bool {
        let mut breakers = self.breakers.lock();
        let Some(breaker) = breakers.get_mut(node_id) else {
            return false;
        };
        let previous = breaker.state;
        *breaker = Breaker::new();
        if previous != CircuitState::Closed {
            self.publish(node_id, previous, CircuitState::Closed);
        }
        true
    }

    pub fn state(&self, node_id: &str) -> Option<CircuitState> {
        self.breakers.lock().get(node_id).map(|b| b.state)
    }

    pub fn consecutive_failures(&self, node_id: &str) -> u32 {
        self.breakers
            .lock()
            .get(node_id)
            .map_or(0, |b| b.consecutive_failures)
    }

    /// All breakers, sorted by node id.
    pub fn get_all(&self) -> Vec<BreakerStatus> {
        let mut all: Vec<_> = self
            .breakers
            .lock()
            .iter()
            .map(|(node_id, b)| BreakerStatus {
                node_id: node_id.clone(),
                state: b.state,
                consecutive_failures: b.consecutive_failures,
            })
            .collect();
        all.sort_by(|a, b| a.node_id.cmp(&b.node_id));
        all
    }

    fn open(&self, node_id: &str, breaker: &mut Breaker, from: CircuitState) {
        breaker.state = CircuitState::Open;
        breaker.opened_at = Some(Instant::now());
        breaker.half_open_trials_remaining = 0;
        breaker.consecutive_opens = breaker.consecutive_opens.saturating_add(1);
        warn!(
            node_id,
            failures = breaker.consecutive_failures,
            retry_in_ms = self.config.reset_timeout_for(breaker.consecutive_opens).as_millis() as u64,
            "circuit opened"
        );
        self.publish(node_id, from, CircuitState::Open);
    }

    fn half_open(&self, node_id: &str, breaker: &mut Breaker) {
        breaker.state = CircuitState::HalfOpen;
        breaker.half_open_trials_remaining = self.config.half_open_requests;
        info!(node_id, "circuit half-open, admitting trial requests");
        self.publish(node_id, CircuitState::Open, CircuitState::HalfOpen);
    }

    fn publish(&self, node_id: &str, from: CircuitState, to: CircuitState) {
        self.events.publish(RouterEvent::BreakerTransition {
            node_id: node_id.to_string(),
            from,
            to,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn bank(failure_threshold: u32, half_open_requests: u32) -> CircuitBreakerBank {
        let bank = CircuitBreakerBank::new(
            CircuitBreakerConfig {
                failure_threshold,
                reset_timeout_ms: 1_000,
                half_open_requests,
                ..Default::default()
            },
            EventBus::new(),
        );
        bank.insert("node-1");
        bank.insert("node-2");
        bank
    }

    #[test]
    fn test_new_breaker_is_closed() {
        let bank = bank(3, 1);
        assert_eq!(bank.state("node-1"), Some(CircuitState::Closed));
        assert!(bank.is_available("node-1"));
    }

    #[test]
    fn test_unknown_node_unavailable() {
        let bank = bank(3, 1);
        assert!(!bank.is_available("ghost"));
        assert_eq!(bank.state("ghost"), None);
    }

    #[test]
    fn test_opens_at_threshold() {
        let bank = bank(3, 1);
        bank.record_failure("node-1");
        bank.record_failure("node-1");
        assert!(bank.is_available("node-1"));

        bank.record_failure("node-1");
        assert_eq!(bank.state("node-1"), Some(CircuitState::Open));
        assert!(!bank.is_available("node-1"));
        // other nodes unaffected
        assert!(bank.is_available("node-2"));
    }

    #[test]
    fn test_success_resets_failure_count() {
        let bank = bank(3, 1);
        bank.record_failure("node-1");
        bank.record_failure("node-1");
        bank.record_success("node-1");
        assert_eq!(bank.consecutive_failures("node-1"), 0);
        bank.record_failure("node-1");
        assert_eq!(bank.state("node-1"), Some(CircuitState::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_after_timeout() {
        let bank = bank(1, 1);
        bank.record_failure("node-1");
        assert!(!bank.is_available("node-1"));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!bank.is_available("node-1"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(bank.is_available("node-1"));
        assert_eq!(bank.state("node-1"), Some(CircuitState::HalfOpen));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_success_closes() {
        let bank = bank(1, 1);
        bank.record_failure("node-1");
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(bank.is_available("node-1"));
        bank.begin_request("node-1");
        bank.record_success("node-1");
        assert_eq!(bank.state("node-1"), Some(CircuitState::Closed));
        assert_eq!(bank.consecutive_failures("node-1"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_failure_reopens() {
        let bank = bank(1, 1);
        bank.record_failure("node-1");
        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(bank.is_available("node-1"));

        bank.begin_request("node-1");
        bank.record_failure("node-1");
        assert_eq!(bank.state("node-1"), Some(CircuitState::Open));

        // fresh opened_at: the old timeout no longer applies
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(!bank.is_available("node-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_half_open_trial_budget() {
        let bank = bank(1, 2);
        bank.record_failure("node-1");
        tokio::time::advance(Duration::from_secs(2)).await;

        assert!(bank.is_available("node-1"));
        bank.begin_request("node-1");
        assert!(bank.is_available("node-1"));
        bank.begin_request("node-1");
        assert!(!bank.is_available("node-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_extends_reset_timeout() {
        let bank = CircuitBreakerBank::new(
            CircuitBreakerConfig {
                failure_threshold: 1,
                reset_timeout_ms: 1_000,
                backoff_multiplier: 2.0,
                max_reset_timeout_ms: 10_000,
                ..Default::default()
            },
            EventBus::new(),
        );
        bank.insert("node-1");

        bank.record_failure("node-1");
        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(bank.is_available("node-1"));
        bank.begin_request("node-1");
        bank.record_failure("node-1");

        // second open waits twice as long
        tokio::time::advance(Duration::from_millis(1_500)).await;
        assert!(!bank.is_available("node-1"));
        tokio::time::advance(Duration::from_millis(500)).await;
        assert!(bank.is_available("node-1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_timeouts() {
        let bank = bank(1, 1);
        bank.record_failure("node-1");
        bank.record_failure("node-2");
        assert_eq!(bank.poll_timeouts(), 0);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(bank.poll_timeouts(), 2);
        assert_eq!(bank.state("node-2"), Some(CircuitState::HalfOpen));
    }

    #[test]
    fn test_late_success_keeps_open() {
        let bank = bank(1, 1);
        bank.record_failure("node-1");
        bank.record_success("node-1");
        assert_eq!(bank.state("node-1"), Some(CircuitState::Open));
    }

    #[test]
    fn test_disabled_bank() {
        let bank = CircuitBreakerBank::new(
            CircuitBreakerConfig {
                enabled: false,
                failure_threshold: 1,
                ..Default::default()
            },
            EventBus::new(),
        );
        bank.insert("node-1");
        for _ in 0..10 {
            bank.record_failure("node-1");
        }
        assert!(bank.is_available("node-1"));
        assert!(bank.is_available("never-inserted"));
        assert_eq!(bank.state("node-1"), Some(CircuitState::Closed));
    }

    #[test]
    fn test_reset_and_remove() {
        let bank = bank(1, 1);
        bank.record_failure("node-1");
        assert!(bank.reset("node-1"));
        assert!(bank.is_available("node-1"));

        bank.remove("node-1");
        assert!(!bank.reset("node-1"));
        assert_eq!(bank.get_all().len(), 1);
    }

    #[test]
    fn test_get_all_sorted() {
        let bank = bank(1, 1);
        bank.record_failure("node-2");
        let all = bank.get_all();
        assert_eq!(all[0].node_id, "node-1");
        assert_eq!(all[1].state, CircuitState::Open);
        assert_eq!(all[1].consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transitions_published() {
        let events = EventBus::new();
        let mut rx = events.subscribe();
        let bank = CircuitBreakerBank::new(
            CircuitBreakerConfig {
                failure_threshold: 1,
                reset_timeout_ms: 10,
                ..Default::default()
            },
            events,
        );
        bank.insert("node-1");

        bank.record_failure("node-1");
        tokio::time::advance(Duration::from_millis(10)).await;
        bank.is_available("node-1");
        bank.record_success("node-1");

        let mut seen = Vec::new();
        while let Ok(RouterEvent::BreakerTransition { from, to, .. }) = rx.try_recv() {
            seen.push((from, to));
        }
        assert_eq!(
            seen,
            vec![
                (CircuitState::Closed, CircuitState::Open),
                (CircuitState::Open, CircuitState::HalfOpen),
                (CircuitState::HalfOpen, CircuitState::Closed),
            ]
        );
    }
}
