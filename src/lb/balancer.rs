use std::sync::atomic::{AtomicUsize, Ordering};

use rand::Rng;

use crate::pool::record::{ConnectionId, ConnectionState};

/// Selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Weight candidates by latency, error rate, and health state
    WeightedRandom,
    /// Simple rotation through the candidate list
    RoundRobin,
}

/// Floor applied to the latency and error-rate factors
const FACTOR_FLOOR: f64 = 0.1;

/// Metric view of one selectable connection
///
/// Built by the pool manager from the records that are idle and
/// admissible at selection time.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub id: ConnectionId,
    pub state: ConnectionState,
    pub avg_response_time: Option<f64>,
    pub error_rate: f64,
}

impl Candidate {
    /// Selection weight for this candidate
    ///
    /// Unsampled connections score as zero latency, which biases the
    /// draw toward fresh connections until they accumulate an average.
    fn weight(&self) -> f64 {
        let avg_ms = self.avg_response_time.unwrap_or(0.0);
        let latency_factor = (1.0 / (avg_ms + 0.1)).max(FACTOR_FLOOR);
        let error_factor = (1.0 - self.error_rate).max(FACTOR_FLOOR);
        let state_factor = match self.state {
            ConnectionState::Healthy => 1.0,
            ConnectionState::Degraded => 0.7,
            ConnectionState::Recovering => 0.5,
            ConnectionState::Failed => 0.0,
        };
        latency_factor * error_factor * state_factor
    }
}

/// Distributes acquires across pooled connections
pub struct LoadBalancer {
    /// Selected strategy
    strategy: Strategy,
    /// Rotation cursor for round-robin
    counter: AtomicUsize,
}

impl LoadBalancer {
    /// Create a new load balancer with the given strategy
    pub fn new(strategy: Strategy) -> Self {
        Self {
            strategy,
            counter: AtomicUsize::new(0),
        }
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Select a connection from the candidate list
    ///
    /// Returns `None` only when the list is empty. `priority_hint` is
    /// reserved for caller-supplied routing preferences; the current
    /// strategies ignore it.
    pub fn select(&self, candidates: &[Candidate], _priority_hint: Option<u8>) -> Option<ConnectionId> {
        if candidates.is_empty() {
            return None;
        }

        match self.strategy {
            Strategy::WeightedRandom => self.select_weighted(candidates),
            Strategy::RoundRobin => self.select_round_robin(candidates),
        }
    }

    /// Weighted random draw proportional to candidate weight
    fn select_weighted(&self, candidates: &[Candidate]) -> Option<ConnectionId> {
        let weights: Vec<f64> = candidates.iter().map(Candidate::weight).collect();
        let total: f64 = weights.iter().sum();

        if total <= 0.0 {
            // Degenerate weights, fall back to the first candidate
            return Some(candidates[0].id);
        }

        let mut rng = rand::thread_rng();
        let mut draw = rng.gen_range(0.0..total);
        for (candidate, weight) in candidates.iter().zip(&weights) {
            if draw < *weight {
                return Some(candidate.id);
            }
            draw -= weight;
        }

        // Floating-point remainder landed past the last bucket
        candidates.last().map(|c| c.id)
    }

    /// Rotation through the candidate list
    fn select_round_robin(&self, candidates: &[Candidate]) -> Option<ConnectionId> {
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Some(candidates[index].id)
    }
}

impl Clone for LoadBalancer {
    fn clone(&self) -> Self {
        Self {
            strategy: self.strategy,
            counter: AtomicUsize::new(self.counter.load(Ordering::Relaxed)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: ConnectionId, state: ConnectionState, avg_ms: f64, error_rate: f64) -> Candidate {
        Candidate {
            id,
            state,
            avg_response_time: Some(avg_ms),
            error_rate,
        }
    }

    #[test]
    fn test_empty_candidates() {
        let lb = LoadBalancer::new(Strategy::WeightedRandom);
        assert_eq!(lb.select(&[], None), None);
    }

    #[test]
    fn test_round_robin_rotation() {
        let lb = LoadBalancer::new(Strategy::RoundRobin);
        let candidates = vec![
            candidate(1, ConnectionState::Healthy, 10.0, 0.0),
            candidate(2, ConnectionState::Healthy, 10.0, 0.0),
            candidate(3, ConnectionState::Healthy, 10.0, 0.0),
        ];

        assert_eq!(lb.select(&candidates, None), Some(1));
        assert_eq!(lb.select(&candidates, None), Some(2));
        assert_eq!(lb.select(&candidates, None), Some(3));
        assert_eq!(lb.select(&candidates, None), Some(1));
    }

    #[test]
    fn test_state_factor_values() {
        let healthy = candidate(1, ConnectionState::Healthy, 0.9, 0.0);
        let degraded = candidate(2, ConnectionState::Degraded, 0.9, 0.0);
        let recovering = candidate(3, ConnectionState::Recovering, 0.9, 0.0);

        assert!((healthy.weight() - 1.0).abs() < 1e-9);
        assert!((degraded.weight() - 0.7).abs() < 1e-9);
        assert!((recovering.weight() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_factor_floors() {
        // Slow and failing, both factors hit the floor
        let worst = candidate(1, ConnectionState::Healthy, 10_000.0, 1.0);
        assert!((worst.weight() - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_bias_toward_fast_candidate() {
        let lb = LoadBalancer::new(Strategy::WeightedRandom);
        let candidates = vec![
            candidate(1, ConnectionState::Healthy, 10.0, 0.0),
            candidate(2, ConnectionState::Healthy, 1000.0, 0.9),
        ];

        let mut fast = 0;
        for _ in 0..1000 {
            if lb.select(&candidates, None) == Some(1) {
                fast += 1;
            }
        }

        // Weight ratio is roughly 99:0.1, a draw of the slow candidate
        // should be rare
        assert!(fast > 900, "fast candidate selected only {fast} times");
    }

    #[test]
    fn test_zero_weight_falls_back_to_first() {
        let lb = LoadBalancer::new(Strategy::WeightedRandom);
        let candidates = vec![
            candidate(7, ConnectionState::Failed, 10.0, 0.0),
            candidate(8, ConnectionState::Failed, 10.0, 0.0),
        ];

        assert_eq!(lb.select(&candidates, None), Some(7));
    }

    #[test]
    fn test_single_candidate() {
        let lb = LoadBalancer::new(Strategy::WeightedRandom);
        let candidates = vec![candidate(42, ConnectionState::Degraded, 50.0, 0.3)];

        for _ in 0..10 {
            assert_eq!(lb.select(&candidates, None), Some(42));
        }
    }
}
