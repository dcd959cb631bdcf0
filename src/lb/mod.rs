//! Load balancing across pooled connections
//!
//! The pool manager asks the [`LoadBalancer`] to pick one connection out
//! of the currently idle, admissible set. Each call gets a fresh slice of
//! [`Candidate`] metric views, so selection always sees up-to-date
//! latency and error figures.
//!
//! # Strategies
//!
//! - **Weighted random** (default): weight each candidate by
//!   `latency_factor * error_factor * state_factor` and draw
//!   proportionally. Fast, reliable, healthy connections absorb most of
//!   the traffic while degraded ones still see a trickle.
//! - **Round-robin**: simple rotation, useful when the endpoint is
//!   uniform and metrics-driven bias is unwanted.
//!
//! Selection is lock-free; the only shared state is the round-robin
//! cursor (an `AtomicUsize`).

pub mod balancer;

pub use balancer::{Candidate, LoadBalancer, Strategy};
