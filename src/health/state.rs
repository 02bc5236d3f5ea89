//! Endpoint health state machine.
//!
//! # States
//! - Unknown: never checked, still receives traffic
//! - Healthy: receives traffic
//! - Unhealthy: skipped by the balancer, kept in the resolved set
//!
//! # State Transitions
//! ```text
//! Unknown/Healthy → Unhealthy: consecutive failures >= unhealthy_threshold
//! Unknown/Unhealthy → Healthy: consecutive successes >= healthy_threshold
//! ```
//!
//! An unhealthy endpoint becomes half-open once `cooldown` has passed since
//! its last failure: it is offered to the balancer again so a real call can
//! bring it back without an active monitor. Another failure re-arms the cooldown.

use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::time::Duration;

use tokio::time::Instant;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    Unknown = 0,
    Healthy = 1,
    Unhealthy = 2,
}

impl From<u8> for HealthState {
    fn from(val: u8) -> Self {
        match val {
            1 => HealthState::Healthy,
            2 => HealthState::Unhealthy,
            _ => HealthState::Unknown,
        }
    }
}

/// Hysteresis thresholds for state transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub healthy: usize,
    pub unhealthy: usize,
    /// How long an unhealthy endpoint sits out before it is tried again.
    pub cooldown: Duration,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            healthy: 1,
            unhealthy: 3,
            cooldown: Duration::from_secs(5),
        }
    }
}

/// Lock-free health tracker shared by the balancer, the passive observer
/// and the active monitor.
#[derive(Debug)]
pub struct HealthTracker {
    state: AtomicU8,
    consecutive_failures: AtomicUsize,
    consecutive_successes: AtomicUsize,
    /// Millis since `created` of the most recent failure.
    last_failure_ms: AtomicU64,
    created: Instant,
    thresholds: Thresholds,
}

impl HealthTracker {
    pub fn new(thresholds: Thresholds) -> Self {
        Self {
            state: AtomicU8::new(HealthState::Unknown as u8),
            consecutive_failures: AtomicUsize::new(0),
            consecutive_successes: AtomicUsize::new(0),
            last_failure_ms: AtomicU64::new(0),
            created: Instant::now(),
            thresholds,
        }
    }

    pub fn state(&self) -> HealthState {
        HealthState::from(self.state.load(Ordering::Relaxed))
    }

    /// Healthy, not yet known, or unhealthy with the cooldown elapsed.
    pub fn is_available(&self) -> bool {
        self.state() != HealthState::Unhealthy || self.is_half_open()
    }

    pub fn is_half_open(&self) -> bool {
        if self.state() != HealthState::Unhealthy {
            return false;
        }
        let last = Duration::from_millis(self.last_failure_ms.load(Ordering::Relaxed));
        self.created.elapsed().saturating_sub(last) >= self.thresholds.cooldown
    }

    /// Record a success. Returns the new state if this call changed it.
    pub fn record_success(&self) -> Option<HealthState> {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        if self.state() == HealthState::Healthy {
            return None;
        }

        let successes = self.consecutive_successes.fetch_add(1, Ordering::Relaxed) + 1;
        if successes >= self.thresholds.healthy {
            self.consecutive_successes.store(0, Ordering::Relaxed);
            self.transition(HealthState::Healthy)
        } else {
            None
        }
    }

    /// Record a failure. Returns the new state if this call changed it.
    pub fn record_failure(&self) -> Option<HealthState> {
        self.consecutive_successes.store(0, Ordering::Relaxed);
        let now_ms = u64::try_from(self.created.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_failure_ms.store(now_ms, Ordering::Relaxed);
        if self.state() == HealthState::Unhealthy {
            return None;
        }

        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures >= self.thresholds.unhealthy {
            self.consecutive_failures.store(0, Ordering::Relaxed);
            self.transition(HealthState::Unhealthy)
        } else {
            None
        }
    }

    fn transition(&self, to: HealthState) -> Option<HealthState> {
        let from = self.state.swap(to as u8, Ordering::Relaxed);
        (from != to as u8).then_some(to)
    }
}
