// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Component health tracking, used by the LifecycleReconciler's sub-loops
//! and (generically) by any collaborator that wants circuit-breaker
//! semantics around a flaky external dependency.

use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Circuit is `Open` only while `now < next_attempt_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct ComponentHealth {
    pub name: String,
    pub status: HealthStatus,
    pub consecutive_failures: u32,
    pub last_check_at: DateTime<Utc>,
    pub circuit_state: CircuitState,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

impl ComponentHealth {
    pub fn new(name: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            status: HealthStatus::Unknown,
            consecutive_failures: 0,
            last_check_at: now,
            circuit_state: CircuitState::Closed,
            next_attempt_at: None,
        }
    }

    /// Recompute `circuit_state` from `next_attempt_at` relative to `now`.
    /// Keeps the `Open ⇔ now < next_attempt_at` invariant true on every read.
    pub fn refresh_circuit(&mut self, now: DateTime<Utc>) {
        if self.circuit_state == CircuitState::Open {
            match self.next_attempt_at {
                Some(t) if now >= t => self.circuit_state = CircuitState::HalfOpen,
                _ => {}
            }
        }
    }

    pub fn record_success(&mut self, now: DateTime<Utc>) {
        self.consecutive_failures = 0;
        self.status = HealthStatus::Healthy;
        self.circuit_state = CircuitState::Closed;
        self.next_attempt_at = None;
        self.last_check_at = now;
    }

    pub fn record_failure(&mut self, now: DateTime<Utc>, open_for: chrono::Duration) {
        self.consecutive_failures += 1;
        self.last_check_at = now;
        self.status =
            if self.consecutive_failures >= 3 { HealthStatus::Unhealthy } else { HealthStatus::Degraded };
        self.circuit_state = CircuitState::Open;
        self.next_attempt_at = Some(now + open_for);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn circuit_reopens_half_open_after_next_attempt_at() {
        let now = Utc::now();
        let mut health = ComponentHealth::new("provider", now);
        health.record_failure(now, chrono::Duration::seconds(30));
        assert_eq!(health.circuit_state, CircuitState::Open);

        let mut still_open = health.clone();
        still_open.refresh_circuit(now + chrono::Duration::seconds(29));
        assert_eq!(still_open.circuit_state, CircuitState::Open);

        health.refresh_circuit(now + chrono::Duration::seconds(31));
        assert_eq!(health.circuit_state, CircuitState::HalfOpen);
    }
}
