// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Crate-wide error taxonomy.
//!
//! Component-local errors (in `fleet-adapters`, `fleet-daemon`) convert into
//! this one at the boundary via `#[from]`/manual `From` impls, matching the
//! teacher's layered `thiserror` error types that converge on one crate-root
//! error before being logged or turned into a process exit code.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum FleetError {
    /// ContainerEngine/Provider timeouts, 5xx. Logged; retried next tick.
    #[error("transient error: {0}")]
    Transient(String),

    /// Provider 401/403 on token use. Triggers a TokenBroker refresh.
    #[error("auth expired: {0}")]
    AuthExpired(String),

    /// Deregistering something already gone. Treated as success by callers.
    #[error("not found: {0}")]
    NotFound(String),

    /// Container name collision. Recovered by reaping the existing container.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Provider/ContainerEngine rejects with a limit. Surfaced as `RepoDegraded`.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Cannot reach dependencies at startup. Process exits with code 1.
    #[error("fatal init error: {0}")]
    FatalInit(String),

    /// Startup validation failed. Process exits with code 2.
    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),
}

impl FleetError {
    /// Transient failures are the only kind that should trigger a same-tick
    /// retry; everything else is either swallowed (`NotFound`) or needs an
    /// explicit recovery action.
    pub fn is_transient(&self) -> bool {
        matches!(self, FleetError::Transient(_))
    }

    /// `NotFound` is swallowed and treated as success by callers that expect
    /// idempotent deregistration/cleanup.
    pub fn is_benign_not_found(&self) -> bool {
        matches!(self, FleetError::NotFound(_))
    }

    /// The only two kinds that terminate the process, with their exit codes.
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            FleetError::FatalInit(_) => Some(1),
            FleetError::ConfigInvalid(_) => Some(2),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_fatal_init_and_config_invalid_terminate_the_process() {
        assert_eq!(FleetError::FatalInit("x".into()).exit_code(), Some(1));
        assert_eq!(FleetError::ConfigInvalid("x".into()).exit_code(), Some(2));
        assert_eq!(FleetError::Transient("x".into()).exit_code(), None);
        assert_eq!(FleetError::NotFound("x".into()).exit_code(), None);
    }

    #[test]
    fn not_found_is_benign() {
        assert!(FleetError::NotFound("gone".into()).is_benign_not_found());
        assert!(!FleetError::Conflict("dup".into()).is_benign_not_found());
    }
}
