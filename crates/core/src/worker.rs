// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Worker entity.

use crate::ids::{ContainerId, ProviderWorkerId, RepoId, WorkerName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;

/// Whether a worker is the one always-on worker for a repository, or an
/// ephemeral worker spawned to absorb saturation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerKind {
    Dedicated,
    Dynamic,
}

impl WorkerKind {
    /// `kind=Dedicated ⇒ ephemeral=false`; `kind=Dynamic ⇒ ephemeral=true`.
    pub fn is_ephemeral(self) -> bool {
        matches!(self, WorkerKind::Dynamic)
    }

    pub fn label_value(self) -> &'static str {
        match self {
            WorkerKind::Dedicated => "dedicated",
            WorkerKind::Dynamic => "dynamic",
        }
    }
}

/// Locally-observed container health for a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Health {
    Healthy,
    Unhealthy,
    Unknown,
}

/// A worker container registered (or registering) with the Provider.
#[derive(Debug, Clone)]
pub struct Worker {
    pub name: WorkerName,
    pub kind: WorkerKind,
    pub repo_id: RepoId,
    pub container_id: ContainerId,
    pub created_at: Instant,
    pub last_activity_at: Instant,
    pub health: Health,
    pub busy: bool,
    pub provider_id: Option<ProviderWorkerId>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl Worker {
    pub fn new(
        name: WorkerName,
        kind: WorkerKind,
        repo_id: RepoId,
        container_id: ContainerId,
        now: Instant,
    ) -> Self {
        Self {
            name,
            kind,
            repo_id,
            container_id,
            created_at: now,
            last_activity_at: now,
            health: Health::Unknown,
            busy: false,
            provider_id: None,
            token_expires_at: None,
        }
    }

    /// A worker counts toward saturation / idle-cleanup only while it is
    /// `Healthy` and has a running container.
    pub fn is_available(&self) -> bool {
        self.health == Health::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedicated_is_never_ephemeral() {
        assert!(!WorkerKind::Dedicated.is_ephemeral());
        assert!(WorkerKind::Dynamic.is_ephemeral());
    }
}
