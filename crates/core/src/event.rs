// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Structured events emitted by the core's components.
//!
//! Replaces the ad-hoc stringly-typed event-emitter pattern with a single
//! tagged enum and typed subscriber channels (`tokio::sync::broadcast` in
//! `fleet-daemon`), so ordering per source is preserved and there is no
//! string-matching coupling between emitter and subscriber.

use crate::ids::{HolderId, RepoId, WorkerName};
use crate::worker::WorkerKind;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "worker:created")]
    WorkerCreated { repo_id: RepoId, name: WorkerName, kind: WorkerKind },

    #[serde(rename = "worker:removed")]
    WorkerRemoved { repo_id: RepoId, name: WorkerName },

    #[serde(rename = "worker:unhealthy")]
    WorkerUnhealthy { repo_id: RepoId, name: WorkerName, reason: String },

    #[serde(rename = "worker:high_cpu")]
    WorkerHighCpu { repo_id: RepoId, name: WorkerName, cpu_percent: f64 },

    #[serde(rename = "worker:high_memory")]
    WorkerHighMemory { repo_id: RepoId, name: WorkerName, memory_percent: f64 },

    #[serde(rename = "worker:reregistered")]
    WorkerReregistered { repo_id: RepoId, old_name: WorkerName, new_name: WorkerName },

    #[serde(rename = "worker:restarted")]
    WorkerRestarted { repo_id: RepoId, name: WorkerName },

    #[serde(rename = "scale:up")]
    ScaleUp { repo_id: RepoId, name: WorkerName },

    #[serde(rename = "scale:down")]
    ScaleDown { repo_id: RepoId, name: WorkerName },

    #[serde(rename = "repo:degraded")]
    RepoDegraded { repo_id: RepoId, reason: String },

    /// `expires_at` only — the token value itself is never carried on an event.
    #[serde(rename = "token:refreshed")]
    TokenRefreshed { repo_id: RepoId, expires_at: DateTime<Utc> },

    #[serde(rename = "token:refresh_failed")]
    TokenRefreshFailed { repo_id: RepoId },

    #[serde(rename = "leader:changed")]
    LeaderChanged { holder_id: HolderId, term: u64 },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::WorkerCreated { .. } => "worker:created",
            Event::WorkerRemoved { .. } => "worker:removed",
            Event::WorkerUnhealthy { .. } => "worker:unhealthy",
            Event::WorkerHighCpu { .. } => "worker:high_cpu",
            Event::WorkerHighMemory { .. } => "worker:high_memory",
            Event::WorkerReregistered { .. } => "worker:reregistered",
            Event::WorkerRestarted { .. } => "worker:restarted",
            Event::ScaleUp { .. } => "scale:up",
            Event::ScaleDown { .. } => "scale:down",
            Event::RepoDegraded { .. } => "repo:degraded",
            Event::TokenRefreshed { .. } => "token:refreshed",
            Event::TokenRefreshFailed { .. } => "token:refresh_failed",
            Event::LeaderChanged { .. } => "leader:changed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_refreshed_serializes_without_value_field() {
        let event = Event::TokenRefreshed {
            repo_id: RepoId::new("acme/widgets"),
            expires_at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("value"));
        assert!(json.contains("\"type\":\"token:refreshed\""));
    }
}
