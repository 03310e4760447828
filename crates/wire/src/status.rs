// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Status snapshot shapes returned by `ScalerSupervisor::status()`.
//!
//! Deliberately plain data: no transport, no persistence. Never carries a
//! token value, only `token_expires_at`.

use chrono::{DateTime, Utc};
use fleet_core::{Health, WorkerKind};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStatus {
    pub name: String,
    pub kind: WorkerKind,
    pub health: Health,
    pub busy: bool,
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoStatus {
    pub repo_id: String,
    pub dedicated: Option<WorkerStatus>,
    pub dynamic: Vec<WorkerStatus>,
    pub last_scale_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub leader_holder_id: Option<String>,
    pub leader_term: u64,
    pub is_leader: bool,
    pub repos: Vec<RepoStatus>,
    pub generated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_snapshot_serializes_without_token_value() {
        let snapshot = StatusSnapshot {
            leader_holder_id: Some("instance-a".to_string()),
            leader_term: 7,
            is_leader: true,
            repos: vec![RepoStatus {
                repo_id: "acme/widgets".to_string(),
                dedicated: Some(WorkerStatus {
                    name: "orchestrator-dedicated-acme-widgets".to_string(),
                    kind: WorkerKind::Dedicated,
                    health: Health::Healthy,
                    busy: true,
                    token_expires_at: Some(Utc::now()),
                }),
                dynamic: vec![],
                last_scale_at: None,
            }],
            generated_at: Utc::now(),
        };
        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("\"value\""));
    }
}
