// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ContainerEngine: the local container runtime that creates, starts, and
//! observes worker containers.

mod kubernetes;

#[cfg(any(test, feature = "test-support"))]
mod fake;

pub use kubernetes::KubernetesEngine;

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeContainerEngine;

use crate::error::ContainerEngineError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fleet_core::{ContainerId, RepoId, WorkerKind, WorkerName};
use std::collections::HashMap;
use std::time::Duration;

/// Stable labels attached to every worker container.
#[derive(Debug, Clone)]
pub struct ContainerLabels {
    pub kind: WorkerKind,
    pub repo_id: RepoId,
    pub created_at: DateTime<Utc>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

impl ContainerLabels {
    /// Renders as the `orchestrator.*` label map.
    pub fn to_map(&self) -> HashMap<String, String> {
        let mut map = HashMap::new();
        map.insert("orchestrator.kind".to_string(), self.kind.label_value().to_string());
        map.insert("orchestrator.repo".to_string(), self.repo_id.to_string());
        map.insert("orchestrator.createdAt".to_string(), self.created_at.to_rfc3339());
        if let Some(exp) = self.token_expires_at {
            map.insert("orchestrator.tokenExpiresAt".to_string(), exp.to_rfc3339());
        }
        map
    }
}

/// Deterministic worker name: `orchestrator-{kind}-{repoSlug}[-{timestamp}]`.
pub fn worker_name(kind: WorkerKind, repo_slug: &str, timestamp: Option<i64>) -> WorkerName {
    match (kind, timestamp) {
        (WorkerKind::Dedicated, None) => {
            WorkerName::new(format!("orchestrator-dedicated-{repo_slug}"))
        }
        (_, Some(ts)) => WorkerName::new(format!(
            "orchestrator-{}-{repo_slug}-{ts}",
            kind.label_value()
        )),
        (WorkerKind::Dynamic, None) => {
            WorkerName::new(format!("orchestrator-dynamic-{repo_slug}"))
        }
    }
}

/// A container to be created, not yet started.
#[derive(Debug, Clone)]
pub struct ContainerSpec {
    pub name: WorkerName,
    pub image: String,
    pub registration_token: String,
    pub labels: ContainerLabels,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone)]
pub struct ContainerInspection {
    pub running: bool,
    pub restart_count: u32,
    pub created_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: ContainerId,
    pub name: WorkerName,
    pub labels: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy)]
pub struct ContainerStats {
    pub cpu_usage_percent: f64,
    pub memory_usage_percent: f64,
}

/// The local container runtime consumed by `LifecycleReconciler` and
/// `PerRepoController`. Implementations must be safe for concurrent use.
#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn create_container(
        &self,
        spec: ContainerSpec,
    ) -> Result<ContainerId, ContainerEngineError>;

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerEngineError>;

    async fn stop_container(
        &self,
        id: &ContainerId,
        grace: Duration,
    ) -> Result<(), ContainerEngineError>;

    async fn remove_container(&self, id: &ContainerId) -> Result<(), ContainerEngineError>;

    async fn inspect_container(
        &self,
        id: &ContainerId,
    ) -> Result<ContainerInspection, ContainerEngineError>;

    async fn list_containers(
        &self,
        label_filter: &HashMap<String, String>,
    ) -> Result<Vec<ContainerSummary>, ContainerEngineError>;

    async fn container_logs(
        &self,
        id: &ContainerId,
        tail_lines: usize,
    ) -> Result<Vec<u8>, ContainerEngineError>;

    async fn container_stats(
        &self,
        id: &ContainerId,
    ) -> Result<ContainerStats, ContainerEngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dedicated_worker_name_has_no_timestamp_suffix() {
        let name = worker_name(WorkerKind::Dedicated, "acme-widgets", None);
        assert_eq!(name.as_str(), "orchestrator-dedicated-acme-widgets");
    }

    #[test]
    fn dynamic_worker_name_gets_timestamp_suffix() {
        let name = worker_name(WorkerKind::Dynamic, "acme-widgets", Some(1_700_000_000));
        assert_eq!(name.as_str(), "orchestrator-dynamic-acme-widgets-1700000000");
    }

    #[test]
    fn labels_omit_token_expiry_when_absent() {
        let labels = ContainerLabels {
            kind: WorkerKind::Dynamic,
            repo_id: RepoId::new("acme/widgets"),
            created_at: Utc::now(),
            token_expires_at: None,
        };
        assert!(!labels.to_map().contains_key("orchestrator.tokenExpiresAt"));
    }
}
