// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Kubernetes `ContainerEngine`: runs each worker as a pod.
//!
//! Follows the same pod spec construction, label-based listing, and
//! IP/readiness polling as a coop-agent pod adapter, generalized to
//! create/start/stop/remove a labeled worker pod.

use super::{ContainerEngine, ContainerInspection, ContainerSpec, ContainerStats, ContainerSummary};
use crate::error::ContainerEngineError;
use async_trait::async_trait;
use chrono::Utc;
use fleet_core::ContainerId;
use k8s_openapi::api::core::v1::{Container, EnvVar, Pod, PodSpec};
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::Client;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::warn;

/// Runs worker containers as Kubernetes pods in one namespace.
pub struct KubernetesEngine {
    client: Client,
    namespace: String,
    stats_unavailable_warned: AtomicBool,
}

impl KubernetesEngine {
    pub async fn new(namespace: impl Into<String>) -> Result<Self, ContainerEngineError> {
        let client = Client::try_default()
            .await
            .map_err(|e| ContainerEngineError::Transient(format!("kube client init: {e}")))?;
        Ok(Self { client, namespace: namespace.into(), stats_unavailable_warned: AtomicBool::new(false) })
    }

    fn pods(&self) -> Api<Pod> {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    fn build_pod(spec: &ContainerSpec) -> Pod {
        let mut env: Vec<EnvVar> = vec![EnvVar {
            name: "RUNNER_REGISTRATION_TOKEN".to_string(),
            value: Some(spec.registration_token.clone()),
            ..Default::default()
        }];
        for (k, v) in &spec.env {
            env.push(EnvVar { name: k.clone(), value: Some(v.clone()), ..Default::default() });
        }

        Pod {
            metadata: kube::api::ObjectMeta {
                name: Some(spec.name.to_string()),
                labels: Some(spec.labels.to_map()),
                ..Default::default()
            },
            spec: Some(PodSpec {
                containers: vec![Container {
                    name: "runner".to_string(),
                    image: Some(spec.image.clone()),
                    env: Some(env),
                    ..Default::default()
                }],
                restart_policy: Some("Never".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

#[async_trait]
impl ContainerEngine for KubernetesEngine {
    async fn create_container(
        &self,
        spec: ContainerSpec,
    ) -> Result<ContainerId, ContainerEngineError> {
        let pod = Self::build_pod(&spec);
        let name = spec.name.to_string();
        match self.pods().create(&PostParams::default(), &pod).await {
            Ok(created) => Ok(ContainerId::new(
                created.metadata.name.unwrap_or(name),
            )),
            Err(kube::Error::Api(e)) if e.code == 409 => {
                Err(ContainerEngineError::Conflict(format!("pod {name} already exists")))
            }
            Err(kube::Error::Api(e)) if e.code == 403 => {
                Err(ContainerEngineError::QuotaExceeded(format!("pod {name}: {}", e.message)))
            }
            Err(e) => Err(ContainerEngineError::Transient(format!("pod create {name}: {e}"))),
        }
    }

    async fn start_container(&self, _id: &ContainerId) -> Result<(), ContainerEngineError> {
        // Pods start automatically once scheduled; nothing to do beyond
        // having created them.
        Ok(())
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        grace: Duration,
    ) -> Result<(), ContainerEngineError> {
        let dp = DeleteParams { grace_period_seconds: Some(grace.as_secs() as i64), ..Default::default() };
        match self.pods().delete(id.as_str(), &dp).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => {
                Err(ContainerEngineError::NotFound(id.to_string()))
            }
            Err(e) => Err(ContainerEngineError::Transient(format!("pod stop {id}: {e}"))),
        }
    }

    async fn remove_container(&self, id: &ContainerId) -> Result<(), ContainerEngineError> {
        let dp = DeleteParams { grace_period_seconds: Some(0), ..Default::default() };
        match self.pods().delete(id.as_str(), &dp).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(()),
            Err(e) => Err(ContainerEngineError::Transient(format!("pod remove {id}: {e}"))),
        }
    }

    async fn inspect_container(
        &self,
        id: &ContainerId,
    ) -> Result<ContainerInspection, ContainerEngineError> {
        let pod = self.pods().get(id.as_str()).await.map_err(|e| match e {
            kube::Error::Api(e) if e.code == 404 => ContainerEngineError::NotFound(id.to_string()),
            e => ContainerEngineError::Transient(format!("pod inspect {id}: {e}")),
        })?;

        let status = pod.status.unwrap_or_default();
        let running = status.phase.as_deref() == Some("Running");
        let restart_count = status
            .container_statuses
            .as_ref()
            .map(|cs| cs.iter().map(|c| c.restart_count).sum::<i32>())
            .unwrap_or(0) as u32;
        let exit_code = status.container_statuses.as_ref().and_then(|cs| {
            cs.iter().find_map(|c| c.state.as_ref().and_then(|s| s.terminated.as_ref()).map(|t| t.exit_code))
        });
        let created_at = pod
            .metadata
            .creation_timestamp
            .map(|t| t.0)
            .unwrap_or_else(Utc::now);

        Ok(ContainerInspection { running, restart_count, created_at, exit_code })
    }

    async fn list_containers(
        &self,
        label_filter: &HashMap<String, String>,
    ) -> Result<Vec<ContainerSummary>, ContainerEngineError> {
        let selector = label_filter
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join(",");
        let lp = ListParams::default().labels(&selector);
        let list = self
            .pods()
            .list(&lp)
            .await
            .map_err(|e| ContainerEngineError::Transient(format!("pod list: {e}")))?;

        Ok(list
            .into_iter()
            .filter_map(|pod| {
                let name = pod.metadata.name.clone()?;
                let labels = pod.metadata.labels.clone().unwrap_or_default();
                Some(ContainerSummary {
                    id: ContainerId::new(name.clone()),
                    name: fleet_core::WorkerName::new(name),
                    labels,
                })
            })
            .collect())
    }

    async fn container_logs(
        &self,
        id: &ContainerId,
        tail_lines: usize,
    ) -> Result<Vec<u8>, ContainerEngineError> {
        let lp = kube::api::LogParams { tail_lines: Some(tail_lines as i64), ..Default::default() };
        let logs = self.pods().logs(id.as_str(), &lp).await.map_err(|e| match e {
            kube::Error::Api(e) if e.code == 404 => ContainerEngineError::NotFound(id.to_string()),
            e => ContainerEngineError::Transient(format!("pod logs {id}: {e}")),
        })?;
        Ok(logs.into_bytes())
    }

    async fn container_stats(
        &self,
        id: &ContainerId,
    ) -> Result<ContainerStats, ContainerEngineError> {
        // metrics.k8s.io isn't part of k8s-openapi's core API set; querying
        // it requires a metrics-server deployment and a raw API path.
        // TODO: wire through metrics.k8s.io/v1beta1 PodMetrics once a
        // metrics-server dependency is available in the target cluster.
        let _ = id;
        if !self.stats_unavailable_warned.swap(true, Ordering::Relaxed) {
            warn!("pod CPU/memory stats unavailable: metrics.k8s.io not wired up, high-CPU/memory health signals are dark");
        }
        Err(ContainerEngineError::Transient("pod metrics unavailable".to_string()))
    }
}
