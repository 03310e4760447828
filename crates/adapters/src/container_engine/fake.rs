// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory `ContainerEngine` for tests.

use super::{ContainerEngine, ContainerInspection, ContainerSpec, ContainerStats, ContainerSummary};
use crate::error::ContainerEngineError;
use async_trait::async_trait;
use chrono::Utc;
use fleet_core::ContainerId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
struct FakeContainer {
    name: fleet_core::WorkerName,
    labels: HashMap<String, String>,
    running: bool,
    logs: Vec<u8>,
}

/// Deterministic, injectable-failure fake used by unit and property tests.
#[derive(Clone, Default)]
pub struct FakeContainerEngine {
    containers: Arc<Mutex<HashMap<String, FakeContainer>>>,
    create_calls: Arc<AtomicUsize>,
    remove_calls: Arc<AtomicUsize>,
    fail_next_create: Arc<Mutex<Option<ContainerEngineError>>>,
}

impl FakeContainerEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_call_count(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn remove_call_count(&self) -> usize {
        self.remove_calls.load(Ordering::SeqCst)
    }

    pub fn fail_next_create_with(&self, err: ContainerEngineError) {
        *self.fail_next_create.lock() = Some(err);
    }

    /// Set logs for a container, used to drive `LifecycleReconciler`
    /// offline-diagnosis scenarios.
    pub fn set_logs(&self, id: &str, logs: impl Into<String>) {
        if let Some(c) = self.containers.lock().get_mut(id) {
            c.logs = logs.into().into_bytes();
        }
    }

    pub fn set_running(&self, id: &str, running: bool) {
        if let Some(c) = self.containers.lock().get_mut(id) {
            c.running = running;
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.containers.lock().contains_key(id)
    }
}

#[async_trait]
impl ContainerEngine for FakeContainerEngine {
    async fn create_container(
        &self,
        spec: ContainerSpec,
    ) -> Result<ContainerId, ContainerEngineError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.fail_next_create.lock().take() {
            return Err(err);
        }
        let id = spec.name.to_string();
        let mut containers = self.containers.lock();
        if containers.contains_key(&id) {
            return Err(ContainerEngineError::Conflict(id));
        }
        containers.insert(
            id.clone(),
            FakeContainer {
                name: spec.name,
                labels: spec.labels.to_map(),
                running: false,
                logs: Vec::new(),
            },
        );
        Ok(ContainerId::new(id))
    }

    async fn start_container(&self, id: &ContainerId) -> Result<(), ContainerEngineError> {
        let mut containers = self.containers.lock();
        let c = containers
            .get_mut(id.as_str())
            .ok_or_else(|| ContainerEngineError::NotFound(id.to_string()))?;
        c.running = true;
        Ok(())
    }

    async fn stop_container(
        &self,
        id: &ContainerId,
        _grace: Duration,
    ) -> Result<(), ContainerEngineError> {
        let mut containers = self.containers.lock();
        let c = containers
            .get_mut(id.as_str())
            .ok_or_else(|| ContainerEngineError::NotFound(id.to_string()))?;
        c.running = false;
        Ok(())
    }

    async fn remove_container(&self, id: &ContainerId) -> Result<(), ContainerEngineError> {
        self.remove_calls.fetch_add(1, Ordering::SeqCst);
        self.containers.lock().remove(id.as_str());
        Ok(())
    }

    async fn inspect_container(
        &self,
        id: &ContainerId,
    ) -> Result<ContainerInspection, ContainerEngineError> {
        let containers = self.containers.lock();
        let c = containers
            .get(id.as_str())
            .ok_or_else(|| ContainerEngineError::NotFound(id.to_string()))?;
        Ok(ContainerInspection {
            running: c.running,
            restart_count: 0,
            created_at: Utc::now(),
            exit_code: None,
        })
    }

    async fn list_containers(
        &self,
        label_filter: &HashMap<String, String>,
    ) -> Result<Vec<ContainerSummary>, ContainerEngineError> {
        let containers = self.containers.lock();
        Ok(containers
            .iter()
            .filter(|(_, c)| label_filter.iter().all(|(k, v)| c.labels.get(k) == Some(v)))
            .map(|(id, c)| ContainerSummary {
                id: ContainerId::new(id.clone()),
                name: c.name.clone(),
                labels: c.labels.clone(),
            })
            .collect())
    }

    async fn container_logs(
        &self,
        id: &ContainerId,
        _tail_lines: usize,
    ) -> Result<Vec<u8>, ContainerEngineError> {
        let containers = self.containers.lock();
        let c = containers
            .get(id.as_str())
            .ok_or_else(|| ContainerEngineError::NotFound(id.to_string()))?;
        Ok(c.logs.clone())
    }

    async fn container_stats(
        &self,
        _id: &ContainerId,
    ) -> Result<ContainerStats, ContainerEngineError> {
        Ok(ContainerStats { cpu_usage_percent: 0.0, memory_usage_percent: 0.0 })
    }
}
