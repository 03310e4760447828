// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LifecycleReconciler: reconciles local tracking, ContainerEngine,
//! and Provider truth. Only ever *reads* `RepoState` (via a caller-supplied
//! snapshot) and emits events/tracking updates; mutation of `RepoState`
//! itself happens back in the owning `PerRepoController` when a repo's
//! supervisor loop applies a `WorkerRemoved` notification.

use fleet_adapters::{ContainerEngine, Provider, ProviderWorkerStatus};
use fleet_core::{ContainerId, Event, FleetError, Health, ProviderWorkerId, RepoId, WorkerName};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::{info, warn};

use crate::events::EventBus;

const CLEANUP_GRACE: Duration = Duration::from_secs(10);
const OFFLINE_LOG_TAIL_LINES: usize = 50;
const MANAGED_PREFIX: &str = "orchestrator-";

#[derive(Debug, Clone)]
pub struct TrackedWorker {
    pub name: WorkerName,
    pub repo_id: RepoId,
    pub container_id: ContainerId,
    pub provider_id: Option<ProviderWorkerId>,
}

/// Outcome of reconciling one repository's state-sync pass, surfaced for
/// the caller (`ScalerSupervisor`) to apply back onto `RepoState`.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SyncOutcome {
    pub removed: Vec<WorkerName>,
    pub reregistered: Vec<(WorkerName, WorkerName)>,
    pub restarted: Vec<WorkerName>,
}

/// A health observation to be written back into the owning repo's
/// `RepoState` by the caller (`ScalerSupervisor`), since this reconciler
/// only ever reads a caller-supplied `RepoState` snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthUpdate {
    pub repo_id: RepoId,
    pub name: WorkerName,
    pub health: Health,
}

enum OfflineDiagnosis {
    TokenExpired,
    ProcessCrashed,
    Unknown,
}

fn diagnose_log_signal(logs: &[u8]) -> OfflineDiagnosis {
    let text = String::from_utf8_lossy(logs);
    if text.contains("registration failed") || text.contains("Unauthorized") {
        OfflineDiagnosis::TokenExpired
    } else if text.contains("listener exited") {
        OfflineDiagnosis::ProcessCrashed
    } else {
        OfflineDiagnosis::Unknown
    }
}

pub struct LifecycleReconciler<E: ContainerEngine, P: Provider> {
    engine: std::sync::Arc<E>,
    provider: std::sync::Arc<P>,
    events: EventBus,
    tracking: Mutex<HashMap<String, TrackedWorker>>,
}

impl<E: ContainerEngine, P: Provider> LifecycleReconciler<E, P> {
    pub fn new(engine: std::sync::Arc<E>, provider: std::sync::Arc<P>, events: EventBus) -> Self {
        Self { engine, provider, events, tracking: Mutex::new(HashMap::new()) }
    }

    pub fn track(&self, worker: TrackedWorker) {
        self.tracking.lock().insert(worker.name.to_string(), worker);
    }

    pub fn untrack(&self, name: &WorkerName) {
        self.tracking.lock().remove(name.as_str());
    }

    pub fn set_provider_id(&self, name: &WorkerName, provider_id: ProviderWorkerId) {
        if let Some(w) = self.tracking.lock().get_mut(name.as_str()) {
            w.provider_id = Some(provider_id);
        }
    }

    /// Health loop: container-running check + resource stats for every
    /// tracked worker. Emits observability events and returns the health
    /// transitions the caller should write back into `RepoState` so
    /// `Worker::is_available` reflects reality instead of the
    /// once-at-creation `Healthy` default.
    pub async fn health_tick(&self) -> Vec<HealthUpdate> {
        let tracked: Vec<TrackedWorker> = self.tracking.lock().values().cloned().collect();
        let mut updates = Vec::new();
        for worker in tracked {
            match self.engine.inspect_container(&worker.container_id).await {
                Ok(inspection) if !inspection.running => {
                    self.events.emit(Event::WorkerUnhealthy {
                        repo_id: worker.repo_id.clone(),
                        name: worker.name.clone(),
                        reason: "ContainerStopped".to_string(),
                    });
                    updates.push(HealthUpdate {
                        repo_id: worker.repo_id.clone(),
                        name: worker.name.clone(),
                        health: Health::Unhealthy,
                    });
                }
                Ok(_) => {
                    let mut healthy = true;
                    if let Ok(stats) = self.engine.container_stats(&worker.container_id).await {
                        if stats.cpu_usage_percent > 90.0 {
                            self.events.emit(Event::WorkerHighCpu {
                                repo_id: worker.repo_id.clone(),
                                name: worker.name.clone(),
                                cpu_percent: stats.cpu_usage_percent,
                            });
                            healthy = false;
                        }
                        if stats.memory_usage_percent > 90.0 {
                            self.events.emit(Event::WorkerHighMemory {
                                repo_id: worker.repo_id.clone(),
                                name: worker.name.clone(),
                                memory_percent: stats.memory_usage_percent,
                            });
                            healthy = false;
                        }
                    }
                    updates.push(HealthUpdate {
                        repo_id: worker.repo_id,
                        name: worker.name,
                        health: if healthy { Health::Healthy } else { Health::Unhealthy },
                    });
                }
                Err(err) => {
                    warn!(worker = %worker.name, %err, "inspect_container failed during health tick");
                }
            }
        }
        updates
    }

    /// State-sync loop for one repository. On the token-expired diagnosis
    /// branch, tears the stale container and provider registration down
    /// immediately and returns the old/new name pair in `reregistered`; the
    /// caller (`PerRepoController`, via `ScalerSupervisor`) recreates the
    /// replacement worker under the new name with its own freshly-fetched
    /// token, keeping this reconciler decoupled from `TokenBroker`.
    pub async fn state_sync_tick(&self, repo_id: &RepoId) -> Result<SyncOutcome, FleetError> {
        let mut outcome = SyncOutcome::default();
        let registered = self.provider.list_workers(repo_id).await?;
        let registered_by_name: HashMap<&str, _> =
            registered.iter().map(|w| (w.name.as_str(), w)).collect();

        let tracked_names: Vec<WorkerName> = {
            let tracking = self.tracking.lock();
            tracking
                .values()
                .filter(|w| &w.repo_id == repo_id)
                .map(|w| w.name.clone())
                .collect()
        };

        // tracked ∧ ¬registered -> cleanup locally.
        for name in &tracked_names {
            if !registered_by_name.contains_key(name.as_str()) {
                self.cleanup(name).await?;
                outcome.removed.push(name.clone());
            }
        }

        // registered ∧ status=offline ∧ tracked.health=Healthy -> diagnose.
        for name in &tracked_names {
            let Some(provider_worker) = registered_by_name.get(name.as_str()) else { continue };
            if provider_worker.status != ProviderWorkerStatus::Offline {
                continue;
            }
            let Some(tracked) = self.tracking.lock().get(name.as_str()).cloned() else {
                continue;
            };
            let container_id = tracked.container_id.clone();
            let logs = self
                .engine
                .container_logs(&container_id, OFFLINE_LOG_TAIL_LINES)
                .await
                .unwrap_or_default();
            match diagnose_log_signal(&logs) {
                OfflineDiagnosis::TokenExpired => {
                    if let Err(err) = self.engine.stop_container(&container_id, CLEANUP_GRACE).await {
                        if !matches!(err, fleet_adapters::ContainerEngineError::NotFound(_)) {
                            warn!(worker = %name, %err, "reregistration: stop_container failed");
                        }
                    }
                    if let Err(err) = self.engine.remove_container(&container_id).await {
                        if !matches!(err, fleet_adapters::ContainerEngineError::NotFound(_)) {
                            warn!(worker = %name, %err, "reregistration: remove_container failed");
                        }
                    }
                    if let Some(provider_id) = &tracked.provider_id {
                        if let Err(err) = self.provider.deregister_worker(repo_id, provider_id).await {
                            if !matches!(err, fleet_adapters::ProviderError::NotFound(_)) {
                                warn!(worker = %name, %err, "reregistration: deregister_worker failed");
                            }
                        }
                    }

                    let suffixed = WorkerName::new(format!("{name}-reregistered"));
                    self.untrack(name);
                    self.events.emit(Event::WorkerReregistered {
                        repo_id: repo_id.clone(),
                        old_name: name.clone(),
                        new_name: suffixed.clone(),
                    });
                    outcome.reregistered.push((name.clone(), suffixed));
                }
                OfflineDiagnosis::ProcessCrashed => {
                    if let Err(err) = self.engine.stop_container(&container_id, CLEANUP_GRACE).await {
                        warn!(worker = %name, %err, "restart: stop_container failed");
                    }
                    if let Err(err) = self.engine.start_container(&container_id).await {
                        warn!(worker = %name, %err, "restart: start_container failed");
                    } else {
                        self.events
                            .emit(Event::WorkerRestarted { repo_id: repo_id.clone(), name: name.clone() });
                        outcome.restarted.push(name.clone());
                    }
                }
                OfflineDiagnosis::Unknown => {
                    self.cleanup(name).await?;
                    outcome.removed.push(name.clone());
                }
            }
        }

        // registered ∧ ¬tracked ∧ name matches managed prefix -> orphan; deregister.
        for provider_worker in &registered {
            if provider_worker.name.starts_with(MANAGED_PREFIX)
                && !self.tracking.lock().contains_key(provider_worker.name.as_str())
            {
                if let Err(err) = self.provider.deregister_worker(repo_id, &provider_worker.id).await {
                    if !matches!(err, fleet_adapters::ProviderError::NotFound(_)) {
                        warn!(worker = %provider_worker.name, %err, "failed to deregister orphaned provider worker");
                    }
                }
            }
        }

        Ok(outcome)
    }

    /// Cleanup protocol: stop -> remove -> deregister (tolerate
    /// NotFound) -> untrack -> emit `WorkerRemoved`. Idempotent.
    pub async fn cleanup(&self, name: &WorkerName) -> Result<(), FleetError> {
        let Some(worker) = self.tracking.lock().get(name.as_str()).cloned() else {
            return Ok(());
        };

        if let Err(err) = self.engine.stop_container(&worker.container_id, CLEANUP_GRACE).await {
            if !matches!(err, fleet_adapters::ContainerEngineError::NotFound(_)) {
                return Err(err.into());
            }
        }
        if let Err(err) = self.engine.remove_container(&worker.container_id).await {
            if !matches!(err, fleet_adapters::ContainerEngineError::NotFound(_)) {
                return Err(err.into());
            }
        }
        if let Some(provider_id) = &worker.provider_id {
            if let Err(err) = self.provider.deregister_worker(&worker.repo_id, provider_id).await {
                if !matches!(err, fleet_adapters::ProviderError::NotFound(_)) {
                    return Err(err.into());
                }
            }
        }
        self.untrack(name);
        self.events.emit(Event::WorkerRemoved { repo_id: worker.repo_id, name: name.clone() });
        Ok(())
    }

    /// Startup orphan reaper: removes managed-prefixed containers
    /// that aren't in the tracking map, before the first monitoring tick.
    pub async fn reap_orphans(&self) -> Result<usize, FleetError> {
        let label_filter = HashMap::new();
        let containers = self.engine.list_containers(&label_filter).await?;
        let tracked: HashSet<String> = self.tracking.lock().keys().cloned().collect();

        let mut reaped = 0;
        for container in containers {
            if container.name.as_str().starts_with(MANAGED_PREFIX) && !tracked.contains(container.name.as_str())
            {
                if let Err(err) = self.engine.stop_container(&container.id, CLEANUP_GRACE).await {
                    warn!(container = %container.id, %err, "orphan reaper: stop_container failed");
                }
                if let Err(err) = self.engine.remove_container(&container.id).await {
                    warn!(container = %container.id, %err, "orphan reaper: remove_container failed");
                } else {
                    reaped += 1;
                }
            }
        }
        info!(reaped, "startup orphan reaper finished");
        Ok(reaped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_adapters::container_engine::FakeContainerEngine;
    use fleet_adapters::provider::{FakeProvider, ProviderWorker};

    fn worker(repo_id: &RepoId, name: &str) -> TrackedWorker {
        TrackedWorker {
            name: WorkerName::new(name),
            repo_id: repo_id.clone(),
            container_id: ContainerId::new(name),
            provider_id: None,
        }
    }

    #[tokio::test]
    async fn cleanup_is_idempotent_for_untracked_workers() {
        let engine = std::sync::Arc::new(FakeContainerEngine::new());
        let provider = std::sync::Arc::new(FakeProvider::new());
        let reconciler = LifecycleReconciler::new(engine, provider, EventBus::new());
        reconciler.cleanup(&WorkerName::new("ghost")).await.unwrap();
    }

    #[tokio::test]
    async fn state_sync_removes_tracked_workers_no_longer_registered() {
        let engine = std::sync::Arc::new(FakeContainerEngine::new());
        let provider = std::sync::Arc::new(FakeProvider::new());
        let repo = RepoId::new("acme/widgets");
        let reconciler = LifecycleReconciler::new(engine.clone(), provider.clone(), EventBus::new());

        engine
            .create_container(fleet_adapters::ContainerSpec {
                name: WorkerName::new("orchestrator-dynamic-acme-widgets-1"),
                image: "img".to_string(),
                registration_token: "tok".to_string(),
                labels: fleet_adapters::ContainerLabels {
                    kind: fleet_core::WorkerKind::Dynamic,
                    repo_id: repo.clone(),
                    created_at: chrono::Utc::now(),
                    token_expires_at: None,
                },
                env: vec![],
            })
            .await
            .unwrap();
        reconciler.track(worker(&repo, "orchestrator-dynamic-acme-widgets-1"));

        provider.set_workers(&repo, vec![]);
        let outcome = reconciler.state_sync_tick(&repo).await.unwrap();

        assert_eq!(outcome.removed.len(), 1);
        assert!(!engine.contains("orchestrator-dynamic-acme-widgets-1"));
    }

    #[tokio::test]
    async fn state_sync_diagnoses_unauthorized_as_token_expired() {
        let engine = std::sync::Arc::new(FakeContainerEngine::new());
        let provider = std::sync::Arc::new(FakeProvider::new());
        let repo = RepoId::new("acme/widgets");
        let reconciler = LifecycleReconciler::new(engine.clone(), provider.clone(), EventBus::new());

        let name = "orchestrator-dedicated-acme-widgets";
        engine
            .create_container(fleet_adapters::ContainerSpec {
                name: WorkerName::new(name),
                image: "img".to_string(),
                registration_token: "tok".to_string(),
                labels: fleet_adapters::ContainerLabels {
                    kind: fleet_core::WorkerKind::Dedicated,
                    repo_id: repo.clone(),
                    created_at: chrono::Utc::now(),
                    token_expires_at: None,
                },
                env: vec![],
            })
            .await
            .unwrap();
        engine.set_logs(name, "Http response code: Unauthorized");
        reconciler.track(worker(&repo, name));

        provider.set_workers(
            &repo,
            vec![ProviderWorker {
                id: ProviderWorkerId::new("p1"),
                name: name.to_string(),
                status: ProviderWorkerStatus::Offline,
                busy: false,
            }],
        );

        let outcome = reconciler.state_sync_tick(&repo).await.unwrap();
        assert_eq!(outcome.reregistered.len(), 1);
    }
}
