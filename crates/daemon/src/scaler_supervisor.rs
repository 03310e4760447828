// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ScalerSupervisor: top-level orchestrator. Owns one [`PerRepoController`]
//! per configured repository, the [`LeaderElector`], the [`TokenBroker`],
//! and the [`LifecycleReconciler`]; drives the monitor and cleanup tickers
//! and gates every mutating action behind current leadership.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use fleet_adapters::{ContainerEngine, CoordinationStore, Provider, ProviderError};
use fleet_core::{Clock, FleetError, HolderId, RepoId, Repository};
use fleet_wire::{RepoStatus, StatusSnapshot, WorkerStatus};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::env::Config;
use crate::events::EventBus;
use crate::leader_elector::LeaderElector;
use crate::lifecycle_reconciler::{LifecycleReconciler, TrackedWorker};
use crate::per_repo_controller::{BusyMap, PerRepoController};
use crate::token_broker::TokenBroker;

pub struct ScalerSupervisor<E, P, S, C>
where
    E: ContainerEngine + 'static,
    P: Provider + 'static,
    S: CoordinationStore + 'static,
    C: Clock,
{
    config: Config,
    provider: Arc<P>,
    clock: C,
    events: EventBus,
    holder_id: HolderId,
    leader: Arc<LeaderElector<S, C>>,
    token_broker: Arc<TokenBroker<P, C>>,
    reconciler: Arc<LifecycleReconciler<E, P>>,
    repos: HashMap<RepoId, PerRepoController>,
    scaling_in_progress: Arc<AtomicBool>,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl<E, P, S, C> ScalerSupervisor<E, P, S, C>
where
    E: ContainerEngine + 'static,
    P: Provider + 'static,
    S: CoordinationStore + 'static,
    C: Clock,
{
    pub fn new(
        config: Config,
        engine: Arc<E>,
        provider: Arc<P>,
        store: Arc<S>,
        clock: C,
        holder_id: HolderId,
    ) -> Result<Self, FleetError> {
        let events = EventBus::new();
        let leader = Arc::new(LeaderElector::new(
            store,
            clock.clone(),
            events.clone(),
            holder_id.clone(),
            config.lease_ttl(),
            config.heartbeat_interval(),
            config.election_timeout(),
        ));
        let token_broker = Arc::new(TokenBroker::new(
            provider.clone(),
            clock.clone(),
            events.clone(),
            config.token_skew(),
        ));
        let reconciler = Arc::new(LifecycleReconciler::new(engine.clone(), provider.clone(), events.clone()));

        let repos = Self::parse_repositories(&config.repositories)?;
        let mut controllers = HashMap::new();
        for repo in repos {
            let broker = token_broker.clone();
            let token_getter = move |repo_id: &RepoId| {
                let broker = broker.clone();
                let repo_id = repo_id.clone();
                Box::pin(async move { broker.get_valid(&repo_id).await })
                    as std::pin::Pin<Box<dyn std::future::Future<Output = Result<fleet_core::Token, FleetError>> + Send>>
            };
            let controller = PerRepoController::spawn(
                repo.clone(),
                engine.clone(),
                provider.clone(),
                clock.clone(),
                events.clone(),
                config.max_dynamic_per_repo,
                config.idle_timeout(),
                config.worker_image.clone(),
                token_getter,
            );
            controllers.insert(repo.id.clone(), controller);
        }

        Ok(Self {
            config,
            provider,
            clock,
            events,
            holder_id,
            leader,
            token_broker,
            reconciler,
            repos: controllers,
            scaling_in_progress: Arc::new(AtomicBool::new(false)),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
        })
    }

    fn parse_repositories(raw: &str) -> Result<Vec<Repository>, FleetError> {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| {
                let (owner, name) = entry
                    .split_once('/')
                    .ok_or_else(|| FleetError::ConfigInvalid(format!("malformed repository {entry:?}")))?;
                Ok(Repository::new(owner, name))
            })
            .collect()
    }

    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Starts the leader-election task, the monitor/cleanup tickers, and
    /// runs the startup orphan reaper before the first tick.
    pub async fn start(&mut self) -> Result<(), FleetError> {
        self.reconciler.reap_orphans().await?;

        let leader_cancel = self.cancel.child_token();
        let leader = self.leader.clone();
        self.tasks.push(tokio::spawn(leader.run(leader_cancel)));

        for repo_id in self.repos.keys().cloned().collect::<Vec<_>>() {
            self.token_broker.start_refresher(repo_id, self.config.token_refresh_interval());
        }

        self.tasks.push(self.spawn_monitor_ticker());
        self.tasks.push(self.spawn_cleanup_ticker());
        self.tasks.push(self.spawn_health_ticker());

        info!(repos = self.repos.len(), "scaler supervisor started");
        Ok(())
    }

    fn spawn_monitor_ticker(&self) -> JoinHandle<()> {
        let cancel = self.cancel.child_token();
        let interval = self.config.monitor_interval();
        let leader = self.leader.clone();
        let provider = self.provider.clone();
        let repos = self.repos.clone();
        let reconciler = self.reconciler.clone();
        let token_broker = self.token_broker.clone();
        let scaling_in_progress = self.scaling_in_progress.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {
                        if !leader.is_leader() {
                            continue;
                        }
                        if scaling_in_progress.swap(true, Ordering::SeqCst) {
                            warn!("monitor tick skipped: previous tick still in progress");
                            continue;
                        }
                        for (repo_id, controller) in repos.iter() {
                            if let Err(err) = monitor_one(repo_id, controller, &provider, &reconciler, &token_broker).await {
                                warn!(repo = %repo_id, %err, "monitor tick failed");
                            }
                        }
                        scaling_in_progress.store(false, Ordering::SeqCst);
                    }
                }
            }
        })
    }

    fn spawn_cleanup_ticker(&self) -> JoinHandle<()> {
        let cancel = self.cancel.child_token();
        let interval = self.config.cleanup_interval();
        let leader = self.leader.clone();
        let repos = self.repos.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {
                        if !leader.is_leader() {
                            continue;
                        }
                        for (repo_id, controller) in repos.iter() {
                            if let Err(err) = controller.idle_cleanup().await {
                                warn!(repo = %repo_id, %err, "idle cleanup tick failed");
                            }
                        }
                    }
                }
            }
        })
    }

    fn spawn_health_ticker(&self) -> JoinHandle<()> {
        let cancel = self.cancel.child_token();
        let interval = self.config.monitor_interval();
        let reconciler = self.reconciler.clone();
        let repos = self.repos.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {
                        for update in reconciler.health_tick().await {
                            if let Some(controller) = repos.get(&update.repo_id) {
                                controller.set_worker_health(update.name, update.health).await;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Returns a read-only snapshot; never mutates anything, so it is safe
    /// to call regardless of leadership.
    pub async fn status(&self) -> StatusSnapshot {
        let mut repos = Vec::new();
        for (repo_id, controller) in self.repos.iter() {
            let Some(state) = controller.snapshot().await else { continue };
            repos.push(RepoStatus {
                repo_id: repo_id.to_string(),
                dedicated: state.dedicated.as_ref().map(worker_status),
                dynamic: state.dynamic.iter().map(worker_status).collect(),
                last_scale_at: state.last_scale_at.map(|_| self.clock.wall_now()),
            });
        }

        let is_leader = self.leader.is_leader();
        StatusSnapshot {
            leader_holder_id: is_leader.then(|| self.holder_id.to_string()),
            leader_term: self.leader.term(),
            is_leader,
            repos,
            generated_at: self.clock.wall_now(),
        }
    }

    /// Cancels all background tasks and waits up to `shutdown_timeout` for
    /// them to finish, then releases leadership if held.
    pub async fn stop(mut self) {
        self.cancel.cancel();
        self.token_broker.stop_all_refreshers();

        let deadline = self.config.shutdown_timeout();
        for task in self.tasks.drain(..) {
            let _ = tokio::time::timeout(deadline, task).await;
        }
        info!("scaler supervisor stopped");
    }
}

async fn monitor_one<E: ContainerEngine, P: Provider, C: Clock>(
    repo_id: &RepoId,
    controller: &PerRepoController,
    provider: &Arc<P>,
    reconciler: &Arc<LifecycleReconciler<E, P>>,
    token_broker: &Arc<TokenBroker<P, C>>,
) -> Result<(), FleetError> {
    controller.ensure_dedicated().await?;

    let workers = match provider.list_workers(repo_id).await {
        Ok(workers) => workers,
        Err(ProviderError::AuthExpired(_)) => {
            warn!(repo = %repo_id, "list_workers saw AuthExpired, forcing token refresh and retrying once");
            token_broker.force_refresh(repo_id).await?;
            provider.list_workers(repo_id).await?
        }
        Err(err) => return Err(err.into()),
    };
    let busy: BusyMap = workers.iter().map(|w| (w.name.clone(), w.busy)).collect();
    controller.evaluate_and_scale(busy).await?;

    if let Some(state) = controller.snapshot().await {
        for worker in state.all_workers() {
            reconciler.track(TrackedWorker {
                name: worker.name.clone(),
                repo_id: repo_id.clone(),
                container_id: worker.container_id.clone(),
                provider_id: worker.provider_id.clone(),
            });
        }
    }

    let outcome = reconciler.state_sync_tick(repo_id).await?;
    for name in outcome.removed {
        controller.handle_worker_removed(name).await;
    }
    for (old_name, new_name) in outcome.reregistered {
        controller.handle_worker_reregistered(old_name, new_name).await;
    }
    Ok(())
}

fn worker_status(worker: &fleet_core::Worker) -> WorkerStatus {
    WorkerStatus {
        name: worker.name.to_string(),
        kind: worker.kind,
        health: worker.health,
        busy: worker.busy,
        token_expires_at: worker.token_expires_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_adapters::{FakeContainerEngine, FakeProvider, InMemoryCoordinationStore};
    use fleet_core::FakeClock;

    fn config() -> Config {
        let mut config = Config { repositories: "acme/widgets".to_string(), ..Config::default() };
        config.monitor_interval_seconds = 1;
        config.cleanup_interval_seconds = 1;
        config
    }

    #[tokio::test]
    async fn start_runs_orphan_reaper_and_elects_leader() {
        let engine = Arc::new(FakeContainerEngine::new());
        let provider = Arc::new(FakeProvider::new());
        let clock = FakeClock::new();
        let store = Arc::new(InMemoryCoordinationStore::new(clock.clone()));

        let mut supervisor = ScalerSupervisor::new(
            config(),
            engine,
            provider,
            store,
            clock,
            HolderId::new("instance-a"),
        )
        .unwrap();

        supervisor.start().await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;

        let status = supervisor.status().await;
        assert_eq!(status.repos.len(), 1);

        supervisor.stop().await;
    }

    #[test]
    fn parse_repositories_rejects_malformed_entries() {
        let err = ScalerSupervisor::<FakeContainerEngine, FakeProvider, InMemoryCoordinationStore<FakeClock>, FakeClock>::parse_repositories("not-a-repo")
            .unwrap_err();
        assert!(matches!(err, FleetError::ConfigInvalid(_)));
    }
}
