// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PerRepoController: single-owner actor for one repository's `RepoState`.
//! All mutation enters through [`PerRepoController`]'s async methods, which
//! forward to a dedicated owner task over an mpsc channel, so no two callers
//! ever touch `RepoState` concurrently.

use crate::events::EventBus;
use fleet_adapters::{ContainerEngine, ContainerLabels, ContainerSpec, Provider};
use fleet_core::{
    worker::{Health, Worker, WorkerKind},
    Clock, Event, FleetError, RepoId, RepoState, Repository, Token, WorkerName,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// Provider-reported busy status keyed by the worker's local name.
pub type BusyMap = HashMap<String, bool>;

enum Command {
    EnsureDedicated(oneshot::Sender<Result<(), FleetError>>),
    EvaluateAndScale(BusyMap, oneshot::Sender<Result<(), FleetError>>),
    IdleCleanup(oneshot::Sender<Result<Vec<WorkerName>, FleetError>>),
    HandleWorkerRemoved(WorkerName, oneshot::Sender<()>),
    HandleWorkerReregistered(WorkerName, WorkerName, oneshot::Sender<()>),
    SetHealth(WorkerName, Health, oneshot::Sender<()>),
    Snapshot(oneshot::Sender<RepoState>),
}

/// Cheaply-clonable handle; the real `RepoState` lives only inside the
/// owner task spawned by [`PerRepoController::spawn`].
#[derive(Clone)]
pub struct PerRepoController {
    tx: mpsc::Sender<Command>,
}

struct Actor<E: ContainerEngine, P: Provider, C: Clock> {
    repo: Repository,
    state: RepoState,
    engine: Arc<E>,
    provider: Arc<P>,
    clock: C,
    events: EventBus,
    max_dynamic: u32,
    idle_timeout: Duration,
    worker_image: String,
    token_getter: Box<dyn Fn(&RepoId) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Token, FleetError>> + Send>> + Send + Sync>,
    consecutive_spawn_failures: u32,
}

impl PerRepoController {
    /// Spawns the owner task and returns a handle to it.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn<E, P, C>(
        repo: Repository,
        engine: Arc<E>,
        provider: Arc<P>,
        clock: C,
        events: EventBus,
        max_dynamic: u32,
        idle_timeout: Duration,
        worker_image: String,
        token_getter: impl Fn(&RepoId) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Token, FleetError>> + Send>>
            + Send
            + Sync
            + 'static,
    ) -> Self
    where
        E: ContainerEngine + 'static,
        P: Provider + 'static,
        C: Clock,
    {
        let (tx, rx) = mpsc::channel(32);
        let actor = Actor {
            state: RepoState::new(repo.id.clone()),
            repo,
            engine,
            provider,
            clock,
            events,
            max_dynamic,
            idle_timeout,
            worker_image,
            token_getter: Box::new(token_getter),
            consecutive_spawn_failures: 0,
        };
        tokio::spawn(actor.run(rx));
        Self { tx }
    }

    pub async fn ensure_dedicated(&self) -> Result<(), FleetError> {
        self.call(Command::EnsureDedicated).await
    }

    pub async fn evaluate_and_scale(&self, busy: BusyMap) -> Result<(), FleetError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx.send(Command::EvaluateAndScale(busy, resp_tx)).await.map_err(channel_closed)?;
        resp_rx.await.map_err(channel_closed)?
    }

    pub async fn idle_cleanup(&self) -> Result<Vec<WorkerName>, FleetError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx.send(Command::IdleCleanup(resp_tx)).await.map_err(channel_closed)?;
        resp_rx.await.map_err(channel_closed)?
    }

    pub async fn handle_worker_removed(&self, name: WorkerName) {
        let (resp_tx, resp_rx) = oneshot::channel();
        if self.tx.send(Command::HandleWorkerRemoved(name, resp_tx)).await.is_ok() {
            let _ = resp_rx.await;
        }
    }

    pub async fn handle_worker_reregistered(&self, old_name: WorkerName, new_name: WorkerName) {
        let (resp_tx, resp_rx) = oneshot::channel();
        if self.tx.send(Command::HandleWorkerReregistered(old_name, new_name, resp_tx)).await.is_ok() {
            let _ = resp_rx.await;
        }
    }

    pub async fn set_worker_health(&self, name: WorkerName, health: Health) {
        let (resp_tx, resp_rx) = oneshot::channel();
        if self.tx.send(Command::SetHealth(name, health, resp_tx)).await.is_ok() {
            let _ = resp_rx.await;
        }
    }

    pub async fn snapshot(&self) -> Option<RepoState> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx.send(Command::Snapshot(resp_tx)).await.ok()?;
        resp_rx.await.ok()
    }

    async fn call(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), FleetError>>) -> Command,
    ) -> Result<(), FleetError> {
        let (resp_tx, resp_rx) = oneshot::channel();
        self.tx.send(make(resp_tx)).await.map_err(channel_closed)?;
        resp_rx.await.map_err(channel_closed)?
    }
}

fn channel_closed<T>(_: T) -> FleetError {
    FleetError::Transient("per-repo controller actor has shut down".to_string())
}

impl<E: ContainerEngine, P: Provider, C: Clock> Actor<E, P, C> {
    async fn run(mut self, mut rx: mpsc::Receiver<Command>) {
        while let Some(cmd) = rx.recv().await {
            match cmd {
                Command::EnsureDedicated(resp) => {
                    let result = self.ensure_dedicated().await;
                    let _ = resp.send(result);
                }
                Command::EvaluateAndScale(busy, resp) => {
                    let result = self.evaluate_and_scale(&busy).await;
                    let _ = resp.send(result);
                }
                Command::IdleCleanup(resp) => {
                    let result = self.idle_cleanup().await;
                    let _ = resp.send(result);
                }
                Command::HandleWorkerRemoved(name, resp) => {
                    self.handle_worker_removed(&name).await;
                    let _ = resp.send(());
                }
                Command::HandleWorkerReregistered(old_name, new_name, resp) => {
                    self.handle_worker_reregistered(&old_name, new_name).await;
                    let _ = resp.send(());
                }
                Command::SetHealth(name, health, resp) => {
                    self.set_worker_health(&name, health);
                    let _ = resp.send(());
                }
                Command::Snapshot(resp) => {
                    let _ = resp.send(self.state.clone());
                }
            }
        }
    }

    /// Syncs each tracked worker's `busy`/`last_activity_at` from the
    /// Provider-reported snapshot. `last_activity_at` advances on every
    /// observed busy->idle transition: idle time is measured from this
    /// local observation, not a Provider-confirmed timestamp.
    fn apply_busy_observations(&mut self, busy: &BusyMap) {
        let now = self.clock.now();
        for worker in self.state.all_workers_mut() {
            let is_busy = busy.get(worker.name.as_str()).copied().unwrap_or(false);
            if worker.busy && !is_busy {
                worker.last_activity_at = now;
            }
            worker.busy = is_busy;
        }
    }

    fn slug(&self) -> String {
        self.repo.slug()
    }

    /// Idempotent: returns Ok without creating anything if a dedicated
    /// worker already exists.
    async fn ensure_dedicated(&mut self) -> Result<(), FleetError> {
        if self.state.dedicated.is_some() {
            return Ok(());
        }
        let worker = self.spawn_worker(WorkerKind::Dedicated, None).await?;
        self.state.dedicated = Some(worker);
        Ok(())
    }

    async fn spawn_worker(
        &mut self,
        kind: WorkerKind,
        timestamp: Option<i64>,
    ) -> Result<Worker, FleetError> {
        let name = fleet_adapters::worker_name(kind, &self.slug(), timestamp);
        self.spawn_worker_named(kind, name).await
    }

    /// Creates and starts a container under a caller-chosen name. A
    /// `Conflict` from `create_container` (a same-named container already
    /// exists, e.g. a reregistration racing a not-yet-reaped old one) is
    /// recovered by removing the collision and retrying once.
    async fn spawn_worker_named(&mut self, kind: WorkerKind, name: WorkerName) -> Result<Worker, FleetError> {
        let token = (self.token_getter)(&self.repo.id).await?;
        let now_wall = self.clock.wall_now();
        let labels = ContainerLabels {
            kind,
            repo_id: self.repo.id.clone(),
            created_at: now_wall,
            token_expires_at: Some(token.expires_at),
        };
        let spec = ContainerSpec {
            name: name.clone(),
            image: self.worker_image.clone(),
            registration_token: token.value.expose().to_string(),
            labels,
            env: vec![("REPO_ID".to_string(), self.repo.id.to_string())],
        };

        let container_id = match self.engine.create_container(spec.clone()).await {
            Ok(id) => id,
            Err(fleet_adapters::ContainerEngineError::Conflict(_)) => {
                warn!(worker = %name, "create_container conflict, reaping existing container and retrying");
                let stale_id = fleet_core::ContainerId::new(name.to_string());
                if let Err(err) = self.engine.remove_container(&stale_id).await {
                    if !matches!(err, fleet_adapters::ContainerEngineError::NotFound(_)) {
                        return Err(err.into());
                    }
                }
                self.engine.create_container(spec).await.map_err(FleetError::from)?
            }
            Err(err) => return Err(err.into()),
        };
        if let Err(err) = self.engine.start_container(&container_id).await {
            // Roll back the container we just created before surfacing the error.
            let _ = self.engine.remove_container(&container_id).await;
            return Err(err.into());
        }

        let mut worker = Worker::new(name, kind, self.repo.id.clone(), container_id, self.clock.now());
        worker.health = Health::Healthy;
        worker.token_expires_at = Some(token.expires_at);
        self.events.emit(Event::WorkerCreated {
            repo_id: self.repo.id.clone(),
            name: worker.name.clone(),
            kind: worker.kind,
        });
        Ok(worker)
    }

    /// The saturation scaling rule: spawn at most one Dynamic
    /// worker per invocation, only when every healthy worker is busy and
    /// `|dynamic| < max_dynamic`.
    async fn evaluate_and_scale(&mut self, busy: &BusyMap) -> Result<(), FleetError> {
        self.apply_busy_observations(busy);

        let available_count = self.state.all_workers().filter(|w| w.is_available()).count();
        if available_count == 0 {
            return Ok(());
        }
        let busy_count = self.state.all_workers().filter(|w| w.is_available() && w.busy).count();
        let saturated = busy_count == available_count;
        if !saturated || self.state.dynamic.len() as u32 >= self.max_dynamic {
            return Ok(());
        }

        let timestamp = self.clock.wall_now().timestamp();
        match self.spawn_worker(WorkerKind::Dynamic, Some(timestamp)).await {
            Ok(worker) => {
                self.events.emit(Event::ScaleUp { repo_id: self.repo.id.clone(), name: worker.name.clone() });
                self.state.push_dynamic(worker);
                self.state.last_scale_at = Some(self.clock.now());
                self.consecutive_spawn_failures = 0;
                Ok(())
            }
            Err(err) => {
                self.consecutive_spawn_failures += 1;
                if self.consecutive_spawn_failures > 3 {
                    self.events.emit(Event::RepoDegraded {
                        repo_id: self.repo.id.clone(),
                        reason: err.to_string(),
                    });
                }
                if err.is_transient() {
                    Ok(())
                } else {
                    Err(err)
                }
            }
        }
    }

    /// Removes idle Dynamic workers, oldest `created_at` first.
    /// Dedicated workers are never touched here.
    async fn idle_cleanup(&mut self) -> Result<Vec<WorkerName>, FleetError> {
        let now = self.clock.now();
        let idle: Vec<WorkerName> = self
            .state
            .dynamic
            .iter()
            .filter(|w| !w.busy && now.duration_since(w.last_activity_at) > self.idle_timeout)
            .map(|w| w.name.clone())
            .collect();

        let mut removed = Vec::new();
        for name in idle {
            if let Some(worker) = self.state.remove_worker(name.as_str()) {
                self.stop_and_remove(&worker).await?;
                self.events.emit(Event::ScaleDown { repo_id: self.repo.id.clone(), name: name.clone() });
                removed.push(name);
            }
        }
        Ok(removed)
    }

    async fn stop_and_remove(&self, worker: &Worker) -> Result<(), FleetError> {
        if let Err(err) = self.engine.stop_container(&worker.container_id, Duration::from_secs(10)).await {
            if !matches!(err, fleet_adapters::ContainerEngineError::NotFound(_)) {
                warn!(worker = %worker.name, %err, "stop_container failed during cleanup");
            }
        }
        if let Err(err) = self.engine.remove_container(&worker.container_id).await {
            if !matches!(err, fleet_adapters::ContainerEngineError::NotFound(_)) {
                return Err(err.into());
            }
        }
        if let Some(provider_id) = &worker.provider_id {
            if let Err(err) = self.provider.deregister_worker(&self.repo.id, provider_id).await {
                if !matches!(err, fleet_adapters::ProviderError::NotFound(_)) {
                    return Err(err.into());
                }
            }
        }
        Ok(())
    }

    /// If the removed worker was Dedicated, recreate it inline. The caller
    /// only invokes this while holding leadership, via
    /// `ScalerSupervisor`'s gate.
    async fn handle_worker_removed(&mut self, name: &WorkerName) {
        let was_dedicated = self.state.dedicated.as_ref().map(|w| &w.name) == Some(name);
        self.state.remove_worker(name.as_str());
        if was_dedicated {
            info!(repo = %self.repo.id, "dedicated worker removed, recreating");
            if let Err(err) = self.ensure_dedicated().await {
                warn!(repo = %self.repo.id, %err, "failed to recreate dedicated worker");
            }
        }
    }

    /// The reconciler already tore the stale container and Provider
    /// registration down; recreate under the new name and slot it back
    /// into whichever list (`dedicated`/`dynamic`) the old worker held.
    async fn handle_worker_reregistered(&mut self, old_name: &WorkerName, new_name: WorkerName) {
        let kind = match self.state.remove_worker(old_name.as_str()) {
            Some(worker) => worker.kind,
            None => {
                warn!(repo = %self.repo.id, worker = %old_name, "reregistered worker was not tracked locally");
                return;
            }
        };
        match self.spawn_worker_named(kind, new_name).await {
            Ok(worker) => match kind {
                WorkerKind::Dedicated => self.state.dedicated = Some(worker),
                WorkerKind::Dynamic => self.state.push_dynamic(worker),
            },
            Err(err) => {
                warn!(repo = %self.repo.id, worker = %old_name, %err, "failed to recreate reregistered worker");
            }
        }
    }

    fn set_worker_health(&mut self, name: &WorkerName, health: Health) {
        for worker in self.state.all_workers_mut() {
            if &worker.name == name {
                worker.health = health;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_adapters::{FakeContainerEngine, FakeProvider};
    use fleet_core::FakeClock;

    fn token_getter(
        provider: Arc<FakeProvider>,
    ) -> impl Fn(&RepoId) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<Token, FleetError>> + Send>> + Send + Sync
    {
        move |repo_id: &RepoId| {
            let provider = provider.clone();
            let repo_id = repo_id.clone();
            Box::pin(async move { provider.create_registration_token(&repo_id).await.map_err(FleetError::from) })
        }
    }

    fn controller(
        engine: Arc<FakeContainerEngine>,
        provider: Arc<FakeProvider>,
        clock: FakeClock,
        max_dynamic: u32,
        idle_timeout: Duration,
    ) -> PerRepoController {
        let repo = Repository::new("acme", "widgets");
        PerRepoController::spawn(
            repo,
            engine,
            provider.clone(),
            clock,
            EventBus::new(),
            max_dynamic,
            idle_timeout,
            "ghcr.io/example/runner:latest".to_string(),
            token_getter(provider),
        )
    }

    #[tokio::test]
    async fn ensure_dedicated_is_idempotent() {
        let engine = Arc::new(FakeContainerEngine::new());
        let provider = Arc::new(FakeProvider::new());
        let ctl = controller(engine.clone(), provider, FakeClock::new(), 3, Duration::from_secs(300));

        ctl.ensure_dedicated().await.unwrap();
        ctl.ensure_dedicated().await.unwrap();

        assert_eq!(engine.create_call_count(), 1);
    }

    #[tokio::test]
    async fn evaluate_and_scale_spawns_one_dynamic_worker_when_saturated() {
        let engine = Arc::new(FakeContainerEngine::new());
        let provider = Arc::new(FakeProvider::new());
        let ctl = controller(engine.clone(), provider, FakeClock::new(), 3, Duration::from_secs(300));
        ctl.ensure_dedicated().await.unwrap();

        let mut busy = BusyMap::new();
        busy.insert("orchestrator-dedicated-acme-widgets".to_string(), true);
        ctl.evaluate_and_scale(busy.clone()).await.unwrap();

        let snapshot = ctl.snapshot().await.unwrap();
        assert_eq!(snapshot.dynamic.len(), 1);
        assert_eq!(engine.create_call_count(), 2);
    }

    #[tokio::test]
    async fn evaluate_and_scale_stops_at_max_dynamic() {
        let engine = Arc::new(FakeContainerEngine::new());
        let provider = Arc::new(FakeProvider::new());
        let ctl = controller(engine.clone(), provider, FakeClock::new(), 1, Duration::from_secs(300));
        ctl.ensure_dedicated().await.unwrap();

        let mut busy = BusyMap::new();
        busy.insert("orchestrator-dedicated-acme-widgets".to_string(), true);

        ctl.evaluate_and_scale(busy.clone()).await.unwrap();
        let after_first = ctl.snapshot().await.unwrap();
        assert_eq!(after_first.dynamic.len(), 1);

        // Still saturated (dedicated + one dynamic both busy) but at N_max=1: no more spawns.
        busy.insert(after_first.dynamic[0].name.to_string(), true);
        ctl.evaluate_and_scale(busy).await.unwrap();
        let after_second = ctl.snapshot().await.unwrap();
        assert_eq!(after_second.dynamic.len(), 1);
        assert_eq!(engine.create_call_count(), 2);
    }

    #[tokio::test]
    async fn idle_cleanup_removes_only_idle_dynamic_workers_oldest_first() {
        let engine = Arc::new(FakeContainerEngine::new());
        let provider = Arc::new(FakeProvider::new());
        let clock = FakeClock::new();
        let ctl = controller(engine.clone(), provider, clock.clone(), 3, Duration::from_secs(1));
        ctl.ensure_dedicated().await.unwrap();

        let mut busy = BusyMap::new();
        busy.insert("orchestrator-dedicated-acme-widgets".to_string(), true);
        // Tick 1: saturated on {dedicated} alone -> spawns dynamic #1 (starts idle).
        ctl.evaluate_and_scale(busy.clone()).await.unwrap();
        let first_dynamic = ctl.snapshot().await.unwrap().dynamic[0].name.to_string();

        // Tick 2: dynamic #1 has since picked up a job -> saturated again -> spawns dynamic #2.
        busy.insert(first_dynamic.clone(), true);
        clock.advance(Duration::from_millis(10));
        ctl.evaluate_and_scale(busy.clone()).await.unwrap();

        let before = ctl.snapshot().await.unwrap();
        assert_eq!(before.dynamic.len(), 2);

        // Tick 3: dynamic #1 finishes its job and goes idle again; no further saturation.
        busy.remove(&first_dynamic);
        clock.advance(Duration::from_millis(10));
        ctl.evaluate_and_scale(busy).await.unwrap();
        assert_eq!(ctl.snapshot().await.unwrap().dynamic.len(), 2);

        clock.advance(Duration::from_secs(2));
        let removed = ctl.idle_cleanup().await.unwrap();
        assert_eq!(removed.len(), 2);

        let after = ctl.snapshot().await.unwrap();
        assert!(after.dynamic.is_empty());
        assert!(after.dedicated.is_some());
        assert_eq!(engine.remove_call_count(), 2);
    }

    #[tokio::test]
    async fn idle_worker_at_exactly_t_idle_is_not_yet_removed() {
        let engine = Arc::new(FakeContainerEngine::new());
        let provider = Arc::new(FakeProvider::new());
        let clock = FakeClock::new();
        let ctl = controller(engine, provider, clock.clone(), 3, Duration::from_secs(1));
        ctl.ensure_dedicated().await.unwrap();

        let mut busy = BusyMap::new();
        busy.insert("orchestrator-dedicated-acme-widgets".to_string(), true);
        ctl.evaluate_and_scale(busy).await.unwrap();

        clock.advance(Duration::from_secs(1));
        let removed = ctl.idle_cleanup().await.unwrap();
        assert!(removed.is_empty());

        clock.advance(Duration::from_nanos(1));
        let removed = ctl.idle_cleanup().await.unwrap();
        assert_eq!(removed.len(), 1);
    }

    #[tokio::test]
    async fn handle_worker_removed_recreates_dedicated() {
        let engine = Arc::new(FakeContainerEngine::new());
        let provider = Arc::new(FakeProvider::new());
        let ctl = controller(engine.clone(), provider, FakeClock::new(), 3, Duration::from_secs(300));
        ctl.ensure_dedicated().await.unwrap();
        let before = ctl.snapshot().await.unwrap();
        let dedicated_name = before.dedicated.unwrap().name;

        ctl.handle_worker_removed(dedicated_name).await;

        let after = ctl.snapshot().await.unwrap();
        assert!(after.dedicated.is_some());
        assert_eq!(engine.create_call_count(), 2);
    }

    use proptest::prelude::*;

    proptest! {
        /// Across an arbitrary sequence of saturation ticks, `evaluate_and_scale`
        /// never spawns more than one Dynamic worker per call and never grows
        /// `dynamic` past `max_dynamic`.
        #[test]
        fn evaluate_and_scale_respects_one_spawn_per_tick_and_max_dynamic(
            max_dynamic in 1u32..5,
            saturated_ticks in proptest::collection::vec(any::<bool>(), 1..10),
        ) {
            let rt = tokio::runtime::Runtime::new().unwrap();
            rt.block_on(async {
                let engine = Arc::new(FakeContainerEngine::new());
                let provider = Arc::new(FakeProvider::new());
                let clock = FakeClock::new();
                let ctl = controller(engine, provider, clock.clone(), max_dynamic, Duration::from_secs(300));
                ctl.ensure_dedicated().await.unwrap();

                for saturate in saturated_ticks {
                    clock.advance(Duration::from_secs(1));
                    let before_count = ctl.snapshot().await.unwrap().dynamic.len();

                    let mut busy = BusyMap::new();
                    if saturate {
                        for worker in ctl.snapshot().await.unwrap().all_workers() {
                            busy.insert(worker.name.to_string(), true);
                        }
                    }
                    ctl.evaluate_and_scale(busy).await.unwrap();

                    let after = ctl.snapshot().await.unwrap();
                    let spawned_this_tick = after.dynamic.len().saturating_sub(before_count);
                    prop_assert!(spawned_this_tick <= 1);
                    prop_assert!(after.dynamic.len() as u32 <= max_dynamic);
                }
            });
        }
    }
}
