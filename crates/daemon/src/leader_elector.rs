// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! LeaderElector: exactly-one-leader state machine over a
//! [`CoordinationStore`] lease, with heartbeat publish/subscribe for fast
//! follower takeover.

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use fleet_adapters::{CoordinationMessage, CoordinationStore};
use fleet_core::{Clock, Event, HolderId, LeaderState};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::events::EventBus;

const LEASE_KEY: &str = "fleet-leader";
const HEARTBEAT_TOPIC: &str = "fleet-leader-heartbeat";

struct Shared {
    state: LeaderState,
    term: u64,
    since: DateTime<Utc>,
}

/// Leadership snapshot readable by any component without locking, per the
/// spec's "others read leader status through an atomic snapshot" rule.
pub struct LeaderElector<S: CoordinationStore, C: Clock> {
    store: Arc<S>,
    clock: C,
    events: EventBus,
    holder_id: HolderId,
    lease_ttl: Duration,
    heartbeat_interval: Duration,
    election_timeout: Duration,
    shared: ArcSwap<Shared>,
}

impl<S: CoordinationStore + 'static, C: Clock> LeaderElector<S, C> {
    pub fn new(
        store: Arc<S>,
        clock: C,
        events: EventBus,
        holder_id: HolderId,
        lease_ttl: Duration,
        heartbeat_interval: Duration,
        election_timeout: Duration,
    ) -> Self {
        let since = clock.wall_now();
        Self {
            store,
            clock,
            events,
            holder_id,
            lease_ttl,
            heartbeat_interval,
            election_timeout,
            shared: ArcSwap::from_pointee(Shared { state: LeaderState::Follower, term: 0, since }),
        }
    }

    pub fn is_leader(&self) -> bool {
        self.shared.load().state == LeaderState::Leader
    }

    pub fn term(&self) -> u64 {
        self.shared.load().term
    }

    /// How long the current state has held, per the clock this instance
    /// was constructed with.
    pub fn time_in_state(&self) -> chrono::Duration {
        self.clock.wall_now() - self.shared.load().since
    }

    /// Runs the state machine until `cancel` fires. Intended to be spawned
    /// as its own task by `ScalerSupervisor`.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut heartbeats = self.store.subscribe(HEARTBEAT_TOPIC);

        loop {
            if cancel.is_cancelled() {
                self.step_down_and_release().await;
                return;
            }

            match self.shared.load().state {
                LeaderState::Follower => {
                    tokio::select! {
                        _ = cancel.cancelled() => { self.step_down_and_release().await; return; }
                        msg = heartbeats.recv() => {
                            if let Ok(CoordinationMessage::Heartbeat { holder_id, term }) = msg {
                                if holder_id != self.holder_id {
                                    self.set(LeaderState::Follower, term);
                                }
                            }
                        }
                        _ = tokio::time::sleep(self.election_timeout) => {
                            // No heartbeat observed within T_elect: stand for election.
                            self.set(LeaderState::Candidate, self.term());
                        }
                    }
                }
                LeaderState::Candidate => {
                    let candidacy_age = self.time_in_state();
                    let acquired = self
                        .store
                        .try_acquire_lease(LEASE_KEY, &self.holder_id, self.lease_ttl)
                        .await
                        .unwrap_or(false);
                    if acquired {
                        let new_term = self.term() + 1;
                        self.set(LeaderState::Leader, new_term);
                        let _ = self
                            .store
                            .publish(
                                HEARTBEAT_TOPIC,
                                CoordinationMessage::ElectionResult {
                                    holder_id: self.holder_id.clone(),
                                    term: new_term,
                                },
                            )
                            .await;
                        self.events
                            .emit(Event::LeaderChanged { holder_id: self.holder_id.clone(), term: new_term });
                        info!(term = new_term, candidacy_ms = candidacy_age.num_milliseconds(), "became leader");
                    } else {
                        self.set(LeaderState::Follower, self.term());
                        let jitter = Duration::from_millis(rand::random::<u64>() % 250);
                        tokio::time::sleep(jitter).await;
                    }
                }
                LeaderState::Leader => {
                    tokio::select! {
                        _ = cancel.cancelled() => { self.step_down_and_release().await; return; }
                        _ = tokio::time::sleep(self.heartbeat_interval) => {
                            let renewed = self
                                .store
                                .renew_lease(LEASE_KEY, &self.holder_id, self.lease_ttl)
                                .await
                                .unwrap_or(false);
                            if renewed {
                                let _ = self
                                    .store
                                    .publish(
                                        HEARTBEAT_TOPIC,
                                        CoordinationMessage::Heartbeat {
                                            holder_id: self.holder_id.clone(),
                                            term: self.term(),
                                        },
                                    )
                                    .await;
                            } else {
                                warn!(leader_for_ms = self.time_in_state().num_milliseconds(), "lease renewal failed, stepping down");
                                self.set(LeaderState::Follower, self.term());
                                let jitter = Duration::from_millis(rand::random::<u64>() % 250);
                                tokio::time::sleep(jitter).await;
                            }
                        }
                    }
                }
            }
        }
    }

    fn set(&self, state: LeaderState, term: u64) {
        self.shared.store(Arc::new(Shared { state, term, since: self.clock.wall_now() }));
    }

    async fn step_down_and_release(&self) {
        if self.is_leader() {
            let _ = self.store.release_lease(LEASE_KEY, &self.holder_id).await;
        }
        self.set(LeaderState::Follower, self.term());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_adapters::InMemoryCoordinationStore;
    use fleet_core::FakeClock;

    fn elector(
        store: Arc<InMemoryCoordinationStore<FakeClock>>,
        clock: FakeClock,
        id: &str,
    ) -> Arc<LeaderElector<InMemoryCoordinationStore<FakeClock>, FakeClock>> {
        Arc::new(LeaderElector::new(
            store,
            clock,
            EventBus::new(),
            HolderId::new(id),
            Duration::from_secs(10),
            Duration::from_millis(50),
            Duration::from_millis(100),
        ))
    }

    #[tokio::test]
    async fn single_instance_becomes_leader() {
        let clock = FakeClock::new();
        let store = Arc::new(InMemoryCoordinationStore::new(clock.clone()));
        let elector = elector(store, clock, "instance-a");

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(elector.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(elector.is_leader());

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), handle).await;
    }

    #[tokio::test]
    async fn only_one_of_two_instances_becomes_leader() {
        let clock = FakeClock::new();
        let store = Arc::new(InMemoryCoordinationStore::new(clock.clone()));
        let a = elector(store.clone(), clock.clone(), "instance-a");
        let b = elector(store, clock, "instance-b");

        let cancel = CancellationToken::new();
        let ha = tokio::spawn(a.clone().run(cancel.clone()));
        let hb = tokio::spawn(b.clone().run(cancel.clone()));
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_ne!(a.is_leader(), b.is_leader());

        cancel.cancel();
        let _ = tokio::time::timeout(Duration::from_secs(1), ha).await;
        let _ = tokio::time::timeout(Duration::from_secs(1), hb).await;
    }
}
