// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-process `CoordinationStore`.
//!
//! Suitable for the default single-binary deployment and for tests that
//! exercise real CAS semantics across multiple `LeaderElector` instances in
//! one process, instead of mocking the store away entirely.

use super::{CoordinationMessage, CoordinationStore};
use crate::error::CoordinationError;
use async_trait::async_trait;
use fleet_core::{Clock, HolderId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::broadcast;

struct Lease {
    holder_id: HolderId,
    expires_at: std::time::Instant,
}

pub struct InMemoryCoordinationStore<C: Clock> {
    clock: C,
    leases: Mutex<HashMap<String, Lease>>,
    topics: Mutex<HashMap<String, broadcast::Sender<CoordinationMessage>>>,
}

impl<C: Clock> InMemoryCoordinationStore<C> {
    pub fn new(clock: C) -> Self {
        Self { clock, leases: Mutex::new(HashMap::new()), topics: Mutex::new(HashMap::new()) }
    }

    fn sender(&self, topic: &str) -> broadcast::Sender<CoordinationMessage> {
        let mut topics = self.topics.lock();
        topics
            .entry(topic.to_string())
            .or_insert_with(|| broadcast::channel(64).0)
            .clone()
    }
}

#[async_trait]
impl<C: Clock> CoordinationStore for InMemoryCoordinationStore<C> {
    async fn try_acquire_lease(
        &self,
        key: &str,
        holder_id: &HolderId,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let now = self.clock.now();
        let mut leases = self.leases.lock();
        let acquired = match leases.get(key) {
            Some(existing) if existing.expires_at > now => false,
            _ => true,
        };
        if acquired {
            leases.insert(
                key.to_string(),
                Lease { holder_id: holder_id.clone(), expires_at: now + ttl },
            );
        }
        Ok(acquired)
    }

    async fn renew_lease(
        &self,
        key: &str,
        holder_id: &HolderId,
        ttl: Duration,
    ) -> Result<bool, CoordinationError> {
        let now = self.clock.now();
        let mut leases = self.leases.lock();
        match leases.get_mut(key) {
            Some(lease) if &lease.holder_id == holder_id => {
                lease.expires_at = now + ttl;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_lease(&self, key: &str, holder_id: &HolderId) -> Result<(), CoordinationError> {
        let mut leases = self.leases.lock();
        if leases.get(key).map(|l| &l.holder_id) == Some(holder_id) {
            leases.remove(key);
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, message: CoordinationMessage) -> Result<(), CoordinationError> {
        // No subscribers is not an error — heartbeats published before any
        // follower subscribes are simply dropped.
        let _ = self.sender(topic).send(message);
        Ok(())
    }

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<CoordinationMessage> {
        self.sender(topic).subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_core::FakeClock;

    #[tokio::test]
    async fn try_acquire_lease_is_cas_across_holders() {
        let store = InMemoryCoordinationStore::new(FakeClock::new());
        let a = HolderId::new("instance-a");
        let b = HolderId::new("instance-b");

        assert!(store.try_acquire_lease("leader", &a, Duration::from_secs(10)).await.unwrap());
        assert!(!store.try_acquire_lease("leader", &b, Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn lease_becomes_acquirable_again_after_expiry() {
        let clock = FakeClock::new();
        let store = InMemoryCoordinationStore::new(clock.clone());
        let a = HolderId::new("instance-a");
        let b = HolderId::new("instance-b");

        store.try_acquire_lease("leader", &a, Duration::from_secs(10)).await.unwrap();
        clock.advance(Duration::from_secs(11));
        assert!(store.try_acquire_lease("leader", &b, Duration::from_secs(10)).await.unwrap());
    }

    #[tokio::test]
    async fn renew_lease_fails_for_non_holder() {
        let store = InMemoryCoordinationStore::new(FakeClock::new());
        let a = HolderId::new("instance-a");
        let b = HolderId::new("instance-b");

        store.try_acquire_lease("leader", &a, Duration::from_secs(10)).await.unwrap();
        assert!(!store.renew_lease("leader", &b, Duration::from_secs(10)).await.unwrap());
        assert!(store.renew_lease("leader", &a, Duration::from_secs(10)).await.unwrap());
    }
}
