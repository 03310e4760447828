// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Distributed coordination store consumed only by `LeaderElector`.

mod in_memory;

pub use in_memory::InMemoryCoordinationStore;

use crate::error::CoordinationError;
use async_trait::async_trait;
use fleet_core::HolderId;
use std::time::Duration;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinationMessage {
    Heartbeat { holder_id: HolderId, term: u64 },
    ElectionResult { holder_id: HolderId, term: u64 },
}

#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Compare-and-set: succeeds only if no unexpired lease exists for `key`.
    async fn try_acquire_lease(
        &self,
        key: &str,
        holder_id: &HolderId,
        ttl: Duration,
    ) -> Result<bool, CoordinationError>;

    /// Succeeds only if `holder_id` is the current holder.
    async fn renew_lease(
        &self,
        key: &str,
        holder_id: &HolderId,
        ttl: Duration,
    ) -> Result<bool, CoordinationError>;

    async fn release_lease(&self, key: &str, holder_id: &HolderId) -> Result<(), CoordinationError>;

    async fn publish(&self, topic: &str, message: CoordinationMessage) -> Result<(), CoordinationError>;

    fn subscribe(&self, topic: &str) -> broadcast::Receiver<CoordinationMessage>;
}
