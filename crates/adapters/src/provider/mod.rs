// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Provider: the upstream CI system workers register with.

#[cfg(any(test, feature = "test-support"))]
mod fake;
mod http;

#[cfg(any(test, feature = "test-support"))]
pub use fake::FakeProvider;
pub use http::{HttpProvider, HttpProviderConfig};

use crate::error::ProviderError;
use async_trait::async_trait;
use fleet_core::{ProviderWorkerId, RepoId, Token};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderWorkerStatus {
    Online,
    Offline,
}

#[derive(Debug, Clone)]
pub struct ProviderWorker {
    pub id: ProviderWorkerId,
    pub name: String,
    pub status: ProviderWorkerStatus,
    pub busy: bool,
}

#[derive(Debug, Clone)]
pub struct JobSummary {
    pub id: String,
}

#[async_trait]
pub trait Provider: Send + Sync {
    async fn create_registration_token(&self, repo_id: &RepoId) -> Result<Token, ProviderError>;

    async fn list_workers(&self, repo_id: &RepoId) -> Result<Vec<ProviderWorker>, ProviderError>;

    async fn deregister_worker(
        &self,
        repo_id: &RepoId,
        worker_id: &ProviderWorkerId,
    ) -> Result<(), ProviderError>;

    /// Used only for busy heuristics; no core logic should depend
    /// on its contents beyond counting.
    async fn list_active_jobs(&self, repo_id: &RepoId) -> Result<Vec<JobSummary>, ProviderError>;
}
